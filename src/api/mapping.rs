//! 字段映射批处理：JSONL -> 字段映射 -> 模板 -> 输出映射 -> JSONL
//!
//! 不调用模型，用于把已有数据集改写成新的请求格式。
//!
//! ```ignore
//! let options = MappingOptions {
//!     fields: vec![("question".into(), "problem".into())],
//!     template: Some("题目：{{problem}}".into()),
//!     output: vec![("query".into(), "prompt".into()), ("temperature".into(), "0.6".into())],
//! };
//! let report = run_mapping_batch("in.jsonl", "out.jsonl", &options, 4)?;
//! ```

use crate::api::sft::errors_path;
use crate::api::text::common_fields;
use crate::core::error::PipelineError;
use crate::core::jsonl::{read_records, JsonlWriter};
use crate::core::pipeline::{BatchExecutor, BatchReport, Pipeline, Stage};
use crate::core::record::Record;
use crate::core::stages::{FieldMapStage, OutputMapStage, TemplateStage};
use log::{info, warn};
use serde_json::Value;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingOptions {
    /// 源字段 -> 目标字段
    pub fields: Vec<(String, String)>,
    /// `{{field}}` 模板，渲染结果写入 `prompt`
    pub template: Option<String>,
    /// 输出键 -> 字段名或字面量，只有这些键会写出
    pub output: Vec<(String, String)>,
}

/// 返回 pipeline 与用于投影的输出映射
pub fn build_mapping_pipeline(
    options: &MappingOptions,
    provided: &[&str],
) -> Result<(Pipeline, OutputMapStage), PipelineError> {
    if options.output.is_empty() {
        return Err(PipelineError::Config("至少需要一个输出映射".to_string()));
    }

    let mut stages: Vec<Box<dyn Stage>> = Vec::new();
    if !options.fields.is_empty() {
        stages.push(Box::new(FieldMapStage::new(options.fields.iter().cloned())));
    }
    if let Some(template) = &options.template {
        stages.push(Box::new(TemplateStage::new(template)));
    }
    stages.push(Box::new(OutputMapStage::new(options.output.iter().cloned())));

    let pipeline = Pipeline::new(stages, provided)?;
    Ok((pipeline, OutputMapStage::new(options.output.iter().cloned())))
}

pub fn run_mapping_batch(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    options: &MappingOptions,
    concurrency: usize,
) -> Result<BatchReport, PipelineError> {
    let output = output.as_ref();
    let records = read_records(input.as_ref())?;
    info!("🗂️ Loaded {} records from {}", records.len(), input.as_ref().display());

    if records.is_empty() {
        JsonlWriter::create(output)?.finish()?;
        info!("📭 No records to map, wrote empty {}", output.display());
        return Ok(BatchReport {
            records,
            succeeded: 0,
            failed: 0,
        });
    }
    let fields = common_fields(&records);
    let provided: Vec<&str> = fields.iter().map(String::as_str).collect();
    let (pipeline, projection) = build_mapping_pipeline(options, &provided)?;

    let report = BatchExecutor::new(concurrency).run(&pipeline, records)?;

    let mut writer = JsonlWriter::create(output)?;
    for record in report.records.iter().filter(|r| r.is_ok()) {
        writer.write(&Value::Object(projection.project(record)))?;
    }
    writer.finish()?;

    if report.failed > 0 {
        let path = errors_path(output);
        let mut errors = JsonlWriter::create(&path)?;
        for record in report.failures() {
            errors.write(&failure_line(record))?;
        }
        errors.finish()?;
        warn!("⚠️ {} records failed, see {}", report.failed, path.display());
    }

    info!(
        "✅ Mapping batch: {}/{} succeeded -> {}",
        report.succeeded,
        report.total(),
        output.display()
    );
    Ok(report)
}

fn failure_line(record: &Record) -> Value {
    serde_json::json!({
        "id": record.id(),
        "error": record.error(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use serde_json::json;

    fn options() -> MappingOptions {
        MappingOptions {
            fields: vec![
                ("question".into(), "problem".into()),
                ("final_answer".into(), "reference".into()),
            ],
            template: Some("问题: {{problem}}\n参考: {{reference}}".into()),
            output: vec![
                ("query".into(), "prompt".into()),
                ("temperature".into(), "0.6".into()),
                ("max_output_tokens".into(), "4096".into()),
            ],
        }
    }

    #[test]
    fn test_mapping_pipeline_renders_and_projects() {
        let (pipeline, projection) =
            build_mapping_pipeline(&options(), &["id", "question", "final_answer"]).unwrap();

        let mut record = Record::with_id(7);
        record.set("question", "1+1=?");
        record.set("final_answer", 2);
        let done = pipeline.run(record);
        assert!(done.is_ok());
        assert_eq!(done.get("problem"), Some(&json!("1+1=?")));
        assert_eq!(done.get("question"), Some(&json!("1+1=?")));

        assert_eq!(
            Value::Object(projection.project(&done)),
            json!({"query": "问题: 1+1=?\n参考: 2", "temperature": 0.6, "max_output_tokens": 4096})
        );
    }

    #[test]
    fn test_mapping_pipeline_missing_source_is_fatal() {
        match build_mapping_pipeline(&options(), &["id", "question"]) {
            Err(e) => assert_eq!(e.kind(), ErrorKind::MissingFieldError),
            Ok(_) => panic!("缺少 final_answer 应该在构造时失败"),
        }
    }

    #[test]
    fn test_mapping_requires_output() {
        let options = MappingOptions {
            output: Vec::new(),
            ..options()
        };
        assert!(matches!(
            build_mapping_pipeline(&options, &["question", "final_answer"]),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_mapping_batch_writes_only_output_keys() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.jsonl");
        let output = dir.path().join("out.jsonl");
        std::fs::write(
            &input,
            "{\"id\": 1, \"question\": \"a\", \"final_answer\": \"b\", \"extra\": true}\n\
             {\"id\": 2, \"question\": \"c\", \"final_answer\": \"d\"}\n",
        )
        .unwrap();

        let report = run_mapping_batch(&input, &output, &options(), 2).unwrap();
        assert_eq!(report.succeeded, 2);
        assert!(!errors_path(&output).exists());

        let lines: Vec<Value> = std::fs::read_to_string(&output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(
            lines,
            vec![
                json!({"query": "问题: a\n参考: b", "temperature": 0.6, "max_output_tokens": 4096}),
                json!({"query": "问题: c\n参考: d", "temperature": 0.6, "max_output_tokens": 4096}),
            ]
        );
    }

    #[test]
    fn test_mapping_batch_empty_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.jsonl");
        let output = dir.path().join("out.jsonl");
        std::fs::write(&input, "").unwrap();

        let report = run_mapping_batch(&input, &output, &options(), 1).unwrap();
        assert_eq!(report.total(), 0);
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "");
    }
}
