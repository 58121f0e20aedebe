//! 纯文本批处理：JSONL 输入 -> 提示 -> 模型 -> 摘要 -> JSONL 输出

use crate::core::config::PipelineConfig;
use crate::core::error::PipelineError;
use crate::core::invoker::ModelInvoker;
use crate::core::jsonl::{read_records, JsonlWriter};
use crate::core::pipeline::{BatchExecutor, BatchReport, Pipeline, Stage};
use crate::core::record::Record;
use crate::core::stages::{ModelInvokeStage, SummarizeStage, TemplateStage, TextPromptStage};
use log::info;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct TextOptions {
    /// 加在输入文本前的指令
    pub instruction: Option<String>,
    /// 设置后先用 `{{field}}` 模板渲染输入，替代 `input_text` 字段
    pub template: Option<String>,
    pub summary_chars: usize,
}

impl Default for TextOptions {
    fn default() -> Self {
        Self {
            instruction: None,
            template: None,
            summary_chars: 100,
        }
    }
}

pub fn build_text_pipeline(
    config: &PipelineConfig,
    invoker: Arc<dyn ModelInvoker>,
    options: &TextOptions,
    provided: &[&str],
) -> Result<Pipeline, PipelineError> {
    let mut stages: Vec<Box<dyn Stage>> = Vec::new();

    let input_field = match &options.template {
        Some(template) => {
            stages.push(Box::new(TemplateStage::new(template)));
            "prompt"
        }
        None => "input_text",
    };
    stages.push(Box::new(
        TextPromptStage::new(options.instruction.clone()).with_fields(input_field, "processed_text"),
    ));
    stages.push(Box::new(
        ModelInvokeStage::new(invoker)
            .with_system_prompt(config.prompt.system_prompt.clone())
            .with_fields("processed_text", "model_response"),
    ));
    stages.push(Box::new(SummarizeStage::new(options.summary_chars)));

    Pipeline::new(stages, provided)
}

/// 所有记录都具备的字段
pub(crate) fn common_fields(records: &[Record]) -> BTreeSet<String> {
    let mut iter = records.iter();
    let mut common: BTreeSet<String> = match iter.next() {
        Some(first) => first.fields().keys().cloned().collect(),
        None => return BTreeSet::new(),
    };
    for record in iter {
        common.retain(|key| record.contains(key));
    }
    common
}

pub fn run_text_batch(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    config: &PipelineConfig,
    invoker: Arc<dyn ModelInvoker>,
    options: &TextOptions,
) -> Result<BatchReport, PipelineError> {
    let records = read_records(input.as_ref())?;
    info!("📝 Loaded {} text records from {}", records.len(), input.as_ref().display());

    if records.is_empty() {
        JsonlWriter::create(output.as_ref())?.finish()?;
        info!("📭 No text records, wrote empty {}", output.as_ref().display());
        return Ok(BatchReport {
            records,
            succeeded: 0,
            failed: 0,
        });
    }

    let fields = common_fields(&records);
    let provided: Vec<&str> = fields.iter().map(String::as_str).collect();
    let pipeline = build_text_pipeline(config, invoker, options, &provided)?;

    let report = BatchExecutor::new(config.concurrency).run(&pipeline, records)?;

    let mut writer = JsonlWriter::create(output.as_ref())?;
    writer.write_all(&report.records)?;
    writer.finish()?;

    info!(
        "✅ Text batch: {}/{} succeeded -> {}",
        report.succeeded,
        report.total(),
        output.as_ref().display()
    );
    Ok(report)
}
