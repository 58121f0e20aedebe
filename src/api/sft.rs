//! 图片目录 -> SFT 训练数据集
//!
//! ```ignore
//! let config = PipelineConfig::load("pipeline.json5")?;
//! let invoker = Arc::new(OpenAiCompatInvoker::new(&config.model)?);
//! let summary = generate_sft_dataset("data/images", "out/sft.jsonl", &config, invoker, Some(100))?;
//! println!("{} 条样本", summary.examples);
//! ```

use crate::core::config::PipelineConfig;
use crate::core::error::PipelineError;
use crate::core::formatter::SftFormatter;
use crate::core::invoker::ModelInvoker;
use crate::core::jsonl::JsonlWriter;
use crate::core::media::ImageNormalizer;
use crate::core::payload::PayloadBuilder;
use crate::core::pipeline::{BatchExecutor, Pipeline};
use crate::core::record::{Record, ID_FIELD};
use crate::core::response::ResponseParser;
use crate::core::stages::{
    ImageEncodeStage, MessageStage, ModelInvokeStage, ResponseParseStage, SftFormatStage,
};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];

const IMAGE_PATH_FIELD: &str = "image_path";

/// 数据集生成结果
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSummary {
    pub images: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// 写出的训练样本数（一张图可产生多条）
    pub examples: usize,
    pub output: PathBuf,
    /// 有失败记录时才会写出
    pub errors_output: Option<PathBuf>,
}

/// 列出目录下的图片文件（不递归，扩展名不区分大小写），按路径排序
pub fn list_image_files(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, PipelineError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir.as_ref())? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if path.is_file() && is_image {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// 每张图片一条记录，id 为序号
pub fn image_records(paths: &[PathBuf]) -> Vec<Record> {
    paths
        .iter()
        .enumerate()
        .map(|(i, path)| {
            let mut record = Record::with_id(i);
            record.set(IMAGE_PATH_FIELD, path.to_string_lossy().to_string());
            record
        })
        .collect()
}

/// 编码 -> 消息 -> 模型 -> 解析 -> 格式化
pub fn build_sft_pipeline(
    config: &PipelineConfig,
    invoker: Arc<dyn ModelInvoker>,
) -> Result<Pipeline, PipelineError> {
    let normalizer = ImageNormalizer::with_config(config.image.normalize_config());
    let builder = PayloadBuilder::new(config.prompt.part_order);

    Pipeline::new(
        vec![
            Box::new(ImageEncodeStage::new(normalizer)),
            Box::new(MessageStage::new(builder, &config.prompt.qa_prompt)),
            Box::new(
                ModelInvokeStage::new(invoker).with_system_prompt(config.prompt.system_prompt.clone()),
            ),
            Box::new(ResponseParseStage::new(ResponseParser::new())),
            Box::new(SftFormatStage::new(SftFormatter::with_image_prefix(
                &config.image.image_prefix,
            ))),
        ],
        &[ID_FIELD, IMAGE_PATH_FIELD],
    )
}

/// `out/sft.jsonl` -> `out/sft.errors.jsonl`
pub fn errors_path(output: &Path) -> PathBuf {
    output.with_extension("errors.jsonl")
}

pub fn generate_sft_dataset(
    image_dir: impl AsRef<Path>,
    output: impl AsRef<Path>,
    config: &PipelineConfig,
    invoker: Arc<dyn ModelInvoker>,
    limit: Option<usize>,
) -> Result<DatasetSummary, PipelineError> {
    let output = output.as_ref();
    let mut paths = list_image_files(image_dir.as_ref())?;
    if let Some(limit) = limit {
        paths.truncate(limit);
    }
    info!(
        "🖼️ Found {} images in {}",
        paths.len(),
        image_dir.as_ref().display()
    );

    let pipeline = build_sft_pipeline(config, invoker)?;
    let report = BatchExecutor::new(config.concurrency).run(&pipeline, image_records(&paths))?;

    let mut writer = JsonlWriter::create(output)?;
    for record in report.records.iter().filter(|r| r.is_ok()) {
        if let Some(examples) = record.get("sft_examples").and_then(|v| v.as_array()) {
            writer.write_all(examples)?;
        }
    }
    let examples = writer.finish()?;

    let errors_output = if report.failed > 0 {
        let path = errors_path(output);
        let mut errors = JsonlWriter::create(&path)?;
        for record in report.failures() {
            errors.write(&failure_line(record))?;
        }
        errors.finish()?;
        warn!("⚠️ {} images failed, see {}", report.failed, path.display());
        Some(path)
    } else {
        None
    };

    info!(
        "✅ SFT dataset: {} examples from {}/{} images -> {}",
        examples,
        report.succeeded,
        report.total(),
        output.display()
    );

    Ok(DatasetSummary {
        images: report.total(),
        succeeded: report.succeeded,
        failed: report.failed,
        examples,
        output: output.to_path_buf(),
        errors_output,
    })
}

/// 失败记录只保留定位信息，不写出 base64 等大字段
fn failure_line(record: &Record) -> serde_json::Value {
    serde_json::json!({
        "id": record.id(),
        "image_path": record.get(IMAGE_PATH_FIELD),
        "error": record.error(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_image_files_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.PNG", "a.jpg", "c.webp", "notes.txt", "d.Jpeg", "noext"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.jpg")).unwrap();

        let names: Vec<String> = list_image_files(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.jpg", "b.PNG", "c.webp", "d.Jpeg"]);
    }

    #[test]
    fn test_image_records_ids_follow_order() {
        let records = image_records(&[PathBuf::from("x/1.jpg"), PathBuf::from("x/2.jpg")]);
        assert_eq!(records[0].id(), Some(&serde_json::json!(0)));
        assert_eq!(records[1].id(), Some(&serde_json::json!(1)));
        assert_eq!(records[1].get("image_path"), Some(&serde_json::json!("x/2.jpg")));
    }

    #[test]
    fn test_errors_path() {
        assert_eq!(errors_path(Path::new("out/sft.jsonl")), PathBuf::from("out/sft.errors.jsonl"));
        assert_eq!(errors_path(Path::new("dataset")), PathBuf::from("dataset.errors.jsonl"));
    }

    #[test]
    fn test_sft_pipeline_stage_order() {
        let invoker = Arc::new(crate::core::stages::model::tests::MockInvoker::replying("{}"));
        let pipeline = build_sft_pipeline(&PipelineConfig::default(), invoker).unwrap();
        assert_eq!(
            pipeline.stage_names(),
            vec![
                "image_encoder",
                "message_builder",
                "model_invoker",
                "response_parser",
                "sft_formatter"
            ]
        );
    }
}
