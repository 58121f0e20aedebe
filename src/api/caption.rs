//! 视频描述生成：抽帧 -> 多图消息 -> 模型 -> caption

use crate::core::config::PipelineConfig;
use crate::core::error::PipelineError;
use crate::core::invoker::ModelInvoker;
use crate::core::jsonl::JsonlWriter;
use crate::core::media::{FfmpegDecoder, FrameSampler, VideoDecoder};
use crate::core::payload::{PartOrder, PayloadBuilder};
use crate::core::pipeline::{BatchExecutor, BatchReport, Pipeline};
use crate::core::record::{Record, ID_FIELD};
use crate::core::stages::{MessageStage, ModelInvokeStage, VideoFrameStage};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const VIDEO_PATH_FIELD: &str = "video_path";
pub const CAPTION_FIELD: &str = "caption";

/// 仅在处理过程中使用、不写入输出文件的字段
const TRANSIENT_FIELDS: &[&str] = &["frames", "message"];

pub fn ffmpeg_decoder(config: &PipelineConfig) -> Arc<dyn VideoDecoder> {
    Arc::new(FfmpegDecoder::with_paths(
        &config.video.ffmpeg_path,
        &config.video.ffprobe_path,
    ))
}

pub fn build_caption_pipeline(
    config: &PipelineConfig,
    decoder: Arc<dyn VideoDecoder>,
    invoker: Arc<dyn ModelInvoker>,
) -> Result<Pipeline, PipelineError> {
    let sampler = FrameSampler::new(decoder, config.video.quality);

    Pipeline::new(
        vec![
            Box::new(VideoFrameStage::new(sampler, config.video.num_frames)?),
            Box::new(
                MessageStage::new(
                    PayloadBuilder::new(PartOrder::MediaFirst),
                    &config.prompt.caption_prompt,
                )
                .with_fields("frames", "message"),
            ),
            Box::new(
                ModelInvokeStage::new(invoker)
                    .with_system_prompt(config.prompt.system_prompt.clone())
                    .with_fields("message", CAPTION_FIELD),
            ),
        ],
        &[ID_FIELD, VIDEO_PATH_FIELD],
    )
}

pub fn video_records(paths: &[PathBuf]) -> Vec<Record> {
    paths
        .iter()
        .enumerate()
        .map(|(i, path)| {
            let mut record = Record::with_id(i);
            record.set(VIDEO_PATH_FIELD, path.to_string_lossy().to_string());
            record
        })
        .collect()
}

/// 批量生成视频描述，成功与失败的记录都写入输出文件（失败记录带 `error`）
pub fn caption_videos(
    videos: &[PathBuf],
    output: impl AsRef<Path>,
    config: &PipelineConfig,
    decoder: Arc<dyn VideoDecoder>,
    invoker: Arc<dyn ModelInvoker>,
) -> Result<BatchReport, PipelineError> {
    let pipeline = build_caption_pipeline(config, decoder, invoker)?;
    let mut report = BatchExecutor::new(config.concurrency).run(&pipeline, video_records(videos))?;

    let mut writer = JsonlWriter::create(output.as_ref())?;
    for record in report.records.iter_mut() {
        for field in TRANSIENT_FIELDS {
            record.remove(field);
        }
        writer.write(record)?;
    }
    writer.finish()?;

    info!(
        "🎬 Captioned {}/{} videos -> {}",
        report.succeeded,
        report.total(),
        output.as_ref().display()
    );
    Ok(report)
}
