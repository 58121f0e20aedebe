//! 媒体相关阶段：图片编码、视频抽帧、多模态消息构造

use crate::core::error::PipelineError;
use crate::core::media::{jpeg_data_url, FrameSampler, ImageNormalizer};
use crate::core::payload::PayloadBuilder;
use crate::core::pipeline::Stage;
use crate::core::record::{Record, StageOutput};
use serde_json::Value;
use std::path::Path;

/// 图片 -> base64 JPEG，同时写入 token 估算
pub struct ImageEncodeStage {
    normalizer: ImageNormalizer,
    path_field: String,
    output_field: String,
    tokens_field: String,
}

impl ImageEncodeStage {
    pub const NAME: &'static str = "image_encoder";

    pub fn new(normalizer: ImageNormalizer) -> Self {
        Self {
            normalizer,
            path_field: "image_path".to_string(),
            output_field: "image_base64".to_string(),
            tokens_field: "estimated_image_tokens".to_string(),
        }
    }

    pub fn with_fields(mut self, path_field: &str, output_field: &str) -> Self {
        self.path_field = path_field.to_string();
        self.output_field = output_field.to_string();
        self
    }
}

impl Stage for ImageEncodeStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn requires(&self) -> Vec<&str> {
        vec![self.path_field.as_str()]
    }

    fn produces(&self) -> Vec<&str> {
        vec![self.output_field.as_str(), self.tokens_field.as_str()]
    }

    fn process(&self, record: &Record) -> Result<StageOutput, PipelineError> {
        let path = record.require_str(Self::NAME, &self.path_field)?;
        let encoded = self.normalizer.normalize(Path::new(path))?;

        Ok(StageOutput::new()
            .with(&self.output_field, encoded.to_base64())
            .with(&self.tokens_field, encoded.estimated_tokens()))
    }
}

/// 视频 -> 均匀抽取的 base64 帧序列
///
/// 抽帧临时目录挂到记录上，记录处理结束时释放。
pub struct VideoFrameStage {
    sampler: FrameSampler,
    num_frames: usize,
    video_field: String,
    frames_field: String,
    indices_field: String,
}

impl VideoFrameStage {
    pub const NAME: &'static str = "video_sampler";

    pub fn new(sampler: FrameSampler, num_frames: usize) -> Result<Self, PipelineError> {
        if num_frames == 0 {
            return Err(PipelineError::Config("抽帧数量必须大于 0".to_string()));
        }
        Ok(Self {
            sampler,
            num_frames,
            video_field: "video_path".to_string(),
            frames_field: "frames".to_string(),
            indices_field: "frame_indices".to_string(),
        })
    }

    pub fn with_fields(mut self, video_field: &str, frames_field: &str) -> Self {
        self.video_field = video_field.to_string();
        self.frames_field = frames_field.to_string();
        self
    }
}

impl Stage for VideoFrameStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn requires(&self) -> Vec<&str> {
        vec![self.video_field.as_str()]
    }

    fn produces(&self) -> Vec<&str> {
        vec![self.frames_field.as_str(), self.indices_field.as_str()]
    }

    fn process(&self, record: &Record) -> Result<StageOutput, PipelineError> {
        let path = record.require_str(Self::NAME, &self.video_field)?;
        let (frames, workdir) = self.sampler.sample(Path::new(path), self.num_frames)?;

        let encoded: Vec<String> = frames.images().map(|img| img.to_base64()).collect();
        let mut output = StageOutput::new()
            .with(&self.frames_field, encoded)
            .with(&self.indices_field, frames.indices());
        output.hold(workdir);
        Ok(output)
    }
}

/// 提示文本 + 图片 -> 多模态 user 消息
pub struct MessageStage {
    builder: PayloadBuilder,
    prompt: String,
    media_field: String,
    output_field: String,
}

impl MessageStage {
    pub const NAME: &'static str = "message_builder";

    pub fn new(builder: PayloadBuilder, prompt: &str) -> Self {
        Self {
            builder,
            prompt: prompt.to_string(),
            media_field: "image_base64".to_string(),
            output_field: "message".to_string(),
        }
    }

    pub fn with_fields(mut self, media_field: &str, output_field: &str) -> Self {
        self.media_field = media_field.to_string();
        self.output_field = output_field.to_string();
        self
    }

    /// 字段值可以是单张图片或图片数组；裸 base64 视为 JPEG
    fn media_urls(&self, value: &Value) -> Result<Vec<String>, PipelineError> {
        let as_url = |item: &Value| {
            item.as_str().map(|s| {
                if s.starts_with("data:") || s.starts_with("http://") || s.starts_with("https://") {
                    s.to_string()
                } else {
                    jpeg_data_url(s)
                }
            })
        };

        match value {
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    as_url(item).ok_or_else(|| {
                        PipelineError::stage(Self::NAME, format!("{} 中包含非字符串元素", self.media_field))
                    })
                })
                .collect(),
            other => as_url(other).map(|url| vec![url]).ok_or_else(|| {
                PipelineError::stage(Self::NAME, format!("{} 既不是字符串也不是数组", self.media_field))
            }),
        }
    }
}

impl Stage for MessageStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn requires(&self) -> Vec<&str> {
        vec![self.media_field.as_str()]
    }

    fn produces(&self) -> Vec<&str> {
        vec![self.output_field.as_str()]
    }

    fn process(&self, record: &Record) -> Result<StageOutput, PipelineError> {
        let media = record.require(Self::NAME, &self.media_field)?;
        let urls = self.media_urls(media)?;
        let message = self.builder.build(&self.prompt, &urls).to_chat_message();

        Ok(StageOutput::new().with(&self.output_field, serde_json::to_value(message)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::core::media::sampler::tests::MockDecoder;
    use crate::core::payload::PartOrder;
    use crate::core::pipeline::tests::FailStage;
    use crate::core::pipeline::Pipeline;
    use image::{Rgb, RgbImage};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_image_encode_stage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.png");
        RgbImage::from_pixel(1000, 500, Rgb([200, 100, 50])).save(&path).unwrap();

        let mut record = Record::with_id(1);
        record.set("image_path", path.to_string_lossy().to_string());

        let output = ImageEncodeStage::new(ImageNormalizer::new()).process(&record).unwrap();
        let b64 = output.get("image_base64").and_then(|v| v.as_str()).unwrap();
        assert!(!b64.is_empty());
        assert_eq!(
            output.get("estimated_image_tokens"),
            Some(&json!(b64.len() / 4))
        );
    }

    #[test]
    fn test_image_encode_missing_file_is_media_error() {
        let mut record = Record::with_id(1);
        record.set("image_path", "/nonexistent/a.jpg");
        let err = ImageEncodeStage::new(ImageNormalizer::new()).process(&record).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MediaReadError);
    }

    #[test]
    fn test_video_stage_holds_workdir_until_record_done() {
        let decoder = Arc::new(MockDecoder::new(10));
        let sampler = FrameSampler::new(decoder.clone(), 90);
        let stage = VideoFrameStage::new(sampler, 4).unwrap();

        let mut record = Record::with_id("v1");
        record.set("video_path", "clip.mp4");
        let output = stage.process(&record).unwrap();
        assert_eq!(output.get("frame_indices"), Some(&json!([0, 3, 6, 9])));
        assert_eq!(output.get("frames").and_then(|v| v.as_array()).map(|a| a.len()), Some(4));
        drop(output);

        let pipeline = Pipeline::new(vec![Box::new(stage)], &["video_path"]).unwrap();
        let done = pipeline.run(record);
        assert!(done.is_ok());
        assert_eq!(done.scratch_count(), 0);

        let workdirs = decoder.workdirs.lock().unwrap();
        assert!(!workdirs.is_empty());
        assert!(workdirs.iter().all(|dir| !dir.exists()));
    }

    #[test]
    fn test_video_workdir_removed_when_later_stage_fails() {
        let decoder = Arc::new(MockDecoder::new(10));
        let sampler = FrameSampler::new(decoder.clone(), 90);
        let pipeline = Pipeline::new(
            vec![
                Box::new(VideoFrameStage::new(sampler, 3).unwrap()) as Box<dyn Stage>,
                Box::new(FailStage),
            ],
            &["video_path"],
        )
        .unwrap();

        let mut record = Record::with_id("v3");
        record.set("video_path", "clip.mp4");
        let done = pipeline.run(record);

        assert_eq!(done.error().expect("应该失败").stage, "fail");
        assert!(done.contains("frames"));
        assert_eq!(done.scratch_count(), 0);

        let workdirs = decoder.workdirs.lock().unwrap();
        assert_eq!(workdirs.len(), 3);
        assert!(workdirs.iter().all(|dir| !dir.exists()));
    }

    #[test]
    fn test_video_stage_rejects_zero_frames() {
        let sampler = FrameSampler::new(Arc::new(MockDecoder::new(10)), 90);
        assert!(matches!(VideoFrameStage::new(sampler, 0), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_video_without_frames() {
        let sampler = FrameSampler::new(Arc::new(MockDecoder::new(0)), 90);
        let stage = VideoFrameStage::new(sampler, 4).unwrap();
        let mut record = Record::with_id("v2");
        record.set("video_path", "empty.mp4");
        assert_eq!(stage.process(&record).unwrap_err().kind(), ErrorKind::NoFramesError);
    }

    #[test]
    fn test_message_stage_single_and_multiple() {
        let stage = MessageStage::new(PayloadBuilder::new(PartOrder::TextFirst), "问题");
        let mut record = Record::with_id(1);
        record.set("image_base64", "AAAA");

        let output = stage.process(&record).unwrap();
        let message = output.get("message").unwrap();
        assert_eq!(message["role"], "user");
        assert_eq!(message["content"][0]["text"], "问题");
        assert_eq!(message["content"][1]["image_url"]["url"], "data:image/jpeg;base64,AAAA");

        let stage = MessageStage::new(PayloadBuilder::new(PartOrder::MediaFirst), "describe")
            .with_fields("frames", "message");
        let mut record = Record::with_id(2);
        record.set("frames", json!(["F1", "F2", "https://example.com/f3.jpg"]));

        let output = stage.process(&record).unwrap();
        let content = output.get("message").unwrap()["content"].as_array().unwrap().clone();
        assert_eq!(content.len(), 4);
        assert_eq!(content[0]["image_url"]["url"], "data:image/jpeg;base64,F1");
        assert_eq!(content[2]["image_url"]["url"], "https://example.com/f3.jpg");
        assert_eq!(content[3]["text"], "describe");
    }

    #[test]
    fn test_message_stage_rejects_bad_media() {
        let stage = MessageStage::new(PayloadBuilder::default(), "p");
        let mut record = Record::with_id(1);
        record.set("image_base64", json!({"not": "an image"}));
        assert_eq!(stage.process(&record).unwrap_err().kind(), ErrorKind::StageError);
    }
}
