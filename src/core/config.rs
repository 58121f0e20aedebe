//! Pipeline 配置 - JSON5 文件 + 默认值

use crate::core::error::PipelineError;
use crate::core::media::NormalizeConfig;
use crate::core::payload::PartOrder;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_QA_PROMPT: &str = r#"请基于以下图片生成多个高质量的问答对，可用于多模态大模型的训练。

要求：
1. 问题应是关于图片内容的开放性或具体细节的提问
2. 答案应该准确、简洁，直接回答问题
3. 问题应该让模型需要理解图片才能回答
4. 避免生成需要外部知识才能回答的问题

按照以下JSON格式返回问答对，每行一个：
{"question": "图片中的问题...", "answer": "对应的答案..."}
{"question": "second question", "answer": "second answer"}

只返回JSON内容，不要有其他任何文字。"#;

pub const DEFAULT_CAPTION_PROMPT: &str =
    "请详细描述这个视频的内容，综合给你的多张图片的信息给出一个完整的视频描述，你不需要逐帧解释。";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    /// api_key 为空时从该环境变量读取
    pub api_key_env: Option<String>,
    pub timeout_secs: u64,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub max_retries: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: "qianfan-llama-vl-8b".to_string(),
            base_url: "https://qianfan.baidubce.com/v2".to_string(),
            api_key: None,
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            timeout_secs: 60,
            max_tokens: None,
            temperature: None,
            max_retries: 2,
        }
    }
}

impl ModelConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| {
                self.api_key_env
                    .as_deref()
                    .and_then(|name| std::env::var(name).ok())
                    .filter(|k| !k.is_empty())
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub max_width: u32,
    pub max_height: u32,
    pub quality: u8,
    /// 训练样本中图片路径的前缀
    pub image_prefix: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        let bounds = NormalizeConfig::default();
        Self {
            max_width: bounds.max_width,
            max_height: bounds.max_height,
            quality: bounds.quality,
            image_prefix: "images/".to_string(),
        }
    }
}

impl ImageConfig {
    pub fn normalize_config(&self) -> NormalizeConfig {
        NormalizeConfig {
            max_width: self.max_width,
            max_height: self.max_height,
            quality: self.quality,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub num_frames: usize,
    pub quality: u8,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            num_frames: 4,
            quality: 90,
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub qa_prompt: String,
    pub caption_prompt: String,
    pub system_prompt: Option<String>,
    pub part_order: PartOrder,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            qa_prompt: DEFAULT_QA_PROMPT.to_string(),
            caption_prompt: DEFAULT_CAPTION_PROMPT.to_string(),
            system_prompt: None,
            part_order: PartOrder::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub model: ModelConfig,
    pub image: ImageConfig,
    pub video: VideoConfig,
    pub prompt: PromptConfig,
    pub concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            image: ImageConfig::default(),
            video: VideoConfig::default(),
            prompt: PromptConfig::default(),
            concurrency: num_cpus::get().min(4),
        }
    }
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json5(&text)
    }

    pub fn from_json5(text: &str) -> Result<Self, PipelineError> {
        let config: PipelineConfig = json5::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |msg: &str| Err(PipelineError::Config(msg.to_string()));

        if self.image.max_width == 0 || self.image.max_height == 0 {
            return invalid("image.max_width / image.max_height 必须大于 0");
        }
        if !(1..=100).contains(&self.image.quality) || !(1..=100).contains(&self.video.quality) {
            return invalid("JPEG 质量必须在 1-100 之间");
        }
        if self.video.num_frames == 0 {
            return invalid("video.num_frames 必须大于 0");
        }
        if self.concurrency == 0 {
            return invalid("concurrency 必须大于 0");
        }
        if self.model.base_url.trim().is_empty() || self.model.model.trim().is_empty() {
            return invalid("model.model / model.base_url 不能为空");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.image.max_width, 800);
        assert_eq!(config.image.quality, 85);
        assert_eq!(config.video.num_frames, 4);
        assert!(config.concurrency >= 1);
    }

    #[test]
    fn test_partial_json5() {
        let text = r#"{
            // 只覆盖部分字段
            model: { model: "gpt-4o", timeout_secs: 30 },
            image: { max_width: 512, },
            prompt: { part_order: "text_first" },
            concurrency: 8,
        }"#;
        let config = PipelineConfig::from_json5(text).expect("配置解析失败");
        assert_eq!(config.model.model, "gpt-4o");
        assert_eq!(config.model.timeout_secs, 30);
        assert_eq!(config.model.base_url, ModelConfig::default().base_url);
        assert_eq!(config.image.max_width, 512);
        assert_eq!(config.image.max_height, 800);
        assert_eq!(config.prompt.part_order, PartOrder::TextFirst);
        assert_eq!(config.concurrency, 8);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            PipelineConfig::from_json5("{ video: { num_frames: 0 } }"),
            Err(PipelineError::Config(_))
        ));
        assert!(matches!(
            PipelineConfig::from_json5("{ image: { quality: 0 } }"),
            Err(PipelineError::Config(_))
        ));
        assert!(matches!(
            PipelineConfig::from_json5("{ concurrency: 0 }"),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_malformed_json5() {
        assert!(matches!(
            PipelineConfig::from_json5("{ model: "),
            Err(PipelineError::Json5(_))
        ));
    }

    #[test]
    fn test_explicit_api_key_wins() {
        let config = ModelConfig {
            api_key: Some("sk-explicit".into()),
            api_key_env: Some("MM_SFT_TEST_UNSET_KEY".into()),
            ..Default::default()
        };
        assert_eq!(config.resolve_api_key().as_deref(), Some("sk-explicit"));

        let missing = ModelConfig {
            api_key: None,
            api_key_env: Some("MM_SFT_TEST_UNSET_KEY".into()),
            ..Default::default()
        };
        assert_eq!(missing.resolve_api_key(), None);
    }
}
