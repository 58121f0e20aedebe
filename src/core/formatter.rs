//! SFT 训练数据格式化

use crate::core::response::QaEntry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

pub const IMAGE_TOKEN: &str = "<image>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Speaker {
    #[serde(rename = "human")]
    Human,
    #[serde(rename = "gpt")]
    Gpt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    #[serde(rename = "from")]
    pub speaker: Speaker,
    pub value: String,
}

/// 输出文件中的一条训练样本，字段名是下游工具依赖的格式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub id: Value,
    pub image: String,
    pub conversations: Vec<Turn>,
}

pub struct SftFormatter {
    image_prefix: String,
}

impl SftFormatter {
    pub fn new() -> Self {
        Self::with_image_prefix("images/")
    }

    pub fn with_image_prefix(prefix: &str) -> Self {
        Self {
            image_prefix: prefix.to_string(),
        }
    }

    /// 训练样本中的图片引用：前缀 + 源文件名
    pub fn image_ref(&self, source_path: &str) -> String {
        let file_name = Path::new(source_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| source_path.to_string());
        format!("{}{}", self.image_prefix, file_name)
    }

    /// 每个 QA 对生成一条两轮对话
    pub fn format(&self, entries: &[QaEntry], image_ref: &str, id: &Value) -> Vec<TrainingRecord> {
        entries
            .iter()
            .map(|qa| TrainingRecord {
                id: id.clone(),
                image: image_ref.to_string(),
                conversations: vec![
                    Turn {
                        speaker: Speaker::Human,
                        value: format!("{}\n{}", IMAGE_TOKEN, qa.question),
                    },
                    Turn {
                        speaker: Speaker::Gpt,
                        value: qa.answer.clone(),
                    },
                ],
            })
            .collect()
    }
}

impl Default for SftFormatter {
    fn default() -> Self {
        Self::new()
    }
}
