//! 模型调用、响应解析与 SFT 格式化阶段

use crate::core::error::PipelineError;
use crate::core::formatter::SftFormatter;
use crate::core::invoker::ModelInvoker;
use crate::core::payload::ChatMessage;
use crate::core::pipeline::Stage;
use crate::core::record::{Record, StageOutput, ID_FIELD};
use crate::core::response::{QaEntry, ResponseParser};
use serde_json::Value;
use std::sync::Arc;

/// 调用模型，把原始响应文本写入记录
///
/// 消息字段为字符串时作为纯文本 user 消息，为对象时视为已构造好的消息。
pub struct ModelInvokeStage {
    invoker: Arc<dyn ModelInvoker>,
    system_prompt: Option<String>,
    message_field: String,
    response_field: String,
}

impl ModelInvokeStage {
    pub const NAME: &'static str = "model_invoker";

    pub fn new(invoker: Arc<dyn ModelInvoker>) -> Self {
        Self {
            invoker,
            system_prompt: None,
            message_field: "message".to_string(),
            response_field: "response".to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn with_fields(mut self, message_field: &str, response_field: &str) -> Self {
        self.message_field = message_field.to_string();
        self.response_field = response_field.to_string();
        self
    }

    fn build_messages(&self, value: &Value) -> Result<Vec<ChatMessage>, PipelineError> {
        let user = match value {
            Value::String(text) => ChatMessage::user(text.as_str()),
            other => serde_json::from_value::<ChatMessage>(other.clone()).map_err(|e| {
                PipelineError::stage(Self::NAME, format!("{} 不是合法消息: {}", self.message_field, e))
            })?,
        };

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(ChatMessage::system(system.as_str()));
        }
        messages.push(user);
        Ok(messages)
    }
}

impl Stage for ModelInvokeStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn requires(&self) -> Vec<&str> {
        vec![self.message_field.as_str()]
    }

    fn produces(&self) -> Vec<&str> {
        vec![self.response_field.as_str()]
    }

    fn process(&self, record: &Record) -> Result<StageOutput, PipelineError> {
        let value = record.require(Self::NAME, &self.message_field)?;
        let messages = self.build_messages(value)?;
        let response = self.invoker.invoke(&messages)?;
        Ok(StageOutput::new().with(&self.response_field, response))
    }
}

/// 原始响应 -> QA 列表，总是成功
pub struct ResponseParseStage {
    parser: ResponseParser,
    response_field: String,
    output_field: String,
    strategy_field: String,
}

impl ResponseParseStage {
    pub const NAME: &'static str = "response_parser";

    pub fn new(parser: ResponseParser) -> Self {
        Self {
            parser,
            response_field: "response".to_string(),
            output_field: "qa_data".to_string(),
            strategy_field: "parse_strategy".to_string(),
        }
    }
}

impl Stage for ResponseParseStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn requires(&self) -> Vec<&str> {
        vec![self.response_field.as_str()]
    }

    fn produces(&self) -> Vec<&str> {
        vec![self.output_field.as_str(), self.strategy_field.as_str()]
    }

    fn process(&self, record: &Record) -> Result<StageOutput, PipelineError> {
        let raw = record.require_str(Self::NAME, &self.response_field)?;
        let outcome = self.parser.parse_with_outcome(raw);

        Ok(StageOutput::new()
            .with(&self.output_field, serde_json::to_value(&outcome.entries)?)
            .with(&self.strategy_field, serde_json::to_value(outcome.strategy)?))
    }
}

/// QA 列表 + 图片路径 + id -> 训练样本列表
pub struct SftFormatStage {
    formatter: SftFormatter,
    qa_field: String,
    image_field: String,
    id_field: String,
    output_field: String,
}

impl SftFormatStage {
    pub const NAME: &'static str = "sft_formatter";

    pub fn new(formatter: SftFormatter) -> Self {
        Self {
            formatter,
            qa_field: "qa_data".to_string(),
            image_field: "image_path".to_string(),
            id_field: ID_FIELD.to_string(),
            output_field: "sft_examples".to_string(),
        }
    }

    pub fn with_image_field(mut self, image_field: &str) -> Self {
        self.image_field = image_field.to_string();
        self
    }

    pub fn output_field(&self) -> &str {
        &self.output_field
    }
}

impl Stage for SftFormatStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn requires(&self) -> Vec<&str> {
        vec![
            self.qa_field.as_str(),
            self.image_field.as_str(),
            self.id_field.as_str(),
        ]
    }

    fn produces(&self) -> Vec<&str> {
        vec![self.output_field.as_str()]
    }

    fn process(&self, record: &Record) -> Result<StageOutput, PipelineError> {
        let qa_value = record.require(Self::NAME, &self.qa_field)?;
        let image_path = record.require_str(Self::NAME, &self.image_field)?;
        let id = record.require(Self::NAME, &self.id_field)?;

        let entries: Vec<QaEntry> = serde_json::from_value(qa_value.clone()).map_err(|e| {
            PipelineError::stage(Self::NAME, format!("{} 格式错误: {}", self.qa_field, e))
        })?;
        let examples = self
            .formatter
            .format(&entries, &self.formatter.image_ref(image_path), id);

        Ok(StageOutput::new().with(&self.output_field, serde_json::to_value(examples)?))
    }
}
