//! 文本阶段：提示预处理、摘要截断、字段映射、模板渲染

use crate::core::error::PipelineError;
use crate::core::pipeline::Stage;
use crate::core::record::{Record, StageOutput};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Number, Value};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").expect("占位符正则无效"));

/// 字段值转文本：字符串原样，null 为空，其余按 JSON 输出
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// 去除首尾空白，可选地在前面加一行指令
pub struct TextPromptStage {
    instruction: Option<String>,
    input_field: String,
    output_field: String,
}

impl TextPromptStage {
    pub const NAME: &'static str = "text_processor";

    pub fn new(instruction: Option<String>) -> Self {
        Self {
            instruction: instruction.filter(|s| !s.trim().is_empty()),
            input_field: "input_text".to_string(),
            output_field: "processed_text".to_string(),
        }
    }

    pub fn with_fields(mut self, input_field: &str, output_field: &str) -> Self {
        self.input_field = input_field.to_string();
        self.output_field = output_field.to_string();
        self
    }
}

impl Stage for TextPromptStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn requires(&self) -> Vec<&str> {
        vec![self.input_field.as_str()]
    }

    fn produces(&self) -> Vec<&str> {
        vec![self.output_field.as_str()]
    }

    fn process(&self, record: &Record) -> Result<StageOutput, PipelineError> {
        let text = record.require_str(Self::NAME, &self.input_field)?.trim();
        let processed = match &self.instruction {
            Some(instruction) if !text.is_empty() => format!("{}\n{}", instruction, text),
            _ => text.to_string(),
        };
        Ok(StageOutput::new().with(&self.output_field, processed))
    }
}

/// 按字符数截断，超长时追加 "..."
pub struct SummarizeStage {
    max_chars: usize,
    input_field: String,
    output_field: String,
}

impl SummarizeStage {
    pub const NAME: &'static str = "summarizer";

    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars,
            input_field: "model_response".to_string(),
            output_field: "summary".to_string(),
        }
    }

    pub fn with_fields(mut self, input_field: &str, output_field: &str) -> Self {
        self.input_field = input_field.to_string();
        self.output_field = output_field.to_string();
        self
    }

    pub fn summarize(&self, text: &str) -> String {
        if text.chars().count() <= self.max_chars {
            return text.to_string();
        }
        let mut summary: String = text.chars().take(self.max_chars).collect();
        summary.push_str("...");
        summary
    }
}

impl Default for SummarizeStage {
    fn default() -> Self {
        Self::new(100)
    }
}

impl Stage for SummarizeStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn requires(&self) -> Vec<&str> {
        vec![self.input_field.as_str()]
    }

    fn produces(&self) -> Vec<&str> {
        vec![self.output_field.as_str()]
    }

    fn process(&self, record: &Record) -> Result<StageOutput, PipelineError> {
        let text = record.require_str(Self::NAME, &self.input_field)?;
        Ok(StageOutput::new().with(&self.output_field, self.summarize(text)))
    }
}

/// 把源字段复制到目标字段，值不做转换
pub struct FieldMapStage {
    mappings: Vec<(String, String)>,
}

impl FieldMapStage {
    pub const NAME: &'static str = "field_mapper";

    pub fn new<S: Into<String>>(mappings: impl IntoIterator<Item = (S, S)>) -> Self {
        Self {
            mappings: mappings
                .into_iter()
                .map(|(source, target)| (source.into(), target.into()))
                .collect(),
        }
    }
}

impl Stage for FieldMapStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn requires(&self) -> Vec<&str> {
        self.mappings.iter().map(|(source, _)| source.as_str()).collect()
    }

    fn produces(&self) -> Vec<&str> {
        self.mappings.iter().map(|(_, target)| target.as_str()).collect()
    }

    fn process(&self, record: &Record) -> Result<StageOutput, PipelineError> {
        let mut output = StageOutput::new();
        for (source, target) in &self.mappings {
            output.set(target, record.require(Self::NAME, source)?.clone());
        }
        Ok(output)
    }
}

/// `{{field}}` 模板渲染，模板中出现的字段都是必需字段
pub struct TemplateStage {
    template: String,
    placeholders: Vec<String>,
    output_field: String,
}

impl TemplateStage {
    pub const NAME: &'static str = "template_renderer";

    pub fn new(template: &str) -> Self {
        let mut placeholders: Vec<String> = Vec::new();
        for caps in PLACEHOLDER.captures_iter(template) {
            let name = caps[1].to_string();
            if !placeholders.contains(&name) {
                placeholders.push(name);
            }
        }

        Self {
            template: template.to_string(),
            placeholders,
            output_field: "prompt".to_string(),
        }
    }

    pub fn with_output_field(mut self, output_field: &str) -> Self {
        self.output_field = output_field.to_string();
        self
    }

    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    pub fn render(&self, record: &Record) -> Result<String, PipelineError> {
        for name in &self.placeholders {
            record.require(Self::NAME, name)?;
        }
        let rendered = PLACEHOLDER.replace_all(&self.template, |caps: &Captures| {
            record.get(&caps[1]).map(value_text).unwrap_or_default()
        });
        Ok(rendered.into_owned())
    }
}

impl Stage for TemplateStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn requires(&self) -> Vec<&str> {
        self.placeholders.iter().map(String::as_str).collect()
    }

    fn produces(&self) -> Vec<&str> {
        vec![self.output_field.as_str()]
    }

    fn process(&self, record: &Record) -> Result<StageOutput, PipelineError> {
        Ok(StageOutput::new().with(&self.output_field, self.render(record)?))
    }
}

/// 映射值不是现有字段时按字面量处理：纯数字为整数，能解析为浮点数的为数字，其余为原字符串
fn literal_value(raw: &str) -> Value {
    if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(n) = raw.parse::<u64>() {
            return Value::from(n);
        }
    }
    raw.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(raw.to_string()))
}

/// 输出映射：输出键 <- 字段名或字面量
///
/// 配合 [`OutputMapStage::project`] 只保留输出键。
pub struct OutputMapStage {
    mappings: Vec<(String, String)>,
}

impl OutputMapStage {
    pub const NAME: &'static str = "output_mapper";

    pub fn new<S: Into<String>>(mappings: impl IntoIterator<Item = (S, S)>) -> Self {
        Self {
            mappings: mappings
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    pub fn output_keys(&self) -> Vec<&str> {
        self.mappings.iter().map(|(key, _)| key.as_str()).collect()
    }

    /// 从处理完的记录中取出输出键
    pub fn project(&self, record: &Record) -> Map<String, Value> {
        self.mappings
            .iter()
            .filter_map(|(key, _)| record.get(key).map(|v| (key.clone(), v.clone())))
            .collect()
    }
}

impl Stage for OutputMapStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn requires(&self) -> Vec<&str> {
        Vec::new()
    }

    fn produces(&self) -> Vec<&str> {
        self.output_keys()
    }

    fn process(&self, record: &Record) -> Result<StageOutput, PipelineError> {
        let mut output = StageOutput::new();
        for (key, source) in &self.mappings {
            let value = record
                .get(source)
                .cloned()
                .unwrap_or_else(|| literal_value(source));
            output.set(key, value);
        }
        Ok(output)
    }
}
