//! 模型调用适配器 - OpenAI 兼容的 chat completions 接口

use crate::core::config::ModelConfig;
use crate::core::error::ModelError;
use crate::core::payload::ChatMessage;
use log::{debug, info, warn};
use reqwest::blocking::Client;
use serde_json::{json, Value};
use std::time::Duration;

/// 发送消息列表，返回模型的原始文本
pub trait ModelInvoker: Send + Sync {
    fn invoke(&self, messages: &[ChatMessage]) -> Result<String, ModelError>;
}

pub struct OpenAiCompatInvoker {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    max_retries: u32,
}

impl OpenAiCompatInvoker {
    pub fn new(config: &ModelConfig) -> Result<Self, ModelError> {
        let api_key = config
            .resolve_api_key()
            .ok_or_else(|| ModelError::Config("未提供 API 密钥".to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;

        info!("🤖 Model invoker ready: {} @ {}", config.model, config.base_url);
        Ok(Self {
            client,
            endpoint: chat_endpoint(&config.base_url),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn request_body(&self, messages: &[ChatMessage]) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = self.temperature {
            body["temperature"] = json!(temperature);
        }
        body
    }

    fn send(&self, body: &Value) -> Result<String, ModelError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ModelError::Status {
                status: status.as_u16(),
                body: resp.text().unwrap_or_default(),
            });
        }

        let value: Value = resp.json()?;
        extract_content(&value)
    }
}

impl ModelInvoker for OpenAiCompatInvoker {
    fn invoke(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
        let body = self.request_body(messages);
        let mut attempt = 0;
        loop {
            match self.send(&body) {
                Ok(text) => {
                    debug!("📨 Model response: {} chars", text.chars().count());
                    return Ok(text);
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!("⚠️ Model call failed ({}), retry {}/{}", e, attempt, self.max_retries);
                    std::thread::sleep(Duration::from_secs(attempt as u64));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn chat_endpoint(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

fn extract_content(value: &Value) -> Result<String, ModelError> {
    value
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| ModelError::Response(format!("缺少 choices[0].message.content: {}", value)))
}
