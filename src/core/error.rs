use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 媒体读取 / 解码错误
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("读取媒体文件失败 {path}: {reason}")]
    Read { path: String, reason: String },
    #[error("视频中没有可解码的帧: {0}")]
    NoFrames(String),
    #[error("视频解码器错误: {0}")]
    Decoder(String),
    #[error("JPEG 编码失败: {0}")]
    Encode(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 模型调用错误，对 pipeline 而言是不透明的
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("HTTP 请求失败: {0}")]
    Http(#[from] reqwest::Error),
    #[error("模型服务返回错误状态 {status}: {body}")]
    Status { status: u16, body: String },
    #[error("模型响应格式错误: {0}")]
    Response(String),
    #[error("模型配置错误: {0}")]
    Config(String),
}

impl ModelError {
    /// 超时、连接失败、限流与 5xx 可以重试
    pub fn is_retryable(&self) -> bool {
        match self {
            ModelError::Http(e) => e.is_timeout() || e.is_connect(),
            ModelError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error("模型调用失败: {0}")]
    Model(#[from] ModelError),
    #[error("阶段 {stage} 缺少必需字段: {field}")]
    MissingField { stage: String, field: String },
    #[error("配置错误: {0}")]
    Config(String),
    #[error("阶段 {stage} 处理失败: {message}")]
    Stage { stage: String, message: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON 数据解析失败: {0}")]
    Json(#[from] serde_json::Error),
    #[error("JSONL 第 {line} 行解析失败: {source}")]
    Jsonl {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("JSON5 配置解析失败: {0}")]
    Json5(#[from] json5::Error),
}

impl PipelineError {
    pub fn missing_field(stage: &str, field: &str) -> Self {
        PipelineError::MissingField {
            stage: stage.to_string(),
            field: field.to_string(),
        }
    }

    pub fn stage(stage: &str, message: impl Into<String>) -> Self {
        PipelineError::Stage {
            stage: stage.to_string(),
            message: message.into(),
        }
    }

    /// 映射到写入记录的错误分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Media(MediaError::NoFrames(_)) => ErrorKind::NoFramesError,
            PipelineError::Media(_) => ErrorKind::MediaReadError,
            PipelineError::Model(_) => ErrorKind::ModelCallError,
            PipelineError::MissingField { .. } => ErrorKind::MissingFieldError,
            _ => ErrorKind::StageError,
        }
    }
}

/// 记录级错误分类，序列化后即为输出文件中的 `kind`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    MediaReadError,
    NoFramesError,
    MissingFieldError,
    ModelCallError,
    StageError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let read = PipelineError::from(MediaError::Read {
            path: "a.jpg".into(),
            reason: "not found".into(),
        });
        assert_eq!(read.kind(), ErrorKind::MediaReadError);

        let no_frames = PipelineError::from(MediaError::NoFrames("v.mp4".into()));
        assert_eq!(no_frames.kind(), ErrorKind::NoFramesError);

        let missing = PipelineError::missing_field("sft_formatter", "qa_data");
        assert_eq!(missing.kind(), ErrorKind::MissingFieldError);

        let model = PipelineError::from(ModelError::Response("empty".into()));
        assert_eq!(model.kind(), ErrorKind::ModelCallError);
    }

    #[test]
    fn test_status_retryable() {
        let limited = ModelError::Status {
            status: 429,
            body: String::new(),
        };
        assert!(limited.is_retryable());

        let bad_request = ModelError::Status {
            status: 400,
            body: String::new(),
        };
        assert!(!bad_request.is_retryable());
        assert!(!ModelError::Config("no key".into()).is_retryable());
    }
}
