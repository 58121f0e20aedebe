//! 模型响应解析 - 按顺序尝试多种策略，第一个成功的生效

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const FALLBACK_QUESTION: &str = "图片中显示了什么?";
pub const FALLBACK_ANSWER: &str = "无法解析模型响应";

/// 贪婪匹配：从第一个 `{` 到最后一个 `}`
static EMBEDDED_OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("静态正则表达式无效"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaEntry {
    pub question: String,
    pub answer: String,
}

impl QaEntry {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        Some(Self::new(
            obj.get("question")?.as_str()?,
            obj.get("answer")?.as_str()?,
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    StrictLines,
    EmbeddedObject,
    Fallback,
}

#[derive(Debug)]
struct ParseFailure(String);

trait ParseStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;
    fn parse(&self, raw: &str) -> Result<Vec<QaEntry>, ParseFailure>;
}

/// 每个非空行都必须是独立的 QA 对象，否则整体放弃
struct StrictLines;

impl ParseStrategy for StrictLines {
    fn kind(&self) -> StrategyKind {
        StrategyKind::StrictLines
    }

    fn parse(&self, raw: &str) -> Result<Vec<QaEntry>, ParseFailure> {
        let entries = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                let value: Value =
                    serde_json::from_str(line).map_err(|e| ParseFailure(e.to_string()))?;
                QaEntry::from_value(&value)
                    .ok_or_else(|| ParseFailure(format!("缺少 question/answer: {}", line)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if entries.is_empty() {
            return Err(ParseFailure("空响应".to_string()));
        }
        Ok(entries)
    }
}

/// 从混合文本中提取单个 JSON 对象
///
/// 只恢复一个对象；模型返回数组时不会展开（已知限制）。
struct EmbeddedObject;

impl ParseStrategy for EmbeddedObject {
    fn kind(&self) -> StrategyKind {
        StrategyKind::EmbeddedObject
    }

    fn parse(&self, raw: &str) -> Result<Vec<QaEntry>, ParseFailure> {
        let matched = EMBEDDED_OBJECT
            .find(raw)
            .ok_or_else(|| ParseFailure("未找到 JSON 对象".to_string()))?;
        let value: Value =
            serde_json::from_str(matched.as_str()).map_err(|e| ParseFailure(e.to_string()))?;
        QaEntry::from_value(&value)
            .map(|entry| vec![entry])
            .ok_or_else(|| ParseFailure("对象缺少 question/answer".to_string()))
    }
}

struct Fallback;

impl ParseStrategy for Fallback {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Fallback
    }

    fn parse(&self, _raw: &str) -> Result<Vec<QaEntry>, ParseFailure> {
        Ok(vec![QaEntry::new(FALLBACK_QUESTION, FALLBACK_ANSWER)])
    }
}

/// 解析结果及生效的策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOutcome {
    pub entries: Vec<QaEntry>,
    pub strategy: StrategyKind,
}

pub struct ResponseParser {
    strategies: Vec<Box<dyn ParseStrategy>>,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self {
            strategies: vec![
                Box::new(StrictLines),
                Box::new(EmbeddedObject),
                Box::new(Fallback),
            ],
        }
    }

    /// 总是返回至少一个 QA 对，不会失败
    pub fn parse(&self, raw: &str) -> Vec<QaEntry> {
        self.parse_with_outcome(raw).entries
    }

    pub fn parse_with_outcome(&self, raw: &str) -> ParseOutcome {
        for strategy in &self.strategies {
            match strategy.parse(raw) {
                Ok(entries) if !entries.is_empty() => {
                    debug!("🧩 Response parsed by {:?}: {} entries", strategy.kind(), entries.len());
                    return ParseOutcome {
                        entries,
                        strategy: strategy.kind(),
                    };
                }
                Ok(_) => {}
                Err(ParseFailure(reason)) => {
                    debug!("{:?} failed: {}", strategy.kind(), reason);
                }
            }
        }

        ParseOutcome {
            entries: vec![QaEntry::new(FALLBACK_QUESTION, FALLBACK_ANSWER)],
            strategy: StrategyKind::Fallback,
        }
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}
