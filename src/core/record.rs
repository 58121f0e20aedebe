//! 记录模型 - 在 pipeline 中流转的数据单元

use crate::core::error::{ErrorKind, PipelineError};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use tempfile::TempDir;

pub const ID_FIELD: &str = "id";
pub const ERROR_FIELD: &str = "error";

/// 写入记录的错误注解
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordError {
    pub kind: ErrorKind,
    pub stage: String,
    pub message: String,
}

/// 一条记录：开放的字段映射 + 错误注解 + 临时资源
///
/// 临时资源（如抽帧目录）不参与序列化，随记录处理结束统一释放。
#[derive(Debug, Default)]
pub struct Record {
    fields: Map<String, Value>,
    error: Option<RecordError>,
    scratch: Vec<TempDir>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(id: impl Into<Value>) -> Self {
        let mut record = Self::new();
        record.set(ID_FIELD, id);
        record
    }

    /// `error` 字段能解析为错误注解时才恢复为注解，否则作为普通字段保留
    pub fn from_fields(mut fields: Map<String, Value>) -> Self {
        let error = match fields.remove(ERROR_FIELD) {
            Some(value) => match serde_json::from_value::<RecordError>(value.clone()) {
                Ok(error) => Some(error),
                Err(_) => {
                    fields.insert(ERROR_FIELD.to_string(), value);
                    None
                }
            },
            None => None,
        };
        Self {
            fields,
            error,
            scratch: Vec::new(),
        }
    }

    pub fn id(&self) -> Option<&Value> {
        self.fields.get(ID_FIELD)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.fields.insert(key.to_string(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    /// 取必需字段，缺失时返回 `MissingField`
    pub fn require(&self, stage: &str, key: &str) -> Result<&Value, PipelineError> {
        self.fields
            .get(key)
            .ok_or_else(|| PipelineError::missing_field(stage, key))
    }

    pub fn require_str(&self, stage: &str, key: &str) -> Result<&str, PipelineError> {
        self.require(stage, key)?
            .as_str()
            .ok_or_else(|| PipelineError::stage(stage, format!("字段 {} 不是字符串", key)))
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    pub fn error(&self) -> Option<&RecordError> {
        self.error.as_ref()
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn annotate(&mut self, stage: &str, err: &PipelineError) {
        self.error = Some(RecordError {
            kind: err.kind(),
            stage: stage.to_string(),
            message: err.to_string(),
        });
    }

    /// 合并阶段输出，只接受阶段声明过的字段
    pub(crate) fn apply(
        &mut self,
        stage: &str,
        declared: &[&str],
        output: StageOutput,
    ) -> Result<(), PipelineError> {
        if let Some(key) = output
            .fields
            .keys()
            .find(|key| !declared.contains(&key.as_str()))
        {
            return Err(PipelineError::stage(
                stage,
                format!("写入了未声明的字段: {}", key),
            ));
        }
        self.fields.extend(output.fields);
        self.scratch.extend(output.scratch);
        Ok(())
    }

    pub fn scratch_count(&self) -> usize {
        self.scratch.len()
    }

    /// 释放临时目录（drop 时删除）
    pub(crate) fn release_scratch(&mut self) {
        self.scratch.clear();
    }
}

/// 扁平输出；带错误注解时，注解占用 `error` 键
impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for (key, value) in &self.fields {
            if key == ERROR_FIELD && self.error.is_some() {
                continue;
            }
            map.serialize_entry(key, value)?;
        }
        if let Some(error) = &self.error {
            map.serialize_entry(ERROR_FIELD, error)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Map::<String, Value>::deserialize(deserializer).map(Self::from_fields)
    }
}

/// 阶段输出：写入的字段与需要随记录存活的临时资源
#[derive(Debug, Default)]
pub struct StageOutput {
    fields: Map<String, Value>,
    scratch: Vec<TempDir>,
}

impl StageOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.fields.insert(key.to_string(), value.into());
    }

    pub fn hold(&mut self, dir: TempDir) {
        self.scratch.push(dir);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}
