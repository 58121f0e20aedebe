//! Pipeline 引擎 - 按顺序组合阶段

pub mod executor;

pub use executor::{BatchExecutor, BatchReport};

use crate::core::error::PipelineError;
use crate::core::record::{Record, StageOutput};
use log::{debug, warn};
use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};

/// 单个处理阶段
///
/// 阶段只读取输入记录，通过 `StageOutput` 返回自己负责的字段，
/// 由引擎合并回记录。
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    /// 输入记录中必须存在的字段
    fn requires(&self) -> Vec<&str>;

    /// 本阶段写入的字段
    fn produces(&self) -> Vec<&str>;

    fn process(&self, record: &Record) -> Result<StageOutput, PipelineError>;
}

pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    /// 构造时校验字段依赖：每个必需字段要么由输入提供，要么由前面的阶段产生
    pub fn new(stages: Vec<Box<dyn Stage>>, provided: &[&str]) -> Result<Self, PipelineError> {
        if stages.is_empty() {
            return Err(PipelineError::Config("pipeline 至少需要一个阶段".to_string()));
        }

        let mut available: HashSet<String> = provided.iter().map(|f| f.to_string()).collect();
        for stage in &stages {
            if let Some(field) = stage.requires().into_iter().find(|f| !available.contains(*f)) {
                return Err(PipelineError::missing_field(stage.name(), field));
            }
            available.extend(stage.produces().into_iter().map(str::to_string));
        }

        Ok(Self { stages })
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// 处理单条记录；第一个失败的阶段终止该记录并写入错误注解
    pub fn run(&self, mut record: Record) -> Record {
        if record.error().is_some() {
            return record;
        }

        for stage in &self.stages {
            let result = panic::catch_unwind(AssertUnwindSafe(|| stage.process(&record)))
                .unwrap_or_else(|payload| {
                    Err(PipelineError::stage(
                        stage.name(),
                        format!("阶段发生 panic: {}", panic_message(payload.as_ref())),
                    ))
                })
                .and_then(|output| record.apply(stage.name(), &stage.produces(), output));

            if let Err(e) = result {
                warn!("❌ Record {:?} failed at {}: {}", record.id(), stage.name(), e);
                record.annotate(stage.name(), &e);
                break;
            }
            debug!("✓ {} done for record {:?}", stage.name(), record.id());
        }

        record.release_scratch();
        record
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "未知错误".to_string())
}
