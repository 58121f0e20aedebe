//! 批量执行器 - 固定大小的线程池并行处理记录

use crate::core::error::PipelineError;
use crate::core::pipeline::Pipeline;
use crate::core::record::Record;
use log::info;
use rayon::prelude::*;

/// 批量处理结果，输出顺序与输入顺序一致
#[derive(Debug)]
pub struct BatchReport {
    pub records: Vec<Record>,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.records.len()
    }

    pub fn failures(&self) -> impl Iterator<Item = &Record> {
        self.records.iter().filter(|r| !r.is_ok())
    }
}

pub struct BatchExecutor {
    concurrency: usize,
}

impl BatchExecutor {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// 每条记录独立处理，单条失败不影响其他记录
    pub fn run(&self, pipeline: &Pipeline, records: Vec<Record>) -> Result<BatchReport, PipelineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.concurrency)
            .thread_name(|i| format!("mm-sft-worker-{}", i))
            .build()
            .map_err(|e| PipelineError::Config(format!("无法创建线程池: {}", e)))?;

        info!(
            "🚀 Processing {} records with {} workers",
            records.len(),
            self.concurrency
        );

        let records: Vec<Record> =
            pool.install(|| records.into_par_iter().map(|r| pipeline.run(r)).collect());

        let failed = records.iter().filter(|r| !r.is_ok()).count();
        let succeeded = records.len() - failed;
        info!("🎯 Batch done: {} succeeded, {} failed", succeeded, failed);

        Ok(BatchReport {
            records,
            succeeded,
            failed,
        })
    }
}

impl Default for BatchExecutor {
    fn default() -> Self {
        Self::new(num_cpus::get().min(4))
    }
}
