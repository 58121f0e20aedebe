//! JSONL 读写

use crate::core::error::PipelineError;
use crate::core::record::Record;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// 读取 JSONL 文件，跳过空行，每行必须是 JSON 对象
pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<Record>, PipelineError> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    let mut records = Vec::new();

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Map<String, Value> = serde_json::from_str(&line)
            .map_err(|source| PipelineError::Jsonl { line: i + 1, source })?;
        records.push(Record::from_fields(fields));
    }

    Ok(records)
}

pub struct JsonlWriter {
    writer: BufWriter<File>,
    written: usize,
}

impl JsonlWriter {
    /// 创建（覆盖）输出文件，必要时创建父目录
    pub fn create(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        Self::ensure_parent(path.as_ref())?;
        Ok(Self::from_file(File::create(path)?))
    }

    pub fn append(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        Self::ensure_parent(path.as_ref())?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::from_file(file))
    }

    fn from_file(file: File) -> Self {
        Self {
            writer: BufWriter::new(file),
            written: 0,
        }
    }

    fn ensure_parent(path: &Path) -> Result<(), PipelineError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    pub fn write<T: Serialize>(&mut self, item: &T) -> Result<(), PipelineError> {
        serde_json::to_writer(&mut self.writer, item)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    pub fn write_all<'a, T, I>(&mut self, items: I) -> Result<(), PipelineError>
    where
        T: Serialize + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        for item in items {
            self.write(item)?;
        }
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn finish(mut self) -> Result<usize, PipelineError> {
        self.writer.flush()?;
        Ok(self.written)
    }
}
