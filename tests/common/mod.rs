use image::{Rgb, RgbImage};
use mm_sft::core::error::ModelError;
use mm_sft::core::invoker::ModelInvoker;
use mm_sft::core::payload::ChatMessage;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// 固定回复的模型，统计调用次数
pub struct ScriptedInvoker {
    reply: String,
    pub calls: AtomicUsize,
}

impl ScriptedInvoker {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ModelInvoker for ScriptedInvoker {
    fn invoke(&self, _messages: &[ChatMessage]) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }
}

pub fn write_image(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 90]));
    let path = dir.join(name);
    img.save(&path).expect("写入测试图片失败");
    path
}
