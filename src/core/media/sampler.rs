//! 视频均匀抽帧

use crate::core::error::MediaError;
use crate::core::media::normalizer::{EncodedImage, ImageNormalizer};
use image::DynamicImage;
use log::{debug, info, warn};
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use tempfile::TempDir;

/// 视频解码接口
pub trait VideoDecoder: Send + Sync {
    /// 视频总帧数
    fn frame_count(&self, video: &Path) -> Result<u64, MediaError>;

    /// 解码第 `index` 帧，中间文件写入 `workdir`
    fn decode_frame(
        &self,
        video: &Path,
        index: u64,
        workdir: &Path,
    ) -> Result<DynamicImage, MediaError>;
}

/// 基于 ffmpeg / ffprobe 命令行的解码器
pub struct FfmpegDecoder {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl FfmpegDecoder {
    pub fn new() -> Self {
        Self::with_paths("ffmpeg", "ffprobe")
    }

    pub fn with_paths(ffmpeg_path: &str, ffprobe_path: &str) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.to_string(),
            ffprobe_path: ffprobe_path.to_string(),
        }
    }

    fn read_error(video: &Path, reason: impl Into<String>) -> MediaError {
        MediaError::Read {
            path: video.display().to_string(),
            reason: reason.into(),
        }
    }
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoDecoder for FfmpegDecoder {
    fn frame_count(&self, video: &Path) -> Result<u64, MediaError> {
        if !video.is_file() {
            return Err(Self::read_error(video, "文件不存在"));
        }

        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v", "error",
                "-select_streams", "v:0",
                "-count_packets",
                "-show_entries", "stream=nb_read_packets",
                "-of", "csv=p=0",
            ])
            .arg(video)
            .output()
            .map_err(|e| MediaError::Decoder(format!("无法执行 ffprobe: {}", e)))?;

        if !output.status.success() {
            return Err(Self::read_error(
                video,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let first = stdout.trim().split(',').next().unwrap_or("").trim();
        if first.is_empty() {
            // 没有视频流
            return Ok(0);
        }
        first
            .parse::<u64>()
            .map_err(|_| MediaError::Decoder(format!("无法解析帧数: {:?}", first)))
    }

    fn decode_frame(
        &self,
        video: &Path,
        index: u64,
        workdir: &Path,
    ) -> Result<DynamicImage, MediaError> {
        let dest = workdir.join(format!("frame_{:06}.png", index));
        let select = format!("select=eq(n\\,{})", index);
        let status = Command::new(&self.ffmpeg_path)
            .args(["-v", "error", "-i"])
            .arg(video)
            .args([
                "-vf", select.as_str(),
                "-vsync", "0",
                "-frames:v", "1",
                "-y",
            ])
            .arg(&dest)
            .status()
            .map_err(|e| MediaError::Decoder(format!("无法执行 ffmpeg: {}", e)))?;

        if !status.success() || !dest.is_file() {
            return Err(MediaError::Decoder(format!("帧 {} 解码失败", index)));
        }

        image::open(&dest).map_err(|e| MediaError::Decoder(e.to_string()))
    }
}

/// 在 [0, total-1] 上均匀选取帧号
///
/// total < n 时使用全部帧；n == 1 时只取第 0 帧。
pub fn sample_indices(total: u64, n: usize) -> Vec<u64> {
    if total == 0 || n == 0 {
        return Vec::new();
    }
    if total < n as u64 {
        return (0..total).collect();
    }
    if n == 1 {
        return vec![0];
    }

    let last = (total - 1) as f64;
    let steps = (n - 1) as f64;
    (0..n)
        .map(|i| ((i as f64 * last / steps).round() as u64).min(total - 1))
        .collect()
}

#[derive(Debug, Clone)]
pub struct SampledFrame {
    pub index: u64,
    pub image: EncodedImage,
}

/// 按时间顺序排列的抽帧结果
#[derive(Debug, Clone, Default)]
pub struct FrameSet {
    pub frames: Vec<SampledFrame>,
    pub total_frames: u64,
}

impl FrameSet {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn indices(&self) -> Vec<u64> {
        self.frames.iter().map(|f| f.index).collect()
    }

    pub fn images(&self) -> impl Iterator<Item = &EncodedImage> {
        self.frames.iter().map(|f| &f.image)
    }
}

pub struct FrameSampler {
    decoder: Arc<dyn VideoDecoder>,
    quality: u8,
}

impl FrameSampler {
    pub fn new(decoder: Arc<dyn VideoDecoder>, quality: u8) -> Self {
        Self { decoder, quality }
    }

    /// 抽取 n 帧并重编码
    ///
    /// 返回的临时目录保存了中间帧文件，由调用方决定何时释放。
    pub fn sample(&self, video: &Path, n: usize) -> Result<(FrameSet, TempDir), MediaError> {
        let total = self.decoder.frame_count(video)?;
        if total == 0 {
            return Err(MediaError::NoFrames(video.display().to_string()));
        }
        info!("🎬 Sampling {} of {} frames from {}", n.min(total as usize), total, video.display());

        let workdir = tempfile::Builder::new().prefix("mm_sft_frames_").tempdir()?;
        let mut frames = Vec::new();

        for index in sample_indices(total, n) {
            let decoded = self
                .decoder
                .decode_frame(video, index, workdir.path())
                .and_then(|img| ImageNormalizer::encode(&img, self.quality));
            match decoded {
                Ok(image) => frames.push(SampledFrame { index, image }),
                Err(e) => warn!("⚠️ Frame {} skipped: {}", index, e),
            }
        }

        if frames.is_empty() {
            return Err(MediaError::NoFrames(video.display().to_string()));
        }
        debug!("✓ Extracted {} frames", frames.len());

        Ok((
            FrameSet {
                frames,
                total_frames: total,
            },
            workdir,
        ))
    }
}
