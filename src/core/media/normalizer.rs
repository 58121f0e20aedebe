//! 图片归一化 - 限制尺寸并统一重编码为 JPEG

use crate::core::error::MediaError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageOutputFormat};
use log::debug;
use std::io::Cursor;
use std::path::Path;

/// 归一化后的图片（JPEG，RGB 三通道）
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedImage {
    pub jpeg_data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl EncodedImage {
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.jpeg_data)
    }

    pub fn data_url(&self) -> String {
        jpeg_data_url(&self.to_base64())
    }

    /// 负载大小估算：base64 长度 / 4
    pub fn estimated_tokens(&self) -> usize {
        self.jpeg_data.len().div_ceil(3)
    }
}

pub fn jpeg_data_url(base64_data: &str) -> String {
    format!("data:image/jpeg;base64,{}", base64_data)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeConfig {
    pub max_width: u32,
    pub max_height: u32,
    pub quality: u8,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            max_width: 800,
            max_height: 800,
            quality: 85,
        }
    }
}

pub struct ImageNormalizer {
    config: NormalizeConfig,
}

impl ImageNormalizer {
    pub fn new() -> Self {
        Self::with_config(NormalizeConfig::default())
    }

    pub fn with_config(config: NormalizeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NormalizeConfig {
        &self.config
    }

    pub fn normalize(&self, path: &Path) -> Result<EncodedImage, MediaError> {
        let img = image::open(path).map_err(|e| MediaError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let (width, height) = img.dimensions();
        let (target_w, target_h) = self.target_size(width, height);
        let img = if (target_w, target_h) != (width, height) {
            debug!(
                "📐 Resizing {}: {}x{} -> {}x{}",
                path.display(),
                width,
                height,
                target_w,
                target_h
            );
            img.resize_exact(target_w, target_h, FilterType::Lanczos3)
        } else {
            img
        };

        let encoded = Self::encode(&img, self.config.quality)?;
        debug!(
            "🗜️ Compressed {}: {:.1}KB -> {:.1}KB",
            path.display(),
            std::fs::metadata(path).map(|m| m.len()).unwrap_or(0) as f64 / 1024.0,
            encoded.jpeg_data.len() as f64 / 1024.0
        );
        Ok(encoded)
    }

    /// 超出边界时按 min(max_w/w, max_h/h) 等比缩放，四舍五入且不小于 1
    pub fn target_size(&self, width: u32, height: u32) -> (u32, u32) {
        let NormalizeConfig {
            max_width,
            max_height,
            ..
        } = self.config;

        if width == 0 || height == 0 || (width <= max_width && height <= max_height) {
            return (width, height);
        }

        let ratio = (max_width as f64 / width as f64).min(max_height as f64 / height as f64);
        let scaled_w = ((width as f64 * ratio).round() as u32).clamp(1, max_width.max(1));
        let scaled_h = ((height as f64 * ratio).round() as u32).clamp(1, max_height.max(1));
        (scaled_w, scaled_h)
    }

    /// 转 RGB 并按给定质量编码为 JPEG，不做尺寸检查
    pub fn encode(img: &DynamicImage, quality: u8) -> Result<EncodedImage, MediaError> {
        let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
        let (width, height) = rgb.dimensions();

        let mut buffer = Cursor::new(Vec::new());
        rgb.write_to(&mut buffer, ImageOutputFormat::Jpeg(quality.clamp(1, 100)))
            .map_err(|e| MediaError::Encode(e.to_string()))?;

        Ok(EncodedImage {
            jpeg_data: buffer.into_inner(),
            width,
            height,
        })
    }
}

impl Default for ImageNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ColorType, Rgb, RgbImage, Rgba, RgbaImage};

    fn write_rgb(dir: &Path, name: &str, width: u32, height: u32) -> std::path::PathBuf {
        let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
        let path = dir.join(name);
        img.save(&path).expect("写入测试图片失败");
        path
    }

    #[test]
    fn test_target_size_within_bounds() {
        let normalizer = ImageNormalizer::new();
        assert_eq!(normalizer.target_size(640, 480), (640, 480));
        assert_eq!(normalizer.target_size(800, 800), (800, 800));
    }

    #[test]
    fn test_target_size_preserves_aspect() {
        let normalizer = ImageNormalizer::new();
        assert_eq!(normalizer.target_size(1600, 1200), (800, 600));
        assert_eq!(normalizer.target_size(1200, 1600), (600, 800));

        let (w, h) = normalizer.target_size(3000, 1000);
        assert_eq!(w, 800);
        let ideal = 1000.0 * 800.0 / 3000.0;
        assert!((h as f64 - ideal).abs() <= 1.0);
    }

    #[test]
    fn test_target_size_never_zero() {
        let normalizer = ImageNormalizer::with_config(NormalizeConfig {
            max_width: 100,
            max_height: 100,
            quality: 80,
        });
        assert_eq!(normalizer.target_size(10_000, 10), (100, 1));
    }

    #[test]
    fn test_normalize_large_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_rgb(dir.path(), "large.png", 1600, 900);

        let encoded = ImageNormalizer::new().normalize(&path).expect("归一化失败");
        assert_eq!((encoded.width, encoded.height), (800, 450));

        let decoded = image::load_from_memory(&encoded.jpeg_data).unwrap();
        assert_eq!(decoded.dimensions(), (800, 450));
    }

    #[test]
    fn test_normalize_small_image_still_reencoded() {
        let dir = tempfile::tempdir().unwrap();
        let img = RgbaImage::from_pixel(64, 32, Rgba([10, 20, 30, 128]));
        let path = dir.path().join("small.png");
        img.save(&path).unwrap();

        let encoded = ImageNormalizer::new().normalize(&path).unwrap();
        assert_eq!((encoded.width, encoded.height), (64, 32));

        let format = image::guess_format(&encoded.jpeg_data).unwrap();
        assert_eq!(format, image::ImageFormat::Jpeg);
        let decoded = image::load_from_memory(&encoded.jpeg_data).unwrap();
        assert_eq!(decoded.color(), ColorType::Rgb8);
    }

    #[test]
    fn test_normalize_missing_file() {
        let result = ImageNormalizer::new().normalize(Path::new("/nonexistent/none.jpg"));
        assert!(matches!(result, Err(MediaError::Read { .. })));
    }

    #[test]
    fn test_normalize_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();

        let result = ImageNormalizer::new().normalize(&path);
        assert!(matches!(result, Err(MediaError::Read { .. })));
    }

    #[test]
    fn test_data_url_and_token_estimate() {
        let encoded = EncodedImage {
            jpeg_data: vec![1, 2, 3, 4, 5, 6, 7],
            width: 1,
            height: 1,
        };
        assert!(encoded.data_url().starts_with("data:image/jpeg;base64,"));
        assert_eq!(encoded.estimated_tokens(), encoded.to_base64().len() / 4);
    }
}
