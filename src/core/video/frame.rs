use image::{DynamicImage, RgbImage};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

static UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_-]").unwrap());

/// 采样帧 - 解码后的 RGB 像素 + 源序号 + 输出文件名前缀
#[derive(Debug, Clone)]
pub struct SampledFrame {
    pub image: RgbImage,
    pub index: u64,
    pub basename: String,
}

impl SampledFrame {
    pub fn new(image: RgbImage, index: u64, video_stem: &str) -> Self {
        Self {
            image,
            index,
            basename: frame_basename(video_stem, index),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn info(&self) -> FrameInfo {
        FrameInfo::from_frame(self)
    }

    pub fn to_dynamic(&self) -> DynamicImage {
        DynamicImage::ImageRgb8(self.image.clone())
    }
}

/// 帧元数据（轻量级，用于传递信息）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub width: u32,
    pub height: u32,
    pub index: u64,
}

impl FrameInfo {
    pub fn from_frame(frame: &SampledFrame) -> Self {
        Self {
            width: frame.width(),
            height: frame.height(),
            index: frame.index,
        }
    }
}

/// 视频文件名（不含扩展名），`[A-Za-z0-9_-]` 以外的字符替换为 `_`
pub fn video_stem(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let cleaned = UNSAFE_CHARS.replace_all(&stem, "_").to_string();
    if cleaned.is_empty() {
        "video".to_string()
    } else {
        cleaned
    }
}

pub fn frame_basename(video_stem: &str, index: u64) -> String {
    format!("{}_image{}", video_stem, index)
}
