use crate::core::detection::Detection;
use crate::core::error::{LabelError, Result};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// 模型架构（决定输出张量布局）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchitectureKind {
    /// `[1, N, 5 + nc]` with objectness
    Yolov5,
    /// `[1, 4 + nc, N]`
    Yolov8,
    /// Same head layout as v8
    Yolov11,
}

impl ArchitectureKind {
    /// 根据权重文件名推断，默认 v8
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if name.contains("yolov5") || name.contains("v5") {
            ArchitectureKind::Yolov5
        } else if name.contains("yolov11") || name.contains("yolo11") || name.contains("v11") {
            ArchitectureKind::Yolov11
        } else {
            ArchitectureKind::Yolov8
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArchitectureKind::Yolov5 => "yolov5",
            ArchitectureKind::Yolov8 => "yolov8",
            ArchitectureKind::Yolov11 => "yolov11",
        }
    }

    /// 输出是否带独立的 objectness 分数
    pub fn has_objectness(&self) -> bool {
        matches!(self, ArchitectureKind::Yolov5)
    }
}

impl FromStr for ArchitectureKind {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yolov5" | "v5" => Ok(ArchitectureKind::Yolov5),
            "yolov8" | "v8" => Ok(ArchitectureKind::Yolov8),
            "yolov11" | "yolo11" | "v11" => Ok(ArchitectureKind::Yolov11),
            other => Err(LabelError::ModelLoad(format!(
                "unknown model architecture '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ArchitectureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 推理设备，每次运行解析一次
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Device {
    #[default]
    Cpu,
    Cuda(u32),
}

impl Device {
    pub fn is_accelerated(&self) -> bool {
        matches!(self, Device::Cuda(_))
    }
}

impl FromStr for Device {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda(0)),
            _ => s
                .strip_prefix("cuda:")
                .and_then(|n| n.parse().ok())
                .map(Device::Cuda)
                .ok_or_else(|| LabelError::config(format!("unknown device '{}'", s))),
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(n) => write!(f, "cuda:{}", n),
        }
    }
}

/// 已加载的检测模型
///
/// Implementations are asked to restrict their own output to the threshold and
/// class set, but callers must not rely on it.
pub trait DetectionModel: Send {
    fn architecture(&self) -> ArchitectureKind;

    fn infer(
        &mut self,
        image: &RgbImage,
        confidence_threshold: f32,
        allowed_class_ids: &[u32],
    ) -> Result<Vec<Detection>>;
}

/// 模型加载器，权重与声明架构不符时返回 `ModelLoad`
pub trait ModelLoader {
    fn load(
        &self,
        weights: &Path,
        architecture: ArchitectureKind,
        device: Device,
    ) -> Result<Box<dyn DetectionModel>>;
}
