//! 目标检测后端
//!
//! 两种可互换的策略共用 [`Detector`] 接口：
//! - [`DirectDetector`]: 整帧推理一次
//! - [`TiledDetector`]: 重叠切片逐块推理，结果平移回整帧坐标
//!
//! The model itself sits behind [`DetectionModel`] / [`ModelLoader`]; the
//! [`DetectorFactory`] picks the strategy and loads weights once per run.

pub mod direct;
pub mod factory;
pub mod mock;
pub mod model;
pub mod nms;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod tiled;

use crate::core::error::Result;
use image::RgbImage;

pub use direct::DirectDetector;
pub use factory::{default_loader, DetectorFactory};
pub use mock::{MockModel, MockModelLoader};
pub use model::{ArchitectureKind, DetectionModel, Device, ModelLoader};
pub use nms::{iou, non_max_suppression};
#[cfg(feature = "onnx")]
pub use onnx::OnnxModelLoader;
pub use tiled::{tile_grid, Tile, TileMerge, TiledDetector, TilingConfig};

/// 像素坐标下的框 (xmin, ymin, xmax, ymax)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingBox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl BoundingBox {
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    pub fn from_cxcywh(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
    }

    pub fn width(&self) -> f32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f32 {
        self.ymax - self.ymin
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.xmin + self.xmax) / 2.0, (self.ymin + self.ymax) / 2.0)
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn is_ordered(&self) -> bool {
        self.xmin <= self.xmax && self.ymin <= self.ymax
    }

    pub fn translate(&self, dx: f32, dy: f32) -> Self {
        Self::new(self.xmin + dx, self.ymin + dy, self.xmax + dx, self.ymax + dy)
    }

    pub fn clip(&self, width: f32, height: f32) -> Self {
        Self::new(
            self.xmin.clamp(0.0, width),
            self.ymin.clamp(0.0, height),
            self.xmax.clamp(0.0, width),
            self.ymax.clamp(0.0, height),
        )
    }
}

/// 单个检测结果（绝对像素坐标）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(class_id: u32, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class_id,
            confidence,
            bbox,
        }
    }
}

/// 检测后端统一接口
///
/// Every returned detection has `confidence >= confidence_threshold`, a class id
/// in `allowed_class_ids` and an ordered box inside the image.
pub trait Detector: Send {
    fn name(&self) -> &'static str;

    fn detect(
        &mut self,
        image: &RgbImage,
        confidence_threshold: f32,
        allowed_class_ids: &[u32],
    ) -> Result<Vec<Detection>>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn detect(
        &mut self,
        image: &RgbImage,
        confidence_threshold: f32,
        allowed_class_ids: &[u32],
    ) -> Result<Vec<Detection>> {
        (**self).detect(image, confidence_threshold, allowed_class_ids)
    }
}
