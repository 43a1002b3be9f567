//! 帧变换 - 每个启用的变换都作用于原始帧，各自产出一个变体

use crate::core::error::{LabelError, Result};
use crate::core::video::frame::SampledFrame;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, RgbImage};
use log::debug;
use serde::{Deserialize, Serialize};

pub const ORIGINAL_VARIANT: &str = "original";
pub const RESIZED_VARIANT: &str = "resized";
pub const GRAYSCALE_VARIANT: &str = "grayscale";
pub const ROTATED_VARIANT: &str = "rotated_90";

/// Set of active transforms. Order-independent: each one is applied to the original frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformSpec {
    /// Target `(width, height)` for the resize variant
    pub resize: Option<(u32, u32)>,
    pub grayscale: bool,
    pub rotate_90: bool,
}

impl TransformSpec {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn active_count(&self) -> usize {
        self.resize.is_some() as usize + self.grayscale as usize + self.rotate_90 as usize
    }

    pub fn is_empty(&self) -> bool {
        self.active_count() == 0
    }

    pub fn validate(&self) -> Result<()> {
        if let Some((w, h)) = self.resize {
            if w == 0 || h == 0 {
                return Err(LabelError::config(format!(
                    "resize target must be non-zero, got {}x{}",
                    w, h
                )));
            }
        }
        Ok(())
    }
}

/// 变换输出的一个变体，始终为 3 通道
#[derive(Debug, Clone)]
pub struct FrameVariant {
    pub name: &'static str,
    pub image: RgbImage,
}

impl FrameVariant {
    pub fn file_stem(&self, basename: &str) -> String {
        variant_stem(basename, self.name)
    }
}

/// 输出文件名：非 original 变体追加 `_{variant}` 后缀
pub fn variant_stem(basename: &str, variant: &str) -> String {
    if variant == ORIGINAL_VARIANT {
        basename.to_string()
    } else {
        format!("{}_{}", basename, variant)
    }
}

pub struct FrameTransformer {
    spec: TransformSpec,
}

impl FrameTransformer {
    pub fn new(spec: TransformSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &TransformSpec {
        &self.spec
    }

    /// Variants in fixed order `resized, grayscale, rotated_90`, or just `original`.
    pub fn apply(&self, frame: &SampledFrame) -> Result<Vec<FrameVariant>> {
        if self.spec.is_empty() {
            return Ok(vec![FrameVariant {
                name: ORIGINAL_VARIANT,
                image: frame.image.clone(),
            }]);
        }

        let source = frame.to_dynamic();
        let mut variants = Vec::with_capacity(self.spec.active_count());

        if let Some((width, height)) = self.spec.resize {
            variants.push(FrameVariant {
                name: RESIZED_VARIANT,
                image: resize(&source, width, height)?.to_rgb8(),
            });
        }
        if self.spec.grayscale {
            variants.push(FrameVariant {
                name: GRAYSCALE_VARIANT,
                // 单通道结果重新扩展为 3 通道，下游检测假定彩色输入
                image: grayscale(&source)?.to_rgb8(),
            });
        }
        if self.spec.rotate_90 {
            variants.push(FrameVariant {
                name: ROTATED_VARIANT,
                image: rotate_90(&source).to_rgb8(),
            });
        }

        debug!(
            "Frame {}: {} variants ({:?})",
            frame.index,
            variants.len(),
            variants.iter().map(|v| v.name).collect::<Vec<_>>()
        );
        Ok(variants)
    }
}

pub fn resize(image: &DynamicImage, width: u32, height: u32) -> Result<DynamicImage> {
    let resized = image.resize_exact(width, height, FilterType::Triangle);
    if resized.dimensions() != (width, height) {
        return Err(LabelError::unsupported(format!(
            "resize produced {:?}, expected {}x{}",
            resized.dimensions(),
            width,
            height
        )));
    }
    Ok(resized)
}

/// Requires a 3-channel buffer; the result is single-channel.
pub fn grayscale(image: &DynamicImage) -> Result<DynamicImage> {
    let channels = image.color().channel_count();
    if channels != 3 {
        return Err(LabelError::unsupported(format!(
            "grayscale conversion needs 3 channels, got {}",
            channels
        )));
    }
    Ok(image.grayscale())
}

/// 顺时针旋转 90°，`(w, h)` 变为 `(h, w)`
pub fn rotate_90(image: &DynamicImage) -> DynamicImage {
    image.rotate90()
}
