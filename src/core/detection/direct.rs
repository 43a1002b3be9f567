use crate::core::detection::{Detection, DetectionModel, Detector};
use crate::core::error::Result;
use image::RgbImage;
use log::{debug, warn};

/// 整帧单次推理
pub struct DirectDetector {
    model: Box<dyn DetectionModel>,
}

impl DirectDetector {
    pub fn new(model: Box<dyn DetectionModel>) -> Self {
        Self { model }
    }
}

impl Detector for DirectDetector {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn detect(
        &mut self,
        image: &RgbImage,
        confidence_threshold: f32,
        allowed_class_ids: &[u32],
    ) -> Result<Vec<Detection>> {
        let raw = self
            .model
            .infer(image, confidence_threshold, allowed_class_ids)?;
        let raw_count = raw.len();
        let kept = filter_detections(
            raw,
            image.width(),
            image.height(),
            confidence_threshold,
            allowed_class_ids,
        );
        debug!(
            "Direct: {} raw -> {} kept on {}x{}",
            raw_count,
            kept.len(),
            image.width(),
            image.height()
        );
        Ok(kept)
    }
}

/// 对模型原始输出执行阈值与类别过滤，并将框裁剪到图像范围内
pub(crate) fn filter_detections(
    raw: Vec<Detection>,
    width: u32,
    height: u32,
    confidence_threshold: f32,
    allowed_class_ids: &[u32],
) -> Vec<Detection> {
    raw.into_iter()
        .filter(|d| d.confidence >= confidence_threshold)
        .filter(|d| allowed_class_ids.contains(&d.class_id))
        .filter_map(|mut d| {
            d.bbox = d.bbox.clip(width as f32, height as f32);
            if !d.bbox.is_ordered() {
                warn!(
                    "⚠️ Dropping inverted box for class {}: {:?}",
                    d.class_id, d.bbox
                );
                return None;
            }
            Some(d)
        })
        .collect()
}
