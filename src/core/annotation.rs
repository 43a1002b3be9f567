//! 检测框归一化 - 像素坐标转为 YOLO 格式 (中心点 + 宽高，均为比例)

use crate::core::detection::{BoundingBox, Detection};
use crate::core::error::{LabelError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedAnnotation {
    pub class_id: u32,
    pub x_center: f64,
    pub y_center: f64,
    pub width: f64,
    pub height: f64,
}

impl NormalizedAnnotation {
    pub fn from_detection(detection: &Detection, image_height: u32, image_width: u32) -> Self {
        let (w, h) = (image_width as f64, image_height as f64);
        let b = &detection.bbox;
        let (xmin, ymin, xmax, ymax) = (b.xmin as f64, b.ymin as f64, b.xmax as f64, b.ymax as f64);
        Self {
            class_id: detection.class_id,
            x_center: (xmin + xmax) / 2.0 / w,
            y_center: (ymin + ymax) / 2.0 / h,
            width: (xmax - xmin) / w,
            height: (ymax - ymin) / h,
        }
    }

    /// `class x_center y_center width height`, six decimals.
    pub fn to_line(&self) -> String {
        format!(
            "{} {:.6} {:.6} {:.6} {:.6}",
            self.class_id, self.x_center, self.y_center, self.width, self.height
        )
    }

    pub fn parse_line(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(LabelError::unsupported(format!(
                "annotation line needs 5 fields, got {}: '{}'",
                fields.len(),
                line
            )));
        }
        let class_id = fields[0]
            .parse()
            .map_err(|_| LabelError::unsupported(format!("bad class id '{}'", fields[0])))?;
        let mut values = [0f64; 4];
        for (slot, field) in values.iter_mut().zip(&fields[1..]) {
            *slot = field
                .parse()
                .map_err(|_| LabelError::unsupported(format!("bad coordinate '{}'", field)))?;
        }
        Ok(Self {
            class_id,
            x_center: values[0],
            y_center: values[1],
            width: values[2],
            height: values[3],
        })
    }

    /// 还原为指定尺寸图像上的像素框
    pub fn to_absolute(&self, image_height: u32, image_width: u32) -> BoundingBox {
        let (w, h) = (image_width as f64, image_height as f64);
        let half_w = self.width * w / 2.0;
        let half_h = self.height * h / 2.0;
        let (cx, cy) = (self.x_center * w, self.y_center * h);
        BoundingBox::new(
            (cx - half_w) as f32,
            (cy - half_h) as f32,
            (cx + half_w) as f32,
            (cy + half_h) as f32,
        )
    }

    /// 是否落在 [0, 1] 范围内
    pub fn is_within_bounds(&self) -> bool {
        let eps = 1e-9;
        self.x_center - self.width / 2.0 >= -eps
            && self.x_center + self.width / 2.0 <= 1.0 + eps
            && self.y_center - self.height / 2.0 >= -eps
            && self.y_center + self.height / 2.0 <= 1.0 + eps
    }
}

/// 批量归一化，不再做过滤（阈值与类别已由检测后端处理）
pub fn normalize(
    detections: &[Detection],
    image_height: u32,
    image_width: u32,
) -> Result<Vec<NormalizedAnnotation>> {
    if image_height == 0 || image_width == 0 {
        return Err(LabelError::unsupported(format!(
            "cannot normalize against a {}x{} image",
            image_width, image_height
        )));
    }
    Ok(detections
        .iter()
        .map(|d| NormalizedAnnotation::from_detection(d, image_height, image_width))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Detection {
        Detection::new(3, 0.9, BoundingBox::new(xmin, ymin, xmax, ymax))
    }

    #[test]
    fn test_normalize_known_box() {
        let out = normalize(&[det(100.0, 100.0, 200.0, 200.0)], 400, 400).unwrap();
        assert_eq!(out.len(), 1);
        let a = out[0];
        assert_eq!(a.class_id, 3);
        assert_eq!(a.x_center, 0.375);
        assert_eq!(a.y_center, 0.375);
        assert_eq!(a.width, 0.25);
        assert_eq!(a.height, 0.25);
        assert_eq!(a.to_line(), "3 0.375000 0.375000 0.250000 0.250000");
        assert!(a.is_within_bounds());
    }

    #[test]
    fn test_non_square_image() {
        let a = normalize(&[det(0.0, 0.0, 640.0, 90.0)], 360, 640).unwrap()[0];
        assert_eq!(a.x_center, 0.5);
        assert_eq!(a.width, 1.0);
        assert_eq!(a.y_center, 0.125);
        assert_eq!(a.height, 0.25);
    }

    #[test]
    fn test_round_trip_through_text() {
        let boxes = [
            (13.0, 7.5, 211.25, 96.0),
            (0.0, 0.0, 1919.0, 1079.0),
            (333.3, 444.4, 555.5, 666.6),
        ];
        for (xmin, ymin, xmax, ymax) in boxes {
            let a = normalize(&[det(xmin, ymin, xmax, ymax)], 1080, 1920).unwrap()[0];
            let parsed = NormalizedAnnotation::parse_line(&a.to_line()).unwrap();
            let back = parsed.to_absolute(1080, 1920);

            // 6 decimals of a 1920 px axis is about 0.002 px
            let tol = 1e-6 * 1920.0 + 1e-3;
            assert!((back.xmin - xmin).abs() < tol as f32, "{} vs {}", back.xmin, xmin);
            assert!((back.ymin - ymin).abs() < tol as f32);
            assert!((back.xmax - xmax).abs() < tol as f32);
            assert!((back.ymax - ymax).abs() < tol as f32);
        }
    }

    #[test]
    fn test_zero_size_image_rejected() {
        let err = normalize(&[det(0.0, 0.0, 1.0, 1.0)], 0, 10).unwrap_err();
        assert_eq!(err.kind(), crate::core::error::ErrorKind::UnsupportedFormat);
        assert!(normalize(&[], 10, 10).unwrap().is_empty());
    }

    #[test]
    fn test_parse_line_rejects_garbage() {
        assert!(NormalizedAnnotation::parse_line("1 0.5 0.5 0.1").is_err());
        assert!(NormalizedAnnotation::parse_line("x 0.5 0.5 0.1 0.1").is_err());
        assert!(NormalizedAnnotation::parse_line("1 0.5 y 0.1 0.1").is_err());
    }
}
