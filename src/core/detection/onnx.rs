//! YOLO ONNX 推理后端
//!
//! Expects Ultralytics exports with a single `output0` tensor:
//! - v8 / v11: `[1, 4 + nc, N]`, rows `cx, cy, w, h, class scores...`
//! - v5: `[1, N, 5 + nc]`, rows `cx, cy, w, h, objectness, class scores...`
//!
//! 输入按 Ultralytics 训练时的方式做 letterbox：等比缩放后用灰边 (114) 补成正方形。

use crate::core::detection::nms::non_max_suppression;
use crate::core::detection::{
    ArchitectureKind, BoundingBox, Detection, DetectionModel, Device, ModelLoader,
};
use crate::core::error::{LabelError, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use log::{debug, info, warn};
use ndarray::{Array2, ArrayView2};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

const OUTPUT_NAME: &str = "output0";

pub struct OnnxModelLoader {
    input_size: u32,
    iou_threshold: f32,
}

impl OnnxModelLoader {
    pub fn new() -> Self {
        Self {
            input_size: 640,
            iou_threshold: 0.7,
        }
    }

    pub fn with_input_size(mut self, input_size: u32) -> Self {
        self.input_size = input_size;
        self
    }

    pub fn with_iou_threshold(mut self, iou_threshold: f32) -> Self {
        self.iou_threshold = iou_threshold;
        self
    }
}

impl Default for OnnxModelLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelLoader for OnnxModelLoader {
    fn load(
        &self,
        weights: &Path,
        architecture: ArchitectureKind,
        device: Device,
    ) -> Result<Box<dyn DetectionModel>> {
        info!(
            "🧠 Loading {} weights from {} on {}",
            architecture,
            weights.display(),
            device
        );
        if !weights.is_file() {
            return Err(LabelError::ModelLoad(format!(
                "weights not found: {}",
                weights.display()
            )));
        }
        let bytes = std::fs::read(weights)
            .map_err(|e| LabelError::ModelLoad(format!("failed to read weights: {}", e)))?;
        let session = create_session(&bytes, device)?;

        let mut model = OnnxModel {
            session,
            architecture,
            input_size: self.input_size,
            iou_threshold: self.iou_threshold,
            num_classes: 0,
        };

        // 预热一次，顺便校验输出布局与声明的架构一致
        let blank = RgbImage::new(self.input_size, self.input_size);
        let (shape, _) = model
            .run(&blank)
            .map_err(|e| LabelError::ModelLoad(format!("warm-up failed: {}", e)))?;
        model.num_classes = layout_classes(architecture, &shape)?;

        info!(
            "✅ Model ready: {} classes, output {:?}",
            model.num_classes, shape
        );
        Ok(Box::new(model))
    }
}

struct OnnxModel {
    session: Session,
    architecture: ArchitectureKind,
    input_size: u32,
    iou_threshold: f32,
    num_classes: usize,
}

const PAD_VALUE: u8 = 114;

/// 等比缩放并居中补边到正方形输入
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    gain: f32,
    width: u32,
    height: u32,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, size: u32) -> Self {
        let gain = (size as f32 / width.max(1) as f32).min(size as f32 / height.max(1) as f32);
        let scaled_width = ((width as f32 * gain).round() as u32).clamp(1, size);
        let scaled_height = ((height as f32 * gain).round() as u32).clamp(1, size);
        Self {
            gain,
            width: scaled_width,
            height: scaled_height,
            pad_x: (size - scaled_width) / 2,
            pad_y: (size - scaled_height) / 2,
        }
    }

    fn apply(&self, image: &RgbImage, size: u32) -> RgbImage {
        let resized = imageops::resize(image, self.width, self.height, FilterType::Triangle);
        let mut canvas = RgbImage::from_pixel(size, size, image::Rgb([PAD_VALUE; 3]));
        imageops::replace(&mut canvas, &resized, self.pad_x as i64, self.pad_y as i64);
        canvas
    }

    /// 模型输入坐标还原到原图像素
    fn restore(&self, cx: f32, cy: f32, w: f32, h: f32) -> (f32, f32, f32, f32) {
        (
            (cx - self.pad_x as f32) / self.gain,
            (cy - self.pad_y as f32) / self.gain,
            w / self.gain,
            h / self.gain,
        )
    }
}

impl OnnxModel {
    fn preprocess(&self, image: &RgbImage) -> Result<Tensor<f32>> {
        let size = self.input_size;
        let boxed = Letterbox::fit(image.width(), image.height(), size).apply(image, size);
        let plane = (size * size) as usize;

        // HWC -> CHW, [0, 1]
        let mut chw = vec![0f32; 3 * plane];
        for (i, pixel) in boxed.pixels().enumerate() {
            for c in 0..3 {
                chw[c * plane + i] = pixel[c] as f32 / 255.0;
            }
        }

        let shape = vec![1usize, 3, size as usize, size as usize];
        Tensor::from_array((shape, chw.into_boxed_slice()))
            .map_err(|e| LabelError::Inference(format!("failed to build input tensor: {}", e)))
    }

    fn run(&mut self, image: &RgbImage) -> Result<(Vec<i64>, Vec<f32>)> {
        let input = self.preprocess(image)?;
        let outputs = self
            .session
            .run(ort::inputs![input])
            .map_err(|e| LabelError::Inference(e.to_string()))?;
        let output = outputs
            .get(OUTPUT_NAME)
            .ok_or_else(|| LabelError::Inference(format!("missing {} tensor", OUTPUT_NAME)))?;
        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| LabelError::Inference(format!("failed to extract output: {}", e)))?;
        Ok((shape.iter().copied().collect(), data.to_vec()))
    }
}

impl DetectionModel for OnnxModel {
    fn architecture(&self) -> ArchitectureKind {
        self.architecture
    }

    fn infer(
        &mut self,
        image: &RgbImage,
        confidence_threshold: f32,
        allowed_class_ids: &[u32],
    ) -> Result<Vec<Detection>> {
        let (shape, data) = self.run(image)?;
        let rows = candidate_rows(self.architecture, &shape, data)?;

        let letterbox = Letterbox::fit(image.width(), image.height(), self.input_size);
        let mut detections = decode_rows(
            rows.view(),
            self.architecture,
            self.num_classes,
            &letterbox,
            confidence_threshold,
            allowed_class_ids,
        );
        let before = detections.len();
        non_max_suppression(&mut detections, self.iou_threshold);
        debug!("ONNX: {} candidates -> {} after NMS", before, detections.len());
        Ok(detections)
    }
}

fn create_session(bytes: &[u8], device: Device) -> Result<Session> {
    let builder = Session::builder()
        .map_err(|e| LabelError::ModelLoad(format!("failed to create session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| LabelError::ModelLoad(format!("failed to set optimization level: {}", e)))?;

    if let Device::Cuda(ordinal) = device {
        use ort::execution_providers::CUDAExecutionProvider;
        let provider = CUDAExecutionProvider::default()
            .with_device_id(ordinal as i32)
            .build();
        match builder.clone().with_execution_providers([provider]) {
            Ok(cuda_builder) => match cuda_builder.commit_from_memory(bytes) {
                Ok(session) => {
                    info!("🚀 Using CUDA execution provider (device {})", ordinal);
                    return Ok(session);
                }
                Err(e) => warn!("⚠️ CUDA session failed, falling back to CPU: {}", e),
            },
            Err(e) => warn!("⚠️ CUDA provider unavailable, falling back to CPU: {}", e),
        }
    }

    builder
        .commit_from_memory(bytes)
        .map_err(|e| LabelError::ModelLoad(format!("failed to load ONNX model: {}", e)))
}

/// Class count implied by the output shape, or `ModelLoad` if the layout does
/// not belong to the declared architecture.
fn layout_classes(architecture: ArchitectureKind, shape: &[i64]) -> Result<usize> {
    let mismatch = || {
        LabelError::ModelLoad(format!(
            "output shape {:?} does not match a {} head",
            shape, architecture
        ))
    };
    if shape.len() != 3 || shape[0] != 1 || shape[1] <= 0 || shape[2] <= 0 {
        return Err(mismatch());
    }
    let (a, b) = (shape[1] as usize, shape[2] as usize);

    // feature axis is always the short one
    match architecture {
        ArchitectureKind::Yolov8 | ArchitectureKind::Yolov11 if a > 4 && a < b => Ok(a - 4),
        ArchitectureKind::Yolov5 if b > 5 && b < a => Ok(b - 5),
        _ => Err(mismatch()),
    }
}

/// 原始输出整理为每行一个候选框
fn candidate_rows(
    architecture: ArchitectureKind,
    shape: &[i64],
    data: Vec<f32>,
) -> Result<Array2<f32>> {
    if shape.len() != 3 {
        return Err(LabelError::Inference(format!("unexpected output rank: {:?}", shape)));
    }
    let (a, b) = (shape[1] as usize, shape[2] as usize);
    let array = Array2::from_shape_vec((a, b), data)
        .map_err(|e| LabelError::Inference(format!("failed to reshape output: {}", e)))?;
    Ok(match architecture {
        ArchitectureKind::Yolov5 => array,
        ArchitectureKind::Yolov8 | ArchitectureKind::Yolov11 => array.t().to_owned(),
    })
}

fn decode_rows(
    rows: ArrayView2<f32>,
    architecture: ArchitectureKind,
    num_classes: usize,
    letterbox: &Letterbox,
    confidence_threshold: f32,
    allowed_class_ids: &[u32],
) -> Vec<Detection> {
    let class_offset = if architecture.has_objectness() { 5 } else { 4 };
    let mut detections = Vec::new();

    for row in rows.outer_iter() {
        if row.len() < class_offset + num_classes {
            continue;
        }
        let objectness = if architecture.has_objectness() { row[4] } else { 1.0 };

        let mut best_class = 0usize;
        let mut best_score = f32::MIN;
        for c in 0..num_classes {
            let score = row[class_offset + c];
            if score > best_score {
                best_score = score;
                best_class = c;
            }
        }
        let confidence = best_score * objectness;
        if confidence < confidence_threshold || !allowed_class_ids.contains(&(best_class as u32)) {
            continue;
        }

        let (cx, cy, w, h) = letterbox.restore(row[0], row[1], row[2], row[3]);
        detections.push(Detection::new(
            best_class as u32,
            confidence,
            BoundingBox::from_cxcywh(cx, cy, w, h),
        ));
    }
    detections
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_classes() {
        assert_eq!(layout_classes(ArchitectureKind::Yolov8, &[1, 84, 8400]).unwrap(), 80);
        assert_eq!(layout_classes(ArchitectureKind::Yolov11, &[1, 6, 8400]).unwrap(), 2);
        assert_eq!(layout_classes(ArchitectureKind::Yolov5, &[1, 25200, 85]).unwrap(), 80);

        // a v5 head loaded as v8 and vice versa
        assert!(layout_classes(ArchitectureKind::Yolov8, &[1, 25200, 85]).is_err());
        assert!(layout_classes(ArchitectureKind::Yolov5, &[1, 84, 8400]).is_err());
        assert!(layout_classes(ArchitectureKind::Yolov8, &[84, 8400]).is_err());
    }

    fn unpadded(gain: f32) -> Letterbox {
        Letterbox {
            gain,
            width: 0,
            height: 0,
            pad_x: 0,
            pad_y: 0,
        }
    }

    #[test]
    fn test_letterbox_wide_frame() {
        let lb = Letterbox::fit(1280, 720, 640);
        assert_eq!(lb.gain, 0.5);
        assert_eq!((lb.width, lb.height), (640, 360));
        assert_eq!((lb.pad_x, lb.pad_y), (0, 140));

        // a 128px box centred in the frame
        let (cx, cy, w, h) = lb.restore(320.0, 320.0, 64.0, 64.0);
        assert_eq!((cx, cy, w, h), (640.0, 360.0, 128.0, 128.0));

        let frame = RgbImage::from_pixel(1280, 720, image::Rgb([10, 200, 30]));
        let input = lb.apply(&frame, 640);
        assert_eq!(input.dimensions(), (640, 640));
        assert_eq!(input.get_pixel(5, 5), &image::Rgb([PAD_VALUE; 3]));
        assert_eq!(input.get_pixel(5, 639), &image::Rgb([PAD_VALUE; 3]));
        let inside = input.get_pixel(320, 320);
        for (got, want) in inside.0.iter().zip([10u8, 200, 30]) {
            assert!(got.abs_diff(want) <= 1, "{:?}", inside);
        }
    }

    #[test]
    fn test_letterbox_tall_frame() {
        let lb = Letterbox::fit(100, 400, 640);
        assert_eq!(lb.gain, 1.6);
        assert_eq!((lb.width, lb.height), (160, 640));
        assert_eq!((lb.pad_x, lb.pad_y), (240, 0));

        let (cx, cy, _, _) = lb.restore(240.0, 0.0, 0.0, 0.0);
        assert_eq!((cx, cy), (0.0, 0.0));
    }

    #[test]
    fn test_decode_v8_rows() {
        // 2 classes, 3 candidates, laid out [features, candidates]
        let data = vec![
            320.0, 100.0, 50.0, // cx
            320.0, 100.0, 50.0, // cy
            64.0, 10.0, 10.0, // w
            64.0, 10.0, 10.0, // h
            0.9, 0.05, 0.2, // class 0
            0.1, 0.02, 0.6, // class 1
        ];
        let rows = candidate_rows(ArchitectureKind::Yolov8, &[1, 6, 3], data).unwrap();
        let out = decode_rows(rows.view(), ArchitectureKind::Yolov8, 2, &unpadded(2.0), 0.25, &[0, 1]);

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].class_id, 0);
        assert_eq!(out[0].bbox, BoundingBox::new(144.0, 144.0, 176.0, 176.0));
        assert_eq!(out[1].class_id, 1);

        let only_zero = decode_rows(rows.view(), ArchitectureKind::Yolov8, 2, &unpadded(1.0), 0.25, &[0]);
        assert_eq!(only_zero.len(), 1);
    }

    #[test]
    fn test_decode_v5_uses_objectness() {
        let data = vec![
            10.0, 10.0, 4.0, 4.0, 0.5, 0.8, // conf 0.4
            20.0, 20.0, 4.0, 4.0, 0.1, 0.9, // conf 0.09
        ];
        let rows = candidate_rows(ArchitectureKind::Yolov5, &[1, 2, 6], data).unwrap();
        let out = decode_rows(rows.view(), ArchitectureKind::Yolov5, 1, &unpadded(1.0), 0.3, &[0]);
        assert_eq!(out.len(), 1);
        assert!((out[0].confidence - 0.4).abs() < 1e-6);
    }
}
