use crate::core::detection::{ArchitectureKind, Detection, DetectionModel, Device, ModelLoader};
use crate::core::error::{LabelError, Result};
use image::RgbImage;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type DetectionPattern = Box<dyn Fn(&RgbImage) -> Vec<Detection> + Send + Sync>;

/// 模拟模型 - 按图像内容返回预设检测结果
///
/// Ignores the threshold and class set on purpose, so callers see raw output
/// and must filter it themselves.
pub struct MockModel {
    architecture: ArchitectureKind,
    pattern: Option<DetectionPattern>,
    calls: Arc<AtomicUsize>,
}

impl MockModel {
    pub fn new() -> Self {
        Self {
            architecture: ArchitectureKind::Yolov8,
            pattern: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_pattern<F>(pattern: F) -> Self
    where
        F: Fn(&RgbImage) -> Vec<Detection> + Send + Sync + 'static,
    {
        Self {
            pattern: Some(Box::new(pattern)),
            ..Self::new()
        }
    }

    /// 每张图返回相同的检测结果
    pub fn fixed(detections: Vec<Detection>) -> Self {
        Self::with_pattern(move |_| detections.clone())
    }

    pub fn with_architecture(mut self, architecture: ArchitectureKind) -> Self {
        self.architecture = architecture;
        self
    }

    /// Shared counter of `infer` calls, readable after the model is boxed away.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl Default for MockModel {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionModel for MockModel {
    fn architecture(&self) -> ArchitectureKind {
        self.architecture
    }

    fn infer(
        &mut self,
        image: &RgbImage,
        _confidence_threshold: f32,
        _allowed_class_ids: &[u32],
    ) -> Result<Vec<Detection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.pattern.as_ref().map(|p| p(image)).unwrap_or_default())
    }
}

/// Loader handing out [`MockModel`]s; counts loads so tests can check the
/// model is built once per run.
pub struct MockModelLoader {
    build: Box<dyn Fn() -> MockModel + Send + Sync>,
    loads: Arc<AtomicUsize>,
    fail_with: Option<String>,
}

impl MockModelLoader {
    pub fn new<F>(build: F) -> Self
    where
        F: Fn() -> MockModel + Send + Sync + 'static,
    {
        Self {
            build: Box::new(build),
            loads: Arc::new(AtomicUsize::new(0)),
            fail_with: None,
        }
    }

    /// 每次加载都以 `ModelLoad(message)` 失败
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_with: Some(message.into()),
            ..Self::new(MockModel::new)
        }
    }

    pub fn load_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.loads)
    }
}

impl ModelLoader for MockModelLoader {
    fn load(
        &self,
        weights: &Path,
        architecture: ArchitectureKind,
        _device: Device,
    ) -> Result<Box<dyn DetectionModel>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_with {
            return Err(LabelError::ModelLoad(message.clone()));
        }

        let model = (self.build)();
        if model.architecture() != architecture {
            return Err(LabelError::ModelLoad(format!(
                "{} is a {} model, requested {}",
                weights.display(),
                model.architecture(),
                architecture
            )));
        }
        Ok(Box::new(model))
    }
}
