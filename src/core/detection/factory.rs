use crate::core::detection::{
    ArchitectureKind, DetectionModel, Detector, Device, DirectDetector, ModelLoader,
    TiledDetector, TilingConfig,
};
use crate::core::error::{LabelError, Result};
use log::info;
use std::path::Path;

/// 检测器工厂 - 每次运行解析一次 Direct/Tiled 并立即加载模型
pub struct DetectorFactory<'a> {
    loader: &'a dyn ModelLoader,
}

impl<'a> DetectorFactory<'a> {
    pub fn new(loader: &'a dyn ModelLoader) -> Self {
        Self { loader }
    }

    /// 立即加载权重，架构不符在此处以 `ModelLoad` 报错，而不是等到第一次 `detect`
    pub fn build(
        &self,
        weights: &Path,
        architecture: ArchitectureKind,
        device: Device,
        tiling: Option<&TilingConfig>,
    ) -> Result<Box<dyn Detector>> {
        let model: Box<dyn DetectionModel> = self.loader.load(weights, architecture, device)?;
        if model.architecture() != architecture {
            return Err(LabelError::ModelLoad(format!(
                "loader returned a {} model for requested {}",
                model.architecture(),
                architecture
            )));
        }

        let detector: Box<dyn Detector> = match tiling {
            Some(config) => {
                config.validate()?;
                Box::new(TiledDetector::new(model, config.clone()))
            }
            None => Box::new(DirectDetector::new(model)),
        };
        info!(
            "🔍 Detector ready: {} ({} on {})",
            detector.name(),
            architecture,
            device
        );
        Ok(detector)
    }
}

/// 当前构建可用的加载器：启用 `onnx` 特性时为 ONNX Runtime，否则拒绝所有加载
pub fn default_loader() -> Box<dyn ModelLoader> {
    #[cfg(feature = "onnx")]
    {
        Box::new(crate::core::detection::OnnxModelLoader::new())
    }
    #[cfg(not(feature = "onnx"))]
    {
        Box::new(UnavailableLoader)
    }
}

#[cfg(not(feature = "onnx"))]
struct UnavailableLoader;

#[cfg(not(feature = "onnx"))]
impl ModelLoader for UnavailableLoader {
    fn load(
        &self,
        weights: &Path,
        _architecture: ArchitectureKind,
        _device: Device,
    ) -> Result<Box<dyn DetectionModel>> {
        Err(LabelError::ModelLoad(format!(
            "cannot load {}: built without the `onnx` feature",
            weights.display()
        )))
    }
}
