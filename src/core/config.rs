//! 配置 - 进程级默认值 (Settings) 与每次调用的不可变参数 (PipelineConfig)

use crate::core::detection::{ArchitectureKind, Device, TilingConfig};
use crate::core::error::{LabelError, Result};
use crate::core::export::ExportFormat;
use crate::core::storage::StorageMode;
use crate::core::video::TransformSpec;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_MODELS_DIRECTORY: &str = "LABEL_MODELS_DIRECTORY";
pub const ENV_OUTPUT_DIRECTORY: &str = "LABEL_OUTPUT_DIRECTORY";
pub const ENV_DEFAULT_FRAME_RATE: &str = "LABEL_DEFAULT_FRAME_RATE";
pub const ENV_CLASS_CONFIG: &str = "LABEL_CLASS_CONFIG";
pub const ENV_DEVICE: &str = "LABEL_DEVICE";

/// 进程级默认配置，启动时读取一次
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub title: String,
    pub models_directory: PathBuf,
    pub default_model: String,
    pub output_directory: PathBuf,
    pub default_frame_rate: f64,
    pub default_confidence: f32,
    pub class_config_path: PathBuf,
    pub device: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            title: "Video Label".to_string(),
            models_directory: PathBuf::from("models"),
            default_model: "yolov8n.onnx".to_string(),
            output_directory: PathBuf::from("outputs"),
            default_frame_rate: 1.0,
            default_confidence: 0.1,
            class_config_path: PathBuf::from("config/classes.yaml"),
            device: "cpu".to_string(),
        }
    }
}

impl Settings {
    /// 读取 JSON5 配置文件（不存在则用默认值），再应用 `LABEL_*` 环境变量覆盖
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// 同 `load`，覆盖值由 `lookup` 提供
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = match path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(p).map_err(|e| {
                    LabelError::config(format!("cannot read settings {}: {}", p.display(), e))
                })?;
                info!("⚙️ Loading settings from {}", p.display());
                json5::from_str(&raw)?
            }
            Some(p) => {
                debug!("Settings file {} not found, using defaults", p.display());
                Self::default()
            }
            None => Self::default(),
        };
        settings.apply_overrides(lookup)?;
        Ok(settings)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_MODELS_DIRECTORY) {
            self.models_directory = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_OUTPUT_DIRECTORY) {
            self.output_directory = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_DEFAULT_FRAME_RATE) {
            self.default_frame_rate = v.trim().parse().map_err(|_| {
                LabelError::config(format!("{} is not a number: '{}'", ENV_DEFAULT_FRAME_RATE, v))
            })?;
        }
        if let Some(v) = lookup(ENV_CLASS_CONFIG) {
            self.class_config_path = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_DEVICE) {
            self.device = v;
        }
        Ok(())
    }

    pub fn device(&self) -> Result<Device> {
        self.device.parse()
    }

    pub fn default_weights(&self) -> PathBuf {
        self.models_directory.join(&self.default_model)
    }

    /// 以默认值生成单次调用的配置
    pub fn pipeline(&self, video: impl Into<PathBuf>) -> Result<PipelineConfig> {
        let weights = self.default_weights();
        Ok(PipelineConfig {
            video: video.into(),
            output_dir: self.output_directory.clone(),
            class_config: self.class_config_path.clone(),
            frame_rate: self.default_frame_rate,
            confidence: self.default_confidence,
            architecture: ArchitectureKind::from_path(&weights),
            weights,
            device: self.device()?,
            ..PipelineConfig::default()
        })
    }
}

/// 单次运行的全部参数，构造后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 本地视频路径，远程模式下忽略
    pub video: PathBuf,
    pub output_dir: PathBuf,
    pub class_config: PathBuf,
    pub frame_rate: f64,
    pub confidence: f32,
    pub transforms: TransformSpec,
    pub export_format: ExportFormat,
    /// 是否将 CVAT 布局打包为 `cvat_data.zip`
    pub archive: bool,
    /// `Some` 时使用切片推理
    pub tiling: Option<TilingConfig>,
    pub storage: StorageMode,
    pub weights: PathBuf,
    pub architecture: ArchitectureKind,
    pub device: Device,
    /// Fetch target in remote mode, defaults to a directory under the system temp dir
    pub work_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            video: PathBuf::new(),
            output_dir: PathBuf::from("outputs"),
            class_config: PathBuf::from("config/classes.yaml"),
            frame_rate: 1.0,
            confidence: 0.1,
            transforms: TransformSpec::none(),
            export_format: ExportFormat::Flat,
            archive: false,
            tiling: None,
            storage: StorageMode::Local,
            weights: PathBuf::from("models/yolov8n.onnx"),
            architecture: ArchitectureKind::Yolov8,
            device: Device::Cpu,
            work_dir: None,
        }
    }
}

impl PipelineConfig {
    /// 在任何副作用之前校验
    pub fn validate(&self) -> Result<()> {
        if !self.frame_rate.is_finite() || self.frame_rate <= 0.0 {
            return Err(LabelError::config(format!(
                "frame rate must be positive, got {}",
                self.frame_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(LabelError::config(format!(
                "confidence must be in [0, 1], got {}",
                self.confidence
            )));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(LabelError::config("output directory is empty"));
        }
        if let StorageMode::Local = self.storage {
            if self.video.as_os_str().is_empty() {
                return Err(LabelError::config("video path is empty"));
            }
        }
        self.transforms.validate()?;
        if let Some(tiling) = &self.tiling {
            tiling.validate()?;
        }
        Ok(())
    }

    pub fn work_dir(&self) -> PathBuf {
        self.work_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("video_label"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn valid() -> PipelineConfig {
        PipelineConfig {
            video: PathBuf::from("clip.mp4"),
            ..Default::default()
        }
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_settings_missing_file_means_defaults() {
        let settings =
            Settings::load_with(Some(Path::new("/nonexistent/settings.json5")), no_env).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.default_frame_rate, 1.0);
        assert_eq!(settings.default_confidence, 0.1);

        assert_eq!(Settings::load_with(None, no_env).unwrap(), Settings::default());
    }

    #[test]
    fn test_settings_from_json5() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json5");
        std::fs::write(
            &path,
            "{\n  // trailing commas and comments are fine\n  default_frame_rate: 2.5,\n  device: 'cuda:1',\n  output_directory: 'runs/export',\n}\n",
        )
        .unwrap();

        let settings = Settings::load_with(Some(path.as_path()), no_env).unwrap();
        assert_eq!(settings.default_frame_rate, 2.5);
        assert_eq!(settings.device().unwrap(), Device::Cuda(1));
        assert_eq!(settings.output_directory, PathBuf::from("runs/export"));
        // absent keys keep their defaults
        assert_eq!(settings.models_directory, PathBuf::from("models"));
    }

    #[test]
    fn test_settings_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json5");
        std::fs::write(&path, "{ default_frame_rate: , ").unwrap();

        let err = Settings::load_with(Some(path.as_path()), no_env).unwrap_err();
        assert_eq!(err.kind(), crate::core::error::ErrorKind::ConfigInvalid);

        std::fs::write(&path, "{ default_frame_rate: 'fast' }").unwrap();
        let err = Settings::load_with(Some(path.as_path()), no_env).unwrap_err();
        assert_eq!(err.kind(), crate::core::error::ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_env_overrides_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json5");
        std::fs::write(&path, "{ device: 'cpu', default_frame_rate: 2 }").unwrap();

        let settings = Settings::load_with(Some(path.as_path()), |k| {
            (k == ENV_DEVICE).then(|| "cuda:2".to_string())
        })
        .unwrap();
        assert_eq!(settings.device().unwrap(), Device::Cuda(2));
        assert_eq!(settings.default_frame_rate, 2.0);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_OUTPUT_DIRECTORY, "/data/out"),
            (ENV_DEFAULT_FRAME_RATE, "5"),
            (ENV_DEVICE, "cuda"),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings::default();
        settings
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(settings.output_directory, PathBuf::from("/data/out"));
        assert_eq!(settings.default_frame_rate, 5.0);
        assert_eq!(settings.device().unwrap(), Device::Cuda(0));

        let err = Settings::default()
            .apply_overrides(|k| (k == ENV_DEFAULT_FRAME_RATE).then(|| "fast".to_string()))
            .unwrap_err();
        assert_eq!(err.kind(), crate::core::error::ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_pipeline_from_settings() {
        let settings = Settings {
            default_model: "yolov5s.onnx".into(),
            ..Default::default()
        };
        let config = settings.pipeline("clip.mp4").unwrap();
        assert_eq!(config.weights, PathBuf::from("models/yolov5s.onnx"));
        assert_eq!(config.architecture, ArchitectureKind::Yolov5);
        assert_eq!(config.frame_rate, 1.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(valid().validate().is_ok());

        let cases = [
            PipelineConfig { frame_rate: 0.0, ..valid() },
            PipelineConfig { frame_rate: f64::NAN, ..valid() },
            PipelineConfig { confidence: 1.5, ..valid() },
            PipelineConfig { video: PathBuf::new(), ..valid() },
            PipelineConfig {
                transforms: TransformSpec {
                    resize: Some((0, 640)),
                    ..Default::default()
                },
                ..valid()
            },
            PipelineConfig {
                tiling: Some(TilingConfig {
                    overlap_width_ratio: 1.0,
                    ..Default::default()
                }),
                ..valid()
            },
        ];
        for config in cases {
            let err = config.validate().unwrap_err();
            assert_eq!(err.kind(), crate::core::error::ErrorKind::ConfigInvalid);
        }
    }

    #[test]
    fn test_remote_mode_needs_no_video_path() {
        let config = PipelineConfig {
            storage: StorageMode::Remote {
                source_key: "videos/a.mp4".into(),
                destination_prefix: "exports".into(),
            },
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
