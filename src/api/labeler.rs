//! 视频标注入口

use crate::core::catalog::ClassCatalog;
use crate::core::config::PipelineConfig;
use crate::core::detection::{default_loader, DetectorFactory, ModelLoader};
use crate::core::error::{ErrorKind, LabelError, Result};
use crate::core::export::{make_exporter, ExportFormat, ExportSummary};
use crate::core::storage::{Storage, StorageMode};
use crate::core::video::{video_stem, FfmpegSource, FrameSource};
use crate::frame_extractor::{ExtractionConfig, FrameExtractor};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

type SourceOpener = Box<dyn Fn(&Path) -> Result<Box<dyn FrameSource>>>;

/// 单个视频成功处理后的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportResult {
    pub video: PathBuf,
    pub output_dir: PathBuf,
    pub format: ExportFormat,
    pub frames_sampled: u64,
    pub images_written: u64,
    pub detections: u64,
    pub summary: ExportSummary,
    /// 远程模式下导出结果的存储前缀
    pub stored_under: Option<String>,
    pub elapsed_ms: u64,
}

/// 对外暴露的失败信息，部分输出可能已写盘
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message} ({frames_written} images written)")]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
    pub frames_written: u64,
}

impl Failure {
    fn from_error(err: &LabelError, frames_written: u64) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            frames_written,
        }
    }
}

/// 视频标注器 - 一次处理一个视频，批量时顺序执行
///
/// ```no_run
/// use video_label_lib::api::VideoLabeler;
/// use video_label_lib::core::config::Settings;
///
/// let settings = Settings::load(None).unwrap();
/// let labeler = VideoLabeler::create();
/// let result = labeler.process(settings.pipeline("clip.mp4").unwrap());
/// ```
pub struct VideoLabeler {
    loader: Box<dyn ModelLoader>,
    storage: Option<Box<dyn Storage>>,
    open_source: SourceOpener,
}

impl VideoLabeler {
    pub fn create() -> Self {
        crate::init_logging();
        info!("🎬 VideoLabeler: created");
        Self {
            loader: default_loader(),
            storage: None,
            open_source: Box::new(|path| {
                FfmpegSource::open(path).map(|s| Box::new(s) as Box<dyn FrameSource>)
            }),
        }
    }

    pub fn with_loader(mut self, loader: Box<dyn ModelLoader>) -> Self {
        self.loader = loader;
        self
    }

    /// 设置远程存储，`StorageMode::Remote` 时使用
    pub fn with_storage(mut self, storage: Box<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_source_opener<F>(mut self, opener: F) -> Self
    where
        F: Fn(&Path) -> Result<Box<dyn FrameSource>> + 'static,
    {
        self.open_source = Box::new(opener);
        self
    }

    /// 处理单个视频，重复输出到同一目录会覆盖上次结果
    pub fn process(&self, config: PipelineConfig) -> std::result::Result<ExportResult, Failure> {
        let mut frames_written = 0;
        self.run(&config, &mut frames_written).map_err(|e| {
            error!("❌ {} failed: {}", config.video.display(), e);
            Failure::from_error(&e, frames_written)
        })
    }

    /// 顺序批量处理，单个失败不影响后续视频
    pub fn process_batch(
        &self,
        configs: Vec<PipelineConfig>,
    ) -> Vec<std::result::Result<ExportResult, Failure>> {
        let total = configs.len();
        let results: Vec<_> = configs
            .into_iter()
            .enumerate()
            .map(|(i, config)| {
                info!("📼 Batch {}/{}: {}", i + 1, total, config.video.display());
                self.process(config)
            })
            .collect();

        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            warn!("⚠️ Batch finished: {} of {} videos failed", failed, total);
        } else {
            info!("✅ Batch finished: {} videos", total);
        }
        results
    }

    fn run(&self, config: &PipelineConfig, frames_written: &mut u64) -> Result<ExportResult> {
        config.validate()?;
        // 类别目录必须在任何帧处理之前加载成功
        let catalog = ClassCatalog::load(&config.class_config)?;

        // 声明在视频源之前，保证源先释放再删除临时文件
        let (video, _fetched) = match &config.storage {
            StorageMode::Local => (config.video.clone(), None),
            StorageMode::Remote { source_key, .. } => {
                let path = self.remote()?.fetch(source_key, &config.work_dir())?;
                (path.clone(), Some(FetchedVideo { path }))
            }
        };

        let mut detector = DetectorFactory::new(self.loader.as_ref()).build(
            &config.weights,
            config.architecture,
            config.device,
            config.tiling.as_ref(),
        )?;
        let mut exporter = make_exporter(config.export_format, &config.output_dir, config.archive);

        let mut extractor = FrameExtractor::with_config(ExtractionConfig {
            frame_rate: config.frame_rate,
            confidence: config.confidence,
            transforms: config.transforms.clone(),
            video_stem: video_stem(&video),
        });

        let mut source = match (self.open_source)(&video) {
            Ok(source) => source,
            Err(e) => {
                extractor.abort();
                return Err(e);
            }
        };

        let outcome = extractor.process(
            &mut source,
            detector.as_mut(),
            exporter.as_mut(),
            &catalog,
        );
        *frames_written = extractor.images_written();
        let extraction = outcome?;

        let stored_under = match &config.storage {
            StorageMode::Local => None,
            StorageMode::Remote {
                destination_prefix, ..
            } => {
                let storage = self.remote()?;
                match &extraction.summary.archive {
                    Some(archive) => {
                        let name = archive
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default();
                        storage.store(archive, &format!("{}/{}", destination_prefix, name))?;
                    }
                    None => storage.store(&config.output_dir, destination_prefix)?,
                }
                Some(destination_prefix.clone())
            }
        };

        Ok(ExportResult {
            video,
            output_dir: config.output_dir.clone(),
            format: config.export_format,
            frames_sampled: extraction.frames_sampled,
            images_written: extraction.images_written,
            detections: extraction.detections,
            summary: extraction.summary,
            stored_under,
            elapsed_ms: extraction.elapsed.as_millis() as u64,
        })
    }

    fn remote(&self) -> Result<&dyn Storage> {
        self.storage.as_deref().ok_or_else(|| {
            LabelError::config("remote storage mode requested but no storage configured")
        })
    }
}

/// 远程模式下拉取到工作目录的视频，离开作用域即删除
struct FetchedVideo {
    path: PathBuf,
}

impl Drop for FetchedVideo {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("🗑️ Removed fetched source {}", self.path.display()),
            Err(e) => warn!(
                "⚠️ Could not remove fetched source {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

impl Drop for VideoLabeler {
    fn drop(&mut self) {
        info!("🗑️ VideoLabeler: released");
    }
}
