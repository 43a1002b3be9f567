use crate::core::annotation::normalize;
use crate::core::catalog::ClassCatalog;
use crate::core::detection::Detector;
use crate::core::error::Result;
use crate::core::export::{ExportSummary, Exporter};
use crate::core::video::{FrameSampler, FrameSource, FrameTransformer, TransformSpec};
use crate::frame_extractor::state_machine::{PipelineEvent, PipelineState, StateMachine};
use log::{debug, error, info};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub frame_rate: f64,
    pub confidence: f32,
    pub transforms: TransformSpec,
    /// Sanitized video name used in every output basename
    pub video_stem: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            frame_rate: 1.0,
            confidence: 0.1,
            transforms: TransformSpec::none(),
            video_stem: "video".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub sampling_interval: u64,
    pub frames_decoded: u64,
    pub frames_sampled: u64,
    pub images_written: u64,
    pub detections: u64,
    pub summary: ExportSummary,
    pub state: PipelineState,
    pub elapsed: Duration,
}

/// 单个视频的处理流程：抽帧 → 变换 → 检测 → 归一化 → 写出，最后 finalize
///
/// One extractor drives one video. It owns the state machine and the counters
/// that stay readable after a failure.
pub struct FrameExtractor {
    state_machine: StateMachine,
    transformer: FrameTransformer,
    config: ExtractionConfig,
    images_written: u64,
    detections: u64,
}

impl FrameExtractor {
    pub fn new() -> Self {
        Self::with_config(ExtractionConfig::default())
    }

    pub fn with_config(config: ExtractionConfig) -> Self {
        Self {
            state_machine: StateMachine::new(),
            transformer: FrameTransformer::new(config.transforms.clone()),
            config,
            images_written: 0,
            detections: 0,
        }
    }

    /// 运行到 `Completed` 或 `Failed`，任何路径下都会释放视频源
    pub fn process<S: FrameSource + ?Sized>(
        &mut self,
        source: &mut S,
        detector: &mut dyn Detector,
        exporter: &mut dyn Exporter,
        catalog: &ClassCatalog,
    ) -> Result<ExtractionResult> {
        self.state_machine.fire(PipelineEvent::Opened);

        let result = self.drive(source, detector, exporter, catalog);
        if let Err(e) = &result {
            error!(
                "❌ Pipeline failed in {:?} after {} images: {}",
                self.state_machine.current_state(),
                self.images_written,
                e
            );
            self.state_machine.fire(PipelineEvent::Fault);
        }
        source.release();
        result
    }

    /// 启动前即失败（如视频源无法打开）时标记为失败
    pub fn abort(&mut self) {
        self.state_machine.fire(PipelineEvent::Fault);
    }

    fn drive<S: FrameSource + ?Sized>(
        &mut self,
        source: &mut S,
        detector: &mut dyn Detector,
        exporter: &mut dyn Exporter,
        catalog: &ClassCatalog,
    ) -> Result<ExtractionResult> {
        let started = Instant::now();
        exporter.ensure_layout()?;
        self.state_machine.fire(PipelineEvent::StartSampling);

        let allowed_ids = catalog.ids();
        let mut sampler = FrameSampler::new(source, self.config.frame_rate, &self.config.video_stem);

        while let Some(frame) = sampler.next() {
            let frame = frame?;
            self.state_machine.fire(PipelineEvent::FrameSampled);

            let variants = self.transformer.apply(&frame)?;
            self.state_machine.fire(PipelineEvent::Transformed);

            let last = variants.len().saturating_sub(1);
            for (i, variant) in variants.iter().enumerate() {
                let found = detector.detect(&variant.image, self.config.confidence, &allowed_ids)?;
                self.state_machine.fire(PipelineEvent::Detected);

                let annotations =
                    normalize(&found, variant.image.height(), variant.image.width())?;
                self.state_machine.fire(PipelineEvent::Normalized);

                exporter.write_frame(&variant.image, &frame.basename, variant.name)?;
                exporter.write_annotations(&frame.basename, variant.name, &annotations)?;
                self.images_written += 1;
                self.detections += found.len() as u64;

                self.state_machine.fire(if i == last {
                    PipelineEvent::FrameWritten
                } else {
                    PipelineEvent::NextVariant
                });
            }
            debug!("Frame {} done ({} variants)", frame.index, variants.len());
        }

        let sampling_interval = sampler.interval();
        let frames_sampled = sampler.sampled_count();
        let frames_decoded = sampler.decoded_count();

        self.state_machine.fire(PipelineEvent::SourceExhausted);
        let summary = exporter.finalize(catalog)?;
        self.state_machine.fire(PipelineEvent::Finalized);

        info!(
            "✅ {}: {} of {} frames sampled, {} images, {} detections",
            self.config.video_stem, frames_sampled, frames_decoded, self.images_written, self.detections
        );
        Ok(ExtractionResult {
            sampling_interval,
            frames_decoded,
            frames_sampled,
            images_written: self.images_written,
            detections: self.detections,
            summary,
            state: self.state_machine.current_state(),
            elapsed: started.elapsed(),
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state_machine.current_state()
    }

    pub fn state_history(&self) -> &[PipelineState] {
        self.state_machine.history()
    }

    pub fn frame_count(&self) -> u64 {
        self.state_machine.frame_count()
    }

    /// 已落盘的图片数，失败后依然可读
    pub fn images_written(&self) -> u64 {
        self.images_written
    }
}

impl Default for FrameExtractor {
    fn default() -> Self {
        Self::new()
    }
}
