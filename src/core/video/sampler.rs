use crate::core::error::Result;
use crate::core::video::frame::SampledFrame;
use crate::core::video::source::FrameSource;
use log::{debug, info};

/// `max(1, floor(native_fps / target_rate))`; an unknown or zero native rate samples every frame.
pub fn sampling_interval(native_fps: Option<f64>, target_rate: f64) -> u64 {
    let fps = match native_fps {
        Some(fps) if fps.is_finite() && fps > 0.0 => fps,
        _ => return 1,
    };
    if !target_rate.is_finite() || target_rate <= 0.0 {
        return 1;
    }
    ((fps / target_rate).floor() as u64).max(1)
}

/// 按目标帧率抽帧：输出第 0 帧以及之后每隔 `interval` 的帧
///
/// 采样器只借用视频源，释放由调用方负责
pub struct FrameSampler<'a, S: FrameSource + ?Sized> {
    source: &'a mut S,
    interval: u64,
    video_stem: String,
    position: u64,
    sampled: u64,
    exhausted: bool,
}

impl<'a, S: FrameSource + ?Sized> FrameSampler<'a, S> {
    pub fn new(source: &'a mut S, target_rate: f64, video_stem: impl Into<String>) -> Self {
        let interval = sampling_interval(source.fps(), target_rate);
        info!(
            "🎞️ Sampling at {} fps from native {:?} fps (interval {})",
            target_rate,
            source.fps(),
            interval
        );
        Self {
            source,
            interval,
            video_stem: video_stem.into(),
            position: 0,
            sampled: 0,
            exhausted: false,
        }
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    pub fn sampled_count(&self) -> u64 {
        self.sampled
    }

    /// 已解码的帧数（含未采样的）
    pub fn decoded_count(&self) -> u64 {
        self.position
    }
}

impl<'a, S: FrameSource + ?Sized> Iterator for FrameSampler<'a, S> {
    type Item = Result<SampledFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }

        loop {
            let image = match self.source.next_frame() {
                Ok(Some(image)) => image,
                Ok(None) => {
                    self.exhausted = true;
                    debug!(
                        "Source exhausted after {} frames, {} sampled",
                        self.position, self.sampled
                    );
                    return None;
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            };

            let index = self.position;
            self.position += 1;

            if index % self.interval == 0 {
                self.sampled += 1;
                return Some(Ok(SampledFrame::new(image, index, &self.video_stem)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::video::source::MemorySource;

    #[test]
    fn test_interval_formula() {
        assert_eq!(sampling_interval(Some(30.0), 1.0), 30);
        assert_eq!(sampling_interval(Some(30.0), 7.0), 4);
        assert_eq!(sampling_interval(Some(29.97), 1.0), 29);
        assert_eq!(sampling_interval(Some(24.0), 60.0), 1);
        assert_eq!(sampling_interval(Some(0.0), 1.0), 1);
        assert_eq!(sampling_interval(None, 1.0), 1);
        assert_eq!(sampling_interval(Some(f64::NAN), 1.0), 1);
    }

    #[test]
    fn test_interval_matches_floor_over_grid() {
        for fps in [1.0_f64, 10.0, 23.976, 25.0, 30.0, 59.94, 60.0, 120.0] {
            for rate in [0.25_f64, 0.5, 1.0, 2.0, 5.0, 15.0, 30.0, 240.0] {
                let expected = (fps / rate).floor().max(1.0) as u64;
                assert_eq!(sampling_interval(Some(fps), rate), expected, "fps={} rate={}", fps, rate);
            }
        }
    }

    #[test]
    fn test_ten_seconds_at_30fps_yields_ten_frames() {
        let mut source = MemorySource::synthetic(16, 16, 300, 30.0);
        let sampler = FrameSampler::new(&mut source, 1.0, "synthetic");
        assert_eq!(sampler.interval(), 30);

        let frames: Vec<_> = sampler.map(|f| f.unwrap()).collect();
        assert_eq!(frames.len(), 10);
        let indices: Vec<u64> = frames.iter().map(|f| f.index).collect();
        assert_eq!(indices, (0..10).map(|i| i * 30).collect::<Vec<_>>());
        assert_eq!(frames[3].basename, "synthetic_image90");
        assert_eq!(frames[3].image.get_pixel(0, 0)[0], 90);
    }

    #[test]
    fn test_unknown_fps_emits_every_frame() {
        let frames = (0..5)
            .map(|_| image::RgbImage::new(4, 4))
            .collect::<Vec<_>>();
        let mut source = MemorySource::new(frames, None);
        let sampler = FrameSampler::new(&mut source, 1.0, "v");
        assert_eq!(sampler.count(), 5);
    }

    #[test]
    fn test_sampler_is_not_restartable() {
        let mut source = MemorySource::synthetic(4, 4, 6, 2.0);
        {
            let mut sampler = FrameSampler::new(&mut source, 1.0, "v");
            assert!(sampler.next().is_some());
            assert_eq!(sampler.decoded_count(), 1);
        }
        let rest: Vec<_> = FrameSampler::new(&mut source, 1.0, "v")
            .map(|f| f.unwrap().index)
            .collect();
        // ordinals restart for the new sampler, but the consumed frame is gone
        assert_eq!(rest, vec![0, 2, 4]);
        assert_eq!(source.frames_read(), 6);
    }
}
