pub mod frame;
pub mod probe;
pub mod sampler;
pub mod source;
pub mod transform;

pub use frame::{frame_basename, video_stem, FrameInfo, SampledFrame};
pub use probe::{probe_video, probe_video_with, VideoInfo};
pub use sampler::{sampling_interval, FrameSampler};
pub use source::{FfmpegSource, FfmpegTools, FrameSource, MemorySource};
pub use transform::{variant_stem, FrameTransformer, FrameVariant, TransformSpec};
