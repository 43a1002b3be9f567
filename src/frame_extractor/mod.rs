//! 视频标注流水线 - 从视频中抽帧、检测目标并导出为训练数据集
//!
//! 核心流程：
//! 1. 按目标帧率抽帧
//! 2. 每帧生成变换变体 (resize / grayscale / rotate)
//! 3. 检测后端 (整帧或切片) 输出像素框
//! 4. 归一化为 YOLO 标注并写入导出目录，最后统一 finalize

pub mod pipeline;
pub mod state_machine;

pub use pipeline::{ExtractionConfig, ExtractionResult, FrameExtractor};
pub use state_machine::{PipelineEvent, PipelineState, StateMachine};
