use log::{debug, error};

/// 流水线状态
///
/// `Idle → SourceOpened → Sampling → {Transforming → Detecting → Normalizing → Writing}
/// → Finalizing → Completed`, with `Failed` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    SourceOpened,
    Sampling,
    Transforming,
    Detecting,
    Normalizing,
    Writing,
    Finalizing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    Opened,
    StartSampling,
    FrameSampled,
    Transformed,
    Detected,
    Normalized,
    /// Another variant of the same frame goes back to detection
    NextVariant,
    /// Last variant of the frame written
    FrameWritten,
    SourceExhausted,
    Finalized,
    Fault,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Failed)
    }

    /// 是否处于单帧处理子循环中
    pub fn is_per_frame(&self) -> bool {
        matches!(
            self,
            PipelineState::Transforming
                | PipelineState::Detecting
                | PipelineState::Normalizing
                | PipelineState::Writing
        )
    }

    /// 下一个状态，事件非法时返回 `None`
    pub fn transition(&self, event: PipelineEvent) -> Option<PipelineState> {
        use PipelineEvent as E;
        use PipelineState as S;

        match (self, event) {
            (s, E::Fault) if !s.is_terminal() => Some(S::Failed),
            (S::Idle, E::Opened) => Some(S::SourceOpened),
            (S::SourceOpened, E::StartSampling) => Some(S::Sampling),
            (S::Sampling, E::FrameSampled) => Some(S::Transforming),
            (S::Sampling, E::SourceExhausted) => Some(S::Finalizing),
            (S::Transforming, E::Transformed) => Some(S::Detecting),
            (S::Detecting, E::Detected) => Some(S::Normalizing),
            (S::Normalizing, E::Normalized) => Some(S::Writing),
            (S::Writing, E::NextVariant) => Some(S::Detecting),
            (S::Writing, E::FrameWritten) => Some(S::Sampling),
            (S::Finalizing, E::Finalized) => Some(S::Completed),
            _ => None,
        }
    }
}

pub struct StateMachine {
    state: PipelineState,
    history: Vec<PipelineState>,
    frame_counter: u64,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: PipelineState::Idle,
            history: vec![PipelineState::Idle],
            frame_counter: 0,
        }
    }

    /// 触发事件，非法事件不改变状态并返回 `false`
    pub fn fire(&mut self, event: PipelineEvent) -> bool {
        match self.state.transition(event) {
            Some(next) => {
                debug!("State: {:?} --{:?}--> {:?}", self.state, event, next);
                if event == PipelineEvent::FrameWritten {
                    self.frame_counter += 1;
                }
                self.state = next;
                self.history.push(next);
                true
            }
            None => {
                error!("❌ Illegal transition {:?} in state {:?}", event, self.state);
                false
            }
        }
    }

    pub fn current_state(&self) -> PipelineState {
        self.state
    }

    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    /// Frames that went through the whole per-frame cycle.
    pub fn frame_count(&self) -> u64 {
        self.frame_counter
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
