//! Frame state machine types

/// Where the submission pipeline is in its per-frame cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    /// Ready to record the next frame
    Idle,
    /// Commands are being recorded
    Recording,
    /// The batch was handed to the queue; waiting on the fence
    Submitted,
    /// The GPU finished; the backbuffer is being flipped
    Presented,
    /// A cycle failed; no further frames will be rendered
    Faulted,
}

impl FramePhase {
    /// Lowercase name used in errors and logs
    pub fn name(self) -> &'static str {
        match self {
            FramePhase::Idle => "idle",
            FramePhase::Recording => "recording",
            FramePhase::Submitted => "submitted",
            FramePhase::Presented => "presented",
            FramePhase::Faulted => "faulted",
        }
    }
}

/// State owned by the submission pipeline across frames
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameState {
    /// Backbuffer the next frame renders into (0 or 1)
    pub backbuffer_index: u32,
    /// Last fence value signalled; only ever increases
    pub fence_value: u64,
    /// Color the next frame clears to
    pub clear_color: [f32; 4],
}

impl FrameState {
    pub(crate) fn new(backbuffer_index: u32, fence_value: u64, clear_color: [f32; 4]) -> Self {
        Self {
            backbuffer_index,
            fence_value,
            clear_color,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_names() {
        assert_eq!(FramePhase::Idle.name(), "idle");
        assert_eq!(FramePhase::Faulted.name(), "faulted");
        assert_ne!(FramePhase::Recording, FramePhase::Submitted);
    }
}
