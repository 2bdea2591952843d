//! Frame submission
//!
//! The per-frame state machine (`Idle → Recording → Submitted → Presented →
//! Idle`) and the objects it owns.

pub mod frame_state;
pub mod submission;

#[cfg(test)]
mod tests;

pub use frame_state::{FramePhase, FrameState};
pub use submission::{
    DrawResources, FrameReport, FrameResources, FrameStats, FrameSubmissionPipeline, FrameTargets,
};
