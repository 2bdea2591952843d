//! # Rendering System
//!
//! Backend-agnostic frame submission for a hierarchy of transform nodes.
//!
//! ## Architecture
//!
//! - **API**: the device / recorder / queue / fence / swapchain seam that a
//!   graphics backend implements ([`api`])
//! - **Descriptors**: fixed-capacity descriptor slot table ([`descriptors`])
//! - **Frame**: the fence-synchronized submission pipeline ([`frame`])
//! - **Backends**: concrete implementations of the seam ([`backends`])
//!
//! The pipeline keeps at most one frame in flight. Every cycle records the
//! scene into a single reusable command list, submits it, and blocks on the
//! fence before the allocator is reused and the swapchain is presented.

pub mod api;
pub mod backends;
pub mod descriptors;
pub mod frame;
pub mod primitives;

pub use api::{BackendResult, FrameBackend, GpuDevice};
pub use descriptors::{DescriptorSlot, SlotTable};
pub use frame::{
    DrawResources, FramePhase, FrameReport, FrameResources, FrameState, FrameStats,
    FrameSubmissionPipeline, FrameTargets,
};
pub use primitives::Camera;

use std::time::Duration;

use thiserror::Error;

use api::ResourceState;

/// Errors raised by the rendering layer
///
/// Setup-time variants abort startup; per-frame variants other than a failed
/// uniform map leave the frame pipeline faulted.
#[derive(Error, Debug)]
pub enum RenderError {
    /// Backend-specific failure reported by the device or queue
    #[error("Backend error: {0}")]
    Backend(String),

    /// Resource creation refused by the device (e.g. out of memory)
    #[error("Resource creation failed: {0}")]
    ResourceCreation(String),

    /// A descriptor slot past the table's capacity was requested
    #[error("Descriptor slot {index} out of range (capacity {capacity})")]
    SlotOutOfRange {
        /// Requested slot
        index: u32,
        /// Object slot capacity
        capacity: u32,
    },

    /// The descriptor heap cannot hold the object slots plus the shared slot
    #[error("Descriptor heap holds {available} entries, {required} required")]
    HeapTooSmall {
        /// Entries required (object capacity + shared slot)
        required: u32,
        /// Entries in the heap
        available: u32,
    },

    /// An operation was attempted in the wrong frame phase
    #[error("Invalid frame phase: expected {expected}, found {found}")]
    InvalidPhase {
        /// Phase the operation requires
        expected: &'static str,
        /// Phase the pipeline was in
        found: &'static str,
    },

    /// The GPU did not reach a signalled fence value in time
    #[error("Fence wait for value {value} timed out after {timeout:?} (completed {completed})")]
    FenceTimeout {
        /// Value waited for
        value: u64,
        /// Last completed value observed
        completed: u64,
        /// Wait bound
        timeout: Duration,
    },

    /// A command allocator was reset while the GPU still used its memory
    #[error("Command allocator reset while {pending} submitted batch(es) are still executing")]
    AllocatorInUse {
        /// Batches not yet completed
        pending: usize,
    },

    /// A resource barrier or present saw a resource in an unexpected state
    #[error("Invalid transition for resource {resource}: expected {expected:?}, found {found:?}")]
    InvalidTransition {
        /// Resource id
        resource: u64,
        /// State the caller assumed
        expected: ResourceState,
        /// State the resource was in
        found: ResourceState,
    },

    /// Command list used in the wrong open/closed state
    #[error("Command list state error: {0}")]
    CommandListState(String),

    /// Mapping a uniform buffer's host memory failed
    #[error("Failed to map uniform buffer: {0}")]
    MapFailed(String),

    /// A child was updated before its parent in the current pass
    #[error("Node {child} updated before its parent {parent} in the current pass")]
    StaleParent {
        /// Child node index
        child: usize,
        /// Parent node index
        parent: usize,
    },

    /// A previous frame failed; the pipeline refuses further work
    #[error("Frame pipeline faulted by an earlier error")]
    PipelineFaulted,
}

/// Result type for rendering operations
pub type RenderResult<T> = Result<T, RenderError>;
