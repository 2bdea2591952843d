//! Headless swapchain
//!
//! Two backbuffer resources flipped in strict alternation. Presenting checks
//! the current backbuffer's state on the GPU timeline, so a frame that never
//! transitioned back to `Present` fails here instead of being shown.

use std::sync::{Arc, Mutex};

use crate::render::api::{BackendResult, ResourceId, ResourceState, SwapChain};
use crate::render::RenderError;

use super::lock;
use super::queue::GpuTimeline;

/// Double-buffered swapchain without a window
pub struct HeadlessSwapChain {
    backbuffers: [ResourceId; 2],
    current: u32,
    timeline: Arc<Mutex<GpuTimeline>>,
    present_count: u64,
    width: u32,
    height: u32,
}

impl HeadlessSwapChain {
    pub(crate) fn new(
        backbuffers: [ResourceId; 2],
        timeline: Arc<Mutex<GpuTimeline>>,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            backbuffers,
            current: 0,
            timeline,
            present_count: 0,
            width,
            height,
        }
    }

    /// Backbuffer resources in index order
    pub fn backbuffers(&self) -> [ResourceId; 2] {
        self.backbuffers
    }

    /// Successful presents so far
    pub fn present_count(&self) -> u64 {
        self.present_count
    }

    /// Backbuffer dimensions
    pub fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl SwapChain for HeadlessSwapChain {
    fn buffer_count(&self) -> u32 {
        self.backbuffers.len() as u32
    }

    fn current_backbuffer_index(&self) -> u32 {
        self.current
    }

    fn backbuffer(&self, index: u32) -> BackendResult<ResourceId> {
        self.backbuffers
            .get(index as usize)
            .copied()
            .ok_or(RenderError::SlotOutOfRange {
                index,
                capacity: self.buffer_count(),
            })
    }

    fn present(&mut self, sync_interval: u32) -> BackendResult<()> {
        let resource = self.backbuffers[self.current as usize];
        {
            let timeline = lock(&self.timeline);
            if let Some(reason) = &timeline.device_error {
                return Err(RenderError::Backend(format!("device removed: {}", reason)));
            }
            let found = timeline
                .states
                .get(&resource)
                .copied()
                .ok_or_else(|| RenderError::Backend(format!("unknown backbuffer {}", resource.0)))?;
            if found != ResourceState::Present {
                return Err(RenderError::InvalidTransition {
                    resource: resource.0,
                    expected: ResourceState::Present,
                    found,
                });
            }
        }

        log::trace!(
            "Presented backbuffer {} (sync interval {})",
            self.current,
            sync_interval
        );
        self.present_count += 1;
        self.current = (self.current + 1) % self.buffer_count();
        Ok(())
    }
}
