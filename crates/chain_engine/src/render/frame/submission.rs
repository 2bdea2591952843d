//! Frame submission pipeline
//!
//! One cycle per call to [`FrameSubmissionPipeline::render_frame`]:
//!
//! 1. update every node's uniforms, parents first
//! 2. transition the current backbuffer to render target, bind and clear the
//!    targets, set the fixed pipeline state
//! 3. record one draw per node
//! 4. transition back to present, close, execute
//! 5. signal the next fence value and block until the GPU reaches it
//! 6. reset the allocator and the list, present, rotate the backbuffer
//!
//! At most one frame is ever in flight: the allocator is only reset after the
//! fence confirms the batch recorded into it has finished.

use std::time::Duration;

use crate::core::config::RendererConfig;
use crate::foundation::math::Mat4;
use crate::foundation::time::Stopwatch;
use crate::render::api::{
    ClearFlags, CommandAllocator, CommandList, CommandQueue, CpuDescriptorHandle,
    DescriptorHeapId, Fence, FrameBackend, GpuDescriptorHandle, IndexBufferView, PipelineHandle,
    PrimitiveTopology, ResourceBarrier, ResourceState, RootSignatureHandle, ScissorRect, SwapChain,
    UniformBuffer, VertexBufferView, Viewport,
};
use crate::render::{RenderError, RenderResult};
use crate::scene::Scene;

use super::frame_state::{FramePhase, FrameState};

/// Backend objects owned exclusively by the pipeline
pub struct FrameResources<B: FrameBackend> {
    /// Allocator backing the command list
    pub allocator: B::Allocator,
    /// The single reusable command list
    pub list: B::List,
    /// Direct queue
    pub queue: B::Queue,
    /// Frame completion fence
    pub fence: B::Fence,
    /// Two-buffer swapchain
    pub swapchain: B::SwapChain,
}

/// Target views and pipeline bindings set at the start of every frame
#[derive(Debug, Clone)]
pub struct FrameTargets {
    /// Render target view per backbuffer, by backbuffer index
    pub render_target_views: Vec<CpuDescriptorHandle>,
    /// Depth buffer view
    pub depth_stencil_view: CpuDescriptorHandle,
    /// Graphics pipeline state
    pub pipeline: PipelineHandle,
    /// Root signature
    pub root_signature: RootSignatureHandle,
    /// Viewport
    pub viewport: Viewport,
    /// Scissor rectangle
    pub scissor: ScissorRect,
    /// Primitive topology
    pub topology: PrimitiveTopology,
}

/// Bindings shared by every node's draw
#[derive(Debug, Clone, Copy)]
pub struct DrawResources {
    /// Shader-visible descriptor heap
    pub heap: DescriptorHeapId,
    /// Shape vertices
    pub vertex_buffer: VertexBufferView,
    /// Shape indices
    pub index_buffer: IndexBufferView,
    /// Indices per draw
    pub index_count: u32,
    /// Descriptor table of the shared texture
    pub shared_table: GpuDescriptorHandle,
}

/// Outcome of one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameReport {
    /// Fence value signalled for this frame
    pub fence_value: u64,
    /// Backbuffer rendered and presented
    pub backbuffer_index: u32,
    /// Draws recorded
    pub draw_count: u32,
    /// Nodes whose uniform upload succeeded
    pub uploads: usize,
    /// Time blocked on the fence
    pub gpu_wait: Duration,
}

/// Totals across all completed frames
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameStats {
    /// Frames presented
    pub frames: u64,
    /// Draws recorded
    pub draws: u64,
    /// Uniform uploads skipped after a failed map
    pub skipped_uploads: u64,
    /// Total time blocked on the fence
    pub gpu_wait: Duration,
}

impl FrameStats {
    /// Mean fence wait per frame
    pub fn average_gpu_wait(&self) -> Duration {
        match u32::try_from(self.frames) {
            Ok(0) => Duration::ZERO,
            Ok(frames) => self.gpu_wait / frames,
            Err(_) => Duration::ZERO,
        }
    }

    fn record(&mut self, report: &FrameReport, node_count: usize) {
        self.frames += 1;
        self.draws += u64::from(report.draw_count);
        self.skipped_uploads += node_count.saturating_sub(report.uploads) as u64;
        self.gpu_wait += report.gpu_wait;
    }
}

/// Fence-synchronized, double-buffered frame loop
pub struct FrameSubmissionPipeline<B: FrameBackend> {
    resources: FrameResources<B>,
    targets: FrameTargets,
    draw: DrawResources,
    state: FrameState,
    phase: FramePhase,
    base_clear_color: [f32; 4],
    sync_interval: u32,
    fence_timeout: Option<Duration>,
    stats: FrameStats,
}

impl<B: FrameBackend> FrameSubmissionPipeline<B> {
    /// Take ownership of the frame resources
    ///
    /// The swapchain must have exactly two backbuffers, each with a render
    /// target view. The list is left open so the first frame can record.
    pub fn new(
        mut resources: FrameResources<B>,
        targets: FrameTargets,
        draw: DrawResources,
        config: &RendererConfig,
    ) -> RenderResult<Self> {
        let buffer_count = resources.swapchain.buffer_count();
        if buffer_count != 2 {
            return Err(RenderError::ResourceCreation(format!(
                "swapchain has {} backbuffers, expected 2",
                buffer_count
            )));
        }
        if targets.render_target_views.len() != buffer_count as usize {
            return Err(RenderError::ResourceCreation(format!(
                "{} render target views for {} backbuffers",
                targets.render_target_views.len(),
                buffer_count
            )));
        }

        if !resources.list.is_recording() {
            resources.list.reset(&mut resources.allocator)?;
        }

        let state = FrameState::new(
            resources.swapchain.current_backbuffer_index(),
            resources.fence.completed_value(),
            config.clear_color,
        );

        Ok(Self {
            resources,
            targets,
            draw,
            state,
            phase: FramePhase::Idle,
            base_clear_color: config.clear_color,
            sync_interval: config.sync_interval,
            fence_timeout: config.fence_timeout(),
            stats: FrameStats::default(),
        })
    }

    /// Current phase
    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    /// Current frame state
    pub fn state(&self) -> &FrameState {
        &self.state
    }

    /// Totals over all presented frames
    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    /// Configured clear color, before per-frame overrides
    pub fn base_clear_color(&self) -> [f32; 4] {
        self.base_clear_color
    }

    /// Clear color for the next frame
    pub fn set_clear_color(&mut self, color: [f32; 4]) {
        self.state.clear_color = color;
    }

    /// Backend objects, for inspection
    pub fn resources(&self) -> &FrameResources<B> {
        &self.resources
    }

    /// Backend objects, mutably
    ///
    /// Recording into the list outside `render_frame` breaks the cycle.
    pub fn resources_mut(&mut self) -> &mut FrameResources<B> {
        &mut self.resources
    }

    /// Run one full cycle and return once the frame has been presented
    ///
    /// Any failure leaves the pipeline `Faulted`; later calls return
    /// [`RenderError::PipelineFaulted`].
    pub fn render_frame<U: UniformBuffer>(
        &mut self,
        scene: &mut Scene<U>,
        view: &Mat4,
        projection: &Mat4,
    ) -> RenderResult<FrameReport> {
        match self.phase {
            FramePhase::Idle => {}
            FramePhase::Faulted => return Err(RenderError::PipelineFaulted),
            other => {
                return Err(RenderError::InvalidPhase {
                    expected: FramePhase::Idle.name(),
                    found: other.name(),
                })
            }
        }

        match self.cycle(scene, view, projection) {
            Ok(report) => {
                self.stats.record(&report, scene.len());
                log::debug!(
                    "Frame {} presented backbuffer {} ({} draws, waited {:?})",
                    report.fence_value,
                    report.backbuffer_index,
                    report.draw_count,
                    report.gpu_wait
                );
                Ok(report)
            }
            Err(e) => {
                log::error!("Frame {} failed in {} phase: {}", self.state.fence_value, self.phase.name(), e);
                self.phase = FramePhase::Faulted;
                Err(e)
            }
        }
    }

    /// Signal and wait once more so nothing is in flight at teardown
    pub fn wait_for_idle(&mut self) -> RenderResult<()> {
        if self.phase != FramePhase::Idle {
            return Err(RenderError::PipelineFaulted);
        }
        self.state.fence_value += 1;
        let value = self.state.fence_value;
        self.resources.queue.signal(&self.resources.fence, value)?;
        self.wait_for_fence(value).map(|_| ())
    }

    fn cycle<U: UniformBuffer>(
        &mut self,
        scene: &mut Scene<U>,
        view: &Mat4,
        projection: &Mat4,
    ) -> RenderResult<FrameReport> {
        // The previous batch completed before the last frame returned, so
        // nothing on the GPU still reads these buffers.
        let uploads = scene.update(view, projection)?;

        self.phase = FramePhase::Recording;
        let backbuffer_index = self.resources.swapchain.current_backbuffer_index();
        let backbuffer = self.resources.swapchain.backbuffer(backbuffer_index)?;
        let rtv = self
            .targets
            .render_target_views
            .get(backbuffer_index as usize)
            .copied()
            .ok_or(RenderError::SlotOutOfRange {
                index: backbuffer_index,
                capacity: self.targets.render_target_views.len() as u32,
            })?;
        let dsv = self.targets.depth_stencil_view;

        let list = &mut self.resources.list;
        list.resource_barrier(&[ResourceBarrier::transition(
            backbuffer,
            ResourceState::Present,
            ResourceState::RenderTarget,
        )])?;
        list.set_render_targets(&[rtv], Some(dsv))?;
        list.clear_render_target(rtv, self.state.clear_color)?;
        list.clear_depth_stencil(dsv, ClearFlags::DEPTH, 1.0, 0)?;
        list.set_pipeline_state(self.targets.pipeline)?;
        list.set_root_signature(self.targets.root_signature)?;
        list.set_viewport(self.targets.viewport)?;
        list.set_scissor_rect(self.targets.scissor)?;
        list.set_primitive_topology(self.targets.topology)?;

        let draw_count = scene.draw(list, &self.draw)?;

        list.resource_barrier(&[ResourceBarrier::transition(
            backbuffer,
            ResourceState::RenderTarget,
            ResourceState::Present,
        )])?;
        list.close()?;
        self.resources.queue.execute(list)?;
        self.phase = FramePhase::Submitted;

        self.state.fence_value += 1;
        let fence_value = self.state.fence_value;
        self.resources.queue.signal(&self.resources.fence, fence_value)?;
        let gpu_wait = self.wait_for_fence(fence_value)?;

        self.resources.allocator.reset()?;
        self.resources.list.reset(&mut self.resources.allocator)?;

        self.phase = FramePhase::Presented;
        self.resources.swapchain.present(self.sync_interval)?;
        self.state.backbuffer_index = self.resources.swapchain.current_backbuffer_index();
        self.phase = FramePhase::Idle;

        Ok(FrameReport {
            fence_value,
            backbuffer_index,
            draw_count,
            uploads,
            gpu_wait,
        })
    }

    fn wait_for_fence(&self, value: u64) -> RenderResult<Duration> {
        let fence = &self.resources.fence;
        let stopwatch = Stopwatch::start_new();

        if fence.completed_value() < value && !fence.wait_for(value, self.fence_timeout)? {
            return Err(RenderError::FenceTimeout {
                value,
                completed: fence.completed_value(),
                timeout: self.fence_timeout.unwrap_or_default(),
            });
        }

        let waited = stopwatch.elapsed();
        log::trace!("Fence reached {} after {:?}", value, waited);
        Ok(waited)
    }
}
