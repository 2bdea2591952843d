//! Headless command allocator and command list
//!
//! The list records [`GpuCommand`]s and enforces the open/closed lifecycle.
//! The allocator tracks how many batches recorded into it are still owned by
//! the executor and refuses to reset until that count drops to zero.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::render::api::{
    BackendResult, ClearFlags, CommandAllocator, CommandList, CpuDescriptorHandle,
    DescriptorHeapId, GpuDescriptorHandle, IndexBufferView, PipelineHandle, PrimitiveTopology,
    ResourceBarrier, RootSignatureHandle, ScissorRect, VertexBufferView, Viewport,
};
use crate::render::RenderError;

/// A recorded command
#[derive(Debug, Clone, PartialEq)]
pub enum GpuCommand {
    /// Resource state transitions
    ResourceBarrier(Vec<ResourceBarrier>),
    /// Output-merger binding
    SetRenderTargets {
        /// Color target views
        render_targets: Vec<CpuDescriptorHandle>,
        /// Depth target view
        depth_stencil: Option<CpuDescriptorHandle>,
    },
    /// Color clear
    ClearRenderTarget {
        /// Target view
        rtv: CpuDescriptorHandle,
        /// Clear color
        color: [f32; 4],
    },
    /// Depth/stencil clear
    ClearDepthStencil {
        /// Target view
        dsv: CpuDescriptorHandle,
        /// Planes to clear
        flags: ClearFlags,
        /// Depth value
        depth: f32,
        /// Stencil value
        stencil: u8,
    },
    /// Pipeline state binding
    SetPipelineState(PipelineHandle),
    /// Root signature binding
    SetRootSignature(RootSignatureHandle),
    /// Viewport
    SetViewport(Viewport),
    /// Scissor rectangle
    SetScissorRect(ScissorRect),
    /// Primitive topology
    SetPrimitiveTopology(PrimitiveTopology),
    /// Vertex buffer binding
    SetVertexBuffer(VertexBufferView),
    /// Index buffer binding
    SetIndexBuffer(IndexBufferView),
    /// Descriptor heap binding
    SetDescriptorHeap(DescriptorHeapId),
    /// Root descriptor table
    SetRootDescriptorTable {
        /// Root parameter
        root_index: u32,
        /// First descriptor of the table
        table: GpuDescriptorHandle,
    },
    /// Indexed draw
    DrawIndexed {
        /// Indices per instance
        index_count: u32,
        /// Instances
        instance_count: u32,
        /// First index
        start_index: u32,
        /// Added to each index
        base_vertex: i32,
        /// First instance
        start_instance: u32,
    },
}

/// Command allocator
#[derive(Debug, Default)]
pub struct HeadlessCommandAllocator {
    pending: Arc<AtomicUsize>,
    reset_count: u64,
}

impl HeadlessCommandAllocator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Submitted batches the executor has not finished
    pub fn pending_batches(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Successful resets so far
    pub fn reset_count(&self) -> u64 {
        self.reset_count
    }
}

impl CommandAllocator for HeadlessCommandAllocator {
    fn reset(&mut self) -> BackendResult<()> {
        let pending = self.pending_batches();
        if pending > 0 {
            return Err(RenderError::AllocatorInUse { pending });
        }
        self.reset_count += 1;
        Ok(())
    }
}

/// Command list
#[derive(Debug)]
pub struct HeadlessCommandList {
    commands: Vec<GpuCommand>,
    recording: bool,
    allocator_pending: Arc<AtomicUsize>,
}

impl HeadlessCommandList {
    /// Lists start open, recording into `allocator`
    pub(crate) fn new(allocator: &HeadlessCommandAllocator) -> Self {
        Self {
            commands: Vec::new(),
            recording: true,
            allocator_pending: Arc::clone(&allocator.pending),
        }
    }

    /// Commands recorded since the last reset
    pub fn commands(&self) -> &[GpuCommand] {
        &self.commands
    }

    /// Snapshot handed to the executor, plus the counter it must release
    pub(crate) fn submission(&self) -> (Vec<GpuCommand>, Arc<AtomicUsize>) {
        (self.commands.clone(), Arc::clone(&self.allocator_pending))
    }

    fn record(&mut self, command: GpuCommand) -> BackendResult<()> {
        if !self.recording {
            return Err(RenderError::CommandListState(format!(
                "cannot record {:?} into a closed command list",
                command
            )));
        }
        self.commands.push(command);
        Ok(())
    }
}

impl CommandList for HeadlessCommandList {
    type Allocator = HeadlessCommandAllocator;

    fn reset(&mut self, allocator: &mut HeadlessCommandAllocator) -> BackendResult<()> {
        if self.recording {
            return Err(RenderError::CommandListState(
                "command list must be closed before it is reset".to_string(),
            ));
        }
        self.commands.clear();
        self.allocator_pending = Arc::clone(&allocator.pending);
        self.recording = true;
        Ok(())
    }

    fn close(&mut self) -> BackendResult<()> {
        if !self.recording {
            return Err(RenderError::CommandListState(
                "command list is already closed".to_string(),
            ));
        }
        self.recording = false;
        Ok(())
    }

    fn is_recording(&self) -> bool {
        self.recording
    }

    fn resource_barrier(&mut self, barriers: &[ResourceBarrier]) -> BackendResult<()> {
        self.record(GpuCommand::ResourceBarrier(barriers.to_vec()))
    }

    fn set_render_targets(
        &mut self,
        render_targets: &[CpuDescriptorHandle],
        depth_stencil: Option<CpuDescriptorHandle>,
    ) -> BackendResult<()> {
        self.record(GpuCommand::SetRenderTargets {
            render_targets: render_targets.to_vec(),
            depth_stencil,
        })
    }

    fn clear_render_target(&mut self, rtv: CpuDescriptorHandle, color: [f32; 4]) -> BackendResult<()> {
        self.record(GpuCommand::ClearRenderTarget { rtv, color })
    }

    fn clear_depth_stencil(
        &mut self,
        dsv: CpuDescriptorHandle,
        flags: ClearFlags,
        depth: f32,
        stencil: u8,
    ) -> BackendResult<()> {
        self.record(GpuCommand::ClearDepthStencil {
            dsv,
            flags,
            depth,
            stencil,
        })
    }

    fn set_pipeline_state(&mut self, pipeline: PipelineHandle) -> BackendResult<()> {
        self.record(GpuCommand::SetPipelineState(pipeline))
    }

    fn set_root_signature(&mut self, root_signature: RootSignatureHandle) -> BackendResult<()> {
        self.record(GpuCommand::SetRootSignature(root_signature))
    }

    fn set_viewport(&mut self, viewport: Viewport) -> BackendResult<()> {
        self.record(GpuCommand::SetViewport(viewport))
    }

    fn set_scissor_rect(&mut self, rect: ScissorRect) -> BackendResult<()> {
        self.record(GpuCommand::SetScissorRect(rect))
    }

    fn set_primitive_topology(&mut self, topology: PrimitiveTopology) -> BackendResult<()> {
        self.record(GpuCommand::SetPrimitiveTopology(topology))
    }

    fn set_vertex_buffer(&mut self, view: VertexBufferView) -> BackendResult<()> {
        self.record(GpuCommand::SetVertexBuffer(view))
    }

    fn set_index_buffer(&mut self, view: IndexBufferView) -> BackendResult<()> {
        self.record(GpuCommand::SetIndexBuffer(view))
    }

    fn set_descriptor_heap(&mut self, heap: DescriptorHeapId) -> BackendResult<()> {
        self.record(GpuCommand::SetDescriptorHeap(heap))
    }

    fn set_root_descriptor_table(
        &mut self,
        root_index: u32,
        table: GpuDescriptorHandle,
    ) -> BackendResult<()> {
        self.record(GpuCommand::SetRootDescriptorTable { root_index, table })
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    ) -> BackendResult<()> {
        self.record(GpuCommand::DrawIndexed {
            index_count,
            instance_count,
            start_index,
            base_vertex,
            start_instance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_starts_open_and_rejects_recording_once_closed() {
        let allocator = HeadlessCommandAllocator::new();
        let mut list = HeadlessCommandList::new(&allocator);
        assert!(list.is_recording());

        list.set_pipeline_state(PipelineHandle(7)).unwrap();
        list.close().unwrap();

        let err = list.set_pipeline_state(PipelineHandle(7)).unwrap_err();
        assert!(matches!(err, RenderError::CommandListState(_)));
        assert_eq!(list.commands(), &[GpuCommand::SetPipelineState(PipelineHandle(7))]);
    }

    #[test]
    fn test_reset_requires_closed_list_and_clears_commands() {
        let mut allocator = HeadlessCommandAllocator::new();
        let mut list = HeadlessCommandList::new(&allocator);
        list.set_descriptor_heap(DescriptorHeapId(1)).unwrap();

        assert!(list.reset(&mut allocator).is_err());
        list.close().unwrap();
        assert!(list.close().is_err());

        list.reset(&mut allocator).unwrap();
        assert!(list.commands().is_empty());
        assert!(list.is_recording());
    }

    #[test]
    fn test_allocator_refuses_reset_while_batch_pending() {
        let mut allocator = HeadlessCommandAllocator::new();
        let list = HeadlessCommandList::new(&allocator);
        let (_, pending) = list.submission();

        pending.fetch_add(1, Ordering::AcqRel);
        let err = allocator.reset().unwrap_err();
        assert!(matches!(err, RenderError::AllocatorInUse { pending: 1 }));
        assert_eq!(allocator.reset_count(), 0);

        pending.fetch_sub(1, Ordering::AcqRel);
        allocator.reset().unwrap();
        assert_eq!(allocator.reset_count(), 1);
    }
}
