//! Backend abstraction traits for the rendering system
//!
//! This module defines the traits a graphics backend implements so the
//! scene and the frame submission pipeline never touch a concrete API. The
//! shape follows an explicit command-list model: a device creating buffers and
//! descriptor views, a recorder backed by a resettable allocator, a queue
//! executing closed lists in order, a monotonic fence, and a swapchain.

use std::time::Duration;

use crate::render::RenderError;

use super::handles::{
    ClearFlags, CpuDescriptorHandle, DescriptorHeapDesc, DescriptorHeapId, GpuDescriptorHandle,
    IndexBufferView, PipelineHandle, PrimitiveTopology, ResourceBarrier, ResourceId,
    RootSignatureHandle, ScissorRect, VertexBufferView, Viewport,
};

/// Result type for backend operations
pub type BackendResult<T> = Result<T, RenderError>;

/// Host-visible mapping of a buffer, unmapped when dropped
pub trait MappedRange {
    /// Writable view of the mapped bytes
    fn as_mut_bytes(&mut self) -> &mut [u8];
}

/// Host-visible uniform (constant) buffer
pub trait UniformBuffer {
    /// Size in bytes, already rounded to the device alignment
    fn size(&self) -> u64;

    /// GPU virtual address
    fn gpu_address(&self) -> u64;

    /// Map the buffer for writing
    ///
    /// Nothing is read back; the caller overwrites what it needs and drops the
    /// guard to unmap.
    fn map(&mut self) -> BackendResult<Box<dyn MappedRange + '_>>;
}

/// Device-level resource creation
pub trait GpuDevice {
    /// Uniform buffer type created by this device
    type Buffer: UniformBuffer;

    /// Create a host-visible uniform buffer of at least `size` bytes
    fn create_uniform_buffer(&self, size: u64) -> BackendResult<Self::Buffer>;

    /// Byte distance between consecutive shader-visible descriptor entries
    fn descriptor_increment_size(&self) -> u32;

    /// The shader-visible descriptor heap object descriptors are written into
    fn descriptor_heap(&self) -> DescriptorHeapDesc;

    /// Minimum uniform buffer size alignment
    fn uniform_alignment(&self) -> u64;

    /// Write a constant buffer view of `buffer` into the heap entry at `dest`
    fn create_constant_buffer_view(
        &self,
        buffer: &Self::Buffer,
        dest: CpuDescriptorHandle,
    ) -> BackendResult<()>;
}

/// Backing memory for recorded commands
pub trait CommandAllocator {
    /// Reclaim the memory of all lists recorded from this allocator
    ///
    /// Only valid once the GPU has finished every batch recorded into it.
    fn reset(&mut self) -> BackendResult<()>;
}

/// Command recorder
///
/// Recording methods fail with `CommandListState` on a closed list.
pub trait CommandList {
    /// Allocator type the list records into
    type Allocator: CommandAllocator;

    /// Reopen the list for recording into `allocator`
    fn reset(&mut self, allocator: &mut Self::Allocator) -> BackendResult<()>;

    /// Close the list; it can then be submitted
    fn close(&mut self) -> BackendResult<()>;

    /// Whether the list is open for recording
    fn is_recording(&self) -> bool;

    /// Record resource state transitions
    fn resource_barrier(&mut self, barriers: &[ResourceBarrier]) -> BackendResult<()>;

    /// Bind color targets and an optional depth target
    fn set_render_targets(
        &mut self,
        render_targets: &[CpuDescriptorHandle],
        depth_stencil: Option<CpuDescriptorHandle>,
    ) -> BackendResult<()>;

    /// Clear a color target
    fn clear_render_target(&mut self, rtv: CpuDescriptorHandle, color: [f32; 4]) -> BackendResult<()>;

    /// Clear depth and/or stencil planes
    fn clear_depth_stencil(
        &mut self,
        dsv: CpuDescriptorHandle,
        flags: ClearFlags,
        depth: f32,
        stencil: u8,
    ) -> BackendResult<()>;

    /// Bind a pipeline state object
    fn set_pipeline_state(&mut self, pipeline: PipelineHandle) -> BackendResult<()>;

    /// Bind the graphics root signature
    fn set_root_signature(&mut self, root_signature: RootSignatureHandle) -> BackendResult<()>;

    /// Set the viewport
    fn set_viewport(&mut self, viewport: Viewport) -> BackendResult<()>;

    /// Set the scissor rectangle
    fn set_scissor_rect(&mut self, rect: ScissorRect) -> BackendResult<()>;

    /// Set the primitive topology
    fn set_primitive_topology(&mut self, topology: PrimitiveTopology) -> BackendResult<()>;

    /// Bind the vertex buffer at slot 0
    fn set_vertex_buffer(&mut self, view: VertexBufferView) -> BackendResult<()>;

    /// Bind the index buffer
    fn set_index_buffer(&mut self, view: IndexBufferView) -> BackendResult<()>;

    /// Bind the shader-visible descriptor heap
    fn set_descriptor_heap(&mut self, heap: DescriptorHeapId) -> BackendResult<()>;

    /// Point root parameter `root_index` at a descriptor table
    fn set_root_descriptor_table(
        &mut self,
        root_index: u32,
        table: GpuDescriptorHandle,
    ) -> BackendResult<()>;

    /// Indexed, instanced draw
    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    ) -> BackendResult<()>;
}

/// Submission queue (the GPU executor)
pub trait CommandQueue {
    /// List type accepted by the queue
    type List: CommandList;
    /// Fence type signalled by the queue
    type Fence: Fence;

    /// Submit a closed command list; batches execute in submission order
    fn execute(&mut self, list: &Self::List) -> BackendResult<()>;

    /// Set `fence` to `value` once all prior submissions have completed
    fn signal(&mut self, fence: &Self::Fence, value: u64) -> BackendResult<()>;
}

/// Monotonic GPU completion counter
pub trait Fence {
    /// Last value the GPU has reached
    fn completed_value(&self) -> u64;

    /// Block until the fence reaches `value`
    ///
    /// Returns `Ok(false)` if `timeout` elapsed first. `None` waits forever.
    fn wait_for(&self, value: u64, timeout: Option<Duration>) -> BackendResult<bool>;
}

/// Double-buffered presentation surface
pub trait SwapChain {
    /// Number of backbuffers
    fn buffer_count(&self) -> u32;

    /// Backbuffer the next frame renders into
    fn current_backbuffer_index(&self) -> u32;

    /// Resource behind backbuffer `index`
    fn backbuffer(&self, index: u32) -> BackendResult<ResourceId>;

    /// Flip the current backbuffer to the display and rotate the index
    fn present(&mut self, sync_interval: u32) -> BackendResult<()>;
}

/// The set of frame-level objects a backend provides to the submission pipeline
pub trait FrameBackend {
    /// Command allocator
    type Allocator: CommandAllocator;
    /// Command list recording into `Allocator`
    type List: CommandList<Allocator = Self::Allocator>;
    /// Fence
    type Fence: Fence;
    /// Queue executing `List` and signalling `Fence`
    type Queue: CommandQueue<List = Self::List, Fence = Self::Fence>;
    /// Swapchain
    type SwapChain: SwapChain;
}
