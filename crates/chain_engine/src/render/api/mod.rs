//! Public rendering API
//!
//! The backend seam traits and the plain handle types that cross it.

pub mod handles;
pub mod render_backend;

// Re-export commonly used types
pub use handles::{
    ClearFlags, CpuDescriptorHandle, DescriptorHeapDesc, DescriptorHeapId, GpuDescriptorHandle,
    IndexBufferView, IndexFormat, PipelineHandle, PrimitiveTopology, ResourceBarrier, ResourceId,
    ResourceState, RootSignatureHandle, ScissorRect, VertexBufferView, Viewport,
};
pub use render_backend::{
    BackendResult, CommandAllocator, CommandList, CommandQueue, Fence, FrameBackend, GpuDevice,
    MappedRange, SwapChain, UniformBuffer,
};
