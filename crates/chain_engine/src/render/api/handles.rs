//! Plain-data handles and descriptors passed across the backend seam

use bitflags::bitflags;

/// CPU-side (write) address of a descriptor heap entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CpuDescriptorHandle(pub u64);

impl CpuDescriptorHandle {
    /// Handle `bytes` past this one
    pub fn offset(self, bytes: u64) -> Self {
        Self(self.0 + bytes)
    }
}

/// GPU-side (shader-visible) address of a descriptor heap entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuDescriptorHandle(pub u64);

impl GpuDescriptorHandle {
    /// Handle `bytes` past this one
    pub fn offset(self, bytes: u64) -> Self {
        Self(self.0 + bytes)
    }
}

/// Opaque GPU resource (backbuffer, depth buffer, geometry buffer, texture)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u64);

/// Compiled pipeline state object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineHandle(pub u64);

/// Root signature (binding layout)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootSignatureHandle(pub u64);

/// Shader-visible descriptor heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorHeapId(pub u64);

/// Layout of a shader-visible descriptor heap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorHeapDesc {
    /// Heap identity, bound with `set_descriptor_heap`
    pub id: DescriptorHeapId,
    /// CPU handle of entry 0
    pub cpu_base: CpuDescriptorHandle,
    /// GPU handle of entry 0
    pub gpu_base: GpuDescriptorHandle,
    /// Number of entries
    pub capacity: u32,
}

/// Usage state of a GPU resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Owned by the presentation engine
    Present,
    /// Writable as a color target
    RenderTarget,
    /// Writable as a depth target
    DepthWrite,
    /// Readable by any stage (upload heaps, geometry)
    GenericRead,
    /// Sampled by pixel shaders
    PixelShaderResource,
}

/// State transition of a single resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceBarrier {
    /// Transitioned resource
    pub resource: ResourceId,
    /// State the resource is in before the barrier
    pub before: ResourceState,
    /// State after the barrier
    pub after: ResourceState,
}

impl ResourceBarrier {
    /// Transition barrier
    pub fn transition(resource: ResourceId, before: ResourceState, after: ResourceState) -> Self {
        Self { resource, before, after }
    }
}

bitflags! {
    /// Which planes of a depth-stencil view to clear
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClearFlags: u32 {
        /// Clear depth
        const DEPTH = 1 << 0;
        /// Clear stencil
        const STENCIL = 1 << 1;
    }
}

/// Index element width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    /// 16-bit indices
    U16,
    /// 32-bit indices
    U32,
}

/// Vertex buffer binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBufferView {
    /// Backing buffer
    pub buffer: ResourceId,
    /// Bytes visible to the input assembler
    pub size_in_bytes: u32,
    /// Bytes per vertex
    pub stride_in_bytes: u32,
}

/// Index buffer binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexBufferView {
    /// Backing buffer
    pub buffer: ResourceId,
    /// Bytes visible to the input assembler
    pub size_in_bytes: u32,
    /// Index width
    pub format: IndexFormat,
}

impl IndexBufferView {
    /// Number of indices the view covers
    pub fn index_count(&self) -> u32 {
        match self.format {
            IndexFormat::U16 => self.size_in_bytes / 2,
            IndexFormat::U32 => self.size_in_bytes / 4,
        }
    }
}

/// Rasterizer viewport
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Left edge
    pub x: f32,
    /// Top edge
    pub y: f32,
    /// Width in pixels
    pub width: f32,
    /// Height in pixels
    pub height: f32,
    /// Minimum depth
    pub min_depth: f32,
    /// Maximum depth
    pub max_depth: f32,
}

impl Viewport {
    /// Viewport covering a full `width` x `height` surface with [0, 1] depth
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// Scissor rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    /// Left edge
    pub left: i32,
    /// Top edge
    pub top: i32,
    /// Right edge (exclusive)
    pub right: i32,
    /// Bottom edge (exclusive)
    pub bottom: i32,
}

impl ScissorRect {
    /// Scissor covering a full `width` x `height` surface
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            top: 0,
            right: width as i32,
            bottom: height as i32,
        }
    }
}

/// Primitive assembly mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveTopology {
    /// Independent triangles
    TriangleList,
    /// Triangle strip
    TriangleStrip,
    /// Independent lines
    LineList,
}
