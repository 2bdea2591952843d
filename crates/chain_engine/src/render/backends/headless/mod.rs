//! Headless GPU backend
//!
//! A software implementation of the backend seam. Commands are recorded into
//! plain lists and executed asynchronously by a worker thread that tracks
//! resource states, resolves descriptor tables through an emulated heap and
//! signals fences in queue order. It is the GPU for the demo binary and the
//! test double for everything above the seam.
//!
//! Lock order is device memory first, then the GPU timeline.

mod commands;
mod device;
mod queue;
mod swapchain;
mod sync;

pub use commands::{GpuCommand, HeadlessCommandAllocator, HeadlessCommandList};
pub use device::{BufferKey, HeadlessBuffer, HeadlessDevice, HeapEntry};
pub use queue::{ClearRecord, DrawRecord, HeadlessQueue};
pub use swapchain::HeadlessSwapChain;
pub use sync::HeadlessFence;

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::core::config::RendererConfig;
use crate::render::api::{
    FrameBackend, IndexBufferView, IndexFormat, PipelineHandle, PrimitiveTopology, ResourceId,
    ResourceState, RootSignatureHandle, ScissorRect, VertexBufferView, Viewport,
};
use crate::render::descriptors::{required_heap_entries, SlotTable};
use crate::render::frame::{DrawResources, FrameResources, FrameTargets};
use crate::render::RenderResult;

/// Vertices in the sample shape: a three-sided pyramid, unshared per face
pub const SHAPE_VERTEX_COUNT: u32 = 18;
/// Indices in the sample shape
pub const SHAPE_INDEX_COUNT: u32 = 18;
/// Position, normal and texture coordinate as 32-bit floats
pub const SHAPE_VERTEX_STRIDE: u32 = 32;

/// Lock a mutex, recovering the data if another thread panicked while holding it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Associated types of the headless backend
pub struct HeadlessBackend;

impl FrameBackend for HeadlessBackend {
    type Allocator = HeadlessCommandAllocator;
    type List = HeadlessCommandList;
    type Fence = HeadlessFence;
    type Queue = HeadlessQueue;
    type SwapChain = HeadlessSwapChain;
}

/// Everything the frame loop needs, created in one go
pub struct HeadlessGpu {
    /// Device
    pub device: HeadlessDevice,
    /// Object slots plus the shared texture slot
    pub slots: SlotTable,
    /// Allocator, list, queue, fence and swapchain
    pub resources: FrameResources<HeadlessBackend>,
    /// Per-backbuffer target views and fixed pipeline bindings
    pub targets: FrameTargets,
    /// Geometry and descriptor bindings shared by every draw
    pub draw: DrawResources,
    /// Texture viewed through the shared slot
    pub texture: ResourceId,
}

impl HeadlessGpu {
    /// Create the device and every setup-time object
    ///
    /// Any refusal here is a setup failure and should abort startup.
    pub fn create(config: &RendererConfig) -> RenderResult<Self> {
        required_heap_entries(config.descriptor_capacity)?;
        let device = HeadlessDevice::new(config);
        let slots = SlotTable::from_device(&device, config.descriptor_capacity)?;

        let texture = device.create_resource(ResourceState::PixelShaderResource);
        let shared = slots.shared_slot();
        device.create_shader_resource_view(texture, shared.cpu)?;

        let vertex_buffer = VertexBufferView {
            buffer: device.create_resource(ResourceState::GenericRead),
            size_in_bytes: SHAPE_VERTEX_COUNT * SHAPE_VERTEX_STRIDE,
            stride_in_bytes: SHAPE_VERTEX_STRIDE,
        };
        let index_buffer = IndexBufferView {
            buffer: device.create_resource(ResourceState::GenericRead),
            size_in_bytes: SHAPE_INDEX_COUNT * 2,
            format: IndexFormat::U16,
        };
        let depth_buffer = device.create_resource(ResourceState::DepthWrite);

        let allocator = device.create_command_allocator();
        let list = device.create_command_list(&allocator);
        let queue = device.create_queue()?;
        let fence = device.create_fence(0);
        let swapchain = device.create_swapchain(config.width, config.height);

        let render_target_views = swapchain
            .backbuffers()
            .iter()
            .map(|backbuffer| device.create_target_view(*backbuffer))
            .collect();
        let targets = FrameTargets {
            render_target_views,
            depth_stencil_view: device.create_target_view(depth_buffer),
            pipeline: PipelineHandle(1),
            root_signature: RootSignatureHandle(1),
            viewport: Viewport::full(config.width, config.height),
            scissor: ScissorRect::full(config.width, config.height),
            topology: PrimitiveTopology::TriangleList,
        };

        let draw = DrawResources {
            heap: slots.heap(),
            vertex_buffer,
            index_buffer,
            index_count: index_buffer.index_count(),
            shared_table: shared.gpu,
        };

        log::info!(
            "Headless GPU ready: {}x{}, {} object slots, texture in slot {}",
            config.width,
            config.height,
            slots.capacity(),
            shared.index
        );

        Ok(Self {
            device,
            slots,
            resources: FrameResources {
                allocator,
                list,
                queue,
                fence,
                swapchain,
            },
            targets,
            draw,
            texture,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::api::SwapChain;
    use crate::render::RenderError;

    #[test]
    fn test_create_wires_shared_texture_slot() {
        let config = RendererConfig::default().with_descriptor_capacity(8);
        let gpu = HeadlessGpu::create(&config).unwrap();

        let shared = gpu.slots.shared_slot();
        assert_eq!(shared.index, 8);
        assert_eq!(
            gpu.device.descriptor_at(shared.cpu),
            Some(HeapEntry::ShaderResource(gpu.texture))
        );
        assert_eq!(gpu.draw.shared_table, shared.gpu);
        assert_eq!(gpu.draw.index_count, SHAPE_INDEX_COUNT);
    }

    #[test]
    fn test_create_gives_one_view_per_backbuffer() {
        let gpu = HeadlessGpu::create(&RendererConfig::default()).unwrap();
        let swapchain = &gpu.resources.swapchain;
        assert_eq!(
            gpu.targets.render_target_views.len(),
            swapchain.buffer_count() as usize
        );
        for backbuffer in swapchain.backbuffers() {
            assert_eq!(gpu.device.resource_state(backbuffer), Some(ResourceState::Present));
        }
    }

    #[test]
    fn test_create_rejects_heap_larger_than_device_limit() {
        let config = RendererConfig::default().with_descriptor_capacity(u32::MAX - 1);
        let err = HeadlessGpu::create(&config).err();
        assert!(matches!(
            err,
            Some(RenderError::HeapTooSmall { required: u32::MAX, .. })
        ));
    }
}
