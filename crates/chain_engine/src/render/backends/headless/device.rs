//! Headless device: host-memory buffers and an emulated descriptor heap
//!
//! Uniform buffers live in a slotmap arena shared with the executor thread, so
//! a draw can read back exactly the bytes the host last wrote. The
//! shader-visible heap is a vector of entries addressed through CPU/GPU base
//! handles and a fixed stride, mirroring how a real heap is addressed.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use slotmap::{new_key_type, SlotMap};

use crate::core::config::RendererConfig;
use crate::render::api::{
    BackendResult, CpuDescriptorHandle, DescriptorHeapDesc, DescriptorHeapId, GpuDescriptorHandle,
    GpuDevice, MappedRange, ResourceId, ResourceState, UniformBuffer,
};
use crate::render::RenderError;

use super::commands::{HeadlessCommandAllocator, HeadlessCommandList};
use super::lock;
use super::queue::{ClearRecord, DrawRecord, ExecutorControl, GpuTimeline, HeadlessQueue};
use super::swapchain::HeadlessSwapChain;
use super::sync::HeadlessFence;

new_key_type! {
    /// Key of a buffer in the device memory arena
    pub struct BufferKey;
}

const HEAP_CPU_BASE: u64 = 0x0001_0000;
const HEAP_GPU_BASE: u64 = 0x4000_0000_0000;
const TARGET_VIEW_BASE: u64 = 0x0100_0000;
const BUFFER_GPU_BASE: u64 = 0x1000_0000;

/// What a shader-visible heap entry points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapEntry {
    /// Constant buffer view
    ConstantBuffer {
        /// Viewed buffer
        buffer: BufferKey,
        /// View size in bytes
        size: u64,
    },
    /// Shader resource (texture) view
    ShaderResource(ResourceId),
}

pub(crate) struct DeviceMemory {
    pub(crate) buffers: SlotMap<BufferKey, Vec<u8>>,
    pub(crate) heap: Vec<Option<HeapEntry>>,
    pub(crate) heap_desc: DescriptorHeapDesc,
    pub(crate) increment: u32,
    pub(crate) target_views: HashMap<CpuDescriptorHandle, ResourceId>,
    failing_maps: HashSet<BufferKey>,
    budget: Option<u64>,
    allocated: u64,
    next_gpu_address: u64,
    next_target_view: u64,
}

impl DeviceMemory {
    fn heap_index(&self, offset_from_base: Option<u64>) -> Option<usize> {
        let offset = offset_from_base?;
        let increment = u64::from(self.increment);
        if offset % increment != 0 {
            return None;
        }
        let index = usize::try_from(offset / increment).ok()?;
        (index < self.heap.len()).then_some(index)
    }

    pub(crate) fn heap_index_cpu(&self, handle: CpuDescriptorHandle) -> Option<usize> {
        self.heap_index(handle.0.checked_sub(self.heap_desc.cpu_base.0))
    }

    pub(crate) fn heap_index_gpu(&self, handle: GpuDescriptorHandle) -> Option<usize> {
        self.heap_index(handle.0.checked_sub(self.heap_desc.gpu_base.0))
    }
}

/// Uniform buffer backed by host memory
pub struct HeadlessBuffer {
    key: BufferKey,
    size: u64,
    gpu_address: u64,
    memory: Arc<Mutex<DeviceMemory>>,
}

impl HeadlessBuffer {
    /// Arena key, used to correlate heap entries and injected failures
    pub fn key(&self) -> BufferKey {
        self.key
    }
}

struct HeadlessMapping<'a> {
    memory: MutexGuard<'a, DeviceMemory>,
    key: BufferKey,
}

impl MappedRange for HeadlessMapping<'_> {
    fn as_mut_bytes(&mut self) -> &mut [u8] {
        self.memory
            .buffers
            .get_mut(self.key)
            .map(Vec::as_mut_slice)
            .unwrap_or_default()
    }
}

impl UniformBuffer for HeadlessBuffer {
    fn size(&self) -> u64 {
        self.size
    }

    fn gpu_address(&self) -> u64 {
        self.gpu_address
    }

    fn map(&mut self) -> BackendResult<Box<dyn MappedRange + '_>> {
        let memory = lock(&self.memory);
        if memory.failing_maps.contains(&self.key) {
            return Err(RenderError::MapFailed(format!(
                "buffer at {:#x} refused to map",
                self.gpu_address
            )));
        }
        if !memory.buffers.contains_key(self.key) {
            return Err(RenderError::MapFailed(format!(
                "buffer at {:#x} has been released",
                self.gpu_address
            )));
        }
        Ok(Box::new(HeadlessMapping {
            memory,
            key: self.key,
        }))
    }
}

impl Drop for HeadlessBuffer {
    fn drop(&mut self) {
        let mut memory = lock(&self.memory);
        if memory.buffers.remove(self.key).is_some() {
            memory.allocated = memory.allocated.saturating_sub(self.size);
        }
        memory.failing_maps.remove(&self.key);
    }
}

/// Software device
///
/// Cloning is cheap; clones share memory, resource states and executor controls.
#[derive(Clone)]
pub struct HeadlessDevice {
    memory: Arc<Mutex<DeviceMemory>>,
    timeline: Arc<Mutex<GpuTimeline>>,
    control: Arc<ExecutorControl>,
    next_resource: Arc<AtomicU64>,
    alignment: u64,
    latency: Duration,
}

impl HeadlessDevice {
    /// Create a device whose heap holds `descriptor_capacity + 1` entries
    pub fn new(config: &RendererConfig) -> Self {
        let heap_entries = config.descriptor_capacity.saturating_add(1);
        let heap_desc = DescriptorHeapDesc {
            id: DescriptorHeapId(1),
            cpu_base: CpuDescriptorHandle(HEAP_CPU_BASE),
            gpu_base: GpuDescriptorHandle(HEAP_GPU_BASE),
            capacity: heap_entries,
        };

        let memory = DeviceMemory {
            buffers: SlotMap::with_key(),
            heap: vec![None; heap_entries as usize],
            heap_desc,
            increment: config.descriptor_increment.max(1),
            target_views: HashMap::new(),
            failing_maps: HashSet::new(),
            budget: None,
            allocated: 0,
            next_gpu_address: BUFFER_GPU_BASE,
            next_target_view: TARGET_VIEW_BASE,
        };

        Self {
            memory: Arc::new(Mutex::new(memory)),
            timeline: Arc::new(Mutex::new(GpuTimeline::default())),
            control: Arc::new(ExecutorControl::default()),
            next_resource: Arc::new(AtomicU64::new(1)),
            alignment: config.uniform_alignment,
            latency: Duration::from_micros(config.gpu_latency_us),
        }
    }

    /// Register a GPU resource in `initial` state
    pub fn create_resource(&self, initial: ResourceState) -> ResourceId {
        let id = ResourceId(self.next_resource.fetch_add(1, Ordering::Relaxed));
        lock(&self.timeline).states.insert(id, initial);
        id
    }

    /// Current state of a resource on the GPU timeline
    pub fn resource_state(&self, resource: ResourceId) -> Option<ResourceState> {
        lock(&self.timeline).states.get(&resource).copied()
    }

    /// Create a render-target or depth-stencil view of `resource`
    pub fn create_target_view(&self, resource: ResourceId) -> CpuDescriptorHandle {
        let mut memory = lock(&self.memory);
        let handle = CpuDescriptorHandle(memory.next_target_view);
        memory.next_target_view += u64::from(memory.increment);
        memory.target_views.insert(handle, resource);
        handle
    }

    /// Write a shader resource view of `texture` into the heap entry at `dest`
    pub fn create_shader_resource_view(
        &self,
        texture: ResourceId,
        dest: CpuDescriptorHandle,
    ) -> BackendResult<()> {
        let mut memory = lock(&self.memory);
        let index = memory.heap_index_cpu(dest).ok_or_else(|| {
            RenderError::Backend(format!("descriptor handle {:#x} is outside the heap", dest.0))
        })?;
        memory.heap[index] = Some(HeapEntry::ShaderResource(texture));
        Ok(())
    }

    /// Heap entry written at `handle`, if any
    pub fn descriptor_at(&self, handle: CpuDescriptorHandle) -> Option<HeapEntry> {
        let memory = lock(&self.memory);
        memory
            .heap_index_cpu(handle)
            .and_then(|index| memory.heap[index])
    }

    /// Buffer viewed by the constant buffer view at `handle`
    pub fn constant_buffer_at(&self, handle: CpuDescriptorHandle) -> Option<BufferKey> {
        match self.descriptor_at(handle)? {
            HeapEntry::ConstantBuffer { buffer, .. } => Some(buffer),
            HeapEntry::ShaderResource(_) => None,
        }
    }

    /// Limit total uniform buffer bytes; `None` removes the limit
    pub fn set_allocation_budget(&self, budget: Option<u64>) {
        lock(&self.memory).budget = budget;
    }

    /// Make future maps of `buffer` fail (or succeed again)
    pub fn set_map_failure(&self, buffer: &HeadlessBuffer, failing: bool) {
        let mut memory = lock(&self.memory);
        if failing {
            memory.failing_maps.insert(buffer.key);
        } else {
            memory.failing_maps.remove(&buffer.key);
        }
    }

    /// Stop the executor from completing work, as a hung GPU would
    pub fn set_stalled(&self, stalled: bool) {
        self.control.set_stalled(stalled);
    }

    /// Copy of a buffer's bytes as the GPU would see them
    pub fn read_buffer(&self, buffer: &HeadlessBuffer) -> Option<Vec<u8>> {
        lock(&self.memory).buffers.get(buffer.key).cloned()
    }

    /// Bytes of uniform memory currently allocated
    pub fn allocated_bytes(&self) -> u64 {
        lock(&self.memory).allocated
    }

    /// Draws executed so far, in execution order
    pub fn draws(&self) -> Vec<DrawRecord> {
        lock(&self.timeline).draws.clone()
    }

    /// Render-target clears executed so far
    pub fn clears(&self) -> Vec<ClearRecord> {
        lock(&self.timeline).clears.clone()
    }

    /// Number of batches fully executed
    pub fn executed_batches(&self) -> u64 {
        lock(&self.timeline).executed_batches
    }

    /// Reason the device was removed, if it was
    pub fn device_error(&self) -> Option<String> {
        lock(&self.timeline).device_error.clone()
    }

    /// Create a command allocator
    pub fn create_command_allocator(&self) -> HeadlessCommandAllocator {
        HeadlessCommandAllocator::new()
    }

    /// Create a command list, open for recording into `allocator`
    pub fn create_command_list(&self, allocator: &HeadlessCommandAllocator) -> HeadlessCommandList {
        HeadlessCommandList::new(allocator)
    }

    /// Create the direct queue and start its executor thread
    pub fn create_queue(&self) -> BackendResult<HeadlessQueue> {
        HeadlessQueue::spawn(
            Arc::clone(&self.memory),
            Arc::clone(&self.timeline),
            Arc::clone(&self.control),
            self.latency,
        )
    }

    /// Create a fence
    pub fn create_fence(&self, initial: u64) -> HeadlessFence {
        HeadlessFence::new(initial)
    }

    /// Create a two-buffer swapchain whose backbuffers start presentable
    pub fn create_swapchain(&self, width: u32, height: u32) -> HeadlessSwapChain {
        let backbuffers = [
            self.create_resource(ResourceState::Present),
            self.create_resource(ResourceState::Present),
        ];
        HeadlessSwapChain::new(backbuffers, Arc::clone(&self.timeline), width, height)
    }
}

impl GpuDevice for HeadlessDevice {
    type Buffer = HeadlessBuffer;

    fn create_uniform_buffer(&self, size: u64) -> BackendResult<HeadlessBuffer> {
        let mut memory = lock(&self.memory);

        if let Some(budget) = memory.budget {
            if memory.allocated + size > budget {
                return Err(RenderError::ResourceCreation(format!(
                    "out of device memory: {} bytes requested, {} of {} in use",
                    size, memory.allocated, budget
                )));
            }
        }

        let key = memory.buffers.insert(vec![0; size as usize]);
        let gpu_address = memory.next_gpu_address;
        memory.next_gpu_address += size.max(self.alignment);
        memory.allocated += size;

        Ok(HeadlessBuffer {
            key,
            size,
            gpu_address,
            memory: Arc::clone(&self.memory),
        })
    }

    fn descriptor_increment_size(&self) -> u32 {
        lock(&self.memory).increment
    }

    fn descriptor_heap(&self) -> DescriptorHeapDesc {
        lock(&self.memory).heap_desc
    }

    fn uniform_alignment(&self) -> u64 {
        self.alignment
    }

    fn create_constant_buffer_view(
        &self,
        buffer: &HeadlessBuffer,
        dest: CpuDescriptorHandle,
    ) -> BackendResult<()> {
        if buffer.size % self.alignment != 0 {
            return Err(RenderError::ResourceCreation(format!(
                "constant buffer view size {} is not a multiple of {}",
                buffer.size, self.alignment
            )));
        }

        let mut memory = lock(&self.memory);
        let index = memory.heap_index_cpu(dest).ok_or_else(|| {
            RenderError::Backend(format!("descriptor handle {:#x} is outside the heap", dest.0))
        })?;
        memory.heap[index] = Some(HeapEntry::ConstantBuffer {
            buffer: buffer.key,
            size: buffer.size,
        });
        Ok(())
    }
}
