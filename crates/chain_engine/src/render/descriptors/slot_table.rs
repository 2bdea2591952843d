//! Fixed-capacity descriptor slot table
//!
//! Maps an object index `i` in `[0, capacity)` to the CPU and GPU handles of
//! heap entry `i`, i.e. `base + i * increment`. Entry `capacity` (one past the
//! last object slot) is reserved for the resource shared by every object, so
//! object slots and the shared slot can never alias.

use crate::render::api::{
    CpuDescriptorHandle, DescriptorHeapDesc, DescriptorHeapId, GpuDescriptorHandle, GpuDevice,
};
use crate::render::{RenderError, RenderResult};

/// Largest shader-visible CBV/SRV/UAV heap a device is required to support
pub const MAX_DESCRIPTOR_HEAP_ENTRIES: u32 = 1_000_000;

/// Heap entries needed for `capacity` object slots plus the shared slot
///
/// Fails when that exceeds [`MAX_DESCRIPTOR_HEAP_ENTRIES`].
pub fn required_heap_entries(capacity: u32) -> RenderResult<u32> {
    match capacity.checked_add(1) {
        Some(required) if required <= MAX_DESCRIPTOR_HEAP_ENTRIES => Ok(required),
        _ => Err(RenderError::HeapTooSmall {
            required: capacity.saturating_add(1),
            available: MAX_DESCRIPTOR_HEAP_ENTRIES,
        }),
    }
}

/// Handles of one descriptor heap entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorSlot {
    /// Entry index in the heap
    pub index: u32,
    /// CPU handle used to write the descriptor
    pub cpu: CpuDescriptorHandle,
    /// GPU handle bound as a root descriptor table
    pub gpu: GpuDescriptorHandle,
}

/// Index to handle translation over a shared descriptor heap
#[derive(Debug, Clone)]
pub struct SlotTable {
    heap: DescriptorHeapId,
    cpu_base: CpuDescriptorHandle,
    gpu_base: GpuDescriptorHandle,
    increment: u32,
    capacity: u32,
}

impl SlotTable {
    /// Build a table of `capacity` object slots over `heap`
    ///
    /// The heap must hold `capacity + 1` entries (object slots plus the shared
    /// slot).
    pub fn new(heap: &DescriptorHeapDesc, increment: u32, capacity: u32) -> RenderResult<Self> {
        let required = required_heap_entries(capacity)?;

        if heap.capacity < required {
            return Err(RenderError::HeapTooSmall {
                required,
                available: heap.capacity,
            });
        }

        if increment == 0 {
            return Err(RenderError::ResourceCreation(
                "descriptor increment size is zero".to_string(),
            ));
        }

        Ok(Self {
            heap: heap.id,
            cpu_base: heap.cpu_base,
            gpu_base: heap.gpu_base,
            increment,
            capacity,
        })
    }

    /// Build a table over the device's heap, querying the increment size once
    pub fn from_device<D: GpuDevice>(device: &D, capacity: u32) -> RenderResult<Self> {
        let table = Self::new(
            &device.descriptor_heap(),
            device.descriptor_increment_size(),
            capacity,
        )?;
        log::debug!(
            "Descriptor slot table: {} object slots + 1 shared, stride {} bytes",
            table.capacity,
            table.increment
        );
        Ok(table)
    }

    /// Number of object slots
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Descriptor stride in bytes
    pub fn increment(&self) -> u32 {
        self.increment
    }

    /// Heap the handles point into
    pub fn heap(&self) -> DescriptorHeapId {
        self.heap
    }

    /// Handles of object slot `index`
    pub fn slot(&self, index: u32) -> RenderResult<DescriptorSlot> {
        if index >= self.capacity {
            return Err(RenderError::SlotOutOfRange {
                index,
                capacity: self.capacity,
            });
        }
        Ok(self.entry(index))
    }

    /// CPU handle of object slot `index`
    pub fn cpu_handle(&self, index: u32) -> RenderResult<CpuDescriptorHandle> {
        self.slot(index).map(|slot| slot.cpu)
    }

    /// GPU handle of object slot `index`
    pub fn gpu_handle(&self, index: u32) -> RenderResult<GpuDescriptorHandle> {
        self.slot(index).map(|slot| slot.gpu)
    }

    /// The slot reserved for the shared resource, at index `capacity`
    pub fn shared_slot(&self) -> DescriptorSlot {
        self.entry(self.capacity)
    }

    fn entry(&self, index: u32) -> DescriptorSlot {
        let offset = u64::from(index) * u64::from(self.increment);
        DescriptorSlot {
            index,
            cpu: self.cpu_base.offset(offset),
            gpu: self.gpu_base.offset(offset),
        }
    }
}
