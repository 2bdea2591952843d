//! Descriptor slot management
//!
//! Object descriptors live in one fixed-capacity, shader-visible heap. Slots
//! are assigned by direct index computation at scene build time and never
//! reclaimed.

pub mod slot_table;

pub use slot_table::{
    required_heap_entries, DescriptorSlot, SlotTable, MAX_DESCRIPTOR_HEAP_ENTRIES,
};
