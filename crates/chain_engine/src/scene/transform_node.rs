//! Transform node: one renderable object in the hierarchy
//!
//! A node holds a local scale / rotation / position, an optional parent (an
//! index into the owning scene, never an owning pointer), its derived world
//! matrix and an exclusively owned uniform buffer bound to one descriptor slot.
//!
//! Matrices use nalgebra's column-vector convention, so the local transform
//! "scale, then rotate about Z, X, Y, then translate" reads right to left:
//!
//! ```text
//! local = T * Ry * Rx * Rz * S
//! world = parent_world * local
//! mvp   = projection * view * world
//! ```
//!
//! Uploaded column-major, this is the same memory image as the row-vector
//! product `S * Rz * Rx * Ry * T * parent` followed by `world * view * proj`.

use crate::foundation::math::{utils, Mat4, Mat4Ext, Vec3};
use crate::render::api::{CommandList, GpuDescriptorHandle, GpuDevice, UniformBuffer};
use crate::render::descriptors::{DescriptorSlot, SlotTable};
use crate::render::frame::DrawResources;
use crate::render::RenderResult;

use super::uniform::UniformPayload;
use super::NodeId;

/// Root parameter holding the per-object constant buffer table
pub const OBJECT_TABLE_ROOT_INDEX: u32 = 0;

/// Root parameter holding the shared texture table
pub const SHARED_TABLE_ROOT_INDEX: u32 = 1;

/// Local transform relative to the parent (or the world for roots)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalTransform {
    /// Per-axis scale
    pub scale: Vec3,
    /// Euler angles in degrees, applied Z then X then Y
    pub rotation_deg: Vec3,
    /// Translation
    pub position: Vec3,
}

impl Default for LocalTransform {
    fn default() -> Self {
        Self {
            scale: Vec3::new(1.0, 1.0, 1.0),
            rotation_deg: Vec3::zeros(),
            position: Vec3::zeros(),
        }
    }
}

impl LocalTransform {
    /// Identity transform
    pub fn identity() -> Self {
        Self::default()
    }

    /// Create from scale, rotation (degrees) and position
    pub fn new(scale: Vec3, rotation_deg: Vec3, position: Vec3) -> Self {
        Self {
            scale,
            rotation_deg,
            position,
        }
    }

    /// Rotation part, Z applied first and Y last
    pub fn rotation_matrix(&self) -> Mat4 {
        let rx = Mat4::rotation_x(utils::deg_to_rad(self.rotation_deg.x));
        let ry = Mat4::rotation_y(utils::deg_to_rad(self.rotation_deg.y));
        let rz = Mat4::rotation_z(utils::deg_to_rad(self.rotation_deg.z));
        ry * rx * rz
    }

    /// Local-to-parent matrix
    pub fn matrix(&self) -> Mat4 {
        Mat4::translation(&self.position) * self.rotation_matrix() * Mat4::scaling(&self.scale)
    }
}

/// A renderable node with its own uniform buffer and descriptor slot
pub struct TransformNode<B: UniformBuffer> {
    /// Local transform, freely editable between frames
    pub local: LocalTransform,
    /// Tint written into the uniform payload
    pub tint: [f32; 4],
    parent: Option<NodeId>,
    world: Mat4,
    uploaded: Option<UniformPayload>,
    slot: DescriptorSlot,
    buffer: B,
    pub(super) updated_epoch: u64,
}

impl<B: UniformBuffer> TransformNode<B> {
    /// Create the node's uniform buffer and bind it to object slot `index`
    ///
    /// Fails if the slot is out of range or the device refuses the buffer.
    pub fn initialize<D>(
        index: u32,
        device: &D,
        slots: &SlotTable,
        local: LocalTransform,
        parent: Option<NodeId>,
    ) -> RenderResult<Self>
    where
        D: GpuDevice<Buffer = B>,
    {
        let slot = slots.slot(index)?;
        let size = UniformPayload::aligned_size(device.uniform_alignment());
        let buffer = device.create_uniform_buffer(size)?;
        device.create_constant_buffer_view(&buffer, slot.cpu)?;

        log::trace!(
            "Node {} initialized: {} byte uniform buffer at {:#x}",
            index,
            buffer.size(),
            buffer.gpu_address()
        );

        Ok(Self {
            local,
            tint: [1.0, 1.0, 1.0, 1.0],
            parent,
            world: Mat4::identity(),
            uploaded: None,
            slot,
            buffer,
            updated_epoch: 0,
        })
    }

    /// Parent node, if any
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// World matrix computed by the last update
    pub fn world_matrix(&self) -> &Mat4 {
        &self.world
    }

    /// World-space origin of the node
    pub fn world_origin(&self) -> Vec3 {
        Vec3::new(self.world[(0, 3)], self.world[(1, 3)], self.world[(2, 3)])
    }

    /// Descriptor slot the node's constant buffer view lives in
    pub fn slot(&self) -> DescriptorSlot {
        self.slot
    }

    /// The node's uniform buffer
    pub fn uniform_buffer(&self) -> &B {
        &self.buffer
    }

    /// Payload most recently written to the uniform buffer
    pub fn uploaded_payload(&self) -> Option<&UniformPayload> {
        self.uploaded.as_ref()
    }

    /// Recompute the world matrix and upload the uniform payload
    ///
    /// `parent_world` must be the parent's matrix for the current frame. Returns
    /// whether the upload happened; a failed map keeps the previous payload in
    /// the buffer and is only logged.
    pub fn update(&mut self, parent_world: Option<&Mat4>, view: &Mat4, projection: &Mat4) -> bool {
        let local = self.local.matrix();
        self.world = match parent_world {
            Some(parent) => parent * local,
            None => local,
        };

        let mvp = projection * view * self.world;
        let payload = UniformPayload::new(self.tint, &mvp);

        match self.write_payload(&payload) {
            Ok(()) => {
                self.uploaded = Some(payload);
                true
            }
            Err(e) => {
                log::warn!(
                    "Skipping uniform upload for node in slot {}: {}",
                    self.slot.index,
                    e
                );
                false
            }
        }
    }

    fn write_payload(&mut self, payload: &UniformPayload) -> RenderResult<()> {
        let bytes = bytemuck::bytes_of(payload);
        let mut mapping = self.buffer.map()?;
        let size = mapping.as_mut_bytes().len();
        let dst = mapping.as_mut_bytes().get_mut(..bytes.len()).ok_or_else(|| {
            crate::render::RenderError::MapFailed(format!(
                "mapped range of {} bytes cannot hold a {} byte payload",
                size,
                bytes.len()
            ))
        })?;
        dst.copy_from_slice(bytes);
        Ok(())
    }

    /// Record this node's draw
    ///
    /// Binds geometry and the descriptor heap, points root table 0 at the
    /// node's slot and root table 1 at `shared_table`, then draws one instance.
    pub fn draw<L: CommandList>(
        &self,
        list: &mut L,
        shared_table: GpuDescriptorHandle,
        resources: &DrawResources,
    ) -> RenderResult<()> {
        list.set_vertex_buffer(resources.vertex_buffer)?;
        list.set_index_buffer(resources.index_buffer)?;
        list.set_descriptor_heap(resources.heap)?;
        list.set_root_descriptor_table(OBJECT_TABLE_ROOT_INDEX, self.slot.gpu)?;
        list.set_root_descriptor_table(SHARED_TABLE_ROOT_INDEX, shared_table)?;
        list.draw_indexed(resources.index_count, 1, 0, 0, 0)
    }
}
