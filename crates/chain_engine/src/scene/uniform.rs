//! Per-node constant buffer contents

use bytemuck::{Pod, Zeroable};

use crate::foundation::math::{utils, Mat4, Mat4Ext};

/// Data written into a node's uniform buffer every frame
///
/// Layout matches the shader constant buffer: an RGBA tint followed by the
/// column-major model-view-projection matrix.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UniformPayload {
    /// RGBA tint
    pub color: [f32; 4],
    /// Model-view-projection, column-major
    pub mvp: [[f32; 4]; 4],
}

impl UniformPayload {
    /// Payload size before alignment
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// Build a payload from a tint and an MVP matrix
    pub fn new(color: [f32; 4], mvp: &Mat4) -> Self {
        Self {
            color,
            mvp: mvp.to_cols_array(),
        }
    }

    /// Buffer size once rounded up to the device's uniform alignment
    pub fn aligned_size(alignment: u64) -> u64 {
        utils::align_up(Self::SIZE, alignment)
    }

    /// MVP as a matrix
    pub fn mvp_matrix(&self) -> Mat4 {
        Mat4::from(self.mvp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec3;

    #[test]
    fn test_payload_layout() {
        assert_eq!(UniformPayload::SIZE, 80);
        assert_eq!(UniformPayload::aligned_size(256), 256);
    }

    #[test]
    fn test_color_precedes_matrix_in_bytes() {
        let mvp = Mat4::translation(&Vec3::new(4.0, 5.0, 6.0));
        let payload = UniformPayload::new([0.25, 0.5, 0.75, 1.0], &mvp);
        let floats: &[f32] = bytemuck::cast_slice(bytemuck::bytes_of(&payload));

        assert_eq!(&floats[..4], &[0.25, 0.5, 0.75, 1.0]);
        // translation column is the last 4 floats
        assert_eq!(&floats[16..20], &[4.0, 5.0, 6.0, 1.0]);
        assert_eq!(payload.mvp_matrix(), mvp);
    }
}
