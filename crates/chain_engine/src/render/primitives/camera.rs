//! # 3D Camera System
//!
//! Left-handed look-at camera with a [0, 1] depth perspective projection, the
//! convention expected by the constant buffers the frame pipeline uploads.

use crate::core::config::SceneConfig;
use crate::foundation::math::{utils, Mat4, Mat4Ext, Vec3};

/// Perspective camera producing view and projection matrices
#[derive(Debug, Clone)]
pub struct Camera {
    /// Camera position in world space
    pub position: Vec3,

    /// Point the camera looks at
    pub target: Vec3,

    /// Up direction
    pub up: Vec3,

    /// Vertical field of view in radians
    pub fov: f32,

    /// Width / height
    pub aspect: f32,

    /// Near clip plane
    pub near: f32,

    /// Far clip plane
    pub far: f32,
}

impl Camera {
    /// Create a perspective camera looking at the origin
    pub fn perspective(position: Vec3, fov_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            position,
            target: Vec3::zeros(),
            up: Vec3::new(0.0, 1.0, 0.0),
            fov: utils::deg_to_rad(fov_degrees),
            aspect,
            near,
            far,
        }
    }

    /// Build the camera described by a scene configuration
    pub fn from_scene_config(config: &SceneConfig, aspect: f32) -> Self {
        let mut camera = Self::perspective(
            Vec3::from(config.camera_eye),
            config.fov_deg,
            aspect,
            config.near,
            config.far,
        );
        camera.target = Vec3::from(config.camera_target);
        camera
    }

    /// Point the camera at a new target
    pub fn look_at(&mut self, target: Vec3, up: Vec3) {
        self.target = target;
        self.up = up;
        log::trace!("Camera look_at updated - target: {:?}, up: {:?}", target, up);
    }

    /// Update the aspect ratio after a surface resize
    pub fn set_aspect_ratio(&mut self, aspect: f32) {
        if (self.aspect - aspect).abs() > 0.01 {
            log::info!("Camera aspect ratio changed: {:.3} -> {:.3}", self.aspect, aspect);
        }
        self.aspect = aspect;
    }

    /// World to view transform
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::view_look_at_lh(&self.position, &self.target, &self.up)
    }

    /// View to clip transform
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_fov_lh(self.fov, self.aspect, self.near, self.far)
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::from_scene_config(&SceneConfig::default(), 1280.0 / 720.0)
    }
}
