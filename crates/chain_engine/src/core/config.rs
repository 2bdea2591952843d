//! # Unified Configuration System
//!
//! Configuration for the renderer, the sample scene and engine-wide settings
//! such as logging. Every structure is serde-serializable and can be loaded
//! from TOML or RON through the [`Config`] trait; missing fields fall back to
//! their defaults so partial files are accepted.
//!
//! ## Configuration Categories
//!
//! - **Renderer Config**: surface size, descriptor heap layout, synchronization
//! - **Scene Config**: the linked object chain and its camera
//! - **Application Config**: top-level container plus log level

use serde::{Deserialize, Serialize};

pub use crate::config::{Config, ConfigError};
use crate::render::descriptors::MAX_DESCRIPTOR_HEAP_ENTRIES;

/// # Renderer Configuration
///
/// Sizing of the presentation surface and descriptor heap, and the bounds the
/// frame submission pipeline uses when synchronizing with the GPU.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Backbuffer width in pixels
    pub width: u32,
    /// Backbuffer height in pixels
    pub height: u32,
    /// Number of per-object descriptor slots (the heap holds one more for the shared texture)
    pub descriptor_capacity: u32,
    /// Descriptor stride in bytes reported by the emulated device
    pub descriptor_increment: u32,
    /// Minimum uniform buffer alignment in bytes
    pub uniform_alignment: u64,
    /// Render target clear color (RGBA)
    pub clear_color: [f32; 4],
    /// Present sync interval
    pub sync_interval: u32,
    /// Upper bound on a single fence wait; `None` waits forever
    pub fence_timeout_ms: Option<u64>,
    /// Simulated execution time per submitted batch in the headless backend
    pub gpu_latency_us: u64,
}

impl RendererConfig {
    /// Aspect ratio of the backbuffer
    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }

    /// Fence wait bound as a `Duration`
    pub fn fence_timeout(&self) -> Option<std::time::Duration> {
        self.fence_timeout_ms.map(std::time::Duration::from_millis)
    }

    /// Set the fence wait bound
    pub fn with_fence_timeout_ms(mut self, timeout_ms: Option<u64>) -> Self {
        self.fence_timeout_ms = timeout_ms;
        self
    }

    /// Set the number of per-object descriptor slots
    pub fn with_descriptor_capacity(mut self, capacity: u32) -> Self {
        self.descriptor_capacity = capacity;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "surface size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }

        if self.descriptor_capacity == 0 {
            return Err(ConfigError::Invalid(
                "descriptor capacity must be at least 1".to_string(),
            ));
        }

        if self.descriptor_capacity >= MAX_DESCRIPTOR_HEAP_ENTRIES {
            return Err(ConfigError::Invalid(format!(
                "descriptor capacity {} plus the shared slot exceeds the {} entry heap limit",
                self.descriptor_capacity, MAX_DESCRIPTOR_HEAP_ENTRIES
            )));
        }

        if self.descriptor_increment == 0 {
            return Err(ConfigError::Invalid(
                "descriptor increment must be non-zero".to_string(),
            ));
        }

        if !self.uniform_alignment.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "uniform alignment {} is not a power of two",
                self.uniform_alignment
            )));
        }

        if self.fence_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "fence timeout of 0 ms can never be met; use None to wait indefinitely".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            descriptor_capacity: 128,
            descriptor_increment: 32,
            uniform_alignment: 256,
            clear_color: [0.1, 0.25, 0.5, 0.0],
            sync_interval: 1,
            fence_timeout_ms: Some(5000),
            gpu_latency_us: 0,
        }
    }
}

/// # Scene Configuration
///
/// Describes the sample scene: a chain of `object_count` nodes where every
/// node after the first is linked to its predecessor by the same local
/// scale, rotation and offset. Also carries the camera used to view it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Number of nodes in the chain
    pub object_count: u32,
    /// Uniform scale of each link relative to its parent
    pub link_scale: f32,
    /// Euler rotation (degrees) of each link relative to its parent
    pub link_rotation_deg: [f32; 3],
    /// Translation of each link relative to its parent
    pub link_offset: [f32; 3],
    /// Camera position
    pub camera_eye: [f32; 3],
    /// Camera look-at target
    pub camera_target: [f32; 3],
    /// Vertical field of view in degrees
    pub fov_deg: f32,
    /// Near clip plane
    pub near: f32,
    /// Far clip plane
    pub far: f32,
    /// Tint written into every node's uniform payload
    pub tint: [f32; 4],
}

impl SceneConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.object_count == 0 {
            return Err(ConfigError::Invalid(
                "scene needs at least one object".to_string(),
            ));
        }

        if self.near <= 0.0 || self.near >= self.far {
            return Err(ConfigError::Invalid(format!(
                "clip planes must satisfy 0 < near < far, got near={} far={}",
                self.near, self.far
            )));
        }

        if !(self.fov_deg > 0.0 && self.fov_deg < 180.0) {
            return Err(ConfigError::Invalid(format!(
                "field of view must be in (0, 180) degrees, got {}",
                self.fov_deg
            )));
        }

        Ok(())
    }
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            object_count: 30,
            link_scale: 0.9,
            link_rotation_deg: [0.0, 0.0, 30.0],
            link_offset: [0.0, 0.0, -8.0],
            camera_eye: [0.0, 0.0, -100.0],
            camera_target: [0.0, 0.0, 0.0],
            fov_deg: 60.0,
            near: 0.1,
            far: 1000.0,
            tint: [1.0, 1.0, 1.0, 1.0],
        }
    }
}

/// # Complete Application Configuration
///
/// Top-level configuration that encompasses all engine subsystems.
/// This is the main configuration structure applications should use.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Default log filter, overridden by `RUST_LOG`
    pub log_level: String,
    /// Rendering system configuration
    pub renderer: RendererConfig,
    /// Sample scene configuration
    pub scene: SceneConfig,
}

impl ApplicationConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.renderer.validate()?;
        self.scene.validate()?;

        if self.scene.object_count > self.renderer.descriptor_capacity {
            return Err(ConfigError::Invalid(format!(
                "{} objects do not fit in {} descriptor slots",
                self.scene.object_count, self.renderer.descriptor_capacity
            )));
        }

        Ok(())
    }
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            renderer: RendererConfig::default(),
            scene: SceneConfig::default(),
        }
    }
}

impl Config for ApplicationConfig {}
