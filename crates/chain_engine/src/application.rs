//! Application trait and lifecycle management

use thiserror::Error;

use crate::config::ConfigError;
use crate::engine::Engine;
use crate::input::{InputSnapshot, ObjectControls};
use crate::render::api::{FrameBackend, GpuDevice};
use crate::render::RenderError;
use crate::scene::{NodeId, SceneError};

/// Application lifecycle trait
///
/// Implement this to drive the scene from input. The engine calls `update`
/// once per frame, before the frame is rendered.
pub trait Application<D: GpuDevice, B: FrameBackend> {
    /// Called once before the first frame
    fn initialize(&mut self, engine: &mut Engine<D, B>) -> Result<(), AppError>;

    /// Called every frame with that frame's input
    fn update(&mut self, engine: &mut Engine<D, B>, input: &InputSnapshot) -> Result<(), AppError>;

    /// Called once after the loop ends, whether or not it failed
    fn cleanup(&mut self, engine: &mut Engine<D, B>);
}

/// Application-level errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Rendering failed
    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    /// Scene construction failed
    #[error("Scene error: {0}")]
    Scene(#[from] SceneError),

    /// Configuration could not be loaded or is invalid
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Custom application error
    #[error("Application error: {0}")]
    Custom(String),
}

/// Steers one node with the keyboard
///
/// Arrows and D/A/W/S move and turn the node; Space tints the frame's clear
/// color.
#[derive(Debug, Clone)]
pub struct ObjectControlApp {
    target: NodeId,
    controls: ObjectControls,
    frames: u64,
}

impl ObjectControlApp {
    /// Control `target` with the default key mapping
    pub fn new(target: NodeId) -> Self {
        Self {
            target,
            controls: ObjectControls::default(),
            frames: 0,
        }
    }

    /// Replace the key mapping
    pub fn with_controls(mut self, controls: ObjectControls) -> Self {
        self.controls = controls;
        self
    }

    /// Frames updated so far
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl<D: GpuDevice, B: FrameBackend> Application<D, B> for ObjectControlApp {
    fn initialize(&mut self, engine: &mut Engine<D, B>) -> Result<(), AppError> {
        if engine.scene().node(self.target).is_none() {
            return Err(AppError::Custom(format!(
                "controlled node {} is not in the scene",
                self.target.index()
            )));
        }
        log::info!(
            "Controlling node {} of {}",
            self.target.index(),
            engine.scene().len()
        );
        Ok(())
    }

    fn update(&mut self, engine: &mut Engine<D, B>, input: &InputSnapshot) -> Result<(), AppError> {
        let base = engine.pipeline().base_clear_color();
        let node = engine
            .scene_mut()
            .node_mut(self.target)
            .ok_or_else(|| AppError::Custom(format!("node {} vanished", self.target.index())))?;
        let clear_color = self.controls.apply(input, &mut node.local, base);
        engine.pipeline_mut().set_clear_color(clear_color);
        self.frames += 1;
        Ok(())
    }

    fn cleanup(&mut self, _engine: &mut Engine<D, B>) {
        log::debug!("Object control ran for {} frames", self.frames);
    }
}
