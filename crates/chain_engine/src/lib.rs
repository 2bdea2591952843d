//! # Chain Engine
//!
//! Transform hierarchy and fence-synchronized frame submission.
//!
//! ## Features
//!
//! - **Scene hierarchy**: transform nodes in a topologically ordered arena,
//!   each owning a uniform buffer and a descriptor slot
//! - **Descriptor slots**: fixed-capacity index to handle translation
//! - **Frame pipeline**: one frame in flight, a fence wait every frame,
//!   double-buffered presentation
//! - **Backend seam**: device, command list, queue, fence and swapchain
//!   traits, with a headless backend that executes on a worker thread
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chain_engine::prelude::*;
//!
//! fn main() -> Result<(), AppError> {
//!     let config = ApplicationConfig::default();
//!     let mut engine = Engine::headless(&config)?;
//!     let mut app = ObjectControlApp::new(NodeId::ROOT);
//!     let mut input = ScriptedInput::default().hold(&[KeyCode::Up], 10);
//!     engine.run(&mut app, &mut input)
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod core;
pub mod foundation;
pub mod input;
pub mod render;
pub mod scene;

mod application;
mod engine;

pub use application::{AppError, Application, ObjectControlApp};
pub use engine::Engine;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        core::config::{ApplicationConfig, Config, RendererConfig, SceneConfig},
        foundation::{
            math::{Mat4, Vec3},
            time::{Stopwatch, Timer},
        },
        input::{InputSnapshot, InputSource, KeyCode, KeyboardState, ObjectControls, ScriptedInput},
        render::{
            backends::headless::{HeadlessBackend, HeadlessDevice, HeadlessGpu},
            Camera, FramePhase, FrameReport, FrameStats, FrameSubmissionPipeline, RenderError,
            SlotTable,
        },
        scene::{LocalTransform, NodeId, Scene, SceneBuilder, SceneError},
        AppError, Application, Engine, ObjectControlApp,
    };
}
