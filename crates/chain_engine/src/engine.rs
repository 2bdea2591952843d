//! Core engine implementation

use crate::application::{AppError, Application};
use crate::core::config::ApplicationConfig;
use crate::foundation::time::Timer;
use crate::input::InputSource;
use crate::render::api::{FrameBackend, GpuDevice};
use crate::render::backends::headless::{HeadlessBackend, HeadlessDevice, HeadlessGpu};
use crate::render::frame::{FrameReport, FrameSubmissionPipeline};
use crate::render::primitives::Camera;
use crate::scene::Scene;

/// Main engine struct
///
/// Owns the scene, the frame pipeline and the camera, and runs the loop:
/// poll input, let the application react, render, advance the timer.
pub struct Engine<D: GpuDevice, B: FrameBackend> {
    device: D,
    scene: Scene<D::Buffer>,
    pipeline: FrameSubmissionPipeline<B>,
    camera: Camera,
    timer: Timer,
    running: bool,
    last_report: Option<FrameReport>,
}

impl Engine<HeadlessDevice, HeadlessBackend> {
    /// Build the headless GPU, the chain scene and the pipeline from config
    pub fn headless(config: &ApplicationConfig) -> Result<Self, AppError> {
        config.validate()?;

        let gpu = HeadlessGpu::create(&config.renderer).map_err(|e| {
            log::error!("Failed to create headless GPU: {}", e);
            e
        })?;
        let scene = Scene::chain(&gpu.device, &gpu.slots, &config.scene)?;
        let pipeline =
            FrameSubmissionPipeline::new(gpu.resources, gpu.targets, gpu.draw, &config.renderer)?;
        let camera = Camera::from_scene_config(&config.scene, config.renderer.aspect_ratio());

        Ok(Self::new(gpu.device, scene, pipeline, camera))
    }
}

impl<D: GpuDevice, B: FrameBackend> Engine<D, B> {
    /// Assemble an engine from already-created parts
    pub fn new(
        device: D,
        scene: Scene<D::Buffer>,
        pipeline: FrameSubmissionPipeline<B>,
        camera: Camera,
    ) -> Self {
        Self {
            device,
            scene,
            pipeline,
            camera,
            timer: Timer::new(),
            running: true,
            last_report: None,
        }
    }

    /// Run the main loop until quit or a fatal error
    ///
    /// `cleanup` runs either way. After a clean exit the queue is drained
    /// before returning.
    pub fn run<A, I>(&mut self, app: &mut A, input: &mut I) -> Result<(), AppError>
    where
        A: Application<D, B>,
        I: InputSource,
    {
        app.initialize(self)?;

        log::info!("Starting main loop...");
        let result = self.main_loop(app, input);
        app.cleanup(self);

        match result {
            Ok(()) => {
                self.pipeline.wait_for_idle()?;
                log::info!(
                    "Engine shutdown complete after {} frames ({:.1} fps, slowest frame {:?})",
                    self.pipeline.stats().frames,
                    self.timer.average_fps(),
                    self.timer.slowest_frame()
                );
                Ok(())
            }
            Err(e) => {
                log::error!("Main loop stopped: {}", e);
                Err(e)
            }
        }
    }

    fn main_loop<A, I>(&mut self, app: &mut A, input: &mut I) -> Result<(), AppError>
    where
        A: Application<D, B>,
        I: InputSource,
    {
        while self.running {
            let snapshot = input.poll();
            if snapshot.wants_quit() {
                self.quit();
                break;
            }

            app.update(self, &snapshot)?;
            if !self.running {
                break;
            }

            let view = self.camera.view_matrix();
            let projection = self.camera.projection_matrix();
            let report = self
                .pipeline
                .render_frame(&mut self.scene, &view, &projection)?;
            self.last_report = Some(report);
            self.timer.update();
        }
        Ok(())
    }

    /// Request engine shutdown
    pub fn quit(&mut self) {
        log::info!("Engine shutdown requested");
        self.running = false;
    }

    /// Whether the loop will run another frame
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Device the scene's buffers came from
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Scene
    pub fn scene(&self) -> &Scene<D::Buffer> {
        &self.scene
    }

    /// Scene, mutably
    pub fn scene_mut(&mut self) -> &mut Scene<D::Buffer> {
        &mut self.scene
    }

    /// Frame pipeline
    pub fn pipeline(&self) -> &FrameSubmissionPipeline<B> {
        &self.pipeline
    }

    /// Frame pipeline, mutably
    pub fn pipeline_mut(&mut self) -> &mut FrameSubmissionPipeline<B> {
        &mut self.pipeline
    }

    /// Camera
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Camera, mutably
    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    /// Frame timing
    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    /// Report of the most recent frame
    pub fn last_report(&self) -> Option<&FrameReport> {
        self.last_report.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ObjectControlApp;
    use crate::input::{KeyCode, ScriptedInput};
    use crate::render::api::Fence;
    use crate::render::frame::FramePhase;
    use crate::render::RenderError;
    use crate::scene::NodeId;
    use approx::assert_relative_eq;

    const EPSILON: f32 = 1e-4;

    fn config(object_count: u32) -> ApplicationConfig {
        let mut config = ApplicationConfig::default();
        config.renderer.descriptor_capacity = 8;
        config.scene.object_count = object_count;
        config
    }

    #[test]
    fn test_run_applies_input_and_renders_each_frame() {
        let mut engine = Engine::headless(&config(3)).unwrap();
        let mut app = ObjectControlApp::new(NodeId(0));
        let mut input = ScriptedInput::default()
            .hold(&[KeyCode::Up], 2)
            .hold(&[KeyCode::Right, KeyCode::D], 3);

        engine.run(&mut app, &mut input).unwrap();

        assert!(!engine.is_running());
        assert_eq!(app.frames(), 5);
        assert_eq!(engine.pipeline().stats().frames, 5);
        assert_eq!(engine.timer().frame_count(), 5);
        assert!(engine.timer().elapsed() >= engine.timer().slowest_frame());

        let root = engine.scene().node(NodeId(0)).unwrap();
        assert_relative_eq!(root.local.position.y, 2.0, epsilon = EPSILON);
        assert_relative_eq!(root.local.position.x, 3.0, epsilon = EPSILON);
        assert_relative_eq!(root.local.rotation_deg.y, 3.0, epsilon = EPSILON);

        // five frames plus the drain on shutdown
        assert_eq!(engine.pipeline().resources().fence.completed_value(), 6);
        assert_eq!(engine.device().draws().len(), 15);
    }

    #[test]
    fn test_space_tints_clear_color_for_that_frame_only() {
        let mut engine = Engine::headless(&config(1)).unwrap();
        let base = engine.pipeline().base_clear_color();
        let mut app = ObjectControlApp::new(NodeId(0));
        let mut input = ScriptedInput::default().hold(&[KeyCode::Space], 1).idle(1);

        engine.run(&mut app, &mut input).unwrap();

        let clears = engine.device().clears();
        assert_eq!(clears.len(), 2);
        assert_eq!(clears[0].color[1], 1.0);
        assert_eq!(clears[1].color, base);
    }

    #[test]
    fn test_missing_target_fails_initialization() {
        let mut engine = Engine::headless(&config(2)).unwrap();
        let mut app = ObjectControlApp::new(NodeId(5));
        let mut input = ScriptedInput::default().idle(1);

        assert!(matches!(engine.run(&mut app, &mut input), Err(AppError::Custom(_))));
        assert_eq!(engine.pipeline().stats().frames, 0);
    }

    #[test]
    fn test_gpu_hang_surfaces_as_render_error() {
        let mut config = config(2);
        config.renderer.fence_timeout_ms = Some(50);
        let mut engine = Engine::headless(&config).unwrap();
        engine.device().set_stalled(true);

        let mut app = ObjectControlApp::new(NodeId(0));
        let mut input = ScriptedInput::default().idle(3);
        let err = engine.run(&mut app, &mut input).unwrap_err();

        assert!(matches!(err, AppError::Render(RenderError::FenceTimeout { .. })));
        assert_eq!(engine.pipeline().phase(), FramePhase::Faulted);
        assert_eq!(app.frames(), 1);
    }

    #[test]
    fn test_invalid_config_is_rejected_before_setup() {
        let mut config = config(2);
        config.scene.object_count = 9;
        assert!(matches!(Engine::headless(&config), Err(AppError::Config(_))));
    }

    #[test]
    fn test_oversized_descriptor_heap_is_a_config_error() {
        let mut config = config(1);
        config.renderer.descriptor_capacity = u32::MAX - 1;
        assert!(matches!(Engine::headless(&config), Err(AppError::Config(_))));
    }
}
