//! Frame cycle tests against the headless backend

use approx::assert_relative_eq;

use super::*;
use crate::core::config::{RendererConfig, SceneConfig};
use crate::foundation::math::Mat4;
use crate::render::api::{CommandList, Fence, ResourceState};
use crate::render::backends::headless::{
    HeadlessBackend, HeadlessBuffer, HeadlessDevice, HeadlessGpu,
};
use crate::render::primitives::Camera;
use crate::render::{RenderError, RenderResult};
use crate::scene::{NodeId, Scene, UniformPayload};

const EPSILON: f32 = 1e-4;

struct Fixture {
    device: HeadlessDevice,
    scene: Scene<HeadlessBuffer>,
    pipeline: FrameSubmissionPipeline<HeadlessBackend>,
    view: Mat4,
    projection: Mat4,
    capacity: u32,
}

fn fixture_with(config: RendererConfig, object_count: u32) -> Fixture {
    let gpu = HeadlessGpu::create(&config).unwrap();
    let scene_config = SceneConfig {
        object_count,
        ..SceneConfig::default()
    };
    let scene = Scene::chain(&gpu.device, &gpu.slots, &scene_config).unwrap();
    let camera = Camera::from_scene_config(&scene_config, config.aspect_ratio());
    let pipeline =
        FrameSubmissionPipeline::new(gpu.resources, gpu.targets, gpu.draw, &config).unwrap();

    Fixture {
        device: gpu.device,
        scene,
        pipeline,
        view: camera.view_matrix(),
        projection: camera.projection_matrix(),
        capacity: config.descriptor_capacity,
    }
}

fn fixture(object_count: u32) -> Fixture {
    fixture_with(
        RendererConfig::default().with_descriptor_capacity(30),
        object_count,
    )
}

impl Fixture {
    fn frame(&mut self) -> RenderResult<FrameReport> {
        self.pipeline
            .render_frame(&mut self.scene, &self.view, &self.projection)
    }
}

#[test]
fn test_each_frame_advances_fence_by_one_and_alternates_backbuffer() {
    let mut fx = fixture(5);
    let mut previous = *fx.pipeline.state();

    for _ in 0..4 {
        let report = fx.frame().unwrap();
        let state = *fx.pipeline.state();

        assert_eq!(state.fence_value, previous.fence_value + 1);
        assert_eq!(report.fence_value, state.fence_value);
        assert_eq!(report.backbuffer_index, previous.backbuffer_index);
        assert_eq!(state.backbuffer_index, 1 - previous.backbuffer_index);
        assert_eq!(fx.pipeline.phase(), FramePhase::Idle);
        previous = state;
    }
}

#[test]
fn test_gpu_finishes_each_batch_before_allocator_reset() {
    let config = RendererConfig {
        gpu_latency_us: 2_000,
        ..RendererConfig::default().with_descriptor_capacity(30)
    };
    let mut fx = fixture_with(config, 5);

    for frame in 1..=3u64 {
        fx.frame().unwrap();
        let resources = fx.pipeline.resources();
        assert!(resources.fence.completed_value() >= frame);
        assert_eq!(resources.allocator.pending_batches(), 0);
        assert_eq!(resources.allocator.reset_count(), frame);
        assert!(resources.list.is_recording());
        assert_eq!(fx.device.executed_batches(), frame);
    }
    assert_eq!(fx.device.device_error(), None);
}

#[test]
fn test_draws_follow_scene_order_with_own_and_shared_slots() {
    let mut fx = fixture(5);
    let report = fx.frame().unwrap();
    assert_eq!(report.draw_count, 5);
    assert_eq!(report.uploads, 5);

    let draws = fx.device.draws();
    assert_eq!(draws.len(), 5);
    for (i, draw) in draws.iter().enumerate() {
        let node = fx.scene.node(NodeId(i)).unwrap();
        assert_eq!(draw.object_slot, node.slot().index);
        assert_eq!(draw.shared_slot, fx.capacity);
        assert_eq!(draw.instance_count, 1);

        let payload: UniformPayload = draw.payload().unwrap();
        assert_eq!(Some(&payload), node.uploaded_payload());
    }
}

#[test]
fn test_draw_reads_current_frame_uniforms() {
    let mut fx = fixture(2);
    fx.frame().unwrap();

    fx.scene.node_mut(NodeId(0)).unwrap().local.position.x += 5.0;
    fx.frame().unwrap();

    let draws = fx.device.draws();
    let expected = fx.projection * fx.view * fx.scene.node(NodeId(1)).unwrap().world_matrix();
    let payload: UniformPayload = draws[3].payload().unwrap();
    assert_relative_eq!(payload.mvp_matrix(), expected, epsilon = EPSILON);
}

#[test]
fn test_clear_color_override_applies_to_that_frame() {
    let mut fx = fixture(1);
    let base = fx.pipeline.base_clear_color();
    let mut green = base;
    green[1] = 1.0;

    fx.pipeline.set_clear_color(green);
    fx.frame().unwrap();
    fx.pipeline.set_clear_color(base);
    fx.frame().unwrap();

    let clears = fx.device.clears();
    assert_eq!(clears.len(), 2);
    assert_eq!(clears[0].color, green);
    assert_eq!(clears[1].color, base);
    assert_ne!(clears[0].resource, clears[1].resource);
}

#[test]
fn test_backbuffers_are_presentable_between_frames() {
    let mut fx = fixture(3);
    fx.frame().unwrap();
    fx.frame().unwrap();

    let swapchain = &fx.pipeline.resources().swapchain;
    assert_eq!(swapchain.present_count(), 2);
    for backbuffer in swapchain.backbuffers() {
        assert_eq!(fx.device.resource_state(backbuffer), Some(ResourceState::Present));
    }
}

#[test]
fn test_hung_gpu_times_out_and_faults_pipeline() {
    let config = RendererConfig::default()
        .with_descriptor_capacity(30)
        .with_fence_timeout_ms(Some(50));
    let mut fx = fixture_with(config, 3);
    fx.frame().unwrap();

    fx.device.set_stalled(true);
    let err = fx.frame().unwrap_err();
    assert!(matches!(err, RenderError::FenceTimeout { value: 2, completed: 1, .. }));
    assert_eq!(fx.pipeline.phase(), FramePhase::Faulted);

    // the allocator was never reset under the unfinished batch
    assert_eq!(fx.pipeline.resources().allocator.reset_count(), 1);
    assert_eq!(fx.pipeline.resources().allocator.pending_batches(), 1);

    assert!(matches!(fx.frame(), Err(RenderError::PipelineFaulted)));
    assert!(matches!(fx.pipeline.wait_for_idle(), Err(RenderError::PipelineFaulted)));
}

#[test]
fn test_failed_map_skips_upload_without_failing_frame() {
    let mut fx = fixture(3);
    fx.frame().unwrap();

    let node = fx.scene.node(NodeId(1)).unwrap();
    fx.device.set_map_failure(node.uniform_buffer(), true);
    let report = fx.frame().unwrap();

    assert_eq!(report.uploads, 2);
    assert_eq!(report.draw_count, 3);
    assert_eq!(fx.pipeline.stats().skipped_uploads, 1);

    let draws = fx.device.draws();
    assert_eq!(draws[4].constants, draws[1].constants);
}

#[test]
fn test_closed_list_faults_pipeline() {
    let mut fx = fixture(1);
    fx.pipeline.resources_mut().list.close().unwrap();

    let err = fx.frame().unwrap_err();
    assert!(matches!(err, RenderError::CommandListState(_)));
    assert_eq!(fx.pipeline.phase(), FramePhase::Faulted);
}

#[test]
fn test_wait_for_idle_drains_queue() {
    let mut fx = fixture(2);
    fx.frame().unwrap();
    fx.pipeline.wait_for_idle().unwrap();

    assert_eq!(fx.pipeline.state().fence_value, 2);
    assert_eq!(fx.pipeline.resources().fence.completed_value(), 2);
    assert_eq!(fx.pipeline.phase(), FramePhase::Idle);
}

#[test]
fn test_stats_accumulate() {
    let mut fx = fixture(4);
    for _ in 0..3 {
        fx.frame().unwrap();
    }
    let stats = fx.pipeline.stats();
    assert_eq!(stats.frames, 3);
    assert_eq!(stats.draws, 12);
    assert_eq!(stats.skipped_uploads, 0);
    assert!(stats.average_gpu_wait() <= stats.gpu_wait);
}

#[test]
fn test_new_rejects_missing_render_target_view() {
    let config = RendererConfig::default();
    let gpu = HeadlessGpu::create(&config).unwrap();
    let mut targets = gpu.targets.clone();
    targets.render_target_views.pop();

    let result = FrameSubmissionPipeline::<HeadlessBackend>::new(gpu.resources, targets, gpu.draw, &config);
    assert!(matches!(result, Err(RenderError::ResourceCreation(_))));
}
