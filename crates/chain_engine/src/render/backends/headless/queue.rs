//! Headless queue and GPU executor
//!
//! Submitted batches and fence signals are sent over a channel to a worker
//! thread that plays the GPU. The worker processes operations strictly in
//! submission order: it applies resource transitions, validates every draw
//! against the bound state, captures what each draw would have read, and
//! signals fences only after all earlier batches have finished.
//!
//! Any validation failure removes the device: later batches are ignored and
//! fences stop advancing, which the host observes as a fence timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytemuck::Pod;

use crate::render::api::{
    BackendResult, ClearFlags, CommandList, CommandQueue, CpuDescriptorHandle, DescriptorHeapId,
    GpuDescriptorHandle, IndexBufferView, PipelineHandle, PrimitiveTopology, ResourceId,
    ResourceState, RootSignatureHandle, ScissorRect, VertexBufferView, Viewport,
};
use crate::render::RenderError;

use super::commands::{GpuCommand, HeadlessCommandList};
use super::device::{DeviceMemory, HeapEntry};
use super::lock;
use super::sync::HeadlessFence;

/// What one executed draw bound and read
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    /// Color target written
    pub render_target: ResourceId,
    /// Heap index behind root table 0
    pub object_slot: u32,
    /// Heap index behind root table 1
    pub shared_slot: u32,
    /// Texture viewed through the shared slot
    pub texture: ResourceId,
    /// Indices drawn
    pub index_count: u32,
    /// Instances drawn
    pub instance_count: u32,
    /// Constant buffer bytes at execution time
    pub constants: Vec<u8>,
}

impl DrawRecord {
    /// Decode the start of the constant buffer as `T`
    pub fn payload<T: Pod>(&self) -> Option<T> {
        let bytes = self.constants.get(..std::mem::size_of::<T>())?;
        bytemuck::try_pod_read_unaligned(bytes).ok()
    }
}

/// An executed render-target clear
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearRecord {
    /// Cleared resource
    pub resource: ResourceId,
    /// Clear color
    pub color: [f32; 4],
}

/// GPU-side state shared by the executor, the swapchain and the device
#[derive(Debug, Default)]
pub(crate) struct GpuTimeline {
    pub(crate) states: HashMap<ResourceId, ResourceState>,
    pub(crate) draws: Vec<DrawRecord>,
    pub(crate) clears: Vec<ClearRecord>,
    pub(crate) last_depth_clear: Option<f32>,
    pub(crate) executed_batches: u64,
    pub(crate) device_error: Option<String>,
}

/// Switches the host can flip on the executor
#[derive(Debug, Default)]
pub(crate) struct ExecutorControl {
    stalled: AtomicBool,
}

impl ExecutorControl {
    pub(crate) fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::Release);
    }

    fn is_stalled(&self) -> bool {
        self.stalled.load(Ordering::Acquire)
    }
}

enum GpuOp {
    Execute {
        commands: Vec<GpuCommand>,
        pending: Arc<AtomicUsize>,
    },
    Signal {
        fence: HeadlessFence,
        value: u64,
    },
    Shutdown,
}

/// Direct command queue backed by an executor thread
pub struct HeadlessQueue {
    ops: Sender<GpuOp>,
    worker: Option<JoinHandle<()>>,
    timeline: Arc<Mutex<GpuTimeline>>,
    submitted: u64,
}

impl HeadlessQueue {
    pub(crate) fn spawn(
        memory: Arc<Mutex<DeviceMemory>>,
        timeline: Arc<Mutex<GpuTimeline>>,
        control: Arc<ExecutorControl>,
        latency: Duration,
    ) -> BackendResult<Self> {
        let (ops, receiver) = mpsc::channel();
        let executor = Executor {
            memory,
            timeline: Arc::clone(&timeline),
            control,
            latency,
        };

        let worker = thread::Builder::new()
            .name("headless-gpu".to_string())
            .spawn(move || executor.run(receiver))
            .map_err(|e| RenderError::Backend(format!("failed to start GPU executor: {}", e)))?;

        Ok(Self {
            ops,
            worker: Some(worker),
            timeline,
            submitted: 0,
        })
    }

    /// Batches submitted so far
    pub fn submitted_batches(&self) -> u64 {
        self.submitted
    }

    fn check_device(&self) -> BackendResult<()> {
        match &lock(&self.timeline).device_error {
            Some(reason) => Err(RenderError::Backend(format!("device removed: {}", reason))),
            None => Ok(()),
        }
    }

    fn send(&self, op: GpuOp) -> BackendResult<()> {
        self.ops
            .send(op)
            .map_err(|_| RenderError::Backend("GPU executor has shut down".to_string()))
    }
}

impl CommandQueue for HeadlessQueue {
    type List = HeadlessCommandList;
    type Fence = HeadlessFence;

    fn execute(&mut self, list: &HeadlessCommandList) -> BackendResult<()> {
        if list.is_recording() {
            return Err(RenderError::CommandListState(
                "cannot execute a command list that is still recording".to_string(),
            ));
        }
        self.check_device()?;

        let (commands, pending) = list.submission();
        pending.fetch_add(1, Ordering::AcqRel);
        if let Err(e) = self.send(GpuOp::Execute {
            commands,
            pending: Arc::clone(&pending),
        }) {
            pending.fetch_sub(1, Ordering::AcqRel);
            return Err(e);
        }
        self.submitted += 1;
        Ok(())
    }

    fn signal(&mut self, fence: &HeadlessFence, value: u64) -> BackendResult<()> {
        self.check_device()?;
        self.send(GpuOp::Signal {
            fence: fence.clone(),
            value,
        })
    }
}

impl Drop for HeadlessQueue {
    fn drop(&mut self) {
        let _ = self.ops.send(GpuOp::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Headless GPU executor panicked");
            }
        }
    }
}

struct Executor {
    memory: Arc<Mutex<DeviceMemory>>,
    timeline: Arc<Mutex<GpuTimeline>>,
    control: Arc<ExecutorControl>,
    latency: Duration,
}

impl Executor {
    fn run(self, ops: Receiver<GpuOp>) {
        while let Ok(op) = ops.recv() {
            match op {
                GpuOp::Execute { commands, pending } => {
                    if self.control.is_stalled() {
                        // a hung GPU never finishes the batch
                        log::trace!("GPU stalled, batch of {} commands never completes", commands.len());
                        continue;
                    }
                    if !self.latency.is_zero() {
                        thread::sleep(self.latency);
                    }
                    self.execute(&commands);
                    pending.fetch_sub(1, Ordering::AcqRel);
                }
                GpuOp::Signal { fence, value } => {
                    if self.control.is_stalled() || lock(&self.timeline).device_error.is_some() {
                        continue;
                    }
                    fence.signal(value);
                }
                GpuOp::Shutdown => break,
            }
        }
    }

    fn execute(&self, commands: &[GpuCommand]) {
        let memory = lock(&self.memory);
        let mut timeline = lock(&self.timeline);
        if timeline.device_error.is_some() {
            return;
        }

        match execute_batch(commands, &memory, &mut timeline) {
            Ok(()) => timeline.executed_batches += 1,
            Err(reason) => {
                log::error!("Headless GPU removed: {}", reason);
                timeline.device_error = Some(reason);
            }
        }
    }
}

#[derive(Default)]
struct BoundState {
    render_targets: Vec<ResourceId>,
    depth_stencil: Option<ResourceId>,
    pipeline: Option<PipelineHandle>,
    root_signature: Option<RootSignatureHandle>,
    viewport: Option<Viewport>,
    scissor: Option<ScissorRect>,
    topology: Option<PrimitiveTopology>,
    vertex_buffer: Option<VertexBufferView>,
    index_buffer: Option<IndexBufferView>,
    heap: Option<DescriptorHeapId>,
    tables: HashMap<u32, GpuDescriptorHandle>,
}

fn resolve_view(memory: &DeviceMemory, view: CpuDescriptorHandle) -> Result<ResourceId, String> {
    memory
        .target_views
        .get(&view)
        .copied()
        .ok_or_else(|| format!("unknown target view {:#x}", view.0))
}

fn require_state(
    timeline: &GpuTimeline,
    resource: ResourceId,
    expected: ResourceState,
) -> Result<(), String> {
    match timeline.states.get(&resource) {
        Some(state) if *state == expected => Ok(()),
        Some(state) => Err(format!(
            "resource {} used as {:?} while in {:?}",
            resource.0, expected, state
        )),
        None => Err(format!("unknown resource {}", resource.0)),
    }
}

fn execute_batch(
    commands: &[GpuCommand],
    memory: &DeviceMemory,
    timeline: &mut GpuTimeline,
) -> Result<(), String> {
    let mut bound = BoundState::default();

    for command in commands {
        match command {
            GpuCommand::ResourceBarrier(barriers) => {
                for barrier in barriers {
                    require_state(timeline, barrier.resource, barrier.before)
                        .map_err(|e| format!("barrier: {}", e))?;
                    timeline.states.insert(barrier.resource, barrier.after);
                }
            }
            GpuCommand::SetRenderTargets {
                render_targets,
                depth_stencil,
            } => {
                bound.render_targets = render_targets
                    .iter()
                    .map(|rtv| resolve_view(memory, *rtv))
                    .collect::<Result<_, _>>()?;
                bound.depth_stencil = depth_stencil
                    .map(|dsv| resolve_view(memory, dsv))
                    .transpose()?;
            }
            GpuCommand::ClearRenderTarget { rtv, color } => {
                let resource = resolve_view(memory, *rtv)?;
                require_state(timeline, resource, ResourceState::RenderTarget)?;
                timeline.clears.push(ClearRecord {
                    resource,
                    color: *color,
                });
            }
            GpuCommand::ClearDepthStencil {
                dsv, flags, depth, ..
            } => {
                let resource = resolve_view(memory, *dsv)?;
                require_state(timeline, resource, ResourceState::DepthWrite)?;
                if flags.contains(ClearFlags::DEPTH) {
                    timeline.last_depth_clear = Some(*depth);
                }
            }
            GpuCommand::SetPipelineState(pipeline) => bound.pipeline = Some(*pipeline),
            GpuCommand::SetRootSignature(root_signature) => {
                bound.root_signature = Some(*root_signature);
                bound.tables.clear();
            }
            GpuCommand::SetViewport(viewport) => bound.viewport = Some(*viewport),
            GpuCommand::SetScissorRect(rect) => bound.scissor = Some(*rect),
            GpuCommand::SetPrimitiveTopology(topology) => bound.topology = Some(*topology),
            GpuCommand::SetVertexBuffer(view) => bound.vertex_buffer = Some(*view),
            GpuCommand::SetIndexBuffer(view) => bound.index_buffer = Some(*view),
            GpuCommand::SetDescriptorHeap(heap) => {
                if *heap != memory.heap_desc.id {
                    return Err(format!("unknown descriptor heap {}", heap.0));
                }
                bound.heap = Some(*heap);
            }
            GpuCommand::SetRootDescriptorTable { root_index, table } => {
                bound.tables.insert(*root_index, *table);
            }
            GpuCommand::DrawIndexed {
                index_count,
                instance_count,
                start_index,
                ..
            } => {
                let record = resolve_draw(
                    &bound,
                    memory,
                    timeline,
                    *index_count,
                    *instance_count,
                    *start_index,
                )?;
                timeline.draws.push(record);
            }
        }
    }

    Ok(())
}

fn resolve_draw(
    bound: &BoundState,
    memory: &DeviceMemory,
    timeline: &GpuTimeline,
    index_count: u32,
    instance_count: u32,
    start_index: u32,
) -> Result<DrawRecord, String> {
    if bound.pipeline.is_none() || bound.root_signature.is_none() {
        return Err("draw without pipeline state and root signature".to_string());
    }
    if bound.viewport.is_none() || bound.scissor.is_none() || bound.topology.is_none() {
        return Err("draw without viewport, scissor and topology".to_string());
    }
    if bound.vertex_buffer.is_none() {
        return Err("draw without a vertex buffer".to_string());
    }
    let index_buffer = bound
        .index_buffer
        .ok_or_else(|| "draw without an index buffer".to_string())?;
    if u64::from(start_index) + u64::from(index_count) > u64::from(index_buffer.index_count()) {
        return Err(format!(
            "draw of {} indices from {} overruns a {} index buffer",
            index_count,
            start_index,
            index_buffer.index_count()
        ));
    }
    if bound.heap.is_none() {
        return Err("draw without a descriptor heap".to_string());
    }

    let render_target = *bound
        .render_targets
        .first()
        .ok_or_else(|| "draw without a render target".to_string())?;
    require_state(timeline, render_target, ResourceState::RenderTarget)?;
    if let Some(depth) = bound.depth_stencil {
        require_state(timeline, depth, ResourceState::DepthWrite)?;
    }

    let table_entry = |root_index: u32| -> Result<(u32, HeapEntry), String> {
        let handle = bound
            .tables
            .get(&root_index)
            .ok_or_else(|| format!("root table {} not set", root_index))?;
        let index = memory
            .heap_index_gpu(*handle)
            .ok_or_else(|| format!("root table {} points outside the heap", root_index))?;
        let entry = memory.heap[index]
            .ok_or_else(|| format!("root table {} points at an empty descriptor", root_index))?;
        Ok((index as u32, entry))
    };

    let (object_slot, constants) = match table_entry(0)? {
        (slot, HeapEntry::ConstantBuffer { buffer, size }) => {
            let bytes = memory
                .buffers
                .get(buffer)
                .ok_or_else(|| format!("descriptor {} views a released buffer", slot))?;
            let len = (size as usize).min(bytes.len());
            (slot, bytes[..len].to_vec())
        }
        (slot, HeapEntry::ShaderResource(_)) => {
            return Err(format!("root table 0 expects a constant buffer, slot {} is a texture", slot))
        }
    };

    let (shared_slot, texture) = match table_entry(1)? {
        (slot, HeapEntry::ShaderResource(texture)) => (slot, texture),
        (slot, HeapEntry::ConstantBuffer { .. }) => {
            return Err(format!("root table 1 expects a texture, slot {} is a constant buffer", slot))
        }
    };

    Ok(DrawRecord {
        render_target,
        object_slot,
        shared_slot,
        texture,
        index_count,
        instance_count,
        constants,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RendererConfig;
    use crate::render::api::{Fence, GpuDevice, IndexFormat, ResourceBarrier, UniformBuffer};
    use crate::render::backends::headless::{HeadlessCommandList, HeadlessDevice};

    const WAIT: Option<Duration> = Some(Duration::from_secs(5));

    fn device() -> HeadlessDevice {
        HeadlessDevice::new(&RendererConfig::default().with_descriptor_capacity(4))
    }

    fn submit(queue: &mut HeadlessQueue, list: &mut HeadlessCommandList, fence: &HeadlessFence, value: u64) {
        list.close().unwrap();
        queue.execute(list).unwrap();
        queue.signal(fence, value).unwrap();
    }

    #[test]
    fn test_barriers_apply_in_order_before_signal() {
        let device = device();
        let target = device.create_resource(ResourceState::Present);
        let allocator = device.create_command_allocator();
        let mut list = device.create_command_list(&allocator);
        let mut queue = device.create_queue().unwrap();
        let fence = device.create_fence(0);

        list.resource_barrier(&[ResourceBarrier::transition(
            target,
            ResourceState::Present,
            ResourceState::RenderTarget,
        )])
        .unwrap();
        list.resource_barrier(&[ResourceBarrier::transition(
            target,
            ResourceState::RenderTarget,
            ResourceState::Present,
        )])
        .unwrap();
        submit(&mut queue, &mut list, &fence, 1);

        assert!(fence.wait_for(1, WAIT).unwrap());
        assert_eq!(device.resource_state(target), Some(ResourceState::Present));
        assert_eq!(device.executed_batches(), 1);
        assert_eq!(allocator.pending_batches(), 0);
    }

    #[test]
    fn test_clear_outside_render_target_state_removes_device() {
        let device = device();
        let target = device.create_resource(ResourceState::Present);
        let rtv = device.create_target_view(target);
        let allocator = device.create_command_allocator();
        let mut list = device.create_command_list(&allocator);
        let mut queue = device.create_queue().unwrap();
        let fence = device.create_fence(0);

        list.clear_render_target(rtv, [0.0; 4]).unwrap();
        submit(&mut queue, &mut list, &fence, 1);

        assert!(!fence.wait_for(1, Some(Duration::from_millis(100))).unwrap());
        assert!(device.device_error().is_some());
        assert!(device.clears().is_empty());
        assert!(matches!(queue.signal(&fence, 2), Err(RenderError::Backend(_))));
    }

    #[test]
    fn test_executing_open_list_is_rejected() {
        let device = device();
        let allocator = device.create_command_allocator();
        let list = device.create_command_list(&allocator);
        let mut queue = device.create_queue().unwrap();

        let err = queue.execute(&list).unwrap_err();
        assert!(matches!(err, RenderError::CommandListState(_)));
        assert_eq!(allocator.pending_batches(), 0);
        assert_eq!(queue.submitted_batches(), 0);
    }

    #[test]
    fn test_stalled_executor_keeps_batch_pending() {
        let device = device();
        let allocator = device.create_command_allocator();
        let mut list = device.create_command_list(&allocator);
        let mut queue = device.create_queue().unwrap();
        let fence = device.create_fence(0);

        device.set_stalled(true);
        submit(&mut queue, &mut list, &fence, 1);

        assert!(!fence.wait_for(1, Some(Duration::from_millis(50))).unwrap());
        assert_eq!(allocator.pending_batches(), 1);
        assert_eq!(fence.completed_value(), 0);
    }

    #[test]
    fn test_draw_captures_bound_tables_and_constants() {
        let device = device();
        let heap = device.descriptor_heap();
        let target = device.create_resource(ResourceState::RenderTarget);
        let texture = device.create_resource(ResourceState::PixelShaderResource);
        let geometry = device.create_resource(ResourceState::GenericRead);
        let rtv = device.create_target_view(target);

        let mut buffer = device.create_uniform_buffer(256).unwrap();
        buffer.map().unwrap().as_mut_bytes()[..4].copy_from_slice(&7.5f32.to_ne_bytes());
        device
            .create_constant_buffer_view(&buffer, heap.cpu_base.offset(32 * 2))
            .unwrap();
        device
            .create_shader_resource_view(texture, heap.cpu_base.offset(32 * 4))
            .unwrap();

        let allocator = device.create_command_allocator();
        let mut list = device.create_command_list(&allocator);
        let mut queue = device.create_queue().unwrap();
        let fence = device.create_fence(0);

        list.set_render_targets(&[rtv], None).unwrap();
        list.set_pipeline_state(PipelineHandle(1)).unwrap();
        list.set_root_signature(RootSignatureHandle(1)).unwrap();
        list.set_viewport(Viewport::full(64, 64)).unwrap();
        list.set_scissor_rect(ScissorRect::full(64, 64)).unwrap();
        list.set_primitive_topology(PrimitiveTopology::TriangleList).unwrap();
        list.set_vertex_buffer(VertexBufferView {
            buffer: geometry,
            size_in_bytes: 96,
            stride_in_bytes: 32,
        })
        .unwrap();
        list.set_index_buffer(IndexBufferView {
            buffer: geometry,
            size_in_bytes: 6,
            format: IndexFormat::U16,
        })
        .unwrap();
        list.set_descriptor_heap(heap.id).unwrap();
        list.set_root_descriptor_table(0, heap.gpu_base.offset(32 * 2)).unwrap();
        list.set_root_descriptor_table(1, heap.gpu_base.offset(32 * 4)).unwrap();
        list.draw_indexed(3, 1, 0, 0, 0).unwrap();
        submit(&mut queue, &mut list, &fence, 1);

        assert!(fence.wait_for(1, WAIT).unwrap());
        assert_eq!(device.device_error(), None);
        let draws = device.draws();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].render_target, target);
        assert_eq!(draws[0].object_slot, 2);
        assert_eq!(draws[0].shared_slot, 4);
        assert_eq!(draws[0].texture, texture);
        assert_eq!(draws[0].constants.len(), 256);
        assert_eq!(draws[0].payload::<f32>(), Some(7.5));
    }

    #[test]
    fn test_draw_without_geometry_removes_device() {
        let device = device();
        let target = device.create_resource(ResourceState::RenderTarget);
        let rtv = device.create_target_view(target);
        let allocator = device.create_command_allocator();
        let mut list = device.create_command_list(&allocator);
        let mut queue = device.create_queue().unwrap();
        let fence = device.create_fence(0);

        list.set_render_targets(&[rtv], None).unwrap();
        list.draw_indexed(36, 1, 0, 0, 0).unwrap();
        submit(&mut queue, &mut list, &fence, 1);

        assert!(!fence.wait_for(1, Some(Duration::from_millis(100))).unwrap());
        assert!(device.draws().is_empty());
        assert!(device.device_error().is_some());
    }
}
