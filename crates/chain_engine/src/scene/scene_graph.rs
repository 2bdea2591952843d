//! Scene container and builder
//!
//! The scene owns every [`TransformNode`] in one contiguous arena, stored in
//! topological order: a node's parent always has a smaller index. Updating
//! the arena front to back therefore evaluates parents before children.
//! Nodes are fixed once built; there is no runtime add or remove.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use thiserror::Error;

use crate::core::config::SceneConfig;
use crate::foundation::math::{Mat4, Vec3};
use crate::render::api::{CommandList, GpuDevice, UniformBuffer};
use crate::render::descriptors::SlotTable;
use crate::render::frame::DrawResources;
use crate::render::{RenderError, RenderResult};

use super::transform_node::{LocalTransform, TransformNode};

/// Index of a node in its scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// First node in update order; in the chain scene, the one steered by input
    pub const ROOT: NodeId = NodeId(0);

    /// Position in the scene's update order (also the node's descriptor slot)
    pub fn index(self) -> usize {
        self.0
    }
}

/// Scene construction errors
#[derive(Error, Debug)]
pub enum SceneError {
    /// Two nodes share a key
    #[error("Duplicate node key '{0}'")]
    DuplicateKey(String),

    /// A node names a parent that was never added
    #[error("Node '{child}' references unknown parent '{parent}'")]
    UnknownParent {
        /// Node with the dangling reference
        child: String,
        /// Missing parent key
        parent: String,
    },

    /// Parent references form a cycle
    #[error("Parent cycle involving node '{0}'")]
    Cycle(String),

    /// More nodes than descriptor slots
    #[error("Scene has {count} nodes but only {capacity} descriptor slots")]
    CapacityExceeded {
        /// Nodes requested
        count: usize,
        /// Object slots available
        capacity: u32,
    },

    /// A scene was requested with no nodes
    #[error("Scene must contain at least one node")]
    Empty,

    /// Resource creation for a node failed
    #[error(transparent)]
    Render(#[from] RenderError),
}

struct NodeDesc {
    key: String,
    parent: Option<String>,
    local: LocalTransform,
    tint: [f32; 4],
}

/// Collects node descriptions in any order and builds a topologically sorted scene
#[derive(Default)]
pub struct SceneBuilder {
    nodes: Vec<NodeDesc>,
    tint: Option<[f32; 4]>,
}

impl SceneBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Tint applied to nodes added after this call
    pub fn with_tint(mut self, tint: [f32; 4]) -> Self {
        self.tint = Some(tint);
        self
    }

    /// Add a root node
    pub fn with_node(self, key: impl Into<String>, local: LocalTransform) -> Self {
        self.push(key.into(), None, local)
    }

    /// Add a node parented to `parent`; the parent may be added later
    pub fn with_child(
        self,
        key: impl Into<String>,
        parent: impl Into<String>,
        local: LocalTransform,
    ) -> Self {
        self.push(key.into(), Some(parent.into()), local)
    }

    fn push(mut self, key: String, parent: Option<String>, local: LocalTransform) -> Self {
        let tint = self.tint.unwrap_or([1.0, 1.0, 1.0, 1.0]);
        self.nodes.push(NodeDesc {
            key,
            parent,
            local,
            tint,
        });
        self
    }

    /// Number of nodes added so far
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no node was added
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Parent-before-child order over the added nodes
    ///
    /// Among nodes whose parent is already placed, the one added first goes
    /// first, so an already ordered input keeps its order.
    fn sorted_order(&self) -> Result<Vec<usize>, SceneError> {
        let mut by_key = HashMap::with_capacity(self.nodes.len());
        for (i, node) in self.nodes.iter().enumerate() {
            if by_key.insert(node.key.as_str(), i).is_some() {
                return Err(SceneError::DuplicateKey(node.key.clone()));
            }
        }

        let mut children: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        let mut ready = BinaryHeap::new();
        for (i, node) in self.nodes.iter().enumerate() {
            match &node.parent {
                Some(parent) => {
                    let p = *by_key.get(parent.as_str()).ok_or_else(|| SceneError::UnknownParent {
                        child: node.key.clone(),
                        parent: parent.clone(),
                    })?;
                    children[p].push(i);
                }
                None => ready.push(Reverse(i)),
            }
        }

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(i)) = ready.pop() {
            order.push(i);
            ready.extend(children[i].iter().map(|&c| Reverse(c)));
        }

        if order.len() < self.nodes.len() {
            let mut placed = vec![false; self.nodes.len()];
            for &i in &order {
                placed[i] = true;
            }
            let stuck = placed.iter().position(|p| !p).unwrap_or(0);
            return Err(SceneError::Cycle(self.nodes[stuck].key.clone()));
        }

        Ok(order)
    }

    /// Sort the nodes and create their GPU resources
    ///
    /// The node at sorted position `i` receives descriptor slot `i`.
    pub fn build<D: GpuDevice>(
        self,
        device: &D,
        slots: &SlotTable,
    ) -> Result<Scene<D::Buffer>, SceneError> {
        if self.nodes.len() > slots.capacity() as usize {
            return Err(SceneError::CapacityExceeded {
                count: self.nodes.len(),
                capacity: slots.capacity(),
            });
        }

        let order = self.sorted_order()?;

        let mut position = vec![0usize; self.nodes.len()];
        for (sorted, &original) in order.iter().enumerate() {
            position[original] = sorted;
        }
        let by_key: HashMap<&str, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.key.as_str(), i))
            .collect();

        let mut nodes = Vec::with_capacity(order.len());
        let mut keys = Vec::with_capacity(order.len());
        for (sorted, &original) in order.iter().enumerate() {
            let desc = &self.nodes[original];
            let parent = desc
                .parent
                .as_deref()
                .and_then(|key| by_key.get(key))
                .map(|&p| NodeId(position[p]));

            let mut node =
                TransformNode::initialize(sorted as u32, device, slots, desc.local, parent)
                    .map_err(|e| {
                        log::error!("Failed to initialize node '{}': {}", desc.key, e);
                        e
                    })?;
            node.tint = desc.tint;
            nodes.push(node);
            keys.push(desc.key.clone());
        }

        log::info!(
            "Built scene: {} nodes in {} descriptor slots (+1 shared)",
            nodes.len(),
            slots.capacity()
        );

        Ok(Scene {
            nodes,
            keys,
            epoch: 1,
        })
    }
}

/// Topologically ordered node arena
pub struct Scene<B: UniformBuffer> {
    nodes: Vec<TransformNode<B>>,
    keys: Vec<String>,
    epoch: u64,
}

impl<B: UniformBuffer> Scene<B> {
    /// Build the linked chain described by `config`
    ///
    /// Node 0 sits at the origin; node `k` is parented to node `k - 1` with the
    /// configured link scale, rotation and offset.
    pub fn chain<D>(device: &D, slots: &SlotTable, config: &SceneConfig) -> Result<Self, SceneError>
    where
        D: GpuDevice<Buffer = B>,
    {
        if config.object_count == 0 {
            return Err(SceneError::Empty);
        }

        let link = LocalTransform::new(
            Vec3::repeat(config.link_scale),
            Vec3::from(config.link_rotation_deg),
            Vec3::from(config.link_offset),
        );

        let mut builder = SceneBuilder::new()
            .with_tint(config.tint)
            .with_node("link0", LocalTransform::identity());
        for k in 1..config.object_count {
            builder = builder.with_child(format!("link{k}"), format!("link{}", k - 1), link);
        }

        builder.build(device, slots)
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the scene has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in update order
    pub fn nodes(&self) -> &[TransformNode<B>] {
        &self.nodes
    }

    /// Node by id
    pub fn node(&self, id: NodeId) -> Option<&TransformNode<B>> {
        self.nodes.get(id.0)
    }

    /// Mutable node by id
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut TransformNode<B>> {
        self.nodes.get_mut(id.0)
    }

    /// Look a node up by the key it was built with
    pub fn find(&self, key: &str) -> Option<NodeId> {
        self.keys.iter().position(|k| k == key).map(NodeId)
    }

    /// Key a node was built with
    pub fn key(&self, id: NodeId) -> Option<&str> {
        self.keys.get(id.0).map(String::as_str)
    }

    /// Start a new update pass; every node becomes stale until updated again
    pub fn begin_pass(&mut self) {
        self.epoch += 1;
    }

    /// Update one node in the current pass
    ///
    /// Fails with `StaleParent` if the node's parent has not been updated in
    /// this pass. Returns whether the uniform upload happened.
    pub fn update_node(&mut self, id: NodeId, view: &Mat4, projection: &Mat4) -> RenderResult<bool> {
        let i = id.0;
        if i >= self.nodes.len() {
            return Err(RenderError::Backend(format!("node {} does not exist", i)));
        }

        let epoch = self.epoch;
        let (before, rest) = self.nodes.split_at_mut(i);
        let node = &mut rest[0];
        let parent_world = match node.parent() {
            Some(parent) => {
                let p = before
                    .get(parent.0)
                    .filter(|p| p.updated_epoch == epoch)
                    .ok_or(RenderError::StaleParent {
                        child: i,
                        parent: parent.0,
                    })?;
                Some(*p.world_matrix())
            }
            None => None,
        };

        let uploaded = node.update(parent_world.as_ref(), view, projection);
        node.updated_epoch = epoch;
        Ok(uploaded)
    }

    /// Update every node, parents before children
    ///
    /// Returns how many uniform uploads succeeded; failed maps are skipped.
    pub fn update(&mut self, view: &Mat4, projection: &Mat4) -> RenderResult<usize> {
        self.begin_pass();
        let mut uploaded = 0;
        for i in 0..self.nodes.len() {
            if self.update_node(NodeId(i), view, projection)? {
                uploaded += 1;
            }
        }
        Ok(uploaded)
    }

    /// Record every node's draw in scene order; returns the draw count
    pub fn draw<L: CommandList>(&self, list: &mut L, resources: &DrawResources) -> RenderResult<u32> {
        for node in &self.nodes {
            node.draw(list, resources.shared_table, resources)?;
        }
        Ok(self.nodes.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RendererConfig;
    use crate::foundation::math::{utils, Mat4Ext};
    use crate::render::backends::headless::HeadlessDevice;
    use approx::assert_relative_eq;

    const EPSILON: f32 = 1e-4;

    fn device_and_slots(capacity: u32) -> (HeadlessDevice, SlotTable) {
        let device =
            HeadlessDevice::new(&RendererConfig::default().with_descriptor_capacity(capacity));
        let slots = SlotTable::from_device(&device, capacity).unwrap();
        (device, slots)
    }

    fn link() -> LocalTransform {
        LocalTransform::new(
            Vec3::repeat(0.9),
            Vec3::new(0.0, 0.0, 30.0),
            Vec3::new(0.0, 0.0, -8.0),
        )
    }

    #[test]
    fn test_five_node_chain_origin() {
        let (device, slots) = device_and_slots(30);
        let config = SceneConfig {
            object_count: 5,
            ..SceneConfig::default()
        };
        let mut scene = Scene::chain(&device, &slots, &config).unwrap();
        scene.update(&Mat4::identity(), &Mat4::identity()).unwrap();

        let l = link().matrix();
        let expected = l * l * l * l;
        let last = scene.node(NodeId(4)).unwrap();
        assert_relative_eq!(*last.world_matrix(), expected, epsilon = EPSILON);

        // rotation about Z leaves z offsets untouched: -8 * (1 + 0.9 + 0.81 + 0.729)
        assert_relative_eq!(last.world_origin(), Vec3::new(0.0, 0.0, -27.512), epsilon = EPSILON);

        let origins: Vec<f32> = scene.nodes().iter().map(|n| n.world_origin().z).collect();
        assert_relative_eq!(origins[1], -8.0, epsilon = EPSILON);
        assert_relative_eq!(origins[2], -15.2, epsilon = EPSILON);
        assert_relative_eq!(origins[3], -21.68, epsilon = EPSILON);
    }

    #[test]
    fn test_chain_follows_moved_root_in_same_frame() {
        let (device, slots) = device_and_slots(8);
        let config = SceneConfig {
            object_count: 3,
            ..SceneConfig::default()
        };
        let mut scene = Scene::chain(&device, &slots, &config).unwrap();
        scene.update(&Mat4::identity(), &Mat4::identity()).unwrap();

        let root = scene.node_mut(NodeId(0)).unwrap();
        root.local.position = Vec3::new(10.0, 0.0, 0.0);
        root.local.rotation_deg.y = 90.0;
        scene.update(&Mat4::identity(), &Mat4::identity()).unwrap();

        let root_world = Mat4::translation(&Vec3::new(10.0, 0.0, 0.0))
            * Mat4::rotation_y(utils::deg_to_rad(90.0));
        let expected = root_world * link().matrix() * link().matrix();
        assert_relative_eq!(
            *scene.node(NodeId(2)).unwrap().world_matrix(),
            expected,
            epsilon = EPSILON
        );
    }

    #[test]
    fn test_builder_sorts_children_after_parents() {
        let (device, slots) = device_and_slots(8);
        let scene = SceneBuilder::new()
            .with_child("grandchild", "child", link())
            .with_child("child", "root", link())
            .with_node("other", LocalTransform::identity())
            .with_node("root", LocalTransform::identity())
            .build(&device, &slots)
            .unwrap();

        let order: Vec<&str> = (0..scene.len()).map(|i| scene.key(NodeId(i)).unwrap()).collect();
        assert_eq!(order, ["other", "root", "child", "grandchild"]);

        for (i, node) in scene.nodes().iter().enumerate() {
            if let Some(parent) = node.parent() {
                assert!(parent.index() < i);
            }
            assert_eq!(node.slot().index as usize, i);
        }
        assert_eq!(scene.node(scene.find("grandchild").unwrap()).unwrap().parent(), scene.find("child"));
    }

    #[test]
    fn test_builder_keeps_ordered_input() {
        let (device, slots) = device_and_slots(8);
        let scene = SceneBuilder::new()
            .with_node("a", LocalTransform::identity())
            .with_child("b", "a", link())
            .with_node("c", LocalTransform::identity())
            .with_child("d", "b", link())
            .build(&device, &slots)
            .unwrap();

        let order: Vec<&str> = (0..scene.len()).map(|i| scene.key(NodeId(i)).unwrap()).collect();
        assert_eq!(order, ["a", "b", "c", "d"]);
    }

    #[test]
    fn test_builder_rejects_bad_graphs() {
        let (device, slots) = device_and_slots(8);

        let unknown = SceneBuilder::new()
            .with_child("a", "missing", link())
            .build(&device, &slots);
        assert!(matches!(unknown, Err(SceneError::UnknownParent { .. })));

        let duplicate = SceneBuilder::new()
            .with_node("a", LocalTransform::identity())
            .with_node("a", LocalTransform::identity())
            .build(&device, &slots);
        assert!(matches!(duplicate, Err(SceneError::DuplicateKey(key)) if key == "a"));

        let cycle = SceneBuilder::new()
            .with_node("root", LocalTransform::identity())
            .with_child("a", "b", link())
            .with_child("b", "a", link())
            .build(&device, &slots);
        assert!(matches!(cycle, Err(SceneError::Cycle(_))));

        let self_parent = SceneBuilder::new()
            .with_child("a", "a", link())
            .build(&device, &slots);
        assert!(matches!(self_parent, Err(SceneError::Cycle(_))));
    }

    #[test]
    fn test_builder_rejects_more_nodes_than_slots() {
        let (device, slots) = device_and_slots(2);
        let result = SceneBuilder::new()
            .with_node("a", LocalTransform::identity())
            .with_node("b", LocalTransform::identity())
            .with_node("c", LocalTransform::identity())
            .build(&device, &slots);
        assert!(matches!(result, Err(SceneError::CapacityExceeded { count: 3, capacity: 2 })));
    }

    #[test]
    fn test_child_before_parent_in_pass_is_stale() {
        let (device, slots) = device_and_slots(4);
        let config = SceneConfig {
            object_count: 2,
            ..SceneConfig::default()
        };
        let mut scene = Scene::chain(&device, &slots, &config).unwrap();
        let (view, proj) = (Mat4::identity(), Mat4::identity());
        scene.update(&view, &proj).unwrap();

        scene.begin_pass();
        let err = scene.update_node(NodeId(1), &view, &proj).unwrap_err();
        assert!(matches!(err, RenderError::StaleParent { child: 1, parent: 0 }));

        scene.update_node(NodeId(0), &view, &proj).unwrap();
        assert!(scene.update_node(NodeId(1), &view, &proj).unwrap());
    }

    #[test]
    fn test_update_counts_skipped_uploads() {
        let (device, slots) = device_and_slots(4);
        let config = SceneConfig {
            object_count: 3,
            ..SceneConfig::default()
        };
        let mut scene = Scene::chain(&device, &slots, &config).unwrap();
        device.set_map_failure(scene.node(NodeId(1)).unwrap().uniform_buffer(), true);

        let uploaded = scene.update(&Mat4::identity(), &Mat4::identity()).unwrap();
        assert_eq!(uploaded, 2);
        // the child of the failed node still sees the fresh parent world matrix
        let l = link().matrix();
        assert_relative_eq!(*scene.node(NodeId(2)).unwrap().world_matrix(), l * l, epsilon = EPSILON);
    }

    #[test]
    fn test_chain_uses_config_tint() {
        let (device, slots) = device_and_slots(4);
        let config = SceneConfig {
            object_count: 2,
            tint: [1.0, 0.0, 0.0, 1.0],
            ..SceneConfig::default()
        };
        let scene = Scene::chain(&device, &slots, &config).unwrap();
        assert!(scene.nodes().iter().all(|n| n.tint == [1.0, 0.0, 0.0, 1.0]));
    }

    #[test]
    fn test_chain_of_zero_objects_is_rejected() {
        let (device, slots) = device_and_slots(4);
        let config = SceneConfig {
            object_count: 0,
            ..SceneConfig::default()
        };
        let result = Scene::chain(&device, &slots, &config);
        assert!(matches!(result, Err(SceneError::Empty)));
        assert_eq!(device.allocated_bytes(), 0);
    }
}
