//! Scene hierarchy
//!
//! Transform nodes, their per-frame uniform payload, and the scene container
//! that owns them in parent-before-child order.
//!
//! ## Data flow
//!
//! ```text
//! SceneBuilder (any order) --sort--> Scene arena (slot i = position i)
//!      Scene::update  : world = parent_world * local, upload {tint, mvp}
//!      Scene::draw    : bind slot i + shared slot, draw indexed
//! ```

mod scene_graph;
mod transform_node;
mod uniform;

pub use scene_graph::{NodeId, Scene, SceneBuilder, SceneError};
pub use transform_node::{
    LocalTransform, TransformNode, OBJECT_TABLE_ROOT_INDEX, SHARED_TABLE_ROOT_INDEX,
};
pub use uniform::UniformPayload;
