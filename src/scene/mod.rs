//! Scene graph module
//!
//! Manages the node hierarchy and its components:
//! - Node: hierarchy links, components, cached world matrix
//! - Scene: node arena, parenting, branch traversal, event dispatch
//! - Components: transform, mesh, material, camera, light
//! - Events: three-phase dispatch and capture-only broadcast

pub mod camera;
pub mod component;
pub mod event;
pub mod node;
pub mod scene;
pub mod transform;

pub use camera::{ComponentCamera, Projection};
pub use component::{
    Component, ComponentKind, ComponentLight, ComponentMaterial, ComponentMesh, ComponentType,
    LightKind,
};
pub use event::{EventContext, EventPhase, ListenerId, ListenerPhase, NodeEvent, NodeEventKind, Propagation};
pub use node::Node;
pub use scene::{Branch, Scene};
pub use transform::ComponentTransform;

use slotmap::new_key_type;

new_key_type! {
    /// Arena handle of a scene node. Handles never own the node; a handle
    /// whose node was destroyed simply stops resolving.
    pub struct NodeHandle;
}
