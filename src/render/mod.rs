//! Rendering core
//!
//! - [`RenderContext`]: per-renderer registry state and pass counter
//! - [`registry`]: node registration over reference-counted resources
//! - [`transform_system`]: pass-stamped world-matrix propagation
//! - [`draw`] / [`picking`]: branch traversal for the canvas and for picking
//! - [`backend`]: the device seam and its wgpu and headless implementations

pub mod backend;
pub mod context;
pub mod draw;
pub mod picking;
pub mod reference;
pub mod registry;
pub mod settings;
pub mod transform_system;

pub use backend::{
    BuffersHandle, CoatHandle, DirectionalLight, DrawCall, HeadlessBackend, LightSet,
    PickTargetHandle, ProgramHandle, Rect, RenderBackend, WgpuBackend,
};
pub use context::{NodeResources, RenderContext};
pub use picking::{PickBuffer, PickHit, decode_pick, encode_pick, sort_hits};
pub use reference::{Reference, ReferenceMap, create_reference, remove_reference};
pub use registry::BranchFailures;
pub use settings::RenderSettings;
pub use transform_system::PassId;
