#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

//! Canopy
//!
//! Scene-graph rendering core: a node hierarchy with three-phase events, a
//! reference-counted registry of GPU resources, pass-stamped world-transform
//! propagation and picking through per-node identity/depth images.
//!
//! ```rust,ignore
//! use canopy::{HeadlessBackend, RenderContext, RenderSettings, Scene, Viewport};
//!
//! let mut scene = Scene::new();
//! let mut ctx = RenderContext::new(HeadlessBackend::new(&RenderSettings::default()));
//! let mut viewport = Viewport::new(&mut scene, "main", root, camera, rect)?;
//! viewport.draw(&mut ctx, &mut scene)?;
//! ```

pub mod errors;
pub mod render;
pub mod resources;
pub mod scene;
pub mod viewport;

pub use errors::{CanopyError, Result};
pub use render::{
    HeadlessBackend, LightSet, PassId, PickHit, Rect, RenderBackend, RenderContext,
    RenderSettings, WgpuBackend,
};
pub use resources::{Coat, Material, Mesh, Shader, create_box, create_plane};
pub use scene::{
    ComponentCamera, ComponentLight, ComponentMaterial, ComponentMesh, ComponentTransform, Node,
    NodeEvent, NodeEventKind, NodeHandle, Scene,
};
pub use viewport::Viewport;
