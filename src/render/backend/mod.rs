//! GPU backend seam
//!
//! The registry, transform system and picker only talk to the device through
//! [`RenderBackend`]. GPU objects live in backend-owned arenas and are handed
//! out as typed slotmap handles, so a stale handle is detected instead of
//! aliasing a newer resource.
//!
//! Two implementations ship with the crate:
//! - [`WgpuBackend`]: renders into an offscreen canvas on a real device
//! - [`HeadlessBackend`]: CPU bookkeeping plus software pick rasterisation

pub mod headless;
pub mod wgpu_backend;

pub use headless::{DrawRecord, HeadlessBackend};
pub use wgpu_backend::WgpuBackend;

use glam::{Mat4, Vec3, Vec4};
use slotmap::new_key_type;
use smallvec::SmallVec;

use crate::errors::Result;
use crate::resources::{Coat, Mesh, Shader};
use crate::scene::{ComponentLight, LightKind, NodeHandle, Scene};

new_key_type! {
    /// Compiled pipeline for one shader class.
    pub struct ProgramHandle;
    /// Vertex and index buffers of one mesh.
    pub struct BuffersHandle;
    /// Parameter block of one coat.
    pub struct CoatHandle;
    /// Offscreen identity/depth target used by one node during a pick pass.
    pub struct PickTargetHandle;
}

/// Pixel rectangle, origin at the top-left corner of the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Whether the canvas pixel `(x, y)` lies inside.
    #[inline]
    #[must_use]
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && x - self.x < self.width && y - self.y < self.height
    }

    #[inline]
    #[must_use]
    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

/// One draw of a registered node into the canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawCall {
    pub program: ProgramHandle,
    pub coat: CoatHandle,
    pub buffers: BuffersHandle,
    /// `world * mesh pivot`
    pub world: Mat4,
    /// `camera view-projection * world`
    pub projection: Mat4,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    /// Unit vector the light travels along, in world space.
    pub direction: Vec3,
    pub color: Vec4,
}

/// Lights shared by every lit draw of a frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LightSet {
    pub ambient: Vec4,
    pub directional: SmallVec<[DirectionalLight; 4]>,
}

impl LightSet {
    /// Upper bound honoured by the GPU light block. Extra lights are dropped.
    pub const MAX_DIRECTIONAL: usize = 4;

    /// Gathers every light component in the branch below `root`.
    ///
    /// Uses the cached world matrices, so run a transform pass first.
    #[must_use]
    pub fn collect(scene: &Scene, root: NodeHandle) -> Self {
        Self::from_nodes(scene, scene.branch(root))
    }

    /// Same as [`Self::collect`] over an explicit node list.
    #[must_use]
    pub fn from_nodes<I>(scene: &Scene, nodes: I) -> Self
    where
        I: IntoIterator<Item = NodeHandle>,
    {
        let mut lights = Self::default();
        for handle in nodes {
            let Some(node) = scene.get_node(handle) else {
                continue;
            };
            for light in node.components::<ComponentLight>() {
                match light.kind {
                    LightKind::Ambient => lights.ambient += light.color,
                    LightKind::Directional => {
                        let direction = (*node.world_matrix() * light.pivot)
                            .transform_vector3(Vec3::Z)
                            .normalize_or_zero();
                        if lights.directional.len() == Self::MAX_DIRECTIONAL {
                            log::warn!("Dropping directional light on {handle:?}: limit reached");
                            continue;
                        }
                        lights.directional.push(DirectionalLight {
                            direction,
                            color: light.color,
                        });
                    }
                }
            }
        }
        lights
    }
}

/// Device operations used by [`RenderContext`](crate::render::RenderContext).
///
/// Creation failures surface as [`CanopyError::ResourceCreation`] carrying the
/// device's last error; rendering cannot continue without the resource.
///
/// [`CanopyError::ResourceCreation`]: crate::errors::CanopyError::ResourceCreation
pub trait RenderBackend {
    // === Resources ===
    fn create_program(&mut self, shader: &'static Shader) -> Result<ProgramHandle>;
    fn delete_program(&mut self, program: ProgramHandle);

    fn create_buffers(&mut self, mesh: &Mesh) -> Result<BuffersHandle>;
    fn delete_buffers(&mut self, buffers: BuffersHandle);

    fn create_coat(&mut self, coat: &Coat) -> Result<CoatHandle>;
    fn delete_coat(&mut self, coat: CoatHandle);

    // === Canvas drawing ===
    fn set_lights(&mut self, lights: &LightSet);

    fn draw(&mut self, call: &DrawCall) -> Result<()>;

    fn clear(&mut self, color: Vec4);

    /// Finishes the frame's canvas work and rebinds the canvas as target.
    fn reset_frame_buffer(&mut self) -> Result<()>;

    // === Picking ===
    /// Allocates a cleared identity/depth target of canvas size.
    fn create_pick_target(&mut self) -> Result<PickTargetHandle>;

    /// Renders one mesh into `target`, encoding `index` and fragment depth.
    fn draw_pick(
        &mut self,
        target: PickTargetHandle,
        buffers: BuffersHandle,
        projection: &Mat4,
        index: u32,
    ) -> Result<()>;

    /// Reads back one texel of `target`. Blocks until the device is done.
    fn read_pick_pixel(&mut self, target: PickTargetHandle, x: u32, y: u32) -> Result<[f32; 4]>;

    fn delete_pick_target(&mut self, target: PickTargetHandle);

    // === Device state ===
    fn set_viewport_rectangle(&mut self, rect: Rect);

    fn viewport_rectangle(&self) -> Rect;

    fn set_canvas_size(&mut self, width: u32, height: u32);

    fn canvas_size(&self) -> (u32, u32);
}
