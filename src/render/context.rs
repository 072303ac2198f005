//! Render context
//!
//! [`RenderContext`] owns everything that used to be process-wide: the three
//! reference-counted resource maps, the node → resource table and the pass
//! counter. Each renderer instance builds its own context around a backend.
//!
//! Registration lives in [`registry`](super::registry), drawing in
//! [`draw`](super::draw) and picking in [`picking`](super::picking); all of
//! them are `impl RenderContext` blocks over the state declared here.

use glam::Vec4;
use rustc_hash::FxHashMap;

use crate::errors::Result;
use crate::render::backend::{
    BuffersHandle, CoatHandle, LightSet, ProgramHandle, Rect, RenderBackend,
};
use crate::render::reference::ReferenceMap;
use crate::render::transform_system::{self, PassId};
use crate::resources::{CoatId, MeshId, ShaderKey};
use crate::scene::{NodeHandle, Scene};

/// Resource keys a registered node holds one count on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeResources {
    pub shader: ShaderKey,
    pub coat: CoatId,
    pub mesh: MeshId,
}

pub struct RenderContext<B: RenderBackend> {
    pub(crate) backend: B,

    pub(crate) nodes: FxHashMap<NodeHandle, NodeResources>,
    pub(crate) programs: ReferenceMap<ShaderKey, ProgramHandle>,
    pub(crate) coats: ReferenceMap<CoatId, CoatHandle>,
    pub(crate) buffers: ReferenceMap<MeshId, BuffersHandle>,

    pass: PassId,
}

impl<B: RenderBackend> RenderContext<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            nodes: FxHashMap::default(),
            programs: ReferenceMap::default(),
            coats: ReferenceMap::default(),
            buffers: ReferenceMap::default(),
            pass: PassId::STALE,
        }
    }

    #[inline]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[inline]
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    // ========================================================================
    // Transform passes
    // ========================================================================

    /// Starts a new pass and brings every registered node up to date.
    ///
    /// Returns how many nodes were recomputed.
    pub fn recalculate_all_node_transforms(&mut self, scene: &mut Scene) -> usize {
        self.pass = self.pass.next();
        transform_system::propagate(scene.nodes_mut(), self.nodes.keys().copied(), self.pass)
    }

    /// Starts a new pass over an explicit node list instead of the registry.
    pub fn recalculate_transforms_for<I>(&mut self, scene: &mut Scene, nodes: I) -> usize
    where
        I: IntoIterator<Item = NodeHandle>,
    {
        self.pass = self.pass.next();
        transform_system::propagate(scene.nodes_mut(), nodes, self.pass)
    }

    /// Per-frame entry point, runs a full transform pass.
    pub fn update(&mut self, scene: &mut Scene) -> usize {
        self.recalculate_all_node_transforms(scene)
    }

    #[inline]
    #[must_use]
    pub fn current_pass(&self) -> PassId {
        self.pass
    }

    // ========================================================================
    // Registry queries
    // ========================================================================

    #[inline]
    #[must_use]
    pub fn is_registered(&self, node: NodeHandle) -> bool {
        self.nodes.contains_key(&node)
    }

    #[must_use]
    pub fn node_resources(&self, node: NodeHandle) -> Option<NodeResources> {
        self.nodes.get(&node).copied()
    }

    pub fn registered_nodes(&self) -> impl Iterator<Item = NodeHandle> + '_ {
        self.nodes.keys().copied()
    }

    #[must_use]
    pub fn registered_count(&self) -> usize {
        self.nodes.len()
    }

    /// Zero when the mesh has no buffers.
    #[must_use]
    pub fn mesh_reference_count(&self, mesh: MeshId) -> u32 {
        self.buffers.get(&mesh).map_or(0, |r| r.count())
    }

    #[must_use]
    pub fn coat_reference_count(&self, coat: CoatId) -> u32 {
        self.coats.get(&coat).map_or(0, |r| r.count())
    }

    #[must_use]
    pub fn program_reference_count(&self, shader: ShaderKey) -> u32 {
        self.programs.get(&shader).map_or(0, |r| r.count())
    }

    /// Distinct (programs, coats, mesh buffers) currently alive.
    #[must_use]
    pub fn resource_counts(&self) -> (usize, usize, usize) {
        (self.programs.len(), self.coats.len(), self.buffers.len())
    }

    // ========================================================================
    // Device passthroughs
    // ========================================================================

    pub fn set_lights(&mut self, lights: &LightSet) {
        self.backend.set_lights(lights);
    }

    pub fn clear(&mut self, color: Vec4) {
        self.backend.clear(color);
    }

    pub fn reset_frame_buffer(&mut self) -> Result<()> {
        self.backend.reset_frame_buffer()
    }

    pub fn set_viewport_rectangle(&mut self, rect: Rect) {
        self.backend.set_viewport_rectangle(rect);
    }

    pub fn set_canvas_size(&mut self, width: u32, height: u32) {
        self.backend.set_canvas_size(width, height);
    }
}

impl<B: RenderBackend + std::fmt::Debug> std::fmt::Debug for RenderContext<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderContext")
            .field("backend", &self.backend)
            .field("registered", &self.nodes.len())
            .field("programs", &self.programs.len())
            .field("coats", &self.coats.len())
            .field("buffers", &self.buffers.len())
            .field("pass", &self.pass)
            .finish()
    }
}
