//! Branch drawing
//!
//! One traversal serves both the canvas and the pick pass: it computes each
//! node's final and projected matrices and hands them to a per-node callback.

use glam::Mat4;

use crate::errors::{CanopyError, Result};
use crate::render::backend::{BuffersHandle, DrawCall, RenderBackend};
use crate::render::context::RenderContext;
use crate::scene::{ComponentCamera, ComponentMesh, NodeHandle, Scene};

impl<B: RenderBackend> RenderContext<B> {
    /// Draws the branch below `root` into the canvas.
    ///
    /// World matrices must be current; run [`Self::update`] first.
    pub fn draw_branch(&mut self, scene: &Scene, root: NodeHandle, camera: &ComponentCamera) -> Result<()> {
        self.draw_branch_with(scene, root, camera, Self::draw_node)
    }

    /// Walks the branch below `root` in pre-order and calls
    /// `draw(self, node, final_transform, projection)` for every node, where
    /// `final_transform` is the world matrix times the mesh pivot (if any) and
    /// `projection` is the camera's view-projection times `final_transform`.
    pub fn draw_branch_with<F>(
        &mut self,
        scene: &Scene,
        root: NodeHandle,
        camera: &ComponentCamera,
        mut draw: F,
    ) -> Result<()>
    where
        F: FnMut(&mut Self, NodeHandle, &Mat4, &Mat4) -> Result<()>,
    {
        let view_projection = *camera.view_projection_matrix();
        for handle in scene.branch(root) {
            let node = scene.node(handle)?;
            let final_transform = match node.component::<ComponentMesh>() {
                Some(mesh) => *node.world_matrix() * mesh.pivot,
                None => *node.world_matrix(),
            };
            let projection = view_projection * final_transform;
            draw(self, handle, &final_transform, &projection)?;
        }
        Ok(())
    }

    /// Issues the canvas draw for one node. Unregistered nodes draw nothing.
    pub fn draw_node(&mut self, handle: NodeHandle, world: &Mat4, projection: &Mat4) -> Result<()> {
        let Some(keys) = self.nodes.get(&handle) else {
            return Ok(());
        };

        let program = self
            .programs
            .get(&keys.shader)
            .map(|r| *r.resource())
            .ok_or(CanopyError::UnknownResource { kind: "program" })?;
        let coat = self
            .coats
            .get(&keys.coat)
            .map(|r| *r.resource())
            .ok_or(CanopyError::UnknownResource { kind: "coat" })?;
        let buffers = self.buffers_of(handle)?;

        self.backend.draw(&DrawCall {
            program,
            coat,
            buffers,
            world: *world,
            projection: *projection,
        })
    }

    /// Buffers handle of a registered node.
    pub(crate) fn buffers_of(&self, handle: NodeHandle) -> Result<BuffersHandle> {
        let keys = self
            .nodes
            .get(&handle)
            .ok_or(CanopyError::UnknownResource { kind: "node" })?;
        self.buffers
            .get(&keys.mesh)
            .map(|r| *r.resource())
            .ok_or(CanopyError::UnknownResource { kind: "buffers" })
    }
}
