//! Render resource registry
//!
//! Maps scene nodes to the GPU resources they draw with. A node is
//! registrable when it carries both a [`ComponentMesh`] and a
//! [`ComponentMaterial`]; it then holds one count on its shader-class
//! program, its coat block and its mesh buffers. Resources are shared by
//! every node using the same key and die with the last count.
//!
//! Branch operations isolate failures per node: a node that cannot be
//! registered is logged and reported, and the rest of the branch proceeds.

use std::sync::Arc;

use crate::errors::{CanopyError, Result};
use crate::render::backend::RenderBackend;
use crate::render::context::{NodeResources, RenderContext};
use crate::render::reference::{create_reference, remove_reference};
use crate::resources::{Coat, CoatId, Mesh, MeshId, Shader, ShaderKey};
use crate::scene::{ComponentMaterial, ComponentMesh, Node, NodeHandle, Scene};

/// Nodes of a branch operation that failed, with their errors.
pub type BranchFailures = Vec<(NodeHandle, CanopyError)>;

/// Resources a node currently asks for.
struct Wanted<'a> {
    shader: &'static Shader,
    coat: &'a Arc<Coat>,
    mesh: &'a Arc<Mesh>,
}

impl<'a> Wanted<'a> {
    /// `None` unless the node has both a mesh and a material.
    fn of(node: &'a Node) -> Option<Self> {
        let material = &node.component::<ComponentMaterial>()?.material;
        let mesh = &node.component::<ComponentMesh>()?.mesh;
        Some(Self {
            shader: material.shader(),
            coat: material.coat(),
            mesh,
        })
    }

    fn keys(&self) -> NodeResources {
        NodeResources {
            shader: self.shader.key(),
            coat: self.coat.id(),
            mesh: self.mesh.id(),
        }
    }
}

impl<B: RenderBackend> RenderContext<B> {
    /// Registers one node.
    ///
    /// Idempotent. Nodes without a mesh or material are skipped silently. If
    /// one of the three resources cannot be created, the counts already taken
    /// are returned and the node stays unregistered.
    pub fn add_node(&mut self, scene: &Scene, handle: NodeHandle) -> Result<()> {
        if self.nodes.contains_key(&handle) {
            return Ok(());
        }
        let node = scene.node(handle)?;
        let Some(wanted) = Wanted::of(node) else {
            log::trace!("Skipping {handle:?} ({}): no mesh or material", node.name);
            return Ok(());
        };
        let keys = wanted.keys();

        self.acquire_program(wanted.shader)?;
        if let Err(err) = self.acquire_coat(wanted.coat) {
            self.release_program(keys.shader)?;
            return Err(err);
        }
        if let Err(err) = self.acquire_buffers(wanted.mesh) {
            self.release_coat(keys.coat)?;
            self.release_program(keys.shader)?;
            return Err(err);
        }

        self.nodes.insert(handle, keys);
        Ok(())
    }

    /// Registers every node of the branch below `root`.
    pub fn add_branch(&mut self, scene: &Scene, root: NodeHandle) -> BranchFailures {
        let mut failures = BranchFailures::new();
        for handle in scene.branch(root) {
            if let Err(err) = self.add_node(scene, handle) {
                log::warn!("Failed to register {handle:?}: {err}");
                failures.push((handle, err));
            }
        }
        failures
    }

    /// Unregisters one node, releasing its three counts. No-op if the node
    /// is not registered.
    ///
    /// Only the registry is consulted, so this also works for nodes that
    /// were already destroyed in the scene.
    pub fn remove_node(&mut self, handle: NodeHandle) -> Result<()> {
        let Some(keys) = self.nodes.remove(&handle) else {
            return Ok(());
        };
        let program = self.release_program(keys.shader);
        let coat = self.release_coat(keys.coat);
        let buffers = self.release_buffers(keys.mesh);
        program.and(coat).and(buffers)
    }

    /// Unregisters every node of the branch below `root`.
    pub fn remove_branch(&mut self, scene: &Scene, root: NodeHandle) -> BranchFailures {
        let mut failures = BranchFailures::new();
        for handle in scene.branch(root) {
            if let Err(err) = self.remove_node(handle) {
                log::warn!("Failed to unregister {handle:?}: {err}");
                failures.push((handle, err));
            }
        }
        failures
    }

    /// Unregisters nodes whose handles no longer resolve in `scene`.
    pub fn prune(&mut self, scene: &Scene) -> BranchFailures {
        let dead: Vec<NodeHandle> = self
            .nodes
            .keys()
            .copied()
            .filter(|&h| !scene.contains(h))
            .collect();

        let mut failures = BranchFailures::new();
        for handle in dead {
            if let Err(err) = self.remove_node(handle) {
                log::warn!("Failed to unregister destroyed {handle:?}: {err}");
                failures.push((handle, err));
            }
        }
        failures
    }

    /// Follows a node's mesh or material swap.
    ///
    /// Each slot whose key changed takes a count on the new resource before
    /// releasing the old one, so a resource shared with other nodes is never
    /// recreated. An unregistered node is registered; a node that lost its
    /// mesh or material is unregistered.
    pub fn update_node(&mut self, scene: &Scene, handle: NodeHandle) -> Result<()> {
        let Some(mut current) = self.nodes.get(&handle).copied() else {
            return self.add_node(scene, handle);
        };
        let node = scene.node(handle)?;
        let Some(wanted) = Wanted::of(node) else {
            log::debug!("{handle:?} ({}) lost its mesh or material", node.name);
            return self.remove_node(handle);
        };
        let keys = wanted.keys();

        if keys.shader != current.shader {
            self.acquire_program(wanted.shader)?;
            let old = std::mem::replace(&mut current.shader, keys.shader);
            self.nodes.insert(handle, current);
            self.release_program(old)?;
        }
        if keys.coat != current.coat {
            self.acquire_coat(wanted.coat)?;
            let old = std::mem::replace(&mut current.coat, keys.coat);
            self.nodes.insert(handle, current);
            self.release_coat(old)?;
        }
        if keys.mesh != current.mesh {
            self.acquire_buffers(wanted.mesh)?;
            let old = std::mem::replace(&mut current.mesh, keys.mesh);
            self.nodes.insert(handle, current);
            self.release_buffers(old)?;
        }
        Ok(())
    }

    /// Runs [`Self::update_node`] on every node of the branch below `root`.
    pub fn update_branch(&mut self, scene: &Scene, root: NodeHandle) -> BranchFailures {
        let mut failures = BranchFailures::new();
        for handle in scene.branch(root) {
            if let Err(err) = self.update_node(scene, handle) {
                log::warn!("Failed to update {handle:?}: {err}");
                failures.push((handle, err));
            }
        }
        failures
    }

    // ========================================================================
    // Per-map helpers
    // ========================================================================

    fn acquire_program(&mut self, shader: &'static Shader) -> Result<()> {
        let backend = &mut self.backend;
        create_reference(&mut self.programs, shader.key(), |key| {
            log::debug!("Creating program for shader class {:?}", key.0);
            backend.create_program(shader)
        })
    }

    fn release_program(&mut self, key: ShaderKey) -> Result<()> {
        let backend = &mut self.backend;
        remove_reference(&mut self.programs, "program", &key, |program| {
            log::debug!("Deleting program for shader class {:?}", key.0);
            backend.delete_program(program);
        })
    }

    fn acquire_coat(&mut self, coat: &Coat) -> Result<()> {
        let backend = &mut self.backend;
        create_reference(&mut self.coats, coat.id(), |key| {
            log::debug!("Creating coat block {key:?}");
            backend.create_coat(coat)
        })
    }

    fn release_coat(&mut self, key: CoatId) -> Result<()> {
        let backend = &mut self.backend;
        remove_reference(&mut self.coats, "coat", &key, |block| {
            log::debug!("Deleting coat block {key:?}");
            backend.delete_coat(block);
        })
    }

    fn acquire_buffers(&mut self, mesh: &Mesh) -> Result<()> {
        let backend = &mut self.backend;
        create_reference(&mut self.buffers, mesh.id(), |key| {
            log::debug!("Creating buffers for mesh '{}' {key:?}", mesh.name);
            backend.create_buffers(mesh)
        })
    }

    fn release_buffers(&mut self, key: MeshId) -> Result<()> {
        let backend = &mut self.backend;
        remove_reference(&mut self.buffers, "buffers", &key, |buffers| {
            log::debug!("Deleting buffers for mesh {key:?}");
            backend.delete_buffers(buffers);
        })
    }
}
