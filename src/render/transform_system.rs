//! Transform System
//!
//! Lazily recomputes world matrices from the pass stamp stored on each node.
//!
//! # Pass stamps
//!
//! Every update pass gets a fresh [`PassId`]. A node's cached world matrix is
//! valid only while its stamp equals the running pass, so advancing the pass
//! invalidates the whole scene without touching a single node.
//!
//! For every requested node that is not stamped yet, the system walks up to
//! the highest ancestor that is still stale and recomputes that ancestor's
//! whole subtree, parent before child. Any node reached this way is stamped,
//! so when the request list later reaches a sibling or descendant it is
//! skipped. The result does not depend on the order of the request list.
//!
//! The pass is an explicit argument: a nested update for another viewport
//! simply runs with its own id.

use glam::Mat4;
use slotmap::SlotMap;

use crate::scene::camera::ComponentCamera;
use crate::scene::node::Node;
use crate::scene::NodeHandle;

/// Update-pass timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PassId(u64);

impl PassId {
    /// Never the id of a running pass.
    pub const STALE: Self = Self(0);

    #[inline]
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    #[inline]
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl Default for PassId {
    fn default() -> Self {
        Self::STALE
    }
}

/// Brings the world matrix of every node in `requested` up to date for `pass`.
///
/// Returns how many nodes were recomputed. Handles that no longer resolve are
/// ignored.
pub fn propagate<I>(nodes: &mut SlotMap<NodeHandle, Node>, requested: I, pass: PassId) -> usize
where
    I: IntoIterator<Item = NodeHandle>,
{
    debug_assert_ne!(pass, PassId::STALE, "propagating with the stale pass id");

    let mut stack: Vec<(NodeHandle, Mat4)> = Vec::with_capacity(64);
    let mut recomputed = 0;

    for handle in requested {
        let Some(node) = nodes.get(handle) else {
            continue;
        };
        if node.pass == pass {
            continue;
        }

        let top = highest_stale_ancestor(nodes, handle, pass);
        let parent_world = nodes[top]
            .parent
            .and_then(|p| nodes.get(p))
            .map_or(Mat4::IDENTITY, |p| p.world_matrix);

        stack.push((top, parent_world));
        recomputed += update_subtree(nodes, &mut stack, pass);
    }

    log::trace!("Transform pass {}: recomputed {recomputed} nodes", pass.get());
    recomputed
}

/// Walks up while the parent exists and is not stamped with `pass`.
fn highest_stale_ancestor(
    nodes: &SlotMap<NodeHandle, Node>,
    handle: NodeHandle,
    pass: PassId,
) -> NodeHandle {
    let mut top = handle;
    while let Some(parent) = nodes[top].parent {
        match nodes.get(parent) {
            Some(p) if p.pass != pass => top = parent,
            _ => break,
        }
    }
    top
}

/// Drains `stack`, stamping each node and pushing its children.
fn update_subtree(
    nodes: &mut SlotMap<NodeHandle, Node>,
    stack: &mut Vec<(NodeHandle, Mat4)>,
    pass: PassId,
) -> usize {
    let mut count = 0;
    while let Some((handle, parent_world)) = stack.pop() {
        let Some(node) = nodes.get_mut(handle) else {
            continue;
        };

        let world = parent_world * node.local_matrix();
        node.world_matrix = world;
        node.pass = pass;
        count += 1;

        if let Some(camera) = node.component_mut::<ComponentCamera>() {
            camera.update_view_projection(&world);
        }

        // reversed so children pop in order
        stack.extend(node.children.iter().rev().map(|&child| (child, world)));
    }
    count
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::scene::{ComponentTransform, Scene};

    #[test]
    fn pass_ids_advance() {
        let first = PassId::STALE.next();
        assert_ne!(first, PassId::STALE);
        assert!(first.next() > first);
    }

    #[test]
    fn second_run_in_same_pass_is_skipped() {
        let mut scene = Scene::new();
        let root = scene.create_node("root");
        let child = scene
            .build_node("child")
            .with_position(1.0, 0.0, 0.0)
            .with_parent(root)
            .build()
            .unwrap();

        let pass = PassId::STALE.next();
        assert_eq!(propagate(scene.nodes_mut(), [child], pass), 2);
        assert_eq!(propagate(scene.nodes_mut(), [child, root], pass), 0);

        let world = scene.node(child).unwrap().world_matrix();
        assert_eq!(world.w_axis.truncate(), Vec3::X);
    }

    #[test]
    fn stamped_parent_seeds_stale_child() {
        let mut scene = Scene::new();
        let root = scene
            .build_node("root")
            .with_component(ComponentTransform::from_translation(Vec3::Y))
            .build()
            .unwrap();
        let child = scene.build_node("child").with_parent(root).build().unwrap();

        let pass = PassId::STALE.next();
        propagate(scene.nodes_mut(), [root], pass);
        scene.node_mut(child).unwrap().invalidate();

        assert_eq!(propagate(scene.nodes_mut(), [child], pass), 1);
        let world = scene.node(child).unwrap().world_matrix();
        assert_eq!(world.w_axis.truncate(), Vec3::Y);
    }
}
