use glam::{Mat4, Vec3};
use slotmap::{SecondaryMap, SlotMap};
use smallvec::SmallVec;

use crate::errors::{CanopyError, Result};
use crate::scene::component::{Component, ComponentType};
use crate::scene::event::{
    EventContext, EventHandler, EventPhase, Listener, ListenerId, ListenerPhase, NodeEvent,
    NodeEventKind, Propagation,
};
use crate::scene::node::Node;
use crate::scene::transform::ComponentTransform;
use crate::scene::NodeHandle;

/// Scene graph
///
/// Pure data layer: the node arena, hierarchy links and event listeners.
/// GPU state lives in [`RenderContext`](crate::render::RenderContext), which
/// only ever refers to nodes through their handles.
#[derive(Debug, Default)]
pub struct Scene {
    nodes: SlotMap<NodeHandle, Node>,

    listeners: SlotMap<ListenerId, Listener>,
    /// Registration order per node.
    node_listeners: SecondaryMap<NodeHandle, Vec<ListenerId>>,
}

impl Scene {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts building a node.
    pub fn build_node(&mut self, name: &str) -> NodeBuilder<'_> {
        NodeBuilder::new(self, name)
    }

    /// Inserts a detached node.
    pub fn create_node(&mut self, name: impl Into<String>) -> NodeHandle {
        self.nodes.insert(Node::new(name))
    }

    /// Detaches `handle` from its parent and drops it together with its subtree.
    ///
    /// Nodes still registered in a render context must be removed from it
    /// first, otherwise their resources stay referenced.
    pub fn destroy_node(&mut self, handle: NodeHandle) -> Result<()> {
        let parent = self.node(handle)?.parent;
        if let Some(parent) = parent {
            self.remove_child(parent, handle)?;
        }

        let doomed: Vec<NodeHandle> = self.branch(handle).collect();
        for h in doomed {
            self.nodes.remove(h);
            if let Some(ids) = self.node_listeners.remove(h) {
                for id in ids {
                    self.listeners.remove(id);
                }
            }
        }
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, handle: NodeHandle) -> bool {
        self.nodes.contains_key(handle)
    }

    pub fn node(&self, handle: NodeHandle) -> Result<&Node> {
        self.nodes.get(handle).ok_or(CanopyError::NodeNotFound(handle))
    }

    pub fn node_mut(&mut self, handle: NodeHandle) -> Result<&mut Node> {
        self.nodes.get_mut(handle).ok_or(CanopyError::NodeNotFound(handle))
    }

    #[inline]
    #[must_use]
    pub fn get_node(&self, handle: NodeHandle) -> Option<&Node> {
        self.nodes.get(handle)
    }

    #[inline]
    #[must_use]
    pub fn get_node_mut(&mut self, handle: NodeHandle) -> Option<&mut Node> {
        self.nodes.get_mut(handle)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeHandle, &Node)> {
        self.nodes.iter()
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut SlotMap<NodeHandle, Node> {
        &mut self.nodes
    }

    // ========================================================================
    // Hierarchy
    // ========================================================================

    /// Makes `child` the last child of `parent`.
    ///
    /// No-op if it already is. Fails with [`CyclicReference`] without touching
    /// the tree when `child` is `parent` or one of its ancestors. A child that
    /// already has another parent is removed from it first.
    ///
    /// [`CyclicReference`]: CanopyError::CyclicReference
    pub fn append_child(&mut self, parent: NodeHandle, child: NodeHandle) -> Result<()> {
        self.node(parent)?;
        let old_parent = self.node(child)?.parent;
        if old_parent == Some(parent) {
            return Ok(());
        }

        if parent == child || self.is_descendant_of(parent, child) {
            return Err(CanopyError::CyclicReference { parent, child });
        }

        if let Some(old_parent) = old_parent {
            self.remove_child(old_parent, child)?;
        }

        self.nodes[parent].children.push(child);
        let child_node = &mut self.nodes[child];
        child_node.parent = Some(parent);
        child_node.invalidate();
        self.invalidate_ancestors(child);

        self.dispatch_event(child, &NodeEvent::new(NodeEventKind::ChildAppend, true))?;
        Ok(())
    }

    /// Detaches `child` from `parent`. No-op if it is not one of its children.
    ///
    /// `ChildRemove` is dispatched while the child is still attached, so the
    /// old ancestors see it bubble.
    pub fn remove_child(&mut self, parent: NodeHandle, child: NodeHandle) -> Result<()> {
        let Some(index) = self.node(parent)?.children.iter().position(|&c| c == child) else {
            return Ok(());
        };

        self.dispatch_event(child, &NodeEvent::new(NodeEventKind::ChildRemove, true))?;

        // listeners cannot touch the hierarchy, so `index` is still valid
        self.nodes[parent].children.remove(index);
        self.invalidate_ancestors(child);
        if let Some(node) = self.nodes.get_mut(child) {
            node.parent = None;
            node.invalidate();
        }
        Ok(())
    }

    /// Lazy depth-first pre-order walk over `handle` and its descendants.
    ///
    /// A stale handle yields an empty branch.
    #[must_use]
    pub fn branch(&self, handle: NodeHandle) -> Branch<'_> {
        Branch {
            scene: self,
            stack: if self.contains(handle) { vec![handle] } else { Vec::new() },
        }
    }

    /// Walks from the parent of `handle` up to the root.
    pub fn ancestors(&self, handle: NodeHandle) -> impl Iterator<Item = NodeHandle> + '_ {
        let first = self.get_node(handle).and_then(Node::parent);
        std::iter::successors(first, move |&h| self.get_node(h).and_then(Node::parent))
    }

    /// True if `ancestor` is found walking up from `handle`.
    #[must_use]
    pub fn is_descendant_of(&self, handle: NodeHandle, ancestor: NodeHandle) -> bool {
        self.ancestors(handle).any(|h| h == ancestor)
    }

    #[must_use]
    pub fn root_of(&self, handle: NodeHandle) -> NodeHandle {
        self.ancestors(handle).last().unwrap_or(handle)
    }

    fn invalidate_ancestors(&mut self, handle: NodeHandle) {
        let chain: SmallVec<[NodeHandle; 16]> = self.ancestors(handle).collect();
        for h in chain {
            self.nodes[h].invalidate();
        }
    }

    // ========================================================================
    // Components
    // ========================================================================

    /// Attaches a component and dispatches a bubbling `ComponentAdd`.
    pub fn add_component(&mut self, handle: NodeHandle, component: impl Into<Component>) -> Result<()> {
        let component = component.into();
        let kind = component.kind();
        let node = self.node_mut(handle)?;
        node.components.push(component);
        node.invalidate();

        self.dispatch_event(handle, &NodeEvent::component(NodeEventKind::ComponentAdd, kind))?;
        Ok(())
    }

    /// Detaches the first component of type `T`, dispatching a bubbling
    /// `ComponentRemove` if one was found.
    pub fn remove_component<T: ComponentType>(&mut self, handle: NodeHandle) -> Result<Option<T>> {
        let node = self.node_mut(handle)?;
        let Some(index) = node.components.iter().position(|c| c.kind() == T::KIND) else {
            return Ok(None);
        };
        let removed = T::from_owned(node.components.remove(index));
        node.invalidate();

        self.dispatch_event(handle, &NodeEvent::component(NodeEventKind::ComponentRemove, T::KIND))?;
        Ok(removed)
    }

    /// Replaces the local matrix, attaching a transform component if needed.
    pub fn set_local_matrix(&mut self, handle: NodeHandle, local: Mat4) -> Result<()> {
        let node = self.node_mut(handle)?;
        if let Some(transform) = node.component_mut::<ComponentTransform>() {
            transform.local = local;
            node.invalidate();
            return Ok(());
        }
        self.add_component(handle, ComponentTransform::new(local))
    }

    // ========================================================================
    // Events
    // ========================================================================

    pub fn add_event_listener<F>(
        &mut self,
        handle: NodeHandle,
        kind: NodeEventKind,
        phase: ListenerPhase,
        handler: F,
    ) -> Result<ListenerId>
    where
        F: FnMut(&NodeEvent, &EventContext) -> Propagation + 'static,
    {
        self.node(handle)?;
        let handler: EventHandler = Box::new(handler);
        let id = self.listeners.insert(Listener {
            node: handle,
            kind,
            phase,
            handler,
        });
        match self.node_listeners.entry(handle) {
            Some(entry) => entry.or_default().push(id),
            None => return Err(CanopyError::NodeNotFound(handle)),
        }
        Ok(id)
    }

    /// Returns false if the listener was already gone.
    pub fn remove_event_listener(&mut self, id: ListenerId) -> bool {
        let Some(listener) = self.listeners.remove(id) else {
            return false;
        };
        if let Some(ids) = self.node_listeners.get_mut(listener.node) {
            ids.retain(|&l| l != id);
        }
        true
    }

    /// Three-phase dispatch on `target`.
    ///
    /// Returns `Ok(false)` if a listener stopped propagation.
    pub fn dispatch_event(&mut self, target: NodeHandle, event: &NodeEvent) -> Result<bool> {
        self.node(target)?;
        let path: SmallVec<[NodeHandle; 16]> = self.ancestors(target).collect();

        for &node in path.iter().rev() {
            if self.run_listeners(node, target, event, EventPhase::Capture) {
                return Ok(false);
            }
        }

        if self.run_listeners(target, target, event, EventPhase::Target) {
            return Ok(false);
        }

        if event.bubbles {
            for &node in &path {
                if self.run_listeners(node, target, event, EventPhase::Bubble) {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Runs capture listeners on `target` and every descendant, depth first.
    ///
    /// Returns `Ok(false)` if a listener stopped propagation.
    pub fn broadcast_event(&mut self, target: NodeHandle, event: &NodeEvent) -> Result<bool> {
        self.node(target)?;
        let order: Vec<NodeHandle> = self.branch(target).collect();
        for node in order {
            if self.run_listeners(node, target, event, EventPhase::Capture) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Returns true if propagation was stopped.
    fn run_listeners(
        &mut self,
        node: NodeHandle,
        target: NodeHandle,
        event: &NodeEvent,
        phase: EventPhase,
    ) -> bool {
        let Some(ids) = self.node_listeners.get(node) else {
            return false;
        };
        let ids: SmallVec<[ListenerId; 8]> = ids.iter().copied().collect();

        let ctx = EventContext {
            target,
            current_target: node,
            phase,
        };
        let mut stopped = false;
        for id in ids {
            let Some(listener) = self.listeners.get_mut(id) else {
                continue;
            };
            if listener.accepts(event.kind, phase)
                && (listener.handler)(event, &ctx) == Propagation::Stop
            {
                stopped = true;
            }
        }
        stopped
    }
}

/// Depth-first pre-order sequence of a node and its descendants.
///
/// Lazy and cheap to clone: cloning before iterating gives a restartable walk.
#[derive(Debug, Clone)]
pub struct Branch<'a> {
    scene: &'a Scene,
    stack: Vec<NodeHandle>,
}

impl Iterator for Branch<'_> {
    type Item = NodeHandle;

    fn next(&mut self) -> Option<NodeHandle> {
        loop {
            let handle = self.stack.pop()?;
            let Some(node) = self.scene.get_node(handle) else {
                continue;
            };
            self.stack.extend(node.children.iter().rev().copied());
            return Some(handle);
        }
    }
}

impl std::iter::FusedIterator for Branch<'_> {}

// ============================================================================
// Builder
// ============================================================================

pub struct NodeBuilder<'a> {
    scene: &'a mut Scene,
    node: Node,
    parent: Option<NodeHandle>,
}

impl<'a> NodeBuilder<'a> {
    pub fn new(scene: &'a mut Scene, name: &str) -> Self {
        Self {
            scene,
            node: Node::new(name),
            parent: None,
        }
    }

    #[must_use]
    pub fn with_position(self, x: f32, y: f32, z: f32) -> Self {
        self.with_local_matrix(Mat4::from_translation(Vec3::new(x, y, z)))
    }

    #[must_use]
    pub fn with_local_matrix(mut self, local: Mat4) -> Self {
        if let Some(transform) = self.node.component_mut::<ComponentTransform>() {
            transform.local = local;
        } else {
            self.node.components.push(ComponentTransform::new(local).into());
        }
        self
    }

    #[must_use]
    pub fn with_component(mut self, component: impl Into<Component>) -> Self {
        self.node.components.push(component.into());
        self
    }

    #[must_use]
    pub fn with_parent(mut self, parent: NodeHandle) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Inserts the node and attaches it to its parent, if one was given.
    pub fn build(self) -> Result<NodeHandle> {
        let handle = self.scene.nodes.insert(self.node);
        if let Some(parent) = self.parent
            && let Err(err) = self.scene.append_child(parent, handle)
        {
            self.scene.nodes.remove(handle);
            return Err(err);
        }
        Ok(handle)
    }
}
