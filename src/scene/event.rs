//! Node events
//!
//! Events travel along the hierarchy in three phases:
//!
//! 1. **Capture**: capture listeners of every ancestor, root first.
//! 2. **Target**: every listener on the target node, in registration order.
//! 3. **Bubble**: bubble listeners of every ancestor, parent first.
//!    Only runs for events created with `bubbles = true`.
//!
//! Handlers never see mutable phase/target fields on the event. Instead each
//! call receives an immutable [`EventContext`] describing where the event is.

use slotmap::new_key_type;

use crate::scene::NodeHandle;
use crate::scene::component::ComponentKind;

new_key_type! {
    /// Returned by `Scene::add_event_listener`, used to remove the listener.
    pub struct ListenerId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeEventKind {
    ChildAppend,
    ChildRemove,
    ComponentAdd,
    ComponentRemove,
    Custom(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeEvent {
    pub kind: NodeEventKind,
    pub bubbles: bool,
    /// Set for component events.
    pub component: Option<ComponentKind>,
}

impl NodeEvent {
    #[must_use]
    pub fn new(kind: NodeEventKind, bubbles: bool) -> Self {
        Self {
            kind,
            bubbles,
            component: None,
        }
    }

    #[must_use]
    pub fn custom(name: &'static str, bubbles: bool) -> Self {
        Self::new(NodeEventKind::Custom(name), bubbles)
    }

    pub(crate) fn component(kind: NodeEventKind, component: ComponentKind) -> Self {
        Self {
            kind,
            bubbles: true,
            component: Some(component),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPhase {
    Capture,
    Target,
    Bubble,
}

/// Phase a listener registers for. Both kinds also fire at the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerPhase {
    Capture,
    Bubble,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventContext {
    /// Node the event was dispatched on.
    pub target: NodeHandle,
    /// Node whose listener is running.
    pub current_target: NodeHandle,
    pub phase: EventPhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Propagation {
    #[default]
    Continue,
    /// Finishes the listeners of the current node, then stops.
    Stop,
}

pub type EventHandler = Box<dyn FnMut(&NodeEvent, &EventContext) -> Propagation>;

pub(crate) struct Listener {
    pub(crate) node: NodeHandle,
    pub(crate) kind: NodeEventKind,
    pub(crate) phase: ListenerPhase,
    pub(crate) handler: EventHandler,
}

impl Listener {
    /// Whether this listener takes part in `phase` for `kind`.
    #[inline]
    pub(crate) fn accepts(&self, kind: NodeEventKind, phase: EventPhase) -> bool {
        if self.kind != kind {
            return false;
        }
        match phase {
            EventPhase::Target => true,
            EventPhase::Capture => self.phase == ListenerPhase::Capture,
            EventPhase::Bubble => self.phase == ListenerPhase::Bubble,
        }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("node", &self.node)
            .field("kind", &self.kind)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}
