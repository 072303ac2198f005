use glam::Mat4;
use smallvec::SmallVec;

use crate::render::transform_system::PassId;
use crate::scene::NodeHandle;
use crate::scene::component::{Component, ComponentType};
use crate::scene::transform::ComponentTransform;

/// A scene node.
///
/// # Hierarchy
///
/// Nodes live in the [`Scene`](crate::scene::Scene) arena and link to each
/// other through handles:
/// - `parent`: weak back-link (None for roots)
/// - `children`: ordered child handles; destroying a node destroys its subtree
///
/// # Transform cache
///
/// `world_matrix` is only meaningful while `pass` equals the pass that the
/// transform system is currently running. Any other value means stale.
#[derive(Debug)]
pub struct Node {
    pub name: String,

    // === Hierarchy ===
    pub(crate) parent: Option<NodeHandle>,
    pub(crate) children: Vec<NodeHandle>,

    // === Components ===
    pub(crate) components: SmallVec<[Component; 4]>,

    // === Transform cache ===
    pub(crate) world_matrix: Mat4,
    pub(crate) pass: PassId,
}

impl Node {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            children: Vec::new(),
            components: SmallVec::new(),
            world_matrix: Mat4::IDENTITY,
            pass: PassId::STALE,
        }
    }

    /// Returns the parent node handle, if any.
    #[inline]
    #[must_use]
    pub fn parent(&self) -> Option<NodeHandle> {
        self.parent
    }

    /// Returns a read-only slice of child node handles.
    #[inline]
    #[must_use]
    pub fn children(&self) -> &[NodeHandle] {
        &self.children
    }

    /// Cached world matrix from the last transform pass that reached this node.
    #[inline]
    #[must_use]
    pub fn world_matrix(&self) -> &Mat4 {
        &self.world_matrix
    }

    /// Pass that last stamped [`Self::world_matrix`].
    #[inline]
    #[must_use]
    pub fn pass(&self) -> PassId {
        self.pass
    }

    /// Marks the cached world matrix as stale.
    #[inline]
    pub fn invalidate(&mut self) {
        self.pass = PassId::STALE;
    }

    // ========================================================================
    // Component queries
    // ========================================================================

    /// First attached component of type `T`.
    #[must_use]
    pub fn component<T: ComponentType>(&self) -> Option<&T> {
        self.components.iter().find_map(T::from_component)
    }

    #[must_use]
    pub fn component_mut<T: ComponentType>(&mut self) -> Option<&mut T> {
        self.components.iter_mut().find_map(T::from_component_mut)
    }

    /// All attached components of type `T`, in attachment order.
    pub fn components<'a, T: ComponentType + 'a>(&'a self) -> impl Iterator<Item = &'a T> {
        self.components.iter().filter_map(T::from_component)
    }

    /// All attached components regardless of type.
    #[must_use]
    pub fn all_components(&self) -> &[Component] {
        &self.components
    }

    /// Local matrix of the attached transform component, identity if none.
    #[must_use]
    pub fn local_matrix(&self) -> Mat4 {
        self.component::<ComponentTransform>()
            .map_or(Mat4::IDENTITY, |t| t.local)
    }
}
