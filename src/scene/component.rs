//! Node components
//!
//! Components are stored inline on the node as a [`Component`] enum. Typed
//! access goes through [`ComponentType`], so `node.component::<ComponentMesh>()`
//! is resolved at compile time instead of by looking up a type name.

use std::sync::Arc;

use glam::{Mat4, Vec4};

use crate::resources::{Material, Mesh};
use crate::scene::camera::ComponentCamera;
use crate::scene::transform::ComponentTransform;

/// Discriminant of a [`Component`], carried by component events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Transform,
    Mesh,
    Material,
    Camera,
    Light,
}

#[derive(Debug, Clone)]
pub enum Component {
    Transform(ComponentTransform),
    Mesh(ComponentMesh),
    Material(ComponentMaterial),
    Camera(ComponentCamera),
    Light(ComponentLight),
}

impl Component {
    #[must_use]
    pub fn kind(&self) -> ComponentKind {
        match self {
            Self::Transform(_) => ComponentKind::Transform,
            Self::Mesh(_) => ComponentKind::Mesh,
            Self::Material(_) => ComponentKind::Material,
            Self::Camera(_) => ComponentKind::Camera,
            Self::Light(_) => ComponentKind::Light,
        }
    }
}

/// Typed view into the [`Component`] enum.
pub trait ComponentType: Sized {
    const KIND: ComponentKind;

    fn from_component(component: &Component) -> Option<&Self>;

    fn from_component_mut(component: &mut Component) -> Option<&mut Self>;

    fn from_owned(component: Component) -> Option<Self>;

    fn into_component(self) -> Component;
}

macro_rules! impl_component_type {
    ($ty:ty, $variant:ident) => {
        impl ComponentType for $ty {
            const KIND: ComponentKind = ComponentKind::$variant;

            #[inline]
            fn from_component(component: &Component) -> Option<&Self> {
                match component {
                    Component::$variant(inner) => Some(inner),
                    _ => None,
                }
            }

            #[inline]
            fn from_component_mut(component: &mut Component) -> Option<&mut Self> {
                match component {
                    Component::$variant(inner) => Some(inner),
                    _ => None,
                }
            }

            #[inline]
            fn from_owned(component: Component) -> Option<Self> {
                match component {
                    Component::$variant(inner) => Some(inner),
                    _ => None,
                }
            }

            #[inline]
            fn into_component(self) -> Component {
                Component::$variant(self)
            }
        }

        impl From<$ty> for Component {
            fn from(value: $ty) -> Self {
                Component::$variant(value)
            }
        }
    };
}

impl_component_type!(ComponentTransform, Transform);
impl_component_type!(ComponentMesh, Mesh);
impl_component_type!(ComponentMaterial, Material);
impl_component_type!(ComponentCamera, Camera);
impl_component_type!(ComponentLight, Light);

// ============================================================================
// Mesh / Material
// ============================================================================

/// Attaches a shared mesh to a node.
///
/// `pivot` is applied after the node's world matrix when drawing, so the
/// mesh can be offset without affecting the node's children.
#[derive(Debug, Clone)]
pub struct ComponentMesh {
    pub mesh: Arc<Mesh>,
    pub pivot: Mat4,
}

impl ComponentMesh {
    #[must_use]
    pub fn new(mesh: Arc<Mesh>) -> Self {
        Self {
            mesh,
            pivot: Mat4::IDENTITY,
        }
    }
}

/// Attaches a shared material to a node.
#[derive(Debug, Clone)]
pub struct ComponentMaterial {
    pub material: Arc<Material>,
}

impl ComponentMaterial {
    #[must_use]
    pub fn new(material: Arc<Material>) -> Self {
        Self { material }
    }
}

// ============================================================================
// Light
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightKind {
    /// Uniform light from all directions.
    Ambient,
    /// Parallel light travelling along the pivoted node's +Z axis.
    Directional,
}

#[derive(Debug, Clone)]
pub struct ComponentLight {
    pub kind: LightKind,
    pub color: Vec4,
    pub pivot: Mat4,
}

impl ComponentLight {
    #[must_use]
    pub fn ambient(color: Vec4) -> Self {
        Self {
            kind: LightKind::Ambient,
            color,
            pivot: Mat4::IDENTITY,
        }
    }

    #[must_use]
    pub fn directional(color: Vec4) -> Self {
        Self {
            kind: LightKind::Directional,
            color,
            pivot: Mat4::IDENTITY,
        }
    }
}
