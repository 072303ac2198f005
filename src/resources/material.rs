use std::sync::Arc;

use glam::Vec4;
use uuid::Uuid;

/// Registry key of a shader class. Distinct classes have distinct names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderKey(pub &'static str);

/// A shader class: a name plus WGSL source.
///
/// Shader classes are static: programs are compiled once per class and
/// shared by every material that uses it.
#[derive(Debug, PartialEq, Eq)]
pub struct Shader {
    pub name: &'static str,
    pub source: &'static str,
}

impl Shader {
    #[inline]
    #[must_use]
    pub fn key(&self) -> ShaderKey {
        ShaderKey(self.name)
    }
}

/// Flat colour, ignores lights.
pub static SHADER_UNLIT: Shader = Shader {
    name: "unlit",
    source: include_str!("../render/shaders/unlit.wgsl"),
};

/// Per-face Lambert shading from ambient plus directional lights.
pub static SHADER_FLAT: Shader = Shader {
    name: "flat",
    source: include_str!("../render/shaders/flat.wgsl"),
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoatId(Uuid);

/// Surface parameters consumed by a shader.
///
/// Immutable once built; a node that needs a different colour gets a new
/// coat, which is then picked up by `update_node`.
#[derive(Debug)]
pub struct Coat {
    id: CoatId,
    pub color: Vec4,
}

impl Coat {
    #[must_use]
    pub fn new(color: Vec4) -> Self {
        Self {
            id: CoatId(Uuid::new_v4()),
            color,
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> CoatId {
        self.id
    }
}

/// A shader class paired with a coat instance.
#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    shader: &'static Shader,
    coat: Arc<Coat>,
}

impl Material {
    #[must_use]
    pub fn new(name: impl Into<String>, shader: &'static Shader, coat: Arc<Coat>) -> Self {
        Self {
            name: name.into(),
            shader,
            coat,
        }
    }

    /// Unlit material with a fresh coat of `color`.
    #[must_use]
    pub fn unlit(color: Vec4) -> Self {
        Self::new("Unlit", &SHADER_UNLIT, Arc::new(Coat::new(color)))
    }

    /// Flat-shaded material with a fresh coat of `color`.
    #[must_use]
    pub fn flat(color: Vec4) -> Self {
        Self::new("Flat", &SHADER_FLAT, Arc::new(Coat::new(color)))
    }

    #[inline]
    #[must_use]
    pub fn shader(&self) -> &'static Shader {
        self.shader
    }

    #[inline]
    #[must_use]
    pub fn coat(&self) -> &Arc<Coat> {
        &self.coat
    }
}
