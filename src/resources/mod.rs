//! CPU-side resource definitions
//!
//! Nothing in here touches the GPU:
//! - Mesh: vertex and index arrays with a stable identity
//! - Shader: static shader classes
//! - Coat: surface parameters shared between materials
//! - Material: shader class plus coat

pub mod material;
pub mod mesh;
pub mod primitives;

pub use material::{Coat, CoatId, Material, SHADER_FLAT, SHADER_UNLIT, Shader, ShaderKey};
pub use mesh::{Mesh, MeshId, Vertex};
pub use primitives::{create_box, create_plane};
