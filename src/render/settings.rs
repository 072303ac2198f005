//! Renderer Settings
//!
//! ```rust,ignore
//! use canopy::render::RenderSettings;
//!
//! let settings = RenderSettings {
//!     canvas_size: (1280, 720),
//!     power_preference: wgpu::PowerPreference::LowPower,
//!     ..Default::default()
//! };
//! let backend = WgpuBackend::new(&settings)?;
//! ```

use glam::Vec4;

/// Configuration consumed once when a backend is created.
///
/// | Field              | Description                         | Default            |
/// |--------------------|-------------------------------------|--------------------|
/// | `power_preference` | GPU adapter selection strategy      | `HighPerformance`  |
/// | `required_features`| Required wgpu features              | Empty              |
/// | `required_limits`  | Required wgpu limits                | Default            |
/// | `canvas_format`    | Offscreen canvas colour format      | `Rgba8UnormSrgb`   |
/// | `depth_format`     | Canvas and pick depth format        | `Depth32Float`     |
/// | `canvas_size`      | Initial canvas size in pixels       | 800 × 600          |
/// | `clear_color`      | Colour of the first canvas clear    | Black (0,0,0,1)    |
#[derive(Debug, Clone)]
pub struct RenderSettings {
    // === GPU / Backend Configuration ===
    pub power_preference: wgpu::PowerPreference,

    pub required_features: wgpu::Features,

    pub required_limits: wgpu::Limits,

    // === Targets ===
    pub canvas_format: wgpu::TextureFormat,

    /// Must be a depth format without stencil that the pick pass can clear
    /// to 1.0.
    pub depth_format: wgpu::TextureFormat,

    pub canvas_size: (u32, u32),

    pub clear_color: Vec4,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            canvas_format: wgpu::TextureFormat::Rgba8UnormSrgb,
            depth_format: wgpu::TextureFormat::Depth32Float,
            canvas_size: (800, 600),
            clear_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
        }
    }
}
