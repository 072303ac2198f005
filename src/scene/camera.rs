use glam::{Mat4, Vec4};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    /// Vertical field of view in radians.
    Perspective { fov: f32, aspect: f32, near: f32, far: f32 },
    /// Half the visible height in world units.
    Orthographic { size: f32, aspect: f32, near: f32, far: f32 },
}

/// Camera component
///
/// The view-projection matrix is refreshed by the transform system whenever
/// the owning node's world matrix is recomputed.
#[derive(Debug, Clone)]
pub struct ComponentCamera {
    pub projection: Projection,
    pub pivot: Mat4,
    pub background_color: Vec4,
    pub active: bool,

    pub(crate) projection_matrix: Mat4,
    pub(crate) view_projection_matrix: Mat4,
}

impl ComponentCamera {
    /// `fov` is in degrees.
    #[must_use]
    pub fn new_perspective(fov: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self::with_projection(Projection::Perspective {
            fov: fov.to_radians(),
            aspect,
            near,
            far,
        })
    }

    #[must_use]
    pub fn new_orthographic(size: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self::with_projection(Projection::Orthographic {
            size,
            aspect,
            near,
            far,
        })
    }

    fn with_projection(projection: Projection) -> Self {
        let mut camera = Self {
            projection,
            pivot: Mat4::IDENTITY,
            background_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            active: true,
            projection_matrix: Mat4::IDENTITY,
            view_projection_matrix: Mat4::IDENTITY,
        };
        camera.update_projection_matrix();
        camera.view_projection_matrix = camera.projection_matrix;
        camera
    }

    /// Rebuilds the projection matrix after `projection` changed.
    ///
    /// The cached view-projection picks the change up on the next transform pass.
    pub fn update_projection_matrix(&mut self) {
        // glam's *_rh variants target wgpu's 0..1 depth range
        self.projection_matrix = match self.projection {
            Projection::Perspective { fov, aspect, near, far } => {
                Mat4::perspective_rh(fov, aspect, near, far)
            }
            Projection::Orthographic { size, aspect, near, far } => {
                let w = size * aspect;
                Mat4::orthographic_rh(-w, w, -size, size, near, far)
            }
        };
    }

    /// `projection * inverse(world * pivot)`
    pub fn update_view_projection(&mut self, world: &Mat4) {
        let view = (*world * self.pivot).inverse();
        self.view_projection_matrix = self.projection_matrix * view;
    }

    pub fn set_aspect(&mut self, new_aspect: f32) {
        match &mut self.projection {
            Projection::Perspective { aspect, .. } | Projection::Orthographic { aspect, .. } => {
                *aspect = new_aspect;
            }
        }
        self.update_projection_matrix();
    }

    #[inline]
    #[must_use]
    pub fn projection_matrix(&self) -> &Mat4 {
        &self.projection_matrix
    }

    #[inline]
    #[must_use]
    pub fn view_projection_matrix(&self) -> &Mat4 {
        &self.view_projection_matrix
    }
}
