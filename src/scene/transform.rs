use glam::{EulerRot, Mat4, Quat, Vec3};

/// Transform component
///
/// Holds a node's local matrix. Nodes without this component behave as if
/// their local matrix were the identity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComponentTransform {
    pub local: Mat4,
}

impl ComponentTransform {
    #[must_use]
    pub fn new(local: Mat4) -> Self {
        Self { local }
    }

    #[must_use]
    pub fn from_translation(translation: Vec3) -> Self {
        Self::new(Mat4::from_translation(translation))
    }

    #[must_use]
    pub fn from_scale_rotation_translation(scale: Vec3, rotation: Quat, translation: Vec3) -> Self {
        Self::new(Mat4::from_scale_rotation_translation(scale, rotation, translation))
    }

    /// Position part of the local matrix.
    #[inline]
    #[must_use]
    pub fn translation(&self) -> Vec3 {
        self.local.w_axis.truncate()
    }

    pub fn set_translation(&mut self, translation: Vec3) {
        self.local.w_axis = translation.extend(1.0);
    }

    /// Post-multiplies a translation (moves along the local axes).
    pub fn translate(&mut self, delta: Vec3) {
        self.local *= Mat4::from_translation(delta);
    }

    /// Post-multiplies an XYZ euler rotation, in radians.
    pub fn rotate_euler(&mut self, x: f32, y: f32, z: f32) {
        self.local *= Mat4::from_quat(Quat::from_euler(EulerRot::XYZ, x, y, z));
    }

    pub fn scale(&mut self, factor: Vec3) {
        self.local *= Mat4::from_scale(factor);
    }

    /// Rotates the local matrix so that -Z points at `target`, keeping the
    /// current position and scale. `target` and `up` live in parent space.
    pub fn look_at(&mut self, target: Vec3, up: Vec3) {
        let (scale, _, position) = self.local.to_scale_rotation_translation();
        let forward = (target - position).normalize_or_zero();
        if forward == Vec3::ZERO || forward.cross(up).length_squared() < 1e-4 {
            return;
        }
        let right = forward.cross(up).normalize();
        let new_up = right.cross(forward).normalize();
        let rotation = Quat::from_mat3(&glam::Mat3::from_cols(right, new_up, -forward));
        self.local = Mat4::from_scale_rotation_translation(scale, rotation, position);
    }
}

impl Default for ComponentTransform {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY)
    }
}
