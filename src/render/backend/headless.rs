//! Headless backend
//!
//! Implements [`RenderBackend`] without a device. Resources are plain arena
//! entries, canvas draws are recorded in a log, and pick targets are resolved
//! on read-back by rasterising the recorded triangles at the requested pixel
//! centre with the same encoding the GPU pick shader uses.
//!
//! Tests and tools use it to observe what the registry and picker do:
//! live resource counts, the draw log, the last clear and viewport.

use glam::{Mat4, Vec2, Vec3, Vec4};
use slotmap::SlotMap;

use crate::errors::{CanopyError, Result};
use crate::render::backend::{
    BuffersHandle, CoatHandle, DrawCall, LightSet, PickTargetHandle, ProgramHandle, Rect,
    RenderBackend,
};
use crate::render::picking::encode_pick;
use crate::render::settings::RenderSettings;
use crate::resources::{Coat, Mesh, Shader};

/// One canvas draw as seen by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub shader: &'static str,
    pub color: Vec4,
    pub buffers: BuffersHandle,
    pub world: Mat4,
    pub projection: Mat4,
    pub viewport: Rect,
}

#[derive(Debug)]
struct MeshTriangles {
    triangles: Vec<[Vec3; 3]>,
}

#[derive(Debug)]
struct PickDraw {
    clip: Vec<[Vec4; 3]>,
    index: u32,
    viewport: Rect,
}

/// Pick target: its size at creation plus the draws it received.
#[derive(Debug)]
struct PickImage {
    size: (u32, u32),
    draws: Vec<PickDraw>,
}

#[derive(Debug)]
pub struct HeadlessBackend {
    programs: SlotMap<ProgramHandle, &'static Shader>,
    buffers: SlotMap<BuffersHandle, MeshTriangles>,
    coats: SlotMap<CoatHandle, Vec4>,
    pick_targets: SlotMap<PickTargetHandle, PickImage>,

    lights: LightSet,
    draw_log: Vec<DrawRecord>,
    last_clear: Option<(Vec4, Rect)>,
    frames: usize,
    viewport: Rect,
    canvas_size: (u32, u32),

    created: usize,
    fail_creations: bool,
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(&RenderSettings::default())
    }
}

impl HeadlessBackend {
    #[must_use]
    pub fn new(settings: &RenderSettings) -> Self {
        let (width, height) = settings.canvas_size;
        Self {
            programs: SlotMap::with_key(),
            buffers: SlotMap::with_key(),
            coats: SlotMap::with_key(),
            pick_targets: SlotMap::with_key(),
            lights: LightSet::default(),
            draw_log: Vec::new(),
            last_clear: None,
            frames: 0,
            viewport: Rect::new(0, 0, width, height),
            canvas_size: (width, height),
            created: 0,
            fail_creations: false,
        }
    }

    /// Makes every following resource creation fail, like a lost device.
    pub fn set_fail_creations(&mut self, fail: bool) {
        self.fail_creations = fail;
    }

    #[must_use]
    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    #[must_use]
    pub fn live_coats(&self) -> usize {
        self.coats.len()
    }

    #[must_use]
    pub fn live_pick_targets(&self) -> usize {
        self.pick_targets.len()
    }

    /// Programs, buffers and coats created since construction.
    #[must_use]
    pub fn created_resources(&self) -> usize {
        self.created
    }

    #[must_use]
    pub fn draw_log(&self) -> &[DrawRecord] {
        &self.draw_log
    }

    pub fn take_draw_log(&mut self) -> Vec<DrawRecord> {
        std::mem::take(&mut self.draw_log)
    }

    #[must_use]
    pub fn lights(&self) -> &LightSet {
        &self.lights
    }

    /// Colour and viewport of the latest clear.
    #[must_use]
    pub fn last_clear(&self) -> Option<(Vec4, Rect)> {
        self.last_clear
    }

    /// Number of `reset_frame_buffer` calls.
    #[must_use]
    pub fn frames(&self) -> usize {
        self.frames
    }

    fn check_creation(&mut self, kind: &'static str) -> Result<()> {
        if self.fail_creations {
            return Err(CanopyError::ResourceCreation {
                kind,
                code: "DEVICE_LOST (simulated)".into(),
            });
        }
        self.created += 1;
        Ok(())
    }
}

impl RenderBackend for HeadlessBackend {
    fn create_program(&mut self, shader: &'static Shader) -> Result<ProgramHandle> {
        self.check_creation("program")?;
        Ok(self.programs.insert(shader))
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        self.programs.remove(program);
    }

    fn create_buffers(&mut self, mesh: &Mesh) -> Result<BuffersHandle> {
        if mesh.is_empty() {
            return Err(CanopyError::ResourceCreation {
                kind: "buffers",
                code: format!("mesh '{}' has no vertices or indices", mesh.name),
            });
        }
        self.check_creation("buffers")?;
        let triangles = mesh.triangles().collect();
        Ok(self.buffers.insert(MeshTriangles { triangles }))
    }

    fn delete_buffers(&mut self, buffers: BuffersHandle) {
        self.buffers.remove(buffers);
    }

    fn create_coat(&mut self, coat: &Coat) -> Result<CoatHandle> {
        self.check_creation("coat")?;
        Ok(self.coats.insert(coat.color))
    }

    fn delete_coat(&mut self, coat: CoatHandle) {
        self.coats.remove(coat);
    }

    fn set_lights(&mut self, lights: &LightSet) {
        self.lights = lights.clone();
    }

    fn draw(&mut self, call: &DrawCall) -> Result<()> {
        let shader = self
            .programs
            .get(call.program)
            .ok_or(CanopyError::UnknownResource { kind: "program" })?;
        let color = *self
            .coats
            .get(call.coat)
            .ok_or(CanopyError::UnknownResource { kind: "coat" })?;
        if !self.buffers.contains_key(call.buffers) {
            return Err(CanopyError::UnknownResource { kind: "buffers" });
        }

        self.draw_log.push(DrawRecord {
            shader: shader.name,
            color,
            buffers: call.buffers,
            world: call.world,
            projection: call.projection,
            viewport: self.viewport,
        });
        Ok(())
    }

    fn clear(&mut self, color: Vec4) {
        self.last_clear = Some((color, self.viewport));
    }

    fn reset_frame_buffer(&mut self) -> Result<()> {
        self.frames += 1;
        Ok(())
    }

    fn create_pick_target(&mut self) -> Result<PickTargetHandle> {
        if self.fail_creations {
            return Err(CanopyError::ResourceCreation {
                kind: "pick target",
                code: "DEVICE_LOST (simulated)".into(),
            });
        }
        Ok(self.pick_targets.insert(PickImage {
            size: self.canvas_size,
            draws: Vec::new(),
        }))
    }

    fn draw_pick(
        &mut self,
        target: PickTargetHandle,
        buffers: BuffersHandle,
        projection: &Mat4,
        index: u32,
    ) -> Result<()> {
        let mesh = self
            .buffers
            .get(buffers)
            .ok_or(CanopyError::UnknownResource { kind: "buffers" })?;
        let image = self
            .pick_targets
            .get_mut(target)
            .ok_or(CanopyError::UnknownResource { kind: "pick target" })?;

        let clip = mesh
            .triangles
            .iter()
            .map(|tri| (*tri).map(|p| *projection * p.extend(1.0)))
            .collect();
        image.draws.push(PickDraw {
            clip,
            index,
            viewport: self.viewport,
        });
        Ok(())
    }

    fn read_pick_pixel(&mut self, target: PickTargetHandle, x: u32, y: u32) -> Result<[f32; 4]> {
        let image = self
            .pick_targets
            .get(target)
            .ok_or(CanopyError::UnknownResource { kind: "pick target" })?;
        // the target keeps the canvas size it was created with
        let (width, height) = image.size;
        if x >= width || y >= height {
            return Err(CanopyError::PickOutOfBounds { x, y });
        }

        let nearest = image
            .draws
            .iter()
            .filter_map(|draw| nearest_depth(draw, x, y).map(|z| (draw.index, z)))
            .min_by(|a, b| a.1.total_cmp(&b.1));

        Ok(nearest.map_or([0.0; 4], |(index, z)| encode_pick(index, z)))
    }

    fn delete_pick_target(&mut self, target: PickTargetHandle) {
        self.pick_targets.remove(target);
    }

    fn set_viewport_rectangle(&mut self, rect: Rect) {
        self.viewport = rect;
    }

    fn viewport_rectangle(&self) -> Rect {
        self.viewport
    }

    fn set_canvas_size(&mut self, width: u32, height: u32) {
        self.canvas_size = (width, height);
        self.viewport = Rect::new(0, 0, width, height);
    }

    fn canvas_size(&self) -> (u32, u32) {
        self.canvas_size
    }
}

// ============================================================================
// Software pick rasterisation
// ============================================================================

/// Smallest depth of the draw's triangles covering the centre of canvas
/// pixel `(x, y)`. Both windings count; fragments outside `0..=1` depth are
/// clipped, and triangles with a vertex behind the eye are skipped whole.
fn nearest_depth(draw: &PickDraw, x: u32, y: u32) -> Option<f32> {
    let rect = draw.viewport;
    if !rect.contains(x, y) || rect.width == 0 || rect.height == 0 {
        return None;
    }
    let centre = Vec2::new(
        (x - rect.x) as f32 + 0.5,
        (y - rect.y) as f32 + 0.5,
    );
    let ndc = Vec2::new(
        centre.x / rect.width as f32 * 2.0 - 1.0,
        1.0 - centre.y / rect.height as f32 * 2.0,
    );

    draw.clip
        .iter()
        .filter(|tri| tri.iter().all(|v| v.w > 0.0))
        .filter_map(|tri| {
            let [a, b, c] = (*tri).map(|v| v.truncate() / v.w);
            let z = interpolate_depth(ndc, a, b, c)?;
            (0.0..=1.0).contains(&z).then_some(z)
        })
        .min_by(f32::total_cmp)
}

/// Depth at `p` if it lies inside the screen-space triangle `a b c`.
fn interpolate_depth(p: Vec2, a: Vec3, b: Vec3, c: Vec3) -> Option<f32> {
    let cross = |u: Vec2, v: Vec2| u.x * v.y - u.y * v.x;
    let (a2, b2, c2) = (a.truncate(), b.truncate(), c.truncate());

    let area = cross(b2 - a2, c2 - a2);
    if area.abs() < f32::EPSILON {
        return None;
    }
    let wa = cross(b2 - p, c2 - p) / area;
    let wb = cross(c2 - p, a2 - p) / area;
    let wc = 1.0 - wa - wb;
    if wa < 0.0 || wb < 0.0 || wc < 0.0 {
        return None;
    }
    Some(wa * a.z + wb * b.z + wc * c.z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::picking::decode_pick;
    use crate::resources::create_plane;

    fn backend_with_plane(size: u32) -> (HeadlessBackend, BuffersHandle) {
        let mut backend = HeadlessBackend::new(&RenderSettings {
            canvas_size: (size, size),
            ..Default::default()
        });
        let buffers = backend.create_buffers(&create_plane(1.0, 1.0)).unwrap();
        (backend, buffers)
    }

    #[test]
    fn covered_pixel_reports_index_and_depth() {
        let (mut backend, buffers) = backend_with_plane(10);
        let target = backend.create_pick_target().unwrap();
        // plane covers ndc -0.5..0.5 at depth 0.25
        let projection = Mat4::from_translation(Vec3::new(0.0, 0.0, 0.25));
        backend.draw_pick(target, buffers, &projection, 3).unwrap();

        let (face, depth) = decode_pick(backend.read_pick_pixel(target, 5, 5).unwrap());
        assert_eq!(face, 3);
        assert!((depth - 0.25).abs() < 1e-5);

        assert_eq!(backend.read_pick_pixel(target, 0, 0).unwrap(), [0.0; 4]);
    }

    #[test]
    fn pixels_outside_the_draw_viewport_miss() {
        let (mut backend, buffers) = backend_with_plane(10);
        backend.set_viewport_rectangle(Rect::new(0, 0, 5, 5));
        let target = backend.create_pick_target().unwrap();
        let fill = Mat4::from_translation(Vec3::Z * 0.5) * Mat4::from_scale(Vec3::splat(2.0));
        backend.draw_pick(target, buffers, &fill, 1).unwrap();

        assert_eq!(decode_pick(backend.read_pick_pixel(target, 2, 2).unwrap()).0, 1);
        assert_eq!(backend.read_pick_pixel(target, 7, 7).unwrap(), [0.0; 4]);
    }

    #[test]
    fn geometry_behind_the_eye_is_skipped() {
        let (mut backend, buffers) = backend_with_plane(4);
        let target = backend.create_pick_target().unwrap();
        let flip_w = Mat4::from_diagonal(Vec4::new(1.0, 1.0, 1.0, -1.0));
        backend.draw_pick(target, buffers, &flip_w, 1).unwrap();
        assert_eq!(backend.read_pick_pixel(target, 2, 2).unwrap(), [0.0; 4]);
    }

    #[test]
    fn target_keeps_its_size_across_canvas_resize() {
        let (mut backend, buffers) = backend_with_plane(10);
        let target = backend.create_pick_target().unwrap();
        let fill = Mat4::from_translation(Vec3::Z * 0.5) * Mat4::from_scale(Vec3::splat(2.0));
        backend.draw_pick(target, buffers, &fill, 1).unwrap();

        backend.set_canvas_size(40, 40);

        assert_eq!(decode_pick(backend.read_pick_pixel(target, 9, 9).unwrap()).0, 1);
        let err = backend.read_pick_pixel(target, 20, 20).unwrap_err();
        assert!(matches!(err, CanopyError::PickOutOfBounds { x: 20, y: 20 }));
    }

    #[test]
    fn failed_creation_reports_device_error() {
        let mut backend = HeadlessBackend::default();
        backend.set_fail_creations(true);
        let err = backend.create_coat(&Coat::new(Vec4::ONE)).unwrap_err();
        assert!(matches!(err, CanopyError::ResourceCreation { kind: "coat", .. }));
        assert_eq!(backend.live_coats(), 0);
    }
}
