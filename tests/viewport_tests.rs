//! Viewport Tests
//!
//! Tests for:
//! - Frame sequence: register, transform, lights, clear, draw, flush
//! - Light cache invalidation through node events
//! - Several viewports sharing one render context
//! - Picking through the viewport

use std::sync::Arc;

use glam::{Mat4, UVec2, Vec3, Vec4};

use canopy::errors::CanopyError;
use canopy::render::{HeadlessBackend, Rect, RenderContext, RenderSettings};
use canopy::resources::{Material, create_box};
use canopy::scene::{ComponentCamera, ComponentLight, ComponentMaterial, ComponentMesh, NodeHandle, Scene};
use canopy::viewport::Viewport;

const EPSILON: f32 = 1e-5;
const GREY: Vec4 = Vec4::new(0.2, 0.2, 0.2, 1.0);
const SKY: Vec4 = Vec4::new(0.4, 0.6, 0.9, 1.0);

struct World {
    ctx: RenderContext<HeadlessBackend>,
    scene: Scene,
    root: NodeHandle,
    cube: NodeHandle,
    camera: NodeHandle,
}

fn world() -> World {
    let _ = env_logger::builder().is_test(true).try_init();
    let ctx = RenderContext::new(HeadlessBackend::new(&RenderSettings {
        canvas_size: (200, 100),
        ..Default::default()
    }));
    let mut scene = Scene::new();

    let root = scene.create_node("root");
    let cube = scene
        .build_node("cube")
        .with_component(ComponentMesh::new(Arc::new(create_box(1.0, 1.0, 1.0))))
        .with_component(ComponentMaterial::new(Arc::new(Material::flat(Vec4::ONE))))
        .with_parent(root)
        .build()
        .unwrap();
    let mut lens = ComponentCamera::new_perspective(60.0, 1.0, 0.1, 100.0);
    lens.background_color = SKY;
    let camera = scene
        .build_node("camera")
        .with_position(0.0, 0.0, 5.0)
        .with_component(lens)
        .build()
        .unwrap();

    World {
        ctx,
        scene,
        root,
        cube,
        camera,
    }
}

// ============================================================================
// Frame
// ============================================================================

#[test]
fn draw_runs_a_full_frame() {
    let mut w = world();
    let rect = Rect::new(0, 0, 100, 100);
    let mut viewport = Viewport::new(&mut w.scene, "main", w.root, w.camera, rect).unwrap();

    viewport.draw(&mut w.ctx, &mut w.scene).unwrap();

    assert!(w.ctx.is_registered(w.cube));
    let backend = w.ctx.backend();
    assert_eq!(backend.last_clear(), Some((SKY, rect)));
    assert_eq!(backend.frames(), 1);
    assert_eq!(backend.draw_log().len(), 1);
    assert_eq!(backend.draw_log()[0].viewport, rect);
    assert_eq!(backend.draw_log()[0].shader, "flat");
}

#[test]
fn draw_uses_fresh_camera_matrices() {
    let mut w = world();
    let mut viewport =
        Viewport::new(&mut w.scene, "main", w.root, w.camera, Rect::new(0, 0, 100, 100)).unwrap();
    viewport.draw(&mut w.ctx, &mut w.scene).unwrap();

    w.scene.set_local_matrix(w.camera, Mat4::from_translation(Vec3::new(0.0, 0.0, 9.0))).unwrap();
    w.ctx.backend_mut().take_draw_log();
    viewport.draw(&mut w.ctx, &mut w.scene).unwrap();

    let camera = w.scene.node(w.camera).unwrap().component::<ComponentCamera>().unwrap();
    let expected = *camera.projection_matrix() * Mat4::from_translation(Vec3::new(0.0, 0.0, -9.0));
    let drawn = w.ctx.backend().draw_log()[0].projection;
    assert!(drawn.abs_diff_eq(expected, EPSILON));
}

#[test]
fn inactive_camera_draws_nothing() {
    let mut w = world();
    w.scene
        .node_mut(w.camera)
        .unwrap()
        .component_mut::<ComponentCamera>()
        .unwrap()
        .active = false;
    let mut viewport =
        Viewport::new(&mut w.scene, "main", w.root, w.camera, Rect::new(0, 0, 100, 100)).unwrap();

    viewport.draw(&mut w.ctx, &mut w.scene).unwrap();

    assert_eq!(w.ctx.backend().frames(), 0);
    assert!(w.ctx.backend().last_clear().is_none());
}

#[test]
fn camera_node_without_camera_is_an_error() {
    let mut w = world();
    let mut viewport =
        Viewport::new(&mut w.scene, "main", w.root, w.cube, Rect::new(0, 0, 100, 100)).unwrap();

    let err = viewport.draw(&mut w.ctx, &mut w.scene).unwrap_err();

    assert!(matches!(err, CanopyError::MissingCamera(node) if node == w.cube));
}

#[test]
fn set_rect_matches_camera_aspect() {
    let mut w = world();
    let mut viewport =
        Viewport::new(&mut w.scene, "main", w.root, w.camera, Rect::new(0, 0, 100, 100)).unwrap();

    viewport.set_rect(&mut w.scene, Rect::new(0, 0, 200, 100)).unwrap();
    viewport.draw(&mut w.ctx, &mut w.scene).unwrap();

    let camera = w.scene.node(w.camera).unwrap().component::<ComponentCamera>().unwrap();
    assert_eq!(*camera.projection_matrix(), Mat4::perspective_rh(60f32.to_radians(), 2.0, 0.1, 100.0));
    assert_eq!(w.ctx.backend().last_clear().unwrap().1, Rect::new(0, 0, 200, 100));
}

#[test]
fn viewports_share_one_context() {
    let mut w = world();
    let left = Rect::new(0, 0, 100, 100);
    let right = Rect::new(100, 0, 100, 100);
    let mut first = Viewport::new(&mut w.scene, "left", w.root, w.camera, left).unwrap();
    let mut second = Viewport::new(&mut w.scene, "right", w.root, w.camera, right).unwrap();

    first.draw(&mut w.ctx, &mut w.scene).unwrap();
    second.draw(&mut w.ctx, &mut w.scene).unwrap();

    let viewports: Vec<Rect> = w.ctx.backend().draw_log().iter().map(|d| d.viewport).collect();
    assert_eq!(viewports, vec![left, right]);
    // the cube is registered once for both
    assert_eq!(w.ctx.registered_count(), 1);
    assert_eq!(w.ctx.backend().live_buffers(), 1);
}

// ============================================================================
// Lights
// ============================================================================

#[test]
fn lights_of_the_branch_are_uploaded() {
    let mut w = world();
    w.scene.add_component(w.root, ComponentLight::ambient(GREY)).unwrap();
    w.scene
        .build_node("sun")
        .with_local_matrix(Mat4::from_rotation_y(std::f32::consts::FRAC_PI_2))
        .with_component(ComponentLight::directional(Vec4::ONE))
        .with_parent(w.root)
        .build()
        .unwrap();
    let mut viewport =
        Viewport::new(&mut w.scene, "main", w.root, w.camera, Rect::new(0, 0, 100, 100)).unwrap();

    viewport.draw(&mut w.ctx, &mut w.scene).unwrap();

    let lights = w.ctx.backend().lights();
    assert_eq!(lights.ambient, GREY);
    assert_eq!(lights.directional.len(), 1);
    // +Z turned a quarter around Y points along +X
    assert!(lights.directional[0].direction.abs_diff_eq(Vec3::X, EPSILON));
}

#[test]
fn added_light_invalidates_cache() {
    let mut w = world();
    let mut viewport =
        Viewport::new(&mut w.scene, "main", w.root, w.camera, Rect::new(0, 0, 100, 100)).unwrap();
    viewport.draw(&mut w.ctx, &mut w.scene).unwrap();
    assert!(!viewport.lights_dirty());
    assert!(w.ctx.backend().lights().directional.is_empty());

    w.scene.add_component(w.cube, ComponentLight::directional(Vec4::ONE)).unwrap();
    assert!(viewport.lights_dirty());

    viewport.draw(&mut w.ctx, &mut w.scene).unwrap();
    assert_eq!(w.ctx.backend().lights().directional.len(), 1);
}

#[test]
fn light_added_through_new_child_is_seen() {
    let mut w = world();
    let mut viewport =
        Viewport::new(&mut w.scene, "main", w.root, w.camera, Rect::new(0, 0, 100, 100)).unwrap();
    viewport.draw(&mut w.ctx, &mut w.scene).unwrap();

    // built detached, so only the append reaches the root
    let lamp = w
        .scene
        .build_node("lamp")
        .with_component(ComponentLight::ambient(GREY))
        .build()
        .unwrap();
    assert!(!viewport.lights_dirty());
    w.scene.append_child(w.cube, lamp).unwrap();
    assert!(viewport.lights_dirty());

    viewport.draw(&mut w.ctx, &mut w.scene).unwrap();
    assert_eq!(w.ctx.backend().lights().ambient, GREY);
}

#[test]
fn moving_a_light_needs_no_invalidation() {
    let mut w = world();
    let sun = w
        .scene
        .build_node("sun")
        .with_component(ComponentLight::directional(Vec4::ONE))
        .with_parent(w.root)
        .build()
        .unwrap();
    let mut viewport =
        Viewport::new(&mut w.scene, "main", w.root, w.camera, Rect::new(0, 0, 100, 100)).unwrap();
    viewport.draw(&mut w.ctx, &mut w.scene).unwrap();
    assert!(w.ctx.backend().lights().directional[0].direction.abs_diff_eq(Vec3::Z, EPSILON));

    w.scene.set_local_matrix(sun, Mat4::from_rotation_x(-std::f32::consts::FRAC_PI_2)).unwrap();
    viewport.draw(&mut w.ctx, &mut w.scene).unwrap();

    let direction = w.ctx.backend().lights().directional[0].direction;
    assert!(direction.abs_diff_eq(Vec3::Y, EPSILON), "got {direction}");
}

#[test]
fn detached_viewport_stops_listening() {
    let mut w = world();
    let viewport =
        Viewport::new(&mut w.scene, "main", w.root, w.camera, Rect::new(0, 0, 100, 100)).unwrap();
    let mut other =
        Viewport::new(&mut w.scene, "other", w.root, w.camera, Rect::new(0, 0, 100, 100)).unwrap();
    other.draw(&mut w.ctx, &mut w.scene).unwrap();

    viewport.detach(&mut w.scene);
    w.scene.add_component(w.cube, ComponentLight::ambient(GREY)).unwrap();

    // the remaining viewport still reacts
    assert!(other.lights_dirty());
}

// ============================================================================
// Picking
// ============================================================================

#[test]
fn pick_at_centre_finds_the_cube() {
    let mut w = world();
    let mut viewport =
        Viewport::new(&mut w.scene, "main", w.root, w.camera, Rect::new(100, 0, 100, 100)).unwrap();

    let hits = viewport.pick_at(&mut w.ctx, &mut w.scene, UVec2::new(50, 50)).unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].node, w.cube);
    assert!(hits[0].is_hit());
    assert_eq!(w.ctx.backend().live_pick_targets(), 0);
}

#[test]
fn pick_nearest_prefers_front_node() {
    let mut w = world();
    let front = w
        .scene
        .build_node("front")
        .with_position(0.0, 0.0, 2.0)
        .with_component(ComponentMesh::new(Arc::new(create_box(0.5, 0.5, 0.5))))
        .with_component(ComponentMaterial::new(Arc::new(Material::unlit(Vec4::ONE))))
        .with_parent(w.root)
        .build()
        .unwrap();
    let mut viewport =
        Viewport::new(&mut w.scene, "main", w.root, w.camera, Rect::new(0, 0, 100, 100)).unwrap();

    let nearest = viewport.pick_nearest(&mut w.ctx, &mut w.scene, UVec2::new(50, 50)).unwrap();
    let corner = viewport.pick_nearest(&mut w.ctx, &mut w.scene, UVec2::new(1, 1)).unwrap();

    assert_eq!(nearest, Some(front));
    assert_eq!(corner, None);
}

#[test]
fn pick_outside_viewport_is_rejected() {
    let mut w = world();
    let mut viewport =
        Viewport::new(&mut w.scene, "main", w.root, w.camera, Rect::new(0, 0, 100, 100)).unwrap();

    let err = viewport.pick_at(&mut w.ctx, &mut w.scene, UVec2::new(100, 0)).unwrap_err();

    assert!(matches!(err, CanopyError::PickOutOfBounds { x: 100, y: 0 }));
}
