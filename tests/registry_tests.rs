//! Resource Registry Tests
//!
//! Tests for:
//! - Registration and reference counting across shared meshes and materials
//! - Rollback when a resource cannot be created
//! - Per-node failure isolation in branch operations
//! - Material/mesh swaps through update_node
//! - Canvas drawing of registered nodes

use std::sync::Arc;

use glam::{Mat4, Vec3, Vec4};

use canopy::errors::CanopyError;
use canopy::render::{HeadlessBackend, RenderContext, RenderSettings};
use canopy::resources::{Coat, Material, Mesh, SHADER_FLAT, SHADER_UNLIT, create_box, create_plane};
use canopy::scene::{ComponentCamera, ComponentMaterial, ComponentMesh, NodeHandle, Scene};

const RED: Vec4 = Vec4::new(1.0, 0.0, 0.0, 1.0);
const BLUE: Vec4 = Vec4::new(0.0, 0.0, 1.0, 1.0);

fn context() -> RenderContext<HeadlessBackend> {
    let _ = env_logger::builder().is_test(true).try_init();
    RenderContext::new(HeadlessBackend::new(&RenderSettings::default()))
}

fn renderable(scene: &mut Scene, name: &str, mesh: &Arc<Mesh>, material: &Arc<Material>) -> NodeHandle {
    scene
        .build_node(name)
        .with_component(ComponentMesh::new(Arc::clone(mesh)))
        .with_component(ComponentMaterial::new(Arc::clone(material)))
        .build()
        .unwrap()
}

// ============================================================================
// Registration
// ============================================================================

#[test]
fn add_node_takes_one_count_on_each_resource() {
    let mut ctx = context();
    let mut scene = Scene::new();
    let mesh = Arc::new(create_box(1.0, 1.0, 1.0));
    let material = Arc::new(Material::unlit(RED));
    let node = renderable(&mut scene, "cube", &mesh, &material);

    ctx.add_node(&scene, node).unwrap();

    assert!(ctx.is_registered(node));
    assert_eq!(ctx.mesh_reference_count(mesh.id()), 1);
    assert_eq!(ctx.coat_reference_count(material.coat().id()), 1);
    assert_eq!(ctx.program_reference_count(SHADER_UNLIT.key()), 1);
    assert_eq!(ctx.resource_counts(), (1, 1, 1));
    assert_eq!(ctx.backend().created_resources(), 3);
}

#[test]
fn add_node_is_idempotent() {
    let mut ctx = context();
    let mut scene = Scene::new();
    let mesh = Arc::new(create_box(1.0, 1.0, 1.0));
    let material = Arc::new(Material::unlit(RED));
    let node = renderable(&mut scene, "cube", &mesh, &material);

    ctx.add_node(&scene, node).unwrap();
    ctx.add_node(&scene, node).unwrap();

    assert_eq!(ctx.mesh_reference_count(mesh.id()), 1);
    assert_eq!(ctx.registered_count(), 1);
}

#[test]
fn nodes_without_mesh_or_material_are_skipped() {
    let mut ctx = context();
    let mut scene = Scene::new();
    let mesh = Arc::new(create_box(1.0, 1.0, 1.0));
    let group = scene.create_node("group");
    let bare = scene
        .build_node("mesh only")
        .with_component(ComponentMesh::new(mesh))
        .build()
        .unwrap();

    ctx.add_node(&scene, group).unwrap();
    ctx.add_node(&scene, bare).unwrap();

    assert_eq!(ctx.registered_count(), 0);
    assert_eq!(ctx.backend().created_resources(), 0);
}

#[test]
fn shared_resources_live_until_last_node_leaves() {
    let mut ctx = context();
    let mut scene = Scene::new();
    let mesh = Arc::new(create_box(1.0, 1.0, 1.0));
    let material = Arc::new(Material::flat(BLUE));
    let first = renderable(&mut scene, "first", &mesh, &material);
    let second = renderable(&mut scene, "second", &mesh, &material);

    ctx.add_node(&scene, first).unwrap();
    ctx.add_node(&scene, second).unwrap();

    assert_eq!(ctx.mesh_reference_count(mesh.id()), 2);
    assert_eq!(ctx.program_reference_count(SHADER_FLAT.key()), 2);
    assert_eq!(ctx.backend().created_resources(), 3);

    ctx.remove_node(first).unwrap();
    assert_eq!(ctx.mesh_reference_count(mesh.id()), 1);
    assert_eq!(ctx.backend().live_buffers(), 1);
    assert_eq!(ctx.backend().live_coats(), 1);
    assert_eq!(ctx.backend().live_programs(), 1);

    ctx.remove_node(second).unwrap();
    assert_eq!(ctx.mesh_reference_count(mesh.id()), 0);
    assert_eq!(ctx.resource_counts(), (0, 0, 0));
    assert_eq!(ctx.backend().live_buffers(), 0);
    assert_eq!(ctx.backend().live_coats(), 0);
    assert_eq!(ctx.backend().live_programs(), 0);
}

#[test]
fn materials_sharing_a_coat_share_one_block() {
    let mut ctx = context();
    let mut scene = Scene::new();
    let mesh = Arc::new(create_plane(1.0, 1.0));
    let coat = Arc::new(Coat::new(RED));
    let unlit = Arc::new(Material::new("unlit red", &SHADER_UNLIT, Arc::clone(&coat)));
    let flat = Arc::new(Material::new("flat red", &SHADER_FLAT, Arc::clone(&coat)));
    let a = renderable(&mut scene, "a", &mesh, &unlit);
    let b = renderable(&mut scene, "b", &mesh, &flat);

    ctx.add_node(&scene, a).unwrap();
    ctx.add_node(&scene, b).unwrap();

    assert_eq!(ctx.coat_reference_count(coat.id()), 2);
    assert_eq!(ctx.resource_counts(), (2, 1, 1));
}

#[test]
fn remove_unregistered_node_is_noop() {
    let mut ctx = context();
    let mut scene = Scene::new();
    let node = scene.create_node("never registered");

    ctx.remove_node(node).unwrap();

    assert_eq!(ctx.registered_count(), 0);
}

#[test]
fn second_remove_of_registered_node_is_noop() {
    let mut ctx = context();
    let mut scene = Scene::new();
    let mesh = Arc::new(create_box(1.0, 1.0, 1.0));
    let material = Arc::new(Material::unlit(RED));
    let node = renderable(&mut scene, "cube", &mesh, &material);
    let other = renderable(&mut scene, "twin", &mesh, &material);
    ctx.add_node(&scene, node).unwrap();
    ctx.add_node(&scene, other).unwrap();

    ctx.remove_node(node).unwrap();
    ctx.remove_node(node).unwrap();

    assert!(!ctx.is_registered(node));
    // the twin's counts are untouched by the repeated removal
    assert_eq!(ctx.mesh_reference_count(mesh.id()), 1);
    assert_eq!(ctx.coat_reference_count(material.coat().id()), 1);
    assert_eq!(ctx.program_reference_count(SHADER_UNLIT.key()), 1);
    assert_eq!(ctx.resource_counts(), (1, 1, 1));
}

#[test]
fn remove_node_works_after_scene_destroyed_it() {
    let mut ctx = context();
    let mut scene = Scene::new();
    let mesh = Arc::new(create_box(1.0, 1.0, 1.0));
    let material = Arc::new(Material::unlit(RED));
    let node = renderable(&mut scene, "cube", &mesh, &material);
    ctx.add_node(&scene, node).unwrap();

    scene.destroy_node(node).unwrap();
    ctx.remove_node(node).unwrap();

    assert_eq!(ctx.backend().live_buffers(), 0);
}

#[test]
fn prune_releases_destroyed_nodes() {
    let mut ctx = context();
    let mut scene = Scene::new();
    let mesh = Arc::new(create_box(1.0, 1.0, 1.0));
    let material = Arc::new(Material::unlit(RED));
    let kept = renderable(&mut scene, "kept", &mesh, &material);
    let dropped = renderable(&mut scene, "dropped", &mesh, &material);
    ctx.add_node(&scene, kept).unwrap();
    ctx.add_node(&scene, dropped).unwrap();

    scene.destroy_node(dropped).unwrap();
    let failures = ctx.prune(&scene);

    assert!(failures.is_empty());
    assert!(ctx.is_registered(kept));
    assert!(!ctx.is_registered(dropped));
    assert_eq!(ctx.mesh_reference_count(mesh.id()), 1);
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn failed_creation_leaves_node_unregistered() {
    let mut ctx = context();
    let mut scene = Scene::new();
    let mesh = Arc::new(create_box(1.0, 1.0, 1.0));
    let material = Arc::new(Material::unlit(RED));
    let node = renderable(&mut scene, "cube", &mesh, &material);

    ctx.backend_mut().set_fail_creations(true);
    let err = ctx.add_node(&scene, node).unwrap_err();

    assert!(matches!(err, CanopyError::ResourceCreation { kind: "program", .. }));
    assert!(!ctx.is_registered(node));
    assert_eq!(ctx.resource_counts(), (0, 0, 0));
}

#[test]
fn partial_failure_returns_counts_already_taken() {
    let mut ctx = context();
    let mut scene = Scene::new();
    let mesh = Arc::new(create_box(1.0, 1.0, 1.0));
    let first_material = Arc::new(Material::unlit(RED));
    let first = renderable(&mut scene, "first", &mesh, &first_material);
    ctx.add_node(&scene, first).unwrap();

    // same shader class, new coat: the program is shared, the coat must be created
    let second_material = Arc::new(Material::unlit(BLUE));
    let second = renderable(&mut scene, "second", &mesh, &second_material);
    ctx.backend_mut().set_fail_creations(true);
    let err = ctx.add_node(&scene, second).unwrap_err();

    assert!(matches!(err, CanopyError::ResourceCreation { kind: "coat", .. }));
    assert!(!ctx.is_registered(second));
    assert_eq!(ctx.program_reference_count(SHADER_UNLIT.key()), 1);
    assert_eq!(ctx.mesh_reference_count(mesh.id()), 1);
    assert_eq!(ctx.coat_reference_count(second_material.coat().id()), 0);
}

#[test]
fn add_branch_isolates_failing_nodes() {
    let mut ctx = context();
    let mut scene = Scene::new();
    let good_mesh = Arc::new(create_box(1.0, 1.0, 1.0));
    let empty_mesh = Arc::new(Mesh::new("empty", Vec::new(), Vec::new()));
    let material = Arc::new(Material::unlit(RED));

    let root = renderable(&mut scene, "root", &good_mesh, &material);
    let broken = renderable(&mut scene, "broken", &empty_mesh, &material);
    let sibling = renderable(&mut scene, "sibling", &good_mesh, &material);
    scene.append_child(root, broken).unwrap();
    scene.append_child(root, sibling).unwrap();

    let failures = ctx.add_branch(&scene, root);

    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, broken);
    assert!(matches!(failures[0].1, CanopyError::ResourceCreation { kind: "buffers", .. }));
    assert!(ctx.is_registered(root));
    assert!(ctx.is_registered(sibling));
    assert!(!ctx.is_registered(broken));
    // the failed node handed its program and coat counts back
    assert_eq!(ctx.coat_reference_count(material.coat().id()), 2);
}

#[test]
fn remove_branch_unregisters_whole_subtree() {
    let mut ctx = context();
    let mut scene = Scene::new();
    let mesh = Arc::new(create_box(1.0, 1.0, 1.0));
    let material = Arc::new(Material::unlit(RED));
    let root = renderable(&mut scene, "root", &mesh, &material);
    let child = renderable(&mut scene, "child", &mesh, &material);
    scene.append_child(root, child).unwrap();

    assert!(ctx.add_branch(&scene, root).is_empty());
    assert!(ctx.remove_branch(&scene, root).is_empty());

    assert_eq!(ctx.registered_count(), 0);
    assert_eq!(ctx.resource_counts(), (0, 0, 0));
}

// ============================================================================
// Updates
// ============================================================================

#[test]
fn update_node_swaps_material() {
    let mut ctx = context();
    let mut scene = Scene::new();
    let mesh = Arc::new(create_box(1.0, 1.0, 1.0));
    let red = Arc::new(Material::unlit(RED));
    let blue = Arc::new(Material::flat(BLUE));
    let node = renderable(&mut scene, "cube", &mesh, &red);
    let other = renderable(&mut scene, "other", &mesh, &red);
    ctx.add_node(&scene, node).unwrap();
    ctx.add_node(&scene, other).unwrap();

    scene.remove_component::<ComponentMaterial>(node).unwrap();
    scene.add_component(node, ComponentMaterial::new(Arc::clone(&blue))).unwrap();
    ctx.update_node(&scene, node).unwrap();

    let keys = ctx.node_resources(node).unwrap();
    assert_eq!(keys.shader, SHADER_FLAT.key());
    assert_eq!(keys.coat, blue.coat().id());
    assert_eq!(ctx.coat_reference_count(red.coat().id()), 1);
    assert_eq!(ctx.coat_reference_count(blue.coat().id()), 1);
    assert_eq!(ctx.program_reference_count(SHADER_UNLIT.key()), 1);
    // mesh untouched, still shared
    assert_eq!(ctx.mesh_reference_count(mesh.id()), 2);
    assert_eq!(ctx.backend().live_buffers(), 1);
}

#[test]
fn update_node_releases_resources_nobody_else_uses() {
    let mut ctx = context();
    let mut scene = Scene::new();
    let old_mesh = Arc::new(create_box(1.0, 1.0, 1.0));
    let new_mesh = Arc::new(create_plane(2.0, 2.0));
    let material = Arc::new(Material::unlit(RED));
    let node = renderable(&mut scene, "cube", &old_mesh, &material);
    ctx.add_node(&scene, node).unwrap();

    scene.remove_component::<ComponentMesh>(node).unwrap();
    scene.add_component(node, ComponentMesh::new(Arc::clone(&new_mesh))).unwrap();
    ctx.update_node(&scene, node).unwrap();

    assert_eq!(ctx.mesh_reference_count(old_mesh.id()), 0);
    assert_eq!(ctx.mesh_reference_count(new_mesh.id()), 1);
    assert_eq!(ctx.backend().live_buffers(), 1);
}

#[test]
fn update_node_leaves_unrelated_meshes_alone() {
    let mut ctx = context();
    let mut scene = Scene::new();
    let mesh_a = Arc::new(create_box(1.0, 1.0, 1.0));
    let mesh_b = Arc::new(create_plane(1.0, 1.0));
    let mesh_c = Arc::new(create_box(2.0, 2.0, 2.0));
    let material = Arc::new(Material::unlit(RED));
    let swapped = renderable(&mut scene, "swapped", &mesh_a, &material);
    let keeps_a = renderable(&mut scene, "keeps a", &mesh_a, &material);
    let uses_b = renderable(&mut scene, "uses b", &mesh_b, &material);
    let uses_c = renderable(&mut scene, "uses c", &mesh_c, &material);
    for node in [swapped, keeps_a, uses_b, uses_c] {
        ctx.add_node(&scene, node).unwrap();
    }
    let created = ctx.backend().created_resources();

    scene.remove_component::<ComponentMesh>(swapped).unwrap();
    scene.add_component(swapped, ComponentMesh::new(Arc::clone(&mesh_b))).unwrap();
    ctx.update_node(&scene, swapped).unwrap();

    assert_eq!(ctx.mesh_reference_count(mesh_a.id()), 1);
    assert_eq!(ctx.mesh_reference_count(mesh_b.id()), 2);
    assert_eq!(ctx.mesh_reference_count(mesh_c.id()), 1);
    assert_eq!(ctx.backend().live_buffers(), 3);
    // B was shared already, nothing was recreated
    assert_eq!(ctx.backend().created_resources(), created);
}

#[test]
fn update_node_registers_and_unregisters() {
    let mut ctx = context();
    let mut scene = Scene::new();
    let mesh = Arc::new(create_box(1.0, 1.0, 1.0));
    let material = Arc::new(Material::unlit(RED));
    let node = scene
        .build_node("late")
        .with_component(ComponentMesh::new(Arc::clone(&mesh)))
        .build()
        .unwrap();

    ctx.update_node(&scene, node).unwrap();
    assert!(!ctx.is_registered(node));

    scene.add_component(node, ComponentMaterial::new(material)).unwrap();
    ctx.update_node(&scene, node).unwrap();
    assert!(ctx.is_registered(node));

    scene.remove_component::<ComponentMesh>(node).unwrap();
    ctx.update_node(&scene, node).unwrap();
    assert!(!ctx.is_registered(node));
    assert_eq!(ctx.resource_counts(), (0, 0, 0));
}

#[test]
fn update_branch_follows_every_node() {
    let mut ctx = context();
    let mut scene = Scene::new();
    let mesh = Arc::new(create_box(1.0, 1.0, 1.0));
    let red = Arc::new(Material::unlit(RED));
    let blue = Arc::new(Material::unlit(BLUE));
    let root = renderable(&mut scene, "root", &mesh, &red);
    let child = renderable(&mut scene, "child", &mesh, &red);
    scene.append_child(root, child).unwrap();
    ctx.add_branch(&scene, root);

    for node in [root, child] {
        scene.remove_component::<ComponentMaterial>(node).unwrap();
        scene.add_component(node, ComponentMaterial::new(Arc::clone(&blue))).unwrap();
    }
    let failures = ctx.update_branch(&scene, root);

    assert!(failures.is_empty());
    assert_eq!(ctx.coat_reference_count(blue.coat().id()), 2);
    assert_eq!(ctx.backend().live_coats(), 1);
}

// ============================================================================
// Drawing
// ============================================================================

#[test]
fn draw_branch_draws_registered_nodes_in_order() {
    let mut ctx = context();
    let mut scene = Scene::new();
    let mesh = Arc::new(create_box(1.0, 1.0, 1.0));
    let red = Arc::new(Material::unlit(RED));
    let blue = Arc::new(Material::flat(BLUE));

    let root = scene.create_node("root");
    let first = renderable(&mut scene, "first", &mesh, &red);
    let second = renderable(&mut scene, "second", &mesh, &blue);
    scene.append_child(root, first).unwrap();
    scene.append_child(root, second).unwrap();
    scene
        .set_local_matrix(second, Mat4::from_translation(Vec3::new(2.0, 0.0, 0.0)))
        .unwrap();

    let camera = scene
        .build_node("camera")
        .with_position(0.0, 0.0, 5.0)
        .with_component(ComponentCamera::new_perspective(60.0, 1.0, 0.1, 100.0))
        .build()
        .unwrap();

    ctx.add_branch(&scene, root);
    ctx.recalculate_transforms_for(&mut scene, [root, camera]);

    let camera = scene.node(camera).unwrap().component::<ComponentCamera>().unwrap();
    ctx.draw_branch(&scene, root, camera).unwrap();

    let log = ctx.backend().draw_log();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].shader, SHADER_UNLIT.name);
    assert_eq!(log[0].color, RED);
    assert_eq!(log[1].shader, SHADER_FLAT.name);
    assert_eq!(log[1].world, Mat4::from_translation(Vec3::new(2.0, 0.0, 0.0)));
    assert_eq!(log[1].projection, *camera.view_projection_matrix() * log[1].world);
}

#[test]
fn mesh_pivot_applies_after_world_matrix() {
    let mut ctx = context();
    let mut scene = Scene::new();
    let mesh = Arc::new(create_box(1.0, 1.0, 1.0));
    let material = Arc::new(Material::unlit(RED));
    let pivot = Mat4::from_scale(Vec3::splat(3.0));
    let node = scene
        .build_node("pivoted")
        .with_position(1.0, 0.0, 0.0)
        .with_component(ComponentMesh {
            mesh,
            pivot,
        })
        .with_component(ComponentMaterial::new(material))
        .build()
        .unwrap();
    let camera = ComponentCamera::new_orthographic(1.0, 1.0, 0.1, 10.0);

    ctx.add_node(&scene, node).unwrap();
    ctx.update(&mut scene);
    ctx.draw_branch(&scene, node, &camera).unwrap();

    let expected = Mat4::from_translation(Vec3::X) * pivot;
    assert_eq!(ctx.backend().draw_log()[0].world, expected);
}
