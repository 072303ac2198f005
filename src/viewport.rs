//! Viewport
//!
//! A [`Viewport`] ties a branch of the scene to a camera node and a rectangle
//! of the canvas. Once per frame [`Viewport::draw`] registers the branch,
//! brings world matrices up to date, uploads the lights and draws. Several
//! viewports can share one [`RenderContext`], each clearing and drawing only
//! its own rectangle.
//!
//! The list of light nodes is cached. Bubble listeners on the branch root mark
//! it dirty whenever a component or child is added or removed anywhere below.
//! Light directions are still read from the current world matrices every frame.

use std::cell::Cell;
use std::rc::Rc;

use glam::UVec2;

use crate::errors::{CanopyError, Result};
use crate::render::{LightSet, PickHit, Rect, RenderBackend, RenderContext, sort_hits};
use crate::scene::{
    ComponentCamera, ComponentLight, ListenerId, ListenerPhase, NodeEventKind, NodeHandle,
    Propagation, Scene,
};

const WATCHED_EVENTS: [NodeEventKind; 4] = [
    NodeEventKind::ComponentAdd,
    NodeEventKind::ComponentRemove,
    NodeEventKind::ChildAppend,
    NodeEventKind::ChildRemove,
];

#[derive(Debug)]
pub struct Viewport {
    pub name: String,
    root: NodeHandle,
    camera: NodeHandle,
    rect: Rect,

    light_nodes: Vec<NodeHandle>,
    lights_dirty: Rc<Cell<bool>>,
    listeners: Vec<ListenerId>,
}

impl Viewport {
    /// Creates a viewport over the branch below `root`, seen from `camera`.
    ///
    /// `camera` does not need to be part of the branch.
    pub fn new(
        scene: &mut Scene,
        name: impl Into<String>,
        root: NodeHandle,
        camera: NodeHandle,
        rect: Rect,
    ) -> Result<Self> {
        scene.node(camera)?;
        let lights_dirty = Rc::new(Cell::new(true));

        let mut listeners = Vec::with_capacity(WATCHED_EVENTS.len());
        for kind in WATCHED_EVENTS {
            let dirty = Rc::clone(&lights_dirty);
            let id = scene.add_event_listener(root, kind, ListenerPhase::Bubble, move |_, _| {
                dirty.set(true);
                Propagation::Continue
            });
            match id {
                Ok(id) => listeners.push(id),
                Err(err) => {
                    for id in listeners {
                        scene.remove_event_listener(id);
                    }
                    return Err(err);
                }
            }
        }

        Ok(Self {
            name: name.into(),
            root,
            camera,
            rect,
            light_nodes: Vec::new(),
            lights_dirty,
            listeners,
        })
    }

    #[inline]
    #[must_use]
    pub fn root(&self) -> NodeHandle {
        self.root
    }

    #[inline]
    #[must_use]
    pub fn camera(&self) -> NodeHandle {
        self.camera
    }

    #[inline]
    #[must_use]
    pub fn rect(&self) -> Rect {
        self.rect
    }

    /// Whether the cached light list will be rebuilt on the next frame.
    #[inline]
    #[must_use]
    pub fn lights_dirty(&self) -> bool {
        self.lights_dirty.get()
    }

    /// Moves the viewport and matches the camera's aspect ratio to it.
    pub fn set_rect(&mut self, scene: &mut Scene, rect: Rect) -> Result<()> {
        self.rect = rect;
        let node = scene.node_mut(self.camera)?;
        if let Some(camera) = node.component_mut::<ComponentCamera>() {
            camera.set_aspect(rect.aspect());
            node.invalidate();
        }
        Ok(())
    }

    pub fn set_camera(&mut self, scene: &Scene, camera: NodeHandle) -> Result<()> {
        scene.node(camera)?;
        self.camera = camera;
        Ok(())
    }

    /// Registers the branch and recomputes the world matrices the frame
    /// needs: the branch itself and the camera node.
    ///
    /// Returns the lights of the branch.
    fn prepare<B: RenderBackend>(&mut self, ctx: &mut RenderContext<B>, scene: &mut Scene) -> LightSet {
        for (node, err) in ctx.add_branch(scene, self.root) {
            log::debug!("Viewport '{}' skipped {node:?}: {err}", self.name);
        }

        let mut nodes: Vec<NodeHandle> = scene.branch(self.root).collect();
        nodes.push(self.camera);
        ctx.recalculate_transforms_for(scene, nodes);

        if self.lights_dirty.replace(false) {
            self.light_nodes = scene
                .branch(self.root)
                .filter(|&handle| {
                    scene
                        .get_node(handle)
                        .is_some_and(|node| node.component::<ComponentLight>().is_some())
                })
                .collect();
            log::debug!("Viewport '{}' cached {} light nodes", self.name, self.light_nodes.len());
        }

        LightSet::from_nodes(scene, self.light_nodes.iter().copied())
    }

    fn camera_component<'s>(&self, scene: &'s Scene) -> Result<&'s ComponentCamera> {
        scene
            .node(self.camera)?
            .component::<ComponentCamera>()
            .ok_or(CanopyError::MissingCamera(self.camera))
    }

    /// Draws one frame of the branch into the viewport rectangle.
    ///
    /// An inactive camera leaves the rectangle untouched.
    pub fn draw<B: RenderBackend>(&mut self, ctx: &mut RenderContext<B>, scene: &mut Scene) -> Result<()> {
        let lights = self.prepare(ctx, scene);

        let camera = self.camera_component(scene)?;
        if !camera.active {
            return Ok(());
        }

        ctx.set_lights(&lights);
        ctx.set_viewport_rectangle(self.rect);
        ctx.clear(camera.background_color);
        ctx.draw_branch(scene, self.root, camera)?;
        ctx.reset_frame_buffer()
    }

    /// Every node of the branch covering `position` (relative to the
    /// rectangle), nearest first, misses last.
    ///
    /// Blocks on the device read-back.
    pub fn pick_at<B: RenderBackend>(
        &mut self,
        ctx: &mut RenderContext<B>,
        scene: &mut Scene,
        position: UVec2,
    ) -> Result<Vec<PickHit>> {
        if position.x >= self.rect.width || position.y >= self.rect.height {
            return Err(CanopyError::PickOutOfBounds {
                x: position.x,
                y: position.y,
            });
        }
        self.prepare(ctx, scene);
        let camera = self.camera_component(scene)?;

        ctx.set_viewport_rectangle(self.rect);
        let pick_buffers = ctx.draw_branch_for_ray_cast(scene, self.root, camera)?;
        let hits = ctx.pick_node_at(position, &pick_buffers, self.rect);
        ctx.release_pick_buffers(pick_buffers);

        let mut hits = hits?;
        sort_hits(&mut hits);
        Ok(hits)
    }

    /// Nearest node under `position`, if any.
    pub fn pick_nearest<B: RenderBackend>(
        &mut self,
        ctx: &mut RenderContext<B>,
        scene: &mut Scene,
        position: UVec2,
    ) -> Result<Option<NodeHandle>> {
        let hits = self.pick_at(ctx, scene, position)?;
        Ok(hits.first().filter(|hit| hit.is_hit()).map(|hit| hit.node))
    }

    /// Removes the viewport's listeners from the scene.
    pub fn detach(self, scene: &mut Scene) {
        for id in self.listeners {
            scene.remove_event_listener(id);
        }
    }
}
