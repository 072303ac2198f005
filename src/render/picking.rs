//! Picking
//!
//! Each registered node of a branch is rendered alone into its own offscreen
//! target with an identity-encoding shader. Reading back the single texel
//! under the cursor from every target then tells which nodes cover that
//! pixel and how far away they are.
//!
//! # Pixel encoding
//!
//! | Channel | Content |
//! |---|---|
//! | R | 1-based pick index of the node (the "face") |
//! | G | `trunc(z * 256) / 256` |
//! | B | `fract(z * 256)` |
//! | A | 1 |
//!
//! `z` is the fragment's normalized depth. It decodes as `G + B / 256`. A
//! target pixel no fragment reached stays cleared to zero, and depth zero is
//! read as "no hit".

use std::cmp::Ordering;

use glam::{Mat4, UVec2};

use crate::errors::{CanopyError, Result};
use crate::render::backend::{PickTargetHandle, Rect, RenderBackend};
use crate::render::context::RenderContext;
use crate::scene::{ComponentCamera, NodeHandle, Scene};

/// Offscreen target holding one node's identity/depth image for one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PickBuffer {
    pub node: NodeHandle,
    pub target: PickTargetHandle,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PickHit {
    pub node: NodeHandle,
    /// Pick index read from the pixel, 0 when nothing was hit.
    pub face: u32,
    /// Normalized depth, 0 when nothing was hit.
    pub depth: f32,
}

impl PickHit {
    #[inline]
    #[must_use]
    pub fn is_hit(&self) -> bool {
        self.depth > 0.0
    }

    /// Nonzero depths ascending, misses after every hit.
    #[must_use]
    pub fn nearest_first(a: &Self, b: &Self) -> Ordering {
        match (a.depth == 0.0, b.depth == 0.0) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => a.depth.total_cmp(&b.depth),
        }
    }
}

/// Sorts hits nearest first. Stable, so misses keep their pass order.
pub fn sort_hits(hits: &mut [PickHit]) {
    hits.sort_by(PickHit::nearest_first);
}

/// Pixel value the pick shader writes for `index` at depth `z`.
#[must_use]
pub fn encode_pick(index: u32, z: f32) -> [f32; 4] {
    let scaled = z * 256.0;
    [index as f32, scaled.trunc() / 256.0, scaled.fract(), 1.0]
}

/// Splits a pick pixel into `(face, depth)`.
#[must_use]
pub fn decode_pick(pixel: [f32; 4]) -> (u32, f32) {
    let face = pixel[0].round().max(0.0) as u32;
    let depth = pixel[1] + pixel[2] / 256.0;
    (face, depth)
}

impl<B: RenderBackend> RenderContext<B> {
    /// Renders every registered node of the branch into its own pick target.
    ///
    /// The canvas is left alone. On error the targets created so far are
    /// released before returning.
    pub fn draw_branch_for_ray_cast(
        &mut self,
        scene: &Scene,
        root: NodeHandle,
        camera: &ComponentCamera,
    ) -> Result<Vec<PickBuffer>> {
        let mut pick_buffers = Vec::new();
        let drawn = self.draw_branch_with(scene, root, camera, |ctx, handle, _, projection| {
            ctx.draw_node_for_ray_cast(handle, projection, &mut pick_buffers)
        });

        match drawn.and_then(|()| self.backend.reset_frame_buffer()) {
            Ok(()) => Ok(pick_buffers),
            Err(err) => {
                self.release_pick_buffers(pick_buffers);
                Err(err)
            }
        }
    }

    /// Pick path for one node: fresh target, identity draw, append.
    pub fn draw_node_for_ray_cast(
        &mut self,
        handle: NodeHandle,
        projection: &Mat4,
        pick_buffers: &mut Vec<PickBuffer>,
    ) -> Result<()> {
        if !self.is_registered(handle) {
            return Ok(());
        }
        let buffers = self.buffers_of(handle)?;
        let index = pick_buffers.len() as u32 + 1;

        let target = self.backend.create_pick_target()?;
        if let Err(err) = self.backend.draw_pick(target, buffers, projection, index) {
            self.backend.delete_pick_target(target);
            return Err(err);
        }
        pick_buffers.push(PickBuffer { node: handle, target });
        Ok(())
    }

    /// Reads the pixel at `position` (relative to `rect`) from every pick
    /// buffer. One record per buffer, misses included, in buffer order.
    ///
    /// Blocks on the device read-back.
    pub fn pick_node_at(
        &mut self,
        position: UVec2,
        pick_buffers: &[PickBuffer],
        rect: Rect,
    ) -> Result<Vec<PickHit>> {
        if position.x >= rect.width || position.y >= rect.height {
            return Err(CanopyError::PickOutOfBounds {
                x: position.x,
                y: position.y,
            });
        }
        let (x, y) = (rect.x + position.x, rect.y + position.y);

        pick_buffers
            .iter()
            .map(|pick| {
                let (face, depth) = decode_pick(self.backend.read_pick_pixel(pick.target, x, y)?);
                Ok(PickHit {
                    node: pick.node,
                    face,
                    depth,
                })
            })
            .collect()
    }

    /// Frees the targets of a finished pick pass.
    pub fn release_pick_buffers(&mut self, pick_buffers: Vec<PickBuffer>) {
        for pick in pick_buffers {
            self.backend.delete_pick_target(pick.target);
        }
    }
}
