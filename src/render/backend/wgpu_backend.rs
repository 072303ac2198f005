//! wgpu backend
//!
//! Renders into an offscreen canvas texture owned by the backend.
//!
//! # Canvas
//!
//! `clear` and `draw` only record work. `reset_frame_buffer` uploads the
//! per-object matrices into one dynamic-offset uniform buffer and replays the
//! recorded operations in a single render pass, each with the viewport that
//! was current when it was recorded. Clears are drawn as a viewport-sized
//! triangle so several viewports can share the canvas.
//!
//! Bind groups of the canvas pipelines:
//! - group 0: frame lights
//! - group 1: coat colour
//! - group 2: object matrices (dynamic offset)
//!
//! # Picking
//!
//! Pick targets are `Rgba32Uint` + depth textures of canvas size. The pick
//! shader stores the bits of its f32 encoding, so the read-back texel is
//! reinterpreted as four f32s. Integer targets are renderable on every
//! backend, float ones are not. Each pick draw is submitted on its own so
//! targets never share a pass. Reading a texel copies it into a fresh
//! mappable buffer and blocks until the map completes.
//!
//! # Device errors
//!
//! Every GPU object is created inside validation and out-of-memory error
//! scopes. A captured error becomes [`CanopyError::ResourceCreation`] instead
//! of reaching the device's uncaptured-error handler.

use std::borrow::Cow;
use std::num::NonZeroU64;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use slotmap::SlotMap;
use wgpu::util::DeviceExt;

use crate::errors::{CanopyError, Result};
use crate::render::backend::{
    BuffersHandle, CoatHandle, DrawCall, LightSet, PickTargetHandle, ProgramHandle, Rect,
    RenderBackend,
};
use crate::render::settings::RenderSettings;
use crate::resources::{Coat, Mesh, Shader, Vertex};

const PICK_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Uint;
const PICK_TEXEL_SIZE: u64 = 16;

// ============================================================================
// Uniform layouts
// ============================================================================

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct ObjectUniforms {
    projection: [[f32; 4]; 4],
    world: [[f32; 4]; 4],
}

/// Per-object slots are spaced by the dynamic offset alignment.
const OBJECT_STRIDE: u64 = 256;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct LightUniforms {
    ambient: [f32; 4],
    directions: [[f32; 4]; 4],
    colors: [[f32; 4]; 4],
    count: [u32; 4],
}

impl From<&LightSet> for LightUniforms {
    fn from(lights: &LightSet) -> Self {
        let mut uniforms = Self::zeroed();
        uniforms.ambient = lights.ambient.to_array();
        for (i, light) in lights.directional.iter().take(LightSet::MAX_DIRECTIONAL).enumerate() {
            uniforms.directions[i] = light.direction.extend(0.0).to_array();
            uniforms.colors[i] = light.color.to_array();
            uniforms.count[0] += 1;
        }
        uniforms
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct PickUniforms {
    projection: [[f32; 4]; 4],
    index: [u32; 4],
}

// ============================================================================
// GPU resources
// ============================================================================

#[derive(Debug)]
struct GpuProgram {
    name: &'static str,
    pipeline: wgpu::RenderPipeline,
}

#[derive(Debug)]
struct GpuBuffers {
    vertex: wgpu::Buffer,
    index: wgpu::Buffer,
    index_count: u32,
}

#[derive(Debug)]
struct GpuCoat {
    bind_group: wgpu::BindGroup,
}

#[derive(Debug)]
struct PickTarget {
    /// Canvas size at creation
    size: (u32, u32),
    color: wgpu::Texture,
    color_view: wgpu::TextureView,
    depth_view: wgpu::TextureView,
    cleared: bool,
}

#[derive(Debug)]
enum CanvasOp {
    Clear {
        color: Vec4,
        viewport: Rect,
    },
    Draw {
        program: ProgramHandle,
        coat: CoatHandle,
        buffers: BuffersHandle,
        slot: u32,
        viewport: Rect,
    },
}

/// Growable dynamic-offset uniform buffer for object matrices.
#[derive(Debug)]
struct ObjectBuffer {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    capacity: u64,
}

impl ObjectBuffer {
    fn new(device: &wgpu::Device, layout: &wgpu::BindGroupLayout, capacity: u64) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Canopy Object Uniforms"),
            size: capacity * OBJECT_STRIDE,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Canopy Object BindGroup"),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: NonZeroU64::new(std::mem::size_of::<ObjectUniforms>() as u64),
                }),
            }],
        });
        Self {
            buffer,
            bind_group,
            capacity,
        }
    }
}

// ============================================================================
// Backend
// ============================================================================

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,

    canvas_format: wgpu::TextureFormat,
    depth_format: wgpu::TextureFormat,
    canvas_size: (u32, u32),
    canvas: wgpu::Texture,
    canvas_view: wgpu::TextureView,
    depth_view: wgpu::TextureView,
    viewport: Rect,

    uniform_layout: wgpu::BindGroupLayout,
    object_layout: wgpu::BindGroupLayout,
    canvas_layout: wgpu::PipelineLayout,

    lights_buffer: wgpu::Buffer,
    lights_bind_group: wgpu::BindGroup,
    objects: ObjectBuffer,

    clear_pipeline: wgpu::RenderPipeline,
    pick_pipeline: wgpu::RenderPipeline,

    programs: SlotMap<ProgramHandle, GpuProgram>,
    buffers: SlotMap<BuffersHandle, GpuBuffers>,
    coats: SlotMap<CoatHandle, GpuCoat>,
    pick_targets: SlotMap<PickTargetHandle, PickTarget>,

    ops: Vec<CanvasOp>,
    object_data: Vec<ObjectUniforms>,
}

impl WgpuBackend {
    /// Requests a headless adapter and device, blocking until both exist.
    pub fn new(settings: &RenderSettings) -> Result<Self> {
        pollster::block_on(Self::new_async(settings))
    }

    pub async fn new_async(settings: &RenderSettings) -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: settings.power_preference,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| CanopyError::AdapterRequestFailed(e.to_string()))?;

        log::info!("Using adapter: {:?}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Canopy Device"),
                required_features: settings.required_features,
                required_limits: settings.required_limits.clone(),
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            })
            .await?;

        Self::from_device(device, queue, settings)
    }

    /// Wraps a device owned by the embedding application.
    ///
    /// Fails with [`CanopyError::ResourceCreation`] if the device rejects the
    /// canvas, clear or pick resources.
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue, settings: &RenderSettings) -> Result<Self> {
        let (width, height) = settings.canvas_size;
        let (canvas, canvas_view, depth_view) = capture_errors(&device, "canvas", || {
            create_canvas(
                &device,
                settings.canvas_format,
                settings.depth_format,
                width,
                height,
            )
        })?;

        let (uniform_layout, object_layout, canvas_layout) = capture_errors(&device, "pipeline layout", || {
            let uniform_layout = create_uniform_layout(&device, "Canopy Uniform Layout", false);
            let object_layout = create_uniform_layout(&device, "Canopy Object Layout", true);
            let canvas_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Canopy Canvas Pipeline Layout"),
                bind_group_layouts: &[Some(&uniform_layout), Some(&uniform_layout), Some(&object_layout)],
                immediate_size: 0,
            });
            (uniform_layout, object_layout, canvas_layout)
        })?;

        let (lights_buffer, lights_bind_group, objects) = capture_errors(&device, "uniform buffers", || {
            let lights_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Canopy Light Uniforms"),
                contents: bytemuck::bytes_of(&LightUniforms::from(&LightSet::default())),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });
            let lights_bind_group = uniform_bind_group(&device, &uniform_layout, &lights_buffer, "Canopy Light BindGroup");
            let objects = ObjectBuffer::new(&device, &object_layout, 128);
            (lights_buffer, lights_bind_group, objects)
        })?;

        let clear_pipeline = capture_errors(&device, "clear pipeline", || {
            create_clear_pipeline(&device, &uniform_layout, settings)
        })?;
        let pick_pipeline = capture_errors(&device, "pick pipeline", || {
            create_pick_pipeline(&device, &uniform_layout, settings.depth_format)
        })?;

        let mut backend = Self {
            device,
            queue,
            canvas_format: settings.canvas_format,
            depth_format: settings.depth_format,
            canvas_size: (width, height),
            canvas,
            canvas_view,
            depth_view,
            viewport: Rect::new(0, 0, width, height),
            uniform_layout,
            object_layout,
            canvas_layout,
            lights_buffer,
            lights_bind_group,
            objects,
            clear_pipeline,
            pick_pipeline,
            programs: SlotMap::with_key(),
            buffers: SlotMap::with_key(),
            coats: SlotMap::with_key(),
            pick_targets: SlotMap::with_key(),
            ops: Vec::new(),
            object_data: Vec::new(),
        };
        backend.clear(settings.clear_color);
        if let Err(err) = backend.reset_frame_buffer() {
            log::warn!("Initial canvas clear failed: {err}");
        }
        Ok(backend)
    }

    #[inline]
    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    #[inline]
    #[must_use]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Offscreen colour target the canvas operations render into.
    #[inline]
    #[must_use]
    pub fn canvas(&self) -> &wgpu::Texture {
        &self.canvas
    }

    fn ensure_object_capacity(&mut self, count: usize) {
        let needed = count as u64;
        if needed <= self.objects.capacity {
            return;
        }
        let capacity = needed.next_power_of_two();
        log::debug!("Growing object uniforms to {capacity} slots");
        self.objects = ObjectBuffer::new(&self.device, &self.object_layout, capacity);
    }

    /// Copies one texel of `texture` into a fresh mappable buffer and reads it.
    ///
    /// The buffer is dropped on every path, so a failed map leaves nothing
    /// half-mapped behind.
    fn read_texel(&self, texture: &wgpu::Texture, x: u32, y: u32) -> Result<[f32; 4]> {
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Canopy Pick Readback"),
            size: u64::from(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Canopy Pick Readback Encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x, y, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT),
                    rows_per_image: Some(1),
                },
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        // the only blocking point of the frame
        let slice = readback.slice(..PICK_TEXEL_SIZE);
        let (tx, rx) = flume::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|e| CanopyError::DevicePollFailed(e.to_string()))?;
        rx.recv().map_err(|_| CanopyError::ReadbackChannelClosed)??;

        let data = slice.get_mapped_range();
        let texel: [f32; 4] = bytemuck::pod_read_unaligned(&data[..PICK_TEXEL_SIZE as usize]);
        drop(data);
        readback.unmap();
        Ok(texel)
    }
}

impl std::fmt::Debug for WgpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuBackend")
            .field("canvas_size", &self.canvas_size)
            .field("viewport", &self.viewport)
            .field("programs", &self.programs.len())
            .field("buffers", &self.buffers.len())
            .field("coats", &self.coats.len())
            .field("pick_targets", &self.pick_targets.len())
            .field("pending_ops", &self.ops.len())
            .finish_non_exhaustive()
    }
}

impl RenderBackend for WgpuBackend {
    fn create_program(&mut self, shader: &'static Shader) -> Result<ProgramHandle> {
        if shader.source.is_empty() {
            return Err(CanopyError::ResourceCreation {
                kind: "program",
                code: format!("shader class '{}' has no source", shader.name),
            });
        }
        let pipeline = capture_errors(&self.device, "program", || {
            let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(shader.name),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(shader.source)),
            });
            self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(shader.name),
                layout: Some(&self.canvas_layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some("vs_main"),
                    buffers: &[Vertex::layout()],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: self.canvas_format,
                        blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    cull_mode: Some(wgpu::Face::Back),
                    ..Default::default()
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: self.depth_format,
                    depth_write_enabled: Some(true),
                    depth_compare: Some(wgpu::CompareFunction::Less),
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview_mask: None,
                cache: None,
            })
        })?;
        Ok(self.programs.insert(GpuProgram {
            name: shader.name,
            pipeline,
        }))
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
        let (vertex, index) = capture_errors(&self.device, "buffers", || {
            let vertex = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&mesh.name),
                contents: bytemuck::cast_slice(&mesh.interleaved()),
                usage: wgpu::BufferUsages::VERTEX,
            });
            let index = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&mesh.name),
                contents: bytemuck::cast_slice(&mesh.indices),
                usage: wgpu::BufferUsages::INDEX,
            });
            (vertex, index)
        })?;
        Ok(self.buffers.insert(GpuBuffers {
            vertex,
            index,
            index_count: mesh.index_count(),
        }))
    }

    fn delete_buffers(&mut self, buffers: BuffersHandle) {
        if let Some(buffers) = self.buffers.remove(buffers) {
            buffers.vertex.destroy();
            buffers.index.destroy();
        }
    }

    fn create_coat(&mut self, coat: &Coat) -> Result<CoatHandle> {
        let bind_group = capture_errors(&self.device, "coat", || {
            let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Canopy Coat Uniforms"),
                contents: bytemuck::bytes_of(&coat.color.to_array()),
                usage: wgpu::BufferUsages::UNIFORM,
            });
            uniform_bind_group(&self.device, &self.uniform_layout, &buffer, "Canopy Coat BindGroup")
        })?;
        Ok(self.coats.insert(GpuCoat { bind_group }))
    }

    fn delete_coat(&mut self, coat: CoatHandle) {
        self.coats.remove(coat);
    }

    fn set_lights(&mut self, lights: &LightSet) {
        self.queue
            .write_buffer(&self.lights_buffer, 0, bytemuck::bytes_of(&LightUniforms::from(lights)));
    }

    fn draw(&mut self, call: &DrawCall) -> Result<()> {
        if !self.programs.contains_key(call.program) {
            return Err(CanopyError::UnknownResource { kind: "program" });
        }
        if !self.coats.contains_key(call.coat) {
            return Err(CanopyError::UnknownResource { kind: "coat" });
        }
        if !self.buffers.contains_key(call.buffers) {
            return Err(CanopyError::UnknownResource { kind: "buffers" });
        }

        let slot = self.object_data.len() as u32;
        self.object_data.push(ObjectUniforms {
            projection: call.projection.to_cols_array_2d(),
            world: call.world.to_cols_array_2d(),
        });
        self.ops.push(CanvasOp::Draw {
            program: call.program,
            coat: call.coat,
            buffers: call.buffers,
            slot,
            viewport: self.viewport,
        });
        Ok(())
    }

    fn clear(&mut self, color: Vec4) {
        self.ops.push(CanvasOp::Clear {
            color,
            viewport: self.viewport,
        });
    }

    fn reset_frame_buffer(&mut self) -> Result<()> {
        if self.ops.is_empty() {
            return Ok(());
        }
        let ops = std::mem::take(&mut self.ops);
        let object_data = std::mem::take(&mut self.object_data);

        self.ensure_object_capacity(object_data.len());
        for (slot, uniforms) in object_data.iter().enumerate() {
            self.queue.write_buffer(
                &self.objects.buffer,
                slot as u64 * OBJECT_STRIDE,
                bytemuck::bytes_of(uniforms),
            );
        }

        // clear colours need their own bind groups, built before the pass
        let clear_groups: Vec<wgpu::BindGroup> = ops
            .iter()
            .filter_map(|op| match op {
                CanvasOp::Clear { color, .. } => {
                    let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("Canopy Clear Uniforms"),
                        contents: bytemuck::bytes_of(&color.to_array()),
                        usage: wgpu::BufferUsages::UNIFORM,
                    });
                    Some(uniform_bind_group(&self.device, &self.uniform_layout, &buffer, "Canopy Clear BindGroup"))
                }
                CanvasOp::Draw { .. } => None,
            })
            .collect();

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Canopy Canvas Encoder"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Canopy Canvas Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.canvas_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            let mut clear_groups = clear_groups.iter();
            for op in &ops {
                match *op {
                    CanvasOp::Clear { viewport, .. } => {
                        let group = clear_groups.next();
                        let (Some(rect), Some(group)) = (clamp_rect(viewport, self.canvas_size), group) else {
                            continue;
                        };
                        bind_viewport(&mut pass, rect);
                        pass.set_pipeline(&self.clear_pipeline);
                        pass.set_bind_group(0, group, &[]);
                        pass.draw(0..3, 0..1);
                    }
                    CanvasOp::Draw {
                        program,
                        coat,
                        buffers,
                        slot,
                        viewport,
                    } => {
                        let Some(rect) = clamp_rect(viewport, self.canvas_size) else {
                            continue;
                        };
                        let program = self
                            .programs
                            .get(program)
                            .ok_or(CanopyError::UnknownResource { kind: "program" })?;
                        let coat = self
                            .coats
                            .get(coat)
                            .ok_or(CanopyError::UnknownResource { kind: "coat" })?;
                        let buffers = self
                            .buffers
                            .get(buffers)
                            .ok_or(CanopyError::UnknownResource { kind: "buffers" })?;

                        bind_viewport(&mut pass, rect);
                        pass.set_pipeline(&program.pipeline);
                        pass.set_bind_group(0, &self.lights_bind_group, &[]);
                        pass.set_bind_group(1, &coat.bind_group, &[]);
                        pass.set_bind_group(2, &self.objects.bind_group, &[slot * OBJECT_STRIDE as u32]);
                        pass.set_vertex_buffer(0, buffers.vertex.slice(..));
                        pass.set_index_buffer(buffers.index.slice(..), wgpu::IndexFormat::Uint32);
                        pass.draw_indexed(0..buffers.index_count, 0, 0..1);
                        log::trace!("Canvas draw '{}' in slot {slot}", program.name);
                    }
                }
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn create_pick_target(&mut self) -> Result<PickTargetHandle> {
        let (width, height) = self.canvas_size;
        if width == 0 || height == 0 {
            return Err(CanopyError::ResourceCreation {
                kind: "pick target",
                code: "canvas has zero size".into(),
            });
        }
        let (color, depth_view) = capture_errors(&self.device, "pick target", || {
            let color = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("Canopy Pick Texture"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: PICK_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            });
            let depth_view = create_depth_view(&self.device, self.depth_format, width, height, "Canopy Pick Depth");
            (color, depth_view)
        })?;
        let color_view = color.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(self.pick_targets.insert(PickTarget {
            size: (width, height),
            color,
            color_view,
            depth_view,
            cleared: false,
        }))
    }

    fn draw_pick(
        &mut self,
        target: PickTargetHandle,
        buffers: BuffersHandle,
        projection: &Mat4,
        index: u32,
    ) -> Result<()> {
        let buffers = self
            .buffers
            .get(buffers)
            .ok_or(CanopyError::UnknownResource { kind: "buffers" })?;
        let target = self
            .pick_targets
            .get_mut(target)
            .ok_or(CanopyError::UnknownResource { kind: "pick target" })?;
        let Some(rect) = clamp_rect(self.viewport, target.size) else {
            return Ok(());
        };

        let uniforms = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Canopy Pick Uniforms"),
            contents: bytemuck::bytes_of(&PickUniforms {
                projection: projection.to_cols_array_2d(),
                index: [index, 0, 0, 0],
            }),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let bind_group = uniform_bind_group(&self.device, &self.uniform_layout, &uniforms, "Canopy Pick BindGroup");

        let (color_load, depth_load) = if target.cleared {
            (wgpu::LoadOp::Load, wgpu::LoadOp::Load)
        } else {
            (wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT), wgpu::LoadOp::Clear(1.0))
        };
        target.cleared = true;

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Canopy Pick Encoder"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Canopy Pick Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: color_load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &target.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: depth_load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            bind_viewport(&mut pass, rect);
            pass.set_pipeline(&self.pick_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_vertex_buffer(0, buffers.vertex.slice(..));
            pass.set_index_buffer(buffers.index.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(0..buffers.index_count, 0, 0..1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn read_pick_pixel(&mut self, target: PickTargetHandle, x: u32, y: u32) -> Result<[f32; 4]> {
        let target = self
            .pick_targets
            .get(target)
            .ok_or(CanopyError::UnknownResource { kind: "pick target" })?;
        // a canvas resize does not resize live targets
        let (width, height) = target.size;
        if x >= width || y >= height {
            return Err(CanopyError::PickOutOfBounds { x, y });
        }
        self.read_texel(&target.color, x, y)
    }

    fn delete_pick_target(&mut self, target: PickTargetHandle) {
        if let Some(target) = self.pick_targets.remove(target) {
            target.color.destroy();
        }
    }

    fn set_viewport_rectangle(&mut self, rect: Rect) {
        self.viewport = rect;
    }

    fn viewport_rectangle(&self) -> Rect {
        self.viewport
    }

    fn set_canvas_size(&mut self, width: u32, height: u32) {
        if (width, height) == self.canvas_size || width == 0 || height == 0 {
            return;
        }
        // recorded work targets the old canvas
        self.ops.clear();
        self.object_data.clear();

        let (canvas, canvas_view, depth_view) =
            create_canvas(&self.device, self.canvas_format, self.depth_format, width, height);
        self.canvas = canvas;
        self.canvas_view = canvas_view;
        self.depth_view = depth_view;
        self.canvas_size = (width, height);
        self.viewport = Rect::new(0, 0, width, height);
        log::debug!("Canvas resized to {width}x{height}");
    }

    fn canvas_size(&self) -> (u32, u32) {
        self.canvas_size
    }
}

// ============================================================================
// Creation helpers
// ============================================================================

/// Runs `create` inside validation and out-of-memory error scopes.
///
/// The first captured error is returned as `ResourceCreation` for `kind`.
fn capture_errors<T>(device: &wgpu::Device, kind: &'static str, create: impl FnOnce() -> T) -> Result<T> {
    let out_of_memory = device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    let validation = device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = create();
    let validation = pollster::block_on(validation.pop());
    let out_of_memory = pollster::block_on(out_of_memory.pop());

    match validation.or(out_of_memory) {
        Some(err) => {
            log::warn!("Device rejected {kind}: {err}");
            Err(CanopyError::ResourceCreation {
                kind,
                code: err.to_string(),
            })
        }
        None => Ok(value),
    }
}

/// `rect` clamped to a target of `size`, `None` if nothing is left.
fn clamp_rect(rect: Rect, size: (u32, u32)) -> Option<Rect> {
    let (width, height) = size;
    let x = rect.x.min(width);
    let y = rect.y.min(height);
    let w = rect.width.min(width - x);
    let h = rect.height.min(height - y);
    (w > 0 && h > 0).then_some(Rect::new(x, y, w, h))
}

fn bind_viewport(pass: &mut wgpu::RenderPass<'_>, rect: Rect) {
    pass.set_viewport(
        rect.x as f32,
        rect.y as f32,
        rect.width as f32,
        rect.height as f32,
        0.0,
        1.0,
    );
    pass.set_scissor_rect(rect.x, rect.y, rect.width, rect.height);
}

fn create_canvas(
    device: &wgpu::Device,
    format: wgpu::TextureFormat,
    depth_format: wgpu::TextureFormat,
    width: u32,
    height: u32,
) -> (wgpu::Texture, wgpu::TextureView, wgpu::TextureView) {
    let canvas = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Canopy Canvas"),
        size: wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let view = canvas.create_view(&wgpu::TextureViewDescriptor::default());
    let depth_view = create_depth_view(device, depth_format, width, height, "Canopy Canvas Depth");
    (canvas, view, depth_view)
}

fn create_depth_view(
    device: &wgpu::Device,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
    label: &str,
) -> wgpu::TextureView {
    device
        .create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        })
        .create_view(&wgpu::TextureViewDescriptor::default())
}

fn create_uniform_layout(device: &wgpu::Device, label: &str, dynamic: bool) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: dynamic,
                min_binding_size: None,
            },
            count: None,
        }],
    })
}

fn uniform_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    buffer: &wgpu::Buffer,
    label: &str,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: buffer.as_entire_binding(),
        }],
    })
}

fn create_clear_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    settings: &RenderSettings,
) -> wgpu::RenderPipeline {
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("Canopy Clear Shader"),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!("../shaders/clear.wgsl"))),
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("Canopy Clear Pipeline Layout"),
        bind_group_layouts: &[Some(layout)],
        immediate_size: 0,
    });
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("Canopy Clear Pipeline"),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: &module,
            entry_point: Some("vs_main"),
            buffers: &[],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &module,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: settings.canvas_format,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: Some(wgpu::DepthStencilState {
            format: settings.depth_format,
            depth_write_enabled: Some(true),
            depth_compare: Some(wgpu::CompareFunction::Always),
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        multiview_mask: None,
        cache: None,
    })
}

fn create_pick_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    depth_format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("Canopy Pick Shader"),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!("../shaders/pick.wgsl"))),
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("Canopy Pick Pipeline Layout"),
        bind_group_layouts: &[Some(layout)],
        immediate_size: 0,
    });
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("Canopy Pick Pipeline"),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: &module,
            entry_point: Some("vs_main"),
            buffers: &[Vertex::layout()],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &module,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: PICK_FORMAT,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        // both windings count as hits
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: Some(wgpu::DepthStencilState {
            format: depth_format,
            depth_write_enabled: Some(true),
            depth_compare: Some(wgpu::CompareFunction::Less),
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        multiview_mask: None,
        cache: None,
    })
}
