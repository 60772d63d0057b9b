use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    iter,
    ops::Range,
    path::PathBuf,
    sync::{mpsc, Arc},
};

use bytemuck::cast_slice;
use glam::Mat4;
use image::ImageError;
use log::{debug, warn};
use skinning_asset::vertex::SkinnedLayout;
use wgpu::{
    util::{BufferInitDescriptor, DeviceExt},
    BindGroupDescriptor, BindGroupEntry, Buffer, BufferAsyncError, BufferDescriptor,
    BufferUsages, Color, CommandEncoderDescriptor, ComputePassDescriptor, Device, IndexFormat,
    LoadOp, Maintain, MapMode, Operations, Queue, RenderPassColorAttachment,
    RenderPassDepthStencilAttachment, RenderPassDescriptor, RenderPipeline, StoreOp,
    TextureFormat, TextureView,
};

use self::{
    pipeline::{PipelineKind, Pipelines, SkinningBindGroupLayouts},
    texture::TextureItem,
    uniform::{BakeParams, DrawUniformPool, LightingUniformBuffer},
};
use super::{
    BakeJob, BakedDraw, BakedVertex, DrawTransforms, Lighting, SkinnedDraw, SkinningBackend,
    BAKED_VERTEX_STRIDE,
};

pub mod pipeline;
pub mod texture;
pub mod uniform;

const BAKE_WORKGROUP_SIZE: u32 = 64;

// wgpu rejects zero-sized bindings
const EMPTY_CONTENTS: &[u8] = &[0; 4];

#[derive(Debug)]
pub enum WgpuBackendError {
    Image(ImageError),
    Map(BufferAsyncError),
    MapAborted,
}

impl Display for WgpuBackendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            WgpuBackendError::Image(err) => Display::fmt(err, f),
            WgpuBackendError::Map(err) => Display::fmt(err, f),
            WgpuBackendError::MapAborted => write!(f, "Buffer mapping was aborted"),
        }
    }
}

impl Error for WgpuBackendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WgpuBackendError::Image(err) => Some(err),
            WgpuBackendError::Map(err) => Some(err),
            WgpuBackendError::MapAborted => None,
        }
    }
}

impl From<ImageError> for WgpuBackendError {
    fn from(value: ImageError) -> Self {
        WgpuBackendError::Image(value)
    }
}

impl From<BufferAsyncError> for WgpuBackendError {
    fn from(value: BufferAsyncError) -> Self {
        WgpuBackendError::Map(value)
    }
}

#[derive(Debug, Clone)]
pub struct WgpuBackendConfig {
    pub color_format: TextureFormat,
    /// Must match whether [`WgpuBackend::finish_frame`] gets a depth view.
    pub depth_format: Option<TextureFormat>,
    /// Texture names are resolved against this directory.
    pub texture_root: PathBuf,
    pub lighting: Lighting,
    pub clear_color: Option<Color>,
}

impl Default for WgpuBackendConfig {
    fn default() -> Self {
        Self {
            color_format: TextureFormat::Rgba8UnormSrgb,
            depth_format: Some(TextureFormat::Depth32Float),
            texture_root: PathBuf::from("."),
            lighting: Lighting::default(),
            clear_color: Some(Color::BLACK),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WgpuVertexBuffer {
    buffer: Arc<Buffer>,
}

#[derive(Debug, Clone)]
pub struct WgpuIndexBuffer {
    buffer: Arc<Buffer>,
}

#[derive(Debug, Clone)]
pub struct WgpuBakedBuffer {
    buffer: Arc<Buffer>,
    vertex_count: u32,
}

impl WgpuBakedBuffer {
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }
}

struct PendingGeometry {
    vertices: Arc<Buffer>,
    baked: Option<Arc<Buffer>>,
    indices: Arc<Buffer>,
    texture: Option<Arc<TextureItem>>,
    index_range: Range<u32>,
}

struct PendingDraw {
    pipeline: Arc<RenderPipeline>,
    uniform_slot: usize,
    geometry: PendingGeometry,
}

/// Skinning on a wgpu device. Draw calls are recorded and replayed into one
/// render pass by [`WgpuBackend::finish_frame`]; bakes run as compute passes
/// right away.
pub struct WgpuBackend {
    device: Arc<Device>,
    queue: Arc<Queue>,
    config: WgpuBackendConfig,
    layouts: SkinningBindGroupLayouts,
    pipelines: Pipelines,
    lighting: LightingUniformBuffer,
    draw_uniforms: DrawUniformPool,
    empty_texture: TextureItem,
    pending: Vec<PendingDraw>,
}

impl WgpuBackend {
    pub fn new(device: Arc<Device>, queue: Arc<Queue>, config: WgpuBackendConfig) -> Self {
        let layouts = SkinningBindGroupLayouts::new(&device);
        let pipelines = Pipelines::new(&device, &layouts, config.color_format, config.depth_format);
        let lighting =
            LightingUniformBuffer::new(&device, &layouts.lighting_layout, &config.lighting);
        let empty_texture = TextureItem::empty(&device, &queue, &layouts.texture_layout);
        Self {
            device,
            queue,
            config,
            layouts,
            pipelines,
            lighting,
            draw_uniforms: DrawUniformPool::new(),
            empty_texture,
            pending: Vec::new(),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn config(&self) -> &WgpuBackendConfig {
        &self.config
    }

    fn queue_draw(
        &mut self,
        kind: PipelineKind,
        layout: &SkinnedLayout,
        transforms: &DrawTransforms,
        bone_matrices: &[f32],
        geometry: PendingGeometry,
    ) {
        let pipeline = self.pipelines.get(&self.device, kind, layout);
        let uniform_slot = self.draw_uniforms.push(
            &self.device,
            &self.queue,
            &self.layouts.draw_layout,
            transforms,
            bone_matrices,
        );
        self.pending.push(PendingDraw {
            pipeline,
            uniform_slot,
            geometry,
        });
    }

    /// Render every draw recorded since the last frame into `color`.
    pub fn finish_frame(&mut self, color: &TextureView, depth: Option<&TextureView>) {
        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("Skinning Frame Encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("Skinning Render Pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: color,
                    resolve_target: None,
                    ops: Operations {
                        load: match self.config.clear_color {
                            Some(color) => LoadOp::Clear(color),
                            None => LoadOp::Load,
                        },
                        store: StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: depth.map(|view| RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(Operations {
                        load: LoadOp::Clear(1.0),
                        store: StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                ..Default::default()
            });

            pass.set_bind_group(0, self.lighting.bind_group(), &[]);
            for PendingDraw {
                pipeline,
                uniform_slot,
                geometry: draw,
            } in &self.pending
            {
                let texture = draw
                    .texture
                    .as_deref()
                    .unwrap_or(&self.empty_texture);
                pass.set_pipeline(pipeline);
                pass.set_bind_group(1, self.draw_uniforms.bind_group(*uniform_slot), &[]);
                pass.set_bind_group(2, texture.bind_group(), &[]);
                match &draw.baked {
                    Some(baked) => {
                        pass.set_vertex_buffer(0, baked.slice(..));
                        pass.set_vertex_buffer(1, draw.vertices.slice(..));
                    }
                    None => pass.set_vertex_buffer(0, draw.vertices.slice(..)),
                }
                pass.set_index_buffer(draw.indices.slice(..), IndexFormat::Uint16);
                pass.draw_indexed(draw.index_range.clone(), 0, 0..1);
            }
        }
        self.queue.submit(iter::once(encoder.finish()));
        debug!("Rendered {} skinned draws", self.pending.len());

        self.pending.clear();
        self.draw_uniforms.reset();
    }

    /// Copy a baked buffer back to the CPU, blocking until the device is done.
    pub fn read_baked(
        &self,
        baked: &WgpuBakedBuffer,
    ) -> Result<Vec<BakedVertex>, WgpuBackendError> {
        let size = baked.vertex_count as u64 * BAKED_VERTEX_STRIDE as u64;
        if size == 0 {
            return Ok(Vec::new());
        }
        let staging = self.device.create_buffer(&BufferDescriptor {
            label: Some("Baked Readback Buffer"),
            size,
            usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("Baked Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(&baked.buffer, 0, &staging, 0, size);
        self.queue.submit(iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(Maintain::Wait);
        receiver
            .recv()
            .map_err(|_| WgpuBackendError::MapAborted)??;

        let vertices = {
            let data = slice.get_mapped_range();
            bytemuck::pod_collect_to_vec(&data[..])
        };
        staging.unmap();
        Ok(vertices)
    }

    fn storage_buffer(&self, label: &str, contents: &[u8]) -> Buffer {
        let contents = if contents.is_empty() {
            EMPTY_CONTENTS
        } else {
            contents
        };
        self.device.create_buffer_init(&BufferInitDescriptor {
            label: Some(label),
            contents,
            usage: BufferUsages::STORAGE,
        })
    }
}

impl SkinningBackend for WgpuBackend {
    type VertexBuffer = WgpuVertexBuffer;
    type IndexBuffer = WgpuIndexBuffer;
    type BakedBuffer = WgpuBakedBuffer;
    type Texture = Arc<TextureItem>;
    type Error = WgpuBackendError;

    fn create_vertex_buffer(
        &mut self,
        _layout: &SkinnedLayout,
        bytes: &[u8],
    ) -> Result<Self::VertexBuffer, Self::Error> {
        let contents = if bytes.is_empty() {
            EMPTY_CONTENTS
        } else {
            bytes
        };
        let buffer = self.device.create_buffer_init(&BufferInitDescriptor {
            label: Some("Skinned Vertex Buffer"),
            contents,
            usage: BufferUsages::VERTEX | BufferUsages::STORAGE,
        });
        Ok(WgpuVertexBuffer {
            buffer: Arc::new(buffer),
        })
    }

    fn create_index_buffer(&mut self, indices: &[u16]) -> Result<Self::IndexBuffer, Self::Error> {
        let contents = if indices.is_empty() {
            EMPTY_CONTENTS
        } else {
            cast_slice(indices)
        };
        let buffer = self.device.create_buffer_init(&BufferInitDescriptor {
            label: Some("Skinned Index Buffer"),
            contents,
            usage: BufferUsages::INDEX,
        });
        Ok(WgpuIndexBuffer {
            buffer: Arc::new(buffer),
        })
    }

    fn load_texture(&mut self, name: &str) -> Result<Self::Texture, Self::Error> {
        let image = image::open(self.config.texture_root.join(name))?.to_rgba8();
        let size = image.dimensions();
        debug!("Loaded texture {} ({}x{})", name, size.0, size.1);
        Ok(Arc::new(TextureItem::from_rgba(
            &self.device,
            &self.queue,
            &self.layouts.texture_layout,
            name,
            size,
            image.as_raw(),
        )))
    }

    fn draw_skinned(&mut self, draw: &SkinnedDraw<'_, Self>) -> Result<(), Self::Error> {
        self.queue_draw(
            PipelineKind::Skinned,
            draw.layout,
            draw.transforms,
            draw.bone_matrices,
            PendingGeometry {
                vertices: draw.vertices.buffer.clone(),
                baked: None,
                indices: draw.indices.buffer.clone(),
                texture: draw.texture.cloned(),
                index_range: draw.index_range.clone(),
            },
        );
        Ok(())
    }

    fn bake(&mut self, job: &BakeJob<'_, Self>) -> Result<Self::BakedBuffer, Self::Error> {
        let vertex_count = job.vertex_count as u32;
        let layout = job.layout;
        let params = BakeParams {
            vertex_count,
            stride_words: layout.stride / 4,
            position_word: layout.position / 4,
            normal_word: layout.normal / 4,
            weights_word: layout.weights / 4,
            bones_word: layout.bones / 4,
            bone_count: (job.bone_matrices.len() / 16) as u32,
            _padding: 0,
        };

        let baked = Arc::new(self.device.create_buffer(&BufferDescriptor {
            label: Some("Baked Vertex Buffer"),
            size: vertex_count.max(1) as u64 * BAKED_VERTEX_STRIDE as u64,
            usage: BufferUsages::STORAGE | BufferUsages::VERTEX | BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        }));
        if vertex_count == 0 {
            return Ok(WgpuBakedBuffer {
                buffer: baked,
                vertex_count,
            });
        }

        let params_buffer = self.device.create_buffer_init(&BufferInitDescriptor {
            label: Some("Bake Params Buffer"),
            contents: bytemuck::bytes_of(&params),
            usage: BufferUsages::UNIFORM,
        });
        let offsets = self.storage_buffer("Bone Offset Buffer", cast_slice(job.bone_offsets));
        let identity = Mat4::IDENTITY.to_cols_array();
        let bones: &[f32] = if job.bone_matrices.is_empty() {
            &identity
        } else {
            job.bone_matrices
        };
        let bones = self.storage_buffer("Bake Bone Buffer", cast_slice(bones));

        let bind_group = self.device.create_bind_group(&BindGroupDescriptor {
            label: Some("Bake Bind Group"),
            layout: &self.layouts.bake_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: params_buffer.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: job.vertices.buffer.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: offsets.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 3,
                    resource: bones.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 4,
                    resource: baked.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("Bake Encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
                label: Some("Bake Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(self.pipelines.bake());
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(vertex_count.div_ceil(BAKE_WORKGROUP_SIZE), 1, 1);
        }
        self.queue.submit(iter::once(encoder.finish()));
        debug!("Dispatched bake of {} vertices", vertex_count);

        Ok(WgpuBakedBuffer {
            buffer: baked,
            vertex_count,
        })
    }

    fn draw_baked(&mut self, draw: &BakedDraw<'_, Self>) -> Result<(), Self::Error> {
        if draw.baked.vertex_count == 0 {
            warn!("Skipping draw of an empty bake");
            return Ok(());
        }
        self.queue_draw(
            PipelineKind::Baked,
            draw.layout,
            draw.transforms,
            &[],
            PendingGeometry {
                vertices: draw.vertices.buffer.clone(),
                baked: Some(draw.baked.buffer.clone()),
                indices: draw.indices.buffer.clone(),
                texture: draw.texture.cloned(),
                index_range: draw.index_range.clone(),
            },
        );
        Ok(())
    }
}
