use std::{convert::Infallible, ops::Range};

use glam::{Mat4, Vec3};
use log::debug;
use skinning_asset::vertex::SkinnedLayout;

use super::{
    bone_matrices_from_flat, read_vec2, skin_vertex, BakeJob, BakedDraw, BakedVertex, SkinnedDraw,
    SkinningBackend,
};

#[derive(Debug, Clone)]
pub struct CpuVertexBuffer {
    layout: SkinnedLayout,
    bytes: Vec<u8>,
}

impl CpuVertexBuffer {
    pub fn vertex_count(&self) -> usize {
        self.bytes.len() / self.layout.stride as usize
    }

    pub fn record(&self, index: usize) -> Option<&[u8]> {
        let stride = self.layout.stride as usize;
        let start = index.checked_mul(stride)?;
        self.bytes.get(start..start + stride)
    }
}

/// Vertex after the full draw transform, in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawnVertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: [f32; 2],
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub texture: Option<String>,
    pub baked: bool,
    /// One entry per index drawn.
    pub vertices: Vec<DrawnVertex>,
}

/// Reference backend that skins on the CPU and records what it was asked to
/// draw. Handy for headless tools and tests.
#[derive(Debug, Default)]
pub struct CpuBackend {
    frame: Vec<DrawRecord>,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame(&self) -> &[DrawRecord] {
        &self.frame
    }

    pub fn take_frame(&mut self) -> Vec<DrawRecord> {
        std::mem::take(&mut self.frame)
    }
}

fn world_vertex(model: &Mat4, position: Vec3, normal: Vec3, uv: [f32; 2]) -> DrawnVertex {
    DrawnVertex {
        position: model.transform_point3(position),
        normal: model.transform_vector3(normal).normalize_or_zero(),
        uv,
    }
}

fn drawn_indices<'a>(indices: &'a [u16], range: &Range<u32>) -> &'a [u16] {
    let start = (range.start as usize).min(indices.len());
    let end = (range.end as usize).clamp(start, indices.len());
    if end - start != range.len() {
        debug!("Index range {:?} clamped to {}..{}", range, start, end);
    }
    &indices[start..end]
}

impl SkinningBackend for CpuBackend {
    type VertexBuffer = CpuVertexBuffer;
    type IndexBuffer = Vec<u16>;
    type BakedBuffer = Vec<BakedVertex>;
    type Texture = String;
    type Error = Infallible;

    fn create_vertex_buffer(
        &mut self,
        layout: &SkinnedLayout,
        bytes: &[u8],
    ) -> Result<Self::VertexBuffer, Self::Error> {
        Ok(CpuVertexBuffer {
            layout: *layout,
            bytes: bytes.to_vec(),
        })
    }

    fn create_index_buffer(&mut self, indices: &[u16]) -> Result<Self::IndexBuffer, Self::Error> {
        Ok(indices.to_vec())
    }

    fn load_texture(&mut self, name: &str) -> Result<Self::Texture, Self::Error> {
        Ok(name.to_string())
    }

    fn draw_skinned(&mut self, draw: &SkinnedDraw<'_, Self>) -> Result<(), Self::Error> {
        let matrices = bone_matrices_from_flat(draw.bone_matrices);
        let layout = draw.layout;
        let model = &draw.transforms.model;
        let vertices = drawn_indices(draw.indices, &draw.index_range)
            .iter()
            .filter_map(|index| draw.vertices.record(*index as usize))
            .map(|record| {
                let skinned = skin_vertex(layout, record, 0, &matrices);
                world_vertex(
                    model,
                    Vec3::from_array(skinned.position),
                    Vec3::from_array(skinned.normal),
                    read_vec2(record, layout.uv).to_array(),
                )
            })
            .collect();

        self.frame.push(DrawRecord {
            texture: draw.texture.cloned(),
            baked: false,
            vertices,
        });
        Ok(())
    }

    fn bake(&mut self, job: &BakeJob<'_, Self>) -> Result<Self::BakedBuffer, Self::Error> {
        let matrices = bone_matrices_from_flat(job.bone_matrices);
        Ok((0..job.vertex_count)
            .filter_map(|index| {
                let record = job.vertices.record(index)?;
                let bone_offset = job.bone_offsets.get(index).copied().unwrap_or(0);
                Some(skin_vertex(job.layout, record, bone_offset as usize, &matrices))
            })
            .collect())
    }

    fn draw_baked(&mut self, draw: &BakedDraw<'_, Self>) -> Result<(), Self::Error> {
        let model = &draw.transforms.model;
        let vertices = drawn_indices(draw.indices, &draw.index_range)
            .iter()
            .filter_map(|index| {
                let index = *index as usize;
                let baked = draw.baked.get(index)?;
                let record = draw.vertices.record(index)?;
                Some(world_vertex(
                    model,
                    Vec3::from_array(baked.position),
                    Vec3::from_array(baked.normal),
                    read_vec2(record, draw.layout.uv).to_array(),
                ))
            })
            .collect();

        self.frame.push(DrawRecord {
            texture: draw.texture.cloned(),
            baked: true,
            vertices,
        });
        Ok(())
    }
}
