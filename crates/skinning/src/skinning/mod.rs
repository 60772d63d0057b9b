use std::{error::Error, ops::Range};

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3};
use log::trace;
use skinning_asset::vertex::SkinnedLayout;

pub mod cpu;
#[cfg(feature = "wgpu")]
pub mod gpu;

/// Bones one draw can carry, the size of the bone array in the skinning shader.
pub const MAX_BONES_PER_MESH: usize = 50;

pub const BAKED_VERTEX_STRIDE: usize = std::mem::size_of::<BakedVertex>();

/// Model-space vertex after skinning.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct BakedVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lighting {
    pub direction: Vec3,
    pub color: Vec3,
    pub ambient: Vec3,
}

impl Default for Lighting {
    fn default() -> Self {
        Self {
            direction: Vec3::new(1.0, -1.0, 1.0),
            color: Vec3::ONE,
            ambient: Vec3::splat(0.25),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawTransforms {
    pub model: Mat4,
    pub view: Mat4,
    pub projection: Mat4,
}

impl Default for DrawTransforms {
    fn default() -> Self {
        Self {
            model: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        }
    }
}

/// One submesh drawn with skinning in the vertex stage.
pub struct SkinnedDraw<'a, B: SkinningBackend + ?Sized> {
    pub vertices: &'a B::VertexBuffer,
    pub indices: &'a B::IndexBuffer,
    pub texture: Option<&'a B::Texture>,
    pub layout: &'a SkinnedLayout,
    /// The submesh's bones, 16 column-major floats each. Bone indices in the
    /// vertices are relative to the start of this slice.
    pub bone_matrices: &'a [f32],
    pub index_range: Range<u32>,
    pub transforms: &'a DrawTransforms,
}

/// Skin every vertex of a model once, without the model transform.
pub struct BakeJob<'a, B: SkinningBackend + ?Sized> {
    pub vertices: &'a B::VertexBuffer,
    pub layout: &'a SkinnedLayout,
    pub vertex_count: usize,
    /// Per vertex, where its submesh's bones start in `bone_matrices`.
    pub bone_offsets: &'a [u32],
    /// Every bone of the skeleton.
    pub bone_matrices: &'a [f32],
}

/// One submesh drawn from baked positions and normals.
pub struct BakedDraw<'a, B: SkinningBackend + ?Sized> {
    pub baked: &'a B::BakedBuffer,
    /// Source vertices, read for texture coordinates only.
    pub vertices: &'a B::VertexBuffer,
    pub indices: &'a B::IndexBuffer,
    pub texture: Option<&'a B::Texture>,
    pub layout: &'a SkinnedLayout,
    pub index_range: Range<u32>,
    pub transforms: &'a DrawTransforms,
}

/// Graphics device used by models. Passed in by the caller for every call
/// that touches the device.
pub trait SkinningBackend {
    type VertexBuffer;
    type IndexBuffer;
    type BakedBuffer;
    type Texture;
    type Error: Error + 'static;

    fn create_vertex_buffer(
        &mut self,
        layout: &SkinnedLayout,
        bytes: &[u8],
    ) -> Result<Self::VertexBuffer, Self::Error>;

    fn create_index_buffer(&mut self, indices: &[u16]) -> Result<Self::IndexBuffer, Self::Error>;

    fn load_texture(&mut self, name: &str) -> Result<Self::Texture, Self::Error>;

    fn draw_skinned(&mut self, draw: &SkinnedDraw<'_, Self>) -> Result<(), Self::Error>;

    fn bake(&mut self, job: &BakeJob<'_, Self>) -> Result<Self::BakedBuffer, Self::Error>;

    fn draw_baked(&mut self, draw: &BakedDraw<'_, Self>) -> Result<(), Self::Error>;
}

pub fn bone_matrices_from_flat(flat: &[f32]) -> Vec<Mat4> {
    flat.chunks_exact(16).map(Mat4::from_cols_slice).collect()
}

pub fn read_vec3(record: &[u8], offset: u32) -> Vec3 {
    let start = offset as usize;
    Vec3::from_array(bytemuck::pod_read_unaligned(&record[start..start + 12]))
}

pub fn read_vec2(record: &[u8], offset: u32) -> Vec2 {
    let start = offset as usize;
    Vec2::from_array(bytemuck::pod_read_unaligned(&record[start..start + 8]))
}

/// Weighted sum of the bone matrices a vertex references. Indices outside
/// `matrices` contribute nothing.
pub fn blend_matrix(weights: Vec3, bones: Vec3, bone_offset: usize, matrices: &[Mat4]) -> Mat4 {
    let mut skin = Mat4::ZERO;
    for (weight, bone) in weights.to_array().into_iter().zip(bones.to_array()) {
        let matrix = bone_offset
            .checked_add(bone as usize)
            .and_then(|index| matrices.get(index));
        match matrix {
            Some(matrix) => skin += *matrix * weight,
            None => trace!("Skipping influence of missing bone {} + {}", bone_offset, bone),
        }
    }
    skin
}

/// Skin one vertex record into model space.
pub fn skin_vertex(
    layout: &SkinnedLayout,
    record: &[u8],
    bone_offset: usize,
    matrices: &[Mat4],
) -> BakedVertex {
    let skin = blend_matrix(
        read_vec3(record, layout.weights),
        read_vec3(record, layout.bones),
        bone_offset,
        matrices,
    );
    let position = (skin * read_vec3(record, layout.position).extend(1.0)).truncate();
    let normal = (skin * read_vec3(record, layout.normal).extend(0.0))
        .truncate()
        .normalize_or_zero();
    BakedVertex {
        position: position.to_array(),
        normal: normal.to_array(),
    }
}
