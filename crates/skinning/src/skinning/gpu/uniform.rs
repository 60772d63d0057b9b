use std::iter;

use bytemuck::{cast_slice, Pod, Zeroable};
use glam::Mat4;
use log::warn;
use wgpu::{
    util::{BufferInitDescriptor, DeviceExt},
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout, Buffer, BufferDescriptor,
    BufferUsages, Device, Queue,
};

use crate::skinning::{DrawTransforms, Lighting, MAX_BONES_PER_MESH};

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct LightingUniform {
    direction: [f32; 4],
    color: [f32; 4],
    ambient: [f32; 4],
}

pub struct LightingUniformBuffer {
    buffer: Buffer,
    bind_group: BindGroup,
}

impl LightingUniformBuffer {
    pub fn new(device: &Device, layout: &BindGroupLayout, lighting: &Lighting) -> Self {
        let uniform = LightingUniform {
            direction: lighting.direction.extend(0.0).to_array(),
            color: lighting.color.extend(1.0).to_array(),
            ambient: lighting.ambient.extend(1.0).to_array(),
        };
        let buffer = device.create_buffer_init(&BufferInitDescriptor {
            label: Some("Lighting Buffer"),
            contents: bytemuck::bytes_of(&uniform),
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        });
        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("Lighting Bind Group"),
            layout,
            entries: &[BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        });
        Self { buffer, bind_group }
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn bind_group(&self) -> &BindGroup {
        &self.bind_group
    }
}

/// Model, view and projection followed by the bone array.
const DRAW_UNIFORM_MATRICES: usize = 3 + MAX_BONES_PER_MESH;
const DRAW_UNIFORM_SIZE: u64 = (DRAW_UNIFORM_MATRICES * 64) as u64;

fn draw_uniform_contents(transforms: &DrawTransforms, bone_matrices: &[f32]) -> Vec<f32> {
    let bone_count = bone_matrices.len() / 16;
    if bone_count > MAX_BONES_PER_MESH {
        warn!(
            "Draw has {} bones, only the first {} are used",
            bone_count, MAX_BONES_PER_MESH
        );
    }
    let bones = bone_matrices
        .chunks_exact(16)
        .take(MAX_BONES_PER_MESH)
        .map(Mat4::from_cols_slice)
        .chain(iter::repeat(Mat4::ZERO))
        .take(MAX_BONES_PER_MESH);

    [transforms.model, transforms.view, transforms.projection]
        .into_iter()
        .chain(bones)
        .flat_map(|matrix| matrix.to_cols_array())
        .collect()
}

struct DrawSlot {
    buffer: Buffer,
    bind_group: BindGroup,
}

/// Uniform buffers for the draws of one frame, reused across frames.
pub struct DrawUniformPool {
    slots: Vec<DrawSlot>,
    cursor: usize,
}

impl Default for DrawUniformPool {
    fn default() -> Self {
        Self::new()
    }
}

impl DrawUniformPool {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            cursor: 0,
        }
    }

    /// Fill the next free slot and return its index.
    pub fn push(
        &mut self,
        device: &Device,
        queue: &Queue,
        layout: &BindGroupLayout,
        transforms: &DrawTransforms,
        bone_matrices: &[f32],
    ) -> usize {
        if self.cursor == self.slots.len() {
            let buffer = device.create_buffer(&BufferDescriptor {
                label: Some("Draw Uniform Buffer"),
                size: DRAW_UNIFORM_SIZE,
                usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let bind_group = device.create_bind_group(&BindGroupDescriptor {
                label: Some("Draw Uniform Bind Group"),
                layout,
                entries: &[BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                }],
            });
            self.slots.push(DrawSlot { buffer, bind_group });
        }

        let index = self.cursor;
        let contents = draw_uniform_contents(transforms, bone_matrices);
        queue.write_buffer(&self.slots[index].buffer, 0, cast_slice(&contents));
        self.cursor += 1;
        index
    }

    pub fn bind_group(&self, index: usize) -> &BindGroup {
        &self.slots[index].bind_group
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }
}

/// Word offsets the bake shader reads vertex attributes from.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct BakeParams {
    pub vertex_count: u32,
    pub stride_words: u32,
    pub position_word: u32,
    pub normal_word: u32,
    pub weights_word: u32,
    pub bones_word: u32,
    pub bone_count: u32,
    pub _padding: u32,
}

#[cfg(test)]
mod test {
    use glam::Vec3;

    use super::*;

    #[test]
    fn test_draw_uniform_contents() {
        let transforms = DrawTransforms {
            model: Mat4::from_translation(Vec3::X),
            ..Default::default()
        };
        let bone = Mat4::from_translation(Vec3::Y).to_cols_array();
        let contents = draw_uniform_contents(&transforms, &bone);
        assert_eq!(contents.len() as u64 * 4, DRAW_UNIFORM_SIZE);
        assert_eq!(&contents[..16], &transforms.model.to_cols_array());
        assert_eq!(&contents[48..64], &bone);
        // unused bone slots add nothing to a blend, as in the bake shader
        assert!(contents[64..].iter().all(|value| *value == 0.0));
    }

    #[test]
    fn test_bake_params_layout() {
        assert_eq!(std::mem::size_of::<BakeParams>(), 32);
    }
}
