use std::{collections::HashMap, sync::Arc};

use skinning_asset::vertex::SkinnedLayout;
use wgpu::{
    include_wgsl, BindGroupLayout, BindGroupLayoutDescriptor, BindGroupLayoutEntry, BindingType,
    BlendState, BufferAddress, BufferBindingType, ColorTargetState, ColorWrites, CompareFunction,
    ComputePipeline, ComputePipelineDescriptor, DepthBiasState, DepthStencilState, Device,
    FragmentState, FrontFace, MultisampleState, PipelineLayout, PipelineLayoutDescriptor,
    PolygonMode, PrimitiveState, PrimitiveTopology, RenderPipeline, RenderPipelineDescriptor,
    SamplerBindingType, ShaderModule, ShaderStages, StencilState, TextureFormat,
    TextureSampleType, TextureViewDimension, VertexAttribute, VertexBufferLayout, VertexFormat,
    VertexState, VertexStepMode,
};

use crate::skinning::BAKED_VERTEX_STRIDE;

fn uniform_entry(binding: u32, visibility: ShaderStages) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage_entry(binding: u32, read_only: bool) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

#[derive(Debug)]
pub struct SkinningBindGroupLayouts {
    pub lighting_layout: BindGroupLayout,
    pub draw_layout: BindGroupLayout,
    pub texture_layout: BindGroupLayout,
    pub bake_layout: BindGroupLayout,
}

impl SkinningBindGroupLayouts {
    pub fn new(device: &Device) -> Self {
        let lighting_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            entries: &[uniform_entry(0, ShaderStages::VERTEX_FRAGMENT)],
            label: Some("Lighting Bind Group Layout"),
        });
        let draw_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            entries: &[uniform_entry(0, ShaderStages::VERTEX)],
            label: Some("Draw Uniform Bind Group Layout"),
        });
        let texture_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            entries: &[
                BindGroupLayoutEntry {
                    binding: 0,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Texture {
                        multisampled: false,
                        view_dimension: TextureViewDimension::D2,
                        sample_type: TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 1,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Sampler(SamplerBindingType::Filtering),
                    count: None,
                },
            ],
            label: Some("Texture Bind Group Layout"),
        });
        let bake_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            entries: &[
                uniform_entry(0, ShaderStages::COMPUTE),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, true),
                storage_entry(4, false),
            ],
            label: Some("Bake Bind Group Layout"),
        });
        Self {
            lighting_layout,
            draw_layout,
            texture_layout,
            bake_layout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    Skinned,
    Baked,
}

fn skinned_attributes(layout: &SkinnedLayout) -> [VertexAttribute; 5] {
    [
        VertexAttribute {
            format: VertexFormat::Float32x3,
            offset: layout.position as BufferAddress,
            shader_location: 0,
        },
        VertexAttribute {
            format: VertexFormat::Float32x2,
            offset: layout.uv as BufferAddress,
            shader_location: 1,
        },
        VertexAttribute {
            format: VertexFormat::Float32x3,
            offset: layout.normal as BufferAddress,
            shader_location: 2,
        },
        VertexAttribute {
            format: VertexFormat::Float32x3,
            offset: layout.weights as BufferAddress,
            shader_location: 3,
        },
        VertexAttribute {
            format: VertexFormat::Float32x3,
            offset: layout.bones as BufferAddress,
            shader_location: 4,
        },
    ]
}

const BAKED_ATTRIBUTES: [VertexAttribute; 2] = [
    VertexAttribute {
        format: VertexFormat::Float32x3,
        offset: 0,
        shader_location: 0,
    },
    VertexAttribute {
        format: VertexFormat::Float32x3,
        offset: 12,
        shader_location: 1,
    },
];

/// Render pipelines per vertex layout, plus the bake compute pipeline.
#[derive(Debug)]
pub struct Pipelines {
    shader_module: ShaderModule,
    color_format: TextureFormat,
    depth_format: Option<TextureFormat>,
    render_layout: PipelineLayout,
    items: HashMap<(PipelineKind, SkinnedLayout), Arc<RenderPipeline>>,
    bake: ComputePipeline,
}

impl Pipelines {
    pub fn new(
        device: &Device,
        layouts: &SkinningBindGroupLayouts,
        color_format: TextureFormat,
        depth_format: Option<TextureFormat>,
    ) -> Self {
        let shader_module = device.create_shader_module(include_wgsl!("shader/skin.wgsl"));
        let render_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("Skinning Pipeline Layout"),
            bind_group_layouts: &[
                &layouts.lighting_layout,
                &layouts.draw_layout,
                &layouts.texture_layout,
            ],
            push_constant_ranges: &[],
        });

        let bake_module = device.create_shader_module(include_wgsl!("shader/bake.wgsl"));
        let bake_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("Bake Pipeline Layout"),
            bind_group_layouts: &[&layouts.bake_layout],
            push_constant_ranges: &[],
        });
        let bake = device.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some("Bake Pipeline"),
            layout: Some(&bake_layout),
            module: &bake_module,
            entry_point: "bake_main",
            compilation_options: Default::default(),
            cache: None,
        });

        Self {
            shader_module,
            color_format,
            depth_format,
            render_layout,
            items: HashMap::new(),
            bake,
        }
    }

    pub fn bake(&self) -> &ComputePipeline {
        &self.bake
    }

    pub fn get(
        &mut self,
        device: &Device,
        kind: PipelineKind,
        layout: &SkinnedLayout,
    ) -> Arc<RenderPipeline> {
        if let Some(item) = self.items.get(&(kind, *layout)) {
            return item.clone();
        }
        let item = Arc::new(self.new_pipeline(device, kind, layout));
        self.items.insert((kind, *layout), item.clone());
        item
    }

    fn new_pipeline(
        &self,
        device: &Device,
        kind: PipelineKind,
        layout: &SkinnedLayout,
    ) -> RenderPipeline {
        let skinned_attributes = skinned_attributes(layout);
        let source_uv = [VertexAttribute {
            format: VertexFormat::Float32x2,
            offset: layout.uv as BufferAddress,
            shader_location: 2,
        }];
        let (vertex_entry_name, buffers) = match kind {
            PipelineKind::Skinned => (
                "skinned_vs_main",
                vec![VertexBufferLayout {
                    array_stride: layout.stride as BufferAddress,
                    step_mode: VertexStepMode::Vertex,
                    attributes: &skinned_attributes,
                }],
            ),
            PipelineKind::Baked => (
                "baked_vs_main",
                vec![
                    VertexBufferLayout {
                        array_stride: BAKED_VERTEX_STRIDE as BufferAddress,
                        step_mode: VertexStepMode::Vertex,
                        attributes: &BAKED_ATTRIBUTES,
                    },
                    VertexBufferLayout {
                        array_stride: layout.stride as BufferAddress,
                        step_mode: VertexStepMode::Vertex,
                        attributes: &source_uv,
                    },
                ],
            ),
        };

        device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some(&format!("{:?} {:?}", kind, layout)),
            layout: Some(&self.render_layout),
            vertex: VertexState {
                module: &self.shader_module,
                entry_point: vertex_entry_name,
                compilation_options: Default::default(),
                buffers: &buffers,
            },
            fragment: Some(FragmentState {
                module: &self.shader_module,
                entry_point: "fs_main",
                compilation_options: Default::default(),
                targets: &[Some(ColorTargetState {
                    format: self.color_format,
                    blend: Some(BlendState::REPLACE),
                    write_mask: ColorWrites::all(),
                })],
            }),
            primitive: PrimitiveState {
                topology: PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: self.depth_format.map(|format| DepthStencilState {
                format,
                depth_write_enabled: true,
                depth_compare: CompareFunction::Less,
                stencil: StencilState::default(),
                bias: DepthBiasState::default(),
            }),
            multisample: MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            multiview: None,
            cache: None,
        })
    }
}
