use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    ops::Range,
    sync::Arc,
};

use glam::Quat;
use log::{debug, info, warn};
use skinning_asset::{
    container::MeshContainer,
    loader::ModelLoadParams,
    model::{ModelDocument, SubmeshDocument},
    vertex::{SkinnedLayout, VertexLayout},
};

use crate::{
    error::FormatError,
    skeleton::{Skeleton, ROOT_CORRECTION},
    skinning::{
        BakeJob, BakedDraw, DrawTransforms, SkinnedDraw, SkinningBackend, MAX_BONES_PER_MESH,
    },
};

#[derive(Debug)]
pub enum ModelError<E> {
    Format(FormatError),
    Backend(E),
}

impl<E: Display> Display for ModelError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::Format(err) => Display::fmt(err, f),
            ModelError::Backend(err) => Display::fmt(err, f),
        }
    }
}

impl<E: Error + 'static> Error for ModelError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ModelError::Format(err) => Some(err),
            ModelError::Backend(err) => Some(err),
        }
    }
}

impl<E> From<FormatError> for ModelError<E> {
    fn from(value: FormatError) -> Self {
        ModelError::Format(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadProgress {
    Pending,
    Complete,
}

/// A run of indices drawn with one window of the skeleton's bones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submesh {
    pub bone_offset: u32,
    pub bone_count: u32,
    pub index_offset: u32,
    pub index_count: u32,
}

impl Submesh {
    pub fn index_range(&self) -> Range<u32> {
        self.index_offset..self.index_offset + self.index_count
    }
}

impl From<&SubmeshDocument> for Submesh {
    fn from(value: &SubmeshDocument) -> Self {
        Submesh {
            bone_offset: value.bone_offset,
            bone_count: value.bone_count,
            index_offset: value.index_offset,
            index_count: value.index_count,
        }
    }
}

#[derive(Debug)]
pub struct Mesh<T> {
    pub texture_name: Option<String>,
    /// `None` when there is no default texture or it failed to load.
    pub texture: Option<T>,
    pub submeshes: Vec<Submesh>,
}

struct Geometry<B: SkinningBackend> {
    vertices: B::VertexBuffer,
    indices: B::IndexBuffer,
    layout: SkinnedLayout,
    vertex_count: usize,
    index_data: Vec<u16>,
}

/// Everything a bake reads besides the pose.
struct BakeSource<B: SkinningBackend> {
    geometry: Arc<Geometry<B>>,
    meshes: Arc<Vec<Mesh<B::Texture>>>,
    bone_offsets: Arc<Vec<u32>>,
}

impl<B: SkinningBackend> Clone for BakeSource<B> {
    fn clone(&self) -> Self {
        Self {
            geometry: self.geometry.clone(),
            meshes: self.meshes.clone(),
            bone_offsets: self.bone_offsets.clone(),
        }
    }
}

impl<B: SkinningBackend> BakeSource<B> {
    fn bake(&self, backend: &mut B, skeleton: &mut Skeleton) -> Result<B::BakedBuffer, B::Error> {
        let geometry = &self.geometry;
        backend.bake(&BakeJob {
            vertices: &geometry.vertices,
            layout: &geometry.layout,
            vertex_count: geometry.vertex_count,
            bone_offsets: &self.bone_offsets,
            bone_matrices: skeleton.bone_matrices(),
        })
    }
}

/// A skinned model assembled from two independently loaded halves, the
/// binary geometry and the JSON document with skeleton and meshes. Either may
/// arrive first; the model becomes drawable once both have.
pub struct SkinnedModel<B: SkinningBackend> {
    geometry: Option<Arc<Geometry<B>>>,
    skeleton: Option<Skeleton>,
    meshes: Option<Arc<Vec<Mesh<B::Texture>>>>,
    source: Option<BakeSource<B>>,
}

impl<B: SkinningBackend> Default for SkinnedModel<B> {
    fn default() -> Self {
        Self {
            geometry: None,
            skeleton: None,
            meshes: None,
            source: None,
        }
    }
}

impl<B: SkinningBackend> SkinnedModel<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_complete(&self) -> bool {
        self.source.is_some()
    }

    pub fn skeleton(&self) -> Option<&Skeleton> {
        self.skeleton.as_ref()
    }

    pub fn skeleton_mut(&mut self) -> Option<&mut Skeleton> {
        self.skeleton.as_mut()
    }

    pub fn meshes(&self) -> &[Mesh<B::Texture>] {
        match &self.meshes {
            Some(meshes) => meshes.as_slice(),
            None => &[],
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.geometry.as_ref().map_or(0, |geometry| geometry.vertex_count)
    }

    pub fn index_count(&self) -> usize {
        self.geometry
            .as_ref()
            .map_or(0, |geometry| geometry.index_data.len())
    }

    /// Take in the vertex container and upload it.
    pub fn finish_geometry(
        &mut self,
        backend: &mut B,
        bytes: &[u8],
    ) -> Result<LoadProgress, ModelError<B::Error>> {
        let mesh = MeshContainer::parse(bytes)
            .and_then(|container| container.mesh())
            .map_err(FormatError::from)?;
        let layout = VertexLayout::from_format(mesh.vertex_format, mesh.vertex_stride)
            .and_then(|layout| layout.require_skinned())
            .map_err(FormatError::from)?;

        let vertices = backend
            .create_vertex_buffer(&layout, &mesh.vertex_bytes)
            .map_err(ModelError::Backend)?;
        let indices = backend
            .create_index_buffer(&mesh.indices)
            .map_err(ModelError::Backend)?;
        debug!(
            "Geometry ready: {} vertices, {} indices",
            mesh.vertex_count(),
            mesh.indices.len()
        );

        self.geometry = Some(Arc::new(Geometry {
            vertices,
            indices,
            layout,
            vertex_count: mesh.vertex_count(),
            index_data: mesh.indices,
        }));
        self.try_complete().map_err(|err| {
            self.geometry = None;
            ModelError::from(err)
        })
    }

    /// Take in the model document: build the skeleton and load textures.
    /// A texture that fails to load leaves its mesh untextured. A document
    /// rejected against the geometry is not kept.
    pub fn finish_document(
        &mut self,
        backend: &mut B,
        bytes: &[u8],
        params: &ModelLoadParams,
    ) -> Result<LoadProgress, FormatError> {
        let document = ModelDocument::from_slice(bytes)?;
        let correction = if params.root_correction {
            ROOT_CORRECTION
        } else {
            Quat::IDENTITY
        };
        let skeleton = Skeleton::build_with_correction(&document.bones, correction)?;

        let meshes: Vec<Mesh<B::Texture>> = document
            .meshes
            .iter()
            .map(|mesh| {
                let texture = mesh.default_texture.as_deref().and_then(|name| {
                    backend
                        .load_texture(name)
                        .map_err(|err| warn!("Failed to load texture {}: {}", name, err))
                        .ok()
                });
                Mesh {
                    texture_name: mesh.default_texture.clone(),
                    texture,
                    submeshes: mesh.submeshes.iter().map(Submesh::from).collect(),
                }
            })
            .collect();
        debug!(
            "Document ready: {} bones, {} meshes",
            skeleton.len(),
            document.meshes.len()
        );

        self.skeleton = Some(skeleton);
        self.meshes = Some(Arc::new(meshes));
        self.try_complete().inspect_err(|_| {
            self.skeleton = None;
            self.meshes = None;
        })
    }

    fn try_complete(&mut self) -> Result<LoadProgress, FormatError> {
        let (Some(geometry), Some(skeleton), Some(meshes)) =
            (&self.geometry, &self.skeleton, &self.meshes)
        else {
            return Ok(LoadProgress::Pending);
        };

        validate_submeshes(meshes.as_slice(), skeleton.len(), geometry.index_data.len())?;
        let bone_offsets =
            vertex_bone_offsets(geometry.vertex_count, &geometry.index_data, meshes.as_slice());
        info!(
            "Model complete: {} bones, {} vertices, {} meshes",
            skeleton.len(),
            geometry.vertex_count,
            meshes.len()
        );

        self.source = Some(BakeSource {
            geometry: geometry.clone(),
            meshes: meshes.clone(),
            bone_offsets: Arc::new(bone_offsets),
        });
        Ok(LoadProgress::Complete)
    }

    /// Draw every submesh skinned by `skeleton`, or by the model's own
    /// skeleton when `None`. Does nothing until the model is complete.
    pub fn draw(
        &mut self,
        backend: &mut B,
        transforms: &DrawTransforms,
        skeleton: Option<&mut Skeleton>,
    ) -> Result<(), B::Error> {
        let (Some(source), Some(own)) = (&self.source, &mut self.skeleton) else {
            debug!("Skipping draw of incomplete model");
            return Ok(());
        };
        let skeleton = skeleton.unwrap_or(own);
        let geometry = &source.geometry;

        for (mesh_index, mesh) in source.meshes.iter().enumerate() {
            for submesh in &mesh.submeshes {
                let bone_matrices = match skeleton.bone_matrices_range(
                    submesh.bone_offset as usize,
                    Some(submesh.bone_count as usize),
                ) {
                    Ok(bone_matrices) => bone_matrices,
                    Err(err) => {
                        warn!("Skipping submesh of mesh {}: {}", mesh_index, err);
                        continue;
                    }
                };
                backend.draw_skinned(&SkinnedDraw {
                    vertices: &geometry.vertices,
                    indices: &geometry.indices,
                    texture: mesh.texture.as_ref(),
                    layout: &geometry.layout,
                    bone_matrices,
                    index_range: submesh.index_range(),
                    transforms,
                })?;
            }
        }
        Ok(())
    }

    /// Skin the whole model once with the current pose. `None` until the
    /// model is complete.
    pub fn bake(
        &mut self,
        backend: &mut B,
        skeleton: Option<&mut Skeleton>,
    ) -> Result<Option<BakedModel<B>>, B::Error> {
        let (Some(source), Some(own)) = (&self.source, &mut self.skeleton) else {
            debug!("Skipping bake of incomplete model");
            return Ok(None);
        };
        let skeleton = skeleton.unwrap_or(own);
        let buffer = source.bake(backend, skeleton)?;
        debug!("Baked {} vertices", source.geometry.vertex_count);
        Ok(Some(BakedModel {
            buffer,
            source: source.clone(),
            skeleton_id: skeleton.id(),
            generation: skeleton.generation(),
        }))
    }
}

fn validate_submeshes<T>(
    meshes: &[Mesh<T>],
    bone_count: usize,
    index_count: usize,
) -> Result<(), FormatError> {
    for (mesh_index, mesh) in meshes.iter().enumerate() {
        for (submesh_index, submesh) in mesh.submeshes.iter().enumerate() {
            let bones_end = submesh.bone_offset as u64 + submesh.bone_count as u64;
            if bones_end > bone_count as u64 {
                return Err(FormatError::SubmeshBones {
                    mesh: mesh_index,
                    submesh: submesh_index,
                    bone_offset: submesh.bone_offset,
                    bone_count: submesh.bone_count,
                    total: bone_count,
                });
            }
            if submesh.bone_count as usize > MAX_BONES_PER_MESH {
                return Err(FormatError::SubmeshBoneCapacity {
                    mesh: mesh_index,
                    submesh: submesh_index,
                    bone_count: submesh.bone_count,
                });
            }
            let indices_end = submesh.index_offset as u64 + submesh.index_count as u64;
            if indices_end > index_count as u64 {
                return Err(FormatError::SubmeshIndices {
                    mesh: mesh_index,
                    submesh: submesh_index,
                    index_offset: submesh.index_offset,
                    index_count: submesh.index_count,
                    total: index_count,
                });
            }
        }
    }
    Ok(())
}

/// Per vertex, the bone offset of the submesh drawing it. Vertices no
/// submesh references get 0.
fn vertex_bone_offsets<T>(vertex_count: usize, indices: &[u16], meshes: &[Mesh<T>]) -> Vec<u32> {
    let mut offsets = vec![0; vertex_count];
    let mut shared = 0;
    for submesh in meshes.iter().flat_map(|mesh| &mesh.submeshes) {
        let start = submesh.index_offset as usize;
        for index in &indices[start..start + submesh.index_count as usize] {
            if let Some(offset) = offsets.get_mut(*index as usize) {
                if *offset != 0 && *offset != submesh.bone_offset {
                    shared += 1;
                }
                *offset = submesh.bone_offset;
            }
        }
    }
    if shared > 0 {
        debug!(
            "{} vertex references span submeshes with different bone offsets",
            shared
        );
    }
    offsets
}

/// Positions and normals of a model skinned once, drawable without skinning
/// work per frame. Shares geometry and textures with its [`SkinnedModel`].
pub struct BakedModel<B: SkinningBackend> {
    buffer: B::BakedBuffer,
    source: BakeSource<B>,
    skeleton_id: usize,
    generation: u64,
}

impl<B: SkinningBackend> BakedModel<B> {
    pub fn buffer(&self) -> &B::BakedBuffer {
        &self.buffer
    }

    pub fn vertex_count(&self) -> usize {
        self.source.geometry.vertex_count
    }

    /// Whether `skeleton` is not the one baked from, or has been posed since.
    pub fn is_stale(&self, skeleton: &Skeleton) -> bool {
        skeleton.id() != self.skeleton_id || skeleton.generation() != self.generation
    }

    pub fn rebake(&mut self, backend: &mut B, skeleton: &mut Skeleton) -> Result<(), B::Error> {
        self.buffer = self.source.bake(backend, skeleton)?;
        self.skeleton_id = skeleton.id();
        self.generation = skeleton.generation();
        Ok(())
    }

    pub fn draw(&self, backend: &mut B, transforms: &DrawTransforms) -> Result<(), B::Error> {
        let geometry = &self.source.geometry;
        for mesh in self.source.meshes.iter() {
            for submesh in &mesh.submeshes {
                backend.draw_baked(&BakedDraw {
                    baked: &self.buffer,
                    vertices: &geometry.vertices,
                    indices: &geometry.indices,
                    texture: mesh.texture.as_ref(),
                    layout: &geometry.layout,
                    index_range: submesh.index_range(),
                    transforms,
                })?;
            }
        }
        Ok(())
    }
}
