use std::{
    error::Error,
    fmt::{self, Display, Formatter},
};

use skinning_asset::{container::ContainerError, model::DocumentError, vertex::LayoutError};

/// Malformed asset data. Fatal to the load of that one asset.
#[derive(Debug)]
pub enum FormatError {
    Container(ContainerError),
    Document(DocumentError),
    Layout(LayoutError),
    BoneOrder {
        bone: usize,
        parent: i32,
    },
    SubmeshBones {
        mesh: usize,
        submesh: usize,
        bone_offset: u32,
        bone_count: u32,
        total: usize,
    },
    SubmeshBoneCapacity {
        mesh: usize,
        submesh: usize,
        bone_count: u32,
    },
    SubmeshIndices {
        mesh: usize,
        submesh: usize,
        index_offset: u32,
        index_count: u32,
        total: usize,
    },
}

impl Display for FormatError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::Container(err) => Display::fmt(err, f),
            FormatError::Document(err) => Display::fmt(err, f),
            FormatError::Layout(err) => Display::fmt(err, f),
            FormatError::BoneOrder { bone, parent } => write!(
                f,
                "Bone #{} has parent {}, but parents must come before their children",
                bone, parent
            ),
            FormatError::SubmeshBones {
                mesh,
                submesh,
                bone_offset,
                bone_count,
                total,
            } => write!(
                f,
                "Submesh {} of mesh {} uses bones {}..{}, but skeleton has {} bones",
                submesh,
                mesh,
                bone_offset,
                *bone_offset as u64 + *bone_count as u64,
                total
            ),
            FormatError::SubmeshBoneCapacity {
                mesh,
                submesh,
                bone_count,
            } => write!(
                f,
                "Submesh {} of mesh {} uses {} bones, more than the {} a draw can carry",
                submesh,
                mesh,
                bone_count,
                crate::skinning::MAX_BONES_PER_MESH
            ),
            FormatError::SubmeshIndices {
                mesh,
                submesh,
                index_offset,
                index_count,
                total,
            } => write!(
                f,
                "Submesh {} of mesh {} draws indices {}..{}, but model has {} indices",
                submesh,
                mesh,
                index_offset,
                *index_offset as u64 + *index_count as u64,
                total
            ),
        }
    }
}

impl Error for FormatError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            FormatError::Container(err) => Some(err),
            FormatError::Document(err) => Some(err),
            FormatError::Layout(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ContainerError> for FormatError {
    fn from(value: ContainerError) -> Self {
        FormatError::Container(value)
    }
}

impl From<DocumentError> for FormatError {
    fn from(value: DocumentError) -> Self {
        FormatError::Document(value)
    }
}

impl From<LayoutError> for FormatError {
    fn from(value: LayoutError) -> Self {
        FormatError::Layout(value)
    }
}

/// Caller asked for something outside the data it addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    BoneMatrices {
        offset: usize,
        count: usize,
        bone_count: usize,
    },
    Bone {
        index: usize,
        bone_count: usize,
    },
    Frame {
        frame: usize,
        frame_count: usize,
    },
}

impl Display for RangeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RangeError::BoneMatrices {
                offset,
                count,
                bone_count,
            } => write!(
                f,
                "Bone matrices {}..{} requested from a skeleton of {} bones",
                offset,
                offset.saturating_add(*count),
                bone_count
            ),
            RangeError::Bone { index, bone_count } => {
                write!(f, "Bone #{} requested from a skeleton of {} bones", index, bone_count)
            }
            RangeError::Frame { frame, frame_count } => {
                write!(f, "Frame {} requested from a clip of {} frames", frame, frame_count)
            }
        }
    }
}

impl Error for RangeError {}
