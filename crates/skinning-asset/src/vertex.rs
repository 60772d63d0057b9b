use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    mem::size_of,
};

use bytemuck::{Pod, Zeroable};
use modular_bitfield::prelude::*;

/// Attribute set of the interleaved vertex records in a vertex lump.
#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexFormat {
    pub position: bool,
    pub uv: bool,
    pub uv2: bool,
    pub normal: bool,
    pub tangent: bool,
    pub color: bool,
    pub bone_weights: bool,
    #[skip]
    __: B25,
}

impl VertexFormat {
    pub fn from_flags(flags: u32) -> Self {
        Self::from_bytes(flags.to_le_bytes())
    }

    pub fn flags(&self) -> u32 {
        u32::from_le_bytes(self.into_bytes())
    }

    /// The format the exporter writes for skinned characters, see [`SkinnedVertex`].
    pub fn skinned() -> Self {
        Self::new()
            .with_position(true)
            .with_uv(true)
            .with_normal(true)
            .with_tangent(true)
            .with_bone_weights(true)
    }
}

const POSITION_SIZE: u32 = 12;
const UV_SIZE: u32 = 8;
const NORMAL_SIZE: u32 = 12;
const TANGENT_SIZE: u32 = 16;
const COLOR_SIZE: u32 = 16;
const WEIGHTS_SIZE: u32 = 12;
const BONES_SIZE: u32 = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    StrideTooSmall { required: u32, stride: u32 },
    MisalignedStride(u32),
    MissingAttribute(&'static str),
}

impl Display for LayoutError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LayoutError::StrideTooSmall { required, stride } => write!(
                f,
                "Vertex attributes need {} bytes, but stride is {}",
                required, stride
            ),
            LayoutError::MisalignedStride(stride) => {
                write!(f, "Vertex stride {} is not a multiple of 4", stride)
            }
            LayoutError::MissingAttribute(name) => {
                write!(f, "Vertex format has no {} attribute", name)
            }
        }
    }
}

impl Error for LayoutError {}

/// Byte offsets of each attribute inside one vertex record.
///
/// Attributes are packed in flag order; the bone weight flag covers two
/// attributes, three weights followed by three bone indices stored as floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    pub format: VertexFormat,
    pub stride: u32,
    pub position: Option<u32>,
    pub uv: Option<u32>,
    pub uv2: Option<u32>,
    pub normal: Option<u32>,
    pub tangent: Option<u32>,
    pub color: Option<u32>,
    pub weights: Option<u32>,
    pub bones: Option<u32>,
}

impl VertexLayout {
    pub fn from_format(format: VertexFormat, stride: u32) -> Result<Self, LayoutError> {
        if stride % 4 != 0 {
            return Err(LayoutError::MisalignedStride(stride));
        }

        let mut cursor = 0;
        let mut place = |present: bool, size: u32| {
            present.then(|| {
                let offset = cursor;
                cursor += size;
                offset
            })
        };
        let position = place(format.position(), POSITION_SIZE);
        let uv = place(format.uv(), UV_SIZE);
        let uv2 = place(format.uv2(), UV_SIZE);
        let normal = place(format.normal(), NORMAL_SIZE);
        let tangent = place(format.tangent(), TANGENT_SIZE);
        let color = place(format.color(), COLOR_SIZE);
        let weights = place(format.bone_weights(), WEIGHTS_SIZE);
        let bones = place(format.bone_weights(), BONES_SIZE);

        if cursor > stride {
            return Err(LayoutError::StrideTooSmall {
                required: cursor,
                stride,
            });
        }

        Ok(Self {
            format,
            stride,
            position,
            uv,
            uv2,
            normal,
            tangent,
            color,
            weights,
            bones,
        })
    }

    /// Narrow down to the attributes the skinning stage reads.
    pub fn require_skinned(&self) -> Result<SkinnedLayout, LayoutError> {
        Ok(SkinnedLayout {
            stride: self.stride,
            position: self.position.ok_or(LayoutError::MissingAttribute("position"))?,
            uv: self.uv.ok_or(LayoutError::MissingAttribute("uv"))?,
            normal: self.normal.ok_or(LayoutError::MissingAttribute("normal"))?,
            weights: self
                .weights
                .ok_or(LayoutError::MissingAttribute("bone weight"))?,
            bones: self
                .bones
                .ok_or(LayoutError::MissingAttribute("bone index"))?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SkinnedLayout {
    pub stride: u32,
    pub position: u32,
    pub uv: u32,
    pub normal: u32,
    pub weights: u32,
    pub bones: u32,
}

/// One record of [`VertexFormat::skinned`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SkinnedVertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
    pub normal: [f32; 3],
    pub tangent: [f32; 4],
    pub weights: [f32; 3],
    pub bones: [f32; 3],
}

impl SkinnedVertex {
    pub const STRIDE: u32 = size_of::<SkinnedVertex>() as u32;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_flag_bits() {
        let format = VertexFormat::from_flags(0x0001 | 0x0008 | 0x0040);
        assert!(format.position());
        assert!(format.normal());
        assert!(format.bone_weights());
        assert!(!format.uv());
        assert_eq!(VertexFormat::skinned().flags(), 0x5b);
        // unknown bits survive
        assert_eq!(VertexFormat::from_flags(0x8000_0001).flags(), 0x8000_0001);
    }

    #[test]
    fn test_skinned_layout_offsets() {
        let layout = VertexLayout::from_format(VertexFormat::skinned(), SkinnedVertex::STRIDE)
            .unwrap()
            .require_skinned()
            .unwrap();
        assert_eq!(SkinnedVertex::STRIDE, 72);
        assert_eq!(layout.position, 0);
        assert_eq!(layout.uv, 12);
        assert_eq!(layout.normal, 20);
        assert_eq!(layout.weights, 48);
        assert_eq!(layout.bones, 60);
    }

    #[test]
    fn test_layout_errors() {
        assert_eq!(
            VertexLayout::from_format(VertexFormat::skinned(), 64),
            Err(LayoutError::StrideTooSmall {
                required: 72,
                stride: 64
            })
        );
        assert_eq!(
            VertexLayout::from_format(VertexFormat::skinned(), 74),
            Err(LayoutError::MisalignedStride(74))
        );
        let layout = VertexLayout::from_format(VertexFormat::from_flags(0x0b), 32).unwrap();
        assert_eq!(
            layout.require_skinned(),
            Err(LayoutError::MissingAttribute("bone weight"))
        );
    }
}
