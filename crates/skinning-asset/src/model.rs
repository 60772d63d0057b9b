use std::{
    error::Error,
    fmt::{self, Display, Formatter},
};

use serde::{Deserialize, Serialize};

#[derive(Debug)]
pub enum DocumentError {
    Json(serde_json::Error),
    UnknownBone { frame: usize, name: String },
    FrameCountMismatch { declared: u32, actual: usize },
}

impl Display for DocumentError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DocumentError::Json(err) => Display::fmt(err, f),
            DocumentError::UnknownBone { frame, name } => {
                write!(f, "Keyframe {} references unknown bone {:?}", frame, name)
            }
            DocumentError::FrameCountMismatch { declared, actual } => write!(
                f,
                "Clip declares {} frames, but carries {} keyframes",
                declared, actual
            ),
        }
    }
}

impl Error for DocumentError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DocumentError::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for DocumentError {
    fn from(value: serde_json::Error) -> Self {
        DocumentError::Json(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoneDocument {
    pub name: String,
    /// Index of the parent bone, -1 for roots.
    pub parent: i32,
    pub pos: [f32; 3],
    /// Quaternion as `[x, y, z, w]`.
    pub rot: [f32; 4],
    /// Inverse bind pose, column-major.
    pub bind_pose_mat: [f32; 16],
    #[serde(default)]
    pub skinned: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmeshDocument {
    pub bone_offset: u32,
    pub bone_count: u32,
    pub index_offset: u32,
    pub index_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshDocument {
    #[serde(default)]
    pub default_texture: Option<String>,
    #[serde(default)]
    pub submeshes: Vec<SubmeshDocument>,
}

/// Skeleton and material metadata shipped next to the binary container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelDocument {
    #[serde(default)]
    pub bones: Vec<BoneDocument>,
    #[serde(default)]
    pub meshes: Vec<MeshDocument>,
}

impl ModelDocument {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DocumentError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_model_document() {
        let document = ModelDocument::from_slice(
            br#"{
                "bones": [
                    {
                        "name": "root", "parent": -1,
                        "pos": [0, 0, 0], "rot": [0, 0, 0, 1],
                        "bindPoseMat": [1,0,0,0, 0,1,0,0, 0,0,1,0, 0,0,0,1],
                        "skinned": true
                    },
                    {
                        "name": "arm", "parent": 0,
                        "pos": [0, 1, 0], "rot": [0, 0, 0, 1],
                        "bindPoseMat": [1,0,0,0, 0,1,0,0, 0,0,1,0, 0,-1,0,1]
                    }
                ],
                "meshes": [
                    {
                        "defaultTexture": "body.png",
                        "submeshes": [
                            { "boneOffset": 0, "boneCount": 2, "indexOffset": 0, "indexCount": 6 }
                        ]
                    }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(document.bones.len(), 2);
        assert_eq!(document.bones[0].parent, -1);
        assert!(document.bones[0].skinned);
        assert!(!document.bones[1].skinned);
        assert_eq!(document.bones[1].bind_pose_mat[13], -1.0);
        assert_eq!(
            document.meshes[0].default_texture.as_deref(),
            Some("body.png")
        );
        assert_eq!(
            document.meshes[0].submeshes[0],
            SubmeshDocument {
                bone_offset: 0,
                bone_count: 2,
                index_offset: 0,
                index_count: 6,
            }
        );
    }

    #[test]
    fn test_missing_sections_are_empty() {
        let document = ModelDocument::from_slice(b"{}").unwrap();
        assert_eq!(document, ModelDocument::default());
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            ModelDocument::from_slice(b"{\"bones\": [").unwrap_err(),
            DocumentError::Json(_)
        ));
    }
}
