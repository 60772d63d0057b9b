use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::model::DocumentError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BonePoseDocument {
    pub pos: [f32; 3],
    pub rot: [f32; 4],
}

/// One keyframe, either keyed by bone name (or decimal bone id) or as an
/// array indexed by bone id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyframeDocument {
    Indexed(Vec<Option<BonePoseDocument>>),
    Named(BTreeMap<String, BonePoseDocument>),
}

impl KeyframeDocument {
    /// Resolve every entry to a bone id of the clip's bone table.
    pub fn resolve(
        &self,
        frame: usize,
        bone_ids: &HashMap<String, usize>,
        bone_count: usize,
    ) -> Result<Vec<(usize, BonePoseDocument)>, DocumentError> {
        match self {
            KeyframeDocument::Indexed(poses) => poses
                .iter()
                .enumerate()
                .filter_map(|(id, pose)| pose.map(|pose| (id, pose)))
                .map(|(id, pose)| {
                    if id < bone_count {
                        Ok((id, pose))
                    } else {
                        Err(DocumentError::UnknownBone {
                            frame,
                            name: id.to_string(),
                        })
                    }
                })
                .collect(),
            KeyframeDocument::Named(poses) => poses
                .iter()
                .map(|(key, pose)| {
                    let id = bone_ids
                        .get(key)
                        .copied()
                        .or_else(|| key.parse::<usize>().ok().filter(|id| *id < bone_count));
                    match id {
                        Some(id) => Ok((id, *pose)),
                        None => Err(DocumentError::UnknownBone {
                            frame,
                            name: key.clone(),
                        }),
                    }
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipDocument {
    #[serde(default)]
    pub name: Option<String>,
    pub frame_rate: f32,
    pub duration: f32,
    pub frame_count: u32,
    pub bones: Vec<String>,
    pub keyframes: Vec<KeyframeDocument>,
}

impl ClipDocument {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DocumentError> {
        let document: ClipDocument = serde_json::from_slice(bytes)?;
        if document.keyframes.len() != document.frame_count as usize {
            return Err(DocumentError::FrameCountMismatch {
                declared: document.frame_count,
                actual: document.keyframes.len(),
            });
        }
        Ok(document)
    }

    pub fn bone_ids(&self) -> HashMap<String, usize> {
        self.bones
            .iter()
            .enumerate()
            .map(|(id, name)| (name.clone(), id))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const CLIP: &[u8] = br#"{
        "name": "wave",
        "frameRate": 30,
        "duration": 0.0667,
        "frameCount": 2,
        "bones": ["root", "arm"],
        "keyframes": [
            { "arm": { "pos": [0, 1, 0], "rot": [0, 0, 0, 1] } },
            [ null, { "pos": [0, 2, 0], "rot": [0, 0, 0, 1] } ]
        ]
    }"#;

    #[test]
    fn test_parse_clip() {
        let clip = ClipDocument::from_slice(CLIP).unwrap();
        assert_eq!(clip.name.as_deref(), Some("wave"));
        assert_eq!(clip.frame_rate, 30.0);

        let ids = clip.bone_ids();
        let first = clip.keyframes[0].resolve(0, &ids, 2).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].0, 1);
        let second = clip.keyframes[1].resolve(1, &ids, 2).unwrap();
        assert_eq!(
            second,
            vec![(
                1,
                BonePoseDocument {
                    pos: [0.0, 2.0, 0.0],
                    rot: [0.0, 0.0, 0.0, 1.0],
                }
            )]
        );
    }

    #[test]
    fn test_numeric_keys_resolve_to_ids() {
        let frame: KeyframeDocument =
            serde_json::from_str(r#"{ "0": { "pos": [1, 2, 3], "rot": [0, 0, 0, 1] } }"#).unwrap();
        let resolved = frame.resolve(0, &HashMap::new(), 1).unwrap();
        assert_eq!(resolved[0].0, 0);
        assert_eq!(resolved[0].1.pos, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_unknown_bone() {
        let frame: KeyframeDocument =
            serde_json::from_str(r#"{ "tail": { "pos": [0, 0, 0], "rot": [0, 0, 0, 1] } }"#)
                .unwrap();
        assert!(matches!(
            frame.resolve(3, &HashMap::new(), 1),
            Err(DocumentError::UnknownBone { frame: 3, .. })
        ));
    }

    #[test]
    fn test_frame_count_mismatch() {
        let err = ClipDocument::from_slice(
            br#"{ "frameRate": 30, "duration": 1, "frameCount": 3, "bones": [], "keyframes": [] }"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DocumentError::FrameCountMismatch {
                declared: 3,
                actual: 0
            }
        ));
    }
}
