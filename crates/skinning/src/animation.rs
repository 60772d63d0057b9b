use std::{collections::HashMap, time::Duration};

use glam::{Quat, Vec3};
use log::warn;
use skinning_asset::animation::{BonePoseDocument, ClipDocument};

use crate::{
    error::{FormatError, RangeError},
    skeleton::Skeleton,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BonePose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl BonePose {
    pub fn lerp(&self, other: &BonePose, factor: f32) -> BonePose {
        BonePose {
            position: self.position.lerp(other.position, factor),
            rotation: self.rotation.slerp(other.rotation, factor),
        }
    }
}

impl From<BonePoseDocument> for BonePose {
    fn from(value: BonePoseDocument) -> Self {
        BonePose {
            position: Vec3::from_array(value.pos),
            rotation: Quat::from_array(value.rot),
        }
    }
}

/// Poses of one frame, indexed by the clip's bone ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Keyframe {
    poses: Vec<Option<BonePose>>,
}

impl Keyframe {
    pub fn pose(&self, bone_id: usize) -> Option<&BonePose> {
        self.poses.get(bone_id).and_then(Option::as_ref)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackMode {
    /// Hold the last frame once the clip is over.
    Once,
    #[default]
    Loop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    /// Snap to the frame at or before the playback position.
    #[default]
    Step,
    Linear,
}

/// Keyframed local poses, addressed by bone name so one clip drives any
/// skeleton that shares those names.
#[derive(Debug, Clone)]
pub struct AnimationClip {
    name: Option<String>,
    frame_rate: f32,
    duration: f32,
    bone_ids: HashMap<String, usize>,
    keyframes: Vec<Keyframe>,
}

impl AnimationClip {
    pub fn load(bytes: &[u8]) -> Result<Self, FormatError> {
        let document = ClipDocument::from_slice(bytes)?;
        Self::from_document(&document)
    }

    pub fn from_document(document: &ClipDocument) -> Result<Self, FormatError> {
        let bone_ids = document.bone_ids();
        let bone_count = document.bones.len();
        let keyframes = document
            .keyframes
            .iter()
            .enumerate()
            .map(|(frame, keyframe)| -> Result<Keyframe, FormatError> {
                let mut poses = vec![None; bone_count];
                for (id, pose) in keyframe.resolve(frame, &bone_ids, bone_count)? {
                    poses[id] = Some(BonePose::from(pose));
                }
                Ok(Keyframe { poses })
            })
            .collect::<Result<Vec<_>, FormatError>>()?;

        Ok(Self {
            name: document.name.clone(),
            frame_rate: document.frame_rate,
            duration: document.duration,
            bone_ids,
            keyframes,
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn frame_rate(&self) -> f32 {
        self.frame_rate
    }

    /// Declared length in seconds.
    pub fn duration(&self) -> f32 {
        self.duration
    }

    pub fn frame_count(&self) -> usize {
        self.keyframes.len()
    }

    pub fn keyframe(&self, frame: usize) -> Option<&Keyframe> {
        self.keyframes.get(frame)
    }

    pub fn bone_id(&self, name: &str) -> Option<usize> {
        self.bone_ids.get(name).copied()
    }

    /// Pose `skeleton` with one keyframe. Bones the clip doesn't know, or that
    /// the frame leaves out, keep their current local pose. World transforms
    /// are left for [`Skeleton::recompute`].
    pub fn evaluate(&self, frame: usize, skeleton: &mut Skeleton) -> Result<(), RangeError> {
        if skeleton.is_empty() {
            return Ok(());
        }
        let keyframe = self.checked_keyframe(frame)?;
        self.apply(skeleton, |id| keyframe.pose(id).copied());
        Ok(())
    }

    /// Playback position in fractional frames.
    pub fn frame_position(&self, time: Duration, mode: PlaybackMode) -> f32 {
        let frame_count = self.keyframes.len();
        if frame_count == 0 || self.frame_rate <= 0.0 {
            return 0.0;
        }
        let position = time.as_secs_f32() * self.frame_rate;
        match mode {
            PlaybackMode::Once => position.min((frame_count - 1) as f32),
            PlaybackMode::Loop => position.rem_euclid(frame_count as f32),
        }
    }

    pub fn evaluate_time(
        &self,
        time: Duration,
        mode: PlaybackMode,
        interpolation: Interpolation,
        skeleton: &mut Skeleton,
    ) -> Result<(), RangeError> {
        if skeleton.is_empty() {
            return Ok(());
        }
        let position = self.frame_position(time, mode);
        let current = position.floor() as usize;
        match interpolation {
            Interpolation::Step => self.evaluate(current, skeleton),
            Interpolation::Linear => {
                let from = self.checked_keyframe(current)?;
                let frame_count = self.keyframes.len();
                let next = match mode {
                    PlaybackMode::Once => (current + 1).min(frame_count - 1),
                    PlaybackMode::Loop => (current + 1) % frame_count,
                };
                let to = &self.keyframes[next];
                let factor = position - current as f32;
                self.apply(skeleton, |id| match (from.pose(id), to.pose(id)) {
                    (Some(from), Some(to)) => Some(from.lerp(to, factor)),
                    (Some(pose), None) | (None, Some(pose)) => Some(*pose),
                    (None, None) => None,
                });
                Ok(())
            }
        }
    }

    fn checked_keyframe(&self, frame: usize) -> Result<&Keyframe, RangeError> {
        self.keyframes.get(frame).ok_or_else(|| {
            warn!(
                "Clip {:?} has no frame {} ({} frames)",
                self.name,
                frame,
                self.keyframes.len()
            );
            RangeError::Frame {
                frame,
                frame_count: self.keyframes.len(),
            }
        })
    }

    fn apply(&self, skeleton: &mut Skeleton, pose_of: impl Fn(usize) -> Option<BonePose>) {
        for index in 0..skeleton.len() {
            let id = self.bone_ids.get(skeleton.bones()[index].name()).copied();
            if let Some(pose) = id.and_then(&pose_of) {
                skeleton.stage_pose(index, pose.position, pose.rotation);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::f32::consts::FRAC_PI_2;

    use glam::Mat4;
    use skinning_asset::model::BoneDocument;

    use super::*;

    fn bone(name: &str, parent: i32, pos: [f32; 3]) -> BoneDocument {
        BoneDocument {
            name: name.to_string(),
            parent,
            pos,
            rot: [0.0, 0.0, 0.0, 1.0],
            bind_pose_mat: Mat4::IDENTITY.to_cols_array(),
            skinned: true,
        }
    }

    fn two_bones() -> Skeleton {
        Skeleton::build(&[bone("root", -1, [0.0; 3]), bone("child", 0, [0.0; 3])]).unwrap()
    }

    const CLIP: &[u8] = br#"{
        "name": "reach",
        "frameRate": 10,
        "duration": 0.2,
        "frameCount": 2,
        "bones": ["child", "tail"],
        "keyframes": [
            { "child": { "pos": [0, 1, 0], "rot": [0, 0, 0, 1] } },
            { "child": { "pos": [0, 3, 0], "rot": [0, 0, 0, 1] },
              "tail": { "pos": [9, 9, 9], "rot": [0, 0, 0, 1] } }
        ]
    }"#;

    #[test]
    fn test_evaluate_moves_child_through_corrected_root() {
        let clip = AnimationClip::load(CLIP).unwrap();
        let mut skeleton = two_bones();
        clip.evaluate(0, &mut skeleton).unwrap();
        skeleton.recompute();

        let child = skeleton.bone(1).unwrap();
        assert_eq!(child.local_position(), Vec3::Y);
        // root is turned 90 degrees about +X, so the child's +Y offset lands on +Z
        assert!(child
            .world_position()
            .abs_diff_eq(Vec3::new(0.0, 0.0, 1.0), 1e-6));

        let matrices = skeleton.bone_matrices();
        assert!((matrices[16 + 12] - 0.0).abs() < 1e-6);
        assert!((matrices[16 + 13] - 0.0).abs() < 1e-6);
        assert!((matrices[16 + 14] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_child_rotation_does_not_move_its_origin() {
        let clip = AnimationClip::load(
            br#"{ "frameRate": 1, "duration": 1, "frameCount": 1, "bones": ["child"],
                  "keyframes": [ { "child": { "pos": [0, 1, 0],
                                              "rot": [0, 0, 0.70710677, 0.70710677] } } ] }"#,
        )
        .unwrap();
        let mut skeleton =
            Skeleton::build(&[bone("root", -1, [0.0; 3]), bone("child", 0, [0.0, 1.0, 0.0])])
                .unwrap();
        clip.evaluate(0, &mut skeleton).unwrap();
        skeleton.recompute();

        let root = skeleton.bone(0).unwrap();
        let child = skeleton.bone(1).unwrap();
        let expected = root.world_position() + root.world_rotation() * Vec3::Y;
        assert!(child.world_position().abs_diff_eq(expected, 1e-6));
        assert!(!child.world_position().abs_diff_eq(Vec3::Y, 1e-3));
        assert!(child.world_rotation().abs_diff_eq(
            root.world_rotation() * Quat::from_axis_angle(Vec3::Z, FRAC_PI_2),
            1e-6
        ));
    }

    #[test]
    fn test_bones_outside_clip_keep_pose() {
        let clip = AnimationClip::load(CLIP).unwrap();
        let mut skeleton = two_bones();
        let root_before = skeleton.bone(0).unwrap().local_rotation();
        clip.evaluate(1, &mut skeleton).unwrap();
        assert_eq!(skeleton.bone(0).unwrap().local_rotation(), root_before);
        assert_eq!(skeleton.bone(1).unwrap().local_position(), Vec3::new(0.0, 3.0, 0.0));
    }

    #[test]
    fn test_root_pose_from_clip_is_corrected() {
        let clip = AnimationClip::load(
            br#"{ "frameRate": 1, "duration": 1, "frameCount": 1, "bones": ["root"],
                  "keyframes": [ { "root": { "pos": [0, 0, 0], "rot": [0, 0, 0, 1] } } ] }"#,
        )
        .unwrap();
        let mut skeleton = two_bones();
        clip.evaluate(0, &mut skeleton).unwrap();
        skeleton.recompute();
        let expected = Quat::from_axis_angle(Vec3::X, FRAC_PI_2);
        assert!(skeleton
            .bone(0)
            .unwrap()
            .world_rotation()
            .abs_diff_eq(expected, 1e-6));
    }

    #[test]
    fn test_out_of_range_frame_leaves_skeleton_untouched() {
        let clip = AnimationClip::load(CLIP).unwrap();
        let mut skeleton = two_bones();
        let generation = skeleton.generation();
        assert_eq!(
            clip.evaluate(2, &mut skeleton),
            Err(RangeError::Frame {
                frame: 2,
                frame_count: 2
            })
        );
        assert_eq!(skeleton.generation(), generation);
        assert_eq!(skeleton.bone(1).unwrap().local_position(), Vec3::ZERO);
    }

    #[test]
    fn test_empty_skeleton_is_a_no_op() {
        let clip = AnimationClip::load(CLIP).unwrap();
        let mut skeleton = Skeleton::build(&[]).unwrap();
        assert_eq!(clip.evaluate(0, &mut skeleton), Ok(()));
        assert_eq!(clip.evaluate(99, &mut skeleton), Ok(()));
    }

    #[test]
    fn test_frame_position() {
        let clip = AnimationClip::load(CLIP).unwrap();
        let at = |millis| Duration::from_millis(millis);
        assert!((clip.frame_position(at(50), PlaybackMode::Once) - 0.5).abs() < 1e-5);
        assert_eq!(clip.frame_position(at(500), PlaybackMode::Once), 1.0);
        assert!((clip.frame_position(at(250), PlaybackMode::Loop) - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_linear_interpolation_midpoint() {
        let clip = AnimationClip::load(CLIP).unwrap();
        let mut skeleton = two_bones();
        clip.evaluate_time(
            Duration::from_millis(50),
            PlaybackMode::Once,
            Interpolation::Linear,
            &mut skeleton,
        )
        .unwrap();
        assert!(skeleton
            .bone(1)
            .unwrap()
            .local_position()
            .abs_diff_eq(Vec3::new(0.0, 2.0, 0.0), 1e-5));

        clip.evaluate_time(
            Duration::from_millis(50),
            PlaybackMode::Once,
            Interpolation::Step,
            &mut skeleton,
        )
        .unwrap();
        assert_eq!(skeleton.bone(1).unwrap().local_position(), Vec3::Y);
    }

    #[test]
    fn test_linear_loop_wraps_to_first_frame() {
        let clip = AnimationClip::load(CLIP).unwrap();
        let child_y = |millis, mode| {
            let mut skeleton = two_bones();
            clip.evaluate_time(
                Duration::from_millis(millis),
                mode,
                Interpolation::Linear,
                &mut skeleton,
            )
            .unwrap();
            skeleton.bone(1).unwrap().local_position().y
        };

        // halfway from the last frame (y = 3) back to the first (y = 1)
        assert!((child_y(150, PlaybackMode::Loop) - 2.0).abs() < 1e-4);
        assert!((child_y(350, PlaybackMode::Loop) - 2.0).abs() < 1e-4);
        // without looping the last frame holds
        assert!((child_y(150, PlaybackMode::Once) - 3.0).abs() < 1e-4);
    }

    #[test]
    fn test_unknown_keyframe_bone_is_rejected() {
        let err = AnimationClip::load(
            br#"{ "frameRate": 1, "duration": 1, "frameCount": 1, "bones": [],
                  "keyframes": [ { "ghost": { "pos": [0, 0, 0], "rot": [0, 0, 0, 1] } } ] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, FormatError::Document(_)));
    }
}
