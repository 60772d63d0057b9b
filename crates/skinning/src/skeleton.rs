use std::{
    collections::HashMap,
    f32::consts::FRAC_1_SQRT_2,
    sync::atomic::{AtomicUsize, Ordering},
};

use glam::{Mat4, Quat, Vec3};
use skinning_asset::model::BoneDocument;

use crate::error::{FormatError, RangeError};

static ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn new_skeleton_id() -> usize {
    ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// 90 degrees about +X, turning the exporter's y-up roots z-up.
pub const ROOT_CORRECTION: Quat = Quat::from_xyzw(FRAC_1_SQRT_2, 0.0, 0.0, FRAC_1_SQRT_2);

#[derive(Debug, Clone)]
pub struct Bone {
    name: String,
    parent: Option<usize>,
    skinned: bool,
    local_position: Vec3,
    posed_rotation: Quat,
    local_rotation: Quat,
    bind_pose_inverse: Mat4,
    world_position: Vec3,
    world_rotation: Quat,
    bone_matrix: Mat4,
}

impl Bone {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Only skinned bones get their bone matrix recomputed.
    pub fn skinned(&self) -> bool {
        self.skinned
    }

    pub fn local_position(&self) -> Vec3 {
        self.local_position
    }

    /// Rotation as last assigned, before any root correction. Feeding it
    /// back to [`Skeleton::set_local_pose`] reproduces the same pose.
    pub fn posed_rotation(&self) -> Quat {
        self.posed_rotation
    }

    /// Effective local rotation. For roots this already carries the axis
    /// correction, so it must not be passed to [`Skeleton::set_local_pose`].
    pub fn local_rotation(&self) -> Quat {
        self.local_rotation
    }

    pub fn bind_pose_inverse(&self) -> &Mat4 {
        &self.bind_pose_inverse
    }

    pub fn world_position(&self) -> Vec3 {
        self.world_position
    }

    pub fn world_rotation(&self) -> Quat {
        self.world_rotation
    }

    pub fn bone_matrix(&self) -> &Mat4 {
        &self.bone_matrix
    }
}

/// A bone hierarchy with a flat, lazily rebuilt array of bone matrices.
///
/// Bones are stored parents first, which [`Skeleton::build`] verifies, so
/// [`Skeleton::recompute`] can walk them in order and always find the world
/// transform of a parent already updated.
#[derive(Debug)]
pub struct Skeleton {
    id: usize,
    bones: Vec<Bone>,
    bone_ids: HashMap<String, usize>,
    root_correction: Quat,
    matrices: Vec<f32>,
    dirty: bool,
    staged: bool,
    generation: u64,
}

impl Skeleton {
    pub fn build(bones: &[BoneDocument]) -> Result<Self, FormatError> {
        Self::build_with_correction(bones, ROOT_CORRECTION)
    }

    pub fn build_with_correction(
        documents: &[BoneDocument],
        root_correction: Quat,
    ) -> Result<Self, FormatError> {
        let mut bones = Vec::with_capacity(documents.len());
        let mut bone_ids = HashMap::with_capacity(documents.len());
        for (index, document) in documents.iter().enumerate() {
            let parent = match document.parent {
                -1 => None,
                parent if parent >= 0 && (parent as usize) < index => Some(parent as usize),
                parent => {
                    return Err(FormatError::BoneOrder {
                        bone: index,
                        parent,
                    })
                }
            };

            let local_position = Vec3::from_array(document.pos);
            let posed_rotation = Quat::from_array(document.rot);
            let mut local_rotation = posed_rotation;
            let (world_position, world_rotation) = if parent.is_none() {
                local_rotation *= root_correction;
                (local_position, local_rotation)
            } else {
                (Vec3::ZERO, Quat::IDENTITY)
            };

            bone_ids.entry(document.name.clone()).or_insert(index);
            bones.push(Bone {
                name: document.name.clone(),
                parent,
                skinned: document.skinned,
                local_position,
                posed_rotation,
                local_rotation,
                bind_pose_inverse: Mat4::from_cols_array(&document.bind_pose_mat),
                world_position,
                world_rotation,
                bone_matrix: Mat4::IDENTITY,
            });
        }

        let matrices = vec![0.0; bones.len() * 16];
        Ok(Self {
            id: new_skeleton_id(),
            bones,
            bone_ids,
            root_correction,
            matrices,
            dirty: true,
            staged: false,
            generation: 0,
        })
    }

    /// Unique per instance, clones included.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Bumped whenever the pose changes.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    pub fn bones(&self) -> &[Bone] {
        &self.bones
    }

    pub fn bone(&self, index: usize) -> Option<&Bone> {
        self.bones.get(index)
    }

    pub fn bone_index(&self, name: &str) -> Option<usize> {
        self.bone_ids.get(name).copied()
    }

    /// Overwrite the local pose of one bone. Roots get the axis correction
    /// composed after `rotation`. World transforms follow on the next
    /// [`Skeleton::recompute`].
    pub fn set_local_pose(
        &mut self,
        index: usize,
        position: Vec3,
        rotation: Quat,
    ) -> Result<(), RangeError> {
        if index >= self.bones.len() {
            return Err(RangeError::Bone {
                index,
                bone_count: self.bones.len(),
            });
        }
        self.stage_pose(index, position, rotation);
        Ok(())
    }

    pub(crate) fn stage_pose(&mut self, index: usize, position: Vec3, rotation: Quat) {
        let correction = self.root_correction;
        let bone = &mut self.bones[index];
        bone.local_position = position;
        bone.posed_rotation = rotation;
        bone.local_rotation = if bone.parent.is_none() {
            rotation * correction
        } else {
            rotation
        };
        self.staged = true;
        self.dirty = true;
        self.generation += 1;
    }

    pub fn recompute(&mut self) {
        for index in 0..self.bones.len() {
            let (parents, rest) = self.bones.split_at_mut(index);
            let bone = &mut rest[0];
            match bone.parent {
                None => {
                    bone.world_position = bone.local_position;
                    bone.world_rotation = bone.local_rotation;
                }
                Some(parent) => {
                    let parent = &parents[parent];
                    bone.world_position =
                        parent.world_rotation * bone.local_position + parent.world_position;
                    bone.world_rotation = parent.world_rotation * bone.local_rotation;
                }
            }

            if bone.skinned {
                bone.bone_matrix =
                    Mat4::from_rotation_translation(bone.world_rotation, bone.world_position)
                        * bone.bind_pose_inverse;
            }
        }

        if self.staged {
            self.staged = false;
            self.generation += 1;
        }
        self.dirty = true;
    }

    fn rebuild_matrices(&mut self) {
        if self.dirty {
            for (bone, slot) in self.bones.iter().zip(self.matrices.chunks_exact_mut(16)) {
                slot.copy_from_slice(&bone.bone_matrix.to_cols_array());
            }
            self.dirty = false;
        }
    }

    /// All bone matrices, 16 column-major floats per bone.
    pub fn bone_matrices(&mut self) -> &[f32] {
        self.rebuild_matrices();
        &self.matrices
    }

    /// Bone matrices `offset..offset + count`; `count` defaults to the rest of
    /// the skeleton.
    pub fn bone_matrices_range(
        &mut self,
        offset: usize,
        count: Option<usize>,
    ) -> Result<&[f32], RangeError> {
        let bone_count = self.bones.len();
        let count = count.unwrap_or(bone_count.saturating_sub(offset));
        match offset.checked_add(count) {
            Some(end) if offset <= bone_count && end <= bone_count => {
                self.rebuild_matrices();
                Ok(&self.matrices[offset * 16..end * 16])
            }
            _ => Err(RangeError::BoneMatrices {
                offset,
                count,
                bone_count,
            }),
        }
    }
}

impl Clone for Skeleton {
    fn clone(&self) -> Self {
        Self {
            id: new_skeleton_id(),
            bones: self.bones.clone(),
            bone_ids: self.bone_ids.clone(),
            root_correction: self.root_correction,
            matrices: self.matrices.clone(),
            dirty: self.dirty,
            staged: self.staged,
            generation: self.generation,
        }
    }
}

#[cfg(test)]
mod test {
    use std::f32::consts::FRAC_PI_2;

    use super::*;

    const IDENTITY: [f32; 16] = [
        1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0,
    ];

    fn bone(name: &str, parent: i32, pos: [f32; 3]) -> BoneDocument {
        BoneDocument {
            name: name.to_string(),
            parent,
            pos,
            rot: [0.0, 0.0, 0.0, 1.0],
            bind_pose_mat: IDENTITY,
            skinned: true,
        }
    }

    fn chain() -> Vec<BoneDocument> {
        vec![
            bone("root", -1, [1.0, 0.0, 0.0]),
            bone("spine", 0, [0.0, 1.0, 0.0]),
            bone("head", 1, [0.0, 1.0, 0.0]),
        ]
    }

    #[test]
    fn test_rejects_out_of_order_parents() {
        let mut bones = chain();
        bones[1].parent = 2;
        assert!(matches!(
            Skeleton::build(&bones),
            Err(FormatError::BoneOrder { bone: 1, parent: 2 })
        ));

        bones[1].parent = 1;
        assert!(matches!(
            Skeleton::build(&bones),
            Err(FormatError::BoneOrder { bone: 1, parent: 1 })
        ));

        bones[1].parent = -3;
        assert!(Skeleton::build(&bones).is_err());
    }

    #[test]
    fn test_root_correction_applied_at_build() {
        let skeleton = Skeleton::build(&chain()).unwrap();
        let root = skeleton.bone(0).unwrap();
        let expected = Quat::from_axis_angle(Vec3::X, FRAC_PI_2);
        assert!(root.local_rotation().abs_diff_eq(expected, 1e-6));
        assert!(root.world_rotation().abs_diff_eq(expected, 1e-6));
        assert_eq!(root.world_position(), Vec3::new(1.0, 0.0, 0.0));

        let spine = skeleton.bone(1).unwrap();
        assert_eq!(spine.local_rotation(), Quat::IDENTITY);
        assert_eq!(spine.world_position(), Vec3::ZERO);
    }

    #[test]
    fn test_root_correction_follows_any_local_rotation() {
        let mut skeleton = Skeleton::build(&chain()).unwrap();
        for rotation in [
            Quat::IDENTITY,
            Quat::from_axis_angle(Vec3::Y, 0.3),
            Quat::from_axis_angle(Vec3::new(1.0, 2.0, 3.0).normalize(), -2.0),
        ] {
            skeleton.set_local_pose(0, Vec3::ZERO, rotation).unwrap();
            skeleton.recompute();
            let expected = rotation * ROOT_CORRECTION;
            assert!(skeleton.bones()[0].world_rotation().abs_diff_eq(expected, 1e-6));
        }
    }

    #[test]
    fn test_recompute_composes_parent_first() {
        let mut skeleton = Skeleton::build_with_correction(&chain(), Quat::IDENTITY).unwrap();
        skeleton
            .set_local_pose(1, Vec3::new(0.0, 1.0, 0.0), Quat::from_axis_angle(Vec3::Z, FRAC_PI_2))
            .unwrap();
        skeleton.recompute();

        let spine = skeleton.bone(1).unwrap();
        assert!(spine.world_position().abs_diff_eq(Vec3::new(1.0, 1.0, 0.0), 1e-6));
        // the head offset is turned by the spine's rotation
        let head = skeleton.bone(2).unwrap();
        assert!(head.world_position().abs_diff_eq(Vec3::new(0.0, 1.0, 0.0), 1e-6));
        let expected =
            Mat4::from_rotation_translation(head.world_rotation(), head.world_position());
        assert!(head.bone_matrix().abs_diff_eq(expected, 1e-6));
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let mut skeleton = Skeleton::build(&chain()).unwrap();
        skeleton
            .set_local_pose(2, Vec3::new(0.5, 0.25, 0.0), Quat::from_axis_angle(Vec3::Y, 1.0))
            .unwrap();
        skeleton.recompute();
        let first = skeleton.bone_matrices().to_vec();
        skeleton.recompute();
        let second = skeleton.bone_matrices().to_vec();
        assert_eq!(
            first.iter().map(|value| value.to_bits()).collect::<Vec<_>>(),
            second.iter().map(|value| value.to_bits()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_unskinned_bones_keep_identity_matrix() {
        let mut bones = chain();
        bones[2].skinned = false;
        let mut skeleton = Skeleton::build(&bones).unwrap();
        skeleton.recompute();
        assert_eq!(*skeleton.bone(2).unwrap().bone_matrix(), Mat4::IDENTITY);
        assert_ne!(*skeleton.bone(1).unwrap().bone_matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn test_bone_matrix_slices() {
        let mut skeleton = Skeleton::build(&chain()).unwrap();
        skeleton.recompute();
        let full = skeleton.bone_matrices().to_vec();
        assert_eq!(full.len(), 16 * 3);

        for offset in 0..=3 {
            for count in 0..=(3 - offset) {
                let slice = skeleton.bone_matrices_range(offset, Some(count)).unwrap();
                assert_eq!(slice.len(), 16 * count);
                assert_eq!(slice, &full[offset * 16..(offset + count) * 16]);
            }
        }

        assert_eq!(skeleton.bone_matrices_range(1, None).unwrap().len(), 32);
        assert_eq!(
            skeleton.bone_matrices_range(2, Some(2)),
            Err(RangeError::BoneMatrices {
                offset: 2,
                count: 2,
                bone_count: 3
            })
        );
        assert!(skeleton.bone_matrices_range(4, None).is_err());
        assert!(skeleton.bone_matrices_range(usize::MAX, Some(2)).is_err());
    }

    #[test]
    fn test_flat_buffer_tracks_recompute() {
        let mut skeleton = Skeleton::build(&chain()).unwrap();
        let before = skeleton.bone_matrices().to_vec();
        assert_eq!(&before[..16], &IDENTITY);

        skeleton.recompute();
        let after = skeleton.bone_matrices().to_vec();
        assert_eq!(
            &after[..16],
            &skeleton.bone(0).unwrap().bone_matrix().to_cols_array()
        );
        assert_ne!(before, after);
    }

    #[test]
    fn test_clone_is_independent() {
        let mut skeleton = Skeleton::build(&chain()).unwrap();
        skeleton.recompute();
        let mut copy = skeleton.clone();
        assert_ne!(copy.id(), skeleton.id());
        assert_eq!(copy.bone_matrices(), skeleton.bone_matrices());

        copy.set_local_pose(1, Vec3::new(0.0, 5.0, 0.0), Quat::IDENTITY)
            .unwrap();
        copy.recompute();
        assert_eq!(skeleton.bone(1).unwrap().local_position(), Vec3::Y);
        assert_ne!(copy.bone_matrices(), skeleton.bone_matrices());
    }

    #[test]
    fn test_posed_rotation_round_trips_through_set_local_pose() {
        let mut skeleton = Skeleton::build(&chain()).unwrap();
        skeleton.recompute();
        let before = skeleton.bone_matrices().to_vec();

        let root = skeleton.bone(0).unwrap();
        let (position, rotation) = (root.local_position(), root.posed_rotation());
        assert_eq!(rotation, Quat::IDENTITY);
        assert!(root.local_rotation().abs_diff_eq(ROOT_CORRECTION, 1e-6));

        skeleton.set_local_pose(0, position, rotation).unwrap();
        skeleton.recompute();
        assert!(skeleton
            .bone(0)
            .unwrap()
            .local_rotation()
            .abs_diff_eq(ROOT_CORRECTION, 1e-6));
        assert_eq!(skeleton.bone_matrices(), before.as_slice());
    }

    #[test]
    fn test_generation_follows_pose_changes() {
        let mut skeleton = Skeleton::build(&chain()).unwrap();
        let start = skeleton.generation();
        skeleton.recompute();
        assert_eq!(skeleton.generation(), start);

        skeleton.set_local_pose(1, Vec3::ONE, Quat::IDENTITY).unwrap();
        let staged = skeleton.generation();
        assert!(staged > start);
        skeleton.recompute();
        assert!(skeleton.generation() > staged);

        assert_eq!(
            skeleton.set_local_pose(3, Vec3::ONE, Quat::IDENTITY),
            Err(RangeError::Bone {
                index: 3,
                bone_count: 3
            })
        );
    }
}
