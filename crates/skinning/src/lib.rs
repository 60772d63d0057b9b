//! Skeletal animation and skinning for models exported as a `wglv` vertex
//! container plus a JSON document.
//!
//! A [`model::SkinnedModel`] owns the geometry and a [`skeleton::Skeleton`];
//! [`animation::AnimationClip`]s pose the skeleton, and a
//! [`skinning::SkinningBackend`] draws or bakes the result.

pub use skinning_asset as asset;

pub mod animation;
pub mod error;
pub mod loader;
pub mod model;
pub mod skeleton;
pub mod skinning;
