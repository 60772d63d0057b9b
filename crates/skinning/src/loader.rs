use std::{
    convert::Infallible,
    error::Error,
    fmt::{self, Display, Formatter},
};

use log::info;
use skinning_asset::{loader::ModelLoadParams, source::AssetSource};

use crate::{
    animation::AnimationClip,
    error::FormatError,
    model::{ModelError, SkinnedModel},
    skinning::SkinningBackend,
};

#[derive(Debug)]
pub enum LoadError<S, B = Infallible> {
    Source(S),
    Format(FormatError),
    Backend(B),
}

impl<S: Display, B: Display> Display for LoadError<S, B> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Source(err) => Display::fmt(err, f),
            LoadError::Format(err) => Display::fmt(err, f),
            LoadError::Backend(err) => Display::fmt(err, f),
        }
    }
}

impl<S: Error + 'static, B: Error + 'static> Error for LoadError<S, B> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            LoadError::Source(err) => Some(err),
            LoadError::Format(err) => Some(err),
            LoadError::Backend(err) => Some(err),
        }
    }
}

impl<S, B> From<FormatError> for LoadError<S, B> {
    fn from(value: FormatError) -> Self {
        LoadError::Format(value)
    }
}

impl<S, B> From<ModelError<B>> for LoadError<S, B> {
    fn from(value: ModelError<B>) -> Self {
        match value {
            ModelError::Format(err) => LoadError::Format(err),
            ModelError::Backend(err) => LoadError::Backend(err),
        }
    }
}

/// Load the document and the vertex container of model `name` from `source`.
pub fn load_model<S: AssetSource, B: SkinningBackend>(
    source: &mut S,
    backend: &mut B,
    name: &str,
    params: &ModelLoadParams,
) -> Result<SkinnedModel<B>, LoadError<S::Error, B::Error>> {
    let document = source
        .read(&params.model_filename(name))
        .map_err(LoadError::Source)?;
    let vertices = source
        .read(&params.vertex_filename(name))
        .map_err(LoadError::Source)?;

    let mut model = SkinnedModel::new();
    model.finish_document(backend, &document, params)?;
    model.finish_geometry(backend, &vertices)?;
    info!(
        "Loaded model {}: {} bones, {} vertices",
        name,
        model.skeleton().map_or(0, |skeleton| skeleton.len()),
        model.vertex_count()
    );
    Ok(model)
}

pub fn load_clip<S: AssetSource>(
    source: &mut S,
    name: &str,
    params: &ModelLoadParams,
) -> Result<AnimationClip, LoadError<S::Error>> {
    let bytes = source
        .read(&params.animation_filename(name))
        .map_err(LoadError::Source)?;
    let clip = AnimationClip::load(&bytes)?;
    info!("Loaded clip {}: {} frames", name, clip.frame_count());
    Ok(clip)
}
