//! Asset formats for skinned models.
//!
//! This library decodes the files a skinned model is shipped as: the chunked
//! binary mesh container carrying interleaved vertices and indices, the JSON
//! model document describing the bone hierarchy and submeshes, and the JSON
//! animation clip document. It also provides an asset source abstraction to
//! isolate resource loading from the file-system.
//!
pub mod animation;
/// Binary mesh container with `binrw`.
pub mod container;
pub mod loader;
pub mod model;
pub mod source;
pub mod vertex;
