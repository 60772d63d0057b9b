use std::{error::Error, fs, io, path::PathBuf};

/// Where asset blobs come from. Loading code only sees names, so models can
/// be served from a directory, an archive or memory alike.
pub trait AssetSource {
    type Error: Error;

    fn read(&mut self, name: &str) -> Result<Vec<u8>, Self::Error>;
}

#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }
}

impl AssetSource for DirectorySource {
    type Error = io::Error;

    fn read(&mut self, name: &str) -> Result<Vec<u8>, Self::Error> {
        fs::read(self.root.join(name))
    }
}
