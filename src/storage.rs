//! Access to stored update artifacts.
//!
//! Every lookup returns a `Result`; a missing artifact is an ordinary value
//! the caller branches on, not a failure of the request.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::ArtifactError;
use crate::ident::{Checksum, FileName};

/// Directory holding full files inside an update.
pub const FILES_DIR: &str = "files";
/// Directory holding patches inside an update.
pub const PATCH_DIR: &str = "patch";
/// Name of the precomputed bundle served by hash.
pub const BUNDLE_FILE: &str = "latest.patch";

pub type Artifact = Box<dyn Read + Send>;

/// Source of full files, patches and bundles.
pub trait ArtifactStore: Send + Sync {
    /// Full content of `name` as shipped in `update`.
    fn open_file(&self, update: &Checksum, name: &FileName) -> Result<Artifact, ArtifactError>;

    /// Patch bringing `name` from `source` to the latest update.
    fn open_patch(&self, source: &Checksum, name: &FileName) -> Result<Artifact, ArtifactError>;

    /// Whether a patch for (`source`, `name`) is available.
    fn has_patch(&self, source: &Checksum, name: &FileName) -> bool;
}

/// The catalog directory tree on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn file_path(&self, update: &Checksum, name: &FileName) -> PathBuf {
        self.root.join(update.as_str()).join(FILES_DIR).join(name.as_str())
    }

    pub fn patch_path(&self, source: &Checksum, name: &FileName) -> PathBuf {
        self.root
            .join(source.as_str())
            .join(PATCH_DIR)
            .join(name.patch_name())
    }

    pub fn bundle_path(&self, hash: &Checksum) -> PathBuf {
        self.root.join(hash.as_str()).join(BUNDLE_FILE)
    }

    /// Open the precomputed bundle stored under `hash` without blocking the
    /// calling runtime worker.
    pub async fn open_bundle(&self, hash: &Checksum) -> Result<tokio::fs::File, ArtifactError> {
        let path = self.bundle_path(hash);
        let opened = open_regular_async(&path).await;
        opened.map_err(|source| ArtifactError { path, source })
    }
}

impl ArtifactStore for FsStore {
    fn open_file(&self, update: &Checksum, name: &FileName) -> Result<Artifact, ArtifactError> {
        Ok(Box::new(open_regular(self.file_path(update, name))?))
    }

    fn open_patch(&self, source: &Checksum, name: &FileName) -> Result<Artifact, ArtifactError> {
        Ok(Box::new(open_regular(self.patch_path(source, name))?))
    }

    fn has_patch(&self, source: &Checksum, name: &FileName) -> bool {
        self.patch_path(source, name).is_file()
    }
}

fn not_regular() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file")
}

async fn open_regular_async(path: &Path) -> std::io::Result<tokio::fs::File> {
    let file = tokio::fs::File::open(path).await?;
    if file.metadata().await?.is_file() {
        Ok(file)
    } else {
        Err(not_regular())
    }
}

fn open_regular(path: PathBuf) -> Result<File, ArtifactError> {
    let file = File::open(&path).and_then(|f| {
        if f.metadata()?.is_file() {
            Ok(f)
        } else {
            Err(not_regular())
        }
    });
    file.map_err(|source| ArtifactError { path, source })
}

#[cfg(test)]
pub(crate) mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::io::Cursor;

    /// In-memory store for exercising selection and assembly.
    #[derive(Debug, Default)]
    pub struct MemoryStore {
        files: HashMap<(Checksum, FileName), Vec<u8>>,
        patches: HashMap<(Checksum, FileName), Vec<u8>>,
    }

    impl MemoryStore {
        pub fn with_file(mut self, update: &Checksum, name: &str, data: &[u8]) -> Self {
            self.files
                .insert((update.clone(), FileName::new(name).unwrap()), data.to_vec());
            self
        }

        pub fn with_patch(mut self, source: &Checksum, name: &str, data: &[u8]) -> Self {
            self.patches
                .insert((source.clone(), FileName::new(name).unwrap()), data.to_vec());
            self
        }
    }

    fn missing(name: &FileName) -> ArtifactError {
        ArtifactError {
            path: PathBuf::from(name.as_str()),
            source: std::io::ErrorKind::NotFound.into(),
        }
    }

    impl ArtifactStore for MemoryStore {
        fn open_file(&self, update: &Checksum, name: &FileName) -> Result<Artifact, ArtifactError> {
            self.files
                .get(&(update.clone(), name.clone()))
                .map(|d| Box::new(Cursor::new(d.clone())) as Artifact)
                .ok_or_else(|| missing(name))
        }

        fn open_patch(&self, source: &Checksum, name: &FileName) -> Result<Artifact, ArtifactError> {
            self.patches
                .get(&(source.clone(), name.clone()))
                .map(|d| Box::new(Cursor::new(d.clone())) as Artifact)
                .ok_or_else(|| missing(name))
        }

        fn has_patch(&self, source: &Checksum, name: &FileName) -> bool {
            self.patches.contains_key(&(source.clone(), name.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn fs_store_follows_layout() {
        let temp = tempfile::tempdir().unwrap();
        let id = Checksum::new("a".repeat(64)).unwrap();
        let name = FileName::new("data.bin").unwrap();
        let dir = temp.path().join(id.as_str());
        fs::create_dir_all(dir.join(FILES_DIR)).unwrap();
        fs::create_dir_all(dir.join(PATCH_DIR)).unwrap();
        fs::write(dir.join(FILES_DIR).join("data.bin"), b"full").unwrap();
        fs::write(dir.join(PATCH_DIR).join("data.bin.patch"), b"delta").unwrap();

        let store = FsStore::new(temp.path());
        let mut buf = String::new();
        store.open_file(&id, &name).unwrap().read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "full");

        assert!(store.has_patch(&id, &name));
        buf.clear();
        store.open_patch(&id, &name).unwrap().read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "delta");

        let other = FileName::new("other").unwrap();
        assert!(!store.has_patch(&id, &other));
        assert!(store.open_file(&id, &other).is_err());
        assert!(store.open_bundle(&id).await.is_err());

        fs::write(dir.join(BUNDLE_FILE), b"bundle").unwrap();
        let mut bundle = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut store.open_bundle(&id).await.unwrap(), &mut bundle)
            .await
            .unwrap();
        assert_eq!(bundle, b"bundle");
    }

    #[tokio::test]
    async fn directories_are_not_artifacts() {
        let temp = tempfile::tempdir().unwrap();
        let id = Checksum::new("b".repeat(64)).unwrap();
        let name = FileName::new("data.bin").unwrap();
        let dir = temp.path().join(id.as_str());
        fs::create_dir_all(dir.join(BUNDLE_FILE)).unwrap();
        fs::create_dir_all(dir.join(FILES_DIR).join("data.bin")).unwrap();

        let store = FsStore::new(temp.path());
        assert!(store.open_bundle(&id).await.is_err());
        assert!(store.open_file(&id, &name).is_err());
    }
}
