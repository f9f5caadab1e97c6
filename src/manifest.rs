use anyhow::{Context, Result};
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::warn;

use crate::catalog::{render_info, Manifest, INFO_FILE};
use crate::ident::{is_file_name, Checksum, FileName};
use crate::storage::FILES_DIR;
use crate::util;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Algorithm {
    #[default]
    Sha256,
    Blake3,
}

/// Stream-hash a file. Uses a 256 KB BufReader to cut syscall overhead.
pub fn hash_file(path: &Path, algorithm: Algorithm) -> Result<Checksum> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open file for hashing: {}", path.display()))?;
    let mut reader = std::io::BufReader::with_capacity(256 * 1024, file);

    let digest: [u8; 32] = match algorithm {
        Algorithm::Sha256 => {
            let mut hasher = Sha256::new();
            std::io::copy(&mut reader, &mut hasher)
                .with_context(|| format!("Failed to hash file: {}", path.display()))?;
            hasher.finalize().into()
        }
        Algorithm::Blake3 => {
            let mut hasher = blake3::Hasher::new();
            std::io::copy(&mut reader, &mut hasher)
                .with_context(|| format!("Failed to hash file: {}", path.display()))?;
            *hasher.finalize().as_bytes()
        }
    };

    Ok(Checksum::from_digest(&digest))
}

/// Hash every file in `<update_dir>/files/` in parallel.
pub fn build_manifest(update_dir: &Path, algorithm: Algorithm) -> Result<Manifest> {
    let files_dir = update_dir.join(FILES_DIR);
    let entries = util::list_files(&files_dir)
        .with_context(|| format!("Failed to list files: {}", files_dir.display()))?;

    let named: Vec<(FileName, std::path::PathBuf)> = entries
        .into_iter()
        .filter_map(|e| {
            if is_file_name(&e.name) {
                FileName::new(e.name).ok().map(|n| (n, e.full_path))
            } else {
                warn!(path = %e.full_path.display(), "skipping file with unsupported name");
                None
            }
        })
        .collect();

    named
        .into_par_iter()
        .map(|(name, path)| -> Result<(FileName, Checksum)> {
            let checksum = hash_file(&path, algorithm)?;
            Ok((name, checksum))
        })
        .collect()
}

/// Build the manifest of `update_dir` and write it to `<update_dir>/.info`.
pub fn write_manifest(update_dir: &Path, algorithm: Algorithm) -> Result<Manifest> {
    let manifest = build_manifest(update_dir, algorithm)?;
    let info_path = update_dir.join(INFO_FILE);
    std::fs::write(&info_path, render_info(&manifest))
        .with_context(|| format!("Failed to write info file: {}", info_path.display()))?;
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::parse_info;
    use std::fs;

    #[test]
    fn sha256_matches_known_vector() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("test");
        fs::write(&path, b"test").unwrap();
        assert_eq!(
            hash_file(&path, Algorithm::Sha256).unwrap().as_str(),
            "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
        );
    }

    #[test]
    fn blake3_matches_library() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("test");
        fs::write(&path, b"test").unwrap();
        let expected = blake3::hash(b"test").to_hex().to_string();
        assert_eq!(hash_file(&path, Algorithm::Blake3).unwrap().as_str(), expected);
    }

    #[test]
    fn writes_parseable_info_file() {
        let temp = tempfile::tempdir().unwrap();
        let files = temp.path().join(FILES_DIR);
        fs::create_dir_all(&files).unwrap();
        fs::write(files.join("a.bin"), b"aaa").unwrap();
        fs::write(files.join("b.txt"), b"bbb").unwrap();
        fs::write(files.join("bad name"), b"x").unwrap();
        fs::create_dir(files.join("subdir")).unwrap();

        let manifest = write_manifest(temp.path(), Algorithm::Sha256).unwrap();
        assert_eq!(manifest.len(), 2);

        let text = fs::read_to_string(temp.path().join(INFO_FILE)).unwrap();
        assert_eq!(parse_info(&text), manifest);
    }

    #[test]
    fn missing_files_dir_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        assert!(build_manifest(temp.path(), Algorithm::Sha256).is_err());
    }
}
