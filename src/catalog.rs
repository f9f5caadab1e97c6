//! In-memory catalog of update manifests.
//!
//! A catalog is built wholesale from the on-disk layout:
//!
//! ```text
//! <root>/.info                 latest <update-id>
//! <root>/<update-id>/.info     <file-name> <checksum>, one per line
//! <root>/<update-id>/files/    full files of that update
//! <root>/<update-id>/patch/    <file-name>.patch, patches from that update to latest
//! ```
//!
//! Once loaded a [`Catalog`] is immutable. [`CatalogHandle`] publishes a new
//! one by swapping the shared pointer, so a request that already took a
//! snapshot keeps reading the old catalog until it finishes.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};

use crate::error::CatalogError;
use crate::ident::{is_checksum, is_file_name, Checksum, FileName, UpdateId, LATEST};
use crate::util;

/// Name of the info file at the root and inside every update directory.
pub const INFO_FILE: &str = ".info";

/// File name → checksum for one update. Ordered so iteration is stable.
pub type Manifest = BTreeMap<FileName, Checksum>;

/// Parse info file text.
///
/// Each line is `<name> <checksum>`, split on the first space with both halves
/// trimmed. Blank lines, lines without a second token, and lines whose name or
/// checksum fail validation are dropped. A repeated name keeps the last value.
pub fn parse_info(text: &str) -> Manifest {
    let mut manifest = Manifest::new();

    for line in text.lines() {
        let Some((name, checksum)) = line.trim().split_once(' ') else {
            continue;
        };
        let (name, checksum) = (name.trim(), checksum.trim());
        if !is_file_name(name) || !is_checksum(checksum) {
            continue;
        }
        if let (Ok(name), Ok(checksum)) = (FileName::new(name), Checksum::new(checksum)) {
            manifest.insert(name, checksum);
        }
    }

    manifest
}

/// Render a manifest in info file form, one sorted record per line.
pub fn render_info(manifest: &Manifest) -> String {
    let mut out = String::new();
    for (name, checksum) in manifest {
        out.push_str(name.as_str());
        out.push(' ');
        out.push_str(checksum.as_str());
        out.push('\n');
    }
    out
}

/// Every known update plus the one designated latest.
///
/// Construction goes through [`Catalog::new`] or [`load`], both of which
/// guarantee that `latest` names a non-empty manifest.
#[derive(Debug, Clone)]
pub struct Catalog {
    manifests: HashMap<Checksum, Manifest>,
    latest: Checksum,
}

impl Catalog {
    pub fn new(manifests: HashMap<Checksum, Manifest>, latest: Checksum) -> Result<Self, CatalogError> {
        match manifests.get(&latest) {
            None => Err(CatalogError::LatestMissing(latest.to_string())),
            Some(m) if m.is_empty() => Err(CatalogError::LatestEmpty(latest.to_string())),
            Some(_) => Ok(Self { manifests, latest }),
        }
    }

    pub fn latest_id(&self) -> &Checksum {
        &self.latest
    }

    pub fn latest(&self) -> &Manifest {
        // Presence is checked at construction and the map is never mutated.
        &self.manifests[&self.latest]
    }

    /// The concrete update a client claim names, if this catalog holds it.
    ///
    /// Only a checksum-shaped id counts. The `latest` alias never does: a
    /// client that cannot name its own update gets no patches.
    pub fn known_update(&self, id: &UpdateId) -> Option<&Checksum> {
        match id {
            UpdateId::Latest => None,
            UpdateId::Hash(hash) => self.manifests.get_key_value(hash).map(|(k, _)| k),
        }
    }

    pub fn update_count(&self) -> usize {
        self.manifests.len()
    }
}

/// Build a catalog from the directory tree at `root`.
///
/// An update directory whose info file is missing or unreadable is skipped
/// with a warning. Everything that would leave the catalog without a usable
/// latest update is returned as a [`CatalogError`].
pub fn load(root: &Path) -> Result<Catalog, CatalogError> {
    let dirs = util::list_dirs(root).map_err(|source| {
        error!(path = %root.display(), "could not list update directories");
        CatalogError::ListRoot {
            path: root.to_path_buf(),
            source,
        }
    })?;

    let mut manifests = HashMap::new();
    for dir in dirs {
        let Ok(id) = Checksum::new(dir.name.as_str()) else {
            warn!(dir = %dir.full_path.display(), "skipping directory whose name is not an update id");
            continue;
        };

        let info_path = dir.full_path.join(INFO_FILE);
        let text = match std::fs::read_to_string(&info_path) {
            Ok(text) => text,
            Err(e) => {
                warn!(info_file = %info_path.display(), error = %e, "info file was not found or could not be read");
                continue;
            }
        };

        let manifest = parse_info(&text);
        debug!(update = %id, files = manifest.len(), "loaded update manifest");
        manifests.insert(id, manifest);
    }

    let root_info = root.join(INFO_FILE);
    let text = std::fs::read_to_string(&root_info).map_err(|source| {
        error!(info_file = %root_info.display(), "root info file was not found or could not be read");
        CatalogError::RootInfo {
            path: root_info.clone(),
            source,
        }
    })?;

    let latest = parse_info(&text)
        .into_iter()
        .find_map(|(name, checksum)| (name.as_str() == LATEST).then_some(checksum))
        .ok_or_else(|| {
            error!(info_file = %root_info.display(), "root info file has no mapping to the latest update");
            CatalogError::NoLatest {
                path: root_info.clone(),
            }
        })?;

    let catalog = Catalog::new(manifests, latest).inspect_err(|e| error!(error = %e, "catalog rejected"))?;
    info!(
        latest = %catalog.latest_id(),
        updates = catalog.update_count(),
        files = catalog.latest().len(),
        "catalog loaded"
    );
    Ok(catalog)
}

/// Owner of the currently published catalog.
///
/// Readers take an `Arc` snapshot and release the lock immediately; a reload
/// builds the replacement off to the side and swaps it in whole.
#[derive(Debug)]
pub struct CatalogHandle {
    current: RwLock<Arc<Catalog>>,
}

impl CatalogHandle {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            current: RwLock::new(Arc::new(catalog)),
        }
    }

    pub fn snapshot(&self) -> Arc<Catalog> {
        // A poisoned lock still holds a complete Arc; the swap cannot tear.
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Publish `catalog`, returning the snapshot it replaced.
    pub fn replace(&self, catalog: Catalog) -> Arc<Catalog> {
        let next = Arc::new(catalog);
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, next)
    }

    /// Rebuild from `root` and publish on success. On failure nothing is
    /// published and the error is returned to the caller, who must stop
    /// serving.
    pub fn reload(&self, root: &Path) -> Result<Arc<Catalog>, CatalogError> {
        let catalog = load(root)?;
        self.replace(catalog);
        let current = self.snapshot();
        info!(latest = %current.latest_id(), "catalog reloaded");
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn hash(c: char) -> String {
        std::iter::repeat(c).take(64).collect()
    }

    fn write_update(root: &Path, id: &str, info: &str) {
        let dir = root.join(id);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(INFO_FILE), info).unwrap();
    }

    #[test]
    fn parse_info_drops_malformed_lines() {
        let text = format!(
            "a.txt {a}\n\n   b.bin   {b}  \nnospace\nbad/name {a}\nc.txt NOTAHASH\nd.txt {a} trailing\n",
            a = hash('a'),
            b = hash('b'),
        );
        let m = parse_info(&text);
        assert_eq!(m.len(), 2);
        assert_eq!(m[&FileName::new("a.txt").unwrap()].as_str(), hash('a'));
        assert_eq!(m[&FileName::new("b.bin").unwrap()].as_str(), hash('b'));
    }

    #[test]
    fn render_info_parses_back() {
        let m = parse_info(&format!("z {}\ny {}\n", hash('1'), hash('2')));
        assert_eq!(render_info(&m), format!("y {}\nz {}\n", hash('2'), hash('1')));
    }

    #[test]
    fn load_builds_catalog_and_knows_its_updates() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        write_update(root, &hash('1'), &format!("x {}\n", hash('a')));
        write_update(root, &hash('2'), &format!("x {}\ny {}\n", hash('b'), hash('c')));
        fs::create_dir(root.join(hash('3'))).unwrap(); // no info file
        write_update(root, "not-an-id", &format!("x {}\n", hash('a')));
        fs::write(root.join(INFO_FILE), format!("latest {}\n", hash('2'))).unwrap();

        let catalog = load(root).unwrap();
        assert_eq!(catalog.update_count(), 2);
        assert_eq!(catalog.latest_id().as_str(), hash('2'));
        assert_eq!(catalog.latest().len(), 2);
        let empty = Checksum::new(hash('3')).unwrap();
        assert_eq!(catalog.known_update(&UpdateId::Hash(empty)), None);
        assert_eq!(catalog.known_update(&UpdateId::Latest), None);
        let old = Checksum::new(hash('1')).unwrap();
        assert_eq!(catalog.known_update(&UpdateId::Hash(old.clone())), Some(&old));
    }

    #[test]
    fn load_fails_without_root_info() {
        let temp = tempfile::tempdir().unwrap();
        write_update(temp.path(), &hash('1'), &format!("x {}\n", hash('a')));
        assert!(matches!(load(temp.path()), Err(CatalogError::RootInfo { .. })));
    }

    #[test]
    fn load_fails_without_latest_key() {
        let temp = tempfile::tempdir().unwrap();
        write_update(temp.path(), &hash('1'), &format!("x {}\n", hash('a')));
        fs::write(temp.path().join(INFO_FILE), format!("newest {}\n", hash('1'))).unwrap();
        assert!(matches!(load(temp.path()), Err(CatalogError::NoLatest { .. })));
    }

    #[test]
    fn load_fails_when_latest_is_unknown() {
        let temp = tempfile::tempdir().unwrap();
        write_update(temp.path(), &hash('1'), &format!("x {}\n", hash('a')));
        fs::write(temp.path().join(INFO_FILE), format!("latest {}\n", hash('9'))).unwrap();
        assert!(matches!(load(temp.path()), Err(CatalogError::LatestMissing(_))));
    }

    #[test]
    fn load_fails_when_latest_is_empty() {
        let temp = tempfile::tempdir().unwrap();
        write_update(temp.path(), &hash('1'), "garbage only\n");
        fs::write(temp.path().join(INFO_FILE), format!("latest {}\n", hash('1'))).unwrap();
        assert!(matches!(load(temp.path()), Err(CatalogError::LatestEmpty(_))));
    }

    #[test]
    fn load_fails_on_missing_root() {
        let temp = tempfile::tempdir().unwrap();
        assert!(matches!(
            load(&temp.path().join("absent")),
            Err(CatalogError::ListRoot { .. })
        ));
    }

    #[test]
    fn handle_swaps_whole_catalog() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        write_update(root, &hash('1'), &format!("x {}\n", hash('a')));
        write_update(root, &hash('2'), &format!("x {}\n", hash('b')));
        fs::write(root.join(INFO_FILE), format!("latest {}\n", hash('1'))).unwrap();

        let handle = CatalogHandle::new(load(root).unwrap());
        let before = handle.snapshot();

        fs::write(root.join(INFO_FILE), format!("latest {}\n", hash('2'))).unwrap();
        let after = handle.reload(root).unwrap();

        assert_eq!(before.latest_id().as_str(), hash('1'));
        assert_eq!(after.latest_id().as_str(), hash('2'));
        assert_eq!(handle.snapshot().latest_id().as_str(), hash('2'));
    }

    #[test]
    fn failed_reload_keeps_nothing_new() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        write_update(root, &hash('1'), &format!("x {}\n", hash('a')));
        fs::write(root.join(INFO_FILE), format!("latest {}\n", hash('1'))).unwrap();

        let handle = CatalogHandle::new(load(root).unwrap());
        fs::remove_file(root.join(INFO_FILE)).unwrap();
        assert!(handle.reload(root).is_err());
        assert_eq!(handle.snapshot().latest_id().as_str(), hash('1'));
    }
}
