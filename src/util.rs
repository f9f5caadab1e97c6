use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    /// Final path component, always valid UTF-8.
    pub name: String,
    pub kind: EntryKind,
    pub full_path: PathBuf,
}

/// List the immediate children of `root`, skipping hidden entries.
///
/// Symlinks are followed so an update directory may point elsewhere. Failure
/// to read `root` itself is returned; a child that cannot be inspected (for
/// example a dangling link) is logged and skipped.
pub fn list_children(root: &Path) -> std::io::Result<Vec<DirEntry>> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(e.into()),
            Err(e) => {
                warn!(root = %root.display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };

        let Some(name) = entry.file_name().to_str() else {
            warn!(path = %entry.path().display(), "skipping non-UTF8 entry");
            continue;
        };
        if name.starts_with('.') {
            continue;
        }

        let kind = if entry.file_type().is_dir() {
            EntryKind::Dir
        } else if entry.file_type().is_file() {
            EntryKind::File
        } else {
            continue;
        };

        entries.push(DirEntry {
            name: name.to_string(),
            kind,
            full_path: entry.path().to_path_buf(),
        });
    }

    Ok(entries)
}

/// Immediate subdirectories of `root`.
pub fn list_dirs(root: &Path) -> std::io::Result<Vec<DirEntry>> {
    Ok(list_children(root)?
        .into_iter()
        .filter(|e| e.kind == EntryKind::Dir)
        .collect())
}

/// Regular files directly inside `root`.
pub fn list_files(root: &Path) -> std::io::Result<Vec<DirEntry>> {
    Ok(list_children(root)?
        .into_iter()
        .filter(|e| e.kind == EntryKind::File)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn lists_visible_children_by_kind() {
        let temp = tempfile::tempdir().unwrap();
        fs::create_dir(temp.path().join("b_dir")).unwrap();
        fs::create_dir(temp.path().join(".hidden_dir")).unwrap();
        fs::write(temp.path().join("a.txt"), b"a").unwrap();
        fs::write(temp.path().join(".info"), b"").unwrap();
        fs::create_dir_all(temp.path().join("b_dir/nested")).unwrap();

        let dirs = list_dirs(temp.path()).unwrap();
        assert_eq!(dirs.len(), 1);
        assert_eq!(dirs[0].name, "b_dir");

        let files = list_files(temp.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "a.txt");
    }

    #[test]
    fn missing_root_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        assert!(list_children(&temp.path().join("absent")).is_err());
    }
}
