//! Whole-document persistence

use crate::Result;
use std::fs;
use std::path::{Path, PathBuf};

/// Replace `path` with `contents`.
///
/// The bytes go to a temp file private to this writer (pid plus a random
/// suffix) and are renamed into place, so a reader sees either the old or
/// the new document and concurrent writers never share a temp file.
pub fn write_document(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = temp_path(path);
    let written = fs::write(&tmp, contents).and_then(|_| fs::rename(&tmp, path));
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(
        ".{}.{}.{}.tmp",
        name,
        std::process::id(),
        uuid::Uuid::new_v4().simple()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kiln_document_test_{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_write_replaces_and_leaves_no_temp_files() {
        let dir = temp_dir();
        let path = dir.join("jobs.json");
        write_document(&path, "{\"v\":1}").unwrap();
        write_document(&path, "{\"v\":2}").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"v\":2}");
        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert_eq!(entries.len(), 1);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_temp_paths_are_unique_per_write() {
        let path = Path::new("/data/library.json");
        let a = temp_path(path);
        let b = temp_path(path);
        assert_ne!(a, b);
        assert_eq!(a.parent(), path.parent());
        let name = a.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(".library.json."));
        assert!(name.contains(&std::process::id().to_string()));
    }

    #[test]
    fn test_foreign_temp_file_is_not_touched() {
        let dir = temp_dir();
        let path = dir.join("library.json");
        let stale = dir.join("library.json.tmp");
        fs::write(&stale, "other writer").unwrap();

        write_document(&path, "[]").unwrap();
        assert_eq!(fs::read_to_string(&stale).unwrap(), "other writer");
        assert_eq!(fs::read_to_string(&path).unwrap(), "[]");

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = temp_dir();
        let path = dir.join("nested").join("deeper").join("library.json");
        write_document(&path, "{}").unwrap();
        assert!(path.is_file());
        fs::remove_dir_all(&dir).ok();
    }
}
