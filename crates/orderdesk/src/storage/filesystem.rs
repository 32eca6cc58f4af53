use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// Creates `path` and its parents if missing.
pub fn ensure_directory(path: &Path) -> Result<(), StorageError> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}

/// Copies `src` to `dst`, creating the destination directory on demand.
/// Returns the number of bytes copied.
///
/// Bytes land in a hidden sibling first and are renamed into place, so a
/// reader never observes a half-written `dst`. Copying a file onto itself is
/// a no-op.
pub fn copy_file(src: &Path, dst: &Path) -> Result<u64, StorageError> {
    if same_file(src, dst) {
        return std::fs::metadata(src)
            .map(|m| m.len())
            .map_err(|e| StorageError::ReadFile {
                path: src.to_path_buf(),
                source: e,
            });
    }

    if let Some(parent) = dst.parent() {
        ensure_directory(parent)?;
    }

    let staging = staging_path(dst);
    let copied = std::fs::copy(src, &staging).map_err(|e| {
        let _ = std::fs::remove_file(&staging);
        StorageError::CopyFile {
            from: src.to_path_buf(),
            to: dst.to_path_buf(),
            source: e,
        }
    })?;

    if let Err(first) = std::fs::rename(&staging, dst) {
        // Some platforms refuse to rename over an existing file.
        let retried = std::fs::remove_file(dst).and_then(|_| std::fs::rename(&staging, dst));
        if retried.is_err() {
            let _ = std::fs::remove_file(&staging);
            return Err(StorageError::CopyFile {
                from: src.to_path_buf(),
                to: dst.to_path_buf(),
                source: first,
            });
        }
    }

    Ok(copied)
}

/// Writes `content` to `dst` the same way `copy_file` does.
pub fn write_file(dst: &Path, content: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = dst.parent() {
        ensure_directory(parent)?;
    }

    let staging = staging_path(dst);
    let written = std::fs::File::create(&staging)
        .and_then(|mut file| file.write_all(content).and_then(|_| file.sync_all()))
        .and_then(|_| std::fs::rename(&staging, dst));

    written.map_err(|e| {
        let _ = std::fs::remove_file(&staging);
        StorageError::WriteFile {
            path: dst.to_path_buf(),
            source: e,
        }
    })
}

/// Removes a regular file. Returns `Ok(false)` when it did not exist.
pub fn remove_file(path: &Path) -> Result<bool, StorageError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::RemoveFile {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Lists the regular files directly inside `dir`, sorted by name.
/// A missing directory lists as empty.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(StorageError::ListDirectory {
                path: dir.to_path_buf(),
                source: e,
            })
        }
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StorageError::ListDirectory {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if is_file {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Removes `dir` if it exists and is empty. Returns true if it was removed.
pub fn remove_dir_if_empty(dir: &Path) -> bool {
    let empty = std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false);
    empty && std::fs::remove_dir(dir).is_ok()
}

fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn staging_path(dst: &Path) -> PathBuf {
    let name = dst
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    let tag = uuid::Uuid::new_v4().simple().to_string();
    dst.with_file_name(format!(".{}.{}.part", name, &tag[..8]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_creates_nested_directories() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("a.pdf");
        std::fs::write(&src, b"Hello").unwrap();

        let dst = temp_dir.path().join("deep/nested/a.pdf");
        let copied = copy_file(&src, &dst).unwrap();

        assert_eq!(copied, 5);
        assert_eq!(std::fs::read(&dst).unwrap(), b"Hello");
        assert!(src.exists());
    }

    #[test]
    fn test_copy_overwrites_existing() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("new.pdf");
        let dst = temp_dir.path().join("out/a.pdf");
        std::fs::create_dir_all(dst.parent().unwrap()).unwrap();
        std::fs::write(&src, b"new").unwrap();
        std::fs::write(&dst, b"old").unwrap();

        copy_file(&src, &dst).unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), b"new");
        // No staging leftovers.
        assert_eq!(list_files(dst.parent().unwrap()).unwrap(), vec![dst.clone()]);
    }

    #[test]
    fn test_copy_onto_itself_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.pdf");
        std::fs::write(&path, b"same").unwrap();

        assert_eq!(copy_file(&path, &path).unwrap(), 4);
        assert_eq!(std::fs::read(&path).unwrap(), b"same");
    }

    #[test]
    fn test_copy_missing_source_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = copy_file(
            &temp_dir.path().join("nonexistent.pdf"),
            &temp_dir.path().join("out/x.pdf"),
        );

        match result {
            Err(StorageError::CopyFile { from, .. }) => {
                assert!(from.to_string_lossy().contains("nonexistent.pdf"));
            }
            other => panic!("Expected CopyFile error, got {:?}", other),
        }
        assert!(list_files(&temp_dir.path().join("out")).unwrap().is_empty());
    }

    #[test]
    fn test_write_empty_content() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("empty/file.bin");

        write_file(&path, &[]).unwrap();
        assert!(std::fs::read(&path).unwrap().is_empty());
    }

    #[test]
    fn test_remove_file_reports_absence() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.pdf");
        std::fs::write(&path, b"x").unwrap();

        assert!(remove_file(&path).unwrap());
        assert!(!remove_file(&path).unwrap());
    }

    #[test]
    fn test_list_files_skips_directories() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("b.pdf"), b"b").unwrap();
        std::fs::write(temp_dir.path().join("a.pdf"), b"a").unwrap();
        std::fs::create_dir(temp_dir.path().join("sub")).unwrap();

        let names: Vec<String> = list_files(temp_dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.pdf", "b.pdf"]);
        assert!(list_files(&temp_dir.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn test_remove_dir_if_empty() {
        let temp_dir = TempDir::new().unwrap();
        let full = temp_dir.path().join("full");
        let empty = temp_dir.path().join("empty");
        std::fs::create_dir(&full).unwrap();
        std::fs::create_dir(&empty).unwrap();
        std::fs::write(full.join("x"), b"x").unwrap();

        assert!(!remove_dir_if_empty(&full));
        assert!(remove_dir_if_empty(&empty));
        assert!(!empty.exists());
    }
}
