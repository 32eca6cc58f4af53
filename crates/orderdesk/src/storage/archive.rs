use std::path::{Path, PathBuf};

use crate::db::file_repo::{self, UploadedFileRow};
use crate::db::{Database, DatabaseError};
use crate::error::StorageError;
use crate::hashing::{self, ContentHash};
use crate::sanitize::is_plain_filename;
use crate::storage::filesystem;
use crate::storage::{FileFailure, Namespace};

/// Durable, order-keyed file store rooted at `ARCHIVE_ROOT`.
///
/// Layout: `{root}/{uploads|converted}/{order_number}/{filename}`. The store
/// does no deduplication of its own; the same bytes may live under several
/// orders.
#[derive(Debug, Clone)]
pub struct ArchiveStore {
    root: PathBuf,
}

/// Result of removing an order's archived files.
#[derive(Debug, Default)]
pub struct PurgeOutcome {
    pub removed: usize,
    pub failures: Vec<FileFailure>,
}

impl ArchiveStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/{namespace}/{order_number}`.
    pub fn order_dir(&self, namespace: Namespace, order_number: &str) -> PathBuf {
        self.root.join(namespace.dir_name()).join(order_number)
    }

    /// Reconstructs the archive path of `filename` under `order_number`.
    pub fn path_for(
        &self,
        namespace: Namespace,
        order_number: &str,
        filename: &str,
    ) -> Result<PathBuf, StorageError> {
        if !is_plain_filename(order_number) {
            return Err(StorageError::InvalidFilename(order_number.to_string()));
        }
        if !is_plain_filename(filename) {
            return Err(StorageError::InvalidFilename(filename.to_string()));
        }
        Ok(self.order_dir(namespace, order_number).join(filename))
    }

    /// Creates both namespace directories for an order.
    pub fn ensure_order_dirs(&self, order_number: &str) -> Result<(), StorageError> {
        for namespace in Namespace::ALL {
            filesystem::ensure_directory(&self.order_dir(namespace, order_number))?;
        }
        Ok(())
    }

    /// Copies `source` into the archive and returns the archive path.
    /// An existing archived file of the same name is replaced.
    pub fn store(
        &self,
        source: &Path,
        order_number: &str,
        namespace: Namespace,
        filename: &str,
    ) -> Result<PathBuf, StorageError> {
        let target = self.path_for(namespace, order_number, filename)?;
        filesystem::copy_file(source, &target)?;
        log::debug!("Archived {} into {}/{}", filename, namespace, order_number);
        Ok(target)
    }

    /// Writes in-memory content into the archive.
    pub fn store_bytes(
        &self,
        content: &[u8],
        order_number: &str,
        namespace: Namespace,
        filename: &str,
    ) -> Result<PathBuf, StorageError> {
        let target = self.path_for(namespace, order_number, filename)?;
        filesystem::write_file(&target, content)?;
        Ok(target)
    }

    /// Streaming SHA-256 of the file at `path`.
    pub fn hash(&self, path: &Path) -> Result<ContentHash, StorageError> {
        hashing::hash_file(path)
    }

    /// Uploaded files recorded with `hash`, most recent first. The match is
    /// not unique; callers pick the entry they need.
    pub fn resolve_by_hash(
        &self,
        db: &Database,
        hash: &ContentHash,
    ) -> Result<Vec<UploadedFileRow>, DatabaseError> {
        db.with_conn(|conn| file_repo::uploaded_by_hash(conn, hash.as_str()))
    }

    /// Regular files archived for an order in one namespace.
    pub fn list_order_files(
        &self,
        namespace: Namespace,
        order_number: &str,
    ) -> Result<Vec<PathBuf>, StorageError> {
        filesystem::list_files(&self.order_dir(namespace, order_number))
    }

    /// Removes every archived file of an order, then its empty directories.
    /// Per-file failures are collected and the remaining files still go.
    pub fn purge_order(&self, order_number: &str) -> PurgeOutcome {
        let mut outcome = PurgeOutcome::default();
        if !is_plain_filename(order_number) {
            outcome.failures.push(FileFailure::new(
                Namespace::Uploads,
                order_number,
                StorageError::InvalidFilename(order_number.to_string()),
            ));
            return outcome;
        }

        for namespace in Namespace::ALL {
            let dir = self.order_dir(namespace, order_number);
            let files = match filesystem::list_files(&dir) {
                Ok(files) => files,
                Err(e) => {
                    log::warn!("Cannot list {}: {}", dir.display(), e);
                    outcome
                        .failures
                        .push(FileFailure::new(namespace, order_number, e).at(&dir));
                    continue;
                }
            };

            for path in files {
                let name = crate::sanitize::redact_path(&path);
                match filesystem::remove_file(&path) {
                    Ok(_) => outcome.removed += 1,
                    Err(e) => {
                        log::warn!("Failed to remove archived file {}: {}", path.display(), e);
                        outcome
                            .failures
                            .push(FileFailure::new(namespace, name, e).at(&path));
                    }
                }
            }
            filesystem::remove_dir_if_empty(&dir);
        }
        outcome
    }
}
