//! Finding a file record's bytes on disk.
//!
//! A record's recorded path can go stale (moved archive, half-finished
//! migration, a merge product whose bytes still live under the source
//! orders). `ResolverChain` tries an ordered list of `LocationStrategy`s and
//! returns the first candidate that is a regular file. Restore and merge
//! build their chains from the same strategies.
//!
//! `HashMatch` queries the database; never resolve while holding a database
//! connection lock.

use std::path::PathBuf;

use crate::db::file_repo::{ConvertedFileRow, UploadedFileRow};
use crate::db::Database;
use crate::hashing::ContentHash;
use crate::storage::{ArchiveStore, Namespace};

/// What a strategy knows about the file it is looking for.
#[derive(Debug, Clone)]
pub struct FileLocator {
    pub namespace: Namespace,
    pub filename: String,
    pub recorded_path: Option<PathBuf>,
    pub content_hash: Option<ContentHash>,
}

impl FileLocator {
    pub fn upload(row: &UploadedFileRow) -> Self {
        Self {
            namespace: Namespace::Uploads,
            filename: row.filename.clone(),
            recorded_path: non_empty_path(&row.file_path),
            content_hash: row.file_hash.as_deref().map(ContentHash::from_hex),
        }
    }

    /// Converted rows carry no hash of their own bytes, so hash matching
    /// never applies to them.
    pub fn converted(row: &ConvertedFileRow) -> Self {
        Self {
            namespace: Namespace::Converted,
            filename: row.filename.clone(),
            recorded_path: non_empty_path(&row.file_path),
            content_hash: None,
        }
    }
}

fn non_empty_path(path: &str) -> Option<PathBuf> {
    if path.is_empty() {
        None
    } else {
        Some(PathBuf::from(path))
    }
}

/// One place a file's bytes might be.
pub trait LocationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Candidate paths in preference order. Existence is checked by the chain.
    fn candidates(&self, locator: &FileLocator) -> Vec<PathBuf>;
}

/// The path stored on the record.
pub struct RecordedPath;

impl LocationStrategy for RecordedPath {
    fn name(&self) -> &'static str {
        "recorded"
    }

    fn candidates(&self, locator: &FileLocator) -> Vec<PathBuf> {
        locator.recorded_path.iter().cloned().collect()
    }
}

/// The shared workspace, valid only while it reflects the order being read.
pub struct WorkspacePath {
    uploads: PathBuf,
    converted: PathBuf,
}

impl WorkspacePath {
    pub fn new(uploads: impl Into<PathBuf>, converted: impl Into<PathBuf>) -> Self {
        Self {
            uploads: uploads.into(),
            converted: converted.into(),
        }
    }
}

impl LocationStrategy for WorkspacePath {
    fn name(&self) -> &'static str {
        "workspace"
    }

    fn candidates(&self, locator: &FileLocator) -> Vec<PathBuf> {
        if !crate::sanitize::is_plain_filename(&locator.filename) {
            return Vec::new();
        }
        let dir = match locator.namespace {
            Namespace::Uploads => &self.uploads,
            Namespace::Converted => &self.converted,
        };
        vec![dir.join(&locator.filename)]
    }
}

/// `{archive}/{namespace}/{order_number}/{filename}` for a fixed order.
pub struct ArchivePath {
    store: ArchiveStore,
    order_number: String,
}

impl ArchivePath {
    pub fn new(store: ArchiveStore, order_number: impl Into<String>) -> Self {
        Self {
            store,
            order_number: order_number.into(),
        }
    }
}

impl LocationStrategy for ArchivePath {
    fn name(&self) -> &'static str {
        "archive"
    }

    fn candidates(&self, locator: &FileLocator) -> Vec<PathBuf> {
        self.store
            .path_for(locator.namespace, &self.order_number, &locator.filename)
            .map(|p| vec![p])
            .unwrap_or_default()
    }
}

/// Any other upload recorded with identical bytes.
pub struct HashMatch {
    store: ArchiveStore,
    db: Database,
}

impl HashMatch {
    pub fn new(store: ArchiveStore, db: Database) -> Self {
        Self { store, db }
    }
}

impl LocationStrategy for HashMatch {
    fn name(&self) -> &'static str {
        "hash"
    }

    fn candidates(&self, locator: &FileLocator) -> Vec<PathBuf> {
        let Some(hash) = locator.content_hash.as_ref() else {
            return Vec::new();
        };
        match self.store.resolve_by_hash(&self.db, hash) {
            Ok(rows) => rows
                .into_iter()
                .filter_map(|row| non_empty_path(&row.file_path))
                .filter(|p| Some(p) != locator.recorded_path.as_ref())
                .collect(),
            Err(e) => {
                tracing::warn!(hash = %hash.short(), error = %e, "hash lookup failed");
                Vec::new()
            }
        }
    }
}

/// A located file and the strategy that found it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub path: PathBuf,
    pub strategy: &'static str,
}

/// Ordered list of location strategies.
#[derive(Default)]
pub struct ResolverChain {
    strategies: Vec<Box<dyn LocationStrategy>>,
}

impl ResolverChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, strategy: impl LocationStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Chain used when restoring `order_number` into the workspace: recorded
    /// path, the order's own archive, each merge source's archive, then any
    /// upload with the same hash.
    pub fn for_restore(
        store: &ArchiveStore,
        order_number: &str,
        merged_from: &[String],
        db: Option<&Database>,
    ) -> Self {
        let mut chain = Self::new()
            .with(RecordedPath)
            .with(ArchivePath::new(store.clone(), order_number));
        for source in merged_from {
            chain = chain.with(ArchivePath::new(store.clone(), source.as_str()));
        }
        if let Some(db) = db {
            chain = chain.with(HashMatch::new(store.clone(), db.clone()));
        }
        chain
    }

    /// Chain used when reading a merge source: recorded path, the shared
    /// workspace when it currently reflects that source, the source archive,
    /// then any upload with the same hash.
    pub fn for_merge_source(
        store: &ArchiveStore,
        source_order_number: &str,
        workspace: Option<WorkspacePath>,
        db: Option<&Database>,
    ) -> Self {
        let mut chain = Self::new().with(RecordedPath);
        if let Some(workspace) = workspace {
            chain = chain.with(workspace);
        }
        chain = chain.with(ArchivePath::new(store.clone(), source_order_number));
        if let Some(db) = db {
            chain = chain.with(HashMatch::new(store.clone(), db.clone()));
        }
        chain
    }

    /// First candidate that exists as a regular file.
    pub fn resolve(&self, locator: &FileLocator) -> Option<Resolved> {
        for strategy in &self.strategies {
            for path in strategy.candidates(locator) {
                if path.is_file() {
                    tracing::debug!(
                        file = %locator.filename,
                        strategy = strategy.name(),
                        "located file"
                    );
                    return Some(Resolved {
                        path,
                        strategy: strategy.name(),
                    });
                }
            }
        }
        None
    }
}
