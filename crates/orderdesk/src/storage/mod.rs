//! Physical storage: the per-order archive tree, file copy helpers and the
//! location strategies that find a record's bytes on disk.

use std::fmt;
use std::path::PathBuf;

pub mod archive;
pub mod filesystem;
pub mod resolver;

pub use archive::ArchiveStore;
pub use resolver::{FileLocator, LocationStrategy, Resolved, ResolverChain};

/// The two file namespaces shared by the archive and the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Uploads,
    Converted,
}

impl Namespace {
    pub const ALL: [Namespace; 2] = [Namespace::Uploads, Namespace::Converted];

    /// Directory name under both the archive root and the work root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Namespace::Uploads => "uploads",
            Namespace::Converted => "converted",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// A single file that could not be copied, removed or located.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub namespace: Namespace,
    pub filename: String,
    pub path: Option<PathBuf>,
    pub reason: String,
}

impl FileFailure {
    pub fn new(namespace: Namespace, filename: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            namespace,
            filename: filename.into(),
            path: None,
            reason: reason.to_string(),
        }
    }

    pub fn at(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl fmt::Display for FileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}: {}", self.namespace, self.filename, self.reason)
    }
}
