//! The shared workspace: one `uploads` and one `converted` directory that
//! reflect at most one order's files at a time.
//!
//! Every mutation goes through a `WorkspaceGuard`, obtained from
//! `Workspace::lock`. Holding the guard across a clear followed by a restore
//! keeps two activations from interleaving.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{info, info_span, warn};

use crate::config::Config;
use crate::db::{file_repo, Database};
use crate::error::{OrderError, StorageError};
use crate::order::model::Order;
use crate::order::outcome::{Completion, FileFailure, Tally};
use crate::sanitize::redact_path;
use crate::storage::filesystem;
use crate::storage::resolver::{FileLocator, ResolverChain, WorkspacePath};
use crate::storage::{ArchiveStore, Namespace};

#[derive(Debug, Default)]
struct WorkspaceState {
    /// Id of the order whose files the directories currently hold, when known.
    materialized: Option<i64>,
}

#[derive(Debug)]
pub struct Workspace {
    uploads: PathBuf,
    converted: PathBuf,
    state: Mutex<WorkspaceState>,
}

impl Workspace {
    pub fn new(uploads: impl Into<PathBuf>, converted: impl Into<PathBuf>) -> Self {
        Self {
            uploads: uploads.into(),
            converted: converted.into(),
            state: Mutex::new(WorkspaceState::default()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.uploads_dir(), config.converted_dir())
    }

    pub fn dir(&self, namespace: Namespace) -> &Path {
        match namespace {
            Namespace::Uploads => &self.uploads,
            Namespace::Converted => &self.converted,
        }
    }

    pub fn ensure_dirs(&self) -> Result<(), StorageError> {
        filesystem::ensure_directory(&self.uploads)?;
        filesystem::ensure_directory(&self.converted)
    }

    /// Takes exclusive access to the workspace.
    pub fn lock(&self) -> Result<WorkspaceGuard<'_>, OrderError> {
        let state = self.state.lock().map_err(|_| OrderError::WorkspacePoisoned)?;
        Ok(WorkspaceGuard {
            workspace: self,
            state,
        })
    }
}

/// Exclusive handle on the workspace directories.
pub struct WorkspaceGuard<'a> {
    workspace: &'a Workspace,
    state: MutexGuard<'a, WorkspaceState>,
}

impl<'a> WorkspaceGuard<'a> {
    /// The order currently materialized, if known.
    pub fn materialized(&self) -> Option<i64> {
        self.state.materialized
    }

    pub fn set_materialized(&mut self, order_id: Option<i64>) {
        self.state.materialized = order_id;
    }

    pub fn dir(&self, namespace: Namespace) -> &Path {
        self.workspace.dir(namespace)
    }

    /// Location strategy over the workspace, for reading a source order that
    /// is currently materialized.
    pub fn location(&self) -> WorkspacePath {
        WorkspacePath::new(&self.workspace.uploads, &self.workspace.converted)
    }

    /// Regular files currently in one workspace directory.
    pub fn files(&self, namespace: Namespace) -> Result<Vec<PathBuf>, StorageError> {
        filesystem::list_files(self.dir(namespace))
    }

    /// Copies `source` into the workspace under `filename`.
    pub fn place(
        &mut self,
        namespace: Namespace,
        source: &Path,
        filename: &str,
    ) -> Result<PathBuf, StorageError> {
        if !crate::sanitize::is_plain_filename(filename) {
            return Err(StorageError::InvalidFilename(filename.to_string()));
        }
        let target = self.dir(namespace).join(filename);
        filesystem::copy_file(source, &target)?;
        Ok(target)
    }

    /// Removes one file from the workspace. Returns false when absent.
    pub fn remove(&mut self, namespace: Namespace, filename: &str) -> Result<bool, StorageError> {
        if !crate::sanitize::is_plain_filename(filename) {
            return Err(StorageError::InvalidFilename(filename.to_string()));
        }
        filesystem::remove_file(&self.dir(namespace).join(filename))
    }

    /// Copies every regular workspace file into `order`'s archive and points
    /// the matching metadata rows at the archive copy.
    pub fn archive_outgoing(
        &mut self,
        db: &Database,
        store: &ArchiveStore,
        order: &Order,
    ) -> ArchiveReport {
        let span = info_span!("workspace.archive", order_number = %order.order_number);
        let _enter = span.enter();

        let mut report = ArchiveReport::default();
        for namespace in Namespace::ALL {
            let files = match self.files(namespace) {
                Ok(files) => files,
                Err(e) => {
                    warn!(namespace = %namespace, error = %e, "cannot list workspace");
                    report
                        .failures
                        .push(FileFailure::new(namespace, "*", e).at(self.dir(namespace)));
                    continue;
                }
            };

            for path in files {
                let filename = redact_path(&path);
                let tally = report.tally_mut(namespace);
                match store.store(&path, &order.order_number, namespace, &filename) {
                    Ok(archived) => {
                        tally.hit();
                        match repoint_row(db, order.id, namespace, &filename, &archived) {
                            Ok(true) => report.rows_updated += 1,
                            Ok(false) => {}
                            Err(e) => {
                                warn!(file = %filename, error = %e, "archived file but could not update its record");
                            }
                        }
                    }
                    Err(e) => {
                        tally.miss();
                        warn!(file = %filename, error = %e, "failed to archive workspace file");
                        report
                            .failures
                            .push(FileFailure::new(namespace, filename, e).at(&path));
                    }
                }
            }
        }

        info!(
            uploads = %report.uploads,
            converted = %report.converted,
            rows_updated = report.rows_updated,
            "archived outgoing workspace"
        );
        report
    }

    /// Deletes every regular file from both workspace directories. Failures
    /// are logged and skipped.
    pub fn clear(&mut self) -> ClearReport {
        let mut report = ClearReport::default();
        for namespace in Namespace::ALL {
            let files = match self.files(namespace) {
                Ok(files) => files,
                Err(e) => {
                    warn!(namespace = %namespace, error = %e, "cannot list workspace");
                    report
                        .failures
                        .push(FileFailure::new(namespace, "*", e).at(self.dir(namespace)));
                    continue;
                }
            };
            for path in files {
                match filesystem::remove_file(&path) {
                    Ok(true) => report.removed += 1,
                    Ok(false) => {}
                    Err(e) => {
                        let filename = redact_path(&path);
                        warn!(file = %filename, error = %e, "failed to remove workspace file");
                        report
                            .failures
                            .push(FileFailure::new(namespace, filename, e).at(&path));
                    }
                }
            }
        }
        // Whatever was there before, the directories no longer reflect it.
        self.state.materialized = None;
        report
    }

    /// Copies every file of `order` into the workspace, locating bytes
    /// through the restore chain. Missing files are counted, not fatal.
    ///
    /// The workspace is not cleared first; callers clear under the same guard.
    pub fn restore(
        &mut self,
        db: &Database,
        store: &ArchiveStore,
        order: &Order,
    ) -> Result<RestoreReport, OrderError> {
        let span = info_span!("workspace.restore", order_number = %order.order_number);
        let _enter = span.enter();

        let (uploads, converted) = db.with_conn(|conn| {
            Ok((
                file_repo::uploaded_by_order(conn, order.id)?,
                file_repo::converted_by_order(conn, order.id)?,
            ))
        })?;

        let chain =
            ResolverChain::for_restore(store, &order.order_number, &order.merged_from, Some(db));

        let mut report = RestoreReport {
            order_number: order.order_number.clone(),
            ..Default::default()
        };

        let locators = uploads
            .iter()
            .map(FileLocator::upload)
            .chain(converted.iter().map(FileLocator::converted));
        for locator in locators {
            let namespace = locator.namespace;
            let outcome = match chain.resolve(&locator) {
                Some(found) => self
                    .place(namespace, &found.path, &locator.filename)
                    .map_err(|e| e.to_string()),
                None => Err("not found in any archive location".to_string()),
            };
            let tally = report.tally_mut(namespace);
            match outcome {
                Ok(_) => tally.hit(),
                Err(reason) => {
                    tally.miss();
                    warn!(file = %locator.filename, namespace = %namespace, reason = %reason, "file not restored");
                    report
                        .failures
                        .push(FileFailure::new(namespace, locator.filename.clone(), reason));
                }
            }
        }

        self.state.materialized = Some(order.id);

        let total = report.total();
        if total.completion() == Completion::Complete {
            info!(restored = %total, "{}", report);
        } else {
            warn!(restored = %total, "{}", report);
        }
        Ok(report)
    }
}

/// Points the metadata row for `filename` at its archive copy when it does
/// not already. Returns true if a row was updated.
fn repoint_row(
    db: &Database,
    order_id: i64,
    namespace: Namespace,
    filename: &str,
    archived: &Path,
) -> Result<bool, crate::db::DatabaseError> {
    let archived = archived.to_string_lossy();
    db.with_conn(|conn| match namespace {
        Namespace::Uploads => {
            match file_repo::find_uploaded_by_order_and_filename(conn, order_id, filename)? {
                Some(row) if row.file_path != archived => {
                    file_repo::update_uploaded_path(conn, row.id, &archived)?;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }
        Namespace::Converted => {
            match file_repo::find_converted_by_order_and_filename(conn, order_id, filename)? {
                Some(row) if row.file_path != archived => {
                    file_repo::update_converted_path(conn, row.id, &archived)?;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }
    })
}

#[derive(Debug, Default)]
pub struct ArchiveReport {
    pub uploads: Tally,
    pub converted: Tally,
    /// Metadata rows repointed at their archive copy.
    pub rows_updated: usize,
    pub failures: Vec<FileFailure>,
}

impl ArchiveReport {
    fn tally_mut(&mut self, namespace: Namespace) -> &mut Tally {
        match namespace {
            Namespace::Uploads => &mut self.uploads,
            Namespace::Converted => &mut self.converted,
        }
    }

    pub fn total(&self) -> Tally {
        self.uploads.combine(self.converted)
    }

    pub fn completion(&self) -> Completion {
        self.total().completion()
    }
}

impl fmt::Display for ArchiveReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "archived {} files", self.total())
    }
}

#[derive(Debug, Default)]
pub struct ClearReport {
    pub removed: usize,
    pub failures: Vec<FileFailure>,
}

impl ClearReport {
    pub fn completion(&self) -> Completion {
        Tally::new(self.removed, self.removed + self.failures.len()).completion()
    }
}

impl fmt::Display for ClearReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            write!(f, "cleared {} files", self.removed)
        } else {
            write!(
                f,
                "cleared {} files, {} could not be removed",
                self.removed,
                self.failures.len()
            )
        }
    }
}

#[derive(Debug, Default)]
pub struct RestoreReport {
    pub order_number: String,
    pub uploads: Tally,
    pub converted: Tally,
    pub failures: Vec<FileFailure>,
}

impl RestoreReport {
    fn tally_mut(&mut self, namespace: Namespace) -> &mut Tally {
        match namespace {
            Namespace::Uploads => &mut self.uploads,
            Namespace::Converted => &mut self.converted,
        }
    }

    pub fn total(&self) -> Tally {
        self.uploads.combine(self.converted)
    }

    pub fn completion(&self) -> Completion {
        self.total().completion()
    }
}

impl fmt::Display for RestoreReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "restored {} files (uploads {}, converted {})",
            self.total(),
            self.uploads,
            self.converted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{order_repo, user_repo};
    use crate::hashing::hash_file;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        db: Database,
        store: ArchiveStore,
        workspace: Workspace,
        order: Order,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = ArchiveStore::new(dir.path().join("archive"));
        let workspace = Workspace::new(dir.path().join("work/uploads"), dir.path().join("work/converted"));
        workspace.ensure_dirs().unwrap();
        let db = Database::open_in_memory().unwrap();
        let row = db
            .with_conn(|conn| {
                let uid = user_repo::insert(conn, "u", false, "2026-01-01T00:00:00Z")?;
                let id = order_repo::insert(
                    conn,
                    &order_repo::NewOrder {
                        order_number: "20260101-00000001".to_string(),
                        owner_id: uid,
                        status: "pending".to_string(),
                        is_merged: false,
                        note: None,
                        created_at: "2026-01-01T00:00:00Z".to_string(),
                    },
                )?;
                Ok(order_repo::find_by_id(conn, id)?.unwrap())
            })
            .unwrap();
        let order = Order::from_row(row, vec![]).unwrap();
        Fixture {
            _dir: dir,
            db,
            store,
            workspace,
            order,
        }
    }

    fn record_upload(f: &Fixture, filename: &str, path: &Path) -> i64 {
        let hash = hash_file(path).ok().map(|h| h.into_string());
        f.db.with_conn(|conn| {
            file_repo::insert_uploaded(
                conn,
                &file_repo::NewUploadedFile {
                    order_id: f.order.id,
                    filename: filename.to_string(),
                    original_filename: filename.to_string(),
                    file_path: path.to_string_lossy().into_owned(),
                    file_size: None,
                    file_type: Some("pdf".to_string()),
                    file_hash: hash,
                    uploaded_at: "2026-01-01T00:00:00Z".to_string(),
                },
            )
        })
        .unwrap()
    }

    #[test]
    fn test_clear_is_idempotent() {
        let f = fixture();
        std::fs::write(f.workspace.dir(Namespace::Uploads).join("a.pdf"), b"a").unwrap();
        std::fs::write(f.workspace.dir(Namespace::Converted).join("a_1.png"), b"p").unwrap();

        let mut guard = f.workspace.lock().unwrap();
        let first = guard.clear();
        assert_eq!(first.removed, 2);
        assert_eq!(first.completion(), Completion::Complete);

        let second = guard.clear();
        assert_eq!(second.removed, 0);
        assert!(second.failures.is_empty());
        assert!(guard.files(Namespace::Uploads).unwrap().is_empty());
        assert!(guard.files(Namespace::Converted).unwrap().is_empty());
    }

    #[test]
    fn test_archive_outgoing_repoints_rows() {
        let f = fixture();
        let ws_file = f.workspace.dir(Namespace::Uploads).join("a.pdf");
        std::fs::write(&ws_file, b"bytes").unwrap();
        let id = record_upload(&f, "a.pdf", &ws_file);

        let mut guard = f.workspace.lock().unwrap();
        let report = guard.archive_outgoing(&f.db, &f.store, &f.order);
        assert_eq!(report.uploads, Tally::new(1, 1));
        assert_eq!(report.rows_updated, 1);

        let archived = f
            .store
            .path_for(Namespace::Uploads, &f.order.order_number, "a.pdf")
            .unwrap();
        let row = f.db.with_conn(|conn| file_repo::find_uploaded(conn, id)).unwrap().unwrap();
        assert_eq!(row.file_path, archived.to_string_lossy());
        assert_eq!(std::fs::read(&archived).unwrap(), b"bytes");

        // Second pass leaves the already-archived row alone.
        let again = guard.archive_outgoing(&f.db, &f.store, &f.order);
        assert_eq!(again.rows_updated, 0);
    }

    #[test]
    fn test_archive_outgoing_keeps_dotfiles() {
        let f = fixture();
        std::fs::write(f.workspace.dir(Namespace::Uploads).join(".notes"), b"hidden").unwrap();

        let mut guard = f.workspace.lock().unwrap();
        let report = guard.archive_outgoing(&f.db, &f.store, &f.order);
        assert_eq!(report.uploads, Tally::new(1, 1));
        let archived = f
            .store
            .path_for(Namespace::Uploads, &f.order.order_number, ".notes")
            .unwrap();
        assert_eq!(std::fs::read(&archived).unwrap(), b"hidden");

        // Whatever clear removes has been archived first.
        assert_eq!(guard.clear().removed, 1);
    }

    #[test]
    fn test_archive_outgoing_on_empty_workspace() {
        let f = fixture();
        let mut guard = f.workspace.lock().unwrap();
        let report = guard.archive_outgoing(&f.db, &f.store, &f.order);
        assert_eq!(report.total(), Tally::new(0, 0));
        assert_eq!(report.to_string(), "archived 0/0 files");
    }

    #[test]
    fn test_restore_reports_partial_loss() {
        let f = fixture();
        let kept = f
            .store
            .store_bytes(b"kept", &f.order.order_number, Namespace::Uploads, "kept.pdf")
            .unwrap();
        record_upload(&f, "kept.pdf", &kept);
        record_upload(&f, "lost.pdf", &f._dir.path().join("nowhere/lost.pdf"));

        let mut guard = f.workspace.lock().unwrap();
        let report = guard.restore(&f.db, &f.store, &f.order).unwrap();
        assert_eq!(report.uploads, Tally::new(1, 2));
        assert_eq!(report.completion(), Completion::Partial);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].filename, "lost.pdf");
        assert!(report.to_string().starts_with("restored 1/2 files"));
        assert_eq!(guard.materialized(), Some(f.order.id));

        let names: Vec<String> = guard
            .files(Namespace::Uploads)
            .unwrap()
            .iter()
            .map(|p| redact_path(p))
            .collect();
        assert_eq!(names, vec!["kept.pdf"]);
    }

    #[test]
    fn test_clear_forgets_materialized_order() {
        let f = fixture();
        let mut guard = f.workspace.lock().unwrap();
        guard.set_materialized(Some(42));
        guard.clear();
        assert_eq!(guard.materialized(), None);
    }

    #[test]
    fn test_place_rejects_path_names() {
        let f = fixture();
        let src = f._dir.path().join("x.pdf");
        std::fs::write(&src, b"x").unwrap();
        let mut guard = f.workspace.lock().unwrap();
        assert!(guard.place(Namespace::Uploads, &src, "../x.pdf").is_err());
        assert!(guard.place(Namespace::Uploads, &src, "x.pdf").is_ok());
        assert!(guard.remove(Namespace::Uploads, "x.pdf").unwrap());
        assert!(!guard.remove(Namespace::Uploads, "x.pdf").unwrap());
    }
}
