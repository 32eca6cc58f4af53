//! Reconciling archive bytes with metadata after partial failures.
//!
//! A rolled-back merge or upload leaves files in the archive that no row
//! claims. `Reconciler` finds them, re-links those whose bytes match a row
//! that lost its file, backfills hashes that older rows never recorded, and
//! optionally discards whatever is still unclaimed.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, info_span, warn};
use walkdir::WalkDir;

use crate::db::file_repo::{self, ConvertedFileRow, UploadedFileRow};
use crate::db::{order_repo, Database};
use crate::error::Result;
use crate::hashing::{hash_file, ContentHash};
use crate::order::outcome::FileFailure;
use crate::sanitize::redact_path;
use crate::storage::{filesystem, ArchiveStore, Namespace};

/// An archived file no metadata row claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Orphan {
    pub namespace: Namespace,
    pub order_number: String,
    pub filename: String,
    pub path: PathBuf,
}

#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Archived files examined.
    pub scanned: usize,
    /// Rows whose missing file was found under another name and re-linked.
    pub relinked: usize,
    pub hashes_backfilled: usize,
    pub source_hashes_backfilled: usize,
    pub orphans: Vec<Orphan>,
    pub discarded: usize,
    pub failures: Vec<FileFailure>,
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scanned {} files: {} relinked, {} hashes backfilled, {} orphans, {} discarded",
            self.scanned,
            self.relinked,
            self.hashes_backfilled + self.source_hashes_backfilled,
            self.orphans.len(),
            self.discarded
        )
    }
}

pub struct Reconciler {
    db: Database,
    store: ArchiveStore,
}

impl Reconciler {
    pub fn new(db: Database, store: ArchiveStore) -> Self {
        Self { db, store }
    }

    /// Backfills hashes, scans for orphans, re-links matching ones and, when
    /// `discard` is set, deletes the rest.
    pub fn run(&self, discard: bool) -> Result<ReconcileReport> {
        let span = info_span!("archive.reconcile", discard);
        let _enter = span.enter();

        let mut report = ReconcileReport::default();
        self.backfill_hashes(&mut report)?;

        let (scanned, orphans) = self.scan_orphans()?;
        report.scanned = scanned;
        report.orphans = self.relink(orphans, &mut report)?;

        if discard {
            let (discarded, failures) = self.discard_orphans(&report.orphans);
            report.discarded = discarded;
            report.failures.extend(failures);
        }

        info!("{}", report);
        Ok(report)
    }

    /// Walks `{root}/{namespace}/{order_number}/` and returns the number of
    /// files seen plus those no row claims.
    pub fn scan_orphans(&self) -> Result<(usize, Vec<Orphan>)> {
        let (uploads, converted, numbers) = self.db.with_conn(|conn| {
            Ok((
                file_repo::all_uploaded(conn)?,
                file_repo::all_converted(conn)?,
                order_repo::all_numbers(conn)?,
            ))
        })?;
        let numbers: HashMap<i64, String> = numbers.into_iter().collect();

        let mut claimed: HashSet<PathBuf> = HashSet::new();
        let mut claim = |namespace: Namespace, order_id: i64, filename: &str, recorded: &str| {
            if !recorded.is_empty() {
                claimed.insert(PathBuf::from(recorded));
            }
            if let Some(number) = numbers.get(&order_id) {
                if let Ok(path) = self.store.path_for(namespace, number, filename) {
                    claimed.insert(path);
                }
            }
        };
        for row in &uploads {
            claim(Namespace::Uploads, row.order_id, &row.filename, &row.file_path);
        }
        for row in &converted {
            claim(Namespace::Converted, row.order_id, &row.filename, &row.file_path);
        }

        let mut scanned = 0;
        let mut orphans = Vec::new();
        for namespace in Namespace::ALL {
            let root = self.store.root().join(namespace.dir_name());
            if !root.is_dir() {
                continue;
            }
            for entry in WalkDir::new(&root)
                .min_depth(2)
                .max_depth(2)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                let path = entry.path();
                let filename = redact_path(path);
                if filename.starts_with('.') {
                    continue;
                }
                scanned += 1;
                if claimed.contains(path) {
                    continue;
                }
                let order_number = path
                    .parent()
                    .map(redact_path)
                    .unwrap_or_default();
                debug!(namespace = %namespace, order_number = %order_number, file = %filename, "orphan");
                orphans.push(Orphan {
                    namespace,
                    order_number,
                    filename,
                    path: path.to_path_buf(),
                });
            }
        }
        Ok((scanned, orphans))
    }

    /// Deletes orphaned files. Returns the number removed and the failures.
    pub fn discard_orphans(&self, orphans: &[Orphan]) -> (usize, Vec<FileFailure>) {
        let mut removed = 0;
        let mut failures = Vec::new();
        let mut dirs = HashSet::new();
        for orphan in orphans {
            match filesystem::remove_file(&orphan.path) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(file = %orphan.filename, error = %e, "failed to discard orphan");
                    failures.push(
                        FileFailure::new(orphan.namespace, orphan.filename.clone(), e).at(&orphan.path),
                    );
                }
            }
            if let Some(parent) = orphan.path.parent() {
                dirs.insert(parent.to_path_buf());
            }
        }
        for dir in dirs {
            filesystem::remove_dir_if_empty(&dir);
        }
        (removed, failures)
    }

    /// Re-links upload orphans whose bytes match a row of the same order
    /// that no longer finds its file. Returns the orphans left over.
    fn relink(&self, orphans: Vec<Orphan>, report: &mut ReconcileReport) -> Result<Vec<Orphan>> {
        let mut remaining = Vec::with_capacity(orphans.len());
        for orphan in orphans {
            if orphan.namespace != Namespace::Uploads {
                remaining.push(orphan);
                continue;
            }
            let hash = match hash_file(&orphan.path) {
                Ok(hash) => hash,
                Err(e) => {
                    warn!(file = %orphan.filename, error = %e, "cannot hash orphan");
                    remaining.push(orphan);
                    continue;
                }
            };

            let candidate = self.db.with_conn(|conn| {
                let Some(order) = order_repo::find_by_number(conn, &orphan.order_number)? else {
                    return Ok(None);
                };
                let rows = file_repo::uploaded_by_hash(conn, hash.as_str())?;
                Ok(rows
                    .into_iter()
                    .find(|row| row.order_id == order.id && !row_file_exists(row)))
            })?;

            match candidate {
                Some(row) => {
                    let path = orphan.path.to_string_lossy();
                    self.db
                        .with_conn(|conn| file_repo::update_uploaded_path(conn, row.id, &path))?;
                    info!(file = %row.filename, found_as = %orphan.filename, "re-linked upload");
                    report.relinked += 1;
                }
                None => remaining.push(orphan),
            }
        }
        Ok(remaining)
    }

    /// Computes missing upload hashes, then copies source hashes onto
    /// converted rows that lack one.
    fn backfill_hashes(&self, report: &mut ReconcileReport) -> Result<()> {
        let (uploads, numbers) = self.db.with_conn(|conn| {
            Ok((
                file_repo::uploaded_missing_hash(conn)?,
                order_repo::all_numbers(conn)?,
            ))
        })?;
        let numbers: HashMap<i64, String> = numbers.into_iter().collect();

        for row in uploads {
            let Some(path) = self.locate_upload(&row, numbers.get(&row.order_id)) else {
                debug!(file = %row.filename, "no bytes to hash");
                continue;
            };
            let hash = match hash_file(&path) {
                Ok(hash) => hash,
                Err(e) => {
                    warn!(file = %row.filename, error = %e, "hash backfill failed");
                    report
                        .failures
                        .push(FileFailure::new(Namespace::Uploads, row.filename.clone(), e).at(&path));
                    continue;
                }
            };
            let size = std::fs::metadata(&path)
                .ok()
                .and_then(|m| i64::try_from(m.len()).ok());
            self.db
                .with_conn(|conn| file_repo::update_uploaded_hash(conn, row.id, hash.as_str(), size))?;
            report.hashes_backfilled += 1;
        }

        report.source_hashes_backfilled = self.db.with_transaction(|tx| {
            let mut updated = 0;
            for row in file_repo::converted_missing_source_hash(tx)? {
                if let Some(hash) = source_hash_of(tx, &row)? {
                    file_repo::update_converted_source_hash(tx, row.id, hash.as_str())?;
                    updated += 1;
                }
            }
            Ok::<_, crate::error::OrderError>(updated)
        })?;
        Ok(())
    }

    fn locate_upload(&self, row: &UploadedFileRow, order_number: Option<&String>) -> Option<PathBuf> {
        let recorded = Path::new(&row.file_path);
        if !row.file_path.is_empty() && recorded.is_file() {
            return Some(recorded.to_path_buf());
        }
        let number = order_number?;
        self.store
            .path_for(Namespace::Uploads, number, &row.filename)
            .ok()
            .filter(|p| p.is_file())
    }
}

fn row_file_exists(row: &UploadedFileRow) -> bool {
    !row.file_path.is_empty() && Path::new(&row.file_path).is_file()
}

fn source_hash_of(
    conn: &rusqlite::Connection,
    row: &ConvertedFileRow,
) -> std::result::Result<Option<ContentHash>, crate::db::DatabaseError> {
    let Some(source_id) = row.source_file_id else {
        return Ok(None);
    };
    Ok(file_repo::find_uploaded(conn, source_id)?
        .and_then(|upload| upload.file_hash)
        .map(ContentHash::from_hex))
}
