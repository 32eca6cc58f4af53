//! Merging several orders into a new one.
//!
//! The merged order receives the deduplicated union of its sources'
//! uploads. Identity is the content hash, or the stored filename for rows
//! recorded without one; two hash-less rows with different names are never
//! considered duplicates even when their bytes match.
//!
//! Bytes are copied into the new order's archive first, then every new row
//! commits in one transaction. A failed commit leaves the copied bytes on
//! disk; `reconcile` finds them later.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, info_span, warn};

use crate::db::file_repo::{self, ConvertedFileRow, NewConvertedFile, NewUploadedFile, UploadedFileRow};
use crate::db::order_repo::{self, NewOrder};
use crate::db::{now_timestamp, user_repo, Database};
use crate::error::{OrderError, Result};
use crate::order::model::{generate_order_number, Actor, Order, OrderStatus};
use crate::order::outcome::{Completion, FileFailure, Tally};
use crate::order::{fetch_order, fetch_order_by_id};
use crate::sanitize::split_extension;
use crate::storage::resolver::{FileLocator, ResolverChain};
use crate::storage::{ArchiveStore, Namespace};
use crate::workspace::Workspace;

#[derive(Clone)]
pub struct MergeEngine {
    db: Database,
    store: ArchiveStore,
    workspace: Arc<Workspace>,
}

/// An upload and the converted files derived from it.
struct SourceUpload {
    row: UploadedFileRow,
    children: Vec<ConvertedFileRow>,
}

struct SourceOrder {
    order: Order,
    uploads: Vec<SourceUpload>,
}

/// A copied upload waiting to be recorded.
struct PlannedUpload {
    source: UploadedFileRow,
    filename: String,
    path: PathBuf,
    converted: Vec<PlannedConverted>,
}

struct PlannedConverted {
    source: ConvertedFileRow,
    filename: String,
    path: PathBuf,
}

impl MergeEngine {
    pub fn new(db: Database, store: ArchiveStore, workspace: Arc<Workspace>) -> Self {
        Self {
            db,
            store,
            workspace,
        }
    }

    /// Merges `order_numbers` (at least two, in the given order) into a new,
    /// inactive order owned by the caller.
    ///
    /// Files that cannot be located anywhere are skipped and reported; the
    /// merge still succeeds with whatever was recoverable.
    pub fn merge(
        &self,
        order_numbers: &[String],
        actor: Actor,
        note: Option<&str>,
    ) -> Result<MergeReport> {
        let span = info_span!("order.merge", sources = order_numbers.len(), user_id = actor.user_id);
        let _enter = span.enter();

        validate_sources(order_numbers)?;

        let caller = self
            .db
            .with_conn(|conn| user_repo::find_by_id(conn, actor.user_id))?
            .ok_or_else(|| OrderError::user_not_found(actor.user_id))?;

        let sources = self.load_sources(order_numbers)?;
        if !caller.is_admin {
            if let Some(foreign) = sources.iter().find(|s| s.order.owner_id != caller.id) {
                return Err(OrderError::Unauthorized {
                    user_id: caller.id,
                    action: "merge",
                    order_number: foreign.order.order_number.clone(),
                });
            }
        }

        let order_number = generate_order_number(Utc::now());
        self.store.ensure_order_dirs(&order_number)?;

        // Held so a concurrent activation cannot swap the workspace while a
        // source is being read from it.
        let guard = self.workspace.lock()?;

        let mut seen: HashSet<String> = HashSet::new();
        let mut processed: HashSet<String> = HashSet::new();
        let mut upload_names: HashSet<String> = HashSet::new();
        let mut converted_names: HashSet<String> = HashSet::new();
        let mut converted = Tally::default();
        let mut duplicates = 0usize;
        let mut failures = Vec::new();
        let mut planned: Vec<PlannedUpload> = Vec::new();

        for source in &sources {
            let workspace = (guard.materialized() == Some(source.order.id)).then(|| guard.location());
            let chain = ResolverChain::for_merge_source(
                &self.store,
                &source.order.order_number,
                workspace,
                Some(&self.db),
            );

            for upload in &source.uploads {
                let key = identity_key(&upload.row);
                seen.insert(key.clone());
                if processed.contains(&key) {
                    debug!(file = %upload.row.filename, from = %source.order.order_number, "duplicate skipped");
                    duplicates += 1;
                    continue;
                }

                let locator = FileLocator::upload(&upload.row);
                let Some(found) = chain.resolve(&locator) else {
                    warn!(
                        file = %upload.row.filename,
                        from = %source.order.order_number,
                        "source file not found in any location; skipped"
                    );
                    failures.push(FileFailure::new(
                        Namespace::Uploads,
                        upload.row.filename.clone(),
                        format!("not found for order {}", source.order.order_number),
                    ));
                    continue;
                };

                let filename = claim_name(&mut upload_names, &upload.row.filename);
                let path = match self
                    .store
                    .store(&found.path, &order_number, Namespace::Uploads, &filename)
                {
                    Ok(path) => path,
                    Err(e) => {
                        upload_names.remove(&filename);
                        warn!(file = %upload.row.filename, error = %e, "failed to copy source file");
                        failures.push(FileFailure::new(Namespace::Uploads, upload.row.filename.clone(), e));
                        continue;
                    }
                };
                processed.insert(key);

                let mut children = Vec::with_capacity(upload.children.len());
                for child in &upload.children {
                    match self.copy_converted(&chain, &order_number, child, &mut converted_names) {
                        Ok(planned) => {
                            converted.hit();
                            children.push(planned);
                        }
                        Err(failure) => {
                            converted.miss();
                            warn!(file = %child.filename, reason = %failure.reason, "converted file skipped");
                            failures.push(failure);
                        }
                    }
                }

                planned.push(PlannedUpload {
                    source: upload.row.clone(),
                    filename,
                    path,
                    converted: children,
                });
            }
        }
        drop(guard);

        let uploads = Tally::new(processed.len(), seen.len());
        let note = note
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Merged from {}", order_numbers.join(", ")));

        let order = self
            .commit(&order_number, caller.id, &note, order_numbers, &planned)
            .map_err(|e| {
                let orphans: usize = planned.iter().map(|p| 1 + p.converted.len()).sum();
                warn!(
                    order_number = %order_number,
                    orphans,
                    "merge rolled back; copied files left in the archive"
                );
                e
            })?;

        let report = MergeReport {
            order,
            uploads,
            converted,
            duplicates,
            failures,
        };
        if report.completion() == Completion::Complete {
            info!("{}", report);
        } else {
            warn!("{}", report);
        }
        Ok(report)
    }

    fn load_sources(&self, order_numbers: &[String]) -> Result<Vec<SourceOrder>> {
        let mut sources = Vec::with_capacity(order_numbers.len());
        for number in order_numbers {
            let source = self.db.with_conn(|conn| {
                let Some(order) = fetch_order(conn, number)? else {
                    return Ok(None);
                };
                let mut uploads = Vec::new();
                for row in file_repo::uploaded_by_order(conn, order.id)? {
                    let children = file_repo::converted_by_source(conn, row.id)?;
                    uploads.push(SourceUpload { row, children });
                }
                Ok(Some(SourceOrder { order, uploads }))
            })?;
            sources.push(source.ok_or_else(|| OrderError::order_not_found(number))?);
        }
        Ok(sources)
    }

    fn copy_converted(
        &self,
        chain: &ResolverChain,
        order_number: &str,
        child: &ConvertedFileRow,
        names: &mut HashSet<String>,
    ) -> std::result::Result<PlannedConverted, FileFailure> {
        let locator = FileLocator::converted(child);
        let found = chain.resolve(&locator).ok_or_else(|| {
            FileFailure::new(
                Namespace::Converted,
                child.filename.clone(),
                "not found in any location",
            )
        })?;
        let filename = claim_name(names, &child.filename);
        match self
            .store
            .store(&found.path, order_number, Namespace::Converted, &filename)
        {
            Ok(path) => Ok(PlannedConverted {
                source: child.clone(),
                filename,
                path,
            }),
            Err(e) => {
                names.remove(&filename);
                Err(FileFailure::new(Namespace::Converted, child.filename.clone(), e))
            }
        }
    }

    fn commit(
        &self,
        order_number: &str,
        owner_id: i64,
        note: &str,
        sources: &[String],
        planned: &[PlannedUpload],
    ) -> Result<Order> {
        let now = now_timestamp();
        self.db.with_transaction(|tx| -> Result<Order> {
            let order_id = order_repo::insert(
                tx,
                &NewOrder {
                    order_number: order_number.to_string(),
                    owner_id,
                    status: OrderStatus::Pending.as_str().to_string(),
                    is_merged: true,
                    note: Some(note.to_string()),
                    created_at: now.clone(),
                },
            )?;
            order_repo::insert_merge_sources(tx, order_id, sources)?;

            for upload in planned {
                let upload_path = upload.path.to_string_lossy().into_owned();
                let upload_id = file_repo::insert_uploaded(
                    tx,
                    &NewUploadedFile {
                        order_id,
                        filename: upload.filename.clone(),
                        original_filename: upload.source.original_filename.clone(),
                        file_path: upload_path.clone(),
                        file_size: upload.source.file_size,
                        file_type: upload.source.file_type.clone(),
                        file_hash: upload.source.file_hash.clone(),
                        uploaded_at: now.clone(),
                    },
                )?;

                for child in &upload.converted {
                    file_repo::insert_converted(
                        tx,
                        &NewConvertedFile {
                            order_id,
                            filename: child.filename.clone(),
                            file_path: child.path.to_string_lossy().into_owned(),
                            source_file_id: Some(upload_id),
                            source_hash: child
                                .source
                                .source_hash
                                .clone()
                                .or_else(|| upload.source.file_hash.clone()),
                            from_zip: child.source.from_zip,
                            zip_path: if child.source.from_zip {
                                Some(upload_path.clone())
                            } else {
                                child.source.zip_path.clone()
                            },
                            converted_at: now.clone(),
                        },
                    )?;
                }
            }

            fetch_order_by_id(tx, order_id)?.ok_or_else(|| OrderError::order_not_found(order_number))
        })
    }
}

fn validate_sources(order_numbers: &[String]) -> Result<()> {
    if order_numbers.len() < 2 {
        return Err(OrderError::InvalidMerge(
            "at least two orders are required".to_string(),
        ));
    }
    let mut unique = HashSet::new();
    for number in order_numbers {
        if !unique.insert(number.as_str()) {
            return Err(OrderError::InvalidMerge(format!(
                "order {} listed more than once",
                number
            )));
        }
    }
    Ok(())
}

fn identity_key(row: &UploadedFileRow) -> String {
    match row.file_hash.as_deref() {
        Some(hash) if !hash.is_empty() => format!("hash:{}", hash),
        _ => format!("name:{}", row.filename),
    }
}

/// Reserves `filename` in `used`, appending `_2`, `_3`, … to the stem when two
/// distinct files share a name.
fn claim_name(used: &mut HashSet<String>, filename: &str) -> String {
    if used.insert(filename.to_string()) {
        return filename.to_string();
    }
    let (stem, ext) = split_extension(filename);
    let mut n = 2usize;
    loop {
        let candidate = format!("{}_{}{}", stem, n, ext.unwrap_or(""));
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Result of a merge.
#[derive(Debug)]
pub struct MergeReport {
    pub order: Order,
    /// Distinct files merged versus distinct files found in the sources.
    pub uploads: Tally,
    pub converted: Tally,
    /// Uploads skipped because an identical file was already merged.
    pub duplicates: usize,
    pub failures: Vec<FileFailure>,
}

impl MergeReport {
    /// Number of distinct files in the merged order.
    pub fn merged_count(&self) -> usize {
        self.uploads.completed
    }

    pub fn completion(&self) -> Completion {
        self.uploads.combine(self.converted).completion()
    }
}

impl fmt::Display for MergeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} files merged into order {}",
            self.uploads.completed, self.uploads.expected, self.order.order_number
        )
    }
}
