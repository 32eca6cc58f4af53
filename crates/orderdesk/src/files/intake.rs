//! Adding files to an order and removing them again.
//!
//! The archive copy is always written and recorded; the workspace copy is
//! written only when the workspace currently reflects the order. Every file
//! row points at its archive path.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, info_span, warn};

use crate::convert::{ConversionRequest, DocumentConverter};
use crate::db::file_repo::{self, ConvertedFileRow, NewConvertedFile, NewUploadedFile, UploadedFileRow};
use crate::db::{now_timestamp, user_repo, Database};
use crate::error::{ConversionError, OrderError, Result};
use crate::files::detect::{detect_file_type, FileType};
use crate::hashing::hash_file;
use crate::order::model::{Actor, Order};
use crate::order::outcome::{Completion, FileFailure, Tally};
use crate::order::{fetch_order, fetch_order_by_id};
use crate::sanitize::{redact_path, sanitize_filename, split_extension};
use crate::storage::{filesystem, ArchiveStore, Namespace};
use crate::workspace::{Workspace, WorkspaceGuard};

/// Where a converted file came from.
#[derive(Debug, Clone, Default)]
pub struct ConversionOrigin {
    pub source_file_id: Option<i64>,
    pub from_zip: bool,
    pub zip_path: Option<String>,
}

#[derive(Clone)]
pub struct FileIntake {
    db: Database,
    store: ArchiveStore,
    workspace: Arc<Workspace>,
    staging_dir: PathBuf,
    dpi: u32,
}

impl FileIntake {
    pub fn new(
        db: Database,
        store: ArchiveStore,
        workspace: Arc<Workspace>,
        staging_dir: impl Into<PathBuf>,
        dpi: u32,
    ) -> Self {
        Self {
            db,
            store,
            workspace,
            staging_dir: staging_dir.into(),
            dpi,
        }
    }

    /// Adds the file at `source` to `order_number` under a sanitized, unique
    /// name derived from `original_filename`.
    pub fn upload(
        &self,
        order_number: &str,
        actor: Actor,
        original_filename: &str,
        source: &Path,
    ) -> Result<UploadReceipt> {
        let span = info_span!("file.upload", order_number, file = %redact_path(Path::new(original_filename)));
        let _enter = span.enter();

        let order = self.authorized_order(order_number, actor, "upload to")?;
        let filename = unique_filename(original_filename);

        let archive_path = self
            .store
            .store(source, &order.order_number, Namespace::Uploads, &filename)?;
        let hash = hash_file(&archive_path)?;
        let size = std::fs::metadata(&archive_path)
            .ok()
            .and_then(|m| i64::try_from(m.len()).ok());
        let file_type = detect_file_type(&archive_path);

        let mut guard = self.workspace.lock()?;
        let in_workspace = mirror(&mut guard, &order, Namespace::Uploads, &archive_path, &filename);

        let record = NewUploadedFile {
            order_id: order.id,
            filename: filename.clone(),
            original_filename: original_filename.to_string(),
            file_path: archive_path.to_string_lossy().into_owned(),
            file_size: size,
            file_type: Some(file_type.as_str().to_string()),
            file_hash: Some(hash.as_str().to_string()),
            uploaded_at: now_timestamp(),
        };
        let inserted = self.db.with_conn(|conn| {
            let id = file_repo::insert_uploaded(conn, &record)?;
            file_repo::find_uploaded(conn, id)
        });
        let file = match inserted {
            Ok(Some(row)) => row,
            Ok(None) => return Err(OrderError::IntegrityConflict(format!("upload {} vanished", filename))),
            Err(e) => {
                warn!(file = %filename, "upload not recorded; removing copies");
                if in_workspace {
                    if let Err(e) = guard.remove(Namespace::Uploads, &filename) {
                        warn!(file = %filename, error = %e, "failed to remove workspace copy");
                    }
                }
                if let Err(e) = filesystem::remove_file(&archive_path) {
                    warn!(file = %filename, error = %e, "failed to remove archived copy");
                }
                return Err(e.into());
            }
        };
        drop(guard);

        info!(file = %file.filename, hash = %hash.short(), file_type = %file_type, "uploaded file");
        Ok(UploadReceipt {
            file,
            file_type,
            in_workspace,
        })
    }

    /// Same as [`FileIntake::upload`] for in-memory content.
    pub fn upload_bytes(
        &self,
        order_number: &str,
        actor: Actor,
        original_filename: &str,
        content: &[u8],
    ) -> Result<UploadReceipt> {
        filesystem::ensure_directory(&self.staging_dir)?;
        let scratch = self
            .staging_dir
            .join(format!(".incoming-{}", uuid::Uuid::new_v4().simple()));
        filesystem::write_file(&scratch, content)?;
        let result = self.upload(order_number, actor, original_filename, &scratch);
        if let Err(e) = filesystem::remove_file(&scratch) {
            warn!(error = %e, "failed to remove scratch upload");
        }
        result
    }

    /// Records an already-produced converted file for `order_number`.
    pub fn record_conversion(
        &self,
        order_number: &str,
        actor: Actor,
        output: &Path,
        origin: ConversionOrigin,
    ) -> Result<ConvertedFileRow> {
        let order = self.authorized_order(order_number, actor, "convert files of")?;
        let source_hash = match origin.source_file_id {
            Some(id) => {
                let upload = self
                    .db
                    .with_conn(|conn| file_repo::find_uploaded(conn, id))?
                    .ok_or_else(|| OrderError::file_not_found(id))?;
                if upload.order_id != order.id {
                    return Err(OrderError::IntegrityConflict(format!(
                        "file {} does not belong to order {}",
                        id, order.order_number
                    )));
                }
                upload.file_hash
            }
            None => None,
        };
        self.record_output(&order, output, &origin, source_hash)
    }

    /// Converts an upload through `converter` and records every page it
    /// produced, replacing the pages of any earlier conversion of the same
    /// upload. The service is checked first; converter errors are returned
    /// as `OrderError::Conversion` and never retried.
    pub fn convert(
        &self,
        converter: &dyn DocumentConverter,
        upload_id: i64,
        actor: Actor,
    ) -> Result<ConversionReport> {
        let upload = self
            .db
            .with_conn(|conn| file_repo::find_uploaded(conn, upload_id))?
            .ok_or_else(|| OrderError::file_not_found(upload_id))?;
        let order = self.authorized_order_by_id(upload.order_id, actor, "convert files of")?;

        let span = info_span!("file.convert", order_number = %order.order_number, file = %upload.filename);
        let _enter = span.enter();

        if !converter.is_available() {
            return Err(ConversionError::Unavailable(converter.endpoint().to_string()).into());
        }

        let source = self.locate_upload(&order, &upload)?;
        let previous = self
            .db
            .with_conn(|conn| file_repo::converted_by_source(conn, upload.id))?;
        let output_dir = self.staging_dir.join(&order.order_number).join(format!(
            "{}-{}",
            upload.id,
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        ));
        filesystem::ensure_directory(&output_dir)?;

        let request = ConversionRequest {
            file_path: source,
            output_dir: output_dir.clone(),
            dpi: self.dpi,
        };
        let result = converter.convert(&request);
        let outputs = match result {
            Ok(outputs) => outputs,
            Err(e) => {
                discard_staging(&output_dir);
                return Err(e.into());
            }
        };

        let (files_replaced, mut failures) = match self.discard_converted(&order, &previous) {
            Ok(discarded) => discarded,
            Err(e) => {
                discard_staging(&output_dir);
                return Err(e);
            }
        };
        if !previous.is_empty() {
            info!(converted = previous.len(), files_removed = files_replaced, "replaced earlier conversion");
        }

        let from_zip = upload.file_type.as_deref() == Some(FileType::Zip.as_str());
        let origin = ConversionOrigin {
            source_file_id: Some(upload.id),
            from_zip,
            zip_path: from_zip.then(|| upload.file_path.clone()),
        };

        let mut tally = Tally::default();
        let mut converted = Vec::with_capacity(outputs.len());
        for output in &outputs {
            match self.record_output(&order, output, &origin, upload.file_hash.clone()) {
                Ok(row) => {
                    tally.hit();
                    converted.push(row);
                }
                Err(e) => {
                    tally.miss();
                    warn!(file = %redact_path(output), error = %e, "converted page not recorded");
                    failures.push(FileFailure::new(Namespace::Converted, redact_path(output), e).at(output));
                }
            }
        }
        discard_staging(&output_dir);

        let report = ConversionReport {
            source: upload,
            converted,
            replaced: previous.len(),
            outputs: tally,
            failures,
        };
        info!("{}", report);
        Ok(report)
    }

    /// Removes an upload, its derived files and their copies on disk.
    /// Physical removal is best-effort.
    pub fn remove_upload(&self, upload_id: i64, actor: Actor) -> Result<RemovalReport> {
        let (upload, children) = self.db.with_conn(|conn| {
            let upload = file_repo::find_uploaded(conn, upload_id)?;
            let children = match &upload {
                Some(u) => file_repo::converted_by_source(conn, u.id)?,
                None => Vec::new(),
            };
            Ok((upload, children))
        })?;
        let upload = upload.ok_or_else(|| OrderError::file_not_found(upload_id))?;
        let order = self.authorized_order_by_id(upload.order_id, actor, "remove files from")?;

        let span = info_span!("file.remove", order_number = %order.order_number, file = %upload.filename);
        let _enter = span.enter();

        let targets: Vec<(Namespace, &str)> = std::iter::once((Namespace::Uploads, upload.filename.as_str()))
            .chain(children.iter().map(|c| (Namespace::Converted, c.filename.as_str())))
            .collect();

        let mut report = RemovalReport {
            filename: upload.filename.clone(),
            converted: children.len(),
            ..Default::default()
        };

        let mut guard = self.workspace.lock()?;
        report.files_removed = self.discard_copies(&mut guard, &order, &targets, &mut report.failures);
        self.db.with_transaction(|tx| -> Result<()> {
            file_repo::delete_uploaded(tx, upload.id)?;
            Ok(())
        })?;
        drop(guard);

        info!(files_removed = report.files_removed, "removed upload");
        Ok(report)
    }

    /// Removes one converted file from the workspace and the archive, then
    /// its row. The upload it came from is kept.
    pub fn remove_converted(&self, converted_id: i64, actor: Actor) -> Result<RemovalReport> {
        let row = self
            .db
            .with_conn(|conn| file_repo::find_converted(conn, converted_id))?
            .ok_or_else(|| OrderError::file_not_found(converted_id))?;
        let order = self.authorized_order_by_id(row.order_id, actor, "remove files from")?;

        let span = info_span!("file.remove_converted", order_number = %order.order_number, file = %row.filename);
        let _enter = span.enter();

        let (files_removed, failures) = self.discard_converted(&order, std::slice::from_ref(&row))?;
        info!(files_removed, "removed converted file");
        Ok(RemovalReport {
            filename: row.filename,
            converted: 1,
            files_removed,
            failures,
        })
    }

    /// Removes every converted file of `order_number`. Uploads are kept.
    pub fn clear_conversions(&self, order_number: &str, actor: Actor) -> Result<ClearConversionsReport> {
        let order = self.authorized_order(order_number, actor, "remove files from")?;

        let span = info_span!("file.clear_conversions", order_number = %order.order_number);
        let _enter = span.enter();

        let rows = self
            .db
            .with_conn(|conn| file_repo::converted_by_order(conn, order.id))?;
        let (files_removed, failures) = self.discard_converted(&order, &rows)?;
        let report = ClearConversionsReport {
            order_number: order.order_number,
            converted: rows.len(),
            files_removed,
            failures,
        };
        info!("{}", report);
        Ok(report)
    }

    /// Deletes `rows` and their copies. Returns the number of archive files
    /// removed and the copies that could not be removed.
    fn discard_converted(&self, order: &Order, rows: &[ConvertedFileRow]) -> Result<(usize, Vec<FileFailure>)> {
        let mut failures = Vec::new();
        if rows.is_empty() {
            return Ok((0, failures));
        }
        let targets: Vec<(Namespace, &str)> = rows
            .iter()
            .map(|row| (Namespace::Converted, row.filename.as_str()))
            .collect();

        let mut guard = self.workspace.lock()?;
        let files_removed = self.discard_copies(&mut guard, order, &targets, &mut failures);
        self.db.with_transaction(|tx| -> Result<()> {
            for row in rows {
                file_repo::delete_converted(tx, row.id)?;
            }
            Ok(())
        })?;
        drop(guard);
        Ok((files_removed, failures))
    }

    /// Best-effort removal of `targets` from the workspace, when it reflects
    /// `order`, and from the archive. Returns the archive files removed.
    fn discard_copies(
        &self,
        guard: &mut WorkspaceGuard<'_>,
        order: &Order,
        targets: &[(Namespace, &str)],
        failures: &mut Vec<FileFailure>,
    ) -> usize {
        if guard.materialized() == Some(order.id) {
            for (namespace, filename) in targets {
                if let Err(e) = guard.remove(*namespace, filename) {
                    warn!(file = %filename, error = %e, "failed to remove workspace copy");
                    failures.push(FileFailure::new(*namespace, *filename, e));
                }
            }
        }

        let mut removed = 0;
        for (namespace, filename) in targets {
            let result = self
                .store
                .path_for(*namespace, &order.order_number, filename)
                .and_then(|path| filesystem::remove_file(&path));
            match result {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(file = %filename, error = %e, "failed to remove archived copy");
                    failures.push(FileFailure::new(*namespace, *filename, e));
                }
            }
        }
        removed
    }

    fn record_output(
        &self,
        order: &Order,
        output: &Path,
        origin: &ConversionOrigin,
        source_hash: Option<String>,
    ) -> Result<ConvertedFileRow> {
        let filename = self.converted_name(order, output)?;
        let archive_path = self
            .store
            .store(output, &order.order_number, Namespace::Converted, &filename)?;

        let mut guard = self.workspace.lock()?;
        mirror(&mut guard, order, Namespace::Converted, &archive_path, &filename);

        let record = NewConvertedFile {
            order_id: order.id,
            filename,
            file_path: archive_path.to_string_lossy().into_owned(),
            source_file_id: origin.source_file_id,
            source_hash,
            from_zip: origin.from_zip,
            zip_path: origin.zip_path.clone(),
            converted_at: now_timestamp(),
        };
        let row = self.db.with_conn(|conn| {
            let id = file_repo::insert_converted(conn, &record)?;
            file_repo::find_converted(conn, id)
        })?;
        row.ok_or_else(|| OrderError::IntegrityConflict(format!("converted file {} vanished", record.filename)))
    }

    /// The sanitized output name, suffixed the way uploads are when the
    /// order already holds a converted file under that name.
    fn converted_name(&self, order: &Order, output: &Path) -> Result<String> {
        let filename = sanitize_filename(&redact_path(output));
        let recorded = self
            .db
            .with_conn(|conn| file_repo::find_converted_by_order_and_filename(conn, order.id, &filename))?;
        let archived = self
            .store
            .path_for(Namespace::Converted, &order.order_number, &filename)?;
        if recorded.is_some() || archived.exists() {
            Ok(unique_filename(&filename))
        } else {
            Ok(filename)
        }
    }

    fn locate_upload(&self, order: &Order, upload: &UploadedFileRow) -> Result<PathBuf> {
        let recorded = PathBuf::from(&upload.file_path);
        if !upload.file_path.is_empty() && recorded.is_file() {
            return Ok(recorded);
        }
        let archived = self
            .store
            .path_for(Namespace::Uploads, &order.order_number, &upload.filename)?;
        if archived.is_file() {
            Ok(archived)
        } else {
            Err(ConversionError::SourceMissing(recorded).into())
        }
    }

    fn authorized_order(&self, order_number: &str, actor: Actor, action: &'static str) -> Result<Order> {
        let (caller, order) = self.db.with_conn(|conn| {
            Ok((
                user_repo::find_by_id(conn, actor.user_id)?,
                fetch_order(conn, order_number)?,
            ))
        })?;
        let caller = caller.ok_or_else(|| OrderError::user_not_found(actor.user_id))?;
        let order = order.ok_or_else(|| OrderError::order_not_found(order_number))?;
        check_access(caller.id, caller.is_admin, &order, action)?;
        Ok(order)
    }

    fn authorized_order_by_id(&self, order_id: i64, actor: Actor, action: &'static str) -> Result<Order> {
        let (caller, order) = self.db.with_conn(|conn| {
            Ok((
                user_repo::find_by_id(conn, actor.user_id)?,
                fetch_order_by_id(conn, order_id)?,
            ))
        })?;
        let caller = caller.ok_or_else(|| OrderError::user_not_found(actor.user_id))?;
        let order = order.ok_or_else(|| OrderError::order_not_found(order_id))?;
        check_access(caller.id, caller.is_admin, &order, action)?;
        Ok(order)
    }
}

fn check_access(user_id: i64, is_admin: bool, order: &Order, action: &'static str) -> Result<()> {
    let actor = Actor { user_id, is_admin };
    if actor.can_access(order) {
        Ok(())
    } else {
        Err(OrderError::Unauthorized {
            user_id,
            action,
            order_number: order.order_number.clone(),
        })
    }
}

/// Copies an archived file into the workspace when the workspace reflects
/// `order`. Returns whether a workspace copy exists afterwards.
fn mirror(
    guard: &mut WorkspaceGuard<'_>,
    order: &Order,
    namespace: Namespace,
    archive_path: &Path,
    filename: &str,
) -> bool {
    if guard.materialized() != Some(order.id) {
        return false;
    }
    match guard.place(namespace, archive_path, filename) {
        Ok(_) => true,
        Err(e) => {
            warn!(file = %filename, error = %e, "failed to mirror file into workspace");
            false
        }
    }
}

fn discard_staging(dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(dir) {
        warn!(error = %e, "failed to remove conversion staging directory");
    }
}

/// `{sanitized stem}_{8 hex}{ext}`.
pub fn unique_filename(original: &str) -> String {
    let safe = sanitize_filename(original);
    let (stem, ext) = split_extension(&safe);
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}{}", stem, &random[..8], ext.unwrap_or(""))
}

#[derive(Debug)]
pub struct UploadReceipt {
    pub file: UploadedFileRow,
    pub file_type: FileType,
    /// Whether the file was also written into the workspace.
    pub in_workspace: bool,
}

#[derive(Debug)]
pub struct ConversionReport {
    pub source: UploadedFileRow,
    pub converted: Vec<ConvertedFileRow>,
    /// Pages of an earlier conversion of the same upload that were removed.
    pub replaced: usize,
    pub outputs: Tally,
    pub failures: Vec<FileFailure>,
}

impl ConversionReport {
    pub fn completion(&self) -> Completion {
        self.outputs.completion()
    }
}

impl fmt::Display for ConversionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "recorded {} converted files from {}",
            self.outputs, self.source.filename
        )
    }
}

#[derive(Debug, Default)]
pub struct RemovalReport {
    pub filename: String,
    /// Converted rows removed.
    pub converted: usize,
    /// Physical archive files removed.
    pub files_removed: usize,
    pub failures: Vec<FileFailure>,
}

#[derive(Debug, Default)]
pub struct ClearConversionsReport {
    pub order_number: String,
    pub converted: usize,
    pub files_removed: usize,
    pub failures: Vec<FileFailure>,
}

impl fmt::Display for ClearConversionsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cleared {} converted files from order {}",
            self.converted, self.order_number
        )
    }
}
