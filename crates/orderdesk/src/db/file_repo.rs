//! File repository: the `uploaded_files` and `converted_files` tables.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

/// A raw uploaded-file row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFileRow {
    pub id: i64,
    pub order_id: i64,
    pub filename: String,
    pub original_filename: String,
    pub file_path: String,
    pub file_size: Option<i64>,
    pub file_type: Option<String>,
    pub file_hash: Option<String>,
    pub uploaded_at: String,
}

impl UploadedFileRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            order_id: row.get("order_id")?,
            filename: row.get("filename")?,
            original_filename: row.get("original_filename")?,
            file_path: row.get("file_path")?,
            file_size: row.get("file_size")?,
            file_type: row.get("file_type")?,
            file_hash: row.get("file_hash")?,
            uploaded_at: row.get("uploaded_at")?,
        })
    }
}

/// Values for a new uploaded-file row.
#[derive(Debug, Clone)]
pub struct NewUploadedFile {
    pub order_id: i64,
    pub filename: String,
    pub original_filename: String,
    pub file_path: String,
    pub file_size: Option<i64>,
    pub file_type: Option<String>,
    pub file_hash: Option<String>,
    pub uploaded_at: String,
}

/// A raw converted-file row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedFileRow {
    pub id: i64,
    pub order_id: i64,
    pub filename: String,
    pub file_path: String,
    pub source_file_id: Option<i64>,
    pub source_hash: Option<String>,
    pub from_zip: bool,
    pub zip_path: Option<String>,
    pub converted_at: String,
}

impl ConvertedFileRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            order_id: row.get("order_id")?,
            filename: row.get("filename")?,
            file_path: row.get("file_path")?,
            source_file_id: row.get("source_file_id")?,
            source_hash: row.get("source_hash")?,
            from_zip: row.get("from_zip")?,
            zip_path: row.get("zip_path")?,
            converted_at: row.get("converted_at")?,
        })
    }
}

/// Values for a new converted-file row.
#[derive(Debug, Clone)]
pub struct NewConvertedFile {
    pub order_id: i64,
    pub filename: String,
    pub file_path: String,
    pub source_file_id: Option<i64>,
    pub source_hash: Option<String>,
    pub from_zip: bool,
    pub zip_path: Option<String>,
    pub converted_at: String,
}

// --- uploaded_files ---

pub fn insert_uploaded(conn: &Connection, file: &NewUploadedFile) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO uploaded_files (order_id, filename, original_filename, file_path,
         file_size, file_type, file_hash, uploaded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            file.order_id,
            file.filename,
            file.original_filename,
            file.file_path,
            file.file_size,
            file.file_type,
            file.file_hash,
            file.uploaded_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn find_uploaded(conn: &Connection, id: i64) -> Result<Option<UploadedFileRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM uploaded_files WHERE id = ?1",
            params![id],
            UploadedFileRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Uploaded files of an order in upload order.
pub fn uploaded_by_order(
    conn: &Connection,
    order_id: i64,
) -> Result<Vec<UploadedFileRow>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT * FROM uploaded_files WHERE order_id = ?1 ORDER BY id")?;
    let rows = stmt
        .query_map(params![order_id], UploadedFileRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// All uploaded files carrying `hash`, newest first.
pub fn uploaded_by_hash(
    conn: &Connection,
    hash: &str,
) -> Result<Vec<UploadedFileRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM uploaded_files WHERE file_hash = ?1
         ORDER BY uploaded_at DESC, id DESC",
    )?;
    let rows = stmt
        .query_map(params![hash], UploadedFileRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn find_uploaded_by_order_and_filename(
    conn: &Connection,
    order_id: i64,
    filename: &str,
) -> Result<Option<UploadedFileRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM uploaded_files WHERE order_id = ?1 AND filename = ?2
             ORDER BY id LIMIT 1",
            params![order_id, filename],
            UploadedFileRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Uploaded files without a stored hash.
pub fn uploaded_missing_hash(conn: &Connection) -> Result<Vec<UploadedFileRow>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT * FROM uploaded_files WHERE file_hash IS NULL ORDER BY id")?;
    let rows = stmt
        .query_map([], UploadedFileRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn update_uploaded_path(conn: &Connection, id: i64, path: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE uploaded_files SET file_path = ?2 WHERE id = ?1",
        params![id, path],
    )?;
    Ok(())
}

pub fn update_uploaded_hash(
    conn: &Connection,
    id: i64,
    hash: &str,
    size: Option<i64>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE uploaded_files SET file_hash = ?2, file_size = COALESCE(?3, file_size)
         WHERE id = ?1",
        params![id, hash, size],
    )?;
    Ok(())
}

/// Deletes an uploaded file row; its converted children cascade.
pub fn delete_uploaded(conn: &Connection, id: i64) -> Result<bool, DatabaseError> {
    let changed = conn.execute("DELETE FROM uploaded_files WHERE id = ?1", params![id])?;
    Ok(changed > 0)
}

pub fn all_uploaded(conn: &Connection) -> Result<Vec<UploadedFileRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM uploaded_files ORDER BY id")?;
    let rows = stmt
        .query_map([], UploadedFileRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// --- converted_files ---

pub fn insert_converted(conn: &Connection, file: &NewConvertedFile) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO converted_files (order_id, filename, file_path, source_file_id,
         source_hash, from_zip, zip_path, converted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            file.order_id,
            file.filename,
            file.file_path,
            file.source_file_id,
            file.source_hash,
            file.from_zip,
            file.zip_path,
            file.converted_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn find_converted(conn: &Connection, id: i64) -> Result<Option<ConvertedFileRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM converted_files WHERE id = ?1",
            params![id],
            ConvertedFileRow::from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn converted_by_order(
    conn: &Connection,
    order_id: i64,
) -> Result<Vec<ConvertedFileRow>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT * FROM converted_files WHERE order_id = ?1 ORDER BY id")?;
    let rows = stmt
        .query_map(params![order_id], ConvertedFileRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Converted outputs derived from the given uploaded file.
pub fn converted_by_source(
    conn: &Connection,
    source_file_id: i64,
) -> Result<Vec<ConvertedFileRow>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT * FROM converted_files WHERE source_file_id = ?1 ORDER BY id")?;
    let rows = stmt
        .query_map(params![source_file_id], ConvertedFileRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn find_converted_by_order_and_filename(
    conn: &Connection,
    order_id: i64,
    filename: &str,
) -> Result<Option<ConvertedFileRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM converted_files WHERE order_id = ?1 AND filename = ?2
             ORDER BY id LIMIT 1",
            params![order_id, filename],
            ConvertedFileRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Converted files that have a source but no recorded source hash.
pub fn converted_missing_source_hash(
    conn: &Connection,
) -> Result<Vec<ConvertedFileRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM converted_files
         WHERE source_hash IS NULL AND source_file_id IS NOT NULL ORDER BY id",
    )?;
    let rows = stmt
        .query_map([], ConvertedFileRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn update_converted_path(conn: &Connection, id: i64, path: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE converted_files SET file_path = ?2 WHERE id = ?1",
        params![id, path],
    )?;
    Ok(())
}

pub fn update_converted_source_hash(
    conn: &Connection,
    id: i64,
    hash: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE converted_files SET source_hash = ?2 WHERE id = ?1",
        params![id, hash],
    )?;
    Ok(())
}

pub fn delete_converted(conn: &Connection, id: i64) -> Result<bool, DatabaseError> {
    let changed = conn.execute("DELETE FROM converted_files WHERE id = ?1", params![id])?;
    Ok(changed > 0)
}

pub fn all_converted(conn: &Connection) -> Result<Vec<ConvertedFileRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM converted_files ORDER BY id")?;
    let rows = stmt
        .query_map([], ConvertedFileRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
