//! User repository: accounts and their active-order pointers.
//!
//! `active_order_id` is the single source of truth for "which order is
//! active" for a user. `cross_active_order_id` is set only for admins that
//! activated an order belonging to another user.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

/// A raw user row from the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub is_admin: bool,
    pub active_order_id: Option<i64>,
    pub cross_active_order_id: Option<i64>,
    pub created_at: String,
}

impl UserRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            username: row.get("username")?,
            is_admin: row.get("is_admin")?,
            active_order_id: row.get("active_order_id")?,
            cross_active_order_id: row.get("cross_active_order_id")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Inserts a new user and returns its id.
pub fn insert(
    conn: &Connection,
    username: &str,
    is_admin: bool,
    created_at: &str,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO users (username, is_admin, created_at) VALUES (?1, ?2, ?3)",
        params![username, is_admin, created_at],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<UserRow>, DatabaseError> {
    let row = conn
        .query_row("SELECT * FROM users WHERE id = ?1", params![id], UserRow::from_row)
        .optional()?;
    Ok(row)
}

pub fn find_by_username(
    conn: &Connection,
    username: &str,
) -> Result<Option<UserRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM users WHERE username = ?1")?;
    let mut rows = stmt.query_map(params![username], UserRow::from_row)?;
    match rows.next() {
        Some(Ok(row)) => Ok(Some(row)),
        Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
        None => Ok(None),
    }
}

/// Lists all users ordered by id.
pub fn list(conn: &Connection) -> Result<Vec<UserRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM users ORDER BY id")?;
    let rows = stmt
        .query_map([], UserRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Points the user's active slot at `order_id`, replacing any prior value.
pub fn set_active_order(
    conn: &Connection,
    user_id: i64,
    order_id: i64,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE users SET active_order_id = ?2 WHERE id = ?1",
        params![user_id, order_id],
    )?;
    Ok(())
}

/// Clears the user's active slot. Returns true if a pointer was cleared.
pub fn deactivate_all(conn: &Connection, user_id: i64) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE users SET active_order_id = NULL
         WHERE id = ?1 AND active_order_id IS NOT NULL",
        params![user_id],
    )?;
    Ok(changed > 0)
}

/// Sets (or clears, with `None`) the admin's cross-activated order.
pub fn set_cross_active_order(
    conn: &Connection,
    user_id: i64,
    order_id: Option<i64>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE users SET cross_active_order_id = ?2 WHERE id = ?1",
        params![user_id, order_id],
    )?;
    Ok(())
}

/// Clears every active or cross-active pointer that references `order_id`.
/// Returns the number of users touched.
pub fn clear_pointers_to(conn: &Connection, order_id: i64) -> Result<usize, DatabaseError> {
    let active = conn.execute(
        "UPDATE users SET active_order_id = NULL WHERE active_order_id = ?1",
        params![order_id],
    )?;
    let cross = conn.execute(
        "UPDATE users SET cross_active_order_id = NULL WHERE cross_active_order_id = ?1",
        params![order_id],
    )?;
    Ok(active + cross)
}
