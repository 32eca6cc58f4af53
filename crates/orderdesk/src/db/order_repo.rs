//! Order repository: CRUD operations for the `orders` and
//! `order_merge_sources` tables.
//!
//! `is_active` is not stored on the order. It is derived from the owner's
//! `users.active_order_id`, so two active orders for one owner cannot be
//! represented.

use rusqlite::{params, Connection, Row};

use super::DatabaseError;

const SELECT_ORDER: &str = "SELECT o.id, o.order_number, o.owner_id, o.status, o.is_merged,
        o.note, o.created_at, o.updated_at,
        EXISTS(SELECT 1 FROM users u WHERE u.id = o.owner_id AND u.active_order_id = o.id)
            AS is_active
     FROM orders o";

/// A raw order row from the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRow {
    pub id: i64,
    pub order_number: String,
    pub owner_id: i64,
    pub status: String,
    pub is_active: bool,
    pub is_merged: bool,
    pub note: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl OrderRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            order_number: row.get("order_number")?,
            owner_id: row.get("owner_id")?,
            status: row.get("status")?,
            is_active: row.get("is_active")?,
            is_merged: row.get("is_merged")?,
            note: row.get("note")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Values for a new order row.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_number: String,
    pub owner_id: i64,
    pub status: String,
    pub is_merged: bool,
    pub note: Option<String>,
    pub created_at: String,
}

/// Query filter parameters for order listing.
#[derive(Debug, Default, Clone)]
pub struct OrderFilter {
    pub owner_id: Option<i64>,
    pub status: Option<String>,
    /// Substring match on the order number.
    pub order_number: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new order row and returns its id.
pub fn insert(conn: &Connection, order: &NewOrder) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO orders (order_number, owner_id, status, is_merged, note, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            order.order_number,
            order.owner_id,
            order.status,
            order.is_merged,
            order.note,
            order.created_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn find_one(
    conn: &Connection,
    condition: &str,
    param: &dyn rusqlite::types::ToSql,
) -> Result<Option<OrderRow>, DatabaseError> {
    let sql = format!("{} WHERE {}", SELECT_ORDER, condition);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query_map(&[param], OrderRow::from_row)?;
    match rows.next() {
        Some(Ok(row)) => Ok(Some(row)),
        Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
        None => Ok(None),
    }
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<OrderRow>, DatabaseError> {
    find_one(conn, "o.id = ?1", &id)
}

pub fn find_by_number(
    conn: &Connection,
    order_number: &str,
) -> Result<Option<OrderRow>, DatabaseError> {
    find_one(conn, "o.order_number = ?1", &order_number)
}

/// Queries orders with filters, returning (rows, total_count). Newest first.
pub fn query(
    conn: &Connection,
    filter: &OrderFilter,
) -> Result<(Vec<OrderRow>, u64), DatabaseError> {
    let mut conditions = Vec::new();
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(owner_id) = filter.owner_id {
        conditions.push(format!("o.owner_id = ?{}", param_values.len() + 1));
        param_values.push(Box::new(owner_id));
    }
    if let Some(ref status) = filter.status {
        conditions.push(format!("o.status = ?{}", param_values.len() + 1));
        param_values.push(Box::new(status.clone()));
    }
    if let Some(ref number) = filter.order_number {
        conditions.push(format!("o.order_number LIKE ?{}", param_values.len() + 1));
        param_values.push(Box::new(format!("%{}%", number)));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM orders o {}", where_clause);
    let params_ref: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();
    let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

    let limit = filter.limit.unwrap_or(100) as i64;
    let offset = filter.offset.unwrap_or(0) as i64;
    param_values.push(Box::new(limit));
    param_values.push(Box::new(offset));
    let query_sql = format!(
        "{} {} ORDER BY o.created_at DESC, o.id DESC LIMIT ?{} OFFSET ?{}",
        SELECT_ORDER,
        where_clause,
        param_values.len() - 1,
        param_values.len()
    );

    let params_ref: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&query_sql)?;
    let rows: Vec<OrderRow> = stmt
        .query_map(params_ref.as_slice(), OrderRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok((rows, total))
}

/// Every order's `(id, order_number)`.
pub fn all_numbers(conn: &Connection) -> Result<Vec<(i64, String)>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT id, order_number FROM orders ORDER BY id")?;
    let rows = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Updates the status column and `updated_at`.
pub fn update_status(
    conn: &Connection,
    id: i64,
    status: &str,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE orders SET status = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, status, updated_at],
    )?;
    Ok(())
}

pub fn update_note(
    conn: &Connection,
    id: i64,
    note: Option<&str>,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE orders SET note = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, note, updated_at],
    )?;
    Ok(())
}

/// Reassigns the order to a new owner.
pub fn set_owner(
    conn: &Connection,
    id: i64,
    owner_id: i64,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE orders SET owner_id = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, owner_id, updated_at],
    )?;
    Ok(())
}

/// Bumps `updated_at` without changing anything else.
pub fn touch(conn: &Connection, id: i64, updated_at: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE orders SET updated_at = ?2 WHERE id = ?1",
        params![id, updated_at],
    )?;
    Ok(())
}

/// Deletes the order. File rows and merge sources cascade; user pointers to
/// it are nulled. Returns true if a row was removed.
pub fn delete(conn: &Connection, id: i64) -> Result<bool, DatabaseError> {
    let changed = conn.execute("DELETE FROM orders WHERE id = ?1", params![id])?;
    Ok(changed > 0)
}

/// Records the source order numbers of a merged order, keeping their order.
pub fn insert_merge_sources(
    conn: &Connection,
    order_id: i64,
    sources: &[String],
) -> Result<(), DatabaseError> {
    let mut stmt = conn.prepare(
        "INSERT INTO order_merge_sources (order_id, position, source_order_number)
         VALUES (?1, ?2, ?3)",
    )?;
    for (position, number) in sources.iter().enumerate() {
        stmt.execute(params![order_id, position as i64, number])?;
    }
    Ok(())
}

/// Returns the source order numbers of a merged order (empty otherwise).
pub fn merge_sources(conn: &Connection, order_id: i64) -> Result<Vec<String>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT source_order_number FROM order_merge_sources
         WHERE order_id = ?1 ORDER BY position",
    )?;
    let rows = stmt
        .query_map(params![order_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{user_repo, Database};

    fn sample_order(owner_id: i64, number: &str, created_at: &str) -> NewOrder {
        NewOrder {
            order_number: number.to_string(),
            owner_id,
            status: "pending".to_string(),
            is_merged: false,
            note: None,
            created_at: created_at.to_string(),
        }
    }

    fn setup() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        let uid = db
            .with_conn(|conn| user_repo::insert(conn, "alice", false, "2026-01-01T00:00:00Z"))
            .unwrap();
        (db, uid)
    }

    #[test]
    fn test_insert_and_find() {
        let (db, uid) = setup();
        db.with_conn(|conn| {
            let id = insert(conn, &sample_order(uid, "20260101-aaaa0001", "2026-01-01T00:00:00Z"))?;
            let by_id = find_by_id(conn, id)?.unwrap();
            let by_number = find_by_number(conn, "20260101-aaaa0001")?.unwrap();
            assert_eq!(by_id, by_number);
            assert_eq!(by_id.status, "pending");
            assert_eq!(by_id.created_at, by_id.updated_at);
            assert!(!by_id.is_active);
            assert!(find_by_number(conn, "missing")?.is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_is_active_follows_owner_pointer() {
        let (db, uid) = setup();
        db.with_conn(|conn| {
            let o1 = insert(conn, &sample_order(uid, "20260101-aaaa0001", "2026-01-01T00:00:00Z"))?;
            let o2 = insert(conn, &sample_order(uid, "20260101-aaaa0002", "2026-01-02T00:00:00Z"))?;

            user_repo::set_active_order(conn, uid, o1)?;
            assert!(find_by_id(conn, o1)?.unwrap().is_active);
            assert!(!find_by_id(conn, o2)?.unwrap().is_active);

            user_repo::set_active_order(conn, uid, o2)?;
            assert!(!find_by_id(conn, o1)?.unwrap().is_active);
            assert!(find_by_id(conn, o2)?.unwrap().is_active);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_query_filters_and_paginates() {
        let (db, uid) = setup();
        db.with_conn(|conn| {
            let bob = user_repo::insert(conn, "bob", false, "2026-01-01T00:00:00Z")?;
            for i in 0..5 {
                insert(
                    conn,
                    &sample_order(uid, &format!("20260101-a000000{}", i), &format!("2026-01-0{}T00:00:00Z", i + 1)),
                )?;
            }
            insert(conn, &sample_order(bob, "20260101-b0000000", "2026-01-09T00:00:00Z"))?;

            let (rows, total) = query(
                conn,
                &OrderFilter {
                    owner_id: Some(uid),
                    limit: Some(2),
                    ..Default::default()
                },
            )?;
            assert_eq!(total, 5);
            assert_eq!(rows.len(), 2);
            assert_eq!(rows[0].order_number, "20260101-a0000004");

            let (rows, total) = query(
                conn,
                &OrderFilter {
                    order_number: Some("b000".to_string()),
                    ..Default::default()
                },
            )?;
            assert_eq!(total, 1);
            assert_eq!(rows[0].owner_id, bob);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_updates_and_delete() {
        let (db, uid) = setup();
        db.with_conn(|conn| {
            let bob = user_repo::insert(conn, "bob", false, "2026-01-01T00:00:00Z")?;
            let id = insert(conn, &sample_order(uid, "20260101-aaaa0001", "2026-01-01T00:00:00Z"))?;

            update_status(conn, id, "reviewed", "2026-01-02T00:00:00Z")?;
            update_note(conn, id, Some("rush"), "2026-01-03T00:00:00Z")?;
            set_owner(conn, id, bob, "2026-01-04T00:00:00Z")?;

            let row = find_by_id(conn, id)?.unwrap();
            assert_eq!(row.status, "reviewed");
            assert_eq!(row.note.as_deref(), Some("rush"));
            assert_eq!(row.owner_id, bob);
            assert_eq!(row.updated_at, "2026-01-04T00:00:00Z");

            assert!(delete(conn, id)?);
            assert!(!delete(conn, id)?);
            assert!(find_by_id(conn, id)?.is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_merge_sources_keep_order() {
        let (db, uid) = setup();
        db.with_conn(|conn| {
            let id = insert(conn, &sample_order(uid, "20260101-merged01", "2026-01-01T00:00:00Z"))?;
            let sources = vec!["20260101-cccc".to_string(), "20260101-aaaa".to_string()];
            insert_merge_sources(conn, id, &sources)?;
            assert_eq!(merge_sources(conn, id)?, sources);

            delete(conn, id)?;
            assert!(merge_sources(conn, id)?.is_empty());
            Ok(())
        })
        .unwrap();
    }
}
