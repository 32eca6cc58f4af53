//! Orders: the lifecycle state machine, merging, and the reports both return.

use rusqlite::Connection;

use crate::db::{order_repo, DatabaseError};

pub mod lifecycle;
pub mod merge;
pub mod model;
pub mod outcome;

pub use lifecycle::{
    ActivateReport, ActivationPolicy, CreateReport, DeleteReport, OrderLifecycle, OrderPage,
    OrderQuery, OrderSummary, TransferReport,
};
pub use merge::{MergeEngine, MergeReport};
pub use model::{generate_order_number, Actor, LifecycleState, Order, OrderStatus, User};
pub use outcome::{Completion, FileFailure, Tally};

/// Loads an order and its merge sources by order number.
pub(crate) fn fetch_order(
    conn: &Connection,
    order_number: &str,
) -> Result<Option<Order>, DatabaseError> {
    match order_repo::find_by_number(conn, order_number)? {
        Some(row) => {
            let sources = order_repo::merge_sources(conn, row.id)?;
            Order::from_row(row, sources).map(Some)
        }
        None => Ok(None),
    }
}

/// Loads an order and its merge sources by id.
pub(crate) fn fetch_order_by_id(conn: &Connection, id: i64) -> Result<Option<Order>, DatabaseError> {
    match order_repo::find_by_id(conn, id)? {
        Some(row) => {
            let sources = order_repo::merge_sources(conn, row.id)?;
            Order::from_row(row, sources).map(Some)
        }
        None => Ok(None),
    }
}
