use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::order_repo::OrderRow;
use crate::db::user_repo::UserRow;
use crate::db::DatabaseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Material,
    Reviewed,
    Active,
    Archived,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Material => "material",
            OrderStatus::Reviewed => "reviewed",
            OrderStatus::Active => "active",
            OrderStatus::Archived => "archived",
        }
    }

    /// Statuses a user may set directly with `update_status`.
    pub fn is_user_settable(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Material | OrderStatus::Reviewed
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(OrderStatus::Pending),
            "material" => Ok(OrderStatus::Material),
            "reviewed" => Ok(OrderStatus::Reviewed),
            "active" => Ok(OrderStatus::Active),
            "archived" => Ok(OrderStatus::Archived),
            _ => Err(s.to_string()),
        }
    }
}

/// Where an order sits in its lifecycle.
///
/// `Created` and `Deleted` are transitional: `create` reports the former for
/// the instant before activation, `delete` reports the latter. A stored order
/// is always `Active`, `Inactive` or `Merged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Created,
    Active,
    Inactive,
    Merged,
    Deleted,
}

/// An order with its merge provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub order_number: String,
    pub owner_id: i64,
    pub status: OrderStatus,
    pub is_active: bool,
    pub is_merged: bool,
    /// Source order numbers, in the order they were merged.
    pub merged_from: Vec<String>,
    pub note: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Order {
    pub(crate) fn from_row(row: OrderRow, merged_from: Vec<String>) -> Result<Self, DatabaseError> {
        let status = row
            .status
            .parse::<OrderStatus>()
            .map_err(|value| DatabaseError::InvalidValue {
                column: "orders.status",
                value,
            })?;
        Ok(Self {
            id: row.id,
            order_number: row.order_number,
            owner_id: row.owner_id,
            status,
            is_active: row.is_active,
            is_merged: row.is_merged,
            merged_from,
            note: row.note,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    pub fn state(&self) -> LifecycleState {
        if self.is_active {
            LifecycleState::Active
        } else if self.is_merged {
            LifecycleState::Merged
        } else {
            LifecycleState::Inactive
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub is_admin: bool,
    pub active_order_id: Option<i64>,
    /// Another user's order this admin activated, if any.
    pub cross_active_order_id: Option<i64>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            is_admin: row.is_admin,
            active_order_id: row.active_order_id,
            cross_active_order_id: row.cross_active_order_id,
        }
    }
}

/// The user on whose behalf an operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: i64,
    pub is_admin: bool,
}

impl Actor {
    pub fn user(user_id: i64) -> Self {
        Self {
            user_id,
            is_admin: false,
        }
    }

    pub fn admin(user_id: i64) -> Self {
        Self {
            user_id,
            is_admin: true,
        }
    }

    pub fn can_access(&self, order: &Order) -> bool {
        self.is_admin || order.owner_id == self.user_id
    }
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            is_admin: user.is_admin,
        }
    }
}

/// `YYYYMMDD-xxxxxxxx`: the UTC date plus 8 hex chars of a v4 UUID.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", now.format("%Y%m%d"), &random[..8])
}
