//! Order lifecycle: creation, activation, status and note edits, transfer
//! and deletion.
//!
//! Each owner has at most one active order, stored as the owner's
//! `active_order_id`. Activation commits the pointer change first and only
//! then clears and restores the workspace, all while holding the workspace
//! guard.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, info_span, warn};

use crate::db::file_repo::{self, ConvertedFileRow, UploadedFileRow};
use crate::db::order_repo::{self, NewOrder, OrderFilter};
use crate::db::user_repo;
use crate::db::{now_timestamp, Database};
use crate::error::{OrderError, Result};
use crate::order::model::{generate_order_number, Actor, LifecycleState, Order, OrderStatus, User};
use crate::order::outcome::{Completion, FileFailure};
use crate::order::{fetch_order, fetch_order_by_id};
use crate::storage::ArchiveStore;
use crate::workspace::{ArchiveReport, ClearReport, RestoreReport, Workspace};

#[derive(Clone)]
pub struct OrderLifecycle {
    db: Database,
    store: ArchiveStore,
    workspace: Arc<Workspace>,
}

impl OrderLifecycle {
    pub fn new(db: Database, store: ArchiveStore, workspace: Arc<Workspace>) -> Self {
        Self {
            db,
            store,
            workspace,
        }
    }

    // --- users ---

    pub fn create_user(&self, username: &str, is_admin: bool) -> Result<User> {
        let username = username.trim();
        if username.is_empty() {
            return Err(OrderError::IntegrityConflict(
                "username must not be empty".to_string(),
            ));
        }
        let now = now_timestamp();
        let row = self.db.with_conn(|conn| {
            if user_repo::find_by_username(conn, username)?.is_some() {
                return Ok(None);
            }
            let id = user_repo::insert(conn, username, is_admin, &now)?;
            user_repo::find_by_id(conn, id)
        })?;
        match row {
            Some(row) => {
                info!(user = %row.username, is_admin, "created user");
                Ok(row.into())
            }
            None => Err(OrderError::IntegrityConflict(format!(
                "user '{}' already exists",
                username
            ))),
        }
    }

    pub fn user(&self, id: i64) -> Result<User> {
        self.db
            .with_conn(|conn| user_repo::find_by_id(conn, id))?
            .map(User::from)
            .ok_or_else(|| OrderError::user_not_found(id))
    }

    pub fn user_by_name(&self, username: &str) -> Result<User> {
        self.db
            .with_conn(|conn| user_repo::find_by_username(conn, username))?
            .map(User::from)
            .ok_or_else(|| OrderError::NotFound {
                kind: "User",
                key: username.to_string(),
            })
    }

    pub fn users(&self) -> Result<Vec<User>> {
        let rows = self.db.with_conn(user_repo::list)?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    /// Resolves the caller with the admin flag taken from storage.
    fn actor(&self, actor: Actor) -> Result<Actor> {
        let user = self.user(actor.user_id)?;
        Ok(Actor::from(&user))
    }

    // --- reads ---

    pub fn order(&self, order_number: &str) -> Result<Order> {
        self.db
            .with_conn(|conn| fetch_order(conn, order_number))?
            .ok_or_else(|| OrderError::order_not_found(order_number))
    }

    /// The owner's active order, if any.
    pub fn active_order(&self, user_id: i64) -> Result<Option<Order>> {
        let user = self.user(user_id)?;
        match user.active_order_id {
            Some(id) => Ok(self.db.with_conn(|conn| fetch_order_by_id(conn, id))?),
            None => Ok(None),
        }
    }

    /// The order the user is working on: an admin's cross-activated order
    /// when set, otherwise their own active order.
    pub fn working_order(&self, user_id: i64) -> Result<Option<Order>> {
        let user = self.user(user_id)?;
        match user.cross_active_order_id.or(user.active_order_id) {
            Some(id) => Ok(self.db.with_conn(|conn| fetch_order_by_id(conn, id))?),
            None => Ok(None),
        }
    }

    /// Admins see every order; everyone else only their own.
    pub fn list(&self, actor: Actor, query: &OrderQuery) -> Result<OrderPage> {
        let actor = self.actor(actor)?;
        let filter = OrderFilter {
            owner_id: if actor.is_admin {
                query.owner_id
            } else {
                Some(actor.user_id)
            },
            status: query.status.map(|s| s.as_str().to_string()),
            order_number: query.order_number.clone(),
            limit: query.limit,
            offset: query.offset,
        };

        let (orders, total) = self.db.with_conn(|conn| {
            let (rows, total) = order_repo::query(conn, &filter)?;
            let mut orders = Vec::with_capacity(rows.len());
            for row in rows {
                let sources = order_repo::merge_sources(conn, row.id)?;
                orders.push(Order::from_row(row, sources)?);
            }
            Ok((orders, total))
        })?;
        Ok(OrderPage { orders, total })
    }

    /// An order together with its file rows.
    pub fn summary(&self, order_number: &str, actor: Actor) -> Result<OrderSummary> {
        let actor = self.actor(actor)?;
        let order = self.order(order_number)?;
        authorize(&actor, &order, "view")?;
        let (uploads, converted) = self.db.with_conn(|conn| {
            Ok((
                file_repo::uploaded_by_order(conn, order.id)?,
                file_repo::converted_by_order(conn, order.id)?,
            ))
        })?;
        Ok(OrderSummary {
            order,
            uploads,
            converted,
        })
    }

    // --- transitions ---

    /// Creates a new active order for `owner_id`.
    ///
    /// The workspace contents are archived into the owner's previous active
    /// order first (when the workspace reflects it), the new order and the
    /// pointer switch commit together, and the workspace is cleared only
    /// after that commit.
    pub fn create(&self, owner_id: i64, note: Option<&str>) -> Result<CreateReport> {
        let span = info_span!("order.create", owner_id);
        let _enter = span.enter();

        let owner = self.user(owner_id)?;
        let mut guard = self.workspace.lock()?;

        let previous = match owner.active_order_id {
            Some(id) => self.db.with_conn(|conn| fetch_order_by_id(conn, id))?,
            None => None,
        };

        let archived = match &previous {
            Some(prev) if guard.materialized().map_or(true, |m| m == prev.id) => {
                Some(guard.archive_outgoing(&self.db, &self.store, prev))
            }
            Some(prev) => {
                info!(
                    previous = %prev.order_number,
                    "workspace reflects another order; nothing to archive"
                );
                None
            }
            None => None,
        };

        let order_number = generate_order_number(Utc::now());
        self.store.ensure_order_dirs(&order_number)?;

        let now = now_timestamp();
        let note = clean_note(note);
        let order = self.db.with_transaction(|tx| -> Result<Order> {
            let id = order_repo::insert(
                tx,
                &NewOrder {
                    order_number: order_number.clone(),
                    owner_id: owner.id,
                    status: OrderStatus::Pending.as_str().to_string(),
                    is_merged: false,
                    note: note.clone(),
                    created_at: now.clone(),
                },
            )?;
            user_repo::set_active_order(tx, owner.id, id)?;
            if owner.is_admin {
                user_repo::set_cross_active_order(tx, owner.id, None)?;
            }
            fetch_order_by_id(tx, id)?.ok_or_else(|| OrderError::order_not_found(id))
        })?;

        let cleared = guard.clear();
        guard.set_materialized(Some(order.id));

        info!(order_number = %order.order_number, "created order");
        Ok(CreateReport {
            order,
            state: LifecycleState::Created,
            previous: previous.map(|p| p.order_number),
            archived,
            cleared,
        })
    }

    /// Makes `order_number` the working order and restores its files.
    pub fn activate(&self, order_number: &str, actor: Actor) -> Result<ActivateReport> {
        let span = info_span!("order.activate", order_number, user_id = actor.user_id);
        let _enter = span.enter();

        let actor = self.actor(actor)?;
        let target = self.order(order_number)?;
        authorize(&actor, &target, "activate")?;

        let policy = if actor.user_id != target.owner_id {
            ActivationPolicy::AdminCrossUser
        } else if actor.is_admin {
            ActivationPolicy::AdminOwn
        } else {
            ActivationPolicy::Owner
        };

        let mut guard = self.workspace.lock()?;

        let now = now_timestamp();
        let order = self.db.with_transaction(|tx| -> Result<Order> {
            match policy {
                ActivationPolicy::Owner => {
                    user_repo::set_active_order(tx, target.owner_id, target.id)?;
                }
                ActivationPolicy::AdminOwn => {
                    user_repo::set_active_order(tx, target.owner_id, target.id)?;
                    user_repo::set_cross_active_order(tx, actor.user_id, None)?;
                }
                ActivationPolicy::AdminCrossUser => {
                    user_repo::deactivate_all(tx, actor.user_id)?;
                    user_repo::set_cross_active_order(tx, actor.user_id, Some(target.id))?;
                }
            }
            order_repo::touch(tx, target.id, &now)?;
            fetch_order_by_id(tx, target.id)?
                .ok_or_else(|| OrderError::order_not_found(&target.order_number))
        })?;

        let cleared = guard.clear();
        let restored = guard.restore(&self.db, &self.store, &order)?;

        info!(policy = ?policy, "{}", restored);
        Ok(ActivateReport {
            order,
            policy,
            cleared,
            restored,
        })
    }

    /// Sets one of the user-settable statuses. Metadata only.
    pub fn update_status(&self, order_number: &str, status: &str, actor: Actor) -> Result<Order> {
        let new_status = status
            .parse::<OrderStatus>()
            .ok()
            .filter(OrderStatus::is_user_settable)
            .ok_or_else(|| OrderError::InvalidStatus(status.to_string()))?;

        let actor = self.actor(actor)?;
        let order = self.order(order_number)?;
        authorize(&actor, &order, "update")?;

        let now = now_timestamp();
        let updated = self.db.with_transaction(|tx| -> Result<Order> {
            order_repo::update_status(tx, order.id, new_status.as_str(), &now)?;
            fetch_order_by_id(tx, order.id)?.ok_or_else(|| OrderError::order_not_found(order_number))
        })?;

        info!(
            order_number,
            from = %order.status,
            to = %new_status,
            "updated order status"
        );
        Ok(updated)
    }

    /// Replaces the note. Blank notes clear it.
    pub fn update_note(&self, order_number: &str, note: Option<&str>, actor: Actor) -> Result<Order> {
        let actor = self.actor(actor)?;
        let order = self.order(order_number)?;
        authorize(&actor, &order, "update")?;

        let note = clean_note(note);
        let now = now_timestamp();
        let updated = self.db.with_transaction(|tx| -> Result<Order> {
            order_repo::update_note(tx, order.id, note.as_deref(), &now)?;
            fetch_order_by_id(tx, order.id)?.ok_or_else(|| OrderError::order_not_found(order_number))
        })?;
        info!(order_number, "updated order note");
        Ok(updated)
    }

    /// Admin only. An owner's active order cannot be deleted; create or
    /// activate another order first.
    pub fn delete(&self, order_number: &str, actor: Actor) -> Result<DeleteReport> {
        let span = info_span!("order.delete", order_number);
        let _enter = span.enter();

        let actor = self.actor(actor)?;
        let order = self.order(order_number)?;
        if !actor.is_admin {
            return Err(unauthorized(&actor, &order, "delete"));
        }
        if order.is_active {
            return Err(OrderError::IntegrityConflict(format!(
                "order {} is its owner's active order",
                order.order_number
            )));
        }

        let mut guard = self.workspace.lock()?;
        let workspace_cleared = if guard.materialized() == Some(order.id) {
            Some(guard.clear())
        } else {
            None
        };

        let purge = self.store.purge_order(&order.order_number);
        for failure in &purge.failures {
            warn!(file = %failure.filename, reason = %failure.reason, "archived file not removed");
        }

        self.db.with_transaction(|tx| -> Result<()> {
            user_repo::clear_pointers_to(tx, order.id)?;
            order_repo::delete(tx, order.id)?;
            Ok(())
        })?;

        info!(files_removed = purge.removed, "deleted order");
        Ok(DeleteReport {
            order_number: order.order_number,
            state: LifecycleState::Deleted,
            files_removed: purge.removed,
            failures: purge.failures,
            workspace_cleared,
        })
    }

    /// Admin only. Reassigns the order and deactivates it; the receiver
    /// activates it explicitly. A non-empty note is appended to the order's
    /// note as `[transferred from A to B: note]`.
    pub fn transfer(
        &self,
        order_number: &str,
        target_owner_id: i64,
        actor: Actor,
        note: Option<&str>,
    ) -> Result<TransferReport> {
        let span = info_span!("order.transfer", order_number, target_owner_id);
        let _enter = span.enter();

        let actor = self.actor(actor)?;
        let order = self.order(order_number)?;
        if !actor.is_admin {
            return Err(unauthorized(&actor, &order, "transfer"));
        }
        let target = self.user(target_owner_id)?;
        let previous_owner = self.user(order.owner_id)?;

        let combined_note = match clean_note(note) {
            Some(extra) => {
                let marker = format!(
                    "[transferred from {} to {}: {}]",
                    previous_owner.username, target.username, extra
                );
                Some(match order.note.as_deref() {
                    Some(existing) if !existing.is_empty() => format!("{} {}", existing, marker),
                    _ => marker,
                })
            }
            None => order.note.clone(),
        };

        let now = now_timestamp();
        let was_active = order.is_active;
        let updated = self.db.with_transaction(|tx| -> Result<Order> {
            user_repo::clear_pointers_to(tx, order.id)?;
            order_repo::set_owner(tx, order.id, target.id, &now)?;
            order_repo::update_note(tx, order.id, combined_note.as_deref(), &now)?;
            fetch_order_by_id(tx, order.id)?.ok_or_else(|| OrderError::order_not_found(order_number))
        })?;

        info!(
            from = %previous_owner.username,
            to = %target.username,
            "transferred order"
        );
        Ok(TransferReport {
            order: updated,
            from: previous_owner.username,
            to: target.username,
            was_active,
        })
    }
}

fn authorize(actor: &Actor, order: &Order, action: &'static str) -> Result<()> {
    if actor.can_access(order) {
        Ok(())
    } else {
        Err(unauthorized(actor, order, action))
    }
}

fn unauthorized(actor: &Actor, order: &Order, action: &'static str) -> OrderError {
    OrderError::Unauthorized {
        user_id: actor.user_id,
        action,
        order_number: order.order_number.clone(),
    }
}

fn clean_note(note: Option<&str>) -> Option<String> {
    note.map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}

/// Which activation rule applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationPolicy {
    /// Owner activating their own order.
    Owner,
    /// Admin activating their own order; clears the cross-activation pointer.
    AdminOwn,
    /// Admin activating another user's order; the owner's pointer is kept.
    AdminCrossUser,
}

/// Listing filter. Non-admin callers are always restricted to their own
/// orders.
#[derive(Debug, Default, Clone)]
pub struct OrderQuery {
    pub owner_id: Option<i64>,
    pub status: Option<OrderStatus>,
    pub order_number: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug)]
pub struct OrderPage {
    pub orders: Vec<Order>,
    pub total: u64,
}

#[derive(Debug)]
pub struct OrderSummary {
    pub order: Order,
    pub uploads: Vec<UploadedFileRow>,
    pub converted: Vec<ConvertedFileRow>,
}

#[derive(Debug)]
pub struct CreateReport {
    pub order: Order,
    /// Always `Created`; `order` itself is already stored as active.
    pub state: LifecycleState,
    /// The owner's previously active order.
    pub previous: Option<String>,
    /// Present when the workspace was archived into `previous`.
    pub archived: Option<ArchiveReport>,
    pub cleared: ClearReport,
}

impl CreateReport {
    pub fn completion(&self) -> Completion {
        self.archived
            .as_ref()
            .map(ArchiveReport::completion)
            .unwrap_or(Completion::Complete)
    }
}

impl fmt::Display for CreateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "created order {}", self.order.order_number)?;
        if let (Some(previous), Some(archived)) = (&self.previous, &self.archived) {
            write!(f, " ({} from {})", archived, previous)?;
        }
        Ok(())
    }
}

/// Result of [`OrderLifecycle::activate`].
///
/// Under [`ActivationPolicy::AdminCrossUser`] the owner's pointer is left
/// alone, so `order.is_active` keeps reporting the owner's view (usually
/// `false`). The admin sees the activation through
/// [`OrderLifecycle::working_order`]; [`ActivateReport::is_cross_user`]
/// tells the two cases apart.
#[derive(Debug)]
pub struct ActivateReport {
    pub order: Order,
    pub policy: ActivationPolicy,
    pub cleared: ClearReport,
    pub restored: RestoreReport,
}

impl ActivateReport {
    pub fn completion(&self) -> Completion {
        self.restored.completion()
    }

    pub fn is_cross_user(&self) -> bool {
        self.policy == ActivationPolicy::AdminCrossUser
    }
}

impl fmt::Display for ActivateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "activated order {}: {}", self.order.order_number, self.restored)
    }
}

#[derive(Debug)]
pub struct DeleteReport {
    pub order_number: String,
    pub state: LifecycleState,
    pub files_removed: usize,
    pub failures: Vec<FileFailure>,
    /// Present when the workspace reflected the deleted order.
    pub workspace_cleared: Option<ClearReport>,
}

impl DeleteReport {
    pub fn completion(&self) -> Completion {
        crate::order::outcome::Tally::new(
            self.files_removed,
            self.files_removed + self.failures.len(),
        )
        .completion()
    }
}

impl fmt::Display for DeleteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "deleted order {} ({} files removed",
            self.order_number, self.files_removed
        )?;
        if !self.failures.is_empty() {
            write!(f, ", {} left on disk", self.failures.len())?;
        }
        write!(f, ")")
    }
}

#[derive(Debug)]
pub struct TransferReport {
    pub order: Order,
    pub from: String,
    pub to: String,
    pub was_active: bool,
}

impl fmt::Display for TransferReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "transferred order {} from {} to {}",
            self.order.order_number, self.from, self.to
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        lifecycle: OrderLifecycle,
        alice: User,
        bob: User,
        admin: User,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let workspace = Arc::new(Workspace::new(
            dir.path().join("work/uploads"),
            dir.path().join("work/converted"),
        ));
        workspace.ensure_dirs().unwrap();
        let lifecycle = OrderLifecycle::new(
            Database::open_in_memory().unwrap(),
            ArchiveStore::new(dir.path().join("archive")),
            workspace,
        );
        let alice = lifecycle.create_user("alice", false).unwrap();
        let bob = lifecycle.create_user("bob", false).unwrap();
        let admin = lifecycle.create_user("root", true).unwrap();
        Fixture {
            _dir: dir,
            lifecycle,
            alice,
            bob,
            admin,
        }
    }

    fn active_count(f: &Fixture, owner_id: i64) -> usize {
        f.lifecycle
            .list(Actor::admin(f.admin.id), &OrderQuery {
                owner_id: Some(owner_id),
                ..Default::default()
            })
            .unwrap()
            .orders
            .iter()
            .filter(|o| o.is_active)
            .count()
    }

    #[test]
    fn test_create_activates_new_and_deactivates_prior() {
        let f = fixture();
        let first = f.lifecycle.create(f.alice.id, Some(" first ")).unwrap();
        assert_eq!(first.state, LifecycleState::Created);
        assert!(first.order.is_active);
        assert_eq!(first.order.state(), LifecycleState::Active);
        assert_eq!(first.order.status, OrderStatus::Pending);
        assert_eq!(first.order.note.as_deref(), Some("first"));
        assert!(first.previous.is_none());

        let second = f.lifecycle.create(f.alice.id, None).unwrap();
        assert_eq!(second.previous.as_deref(), Some(first.order.order_number.as_str()));
        assert!(!f.lifecycle.order(&first.order.order_number).unwrap().is_active);
        assert_eq!(active_count(&f, f.alice.id), 1);
    }

    #[test]
    fn test_create_for_unknown_owner() {
        let f = fixture();
        assert!(matches!(
            f.lifecycle.create(9999, None),
            Err(OrderError::NotFound { kind: "User", .. })
        ));
    }

    #[test]
    fn test_duplicate_username_is_conflict() {
        let f = fixture();
        assert!(matches!(
            f.lifecycle.create_user("alice", true),
            Err(OrderError::IntegrityConflict(_))
        ));
    }

    #[test]
    fn test_owner_activation_switches_pointer() {
        let f = fixture();
        let o1 = f.lifecycle.create(f.alice.id, None).unwrap().order;
        let o2 = f.lifecycle.create(f.alice.id, None).unwrap().order;

        let report = f
            .lifecycle
            .activate(&o1.order_number, Actor::user(f.alice.id))
            .unwrap();
        assert_eq!(report.policy, ActivationPolicy::Owner);
        assert!(!report.is_cross_user());
        assert!(report.order.is_active);
        assert!(!f.lifecycle.order(&o2.order_number).unwrap().is_active);
        assert_eq!(active_count(&f, f.alice.id), 1);
    }

    #[test]
    fn test_stranger_cannot_activate() {
        let f = fixture();
        let o1 = f.lifecycle.create(f.alice.id, None).unwrap().order;
        let result = f.lifecycle.activate(&o1.order_number, Actor::user(f.bob.id));
        assert!(matches!(
            result,
            Err(OrderError::Unauthorized { action: "activate", .. })
        ));
    }

    #[test]
    fn test_actor_admin_flag_comes_from_storage() {
        let f = fixture();
        let o1 = f.lifecycle.create(f.alice.id, None).unwrap().order;
        // Bob claims to be an admin; storage says otherwise.
        let result = f.lifecycle.activate(&o1.order_number, Actor::admin(f.bob.id));
        assert!(matches!(result, Err(OrderError::Unauthorized { .. })));
    }

    #[test]
    fn test_admin_cross_activation_keeps_owner_pointer() {
        let f = fixture();
        let admin_order = f.lifecycle.create(f.admin.id, None).unwrap().order;
        let a1 = f.lifecycle.create(f.alice.id, None).unwrap().order;
        let a2 = f.lifecycle.create(f.alice.id, None).unwrap().order;

        let report = f
            .lifecycle
            .activate(&a1.order_number, Actor::admin(f.admin.id))
            .unwrap();
        assert_eq!(report.policy, ActivationPolicy::AdminCrossUser);
        assert!(report.is_cross_user());
        // The owner's view of the order is unchanged.
        assert!(!report.order.is_active);

        let admin = f.lifecycle.user(f.admin.id).unwrap();
        assert_eq!(admin.active_order_id, None);
        assert_eq!(admin.cross_active_order_id, Some(a1.id));
        assert!(!f.lifecycle.order(&admin_order.order_number).unwrap().is_active);
        // Alice's own active order is untouched.
        assert!(f.lifecycle.order(&a2.order_number).unwrap().is_active);
        assert_eq!(
            f.lifecycle.working_order(f.admin.id).unwrap().unwrap().id,
            a1.id
        );

        // A second cross activation replaces the single pointer.
        let b1 = f.lifecycle.create(f.bob.id, None).unwrap().order;
        f.lifecycle
            .activate(&b1.order_number, Actor::admin(f.admin.id))
            .unwrap();
        let admin = f.lifecycle.user(f.admin.id).unwrap();
        assert_eq!(admin.cross_active_order_id, Some(b1.id));

        // Activating their own order clears it.
        let report = f
            .lifecycle
            .activate(&admin_order.order_number, Actor::admin(f.admin.id))
            .unwrap();
        assert_eq!(report.policy, ActivationPolicy::AdminOwn);
        let admin = f.lifecycle.user(f.admin.id).unwrap();
        assert_eq!(admin.cross_active_order_id, None);
        assert_eq!(admin.active_order_id, Some(admin_order.id));
    }

    #[test]
    fn test_update_status_validation() {
        let f = fixture();
        let o1 = f.lifecycle.create(f.alice.id, None).unwrap().order;

        let updated = f
            .lifecycle
            .update_status(&o1.order_number, "reviewed", Actor::user(f.alice.id))
            .unwrap();
        assert_eq!(updated.status, OrderStatus::Reviewed);

        assert!(matches!(
            f.lifecycle
                .update_status(&o1.order_number, "archived", Actor::user(f.alice.id)),
            Err(OrderError::InvalidStatus(_))
        ));
        assert!(matches!(
            f.lifecycle
                .update_status(&o1.order_number, "material", Actor::user(f.bob.id)),
            Err(OrderError::Unauthorized { .. })
        ));
        assert!(f
            .lifecycle
            .update_status(&o1.order_number, "material", Actor::admin(f.admin.id))
            .is_ok());
    }

    #[test]
    fn test_update_note_blank_clears() {
        let f = fixture();
        let o1 = f.lifecycle.create(f.alice.id, Some("x")).unwrap().order;
        let updated = f
            .lifecycle
            .update_note(&o1.order_number, Some("   "), Actor::user(f.alice.id))
            .unwrap();
        assert_eq!(updated.note, None);
    }

    #[test]
    fn test_delete_guard_and_authorization() {
        let f = fixture();
        let o1 = f.lifecycle.create(f.alice.id, None).unwrap().order;

        assert!(matches!(
            f.lifecycle.delete(&o1.order_number, Actor::user(f.alice.id)),
            Err(OrderError::Unauthorized { action: "delete", .. })
        ));
        assert!(matches!(
            f.lifecycle.delete(&o1.order_number, Actor::admin(f.admin.id)),
            Err(OrderError::IntegrityConflict(_))
        ));
        assert!(f.lifecycle.order(&o1.order_number).is_ok());

        let o2 = f.lifecycle.create(f.alice.id, None).unwrap().order;
        let report = f
            .lifecycle
            .delete(&o1.order_number, Actor::admin(f.admin.id))
            .unwrap();
        assert_eq!(report.state, LifecycleState::Deleted);
        assert!(matches!(
            f.lifecycle.order(&o1.order_number),
            Err(OrderError::NotFound { .. })
        ));
        assert!(f.lifecycle.order(&o2.order_number).unwrap().is_active);
    }

    #[test]
    fn test_transfer_deactivates_and_appends_note() {
        let f = fixture();
        let o1 = f.lifecycle.create(f.alice.id, Some("rush")).unwrap().order;

        assert!(matches!(
            f.lifecycle
                .transfer(&o1.order_number, f.bob.id, Actor::user(f.alice.id), None),
            Err(OrderError::Unauthorized { .. })
        ));

        let report = f
            .lifecycle
            .transfer(&o1.order_number, f.bob.id, Actor::admin(f.admin.id), Some("handover"))
            .unwrap();
        assert!(report.was_active);
        assert_eq!(report.order.owner_id, f.bob.id);
        assert!(!report.order.is_active);
        assert_eq!(
            report.order.note.as_deref(),
            Some("rush [transferred from alice to bob: handover]")
        );
        assert_eq!(f.lifecycle.user(f.alice.id).unwrap().active_order_id, None);
        assert!(f.lifecycle.active_order(f.bob.id).unwrap().is_none());

        assert!(matches!(
            f.lifecycle
                .transfer(&o1.order_number, 4242, Actor::admin(f.admin.id), None),
            Err(OrderError::NotFound { kind: "User", .. })
        ));
    }

    #[test]
    fn test_list_scopes_non_admins() {
        let f = fixture();
        f.lifecycle.create(f.alice.id, None).unwrap();
        f.lifecycle.create(f.alice.id, None).unwrap();
        f.lifecycle.create(f.bob.id, None).unwrap();

        let mine = f
            .lifecycle
            .list(Actor::user(f.bob.id), &OrderQuery {
                owner_id: Some(f.alice.id),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(mine.total, 1);

        let all = f
            .lifecycle
            .list(Actor::admin(f.admin.id), &OrderQuery::default())
            .unwrap();
        assert_eq!(all.total, 3);

        let pending = f
            .lifecycle
            .list(Actor::admin(f.admin.id), &OrderQuery {
                status: Some(OrderStatus::Reviewed),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(pending.total, 0);
    }

    #[test]
    fn test_summary_requires_access() {
        let f = fixture();
        let o1 = f.lifecycle.create(f.alice.id, None).unwrap().order;
        let summary = f
            .lifecycle
            .summary(&o1.order_number, Actor::user(f.alice.id))
            .unwrap();
        assert!(summary.uploads.is_empty());
        assert!(matches!(
            f.lifecycle.summary(&o1.order_number, Actor::user(f.bob.id)),
            Err(OrderError::Unauthorized { action: "view", .. })
        ));
    }
}
