//! Integration tests for deleting orders, removing files and transfers.

mod common;

use common::harness::hash_of;
use common::TestHarness;
use orderdesk::{Actor, Completion, LifecycleState, Namespace, OrderError};

#[test]
fn test_active_order_cannot_be_deleted() {
    let h = TestHarness::new();
    let u = h.user("ursula");
    let boss = h.admin("boss");
    let o1 = h.create_order(&u);
    let a = h.upload(&o1, &u, "a.pdf", b"alpha");

    let err = h.desk.orders().delete(&o1.order_number, Actor::from(&boss)).unwrap_err();
    assert!(matches!(err, OrderError::IntegrityConflict(_)));

    assert!(h.reload(&o1).is_active);
    assert!(h.archive_path(&o1, Namespace::Uploads, &a.filename).is_file());
    assert_eq!(h.workspace_upload_hashes(), vec![hash_of(b"alpha")]);
}

#[test]
fn test_delete_requires_admin() {
    let h = TestHarness::new();
    let u = h.user("ursula");
    let o1 = h.create_order(&u);
    h.create_order(&u);

    let err = h.desk.orders().delete(&o1.order_number, Actor::from(&u)).unwrap_err();
    assert!(matches!(err, OrderError::Unauthorized { action: "delete", .. }));
}

#[test]
fn test_delete_inactive_order_removes_records_and_files() {
    let h = TestHarness::new();
    let u = h.user("ursula");
    let boss = h.admin("boss");
    let o1 = h.create_order(&u);
    let a = h.upload(&o1, &u, "a.pdf", b"alpha");
    let b = h.upload(&o1, &u, "b.pdf", b"bravo");
    let o2 = h.create_order(&u);
    h.upload(&o2, &u, "c.pdf", b"charlie");

    let report = h.desk.orders().delete(&o1.order_number, Actor::from(&boss)).unwrap();
    assert_eq!(report.state, LifecycleState::Deleted);
    assert_eq!(report.files_removed, 2);
    assert_eq!(report.completion(), Completion::Complete);
    assert!(report.workspace_cleared.is_none());

    assert!(matches!(
        h.desk.orders().order(&o1.order_number),
        Err(OrderError::NotFound { .. })
    ));
    assert!(!h.archive_path(&o1, Namespace::Uploads, &a.filename).exists());
    assert!(!h.archive_path(&o1, Namespace::Uploads, &b.filename).exists());

    // The active order's workspace is not disturbed.
    assert_eq!(h.workspace_upload_hashes(), vec![hash_of(b"charlie")]);
}

#[test]
fn test_merged_order_survives_source_deletion() {
    let h = TestHarness::new();
    let u = h.user("ursula");
    let boss = h.admin("boss");
    let o1 = h.create_order(&u);
    h.upload(&o1, &u, "a.pdf", b"alpha");
    let o2 = h.create_order(&u);
    h.upload(&o2, &u, "b.pdf", b"bravo");
    h.create_order(&u);

    let sources = vec![o1.order_number.clone(), o2.order_number.clone()];
    let merged = h.desk.merger().merge(&sources, Actor::from(&u), None).unwrap().order;

    h.desk.orders().delete(&o1.order_number, Actor::from(&boss)).unwrap();

    let report = h.desk.orders().activate(&merged.order_number, Actor::from(&u)).unwrap();
    assert_eq!(report.completion(), Completion::Complete);
    let mut expected = vec![hash_of(b"alpha"), hash_of(b"bravo")];
    expected.sort();
    assert_eq!(h.workspace_upload_hashes(), expected);
}

#[test]
fn test_remove_upload_cascades_to_converted_pages() {
    let h = TestHarness::new();
    let u = h.user("ursula");
    let o1 = h.create_order(&u);
    let doc = h.upload(&o1, &u, "deck.pdf", b"%PDF deck");
    let keep = h.upload(&o1, &u, "keep.pdf", b"%PDF keep");
    h.desk.convert(doc.id, Actor::from(&u)).unwrap();
    assert_eq!(h.workspace_files(Namespace::Converted).len(), 2);

    let report = h.desk.files().remove_upload(doc.id, Actor::from(&u)).unwrap();
    assert_eq!(report.converted, 2);
    assert_eq!(report.files_removed, 3);
    assert!(report.failures.is_empty());

    let summary = h.desk.orders().summary(&o1.order_number, Actor::from(&u)).unwrap();
    assert_eq!(summary.uploads.len(), 1);
    assert_eq!(summary.uploads[0].id, keep.id);
    assert!(summary.converted.is_empty());
    assert!(h.workspace_files(Namespace::Converted).is_empty());
    assert_eq!(h.workspace_upload_hashes(), vec![hash_of(b"%PDF keep")]);
}

#[test]
fn test_transfer_hands_order_to_new_owner() {
    let h = TestHarness::new();
    let u = h.user("ursula");
    let v = h.user("viktor");
    let boss = h.admin("boss");
    let o1 = h.create_order(&u);
    h.upload(&o1, &u, "a.pdf", b"alpha");

    let report = h
        .desk
        .orders()
        .transfer(&o1.order_number, v.id, Actor::from(&boss), Some("handover"))
        .unwrap();
    assert!(report.was_active);
    assert_eq!(report.from, "ursula");
    assert_eq!(report.to, "viktor");
    assert_eq!(report.order.owner_id, v.id);
    assert!(!report.order.is_active);
    assert_eq!(
        report.order.note.as_deref(),
        Some("[transferred from ursula to viktor: handover]")
    );

    assert!(h.desk.orders().active_order(u.id).unwrap().is_none());
    h.desk.orders().activate(&o1.order_number, Actor::from(&v)).unwrap();
    assert_eq!(h.workspace_upload_hashes(), vec![hash_of(b"alpha")]);
}
