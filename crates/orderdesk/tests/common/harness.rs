//! Test harness for isolated test execution.
//!
//! The `TestHarness` owns a temporary directory holding the archive root and
//! the work root, plus an `OrderDesk` over an in-memory database wired to a
//! `StubConverter`.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use tempfile::TempDir;

use orderdesk::db::file_repo::UploadedFileRow;
use orderdesk::hashing::{hash_bytes, hash_file};
use orderdesk::{Actor, Config, Database, Namespace, Order, OrderDesk, User};

use super::StubConverter;

pub struct TestHarness {
    temp_dir: TempDir,
    pub archive_root: PathBuf,
    pub work_root: PathBuf,
    pub desk: OrderDesk,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_converter(StubConverter::new(2))
    }

    pub fn with_converter(converter: StubConverter) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let archive_root = temp_dir.path().join("archive");
        let work_root = temp_dir.path().join("work");

        let config = Config::new(&archive_root, &work_root);
        let db = Database::open_in_memory().expect("Failed to open in-memory database");
        let desk = OrderDesk::with_converter(config, db, Box::new(converter))
            .expect("Failed to open order desk");

        Self {
            temp_dir,
            archive_root,
            work_root,
            desk,
        }
    }

    pub fn root(&self) -> &std::path::Path {
        self.temp_dir.path()
    }

    pub fn user(&self, name: &str) -> User {
        self.desk
            .orders()
            .create_user(name, false)
            .expect("Failed to create user")
    }

    pub fn admin(&self, name: &str) -> User {
        self.desk
            .orders()
            .create_user(name, true)
            .expect("Failed to create admin")
    }

    /// Creates a new order for `owner` and returns it as stored.
    pub fn create_order(&self, owner: &User) -> Order {
        self.desk
            .orders()
            .create(owner.id, None)
            .expect("Failed to create order")
            .order
    }

    pub fn upload(&self, order: &Order, owner: &User, name: &str, content: &[u8]) -> UploadedFileRow {
        self.desk
            .files()
            .upload_bytes(&order.order_number, Actor::from(owner), name, content)
            .expect("Failed to upload")
            .file
    }

    /// Re-reads an order by number.
    pub fn reload(&self, order: &Order) -> Order {
        self.desk
            .orders()
            .order(&order.order_number)
            .expect("Order not found")
    }

    /// Workspace contents as filename -> content hash.
    pub fn workspace_files(&self, namespace: Namespace) -> BTreeMap<String, String> {
        let guard = self.desk.workspace().lock().expect("Workspace lock poisoned");
        guard
            .files(namespace)
            .expect("Failed to list workspace")
            .into_iter()
            .map(|path| {
                let name = path
                    .file_name()
                    .expect("file name")
                    .to_string_lossy()
                    .into_owned();
                let hash = hash_file(&path).expect("Failed to hash");
                (name, hash.into_string())
            })
            .collect()
    }

    /// Hashes present in the workspace uploads directory.
    pub fn workspace_upload_hashes(&self) -> Vec<String> {
        let mut hashes: Vec<String> = self
            .workspace_files(Namespace::Uploads)
            .into_values()
            .collect();
        hashes.sort();
        hashes
    }

    pub fn archive_path(&self, order: &Order, namespace: Namespace, filename: &str) -> PathBuf {
        self.desk
            .archive()
            .path_for(namespace, &order.order_number, filename)
            .expect("Invalid archive path")
    }
}

/// SHA-256 hex of `content`.
pub fn hash_of(content: &[u8]) -> String {
    hash_bytes(content).into_string()
}
