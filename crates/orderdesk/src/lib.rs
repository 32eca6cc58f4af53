pub mod config;
pub mod convert;
pub mod db;
pub mod desk;
pub mod error;
pub mod files;
pub mod hashing;
pub mod logging;
pub mod order;
pub mod reconcile;
pub mod sanitize;
pub mod storage;
pub mod workspace;

pub use config::{load_config, Config};
pub use convert::{ConversionRequest, DocumentConverter, HttpConverter};
pub use db::Database;
pub use desk::OrderDesk;
pub use error::{ConfigError, ConversionError, OrderError, Result, StorageError};
pub use files::{FileIntake, FileType};
pub use hashing::ContentHash;
pub use order::{
    Actor, Completion, LifecycleState, MergeEngine, MergeReport, Order, OrderLifecycle,
    OrderStatus, Tally, User,
};
pub use reconcile::{ReconcileReport, Reconciler};
pub use storage::{ArchiveStore, Namespace};
pub use workspace::Workspace;
