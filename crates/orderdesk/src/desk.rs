//! `OrderDesk` wires the engine together from a `Config`.

use std::sync::Arc;

use crate::config::{validate_config, Config};
use crate::convert::{DocumentConverter, HttpConverter};
use crate::db::Database;
use crate::error::{ConfigError, Result};
use crate::files::{ConversionReport, FileIntake};
use crate::order::{Actor, MergeEngine, OrderLifecycle};
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::storage::{filesystem, ArchiveStore};
use crate::workspace::Workspace;

/// One archive, one workspace pair and one metadata store.
pub struct OrderDesk {
    config: Config,
    db: Database,
    store: ArchiveStore,
    workspace: Arc<Workspace>,
    lifecycle: OrderLifecycle,
    merger: MergeEngine,
    intake: FileIntake,
    converter: Box<dyn DocumentConverter>,
}

impl OrderDesk {
    /// Validates `config`, creates the archive and workspace directories and
    /// opens (migrating) the database.
    pub fn open(config: Config) -> Result<Self> {
        validate_config(&config)?;
        let db_path = config
            .resolved_database_path()
            .ok_or_else(|| ConfigError::Validation {
                message: "database_path is not set and no home directory is available".to_string(),
            })?;
        let db = Database::open(&db_path)?;
        Self::with_database(config, db)
    }

    /// Like [`OrderDesk::open`] with an already-open database.
    pub fn with_database(config: Config, db: Database) -> Result<Self> {
        let converter = HttpConverter::new(&config.conversion)?;
        Self::with_converter(config, db, Box::new(converter))
    }

    pub fn with_converter(
        config: Config,
        db: Database,
        converter: Box<dyn DocumentConverter>,
    ) -> Result<Self> {
        validate_config(&config)?;
        filesystem::ensure_directory(&config.archive_root)?;

        let store = ArchiveStore::new(&config.archive_root);
        let workspace = Arc::new(Workspace::from_config(&config));
        workspace.ensure_dirs()?;

        let lifecycle = OrderLifecycle::new(db.clone(), store.clone(), workspace.clone());
        let merger = MergeEngine::new(db.clone(), store.clone(), workspace.clone());
        let intake = FileIntake::new(
            db.clone(),
            store.clone(),
            workspace.clone(),
            config.staging_dir(),
            config.conversion.dpi,
        );

        tracing::info!(
            archive = %config.archive_root.display(),
            work = %config.work_root.display(),
            converter = converter.endpoint(),
            "order desk ready"
        );

        Ok(Self {
            config,
            db,
            store,
            workspace,
            lifecycle,
            merger,
            intake,
            converter,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn archive(&self) -> &ArchiveStore {
        &self.store
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn orders(&self) -> &OrderLifecycle {
        &self.lifecycle
    }

    pub fn merger(&self) -> &MergeEngine {
        &self.merger
    }

    pub fn files(&self) -> &FileIntake {
        &self.intake
    }

    /// Converts an upload through the configured conversion service.
    pub fn convert(&self, upload_id: i64, actor: Actor) -> Result<ConversionReport> {
        self.intake.convert(self.converter.as_ref(), upload_id, actor)
    }

    /// Runs a reconciliation pass over the archive.
    pub fn reconcile(&self, discard_orphans: bool) -> Result<ReconcileReport> {
        Reconciler::new(self.db.clone(), self.store.clone()).run(discard_orphans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrderError;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_layout() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::new(dir.path().join("archive"), dir.path().join("work"));
        config.database_path = Some(dir.path().join("db/orderdesk.db"));

        let desk = OrderDesk::open(config).unwrap();
        assert!(dir.path().join("archive").is_dir());
        assert!(dir.path().join("work/uploads").is_dir());
        assert!(dir.path().join("work/converted").is_dir());
        assert!(dir.path().join("db/orderdesk.db").is_file());
        assert!(desk.orders().users().unwrap().is_empty());
    }

    #[test]
    fn test_open_rejects_nested_roots() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::new(dir.path().join("data"), dir.path().join("data/work"));
        config.database_path = Some(dir.path().join("orderdesk.db"));
        assert!(matches!(
            OrderDesk::open(config),
            Err(OrderError::Config(ConfigError::Validation { .. }))
        ));
    }
}
