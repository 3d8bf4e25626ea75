use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tidemark_common::{Error, Result};
use tidemark_db::{Connection, Ledger};
use tidemark_engine::{ExecuteOptions, ExecutionResult, execute};
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::catalog::StaticCatalog;
use crate::traits::{CallOptions, MigrationExecutor};

/// A connection shared between the runner and the executor.
pub type SharedConnection = Arc<Mutex<Box<dyn Connection>>>;

pub fn share(conn: Box<dyn Connection>) -> SharedConnection {
    Arc::new(Mutex::new(conn))
}

/// Executes migrations from a [`StaticCatalog`] in-process.
///
/// Each call runs on the blocking pool, so a panic that escapes the engine
/// is reported as an executor error instead of taking the runner down.
pub struct LocalExecutor {
    catalog: Arc<StaticCatalog>,
    targets: HashMap<String, SharedConnection>,
    ledger: Ledger,
}

impl LocalExecutor {
    pub fn new(catalog: Arc<StaticCatalog>, ledger: Ledger) -> Self {
        Self {
            catalog,
            targets: HashMap::new(),
            ledger,
        }
    }

    pub fn with_target(mut self, database_id: impl Into<String>, conn: SharedConnection) -> Self {
        self.targets.insert(database_id.into(), conn);
        self
    }
}

#[async_trait]
impl MigrationExecutor for LocalExecutor {
    async fn call(&self, migration_id: &str, options: CallOptions) -> Result<ExecutionResult> {
        if self.catalog.migration(migration_id).is_none() {
            return Err(Error::NotFound(format!("migration {migration_id}")));
        }
        let conn = self
            .targets
            .get(&options.database_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("database target {}", options.database_id)))?;

        debug!(
            "invoking {migration_id} {} on {}",
            options.direction, options.database_id
        );

        let catalog = Arc::clone(&self.catalog);
        let ledger = self.ledger.clone();
        let id = migration_id.to_string();
        let handle = tokio::task::spawn_blocking(move || -> Result<ExecutionResult> {
            let migration = catalog
                .migration(&id)
                .ok_or_else(|| Error::NotFound(format!("migration {id}")))?;
            let mut guard = conn.blocking_lock();
            let exec_options = ExecuteOptions {
                force: options.force,
                id: options.id,
            };
            Ok(execute(
                &mut **guard,
                &ledger,
                migration,
                options.direction,
                &exec_options,
            ))
        });

        match handle.await {
            Ok(result) => result,
            Err(e) => {
                error!("executor task for {migration_id} failed: {e}");
                Err(Error::Executor(format!("invocation of {migration_id} failed: {e}")))
            }
        }
    }
}
