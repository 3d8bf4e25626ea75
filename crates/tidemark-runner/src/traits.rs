use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tidemark_common::{Direction, Result};
use tidemark_engine::ExecutionResult;

/// Metadata for one discoverable migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub description: String,
    pub tags: Vec<String>,
    /// Authoring time; pending migrations run in this order.
    pub timestamp: DateTime<Utc>,
}

/// Locates migration definitions for a target.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Entries for `target` carrying every tag in `tags`, in authoring order:
    /// by timestamp, then by declaration order.
    async fn find(&self, target: &str, tags: &[String]) -> Result<Vec<CatalogEntry>>;

    async fn get(&self, id: &str) -> Result<Option<CatalogEntry>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallOptions {
    pub database_id: String,
    pub direction: Direction,
    /// Ledger key override.
    pub id: Option<String>,
    pub force: bool,
}

/// Runs one migration behind an isolation boundary.
///
/// `Ok` carries the migration's own outcome, which may itself be an error
/// result. `Err` means the invocation could not be made at all.
#[async_trait]
pub trait MigrationExecutor: Send + Sync {
    async fn call(&self, migration_id: &str, options: CallOptions) -> Result<ExecutionResult>;
}
