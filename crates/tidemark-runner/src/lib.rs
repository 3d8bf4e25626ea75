pub mod catalog;
pub mod executor;
pub mod report;
pub mod retry;
pub mod runner;
pub mod traits;

pub use catalog::{Source, StaticCatalog};
pub use executor::{LocalExecutor, SharedConnection, share};
pub use report::{MigrationOutcome, MigrationState, RunReport, RunStatus, StatusReport};
pub use retry::{RetryPolicy, connect_with_retry};
pub use runner::{
    REASON_NOT_ALLOWED, RollbackOptions, RunNextOptions, RunOptions, Runner, StatusOptions,
};
pub use traits::{CallOptions, Catalog, CatalogEntry, MigrationExecutor};
