pub mod error;
pub mod types;
pub mod validation;

pub use error::{Error, Result};
pub use types::{Direction, EngineKind};
pub use validation::{MAX_MIGRATION_ID_LEN, validate_migration_id, validate_sql_identifier};
