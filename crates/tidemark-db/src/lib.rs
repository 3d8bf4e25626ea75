pub mod connection;
pub mod ledger;
pub mod sqlite;

pub use connection::{Connection, Row, SqlExecutor, SqlValue, Transaction};
pub use ledger::{DEFAULT_LEDGER_TABLE, Ledger, LedgerRecord};
pub use sqlite::SqliteConnection;
