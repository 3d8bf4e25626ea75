//! The ledger table records which migrations have been applied to a target.
//!
//! Every operation takes the executor to run on, so the same ledger can be
//! consulted on a bare connection or inside the transaction that applies a
//! migration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tidemark_common::{EngineKind, Error, Result, validate_migration_id, validate_sql_identifier};
use tracing::{debug, info};

use crate::connection::{Row, SqlExecutor, SqlValue};

pub const DEFAULT_LEDGER_TABLE: &str = "_migrations";

/// One applied migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub id: String,
    pub applied_at: DateTime<Utc>,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct Ledger {
    table: String,
}

impl Default for Ledger {
    fn default() -> Self {
        Self {
            table: DEFAULT_LEDGER_TABLE.to_string(),
        }
    }
}

impl Ledger {
    pub fn new(table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        validate_sql_identifier(&table)?;
        Ok(Self { table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the ledger table unless it already exists.
    pub fn ensure_table<E: SqlExecutor + ?Sized>(&self, db: &mut E) -> Result<()> {
        if self.exists(db)? {
            debug!("ledger table {} already present", self.table);
            return Ok(());
        }

        let engine = db.engine();
        match db.execute_batch(&self.create_sql(engine)) {
            Ok(()) => {
                info!("created ledger table {} ({engine})", self.table);
                Ok(())
            }
            // Another process may have created it between the check and here.
            Err(e) if e.to_string().contains("already exists") => {
                debug!("ledger table {} created concurrently", self.table);
                Ok(())
            }
            Err(e) => Err(Error::Ledger(format!("failed to create ledger table: {e}"))),
        }
    }

    pub fn exists<E: SqlExecutor + ?Sized>(&self, db: &mut E) -> Result<bool> {
        let rows = db
            .query(exists_sql(db.engine()), &[self.table.as_str().into()])
            .map_err(|e| Error::Ledger(format!("failed to check ledger table: {e}")))?;
        Ok(!rows.is_empty())
    }

    pub fn record<E: SqlExecutor + ?Sized>(&self, db: &mut E, id: &str, description: &str) -> Result<()> {
        validate_migration_id(id)?;
        let sql = format!(
            "INSERT INTO {} (id, description) VALUES ({}, {})",
            self.table,
            placeholder(db.engine(), 1),
            placeholder(db.engine(), 2)
        );
        db.execute(&sql, &[id.into(), description.into()])
            .map_err(|e| Error::Ledger(format!("failed to record migration {id}: {e}")))?;
        Ok(())
    }

    pub fn remove<E: SqlExecutor + ?Sized>(&self, db: &mut E, id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(Error::Validation("migration id cannot be empty".into()));
        }
        let sql = format!(
            "DELETE FROM {} WHERE id = {}",
            self.table,
            placeholder(db.engine(), 1)
        );
        let affected = db
            .execute(&sql, &[id.into()])
            .map_err(|e| Error::Ledger(format!("failed to remove migration {id}: {e}")))?;
        if affected == 0 {
            debug!("ledger had no row for {id}");
        }
        Ok(())
    }

    /// Applied migrations in ascending `applied_at` order.
    pub fn query<E: SqlExecutor + ?Sized>(&self, db: &mut E, id: Option<&str>) -> Result<Vec<LedgerRecord>> {
        let engine = db.engine();
        let mut sql = format!(
            "SELECT id, {} AS applied_at, description FROM {}",
            applied_at_expr(engine),
            self.table
        );
        let mut params: Vec<SqlValue> = Vec::new();
        if let Some(id) = id {
            sql.push_str(&format!(" WHERE id = {}", placeholder(engine, 1)));
            params.push(id.into());
        }
        sql.push_str(" ORDER BY applied_at ASC");

        let rows = db
            .query(&sql, &params)
            .map_err(|e| Error::Ledger(format!("failed to query ledger: {e}")))?;
        rows.iter().map(record_from_row).collect()
    }

    pub fn is_applied<E: SqlExecutor + ?Sized>(&self, db: &mut E, id: &str) -> Result<bool> {
        let sql = format!(
            "SELECT 1 FROM {} WHERE id = {}",
            self.table,
            placeholder(db.engine(), 1)
        );
        let rows = db
            .query(&sql, &[id.into()])
            .map_err(|e| Error::Ledger(format!("failed to check migration {id}: {e}")))?;
        Ok(!rows.is_empty())
    }

    fn create_sql(&self, engine: EngineKind) -> String {
        match engine {
            EngineKind::Sqlite => format!(
                "CREATE TABLE {} (
                    id VARCHAR(512) PRIMARY KEY NOT NULL,
                    applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                    description TEXT
                )",
                self.table
            ),
            EngineKind::Postgres => format!(
                "CREATE TABLE {} (
                    id VARCHAR(512) PRIMARY KEY,
                    applied_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                    description TEXT
                )",
                self.table
            ),
            EngineKind::Mysql => format!(
                "CREATE TABLE {} (
                    id VARCHAR(512) PRIMARY KEY,
                    applied_at TIMESTAMP(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6),
                    description TEXT
                )",
                self.table
            ),
        }
    }
}

fn exists_sql(engine: EngineKind) -> &'static str {
    match engine {
        EngineKind::Sqlite => "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
        EngineKind::Postgres => {
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = $1"
        }
        EngineKind::Mysql => {
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = DATABASE() AND table_name = ?"
        }
    }
}

fn placeholder(engine: EngineKind, n: usize) -> String {
    match engine {
        EngineKind::Sqlite => format!("?{n}"),
        EngineKind::Postgres => format!("${n}"),
        EngineKind::Mysql => "?".to_string(),
    }
}

// Timestamps are read back as UTC text so every driver yields the same shape.
fn applied_at_expr(engine: EngineKind) -> &'static str {
    match engine {
        EngineKind::Sqlite => "applied_at",
        EngineKind::Postgres => {
            "to_char(applied_at AT TIME ZONE 'UTC', 'YYYY-MM-DD\"T\"HH24:MI:SS.US\"Z\"')"
        }
        EngineKind::Mysql => "DATE_FORMAT(applied_at, '%Y-%m-%dT%H:%i:%s.%fZ')",
    }
}

fn record_from_row(row: &Row) -> Result<LedgerRecord> {
    let id = row
        .text(0)?
        .ok_or_else(|| Error::Ledger("ledger row without id".into()))?;
    let applied_at = row
        .text(1)?
        .ok_or_else(|| Error::Ledger(format!("ledger row {id} without applied_at")))?;
    Ok(LedgerRecord {
        applied_at: parse_datetime(&applied_at)
            .ok_or_else(|| Error::Ledger(format!("unreadable applied_at for {id}: {applied_at}")))?,
        description: row.text(2)?.unwrap_or_default(),
        id,
    })
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            // SQLite CURRENT_TIMESTAMP produces "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                .map(|naive| naive.and_utc())
                .ok()
        })
}
