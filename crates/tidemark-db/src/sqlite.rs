use std::path::Path;

use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{ToSql, TransactionBehavior, params_from_iter};
use tidemark_common::{EngineKind, Error, Result};
use tracing::{debug, info};

use crate::connection::{Connection, Row, SqlExecutor, SqlValue, Transaction};

/// SQLite connection backed by rusqlite.
pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

/// An open SQLite transaction; rolls back on drop unless committed.
pub struct SqliteTransaction<'c> {
    tx: rusqlite::Transaction<'c>,
}

impl SqliteConnection {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening sqlite target at {}", db_path.display());
        let conn = rusqlite::Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        Ok(Self { conn })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        Ok(Self { conn })
    }
}

impl SqlExecutor for SqliteConnection {
    fn engine(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<usize> {
        execute(&self.conn, sql, params)
    }

    fn execute_batch(&mut self, sql: &str) -> Result<()> {
        execute_batch(&self.conn, sql)
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        query(&self.conn, sql, params)
    }
}

impl Connection for SqliteConnection {
    fn begin(&mut self) -> Result<Box<dyn Transaction + '_>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| Error::Transaction(format!("failed to begin transaction: {e}")))?;
        debug!("sqlite transaction opened");
        Ok(Box::new(SqliteTransaction { tx }))
    }
}

impl SqlExecutor for SqliteTransaction<'_> {
    fn engine(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<usize> {
        execute(&self.tx, sql, params)
    }

    fn execute_batch(&mut self, sql: &str) -> Result<()> {
        execute_batch(&self.tx, sql)
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        query(&self.tx, sql, params)
    }
}

impl Transaction for SqliteTransaction<'_> {
    fn commit(self: Box<Self>) -> Result<()> {
        self.tx
            .commit()
            .map_err(|e| Error::Transaction(format!("failed to commit: {e}")))
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        self.tx
            .rollback()
            .map_err(|e| Error::Transaction(format!("failed to roll back: {e}")))
    }

    fn as_executor(&mut self) -> &mut dyn SqlExecutor {
        self
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            SqlValue::Real(r) => ToSqlOutput::Owned(Value::Real(*r)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

fn execute(conn: &rusqlite::Connection, sql: &str, params: &[SqlValue]) -> Result<usize> {
    conn.execute(sql, params_from_iter(params.iter()))
        .map_err(|e| Error::Database(format!("failed to execute statement: {e}")))
}

fn execute_batch(conn: &rusqlite::Connection, sql: &str) -> Result<()> {
    conn.execute_batch(sql)
        .map_err(|e| Error::Database(format!("failed to execute batch: {e}")))
}

fn query(conn: &rusqlite::Connection, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;
    let columns = stmt.column_count();

    let rows = stmt
        .query_map(params_from_iter(params.iter()), |row| {
            let mut values = Vec::with_capacity(columns);
            for idx in 0..columns {
                values.push(from_value_ref(row.get_ref(idx)?));
            }
            Ok(Row(values))
        })
        .map_err(|e| Error::Database(format!("failed to run query: {e}")))?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|e| Error::Database(format!("failed to read row: {e}")))?);
    }
    Ok(out)
}

fn from_value_ref(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Integer(i),
        ValueRef::Real(r) => SqlValue::Real(r),
        ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
    }
}
