use tidemark_common::{EngineKind, Error, Result};

/// A bound parameter or a column value read back from the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Real(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// One result row, columns in select order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row(pub Vec<SqlValue>);

impl Row {
    pub fn get(&self, idx: usize) -> Option<&SqlValue> {
        self.0.get(idx)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Read a nullable text column.
    pub fn text(&self, idx: usize) -> Result<Option<String>> {
        match self.0.get(idx) {
            Some(SqlValue::Text(s)) => Ok(Some(s.clone())),
            Some(SqlValue::Null) => Ok(None),
            Some(SqlValue::Integer(i)) => Ok(Some(i.to_string())),
            Some(SqlValue::Real(r)) => Ok(Some(r.to_string())),
            Some(SqlValue::Blob(_)) => Err(Error::Database(format!(
                "column {idx} is a blob, expected text"
            ))),
            None => Err(Error::Database(format!("column {idx} out of range"))),
        }
    }

    /// Read a nullable integer column.
    pub fn integer(&self, idx: usize) -> Result<Option<i64>> {
        match self.0.get(idx) {
            Some(SqlValue::Integer(i)) => Ok(Some(*i)),
            Some(SqlValue::Null) => Ok(None),
            Some(SqlValue::Text(s)) => s
                .parse()
                .map(Some)
                .map_err(|e| Error::Database(format!("column {idx} is not an integer: {e}"))),
            Some(other) => Err(Error::Database(format!(
                "column {idx} is not an integer: {other:?}"
            ))),
            None => Err(Error::Database(format!("column {idx} out of range"))),
        }
    }
}

/// Statement execution shared by connections and open transactions.
pub trait SqlExecutor {
    fn engine(&self) -> EngineKind;

    /// Execute one statement, returning the number of affected rows.
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<usize>;

    /// Execute several `;`-separated statements without parameters.
    fn execute_batch(&mut self, sql: &str) -> Result<()>;

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>>;
}

/// An open transaction. Dropping it without `commit` rolls it back.
pub trait Transaction: SqlExecutor {
    fn commit(self: Box<Self>) -> Result<()>;

    fn rollback(self: Box<Self>) -> Result<()>;

    /// View the transaction as a plain executor for user procedures.
    fn as_executor(&mut self) -> &mut dyn SqlExecutor;
}

/// A connection to one target database.
pub trait Connection: SqlExecutor + Send {
    fn begin(&mut self) -> Result<Box<dyn Transaction + '_>>;

    /// Cheap liveness probe used while waiting for a target to come up.
    fn ping(&mut self) -> Result<()> {
        self.query("SELECT 1", &[]).map(|_| ())
    }
}
