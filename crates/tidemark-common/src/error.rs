use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("definition error: {0}")]
    Definition(String),

    #[error("no implementation for engine {0}")]
    UnsupportedEngine(String),

    #[error("missing {0} implementation")]
    MissingImplementation(String),

    #[error("migration {0} already applied")]
    AlreadyApplied(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("procedure error: {0}")]
    Procedure(String),

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("executor error: {0}")]
    Executor(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}
