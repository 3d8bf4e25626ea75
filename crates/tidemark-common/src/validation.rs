use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

static SQL_IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Upper bound on a migration id, matching the ledger's primary key column.
pub const MAX_MIGRATION_ID_LEN: usize = 512;

/// Validate that a migration id is well-formed before it reaches storage.
pub fn validate_migration_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::Validation("migration id cannot be empty".into()));
    }
    let len = id.chars().count();
    if len > MAX_MIGRATION_ID_LEN {
        return Err(Error::Validation(format!(
            "migration id too long ({len} > {MAX_MIGRATION_ID_LEN} characters)"
        )));
    }
    Ok(())
}

/// Validate an identifier that is spliced into SQL, such as the ledger table name.
pub fn validate_sql_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Validation("identifier cannot be empty".into()));
    }
    if name.len() > 63 {
        return Err(Error::Validation(format!("identifier too long: {name}")));
    }
    if !SQL_IDENTIFIER.is_match(name) {
        return Err(Error::Validation(format!(
            "identifier must match [A-Za-z_][A-Za-z0-9_]*: {name}"
        )));
    }
    Ok(())
}
