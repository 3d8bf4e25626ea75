use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Outcome of executing one migration in one direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    Applied {
        description: String,
        duration_ms: u64,
    },
    Reverted {
        description: String,
        duration_ms: u64,
    },
    Skipped {
        description: String,
        reason: String,
        duration_ms: u64,
    },
    Error {
        description: String,
        error: String,
        duration_ms: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Applied,
    Reverted,
    Skipped,
    Error,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Applied => "applied",
            ExecutionStatus::Reverted => "reverted",
            ExecutionStatus::Skipped => "skipped",
            ExecutionStatus::Error => "error",
        }
    }
}

impl ExecutionResult {
    pub fn skipped(
        description: impl Into<String>,
        reason: impl Into<String>,
        started: Instant,
    ) -> Self {
        ExecutionResult::Skipped {
            description: description.into(),
            reason: reason.into(),
            duration_ms: elapsed_ms(started),
        }
    }

    pub fn error(description: impl Into<String>, error: impl ToString, started: Instant) -> Self {
        ExecutionResult::Error {
            description: description.into(),
            error: error.to_string(),
            duration_ms: elapsed_ms(started),
        }
    }

    pub fn status(&self) -> ExecutionStatus {
        match self {
            ExecutionResult::Applied { .. } => ExecutionStatus::Applied,
            ExecutionResult::Reverted { .. } => ExecutionStatus::Reverted,
            ExecutionResult::Skipped { .. } => ExecutionStatus::Skipped,
            ExecutionResult::Error { .. } => ExecutionStatus::Error,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            ExecutionResult::Applied { description, .. }
            | ExecutionResult::Reverted { description, .. }
            | ExecutionResult::Skipped { description, .. }
            | ExecutionResult::Error { description, .. } => description,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        match self {
            ExecutionResult::Applied { duration_ms, .. }
            | ExecutionResult::Reverted { duration_ms, .. }
            | ExecutionResult::Skipped { duration_ms, .. }
            | ExecutionResult::Error { duration_ms, .. } => *duration_ms,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            ExecutionResult::Skipped { reason, .. } => Some(reason),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ExecutionResult::Error { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ExecutionResult::Error { .. })
    }
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
