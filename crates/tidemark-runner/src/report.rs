use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tidemark_engine::{ExecutionResult, ExecutionStatus};

use crate::traits::CatalogEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Complete,
    Running,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Complete => "complete",
            RunStatus::Running => "running",
            RunStatus::Error => "error",
        }
    }
}

/// One line of a run or rollback report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationOutcome {
    pub id: String,
    pub status: ExecutionStatus,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl MigrationOutcome {
    pub fn from_result(id: impl Into<String>, result: &ExecutionResult) -> Self {
        Self {
            id: id.into(),
            status: result.status(),
            description: result.description().to_string(),
            duration_ms: Some(result.duration_ms()),
            error: result.error_message().map(str::to_string),
            reason: result.reason().map(str::to_string),
        }
    }

    pub fn skipped(
        id: impl Into<String>,
        description: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            status: ExecutionStatus::Skipped,
            description: description.into(),
            duration_ms: None,
            error: None,
            reason: Some(reason.into()),
        }
    }

    pub fn failed(id: impl Into<String>, description: impl Into<String>, error: impl ToString) -> Self {
        Self {
            id: id.into(),
            status: ExecutionStatus::Error,
            description: description.into(),
            duration_ms: None,
            error: Some(error.to_string()),
            reason: None,
        }
    }
}

/// Aggregate of a run, run-next or rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub found: usize,
    pub applied: usize,
    pub reverted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub outcomes: Vec<MigrationOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip)]
    started: Option<Instant>,
}

impl RunReport {
    pub fn new(found: usize) -> Self {
        Self {
            status: RunStatus::Running,
            found,
            applied: 0,
            reverted: 0,
            skipped: 0,
            failed: 0,
            duration_ms: 0,
            outcomes: Vec::new(),
            message: None,
            started: Some(Instant::now()),
        }
    }

    pub fn record(&mut self, outcome: MigrationOutcome) {
        match outcome.status {
            ExecutionStatus::Applied => self.applied += 1,
            ExecutionStatus::Reverted => self.reverted += 1,
            ExecutionStatus::Skipped => self.skipped += 1,
            ExecutionStatus::Error => self.failed += 1,
        }
        self.outcomes.push(outcome);
    }

    /// Settle the final status and duration.
    pub fn finish(mut self) -> Self {
        self.status = if self.failed > 0 {
            RunStatus::Error
        } else {
            RunStatus::Complete
        };
        if let Some(started) = self.started.take() {
            self.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        }
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.status == RunStatus::Error
    }
}

/// A catalog entry annotated with its ledger state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationState {
    pub id: String,
    pub description: String,
    pub tags: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
}

impl MigrationState {
    pub fn new(entry: CatalogEntry, applied_at: Option<DateTime<Utc>>) -> Self {
        Self {
            id: entry.id,
            description: entry.description,
            tags: entry.tags,
            timestamp: entry.timestamp,
            applied: applied_at.is_some(),
            applied_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: RunStatus,
    pub applied: usize,
    pub pending: usize,
    pub migrations: Vec<MigrationState>,
}

impl StatusReport {
    pub fn new(migrations: Vec<MigrationState>) -> Self {
        let applied = migrations.iter().filter(|m| m.applied).count();
        Self {
            status: RunStatus::Complete,
            applied,
            pending: migrations.len() - applied,
            migrations,
        }
    }
}
