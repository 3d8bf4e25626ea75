//! Drives the execution engine across the migrations of one target database.
//!
//! Work is strictly sequential: each migration's transaction settles before
//! the next one is looked at, so ledger checks never race.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tidemark_common::{Direction, Error, Result};
use tidemark_db::{Ledger, LedgerRecord};
use tidemark_engine::ExecutionStatus;
use tracing::{debug, info, warn};

use crate::catalog::StaticCatalog;
use crate::executor::{LocalExecutor, SharedConnection};
use crate::report::{MigrationOutcome, MigrationState, RunReport, StatusReport};
use crate::traits::{CallOptions, Catalog, MigrationExecutor};

pub const REASON_NOT_ALLOWED: &str = "not in allowed list";

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub tags: Vec<String>,
    /// Keep going after a failed migration.
    pub force: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RunNextOptions {
    pub tags: Vec<String>,
    pub allowed_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RollbackOptions {
    pub count: usize,
    pub allowed_ids: Vec<String>,
}

impl Default for RollbackOptions {
    fn default() -> Self {
        Self {
            count: 1,
            allowed_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatusOptions {
    pub tags: Vec<String>,
}

pub struct Runner {
    target: String,
    connection: SharedConnection,
    ledger: Ledger,
    catalog: Arc<dyn Catalog>,
    executor: Arc<dyn MigrationExecutor>,
}

impl Runner {
    pub fn new(
        target: impl Into<String>,
        connection: SharedConnection,
        ledger: Ledger,
        catalog: Arc<dyn Catalog>,
        executor: Arc<dyn MigrationExecutor>,
    ) -> Self {
        Self {
            target: target.into(),
            connection,
            ledger,
            catalog,
            executor,
        }
    }

    /// Runner backed by a [`StaticCatalog`] and an in-process executor.
    pub fn local(
        target: impl Into<String>,
        connection: SharedConnection,
        ledger: Ledger,
        catalog: Arc<StaticCatalog>,
    ) -> Self {
        let target = target.into();
        let executor = LocalExecutor::new(Arc::clone(&catalog), ledger.clone())
            .with_target(target.clone(), Arc::clone(&connection));
        Self::new(target, connection, ledger, catalog, Arc::new(executor))
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Create the ledger table if the target does not have one yet.
    pub async fn prepare(&self) -> Result<()> {
        let mut conn = self.connection.lock().await;
        self.ledger.ensure_table(&mut **conn)
    }

    /// Catalog entries annotated with ledger state: applied first by
    /// `applied_at`, then pending in authoring order.
    pub async fn find_migrations(&self, tags: &[String]) -> Result<Vec<MigrationState>> {
        // `find` yields authoring order, so an entry's index is its rank.
        let entries = self.catalog.find(&self.target, tags).await?;
        let applied: HashMap<String, DateTime<Utc>> = self
            .applied_records()
            .await?
            .into_iter()
            .map(|r| (r.id, r.applied_at))
            .collect();

        let (mut done, pending): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .enumerate()
            .map(|(rank, entry)| {
                let applied_at = applied.get(&entry.id).copied();
                (rank, MigrationState::new(entry, applied_at))
            })
            .partition(|(_, state)| state.applied);

        done.sort_by(|(a_rank, a), (b_rank, b)| {
            a.applied_at.cmp(&b.applied_at).then_with(|| a_rank.cmp(b_rank))
        });
        Ok(done
            .into_iter()
            .chain(pending)
            .map(|(_, state)| state)
            .collect())
    }

    /// Apply every pending migration in order.
    pub async fn run(&self, options: RunOptions) -> Result<RunReport> {
        let migrations = self.find_migrations(&options.tags).await?;
        let mut report = RunReport::new(migrations.len());
        info!(
            "run on {}: {} migrations found (force={})",
            self.target,
            migrations.len(),
            options.force
        );

        for state in migrations {
            if state.applied {
                let reason = Error::AlreadyApplied(state.id.clone()).to_string();
                report.record(MigrationOutcome::skipped(state.id, state.description, reason));
                continue;
            }

            let outcome = self.invoke(&state.id, &state.description, Direction::Up).await;
            let failed = outcome.status == ExecutionStatus::Error;
            report.record(outcome);
            if failed && !options.force {
                warn!("run on {} stopped at {}", self.target, state.id);
                break;
            }
        }

        let report = report.finish();
        info!(
            "run on {} {}: applied={} skipped={} failed={}",
            self.target,
            report.status.as_str(),
            report.applied,
            report.skipped,
            report.failed
        );
        Ok(report)
    }

    /// Apply the first pending migration, optionally restricted to `allowed_ids`.
    pub async fn run_next(&self, options: RunNextOptions) -> Result<RunReport> {
        let migrations = self.find_migrations(&options.tags).await?;
        let allowed: HashSet<&str> = options.allowed_ids.iter().map(String::as_str).collect();
        let mut report = RunReport::new(migrations.len());
        let mut saw_pending = false;

        for state in migrations.iter().filter(|m| !m.applied) {
            saw_pending = true;
            if !allowed.is_empty() && !allowed.contains(state.id.as_str()) {
                debug!("run-next on {}: skipping {}", self.target, state.id);
                report.record(MigrationOutcome::skipped(
                    &state.id,
                    &state.description,
                    REASON_NOT_ALLOWED,
                ));
                continue;
            }

            let outcome = self.invoke(&state.id, &state.description, Direction::Up).await;
            report.record(outcome);
            return Ok(report.finish());
        }

        let message = if saw_pending {
            "no pending migration is in the allowed list"
        } else {
            "no pending migrations"
        };
        info!("run-next on {}: {message}", self.target);
        Ok(report.finish().with_message(message))
    }

    /// Revert the most recently applied migrations. Always stops at the first error.
    pub async fn rollback(&self, options: RollbackOptions) -> Result<RunReport> {
        let records = self.applied_records().await?;
        let allowed: HashSet<&str> = options.allowed_ids.iter().map(String::as_str).collect();
        let authoring_rank: HashMap<String, usize> = self
            .catalog
            .find(&self.target, &[])
            .await?
            .into_iter()
            .enumerate()
            .map(|(rank, entry)| (entry.id, rank))
            .collect();

        let mut candidates: Vec<(LedgerRecord, Option<usize>)> = records
            .into_iter()
            .filter(|r| allowed.is_empty() || allowed.contains(r.id.as_str()))
            .map(|r| {
                let rank = authoring_rank.get(&r.id).copied();
                (r, rank)
            })
            .collect();
        candidates.sort_by(|(a, a_rank), (b, b_rank)| newest_first(a, *a_rank, b, *b_rank));
        candidates.truncate(options.count);

        let mut report = RunReport::new(candidates.len());
        if candidates.is_empty() {
            info!("rollback on {}: nothing to roll back", self.target);
            return Ok(report.finish().with_message("nothing to roll back"));
        }

        for (record, _) in candidates {
            info!("rolling back {} on {}", record.id, self.target);
            let outcome = self
                .invoke(&record.id, &record.description, Direction::Down)
                .await;
            let failed = outcome.status == ExecutionStatus::Error;
            report.record(outcome);
            if failed {
                warn!("rollback on {} stopped at {}", self.target, record.id);
                break;
            }
        }

        Ok(report.finish())
    }

    /// Applied and pending counts. Never writes to the target.
    pub async fn status(&self, options: StatusOptions) -> Result<StatusReport> {
        let migrations = self.find_migrations(&options.tags).await?;
        Ok(StatusReport::new(migrations))
    }

    async fn applied_records(&self) -> Result<Vec<LedgerRecord>> {
        let mut conn = self.connection.lock().await;
        if !self.ledger.exists(&mut **conn)? {
            return Ok(Vec::new());
        }
        self.ledger.query(&mut **conn, None)
    }

    async fn invoke(&self, id: &str, description: &str, direction: Direction) -> MigrationOutcome {
        let options = CallOptions {
            database_id: self.target.clone(),
            direction,
            id: None,
            force: false,
        };
        match self.executor.call(id, options).await {
            Ok(result) => MigrationOutcome::from_result(id, &result),
            Err(e) => {
                warn!("could not invoke {id} {direction} on {}: {e}", self.target);
                MigrationOutcome::failed(id, description, e)
            }
        }
    }
}

/// Descending `applied_at`, then descending authoring rank. Entries the
/// catalog no longer knows sort after known ones on a tie.
fn newest_first(
    a: &LedgerRecord,
    a_rank: Option<usize>,
    b: &LedgerRecord,
    b_rank: Option<usize>,
) -> Ordering {
    b.applied_at.cmp(&a.applied_at).then_with(|| b_rank.cmp(&a_rank))
}
