//! Applies or reverts a single migration inside one transaction.
//!
//! The selected procedure, the ledger mutation, and (for `up`) the `after`
//! hook commit or roll back together. Failures of any kind, including panics
//! in user procedures, are returned as [`ExecutionResult::Error`].

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Instant;

use tidemark_common::{Direction, Error, Result};
use tidemark_db::{Connection, Ledger, SqlExecutor, Transaction};
use tracing::{debug, info, warn};

use crate::definition::{Implementation, Migration, Procedure, panic_message};
use crate::result::{ExecutionResult, elapsed_ms};

#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Re-run `up` even when the ledger already lists the migration.
    pub force: bool,
    /// Ledger key to use instead of the migration's own id.
    pub id: Option<String>,
}

pub fn execute(
    conn: &mut dyn Connection,
    ledger: &Ledger,
    migration: &Migration,
    direction: Direction,
    options: &ExecuteOptions,
) -> ExecutionResult {
    let started = Instant::now();
    let engine = conn.engine();
    let id = options.id.as_deref().unwrap_or(&migration.id);
    let description = migration.description.as_str();

    let Some(implementation) = migration.implementation(engine) else {
        debug!("skipping {id}: no {engine} implementation");
        return ExecutionResult::skipped(
            description,
            Error::UnsupportedEngine(engine.to_string()).to_string(),
            started,
        );
    };

    let procedure = match direction {
        Direction::Up => implementation.up.as_ref(),
        Direction::Down => implementation.down.as_ref(),
    };
    let Some(procedure) = procedure else {
        let err = Error::MissingImplementation(direction.to_string());
        warn!("cannot run {id} {direction}: {err}");
        return ExecutionResult::error(description, err, started);
    };

    if direction == Direction::Up {
        match ledger.is_applied(&mut *conn, id) {
            Ok(true) if !options.force => {
                debug!("skipping {id}: already applied");
                return ExecutionResult::skipped(
                    description,
                    Error::AlreadyApplied(id.to_string()).to_string(),
                    started,
                );
            }
            Ok(true) => info!("re-running {id} up (forced)"),
            Ok(false) => {}
            Err(e) => return ExecutionResult::error(description, e, started),
        }
    }

    info!("running migration {id} {direction} on {engine}: {description}");
    match run_in_transaction(conn, ledger, id, description, implementation, procedure, direction) {
        Ok(()) => {
            let duration_ms = elapsed_ms(started);
            info!("migration {id} {direction} finished in {duration_ms}ms");
            match direction {
                Direction::Up => ExecutionResult::Applied {
                    description: description.to_string(),
                    duration_ms,
                },
                Direction::Down => ExecutionResult::Reverted {
                    description: description.to_string(),
                    duration_ms,
                },
            }
        }
        Err(e) => {
            warn!("migration {id} {direction} failed: {e}");
            if !engine.transactional_ddl() {
                warn!("{engine} commits DDL implicitly; schema changes made before the failure may persist");
            }
            ExecutionResult::error(description, e, started)
        }
    }
}

fn run_in_transaction(
    conn: &mut dyn Connection,
    ledger: &Ledger,
    id: &str,
    description: &str,
    implementation: &Implementation,
    procedure: &Procedure,
    direction: Direction,
) -> Result<()> {
    let mut tx = conn.begin()?;

    match apply_steps(&mut *tx, ledger, id, description, implementation, procedure, direction) {
        Ok(()) => tx.commit(),
        Err(e) => match tx.rollback() {
            Ok(()) => Err(e),
            Err(rollback) => Err(Error::Transaction(format!("{e}; {rollback}"))),
        },
    }
}

fn apply_steps(
    tx: &mut (dyn Transaction + '_),
    ledger: &Ledger,
    id: &str,
    description: &str,
    implementation: &Implementation,
    procedure: &Procedure,
    direction: Direction,
) -> Result<()> {
    call_procedure(direction.as_str(), procedure, tx.as_executor())?;

    match direction {
        Direction::Down => ledger.remove(&mut *tx, id)?,
        Direction::Up => {
            ledger.record(&mut *tx, id, description)?;
            if let Some(after) = &implementation.after {
                call_procedure("after", after, tx.as_executor())?;
            }
        }
    }
    Ok(())
}

/// Run user code, turning both errors and panics into `Error::Procedure`.
fn call_procedure(label: &str, procedure: &Procedure, db: &mut dyn SqlExecutor) -> Result<()> {
    match catch_unwind(AssertUnwindSafe(|| (procedure.as_ref())(db))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(Error::Procedure(format!("{label} failed: {e:#}"))),
        Err(panic) => Err(Error::Procedure(format!(
            "{label} panicked: {}",
            panic_message(panic.as_ref())
        ))),
    }
}
