use std::sync::Arc;

use anyhow::{Result, bail};
use serde::Serialize;
use tidemark_common::{EngineKind, Error};
use tidemark_config::{AppConfig, TargetConfig};
use tidemark_db::{Connection, Ledger, SqliteConnection};
use tidemark_runner::{
    RetryPolicy, RollbackOptions, RunNextOptions, RunOptions, RunReport, Runner, StaticCatalog,
    StatusOptions, StatusReport, connect_with_retry, share,
};
use tracing::{error, info};

use crate::cli::Command;
use crate::render;

/// What happened on one target.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetOutcome {
    Run {
        target: String,
        command: &'static str,
        report: RunReport,
    },
    Status {
        target: String,
        report: StatusReport,
    },
    Failed {
        target: String,
        error: String,
    },
}

impl TargetOutcome {
    pub fn is_error(&self) -> bool {
        match self {
            TargetOutcome::Run { report, .. } => report.is_error(),
            TargetOutcome::Status { .. } => false,
            TargetOutcome::Failed { .. } => true,
        }
    }

    pub fn render(&self) -> String {
        match self {
            TargetOutcome::Run {
                target,
                command,
                report,
            } => render::run_report(target, command, report),
            TargetOutcome::Status { target, report } => render::status_report(target, report),
            TargetOutcome::Failed { target, error } => render::target_error(target, error),
        }
    }
}

/// Run `command` against each selected target in turn. Returns how many
/// targets ended in error.
pub async fn execute(
    command: &Command,
    config: &AppConfig,
    requested: &[String],
    catalog: Arc<StaticCatalog>,
    json: bool,
) -> Result<usize> {
    let targets = select_targets(config, requested)?;
    let mut outcomes = Vec::with_capacity(targets.len());

    for (name, target) in targets {
        info!("target {name} ({}): {}", target.engine, command.name());
        let outcome = run_target(name, target, command, config, Arc::clone(&catalog)).await;
        if !json {
            println!("{}", outcome.render());
        }
        outcomes.push(outcome);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
    }
    Ok(outcomes.iter().filter(|o| o.is_error()).count())
}

/// Targets named on the command line, or every configured target.
pub fn select_targets<'a>(
    config: &'a AppConfig,
    requested: &[String],
) -> Result<Vec<(&'a str, &'a TargetConfig)>> {
    if config.targets.is_empty() {
        bail!("no targets configured");
    }
    if requested.is_empty() {
        return Ok(config
            .targets
            .iter()
            .map(|(name, target)| (name.as_str(), target))
            .collect());
    }

    let mut selected = Vec::with_capacity(requested.len());
    for name in requested {
        match config.targets.get_key_value(name) {
            Some((name, target)) => selected.push((name.as_str(), target)),
            None => bail!("unknown target: {name}"),
        }
    }
    Ok(selected)
}

pub fn retry_policy(config: &AppConfig) -> RetryPolicy {
    RetryPolicy {
        attempts: config.connect.attempts,
        backoff_ms: config.connect.backoff_ms,
        max_backoff_ms: config.connect.max_backoff_ms,
    }
}

pub fn open_target(name: &str, target: &TargetConfig) -> tidemark_common::Result<Box<dyn Connection>> {
    match target.engine {
        EngineKind::Sqlite => {
            let path = target
                .path
                .as_deref()
                .ok_or_else(|| Error::Config(format!("target {name}: sqlite targets need a path")))?;
            Ok(Box::new(SqliteConnection::open(path)?))
        }
        other => Err(Error::Config(format!(
            "target {name}: no connection backend for engine {other}"
        ))),
    }
}

async fn run_target(
    name: &str,
    target: &TargetConfig,
    command: &Command,
    config: &AppConfig,
    catalog: Arc<StaticCatalog>,
) -> TargetOutcome {
    match try_run_target(name, target, command, config, catalog).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("target {name} failed: {e}");
            TargetOutcome::Failed {
                target: name.to_string(),
                error: e.to_string(),
            }
        }
    }
}

async fn try_run_target(
    name: &str,
    target: &TargetConfig,
    command: &Command,
    config: &AppConfig,
    catalog: Arc<StaticCatalog>,
) -> tidemark_common::Result<TargetOutcome> {
    if target.engine != EngineKind::Sqlite {
        // Fail before the retry loop; waiting cannot help.
        open_target(name, target)?;
    }

    let conn = connect_with_retry(name, &retry_policy(config), || open_target(name, target)).await?;
    let ledger = Ledger::new(config.ledger.table.clone())?;
    let runner = Runner::local(name, share(conn), ledger, catalog);

    let report = match command {
        Command::Status { tags } => {
            let report = runner.status(StatusOptions { tags: tags.clone() }).await?;
            return Ok(TargetOutcome::Status {
                target: name.to_string(),
                report,
            });
        }
        Command::Run { tags, force } => {
            runner.prepare().await?;
            runner
                .run(RunOptions {
                    tags: tags.clone(),
                    force: *force,
                })
                .await?
        }
        Command::Next { tags, allow } => {
            runner.prepare().await?;
            runner
                .run_next(RunNextOptions {
                    tags: tags.clone(),
                    allowed_ids: allow.clone(),
                })
                .await?
        }
        Command::Rollback { count, allow } => {
            runner.prepare().await?;
            runner
                .rollback(RollbackOptions {
                    count: *count,
                    allowed_ids: allow.clone(),
                })
                .await?
        }
        Command::Init { .. } => {
            return Err(Error::Other("init does not operate on targets".into()));
        }
    };

    Ok(TargetOutcome::Run {
        target: name.to_string(),
        command: command.name(),
        report,
    })
}
