//! Command-line front end for tidemark.
//!
//! Applications compile their migrations into a [`StaticCatalog`] and hand it
//! to [`run_with`] from their own `main`:
//!
//! ```ignore
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut catalog = StaticCatalog::new();
//!     catalog.register(Source::new("20240101_users", timestamp), users::define)?;
//!     tidemark_cli::run_with(catalog).await
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod init;
pub mod logging;
pub mod render;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tidemark_config::ConfigLoader;
use tidemark_runner::StaticCatalog;

pub use cli::{Cli, Command};

/// Parse the process arguments, set up logging and run the command.
pub async fn run_with(catalog: StaticCatalog) -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose, cli.log_json)?;
    run_cli(cli, catalog).await
}

/// Run an already-parsed command line. Fails when any target ends in error.
pub async fn run_cli(cli: Cli, catalog: StaticCatalog) -> Result<()> {
    if let Command::Init { force } = &cli.command {
        let path = cli.config.clone().unwrap_or_else(ConfigLoader::default_path);
        return init::run_init(&path, *force);
    }

    let config = match &cli.config {
        Some(path) => ConfigLoader::load(path),
        None => ConfigLoader::load_default(),
    }
    .context("failed to load config")?;

    let failed = commands::execute(
        &cli.command,
        &config,
        &cli.targets,
        Arc::new(catalog),
        cli.json,
    )
    .await?;

    if failed > 0 {
        bail!("{failed} target(s) reported errors");
    }
    Ok(())
}
