use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use dialoguer::{Input, Select};
use tidemark_common::EngineKind;
use tidemark_config::{AppConfig, ConfigLoader, LedgerConfig, TargetConfig};
use tracing::info;

/// Write a starter config, prompting for the first target when interactive.
pub fn run_init(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }

    if !std::io::stdin().is_terminal() {
        println!("Non-interactive environment detected.");
        println!("Writing a default config to {}", config_path.display());
        let config = starter_config("main", EngineKind::Sqlite, Some("./data/main.db".into()), None);
        return write_config(config_path, &config);
    }

    println!();
    println!("  Tidemark Setup");
    println!("  --------------");
    println!();

    let name: String = Input::new()
        .with_prompt("Target name")
        .default("main".to_string())
        .interact_text()
        .context("target name input cancelled")?;

    let engines = EngineKind::ALL;
    let labels: Vec<&str> = engines.iter().map(|e| e.as_str()).collect();
    let selection = Select::new()
        .with_prompt("Database engine")
        .items(&labels)
        .default(0)
        .interact()
        .context("engine selection cancelled")?;
    let engine = engines[selection];

    let path = if engine == EngineKind::Sqlite {
        let path: String = Input::new()
            .with_prompt("Database file")
            .default(format!("./data/{name}.db"))
            .interact_text()
            .context("database path input cancelled")?;
        Some(PathBuf::from(path))
    } else {
        println!("  No built-in connection backend for {engine}; embed one via the runner API.");
        None
    };

    let table: String = Input::new()
        .with_prompt("Ledger table")
        .default(LedgerConfig::default().table)
        .interact_text()
        .context("ledger table input cancelled")?;

    let config = starter_config(&name, engine, path, Some(table));
    write_config(config_path, &config)?;

    println!();
    println!("  Config written to {}", config_path.display());
    println!("  Run `tidemark status` to inspect the target.");
    println!();
    Ok(())
}

pub fn starter_config(
    name: &str,
    engine: EngineKind,
    path: Option<PathBuf>,
    ledger_table: Option<String>,
) -> AppConfig {
    let mut config = AppConfig::default();
    if let Some(table) = ledger_table {
        config.ledger.table = table;
    }
    config
        .targets
        .insert(name.to_string(), TargetConfig { engine, path });
    config
}

/// Validate and write `config` as YAML, creating parent directories.
pub fn write_config(config_path: &Path, config: &AppConfig) -> Result<()> {
    ConfigLoader::validate(config)?;

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .context(format!("failed to create {}", parent.display()))?;
    }
    let yaml = serde_yaml::to_string(config).context("failed to serialize config")?;
    std::fs::write(config_path, &yaml)
        .context(format!("failed to write {}", config_path.display()))?;

    info!("config written to {}", config_path.display());
    Ok(())
}
