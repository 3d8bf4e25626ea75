use std::path::{Path, PathBuf};

use tidemark_common::{EngineKind, Error, Result, validate_sql_identifier};
use tracing::{debug, info};

use crate::model::AppConfig;

pub struct ConfigLoader;

impl ConfigLoader {
    /// `~/.tidemark`, or `./.tidemark` when no home directory is known.
    pub fn config_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tidemark")
    }

    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.yml")
    }

    /// Load the config at the default location, falling back to defaults
    /// when no file exists there.
    pub fn load_default() -> Result<AppConfig> {
        let path = Self::default_path();
        if !path.exists() {
            debug!("no config at {}, using defaults", path.display());
            return Ok(AppConfig::default());
        }
        Self::load(&path)
    }

    /// Load and validate an explicitly named config file.
    pub fn load(path: &Path) -> Result<AppConfig> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let config = Self::parse(&contents, ext)?;
        Self::validate(&config)?;

        info!(
            "loaded config from {} ({} targets)",
            path.display(),
            config.targets.len()
        );
        Ok(config)
    }

    pub fn parse(contents: &str, ext: &str) -> Result<AppConfig> {
        match ext {
            "yml" | "yaml" => serde_yaml::from_str(contents)
                .map_err(|e| Error::Config(format!("YAML parse error: {e}"))),
            "toml" => {
                toml::from_str(contents).map_err(|e| Error::Config(format!("TOML parse error: {e}")))
            }
            other => Err(Error::Config(format!(
                "unsupported config extension: {other}"
            ))),
        }
    }

    pub fn validate(config: &AppConfig) -> Result<()> {
        validate_sql_identifier(&config.ledger.table)
            .map_err(|e| Error::Config(format!("ledger.table: {e}")))?;

        if config.connect.attempts == 0 {
            return Err(Error::Config("connect.attempts must be at least 1".into()));
        }

        for (name, target) in &config.targets {
            if name.trim().is_empty() {
                return Err(Error::Config("target names cannot be empty".into()));
            }
            if target.engine == EngineKind::Sqlite && target.path.is_none() {
                return Err(Error::Config(format!(
                    "target {name}: sqlite targets need a path"
                )));
            }
        }
        Ok(())
    }
}
