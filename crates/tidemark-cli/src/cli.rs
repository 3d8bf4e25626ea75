use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "tidemark",
    version,
    about = "Versioned, reversible database migrations"
)]
pub struct Cli {
    /// Config file (defaults to ~/.tidemark/config.yml)
    #[arg(long, global = true, env = "TIDEMARK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Target database to operate on; repeat for several (default: all)
    #[arg(long = "target", global = true)]
    pub targets: Vec<String>,

    /// Print reports as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Apply every pending migration
    Run {
        /// Only migrations carrying this tag; repeat to require several
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Keep going after a failed migration
        #[arg(long)]
        force: bool,
    },

    /// Apply the next pending migration
    Next {
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Only consider these migration ids
        #[arg(long = "allow")]
        allow: Vec<String>,
    },

    /// Revert the most recently applied migrations
    Rollback {
        #[arg(long, default_value_t = 1)]
        count: usize,

        #[arg(long = "allow")]
        allow: Vec<String>,
    },

    /// Show applied and pending migrations
    Status {
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Write a starter config file
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Run { .. } => "run",
            Command::Next { .. } => "next",
            Command::Rollback { .. } => "rollback",
            Command::Status { .. } => "status",
            Command::Init { .. } => "init",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_after_the_subcommand() {
        let cli = Cli::try_parse_from([
            "tidemark", "run", "--tag", "core", "--force", "--target", "main", "--json",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.targets, vec!["main"]);
        assert_eq!(
            cli.command,
            Command::Run {
                tags: vec!["core".into()],
                force: true
            }
        );
    }

    #[test]
    fn rollback_count_defaults_to_one() {
        let cli = Cli::try_parse_from(["tidemark", "rollback"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Rollback {
                count: 1,
                allow: vec![]
            }
        );
    }

    #[test]
    fn repeated_allow_flags_accumulate() {
        let cli = Cli::try_parse_from(["tidemark", "next", "--allow", "a", "--allow", "b"]).unwrap();
        match cli.command {
            Command::Next { allow, .. } => assert_eq!(allow, vec!["a", "b"]),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
