//! CLI Command Definitions
//!
//! Argument parsing for the soda-bundler binary. Uses clap derive macros.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::domain::TradingMode;

/// Soda Bundler - multi-wallet bundled trading engine for Solana/Jupiter
#[derive(Parser, Debug)]
#[command(
    name = "soda-bundler",
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = "Multi-wallet bundled trading engine for Solana/Jupiter",
    long_about = "Spreads buys across a pool of funded wallets, exits positions in \
                  staggered chunks and guards every position with fixed or trailing stops. \
                  Commands are read as JSON lines on stdin; state updates are written as \
                  JSON lines on stdout."
)]
pub struct CliApp {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fund the wallet pool and run the engine until Ctrl+C
    Run(RunCmd),

    /// Show the main wallet balance and the effective configuration
    Status(StatusCmd),

    /// Load and validate a configuration file
    Validate(ValidateCmd),
}

impl Command {
    /// Configuration file the command reads
    pub fn config_path(&self) -> &Path {
        match self {
            Command::Run(cmd) => &cmd.config,
            Command::Status(cmd) => &cmd.config,
            Command::Validate(cmd) => &cmd.config,
        }
    }
}

#[derive(Parser, Debug)]
pub struct RunCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config/default.toml")]
    pub config: PathBuf,

    /// Run against the in-memory paper ledger (no real transactions)
    #[arg(short, long)]
    pub paper: bool,

    /// Start the pattern engine in this mode (safe, normal, aggressive, high_frequency)
    #[arg(short, long, value_name = "MODE")]
    pub mode: Option<TradingMode>,

    /// Token traded by the pattern engine, overrides the config file
    #[arg(short, long, value_name = "MINT")]
    pub token: Option<String>,

    /// Sweep every pool wallet back to the main wallet on shutdown
    #[arg(long)]
    pub recall_on_exit: bool,

    /// Write the session trade log and report to this JSON file on exit
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct StatusCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config/default.toml")]
    pub config: PathBuf,
}

#[derive(Parser, Debug)]
pub struct ValidateCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config/default.toml")]
    pub config: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_flags() {
        let app = CliApp::try_parse_from([
            "soda-bundler", "run", "--paper", "--mode", "high-frequency", "--token", "MINT", "-v",
        ])
        .unwrap();
        assert!(app.verbose);
        match app.command {
            Command::Run(cmd) => {
                assert!(cmd.paper);
                assert!(!cmd.recall_on_exit);
                assert_eq!(cmd.mode, Some(TradingMode::HighFrequency));
                assert_eq!(cmd.token.as_deref(), Some("MINT"));
                assert_eq!(cmd.config, PathBuf::from("config/default.toml"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_unknown_mode_rejected() {
        assert!(CliApp::try_parse_from(["soda-bundler", "run", "--mode", "yolo"]).is_err());
    }

    #[test]
    fn test_validate_config_path() {
        let app = CliApp::try_parse_from(["soda-bundler", "validate", "--config", "other.toml"]).unwrap();
        assert!(matches!(app.command, Command::Validate(ValidateCmd { config }) if config == PathBuf::from("other.toml")));
    }
}
