//! CLI Adapter
//!
//! Command-line interface for the soda-bundler binary.

mod commands;

pub use commands::{CliApp, Command, RunCmd, StatusCmd, ValidateCmd};
