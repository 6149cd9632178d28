//! Configuration Module
//!
//! Loads and validates configuration from TOML files.

pub mod loader;

pub use loader::{
    Config, ConfigError, load_config, WSOL_MINT,
    TradingSection, WalletsSection, ExecutorSection, BundlerSection, RiskSection,
    BroadcasterSection, SolanaSection, JupiterSection, PaperSection, LoggingSection,
};
