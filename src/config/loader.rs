//! Configuration Loader
//!
//! Loads and validates configuration from TOML files matching config.toml structure.
//! Every section has defaults, so a file only needs the values it changes.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::application::{EngineSettings, ExecutorConfig, JobParams, JobSettings, PoolConfig, RiskSettings};
use crate::domain::{sol_to_lamports, ModeParams, ModeTable, SelectionStrategy, StopPolicy, TradingMode};

/// Wrapped SOL mint
pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// Main configuration structure matching config.toml
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub trading: TradingSection,
    pub wallets: WalletsSection,
    pub executor: ExecutorSection,
    pub bundler: BundlerSection,
    pub risk: RiskSection,
    pub broadcaster: BroadcasterSection,
    pub solana: SolanaSection,
    pub jupiter: JupiterSection,
    pub jito: JitoSection,
    pub paper: PaperSection,
    pub logging: LoggingSection,
    /// Per-mode overrides of the built-in parameter table, keyed by mode name
    pub modes: HashMap<String, ModeParams>,
}

/// Trading defaults
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TradingSection {
    /// Mode used by `run` when none is given on the command line
    pub mode: TradingMode,
    /// Token traded by the pattern engine
    pub token_address: Option<String>,
    /// SOL spent by a bundled buy without an explicit amount
    pub target_amount_sol: f64,
    /// Session volume goal for the report (SOL)
    pub target_volume_sol: Option<f64>,
}

impl Default for TradingSection {
    fn default() -> Self {
        Self {
            mode: TradingMode::Safe,
            token_address: None,
            target_amount_sol: 1.0,
            target_volume_sol: None,
        }
    }
}

/// Wallet pool
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WalletsSection {
    /// Wallets generated and funded at startup
    pub count: usize,
    pub sol_per_wallet: f64,
    /// SOL each wallet keeps back from trading
    pub reserve_minimum_sol: f64,
    pub selection: SelectionStrategy,
    /// SOL left behind on recall to pay the transfer fee
    pub recall_fee_reserve_sol: f64,
    /// Directory where generated pool keypairs are written. Without it,
    /// pool keys live only in memory and funds depend on a clean recall.
    pub keystore_dir: Option<String>,
}

impl Default for WalletsSection {
    fn default() -> Self {
        Self {
            count: 5,
            sol_per_wallet: 0.5,
            reserve_minimum_sol: 0.01,
            selection: SelectionStrategy::RoundRobin,
            recall_fee_reserve_sol: 0.001,
            keystore_dir: None,
        }
    }
}

impl WalletsSection {
    /// Keystore directory, tilde-expanded
    pub fn get_keystore_dir(&self) -> Option<PathBuf> {
        self.keystore_dir
            .as_deref()
            .map(|dir| PathBuf::from(shellexpand::tilde(dir).into_owned()))
    }
}

/// Transaction executor
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorSection {
    /// Total attempts per submission
    pub max_retries: u32,
    /// Backoff before the second attempt, doubled per attempt
    pub base_backoff_ms: u64,
    pub confirm_timeout_ms: u64,
    pub confirm_poll_ms: u64,
    pub slippage_bps: u16,
    /// Quoted price impact above which a sub-order is refused (fraction)
    pub price_impact_ceiling: f64,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff_ms: 1_000,
            confirm_timeout_ms: 30_000,
            confirm_poll_ms: 500,
            slippage_bps: 100,
            price_impact_ceiling: 0.05,
        }
    }
}

/// Bundler and incremental seller
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BundlerSection {
    pub default_split_count: usize,
    /// Per-leg size perturbation (fraction)
    pub jitter_pct: f64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Job aborts once the summed fill impact passes this (fraction)
    pub cumulative_impact_ceiling: f64,
    /// Sub-orders per position when selling incrementally
    pub sell_chunks: usize,
    pub history_limit: usize,
}

impl Default for BundlerSection {
    fn default() -> Self {
        Self {
            default_split_count: 4,
            jitter_pct: 0.1,
            min_delay_ms: 2_000,
            max_delay_ms: 5_000,
            cumulative_impact_ceiling: 0.15,
            sell_chunks: 3,
            history_limit: 100,
        }
    }
}

/// Stop-loss policy and liquidation
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskSection {
    /// Fraction below entry at which a fixed stop triggers
    pub stop_loss_threshold: f64,
    pub trailing_stop: bool,
    /// Fraction below the highest price for trailing stops
    pub trailing_distance: f64,
    pub emergency_slippage_bps: u16,
    pub liquidation_impact_ceiling: f64,
    pub monitor_interval_ms: u64,
}

impl Default for RiskSection {
    fn default() -> Self {
        Self {
            stop_loss_threshold: 0.1,
            trailing_stop: false,
            trailing_distance: 0.05,
            emergency_slippage_bps: 500,
            liquidation_impact_ceiling: 0.25,
            monitor_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BroadcasterSection {
    /// Coalescing window for outbound snapshots
    pub window_ms: u64,
    pub channel_capacity: usize,
}

impl Default for BroadcasterSection {
    fn default() -> Self {
        Self {
            window_ms: 250,
            channel_capacity: 256,
        }
    }
}

/// Solana RPC configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SolanaSection {
    /// RPC endpoint (use private RPC for production)
    pub rpc_url: String,
    /// Commitment level: "processed", "confirmed", "finalized"
    pub commitment: String,
    /// Main wallet keypair path (NEVER commit this file!)
    pub keypair_path: String,
    /// Mint paid with on buys
    pub base_mint: String,
}

impl Default for SolanaSection {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
            commitment: "confirmed".to_string(),
            keypair_path: "~/.config/solana/id.json".to_string(),
            base_mint: WSOL_MINT.to_string(),
        }
    }
}

impl SolanaSection {
    /// Get RPC URL with environment variable override
    /// Checks SOLANA_RPC_URL env var first, falls back to config value
    pub fn get_rpc_url(&self) -> String {
        std::env::var("SOLANA_RPC_URL").unwrap_or_else(|_| self.rpc_url.clone())
    }

    /// Get keypair path with environment variable override, tilde-expanded
    pub fn get_keypair_path(&self) -> String {
        let raw = std::env::var("SOLANA_KEYPAIR_PATH").unwrap_or_else(|_| self.keypair_path.clone());
        shellexpand::tilde(&raw).into_owned()
    }
}

/// Jupiter API configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JupiterSection {
    /// Jupiter swap API base URL
    pub api_url: String,
    /// Optional API key for higher rate limits (get from jup.ag)
    pub api_key: Option<String>,
    /// Priority fee cap in lamports
    pub priority_fee_lamports: u64,
    pub timeout_secs: u64,
}

impl Default for JupiterSection {
    fn default() -> Self {
        Self {
            api_url: "https://lite-api.jup.ag/swap/v1".to_string(),
            api_key: None,
            priority_fee_lamports: 1_000_000,
            timeout_secs: 30,
        }
    }
}

impl JupiterSection {
    /// Get API key with environment variable fallback
    /// Checks JUPITER_API_KEY env var if config value is empty/None
    pub fn get_api_key(&self) -> Option<String> {
        if let Some(ref key) = self.api_key {
            if !key.is_empty() {
                return Some(key.clone());
            }
        }
        std::env::var("JUPITER_API_KEY").ok()
    }
}

/// Jito block engine section; swaps use plain RPC unless enabled
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JitoSection {
    pub enabled: bool,
    /// "ny", "amsterdam", "frankfurt" or "tokyo"
    pub region: String,
    /// Overrides the region endpoint when set
    pub block_engine_url: Option<String>,
    pub tip_lamports: u64,
    pub txs_per_bundle: usize,
    pub api_token: Option<String>,
}

impl Default for JitoSection {
    fn default() -> Self {
        Self {
            enabled: false,
            region: "ny".to_string(),
            block_engine_url: None,
            tip_lamports: 10_000,
            txs_per_bundle: 3,
            api_token: None,
        }
    }
}

impl JitoSection {
    pub fn endpoint(&self) -> String {
        match &self.block_engine_url {
            Some(url) if !url.is_empty() => url.clone(),
            _ => crate::adapters::jito::endpoints::for_region(&self.region).to_string(),
        }
    }

    /// Config value first, then JITO_API_TOKEN
    pub fn get_api_token(&self) -> Option<String> {
        match &self.api_token {
            Some(token) if !token.is_empty() => Some(token.clone()),
            _ => std::env::var("JITO_API_TOKEN").ok(),
        }
    }
}

/// Simulated ledger used by `run --paper`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaperSection {
    /// SOL credited to the main wallet at startup
    pub starting_balance_sol: f64,
    /// Starting token price, SOL per token
    pub initial_price: f64,
    /// Largest move per price observation (fraction)
    pub volatility: f64,
    /// Simulated pool depth in SOL
    pub liquidity_sol: f64,
    pub fee_lamports: u64,
}

impl Default for PaperSection {
    fn default() -> Self {
        Self {
            starting_balance_sol: 10.0,
            initial_price: 0.0001,
            volatility: 0.005,
            liquidity_sol: 500.0,
            fee_lamports: 5_000,
        }
    }
}

/// Logging configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Validation failed: {0}")]
    ValidationError(String),
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

fn fraction(name: &str, value: f64) -> Result<(), ConfigError> {
    if value <= 0.0 || value >= 1.0 {
        return Err(ConfigError::ValidationError(format!(
            "{} must be in (0, 1), got {}",
            name, value
        )));
    }
    Ok(())
}

impl Config {
    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trading.target_amount_sol <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "target_amount_sol must be > 0, got {}",
                self.trading.target_amount_sol
            )));
        }

        // Wallets
        if self.wallets.sol_per_wallet <= self.wallets.reserve_minimum_sol && self.wallets.count > 0 {
            return Err(ConfigError::ValidationError(format!(
                "sol_per_wallet ({}) must exceed reserve_minimum_sol ({})",
                self.wallets.sol_per_wallet, self.wallets.reserve_minimum_sol
            )));
        }
        if self.wallets.reserve_minimum_sol < 0.0 || self.wallets.recall_fee_reserve_sol < 0.0 {
            return Err(ConfigError::ValidationError(
                "wallet reserves cannot be negative".to_string(),
            ));
        }

        // Executor
        if self.executor.max_retries == 0 {
            return Err(ConfigError::ValidationError(
                "max_retries must be at least 1".to_string(),
            ));
        }
        if self.executor.confirm_timeout_ms == 0 || self.executor.confirm_poll_ms == 0 {
            return Err(ConfigError::ValidationError(
                "confirm_timeout_ms and confirm_poll_ms must be > 0".to_string(),
            ));
        }
        fraction("price_impact_ceiling", self.executor.price_impact_ceiling)?;

        // Bundler
        if self.bundler.default_split_count == 0 || self.bundler.sell_chunks == 0 {
            return Err(ConfigError::ValidationError(
                "default_split_count and sell_chunks must be > 0".to_string(),
            ));
        }
        if !(0.0..0.5).contains(&self.bundler.jitter_pct) {
            return Err(ConfigError::ValidationError(format!(
                "jitter_pct must be in [0, 0.5), got {}",
                self.bundler.jitter_pct
            )));
        }
        if self.bundler.min_delay_ms > self.bundler.max_delay_ms {
            return Err(ConfigError::ValidationError(format!(
                "min_delay_ms ({}) exceeds max_delay_ms ({})",
                self.bundler.min_delay_ms, self.bundler.max_delay_ms
            )));
        }
        fraction("cumulative_impact_ceiling", self.bundler.cumulative_impact_ceiling)?;

        // Risk
        fraction("stop_loss_threshold", self.risk.stop_loss_threshold)?;
        fraction("trailing_distance", self.risk.trailing_distance)?;
        if self.risk.monitor_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "monitor_interval_ms must be > 0".to_string(),
            ));
        }

        if self.broadcaster.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "channel_capacity must be > 0".to_string(),
            ));
        }

        // Solana / Jupiter
        if self.solana.rpc_url.is_empty() {
            return Err(ConfigError::ValidationError(
                "rpc_url cannot be empty".to_string(),
            ));
        }
        if self.solana.keypair_path.is_empty() {
            return Err(ConfigError::ValidationError(
                "keypair_path cannot be empty".to_string(),
            ));
        }
        if self.jupiter.api_url.is_empty() {
            return Err(ConfigError::ValidationError(
                "api_url cannot be empty".to_string(),
            ));
        }

        if self.jito.enabled {
            if self.jito.tip_lamports == 0 {
                return Err(ConfigError::ValidationError(
                    "jito.tip_lamports must be > 0 when bundles are enabled".to_string(),
                ));
            }
            if !(1..=4).contains(&self.jito.txs_per_bundle) {
                return Err(ConfigError::ValidationError(format!(
                    "jito.txs_per_bundle must be in 1..=4 to leave room for the tip, got {}",
                    self.jito.txs_per_bundle
                )));
            }
        }

        if self.paper.initial_price <= 0.0
            || self.paper.liquidity_sol <= 0.0
            || !(0.0..1.0).contains(&self.paper.volatility)
        {
            return Err(ConfigError::ValidationError(
                "paper needs initial_price > 0, liquidity_sol > 0 and volatility in [0, 1)".to_string(),
            ));
        }

        // Mode overrides
        for (name, params) in &self.modes {
            name.parse::<TradingMode>()
                .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
            if params.max_wallets == 0 || params.min_amount <= 0.0 || params.min_amount > params.max_amount {
                return Err(ConfigError::ValidationError(format!(
                    "mode {}: need max_wallets > 0 and 0 < min_amount <= max_amount",
                    name
                )));
            }
            fraction(&format!("mode {} stop_loss_threshold", name), params.stop_loss_threshold)?;
        }

        Ok(())
    }

    /// Built-in mode table with the file's overrides applied
    pub fn mode_table(&self) -> ModeTable {
        self.modes
            .iter()
            .filter_map(|(name, params)| name.parse::<TradingMode>().ok().map(|m| (m, params.clone())))
            .fold(ModeTable::default(), |table, (mode, params)| table.with_override(mode, params))
    }
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        EngineSettings {
            pool: PoolConfig {
                reserve_minimum: sol_to_lamports(config.wallets.reserve_minimum_sol),
                fee_reserve: sol_to_lamports(config.wallets.recall_fee_reserve_sol),
            },
            executor: ExecutorConfig {
                max_retries: config.executor.max_retries,
                base_backoff: Duration::from_millis(config.executor.base_backoff_ms),
                confirm_timeout: Duration::from_millis(config.executor.confirm_timeout_ms),
                confirm_poll: Duration::from_millis(config.executor.confirm_poll_ms),
            },
            jobs: JobSettings {
                params: JobParams {
                    slippage_bps: config.executor.slippage_bps,
                    price_impact_ceiling: config.executor.price_impact_ceiling,
                    cumulative_impact_ceiling: config.bundler.cumulative_impact_ceiling,
                    min_delay: Duration::from_millis(config.bundler.min_delay_ms),
                    max_delay: Duration::from_millis(config.bundler.max_delay_ms),
                },
                jitter_pct: config.bundler.jitter_pct,
                default_split_count: config.bundler.default_split_count,
                sell_chunks: config.bundler.sell_chunks,
                selection: config.wallets.selection,
                history_limit: config.bundler.history_limit,
            },
            risk: RiskSettings {
                policy: StopPolicy {
                    stop_loss_threshold: config.risk.stop_loss_threshold,
                    trailing_stop: config.risk.trailing_stop,
                    trailing_distance: config.risk.trailing_distance,
                },
                emergency_slippage_bps: config.risk.emergency_slippage_bps,
                liquidation_impact_ceiling: config.risk.liquidation_impact_ceiling,
            },
            modes: config.mode_table(),
            default_token: config.trading.token_address.clone(),
            target_amount_sol: config.trading.target_amount_sol,
            target_volume_sol: config.trading.target_volume_sol,
            monitor_interval: Duration::from_millis(config.risk.monitor_interval_ms),
            broadcast_window: Duration::from_millis(config.broadcaster.window_ms),
            channel_capacity: config.broadcaster.channel_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_valid_config() -> String {
        r#"
[trading]
mode = "normal"
token_address = "TokenMint1111111111111111111111111111111111"
target_amount_sol = 2.0

[wallets]
count = 8
sol_per_wallet = 0.25
reserve_minimum_sol = 0.01
selection = "balance_weighted"

[executor]
max_retries = 4
base_backoff_ms = 500
confirm_timeout_ms = 20000
confirm_poll_ms = 400
slippage_bps = 150
price_impact_ceiling = 0.03

[bundler]
default_split_count = 6
jitter_pct = 0.05
min_delay_ms = 1000
max_delay_ms = 3000
cumulative_impact_ceiling = 0.1
sell_chunks = 2

[risk]
stop_loss_threshold = 0.08
trailing_stop = true
trailing_distance = 0.04
monitor_interval_ms = 750

[broadcaster]
window_ms = 100

[solana]
rpc_url = "https://api.devnet.solana.com"
keypair_path = "~/.config/solana/id.json"

[jupiter]
api_url = "https://lite-api.jup.ag/swap/v1"

[logging]
level = "debug"

[modes.aggressive]
max_wallets = 12
interval_secs = 4
min_amount = 0.3
max_amount = 1.5
slippage_pct = 2.5
price_impact = 0.04
min_delay_ms = 500
max_delay_ms = 1500
stop_loss_threshold = 0.2
"#
        .to_string()
    }

    fn write(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_valid_config() {
        let file = write(&create_valid_config());
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.trading.mode, TradingMode::Normal);
        assert_eq!(config.wallets.count, 8);
        assert_eq!(config.wallets.selection, SelectionStrategy::BalanceWeighted);
        assert_eq!(config.executor.max_retries, 4);
        assert_eq!(config.bundler.sell_chunks, 2);
        assert!(config.risk.trailing_stop);
        // Unset keys keep their defaults
        assert_eq!(config.risk.emergency_slippage_bps, 500);
        assert_eq!(config.solana.base_mint, WSOL_MINT);
        assert_eq!(config.broadcaster.channel_capacity, 256);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let file = write("");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.trading.mode, TradingMode::Safe);
        assert_eq!(config.broadcaster.window_ms, 250);
        assert_eq!(config.executor.base_backoff_ms, 1_000);
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_config("/nonexistent/path/config.toml");
        assert!(matches!(result.unwrap_err(), ConfigError::IoError(_)));
    }

    #[test]
    fn test_malformed_toml() {
        let file = write("[wallets\ncount = ");
        assert!(matches!(load_config(file.path()).unwrap_err(), ConfigError::ParseError(_)));
    }

    #[test]
    fn test_invalid_stop_loss() {
        let file = write("[risk]\nstop_loss_threshold = 1.5\n");
        assert!(matches!(load_config(file.path()).unwrap_err(), ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_invalid_delay_range() {
        let file = write("[bundler]\nmin_delay_ms = 5000\nmax_delay_ms = 100\n");
        assert!(matches!(load_config(file.path()).unwrap_err(), ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_unknown_mode_override() {
        let content = create_valid_config().replace("[modes.aggressive]", "[modes.turbo]");
        let file = write(&content);
        assert!(matches!(load_config(file.path()).unwrap_err(), ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_config_to_engine_settings() {
        let file = write(&create_valid_config());
        let config = load_config(file.path()).unwrap();
        let settings = EngineSettings::from(&config);

        assert_eq!(settings.executor.max_retries, 4);
        assert_eq!(settings.executor.base_backoff, Duration::from_millis(500));
        assert_eq!(settings.jobs.default_split_count, 6);
        assert_eq!(settings.jobs.params.slippage_bps, 150);
        assert_eq!(settings.jobs.params.max_delay, Duration::from_secs(3));
        assert_eq!(settings.pool.reserve_minimum, 10_000_000);
        assert!(settings.risk.policy.trailing_stop);
        assert_eq!(settings.broadcast_window, Duration::from_millis(100));
        assert_eq!(settings.modes.get(TradingMode::Aggressive).max_wallets, 12);
        assert_eq!(settings.modes.get(TradingMode::Safe).max_wallets, 5);
    }

    #[test]
    fn test_keypair_path_expands_tilde() {
        let section = SolanaSection {
            keypair_path: "~/keys/main.json".to_string(),
            ..Default::default()
        };
        if std::env::var("SOLANA_KEYPAIR_PATH").is_err() {
            assert!(!section.get_keypair_path().starts_with('~'));
        }
    }

    #[test]
    fn test_shipped_default_config_is_valid() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/default.toml");
        let config = load_config(path).unwrap();
        assert_eq!(config.wallets.count, 5);
        assert_eq!(config.paper.fee_lamports, 5_000);
        assert!(config.wallets.get_keystore_dir().is_some());
    }

    #[test]
    fn test_jito_section() {
        let config = load_config(write("").path()).unwrap();
        assert!(!config.jito.enabled);
        assert!(config.jito.endpoint().contains("ny.mainnet"));

        let file = write("[jito]\nenabled = true\nregion = \"tokyo\"\ntip_lamports = 20000\n");
        let config = load_config(file.path()).unwrap();
        assert!(config.jito.endpoint().contains("tokyo"));
        assert_eq!(config.jito.tip_lamports, 20_000);

        let file = write("[jito]\nenabled = true\nblock_engine_url = \"http://localhost:9000\"\n");
        assert_eq!(load_config(file.path()).unwrap().jito.endpoint(), "http://localhost:9000");
    }

    #[test]
    fn test_jito_bundle_needs_room_for_tip() {
        let file = write("[jito]\nenabled = true\ntxs_per_bundle = 5\n");
        assert!(matches!(load_config(file.path()), Err(ConfigError::ValidationError(_))));
        let file = write("[jito]\nenabled = true\ntip_lamports = 0\n");
        assert!(matches!(load_config(file.path()), Err(ConfigError::ValidationError(_))));
        // Ignored while disabled
        let file = write("[jito]\ntxs_per_bundle = 9\n");
        assert!(load_config(file.path()).is_ok());
    }

    #[test]
    fn test_invalid_paper_section() {
        let file = write("[paper]\nvolatility = 1.5\n");
        assert!(matches!(load_config(file.path()), Err(ConfigError::ValidationError(_))));
    }
}
