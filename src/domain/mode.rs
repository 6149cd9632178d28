//! Trading Modes
//!
//! Parameter table per mode. Values can be overridden from configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingMode {
    Safe,
    Normal,
    Aggressive,
    HighFrequency,
}

impl TradingMode {
    pub const ALL: [TradingMode; 4] = [
        TradingMode::Safe,
        TradingMode::Normal,
        TradingMode::Aggressive,
        TradingMode::HighFrequency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TradingMode::Safe => "safe",
            TradingMode::Normal => "normal",
            TradingMode::Aggressive => "aggressive",
            TradingMode::HighFrequency => "high_frequency",
        }
    }
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("Unknown trading mode: {0}")]
pub struct UnknownMode(pub String);

impl FromStr for TradingMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "safe" => Ok(TradingMode::Safe),
            "normal" => Ok(TradingMode::Normal),
            "aggressive" => Ok(TradingMode::Aggressive),
            "high_frequency" | "hf" => Ok(TradingMode::HighFrequency),
            _ => Err(UnknownMode(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeParams {
    /// Upper bound on wallets used per pattern run
    pub max_wallets: usize,
    /// Pause between pattern runs in seconds
    pub interval_secs: u64,
    /// Smallest buy size in SOL
    pub min_amount: f64,
    /// Largest buy size in SOL
    pub max_amount: f64,
    /// Slippage tolerance in percent
    pub slippage_pct: f64,
    /// Per-order price impact ceiling (fraction)
    pub price_impact: f64,
    /// Inter-order delay range in milliseconds
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Stop-loss threshold for positions opened in this mode (fraction)
    pub stop_loss_threshold: f64,
    /// Burst window for high-frequency cycling, seconds
    #[serde(default)]
    pub burst_duration_secs: u64,
    /// Buy/sell legs per rapid cycle
    #[serde(default)]
    pub batch_size: usize,
}

impl ModeParams {
    pub fn slippage_bps(&self) -> u16 {
        (self.slippage_pct * 100.0).round().clamp(0.0, u16::MAX as f64) as u16
    }

    pub fn defaults(mode: TradingMode) -> Self {
        match mode {
            TradingMode::Safe => Self {
                max_wallets: 5,
                interval_secs: 30,
                min_amount: 0.1,
                max_amount: 0.5,
                slippage_pct: 0.5,
                price_impact: 0.01,
                min_delay_ms: 2_000,
                max_delay_ms: 5_000,
                stop_loss_threshold: 0.05,
                burst_duration_secs: 0,
                batch_size: 0,
            },
            TradingMode::Normal => Self {
                max_wallets: 10,
                interval_secs: 15,
                min_amount: 0.2,
                max_amount: 1.0,
                slippage_pct: 1.0,
                price_impact: 0.02,
                min_delay_ms: 2_000,
                max_delay_ms: 5_000,
                stop_loss_threshold: 0.1,
                burst_duration_secs: 0,
                batch_size: 0,
            },
            TradingMode::Aggressive => Self {
                max_wallets: 20,
                interval_secs: 5,
                min_amount: 0.5,
                max_amount: 2.0,
                slippage_pct: 2.0,
                price_impact: 0.05,
                min_delay_ms: 1_000,
                max_delay_ms: 3_000,
                stop_loss_threshold: 0.15,
                burst_duration_secs: 0,
                batch_size: 0,
            },
            TradingMode::HighFrequency => Self {
                max_wallets: 40,
                interval_secs: 1,
                min_amount: 0.1,
                max_amount: 0.5,
                slippage_pct: 2.0,
                price_impact: 0.03,
                min_delay_ms: 100,
                max_delay_ms: 300,
                stop_loss_threshold: 0.1,
                burst_duration_secs: 30,
                batch_size: 10,
            },
        }
    }
}

/// Mode -> parameters lookup
#[derive(Debug, Clone, PartialEq)]
pub struct ModeTable {
    params: HashMap<TradingMode, ModeParams>,
}

impl Default for ModeTable {
    fn default() -> Self {
        let params = TradingMode::ALL
            .iter()
            .map(|m| (*m, ModeParams::defaults(*m)))
            .collect();
        Self { params }
    }
}

impl ModeTable {
    pub fn with_override(mut self, mode: TradingMode, params: ModeParams) -> Self {
        self.params.insert(mode, params);
        self
    }

    pub fn get(&self, mode: TradingMode) -> ModeParams {
        self.params
            .get(&mode)
            .cloned()
            .unwrap_or_else(|| ModeParams::defaults(mode))
    }
}
