//! Volume Tracker
//!
//! Session ledger of every confirmed fill with per-side and per-wallet rollups.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use super::trade::{Side, Trade};

#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("Failed to write session export: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize session: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeCounts {
    pub buys: usize,
    pub sells: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WalletStats {
    pub volume: f64,
    pub trade_count: usize,
    pub buys: usize,
    pub sells: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_start: DateTime<Utc>,
    pub duration_secs: i64,
    pub total_volume: f64,
    pub target_volume: Option<f64>,
    /// Percent of the target reached
    pub progress: Option<f64>,
    pub trade_counts: TradeCounts,
    pub wallet_performance: BTreeMap<String, WalletStats>,
    pub trades_per_hour: f64,
}

#[derive(Debug, Clone, Serialize)]
struct SessionExport<'a> {
    session_start: DateTime<Utc>,
    target_volume: Option<f64>,
    trades: &'a [Trade],
    summary: SessionReport,
}

#[derive(Debug, Clone)]
pub struct VolumeTracker {
    trades: Vec<Trade>,
    session_start: DateTime<Utc>,
    target_volume: Option<f64>,
}

impl Default for VolumeTracker {
    fn default() -> Self {
        Self::new(None)
    }
}

impl VolumeTracker {
    pub fn new(target_volume: Option<f64>) -> Self {
        Self {
            trades: Vec::new(),
            session_start: Utc::now(),
            target_volume,
        }
    }

    /// Clear the ledger and start a new session
    pub fn start_session(&mut self, target_volume: Option<f64>) {
        self.trades.clear();
        self.session_start = Utc::now();
        self.target_volume = target_volume;
    }

    pub fn record(&mut self, trade: Trade) {
        self.trades.push(trade);
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    /// Total SOL traded this session
    pub fn session_volume(&self) -> f64 {
        self.trades.iter().map(Trade::notional).sum()
    }

    pub fn trade_counts(&self) -> TradeCounts {
        let mut counts = TradeCounts::default();
        for trade in &self.trades {
            match trade.side {
                Side::Buy => counts.buys += 1,
                Side::Sell => counts.sells += 1,
            }
        }
        counts
    }

    pub fn wallet_performance(&self) -> BTreeMap<String, WalletStats> {
        let mut stats: BTreeMap<String, WalletStats> = BTreeMap::new();
        for trade in &self.trades {
            let entry = stats.entry(trade.wallet.clone()).or_default();
            entry.volume += trade.notional();
            entry.trade_count += 1;
            match trade.side {
                Side::Buy => entry.buys += 1,
                Side::Sell => entry.sells += 1,
            }
        }
        stats
    }

    pub fn report_at(&self, now: DateTime<Utc>) -> SessionReport {
        let duration = now - self.session_start;
        let total_volume = self.session_volume();
        let hours = duration.num_milliseconds().max(1) as f64 / 3_600_000.0;

        SessionReport {
            session_start: self.session_start,
            duration_secs: duration.num_seconds(),
            total_volume,
            target_volume: self.target_volume,
            progress: self
                .target_volume
                .filter(|t| *t > 0.0)
                .map(|t| total_volume / t * 100.0),
            trade_counts: self.trade_counts(),
            wallet_performance: self.wallet_performance(),
            trades_per_hour: self.trades.len() as f64 / hours,
        }
    }

    pub fn report(&self) -> SessionReport {
        self.report_at(Utc::now())
    }

    /// Write trades and summary as pretty JSON
    pub fn export_json<P: AsRef<Path>>(&self, path: P) -> Result<(), VolumeError> {
        let export = SessionExport {
            session_start: self.session_start,
            target_volume: self.target_volume,
            trades: &self.trades,
            summary: self.report(),
        };
        let json = serde_json::to_string_pretty(&export)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
