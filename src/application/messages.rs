//! Transport messages
//!
//! Inbound commands are tagged by `"type"`. Outbound snapshots are
//! `{"type": ..., "data": {...}}` with camelCase payloads. Snapshots are
//! whole values; observers replace what they hold, never patch it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::domain::{BundlerStatus, Position, Trade, TradingMode, WalletView};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    StartTrading {
        mode: TradingMode,
        /// Falls back to the configured token
        #[serde(default)]
        token_address: Option<String>,
    },
    StopTrading,
    StartBundledBuy {
        token_address: String,
        #[serde(default)]
        split_count: Option<usize>,
        #[serde(default)]
        split_size: Option<f64>,
        /// SOL to spend; the configured target when absent
        #[serde(default)]
        amount: Option<f64>,
    },
    StartIncrementalSell {
        token_address: String,
        /// Share of each position to sell; a full exit when absent
        #[serde(default)]
        fraction: Option<f64>,
    },
    StopBundler,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::StartTrading { .. } => "start_trading",
            Command::StopTrading => "stop_trading",
            Command::StartBundledBuy { .. } => "start_bundled_buy",
            Command::StartIncrementalSell { .. } => "start_incremental_sell",
            Command::StopBundler => "stop_bundler",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletSnapshot {
    pub wallets: Vec<WalletView>,
    pub total_balance: f64,
    pub total_profit_loss: f64,
    pub active_wallets: usize,
}

impl WalletSnapshot {
    pub fn from_views(wallets: Vec<WalletView>) -> Self {
        let total_balance = wallets.iter().map(|w| w.balance).sum();
        let total_profit_loss = wallets.iter().map(|w| w.profit_loss).sum();
        let active_wallets = wallets.iter().filter(|w| w.eligible).count();
        Self {
            wallets,
            total_balance,
            total_profit_loss,
            active_wallets,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionSnapshot {
    pub positions: Vec<Position>,
    /// Cumulative price impact of the latest job per token
    pub price_impacts: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum OutboundMessage {
    Trade(Trade),
    WalletUpdate(WalletSnapshot),
    PositionUpdate(PositionSnapshot),
    BundlerUpdate(BundlerStatus),
}

impl OutboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::Trade(_) => "trade",
            OutboundMessage::WalletUpdate(_) => "wallet_update",
            OutboundMessage::PositionUpdate(_) => "position_update",
            OutboundMessage::BundlerUpdate(_) => "bundler_update",
        }
    }
}

/// Reply to one inbound command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandReply {
    pub command: String,
    pub ok: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
}

impl CommandReply {
    pub fn ok(command: &str, message: impl Into<String>) -> Self {
        Self {
            command: command.to_string(),
            ok: true,
            message: message.into(),
            job_id: None,
        }
    }

    pub fn job(command: &str, job_id: Uuid) -> Self {
        Self {
            job_id: Some(job_id),
            ..Self::ok(command, format!("job {} started", job_id))
        }
    }

    pub fn error(command: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            ..Self::ok(command, message)
        }
    }
}
