//! Application Layer - The trading engine
//!
//! - `wallet_pool`: wallet allocation, funding, selection and recall
//! - `executor`: quote, send, confirm with classified retries
//! - `jobs`: job registry and the sub-order runner shared by both sides
//! - `bundler` / `seller`: buy-side splitting and sell-side unwinding
//! - `risk_manager`: positions and stop-loss liquidation
//! - `price_monitor`: price polling into the tick channel
//! - `pattern_engine`: mode-driven scheduling of buys and sells
//! - `broadcaster` / `messages`: coalesced outbound snapshots, inbound commands
//! - `engine`: wiring and command dispatch

pub mod executor;
pub mod token_locks;
pub mod wallet_pool;
pub mod trade_log;
pub mod jobs;
pub mod bundler;
pub mod seller;
pub mod risk_manager;
pub mod price_monitor;
pub mod pattern_engine;
pub mod messages;
pub mod broadcaster;
pub mod engine;

#[cfg(test)]
mod fixtures;

pub use executor::{TransactionExecutor, ExecutorConfig, ExecutionError, ExecutionReport, FailureClass};
pub use token_locks::{TokenLocks, TokenGuard};
pub use wallet_pool::{WalletPool, WalletPoolError, PoolConfig, RecallReport, WalletFailure};
pub use trade_log::TradeLog;
pub use jobs::{JobRegistry, JobContext, JobParams, JobSettings, JobOutcome, JobTicket, BundlerError};
pub use bundler::{Bundler, BuyRequest};
pub use seller::{IncrementalSeller, SellRequest};
pub use risk_manager::{RiskManager, RiskSettings, LiquidationOutcome};
pub use price_monitor::{PriceMonitor, PriceTick, QuotePriceFeed};
pub use pattern_engine::{PatternEngine, Pattern, PatternStep, PatternPlan, PatternError, plan};
pub use messages::{Command, CommandReply, OutboundMessage, WalletSnapshot, PositionSnapshot};
pub use broadcaster::{StateBroadcaster, Projection, DEFAULT_WINDOW};
pub use engine::{TradingEngine, EngineSettings, EngineError};
