//! Domain Layer - Core types for the bundled trading engine
//!
//! Pure state and rules with no I/O:
//! - `wallet`: pool accounts, balances, selection strategy
//! - `position`: per-(wallet, token) holdings and stop-loss logic
//! - `bundle`: jobs, sub-orders and their state machines, order splitting
//! - `trade`: immutable fill records
//! - `mode`: trading mode parameter tables
//! - `volume`: session volume ledger
//! - `events`: domain events consumed by the state broadcaster

pub mod wallet;
pub mod position;
pub mod bundle;
pub mod trade;
pub mod mode;
pub mod volume;
pub mod events;

pub use wallet::{TradingWallet, WalletView, WalletError, SelectionStrategy, LAMPORTS_PER_SOL, sol_to_lamports, lamports_to_sol};
pub use position::{Position, LiquidationState, StopPolicy, PositionError, DUST_EPSILON};
pub use bundle::{BundleJob, SubOrder, SubOrderStatus, SubOrderCounts, JobState, TransitionError, SplitError, split_amounts, SPLIT_EPSILON};
pub use trade::{Trade, Side};
pub use mode::{TradingMode, ModeParams, ModeTable, UnknownMode};
pub use volume::{VolumeTracker, SessionReport, TradeCounts, WalletStats, VolumeError};
pub use events::{DomainEvent, EventSink, BundlerStatus};
