//! Ports Layer - Trait definitions for external collaborators
//!
//! Following hexagonal architecture, these traits abstract:
//! - The ledger network (balances, quotes, send/confirm)
//! - Per-wallet signing capabilities
//! - Spot price feeds for risk monitoring

pub mod network;
pub mod signer;
pub mod price_feed;
pub mod mocks;

pub use network::{NetworkRpc, NetworkError, OrderRequest, Quote, TransactionRequest, Confirmation};
pub use signer::{TransactionSigner, SignerProvider, SignerError};
pub use price_feed::PriceFeed;
