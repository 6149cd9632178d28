//! Soda Bundler - Multi-wallet bundled trading engine library
//!
//! Splits buys across a pool of funded wallets, sells positions back in
//! staggered chunks, enforces stop-losses and streams coalesced state to
//! subscribers.
//!
//! # Modules
//!
//! - `domain`: Core business types (TradingWallet, Position, BundleJob, Trade, modes)
//! - `ports`: Trait abstractions (NetworkRpc, TransactionSigner, PriceFeed)
//! - `adapters`: External implementations (Jupiter, Jito, Solana, paper ledger, CLI)
//! - `config`: Configuration loading and validation
//! - `application`: Wallet pool, executor, bundler, seller, risk, patterns, broadcaster

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod config;
pub mod application;
