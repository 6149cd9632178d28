//! Adapters Layer - External System Implementations
//!
//! This module contains implementations of the port traits:
//! - Jupiter: DEX aggregator API client
//! - Jito: block engine bundles for MEV-protected swaps
//! - Solana: RPC client, keypair signers and the live `NetworkRpc`
//! - Paper: in-memory ledger for dry runs
//! - CLI: Command-line interface definitions

pub mod jupiter;
pub mod jito;
pub mod solana;
pub mod paper;
pub mod cli;

pub use jupiter::JupiterClient;
pub use jito::{JitoBundleClient, JitoConfig};
pub use solana::{KeypairSigner, KeypairVault, SolanaClient, SolanaNetwork};
pub use paper::{PaperConfig, PaperNetwork};
pub use cli::CliApp;
