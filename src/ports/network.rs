//! Network RPC Port
//!
//! The only ledger capabilities the engine relies on: balances, quotes,
//! sending and confirming transactions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::Side;
use super::signer::TransactionSigner;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum NetworkError {
    #[error("Network unreachable: {0}")]
    Unreachable(String),
    #[error("Timed out waiting for the network")]
    Timeout,
    #[error("Reference blockhash expired")]
    BlockhashExpired,
    #[error("Rate limited by upstream")]
    RateLimited,
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("Slippage tolerance exceeded")]
    SlippageExceeded,
    #[error("Transaction rejected: {0}")]
    Rejected(String),
    #[error("Signing failed: {0}")]
    Signing(String),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Invalid quote: {0}")]
    InvalidQuote(String),
}

impl NetworkError {
    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NetworkError::Unreachable(_)
                | NetworkError::Timeout
                | NetworkError::BlockhashExpired
                | NetworkError::RateLimited
        )
    }
}

/// A single trade leg as the executor sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub token_address: String,
    pub side: Side,
    /// SOL to spend for buys, token units to sell for sells
    pub amount: f64,
    pub slippage_bps: u16,
    /// Quoted price impact above this fraction is refused before sending
    pub max_price_impact: f64,
}

impl OrderRequest {
    pub fn buy(token_address: &str, sol: f64, slippage_bps: u16, max_price_impact: f64) -> Self {
        Self {
            token_address: token_address.to_string(),
            side: Side::Buy,
            amount: sol,
            slippage_bps,
            max_price_impact,
        }
    }

    pub fn sell(token_address: &str, tokens: f64, slippage_bps: u16, max_price_impact: f64) -> Self {
        Self {
            token_address: token_address.to_string(),
            side: Side::Sell,
            amount: tokens,
            slippage_bps,
            max_price_impact,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// SOL per token
    pub price: f64,
    /// Input amount in order units (SOL for buys, tokens for sells)
    pub in_amount: f64,
    /// Expected output in the opposite unit
    pub out_amount: f64,
    /// Quoted price impact as a fraction
    pub price_impact: f64,
    /// Opaque route payload handed back when sending
    #[serde(default)]
    pub route: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransactionRequest {
    Swap { order: OrderRequest, quote: Quote },
    Transfer { to: String, lamports: u64 },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Confirmation {
    pub slot: Option<u64>,
    /// Fill price read back from the ledger, when it can be derived
    pub realized_price: Option<f64>,
}

#[async_trait]
pub trait NetworkRpc: Send + Sync {
    async fn get_balance(&self, address: &str) -> Result<u64, NetworkError>;

    async fn get_quote(&self, order: &OrderRequest) -> Result<Quote, NetworkError>;

    /// Build, sign with `signer` and submit. Returns the transaction signature.
    async fn send_transaction(
        &self,
        signer: &dyn TransactionSigner,
        request: &TransactionRequest,
    ) -> Result<String, NetworkError>;

    /// `Ok(None)` while the transaction is not yet confirmed
    async fn confirm_transaction(&self, signature: &str) -> Result<Option<Confirmation>, NetworkError>;

    /// The caller stopped waiting on `signature`; drop anything tracked for it
    fn forget(&self, _signature: &str) {}
}
