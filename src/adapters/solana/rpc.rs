use solana_client::{rpc_client::RpcClient, rpc_config::RpcTransactionConfig};
use solana_sdk::{
    commitment_config::CommitmentConfig,
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::{Transaction, TransactionError, VersionedTransaction},
};
use solana_transaction_status::UiTransactionEncoding;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use crate::ports::NetworkError;

#[derive(Debug, Error)]
pub enum SolanaClientError {
    #[error("RPC request failed: {0}")]
    RpcError(String),
    #[error("Transaction failed: {0}")]
    TransactionError(String),
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),
}

impl From<SolanaClientError> for NetworkError {
    fn from(e: SolanaClientError) -> Self {
        match e {
            SolanaClientError::InvalidPublicKey(key) => NetworkError::InvalidAddress(key),
            SolanaClientError::InvalidSignature(sig) => NetworkError::Rejected(format!("bad signature {}", sig)),
            SolanaClientError::RpcError(msg) | SolanaClientError::TransactionError(msg) => classify(&msg),
        }
    }
}

/// Map an RPC error message onto the retry taxonomy
pub fn classify(message: &str) -> NetworkError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("blockhash not found") || lower.contains("block height exceeded") {
        NetworkError::BlockhashExpired
    } else if lower.contains("429") || lower.contains("too many requests") {
        NetworkError::RateLimited
    } else if lower.contains("insufficient") {
        NetworkError::InsufficientFunds(message.to_string())
    } else if lower.contains("0x1771") || lower.contains("slippage") {
        NetworkError::SlippageExceeded
    } else if lower.contains("timed out") || lower.contains("timeout") {
        NetworkError::Timeout
    } else if lower.contains("simulation failed") || lower.contains("custom program error") {
        NetworkError::Rejected(message.to_string())
    } else {
        NetworkError::Unreachable(message.to_string())
    }
}

fn parse_pubkey(key: &str) -> Result<Pubkey, SolanaClientError> {
    Pubkey::from_str(key).map_err(|e| SolanaClientError::InvalidPublicKey(format!("{}: {}", key, e)))
}

/// Wrapper around Solana RPC client with async-compatible methods
#[derive(Clone)]
pub struct SolanaClient {
    client: Arc<RpcClient>,
}

impl SolanaClient {
    /// Create a new Solana RPC client
    pub fn new(rpc_url: String) -> Self {
        let client = Arc::new(RpcClient::new_with_commitment(rpc_url, CommitmentConfig::confirmed()));
        Self { client }
    }

    /// Client with a commitment level by name ("processed", "confirmed", "finalized")
    pub fn with_commitment(rpc_url: String, commitment: &str) -> Result<Self, SolanaClientError> {
        let commitment = CommitmentConfig::from_str(commitment)
            .map_err(|_| SolanaClientError::RpcError(format!("unknown commitment level {}", commitment)))?;
        let client = Arc::new(RpcClient::new_with_commitment(rpc_url, commitment));
        Ok(Self { client })
    }

    /// Get SOL balance for a public key
    pub async fn get_balance(&self, pubkey: &str) -> Result<u64, SolanaClientError> {
        let pubkey = parse_pubkey(pubkey)?;

        // Spawn blocking to make sync RPC call async-compatible
        let client = Arc::clone(&self.client);
        tokio::task::spawn_blocking(move || {
            client
                .get_balance(&pubkey)
                .map_err(|e| SolanaClientError::RpcError(e.to_string()))
        })
        .await
        .map_err(|e| SolanaClientError::RpcError(format!("Task join error: {}", e)))?
    }

    /// Decimals of an SPL mint
    pub async fn get_mint_decimals(&self, mint: &str) -> Result<u8, SolanaClientError> {
        let mint = parse_pubkey(mint)?;

        let client = Arc::clone(&self.client);
        tokio::task::spawn_blocking(move || {
            client
                .get_token_supply(&mint)
                .map(|supply| supply.decimals)
                .map_err(|e| SolanaClientError::RpcError(e.to_string()))
        })
        .await
        .map_err(|e| SolanaClientError::RpcError(format!("Task join error: {}", e)))?
    }

    /// Send a legacy transaction to the network
    pub async fn send_transaction(&self, transaction: &Transaction) -> Result<String, SolanaClientError> {
        let tx = transaction.clone();
        let client = Arc::clone(&self.client);

        tokio::task::spawn_blocking(move || {
            client
                .send_transaction(&tx)
                .map(|sig| sig.to_string())
                .map_err(|e| SolanaClientError::TransactionError(e.to_string()))
        })
        .await
        .map_err(|e| SolanaClientError::RpcError(format!("Task join error: {}", e)))?
    }

    /// Send a versioned transaction (aggregator swaps use address lookup tables)
    pub async fn send_versioned_transaction(
        &self,
        transaction: &VersionedTransaction,
    ) -> Result<String, SolanaClientError> {
        let tx = transaction.clone();
        let client = Arc::clone(&self.client);

        tokio::task::spawn_blocking(move || {
            client
                .send_transaction(&tx)
                .map(|sig| sig.to_string())
                .map_err(|e| SolanaClientError::TransactionError(e.to_string()))
        })
        .await
        .map_err(|e| SolanaClientError::RpcError(format!("Task join error: {}", e)))?
    }

    /// Current status of a signature. `None` while not yet processed.
    pub async fn get_signature_status(
        &self,
        signature_str: &str,
    ) -> Result<Option<Result<(), TransactionError>>, SolanaClientError> {
        let signature = Signature::from_str(signature_str)
            .map_err(|e| SolanaClientError::InvalidSignature(e.to_string()))?;

        let client = Arc::clone(&self.client);
        tokio::task::spawn_blocking(move || {
            client
                .get_signature_status(&signature)
                .map_err(|e| SolanaClientError::RpcError(e.to_string()))
        })
        .await
        .map_err(|e| SolanaClientError::RpcError(format!("Task join error: {}", e)))?
    }

    /// Confirmed transaction with status meta, as the JSON the RPC node returns
    pub async fn get_transaction(&self, signature_str: &str) -> Result<serde_json::Value, SolanaClientError> {
        let signature = Signature::from_str(signature_str)
            .map_err(|e| SolanaClientError::InvalidSignature(e.to_string()))?;

        let client = Arc::clone(&self.client);
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Json),
            commitment: Some(CommitmentConfig::confirmed()),
            max_supported_transaction_version: Some(0),
        };
        tokio::task::spawn_blocking(move || {
            let tx = client
                .get_transaction_with_config(&signature, config)
                .map_err(|e| SolanaClientError::RpcError(e.to_string()))?;
            serde_json::to_value(&tx).map_err(|e| SolanaClientError::RpcError(e.to_string()))
        })
        .await
        .map_err(|e| SolanaClientError::RpcError(format!("Task join error: {}", e)))?
    }

    /// Get recent blockhash (needed for transaction building)
    pub async fn get_latest_blockhash(&self) -> Result<Hash, SolanaClientError> {
        let client = Arc::clone(&self.client);
        tokio::task::spawn_blocking(move || {
            client
                .get_latest_blockhash()
                .map_err(|e| SolanaClientError::RpcError(e.to_string()))
        })
        .await
        .map_err(|e| SolanaClientError::RpcError(format!("Task join error: {}", e)))?
    }
}
