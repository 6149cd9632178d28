//! Signing Port
//!
//! Wallets carry a signing capability; key material stays behind this trait.

use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("Failed to create signer: {0}")]
    Creation(String),
    #[error("Failed to sign: {0}")]
    Signing(String),
    #[error("Key storage error: {0}")]
    Storage(#[from] std::io::Error),
}

pub trait TransactionSigner: Send + Sync {
    /// Base58 account address
    fn address(&self) -> String;

    /// Sign a serialized message, returning the raw signature bytes
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SignerError>;
}

/// Supplies the main (funding) signer and fresh pool signers
pub trait SignerProvider: Send + Sync {
    fn main_signer(&self) -> Arc<dyn TransactionSigner>;

    fn create_signer(&self) -> Result<Arc<dyn TransactionSigner>, SignerError>;
}
