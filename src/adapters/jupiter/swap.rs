//! Jupiter Swap Types
//!
//! The swap endpoint turns a quote into an unsigned versioned transaction.

use base64::Engine;
use serde::{Deserialize, Serialize};
use solana_sdk::transaction::VersionedTransaction;

use super::client::JupiterError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapRequest {
    /// Wallet that signs and pays for the swap
    pub user_public_key: String,
    /// The full quote response from /quote
    pub quote_response: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prioritization_fee_lamports: Option<u64>,
    pub dynamic_compute_unit_limit: bool,
    pub wrap_and_unwrap_sol: bool,
}

impl SwapRequest {
    pub fn new(user_public_key: &str, quote_response: serde_json::Value) -> Self {
        Self {
            user_public_key: user_public_key.to_string(),
            quote_response,
            prioritization_fee_lamports: None,
            dynamic_compute_unit_limit: true,
            wrap_and_unwrap_sol: true,
        }
    }

    pub fn with_priority_fee(mut self, lamports: u64) -> Self {
        if lamports > 0 {
            self.prioritization_fee_lamports = Some(lamports);
        }
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapResponse {
    /// Base64 encoded serialized transaction ready to sign and send
    pub swap_transaction: String,
    pub last_valid_block_height: u64,
    #[serde(default)]
    pub prioritization_fee_lamports: u64,
}

impl SwapResponse {
    /// Decode the unsigned transaction
    pub fn transaction(&self) -> Result<VersionedTransaction, JupiterError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&self.swap_transaction)
            .map_err(|e| JupiterError::Parse(format!("swap transaction is not base64: {}", e)))?;
        bincode::deserialize(&bytes)
            .map_err(|e| JupiterError::Parse(format!("swap transaction does not decode: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::{
        hash::Hash,
        message::{v0, VersionedMessage},
        pubkey::Pubkey,
        signature::Signature,
    };

    #[test]
    fn test_swap_request_serialization() {
        let req = SwapRequest::new("wallet123", serde_json::json!({"inAmount": "1"})).with_priority_fee(5000);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["userPublicKey"], "wallet123");
        assert_eq!(json["prioritizationFeeLamports"], 5000);
        assert_eq!(json["wrapAndUnwrapSol"], true);
        assert_eq!(json["quoteResponse"]["inAmount"], "1");

        let json = serde_json::to_value(SwapRequest::new("w", serde_json::json!({})).with_priority_fee(0)).unwrap();
        assert!(json.get("prioritizationFeeLamports").is_none());
    }

    #[test]
    fn test_transaction_decodes() {
        let payer = Pubkey::new_unique();
        let message = v0::Message::try_compile(&payer, &[], &[], Hash::default()).unwrap();
        let tx = VersionedTransaction {
            signatures: vec![Signature::default()],
            message: VersionedMessage::V0(message),
        };
        let encoded = base64::engine::general_purpose::STANDARD.encode(bincode::serialize(&tx).unwrap());

        let response = SwapResponse {
            swap_transaction: encoded,
            last_valid_block_height: 1_000,
            prioritization_fee_lamports: 0,
        };
        let decoded = response.transaction().unwrap();
        assert_eq!(decoded.message.static_account_keys()[0], payer);
    }

    #[test]
    fn test_garbage_transaction_is_parse_error() {
        let response = SwapResponse {
            swap_transaction: "not base64!".to_string(),
            last_valid_block_height: 0,
            prioritization_fee_lamports: 0,
        };
        assert!(matches!(response.transaction(), Err(JupiterError::Parse(_))));
    }
}
