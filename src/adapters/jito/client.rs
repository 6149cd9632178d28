//! Jito Bundle Client
//!
//! HTTP client for the block engine `sendBundle` endpoint.

use std::time::Duration;

use reqwest::Client;
use solana_sdk::{instruction::Instruction, pubkey::Pubkey, system_instruction};

use super::config::{tip_accounts, JitoConfig};
use super::error::JitoError;
use super::types::{BundleRequest, JsonRpcResponse};

/// Most transactions the block engine accepts in one bundle
pub const MAX_BUNDLE_LEN: usize = 5;

/// Group signed transactions into bundles of at most `per_bundle`, each
/// closed by a fresh tip transaction from `tip`.
pub fn plan_bundles(
    transactions: Vec<String>,
    per_bundle: usize,
    mut tip: impl FnMut() -> Result<String, JitoError>,
) -> Result<Vec<Vec<String>>, JitoError> {
    if transactions.is_empty() {
        return Err(JitoError::InvalidBundle("Bundle cannot be empty".into()));
    }
    if per_bundle == 0 || per_bundle >= MAX_BUNDLE_LEN {
        return Err(JitoError::InvalidBundle(format!(
            "{} transactions per bundle leaves no room for a tip",
            per_bundle
        )));
    }

    transactions
        .chunks(per_bundle)
        .map(|chunk| {
            let mut bundle = chunk.to_vec();
            bundle.push(tip()?);
            Ok(bundle)
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct JitoBundleClient {
    config: JitoConfig,
    http: Client,
}

impl JitoBundleClient {
    pub fn with_config(config: JitoConfig) -> Result<Self, JitoError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| JitoError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, http })
    }

    pub fn tip_lamports(&self) -> u64 {
        self.config.tip_lamports
    }

    pub fn txs_per_bundle(&self) -> usize {
        self.config.txs_per_bundle
    }

    pub fn block_engine_url(&self) -> &str {
        &self.config.block_engine_url
    }

    /// Submit one bundle of base64 transactions. Returns the bundle id.
    pub async fn send_bundle(&self, transactions: Vec<String>) -> Result<String, JitoError> {
        if transactions.is_empty() {
            return Err(JitoError::InvalidBundle("Bundle cannot be empty".into()));
        }
        if transactions.len() > MAX_BUNDLE_LEN {
            return Err(JitoError::InvalidBundle(format!(
                "Bundle cannot contain more than {} transactions",
                MAX_BUNDLE_LEN
            )));
        }

        let url = format!("{}/api/v1/bundles", self.config.block_engine_url);
        let mut req_builder = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&BundleRequest::new(transactions));

        if let Some(ref token) = self.config.api_token {
            req_builder = req_builder.header("x-jito-auth", token);
        }

        let response = req_builder.send().await?;
        if response.status().as_u16() == 429 {
            return Err(JitoError::RateLimited);
        }

        let rpc_response: JsonRpcResponse<String> = serde_json::from_str(&response.text().await?)?;
        if let Some(error) = rpc_response.error {
            return Err(JitoError::Api {
                code: error.code,
                message: error.message,
            });
        }
        rpc_response.result.ok_or_else(|| JitoError::Api {
            code: -1,
            message: "No bundle ID in response".into(),
        })
    }

    /// Submit bundles in order, stopping at the first one the engine refuses.
    /// Nothing is resent through plain RPC.
    pub async fn send_bundles(&self, bundles: Vec<Vec<String>>) -> Result<Vec<String>, JitoError> {
        let mut ids = Vec::with_capacity(bundles.len());
        for bundle in bundles {
            let id = self.execute_with_retry(|| self.send_bundle(bundle.clone())).await?;
            tracing::info!("Bundle {} submitted ({} transactions)", id, bundle.len());
            ids.push(id);
        }
        Ok(ids)
    }

    /// Run `operation` up to `max_retries` times with doubling backoff
    pub async fn execute_with_retry<F, Fut, T>(&self, operation: F) -> Result<T, JitoError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, JitoError>>,
    {
        let attempts = self.config.max_retries.max(1);
        let mut delay_ms = self.config.retry_delay_ms;
        let mut last_error = None;

        for attempt in 0..attempts {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    tracing::warn!("Block engine attempt {}/{} failed: {}", attempt + 1, attempts, e);
                    last_error = Some(e);
                    if attempt + 1 < attempts {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        delay_ms *= 2;
                    }
                }
            }
        }

        Err(JitoError::MaxRetriesExceeded {
            attempts,
            last_error: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    /// Transfer of the configured tip from `payer` to a random tip account
    pub fn tip_instruction(&self, payer: &Pubkey) -> Result<Instruction, JitoError> {
        if self.config.tip_lamports == 0 {
            return Err(JitoError::InvalidBundle("Tip amount cannot be zero".into()));
        }
        let tip_account = tip_accounts::random_tip_account()
            .parse::<Pubkey>()
            .map_err(|e| JitoError::InvalidTransaction(format!("Invalid tip account: {}", e)))?;
        Ok(system_instruction::transfer(payer, &tip_account, self.config.tip_lamports))
    }
}
