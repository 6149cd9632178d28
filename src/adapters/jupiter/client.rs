//! Jupiter API Client
//!
//! HTTP client for the Jupiter swap API: quotes and swap transaction building.
//! Transport-level retries for 429/5xx live here; order-level retries are the
//! executor's job.

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

use super::quote::{QuoteRequest, QuoteResponse};
use super::swap::{SwapRequest, SwapResponse};
use crate::ports::NetworkError;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum JupiterError {
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error("Rate limit exceeded")]
    RateLimited,
    #[error("Slippage tolerance exceeded")]
    SlippageExceeded,
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("Failed to parse response: {0}")]
    Parse(String),
}

impl From<JupiterError> for NetworkError {
    fn from(e: JupiterError) -> Self {
        match e {
            JupiterError::Http(msg) => NetworkError::Unreachable(msg),
            JupiterError::RateLimited => NetworkError::RateLimited,
            JupiterError::SlippageExceeded => NetworkError::SlippageExceeded,
            JupiterError::Api { status, body } if status >= 500 => {
                NetworkError::Unreachable(format!("{}: {}", status, body))
            }
            JupiterError::Api { status, body } => NetworkError::Rejected(format!("{}: {}", status, body)),
            JupiterError::Parse(msg) => NetworkError::Rejected(msg),
        }
    }
}

/// Jupiter API client configuration
#[derive(Debug, Clone)]
pub struct JupiterConfig {
    pub api_base_url: String,
    /// Optional API key for higher rate limits
    pub api_key: Option<String>,
    pub timeout: Duration,
    /// Attempts per HTTP call on 429/5xx
    pub max_retries: u32,
}

impl Default for JupiterConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://lite-api.jup.ag/swap/v1".to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JupiterClient {
    config: JupiterConfig,
    http: Client,
}

impl JupiterClient {
    pub fn with_config(config: JupiterConfig) -> Result<Self, JupiterError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| JupiterError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, http })
    }

    pub fn api_base_url(&self) -> &str {
        &self.config.api_base_url
    }

    pub async fn get_quote(&self, request: &QuoteRequest) -> Result<QuoteResponse, JupiterError> {
        let url = format!("{}/quote", self.config.api_base_url);
        let mut req = self.http.get(&url).query(&request.query());
        if let Some(ref api_key) = self.config.api_key {
            req = req.header("x-api-key", api_key);
        }
        self.send(req).await
    }

    pub async fn get_swap_transaction(&self, request: &SwapRequest) -> Result<SwapResponse, JupiterError> {
        let url = format!("{}/swap", self.config.api_base_url);
        let mut req = self.http.post(&url).json(request);
        if let Some(ref api_key) = self.config.api_key {
            req = req.header("x-api-key", api_key);
        }
        self.send(req).await
    }

    /// Send with backoff on rate limiting and server errors, then decode
    async fn send<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T, JupiterError> {
        let attempts = self.config.max_retries.max(1);
        let mut last_error = JupiterError::Http("no attempt made".into());

        for attempt in 0..attempts {
            let Some(request) = req.try_clone() else {
                return Err(JupiterError::Http("request body cannot be retried".into()));
            };
            match request.send().await {
                Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
                    let backoff = Duration::from_secs(2u64.pow(attempt + 1));
                    tracing::warn!(
                        "Rate limited (429), backing off for {:?} (attempt {}/{})",
                        backoff,
                        attempt + 1,
                        attempts
                    );
                    last_error = JupiterError::RateLimited;
                    tokio::time::sleep(backoff).await;
                }
                Ok(response) if response.status().is_server_error() => {
                    last_error = JupiterError::Api {
                        status: response.status().as_u16(),
                        body: response.text().await.unwrap_or_default(),
                    };
                    tokio::time::sleep(Duration::from_millis(500 * (attempt as u64 + 1))).await;
                }
                Ok(response) => return decode(response).await,
                Err(e) => {
                    last_error = JupiterError::Http(e.to_string());
                    tokio::time::sleep(Duration::from_millis(500 * (attempt as u64 + 1))).await;
                }
            }
        }
        Err(last_error)
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, JupiterError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(api_error(status.as_u16(), body));
    }
    response
        .json()
        .await
        .map_err(|e| JupiterError::Parse(e.to_string()))
}

fn api_error(status: u16, body: String) -> JupiterError {
    // 6001 is the aggregator program's slippage error code
    if body.contains("SlippageToleranceExceeded") || body.contains("6001") {
        return JupiterError::SlippageExceeded;
    }
    JupiterError::Api { status, body }
}
