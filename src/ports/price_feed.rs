use async_trait::async_trait;

use super::network::NetworkError;

/// Spot price source for open positions, in SOL per token
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn price(&self, token_address: &str) -> Result<f64, NetworkError>;
}
