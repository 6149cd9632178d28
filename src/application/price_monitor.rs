//! Price Monitor
//!
//! Polls a price feed for every token with open positions and publishes the
//! observations as ticks. The risk manager subscribes to the same channel.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

use super::risk_manager::RiskManager;
use crate::ports::{NetworkError, NetworkRpc, OrderRequest, PriceFeed};

#[derive(Debug, Clone, PartialEq)]
pub struct PriceTick {
    pub token_address: String,
    /// SOL per token
    pub price: f64,
}

impl PriceTick {
    pub fn new(token_address: &str, price: f64) -> Self {
        Self {
            token_address: token_address.to_string(),
            price,
        }
    }
}

/// Prices a token by quoting a one-unit sell through the network
pub struct QuotePriceFeed {
    network: Arc<dyn NetworkRpc>,
}

impl QuotePriceFeed {
    pub fn new(network: Arc<dyn NetworkRpc>) -> Self {
        Self { network }
    }
}

#[async_trait]
impl PriceFeed for QuotePriceFeed {
    async fn price(&self, token_address: &str) -> Result<f64, NetworkError> {
        let quote = self
            .network
            .get_quote(&OrderRequest::sell(token_address, 1.0, 100, 1.0))
            .await?;
        Ok(quote.price)
    }
}

pub struct PriceMonitor {
    feed: Arc<dyn PriceFeed>,
    risk: Arc<RiskManager>,
    ticks: broadcast::Sender<PriceTick>,
    interval: Duration,
}

impl PriceMonitor {
    pub fn new(
        feed: Arc<dyn PriceFeed>,
        risk: Arc<RiskManager>,
        ticks: broadcast::Sender<PriceTick>,
        interval: Duration,
    ) -> Self {
        Self {
            feed,
            risk,
            ticks,
            interval,
        }
    }

    /// Price every open token once. Returns the number of ticks published.
    pub async fn poll_once(&self) -> usize {
        let mut published = 0;
        for token in self.risk.open_tokens().await {
            match self.feed.price(&token).await {
                Ok(price) if price > 0.0 => {
                    if self.ticks.send(PriceTick::new(&token, price)).is_err() {
                        tracing::trace!("No price tick subscribers");
                    }
                    published += 1;
                }
                Ok(price) => tracing::warn!("Discarding price {} for {}", price, token),
                Err(e) => tracing::warn!("Price fetch failed for {}: {}", token, e),
            }
        }
        published
    }

    /// Poll until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Price monitor started, interval {:?}", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let published = self.poll_once().await;
                    tracing::trace!("Published {} price ticks", published);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Price monitor stopped");
    }
}
