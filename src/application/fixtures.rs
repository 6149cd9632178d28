//! Wiring shared by the application unit tests

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use super::executor::{ExecutorConfig, TransactionExecutor};
use super::jobs::{JobContext, JobParams, JobRegistry, JobSettings};
use super::risk_manager::{RiskManager, RiskSettings};
use super::token_locks::TokenLocks;
use super::trade_log::TradeLog;
use super::wallet_pool::{PoolConfig, WalletPool};
use crate::domain::{DomainEvent, EventSink, LAMPORTS_PER_SOL};
use crate::ports::mocks::{MockNetwork, MockSignerProvider};

pub(crate) struct Fixture {
    pub net: Arc<MockNetwork>,
    pub ctx: Arc<JobContext>,
    pub events: mpsc::UnboundedReceiver<DomainEvent>,
}

pub(crate) fn fast_params() -> JobParams {
    JobParams {
        slippage_bps: 100,
        price_impact_ceiling: 0.05,
        cumulative_impact_ceiling: 0.5,
        min_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(3),
    }
}

impl Fixture {
    /// A job context over `wallets` funded mock wallets of 1 SOL each
    pub async fn new(wallets: usize) -> Self {
        let net = Arc::new(MockNetwork::new().with_balance("main-wallet", 100 * LAMPORTS_PER_SOL));
        let (sink, events) = EventSink::channel();

        let executor = Arc::new(TransactionExecutor::new(
            net.clone(),
            ExecutorConfig {
                max_retries: 3,
                base_backoff: Duration::from_millis(1),
                confirm_timeout: Duration::from_millis(40),
                confirm_poll: Duration::from_millis(2),
            },
        ));
        let pool = Arc::new(WalletPool::new(
            net.clone(),
            executor.clone(),
            Arc::new(MockSignerProvider::default()),
            PoolConfig::default(),
            sink.clone(),
        ));
        if wallets > 0 {
            pool.create(wallets, 1.0).await.unwrap();
        }

        let trades = Arc::new(TradeLog::new(None, sink.clone()));
        let risk = Arc::new(RiskManager::new(
            pool.clone(),
            executor.clone(),
            trades.clone(),
            RiskSettings::default(),
            sink.clone(),
        ));
        let (ticks, _) = broadcast::channel(64);

        let ctx = Arc::new(JobContext {
            pool,
            executor,
            risk,
            registry: Arc::new(JobRegistry::new(16, sink)),
            trades,
            locks: TokenLocks::new(),
            ticks,
            settings: JobSettings {
                params: fast_params(),
                jitter_pct: 0.1,
                default_split_count: 4,
                sell_chunks: 2,
                ..Default::default()
            },
        });

        Self { net, ctx, events }
    }

    /// Drain every event published so far
    pub fn drain_events(&mut self) -> Vec<DomainEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}
