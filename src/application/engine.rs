//! Trading Engine
//!
//! Wires the pool, executor, job runners, risk manager, price monitor,
//! pattern engine and broadcaster together and dispatches inbound commands.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::broadcaster::{StateBroadcaster, DEFAULT_WINDOW};
use super::bundler::{BuyRequest, Bundler};
use super::executor::{ExecutorConfig, TransactionExecutor};
use super::jobs::{BundlerError, JobContext, JobOutcome, JobRegistry, JobSettings, JobTicket};
use super::messages::{Command, CommandReply, OutboundMessage, WalletSnapshot};
use super::pattern_engine::{PatternEngine, PatternError};
use super::price_monitor::{PriceMonitor, PriceTick};
use super::risk_manager::{LiquidationOutcome, RiskManager, RiskSettings};
use super::seller::{IncrementalSeller, SellRequest};
use super::token_locks::TokenLocks;
use super::trade_log::TradeLog;
use super::wallet_pool::{PoolConfig, RecallReport, WalletPool, WalletPoolError};
use crate::domain::{BundlerStatus, DomainEvent, EventSink, ModeTable, Position, SessionReport, TradingMode, WalletView};
use crate::ports::{NetworkRpc, PriceFeed, SignerProvider};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Bundler(#[from] BundlerError),
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error(transparent)]
    WalletPool(#[from] WalletPoolError),
    #[error("No token address given and none configured")]
    NoToken,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub pool: PoolConfig,
    pub executor: ExecutorConfig,
    pub jobs: JobSettings,
    pub risk: RiskSettings,
    pub modes: ModeTable,
    /// Token used by `start_trading` when the command names none
    pub default_token: Option<String>,
    /// SOL spent by `start_bundled_buy` without an amount
    pub target_amount_sol: f64,
    pub target_volume_sol: Option<f64>,
    pub monitor_interval: Duration,
    pub broadcast_window: Duration,
    pub channel_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            executor: ExecutorConfig::default(),
            jobs: JobSettings::default(),
            risk: RiskSettings::default(),
            modes: ModeTable::default(),
            default_token: None,
            target_amount_sol: 1.0,
            target_volume_sol: None,
            monitor_interval: Duration::from_secs(1),
            broadcast_window: DEFAULT_WINDOW,
            channel_capacity: 256,
        }
    }
}

pub struct TradingEngine {
    ctx: Arc<JobContext>,
    bundler: Arc<Bundler>,
    seller: Arc<IncrementalSeller>,
    patterns: PatternEngine,
    feed: Arc<dyn PriceFeed>,
    settings: EngineSettings,
    outbound: broadcast::Sender<OutboundMessage>,
    events: Mutex<Option<mpsc::UnboundedReceiver<DomainEvent>>>,
    shutdown: watch::Sender<bool>,
    /// Risk loop and price monitor; both exit on the shutdown signal
    workers: Mutex<Vec<JoinHandle<()>>>,
    broadcaster: Mutex<Option<JoinHandle<()>>>,
    tickets: Mutex<HashMap<Uuid, JobTicket>>,
}

impl TradingEngine {
    pub fn new(
        network: Arc<dyn NetworkRpc>,
        signers: Arc<dyn SignerProvider>,
        feed: Arc<dyn PriceFeed>,
        settings: EngineSettings,
    ) -> Self {
        let (sink, events) = EventSink::channel();
        let executor = Arc::new(TransactionExecutor::new(network.clone(), settings.executor.clone()));
        let pool = Arc::new(WalletPool::new(
            network,
            executor.clone(),
            signers,
            settings.pool.clone(),
            sink.clone(),
        ));
        let trades = Arc::new(TradeLog::new(settings.target_volume_sol, sink.clone()));
        let risk = Arc::new(RiskManager::new(
            pool.clone(),
            executor.clone(),
            trades.clone(),
            settings.risk.clone(),
            sink.clone(),
        ));
        let (ticks, _) = broadcast::channel(settings.channel_capacity);

        let ctx = Arc::new(JobContext {
            pool,
            executor,
            risk,
            registry: Arc::new(JobRegistry::new(settings.jobs.history_limit, sink)),
            trades,
            locks: TokenLocks::new(),
            ticks,
            settings: settings.jobs.clone(),
        });
        let bundler = Arc::new(Bundler::new(ctx.clone()));
        let seller = Arc::new(IncrementalSeller::new(ctx.clone()));
        let patterns = PatternEngine::new(
            bundler.clone(),
            seller.clone(),
            ctx.pool.clone(),
            ctx.risk.clone(),
            settings.modes.clone(),
            settings.jobs.params.clone(),
        );
        let (outbound, _) = broadcast::channel(settings.channel_capacity);
        let (shutdown, _) = watch::channel(false);

        Self {
            ctx,
            bundler,
            seller,
            patterns,
            feed,
            settings,
            outbound,
            events: Mutex::new(Some(events)),
            shutdown,
            workers: Mutex::new(Vec::new()),
            broadcaster: Mutex::new(None),
            tickets: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn the broadcaster, the risk loop and the price monitor. Runs once.
    pub fn start(&self) {
        let Some(events) = lock(&self.events).take() else {
            tracing::warn!("Engine already started");
            return;
        };

        let broadcaster = StateBroadcaster::new(events, self.outbound.clone(), self.settings.broadcast_window);
        let risk_loop = self
            .ctx
            .risk
            .clone()
            .run(self.ctx.ticks.subscribe(), self.shutdown.subscribe());
        let monitor = PriceMonitor::new(
            self.feed.clone(),
            self.ctx.risk.clone(),
            self.ctx.ticks.clone(),
            self.settings.monitor_interval,
        );

        *lock(&self.broadcaster) = Some(tokio::spawn(broadcaster.run()));
        let mut workers = lock(&self.workers);
        workers.push(tokio::spawn(risk_loop));
        workers.push(tokio::spawn(monitor.run(self.shutdown.subscribe())));
        tracing::info!("Trading engine started");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutboundMessage> {
        self.outbound.subscribe()
    }

    pub fn main_address(&self) -> String {
        self.ctx.pool.main_address()
    }

    /// Create and fund `count` pool wallets from the main wallet
    pub async fn setup_wallets(&self, count: usize, sol_per_wallet: f64) -> Result<Vec<WalletView>, EngineError> {
        Ok(self.ctx.pool.create(count, sol_per_wallet).await?)
    }

    /// Handle a command, folding any error into the reply
    pub async fn dispatch(&self, command: Command) -> CommandReply {
        let name = command.name();
        match self.handle(command).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!("Command {} refused: {}", name, e);
                CommandReply::error(name, e.to_string())
            }
        }
    }

    pub async fn handle(&self, command: Command) -> Result<CommandReply, EngineError> {
        let name = command.name();
        match command {
            Command::StartTrading { mode, token_address } => {
                let token = token_address
                    .or_else(|| self.settings.default_token.clone())
                    .ok_or(EngineError::NoToken)?;
                self.patterns.start(mode, &token).await?;
                Ok(CommandReply::ok(name, format!("trading {} in {} mode", token, mode)))
            }
            Command::StopTrading => {
                let message = if self.patterns.stop().await {
                    "trading stopped"
                } else {
                    "trading was not running"
                };
                Ok(CommandReply::ok(name, message))
            }
            Command::StartBundledBuy {
                token_address,
                split_count,
                split_size,
                amount,
            } => {
                let mut request = BuyRequest::new(&token_address, amount.unwrap_or(self.settings.target_amount_sol));
                request.split_count = split_count;
                request.split_size = split_size;
                let ticket = self.bundler.launch(request)?;
                Ok(self.track(name, ticket))
            }
            Command::StartIncrementalSell {
                token_address,
                fraction,
            } => {
                let request = match fraction {
                    Some(f) => SellRequest::partial(&token_address, f),
                    None => SellRequest::full_exit(&token_address),
                };
                let ticket = self.seller.launch(request).await?;
                Ok(self.track(name, ticket))
            }
            Command::StopBundler => {
                let cancelled = self.bundler.cancel_all();
                Ok(CommandReply::ok(name, format!("{} pending sub-orders cancelled", cancelled)))
            }
        }
    }

    fn track(&self, name: &str, ticket: JobTicket) -> CommandReply {
        let id = ticket.id;
        let mut tickets = lock(&self.tickets);
        tickets.retain(|_, t| !t.is_finished());
        tickets.insert(id, ticket);
        CommandReply::job(name, id)
    }

    /// Wait for a job launched through this engine. Finished jobs whose
    /// ticket was pruned are answered from the registry history.
    pub async fn wait_for_job(&self, id: &Uuid) -> Option<JobOutcome> {
        let ticket = lock(&self.tickets).remove(id);
        match ticket {
            Some(ticket) => ticket.wait().await.ok(),
            None => self.ctx.registry.outcome(id),
        }
    }

    pub fn cancel_job(&self, id: &Uuid) -> bool {
        self.bundler.cancel(id)
    }

    /// Evaluate a price observation right away
    pub async fn push_price(&self, token_address: &str, price: f64) -> Vec<LiquidationOutcome> {
        self.ctx.risk.on_price_tick(token_address, price).await
    }

    /// Publish a price tick to every subscriber, the risk loop included
    pub fn publish_price(&self, token_address: &str, price: f64) {
        if self.ctx.ticks.send(PriceTick::new(token_address, price)).is_err() {
            tracing::debug!("No price tick subscribers");
        }
    }

    pub fn bundler_status(&self) -> BundlerStatus {
        self.bundler.status()
    }

    pub async fn trading_mode(&self) -> Option<TradingMode> {
        self.patterns.current_mode().await
    }

    pub async fn positions(&self) -> Vec<Position> {
        self.ctx.risk.positions().await
    }

    pub async fn wallets(&self) -> WalletSnapshot {
        WalletSnapshot::from_views(self.ctx.pool.snapshot().await)
    }

    pub async fn session_report(&self) -> SessionReport {
        self.ctx.trades.report().await
    }

    pub fn trade_log(&self) -> Arc<TradeLog> {
        self.ctx.trades.clone()
    }

    pub fn job_history(&self) -> Vec<JobOutcome> {
        self.ctx.registry.history()
    }

    /// Stop scheduling, cancel pending work, let submitted orders settle,
    /// then optionally sweep every pool wallet back to the main wallet.
    ///
    /// Returns only after every live job (pattern-launched ones included) has
    /// been archived and the risk loop has finished its in-flight liquidations.
    pub async fn shutdown(&self, recall: bool) -> Option<RecallReport> {
        self.patterns.stop().await;
        let cancelled = self.bundler.cancel_all();
        tracing::info!("Shutting down: {} pending sub-orders cancelled", cancelled);

        let tickets: Vec<JobTicket> = lock(&self.tickets).drain().map(|(_, t)| t).collect();
        for ticket in tickets {
            let id = ticket.id;
            if let Err(e) = ticket.wait().await {
                tracing::error!("Job {} did not settle: {}", id, e);
            }
        }

        self.ctx.registry.wait_idle().await;

        if self.shutdown.send(true).is_err() {
            tracing::debug!("Risk loop and price monitor were not running");
        }
        let workers: Vec<JoinHandle<()>> = lock(&self.workers).drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!("Engine task failed during shutdown: {}", e);
            }
        }
        if let Some(broadcaster) = lock(&self.broadcaster).take() {
            broadcaster.abort();
        }

        if !recall {
            return None;
        }
        let report = self.ctx.pool.recall().await;
        tracing::info!(
            "Recalled {:.6} SOL from {} wallets, {} failures",
            report.total_sol(),
            report.recalled.len(),
            report.failures.len()
        );
        Some(report)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::fixtures::fast_params;
    use crate::application::price_monitor::QuotePriceFeed;
    use crate::domain::{JobState, ModeParams, LAMPORTS_PER_SOL};
    use crate::ports::mocks::{MockNetwork, MockSignerProvider};

    fn engine() -> (Arc<MockNetwork>, TradingEngine) {
        let net = Arc::new(MockNetwork::new().with_balance("main-wallet", 100 * LAMPORTS_PER_SOL));
        let settings = EngineSettings {
            executor: ExecutorConfig {
                max_retries: 3,
                base_backoff: Duration::from_millis(1),
                confirm_timeout: Duration::from_millis(40),
                confirm_poll: Duration::from_millis(2),
            },
            jobs: JobSettings {
                params: fast_params(),
                sell_chunks: 2,
                ..Default::default()
            },
            modes: ModeTable::default().with_override(
                TradingMode::Safe,
                ModeParams {
                    min_amount: 0.05,
                    max_amount: 0.1,
                    min_delay_ms: 1,
                    max_delay_ms: 2,
                    interval_secs: 60,
                    ..ModeParams::defaults(TradingMode::Safe)
                },
            ),
            monitor_interval: Duration::from_secs(60),
            broadcast_window: Duration::from_millis(20),
            default_token: Some("TKNA".into()),
            ..Default::default()
        };
        let engine = TradingEngine::new(
            net.clone(),
            Arc::new(MockSignerProvider::default()),
            Arc::new(QuotePriceFeed::new(net.clone())),
            settings,
        );
        (net, engine)
    }

    async fn eventually(check: impl Fn() -> bool) -> bool {
        for _ in 0..250 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        check()
    }

    fn job_id(reply: &CommandReply) -> Uuid {
        assert!(reply.ok, "{}", reply.message);
        reply.job_id.unwrap()
    }

    #[tokio::test]
    async fn test_buy_then_sell_commands() {
        let (_net, engine) = engine();
        engine.setup_wallets(2, 1.0).await.unwrap();

        let reply = engine
            .dispatch(Command::StartBundledBuy {
                token_address: "TKNA".into(),
                split_count: Some(2),
                split_size: None,
                amount: Some(0.4),
            })
            .await;
        let outcome = engine.wait_for_job(&job_id(&reply)).await.unwrap();
        assert_eq!(outcome.state, JobState::Completed);
        assert_eq!(engine.positions().await.len(), 2);

        let reply = engine
            .dispatch(Command::StartIncrementalSell {
                token_address: "TKNA".into(),
                fraction: None,
            })
            .await;
        let outcome = engine.wait_for_job(&job_id(&reply)).await.unwrap();
        assert_eq!(outcome.state, JobState::Completed);
        assert!(engine.positions().await.is_empty());
        let report = engine.session_report().await;
        assert_eq!(report.trade_counts.buys, 2);
        assert_eq!(report.trade_counts.sells, 4);
    }

    #[tokio::test]
    async fn test_errors_become_replies() {
        let (_net, engine) = engine();
        let reply = engine
            .dispatch(Command::StartIncrementalSell {
                token_address: "TKNA".into(),
                fraction: None,
            })
            .await;
        assert!(!reply.ok);
        assert_eq!(reply.command, "start_incremental_sell");

        let reply = engine.dispatch(Command::StopTrading).await;
        assert!(reply.ok);
        assert_eq!(reply.message, "trading was not running");
    }

    #[tokio::test]
    async fn test_stop_bundler_twice() {
        let (_net, engine) = engine();
        engine.setup_wallets(2, 1.0).await.unwrap();
        let first = engine.dispatch(Command::StopBundler).await;
        let second = engine.dispatch(Command::StopBundler).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_broadcast_after_start() {
        let (_net, engine) = engine();
        engine.start();
        engine.start();
        let mut rx = engine.subscribe();
        engine.setup_wallets(2, 1.0).await.unwrap();

        // Funding events may straddle a window
        let mut seen = 0;
        while seen < 2 {
            match rx.recv().await.unwrap() {
                OutboundMessage::WalletUpdate(snapshot) => {
                    seen = snapshot.wallets.len();
                    assert_eq!(snapshot.active_wallets, seen);
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        engine.shutdown(false).await;
    }

    #[tokio::test]
    async fn test_shutdown_recalls_funds() {
        let (net, engine) = engine();
        engine.setup_wallets(3, 1.0).await.unwrap();
        let report = engine.shutdown(true).await.unwrap();
        assert_eq!(report.recalled.len(), 3);
        assert!(report.failures.is_empty());
        assert!(net.balance_of("main-wallet") > 99 * LAMPORTS_PER_SOL);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_pattern_job() {
        let (net, engine) = engine();
        engine.start();
        engine.setup_wallets(2, 1.0).await.unwrap();
        net.hold_next_confirmations(1);

        let reply = engine
            .dispatch(Command::StartTrading {
                mode: TradingMode::Safe,
                token_address: None,
            })
            .await;
        assert!(reply.ok, "{}", reply.message);
        assert!(eventually(|| net.sent_orders().len() == 1).await);
        assert_eq!(engine.bundler_status().active_bundles, 1);

        engine.shutdown(false).await;

        // The submitted leg settled before shutdown returned; the other was cancelled
        let status = engine.bundler_status();
        assert_eq!(status.active_bundles, 0);
        assert_eq!(status.pending_transactions, 0);
        let history = engine.job_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].state, JobState::Cancelled);
        assert_eq!(history[0].counts.confirmed, 1);
        assert_eq!(history[0].counts.cancelled, 1);
        assert_eq!(engine.session_report().await.trade_counts.buys, 1);
        assert_eq!(engine.trading_mode().await, None);
    }

    #[tokio::test]
    async fn test_stop_trading_lets_running_job_finish() {
        let (net, engine) = engine();
        engine.setup_wallets(2, 1.0).await.unwrap();
        net.hold_next_confirmations(1);

        let reply = engine
            .dispatch(Command::StartTrading {
                mode: TradingMode::Safe,
                token_address: None,
            })
            .await;
        assert!(reply.ok, "{}", reply.message);
        assert!(eventually(|| net.sent_orders().len() == 1).await);

        let reply = engine.dispatch(Command::StopTrading).await;
        assert_eq!(reply.message, "trading stopped");
        assert_eq!(engine.trading_mode().await, None);
        assert_eq!(engine.bundler_status().active_bundles, 1);

        assert!(eventually(|| engine.job_history().len() == 1).await);
        let outcome = &engine.job_history()[0];
        assert_eq!(outcome.state, JobState::Completed);
        assert_eq!(outcome.counts.confirmed, 2);
        assert_eq!(engine.session_report().await.trade_counts.buys, 2);
    }
}
