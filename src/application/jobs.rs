//! Job Runner
//!
//! Shared machinery behind the bundler and the incremental seller. A job is
//! driven by one worker task that walks its sub-orders strictly in split
//! order: pick the next Pending leg, lock a wallet, submit, record the
//! outcome, wait the pacing delay. Cancellation only flips Pending legs to
//! Cancelled; a Submitted leg always runs to its confirmed or failed end.

use rand::Rng;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::executor::TransactionExecutor;
use super::price_monitor::PriceTick;
use super::risk_manager::RiskManager;
use super::token_locks::{TokenGuard, TokenLocks};
use super::trade_log::TradeLog;
use super::wallet_pool::WalletPool;
use crate::domain::{
    BundleJob, BundlerStatus, DomainEvent, EventSink, JobState, LiquidationState, ModeParams,
    SelectionStrategy, Side, SplitError, SubOrder, SubOrderCounts, SubOrderStatus, Trade,
    TransitionError,
};
use crate::ports::OrderRequest;

#[derive(Debug, Error)]
pub enum BundlerError {
    #[error("A job is already running for token {0}")]
    JobInProgress(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("No open positions for token {0}")]
    NoPositions(String),
    #[error("Split failed: {0}")]
    Split(#[from] SplitError),
    #[error("Job transition failed: {0}")]
    Transition(#[from] TransitionError),
    #[error("Job task failed: {0}")]
    TaskFailed(String),
}

/// Execution limits and pacing for one job
#[derive(Debug, Clone, PartialEq)]
pub struct JobParams {
    pub slippage_bps: u16,
    /// Quoted impact ceiling per sub-order (fraction)
    pub price_impact_ceiling: f64,
    /// Summed absolute impact across the job that aborts the remaining legs
    pub cumulative_impact_ceiling: f64,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for JobParams {
    fn default() -> Self {
        Self {
            slippage_bps: 100,
            price_impact_ceiling: 0.05,
            cumulative_impact_ceiling: 0.15,
            min_delay: Duration::from_millis(2_000),
            max_delay: Duration::from_millis(5_000),
        }
    }
}

impl JobParams {
    /// Slippage, per-order impact and pacing taken from a trading mode
    pub fn with_mode(&self, mode: &ModeParams) -> Self {
        Self {
            slippage_bps: mode.slippage_bps(),
            price_impact_ceiling: mode.price_impact,
            cumulative_impact_ceiling: self.cumulative_impact_ceiling,
            min_delay: Duration::from_millis(mode.min_delay_ms),
            max_delay: Duration::from_millis(mode.max_delay_ms.max(mode.min_delay_ms)),
        }
    }

    fn next_delay(&self) -> Duration {
        if self.max_delay <= self.min_delay {
            return self.min_delay;
        }
        rand::thread_rng().gen_range(self.min_delay..=self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct JobSettings {
    pub params: JobParams,
    /// Per-leg size perturbation for even splits (fraction)
    pub jitter_pct: f64,
    pub default_split_count: usize,
    /// Sub-orders per position when selling incrementally
    pub sell_chunks: usize,
    pub selection: SelectionStrategy,
    /// Finished jobs kept for status queries
    pub history_limit: usize,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            params: JobParams::default(),
            jitter_pct: 0.1,
            default_split_count: 4,
            sell_chunks: 3,
            selection: SelectionStrategy::RoundRobin,
            history_limit: 100,
        }
    }
}

/// Final (or current) rollup of one job
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcome {
    pub id: Uuid,
    pub token_address: String,
    pub side: Side,
    pub state: JobState,
    pub counts: SubOrderCounts,
    pub filled_amount: f64,
    pub cumulative_impact: f64,
}

impl From<&BundleJob> for JobOutcome {
    fn from(job: &BundleJob) -> Self {
        Self {
            id: job.id,
            token_address: job.token_address.clone(),
            side: job.side,
            state: job.state(),
            counts: job.counts(),
            filled_amount: job.filled_amount(),
            cumulative_impact: job.cumulative_impact,
        }
    }
}

/// Handle to a launched job
#[derive(Debug)]
pub struct JobTicket {
    pub id: Uuid,
    pub token_address: String,
    pub side: Side,
    handle: JoinHandle<JobOutcome>,
}

impl JobTicket {
    /// Wait for the job to reach a terminal state
    pub async fn wait(self) -> Result<JobOutcome, BundlerError> {
        self.handle
            .await
            .map_err(|e| BundlerError::TaskFailed(e.to_string()))
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Clone)]
struct ActiveJob {
    job: Arc<Mutex<BundleJob>>,
    cancelled: Arc<Notify>,
    params: JobParams,
    /// The last leg per wallet sells whatever the position still holds
    sweep_remainder: bool,
}

/// Live jobs plus the counters the bundler status is derived from
pub struct JobRegistry {
    active: Mutex<HashMap<Uuid, ActiveJob>>,
    history: Mutex<VecDeque<JobOutcome>>,
    history_limit: usize,
    completed: AtomicU64,
    impacts: Mutex<HashMap<String, f64>>,
    /// Number of live jobs, for callers that wait for the registry to drain
    live: watch::Sender<usize>,
    events: EventSink,
}

impl JobRegistry {
    pub fn new(history_limit: usize, events: EventSink) -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            history_limit: history_limit.max(1),
            completed: AtomicU64::new(0),
            impacts: Mutex::new(HashMap::new()),
            live: watch::channel(0).0,
            events,
        }
    }

    fn register(&self, job: BundleJob, params: JobParams, sweep_remainder: bool) -> ActiveJob {
        let id = job.id;
        let entry = ActiveJob {
            job: Arc::new(Mutex::new(job)),
            cancelled: Arc::new(Notify::new()),
            params,
            sweep_remainder,
        };
        let mut active = guard(&self.active);
        active.insert(id, entry.clone());
        self.live.send_replace(active.len());
        entry
    }

    /// Recomputed from live jobs on every call
    pub fn status(&self) -> BundlerStatus {
        let active = guard(&self.active);
        let mut status = BundlerStatus {
            completed_bundles: self.completed.load(Ordering::SeqCst),
            ..Default::default()
        };
        for entry in active.values() {
            let job = guard(&entry.job);
            if !job.state().is_terminal() {
                status.active_bundles += 1;
                status.pending_transactions += job.counts().outstanding();
            }
        }
        status
    }

    pub fn active_jobs(&self) -> Vec<JobOutcome> {
        let entries: Vec<ActiveJob> = guard(&self.active).values().cloned().collect();
        entries
            .iter()
            .map(|entry| JobOutcome::from(&*guard(&entry.job)))
            .collect()
    }

    pub fn is_active(&self, id: &Uuid) -> bool {
        guard(&self.active).contains_key(id)
    }

    /// Cancel one job's Pending legs. `None` if the job is not live.
    pub fn cancel(&self, id: &Uuid) -> Option<usize> {
        let entry = guard(&self.active).get(id).cloned()?;
        Some(Self::cancel_entry(&entry))
    }

    /// Cancel the Pending legs of every live job. Safe to repeat.
    pub fn cancel_all(&self) -> usize {
        let entries: Vec<ActiveJob> = guard(&self.active).values().cloned().collect();
        let cancelled: usize = entries.iter().map(Self::cancel_entry).sum();
        if cancelled > 0 {
            tracing::info!("Cancelled {} pending sub-orders across {} jobs", cancelled, entries.len());
            self.publish(None);
        }
        cancelled
    }

    fn cancel_entry(entry: &ActiveJob) -> usize {
        let cancelled = guard(&entry.job).cancel_pending();
        entry.cancelled.notify_one();
        cancelled
    }

    fn archive(&self, outcome: JobOutcome) {
        {
            let mut active = guard(&self.active);
            active.remove(&outcome.id);
            self.live.send_replace(active.len());
        }
        if outcome.state == JobState::Completed {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
        let mut history = guard(&self.history);
        history.push_back(outcome);
        while history.len() > self.history_limit {
            history.pop_front();
        }
    }

    /// Resolves once every live job has been archived
    pub async fn wait_idle(&self) {
        let mut live = self.live.subscribe();
        if live.wait_for(|n| *n == 0).await.is_err() {
            tracing::debug!("Job registry closed while waiting for jobs");
        }
    }

    /// Final outcome of an archived job
    pub fn outcome(&self, id: &Uuid) -> Option<JobOutcome> {
        guard(&self.history).iter().find(|o| o.id == *id).cloned()
    }

    pub fn history(&self) -> Vec<JobOutcome> {
        guard(&self.history).iter().cloned().collect()
    }

    /// Latest cumulative price impact per token
    pub fn impacts(&self) -> HashMap<String, f64> {
        guard(&self.impacts).clone()
    }

    fn publish(&self, impact: Option<(String, f64)>) {
        if let Some((token, value)) = &impact {
            guard(&self.impacts).insert(token.clone(), *value);
        }
        self.events.publish(DomainEvent::BundleStatusChanged {
            status: self.status(),
            price_impact: impact,
        });
    }
}

/// Everything a job worker needs
pub struct JobContext {
    pub pool: Arc<WalletPool>,
    pub executor: Arc<TransactionExecutor>,
    pub risk: Arc<RiskManager>,
    pub registry: Arc<JobRegistry>,
    pub trades: Arc<TradeLog>,
    pub locks: TokenLocks,
    pub ticks: broadcast::Sender<PriceTick>,
    pub settings: JobSettings,
}

impl JobContext {
    /// Take the token's job lock or refuse with `JobInProgress`
    pub(crate) fn lock_token(&self, token_address: &str) -> Result<TokenGuard, BundlerError> {
        self.locks
            .try_acquire(token_address)
            .ok_or_else(|| BundlerError::JobInProgress(token_address.to_string()))
    }
}

/// Register a split job and spawn its worker. The token lock moves into the
/// worker and is released only after the job is archived.
pub(crate) fn spawn_job(
    ctx: &Arc<JobContext>,
    lock: TokenGuard,
    job: BundleJob,
    params: JobParams,
    sweep_remainder: bool,
) -> JobTicket {
    let id = job.id;
    let token_address = job.token_address.clone();
    let side = job.side;

    let entry = ctx.registry.register(job, params, sweep_remainder);
    ctx.registry.publish(None);

    let runner = JobRunner {
        ctx: ctx.clone(),
        entry,
    };
    let handle = tokio::spawn(async move {
        let outcome = runner.run().await;
        drop(lock);
        outcome
    });

    JobTicket {
        id,
        token_address,
        side,
        handle,
    }
}

struct JobRunner {
    ctx: Arc<JobContext>,
    entry: ActiveJob,
}

impl JobRunner {
    fn with_job<T>(&self, f: impl FnOnce(&mut BundleJob) -> T) -> T {
        let mut job = guard(&self.entry.job);
        f(&mut job)
    }

    async fn run(self) -> JobOutcome {
        if let Err(e) = self.with_job(|job| job.start_executing()) {
            tracing::error!("Job could not start executing: {}", e);
        }
        self.ctx.registry.publish(None);

        loop {
            let next = self.with_job(|job| {
                job.next_pending()
                    .and_then(|i| job.sub_order(i).cloned().map(|sub| (i, sub)))
            });
            let Some((index, sub)) = next else {
                break;
            };

            self.execute(index, sub).await;

            let impact = self.with_job(|job| (job.token_address.clone(), job.cumulative_impact));
            self.ctx.registry.publish(Some(impact));

            if self.with_job(|job| job.next_pending().is_some()) {
                let delay = self.entry.params.next_delay();
                tracing::debug!("Next sub-order in {:?}", delay);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = self.entry.cancelled.notified() => {
                        tracing::debug!("Delay interrupted by cancellation");
                    }
                }
            }
        }

        let (resolved, outcome) = self.with_job(|job| {
            let resolved = job.resolve();
            (resolved, JobOutcome::from(&*job))
        });
        match resolved {
            Some(JobState::Completed) => tracing::info!(
                "Job {} completed: {} {} filled {:.6} over {} sub-orders",
                outcome.id,
                outcome.side,
                outcome.token_address,
                outcome.filled_amount,
                outcome.counts.confirmed
            ),
            Some(JobState::PartiallyFailed) => tracing::error!(
                "Job {} partially failed: {} confirmed, {} failed, {} cancelled",
                outcome.id,
                outcome.counts.confirmed,
                outcome.counts.failed,
                outcome.counts.cancelled
            ),
            Some(state) => tracing::warn!(
                "Job {} {}: {} confirmed, {} cancelled",
                outcome.id,
                state,
                outcome.counts.confirmed,
                outcome.counts.cancelled
            ),
            None => tracing::warn!("Job {} archived with sub-orders outstanding", outcome.id),
        }

        self.ctx.registry.archive(outcome.clone());
        self.ctx.registry.publish(None);
        outcome
    }

    async fn execute(&self, index: usize, sub: SubOrder) {
        let (job_id, token, side) = self.with_job(|job| (job.id, job.token_address.clone(), job.side));

        let lease = match sub.wallet_address.as_deref() {
            Some(address) => self.ctx.pool.lease(address).await,
            None => self.ctx.pool.select_for_order(self.ctx.settings.selection).await,
        };
        let mut wallet = match lease {
            Ok(wallet) => wallet,
            Err(e) => {
                tracing::error!("Job {} sub-order {}: no wallet: {}", job_id, index, e);
                self.with_job(|job| {
                    if let Err(te) = job.mark_failed(index, e.to_string(), 0) {
                        tracing::debug!("{}", te);
                    }
                });
                return;
            }
        };

        let amount = match side {
            Side::Buy => sub.amount,
            Side::Sell => match self.sell_amount(index, &sub, wallet.address(), &token).await {
                Some(amount) => amount,
                None => {
                    tracing::debug!(
                        "Job {} sub-order {}: nothing left to sell in {}",
                        job_id,
                        index,
                        wallet.address()
                    );
                    self.with_job(|job| {
                        if let Err(te) = job.skip(index, "position closed or under liquidation") {
                            tracing::debug!("{}", te);
                        }
                    });
                    return;
                }
            },
        };

        if let Err(e) = self.with_job(|job| job.mark_submitted(index, wallet.address(), amount)) {
            tracing::debug!("Job {} sub-order {} not submitted: {}", job_id, index, e);
            return;
        }
        self.ctx.registry.publish(None);

        let params = &self.entry.params;
        let order = match side {
            Side::Buy => OrderRequest::buy(&token, amount, params.slippage_bps, params.price_impact_ceiling),
            Side::Sell => OrderRequest::sell(&token, amount, params.slippage_bps, params.price_impact_ceiling),
        };

        match self.ctx.executor.submit(&mut wallet, &order).await {
            Ok(report) => {
                let tokens = report.token_amount(side);
                let over_ceiling = self.with_job(|job| {
                    if let Err(e) = job.mark_confirmed(
                        index,
                        report.signature.clone(),
                        report.fill_price,
                        report.price_impact,
                        report.attempts.saturating_sub(1),
                    ) {
                        tracing::warn!("{}", e);
                    }
                    job.cumulative_impact > params.cumulative_impact_ceiling
                });

                match side {
                    Side::Buy => {
                        self.ctx
                            .risk
                            .on_buy_fill(wallet.address(), &token, report.fill_price, tokens)
                            .await
                    }
                    Side::Sell => {
                        self.ctx.risk.on_sell_fill(wallet.address(), &token, tokens).await;
                    }
                }
                self.ctx
                    .trades
                    .record(Trade::new(
                        token.clone(),
                        wallet.address().to_string(),
                        side,
                        tokens,
                        report.fill_price,
                        report.signature.clone(),
                    ))
                    .await;
                self.ctx.pool.publish_balance(&wallet);
                if self.ctx.ticks.send(PriceTick::new(&token, report.fill_price)).is_err() {
                    tracing::trace!("No price tick subscribers");
                }

                if over_ceiling {
                    self.with_job(|job| job.abort("cumulative price impact ceiling exceeded"));
                }
            }
            Err(e) => {
                tracing::error!(
                    "Job {} sub-order {} failed from {}: {}",
                    job_id,
                    index,
                    wallet.address(),
                    e
                );
                self.with_job(|job| {
                    if let Err(te) = job.mark_failed(index, e.to_string(), e.attempts().saturating_sub(1)) {
                        tracing::warn!("{}", te);
                    }
                    if e.aborts_job() {
                        job.abort(&e.to_string());
                    }
                });
            }
        }
    }

    /// Live amount a sell leg should trade, or `None` to skip it
    async fn sell_amount(&self, index: usize, sub: &SubOrder, wallet: &str, token: &str) -> Option<f64> {
        let position = self.ctx.risk.position(wallet, token).await?;
        if position.is_closed() || position.liquidation_state == LiquidationState::Pending {
            return None;
        }
        let last_for_wallet = self.entry.sweep_remainder
            && self.with_job(|job| {
                !job.sub_orders().iter().skip(index + 1).any(|s| {
                    s.status == SubOrderStatus::Pending && s.wallet_address.as_deref() == Some(wallet)
                })
            });
        Some(if last_for_wallet {
            position.amount
        } else {
            sub.amount.min(position.amount)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executing_job(token: &str, legs: &[f64]) -> BundleJob {
        let target: f64 = legs.iter().sum();
        let mut job = BundleJob::new(token.to_string(), Side::Buy, target);
        job.split_into(legs.iter().map(|a| SubOrder::new(*a)).collect()).unwrap();
        job.start_executing().unwrap();
        job
    }

    #[test]
    fn test_status_is_derived_from_live_jobs() {
        let registry = JobRegistry::new(10, EventSink::disconnected());
        assert_eq!(registry.status(), BundlerStatus::default());

        let entry = registry.register(executing_job("TKNA", &[0.5, 0.5, 1.0]), JobParams::default(), false);
        registry.register(executing_job("TKNB", &[1.0]), JobParams::default(), false);

        let status = registry.status();
        assert_eq!(status.active_bundles, 2);
        assert_eq!(status.pending_transactions, 4);

        guard(&entry.job).mark_submitted(0, "w1", 0.5).unwrap();
        assert_eq!(registry.status().pending_transactions, 4);
    }

    #[test]
    fn test_cancel_all_is_idempotent() {
        let registry = JobRegistry::new(10, EventSink::disconnected());
        let entry = registry.register(executing_job("TKNA", &[0.5, 0.5, 1.0]), JobParams::default(), false);
        guard(&entry.job).mark_submitted(0, "w1", 0.5).unwrap();

        assert_eq!(registry.cancel_all(), 2);
        let after_first = registry.status();
        assert_eq!(registry.cancel_all(), 0);
        assert_eq!(registry.status(), after_first);

        let job = guard(&entry.job);
        assert_eq!(job.sub_order(0).unwrap().status, SubOrderStatus::Submitted);
        assert_eq!(job.counts().cancelled, 2);
    }

    #[test]
    fn test_archive_counts_completed_only() {
        let registry = JobRegistry::new(2, EventSink::disconnected());
        let mut done = executing_job("TKNA", &[1.0]);
        done.mark_submitted(0, "w1", 1.0).unwrap();
        done.mark_confirmed(0, "sig".into(), 1.0, 0.0, 0).unwrap();
        done.resolve();
        let mut cancelled = executing_job("TKNB", &[1.0]);
        cancelled.cancel_pending();
        cancelled.resolve();

        registry.archive(JobOutcome::from(&done));
        registry.archive(JobOutcome::from(&cancelled));

        assert_eq!(registry.status().completed_bundles, 1);
        assert_eq!(registry.outcome(&done.id).unwrap().state, JobState::Completed);
        assert_eq!(registry.outcome(&cancelled.id).unwrap().state, JobState::Cancelled);
    }

    #[tokio::test]
    async fn test_wait_idle_resolves_after_last_archive() {
        let registry = Arc::new(JobRegistry::new(10, EventSink::disconnected()));
        registry.wait_idle().await;

        let mut a = executing_job("TKNA", &[1.0]);
        let mut b = executing_job("TKNB", &[1.0]);
        registry.register(a.clone(), JobParams::default(), false);
        registry.register(b.clone(), JobParams::default(), false);

        let waiter = tokio::spawn({
            let registry = registry.clone();
            async move { registry.wait_idle().await }
        });

        a.cancel_pending();
        a.resolve();
        registry.archive(JobOutcome::from(&a));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        b.cancel_pending();
        b.resolve();
        registry.archive(JobOutcome::from(&b));
        tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("registry never went idle")
            .unwrap();
    }

    #[test]
    fn test_history_is_bounded() {
        let registry = JobRegistry::new(2, EventSink::disconnected());
        let jobs: Vec<BundleJob> = (0..3).map(|_| executing_job("TKNA", &[1.0])).collect();
        for job in &jobs {
            registry.archive(JobOutcome::from(job));
        }
        assert_eq!(registry.history().len(), 2);
        assert!(registry.outcome(&jobs[0].id).is_none());
    }

    #[test]
    fn test_mode_params_override_pacing() {
        let params = JobParams::default().with_mode(&ModeParams::defaults(crate::domain::TradingMode::HighFrequency));
        assert_eq!(params.slippage_bps, 200);
        assert_eq!(params.min_delay, Duration::from_millis(100));
        assert_eq!(params.max_delay, Duration::from_millis(300));
        for _ in 0..20 {
            let delay = params.next_delay();
            assert!(delay >= params.min_delay && delay <= params.max_delay);
        }
    }
}
