//! Pattern Engine
//!
//! Maps a trading mode to a named pattern, plans each run as an ordered list
//! of steps and feeds them to the bundler and the incremental seller.
//!
//! Starting or stopping only gates new runs and steps. Jobs already launched
//! keep running to their own terminal state.

use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use super::bundler::{BuyRequest, Bundler};
use super::jobs::{BundlerError, JobParams, JobTicket};
use super::risk_manager::RiskManager;
use super::seller::{IncrementalSeller, SellRequest};
use super::wallet_pool::WalletPool;
use crate::domain::{ModeParams, ModeTable, StopPolicy, TradingMode};

/// Share of a coordinated wave's legs that buy; the rest sell
const COORDINATED_BUY_SHARE: f64 = 0.67;
const COORDINATED_BUY_SCALE: f64 = 0.8;
const COORDINATED_SELL_SCALE: f64 = 1.2;
const PUMP_SELL_PROBABILITY: f64 = 0.7;
const PUMP_SELL_FRACTION: f64 = 0.3;
const RAPID_SELL_FRACTION: f64 = 0.5;
const RAPID_GAP: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("Trading already running in {0} mode")]
    AlreadyRunning(TradingMode),
    #[error("No token address to trade")]
    NoToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// One bundled buy, sequential legs, long gaps
    Staggered,
    /// Bundled buy followed by a partial counter-sell wave
    Coordinated,
    /// Two buys per (probabilistic) sell
    Pump,
    /// Small buy/sell cycles with short gaps inside a burst window
    RapidCycle,
}

impl Pattern {
    pub fn for_mode(mode: TradingMode) -> Self {
        match mode {
            TradingMode::Safe => Pattern::Staggered,
            TradingMode::Normal => Pattern::Coordinated,
            TradingMode::Aggressive => Pattern::Pump,
            TradingMode::HighFrequency => Pattern::RapidCycle,
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Staggered => write!(f, "staggered"),
            Pattern::Coordinated => write!(f, "coordinated"),
            Pattern::Pump => write!(f, "pump"),
            Pattern::RapidCycle => write!(f, "rapid_cycle"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatternStep {
    /// Bundled buy of `amount` SOL
    Buy { amount: f64, split_count: usize },
    /// Incremental sell of this share of every open position
    Sell { fraction: f64 },
    Pause(Duration),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternPlan {
    pub pattern: Pattern,
    pub steps: Vec<PatternStep>,
    /// Steps not started within this window are dropped
    pub time_limit: Option<Duration>,
}

/// Plan one run of the mode's pattern
pub fn plan<R: Rng + ?Sized>(
    mode: TradingMode,
    params: &ModeParams,
    wallet_count: usize,
    rng: &mut R,
) -> PatternPlan {
    let pattern = Pattern::for_mode(mode);
    let legs = wallet_count.min(params.max_wallets).max(1);
    let leg_size = if params.max_amount > params.min_amount {
        rng.gen_range(params.min_amount..=params.max_amount)
    } else {
        params.min_amount
    };

    let mut steps = Vec::new();
    let mut time_limit = None;
    match pattern {
        Pattern::Staggered => {
            steps.push(PatternStep::Buy {
                amount: leg_size * legs as f64,
                split_count: legs,
            });
        }
        Pattern::Coordinated => {
            let buy_legs = ((legs as f64 * COORDINATED_BUY_SHARE).ceil() as usize).clamp(1, legs);
            let sell_legs = legs - buy_legs;
            steps.push(PatternStep::Buy {
                amount: leg_size * COORDINATED_BUY_SCALE * buy_legs as f64,
                split_count: buy_legs,
            });
            if sell_legs > 0 {
                steps.push(PatternStep::Pause(Duration::from_millis(rng.gen_range(5_000..=10_000))));
                let fraction = (sell_legs as f64 * COORDINATED_SELL_SCALE)
                    / (buy_legs as f64 * COORDINATED_BUY_SCALE);
                steps.push(PatternStep::Sell {
                    fraction: fraction.min(1.0),
                });
            }
        }
        Pattern::Pump => {
            let buy = PatternStep::Buy {
                amount: leg_size * legs as f64,
                split_count: legs,
            };
            steps.push(buy.clone());
            steps.push(PatternStep::Pause(between(params, rng)));
            steps.push(buy);
            if rng.gen_bool(PUMP_SELL_PROBABILITY) {
                steps.push(PatternStep::Pause(between(params, rng)));
                steps.push(PatternStep::Sell {
                    fraction: PUMP_SELL_FRACTION,
                });
            }
        }
        Pattern::RapidCycle => {
            for _ in 0..params.batch_size.max(1) {
                steps.push(PatternStep::Buy {
                    amount: leg_size,
                    split_count: 1,
                });
                steps.push(PatternStep::Pause(RAPID_GAP));
                steps.push(PatternStep::Sell {
                    fraction: RAPID_SELL_FRACTION,
                });
                steps.push(PatternStep::Pause(RAPID_GAP));
            }
            if params.burst_duration_secs > 0 {
                time_limit = Some(Duration::from_secs(params.burst_duration_secs));
            }
        }
    }

    PatternPlan {
        pattern,
        steps,
        time_limit,
    }
}

fn between<R: Rng + ?Sized>(params: &ModeParams, rng: &mut R) -> Duration {
    if params.max_delay_ms > params.min_delay_ms {
        Duration::from_millis(rng.gen_range(params.min_delay_ms..=params.max_delay_ms))
    } else {
        Duration::from_millis(params.min_delay_ms)
    }
}

/// Resolves once `stop` reads true or its sender is gone
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}

/// Sleep for `duration`. Returns true if a stop arrived first.
async fn pause(duration: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = stop_requested(stop) => true,
    }
}

struct Schedule {
    mode: TradingMode,
    token_address: String,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct PatternEngine {
    bundler: Arc<Bundler>,
    seller: Arc<IncrementalSeller>,
    pool: Arc<WalletPool>,
    risk: Arc<RiskManager>,
    modes: ModeTable,
    base_params: JobParams,
    schedule: Mutex<Option<Schedule>>,
}

impl PatternEngine {
    pub fn new(
        bundler: Arc<Bundler>,
        seller: Arc<IncrementalSeller>,
        pool: Arc<WalletPool>,
        risk: Arc<RiskManager>,
        modes: ModeTable,
        base_params: JobParams,
    ) -> Self {
        Self {
            bundler,
            seller,
            pool,
            risk,
            modes,
            base_params,
            schedule: Mutex::new(None),
        }
    }

    pub fn mode_params(&self, mode: TradingMode) -> ModeParams {
        self.modes.get(mode)
    }

    /// Begin scheduling pattern runs for `mode` on `token_address`
    pub async fn start(&self, mode: TradingMode, token_address: &str) -> Result<(), PatternError> {
        if token_address.is_empty() {
            return Err(PatternError::NoToken);
        }
        let mut schedule = self.schedule.lock().await;
        if let Some(current) = schedule.as_ref() {
            if !current.handle.is_finished() && !*current.stop.borrow() {
                return Err(PatternError::AlreadyRunning(current.mode));
            }
        }

        let params = self.modes.get(mode);
        let policy = self.risk.policy().await;
        self.risk
            .set_policy(StopPolicy {
                stop_loss_threshold: params.stop_loss_threshold,
                ..policy
            })
            .await;

        let (stop_tx, stop_rx) = watch::channel(false);
        let scheduler = Scheduler {
            bundler: self.bundler.clone(),
            seller: self.seller.clone(),
            pool: self.pool.clone(),
            mode,
            job_params: self.base_params.with_mode(&params),
            params,
            token_address: token_address.to_string(),
        };
        tracing::info!(
            "Trading started: {} mode, {} pattern on {}",
            mode,
            Pattern::for_mode(mode),
            token_address
        );
        let handle = tokio::spawn(scheduler.run(stop_rx));
        *schedule = Some(Schedule {
            mode,
            token_address: token_address.to_string(),
            stop: stop_tx,
            handle,
        });
        Ok(())
    }

    /// Stop scheduling and wait for the scheduler task to exit. Launched jobs keep
    /// running. Returns false if nothing was running.
    pub async fn stop(&self) -> bool {
        match self.schedule.lock().await.take() {
            Some(schedule) => {
                let was_running = !schedule.handle.is_finished();
                if schedule.stop.send(true).is_err() {
                    tracing::debug!("Scheduler already exited");
                }
                if let Err(e) = schedule.handle.await {
                    tracing::error!("Pattern scheduler task failed: {}", e);
                }
                tracing::info!(
                    "Trading stopped ({} on {}); in-flight jobs continue",
                    schedule.mode,
                    schedule.token_address
                );
                was_running
            }
            None => false,
        }
    }

    pub async fn current_mode(&self) -> Option<TradingMode> {
        self.schedule
            .lock()
            .await
            .as_ref()
            .filter(|s| !s.handle.is_finished())
            .map(|s| s.mode)
    }

    pub async fn is_running(&self) -> bool {
        self.current_mode().await.is_some()
    }
}

struct Scheduler {
    bundler: Arc<Bundler>,
    seller: Arc<IncrementalSeller>,
    pool: Arc<WalletPool>,
    mode: TradingMode,
    params: ModeParams,
    job_params: JobParams,
    token_address: String,
}

impl Scheduler {
    async fn run(self, mut stop: watch::Receiver<bool>) {
        let mut runs = 0u64;
        while !*stop.borrow() {
            let wallet_count = self.pool.wallet_count().await;
            let run = {
                let mut rng = rand::thread_rng();
                plan(self.mode, &self.params, wallet_count, &mut rng)
            };
            runs += 1;
            tracing::debug!("Pattern run {}: {} steps ({})", runs, run.steps.len(), run.pattern);

            let started = Instant::now();
            for step in run.steps {
                if *stop.borrow() {
                    break;
                }
                if run.time_limit.is_some_and(|limit| started.elapsed() >= limit) {
                    tracing::debug!("Burst window elapsed, ending run {}", runs);
                    break;
                }
                match step {
                    PatternStep::Buy { amount, split_count } => {
                        let request = BuyRequest::new(&self.token_address, amount)
                            .with_split_count(split_count)
                            .with_params(self.job_params.clone());
                        match self.bundler.launch(request) {
                            Ok(ticket) => self.follow(ticket, &mut stop).await,
                            Err(BundlerError::JobInProgress(token)) => {
                                tracing::warn!("Skipping buy step: a job is already running on {}", token)
                            }
                            Err(e) => tracing::error!("Buy step failed: {}", e),
                        }
                    }
                    PatternStep::Sell { fraction } => {
                        let request = SellRequest::partial(&self.token_address, fraction)
                            .with_params(self.job_params.clone());
                        match self.seller.launch(request).await {
                            Ok(ticket) => self.follow(ticket, &mut stop).await,
                            Err(BundlerError::JobInProgress(token)) => {
                                tracing::warn!("Skipping sell step: a job is already running on {}", token)
                            }
                            Err(BundlerError::NoPositions(_)) => {
                                tracing::debug!("Skipping sell step: nothing held")
                            }
                            Err(e) => tracing::error!("Sell step failed: {}", e),
                        }
                    }
                    PatternStep::Pause(duration) => {
                        if pause(duration, &mut stop).await {
                            break;
                        }
                    }
                }
            }

            if pause(Duration::from_secs(self.params.interval_secs), &mut stop).await {
                break;
            }
        }
        tracing::info!("Pattern scheduler exited after {} runs", runs);
    }

    /// Wait for a launched job, or stop waiting (not the job) on a stop request
    async fn follow(&self, ticket: JobTicket, stop: &mut watch::Receiver<bool>) {
        let id = ticket.id;
        tokio::select! {
            outcome = ticket.wait() => match outcome {
                Ok(outcome) => tracing::debug!("Job {} ended {}", id, outcome.state),
                Err(e) => tracing::error!("Job {} ended abnormally: {}", id, e),
            },
            _ = stop_requested(stop) => {
                tracing::info!("Trading stopped while job {} runs; it continues", id);
            }
        }
    }
}
