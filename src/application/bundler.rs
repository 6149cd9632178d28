//! Bundler
//!
//! Splits one logical buy into sub-orders and executes them across pool
//! wallets, one at a time, with randomized pacing.

use std::sync::Arc;
use uuid::Uuid;

use super::jobs::{spawn_job, BundlerError, JobContext, JobParams, JobTicket};
use crate::domain::{split_amounts, BundleJob, BundlerStatus, Side, SubOrder};

/// A bundled buy. `amount` is in SOL.
#[derive(Debug, Clone, PartialEq)]
pub struct BuyRequest {
    pub token_address: String,
    pub amount: f64,
    pub split_count: Option<usize>,
    /// Fixed leg size; takes precedence over `split_count`
    pub split_size: Option<f64>,
    /// Execution limits and pacing; the configured defaults when absent
    pub params: Option<JobParams>,
}

impl BuyRequest {
    pub fn new(token_address: &str, amount: f64) -> Self {
        Self {
            token_address: token_address.to_string(),
            amount,
            split_count: None,
            split_size: None,
            params: None,
        }
    }

    pub fn with_split_count(mut self, split_count: usize) -> Self {
        self.split_count = Some(split_count);
        self
    }

    pub fn with_split_size(mut self, split_size: f64) -> Self {
        self.split_size = Some(split_size);
        self
    }

    pub fn with_params(mut self, params: JobParams) -> Self {
        self.params = Some(params);
        self
    }
}

pub struct Bundler {
    ctx: Arc<JobContext>,
}

impl Bundler {
    pub fn new(ctx: Arc<JobContext>) -> Self {
        Self { ctx }
    }

    /// Split and start a buy job. Refused while another job runs on the token.
    pub fn launch(&self, request: BuyRequest) -> Result<JobTicket, BundlerError> {
        if request.token_address.is_empty() {
            return Err(BundlerError::InvalidRequest("token address is empty".into()));
        }
        if !(request.amount > 0.0) {
            return Err(BundlerError::InvalidRequest(format!(
                "buy amount must be positive, got {}",
                request.amount
            )));
        }

        let lock = self.ctx.lock_token(&request.token_address)?;

        let settings = &self.ctx.settings;
        let split_count = request.split_count.unwrap_or(settings.default_split_count);
        let amounts = split_amounts(
            request.amount,
            split_count,
            request.split_size,
            settings.jitter_pct,
            &mut rand::thread_rng(),
        )?;

        let mut job = BundleJob::new(request.token_address.clone(), Side::Buy, request.amount);
        job.split_into(amounts.into_iter().map(SubOrder::new).collect())?;

        tracing::info!(
            "Bundled buy {} for {}: {:.6} SOL in {} sub-orders",
            job.id,
            request.token_address,
            request.amount,
            job.split_count
        );

        let params = request.params.unwrap_or_else(|| settings.params.clone());
        Ok(spawn_job(&self.ctx, lock, job, params, false))
    }

    /// Cancel one job's Pending sub-orders. False if the job is not live.
    pub fn cancel(&self, id: &Uuid) -> bool {
        self.ctx.registry.cancel(id).is_some()
    }

    /// Cancel the Pending sub-orders of every live job, buy or sell
    pub fn cancel_all(&self) -> usize {
        self.ctx.registry.cancel_all()
    }

    pub fn status(&self) -> BundlerStatus {
        self.ctx.registry.status()
    }
}
