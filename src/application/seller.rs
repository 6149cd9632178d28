//! Incremental Seller
//!
//! The sell-side mirror of the bundler. Unwinds every open position on a
//! token in chunks, interleaving wallets so consecutive legs come from
//! different accounts.

use std::sync::Arc;

use super::jobs::{spawn_job, BundlerError, JobContext, JobParams, JobTicket};
use crate::domain::{BundleJob, LiquidationState, Position, Side, SubOrder};

#[derive(Debug, Clone, PartialEq)]
pub struct SellRequest {
    pub token_address: String,
    /// Share of each position to sell, in (0, 1]
    pub fraction: f64,
    pub params: Option<JobParams>,
}

impl SellRequest {
    /// Sell every position on the token down to zero
    pub fn full_exit(token_address: &str) -> Self {
        Self {
            token_address: token_address.to_string(),
            fraction: 1.0,
            params: None,
        }
    }

    pub fn partial(token_address: &str, fraction: f64) -> Self {
        Self {
            fraction,
            ..Self::full_exit(token_address)
        }
    }

    pub fn with_params(mut self, params: JobParams) -> Self {
        self.params = Some(params);
        self
    }

    fn is_full_exit(&self) -> bool {
        self.fraction >= 1.0
    }
}

pub struct IncrementalSeller {
    ctx: Arc<JobContext>,
}

impl IncrementalSeller {
    pub fn new(ctx: Arc<JobContext>) -> Self {
        Self { ctx }
    }

    pub async fn launch(&self, request: SellRequest) -> Result<JobTicket, BundlerError> {
        if !(request.fraction > 0.0 && request.fraction <= 1.0) {
            return Err(BundlerError::InvalidRequest(format!(
                "sell fraction must be in (0, 1], got {}",
                request.fraction
            )));
        }

        let lock = self.ctx.lock_token(&request.token_address)?;

        let positions: Vec<Position> = self
            .ctx
            .risk
            .positions_for_token(&request.token_address)
            .await
            .into_iter()
            .filter(|p| !p.is_closed() && p.liquidation_state == LiquidationState::None)
            .collect();
        if positions.is_empty() {
            return Err(BundlerError::NoPositions(request.token_address));
        }

        let sub_orders = sell_legs(&positions, request.fraction, self.ctx.settings.sell_chunks);
        let target: f64 = sub_orders.iter().map(|s| s.amount).sum();
        let mut job = BundleJob::new(request.token_address.clone(), Side::Sell, target);
        job.split_into(sub_orders)?;

        tracing::info!(
            "Incremental sell {} for {}: {:.0}% of {} positions in {} sub-orders",
            job.id,
            request.token_address,
            request.fraction * 100.0,
            positions.len(),
            job.split_count
        );

        let sweep = request.is_full_exit();
        let params = request.params.unwrap_or_else(|| self.ctx.settings.params.clone());
        Ok(spawn_job(&self.ctx, lock, job, params, sweep))
    }
}

/// Chunk each position and interleave the chunks round-robin across wallets
fn sell_legs(positions: &[Position], fraction: f64, chunks: usize) -> Vec<SubOrder> {
    let chunks = chunks.max(1);
    let mut legs = Vec::with_capacity(positions.len() * chunks);
    for _ in 0..chunks {
        for position in positions {
            let per_chunk = position.amount * fraction / chunks as f64;
            legs.push(SubOrder::for_wallet(position.wallet_address.clone(), per_chunk));
        }
    }
    legs
}
