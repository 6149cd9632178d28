//! Bundle Jobs
//!
//! One logical buy or sell split into wallet-scoped sub-orders. Sub-orders
//! only move forward through their states; the job state is derived from
//! them when the job resolves.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use super::trade::Side;

/// Tolerance for comparing the sum of sub-order amounts to the target
pub const SPLIT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Created,
    Splitting,
    Executing,
    Completed,
    PartiallyFailed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::PartiallyFailed | JobState::Cancelled
        )
    }

    /// Splitting or Executing: the states covered by the per-token lock
    pub fn is_running(&self) -> bool {
        matches!(self, JobState::Splitting | JobState::Executing)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Created => "created",
            JobState::Splitting => "splitting",
            JobState::Executing => "executing",
            JobState::Completed => "completed",
            JobState::PartiallyFailed => "partially_failed",
            JobState::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubOrderStatus {
    Pending,
    Submitted,
    Confirmed,
    Failed,
    Cancelled,
}

impl SubOrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubOrderStatus::Confirmed | SubOrderStatus::Failed | SubOrderStatus::Cancelled
        )
    }

    fn can_become(&self, next: SubOrderStatus) -> bool {
        use SubOrderStatus::*;
        matches!(
            (*self, next),
            (Pending, Submitted)
                | (Pending, Cancelled)
                | (Pending, Failed)
                | (Submitted, Confirmed)
                | (Submitted, Failed)
        )
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransitionError {
    #[error("Sub-order {index} cannot move from {from:?} to {to:?}")]
    SubOrder {
        index: usize,
        from: SubOrderStatus,
        to: SubOrderStatus,
    },
    #[error("Job cannot move from {from} to {to}")]
    Job { from: JobState, to: JobState },
    #[error("Sub-order index {0} out of range")]
    UnknownSubOrder(usize),
    #[error("Sub-order amounts sum to {actual}, expected {expected}")]
    AmountMismatch { expected: f64, actual: f64 },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SplitError {
    #[error("Target amount must be positive, got {0}")]
    InvalidTarget(f64),
    #[error("Split count must be at least 1")]
    ZeroSplitCount,
    #[error("Split size must be positive, got {0}")]
    InvalidSplitSize(f64),
}

/// One wallet-scoped leg of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubOrder {
    /// Assigned at split time for sells, at submission time for buys
    pub wallet_address: Option<String>,
    pub amount: f64,
    pub status: SubOrderStatus,
    pub signature: Option<String>,
    pub retry_count: u32,
    pub fill_price: Option<f64>,
    pub error: Option<String>,
}

impl SubOrder {
    pub fn new(amount: f64) -> Self {
        Self {
            wallet_address: None,
            amount,
            status: SubOrderStatus::Pending,
            signature: None,
            retry_count: 0,
            fill_price: None,
            error: None,
        }
    }

    pub fn for_wallet(wallet_address: String, amount: f64) -> Self {
        Self {
            wallet_address: Some(wallet_address),
            ..Self::new(amount)
        }
    }
}

/// Sub-order counts by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubOrderCounts {
    pub pending: usize,
    pub submitted: usize,
    pub confirmed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl SubOrderCounts {
    /// Sub-orders not yet terminal
    pub fn outstanding(&self) -> usize {
        self.pending + self.submitted
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleJob {
    pub id: Uuid,
    pub token_address: String,
    pub side: Side,
    pub target_amount: f64,
    pub split_count: usize,
    state: JobState,
    sub_orders: Vec<SubOrder>,
    /// Sum of absolute price impacts across confirmed sub-orders
    pub cumulative_impact: f64,
    /// Set when a fatal failure aborted the remaining sub-orders
    fatal: bool,
    pub created_at: DateTime<Utc>,
}

impl BundleJob {
    pub fn new(token_address: String, side: Side, target_amount: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            token_address,
            side,
            target_amount,
            split_count: 0,
            state: JobState::Created,
            sub_orders: Vec::new(),
            cumulative_impact: 0.0,
            fatal: false,
            created_at: Utc::now(),
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn sub_orders(&self) -> &[SubOrder] {
        &self.sub_orders
    }

    pub fn sub_order(&self, index: usize) -> Option<&SubOrder> {
        self.sub_orders.get(index)
    }

    pub fn had_fatal_failure(&self) -> bool {
        self.fatal
    }

    /// Created -> Splitting with the given legs. Their sum must match the target.
    pub fn split_into(&mut self, sub_orders: Vec<SubOrder>) -> Result<(), TransitionError> {
        if self.state != JobState::Created {
            return Err(TransitionError::Job {
                from: self.state,
                to: JobState::Splitting,
            });
        }
        let actual: f64 = sub_orders.iter().map(|s| s.amount).sum();
        if (actual - self.target_amount).abs() > SPLIT_EPSILON * self.target_amount.max(1.0) {
            return Err(TransitionError::AmountMismatch {
                expected: self.target_amount,
                actual,
            });
        }
        self.split_count = sub_orders.len();
        self.sub_orders = sub_orders;
        self.state = JobState::Splitting;
        Ok(())
    }

    /// Splitting -> Executing
    pub fn start_executing(&mut self) -> Result<(), TransitionError> {
        if self.state != JobState::Splitting {
            return Err(TransitionError::Job {
                from: self.state,
                to: JobState::Executing,
            });
        }
        self.state = JobState::Executing;
        Ok(())
    }

    /// Index of the first Pending sub-order, in split order
    pub fn next_pending(&self) -> Option<usize> {
        self.sub_orders
            .iter()
            .position(|s| s.status == SubOrderStatus::Pending)
    }

    fn transition(&mut self, index: usize, to: SubOrderStatus) -> Result<&mut SubOrder, TransitionError> {
        let sub = self
            .sub_orders
            .get_mut(index)
            .ok_or(TransitionError::UnknownSubOrder(index))?;
        if !sub.status.can_become(to) {
            return Err(TransitionError::SubOrder {
                index,
                from: sub.status,
                to,
            });
        }
        sub.status = to;
        Ok(sub)
    }

    pub fn mark_submitted(
        &mut self,
        index: usize,
        wallet_address: &str,
        amount: f64,
    ) -> Result<(), TransitionError> {
        let sub = self.transition(index, SubOrderStatus::Submitted)?;
        sub.wallet_address = Some(wallet_address.to_string());
        sub.amount = amount;
        Ok(())
    }

    pub fn mark_confirmed(
        &mut self,
        index: usize,
        signature: String,
        fill_price: f64,
        price_impact: f64,
        retry_count: u32,
    ) -> Result<(), TransitionError> {
        let sub = self.transition(index, SubOrderStatus::Confirmed)?;
        sub.signature = Some(signature);
        sub.fill_price = Some(fill_price);
        sub.retry_count = retry_count;
        self.cumulative_impact += price_impact.abs();
        Ok(())
    }

    pub fn mark_failed(
        &mut self,
        index: usize,
        error: String,
        retry_count: u32,
    ) -> Result<(), TransitionError> {
        let sub = self.transition(index, SubOrderStatus::Failed)?;
        sub.error = Some(error);
        sub.retry_count = retry_count;
        Ok(())
    }

    /// Drop a Pending sub-order that no longer has anything to trade
    pub fn skip(&mut self, index: usize, reason: &str) -> Result<(), TransitionError> {
        let sub = self.transition(index, SubOrderStatus::Cancelled)?;
        sub.error = Some(reason.to_string());
        Ok(())
    }

    /// Cancel every Pending sub-order. Submitted ones run to completion.
    /// Returns how many were cancelled.
    pub fn cancel_pending(&mut self) -> usize {
        let mut cancelled = 0;
        for sub in self.sub_orders.iter_mut() {
            if sub.status == SubOrderStatus::Pending {
                sub.status = SubOrderStatus::Cancelled;
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Abort the remaining sub-orders after a fatal failure
    pub fn abort(&mut self, reason: &str) -> usize {
        self.fatal = true;
        let cancelled = self.cancel_pending();
        tracing::warn!(
            "Job {} aborted ({}): {} pending sub-orders cancelled",
            self.id,
            reason,
            cancelled
        );
        cancelled
    }

    pub fn counts(&self) -> SubOrderCounts {
        let mut counts = SubOrderCounts::default();
        for sub in &self.sub_orders {
            match sub.status {
                SubOrderStatus::Pending => counts.pending += 1,
                SubOrderStatus::Submitted => counts.submitted += 1,
                SubOrderStatus::Confirmed => counts.confirmed += 1,
                SubOrderStatus::Failed => counts.failed += 1,
                SubOrderStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    /// Move to a terminal state once no sub-order is outstanding.
    ///
    /// PartiallyFailed when a fatal abort happened or any leg failed,
    /// Completed when every leg filled, Cancelled otherwise.
    pub fn resolve(&mut self) -> Option<JobState> {
        if self.state.is_terminal() {
            return Some(self.state);
        }
        let counts = self.counts();
        if counts.outstanding() > 0 {
            return None;
        }
        self.state = if self.fatal || counts.failed > 0 {
            JobState::PartiallyFailed
        } else if counts.confirmed == self.sub_orders.len() && !self.sub_orders.is_empty() {
            JobState::Completed
        } else {
            JobState::Cancelled
        };
        Some(self.state)
    }

    pub fn filled_amount(&self) -> f64 {
        self.sub_orders
            .iter()
            .filter(|s| s.status == SubOrderStatus::Confirmed)
            .map(|s| s.amount)
            .sum()
    }
}

/// Split a target into sub-order amounts.
///
/// With `split_size` the count is `ceil(target / size)` and the final leg
/// carries the remainder. Otherwise the target is divided evenly and each leg
/// is perturbed by up to `jitter_pct`, then rescaled so the legs still sum to
/// the target.
pub fn split_amounts<R: Rng + ?Sized>(
    target: f64,
    split_count: usize,
    split_size: Option<f64>,
    jitter_pct: f64,
    rng: &mut R,
) -> Result<Vec<f64>, SplitError> {
    if !(target > 0.0) {
        return Err(SplitError::InvalidTarget(target));
    }

    if let Some(size) = split_size {
        if !(size > 0.0) {
            return Err(SplitError::InvalidSplitSize(size));
        }
        let count = ((target / size) - SPLIT_EPSILON).ceil().max(1.0) as usize;
        let mut amounts = vec![size; count - 1];
        let remainder = target - size * (count - 1) as f64;
        amounts.push(remainder);
        return Ok(amounts);
    }

    if split_count == 0 {
        return Err(SplitError::ZeroSplitCount);
    }

    let base = target / split_count as f64;
    let jitter = jitter_pct.clamp(0.0, 0.9);
    let raw: Vec<f64> = (0..split_count)
        .map(|_| {
            if jitter > 0.0 {
                base * (1.0 + rng.gen_range(-jitter..=jitter))
            } else {
                base
            }
        })
        .collect();

    let raw_sum: f64 = raw.iter().sum();
    let scale = target / raw_sum;
    let mut amounts: Vec<f64> = raw.iter().map(|a| a * scale).collect();

    // Pin the final leg so rounding never drifts the total
    let head: f64 = amounts[..split_count - 1].iter().sum();
    amounts[split_count - 1] = target - head;
    Ok(amounts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn job_with(amounts: &[f64]) -> BundleJob {
        let target: f64 = amounts.iter().sum();
        let mut job = BundleJob::new("TKNA".into(), Side::Buy, target);
        job.split_into(amounts.iter().map(|a| SubOrder::new(*a)).collect())
            .unwrap();
        job.start_executing().unwrap();
        job
    }

    #[test]
    fn test_split_even_with_jitter_sums_to_target() {
        let mut r = rng();
        for count in 1..20 {
            let amounts = split_amounts(2.0, count, None, 0.15, &mut r).unwrap();
            assert_eq!(amounts.len(), count);
            assert_relative_eq!(amounts.iter().sum::<f64>(), 2.0, epsilon = SPLIT_EPSILON);
            assert!(amounts.iter().all(|a| *a > 0.0));
        }
    }

    #[test]
    fn test_split_without_jitter_is_uniform() {
        let amounts = split_amounts(2.0, 4, None, 0.0, &mut rng()).unwrap();
        for a in amounts {
            assert_relative_eq!(a, 0.5, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_split_by_size_remainder_last() {
        let amounts = split_amounts(2.3, 0, Some(0.5), 0.0, &mut rng()).unwrap();
        assert_eq!(amounts.len(), 5);
        assert_relative_eq!(amounts[0], 0.5);
        assert_relative_eq!(amounts[4], 0.3, epsilon = 1e-9);
        assert_relative_eq!(amounts.iter().sum::<f64>(), 2.3, epsilon = 1e-9);
    }

    #[test]
    fn test_split_by_size_exact_division() {
        let amounts = split_amounts(2.0, 0, Some(0.5), 0.0, &mut rng()).unwrap();
        assert_eq!(amounts.len(), 4);
        assert_relative_eq!(amounts[3], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_split_rejects_invalid_input() {
        assert_eq!(
            split_amounts(0.0, 3, None, 0.0, &mut rng()),
            Err(SplitError::InvalidTarget(0.0))
        );
        assert_eq!(
            split_amounts(1.0, 0, None, 0.0, &mut rng()),
            Err(SplitError::ZeroSplitCount)
        );
        assert_eq!(
            split_amounts(1.0, 2, Some(-1.0), 0.0, &mut rng()),
            Err(SplitError::InvalidSplitSize(-1.0))
        );
    }

    #[test]
    fn test_split_into_rejects_mismatched_sum() {
        let mut job = BundleJob::new("TKNA".into(), Side::Buy, 1.0);
        let result = job.split_into(vec![SubOrder::new(0.4), SubOrder::new(0.4)]);
        assert!(matches!(result, Err(TransitionError::AmountMismatch { .. })));
        assert_eq!(job.state(), JobState::Created);
    }

    #[test]
    fn test_job_lifecycle_completed() {
        let mut job = job_with(&[0.5, 0.5]);
        assert_eq!(job.state(), JobState::Executing);
        assert!(job.state().is_running());

        for i in 0..2 {
            assert_eq!(job.next_pending(), Some(i));
            job.mark_submitted(i, "w1", 0.5).unwrap();
            assert_eq!(job.resolve(), None);
            job.mark_confirmed(i, format!("sig{}", i), 1.0, 0.01, 0).unwrap();
        }
        assert_eq!(job.resolve(), Some(JobState::Completed));
        assert_relative_eq!(job.cumulative_impact, 0.02, epsilon = 1e-12);
        assert_relative_eq!(job.filled_amount(), 1.0);
    }

    #[test]
    fn test_sub_order_transitions_are_forward_only() {
        let mut job = job_with(&[1.0]);
        job.mark_submitted(0, "w1", 1.0).unwrap();
        job.mark_confirmed(0, "sig".into(), 1.0, 0.0, 0).unwrap();

        let err = job.mark_failed(0, "late".into(), 0).unwrap_err();
        assert_eq!(
            err,
            TransitionError::SubOrder {
                index: 0,
                from: SubOrderStatus::Confirmed,
                to: SubOrderStatus::Failed
            }
        );
        assert!(job.mark_submitted(0, "w1", 1.0).is_err());
        assert_eq!(job.mark_submitted(9, "w1", 1.0), Err(TransitionError::UnknownSubOrder(9)));
    }

    #[test]
    fn test_cancel_leaves_submitted_running() {
        let mut job = job_with(&[0.25, 0.25, 0.25, 0.25]);
        job.mark_submitted(0, "w1", 0.25).unwrap();

        assert_eq!(job.cancel_pending(), 3);
        assert_eq!(job.cancel_pending(), 0);
        assert_eq!(job.resolve(), None);

        job.mark_confirmed(0, "sig".into(), 1.0, 0.0, 0).unwrap();
        assert_eq!(job.resolve(), Some(JobState::Cancelled));
        let counts = job.counts();
        assert_eq!(counts.confirmed, 1);
        assert_eq!(counts.cancelled, 3);
    }

    #[test]
    fn test_fatal_abort_resolves_partially_failed() {
        let mut job = job_with(&[0.5, 0.5, 0.5]);
        job.mark_submitted(0, "w1", 0.5).unwrap();
        job.mark_failed(0, "slippage".into(), 0).unwrap();
        assert_eq!(job.abort("slippage"), 2);
        assert!(job.had_fatal_failure());
        assert_eq!(job.resolve(), Some(JobState::PartiallyFailed));
    }

    #[test]
    fn test_isolated_failure_resolves_partially_failed() {
        let mut job = job_with(&[0.5, 0.5]);
        job.mark_submitted(0, "w1", 0.5).unwrap();
        job.mark_failed(0, "insufficient balance".into(), 0).unwrap();
        job.mark_submitted(1, "w2", 0.5).unwrap();
        job.mark_confirmed(1, "sig".into(), 1.0, 0.0, 1).unwrap();

        assert_eq!(job.resolve(), Some(JobState::PartiallyFailed));
        assert_eq!(job.sub_order(1).unwrap().retry_count, 1);
    }

    #[test]
    fn test_job_state_transitions_checked() {
        let mut job = BundleJob::new("TKNA".into(), Side::Sell, 1.0);
        assert!(matches!(job.start_executing(), Err(TransitionError::Job { .. })));
        job.split_into(vec![SubOrder::for_wallet("w1".into(), 1.0)]).unwrap();
        assert!(job.split_into(vec![SubOrder::new(1.0)]).is_err());
        assert_eq!(job.sub_order(0).unwrap().wallet_address.as_deref(), Some("w1"));
    }
}
