//! Positions held per (wallet, token) with their stop-loss state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Amounts at or below this are treated as a closed position
pub const DUST_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiquidationState {
    #[default]
    None,
    Pending,
}

/// Stop-loss rules applied when a position opens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StopPolicy {
    pub stop_loss_threshold: f64,
    pub trailing_stop: bool,
    pub trailing_distance: f64,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            stop_loss_threshold: 0.1,
            trailing_stop: false,
            trailing_distance: 0.05,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum PositionError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(f64),
    #[error("Invalid entry price: {0}")]
    InvalidEntryPrice(f64),
}

/// One wallet's holding of one token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub token_address: String,
    pub wallet_address: String,
    pub entry_price: f64,
    pub amount: f64,
    pub stop_loss_threshold: f64,
    pub trailing_stop: bool,
    pub trailing_distance: f64,
    pub highest_price: f64,
    pub stop_loss_price: f64,
    pub liquidation_state: LiquidationState,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    pub fn open(
        wallet_address: String,
        token_address: String,
        entry_price: f64,
        amount: f64,
        policy: &StopPolicy,
    ) -> Result<Self, PositionError> {
        if !(amount > 0.0) {
            return Err(PositionError::InvalidAmount(amount));
        }
        if !(entry_price > 0.0) {
            return Err(PositionError::InvalidEntryPrice(entry_price));
        }

        let stop_loss_price = if policy.trailing_stop {
            entry_price * (1.0 - policy.trailing_distance)
        } else {
            entry_price * (1.0 - policy.stop_loss_threshold)
        };

        Ok(Self {
            token_address,
            wallet_address,
            entry_price,
            amount,
            stop_loss_threshold: policy.stop_loss_threshold,
            trailing_stop: policy.trailing_stop,
            trailing_distance: policy.trailing_distance,
            highest_price: entry_price,
            stop_loss_price,
            liquidation_state: LiquidationState::None,
            opened_at: Utc::now(),
        })
    }

    /// Average a further buy fill into the position.
    ///
    /// The entry price becomes the amount-weighted blend. The stop level is
    /// left untouched: fixed stops are set once at open, trailing stops only
    /// move with observed prices.
    pub fn add_fill(&mut self, price: f64, amount: f64) -> Result<(), PositionError> {
        if !(amount > 0.0) {
            return Err(PositionError::InvalidAmount(amount));
        }
        if !(price > 0.0) {
            return Err(PositionError::InvalidEntryPrice(price));
        }
        let total = self.amount + amount;
        self.entry_price = (self.entry_price * self.amount + price * amount) / total;
        self.amount = total;
        Ok(())
    }

    /// Reduce the held amount, returning what remains
    pub fn reduce(&mut self, amount: f64) -> f64 {
        self.amount = (self.amount - amount.max(0.0)).max(0.0);
        if self.amount <= DUST_EPSILON {
            self.amount = 0.0;
        }
        self.amount
    }

    pub fn is_closed(&self) -> bool {
        self.amount <= DUST_EPSILON
    }

    /// Feed a market price. Returns true when the stop level moved.
    pub fn observe_price(&mut self, price: f64) -> bool {
        if !self.trailing_stop || !(price > 0.0) {
            return false;
        }
        if price <= self.highest_price {
            return false;
        }
        self.highest_price = price;
        let candidate = self.highest_price * (1.0 - self.trailing_distance);
        if candidate > self.stop_loss_price {
            self.stop_loss_price = candidate;
            tracing::debug!(
                "Trailing stop raised for {}/{}: {:.6}",
                self.wallet_address,
                self.token_address,
                self.stop_loss_price
            );
            return true;
        }
        false
    }

    pub fn is_stop_hit(&self, price: f64) -> bool {
        price <= self.stop_loss_price
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.amount
    }
}
