//! Paper Trading Network
//!
//! An in-memory ledger for running the engine without real transactions.
//! Prices follow a bounded random walk per token, quotes carry a price
//! impact proportional to order size, and fills move the price the way a
//! thin pool would. Every transaction confirms immediately.

use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::domain::{lamports_to_sol, sol_to_lamports, Side};
use crate::ports::{
    Confirmation, NetworkError, NetworkRpc, OrderRequest, PriceFeed, Quote, TransactionRequest, TransactionSigner,
};

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Clone)]
pub struct PaperConfig {
    /// Starting price for tokens seen for the first time, SOL per token
    pub initial_price: f64,
    /// Largest per-observation move of the random walk, as a fraction
    pub volatility: f64,
    /// Pool depth in SOL; an order of this size quotes 100% impact
    pub liquidity_sol: f64,
    /// Network fee charged to the sender of every transaction
    pub fee_lamports: u64,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            initial_price: 0.0001,
            volatility: 0.005,
            liquidity_sol: 500.0,
            fee_lamports: 5_000,
        }
    }
}

pub struct PaperNetwork {
    config: PaperConfig,
    balances: Mutex<HashMap<String, u64>>,
    prices: Mutex<HashMap<String, f64>>,
    fills: Mutex<HashMap<String, Option<f64>>>,
    counter: AtomicU64,
}

impl PaperNetwork {
    pub fn new(config: PaperConfig) -> Self {
        Self {
            config,
            balances: Mutex::new(HashMap::new()),
            prices: Mutex::new(HashMap::new()),
            fills: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
        }
    }

    /// Credit an account out of thin air
    pub fn airdrop(&self, address: &str, lamports: u64) {
        *guard(&self.balances).entry(address.to_string()).or_insert(0) += lamports;
    }

    pub fn set_price(&self, token: &str, price: f64) {
        guard(&self.prices).insert(token.to_string(), price);
    }

    /// Current mid price without advancing the walk
    pub fn mid_price(&self, token: &str) -> f64 {
        guard(&self.prices)
            .get(token)
            .copied()
            .unwrap_or(self.config.initial_price)
    }

    fn step_price(&self, token: &str) -> f64 {
        let mut prices = guard(&self.prices);
        let price = prices.entry(token.to_string()).or_insert(self.config.initial_price);
        if self.config.volatility > 0.0 {
            let drift = rand::thread_rng().gen_range(-self.config.volatility..=self.config.volatility);
            *price = (*price * (1.0 + drift)).max(f64::MIN_POSITIVE);
        }
        *price
    }

    fn impact_of(&self, sol_size: f64) -> f64 {
        if self.config.liquidity_sol <= 0.0 {
            return 0.0;
        }
        (sol_size / self.config.liquidity_sol).min(1.0)
    }

    fn settle(&self, signer: &str, request: &TransactionRequest) -> Result<Option<f64>, NetworkError> {
        let fee = self.config.fee_lamports;
        let mut balances = guard(&self.balances);
        let available = balances.get(signer).copied().unwrap_or(0);

        match request {
            TransactionRequest::Transfer { to, lamports } => {
                let remaining = available
                    .checked_sub(lamports + fee)
                    .ok_or_else(|| NetworkError::InsufficientFunds(signer.to_string()))?;
                balances.insert(signer.to_string(), remaining);
                *balances.entry(to.clone()).or_insert(0) += lamports;
                Ok(None)
            }
            TransactionRequest::Swap { order, quote } => {
                let tolerance = order.slippage_bps as f64 / 10_000.0;
                let slip = rand::thread_rng().gen_range(0.0..=tolerance / 2.0);
                let (fill, remaining) = match order.side {
                    Side::Buy => {
                        let remaining = available
                            .checked_sub(sol_to_lamports(order.amount) + fee)
                            .ok_or_else(|| NetworkError::InsufficientFunds(signer.to_string()))?;
                        (quote.price * (1.0 + slip), remaining)
                    }
                    Side::Sell => {
                        let fill = quote.price * (1.0 - slip);
                        let proceeds = sol_to_lamports(order.amount * fill);
                        let remaining = (available + proceeds)
                            .checked_sub(fee)
                            .ok_or_else(|| NetworkError::InsufficientFunds(signer.to_string()))?;
                        (fill, remaining)
                    }
                };
                balances.insert(signer.to_string(), remaining);
                drop(balances);

                // Fills push the mid price along the trade direction
                let mut prices = guard(&self.prices);
                let mid = prices
                    .entry(order.token_address.clone())
                    .or_insert(self.config.initial_price);
                let push = quote.price_impact / 2.0;
                *mid *= match order.side {
                    Side::Buy => 1.0 + push,
                    Side::Sell => (1.0 - push).max(0.01),
                };
                Ok(Some(fill))
            }
        }
    }
}

impl Default for PaperNetwork {
    fn default() -> Self {
        Self::new(PaperConfig::default())
    }
}

#[async_trait]
impl NetworkRpc for PaperNetwork {
    async fn get_balance(&self, address: &str) -> Result<u64, NetworkError> {
        Ok(guard(&self.balances).get(address).copied().unwrap_or(0))
    }

    async fn get_quote(&self, order: &OrderRequest) -> Result<Quote, NetworkError> {
        if order.amount <= 0.0 {
            return Err(NetworkError::Rejected(format!("{} order of zero size", order.side)));
        }
        let mid = self.step_price(&order.token_address);
        let sol_size = match order.side {
            Side::Buy => order.amount,
            Side::Sell => order.amount * mid,
        };
        let impact = self.impact_of(sol_size);
        let (price, out_amount) = match order.side {
            Side::Buy => {
                let price = mid * (1.0 + impact);
                (price, order.amount / price)
            }
            Side::Sell => {
                let price = mid * (1.0 - impact).max(0.01);
                (price, order.amount * price)
            }
        };
        Ok(Quote {
            price,
            in_amount: order.amount,
            out_amount,
            price_impact: impact,
            route: serde_json::json!({ "paper": true, "mid": mid }),
        })
    }

    async fn send_transaction(
        &self,
        signer: &dyn TransactionSigner,
        request: &TransactionRequest,
    ) -> Result<String, NetworkError> {
        let address = signer.address();
        let fill = self.settle(&address, request)?;
        let signature = format!("paper-{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1);
        guard(&self.fills).insert(signature.clone(), fill);

        if let TransactionRequest::Transfer { to, lamports } = request {
            tracing::debug!("[PAPER] transfer {:.6} SOL {} -> {}", lamports_to_sol(*lamports), address, to);
        }
        Ok(signature)
    }

    async fn confirm_transaction(&self, signature: &str) -> Result<Option<Confirmation>, NetworkError> {
        match guard(&self.fills).remove(signature) {
            Some(realized_price) => Ok(Some(Confirmation {
                slot: None,
                realized_price,
            })),
            None => Err(NetworkError::Rejected(format!("unknown signature {}", signature))),
        }
    }
}

#[async_trait]
impl PriceFeed for PaperNetwork {
    async fn price(&self, token_address: &str) -> Result<f64, NetworkError> {
        Ok(self.step_price(token_address))
    }
}
