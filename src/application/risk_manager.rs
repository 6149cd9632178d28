//! Risk Manager
//!
//! Owns every open position. Price ticks move trailing stops and flag
//! positions whose stop was hit; flagged positions are liquidated with a
//! full-amount sell. A failed liquidation leaves the position flagged and is
//! retried on the next tick. A position never has two liquidation orders in
//! flight at once.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinSet;

use super::executor::TransactionExecutor;
use super::price_monitor::PriceTick;
use super::trade_log::TradeLog;
use super::wallet_pool::WalletPool;
use crate::domain::{DomainEvent, EventSink, LiquidationState, Position, Side, StopPolicy, Trade};
use crate::ports::OrderRequest;

type PositionKey = (String, String);

fn key(wallet: &str, token: &str) -> PositionKey {
    (wallet.to_string(), token.to_string())
}

#[derive(Debug, Clone)]
pub struct RiskSettings {
    pub policy: StopPolicy,
    /// Slippage allowed on liquidation sells
    pub emergency_slippage_bps: u16,
    /// Quoted impact ceiling for liquidation sells
    pub liquidation_impact_ceiling: f64,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            policy: StopPolicy::default(),
            emergency_slippage_bps: 500,
            liquidation_impact_ceiling: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LiquidationOutcome {
    Liquidated {
        wallet_address: String,
        token_address: String,
        amount: f64,
        fill_price: f64,
        signature: String,
    },
    /// Position stays flagged and is retried on the next tick
    Failed {
        wallet_address: String,
        token_address: String,
        error: String,
    },
}

pub struct RiskManager {
    positions: Mutex<HashMap<PositionKey, Position>>,
    in_flight: std::sync::Mutex<HashSet<PositionKey>>,
    policy: RwLock<StopPolicy>,
    settings: RiskSettings,
    pool: Arc<WalletPool>,
    executor: Arc<TransactionExecutor>,
    trades: Arc<TradeLog>,
    events: EventSink,
}

impl RiskManager {
    pub fn new(
        pool: Arc<WalletPool>,
        executor: Arc<TransactionExecutor>,
        trades: Arc<TradeLog>,
        settings: RiskSettings,
        events: EventSink,
    ) -> Self {
        Self {
            positions: Mutex::new(HashMap::new()),
            in_flight: std::sync::Mutex::new(HashSet::new()),
            policy: RwLock::new(settings.policy),
            settings,
            pool,
            executor,
            trades,
            events,
        }
    }

    /// Stop rules for positions opened from now on. Open positions keep theirs.
    pub async fn set_policy(&self, policy: StopPolicy) {
        *self.policy.write().await = policy;
    }

    pub async fn policy(&self) -> StopPolicy {
        *self.policy.read().await
    }

    /// Open a position or average into the existing one
    pub async fn on_buy_fill(&self, wallet: &str, token: &str, price: f64, amount: f64) {
        let policy = self.policy().await;
        let mut positions = self.positions.lock().await;

        let updated = match positions.get_mut(&key(wallet, token)) {
            Some(position) => match position.add_fill(price, amount) {
                Ok(()) => Some(position.clone()),
                Err(e) => {
                    tracing::warn!("Ignoring buy fill for {}/{}: {}", wallet, token, e);
                    None
                }
            },
            None => match Position::open(wallet.to_string(), token.to_string(), price, amount, &policy) {
                Ok(position) => {
                    tracing::info!(
                        "Opened position {}/{}: {:.6} @ {:.9}, stop {:.9}",
                        wallet,
                        token,
                        amount,
                        price,
                        position.stop_loss_price
                    );
                    positions.insert(key(wallet, token), position.clone());
                    Some(position)
                }
                Err(e) => {
                    tracing::warn!("Cannot open position {}/{}: {}", wallet, token, e);
                    None
                }
            },
        };

        if let Some(position) = updated {
            self.events.publish(DomainEvent::PositionChanged {
                position,
                closed: false,
            });
        }
    }

    /// Reduce a position after a confirmed sell. Returns the amount left.
    pub async fn on_sell_fill(&self, wallet: &str, token: &str, amount: f64) -> f64 {
        let mut positions = self.positions.lock().await;
        let k = key(wallet, token);
        let Some(position) = positions.get_mut(&k) else {
            tracing::warn!("Sell fill for unknown position {}/{}", wallet, token);
            return 0.0;
        };

        let remaining = position.reduce(amount);
        let snapshot = position.clone();
        if snapshot.is_closed() {
            positions.remove(&k);
            tracing::info!("Closed position {}/{}", wallet, token);
        }
        self.events.publish(DomainEvent::PositionChanged {
            closed: snapshot.is_closed(),
            position: snapshot,
        });
        remaining
    }

    pub async fn position(&self, wallet: &str, token: &str) -> Option<Position> {
        self.positions.lock().await.get(&key(wallet, token)).cloned()
    }

    pub async fn positions(&self) -> Vec<Position> {
        let mut all: Vec<Position> = self.positions.lock().await.values().cloned().collect();
        all.sort_by(|a, b| (&a.token_address, &a.wallet_address).cmp(&(&b.token_address, &b.wallet_address)));
        all
    }

    pub async fn positions_for_token(&self, token: &str) -> Vec<Position> {
        let mut held: Vec<Position> = self
            .positions
            .lock()
            .await
            .values()
            .filter(|p| p.token_address == token)
            .cloned()
            .collect();
        held.sort_by(|a, b| a.wallet_address.cmp(&b.wallet_address));
        held
    }

    /// Tokens with at least one open position
    pub async fn open_tokens(&self) -> Vec<String> {
        let tokens: HashSet<String> = self
            .positions
            .lock()
            .await
            .values()
            .map(|p| p.token_address.clone())
            .collect();
        let mut tokens: Vec<String> = tokens.into_iter().collect();
        tokens.sort();
        tokens
    }

    /// Evaluate one price observation for every position on `token` and
    /// liquidate the flagged ones before returning
    pub async fn on_price_tick(&self, token: &str, price: f64) -> Vec<LiquidationOutcome> {
        let mut outcomes = Vec::new();
        for wallet in self.flag_positions(token, price).await {
            let k = key(&wallet, token);
            if !self.claim(&k) {
                tracing::debug!("Liquidation already in flight for {}/{}", wallet, token);
                continue;
            }
            let outcome = self.liquidate(&wallet, token).await;
            self.release(&k);
            if let Some(outcome) = outcome {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    /// Move stops for `token` and return the wallets whose position is
    /// flagged for liquidation
    async fn flag_positions(&self, token: &str, price: f64) -> Vec<String> {
        if !(price > 0.0) {
            tracing::warn!("Ignoring non-positive price {} for {}", price, token);
            return Vec::new();
        }

        let mut flagged = Vec::new();
        let mut positions = self.positions.lock().await;
        for position in positions.values_mut().filter(|p| p.token_address == token) {
            let mut changed = position.observe_price(price);

            if position.liquidation_state == LiquidationState::None && position.is_stop_hit(price) {
                tracing::warn!(
                    "Stop hit for {}/{}: price {:.9} <= stop {:.9}",
                    position.wallet_address,
                    token,
                    price,
                    position.stop_loss_price
                );
                position.liquidation_state = LiquidationState::Pending;
                changed = true;
            }
            if position.liquidation_state == LiquidationState::Pending {
                flagged.push(position.wallet_address.clone());
            }
            if changed {
                self.events.publish(DomainEvent::PositionChanged {
                    position: position.clone(),
                    closed: false,
                });
            }
        }
        flagged
    }

    fn claim(&self, k: &PositionKey) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(k.clone())
    }

    fn release(&self, k: &PositionKey) {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(k);
    }

    async fn liquidate(&self, wallet: &str, token: &str) -> Option<LiquidationOutcome> {
        let failed = |error: String| LiquidationOutcome::Failed {
            wallet_address: wallet.to_string(),
            token_address: token.to_string(),
            error,
        };

        let mut lease = match self.pool.lease(wallet).await {
            Ok(lease) => lease,
            Err(e) => {
                tracing::error!("Liquidation of {}/{} cannot lock wallet: {}", wallet, token, e);
                return Some(failed(e.to_string()));
            }
        };

        // Read the amount under the wallet lock so a concurrent sell leg is already reflected
        let amount = match self.position(wallet, token).await {
            Some(p) if !p.is_closed() && p.liquidation_state == LiquidationState::Pending => p.amount,
            _ => return None,
        };

        let order = OrderRequest::sell(
            token,
            amount,
            self.settings.emergency_slippage_bps,
            self.settings.liquidation_impact_ceiling,
        );
        tracing::warn!("Liquidating {:.6} {} from {}", amount, token, wallet);

        match self.executor.submit(&mut lease, &order).await {
            Ok(report) => {
                let closed = self.positions.lock().await.remove(&key(wallet, token));
                if let Some(mut position) = closed {
                    position.amount = 0.0;
                    self.events.publish(DomainEvent::PositionChanged {
                        position,
                        closed: true,
                    });
                }
                self.trades
                    .record(Trade::new(
                        token.to_string(),
                        wallet.to_string(),
                        Side::Sell,
                        amount,
                        report.fill_price,
                        report.signature.clone(),
                    ))
                    .await;
                self.pool.publish_balance(&lease);
                tracing::info!(
                    "Liquidated {}/{} @ {:.9} sig={}",
                    wallet,
                    token,
                    report.fill_price,
                    report.signature
                );
                Some(LiquidationOutcome::Liquidated {
                    wallet_address: wallet.to_string(),
                    token_address: token.to_string(),
                    amount,
                    fill_price: report.fill_price,
                    signature: report.signature,
                })
            }
            Err(e) => {
                tracing::error!("Liquidation of {}/{} failed, retrying next tick: {}", wallet, token, e);
                Some(failed(e.to_string()))
            }
        }
    }

    /// Evaluate ticks as they arrive until `shutdown` reads true or the
    /// channel closes. Each liquidation runs as its own task so a slow sell
    /// never holds up stops on other positions. In-flight liquidations are
    /// awaited before returning.
    pub async fn run(
        self: Arc<Self>,
        mut ticks: broadcast::Receiver<PriceTick>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!("Risk manager listening for price ticks");
        let mut liquidations = JoinSet::new();
        while !*shutdown.borrow_and_update() {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                Some(joined) = liquidations.join_next(), if !liquidations.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("Liquidation task failed: {}", e);
                    }
                }
                tick = ticks.recv() => match tick {
                    Ok(tick) => {
                        for wallet in self.flag_positions(&tick.token_address, tick.price).await {
                            let k = key(&wallet, &tick.token_address);
                            if !self.claim(&k) {
                                tracing::debug!("Liquidation already in flight for {}/{}", wallet, tick.token_address);
                                continue;
                            }
                            let risk = self.clone();
                            let token = tick.token_address.clone();
                            liquidations.spawn(async move {
                                risk.liquidate(&wallet, &token).await;
                                risk.release(&k);
                            });
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Risk manager lagged, {} price ticks skipped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        if !liquidations.is_empty() {
            tracing::info!("Waiting for {} liquidations to settle", liquidations.len());
        }
        while let Some(joined) = liquidations.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Liquidation task failed: {}", e);
            }
        }
        tracing::info!("Risk manager stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::fixtures::Fixture;
    use crate::ports::NetworkError;
    use approx::assert_relative_eq;
    use std::time::Duration;

    async fn risk_with_position(
        fx: &Fixture,
        policy: StopPolicy,
        entry: f64,
        amount: f64,
    ) -> Arc<RiskManager> {
        let risk = fx.ctx.risk.clone();
        risk.set_policy(policy).await;
        risk.on_buy_fill("wallet-1", "TKNA", entry, amount).await;
        risk
    }

    #[tokio::test]
    async fn test_fixed_stop_liquidates_full_amount() {
        let fx = Fixture::new(1).await;
        let policy = StopPolicy {
            stop_loss_threshold: 0.1,
            trailing_stop: false,
            trailing_distance: 0.0,
        };
        let risk = risk_with_position(&fx, policy, 1.0, 10.0).await;
        let position = risk.position("wallet-1", "TKNA").await.unwrap();
        assert_relative_eq!(position.stop_loss_price, 0.9, epsilon = 1e-12);

        assert!(risk.on_price_tick("TKNA", 0.95).await.is_empty());

        fx.net.set_price("TKNA", 0.85);
        let outcomes = risk.on_price_tick("TKNA", 0.85).await;

        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], LiquidationOutcome::Liquidated { amount, .. } if amount == 10.0));
        let orders = fx.net.sent_orders();
        let (signer, order) = orders.last().unwrap();
        assert_eq!(signer, "wallet-1");
        assert_eq!(order.side, Side::Sell);
        assert_eq!(order.amount, 10.0);
        assert!(risk.position("wallet-1", "TKNA").await.is_none());
        assert_eq!(fx.ctx.trades.trade_count().await, 1);
    }

    #[tokio::test]
    async fn test_trailing_stop_ratchets_and_triggers() {
        let fx = Fixture::new(1).await;
        let policy = StopPolicy {
            stop_loss_threshold: 0.1,
            trailing_stop: true,
            trailing_distance: 0.05,
        };
        let risk = risk_with_position(&fx, policy, 1.0, 4.0).await;

        assert!(risk.on_price_tick("TKNA", 1.0).await.is_empty());
        assert!(risk.on_price_tick("TKNA", 1.2).await.is_empty());
        let raised = risk.position("wallet-1", "TKNA").await.unwrap();
        assert_relative_eq!(raised.stop_loss_price, 1.14, epsilon = 1e-9);

        let outcomes = risk.on_price_tick("TKNA", 1.1).await;
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], LiquidationOutcome::Liquidated { .. }));
    }

    #[tokio::test]
    async fn test_failed_liquidation_stays_pending_and_retries() {
        let fx = Fixture::new(1).await;
        let risk = risk_with_position(&fx, StopPolicy::default(), 1.0, 5.0).await;
        fx.net.fail_sends_from("wallet-1", NetworkError::Rejected("program error".into()));

        let outcomes = risk.on_price_tick("TKNA", 0.5).await;
        assert!(matches!(outcomes[0], LiquidationOutcome::Failed { .. }));
        let flagged = risk.position("wallet-1", "TKNA").await.unwrap();
        assert_eq!(flagged.liquidation_state, LiquidationState::Pending);
        assert_eq!(flagged.amount, 5.0);

        // Recovery on the next tick, even above the stop
        fx.net.clear_failing_senders();
        let outcomes = risk.on_price_tick("TKNA", 0.95).await;
        assert!(matches!(outcomes[0], LiquidationOutcome::Liquidated { amount, .. } if amount == 5.0));
        assert!(risk.open_tokens().await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_ticks_submit_one_liquidation() {
        let fx = Fixture::new(1).await;
        let risk = risk_with_position(&fx, StopPolicy::default(), 1.0, 5.0).await;
        fx.net.hold_next_confirmations(1);

        let (a, b) = tokio::join!(risk.on_price_tick("TKNA", 0.5), risk.on_price_tick("TKNA", 0.5));

        let liquidated = a
            .iter()
            .chain(b.iter())
            .filter(|o| matches!(o, LiquidationOutcome::Liquidated { .. }))
            .count();
        assert_eq!(liquidated, 1);
        let sells = fx
            .net
            .sent_orders()
            .into_iter()
            .filter(|(_, o)| o.side == Side::Sell)
            .count();
        // The held attempt timed out and was retried once; no second order from the other tick
        assert_eq!(sells, 2);
    }

    async fn wait_until_closed(risk: &RiskManager, wallet: &str, token: &str, within: Duration) -> bool {
        tokio::time::timeout(within, async {
            while risk.position(wallet, token).await.is_some() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .is_ok()
    }

    #[tokio::test]
    async fn test_slow_liquidation_does_not_delay_other_tokens() {
        let fx = Fixture::new(2).await;
        let risk = fx.ctx.risk.clone();
        risk.on_buy_fill("wallet-1", "TKNA", 1.0, 5.0).await;
        risk.on_buy_fill("wallet-2", "TKNB", 1.0, 5.0).await;
        // Every TKNA attempt times out: three 40ms confirmation windows
        fx.net.hold_confirmations_from("wallet-1");

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(risk.clone().run(fx.ctx.ticks.subscribe(), stop_rx));
        tokio::task::yield_now().await;

        fx.ctx.ticks.send(PriceTick::new("TKNA", 0.5)).unwrap();
        fx.ctx.ticks.send(PriceTick::new("TKNB", 0.5)).unwrap();

        assert!(wait_until_closed(&risk, "wallet-2", "TKNB", Duration::from_millis(60)).await);
        let stuck = risk.position("wallet-1", "TKNA").await.unwrap();
        assert_eq!(stuck.liquidation_state, LiquidationState::Pending);

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
        // The TKNA attempt ran to its end before the loop returned
        assert!(fx.net.forgotten().len() >= 3);
        assert_eq!(fx.ctx.trades.trade_count().await, 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_signal() {
        let fx = Fixture::new(1).await;
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(fx.ctx.risk.clone().run(fx.ctx.ticks.subscribe(), stop_rx));

        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .expect("risk loop did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_averaging_keeps_fixed_stop() {
        let fx = Fixture::new(1).await;
        let risk = risk_with_position(&fx, StopPolicy::default(), 1.0, 10.0).await;
        risk.on_buy_fill("wallet-1", "TKNA", 2.0, 10.0).await;

        let position = risk.position("wallet-1", "TKNA").await.unwrap();
        assert_relative_eq!(position.entry_price, 1.5);
        assert_relative_eq!(position.amount, 20.0);
        assert_relative_eq!(position.stop_loss_price, 0.9, epsilon = 1e-12);
    }

    #[tokio::test]
    async fn test_sell_fill_closes_position() {
        let fx = Fixture::new(1).await;
        let risk = risk_with_position(&fx, StopPolicy::default(), 1.0, 3.0).await;

        assert_relative_eq!(risk.on_sell_fill("wallet-1", "TKNA", 1.0).await, 2.0);
        assert_eq!(risk.on_sell_fill("wallet-1", "TKNA", 2.0).await, 0.0);
        assert!(risk.positions_for_token("TKNA").await.is_empty());
    }
}
