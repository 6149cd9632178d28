//! End-to-end engine tests against the scripted mock network

use approx::assert_relative_eq;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;

use soda_bundler::application::{
    Command, EngineSettings, ExecutorConfig, JobParams, JobSettings, LiquidationOutcome, QuotePriceFeed,
    RiskSettings, TradingEngine,
};
use soda_bundler::domain::{
    split_amounts, JobState, LiquidationState, ModeParams, ModeTable, Position, StopPolicy, TradingMode,
    LAMPORTS_PER_SOL,
};
use soda_bundler::ports::mocks::{MockNetwork, MockSignerProvider};
use soda_bundler::ports::NetworkError;

const TOKEN: &str = "TKNA";

fn settings(policy: StopPolicy) -> EngineSettings {
    EngineSettings {
        executor: ExecutorConfig {
            max_retries: 3,
            base_backoff: Duration::from_millis(1),
            confirm_timeout: Duration::from_millis(50),
            confirm_poll: Duration::from_millis(2),
        },
        jobs: JobSettings {
            params: JobParams {
                slippage_bps: 100,
                price_impact_ceiling: 0.05,
                cumulative_impact_ceiling: 0.5,
                min_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(3),
            },
            sell_chunks: 2,
            ..Default::default()
        },
        risk: RiskSettings {
            policy,
            ..Default::default()
        },
        monitor_interval: Duration::from_secs(60),
        broadcast_window: Duration::from_millis(10),
        ..Default::default()
    }
}

fn engine_with(net: Arc<MockNetwork>, policy: StopPolicy) -> TradingEngine {
    TradingEngine::new(
        net.clone(),
        Arc::new(MockSignerProvider::default()),
        Arc::new(QuotePriceFeed::new(net)),
        settings(policy),
    )
}

fn funded_network() -> Arc<MockNetwork> {
    Arc::new(
        MockNetwork::new()
            .with_balance("main-wallet", 100 * LAMPORTS_PER_SOL)
            .with_price(TOKEN, 1.0),
    )
}

fn buy(amount: f64, split_count: usize) -> Command {
    Command::StartBundledBuy {
        token_address: TOKEN.into(),
        split_count: Some(split_count),
        split_size: None,
        amount: Some(amount),
    }
}

#[tokio::test]
async fn bundled_buy_splits_across_wallets_and_completes() {
    let net = funded_network();
    let engine = engine_with(net.clone(), StopPolicy::default());
    engine.setup_wallets(4, 1.0).await.unwrap();
    assert_eq!(engine.bundler_status().active_bundles, 0);

    let reply = engine.dispatch(buy(2.0, 4)).await;
    assert!(reply.ok, "{}", reply.message);
    assert_eq!(engine.bundler_status().active_bundles, 1);

    let outcome = engine.wait_for_job(&reply.job_id.unwrap()).await.unwrap();
    assert_eq!(outcome.state, JobState::Completed);
    assert_eq!(outcome.counts.confirmed, 4);

    let status = engine.bundler_status();
    assert_eq!(status.active_bundles, 0);
    assert_eq!(status.completed_bundles, 1);

    let orders = net.sent_orders();
    assert_eq!(orders.len(), 4);
    let total: f64 = orders.iter().map(|(_, o)| o.amount).sum();
    assert_relative_eq!(total, 2.0, epsilon = 1e-9);
    // 10% jitter, rescaled so the legs still sum to the target
    for (_, order) in &orders {
        assert!(order.amount > 0.5 * 0.9 / 1.1 - 1e-9, "leg {}", order.amount);
        assert!(order.amount < 0.5 * 1.1 / 0.9 + 1e-9, "leg {}", order.amount);
    }

    let mut wallets: Vec<_> = orders.iter().map(|(w, _)| w.clone()).collect();
    wallets.sort();
    wallets.dedup();
    assert_eq!(wallets.len(), 4);
}

#[tokio::test]
async fn fixed_stop_liquidates_whole_position() {
    let net = funded_network();
    let engine = engine_with(
        net.clone(),
        StopPolicy {
            stop_loss_threshold: 0.1,
            trailing_stop: false,
            trailing_distance: 0.05,
        },
    );
    engine.setup_wallets(1, 11.0).await.unwrap();

    let reply = engine.dispatch(buy(10.0, 1)).await;
    engine.wait_for_job(&reply.job_id.unwrap()).await.unwrap();

    let positions = engine.positions().await;
    assert_eq!(positions.len(), 1);
    assert_relative_eq!(positions[0].amount, 10.0, epsilon = 1e-9);
    assert_relative_eq!(positions[0].stop_loss_price, 0.9, epsilon = 1e-9);

    net.set_price(TOKEN, 0.85);
    let outcomes = engine.push_price(TOKEN, 0.85).await;
    assert_eq!(outcomes.len(), 1);
    match &outcomes[0] {
        LiquidationOutcome::Liquidated { amount, .. } => assert_relative_eq!(*amount, 10.0, epsilon = 1e-9),
        other => panic!("expected liquidation, got {:?}", other),
    }
    assert!(engine.positions().await.is_empty());
}

#[tokio::test]
async fn trailing_stop_ratchets_then_triggers() {
    let net = funded_network();
    let engine = engine_with(
        net.clone(),
        StopPolicy {
            stop_loss_threshold: 0.1,
            trailing_stop: true,
            trailing_distance: 0.05,
        },
    );
    engine.setup_wallets(1, 2.0).await.unwrap();
    let reply = engine.dispatch(buy(1.0, 1)).await;
    engine.wait_for_job(&reply.job_id.unwrap()).await.unwrap();

    assert!(engine.push_price(TOKEN, 1.0).await.is_empty());
    assert!(engine.push_price(TOKEN, 1.2).await.is_empty());
    let positions = engine.positions().await;
    assert_relative_eq!(positions[0].highest_price, 1.2);
    assert_relative_eq!(positions[0].stop_loss_price, 1.14, epsilon = 1e-9);

    net.set_price(TOKEN, 1.1);
    let outcomes = engine.push_price(TOKEN, 1.1).await;
    assert!(matches!(outcomes.as_slice(), [LiquidationOutcome::Liquidated { .. }]));
}

#[tokio::test]
async fn transient_send_failures_are_retried_to_confirmation() {
    let net = funded_network();
    let engine = engine_with(net.clone(), StopPolicy::default());
    engine.setup_wallets(1, 1.0).await.unwrap();

    let before = net.send_attempts();
    net.fail_next_sends(vec![NetworkError::Timeout, NetworkError::RateLimited]);

    let reply = engine.dispatch(buy(0.5, 1)).await;
    let outcome = engine.wait_for_job(&reply.job_id.unwrap()).await.unwrap();

    assert_eq!(outcome.state, JobState::Completed);
    assert_eq!(outcome.counts.confirmed, 1);
    assert_eq!(outcome.counts.failed, 0);
    assert_eq!(net.send_attempts() - before, 3);
}

#[tokio::test]
async fn recall_reports_failures_per_wallet() {
    let net = funded_network();
    let engine = engine_with(net.clone(), StopPolicy::default());
    let wallets = engine.setup_wallets(5, 1.0).await.unwrap();
    net.fail_sends_from(&wallets[2].address, NetworkError::Rejected("account frozen".into()));

    let report = engine.shutdown(true).await.unwrap();
    assert_eq!(report.recalled.len(), 4);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].address, wallets[2].address);
    assert!(report.recalled.iter().all(|(address, _)| address != &wallets[2].address));
}

#[tokio::test]
async fn one_live_job_per_token() {
    let net = funded_network();
    let engine = engine_with(net.clone(), StopPolicy::default());
    engine.setup_wallets(4, 1.0).await.unwrap();

    let first = engine.dispatch(buy(1.0, 4)).await;
    assert!(first.ok);
    let second = engine.dispatch(buy(1.0, 2)).await;
    assert!(!second.ok);
    assert!(second.job_id.is_none());

    let other = engine
        .dispatch(Command::StartBundledBuy {
            token_address: "TKNB".into(),
            split_count: Some(1),
            split_size: None,
            amount: Some(0.2),
        })
        .await;
    assert!(other.ok, "{}", other.message);

    engine.wait_for_job(&first.job_id.unwrap()).await.unwrap();
    let third = engine.dispatch(buy(0.4, 2)).await;
    assert!(third.ok, "{}", third.message);
    engine.wait_for_job(&third.job_id.unwrap()).await.unwrap();
}

fn buy_on(token: &str, amount: f64) -> Command {
    Command::StartBundledBuy {
        token_address: token.into(),
        split_count: Some(1),
        split_size: None,
        amount: Some(amount),
    }
}

async fn wait_until(check: impl Fn() -> bool) -> bool {
    for _ in 0..250 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    check()
}

async fn position_on(engine: &TradingEngine, token: &str) -> Option<Position> {
    engine.positions().await.into_iter().find(|p| p.token_address == token)
}

#[tokio::test]
async fn shutdown_settles_submitted_legs_before_returning() {
    let net = funded_network();
    let engine = engine_with(net.clone(), StopPolicy::default());
    engine.start();
    engine.setup_wallets(3, 1.0).await.unwrap();
    net.hold_next_confirmations(1);

    let reply = engine.dispatch(buy(0.9, 3)).await;
    assert!(reply.ok, "{}", reply.message);
    assert!(wait_until(|| net.sent_orders().len() == 1).await);

    engine.shutdown(false).await;

    let status = engine.bundler_status();
    assert_eq!(status.active_bundles, 0);
    assert_eq!(status.pending_transactions, 0);
    let outcome = engine.wait_for_job(&reply.job_id.unwrap()).await.unwrap();
    assert_eq!(outcome.state, JobState::Cancelled);
    assert_eq!(outcome.counts.confirmed, 1);
    assert_eq!(outcome.counts.cancelled, 2);
    assert_eq!(engine.positions().await.len(), 1);
    assert_eq!(engine.session_report().await.trade_counts.buys, 1);
}

#[tokio::test]
async fn liquidations_on_different_tokens_run_in_parallel() {
    let net = funded_network();
    net.set_price("TKNB", 1.0);
    let engine = engine_with(net.clone(), StopPolicy::default());
    engine.start();
    engine.setup_wallets(2, 1.0).await.unwrap();

    for token in ["TKNA", "TKNB"] {
        let reply = engine.dispatch(buy_on(token, 0.5)).await;
        let outcome = engine.wait_for_job(&reply.job_id.unwrap()).await.unwrap();
        assert_eq!(outcome.state, JobState::Completed);
    }
    let stuck = position_on(&engine, "TKNA").await.unwrap();
    let other = position_on(&engine, "TKNB").await.unwrap();
    assert_ne!(stuck.wallet_address, other.wallet_address);
    net.hold_confirmations_from(&stuck.wallet_address);

    net.set_price("TKNA", 0.5);
    net.set_price("TKNB", 0.5);
    engine.publish_price("TKNA", 0.5);
    engine.publish_price("TKNB", 0.5);

    // TKNA needs three 50ms confirmation timeouts; TKNB must not queue behind it
    let mut closed = false;
    for _ in 0..50 {
        if position_on(&engine, "TKNB").await.is_none() {
            closed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(closed, "TKNB liquidation waited for TKNA");
    let pending = position_on(&engine, "TKNA").await.unwrap();
    assert_eq!(pending.liquidation_state, LiquidationState::Pending);

    // Shutdown joins the risk loop, so the stuck liquidation has run out its retries
    engine.shutdown(false).await;
    assert_eq!(net.forgotten().len(), 3);
    assert!(position_on(&engine, "TKNA").await.is_some());
    assert_eq!(engine.session_report().await.trade_counts.sells, 1);
}

#[tokio::test]
async fn stop_trading_leaves_running_pattern_job_to_finish() {
    let net = funded_network();
    let quick_safe = ModeParams {
        min_amount: 0.05,
        max_amount: 0.1,
        min_delay_ms: 1,
        max_delay_ms: 2,
        interval_secs: 60,
        ..ModeParams::defaults(TradingMode::Safe)
    };
    let engine = TradingEngine::new(
        net.clone(),
        Arc::new(MockSignerProvider::default()),
        Arc::new(QuotePriceFeed::new(net.clone())),
        EngineSettings {
            modes: ModeTable::default().with_override(TradingMode::Safe, quick_safe),
            default_token: Some(TOKEN.into()),
            ..settings(StopPolicy::default())
        },
    );
    engine.setup_wallets(2, 1.0).await.unwrap();
    net.hold_next_confirmations(1);

    let reply = engine
        .dispatch(Command::StartTrading {
            mode: TradingMode::Safe,
            token_address: None,
        })
        .await;
    assert!(reply.ok, "{}", reply.message);
    assert!(wait_until(|| net.sent_orders().len() == 1).await);

    let reply = engine.dispatch(Command::StopTrading).await;
    assert_eq!(reply.message, "trading stopped");
    assert_eq!(engine.trading_mode().await, None);
    assert_eq!(engine.bundler_status().active_bundles, 1);

    assert!(wait_until(|| engine.bundler_status().active_bundles == 0).await);
    let history = engine.job_history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].state, JobState::Completed);
    assert_eq!(history[0].counts.confirmed, 2);
    assert_eq!(engine.positions().await.len(), 2);
}

#[tokio::test]
async fn stop_bundler_twice_matches_once() {
    let net = funded_network();
    let engine = engine_with(net, StopPolicy::default());
    engine.setup_wallets(2, 1.0).await.unwrap();

    let reply = engine.dispatch(buy(0.8, 4)).await;
    let first = engine.dispatch(Command::StopBundler).await;
    let status_after_first = engine.bundler_status();
    let second = engine.dispatch(Command::StopBundler).await;

    assert!(first.ok && second.ok);
    assert_eq!(engine.bundler_status(), status_after_first);
    assert_eq!(second.message, "0 pending sub-orders cancelled");

    let outcome = engine.wait_for_job(&reply.job_id.unwrap()).await.unwrap();
    assert_ne!(outcome.state, JobState::Executing);
}

#[test]
fn explicit_splits_always_sum_to_target() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..200 {
        let target = rng.gen_range(0.01..50.0);
        let count = rng.gen_range(1..=20);
        let amounts = split_amounts(target, count, None, 0.1, &mut rng).unwrap();
        assert_eq!(amounts.len(), count);
        assert_relative_eq!(amounts.iter().sum::<f64>(), target, epsilon = 1e-9);
    }
}

#[test]
fn fixed_stop_never_moves() {
    let policy = StopPolicy::default();
    let mut position = Position::open("w".into(), TOKEN.into(), 2.0, 5.0, &policy).unwrap();
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..500 {
        position.observe_price(rng.gen_range(0.1..10.0));
        assert_relative_eq!(position.stop_loss_price, 1.8, epsilon = 1e-12);
    }
}

#[test]
fn trailing_stop_is_monotone() {
    let policy = StopPolicy {
        trailing_stop: true,
        ..StopPolicy::default()
    };
    let mut position = Position::open("w".into(), TOKEN.into(), 1.0, 1.0, &policy).unwrap();
    let mut rng = StdRng::seed_from_u64(3);
    let mut last_stop = position.stop_loss_price;
    for _ in 0..500 {
        let price = rng.gen_range(0.5..3.0);
        let record = position.highest_price;
        position.observe_price(price);
        assert!(position.stop_loss_price >= last_stop);
        if price <= record {
            assert_eq!(position.stop_loss_price, last_stop, "stop moved on a non-record price");
        }
        last_stop = position.stop_loss_price;
    }
}
