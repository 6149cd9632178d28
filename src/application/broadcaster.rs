//! State Broadcaster
//!
//! Folds domain events into a projection of observable state and emits at
//! most one snapshot per kind per coalescing window. The window opens on the
//! first event after a quiet period, so output rate is bounded no matter how
//! fast events arrive.

use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, trace};

use super::messages::{OutboundMessage, PositionSnapshot, WalletSnapshot};
use crate::domain::{BundlerStatus, DomainEvent, Position, Trade, WalletView};

pub const DEFAULT_WINDOW: Duration = Duration::from_millis(250);

#[derive(Debug, Default, Clone, Copy)]
struct Dirty {
    trade: bool,
    wallet: bool,
    position: bool,
    bundler: bool,
}

/// Latest known state per kind
#[derive(Debug, Default)]
pub struct Projection {
    wallets: BTreeMap<String, WalletView>,
    positions: BTreeMap<(String, String), Position>,
    impacts: BTreeMap<String, f64>,
    bundler: BundlerStatus,
    latest_trade: Option<Trade>,
    dirty: Dirty,
}

impl Projection {
    pub fn apply(&mut self, event: DomainEvent) {
        match event {
            DomainEvent::TradeFilled(trade) => {
                self.latest_trade = Some(trade);
                self.dirty.trade = true;
            }
            DomainEvent::PositionChanged { position, closed } => {
                let key = (position.wallet_address.clone(), position.token_address.clone());
                if closed {
                    self.positions.remove(&key);
                } else {
                    self.positions.insert(key, position);
                }
                self.dirty.position = true;
            }
            DomainEvent::BundleStatusChanged { status, price_impact } => {
                self.bundler = status;
                self.dirty.bundler = true;
                if let Some((token, impact)) = price_impact {
                    self.impacts.insert(token, impact);
                    self.dirty.position = true;
                }
            }
            DomainEvent::WalletBalanceChanged(view) => {
                self.wallets.insert(view.address.clone(), view);
                self.dirty.wallet = true;
            }
        }
    }

    pub fn is_dirty(&self) -> bool {
        let d = self.dirty;
        d.trade || d.wallet || d.position || d.bundler
    }

    /// Snapshots for every kind changed since the last flush
    pub fn flush(&mut self) -> Vec<OutboundMessage> {
        let dirty = std::mem::take(&mut self.dirty);
        let mut out = Vec::new();

        if dirty.trade {
            if let Some(trade) = self.latest_trade.take() {
                out.push(OutboundMessage::Trade(trade));
            }
        }
        if dirty.wallet {
            out.push(OutboundMessage::WalletUpdate(WalletSnapshot::from_views(
                self.wallets.values().cloned().collect(),
            )));
        }
        if dirty.position {
            out.push(OutboundMessage::PositionUpdate(PositionSnapshot {
                positions: self.positions.values().cloned().collect(),
                price_impacts: self.impacts.clone(),
            }));
        }
        if dirty.bundler {
            out.push(OutboundMessage::BundlerUpdate(self.bundler));
        }
        out
    }
}

pub struct StateBroadcaster {
    events: mpsc::UnboundedReceiver<DomainEvent>,
    out: broadcast::Sender<OutboundMessage>,
    window: Duration,
    projection: Projection,
}

impl StateBroadcaster {
    pub fn new(
        events: mpsc::UnboundedReceiver<DomainEvent>,
        out: broadcast::Sender<OutboundMessage>,
        window: Duration,
    ) -> Self {
        Self {
            events,
            out,
            window,
            projection: Projection::default(),
        }
    }

    /// Run until every event sink is dropped, flushing what is left
    pub async fn run(mut self) {
        info!("State broadcaster started ({}ms window)", self.window.as_millis());
        while let Some(event) = self.events.recv().await {
            self.projection.apply(event);
            let deadline = Instant::now() + self.window;
            let open = loop {
                tokio::select! {
                    event = self.events.recv() => match event {
                        Some(event) => self.projection.apply(event),
                        None => break false,
                    },
                    _ = tokio::time::sleep_until(deadline) => break true,
                }
            };
            self.emit();
            if !open {
                break;
            }
        }
        info!("State broadcaster stopped");
    }

    fn emit(&mut self) {
        for message in self.projection.flush() {
            let kind = message.kind();
            match self.out.send(message) {
                Ok(receivers) => trace!(receivers, "Sent {}", kind),
                Err(_) => debug!("No observers for {}", kind),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventSink, Side, StopPolicy};

    fn trade(sig: &str) -> Trade {
        Trade::new("TKNA".into(), "w1".into(), Side::Buy, 1.0, 1.0, sig.into())
    }

    fn status(active: usize) -> DomainEvent {
        DomainEvent::BundleStatusChanged {
            status: BundlerStatus {
                active_bundles: active,
                ..Default::default()
            },
            price_impact: None,
        }
    }

    #[test]
    fn test_projection_coalesces_per_kind() {
        let mut projection = Projection::default();
        assert!(!projection.is_dirty());

        projection.apply(DomainEvent::TradeFilled(trade("a")));
        projection.apply(DomainEvent::TradeFilled(trade("b")));
        projection.apply(status(1));
        projection.apply(status(0));

        let out = projection.flush();
        assert_eq!(out.len(), 2);
        match &out[0] {
            OutboundMessage::Trade(t) => assert_eq!(t.signature, "b"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(out[1], OutboundMessage::BundlerUpdate(BundlerStatus::default()));
        assert!(projection.flush().is_empty());
    }

    #[test]
    fn test_closed_position_leaves_snapshot() {
        let mut projection = Projection::default();
        let position = Position::open("w1".into(), "TKNA".into(), 1.0, 5.0, &StopPolicy::default()).unwrap();

        projection.apply(DomainEvent::PositionChanged {
            position: position.clone(),
            closed: false,
        });
        projection.apply(DomainEvent::BundleStatusChanged {
            status: BundlerStatus::default(),
            price_impact: Some(("TKNA".into(), 0.02)),
        });
        match &projection.flush()[0] {
            OutboundMessage::PositionUpdate(s) => {
                assert_eq!(s.positions.len(), 1);
                assert_eq!(s.price_impacts["TKNA"], 0.02);
            }
            other => panic!("unexpected {:?}", other),
        }

        projection.apply(DomainEvent::PositionChanged { position, closed: true });
        match &projection.flush()[0] {
            OutboundMessage::PositionUpdate(s) => assert!(s.positions.is_empty()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_burst_becomes_one_message_per_window() {
        let (sink, events) = EventSink::channel();
        let (out, mut rx) = broadcast::channel(64);
        let handle = tokio::spawn(StateBroadcaster::new(events, out, Duration::from_millis(40)).run());

        for active in 0..20 {
            sink.publish(status(active));
        }
        let first = rx.recv().await.unwrap();
        assert_eq!(
            first,
            OutboundMessage::BundlerUpdate(BundlerStatus {
                active_bundles: 19,
                ..Default::default()
            })
        );
        assert!(rx.try_recv().is_err());

        sink.publish(DomainEvent::TradeFilled(trade("late")));
        assert_eq!(rx.recv().await.unwrap().kind(), "trade");

        drop(sink);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_pending_changes_flushed_on_close() {
        let (sink, events) = EventSink::channel();
        let (out, mut rx) = broadcast::channel(8);
        let handle = tokio::spawn(StateBroadcaster::new(events, out, Duration::from_secs(60)).run());

        sink.publish(status(1));
        drop(sink);
        handle.await.unwrap();

        assert_eq!(rx.recv().await.unwrap().kind(), "bundler_update");
    }
}
