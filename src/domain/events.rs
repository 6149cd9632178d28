//! Domain Events
//!
//! Every state change in the engine is published as an event. The broadcaster
//! is the only consumer; producers never block on it.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::position::Position;
use super::trade::Trade;
use super::wallet::WalletView;

/// Derived rollup over live jobs, never mutated directly
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundlerStatus {
    pub active_bundles: usize,
    pub pending_transactions: usize,
    pub completed_bundles: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    TradeFilled(Trade),
    PositionChanged {
        position: Position,
        closed: bool,
    },
    BundleStatusChanged {
        status: BundlerStatus,
        /// Latest cumulative impact for the job's token, if it changed
        price_impact: Option<(String, f64)>,
    },
    WalletBalanceChanged(WalletView),
}

impl DomainEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::TradeFilled(_) => "trade",
            DomainEvent::PositionChanged { .. } => "position",
            DomainEvent::BundleStatusChanged { .. } => "bundler",
            DomainEvent::WalletBalanceChanged(_) => "wallet",
        }
    }
}

/// Fire-and-forget publisher handle
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<DomainEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<DomainEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DomainEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// A sink whose events go nowhere
    pub fn disconnected() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }

    pub fn publish(&self, event: DomainEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Event dropped: no subscriber");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trade::Side;

    #[tokio::test]
    async fn test_sink_delivers_in_order() {
        let (sink, mut rx) = EventSink::channel();
        let status = BundlerStatus {
            active_bundles: 1,
            ..Default::default()
        };
        sink.publish(DomainEvent::BundleStatusChanged {
            status,
            price_impact: None,
        });
        sink.publish(DomainEvent::TradeFilled(Trade::new(
            "TKNA".into(),
            "w1".into(),
            Side::Buy,
            1.0,
            1.0,
            "sig".into(),
        )));

        assert_eq!(rx.recv().await.unwrap().kind(), "bundler");
        assert_eq!(rx.recv().await.unwrap().kind(), "trade");
    }

    #[test]
    fn test_disconnected_sink_does_not_panic() {
        let sink = EventSink::disconnected();
        sink.publish(DomainEvent::BundleStatusChanged {
            status: BundlerStatus::default(),
            price_impact: None,
        });
    }

    #[test]
    fn test_bundler_status_camel_case() {
        let json = serde_json::to_value(BundlerStatus {
            active_bundles: 2,
            pending_transactions: 5,
            completed_bundles: 7,
        })
        .unwrap();
        assert_eq!(json["activeBundles"], 2);
        assert_eq!(json["pendingTransactions"], 5);
        assert_eq!(json["completedBundles"], 7);
    }
}
