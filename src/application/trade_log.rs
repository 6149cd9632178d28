//! Shared record of confirmed fills. Feeds the session volume ledger and
//! publishes each trade to the broadcaster.

use std::path::Path;
use tokio::sync::Mutex;

use crate::domain::{DomainEvent, EventSink, SessionReport, Trade, VolumeError, VolumeTracker};

pub struct TradeLog {
    volume: Mutex<VolumeTracker>,
    events: EventSink,
}

impl TradeLog {
    pub fn new(target_volume: Option<f64>, events: EventSink) -> Self {
        Self {
            volume: Mutex::new(VolumeTracker::new(target_volume)),
            events,
        }
    }

    pub async fn record(&self, trade: Trade) {
        tracing::debug!("Trade: {}", trade);
        self.volume.lock().await.record(trade.clone());
        self.events.publish(DomainEvent::TradeFilled(trade));
    }

    pub async fn start_session(&self, target_volume: Option<f64>) {
        self.volume.lock().await.start_session(target_volume);
    }

    pub async fn trade_count(&self) -> usize {
        self.volume.lock().await.trades().len()
    }

    pub async fn trades(&self) -> Vec<Trade> {
        self.volume.lock().await.trades().to_vec()
    }

    pub async fn report(&self) -> SessionReport {
        self.volume.lock().await.report()
    }

    pub async fn export_json<P: AsRef<Path>>(&self, path: P) -> Result<(), VolumeError> {
        self.volume.lock().await.export_json(path)
    }
}
