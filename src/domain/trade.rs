use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// A confirmed fill. Append-only: never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub timestamp: DateTime<Utc>,
    pub token_address: String,
    pub wallet: String,
    pub side: Side,
    /// Token units bought or sold
    pub amount: f64,
    /// Realized price in SOL per token
    pub price: f64,
    pub signature: String,
}

impl Trade {
    pub fn new(
        token_address: String,
        wallet: String,
        side: Side,
        amount: f64,
        price: f64,
        signature: String,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            token_address,
            wallet,
            side,
            amount,
            price,
            signature,
        }
    }

    /// Trade value in SOL
    pub fn notional(&self) -> f64 {
        self.amount * self.price
    }
}

impl fmt::Display for Trade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:.6} {} @ {:.9} SOL via {}",
            self.side, self.amount, self.token_address, self.price, self.wallet
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trade_notional() {
        let trade = Trade::new("TKNA".into(), "w1".into(), Side::Buy, 4.0, 0.25, "sig".into());
        assert!((trade.notional() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_trade_display() {
        let trade = Trade::new("TKNA".into(), "w1".into(), Side::Sell, 1.0, 2.0, "sig".into());
        let s = trade.to_string();
        assert!(s.starts_with("sell"));
        assert!(s.contains("TKNA"));
        assert!(s.contains("w1"));
    }

    #[test]
    fn test_trade_serializes_camel_case() {
        let trade = Trade::new("TKNA".into(), "w1".into(), Side::Buy, 1.0, 1.0, "sig".into());
        let json = serde_json::to_value(&trade).unwrap();
        assert_eq!(json["tokenAddress"], "TKNA");
        assert_eq!(json["side"], "buy");
    }
}
