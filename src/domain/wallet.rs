//! Trading Wallet
//!
//! A funded pool account. Holds a signing capability reference, never key material.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::ports::signer::TransactionSigner;

/// Lamports in one SOL
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

pub fn sol_to_lamports(sol: f64) -> u64 {
    if sol <= 0.0 {
        return 0;
    }
    (sol * LAMPORTS_PER_SOL as f64).round() as u64
}

pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum WalletError {
    #[error("Wallet {address} balance {available} lamports cannot cover debit of {requested}")]
    Overdraft {
        address: String,
        requested: u64,
        available: u64,
    },
}

/// How the pool picks a wallet for the next buy sub-order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    #[default]
    RoundRobin,
    BalanceWeighted,
}

pub struct TradingWallet {
    address: String,
    balance: u64,
    reserve_minimum: u64,
    funded: u64,
    signer: Arc<dyn TransactionSigner>,
}

impl TradingWallet {
    pub fn new(signer: Arc<dyn TransactionSigner>, reserve_minimum: u64) -> Self {
        Self {
            address: signer.address(),
            balance: 0,
            reserve_minimum,
            funded: 0,
            signer,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn balance(&self) -> u64 {
        self.balance
    }

    pub fn reserve_minimum(&self) -> u64 {
        self.reserve_minimum
    }

    /// Lamports transferred in from the main wallet over the pool's lifetime
    pub fn funded(&self) -> u64 {
        self.funded
    }

    pub fn signer(&self) -> &Arc<dyn TransactionSigner> {
        &self.signer
    }

    /// Lamports above the reserve minimum
    pub fn spendable(&self) -> u64 {
        self.balance.saturating_sub(self.reserve_minimum)
    }

    /// Wallets at or below their reserve are never selected for new orders
    pub fn is_eligible(&self) -> bool {
        self.balance > self.reserve_minimum
    }

    pub fn record_funding(&mut self, lamports: u64) {
        self.funded = self.funded.saturating_add(lamports);
        self.credit(lamports);
    }

    pub fn credit(&mut self, lamports: u64) {
        self.balance = self.balance.saturating_add(lamports);
    }

    pub fn debit(&mut self, lamports: u64) -> Result<(), WalletError> {
        match self.balance.checked_sub(lamports) {
            Some(remaining) => {
                self.balance = remaining;
                Ok(())
            }
            None => Err(WalletError::Overdraft {
                address: self.address.clone(),
                requested: lamports,
                available: self.balance,
            }),
        }
    }

    /// Replace the tracked balance with the value observed on-chain
    pub fn sync_balance(&mut self, lamports: u64) {
        self.balance = lamports;
    }

    pub fn view(&self) -> WalletView {
        WalletView {
            address: self.address.clone(),
            balance: lamports_to_sol(self.balance),
            reserve_minimum: lamports_to_sol(self.reserve_minimum),
            funded: lamports_to_sol(self.funded),
            profit_loss: lamports_to_sol(self.balance) - lamports_to_sol(self.funded),
            eligible: self.is_eligible(),
        }
    }
}

impl fmt::Debug for TradingWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TradingWallet")
            .field("address", &self.address)
            .field("balance", &self.balance)
            .field("reserve_minimum", &self.reserve_minimum)
            .field("funded", &self.funded)
            .finish()
    }
}

/// Immutable wallet snapshot in SOL units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletView {
    pub address: String,
    pub balance: f64,
    pub reserve_minimum: f64,
    pub funded: f64,
    pub profit_loss: f64,
    pub eligible: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::mocks::MockSigner;

    fn wallet(balance: u64, reserve: u64) -> TradingWallet {
        let mut w = TradingWallet::new(Arc::new(MockSigner::new("w1")), reserve);
        w.record_funding(balance);
        w
    }

    #[test]
    fn test_sol_conversions() {
        assert_eq!(sol_to_lamports(1.5), 1_500_000_000);
        assert_eq!(sol_to_lamports(-1.0), 0);
        assert_eq!(lamports_to_sol(250_000_000), 0.25);
    }

    #[test]
    fn test_debit_never_goes_negative() {
        let mut w = wallet(1_000, 0);
        let result = w.debit(1_001);
        assert!(matches!(result, Err(WalletError::Overdraft { available: 1_000, .. })));
        assert_eq!(w.balance(), 1_000);

        w.debit(1_000).unwrap();
        assert_eq!(w.balance(), 0);
    }

    #[test]
    fn test_eligibility_respects_reserve() {
        let w = wallet(5_000, 5_000);
        assert!(!w.is_eligible());
        assert_eq!(w.spendable(), 0);

        let w = wallet(5_001, 5_000);
        assert!(w.is_eligible());
        assert_eq!(w.spendable(), 1);
    }

    #[test]
    fn test_view_profit_loss() {
        let mut w = wallet(LAMPORTS_PER_SOL, 0);
        w.credit(LAMPORTS_PER_SOL / 2);
        let view = w.view();
        assert_eq!(view.address, "w1");
        assert!((view.profit_loss - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_debug_hides_signer() {
        let w = wallet(10, 0);
        let dbg = format!("{:?}", w);
        assert!(dbg.contains("w1"));
        assert!(!dbg.contains("signer"));
    }
}
