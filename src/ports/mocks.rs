//! Scripted test doubles for the network and signing ports.
//!
//! `MockNetwork` keeps an in-memory lamport ledger and lets tests queue
//! failures, pin failing senders and hold transactions unconfirmed.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::domain::{sol_to_lamports, Side};
use super::network::{Confirmation, NetworkError, NetworkRpc, OrderRequest, Quote, TransactionRequest};
use super::signer::{SignerError, SignerProvider, TransactionSigner};

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Signer with a fixed label as its address
#[derive(Debug, Clone)]
pub struct MockSigner {
    address: String,
}

impl MockSigner {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
        }
    }
}

impl TransactionSigner for MockSigner {
    fn address(&self) -> String {
        self.address.clone()
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SignerError> {
        let mut sig = vec![0u8; 64];
        for (slot, byte) in sig.iter_mut().zip(message.iter()) {
            *slot = *byte;
        }
        Ok(sig)
    }
}

/// Hands out `wallet-1`, `wallet-2`, ... and a `main-wallet` funding signer
#[derive(Debug)]
pub struct MockSignerProvider {
    main: Arc<MockSigner>,
    created: AtomicU64,
}

impl Default for MockSignerProvider {
    fn default() -> Self {
        Self::new("main-wallet")
    }
}

impl MockSignerProvider {
    pub fn new(main_address: &str) -> Self {
        Self {
            main: Arc::new(MockSigner::new(main_address)),
            created: AtomicU64::new(0),
        }
    }
}

impl SignerProvider for MockSignerProvider {
    fn main_signer(&self) -> Arc<dyn TransactionSigner> {
        self.main.clone()
    }

    fn create_signer(&self) -> Result<Arc<dyn TransactionSigner>, SignerError> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Arc::new(MockSigner::new(&format!("wallet-{}", n))))
    }
}

/// A transaction the mock accepted
#[derive(Debug, Clone, PartialEq)]
pub struct SentTransaction {
    pub signer: String,
    pub request: TransactionRequest,
    pub signature: String,
}

#[derive(Debug, Default)]
struct PendingTx {
    realized_price: Option<f64>,
    confirmed: bool,
}

#[derive(Debug)]
pub struct MockNetwork {
    balances: Mutex<HashMap<String, u64>>,
    prices: Mutex<HashMap<String, f64>>,
    quote_impact: Mutex<f64>,
    fill_slippage: Mutex<f64>,
    scripted_failures: Mutex<VecDeque<NetworkError>>,
    failing_senders: Mutex<HashMap<String, NetworkError>>,
    unconfirmed_sends: Mutex<usize>,
    unconfirmed_senders: Mutex<HashSet<String>>,
    forgotten: Mutex<Vec<String>>,
    unreachable_balances: Mutex<HashSet<String>>,
    pending: Mutex<HashMap<String, PendingTx>>,
    sent: Mutex<Vec<SentTransaction>>,
    send_attempts: AtomicU64,
    counter: AtomicU64,
}

impl Default for MockNetwork {
    fn default() -> Self {
        Self {
            balances: Mutex::new(HashMap::new()),
            prices: Mutex::new(HashMap::new()),
            quote_impact: Mutex::new(0.0),
            fill_slippage: Mutex::new(0.0),
            scripted_failures: Mutex::new(VecDeque::new()),
            failing_senders: Mutex::new(HashMap::new()),
            unconfirmed_sends: Mutex::new(0),
            unconfirmed_senders: Mutex::new(HashSet::new()),
            forgotten: Mutex::new(Vec::new()),
            unreachable_balances: Mutex::new(HashSet::new()),
            pending: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            send_attempts: AtomicU64::new(0),
            counter: AtomicU64::new(0),
        }
    }
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to seed an account balance
    pub fn with_balance(self, address: &str, lamports: u64) -> Self {
        self.set_balance(address, lamports);
        self
    }

    /// Builder method to set a token price (SOL per token, default 1.0)
    pub fn with_price(self, token: &str, price: f64) -> Self {
        self.set_price(token, price);
        self
    }

    /// Builder method to set the quoted price impact fraction
    pub fn with_quote_impact(self, impact: f64) -> Self {
        *guard(&self.quote_impact) = impact;
        self
    }

    /// Builder method to make fills land this fraction worse than quoted
    pub fn with_fill_slippage(self, slippage: f64) -> Self {
        *guard(&self.fill_slippage) = slippage;
        self
    }

    pub fn set_balance(&self, address: &str, lamports: u64) {
        guard(&self.balances).insert(address.to_string(), lamports);
    }

    pub fn set_fill_slippage(&self, slippage: f64) {
        *guard(&self.fill_slippage) = slippage;
    }

    pub fn set_price(&self, token: &str, price: f64) {
        guard(&self.prices).insert(token.to_string(), price);
    }

    pub fn balance_of(&self, address: &str) -> u64 {
        guard(&self.balances).get(address).copied().unwrap_or(0)
    }

    /// The next sends fail with these errors, in order
    pub fn fail_next_sends(&self, errors: Vec<NetworkError>) {
        guard(&self.scripted_failures).extend(errors);
    }

    /// Every send from `address` fails with `error`
    pub fn fail_sends_from(&self, address: &str, error: NetworkError) {
        guard(&self.failing_senders).insert(address.to_string(), error);
    }

    pub fn clear_failing_senders(&self) {
        guard(&self.failing_senders).clear();
    }

    /// Balance lookups for `address` fail as unreachable
    pub fn fail_balance_of(&self, address: &str) {
        guard(&self.unreachable_balances).insert(address.to_string());
    }

    /// The next `count` accepted sends never confirm
    pub fn hold_next_confirmations(&self, count: usize) {
        *guard(&self.unconfirmed_sends) += count;
    }

    /// Sends from `address` are accepted but never confirm
    pub fn hold_confirmations_from(&self, address: &str) {
        guard(&self.unconfirmed_senders).insert(address.to_string());
    }

    /// Signatures the caller stopped waiting on, in order
    pub fn forgotten(&self) -> Vec<String> {
        guard(&self.forgotten).clone()
    }

    pub fn sent(&self) -> Vec<SentTransaction> {
        guard(&self.sent).clone()
    }

    /// Swaps accepted so far, in send order
    pub fn sent_orders(&self) -> Vec<(String, OrderRequest)> {
        guard(&self.sent)
            .iter()
            .filter_map(|tx| match &tx.request {
                TransactionRequest::Swap { order, .. } => Some((tx.signer.clone(), order.clone())),
                TransactionRequest::Transfer { .. } => None,
            })
            .collect()
    }

    /// Every send call, including ones that failed
    pub fn send_attempts(&self) -> u64 {
        self.send_attempts.load(Ordering::SeqCst)
    }

    fn price_of(&self, token: &str) -> f64 {
        guard(&self.prices).get(token).copied().unwrap_or(1.0)
    }

    fn apply(&self, signer: &str, request: &TransactionRequest) -> Result<Option<f64>, NetworkError> {
        let mut balances = guard(&self.balances);
        let available = balances.get(signer).copied().unwrap_or(0);
        match request {
            TransactionRequest::Transfer { to, lamports } => {
                let remaining = available
                    .checked_sub(*lamports)
                    .ok_or_else(|| NetworkError::InsufficientFunds(signer.to_string()))?;
                balances.insert(signer.to_string(), remaining);
                *balances.entry(to.clone()).or_insert(0) += lamports;
                Ok(None)
            }
            TransactionRequest::Swap { order, quote } => {
                let slippage = *guard(&self.fill_slippage);
                match order.side {
                    Side::Buy => {
                        let cost = sol_to_lamports(order.amount);
                        let remaining = available
                            .checked_sub(cost)
                            .ok_or_else(|| NetworkError::InsufficientFunds(signer.to_string()))?;
                        balances.insert(signer.to_string(), remaining);
                        Ok(Some(quote.price * (1.0 + slippage)))
                    }
                    Side::Sell => {
                        let price = quote.price * (1.0 - slippage);
                        let proceeds = sol_to_lamports(order.amount * price);
                        balances.insert(signer.to_string(), available.saturating_add(proceeds));
                        Ok(Some(price))
                    }
                }
            }
        }
    }
}

#[async_trait]
impl NetworkRpc for MockNetwork {
    async fn get_balance(&self, address: &str) -> Result<u64, NetworkError> {
        if guard(&self.unreachable_balances).contains(address) {
            return Err(NetworkError::Unreachable(format!("balance of {}", address)));
        }
        Ok(self.balance_of(address))
    }

    async fn get_quote(&self, order: &OrderRequest) -> Result<Quote, NetworkError> {
        let price = self.price_of(&order.token_address);
        let out_amount = match order.side {
            Side::Buy => order.amount / price,
            Side::Sell => order.amount * price,
        };
        Ok(Quote {
            price,
            in_amount: order.amount,
            out_amount,
            price_impact: *guard(&self.quote_impact),
            route: serde_json::Value::Null,
        })
    }

    async fn send_transaction(
        &self,
        signer: &dyn TransactionSigner,
        request: &TransactionRequest,
    ) -> Result<String, NetworkError> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        let address = signer.address();

        if let Some(err) = guard(&self.failing_senders).get(&address).cloned() {
            return Err(err);
        }
        if let Some(err) = guard(&self.scripted_failures).pop_front() {
            return Err(err);
        }

        let realized_price = self.apply(&address, request)?;
        let signature = format!("mock-sig-{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1);

        let confirmed = {
            let mut held = guard(&self.unconfirmed_sends);
            if guard(&self.unconfirmed_senders).contains(&address) {
                false
            } else if *held > 0 {
                *held -= 1;
                false
            } else {
                true
            }
        };
        guard(&self.pending).insert(
            signature.clone(),
            PendingTx {
                realized_price,
                confirmed,
            },
        );
        guard(&self.sent).push(SentTransaction {
            signer: address,
            request: request.clone(),
            signature: signature.clone(),
        });
        Ok(signature)
    }

    async fn confirm_transaction(&self, signature: &str) -> Result<Option<Confirmation>, NetworkError> {
        match guard(&self.pending).get(signature) {
            Some(tx) if tx.confirmed => Ok(Some(Confirmation {
                slot: Some(1),
                realized_price: tx.realized_price,
            })),
            Some(_) => Ok(None),
            None => Err(NetworkError::Rejected(format!("unknown signature {}", signature))),
        }
    }

    fn forget(&self, signature: &str) {
        guard(&self.forgotten).push(signature.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_transfer_moves_lamports() {
        let net = MockNetwork::new().with_balance("a", 1_000);
        let signer = MockSigner::new("a");
        let sig = net
            .send_transaction(&signer, &TransactionRequest::Transfer { to: "b".into(), lamports: 400 })
            .await
            .unwrap();

        assert_eq!(net.balance_of("a"), 600);
        assert_eq!(net.get_balance("b").await, Ok(400));
        assert!(net.confirm_transaction(&sig).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_mock_scripted_failures_in_order() {
        let net = MockNetwork::new().with_balance("a", 1_000);
        net.fail_next_sends(vec![NetworkError::Timeout, NetworkError::RateLimited]);
        let signer = MockSigner::new("a");
        let req = TransactionRequest::Transfer { to: "b".into(), lamports: 1 };

        assert_eq!(net.send_transaction(&signer, &req).await, Err(NetworkError::Timeout));
        assert_eq!(net.send_transaction(&signer, &req).await, Err(NetworkError::RateLimited));
        assert!(net.send_transaction(&signer, &req).await.is_ok());
        assert_eq!(net.send_attempts(), 3);
    }

    #[tokio::test]
    async fn test_mock_held_confirmation() {
        let net = MockNetwork::new().with_balance("a", 10);
        net.hold_next_confirmations(1);
        let signer = MockSigner::new("a");
        let req = TransactionRequest::Transfer { to: "b".into(), lamports: 1 };

        let held = net.send_transaction(&signer, &req).await.unwrap();
        let ok = net.send_transaction(&signer, &req).await.unwrap();
        assert_eq!(net.confirm_transaction(&held).await, Ok(None));
        assert!(net.confirm_transaction(&ok).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_mock_quote_uses_price() {
        let net = MockNetwork::new().with_price("TKNA", 0.5).with_quote_impact(0.01);
        let quote = net.get_quote(&OrderRequest::buy("TKNA", 1.0, 50, 0.05)).await.unwrap();
        assert_eq!(quote.price, 0.5);
        assert_eq!(quote.out_amount, 2.0);
        assert_eq!(quote.price_impact, 0.01);
    }

    #[test]
    fn test_signer_provider_sequence() {
        let provider = MockSignerProvider::default();
        assert_eq!(provider.main_signer().address(), "main-wallet");
        assert_eq!(provider.create_signer().unwrap().address(), "wallet-1");
        assert_eq!(provider.create_signer().unwrap().address(), "wallet-2");
    }
}
