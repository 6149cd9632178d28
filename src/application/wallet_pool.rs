//! Wallet Pool
//!
//! Owns the trading wallets. Each wallet sits behind its own async mutex, so
//! holding a wallet's guard is what gives a job the right to trade from it.
//! Balances change only through confirmed executor results or funding and
//! recall transfers.

use rand::distributions::{Distribution, WeightedIndex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::executor::{ExecutionError, TransactionExecutor};
use crate::domain::{
    lamports_to_sol, sol_to_lamports, DomainEvent, EventSink, SelectionStrategy, TradingWallet,
    WalletView,
};
use crate::ports::{NetworkError, NetworkRpc, SignerError, SignerProvider, TransactionSigner};

#[derive(Debug, Error)]
pub enum WalletPoolError {
    #[error("Main wallet holds {available:.6} SOL, funding needs {required:.6} SOL")]
    Funding { required: f64, available: f64 },
    #[error("No wallet above its reserve minimum is available")]
    NoEligibleWallet,
    #[error("Unknown wallet: {0}")]
    UnknownWallet(String),
    #[error("Invalid pool request: {0}")]
    InvalidRequest(String),
    #[error("Signer error: {0}")]
    Signer(#[from] SignerError),
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Lamports each wallet keeps back from trading
    pub reserve_minimum: u64,
    /// Lamports budgeted for one transfer fee. Added per wallet to the
    /// funding requirement and left behind in each wallet on recall.
    pub fee_reserve: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            reserve_minimum: sol_to_lamports(0.01),
            fee_reserve: sol_to_lamports(0.001),
        }
    }
}

/// A wallet that could not be swept
#[derive(Debug, Clone, PartialEq)]
pub struct WalletFailure {
    pub address: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecallReport {
    /// Addresses swept, with lamports moved back to the main wallet
    pub recalled: Vec<(String, u64)>,
    pub failures: Vec<WalletFailure>,
    pub total_lamports: u64,
}

impl RecallReport {
    pub fn total_sol(&self) -> f64 {
        lamports_to_sol(self.total_lamports)
    }
}

struct PoolEntry {
    address: String,
    wallet: Arc<Mutex<TradingWallet>>,
}

pub struct WalletPool {
    network: Arc<dyn NetworkRpc>,
    executor: Arc<TransactionExecutor>,
    signers: Arc<dyn SignerProvider>,
    main: Arc<dyn TransactionSigner>,
    wallets: RwLock<Vec<PoolEntry>>,
    cursor: AtomicUsize,
    config: PoolConfig,
    events: EventSink,
}

impl WalletPool {
    pub fn new(
        network: Arc<dyn NetworkRpc>,
        executor: Arc<TransactionExecutor>,
        signers: Arc<dyn SignerProvider>,
        config: PoolConfig,
        events: EventSink,
    ) -> Self {
        let main = signers.main_signer();
        Self {
            network,
            executor,
            signers,
            main,
            wallets: RwLock::new(Vec::new()),
            cursor: AtomicUsize::new(0),
            config,
            events,
        }
    }

    pub fn main_address(&self) -> String {
        self.main.address()
    }

    pub async fn main_balance(&self) -> Result<u64, WalletPoolError> {
        Ok(self.network.get_balance(&self.main.address()).await?)
    }

    pub async fn wallet_count(&self) -> usize {
        self.wallets.read().await.len()
    }

    pub async fn addresses(&self) -> Vec<String> {
        self.wallets
            .read()
            .await
            .iter()
            .map(|e| e.address.clone())
            .collect()
    }

    /// Allocate `count` wallets and fund each from the main wallet.
    ///
    /// The main balance is checked up front. A wallet whose funding transfer
    /// fails is logged and left out of the pool.
    pub async fn create(&self, count: usize, sol_per_wallet: f64) -> Result<Vec<WalletView>, WalletPoolError> {
        if count == 0 {
            return Err(WalletPoolError::InvalidRequest("wallet count must be at least 1".into()));
        }
        let per_wallet = sol_to_lamports(sol_per_wallet);
        if per_wallet <= self.config.reserve_minimum {
            return Err(WalletPoolError::InvalidRequest(format!(
                "{} SOL per wallet does not clear the reserve minimum of {} SOL",
                sol_per_wallet,
                lamports_to_sol(self.config.reserve_minimum)
            )));
        }

        let required = per_wallet
            .saturating_add(self.config.fee_reserve)
            .saturating_mul(count as u64);
        let available = self.main_balance().await?;
        if available < required {
            return Err(WalletPoolError::Funding {
                required: lamports_to_sol(required),
                available: lamports_to_sol(available),
            });
        }

        tracing::info!(
            "Creating {} wallets with {:.4} SOL each ({:.4} SOL total)",
            count,
            sol_per_wallet,
            lamports_to_sol(required)
        );

        let mut created = Vec::with_capacity(count);
        for _ in 0..count {
            let signer = self.signers.create_signer()?;
            let mut wallet = TradingWallet::new(signer, self.config.reserve_minimum);

            match self
                .executor
                .transfer(self.main.as_ref(), wallet.address(), per_wallet)
                .await
            {
                Ok(signature) => {
                    wallet.record_funding(per_wallet);
                    tracing::debug!("Funded {} sig={}", wallet.address(), signature);
                }
                Err(e) => {
                    tracing::warn!("Failed to fund wallet {}: {}", wallet.address(), e);
                    continue;
                }
            }

            let view = wallet.view();
            self.events.publish(DomainEvent::WalletBalanceChanged(view.clone()));
            self.wallets.write().await.push(PoolEntry {
                address: view.address.clone(),
                wallet: Arc::new(Mutex::new(wallet)),
            });
            created.push(view);
        }

        tracing::info!("Wallet pool ready: {}/{} wallets funded", created.len(), count);
        Ok(created)
    }

    /// Sweep every wallet back to the main wallet.
    ///
    /// Never aborts: each wallet's failure is collected and the sweep moves on.
    pub async fn recall(&self) -> RecallReport {
        let entries: Vec<(String, Arc<Mutex<TradingWallet>>)> = self
            .wallets
            .read()
            .await
            .iter()
            .map(|e| (e.address.clone(), e.wallet.clone()))
            .collect();

        let main_address = self.main.address();
        let mut report = RecallReport::default();

        for (address, wallet) in entries {
            let mut wallet = wallet.lock().await;
            match self.sweep(&mut wallet, &main_address).await {
                Ok(0) => tracing::debug!("Nothing to recall from {}", address),
                Ok(lamports) => {
                    report.total_lamports += lamports;
                    report.recalled.push((address, lamports));
                }
                Err(e) => {
                    tracing::warn!("Recall failed for {}: {}", address, e);
                    report.failures.push(WalletFailure {
                        address,
                        error: e.to_string(),
                    });
                }
            }
            self.events.publish(DomainEvent::WalletBalanceChanged(wallet.view()));
        }

        tracing::info!(
            "Recalled {:.6} SOL from {} wallets ({} failed)",
            report.total_sol(),
            report.recalled.len(),
            report.failures.len()
        );
        report
    }

    async fn sweep(&self, wallet: &mut TradingWallet, to: &str) -> Result<u64, WalletPoolError> {
        let on_chain = self.network.get_balance(wallet.address()).await?;
        wallet.sync_balance(on_chain);

        let amount = on_chain.saturating_sub(self.config.fee_reserve);
        if amount == 0 {
            return Ok(0);
        }
        self.executor
            .transfer(wallet.signer().as_ref(), to, amount)
            .await
            .map_err(|e| match e {
                ExecutionError::Network { source, .. } => WalletPoolError::Network(source),
                other => WalletPoolError::Network(NetworkError::Rejected(other.to_string())),
            })?;
        wallet.sync_balance(on_chain - amount);
        Ok(amount)
    }

    /// Choose a wallet for the next buy sub-order and lock it.
    ///
    /// Wallets at or below their reserve are skipped. A free wallet is
    /// preferred; if every eligible wallet is busy the call waits for one.
    pub async fn select_for_order(
        &self,
        strategy: SelectionStrategy,
    ) -> Result<OwnedMutexGuard<TradingWallet>, WalletPoolError> {
        let candidates: Vec<Arc<Mutex<TradingWallet>>> = {
            let wallets = self.wallets.read().await;
            if wallets.is_empty() {
                return Err(WalletPoolError::NoEligibleWallet);
            }
            let start = self.cursor.fetch_add(1, Ordering::Relaxed) % wallets.len();
            wallets
                .iter()
                .cycle()
                .skip(start)
                .take(wallets.len())
                .map(|e| e.wallet.clone())
                .collect()
        };

        let mut free = Vec::new();
        let mut busy = Vec::new();
        for candidate in candidates {
            match candidate.clone().try_lock_owned() {
                Ok(guard) if guard.is_eligible() => {
                    if strategy == SelectionStrategy::RoundRobin {
                        return Ok(guard);
                    }
                    free.push(guard);
                }
                Ok(_) => {}
                Err(_) => busy.push(candidate),
            }
        }

        if !free.is_empty() {
            return Ok(pick_weighted(free));
        }

        for candidate in busy {
            let guard = candidate.lock_owned().await;
            if guard.is_eligible() {
                return Ok(guard);
            }
        }
        Err(WalletPoolError::NoEligibleWallet)
    }

    /// Lock a specific wallet, waiting if a job is trading from it
    pub async fn lease(&self, address: &str) -> Result<OwnedMutexGuard<TradingWallet>, WalletPoolError> {
        let wallet = self
            .wallets
            .read()
            .await
            .iter()
            .find(|e| e.address == address)
            .map(|e| e.wallet.clone())
            .ok_or_else(|| WalletPoolError::UnknownWallet(address.to_string()))?;
        Ok(wallet.lock_owned().await)
    }

    pub fn publish_balance(&self, wallet: &TradingWallet) {
        self.events.publish(DomainEvent::WalletBalanceChanged(wallet.view()));
    }

    /// Current view of every wallet
    pub async fn snapshot(&self) -> Vec<WalletView> {
        let entries: Vec<Arc<Mutex<TradingWallet>>> =
            self.wallets.read().await.iter().map(|e| e.wallet.clone()).collect();
        let mut views = Vec::with_capacity(entries.len());
        for wallet in entries {
            views.push(wallet.lock().await.view());
        }
        views
    }
}

/// Draw one guard with probability proportional to its spendable balance
fn pick_weighted(mut free: Vec<OwnedMutexGuard<TradingWallet>>) -> OwnedMutexGuard<TradingWallet> {
    let weights: Vec<u64> = free.iter().map(|w| w.spendable()).collect();
    let index = match WeightedIndex::new(&weights) {
        Ok(dist) => dist.sample(&mut rand::thread_rng()),
        Err(_) => 0,
    };
    free.swap_remove(index)
}
