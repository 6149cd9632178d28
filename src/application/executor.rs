//! Transaction Executor
//!
//! Submits one trade or transfer, waits for confirmation within a bounded
//! window and retries transient failures with exponential backoff.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::domain::{lamports_to_sol, sol_to_lamports, Side, TradingWallet};
use crate::ports::{
    Confirmation, NetworkError, NetworkRpc, OrderRequest, TransactionRequest, TransactionSigner,
};

/// Fatal failures end the sub-order; Retryable ones exhausted their budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Fatal,
    Retryable,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),
    #[error("Slippage tolerance exceeded")]
    SlippageExceeded,
    #[error("Price impact {impact:.4} exceeds ceiling {ceiling:.4}")]
    PriceImpactExceeded { impact: f64, ceiling: f64 },
    #[error("Network error after {attempts} attempt(s): {source}")]
    Network {
        attempts: u32,
        #[source]
        source: NetworkError,
    },
    #[error("Transaction rejected: {0}")]
    Rejected(String),
}

impl ExecutionError {
    fn from_network(err: NetworkError, attempts: u32) -> Self {
        match err {
            NetworkError::InsufficientFunds(msg) => ExecutionError::InsufficientBalance(msg),
            NetworkError::SlippageExceeded => ExecutionError::SlippageExceeded,
            NetworkError::Rejected(msg)
            | NetworkError::Signing(msg)
            | NetworkError::InvalidAddress(msg)
            | NetworkError::InvalidQuote(msg) => ExecutionError::Rejected(msg),
            source => ExecutionError::Network { attempts, source },
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            ExecutionError::Network { .. } => FailureClass::Retryable,
            _ => FailureClass::Fatal,
        }
    }

    /// Failures that abort the rest of the job, not just this sub-order
    pub fn aborts_job(&self) -> bool {
        matches!(
            self,
            ExecutionError::SlippageExceeded | ExecutionError::PriceImpactExceeded { .. }
        )
    }

    pub fn attempts(&self) -> u32 {
        match self {
            ExecutionError::Network { attempts, .. } => *attempts,
            _ => 1,
        }
    }

    fn retryable_network(&self) -> bool {
        matches!(self, ExecutionError::Network { source, .. } if source.is_retryable())
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Total attempts per submission, including the first
    pub max_retries: u32,
    /// Backoff before the second attempt, doubled after each failure
    pub base_backoff: Duration,
    pub confirm_timeout: Duration,
    pub confirm_poll: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_secs(1),
            confirm_timeout: Duration::from_secs(30),
            confirm_poll: Duration::from_millis(500),
        }
    }
}

/// Result of a confirmed trade
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub signature: String,
    pub quoted_price: f64,
    pub fill_price: f64,
    /// (fill - quoted) / quoted
    pub price_impact: f64,
    /// Order units spent: SOL for buys, tokens for sells
    pub amount_in: f64,
    /// Units received: tokens for buys, SOL for sells
    pub amount_out: f64,
    pub attempts: u32,
}

impl ExecutionReport {
    /// Tokens moved by the trade
    pub fn token_amount(&self, side: Side) -> f64 {
        match side {
            Side::Buy => self.amount_out,
            Side::Sell => self.amount_in,
        }
    }
}

pub struct TransactionExecutor {
    network: Arc<dyn NetworkRpc>,
    config: ExecutorConfig,
}

impl TransactionExecutor {
    pub fn new(network: Arc<dyn NetworkRpc>, config: ExecutorConfig) -> Self {
        Self { network, config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Execute a swap from `wallet`. The wallet's tracked balance is only
    /// changed once the trade is confirmed.
    pub async fn submit(
        &self,
        wallet: &mut TradingWallet,
        order: &OrderRequest,
    ) -> Result<ExecutionReport, ExecutionError> {
        let wallet_ref: &TradingWallet = &*wallet;
        let label = format!("{} {}", order.side, order.token_address);
        let ((mut report, lamports_delta), attempts) = self
            .with_retry(&label, move || self.attempt_swap(wallet_ref, order))
            .await?;
        report.attempts = attempts;

        match order.side {
            Side::Buy => {
                if let Err(e) = wallet.debit(lamports_delta) {
                    tracing::warn!("Balance tracking drift after buy: {}", e);
                }
            }
            Side::Sell => wallet.credit(lamports_delta),
        }

        tracing::info!(
            "{} {:.6} {} from {} @ {:.9} (impact {:+.4}%, {} attempt(s)) sig={}",
            order.side,
            order.amount,
            order.token_address,
            wallet.address(),
            report.fill_price,
            report.price_impact * 100.0,
            report.attempts,
            report.signature
        );
        Ok(report)
    }

    /// Move lamports between accounts with the same retry discipline
    pub async fn transfer(
        &self,
        signer: &dyn TransactionSigner,
        to: &str,
        lamports: u64,
    ) -> Result<String, ExecutionError> {
        let request = TransactionRequest::Transfer {
            to: to.to_string(),
            lamports,
        };
        let request = &request;
        let label = format!("transfer {} -> {}", signer.address(), to);
        let (signature, attempts) = self
            .with_retry(&label, move || async move {
                let signature = self
                    .network
                    .send_transaction(signer, request)
                    .await
                    .map_err(|e| ExecutionError::from_network(e, 1))?;
                self.await_confirmation(&signature).await?;
                Ok(signature)
            })
            .await?;
        if attempts > 1 {
            tracing::info!("{} confirmed after {} attempts", label, attempts);
        }
        tracing::debug!(
            "Transferred {:.6} SOL {} -> {} sig={}",
            lamports_to_sol(lamports),
            signer.address(),
            to,
            signature
        );
        Ok(signature)
    }

    async fn attempt_swap(
        &self,
        wallet: &TradingWallet,
        order: &OrderRequest,
    ) -> Result<(ExecutionReport, u64), ExecutionError> {
        let quote = self
            .network
            .get_quote(order)
            .await
            .map_err(|e| ExecutionError::from_network(e, 1))?;

        if !(quote.price > 0.0) {
            let err = NetworkError::InvalidQuote(format!("price {} for {}", quote.price, order.token_address));
            return Err(ExecutionError::from_network(err, 1));
        }
        if quote.price_impact > order.max_price_impact {
            return Err(ExecutionError::PriceImpactExceeded {
                impact: quote.price_impact,
                ceiling: order.max_price_impact,
            });
        }

        if order.side == Side::Buy {
            let required = sol_to_lamports(order.amount);
            if required > wallet.spendable() {
                return Err(ExecutionError::InsufficientBalance(format!(
                    "{} needs {} lamports, {} spendable",
                    wallet.address(),
                    required,
                    wallet.spendable()
                )));
            }
        }

        let request = TransactionRequest::Swap {
            order: order.clone(),
            quote: quote.clone(),
        };
        let signature = self
            .network
            .send_transaction(wallet.signer().as_ref(), &request)
            .await
            .map_err(|e| ExecutionError::from_network(e, 1))?;

        let confirmation = self.await_confirmation(&signature).await?;
        let fill_price = confirmation
            .realized_price
            .filter(|p| *p > 0.0)
            .unwrap_or(quote.price);
        let price_impact = (fill_price - quote.price) / quote.price;

        let (amount_out, lamports_delta) = match order.side {
            Side::Buy => (order.amount / fill_price, sol_to_lamports(order.amount)),
            Side::Sell => {
                let proceeds = order.amount * fill_price;
                (proceeds, sol_to_lamports(proceeds))
            }
        };

        Ok((
            ExecutionReport {
                signature,
                quoted_price: quote.price,
                fill_price,
                price_impact,
                amount_in: order.amount,
                amount_out,
                attempts: 1,
            },
            lamports_delta,
        ))
    }

    /// Poll until confirmed; exceeding the timeout is a retryable failure
    async fn await_confirmation(&self, signature: &str) -> Result<Confirmation, ExecutionError> {
        let poll = async {
            loop {
                match self.network.confirm_transaction(signature).await? {
                    Some(confirmation) => return Ok(confirmation),
                    None => tokio::time::sleep(self.config.confirm_poll).await,
                }
            }
        };

        match tokio::time::timeout(self.config.confirm_timeout, poll).await {
            Ok(result) => result.map_err(|e: NetworkError| ExecutionError::from_network(e, 1)),
            Err(_) => {
                tracing::warn!("Confirmation timeout for {}", signature);
                self.network.forget(signature);
                Err(ExecutionError::Network {
                    attempts: 1,
                    source: NetworkError::Timeout,
                })
            }
        }
    }

    /// Run `op` up to `max_retries` times. Returns the value and the attempt it succeeded on.
    async fn with_retry<T, F, Fut>(&self, label: &str, op: F) -> Result<(T, u32), ExecutionError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ExecutionError>>,
    {
        let max_attempts = self.config.max_retries.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok((value, attempt)),
                Err(e) if e.retryable_network() && attempt < max_attempts => {
                    let backoff = self.config.base_backoff * 2u32.saturating_pow(attempt - 1);
                    tracing::warn!(
                        "{} failed: {}, retrying in {:?} (attempt {}/{})",
                        label,
                        e,
                        backoff,
                        attempt,
                        max_attempts
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(ExecutionError::Network { source, .. }) => {
                    tracing::error!("{} gave up after {} attempt(s): {}", label, attempt, source);
                    return Err(ExecutionError::Network {
                        attempts: attempt,
                        source,
                    });
                }
                Err(e) => {
                    tracing::error!("{} failed: {}", label, e);
                    return Err(e);
                }
            }
        }
    }
}
