//! Live ledger adapter
//!
//! Implements `NetworkRpc` on top of the Solana RPC client and the Jupiter
//! swap API. Buys route SOL into the token, sells route the token back into
//! SOL; both go through the wrapped-SOL mint. With a Jito client attached,
//! swaps go to the block engine as tipped bundles instead of plain RPC.

use async_trait::async_trait;
use base64::Engine;
use solana_sdk::{
    hash::Hash,
    message::Message,
    pubkey::Pubkey,
    signature::Signature,
    system_instruction,
    transaction::{Transaction, VersionedTransaction},
};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use super::rpc::{classify, SolanaClient};
use crate::adapters::jito::{plan_bundles, JitoBundleClient, JitoError};
use crate::adapters::jupiter::{JupiterClient, QuoteRequest, SwapRequest};
use crate::domain::{lamports_to_sol, sol_to_lamports, Side, LAMPORTS_PER_SOL};
use crate::ports::{
    Confirmation, NetworkError, NetworkRpc, OrderRequest, Quote, TransactionRequest, TransactionSigner,
};

const SOL_DECIMALS: u8 = 9;

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn parse_pubkey(address: &str) -> Result<Pubkey, NetworkError> {
    Pubkey::from_str(address).map_err(|_| NetworkError::InvalidAddress(address.to_string()))
}

fn attach_signature(signer: &dyn TransactionSigner, message: &[u8]) -> Result<Signature, NetworkError> {
    let bytes = signer
        .sign(message)
        .map_err(|e| NetworkError::Signing(e.to_string()))?;
    Signature::try_from(bytes.as_slice())
        .map_err(|_| NetworkError::Signing(format!("{} returned a malformed signature", signer.address())))
}

/// Swap awaiting confirmation, kept to read the fill back from the ledger
#[derive(Debug, Clone)]
struct PendingSwap {
    owner: String,
    mint: String,
}

pub struct SolanaNetwork {
    rpc: SolanaClient,
    jupiter: JupiterClient,
    base_mint: String,
    priority_fee_lamports: u64,
    decimals: Mutex<HashMap<String, u8>>,
    pending: Mutex<HashMap<String, PendingSwap>>,
    bundles: Option<JitoBundleClient>,
}

impl SolanaNetwork {
    pub fn new(rpc: SolanaClient, jupiter: JupiterClient, base_mint: &str, priority_fee_lamports: u64) -> Self {
        let mut decimals = HashMap::new();
        decimals.insert(base_mint.to_string(), SOL_DECIMALS);
        Self {
            rpc,
            jupiter,
            base_mint: base_mint.to_string(),
            priority_fee_lamports,
            decimals: Mutex::new(decimals),
            pending: Mutex::new(HashMap::new()),
            bundles: None,
        }
    }

    /// Submit swaps through the Jito block engine. A refused bundle fails the
    /// send; it is never retried over plain RPC.
    pub fn with_bundles(mut self, jito: JitoBundleClient) -> Self {
        self.bundles = Some(jito);
        self
    }

    async fn decimals_of(&self, mint: &str) -> Result<u8, NetworkError> {
        if let Some(d) = guard(&self.decimals).get(mint).copied() {
            return Ok(d);
        }
        let d = self.rpc.get_mint_decimals(mint).await?;
        guard(&self.decimals).insert(mint.to_string(), d);
        Ok(d)
    }

    async fn send_swap(
        &self,
        signer: &dyn TransactionSigner,
        order: &OrderRequest,
        quote: &Quote,
    ) -> Result<String, NetworkError> {
        if quote.route.is_null() {
            return Err(NetworkError::Rejected("quote carries no route".into()));
        }
        let owner = signer.address();
        let request = SwapRequest::new(&owner, quote.route.clone()).with_priority_fee(self.priority_fee_lamports);
        let response = self.jupiter.get_swap_transaction(&request).await?;
        let mut tx: VersionedTransaction = response.transaction()?;

        let signature = attach_signature(signer, &tx.message.serialize())?;
        if tx.signatures.is_empty() {
            tx.signatures.push(signature);
        } else {
            tx.signatures[0] = signature;
        }

        let sent = match &self.bundles {
            Some(jito) => self.send_as_bundle(jito, signer, &tx).await?,
            None => self.rpc.send_versioned_transaction(&tx).await?,
        };
        guard(&self.pending).insert(
            sent.clone(),
            PendingSwap {
                owner,
                mint: order.token_address.clone(),
            },
        );
        Ok(sent)
    }

    /// Send a signed swap as a bundle closed by a tip from the same wallet.
    /// Returns the swap's signature, which confirms like any other.
    async fn send_as_bundle(
        &self,
        jito: &JitoBundleClient,
        signer: &dyn TransactionSigner,
        swap: &VersionedTransaction,
    ) -> Result<String, NetworkError> {
        let signature = swap
            .signatures
            .first()
            .map(|s| s.to_string())
            .ok_or_else(|| NetworkError::Signing("swap carries no signature".into()))?;
        let payer = parse_pubkey(&signer.address())?;
        let blockhash = *swap.message.recent_blockhash();

        let encoded = encode(swap)?;
        let bundles = plan_bundles(vec![encoded], jito.txs_per_bundle(), || {
            tip_transaction(jito, signer, &payer, blockhash)
        })?;
        let ids = jito.send_bundles(bundles).await?;
        tracing::debug!(
            "Swap {} sent in bundle {} (tip {} lamports)",
            signature,
            ids.join(","),
            jito.tip_lamports()
        );
        Ok(signature)
    }

    async fn send_transfer(
        &self,
        signer: &dyn TransactionSigner,
        to: &str,
        lamports: u64,
    ) -> Result<String, NetworkError> {
        let from = parse_pubkey(&signer.address())?;
        let to = parse_pubkey(to)?;
        let blockhash = self.rpc.get_latest_blockhash().await?;

        let instruction = system_instruction::transfer(&from, &to, lamports);
        let message = Message::new_with_blockhash(&[instruction], Some(&from), &blockhash);
        let mut tx = Transaction::new_unsigned(message);
        let signature = attach_signature(signer, &tx.message_data())?;
        tx.signatures = vec![signature];

        Ok(self.rpc.send_transaction(&tx).await?)
    }

    async fn realized_price(&self, signature: &str, swap: &PendingSwap) -> Option<f64> {
        match self.rpc.get_transaction(signature).await {
            Ok(tx) => fill_price(&tx, &swap.owner, &swap.mint),
            Err(e) => {
                tracing::debug!("Could not read fill for {}: {}", signature, e);
                None
            }
        }
    }
}

#[async_trait]
impl NetworkRpc for SolanaNetwork {
    async fn get_balance(&self, address: &str) -> Result<u64, NetworkError> {
        Ok(self.rpc.get_balance(address).await?)
    }

    async fn get_quote(&self, order: &OrderRequest) -> Result<Quote, NetworkError> {
        let token_decimals = self.decimals_of(&order.token_address).await?;
        let token_scale = 10f64.powi(token_decimals as i32);

        let request = match order.side {
            Side::Buy => QuoteRequest::new(
                &self.base_mint,
                &order.token_address,
                sol_to_lamports(order.amount),
                order.slippage_bps,
            ),
            Side::Sell => QuoteRequest::new(
                &order.token_address,
                &self.base_mint,
                (order.amount * token_scale).floor() as u64,
                order.slippage_bps,
            ),
        };
        if request.amount == 0 {
            return Err(NetworkError::Rejected(format!("{} order rounds to zero", order.side)));
        }

        let response = self.jupiter.get_quote(&request).await?;
        let (sol, tokens) = match order.side {
            Side::Buy => (
                lamports_to_sol(response.input_amount()),
                response.output_amount() as f64 / token_scale,
            ),
            Side::Sell => (
                lamports_to_sol(response.output_amount()),
                response.input_amount() as f64 / token_scale,
            ),
        };
        if tokens <= 0.0 {
            return Err(NetworkError::Rejected(format!("no route for {}", order.token_address)));
        }

        tracing::debug!(
            "Quote {} {}: {:.6} SOL <-> {:.6} tokens via {:?}",
            order.side,
            order.token_address,
            sol,
            tokens,
            response.route_labels()
        );

        let route = serde_json::to_value(&response).map_err(|e| NetworkError::Rejected(e.to_string()))?;
        Ok(Quote {
            price: sol / tokens,
            in_amount: order.amount,
            out_amount: match order.side {
                Side::Buy => tokens,
                Side::Sell => sol,
            },
            price_impact: response.impact_fraction(),
            route,
        })
    }

    async fn send_transaction(
        &self,
        signer: &dyn TransactionSigner,
        request: &TransactionRequest,
    ) -> Result<String, NetworkError> {
        match request {
            TransactionRequest::Swap { order, quote } => self.send_swap(signer, order, quote).await,
            TransactionRequest::Transfer { to, lamports } => self.send_transfer(signer, to, *lamports).await,
        }
    }

    async fn confirm_transaction(&self, signature: &str) -> Result<Option<Confirmation>, NetworkError> {
        match self.rpc.get_signature_status(signature).await? {
            None => Ok(None),
            Some(Err(e)) => {
                guard(&self.pending).remove(signature);
                Err(match classify(&e.to_string()) {
                    NetworkError::Unreachable(msg) => NetworkError::Rejected(msg),
                    other => other,
                })
            }
            Some(Ok(())) => {
                let swap = guard(&self.pending).remove(signature);
                let realized_price = match swap {
                    Some(swap) => self.realized_price(signature, &swap).await,
                    None => None,
                };
                Ok(Some(Confirmation {
                    slot: None,
                    realized_price,
                }))
            }
        }
    }

    fn forget(&self, signature: &str) {
        if guard(&self.pending).remove(signature).is_some() {
            tracing::debug!("Stopped tracking swap {}", signature);
        }
    }
}

fn encode<T: serde::Serialize>(tx: &T) -> Result<String, JitoError> {
    let bytes = bincode::serialize(tx).map_err(|e| JitoError::Serialization(e.to_string()))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// Signed tip transfer reusing the swap's blockhash so both expire together
fn tip_transaction(
    jito: &JitoBundleClient,
    signer: &dyn TransactionSigner,
    payer: &Pubkey,
    blockhash: Hash,
) -> Result<String, JitoError> {
    let instruction = jito.tip_instruction(payer)?;
    let message = Message::new_with_blockhash(&[instruction], Some(payer), &blockhash);
    let mut tx = Transaction::new_unsigned(message);
    let signature =
        attach_signature(signer, &tx.message_data()).map_err(|e| JitoError::InvalidTransaction(e.to_string()))?;
    tx.signatures = vec![signature];
    encode(&tx)
}

fn token_total(balances: Option<&serde_json::Value>, owner: &str, mint: &str) -> f64 {
    balances
        .and_then(|b| b.as_array())
        .map(|entries| {
            entries
                .iter()
                .filter(|e| e.get("owner").and_then(|o| o.as_str()) == Some(owner))
                .filter(|e| e.get("mint").and_then(|m| m.as_str()) == Some(mint))
                .filter_map(|e| {
                    let amount = e.pointer("/uiTokenAmount/amount")?.as_str()?.parse::<f64>().ok()?;
                    let decimals = e.pointer("/uiTokenAmount/decimals")?.as_u64()?;
                    Some(amount / 10f64.powi(decimals as i32))
                })
                .sum()
        })
        .unwrap_or(0.0)
}

/// SOL per token actually paid or received by `owner`, read from the
/// balance deltas of a confirmed swap. The fee payer is account 0.
pub fn fill_price(tx: &serde_json::Value, owner: &str, mint: &str) -> Option<f64> {
    let meta = tx.get("meta")?;
    let fee = meta.get("fee")?.as_i64()?;
    let pre_sol = meta.pointer("/preBalances/0")?.as_i64()?;
    let post_sol = meta.pointer("/postBalances/0")?.as_i64()?;
    let sol_moved = (post_sol - pre_sol + fee).unsigned_abs() as f64 / LAMPORTS_PER_SOL as f64;

    let tokens_moved = (token_total(meta.get("postTokenBalances"), owner, mint)
        - token_total(meta.get("preTokenBalances"), owner, mint))
    .abs();

    if tokens_moved <= 0.0 || sol_moved <= 0.0 {
        return None;
    }
    Some(sol_moved / tokens_moved)
}
