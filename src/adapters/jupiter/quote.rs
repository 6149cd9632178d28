//! Jupiter Quote Types
//!
//! Request and response structures for the quote endpoint.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Request parameters for getting a swap quote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub input_mint: String,
    pub output_mint: String,
    /// Amount in base units of the input mint
    pub amount: u64,
    /// Slippage tolerance in basis points (1 = 0.01%)
    pub slippage_bps: u16,
}

impl QuoteRequest {
    pub fn new(input_mint: &str, output_mint: &str, amount: u64, slippage_bps: u16) -> Self {
        Self {
            input_mint: input_mint.to_string(),
            output_mint: output_mint.to_string(),
            amount,
            slippage_bps,
        }
    }

    pub fn query(&self) -> [(&'static str, String); 4] {
        [
            ("inputMint", self.input_mint.clone()),
            ("outputMint", self.output_mint.clone()),
            ("amount", self.amount.to_string()),
            ("slippageBps", self.slippage_bps.to_string()),
        ]
    }
}

/// Response from the quote endpoint. Passed back verbatim to `/swap`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResponse {
    pub input_mint: String,
    pub output_mint: String,
    /// Input amount in base units
    pub in_amount: String,
    /// Output amount in base units
    pub out_amount: String,
    /// Minimum output amount after slippage
    pub other_amount_threshold: String,
    pub slippage_bps: u16,
    /// Price impact in percent, as a decimal string
    #[serde(default)]
    pub price_impact_pct: String,
    /// Remaining fields (route plan, context slot, ...) kept for the swap call
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl QuoteResponse {
    pub fn input_amount(&self) -> u64 {
        self.in_amount.parse().unwrap_or(0)
    }

    pub fn output_amount(&self) -> u64 {
        self.out_amount.parse().unwrap_or(0)
    }

    /// Price impact as a fraction
    pub fn impact_fraction(&self) -> f64 {
        self.price_impact_pct.parse::<f64>().map(|pct| pct.abs() / 100.0).unwrap_or(0.0)
    }

    /// DEX labels along the route, for logs
    pub fn route_labels(&self) -> Vec<String> {
        self.extra
            .get("routePlan")
            .and_then(|plan| plan.as_array())
            .map(|steps| {
                steps
                    .iter()
                    .filter_map(|s| s.pointer("/swapInfo/label").and_then(|l| l.as_str()))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}
