//! Jupiter Adapter
//!
//! Quote fetching and swap transaction building against the Jupiter
//! aggregator API.

mod client;
mod quote;
mod swap;

pub use client::{JupiterClient, JupiterConfig, JupiterError};
pub use quote::{QuoteRequest, QuoteResponse};
pub use swap::{SwapRequest, SwapResponse};
