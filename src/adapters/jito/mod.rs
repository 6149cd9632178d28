//! Jito Bundle Adapter
//!
//! MEV-protected swap submission through the Jito Block Engine. Signed
//! transactions are grouped into bundles that each end with a validator tip.

mod client;
mod config;
mod error;
mod types;

pub use client::{plan_bundles, JitoBundleClient};
pub use config::{endpoints, tip_accounts, JitoConfig};
pub use error::JitoError;
pub use types::BundleRequest;
