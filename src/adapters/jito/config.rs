//! Jito Configuration

use std::time::Duration;

/// Jito Block Engine endpoints
pub mod endpoints {
    pub const MAINNET_AMSTERDAM: &str = "https://amsterdam.mainnet.block-engine.jito.wtf";
    pub const MAINNET_FRANKFURT: &str = "https://frankfurt.mainnet.block-engine.jito.wtf";
    pub const MAINNET_NY: &str = "https://ny.mainnet.block-engine.jito.wtf";
    pub const MAINNET_TOKYO: &str = "https://tokyo.mainnet.block-engine.jito.wtf";
    pub const MAINNET_DEFAULT: &str = MAINNET_NY;

    /// Endpoint for a region name; unknown names fall back to New York
    pub fn for_region(region: &str) -> &'static str {
        match region.to_lowercase().as_str() {
            "amsterdam" | "ams" => MAINNET_AMSTERDAM,
            "frankfurt" | "fra" => MAINNET_FRANKFURT,
            "tokyo" | "tyo" => MAINNET_TOKYO,
            _ => MAINNET_NY,
        }
    }
}

/// Validator tip accounts; the block engine accepts a tip to any of them
pub mod tip_accounts {
    pub const TIP_ACCOUNTS: &[&str] = &[
        "96gYZGLnJYVFmbjzopPSU6QiEV5fGqZNyN9nmNhvrZU5",
        "HFqU5x63VTqvQss8hp11i4bVmkdzGZBJLYQ6QwBvp8dx",
        "Cw8CFyM9FkoMi7K7Crf6HNQqf4uEMzpKw6QNghXLvLkY",
        "ADaUMid9yfUytqMBgopwjb2DTLSokTSzL1zt6iGPaS49",
        "DfXygSm4jCyNCybVYYK6DwvWqjKee8pbDmJGcLWNDXjh",
        "ADuUkR4vqLUMWXxW9gh6D6L8pMSawimctcNZ5pGwDcEt",
        "DttWaMuVvTiduZRnguLF7jNxTgiMBZ1hyAumKUiL2KRL",
        "3AVi9Tg9Uo68tJfuvoKvqKNWKkC5wPdSSdeBnizKZ6jT",
    ];

    pub fn random_tip_account() -> &'static str {
        use rand::Rng;
        let idx = rand::thread_rng().gen_range(0..TIP_ACCOUNTS.len());
        TIP_ACCOUNTS[idx]
    }
}

/// Block engine connection and bundle shape
#[derive(Debug, Clone)]
pub struct JitoConfig {
    pub block_engine_url: String,
    pub timeout: Duration,
    /// Attempts per bundle, counting the first
    pub max_retries: u32,
    /// Base backoff, doubled after each failed attempt
    pub retry_delay_ms: u64,
    /// Tip paid with every bundle
    pub tip_lamports: u64,
    /// Signed transactions per bundle, not counting the tip
    pub txs_per_bundle: usize,
    pub api_token: Option<String>,
}

impl Default for JitoConfig {
    fn default() -> Self {
        Self {
            block_engine_url: endpoints::MAINNET_DEFAULT.to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay_ms: 500,
            tip_lamports: 10_000,
            txs_per_bundle: 3,
            api_token: None,
        }
    }
}

impl JitoConfig {
    pub fn mainnet(region: &str) -> Self {
        Self {
            block_engine_url: endpoints::for_region(region).to_string(),
            ..Default::default()
        }
    }

    pub fn with_tip(mut self, lamports: u64) -> Self {
        self.tip_lamports = lamports;
        self
    }

    pub fn with_api_token(mut self, token: String) -> Self {
        self.api_token = Some(token);
        self
    }
}
