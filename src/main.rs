//! Soda Bundler - multi-wallet bundled trading engine for Solana/Jupiter
//!
//! `run` funds the wallet pool, starts the engine and then speaks JSON lines:
//! commands in on stdin, replies and state updates out on stdout.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, EnvFilter};

use soda_bundler::adapters::cli::{CliApp, Command, RunCmd, StatusCmd, ValidateCmd};
use soda_bundler::adapters::jito::{JitoBundleClient, JitoConfig};
use soda_bundler::adapters::jupiter::{JupiterClient, JupiterConfig};
use soda_bundler::adapters::solana::{KeypairSigner, KeypairVault, SolanaClient, SolanaNetwork};
use soda_bundler::adapters::{PaperConfig, PaperNetwork};
use soda_bundler::application::{Command as EngineCommand, CommandReply, EngineSettings, QuotePriceFeed, TradingEngine};
use soda_bundler::config::{load_config, Config};
use soda_bundler::domain::{lamports_to_sol, sol_to_lamports, TradingMode};
use soda_bundler::ports::{NetworkRpc, PriceFeed, SignerProvider};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (secrets go here, not in config.toml)
    dotenvy::dotenv().ok();

    let app = CliApp::parse();
    // Config errors are reported by the command itself, after logging is up
    let level = load_config(app.command.config_path()).ok().map(|c| c.logging.level);
    init_logging(app.verbose, app.debug, level.as_deref())?;

    match app.command {
        Command::Run(cmd) => run_command(cmd).await,
        Command::Status(cmd) => status_command(cmd).await,
        Command::Validate(cmd) => validate_command(cmd),
    }
}

/// Logs go to stderr; stdout carries the JSON line protocol.
/// Precedence: RUST_LOG, then --debug/--verbose, then `[logging] level`.
fn init_logging(verbose: bool, debug: bool, config_level: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("debug")
        } else if verbose {
            EnvFilter::new("info")
        } else {
            EnvFilter::try_new(config_level.unwrap_or("warn")).unwrap_or_else(|_| EnvFilter::new("warn"))
        }
    });

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}

fn jupiter_client(config: &Config) -> Result<JupiterClient> {
    JupiterClient::with_config(JupiterConfig {
        api_base_url: config.jupiter.api_url.clone(),
        api_key: config.jupiter.get_api_key(),
        timeout: Duration::from_secs(config.jupiter.timeout_secs),
        max_retries: config.executor.max_retries,
    })
    .context("Failed to create Jupiter client")
}

fn jito_client(config: &Config) -> Result<JitoBundleClient> {
    JitoBundleClient::with_config(JitoConfig {
        block_engine_url: config.jito.endpoint(),
        tip_lamports: config.jito.tip_lamports,
        txs_per_bundle: config.jito.txs_per_bundle,
        api_token: config.jito.get_api_token(),
        ..Default::default()
    })
    .context("Failed to create Jito client")
}

/// SOLANA_PRIVATE_KEY (base58) wins over the keypair file
fn load_main_signer(path: &str) -> Result<KeypairSigner> {
    if let Ok(secret) = std::env::var("SOLANA_PRIVATE_KEY") {
        return KeypairSigner::from_base58(&secret).context("SOLANA_PRIVATE_KEY is not a valid base58 keypair");
    }
    KeypairSigner::from_file(path).with_context(|| {
        format!(
            "Failed to load keypair from '{}'. Create one with: solana-keygen new --outfile {}",
            path, path
        )
    })
}

struct Backend {
    network: Arc<dyn NetworkRpc>,
    signers: Arc<dyn SignerProvider>,
    feed: Arc<dyn PriceFeed>,
}

fn paper_backend(config: &Config) -> Result<Backend> {
    tracing::warn!("PAPER TRADING MODE - no real transactions");
    let vault = KeypairVault::ephemeral();
    let network = Arc::new(PaperNetwork::new(PaperConfig {
        initial_price: config.paper.initial_price,
        volatility: config.paper.volatility,
        liquidity_sol: config.paper.liquidity_sol,
        fee_lamports: config.paper.fee_lamports,
    }));
    network.airdrop(&vault.main_address(), sol_to_lamports(config.paper.starting_balance_sol));

    Ok(Backend {
        network: network.clone(),
        signers: Arc::new(vault),
        feed: network,
    })
}

fn live_backend(config: &Config) -> Result<Backend> {
    let main = load_main_signer(&config.solana.get_keypair_path())?;
    let keystore = config.wallets.get_keystore_dir();
    if keystore.is_none() {
        tracing::warn!("No wallets.keystore_dir configured - pool keys are held in memory only");
    }
    let vault = KeypairVault::new(main, keystore).context("Failed to open keystore directory")?;

    let rpc = SolanaClient::with_commitment(config.solana.get_rpc_url(), &config.solana.commitment)
        .context("Invalid Solana client settings")?;
    let mut solana = SolanaNetwork::new(
        rpc,
        jupiter_client(config)?,
        &config.solana.base_mint,
        config.jupiter.priority_fee_lamports,
    );
    if config.jito.enabled {
        let jito = jito_client(config)?;
        tracing::info!(
            "Swaps go through Jito at {} (tip {} lamports)",
            jito.block_engine_url(),
            jito.tip_lamports()
        );
        solana = solana.with_bundles(jito);
    }
    let network: Arc<dyn NetworkRpc> = Arc::new(solana);

    Ok(Backend {
        feed: Arc::new(QuotePriceFeed::new(network.clone())),
        network,
        signers: Arc::new(vault),
    })
}

async fn run_command(cmd: RunCmd) -> Result<()> {
    tracing::info!("Starting soda-bundler...");

    let mut config = load_config(&cmd.config).context("Failed to load configuration")?;
    if let Some(token) = cmd.token.clone() {
        config.trading.token_address = Some(token);
    }

    let backend = if cmd.paper {
        paper_backend(&config)?
    } else {
        live_backend(&config)?
    };

    let engine = Arc::new(TradingEngine::new(
        backend.network,
        backend.signers,
        backend.feed,
        EngineSettings::from(&config),
    ));
    tracing::info!("Main wallet: {}", engine.main_address());

    // Subscribe before anything runs so the first snapshots are not missed
    let mut updates = engine.subscribe();
    let writer = tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(message) => match serde_json::to_string(&message) {
                    Ok(line) => println!("{}", line),
                    Err(e) => tracing::error!("Failed to encode {} update: {}", message.kind(), e),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Output lagged, {} updates dropped", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    engine.start();

    let wallets = engine
        .setup_wallets(config.wallets.count, config.wallets.sol_per_wallet)
        .await
        .context("Failed to set up the wallet pool")?;
    tracing::info!(
        "Funded {} wallets with {:.4} SOL each",
        wallets.len(),
        config.wallets.sol_per_wallet
    );

    // A configured token starts the default mode; --mode always starts
    let mode = cmd
        .mode
        .or_else(|| config.trading.token_address.as_ref().map(|_| config.trading.mode));
    if let Some(mode) = mode {
        let reply = engine
            .dispatch(EngineCommand::StartTrading {
                mode,
                token_address: config.trading.token_address.clone(),
            })
            .await;
        if !reply.ok {
            tracing::error!("Could not start trading: {}", reply.message);
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => {
                    let reply = match serde_json::from_str::<EngineCommand>(&line) {
                        Ok(command) => engine.dispatch(command).await,
                        Err(e) => CommandReply::error("parse", e.to_string()),
                    };
                    match serde_json::to_string(&reply) {
                        Ok(out) => println!("{}", out),
                        Err(e) => tracing::error!("Failed to encode reply: {}", e),
                    }
                }
                // stdin closed: keep running until Ctrl+C
                Ok(None) => {
                    tokio::signal::ctrl_c().await.ok();
                    tracing::info!("Shutdown signal received");
                    break;
                }
                Err(e) => {
                    tracing::error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    }

    let recall = engine.shutdown(cmd.recall_on_exit).await;
    if let Some(report) = recall {
        for failure in &report.failures {
            tracing::error!("Recall failed for {}: {}", failure.address, failure.error);
        }
    }

    let session = engine.session_report().await;
    tracing::info!(
        "Session: {:.4} SOL volume, {} buys / {} sells",
        session.total_volume,
        session.trade_counts.buys,
        session.trade_counts.sells
    );
    if let Some(path) = &cmd.export {
        engine
            .trade_log()
            .export_json(path)
            .await
            .with_context(|| format!("Failed to export session to {}", path.display()))?;
        tracing::info!("Session exported to {}", path.display());
    }

    writer.abort();
    tracing::info!("soda-bundler stopped");
    Ok(())
}

async fn status_command(cmd: StatusCmd) -> Result<()> {
    let config = load_config(&cmd.config)?;
    let rpc = SolanaClient::with_commitment(config.solana.get_rpc_url(), &config.solana.commitment)?;
    let main = load_main_signer(&config.solana.get_keypair_path())?;
    let address = main.pubkey().to_string();
    let balance = rpc
        .get_balance(&address)
        .await
        .context("Failed to fetch main wallet balance")?;

    println!("Main wallet:   {}", address);
    println!("Balance:       {:.6} SOL", lamports_to_sol(balance));
    println!("RPC:           {}", config.solana.get_rpc_url());
    println!("Default mode:  {}", config.trading.mode);
    println!(
        "Token:         {}",
        config.trading.token_address.as_deref().unwrap_or("(none)")
    );
    println!(
        "Pool:          {} wallets x {:.4} SOL",
        config.wallets.count, config.wallets.sol_per_wallet
    );

    let needed =
        config.wallets.count as f64 * (config.wallets.sol_per_wallet + config.wallets.recall_fee_reserve_sol);
    if lamports_to_sol(balance) < needed {
        println!("WARNING: main wallet cannot fund the pool ({:.4} SOL needed)", needed);
    }
    Ok(())
}

fn validate_command(cmd: ValidateCmd) -> Result<()> {
    let config = match load_config(&cmd.config) {
        Ok(config) => config,
        Err(e) => bail!("{} is invalid: {}", cmd.config.display(), e),
    };
    let modes = config.mode_table();
    println!("{} is valid", cmd.config.display());
    for mode in TradingMode::ALL {
        let params = modes.get(mode);
        println!(
            "  {:<15} wallets={} amount={:.3}-{:.3} SOL stop={:.1}%",
            mode.as_str(),
            params.max_wallets,
            params.min_amount,
            params.max_amount,
            params.stop_loss_threshold * 100.0
        );
    }
    Ok(())
}
