//! Compounder - reward harvesting and yield rebalancing keeper
//!
//! Run with: cargo run
//!
//! Run one task and exit: cargo run -- --once optimize-positions

use clap::Parser;
use color_eyre::eyre::{eyre, Result};
use console::style;
use futures::FutureExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use compounder::chain::{ChainReader, RpcChain};
use compounder::compounder::{IdleDepositor, RewardCompounder};
use compounder::config::{Config, ExecutionMode};
use compounder::executor::{KeeperWallet, TxQueue, TxQueueSettings, TxSubmitter};
use compounder::indexer::IndexerClient;
use compounder::optimizer::{OptimizerSettings, PositionOptimizer};
use compounder::oracle::PriceOracle;
use compounder::order::{CowClient, OrderCodec, SwapPipeline, SwapSettings};
use compounder::scheduler::{Scheduler, StatusBoard};
use compounder::server::{self, AppState};
use compounder::store::SqlitePositionStore;
use compounder::tokens;

#[derive(Debug, Parser)]
#[command(name = "compounder", version, about = "Reward compounding and yield rebalancing keeper")]
struct Cli {
    /// Run a single task to completion and exit
    #[arg(long, value_name = "TASK")]
    once: Option<String>,

    /// Force dry-run mode regardless of EXECUTION_MODE
    #[arg(long)]
    dry_run: bool,

    /// Override STATUS_PORT
    #[arg(long)]
    status_port: Option<u16>,

    /// Load configuration from a TOML file instead of the environment
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn print_banner(mode: ExecutionMode) {
    println!();
    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").cyan()
    );
    println!(
        "{}",
        style(" ♻  COMPOUNDER - Rewards, Swaps & Yield Rebalancing").cyan().bold()
    );
    println!(
        "{}",
        style("    Claim | Sell via CoW | Rebalance | Deposit Idle").cyan()
    );
    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").cyan()
    );
    if mode == ExecutionMode::Production {
        println!("{}", style(" ⚠  PRODUCTION: transactions and orders are live").red().bold());
    }
    println!();
}

fn init_logging() -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("compounder=info".parse()?);
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    if cli.dry_run {
        config.execution_mode = ExecutionMode::DryRun;
    }
    if let Some(port) = cli.status_port {
        config.status_port = port;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_logging()?;
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    print_banner(config.execution_mode);

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        error!("Please check your .env file");
        return Err(e);
    }
    config.print_summary();
    println!();
    for token in config.unpriced_reward_tokens() {
        warn!(token = %tokens::label(&token), "no price feed configured, rewards in this token will not be claimed (set PRICE_FEEDS)");
    }

    // =============================================
    // CHAIN & PRICING
    // =============================================
    let rpc = Arc::new(RpcChain::connect(&config.rpc_url, config.rpc_retry())?);
    let chain: Arc<dyn ChainReader> = rpc.clone();
    let oracle = Arc::new(PriceOracle::new(
        chain.clone(),
        &config.price_feeds,
        config.price_max_age_secs,
    ));

    // =============================================
    // SWAPS
    // =============================================
    let fee_recipient = config
        .fee_recipient
        .ok_or_else(|| eyre!("FEE_RECIPIENT is not set"))?;
    let codec = OrderCodec::new(
        chain.clone(),
        config.chain_id,
        config.settlement_contract,
        config.default_slippage_bps,
    );
    let venue = Arc::new(CowClient::new(
        &config.cow_api_url,
        Duration::from_secs(config.http_timeout_secs),
    )?);
    let pipeline = Arc::new(SwapPipeline::new(
        chain.clone(),
        codec,
        venue,
        SwapSettings::from_config(&config, fee_recipient),
    ));

    // =============================================
    // TRANSACTIONS
    // =============================================
    let wallet = config
        .signer_private_key
        .as_deref()
        .map(|key| KeeperWallet::from_key(key, config.chain_id))
        .transpose()?;
    if let Some(wallet) = &wallet {
        info!(keeper = %wallet.address(), "keeper wallet loaded");
    }
    let queue = TxQueue::new(
        rpc.provider(),
        wallet,
        TxQueueSettings {
            execution_mode: config.execution_mode,
            emergency_stop: config.emergency_stop,
            rpc_timeout: Duration::from_secs(config.rpc_timeout_secs),
            receipt_timeout: Duration::from_secs(config.receipt_timeout_secs),
        },
    )?;
    let (handle, _worker) = queue.spawn();
    let txs: Arc<dyn TxSubmitter> = Arc::new(handle);

    // =============================================
    // OFF-CHAIN SERVICES
    // =============================================
    let store = Arc::new(SqlitePositionStore::connect(&config.database_url).await?);
    let indexer = Arc::new(IndexerClient::new(
        &config.indexer_api_url,
        &config.yield_api_url,
        config.http_retry(),
    )?);

    // =============================================
    // TASKS
    // =============================================
    let board = StatusBoard::default();
    let mut scheduler = Scheduler::new(board.clone());
    scheduler
        .register(
            Arc::new(RewardCompounder::new(
                indexer.clone(),
                chain.clone(),
                oracle,
                txs.clone(),
                pipeline,
                config.min_claim_usd,
                config.min_swap_usd,
            )),
            Duration::from_secs(config.compound_interval_secs),
        )
        .await;
    scheduler
        .register(
            Arc::new(PositionOptimizer::new(
                indexer.clone(),
                chain.clone(),
                indexer.clone(),
                store,
                txs.clone(),
                OptimizerSettings::from_config(&config),
            )),
            Duration::from_secs(config.optimize_interval_secs),
        )
        .await;
    scheduler
        .register(
            Arc::new(IdleDepositor::new(indexer, txs, config.idle_min_usd)),
            Duration::from_secs(config.idle_interval_secs),
        )
        .await;

    if let Some(task) = &cli.once {
        let summary = scheduler.run_once(task).await?;
        println!("{} {}: {}", style("✓").green().bold(), task, summary);
        return Ok(());
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
        info!("shutdown requested");
    }
    .boxed()
    .shared();

    let state = AppState::new(board, config.execution_mode);
    let status_server = tokio::spawn(server::serve(config.status_port, state, shutdown.clone()));

    scheduler.run(shutdown).await;

    match status_server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("{:#}", e),
        Err(e) => error!("status server task failed: {}", e),
    }
    println!("{}", style("Compounder stopped.").cyan());
    Ok(())
}
