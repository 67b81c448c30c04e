//! Diagnostic tool - check configuration and inspect a strategy
//!
//! Run with: cargo run --bin diagnose
//! Or:       cargo run --bin diagnose -- 0xStrategyAddress

use alloy_primitives::Address;
use clap::Parser;
use color_eyre::eyre::Result;
use console::style;
use std::path::PathBuf;

use compounder::chain::{ChainReader, RpcChain};
use compounder::config::{Config, ExecutionMode};
use compounder::store::{PositionStore, SqlitePositionStore};
use compounder::tokens;

#[derive(Debug, Parser)]
#[command(name = "diagnose", about = "Configuration readiness and strategy inspection")]
struct Args {
    /// Strategy to inspect
    strategy: Option<Address>,

    /// Write the effective configuration (without secrets) as TOML
    #[arg(long, value_name = "FILE")]
    write_config: Option<PathBuf>,
}

fn section(title: &str) {
    println!("\n{}", style("═══════════════════════════════════════════════════").cyan());
    println!("{}", style(format!("  {}", title)).cyan().bold());
    println!("{}\n", style("═══════════════════════════════════════════════════").cyan());
}

fn check(name: &str, ok: bool) {
    let mark = if ok { style("✅ Set").green() } else { style("❌ Not set").red() };
    println!("  {:<22} {}", name, mark);
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    println!("🔍 COMPOUNDER DIAGNOSTIC CHECK");
    let config = Config::from_env()?;

    section("READINESS");
    check("RPC_URL", !config.rpc_url.is_empty());
    check("DATABASE_URL", !config.database_url.is_empty());
    check("INDEXER_API_URL", !config.indexer_api_url.is_empty());
    check("YIELD_API_URL", !config.yield_api_url.is_empty());
    check("FEE_RECIPIENT", config.fee_recipient.is_some());
    check("SIGNER_PRIVATE_KEY", config.signer_private_key.is_some());

    match config.validate() {
        Ok(()) => println!("\n  {}", style("Configuration is valid").green()),
        Err(e) => println!("\n  {} {}", style("Configuration is invalid:").red().bold(), e),
    }

    if let Some(path) = &args.write_config {
        config.save_to_file(path)?;
        println!("  Configuration written to {}", path.display());
    }

    match config.execution_mode {
        ExecutionMode::DryRun => {
            println!("\n  🔬 DRY RUN MODE");
            println!("     → Rewards are valued, orders built and validated");
            println!("     → Transactions and orders are only logged");
        }
        ExecutionMode::Production => {
            println!("\n  🚀 PRODUCTION MODE");
            println!("     → Claims, rebalances and deposits WILL be sent");
            println!("     → Orders WILL be submitted to the venue");
        }
    }
    if config.emergency_stop {
        println!("     {}", style("🛑 EMERGENCY_STOP is active: all writes refused").red().bold());
    }

    let Some(strategy) = args.strategy else {
        println!("\n✅ Diagnostic complete!\n");
        return Ok(());
    };

    section(&format!("STRATEGY {}", strategy));
    let chain = RpcChain::connect(&config.rpc_url, config.rpc_retry())?;

    match chain.allowed_slippage_bps(strategy).await {
        Ok(bps) => println!("  Slippage:      {} bps", bps),
        Err(e) => println!("  Slippage:      {} {}", style("unreadable:").yellow(), e),
    }
    match chain.compound_fee_bps(strategy).await {
        Ok(bps) => println!("  Compound fee:  {} bps", bps),
        Err(e) => println!("  Compound fee:  {} {}", style("unreadable:").yellow(), e),
    }
    match chain.split(strategy).await {
        Ok(split) => println!("  Split:         {} (market/vault)", split),
        Err(e) => println!("  Split:         {} {}", style("unreadable:").yellow(), e),
    }

    match chain.user_rewards(strategy).await {
        Ok(rewards) if rewards.is_empty() => println!("  Rewards:       none"),
        Ok(rewards) => {
            println!("  Rewards:");
            for reward in rewards {
                println!(
                    "    • {:<8} {} (market {})",
                    tokens::label(&reward.reward_token),
                    reward.claimable(),
                    reward.market
                );
            }
        }
        Err(e) => println!("  Rewards:       {} {}", style("unreadable:").yellow(), e),
    }

    if config.database_url.is_empty() {
        println!("\n  Position:      DATABASE_URL not set");
    } else {
        let store = SqlitePositionStore::connect(&config.database_url).await?;
        match store.get(strategy).await? {
            Some(p) => println!(
                "\n  Position:      {} at {}% (updated {})",
                p.split, p.apy, p.last_updated
            ),
            None => println!("\n  Position:      not yet seeded"),
        }
    }

    println!("\n✅ Diagnostic complete!\n");
    Ok(())
}
