//! Position optimizer
//!
//! Moves each strategy's capital to whichever yield source currently pays
//! more, with hysteresis: the recorded APY baseline is refreshed every run,
//! but the split is only rewritten when the best APY has improved on that
//! baseline by at least `min_improvement` percentage points and the strategy
//! holds more than dust.
//!
//! A strategy seen for the first time is seeded from its live on-chain split.

use async_trait::async_trait;
use chrono::{SubsecRound, Utc};
use eyre::Result;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::chain::ChainReader;
use crate::config::Config;
use crate::error::CompounderError;
use crate::executor::{TxOutcome, TxRequest, TxSubmitter};
use crate::indexer::{StrategyIndex, YieldFeed};
use crate::scheduler::PeriodicTask;
use crate::store::PositionStore;
use crate::types::{total_balance, Position, RunSummary, Split, Strategy, YieldSnapshot};

/// The whole split goes to the higher APY; a tie is shared evenly.
pub fn best_split(market_apy: Decimal, vault_apy: Decimal, total: u32) -> Split {
    if market_apy > vault_apy {
        Split::new(total, 0)
    } else if vault_apy > market_apy {
        Split::new(0, total)
    } else {
        Split::new(total / 2, total - total / 2)
    }
}

#[derive(Debug, Clone)]
pub struct OptimizerSettings {
    pub market: String,
    pub vault: String,
    /// Percentage points, absolute
    pub min_improvement: Decimal,
    pub dust: Decimal,
    pub split_total: u32,
}

impl OptimizerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            market: config.yield_market.clone(),
            vault: config.yield_vault.clone(),
            min_improvement: config.min_improvement_pct,
            dust: config.dust_threshold,
            split_total: config.split_total,
        }
    }
}

/// What the optimizer compares the fresh yields against.
#[derive(Debug, Clone, Copy)]
pub enum Baseline<'a> {
    /// No row yet: the split currently on chain
    Seed(Split),
    Persisted(&'a Position),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    /// Split to record once any rebalance has landed
    pub target: Split,
    pub rebalance: bool,
    pub apy: Decimal,
}

pub fn decide(
    baseline: Baseline<'_>,
    snapshot: &YieldSnapshot,
    principal: Decimal,
    settings: &OptimizerSettings,
) -> Decision {
    let best = best_split(snapshot.market_apy, snapshot.vault_apy, settings.split_total);
    let apy = snapshot.best_apy();
    let above_dust = principal > settings.dust;

    let (current, improved) = match baseline {
        Baseline::Seed(live) => (live, true),
        Baseline::Persisted(position) => (position.split, apy - position.apy >= settings.min_improvement),
    };

    let rebalance = improved && above_dust && best != current;
    Decision {
        target: if rebalance { best } else { current },
        rebalance,
        apy,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Rebalanced,
    Recorded,
    /// Rebalance wanted but not confirmed; nothing persisted
    Pending,
}

pub struct PositionOptimizer {
    index: Arc<dyn StrategyIndex>,
    chain: Arc<dyn ChainReader>,
    yields: Arc<dyn YieldFeed>,
    store: Arc<dyn PositionStore>,
    txs: Arc<dyn TxSubmitter>,
    settings: OptimizerSettings,
}

impl PositionOptimizer {
    pub fn new(
        index: Arc<dyn StrategyIndex>,
        chain: Arc<dyn ChainReader>,
        yields: Arc<dyn YieldFeed>,
        store: Arc<dyn PositionStore>,
        txs: Arc<dyn TxSubmitter>,
        settings: OptimizerSettings,
    ) -> Self {
        Self { index, chain, yields, store, txs, settings }
    }

    pub async fn optimize(&self, strategy: &Strategy, snapshot: &YieldSnapshot) -> Result<StepOutcome> {
        let address = strategy.address;
        let principal = total_balance(&self.index.balances(address).await?);
        let persisted = self.store.get(address).await?;

        let baseline = match &persisted {
            Some(position) => Baseline::Persisted(position),
            None => {
                let live = self.chain.split(address).await?;
                if live.total() != u64::from(self.settings.split_total) {
                    return Err(CompounderError::SplitScaleMismatch {
                        strategy: address,
                        found: live.total(),
                        expected: self.settings.split_total,
                    }
                    .into());
                }
                Baseline::Seed(live)
            }
        };
        let decision = decide(baseline, snapshot, principal, &self.settings);
        debug!(strategy = %address, %principal, target = %decision.target, rebalance = decision.rebalance, apy = %decision.apy, "evaluated");

        if decision.rebalance {
            let outcome = self.txs.submit(TxRequest::update_position(address, decision.target)).await?;
            if let TxOutcome::DryRun = outcome {
                // Leave the baseline alone so the rebalance is decided again
                return Ok(StepOutcome::Pending);
            }
            info!(strategy = %address, split = %decision.target, apy = %decision.apy, "position rebalanced");
        }

        let position = Position {
            strategy: address,
            split: decision.target,
            strategy_type: strategy.strategy_type.clone(),
            apy: decision.apy,
            last_updated: Utc::now().trunc_subsecs(6),
        };
        match persisted {
            Some(previous) => self.store.update(&position, previous.last_updated).await?,
            None => self.store.insert(&position).await?,
        }

        Ok(if decision.rebalance { StepOutcome::Rebalanced } else { StepOutcome::Recorded })
    }
}

#[async_trait]
impl PeriodicTask for PositionOptimizer {
    fn name(&self) -> &'static str {
        "optimize-positions"
    }

    async fn run(&self) -> Result<RunSummary> {
        let report = self.yields.fetch().await?;
        let snapshot = match report.snapshot(&self.settings.market, &self.settings.vault) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("skipping optimization cycle: {}", e);
                return Ok(RunSummary::default());
            }
        };
        info!(market = %snapshot.market_apy, vault = %snapshot.vault_apy, "yields fetched");

        let strategies = self.index.strategies().await?;
        let mut summary = RunSummary::default();
        for strategy in &strategies {
            summary.processed += 1;
            match self.optimize(strategy, &snapshot).await {
                Ok(StepOutcome::Rebalanced) => summary.actions += 1,
                Ok(StepOutcome::Recorded) => {}
                Ok(StepOutcome::Pending) => summary.skipped += 1,
                Err(e) => {
                    if let Some(CompounderError::PositionConflict(_)) = e.downcast_ref::<CompounderError>() {
                        info!(strategy = %strategy.address, "position changed underneath us, skipping");
                        summary.skipped += 1;
                    } else {
                        warn!(strategy = %strategy.address, "optimization failed: {:#}", e);
                        summary.failed += 1;
                    }
                }
            }
        }
        Ok(summary)
    }
}
