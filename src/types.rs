//! Core domain types shared across the engine.

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A managed strategy account as reported by the indexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Strategy {
    pub address: Address,
    pub user: Address,
    pub implementation: Address,
    #[serde(default)]
    pub strategy_type: Option<String>,
}

/// One entry of a strategy's reward view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reward {
    pub market: Address,
    pub reward_token: Address,
    pub supply_rewards_amount: U256,
    pub borrow_rewards_amount: U256,
}

impl Reward {
    /// Total amount claimable for this market.
    pub fn claimable(&self) -> U256 {
        self.supply_rewards_amount
            .saturating_add(self.borrow_rewards_amount)
    }
}

/// Capital split between the lending market and the vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    pub mtoken: u32,
    pub vault: u32,
}

impl Split {
    pub const fn new(mtoken: u32, vault: u32) -> Self {
        Self { mtoken, vault }
    }

    pub fn total(&self) -> u64 {
        u64::from(self.mtoken) + u64::from(self.vault)
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.mtoken, self.vault)
    }
}

/// Persisted optimizer state for one strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub strategy: Address,
    pub split: Split,
    pub strategy_type: Option<String>,
    /// Best APY observed at the last evaluation, in percent.
    pub apy: Decimal,
    pub last_updated: DateTime<Utc>,
}

/// A token balance reported by the indexer, in human units.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BalanceEntry {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub token: Option<Address>,
    pub balance: Decimal,
}

/// Sum of balance entries, exact.
pub fn total_balance(entries: &[BalanceEntry]) -> Decimal {
    entries.iter().map(|e| e.balance).sum()
}

/// APYs of the two yield sources, in percent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YieldSnapshot {
    pub market_apy: Decimal,
    pub vault_apy: Decimal,
}

impl YieldSnapshot {
    pub fn best_apy(&self) -> Decimal {
        self.market_apy.max(self.vault_apy)
    }
}

/// Counters a periodic task reports after each run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub processed: usize,
    pub actions: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed={} actions={} skipped={} failed={}",
            self.processed, self.actions, self.skipped, self.failed
        )
    }
}
