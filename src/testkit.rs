//! In-memory stand-ins for the chain, venue, indexer, yield feed, store and
//! transaction queue, used by the unit tests.

use alloy_primitives::{Address, Bytes, FixedBytes, B256, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::{eyre, Result};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::chain::{ChainReader, PriceObservation};
use crate::error::{ChainError, CompounderError};
use crate::executor::{TxOutcome, TxRequest, TxSubmitter};
use crate::indexer::{MarketYield, StrategyIndex, VaultYield, YieldFeed, YieldReport};
use crate::order::codec::ERC1271_MAGIC_VALUE;
use crate::order::venue::{OrderBook, OrderSubmission, Quote, QuoteRequest};
use crate::store::PositionStore;
use crate::types::{BalanceEntry, Position, Reward, Split, Strategy};

// ============================================
// CHAIN
// ============================================

#[derive(Default)]
struct ChainState {
    rewards: HashMap<Address, Vec<Reward>>,
    balances: HashMap<(Address, Address), U256>,
    decimals: HashMap<Address, u8>,
    prices: HashMap<Address, Result<PriceObservation, ChainError>>,
    slippage: HashMap<Address, u32>,
    fees: HashMap<Address, u32>,
    splits: HashMap<Address, Split>,
    signature: Option<Result<FixedBytes<4>, ChainError>>,
    expected_out: Option<Result<U256, ChainError>>,
}

/// Chain whose every read is scripted. Unscripted reads revert.
#[derive(Default)]
pub struct FakeChain {
    state: Mutex<ChainState>,
}

impl FakeChain {
    pub fn set_rewards(&self, strategy: Address, rewards: Vec<Reward>) {
        self.state.lock().unwrap().rewards.insert(strategy, rewards);
    }

    pub fn set_balance(&self, token: Address, owner: Address, amount: U256) {
        self.state.lock().unwrap().balances.insert((token, owner), amount);
    }

    pub fn set_decimals(&self, token: Address, decimals: u8) {
        self.state.lock().unwrap().decimals.insert(token, decimals);
    }

    pub fn set_price(&self, feed: Address, observation: PriceObservation) {
        self.state.lock().unwrap().prices.insert(feed, Ok(observation));
    }

    pub fn fail_price(&self, feed: Address) {
        self.state
            .lock()
            .unwrap()
            .prices
            .insert(feed, Err(ChainError::Transport("feed unreachable".into())));
    }

    pub fn set_slippage(&self, strategy: Address, bps: u32) {
        self.state.lock().unwrap().slippage.insert(strategy, bps);
    }

    pub fn set_fee(&self, strategy: Address, bps: u32) {
        self.state.lock().unwrap().fees.insert(strategy, bps);
    }

    pub fn set_split(&self, strategy: Address, split: Split) {
        self.state.lock().unwrap().splits.insert(strategy, split);
    }

    pub fn set_signature_result(&self, result: Result<FixedBytes<4>, ChainError>) {
        self.state.lock().unwrap().signature = Some(result);
    }

    pub fn set_expected_out(&self, result: Result<U256, ChainError>) {
        self.state.lock().unwrap().expected_out = Some(result);
    }
}

fn unscripted<T>(what: &str) -> Result<T, ChainError> {
    Err(ChainError::Revert(format!("{} not scripted", what)))
}

#[async_trait]
impl ChainReader for FakeChain {
    async fn user_rewards(&self, strategy: Address) -> Result<Vec<Reward>, ChainError> {
        Ok(self.state.lock().unwrap().rewards.get(&strategy).cloned().unwrap_or_default())
    }

    async fn token_balance(&self, token: Address, owner: Address) -> Result<U256, ChainError> {
        Ok(self.state.lock().unwrap().balances.get(&(token, owner)).copied().unwrap_or_default())
    }

    async fn token_decimals(&self, token: Address) -> Result<u8, ChainError> {
        match self.state.lock().unwrap().decimals.get(&token) {
            Some(d) => Ok(*d),
            None => unscripted("decimals"),
        }
    }

    async fn latest_price(&self, feed: Address) -> Result<PriceObservation, ChainError> {
        match self.state.lock().unwrap().prices.get(&feed) {
            Some(result) => result.clone(),
            None => Err(ChainError::Transport("no such feed".into())),
        }
    }

    async fn allowed_slippage_bps(&self, strategy: Address) -> Result<u32, ChainError> {
        match self.state.lock().unwrap().slippage.get(&strategy) {
            Some(bps) => Ok(*bps),
            None => unscripted("allowedSlippageInBps"),
        }
    }

    async fn compound_fee_bps(&self, strategy: Address) -> Result<u32, ChainError> {
        match self.state.lock().unwrap().fees.get(&strategy) {
            Some(bps) => Ok(*bps),
            None => unscripted("compoundFee"),
        }
    }

    async fn split(&self, strategy: Address) -> Result<Split, ChainError> {
        match self.state.lock().unwrap().splits.get(&strategy) {
            Some(split) => Ok(*split),
            None => unscripted("split"),
        }
    }

    async fn is_valid_signature(
        &self,
        _strategy: Address,
        _digest: B256,
        _signature: Bytes,
    ) -> Result<FixedBytes<4>, ChainError> {
        self.state
            .lock()
            .unwrap()
            .signature
            .clone()
            .unwrap_or(Ok(ERC1271_MAGIC_VALUE))
    }

    async fn expected_out(
        &self,
        _strategy: Address,
        _amount_in: U256,
        _token_in: Address,
        _token_out: Address,
    ) -> Result<U256, ChainError> {
        self.state
            .lock()
            .unwrap()
            .expected_out
            .clone()
            .unwrap_or_else(|| unscripted("getExpectedOut"))
    }
}

// ============================================
// TRANSACTIONS
// ============================================

/// Records every request and confirms it, unless its label is set to fail.
#[derive(Default)]
pub struct FakeTxs {
    sent: Mutex<Vec<TxRequest>>,
    failing_labels: Mutex<Vec<String>>,
    dry_run: bool,
}

impl FakeTxs {
    pub fn dry_run() -> Self {
        Self { dry_run: true, ..Self::default() }
    }

    pub fn fail_on(&self, label_prefix: &str) {
        self.failing_labels.lock().unwrap().push(label_prefix.to_string());
    }

    pub fn sent(&self) -> Vec<TxRequest> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl TxSubmitter for FakeTxs {
    async fn submit(&self, request: TxRequest) -> Result<TxOutcome> {
        let failing = self
            .failing_labels
            .lock()
            .unwrap()
            .iter()
            .any(|prefix| request.label.starts_with(prefix.as_str()));
        let label = request.label.clone();
        let count = {
            let mut sent = self.sent.lock().unwrap();
            sent.push(request);
            sent.len()
        };

        if failing {
            return Err(CompounderError::TransactionReverted {
                hash: format!("0x{:064x}", count),
                label,
            }
            .into());
        }
        if self.dry_run {
            return Ok(TxOutcome::DryRun);
        }
        Ok(TxOutcome::Confirmed {
            hash: B256::with_last_byte(count as u8),
            block: Some(count as u64),
        })
    }
}

// ============================================
// VENUE
// ============================================

#[derive(Default)]
pub struct FakeVenue {
    quote: Mutex<Option<Quote>>,
    quotes: Mutex<usize>,
    submissions: Mutex<Vec<OrderSubmission>>,
    reject_submissions: Mutex<bool>,
}

impl FakeVenue {
    pub fn set_quote(&self, quote: Quote) {
        *self.quote.lock().unwrap() = Some(quote);
    }

    pub fn reject_submissions(&self) {
        *self.reject_submissions.lock().unwrap() = true;
    }

    pub fn quote_count(&self) -> usize {
        *self.quotes.lock().unwrap()
    }

    pub fn submissions(&self) -> Vec<OrderSubmission> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderBook for FakeVenue {
    async fn quote(&self, _request: &QuoteRequest) -> Result<Quote> {
        *self.quotes.lock().unwrap() += 1;
        self.quote
            .lock()
            .unwrap()
            .ok_or_else(|| eyre!("NoLiquidity: no route found"))
    }

    async fn submit(&self, submission: &OrderSubmission) -> Result<String> {
        if *self.reject_submissions.lock().unwrap() {
            return Err(eyre!("venue rejected /api/v1/orders (400): InsufficientFee"));
        }
        let mut submissions = self.submissions.lock().unwrap();
        submissions.push(submission.clone());
        Ok(format!("0xuid{:04}", submissions.len()))
    }
}

// ============================================
// INDEXER & YIELDS
// ============================================

#[derive(Default)]
pub struct FakeIndex {
    strategies: Mutex<Vec<Strategy>>,
    idle: Mutex<Vec<Strategy>>,
    balances: Mutex<HashMap<Address, Vec<BalanceEntry>>>,
}

pub fn strategy(address: Address) -> Strategy {
    Strategy {
        address,
        user: Address::repeat_byte(0xee),
        implementation: Address::repeat_byte(0xdd),
        strategy_type: Some("USDC".to_string()),
    }
}

impl FakeIndex {
    pub fn add_strategy(&self, address: Address) {
        self.strategies.lock().unwrap().push(strategy(address));
    }

    pub fn add_idle(&self, address: Address) {
        self.idle.lock().unwrap().push(strategy(address));
    }

    /// One USDC balance entry per amount
    pub fn set_balances(&self, address: Address, amounts: &[Decimal]) {
        let entries = amounts
            .iter()
            .map(|balance| BalanceEntry {
                symbol: Some("USDC".to_string()),
                token: Some(crate::tokens::USDC),
                balance: *balance,
            })
            .collect();
        self.balances.lock().unwrap().insert(address, entries);
    }
}

#[async_trait]
impl StrategyIndex for FakeIndex {
    async fn strategies(&self) -> Result<Vec<Strategy>> {
        Ok(self.strategies.lock().unwrap().clone())
    }

    async fn idle_strategies(&self) -> Result<Vec<Strategy>> {
        Ok(self.idle.lock().unwrap().clone())
    }

    async fn balances(&self, strategy: Address) -> Result<Vec<BalanceEntry>> {
        self.balances
            .lock()
            .unwrap()
            .get(&strategy)
            .cloned()
            .ok_or_else(|| eyre!("balances for {} unavailable", strategy))
    }
}

#[derive(Default)]
pub struct FakeYields {
    report: Mutex<YieldReport>,
}

impl FakeYields {
    pub fn with(market: &str, market_apy: Decimal, vault: &str, vault_apy: Decimal) -> Self {
        let yields = Self::default();
        yields.set(market, market_apy, vault, vault_apy);
        yields
    }

    pub fn set(&self, market: &str, market_apy: Decimal, vault: &str, vault_apy: Decimal) {
        let mut report = self.report.lock().unwrap();
        report.markets.clear();
        report.vaults.clear();
        report.markets.insert(market.to_string(), MarketYield { supply_apy: market_apy });
        report.vaults.insert(vault.to_string(), VaultYield { apy: vault_apy });
    }
}

#[async_trait]
impl YieldFeed for FakeYields {
    async fn fetch(&self) -> Result<YieldReport> {
        Ok(self.report.lock().unwrap().clone())
    }
}

// ============================================
// STORE
// ============================================

/// Position store with the same compare-and-swap rules as the SQLite one.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<Address, Position>>,
    unavailable: Mutex<bool>,
}

impl MemoryStore {
    pub fn row(&self, strategy: Address) -> Option<Position> {
        self.rows.lock().unwrap().get(&strategy).cloned()
    }

    pub fn put(&self, position: Position) {
        self.rows.lock().unwrap().insert(position.strategy, position);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap() = unavailable;
    }

    fn check(&self) -> Result<()> {
        if *self.unavailable.lock().unwrap() {
            return Err(eyre!("database is locked"));
        }
        Ok(())
    }
}

#[async_trait]
impl PositionStore for MemoryStore {
    async fn get(&self, strategy: Address) -> Result<Option<Position>> {
        self.check()?;
        Ok(self.row(strategy))
    }

    async fn insert(&self, position: &Position) -> Result<()> {
        self.check()?;
        let mut rows = self.rows.lock().unwrap();
        if rows.contains_key(&position.strategy) {
            return Err(CompounderError::PositionConflict(position.strategy).into());
        }
        rows.insert(position.strategy, position.clone());
        Ok(())
    }

    async fn update(&self, position: &Position, expected_last_updated: DateTime<Utc>) -> Result<()> {
        self.check()?;
        let mut rows = self.rows.lock().unwrap();
        match rows.get(&position.strategy) {
            Some(current) if current.last_updated == expected_last_updated => {
                rows.insert(position.strategy, position.clone());
                Ok(())
            }
            _ => Err(CompounderError::PositionConflict(position.strategy).into()),
        }
    }
}
