//! Reward and idle-fund compounding
//!
//! `RewardCompounder` walks every strategy: values its claimable rewards,
//! claims once when any token clears the claim threshold, re-reads the real
//! balances and sells each one worth swapping for the base asset.
//!
//! `IdleDepositor` pushes idle balances back into the yield sources.
//!
//! Failures are contained to the reward or strategy they happen in; the rest
//! of the batch always runs.

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use eyre::Result;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::chain::ChainReader;
use crate::executor::{TxRequest, TxSubmitter};
use crate::indexer::StrategyIndex;
use crate::oracle::{meets_threshold, PriceOracle};
use crate::order::{SwapOutcome, SwapPipeline};
use crate::scheduler::PeriodicTask;
use crate::tokens;
use crate::types::{total_balance, Reward, RunSummary, Strategy};

// ============================================
// REWARDS
// ============================================

pub struct RewardCompounder {
    index: Arc<dyn StrategyIndex>,
    chain: Arc<dyn ChainReader>,
    oracle: Arc<PriceOracle>,
    txs: Arc<dyn TxSubmitter>,
    pipeline: Arc<SwapPipeline>,
    min_claim_usd: Decimal,
    min_swap_usd: Decimal,
}

/// What one strategy's pass produced
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StrategyReport {
    pub claimed: bool,
    pub orders: usize,
    pub skipped: usize,
}

/// Claimable amount per reward token, in first-seen order.
pub fn claimable_by_token(rewards: &[Reward]) -> Vec<(Address, U256)> {
    let mut totals: Vec<(Address, U256)> = Vec::new();
    for reward in rewards {
        let amount = reward.claimable();
        match totals.iter_mut().find(|(token, _)| *token == reward.reward_token) {
            Some((_, total)) => *total = total.saturating_add(amount),
            None => totals.push((reward.reward_token, amount)),
        }
    }
    totals
}

impl RewardCompounder {
    pub fn new(
        index: Arc<dyn StrategyIndex>,
        chain: Arc<dyn ChainReader>,
        oracle: Arc<PriceOracle>,
        txs: Arc<dyn TxSubmitter>,
        pipeline: Arc<SwapPipeline>,
        min_claim_usd: Decimal,
        min_swap_usd: Decimal,
    ) -> Self {
        Self { index, chain, oracle, txs, pipeline, min_claim_usd, min_swap_usd }
    }

    /// Claim and swap for one strategy.
    pub async fn compound(&self, strategy: &Strategy) -> Result<StrategyReport> {
        let address = strategy.address;
        let mut report = StrategyReport::default();

        let rewards = self.chain.user_rewards(address).await?;
        let mut to_claim = Vec::new();
        for (token, amount) in claimable_by_token(&rewards) {
            if amount.is_zero() {
                continue;
            }
            let label = tokens::label(&token);
            if !self.oracle.has_feed(&token) {
                debug!(strategy = %address, token = %label, "no price feed, reward left unclaimed");
                report.skipped += 1;
                continue;
            }
            match self.oracle.value_usd(token, amount).await {
                Ok(usd) if meets_threshold(usd, self.min_claim_usd) => {
                    debug!(strategy = %address, token = %label, %usd, "reward worth claiming");
                    to_claim.push(token);
                }
                Ok(usd) => {
                    debug!(strategy = %address, token = %label, %usd, min = %self.min_claim_usd, "reward below claim threshold");
                    report.skipped += 1;
                }
                Err(e) => {
                    // Never claim what cannot be valued
                    info!(strategy = %address, token = %label, "skipping reward: {}", e);
                    report.skipped += 1;
                }
            }
        }

        if to_claim.is_empty() {
            return Ok(report);
        }

        let outcome = self.txs.submit(TxRequest::claim_reward(address)).await?;
        report.claimed = true;
        info!(strategy = %address, tokens = to_claim.len(), confirmed = outcome.is_confirmed(), "rewards claimed");

        for token in to_claim {
            match self.swap_balance(address, token).await {
                Ok(SwapOutcome::Submitted { .. }) | Ok(SwapOutcome::DryRun { .. }) => report.orders += 1,
                Ok(_) => report.skipped += 1,
                Err(e) => {
                    warn!(strategy = %address, token = %tokens::label(&token), "swap failed: {:#}", e);
                    report.skipped += 1;
                }
            }
        }
        Ok(report)
    }

    async fn swap_balance(&self, strategy: Address, token: Address) -> Result<SwapOutcome> {
        if token == self.pipeline.base_asset() {
            return Ok(SwapOutcome::Skipped);
        }
        let balance = self.chain.token_balance(token, strategy).await?;
        let usd = self.oracle.value_usd(token, balance).await?;
        if !meets_threshold(usd, self.min_swap_usd) {
            debug!(%strategy, token = %tokens::label(&token), %usd, "balance below swap threshold");
            return Ok(SwapOutcome::Skipped);
        }
        self.pipeline.swap(strategy, token, balance).await
    }
}

#[async_trait]
impl PeriodicTask for RewardCompounder {
    fn name(&self) -> &'static str {
        "compound-rewards"
    }

    async fn run(&self) -> Result<RunSummary> {
        let strategies = self.index.strategies().await?;
        let mut summary = RunSummary::default();

        for strategy in &strategies {
            summary.processed += 1;
            match self.compound(strategy).await {
                Ok(report) => {
                    summary.actions += usize::from(report.claimed) + report.orders;
                    summary.skipped += report.skipped;
                }
                Err(e) => {
                    warn!(strategy = %strategy.address, "compounding failed: {:#}", e);
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }
}

// ============================================
// IDLE FUNDS
// ============================================

pub struct IdleDepositor {
    index: Arc<dyn StrategyIndex>,
    txs: Arc<dyn TxSubmitter>,
    idle_min_usd: Decimal,
}

impl IdleDepositor {
    pub fn new(index: Arc<dyn StrategyIndex>, txs: Arc<dyn TxSubmitter>, idle_min_usd: Decimal) -> Self {
        Self { index, txs, idle_min_usd }
    }

    /// Returns whether a deposit was sent.
    pub async fn deposit(&self, strategy: Address) -> Result<bool> {
        let balances = self.index.balances(strategy).await?;
        let idle = total_balance(&balances);
        if !meets_threshold(idle, self.idle_min_usd) {
            debug!(%strategy, %idle, min = %self.idle_min_usd, "idle balance below threshold");
            return Ok(false);
        }
        let outcome = self.txs.submit(TxRequest::deposit_idle(strategy)).await?;
        info!(%strategy, %idle, confirmed = outcome.is_confirmed(), "idle funds deposited");
        Ok(true)
    }
}

#[async_trait]
impl PeriodicTask for IdleDepositor {
    fn name(&self) -> &'static str {
        "deposit-idle"
    }

    async fn run(&self) -> Result<RunSummary> {
        let strategies = self.index.idle_strategies().await?;
        let mut summary = RunSummary::default();

        for strategy in &strategies {
            summary.processed += 1;
            match self.deposit(strategy.address).await {
                Ok(true) => summary.actions += 1,
                Ok(false) => summary.skipped += 1,
                Err(e) => {
                    warn!(strategy = %strategy.address, "idle deposit failed: {:#}", e);
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::PriceObservation;
    use crate::config::{ExecutionMode, PriceFeedEntry, DEFAULT_SETTLEMENT};
    use crate::order::venue::Quote;
    use crate::order::{OrderCodec, SwapSettings};
    use crate::testkit::{FakeChain, FakeIndex, FakeTxs, FakeVenue};
    use alloy_primitives::address;
    use rust_decimal_macros::dec;

    const STRATEGY: Address = address!("1000000000000000000000000000000000000001");
    const OTHER: Address = address!("2000000000000000000000000000000000000002");
    const WELL_FEED: Address = address!("f000000000000000000000000000000000000001");
    const USDC_FEED: Address = address!("f000000000000000000000000000000000000002");

    /// 1 WELL = $0.01; 18 decimals
    const WELL_PER_DOLLAR: u128 = 100 * 10u128.pow(18);

    struct Harness {
        chain: Arc<FakeChain>,
        index: Arc<FakeIndex>,
        txs: Arc<FakeTxs>,
        venue: Arc<FakeVenue>,
        compounder: RewardCompounder,
    }

    fn reward(market: u8, token: Address, supply: u128, borrow: u128) -> Reward {
        Reward {
            market: Address::repeat_byte(market),
            reward_token: token,
            supply_rewards_amount: U256::from(supply),
            borrow_rewards_amount: U256::from(borrow),
        }
    }

    fn harness() -> Harness {
        let chain = Arc::new(FakeChain::default());
        let now = chrono::Utc::now().timestamp() as u64;
        chain.set_price(WELL_FEED, PriceObservation { price: U256::from(1_000_000), decimals: 8, updated_at: now });
        chain.set_price(USDC_FEED, PriceObservation { price: U256::from(100_000_000), decimals: 8, updated_at: now });
        for s in [STRATEGY, OTHER] {
            chain.set_fee(s, 100);
            chain.set_slippage(s, 50);
        }
        chain.set_expected_out(Ok(U256::from(1_000_000)));

        let index = Arc::new(FakeIndex::default());
        let txs = Arc::new(FakeTxs::default());
        let venue = Arc::new(FakeVenue::default());
        venue.set_quote(Quote {
            sell_amount: U256::from(1),
            buy_amount: U256::from(1_000_000),
            fee_amount: U256::ZERO,
        });

        let oracle = Arc::new(PriceOracle::new(
            chain.clone(),
            &[
                PriceFeedEntry { token: tokens::WELL, feed: WELL_FEED },
                PriceFeedEntry { token: tokens::USDC, feed: USDC_FEED },
            ],
            3_600,
        ));
        let pipeline = Arc::new(SwapPipeline::new(
            chain.clone(),
            OrderCodec::new(chain.clone(), 8453, DEFAULT_SETTLEMENT, 30),
            venue.clone(),
            SwapSettings {
                base_asset: tokens::USDC,
                fee_recipient: Address::repeat_byte(0xfe),
                app_code: "compounder".into(),
                hook_gas_limit: 100_000,
                quote_safety_margin_bps: 200,
                order_validity_secs: 1_200,
                execution_mode: ExecutionMode::Production,
            },
        ));
        let compounder = RewardCompounder::new(
            index.clone(),
            chain.clone(),
            oracle,
            txs.clone(),
            pipeline,
            dec!(1),
            dec!(1),
        );
        Harness { chain, index, txs, venue, compounder }
    }

    #[test]
    fn test_claimable_grouped_by_token() {
        let rewards = vec![
            reward(1, tokens::WELL, 5, 1),
            reward(2, tokens::MORPHO, 3, 0),
            reward(3, tokens::WELL, 0, 4),
        ];
        assert_eq!(
            claimable_by_token(&rewards),
            vec![(tokens::WELL, U256::from(10)), (tokens::MORPHO, U256::from(3))]
        );
    }

    #[tokio::test]
    async fn test_claims_once_and_swaps_once_per_token() {
        let h = harness();
        h.index.add_strategy(STRATEGY);
        // $3 of WELL spread over two markets
        h.chain.set_rewards(STRATEGY, vec![
            reward(1, tokens::WELL, WELL_PER_DOLLAR, 0),
            reward(2, tokens::WELL, WELL_PER_DOLLAR, WELL_PER_DOLLAR),
        ]);
        h.chain.set_balance(tokens::WELL, STRATEGY, U256::from(3 * WELL_PER_DOLLAR));

        let summary = h.compounder.run().await.unwrap();

        assert_eq!(h.txs.sent(), vec![TxRequest::claim_reward(STRATEGY)]);
        assert_eq!(h.venue.submissions().len(), 1);
        assert_eq!(summary.actions, 2);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn test_below_threshold_is_not_claimed() {
        let h = harness();
        h.index.add_strategy(STRATEGY);
        // $0.99
        h.chain.set_rewards(STRATEGY, vec![reward(1, tokens::WELL, WELL_PER_DOLLAR * 99 / 100, 0)]);

        let summary = h.compounder.run().await.unwrap();
        assert!(h.txs.sent().is_empty());
        assert_eq!(summary.skipped, 1);
    }

    #[tokio::test]
    async fn test_exactly_at_threshold_is_claimed() {
        let h = harness();
        h.index.add_strategy(STRATEGY);
        h.chain.set_rewards(STRATEGY, vec![reward(1, tokens::WELL, WELL_PER_DOLLAR, 0)]);

        h.compounder.run().await.unwrap();
        assert_eq!(h.txs.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_unpriced_and_zero_rewards_are_skipped() {
        let h = harness();
        h.index.add_strategy(STRATEGY);
        h.chain.set_rewards(STRATEGY, vec![
            reward(1, tokens::MORPHO, 10u128.pow(24), 0),
            reward(2, tokens::WELL, 0, 0),
        ]);

        h.compounder.run().await.unwrap();
        assert!(h.txs.sent().is_empty());
    }

    #[tokio::test]
    async fn test_small_post_claim_balance_is_not_swapped() {
        let h = harness();
        h.index.add_strategy(STRATEGY);
        h.chain.set_rewards(STRATEGY, vec![reward(1, tokens::WELL, 2 * WELL_PER_DOLLAR, 0)]);
        // Claim landed less than a dollar
        h.chain.set_balance(tokens::WELL, STRATEGY, U256::from(WELL_PER_DOLLAR / 2));

        h.compounder.run().await.unwrap();
        assert_eq!(h.txs.sent().len(), 1);
        assert!(h.venue.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_base_asset_reward_is_claimed_not_swapped() {
        let h = harness();
        h.index.add_strategy(STRATEGY);
        h.chain.set_rewards(STRATEGY, vec![reward(1, tokens::USDC, 5_000_000, 0)]);
        h.chain.set_balance(tokens::USDC, STRATEGY, U256::from(5_000_000));

        h.compounder.run().await.unwrap();
        assert_eq!(h.txs.sent().len(), 1);
        assert_eq!(h.venue.quote_count(), 0);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_the_batch() {
        let h = harness();
        h.index.add_strategy(STRATEGY);
        h.index.add_strategy(OTHER);
        h.chain.set_rewards(STRATEGY, vec![reward(1, tokens::WELL, 5 * WELL_PER_DOLLAR, 0)]);
        h.chain.set_rewards(OTHER, vec![reward(1, tokens::WELL, 5 * WELL_PER_DOLLAR, 0)]);
        h.chain.set_balance(tokens::WELL, STRATEGY, U256::from(5 * WELL_PER_DOLLAR));
        h.chain.set_balance(tokens::WELL, OTHER, U256::from(5 * WELL_PER_DOLLAR));
        h.venue.reject_submissions();

        let summary = h.compounder.run().await.unwrap();
        // Both claims still went out; both rejected orders were contained
        assert_eq!(h.txs.sent().len(), 2);
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.skipped, 2);
    }

    #[tokio::test]
    async fn test_reverted_claim_fails_only_that_strategy() {
        let h = harness();
        h.index.add_strategy(STRATEGY);
        h.chain.set_rewards(STRATEGY, vec![reward(1, tokens::WELL, 5 * WELL_PER_DOLLAR, 0)]);
        h.txs.fail_on("claimReward");

        let summary = h.compounder.run().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert!(h.venue.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_idle_deposit_threshold_is_exact() {
        let index = Arc::new(FakeIndex::default());
        let txs = Arc::new(FakeTxs::default());
        index.add_idle(STRATEGY);
        index.add_idle(OTHER);
        // 0.1 + 0.2 is exactly 0.3
        index.set_balances(STRATEGY, &[dec!(0.1), dec!(0.2)]);
        index.set_balances(OTHER, &[dec!(0.1), dec!(0.1)]);

        let depositor = IdleDepositor::new(index, txs.clone(), dec!(0.3));
        let summary = tokio_test::assert_ok!(depositor.run().await);

        assert_eq!(txs.sent(), vec![TxRequest::deposit_idle(STRATEGY)]);
        assert_eq!(summary.actions, 1);
        assert_eq!(summary.skipped, 1);
    }

    #[tokio::test]
    async fn test_idle_balance_failure_is_contained() {
        let index = Arc::new(FakeIndex::default());
        let txs = Arc::new(FakeTxs::default());
        index.add_idle(STRATEGY);
        index.add_idle(OTHER);
        index.set_balances(OTHER, &[dec!(50)]);

        let depositor = IdleDepositor::new(index, txs.clone(), dec!(1));
        let summary = depositor.run().await.unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(txs.sent(), vec![TxRequest::deposit_idle(OTHER)]);
    }
}
