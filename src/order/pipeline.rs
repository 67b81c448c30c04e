//! Swap Execution Pipeline
//!
//! Turns a strategy's reward-token balance into a validated sell order for the
//! base asset:
//! 1. Quote the full balance on the venue
//! 2. Take the compound fee out of the sale (paid by the appData pre-hook)
//! 3. Derive a minimum output from the strategy's own price check, or from the
//!    quote with an extra margin when that check is stale
//! 4. Validate through EIP-1271 and submit

use alloy_primitives::{Address, B256, U256};
use eyre::Result;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

use super::app_data::AppData;
use super::codec::{OrderCodec, OrderDraft, SwapOrder, Validation};
use super::venue::{OrderBook, OrderSubmission, QuoteRequest};
use crate::chain::ChainReader;
use crate::config::{Config, ExecutionMode};
use crate::tokens;

pub const BPS_DENOMINATOR: u32 = 10_000;

/// What happened to one swap attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapOutcome {
    /// Nothing to sell
    Skipped,
    Submitted { uid: String },
    /// Validated but not posted
    DryRun { digest: B256 },
    /// The strategy refused the order, or the limit came out as zero
    Rejected { reason: String },
}

/// Where the minimum output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinOutSource {
    OnChain,
    Quote,
}

pub struct SwapSettings {
    pub base_asset: Address,
    pub fee_recipient: Address,
    pub app_code: String,
    pub hook_gas_limit: u64,
    pub quote_safety_margin_bps: u32,
    pub order_validity_secs: u32,
    pub execution_mode: ExecutionMode,
}

impl SwapSettings {
    pub fn from_config(config: &Config, fee_recipient: Address) -> Self {
        Self {
            base_asset: config.base_asset,
            fee_recipient,
            app_code: config.app_code.clone(),
            hook_gas_limit: config.hook_gas_limit,
            quote_safety_margin_bps: config.quote_safety_margin_bps,
            order_validity_secs: config.order_validity_secs,
            execution_mode: config.execution_mode,
        }
    }
}

pub struct SwapPipeline {
    chain: Arc<dyn ChainReader>,
    codec: OrderCodec,
    venue: Arc<dyn OrderBook>,
    settings: SwapSettings,
}

impl SwapPipeline {
    pub fn new(
        chain: Arc<dyn ChainReader>,
        codec: OrderCodec,
        venue: Arc<dyn OrderBook>,
        settings: SwapSettings,
    ) -> Self {
        Self { chain, codec, venue, settings }
    }

    pub fn base_asset(&self) -> Address {
        self.settings.base_asset
    }

    /// Sell `balance` of `token` held by `strategy` for the base asset.
    pub async fn swap(&self, strategy: Address, token: Address, balance: U256) -> Result<SwapOutcome> {
        let buy_token = self.settings.base_asset;
        if token == buy_token || balance.is_zero() {
            return Ok(SwapOutcome::Skipped);
        }

        let quote = self
            .venue
            .quote(&QuoteRequest {
                sell_token: token,
                buy_token,
                sell_amount: balance,
                from: strategy,
            })
            .await?;

        let fee_bps = self.chain.compound_fee_bps(strategy).await?;
        let fee = compound_fee(balance, fee_bps);
        let app_data = AppData::with_fee_hook(
            &self.settings.app_code,
            token,
            strategy,
            self.settings.fee_recipient,
            fee,
            self.settings.hook_gas_limit,
        );

        let mut draft = OrderDraft {
            sell_token: token,
            buy_token,
            receiver: strategy,
            gross_sell_amount: balance,
            compound_fee: fee,
            min_buy_amount: U256::ZERO,
            valid_to: valid_to(self.settings.order_validity_secs),
            app_data: app_data.hash(),
        };
        // Fails before any further reads when the fee eats the sale
        let net_sell = draft.clone().build()?.sell_amount;

        let slippage_bps = self.codec.slippage_bps(strategy).await;
        let (min_out, source) = self
            .min_output(strategy, token, net_sell, slippage_bps, quote.buy_amount, balance)
            .await?;
        if min_out.is_zero() {
            return Ok(SwapOutcome::Rejected { reason: "minimum output is zero".into() });
        }
        draft.min_buy_amount = min_out;
        let order = draft.build()?;

        info!(
            %strategy,
            token = %tokens::label(&token),
            sell = %order.sell_amount,
            fee = %fee,
            min_out = %min_out,
            ?source,
            "order built"
        );

        match self.codec.validate(strategy, &order).await? {
            Validation::Valid => {}
            Validation::ProvisionallyValid { reason } => {
                warn!(%strategy, %reason, "signature check hit a stale feed, submitting anyway");
            }
            Validation::Invalid { reason } => {
                warn!(%strategy, %reason, "strategy rejected order");
                return Ok(SwapOutcome::Rejected { reason });
            }
        }

        self.submit(strategy, order, app_data).await
    }

    async fn min_output(
        &self,
        strategy: Address,
        token: Address,
        net_sell: U256,
        slippage_bps: u32,
        quoted_buy: U256,
        quoted_sell: U256,
    ) -> Result<(U256, MinOutSource)> {
        match self
            .chain
            .expected_out(strategy, net_sell, token, self.settings.base_asset)
            .await
        {
            Ok(expected) => Ok((apply_bps_discount(expected, slippage_bps), MinOutSource::OnChain)),
            Err(e) if e.is_stale_oracle() => {
                warn!(%strategy, error = %e, "on-chain price check is stale, pricing from quote");
                let scaled = scale_to(quoted_buy, quoted_sell, net_sell);
                let bps = slippage_bps.saturating_add(self.settings.quote_safety_margin_bps);
                Ok((apply_bps_discount(scaled, bps), MinOutSource::Quote))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn submit(&self, strategy: Address, order: SwapOrder, app_data: AppData) -> Result<SwapOutcome> {
        if self.settings.execution_mode == ExecutionMode::DryRun {
            let digest = self.codec.digest(&order);
            info!(%strategy, %digest, app_data = app_data.json(), "[dry-run] order not submitted");
            return Ok(SwapOutcome::DryRun { digest });
        }

        let submission = OrderSubmission {
            signature: OrderCodec::encode(&order),
            owner: strategy,
            app_data_json: app_data.json().to_string(),
            order,
        };
        let uid = self.venue.submit(&submission).await?;
        info!(%strategy, %uid, "order submitted");
        Ok(SwapOutcome::Submitted { uid })
    }
}

/// `floor(amount * fee_bps / 10000)`
pub fn compound_fee(amount: U256, fee_bps: u32) -> U256 {
    amount.saturating_mul(U256::from(fee_bps)) / U256::from(BPS_DENOMINATOR)
}

/// `amount * (10000 - bps) / 10000`, floored; a discount of 100% or more gives zero.
pub fn apply_bps_discount(amount: U256, bps: u32) -> U256 {
    let keep = BPS_DENOMINATOR.saturating_sub(bps);
    amount.saturating_mul(U256::from(keep)) / U256::from(BPS_DENOMINATOR)
}

/// Rescale an output quoted for `quoted_in` to `actual_in`.
pub fn scale_to(quoted_out: U256, quoted_in: U256, actual_in: U256) -> U256 {
    if quoted_in.is_zero() {
        return U256::ZERO;
    }
    quoted_out.saturating_mul(actual_in) / quoted_in
}

fn valid_to(validity_secs: u32) -> u32 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    u32::try_from(now).unwrap_or(u32::MAX).saturating_add(validity_secs)
}
