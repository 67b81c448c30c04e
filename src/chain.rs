//! On-chain reads
//!
//! Contract bindings for the strategy, ERC-20 tokens and USD price feeds, and
//! the `ChainReader` seam the engines read through. `RpcChain` is the live
//! implementation: every `eth_call` has a deadline, and transport failures
//! (never reverts) are retried with backoff.

use alloy_primitives::{Address, Bytes, FixedBytes, B256, I256, U256};
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_rpc_types::TransactionRequest;
use alloy_sol_types::{decode_revert_reason, sol, SolCall};
use alloy_transport::TransportError;
use async_trait::async_trait;
use eyre::Result;
use tracing::trace;

use crate::error::ChainError;
use crate::retry::{retry_async, RetryPolicy};
use crate::types::{Reward, Split};

// ============================================
// SOLIDITY INTERFACES
// ============================================

sol! {
    /// Reward entry returned by a strategy
    struct RewardInfo {
        address market;
        address rewardToken;
        uint256 supplyRewardsAmount;
        uint256 borrowRewardsAmount;
    }

    /// Strategy account interface
    interface IStrategy {
        function getUserRewards() external view returns (RewardInfo[] memory);
        function claimReward() external;
        function allowedSlippageInBps() external view returns (uint256);
        function compoundFee() external view returns (uint256);
        function splitMToken() external view returns (uint256);
        function splitVault() external view returns (uint256);
        function updatePosition(uint256 splitMToken, uint256 splitVault) external;
        function depositIdleTokens() external;
        function isValidSignature(bytes32 hash, bytes signature) external view returns (bytes4);
        function getExpectedOut(uint256 amountIn, address tokenIn, address tokenOut) external view returns (uint256);
    }

    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function decimals() external view returns (uint8);
        function transferFrom(address from, address to, uint256 amount) external returns (bool);
    }

    /// Chainlink-style aggregator
    interface IAggregatorV3 {
        function decimals() external view returns (uint8);
        function latestRoundData() external view returns (
            uint80 roundId,
            int256 answer,
            uint256 startedAt,
            uint256 updatedAt,
            uint80 answeredInRound
        );
    }
}

/// One price reading, sign already stripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceObservation {
    pub price: U256,
    pub decimals: u8,
    /// Unix seconds
    pub updated_at: u64,
}

/// Read access to the chain.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn user_rewards(&self, strategy: Address) -> Result<Vec<Reward>, ChainError>;
    async fn token_balance(&self, token: Address, owner: Address) -> Result<U256, ChainError>;
    async fn token_decimals(&self, token: Address) -> Result<u8, ChainError>;
    async fn latest_price(&self, feed: Address) -> Result<PriceObservation, ChainError>;
    async fn allowed_slippage_bps(&self, strategy: Address) -> Result<u32, ChainError>;
    async fn compound_fee_bps(&self, strategy: Address) -> Result<u32, ChainError>;
    async fn split(&self, strategy: Address) -> Result<Split, ChainError>;
    async fn is_valid_signature(
        &self,
        strategy: Address,
        digest: B256,
        signature: Bytes,
    ) -> Result<FixedBytes<4>, ChainError>;
    async fn expected_out(
        &self,
        strategy: Address,
        amount_in: U256,
        token_in: Address,
        token_out: Address,
    ) -> Result<U256, ChainError>;
}

// ============================================
// RPC IMPLEMENTATION
// ============================================

pub struct RpcChain {
    provider: DynProvider,
    policy: RetryPolicy,
}

impl RpcChain {
    pub fn connect(rpc_url: &str, policy: RetryPolicy) -> Result<Self> {
        let provider = ProviderBuilder::new().connect_http(rpc_url.parse()?).erased();
        Ok(Self { provider, policy })
    }

    pub fn provider(&self) -> DynProvider {
        self.provider.clone()
    }

    /// Helper to call a contract
    async fn call_contract(&self, to: Address, calldata: Vec<u8>) -> Result<Bytes, ChainError> {
        let policy = self.policy;
        let calldata = Bytes::from(calldata);
        retry_async(&policy, ChainError::is_transient, |attempt| {
            let provider = self.provider.clone();
            let tx = TransactionRequest::default().to(to).input(calldata.clone().into());
            async move {
                trace!(%to, attempt, "eth_call");
                match tokio::time::timeout(policy.timeout, async { provider.call(tx).await }).await {
                    Ok(Ok(out)) => Ok(out),
                    Ok(Err(e)) => Err(classify_rpc_error(e)),
                    Err(_) => Err(ChainError::Timeout(policy.timeout.as_secs())),
                }
            }
        })
        .await
    }

    async fn read<C: SolCall>(
        &self,
        to: Address,
        call: C,
        what: &'static str,
    ) -> Result<C::Return, ChainError> {
        let out = self.call_contract(to, call.abi_encode()).await?;
        C::abi_decode_returns(&out).map_err(|e| ChainError::Decode {
            what,
            reason: e.to_string(),
        })
    }
}

/// Split an RPC failure into a revert (with its decoded reason) or a transport error.
pub fn classify_rpc_error(err: TransportError) -> ChainError {
    if let Some(payload) = err.as_error_resp() {
        if let Some(data) = payload.as_revert_data() {
            let reason = decode_revert_reason(&data)
                .unwrap_or_else(|| format!("0x{}", hex::encode(&data)));
            return ChainError::Revert(reason);
        }
        if payload.message.to_lowercase().contains("revert") {
            return ChainError::Revert(payload.message.to_string());
        }
        return ChainError::Transport(payload.message.to_string());
    }
    ChainError::Transport(err.to_string())
}

/// Aggregator answer to an observation; a negative answer is taken by magnitude.
pub fn price_observation(answer: I256, decimals: u8, updated_at: U256) -> PriceObservation {
    PriceObservation {
        price: answer.unsigned_abs(),
        decimals,
        updated_at: updated_at.saturating_to::<u64>(),
    }
}

fn to_u32(value: U256, what: &'static str) -> Result<u32, ChainError> {
    u32::try_from(value).map_err(|_| ChainError::Decode {
        what,
        reason: format!("{} does not fit in u32", value),
    })
}

#[async_trait]
impl ChainReader for RpcChain {
    async fn user_rewards(&self, strategy: Address) -> Result<Vec<Reward>, ChainError> {
        let infos = self
            .read(strategy, IStrategy::getUserRewardsCall {}, "getUserRewards")
            .await?;
        Ok(infos
            .into_iter()
            .map(|r| Reward {
                market: r.market,
                reward_token: r.rewardToken,
                supply_rewards_amount: r.supplyRewardsAmount,
                borrow_rewards_amount: r.borrowRewardsAmount,
            })
            .collect())
    }

    async fn token_balance(&self, token: Address, owner: Address) -> Result<U256, ChainError> {
        self.read(token, IERC20::balanceOfCall { account: owner }, "balanceOf")
            .await
    }

    async fn token_decimals(&self, token: Address) -> Result<u8, ChainError> {
        self.read(token, IERC20::decimalsCall {}, "decimals").await
    }

    async fn latest_price(&self, feed: Address) -> Result<PriceObservation, ChainError> {
        let round = self
            .read(feed, IAggregatorV3::latestRoundDataCall {}, "latestRoundData")
            .await?;
        let decimals = self
            .read(feed, IAggregatorV3::decimalsCall {}, "feed decimals")
            .await?;
        Ok(price_observation(round.answer, decimals, round.updatedAt))
    }

    async fn allowed_slippage_bps(&self, strategy: Address) -> Result<u32, ChainError> {
        let bps = self
            .read(strategy, IStrategy::allowedSlippageInBpsCall {}, "allowedSlippageInBps")
            .await?;
        to_u32(bps, "allowedSlippageInBps")
    }

    async fn compound_fee_bps(&self, strategy: Address) -> Result<u32, ChainError> {
        let bps = self
            .read(strategy, IStrategy::compoundFeeCall {}, "compoundFee")
            .await?;
        to_u32(bps, "compoundFee")
    }

    async fn split(&self, strategy: Address) -> Result<Split, ChainError> {
        let mtoken = self
            .read(strategy, IStrategy::splitMTokenCall {}, "splitMToken")
            .await?;
        let vault = self
            .read(strategy, IStrategy::splitVaultCall {}, "splitVault")
            .await?;
        Ok(Split::new(
            to_u32(mtoken, "splitMToken")?,
            to_u32(vault, "splitVault")?,
        ))
    }

    async fn is_valid_signature(
        &self,
        strategy: Address,
        digest: B256,
        signature: Bytes,
    ) -> Result<FixedBytes<4>, ChainError> {
        self.read(
            strategy,
            IStrategy::isValidSignatureCall { hash: digest, signature },
            "isValidSignature",
        )
        .await
    }

    async fn expected_out(
        &self,
        strategy: Address,
        amount_in: U256,
        token_in: Address,
        token_out: Address,
    ) -> Result<U256, ChainError> {
        self.read(
            strategy,
            IStrategy::getExpectedOutCall { amountIn: amount_in, tokenIn: token_in, tokenOut: token_out },
            "getExpectedOut",
        )
        .await
    }
}
