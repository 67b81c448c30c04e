//! Error taxonomy for the compounding and rebalancing engine.
//!
//! Task loops work in `eyre::Result`; these typed errors are what the loops
//! inspect when deciding whether a unit of work is skipped, degraded or failed.

use alloy_primitives::{Address, U256};
use thiserror::Error;

/// Failure of an on-chain read or call.
#[derive(Debug, Clone, Error)]
pub enum ChainError {
    /// The call reached the node and the EVM reverted.
    #[error("execution reverted: {0}")]
    Revert(String),

    /// The node could not be reached or answered with a non-revert error.
    #[error("rpc transport error: {0}")]
    Transport(String),

    /// The call did not answer within the configured timeout.
    #[error("rpc call timed out after {0}s")]
    Timeout(u64),

    /// The call answered with bytes that do not match the expected ABI.
    #[error("failed to decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },
}

impl ChainError {
    /// Whether a retry could plausibly give a different answer.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Transport(_) | ChainError::Timeout(_))
    }

    /// Whether this is a revert caused by an upstream price feed missing its heartbeat.
    pub fn is_stale_oracle(&self) -> bool {
        match self {
            ChainError::Revert(reason) => is_stale_oracle_reason(reason),
            _ => false,
        }
    }
}

/// Matches the revert reasons oracle wrappers emit when a feed is past its heartbeat.
pub fn is_stale_oracle_reason(reason: &str) -> bool {
    let reason = reason.to_lowercase();
    reason.contains("stale") || reason.contains("heartbeat")
}

/// Domain errors surfaced by the engine.
#[derive(Debug, Error)]
pub enum CompounderError {
    #[error("no price feed configured for token {0}")]
    UnsupportedToken(Address),

    #[error("no usable price for feed {feed}: {reason}")]
    PriceUnavailable { feed: Address, reason: String },

    #[error("fee {fee} is not below sell amount {sell}")]
    FeeExceedsSellAmount { fee: U256, sell: U256 },

    #[error("yield feed has no {kind} entry named {name}")]
    MissingYieldEntry { kind: &'static str, name: String },

    #[error("transaction {hash} reverted ({label})")]
    TransactionReverted { hash: String, label: String },

    #[error("position for {0} was modified concurrently")]
    PositionConflict(Address),

    #[error("on-chain split of {strategy} sums to {found}, expected {expected}")]
    SplitScaleMismatch { strategy: Address, found: u64, expected: u32 },

    #[error("emergency stop is active")]
    EmergencyStop,

    #[error(transparent)]
    Chain(#[from] ChainError),
}
