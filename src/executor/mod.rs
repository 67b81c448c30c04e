//! The Executor
//!
//! Every on-chain write the keeper makes goes through here:
//! - `signer`: the keeper wallet (EIP-1559 signing, 2718 encoding)
//! - `queue`: one worker that owns the wallet and nonce and sends
//!   `claimReward`, `updatePosition` and `depositIdleTokens` one at a time
//!
//! ⚠️  WARNING: In production mode this module sends real transactions!

mod queue;
mod signer;

pub use queue::{TxOutcome, TxQueue, TxQueueHandle, TxQueueSettings, TxRequest, TxSubmitter};
pub use signer::{KeeperWallet, SignedTx};
