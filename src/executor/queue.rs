//! Serialized transaction submission
//!
//! One worker task owns the keeper wallet and its nonce. Every write from
//! every periodic task is sent to it over a channel and handled strictly one
//! at a time: estimate, sign, send, wait for the receipt. A failed or timed
//! out submission drops the cached nonce so the next one re-reads it from the
//! chain. Submissions are never retried here; the next cycle tries again.

use alloy_consensus::TxEip1559;
use alloy_network::ReceiptResponse;
use alloy_primitives::{Address, Bytes, TxKind, B256, U256};
use alloy_provider::{DynProvider, Provider};
use alloy_rpc_types::TransactionRequest;
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::signer::KeeperWallet;
use crate::chain::IStrategy;
use crate::config::ExecutionMode;
use crate::error::CompounderError;
use crate::types::Split;

/// Headroom over the node's gas estimate, in percent
const GAS_LIMIT_HEADROOM_PCT: u64 = 20;

const QUEUE_DEPTH: usize = 64;

/// A contract call to send from the keeper account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub to: Address,
    pub calldata: Bytes,
    /// Short description for logs
    pub label: String,
}

impl TxRequest {
    pub fn claim_reward(strategy: Address) -> Self {
        Self {
            to: strategy,
            calldata: IStrategy::claimRewardCall {}.abi_encode().into(),
            label: "claimReward".to_string(),
        }
    }

    pub fn update_position(strategy: Address, split: Split) -> Self {
        Self {
            to: strategy,
            calldata: IStrategy::updatePositionCall {
                splitMToken: U256::from(split.mtoken),
                splitVault: U256::from(split.vault),
            }
            .abi_encode()
            .into(),
            label: format!("updatePosition({})", split),
        }
    }

    pub fn deposit_idle(strategy: Address) -> Self {
        Self {
            to: strategy,
            calldata: IStrategy::depositIdleTokensCall {}.abi_encode().into(),
            label: "depositIdleTokens".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    Confirmed { hash: B256, block: Option<u64> },
    /// Logged, not sent
    DryRun,
}

impl TxOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, TxOutcome::Confirmed { .. })
    }
}

/// Anything that can take a write and report how it ended.
#[async_trait]
pub trait TxSubmitter: Send + Sync {
    /// Resolves once the receipt is in; a reverted receipt is an error.
    async fn submit(&self, request: TxRequest) -> Result<TxOutcome>;
}

struct Job {
    request: TxRequest,
    reply: oneshot::Sender<Result<TxOutcome>>,
}

/// Cloneable front door to the queue worker
#[derive(Clone)]
pub struct TxQueueHandle {
    sender: mpsc::Sender<Job>,
}

#[async_trait]
impl TxSubmitter for TxQueueHandle {
    async fn submit(&self, request: TxRequest) -> Result<TxOutcome> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(Job { request, reply })
            .await
            .map_err(|_| eyre!("transaction queue is closed"))?;
        response
            .await
            .map_err(|_| eyre!("transaction queue dropped the request"))?
    }
}

pub struct TxQueueSettings {
    pub execution_mode: ExecutionMode,
    pub emergency_stop: bool,
    pub rpc_timeout: Duration,
    pub receipt_timeout: Duration,
}

pub struct TxQueue {
    provider: DynProvider,
    wallet: Option<KeeperWallet>,
    settings: TxQueueSettings,
    /// Next nonce to use; `None` means read it from the chain
    nonce: Option<u64>,
}

impl TxQueue {
    pub fn new(
        provider: DynProvider,
        wallet: Option<KeeperWallet>,
        settings: TxQueueSettings,
    ) -> Result<Self> {
        if settings.execution_mode == ExecutionMode::Production && wallet.is_none() {
            return Err(eyre!("production mode needs a keeper wallet"));
        }
        Ok(Self { provider, wallet, settings, nonce: None })
    }

    /// Start the worker; it stops when every handle is dropped.
    pub fn spawn(self) -> (TxQueueHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(QUEUE_DEPTH);
        let worker = tokio::spawn(self.run(receiver));
        (TxQueueHandle { sender }, worker)
    }

    async fn run(mut self, mut receiver: mpsc::Receiver<Job>) {
        while let Some(job) = receiver.recv().await {
            let result = self.process(&job.request).await;
            if let Err(e) = &result {
                error!(to = %job.request.to, label = %job.request.label, "transaction failed: {:#}", e);
                self.nonce = None;
            }
            // The requester may have given up; nothing to do then
            let _ = job.reply.send(result);
        }
        debug!("transaction queue closed");
    }

    async fn process(&mut self, request: &TxRequest) -> Result<TxOutcome> {
        if self.settings.emergency_stop {
            return Err(CompounderError::EmergencyStop.into());
        }

        let wallet = match (&self.wallet, self.settings.execution_mode) {
            (Some(wallet), ExecutionMode::Production) => wallet,
            _ => {
                info!(to = %request.to, label = %request.label, "[dry-run] transaction not sent");
                return Ok(TxOutcome::DryRun);
            }
        };
        let from = wallet.address();
        let rpc_timeout = self.settings.rpc_timeout;

        let nonce = match self.nonce {
            Some(n) => n,
            None => {
                let n = with_timeout(rpc_timeout, "nonce", async {
                    self.provider.get_transaction_count(from).pending().await
                })
                .await?;
                debug!(nonce = n, "nonce synced from chain");
                n
            }
        };

        let call = TransactionRequest::default()
            .from(from)
            .to(request.to)
            .input(request.calldata.clone().into());
        let estimate = with_timeout(rpc_timeout, "gas estimate", async {
            self.provider.estimate_gas(call).await
        })
        .await?;
        let gas_limit = estimate + estimate * GAS_LIMIT_HEADROOM_PCT / 100;

        let fees = with_timeout(rpc_timeout, "fee estimate", async {
            self.provider.estimate_eip1559_fees().await
        })
        .await?;

        let tx = TxEip1559 {
            chain_id: wallet.chain_id(),
            nonce,
            gas_limit,
            max_fee_per_gas: fees.max_fee_per_gas,
            max_priority_fee_per_gas: fees.max_priority_fee_per_gas,
            to: TxKind::Call(request.to),
            value: U256::ZERO,
            access_list: Default::default(),
            input: request.calldata.clone(),
        };
        let signed = wallet.sign(tx).await?;

        let pending = with_timeout(rpc_timeout, "send", async {
            self.provider.send_raw_transaction(&signed.raw).await
        })
        .await?;
        self.nonce = Some(nonce + 1);
        info!(hash = %signed.hash, nonce, label = %request.label, "transaction sent");

        let receipt = tokio::time::timeout(self.settings.receipt_timeout, pending.get_receipt())
            .await
            .map_err(|_| {
                eyre!(
                    "no receipt for {} after {}s",
                    signed.hash,
                    self.settings.receipt_timeout.as_secs()
                )
            })?
            .wrap_err("receipt polling failed")?;

        if !receipt.status() {
            warn!(hash = %signed.hash, label = %request.label, "transaction reverted");
            return Err(CompounderError::TransactionReverted {
                hash: signed.hash.to_string(),
                label: request.label.clone(),
            }
            .into());
        }

        let block = receipt.block_number();
        info!(hash = %signed.hash, ?block, label = %request.label, "transaction confirmed");
        Ok(TxOutcome::Confirmed { hash: receipt.transaction_hash(), block })
    }
}

async fn with_timeout<T, E, F>(limit: Duration, what: &str, fut: F) -> Result<T>
where
    F: std::future::Future<Output = std::result::Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.wrap_err_with(|| format!("{} failed", what)),
        Err(_) => Err(eyre!("{} timed out after {}s", what, limit.as_secs())),
    }
}
