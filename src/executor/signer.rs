//! Keeper Wallet - transaction signing
//!
//! ⚠️  SECURITY WARNING:
//! - Never log or expose private keys
//! - Use environment variables, not hardcoded keys

use alloy_consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{Address, Bytes, B256};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use eyre::{eyre, Result};
use std::str::FromStr;
use tracing::debug;

/// The keeper account that sends claim, rebalance and deposit calls
pub struct KeeperWallet {
    signer: PrivateKeySigner,
    chain_id: u64,
}

/// A signed transaction ready for `eth_sendRawTransaction`
#[derive(Debug, Clone)]
pub struct SignedTx {
    pub raw: Bytes,
    pub hash: B256,
}

impl KeeperWallet {
    pub fn from_key(key: &str, chain_id: u64) -> Result<Self> {
        let signer = PrivateKeySigner::from_str(key.trim().trim_start_matches("0x"))
            .map_err(|e| eyre!("Failed to parse SIGNER_PRIVATE_KEY: {}", e))?;
        Ok(Self { signer, chain_id })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Sign an EIP-1559 transaction and return its 2718 encoding
    pub async fn sign(&self, mut tx: TxEip1559) -> Result<SignedTx> {
        tx.chain_id = self.chain_id;
        let nonce = tx.nonce;

        let signature = self
            .signer
            .sign_hash(&tx.signature_hash())
            .await
            .map_err(|e| eyre!("Failed to sign transaction: {}", e))?;

        let envelope = TxEnvelope::from(tx.into_signed(signature));
        let hash = *envelope.tx_hash();
        let raw = Bytes::from(envelope.encoded_2718());

        debug!(%hash, nonce, "signed EIP-1559 transaction");
        Ok(SignedTx { raw, hash })
    }
}
