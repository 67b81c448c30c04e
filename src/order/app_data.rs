//! Order metadata (appData)
//!
//! The document is serialized with a fixed key order and no whitespace, so the
//! bytes hashed into the order are exactly the bytes posted to the venue.

use alloy_primitives::{keccak256, Address, B256, U256};
use alloy_sol_types::SolCall;
use serde::Serialize;

use crate::chain::IERC20;

/// Metadata schema version understood by the venue
pub const APP_DATA_VERSION: &str = "1.1.0";

// Field order below is the serialized key order (alphabetical).

#[derive(Serialize)]
struct Document<'a> {
    #[serde(rename = "appCode")]
    app_code: &'a str,
    metadata: Metadata,
    version: &'static str,
}

#[derive(Serialize)]
struct Metadata {
    hooks: Hooks,
}

#[derive(Serialize)]
struct Hooks {
    pre: Vec<Hook>,
}

#[derive(Serialize)]
struct Hook {
    #[serde(rename = "callData")]
    call_data: String,
    #[serde(rename = "gasLimit")]
    gas_limit: String,
    target: String,
}

/// Serialized appData document and its hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppData {
    json: String,
    hash: B256,
}

impl AppData {
    /// Document whose pre-hook moves `fee` of `sell_token` from the strategy to the fee recipient.
    pub fn with_fee_hook(
        app_code: &str,
        sell_token: Address,
        strategy: Address,
        fee_recipient: Address,
        fee: U256,
        gas_limit: u64,
    ) -> Self {
        let call_data = IERC20::transferFromCall {
            from: strategy,
            to: fee_recipient,
            amount: fee,
        }
        .abi_encode();

        let document = Document {
            app_code,
            metadata: Metadata {
                hooks: Hooks {
                    pre: vec![Hook {
                        call_data: format!("0x{}", hex::encode(call_data)),
                        gas_limit: gas_limit.to_string(),
                        target: sell_token.to_string().to_lowercase(),
                    }],
                },
            },
            version: APP_DATA_VERSION,
        };

        // Serializing plain strings into a String cannot fail
        let json = serde_json::to_string(&document).unwrap_or_default();
        let hash = keccak256(json.as_bytes());
        Self { json, hash }
    }

    pub fn json(&self) -> &str {
        &self.json
    }

    pub fn hash(&self) -> B256 {
        self.hash
    }
}
