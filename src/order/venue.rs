//! Order-book venue client (CoW Protocol API)

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use tracing::debug;

use super::codec::{SwapOrder, BALANCE_ERC20, KIND_SELL};

pub const SIGNING_SCHEME_EIP1271: &str = "eip1271";

/// Sell quote request for an exact amount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteRequest {
    pub sell_token: Address,
    pub buy_token: Address,
    pub sell_amount: U256,
    /// Owner and receiver of the order
    pub from: Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    pub sell_amount: U256,
    pub buy_amount: U256,
    pub fee_amount: U256,
}

/// A validated order ready for posting.
#[derive(Debug, Clone)]
pub struct OrderSubmission {
    pub order: SwapOrder,
    pub owner: Address,
    /// ABI-encoded order handed to `isValidSignature`
    pub signature: alloy_primitives::Bytes,
    pub app_data_json: String,
}

#[async_trait]
pub trait OrderBook: Send + Sync {
    async fn quote(&self, request: &QuoteRequest) -> Result<Quote>;

    /// Returns the order UID.
    async fn submit(&self, submission: &OrderSubmission) -> Result<String>;
}

// ============================================
// WIRE TYPES
// ============================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QuoteBody {
    sell_token: String,
    buy_token: String,
    receiver: String,
    from: String,
    kind: &'static str,
    sell_amount_before_fee: String,
    partially_fillable: bool,
    sell_token_balance: &'static str,
    buy_token_balance: &'static str,
    signing_scheme: &'static str,
    onchain_order: bool,
}

#[derive(Deserialize)]
struct QuoteResponse {
    quote: QuoteData,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteData {
    #[serde(deserialize_with = "u256_from_decimal_str")]
    sell_amount: U256,
    #[serde(deserialize_with = "u256_from_decimal_str")]
    buy_amount: U256,
    #[serde(default, deserialize_with = "u256_from_decimal_str")]
    fee_amount: U256,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderBody {
    sell_token: String,
    buy_token: String,
    receiver: String,
    sell_amount: String,
    buy_amount: String,
    valid_to: u32,
    app_data: String,
    app_data_hash: String,
    fee_amount: String,
    kind: &'static str,
    partially_fillable: bool,
    sell_token_balance: &'static str,
    buy_token_balance: &'static str,
    signing_scheme: &'static str,
    signature: String,
    from: String,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(rename = "errorType", default)]
    error_type: String,
    #[serde(default)]
    description: String,
}

fn u256_from_decimal_str<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
    let raw = String::deserialize(deserializer)?;
    U256::from_str_radix(&raw, 10).map_err(serde::de::Error::custom)
}

fn hex_address(address: &Address) -> String {
    address.to_string().to_lowercase()
}

impl OrderBody {
    fn from_submission(s: &OrderSubmission) -> Self {
        let o = &s.order;
        Self {
            sell_token: hex_address(&o.sell_token),
            buy_token: hex_address(&o.buy_token),
            receiver: hex_address(&o.receiver),
            sell_amount: o.sell_amount.to_string(),
            buy_amount: o.buy_amount.to_string(),
            valid_to: o.valid_to,
            app_data: s.app_data_json.clone(),
            app_data_hash: o.app_data.to_string(),
            fee_amount: o.fee_amount.to_string(),
            kind: KIND_SELL,
            partially_fillable: false,
            sell_token_balance: BALANCE_ERC20,
            buy_token_balance: BALANCE_ERC20,
            signing_scheme: SIGNING_SCHEME_EIP1271,
            signature: s.signature.to_string(),
            from: hex_address(&s.owner),
        }
    }
}

// ============================================
// COW CLIENT
// ============================================

pub struct CowClient {
    http_client: Client,
    api_url: String,
}

impl CowClient {
    pub fn new(api_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http_client: Client::builder().timeout(timeout).build()?,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.api_url, path);
        let response = self
            .http_client
            .post(&url)
            .json(body)
            .send()
            .await
            .wrap_err_with(|| format!("POST {} failed", url))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ApiError>(&text) {
            Ok(api) => Err(eyre!("venue rejected {} ({}): {} {}", path, status, api.error_type, api.description)),
            Err(_) => Err(eyre!("venue rejected {} ({}): {}", path, status, text)),
        }
    }
}

#[async_trait]
impl OrderBook for CowClient {
    async fn quote(&self, request: &QuoteRequest) -> Result<Quote> {
        let body = QuoteBody {
            sell_token: hex_address(&request.sell_token),
            buy_token: hex_address(&request.buy_token),
            receiver: hex_address(&request.from),
            from: hex_address(&request.from),
            kind: KIND_SELL,
            sell_amount_before_fee: request.sell_amount.to_string(),
            partially_fillable: false,
            sell_token_balance: BALANCE_ERC20,
            buy_token_balance: BALANCE_ERC20,
            signing_scheme: SIGNING_SCHEME_EIP1271,
            onchain_order: false,
        };
        let response: QuoteResponse = self.post("/api/v1/quote", &body).await?.json().await?;
        debug!(
            sell = %response.quote.sell_amount,
            buy = %response.quote.buy_amount,
            "venue quote"
        );
        Ok(Quote {
            sell_amount: response.quote.sell_amount,
            buy_amount: response.quote.buy_amount,
            fee_amount: response.quote.fee_amount,
        })
    }

    async fn submit(&self, submission: &OrderSubmission) -> Result<String> {
        let body = OrderBody::from_submission(submission);
        let uid: String = self.post("/api/v1/orders", &body).await?.json().await?;
        Ok(uid)
    }
}
