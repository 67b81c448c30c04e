//! Indexer and yield feed clients
//!
//! The indexer lists managed strategies (all, or only those holding idle
//! funds) with cursor pagination, and reports per-strategy token balances.
//! The yield feed reports current APYs for lending markets and vaults.

use alloy_primitives::Address;
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use tracing::{debug, warn};

use crate::error::CompounderError;
use crate::retry::{retry_async, RetryPolicy};
use crate::types::{BalanceEntry, Strategy, YieldSnapshot};

/// Hard stop for a misbehaving cursor
const MAX_PAGES: usize = 1_000;

#[async_trait]
pub trait StrategyIndex: Send + Sync {
    async fn strategies(&self) -> Result<Vec<Strategy>>;
    async fn idle_strategies(&self) -> Result<Vec<Strategy>>;
    async fn balances(&self, strategy: Address) -> Result<Vec<BalanceEntry>>;
}

#[async_trait]
pub trait YieldFeed: Send + Sync {
    async fn fetch(&self) -> Result<YieldReport>;
}

// ============================================
// WIRE TYPES
// ============================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyPage {
    pub strategies: Vec<Strategy>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BalancesResponse {
    balances: Vec<BalanceEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketYield {
    pub supply_apy: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VaultYield {
    pub apy: Decimal,
}

/// Yield feed payload, APYs in percent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct YieldReport {
    #[serde(default)]
    pub markets: HashMap<String, MarketYield>,
    #[serde(default)]
    pub vaults: HashMap<String, VaultYield>,
}

impl YieldReport {
    /// Both sides of a strategy's choice; a missing entry fails the whole lookup.
    pub fn snapshot(&self, market: &str, vault: &str) -> Result<YieldSnapshot, CompounderError> {
        let market_apy = self
            .markets
            .get(market)
            .ok_or_else(|| CompounderError::MissingYieldEntry { kind: "market", name: market.to_string() })?
            .supply_apy;
        let vault_apy = self
            .vaults
            .get(vault)
            .ok_or_else(|| CompounderError::MissingYieldEntry { kind: "vault", name: vault.to_string() })?
            .apy;
        Ok(YieldSnapshot { market_apy, vault_apy })
    }
}

/// Timeouts, refused connections, 429 and 5xx are worth another attempt.
/// Client errors and undecodable bodies are not.
pub fn is_transient_http(err: &eyre::Report) -> bool {
    match err.downcast_ref::<reqwest::Error>() {
        Some(e) if e.is_timeout() || e.is_connect() => true,
        Some(e) => e.status().is_some_and(is_retryable_status),
        None => false,
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Follow `nextCursor` until it runs out.
pub async fn collect_pages<F, Fut>(mut fetch_page: F) -> Result<Vec<Strategy>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<StrategyPage>>,
{
    let mut strategies = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor = None;

    for _ in 0..MAX_PAGES {
        let page = fetch_page(cursor.clone()).await?;
        strategies.extend(page.strategies);
        match page.next_cursor {
            Some(next) if !seen.insert(next.clone()) => {
                warn!(cursor = %next, "indexer repeated a cursor, stopping pagination");
                return Ok(strategies);
            }
            Some(next) => cursor = Some(next),
            None => return Ok(strategies),
        }
    }
    Err(eyre!("indexer returned more than {} pages", MAX_PAGES))
}

// ============================================
// HTTP CLIENT
// ============================================

pub struct IndexerClient {
    http_client: Client,
    indexer_url: String,
    yield_url: String,
    retry: RetryPolicy,
}

impl IndexerClient {
    pub fn new(indexer_url: &str, yield_url: &str, retry: RetryPolicy) -> Result<Self> {
        Ok(Self {
            http_client: Client::builder().timeout(retry.timeout).build()?,
            indexer_url: indexer_url.trim_end_matches('/').to_string(),
            yield_url: yield_url.to_string(),
            retry,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, &str)]) -> Result<T> {
        retry_async(&self.retry, is_transient_http, |attempt| async move {
            debug!(url, attempt, "GET");
            let response = self
                .http_client
                .get(url)
                .query(query)
                .send()
                .await
                .wrap_err_with(|| format!("GET {} failed", url))?
                .error_for_status()?;
            response
                .json::<T>()
                .await
                .wrap_err_with(|| format!("unexpected response from {}", url))
        })
        .await
    }

    async fn list(&self, path: &str) -> Result<Vec<Strategy>> {
        let url = format!("{}{}", self.indexer_url, path);
        collect_pages(|cursor| {
            let url = url.clone();
            async move {
                let query: Vec<(&str, &str)> = match cursor.as_deref() {
                    Some(c) => vec![("cursor", c)],
                    None => Vec::new(),
                };
                self.get_json::<StrategyPage>(&url, &query).await
            }
        })
        .await
    }
}

#[async_trait]
impl StrategyIndex for IndexerClient {
    async fn strategies(&self) -> Result<Vec<Strategy>> {
        self.list("/strategies").await
    }

    async fn idle_strategies(&self) -> Result<Vec<Strategy>> {
        self.list("/strategies/idle").await
    }

    async fn balances(&self, strategy: Address) -> Result<Vec<BalanceEntry>> {
        let url = format!("{}/strategies/{}/balances", self.indexer_url, strategy);
        let response: BalancesResponse = self.get_json(&url, &[]).await?;
        Ok(response.balances)
    }
}

#[async_trait]
impl YieldFeed for IndexerClient {
    async fn fetch(&self) -> Result<YieldReport> {
        self.get_json(&self.yield_url, &[]).await
    }
}
