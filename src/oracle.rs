//! Price & Reward Valuation
//!
//! Values raw token amounts in USD from on-chain aggregator feeds. Results are
//! `Decimal` at micro-dollar precision, so threshold comparisons are exact.
//!
//! A feed read that fails falls back to the last good observation this oracle
//! saw for the same feed; an old but successful read is used and reported.

use alloy_primitives::{Address, U256};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::chain::{ChainReader, PriceObservation};
use crate::config::PriceFeedEntry;
use crate::error::CompounderError;
use crate::tokens;

/// Fractional digits kept in USD values
const USD_SCALE: u32 = 6;

pub struct PriceOracle {
    chain: Arc<dyn ChainReader>,
    feeds: HashMap<Address, Address>,
    max_age_secs: u64,
    /// Last good observation per feed
    cache: RwLock<HashMap<Address, PriceObservation>>,
    /// Decimals learned from token contracts
    decimals: RwLock<HashMap<Address, u8>>,
}

impl PriceOracle {
    pub fn new(chain: Arc<dyn ChainReader>, feeds: &[PriceFeedEntry], max_age_secs: u64) -> Self {
        Self {
            chain,
            feeds: tokens::build_feed_map(feeds),
            max_age_secs,
            cache: RwLock::new(HashMap::new()),
            decimals: RwLock::new(HashMap::new()),
        }
    }

    pub fn has_feed(&self, token: &Address) -> bool {
        self.feeds.contains_key(token)
    }

    /// USD value of `amount` (token base units).
    pub async fn value_usd(&self, token: Address, amount: U256) -> Result<Decimal, CompounderError> {
        let feed = *self
            .feeds
            .get(&token)
            .ok_or(CompounderError::UnsupportedToken(token))?;

        let decimals = self.token_decimals(token).await?;
        let observation = self.observe(feed).await?;
        let usd = usd_value(amount, decimals, &observation).ok_or_else(|| {
            CompounderError::PriceUnavailable {
                feed,
                reason: format!(
                    "decimals out of range (token {}, feed {})",
                    decimals, observation.decimals
                ),
            }
        })?;

        debug!(token = %tokens::label(&token), %amount, %usd, "valued");
        Ok(usd)
    }

    async fn token_decimals(&self, token: Address) -> Result<u8, CompounderError> {
        if let Some(d) = tokens::known_decimals(&token) {
            return Ok(d);
        }
        if let Some(d) = self.decimals.read().await.get(&token) {
            return Ok(*d);
        }
        let d = self.chain.token_decimals(token).await?;
        self.decimals.write().await.insert(token, d);
        Ok(d)
    }

    async fn observe(&self, feed: Address) -> Result<PriceObservation, CompounderError> {
        match self.chain.latest_price(feed).await {
            Ok(observation) => {
                let age = unix_now().saturating_sub(observation.updated_at);
                if age > self.max_age_secs {
                    warn!(%feed, age_secs = age, "price feed is stale, using last round anyway");
                }
                self.cache.write().await.insert(feed, observation);
                Ok(observation)
            }
            Err(e) => match self.cache.read().await.get(&feed) {
                Some(cached) => {
                    warn!(%feed, error = %e, "price read failed, using cached observation");
                    Ok(*cached)
                }
                None => Err(CompounderError::PriceUnavailable {
                    feed,
                    reason: e.to_string(),
                }),
            },
        }
    }
}

/// `amount * price / 10^token_decimals / 10^feed_decimals`, truncated to micro-dollars.
///
/// `None` when the combined decimals do not fit a 256-bit power of ten.
pub fn usd_value(amount: U256, token_decimals: u8, observation: &PriceObservation) -> Option<Decimal> {
    let scale = U256::from(10u64).pow(U256::from(USD_SCALE));
    let divisor = U256::from(10u64).checked_pow(U256::from(
        u32::from(token_decimals) + u32::from(observation.decimals),
    ))?;
    let micro = amount
        .saturating_mul(observation.price)
        .saturating_mul(scale)
        / divisor;

    Some(
        i128::try_from(micro)
            .ok()
            .and_then(|m| Decimal::try_from_i128_with_scale(m, USD_SCALE).ok())
            .unwrap_or(Decimal::MAX),
    )
}

/// Threshold gate; a value exactly at the minimum passes.
pub fn meets_threshold(usd: Decimal, min: Decimal) -> bool {
    usd >= min
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
