//! Production Configuration for the Compounder
//!
//! All parameters for running the keeper in dry-run and production modes,
//! loaded from the environment (and `.env`) or from a TOML file.

use alloy_primitives::{address, Address};
use eyre::{eyre, Result, WrapErr};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::Display;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::tokens;

// ============================================
// EXECUTION MODE
// ============================================

/// Execution mode determines whether writes reach the chain and the venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Reads and decisions run for real; transactions and orders are only logged
    DryRun,

    /// Transactions are signed and sent, orders are submitted
    /// CAUTION: This moves real funds!
    Production,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::DryRun
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::DryRun => write!(f, "DRY_RUN"),
            ExecutionMode::Production => write!(f, "PRODUCTION"),
        }
    }
}

// ============================================
// CONSTANTS
// ============================================

/// CoW Protocol settlement contract (same address on every supported chain)
pub const DEFAULT_SETTLEMENT: Address = address!("9008D19f58AAbD9eD0D60971565AA8510560ab41");

/// Slippage used when the strategy's own setting cannot be read
pub const DEFAULT_SLIPPAGE_BPS: u32 = 30;

/// Base mainnet
pub const DEFAULT_CHAIN_ID: u64 = 8453;

/// Token -> price feed mapping entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceFeedEntry {
    pub token: Address,
    pub feed: Address,
}

// ============================================
// MAIN CONFIGURATION
// ============================================

/// Main configuration struct for the Compounder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // ========== Network Settings ==========
    /// RPC URL for reads, gas estimation and raw transaction submission
    pub rpc_url: String,

    /// Chain ID (8453 = Base)
    pub chain_id: u64,

    // ========== Execution Settings ==========
    pub execution_mode: ExecutionMode,

    /// Key of the keeper account that signs claim / rebalance / deposit calls
    #[serde(skip_serializing, default)]
    pub signer_private_key: Option<String>,

    /// Kill switch - refuse every write while set
    pub emergency_stop: bool,

    // ========== Services ==========
    /// SQLite URL of the position store
    pub database_url: String,

    /// Strategy list / idle list / balance API
    pub indexer_api_url: String,

    /// Yield feed returning market and vault APYs
    pub yield_api_url: String,

    /// Order-book venue API root (CoW Protocol)
    pub cow_api_url: String,

    /// Port of the health / status server
    pub status_port: u16,

    // ========== Swap Settings ==========
    /// Asset every reward is converted into
    pub base_asset: Address,

    /// Settlement contract used as the EIP-712 verifying contract
    pub settlement_contract: Address,

    /// Receiver of the compound fee
    pub fee_recipient: Option<Address>,

    /// appCode written into the order metadata
    pub app_code: String,

    /// Fallback when `allowedSlippageInBps` cannot be read
    pub default_slippage_bps: u32,

    /// Extra discount applied to a venue quote when the on-chain price check is unavailable
    pub quote_safety_margin_bps: u32,

    /// Order lifetime in seconds
    pub order_validity_secs: u32,

    /// Gas limit announced for the fee-transfer hook
    pub hook_gas_limit: u64,

    /// Token -> price feed mapping
    pub price_feeds: Vec<PriceFeedEntry>,

    /// Older price observations are used but reported as stale
    pub price_max_age_secs: u64,

    // ========== Thresholds ==========
    /// Minimum USD value of a reward before it is claimed
    pub min_claim_usd: Decimal,

    /// Minimum USD value of a balance before it is swapped
    pub min_swap_usd: Decimal,

    /// Minimum idle balance before `depositIdleTokens` is called
    pub idle_min_usd: Decimal,

    // ========== Optimizer ==========
    /// Yield feed market name (lending side)
    pub yield_market: String,

    /// Yield feed vault name
    pub yield_vault: String,

    /// Percentage points the best APY must improve by before a rebalance
    pub min_improvement_pct: Decimal,

    /// Principal at or below this is not worth moving
    pub dust_threshold: Decimal,

    /// splitMToken + splitVault
    pub split_total: u32,

    // ========== Scheduling ==========
    pub compound_interval_secs: u64,
    pub optimize_interval_secs: u64,
    pub idle_interval_secs: u64,

    // ========== Timeouts & Retries ==========
    pub http_timeout_secs: u64,
    pub rpc_timeout_secs: u64,
    pub receipt_timeout_secs: u64,
    pub max_retries: usize,
}

/// Parse an optional environment variable, failing on malformed values
fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| eyre!("Invalid {}={:?}: {}", key, raw, e)),
        _ => Ok(default),
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_optional<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| eyre!("Invalid {}={:?}: {}", key, raw, e)),
        _ => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables and .env file
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Ok(Self {
            // Network
            rpc_url: env_string("RPC_URL", ""),
            chain_id: env_parse("CHAIN_ID", defaults.chain_id)?,

            // Execution
            execution_mode: match env_string("EXECUTION_MODE", "dry_run")
                .to_lowercase()
                .as_str()
            {
                "production" => ExecutionMode::Production,
                _ => ExecutionMode::DryRun,
            },
            signer_private_key: env::var("SIGNER_PRIVATE_KEY").ok().filter(|k| !k.is_empty()),
            emergency_stop: env_parse("EMERGENCY_STOP", false)?,

            // Services
            database_url: env_string("DATABASE_URL", ""),
            indexer_api_url: env_string("INDEXER_API_URL", ""),
            yield_api_url: env_string("YIELD_API_URL", ""),
            cow_api_url: env_string("COW_API_URL", &defaults.cow_api_url),
            status_port: env_parse("STATUS_PORT", defaults.status_port)?,

            // Swap
            base_asset: env_parse("BASE_ASSET", defaults.base_asset)?,
            settlement_contract: env_parse("SETTLEMENT_CONTRACT", defaults.settlement_contract)?,
            fee_recipient: env_optional("FEE_RECIPIENT")?,
            app_code: env_string("APP_CODE", &defaults.app_code),
            default_slippage_bps: env_parse("DEFAULT_SLIPPAGE_BPS", defaults.default_slippage_bps)?,
            quote_safety_margin_bps: env_parse(
                "QUOTE_SAFETY_MARGIN_BPS",
                defaults.quote_safety_margin_bps,
            )?,
            order_validity_secs: env_parse("ORDER_VALIDITY_SECS", defaults.order_validity_secs)?,
            hook_gas_limit: env_parse("HOOK_GAS_LIMIT", defaults.hook_gas_limit)?,
            price_feeds: match env::var("PRICE_FEEDS") {
                Ok(raw) if !raw.trim().is_empty() => Self::parse_price_feeds(&raw)?,
                _ => defaults.price_feeds,
            },
            price_max_age_secs: env_parse("PRICE_MAX_AGE_SECS", defaults.price_max_age_secs)?,

            // Thresholds
            min_claim_usd: env_parse("MIN_CLAIM_USD", defaults.min_claim_usd)?,
            min_swap_usd: env_parse("MIN_SWAP_USD", defaults.min_swap_usd)?,
            idle_min_usd: env_parse("IDLE_MIN_USD", defaults.idle_min_usd)?,

            // Optimizer
            yield_market: env_string("YIELD_MARKET", &defaults.yield_market),
            yield_vault: env_string("YIELD_VAULT", &defaults.yield_vault),
            min_improvement_pct: env_parse("MIN_IMPROVEMENT_PCT", defaults.min_improvement_pct)?,
            dust_threshold: env_parse("DUST_THRESHOLD", defaults.dust_threshold)?,
            split_total: env_parse("SPLIT_TOTAL", defaults.split_total)?,

            // Scheduling
            compound_interval_secs: env_parse(
                "COMPOUND_INTERVAL_SECS",
                defaults.compound_interval_secs,
            )?,
            optimize_interval_secs: env_parse(
                "OPTIMIZE_INTERVAL_SECS",
                defaults.optimize_interval_secs,
            )?,
            idle_interval_secs: env_parse("IDLE_INTERVAL_SECS", defaults.idle_interval_secs)?,

            // Timeouts
            http_timeout_secs: env_parse("HTTP_TIMEOUT_SECS", defaults.http_timeout_secs)?,
            rpc_timeout_secs: env_parse("RPC_TIMEOUT_SECS", defaults.rpc_timeout_secs)?,
            receipt_timeout_secs: env_parse("RECEIPT_TIMEOUT_SECS", defaults.receipt_timeout_secs)?,
            max_retries: env_parse("MAX_RETRIES", defaults.max_retries)?,
        })
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Self = toml::from_str(&content)?;
        // Secrets never live in the file
        config.signer_private_key = env::var("SIGNER_PRIVATE_KEY").ok().filter(|k| !k.is_empty());
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Parse `token=feed,token=feed`
    pub fn parse_price_feeds(raw: &str) -> Result<Vec<PriceFeedEntry>> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|pair| {
                let (token, feed) = pair
                    .split_once('=')
                    .ok_or_else(|| eyre!("PRICE_FEEDS entry {:?} is not token=feed", pair))?;
                Ok(PriceFeedEntry {
                    token: Address::from_str(token.trim())
                        .map_err(|e| eyre!("Invalid token in PRICE_FEEDS {:?}: {}", token, e))?,
                    feed: Address::from_str(feed.trim())
                        .map_err(|e| eyre!("Invalid feed in PRICE_FEEDS {:?}: {}", feed, e))?,
                })
            })
            .collect()
    }

    /// Validate configuration; any error here is fatal at startup
    pub fn validate(&self) -> Result<()> {
        if self.rpc_url.is_empty() || self.rpc_url.contains("YOUR_API_KEY") {
            return Err(eyre!("Invalid RPC_URL - please set a valid RPC endpoint"));
        }
        if self.database_url.is_empty() {
            return Err(eyre!("DATABASE_URL is required (e.g. sqlite://positions.db)"));
        }
        if self.indexer_api_url.is_empty() {
            return Err(eyre!("INDEXER_API_URL is required"));
        }
        if self.yield_api_url.is_empty() {
            return Err(eyre!("YIELD_API_URL is required"));
        }
        if self.fee_recipient.is_none() {
            return Err(eyre!("FEE_RECIPIENT is required"));
        }

        if self.execution_mode == ExecutionMode::Production && self.signer_private_key.is_none() {
            return Err(eyre!("Production mode requires SIGNER_PRIVATE_KEY"));
        }

        // Sanity checks
        if !(60..=3600).contains(&self.order_validity_secs) {
            return Err(eyre!(
                "ORDER_VALIDITY_SECS must be between 60 and 3600 (currently {})",
                self.order_validity_secs
            ));
        }
        if self.default_slippage_bps + self.quote_safety_margin_bps >= 10_000 {
            return Err(eyre!(
                "DEFAULT_SLIPPAGE_BPS + QUOTE_SAFETY_MARGIN_BPS must stay below 10000"
            ));
        }
        if self.split_total == 0 {
            return Err(eyre!("SPLIT_TOTAL must be positive"));
        }
        if self.min_improvement_pct < Decimal::ZERO || self.dust_threshold < Decimal::ZERO {
            return Err(eyre!("MIN_IMPROVEMENT_PCT and DUST_THRESHOLD must not be negative"));
        }
        if self.compound_interval_secs == 0
            || self.optimize_interval_secs == 0
            || self.idle_interval_secs == 0
        {
            return Err(eyre!("Task intervals must be positive"));
        }
        if self.max_retries == 0 {
            return Err(eyre!("MAX_RETRIES must be at least 1"));
        }

        Ok(())
    }

    /// Registry reward tokens with no configured price feed; their rewards are never claimed
    pub fn unpriced_reward_tokens(&self) -> Vec<Address> {
        let feeds = tokens::build_feed_map(&self.price_feeds);
        tokens::all_tokens()
            .into_iter()
            .filter(|t| t.category == tokens::TokenCategory::Reward && !feeds.contains_key(&t.address))
            .map(|t| t.address)
            .collect()
    }

    /// Retry policy for idempotent HTTP reads
    pub fn http_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_secs(self.http_timeout_secs))
    }

    /// Retry policy for idempotent RPC reads
    pub fn rpc_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_secs(self.rpc_timeout_secs))
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        let set = |v: bool| if v { "✓ Configured" } else { "✗ Not Set" };
        println!("╔════════════════════════════════════════════════════════════╗");
        println!("║              COMPOUNDER - CONFIGURATION                    ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ Execution Mode:    {:^40} ║", self.execution_mode);
        println!("║ Chain ID:          {:^40} ║", self.chain_id);
        println!("║ Signer Key:        {:^40} ║", set(self.signer_private_key.is_some()));
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ THRESHOLDS                                                 ║");
        println!("║ • Min Claim:       ${:<39} ║", self.min_claim_usd);
        println!("║ • Min Swap:        ${:<39} ║", self.min_swap_usd);
        println!("║ • Idle Deposit:    ${:<39} ║", self.idle_min_usd);
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ SWAPS                                                      ║");
        println!("║ • Default Slippage:{:>36} bps ║", self.default_slippage_bps);
        println!("║ • Quote Margin:    {:>36} bps ║", self.quote_safety_margin_bps);
        println!("║ • Order Validity:  {:>38} s ║", self.order_validity_secs);
        println!("║ • Price Feeds:     {:^40} ║", self.price_feeds.len());
        for token in self.unpriced_reward_tokens() {
            println!("║   ⚠ No feed:       {:^40} ║", tokens::label(&token));
        }
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ OPTIMIZER                                                  ║");
        println!("║ • Min Improvement: {:>37} pp ║", self.min_improvement_pct);
        println!("║ • Dust Threshold:  {:^40} ║", self.dust_threshold);
        println!("║ • Split Total:     {:^40} ║", self.split_total);
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ SCHEDULE                                                   ║");
        println!("║ • Compound:        {:>38} s ║", self.compound_interval_secs);
        println!("║ • Optimize:        {:>38} s ║", self.optimize_interval_secs);
        println!("║ • Idle Deposit:    {:>38} s ║", self.idle_interval_secs);
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ SAFETY                                                     ║");
        println!("║ • Emergency Stop:  {:^40} ║",
            if self.emergency_stop { "🛑 ACTIVE" } else { "✓ Inactive" }
        );
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_url: String::new(),
            chain_id: DEFAULT_CHAIN_ID,
            execution_mode: ExecutionMode::DryRun,
            signer_private_key: None,
            emergency_stop: false,
            database_url: String::new(),
            indexer_api_url: String::new(),
            yield_api_url: String::new(),
            cow_api_url: "https://api.cow.fi/base".to_string(),
            status_port: 8080,
            base_asset: tokens::USDC,
            settlement_contract: DEFAULT_SETTLEMENT,
            fee_recipient: None,
            app_code: "compounder".to_string(),
            default_slippage_bps: DEFAULT_SLIPPAGE_BPS,
            quote_safety_margin_bps: 200,
            order_validity_secs: 20 * 60,
            hook_gas_limit: 100_000,
            price_feeds: tokens::default_price_feeds(),
            price_max_age_secs: 86_400,
            min_claim_usd: dec!(1),
            min_swap_usd: dec!(1),
            idle_min_usd: dec!(1),
            yield_market: "USDC".to_string(),
            yield_vault: "USDC".to_string(),
            min_improvement_pct: dec!(1.0),
            dust_threshold: dec!(0.5),
            split_total: 10_000,
            compound_interval_secs: 3_600,
            optimize_interval_secs: 6 * 3_600,
            idle_interval_secs: 1_800,
            http_timeout_secs: 15,
            rpc_timeout_secs: 20,
            receipt_timeout_secs: 180,
            max_retries: 3,
        }
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            rpc_url: "http://localhost:8545".to_string(),
            database_url: "sqlite::memory:".to_string(),
            indexer_api_url: "http://indexer.local".to_string(),
            yield_api_url: "http://yields.local".to_string(),
            fee_recipient: Some(Address::repeat_byte(0xfe)),
            ..Config::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.execution_mode, ExecutionMode::DryRun);
        assert_eq!(config.default_slippage_bps, 30);
        assert_eq!(config.settlement_contract, DEFAULT_SETTLEMENT);
        assert!(!config.price_feeds.is_empty());
    }

    #[test]
    fn test_missing_required_values_are_fatal() {
        assert!(Config::default().validate().is_err());
        assert!(valid_config().validate().is_ok());

        let config = Config { fee_recipient: None, ..valid_config() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_production_requires_signer() {
        let config = Config {
            execution_mode: ExecutionMode::Production,
            ..valid_config()
        };
        assert!(config.validate().is_err());

        let config = Config {
            signer_private_key: Some("0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80".into()),
            ..config
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_order_validity_must_be_short() {
        let config = Config { order_validity_secs: 7 * 86_400, ..valid_config() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reward_tokens_without_feed_are_reported() {
        let config = valid_config();
        let unpriced = config.unpriced_reward_tokens();
        assert!(unpriced.contains(&tokens::WELL));
        assert!(!unpriced.contains(&tokens::USDC));

        let mut feeds = config.price_feeds.clone();
        feeds.push(PriceFeedEntry { token: tokens::WELL, feed: Address::repeat_byte(0xee) });
        let config = Config { price_feeds: feeds, ..config };
        assert!(!config.unpriced_reward_tokens().contains(&tokens::WELL));
    }

    #[test]
    fn test_parse_price_feeds() {
        let feeds = Config::parse_price_feeds(
            "0x1111111111111111111111111111111111111111=0x2222222222222222222222222222222222222222, \
             0x3333333333333333333333333333333333333333=0x4444444444444444444444444444444444444444",
        )
        .unwrap();
        assert_eq!(feeds.len(), 2);
        assert_eq!(feeds[1].feed, Address::repeat_byte(0x44));

        assert!(Config::parse_price_feeds("not-a-pair").is_err());
    }

    #[test]
    fn test_toml_round_trip_drops_secret() {
        let config = Config {
            signer_private_key: Some("secret".into()),
            ..valid_config()
        };
        let text = toml::to_string_pretty(&config).unwrap();
        assert!(!text.contains("secret"));
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.min_improvement_pct, config.min_improvement_pct);
        assert_eq!(parsed.price_feeds, config.price_feeds);
    }
}
