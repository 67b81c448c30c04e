//! Token definitions for the Compounder (Base mainnet)
//!
//! The registry only carries what valuation needs: symbol, decimals and a
//! default USD price feed where one is known. Feeds for other reward tokens
//! are supplied through `PRICE_FEEDS`.

use alloy_primitives::{address, Address};
use std::collections::HashMap;

use crate::config::PriceFeedEntry;

/// Represents a token the keeper knows about
#[derive(Debug, Clone)]
pub struct Token {
    pub symbol: &'static str,
    pub address: Address,
    pub decimals: u8,
    pub category: TokenCategory,
    /// Chainlink-style USD aggregator, if a default is known
    pub usd_feed: Option<Address>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCategory {
    /// Assets strategies hold as principal
    Base,

    /// Incentive tokens paid out by markets and vaults
    Reward,

    Volatile,
}

// ============================================
// ADDRESSES
// ============================================

pub const USDC: Address = address!("833589fCD6eDb6E08f4c7C32D4f71b54bdA02913");
pub const WETH: Address = address!("4200000000000000000000000000000000000006");
pub const WELL: Address = address!("A88594D404727625A9437C3f886C7643872296AE");
pub const MORPHO: Address = address!("BAa5CC21fd487B8Fcc2F632f3F4E8D37262a0842");
pub const CBBTC: Address = address!("cbB7C0000aB88B473b1f5aFd9ef808440eed33Bf");

const ETH_USD_FEED: Address = address!("71041dddad3595F9CEd3DcCFBe3D1F4b0a16Bb70");
const USDC_USD_FEED: Address = address!("7e860098F58bBFC8648a4311b374B1D669a2bc6B");

pub fn all_tokens() -> Vec<Token> {
    vec![
        Token {
            symbol: "USDC",
            address: USDC,
            decimals: 6,
            category: TokenCategory::Base,
            usd_feed: Some(USDC_USD_FEED),
        },
        Token {
            symbol: "WETH",
            address: WETH,
            decimals: 18,
            category: TokenCategory::Base,
            usd_feed: Some(ETH_USD_FEED),
        },
        Token {
            symbol: "cbBTC",
            address: CBBTC,
            decimals: 8,
            category: TokenCategory::Volatile,
            usd_feed: None,
        },
        Token {
            symbol: "WELL",
            address: WELL,
            decimals: 18,
            category: TokenCategory::Reward,
            usd_feed: None,
        },
        Token {
            symbol: "MORPHO",
            address: MORPHO,
            decimals: 18,
            category: TokenCategory::Reward,
            usd_feed: None,
        },
    ]
}

// ============================================
// LOOKUPS
// ============================================

/// Get token by address
pub fn get_token(address: &Address) -> Option<Token> {
    all_tokens().into_iter().find(|t| t.address == *address)
}

/// Get token symbol by address
pub fn get_symbol(address: &Address) -> Option<&'static str> {
    get_token(address).map(|t| t.symbol)
}

/// Decimals from the registry; `None` means ask the token contract
pub fn known_decimals(address: &Address) -> Option<u8> {
    get_token(address).map(|t| t.decimals)
}

/// Human label for logs: symbol when known, address otherwise
pub fn label(address: &Address) -> String {
    get_symbol(address)
        .map(str::to_string)
        .unwrap_or_else(|| address.to_string())
}

/// Feeds the registry knows by default
pub fn default_price_feeds() -> Vec<PriceFeedEntry> {
    all_tokens()
        .into_iter()
        .filter_map(|t| t.usd_feed.map(|feed| PriceFeedEntry { token: t.address, feed }))
        .collect()
}

/// Token -> feed map, later entries overriding earlier ones
pub fn build_feed_map(entries: &[PriceFeedEntry]) -> HashMap<Address, Address> {
    entries.iter().map(|e| (e.token, e.feed)).collect()
}
