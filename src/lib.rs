//! Compounder - reward harvesting and yield rebalancing keeper
//!
//! Three periodic tasks share one signer:
//! - `compound-rewards`: claim rewards worth claiming, sell them for the base asset
//! - `optimize-positions`: move each strategy to the better-paying yield source
//! - `deposit-idle`: put idle balances back to work

pub mod chain;
pub mod compounder;
pub mod config;
pub mod error;
pub mod executor;
pub mod indexer;
pub mod optimizer;
pub mod oracle;
pub mod order;
pub mod retry;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod tokens;
pub mod types;

#[cfg(test)]
pub mod testkit;
