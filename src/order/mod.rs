//! Order Module - intent-based swaps for smart-contract accounts
//!
//! - `codec`: EIP-712 hashing, `GPv2Order.Data` encoding, EIP-1271 validation
//! - `app_data`: order metadata carrying the compound-fee hook
//! - `venue`: order-book API client
//! - `pipeline`: balance -> quote -> order -> validate -> submit

pub mod app_data;
pub mod codec;
pub mod pipeline;
pub mod venue;

pub use codec::{OrderCodec, SwapOrder, Validation};
pub use pipeline::{SwapOutcome, SwapPipeline, SwapSettings};
pub use venue::{CowClient, OrderBook};
