//! Order Protocol Codec
//!
//! Builds sell orders, hashes them under the settlement contract's EIP-712
//! domain, ABI-encodes them as the `GPv2Order.Data` tuple and asks the
//! strategy contract (EIP-1271) whether it would accept them.

use alloy_primitives::{keccak256, Address, Bytes, FixedBytes, B256, U256};
use alloy_sol_types::{eip712_domain, sol, Eip712Domain, SolStruct, SolValue};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::chain::ChainReader;
use crate::error::{is_stale_oracle_reason, ChainError, CompounderError};

/// `bytes4(keccak256("isValidSignature(bytes32,bytes)"))`
pub const ERC1271_MAGIC_VALUE: FixedBytes<4> = FixedBytes([0x16, 0x26, 0xba, 0x7e]);

pub const KIND_SELL: &str = "sell";
pub const BALANCE_ERC20: &str = "erc20";

sol! {
    /// Order as typed for EIP-712 hashing
    struct Order {
        address sellToken;
        address buyToken;
        address receiver;
        uint256 sellAmount;
        uint256 buyAmount;
        uint32 validTo;
        bytes32 appData;
        uint256 feeAmount;
        string kind;
        bool partiallyFillable;
        string sellTokenBalance;
        string buyTokenBalance;
    }

    /// Order as laid out for the settlement contract; markers are hashed
    struct GPv2OrderData {
        address sellToken;
        address buyToken;
        address receiver;
        uint256 sellAmount;
        uint256 buyAmount;
        uint32 validTo;
        bytes32 appData;
        uint256 feeAmount;
        bytes32 kind;
        bool partiallyFillable;
        bytes32 sellTokenBalance;
        bytes32 buyTokenBalance;
    }
}

/// A fill-or-kill sell order from ERC-20 balance to ERC-20 balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapOrder {
    pub sell_token: Address,
    pub buy_token: Address,
    pub receiver: Address,
    pub sell_amount: U256,
    pub buy_amount: U256,
    pub valid_to: u32,
    pub app_data: B256,
    pub fee_amount: U256,
}

impl SwapOrder {
    pub fn to_typed(&self) -> Order {
        Order {
            sellToken: self.sell_token,
            buyToken: self.buy_token,
            receiver: self.receiver,
            sellAmount: self.sell_amount,
            buyAmount: self.buy_amount,
            validTo: self.valid_to,
            appData: self.app_data,
            feeAmount: self.fee_amount,
            kind: KIND_SELL.to_string(),
            partiallyFillable: false,
            sellTokenBalance: BALANCE_ERC20.to_string(),
            buyTokenBalance: BALANCE_ERC20.to_string(),
        }
    }

    pub fn to_order_data(&self) -> GPv2OrderData {
        GPv2OrderData {
            sellToken: self.sell_token,
            buyToken: self.buy_token,
            receiver: self.receiver,
            sellAmount: self.sell_amount,
            buyAmount: self.buy_amount,
            validTo: self.valid_to,
            appData: self.app_data,
            feeAmount: self.fee_amount,
            kind: keccak256(KIND_SELL),
            partiallyFillable: false,
            sellTokenBalance: keccak256(BALANCE_ERC20),
            buyTokenBalance: keccak256(BALANCE_ERC20),
        }
    }
}

/// Inputs for a sell order whose compound fee is paid out of the sold amount.
#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub sell_token: Address,
    pub buy_token: Address,
    pub receiver: Address,
    /// Amount before the compound fee is taken
    pub gross_sell_amount: U256,
    pub compound_fee: U256,
    pub min_buy_amount: U256,
    pub valid_to: u32,
    pub app_data: B256,
}

impl OrderDraft {
    pub fn build(self) -> Result<SwapOrder, CompounderError> {
        let sell_amount = net_sell_amount(self.gross_sell_amount, self.compound_fee)?;
        Ok(SwapOrder {
            sell_token: self.sell_token,
            buy_token: self.buy_token,
            receiver: self.receiver,
            sell_amount,
            buy_amount: self.min_buy_amount,
            valid_to: self.valid_to,
            app_data: self.app_data,
            // Venue fee is priced into the limit
            fee_amount: U256::ZERO,
        })
    }
}

/// `sell - fee`, refusing a fee that would consume the whole sale.
pub fn net_sell_amount(sell: U256, fee: U256) -> Result<U256, CompounderError> {
    if fee >= sell {
        return Err(CompounderError::FeeExceedsSellAmount { fee, sell });
    }
    Ok(sell - fee)
}

/// Outcome of the EIP-1271 check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid,
    /// The strategy's price check hit a stale feed; the order goes out anyway
    ProvisionallyValid { reason: String },
    Invalid { reason: String },
}

impl Validation {
    pub fn may_submit(&self) -> bool {
        !matches!(self, Validation::Invalid { .. })
    }
}

pub struct OrderCodec {
    chain: Arc<dyn ChainReader>,
    domain: Eip712Domain,
    default_slippage_bps: u32,
}

impl OrderCodec {
    pub fn new(
        chain: Arc<dyn ChainReader>,
        chain_id: u64,
        settlement: Address,
        default_slippage_bps: u32,
    ) -> Self {
        Self {
            chain,
            domain: settlement_domain(chain_id, settlement),
            default_slippage_bps,
        }
    }

    pub fn domain(&self) -> &Eip712Domain {
        &self.domain
    }

    /// The strategy's slippage setting, or the default when it cannot be read.
    pub async fn slippage_bps(&self, strategy: Address) -> u32 {
        match self.chain.allowed_slippage_bps(strategy).await {
            Ok(bps) => bps,
            Err(e) => {
                warn!(
                    %strategy,
                    error = %e,
                    default = self.default_slippage_bps,
                    "could not read allowedSlippageInBps, using default"
                );
                self.default_slippage_bps
            }
        }
    }

    /// `keccak256(0x1901 || domainSeparator || structHash)`
    pub fn digest(&self, order: &SwapOrder) -> B256 {
        order.to_typed().eip712_signing_hash(&self.domain)
    }

    /// The `signature` argument handed to `isValidSignature`.
    pub fn encode(order: &SwapOrder) -> Bytes {
        Bytes::from(order.to_order_data().abi_encode())
    }

    /// Ask the strategy whether it accepts the order.
    ///
    /// Reverts are classified into a verdict; only transport failures are errors.
    pub async fn validate(&self, strategy: Address, order: &SwapOrder) -> Result<Validation, ChainError> {
        let digest = self.digest(order);
        let verdict = match self
            .chain
            .is_valid_signature(strategy, digest, Self::encode(order))
            .await
        {
            Ok(magic) if magic == ERC1271_MAGIC_VALUE => Validation::Valid,
            Ok(other) => Validation::Invalid {
                reason: format!("unexpected return value {}", other),
            },
            Err(ChainError::Revert(reason)) if is_stale_oracle_reason(&reason) => {
                Validation::ProvisionallyValid { reason }
            }
            Err(ChainError::Revert(reason)) => Validation::Invalid { reason },
            Err(e) => return Err(e),
        };
        debug!(%strategy, %digest, ?verdict, "order validated");
        Ok(verdict)
    }
}

pub fn settlement_domain(chain_id: u64, settlement: Address) -> Eip712Domain {
    eip712_domain! {
        name: "Gnosis Protocol",
        version: "v2",
        chain_id: chain_id,
        verifying_contract: settlement,
    }
}
