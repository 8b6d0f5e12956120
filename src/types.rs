// Core data structures shared by order discovery, the opportunity engines
// and submission.

use crate::contracts::{OrderV3, TakeOrderConfigV3};
use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::sol_types::SolValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Key/value diagnostics bag attached to every halt and report
pub type SpanAttributes = BTreeMap<String, serde_json::Value>;

/// Token identity and metadata
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenDetails {
    pub address: Address,
    pub decimals: u8,
    pub symbol: String,
}

/// Order's self-declared max output and io ratio, both 18-decimal fixed point.
/// Read fresh every round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Quote {
    pub max_output: U256,
    pub ratio: U256,
}

/// One order with the IO pair it is taken on
#[derive(Debug, Clone)]
pub struct TakeOrder {
    /// keccak256(abi.encode(order))
    pub id: B256,
    pub take_order: TakeOrderConfigV3,
    pub quote: Option<Quote>,
}

impl TakeOrder {
    pub fn new(order: OrderV3, input_io_index: usize, output_io_index: usize) -> Self {
        Self {
            id: order_hash(&order),
            take_order: TakeOrderConfigV3 {
                order,
                inputIOIndex: U256::from(input_io_index),
                outputIOIndex: U256::from(output_io_index),
                signedContext: vec![],
            },
            quote: None,
        }
    }

    pub fn order(&self) -> &OrderV3 {
        &self.take_order.order
    }

    pub fn owner(&self) -> Address {
        self.take_order.order.owner
    }

    pub fn input_io_index(&self) -> usize {
        self.take_order.inputIOIndex.saturating_to::<usize>()
    }

    pub fn output_io_index(&self) -> usize {
        self.take_order.outputIOIndex.saturating_to::<usize>()
    }

    /// Quoted max output, zero when not quoted yet
    pub fn max_output(&self) -> U256 {
        self.quote.map(|q| q.max_output).unwrap_or_default()
    }

    /// Quoted ratio, zero when not quoted yet
    pub fn ratio(&self) -> U256 {
        self.quote.map(|q| q.ratio).unwrap_or_default()
    }
}

/// Same-token-pair take orders on one orderbook.
///
/// `buy_token` is the orders' input token (what the bot pays the order),
/// `sell_token` the orders' output token (what the bot receives).
#[derive(Debug, Clone)]
pub struct OrderPairObject {
    pub orderbook: Address,
    pub buy_token: TokenDetails,
    pub sell_token: TokenDetails,
    pub take_orders: Vec<TakeOrder>,
}

impl OrderPairObject {
    /// Pair label in "SELL/BUY" form
    pub fn symbol(&self) -> String {
        format!("{}/{}", self.buy_token.symbol, self.sell_token.symbol)
    }

    /// True when `other` trades the reverse direction of this pair
    pub fn is_opposing(&self, other: &OrderPairObject) -> bool {
        self.buy_token.address == other.sell_token.address
            && self.sell_token.address == other.buy_token.address
    }

    /// First (best ratio after quoting) take order
    pub fn best(&self) -> Option<&TakeOrder> {
        self.take_orders.first()
    }
}

/// Interpreter/store/deployer triple of an expression engine instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispair {
    pub interpreter: Address,
    pub store: Address,
    pub deployer: Address,
}

/// Fully formed transaction ready for signing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTx {
    pub to: Address,
    pub data: Bytes,
    pub gas_price: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
}

impl RawTx {
    pub fn new(to: Address, data: Bytes, gas_price: u128) -> Self {
        Self {
            to,
            data,
            gas_price,
            gas: None,
            from: None,
        }
    }

    /// Serialized form attached to diagnostics
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Settlement strategies the engine searches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModeKind {
    RouteProcessor,
    InterOrderbook,
    IntraOrderbook,
}

impl ModeKind {
    /// Prefix used when merging per-mode diagnostics
    pub fn attribute_prefix(&self) -> &'static str {
        match self {
            ModeKind::RouteProcessor => "routeProcessor",
            ModeKind::InterOrderbook => "interOrderbook",
            ModeKind::IntraOrderbook => "intraOrderbook",
        }
    }
}

impl fmt::Display for ModeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ModeKind::RouteProcessor => write!(f, "route-processor"),
            ModeKind::InterOrderbook => write!(f, "inter-orderbook"),
            ModeKind::IntraOrderbook => write!(f, "intra-orderbook"),
        }
    }
}

/// A found, gas-checked opportunity ready for submission
#[derive(Debug, Clone)]
pub struct Opportunity {
    pub mode: ModeKind,
    pub rawtx: RawTx,
    /// Accepted search size, 18 decimals; onchain limits are in token decimals
    pub maximum_input: U256,
    /// Block observed when the winning dryrun ran
    pub opp_block_number: u64,
    /// Estimated bounty in native-asset terms (18 decimals)
    pub estimated_profit: U256,
    /// Estimated gas cost in native-asset terms
    pub estimated_gas_cost: U256,
    /// Set for modes that go through takeOrders
    pub take_orders_config: Option<crate::contracts::TakeOrdersConfigV3>,
    /// Route or opposing order/orderbook description
    pub counterparty: String,
    /// Ids of every order the trade clears
    pub orders: Vec<B256>,
    pub attributes: SpanAttributes,
}

/// Receipt fields the solver reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub transaction_hash: B256,
    pub status: bool,
    pub gas_used: u64,
    pub effective_gas_price: u128,
    pub block_number: Option<u64>,
}

/// keccak256(abi.encode(order)), the orderbook's order id
pub fn order_hash(order: &OrderV3) -> B256 {
    keccak256(order.abi_encode())
}
