//! Order Discovery
//!
//! Fetches active orders, groups them into same-token-pair bundles per
//! orderbook and refreshes their quotes every round.
//!
//! Created: 2026-10-19

pub mod quoter;
pub mod subgraph;

pub use quoter::{quote_pairs, MULTICALL3_ADDRESS};
pub use subgraph::SubgraphSource;

use crate::contracts::OrderV3;
use crate::rpc::RpcError;
use crate::types::{order_hash, OrderPairObject, TakeOrder, TokenDetails};
use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, thiserror::Error)]
pub enum OrderSourceError {
    #[error("order source request failed: {0}")]
    Http(String),
    #[error("order source returned status {0}")]
    Status(u16),
    #[error("order source response undecodable: {0}")]
    Decode(String),
    #[error("quote batch failed: {0}")]
    Rpc(#[from] RpcError),
}

/// An active order and the metadata of the tokens it trades
#[derive(Debug, Clone)]
pub struct SourcedOrder {
    pub orderbook: Address,
    pub order: OrderV3,
    /// Known symbols/decimals by token address
    pub tokens: HashMap<Address, TokenDetails>,
}

#[async_trait]
pub trait OrderSource: Send + Sync {
    /// Every active order, in a stable order
    async fn fetch_orders(&self) -> Result<Vec<SourcedOrder>, OrderSourceError>;
}

fn token_details(order: &SourcedOrder, address: Address, decimals: u8) -> TokenDetails {
    order.tokens.get(&address).cloned().unwrap_or(TokenDetails {
        address,
        decimals,
        symbol: "UNKNOWN".to_string(),
    })
}

/// Group every (input, output) IO combination into per-orderbook pairs.
///
/// Pairs keep first-seen order; duplicate orders within a pair are dropped.
/// `orderbooks`, when set, limits the result to those orderbooks.
pub fn bundle_orders(orders: &[SourcedOrder], orderbooks: Option<&[Address]>) -> Vec<OrderPairObject> {
    let mut pairs: Vec<OrderPairObject> = Vec::new();
    let mut index: HashMap<(Address, Address, Address), usize> = HashMap::new();
    let mut seen: HashSet<(usize, B256)> = HashSet::new();

    for sourced in orders {
        if let Some(allowed) = orderbooks {
            if !allowed.contains(&sourced.orderbook) {
                continue;
            }
        }
        let id = order_hash(&sourced.order);
        for (i, input) in sourced.order.validInputs.iter().enumerate() {
            for (j, output) in sourced.order.validOutputs.iter().enumerate() {
                if input.token == output.token {
                    continue;
                }
                let key = (sourced.orderbook, input.token, output.token);
                let slot = *index.entry(key).or_insert_with(|| {
                    pairs.push(OrderPairObject {
                        orderbook: sourced.orderbook,
                        buy_token: token_details(sourced, input.token, input.decimals),
                        sell_token: token_details(sourced, output.token, output.decimals),
                        take_orders: Vec::new(),
                    });
                    pairs.len() - 1
                });
                if seen.insert((slot, id)) {
                    pairs[slot]
                        .take_orders
                        .push(TakeOrder::new(sourced.order.clone(), i, j));
                }
            }
        }
    }
    pairs
}
