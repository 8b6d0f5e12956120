//! Subgraph Order Source
//!
//! Pages through active orders of one or more orderbook subgraphs with a
//! GraphQL POST. `orderBytes` is the ABI encoding of the order struct.

use super::{OrderSource, OrderSourceError, SourcedOrder};
use crate::contracts::OrderV3;
use crate::types::TokenDetails;
use alloy::primitives::{Address, Bytes};
use alloy::sol_types::SolValue;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

const PAGE_SIZE: usize = 1000;

const ORDERS_QUERY: &str = r#"query Orders($first: Int!, $skip: Int!) {
  orders(first: $first, skip: $skip, where: { active: true }, orderBy: timestampAdded, orderDirection: asc) {
    orderHash
    orderBytes
    orderbook { id }
    inputs { token { address decimals symbol } }
    outputs { token { address decimals symbol } }
  }
}"#;

#[derive(Debug, Deserialize)]
struct GraphResponse {
    data: Option<OrdersData>,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OrdersData {
    orders: Vec<SgOrder>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SgOrder {
    order_hash: String,
    order_bytes: Bytes,
    orderbook: SgId,
    #[serde(default)]
    inputs: Vec<SgVault>,
    #[serde(default)]
    outputs: Vec<SgVault>,
}

#[derive(Debug, Deserialize)]
struct SgId {
    id: Address,
}

#[derive(Debug, Deserialize)]
struct SgVault {
    token: SgToken,
}

#[derive(Debug, Deserialize)]
struct SgToken {
    address: Address,
    #[serde(default)]
    decimals: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
}

impl SgOrder {
    fn into_sourced(self) -> Result<SourcedOrder, OrderSourceError> {
        let order = OrderV3::abi_decode(&self.order_bytes)
            .map_err(|e| OrderSourceError::Decode(format!("order {}: {}", self.order_hash, e)))?;
        let mut tokens = HashMap::new();
        for vault in self.inputs.iter().chain(self.outputs.iter()) {
            let token = &vault.token;
            let decimals = token
                .decimals
                .as_deref()
                .and_then(|d| d.parse::<u8>().ok())
                .unwrap_or(18);
            tokens.insert(
                token.address,
                TokenDetails {
                    address: token.address,
                    decimals,
                    symbol: token.symbol.clone().unwrap_or_else(|| "UNKNOWN".to_string()),
                },
            );
        }
        Ok(SourcedOrder {
            orderbook: self.orderbook.id,
            order,
            tokens,
        })
    }
}

/// Active orders from every configured subgraph URL
pub struct SubgraphSource {
    client: reqwest::Client,
    urls: Vec<String>,
}

impl SubgraphSource {
    pub fn new(urls: Vec<String>, timeout: Duration) -> Result<Self, OrderSourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OrderSourceError::Http(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, urls })
    }

    async fn fetch_page(&self, url: &str, skip: usize) -> Result<Vec<SgOrder>, OrderSourceError> {
        let response = self
            .client
            .post(url)
            .json(&json!({
                "query": ORDERS_QUERY,
                "variables": { "first": PAGE_SIZE, "skip": skip },
            }))
            .send()
            .await
            .map_err(|e| OrderSourceError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(OrderSourceError::Status(response.status().as_u16()));
        }
        let body: GraphResponse = response
            .json()
            .await
            .map_err(|e| OrderSourceError::Decode(e.to_string()))?;
        parse_page(body)
    }

    async fn fetch_all(&self, url: &str) -> Result<Vec<SourcedOrder>, OrderSourceError> {
        let mut orders = Vec::new();
        let mut skip = 0;
        loop {
            let page = self.fetch_page(url, skip).await?;
            let count = page.len();
            for sg in page {
                match sg.into_sourced() {
                    Ok(order) => orders.push(order),
                    Err(e) => warn!("skipping order: {}", e),
                }
            }
            if count < PAGE_SIZE {
                break;
            }
            skip += PAGE_SIZE;
        }
        debug!("{} active order(s) from {}", orders.len(), url);
        Ok(orders)
    }
}

fn parse_page(body: GraphResponse) -> Result<Vec<SgOrder>, OrderSourceError> {
    if !body.errors.is_empty() {
        return Err(OrderSourceError::Decode(serde_json::Value::Array(body.errors).to_string()));
    }
    body.data
        .map(|d| d.orders)
        .ok_or_else(|| OrderSourceError::Decode("response has no data".to_string()))
}

#[async_trait]
impl OrderSource for SubgraphSource {
    async fn fetch_orders(&self) -> Result<Vec<SourcedOrder>, OrderSourceError> {
        let mut all = Vec::new();
        let mut last_error = None;
        for url in &self.urls {
            match self.fetch_all(url).await {
                Ok(orders) => all.extend(orders),
                Err(e) => {
                    warn!("subgraph {} failed: {}", url, e);
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            // every source failed
            Some(e) if all.is_empty() => Err(e),
            _ => Ok(all),
        }
    }
}
