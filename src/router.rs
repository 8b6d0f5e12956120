//! AMM Route Finding & Native Price Oracle
//!
//! `RouteFinder` answers "best route for amount X of token A into token B".
//! The live implementation queries a swap-route HTTP API that returns
//! route-processor call data; the same finder prices tokens in native-asset
//! terms by routing one unit of the token into wrapped native.
//!
//! Created: 2026-10-19

use crate::math::{pow10, ONE18};
use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RouterError {
    #[error("route request failed: {0}")]
    Http(String),
    #[error("route api returned status {0}")]
    Status(u16),
    #[error("route response undecodable: {0}")]
    Decode(String),
}

/// One quoted swap route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Expected output, in `token_out` decimals
    pub amount_out: U256,
    /// Route-processor call data embedded in the settlement call
    pub route_code: Bytes,
    /// Human-readable legs, attached to diagnostics
    pub description: String,
}

#[async_trait]
pub trait RouteFinder: Send + Sync {
    /// Best route or `None` when no liquidity path exists
    async fn find_route(
        &self,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        gas_price: u128,
        recipient: Address,
    ) -> Result<Option<Route>, RouterError>;
}

/// Route API settings
#[derive(Debug, Clone, PartialEq, Deserialize, serde::Serialize)]
pub struct RouterConfig {
    pub api_url: String,
    pub route_processor: Address,
    #[serde(default = "default_max_slippage")]
    pub max_slippage: f64,
    #[serde(default = "default_router_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_max_slippage() -> f64 {
    0.005
}

fn default_router_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapResponse {
    status: String,
    #[serde(default)]
    assumed_amount_out: Option<String>,
    #[serde(default)]
    route_processor_args: Option<RouteProcessorArgs>,
    #[serde(default)]
    route: Vec<RouteLeg>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteProcessorArgs {
    route_code: Bytes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteLeg {
    #[serde(default)]
    pool_name: String,
}

/// Swap-route API client (`GET {api_url}/{chain_id}?tokenIn=..&tokenOut=..`)
pub struct SushiApiRouter {
    client: reqwest::Client,
    chain_id: u64,
    config: RouterConfig,
}

impl SushiApiRouter {
    pub fn new(chain_id: u64, config: RouterConfig) -> Result<Self, RouterError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| RouterError::Http(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            chain_id,
            config,
        })
    }

    fn parse(body: SwapResponse) -> Result<Option<Route>, RouterError> {
        if body.status != "Success" {
            debug!("route api status {}", body.status);
            return Ok(None);
        }
        let amount_out = body
            .assumed_amount_out
            .as_deref()
            .ok_or_else(|| RouterError::Decode("missing assumedAmountOut".to_string()))?
            .parse::<U256>()
            .map_err(|e| RouterError::Decode(format!("assumedAmountOut: {}", e)))?;
        let args = body
            .route_processor_args
            .ok_or_else(|| RouterError::Decode("missing routeProcessorArgs".to_string()))?;
        let description = if body.route.is_empty() {
            "direct".to_string()
        } else {
            body.route
                .iter()
                .map(|leg| leg.pool_name.as_str())
                .collect::<Vec<_>>()
                .join(" > ")
        };
        Ok(Some(Route {
            amount_out,
            route_code: args.route_code,
            description,
        }))
    }
}

#[async_trait]
impl RouteFinder for SushiApiRouter {
    async fn find_route(
        &self,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        gas_price: u128,
        recipient: Address,
    ) -> Result<Option<Route>, RouterError> {
        let url = format!("{}/{}", self.config.api_url.trim_end_matches('/'), self.chain_id);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("tokenIn", token_in.to_string()),
                ("tokenOut", token_out.to_string()),
                ("amount", amount_in.to_string()),
                ("maxSlippage", self.config.max_slippage.to_string()),
                ("gasPrice", gas_price.to_string()),
                ("to", recipient.to_string()),
                ("routeProcessor", self.config.route_processor.to_string()),
                ("includeRoute", "true".to_string()),
            ])
            .send()
            .await
            .map_err(|e| RouterError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RouterError::Status(response.status().as_u16()));
        }
        let body: SwapResponse = response
            .json()
            .await
            .map_err(|e| RouterError::Decode(e.to_string()))?;
        Self::parse(body)
    }
}

/// Price of one whole `token` in native-asset terms, 18-decimal fixed point.
///
/// `Ok(None)` when no route to wrapped native exists.
pub async fn eth_price(
    router: &dyn RouteFinder,
    token: Address,
    decimals: u8,
    wrapped_native: Address,
    gas_price: u128,
    recipient: Address,
) -> Result<Option<U256>, RouterError> {
    if token == wrapped_native {
        return Ok(Some(ONE18));
    }
    let one_unit = pow10(decimals);
    let route = router
        .find_route(token, wrapped_native, one_unit, gas_price, recipient)
        .await?;
    // wrapped native has 18 decimals, so amount_out is already fixed point
    Ok(route.map(|r| r.amount_out))
}
