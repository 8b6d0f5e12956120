//! Pair Pipeline
//!
//! One round: fetch orders, bundle, quote, then push every pair through
//!     quote check → gas price → native prices → find_opp → submit
//! with a bounded number of pairs in flight. Every pair ends in a report
//! or a typed halt; nothing is dropped silently.
//!
//! Created: 2026-10-19

use crate::arbitrage::{find_opp_with_retries, submit, FindOppError, OppContext, PairPrices, SubmitConfig, SubmitHalt, SubmitReport};
use crate::orders::{bundle_orders, quote_pairs, OrderSource, OrderSourceError};
use crate::router::eth_price;
use crate::types::{OrderPairObject, SpanAttributes, TokenDetails};
use alloy::primitives::{Address, U256};
use futures::stream::{self, StreamExt};
use serde_json::json;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Round-level settings on top of the engine context
#[derive(Clone)]
pub struct ProcessContext {
    pub opp: OppContext,
    pub submit: SubmitConfig,
    pub wrapped_native: Address,
    pub multicall: Address,
    /// Applied to the node's gas price, percent
    pub gas_price_multiplier: u64,
    pub concurrency: usize,
    pub orderbooks: Option<Vec<Address>>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProcessHalt {
    #[error("no quoted output")]
    ZeroOutput,
    #[error("failed to get gas price: {0}")]
    FailedToGetGasPrice(String),
    #[error("failed to get native price of {token}: {error}")]
    FailedToGetEthPrice { token: String, error: String },
    #[error(transparent)]
    NoOpportunity(#[from] FindOppError),
    #[error(transparent)]
    Submit(#[from] SubmitHalt),
}

impl ProcessHalt {
    /// Diagnostics bag for logging
    pub fn attributes(&self) -> SpanAttributes {
        let mut attrs = match self {
            ProcessHalt::NoOpportunity(e) => e.attributes.clone(),
            ProcessHalt::Submit(h) => h.attributes(),
            _ => SpanAttributes::new(),
        };
        attrs.insert("halt".to_string(), json!(self.to_string()));
        attrs
    }
}

/// A settled pair
#[derive(Debug, Clone)]
pub struct PairReport {
    pub prices: PairPrices,
    pub report: SubmitReport,
}

/// Outcome of one pair in a round
#[derive(Debug)]
pub struct PairOutcome {
    pub pair: String,
    pub orderbook: Address,
    pub result: Result<PairReport, ProcessHalt>,
    pub elapsed_ms: u128,
}

async fn token_price(
    pctx: &ProcessContext,
    token: &TokenDetails,
    gas_price: u128,
) -> Result<U256, ProcessHalt> {
    let ctx = &pctx.opp;
    let fail = |error: String| ProcessHalt::FailedToGetEthPrice {
        token: token.symbol.clone(),
        error,
    };
    let price = eth_price(
        ctx.router.as_ref(),
        token.address,
        token.decimals,
        pctx.wrapped_native,
        gas_price,
        ctx.client.address(),
    )
    .await;
    match price {
        Ok(Some(price)) => Ok(price),
        // only the guard needs prices; without coverage zero is fine
        _ if ctx.config.gas_coverage_percentage == 0 => Ok(U256::ZERO),
        Ok(None) => Err(fail("no route to wrapped native".to_string())),
        Err(e) => Err(fail(e.to_string())),
    }
}

/// Gas price with the configured multiplier applied
pub async fn pair_prices(pctx: &ProcessContext, pair: &OrderPairObject) -> Result<PairPrices, ProcessHalt> {
    let ctx = &pctx.opp;
    let node_price = ctx
        .client
        .gas_price()
        .await
        .map_err(|e| ProcessHalt::FailedToGetGasPrice(e.to_string()))?;
    let gas_price = node_price.saturating_mul(pctx.gas_price_multiplier as u128) / 100;

    let input_to_eth_price = token_price(pctx, &pair.buy_token, gas_price).await?;
    let output_to_eth_price = token_price(pctx, &pair.sell_token, gas_price).await?;
    Ok(PairPrices {
        gas_price,
        input_to_eth_price,
        output_to_eth_price,
    })
}

/// Find and settle the best opportunity for `pair`
pub async fn process_pair(
    pctx: &ProcessContext,
    pair: &OrderPairObject,
    all_pairs: &[OrderPairObject],
) -> Result<PairReport, ProcessHalt> {
    let has_output = pair
        .best()
        .map(|o| !o.max_output().is_zero())
        .unwrap_or(false);
    if !has_output {
        return Err(ProcessHalt::ZeroOutput);
    }

    let prices = pair_prices(pctx, pair).await?;
    debug!(
        "{}: gas price {} | input price {} | output price {}",
        pair.symbol(),
        prices.gas_price,
        prices.input_to_eth_price,
        prices.output_to_eth_price
    );

    let opp = find_opp_with_retries(&pctx.opp, pair, all_pairs, &prices).await?;
    info!(
        "💰 {} {} opportunity: max input {} | est. profit {} | est. gas {}",
        pair.symbol(),
        opp.mode,
        opp.maximum_input,
        opp.estimated_profit,
        opp.estimated_gas_cost
    );

    let report = submit(pctx.opp.client.as_ref(), &opp, pair, &prices, &pctx.submit).await?;
    Ok(PairReport { prices, report })
}

/// Process every pair, at most `concurrency` at a time, results in input order
pub async fn arb_round(pctx: &ProcessContext, pairs: &[OrderPairObject]) -> Vec<PairOutcome> {
    stream::iter(pairs.iter())
        .map(|pair| async move {
            let start = Instant::now();
            let result = process_pair(pctx, pair, pairs).await;
            PairOutcome {
                pair: pair.symbol(),
                orderbook: pair.orderbook,
                result,
                elapsed_ms: start.elapsed().as_millis(),
            }
        })
        .buffered(pctx.concurrency.max(1))
        .collect()
        .await
}

/// Fetch, bundle and quote the current order set
pub async fn prepare_pairs(
    pctx: &ProcessContext,
    source: &dyn OrderSource,
) -> Result<Vec<OrderPairObject>, OrderSourceError> {
    let orders = source.fetch_orders().await?;
    let mut pairs = bundle_orders(&orders, pctx.orderbooks.as_deref());
    quote_pairs(pctx.opp.client.as_ref(), pctx.multicall, &mut pairs).await?;
    info!("📊 {} order(s) in {} pair(s)", orders.len(), pairs.len());
    Ok(pairs)
}

/// One full round; logs every outcome and returns them
pub async fn run_round(
    pctx: &ProcessContext,
    source: &dyn OrderSource,
) -> Result<Vec<PairOutcome>, OrderSourceError> {
    let pairs = prepare_pairs(pctx, source).await?;
    let outcomes = arb_round(pctx, &pairs).await;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(report) => info!(
                pair = %outcome.pair,
                orderbook = %outcome.orderbook,
                elapsed_ms = outcome.elapsed_ms as u64,
                attributes = %json!(report.report.attributes()),
                "✅ cleared"
            ),
            Err(ProcessHalt::ZeroOutput) => debug!("{}: no quoted output", outcome.pair),
            Err(halt) => warn!(
                pair = %outcome.pair,
                orderbook = %outcome.orderbook,
                elapsed_ms = outcome.elapsed_ms as u64,
                attributes = %json!(halt.attributes()),
                "{}",
                halt
            ),
        }
    }
    Ok(outcomes)
}
