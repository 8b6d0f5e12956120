//! Route-Processor Mode
//!
//! Takes the pair's best order and sells what it outputs back through an AMM
//! route into the order's input token, all inside one `arb3` call. The
//! route's call data rides in `TakeOrdersConfigV3.data`.

use super::estimate::{estimate_with_guard, rpc_failure};
use super::search::{binary_search, Dryrun, DryrunFailure, DryrunHalt, FailureKind, HaltReason};
use super::{OppContext, PairPrices};
use crate::contracts::{IArbV4, TakeOrdersConfigV3};
use crate::math::{div18, mul18, scale_from_18, scale_to_18};
use crate::task::Guard;
use crate::types::{ModeKind, Opportunity, OrderPairObject, RawTx, SpanAttributes};
use alloy::primitives::U256;
use alloy::sol_types::{SolCall, SolValue};
use async_trait::async_trait;
use serde_json::json;

/// Counterparty key used in aggregated diagnostics
pub const COUNTERPARTY: &str = "route-processor";

/// Expected bounty: route output minus what the order asks, valued in native
pub fn estimate_profit(max_input: U256, market_price: U256, order_ratio: U256, input_to_eth_price: U256) -> U256 {
    let market_amount_out = mul18(max_input, market_price);
    let order_input = mul18(max_input, order_ratio);
    mul18(market_amount_out.saturating_sub(order_input), input_to_eth_price)
}

pub struct RouteProcessorDryrun<'a> {
    pub ctx: &'a OppContext,
    pub pair: &'a OrderPairObject,
    pub prices: &'a PairPrices,
}

#[async_trait]
impl Dryrun for RouteProcessorDryrun<'_> {
    async fn dryrun(&self, max_input: U256) -> Result<Opportunity, DryrunFailure> {
        let ctx = self.ctx;
        let pair = self.pair;
        let config = &ctx.config;
        let take_order = pair.best().ok_or_else(DryrunFailure::no_route)?;

        let block = ctx
            .client
            .block_number()
            .await
            .map_err(|e| rpc_failure(&e))?;

        let amount_in = scale_from_18(max_input, pair.sell_token.decimals);
        let route = ctx
            .router
            .find_route(
                pair.sell_token.address,
                pair.buy_token.address,
                amount_in,
                self.prices.gas_price,
                config.arb_address,
            )
            .await
            .map_err(|e| DryrunFailure::new(FailureKind::NodeError, e.to_string()).with_block(block))?
            .ok_or_else(|| DryrunFailure::no_route().with_block(block))?;

        let amount_out = scale_to_18(route.amount_out, pair.buy_token.decimals);
        let market_price = div18(amount_out, max_input);
        let order_ratio = take_order.ratio();
        if market_price < order_ratio {
            return Err(DryrunFailure::new(
                FailureKind::Revert,
                "order's ratio greater than market price",
            )
            .with_block(block)
            .with_market_price(Some(market_price))
            .with_route(route.description.clone()));
        }

        let take_orders = TakeOrdersConfigV3 {
            minimumInput: U256::from(1),
            maximumInput: amount_in,
            maximumIORatio: if config.max_ratio { U256::MAX } else { market_price },
            orders: vec![take_order.take_order.clone()],
            data: route.route_code.abi_encode().into(),
        };

        let guard = Guard::Bounty {
            input_to_eth_price: self.prices.input_to_eth_price,
            output_to_eth_price: self.prices.output_to_eth_price,
            sender: ctx.client.address(),
        };
        let gas_price = self.prices.gas_price;
        let arb_address = config.arb_address;
        let orderbook = pair.orderbook;
        let build = |task| {
            let data = IArbV4::arb3Call {
                orderBook: orderbook,
                takeOrders: take_orders.clone(),
                task,
            }
            .abi_encode();
            RawTx::new(arb_address, data.into(), gas_price)
        };

        let estimated = estimate_with_guard(ctx, &guard, gas_price, block, build)
            .await
            .map_err(|f| {
                f.with_market_price(Some(market_price))
                    .with_route(route.description.clone())
            })?;

        let estimated_profit =
            estimate_profit(max_input, market_price, order_ratio, self.prices.input_to_eth_price);

        let mut attributes = SpanAttributes::new();
        attributes.insert("route".to_string(), json!(route.description));
        attributes.insert("marketPrice".to_string(), json!(market_price.to_string()));
        attributes.insert("maxInput".to_string(), json!(max_input.to_string()));
        attributes.insert("blockNumber".to_string(), json!(block));
        attributes.insert("gasCost".to_string(), json!(estimated.gas_cost.to_string()));

        Ok(Opportunity {
            mode: ModeKind::RouteProcessor,
            rawtx: estimated.rawtx,
            maximum_input: max_input,
            opp_block_number: block,
            estimated_profit,
            estimated_gas_cost: estimated.gas_cost,
            take_orders_config: Some(take_orders),
            counterparty: COUNTERPARTY.to_string(),
            orders: vec![take_order.id],
            attributes,
        })
    }
}

/// Search the AMM counterparty for `pair`
pub async fn find_opp(
    ctx: &OppContext,
    pair: &OrderPairObject,
    prices: &PairPrices,
) -> Result<Opportunity, DryrunHalt> {
    let max_input = pair.best().map(|o| o.max_output()).unwrap_or_default();
    if max_input.is_zero() {
        return Err(DryrunHalt::new(HaltReason::NoOpportunity));
    }
    let engine = RouteProcessorDryrun { ctx, pair, prices };
    binary_search(&engine, max_input, &ctx.config.search).await
}
