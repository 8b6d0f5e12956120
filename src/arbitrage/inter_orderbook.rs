//! Inter-Orderbook Mode
//!
//! Counter-trade is the best opposing order resting on a different orderbook.
//! The outer `arb3` takes our order on its orderbook; its `data` carries an
//! inner `takeOrders2` against the opposing orderbook, sized so the opposing
//! side supplies exactly what our order asks for.

use super::estimate::{estimate_with_guard, rpc_failure};
use super::search::{binary_search, Dryrun, DryrunFailure, DryrunHalt, FailureKind, HaltReason};
use super::{OppContext, PairPrices};
use crate::contracts::{IArbV4, IOrderBookV4, TakeOrdersConfigV3};
use crate::math::{div18, mul18, scale_from_18, ONE18};
use crate::task::Guard;
use crate::types::{ModeKind, Opportunity, OrderPairObject, RawTx, SpanAttributes, TakeOrder};
use alloy::primitives::{Bytes, U256};
use alloy::sol_types::{SolCall, SolValue};
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Value};
use tracing::debug;

/// Opposing side limits derived from our order's ratio.
///
/// Returns `(maximum_input, maximum_io_ratio)` for the opposing take: it must
/// output at most what our order wants as input, at a ratio no worse than the
/// inverse of ours. A zero ratio leaves both unbounded. Both values are 18
/// decimals; the input limit is scaled to the token before it goes onchain.
pub fn opposing_limits(max_input: U256, order_ratio: U256) -> (U256, U256) {
    if order_ratio.is_zero() {
        (U256::MAX, U256::MAX)
    } else {
        (mul18(max_input, order_ratio), div18(ONE18, order_ratio))
    }
}

/// Token-decimal take limit; an unbounded limit stays unbounded
fn onchain_limit(amount_18: U256, decimals: u8) -> U256 {
    if amount_18 == U256::MAX {
        U256::MAX
    } else {
        scale_from_18(amount_18, decimals)
    }
}

/// True when the two orders' ratios can clear against each other
pub fn ratios_cross(order: &TakeOrder, opposing: &TakeOrder) -> bool {
    let (_, max_io_ratio) = opposing_limits(U256::from(1), order.ratio());
    opposing.ratio() <= max_io_ratio
}

/// Bounty from clearing `order` against `opposing` at `max_input`, in native.
///
/// Input side: what the opposing order pays us beyond what our order takes.
/// Output side: what our order pays us beyond what the opposing order takes.
pub fn estimate_profit(
    max_input: U256,
    order: &TakeOrder,
    opposing: &TakeOrder,
    input_to_eth_price: U256,
    output_to_eth_price: U256,
) -> U256 {
    let order_output = max_input;
    let order_input = mul18(max_input, order.ratio());
    let opposing_output = order_input.min(opposing.max_output());
    let opposing_input = mul18(opposing_output, opposing.ratio());

    let input_profit = opposing_output.saturating_sub(order_input);
    let output_profit = order_output.saturating_sub(opposing_input);
    mul18(input_profit, input_to_eth_price).saturating_add(mul18(output_profit, output_to_eth_price))
}

pub struct InterOrderbookDryrun<'a> {
    pub ctx: &'a OppContext,
    pub pair: &'a OrderPairObject,
    pub opposing: &'a OrderPairObject,
    pub prices: &'a PairPrices,
}

#[async_trait]
impl Dryrun for InterOrderbookDryrun<'_> {
    async fn dryrun(&self, max_input: U256) -> Result<Opportunity, DryrunFailure> {
        let ctx = self.ctx;
        let config = &ctx.config;
        let arb_address = config
            .generic_arb_address
            .ok_or_else(|| DryrunFailure::new(FailureKind::Fatal, "generic arb address not configured"))?;
        let order = self.pair.best().ok_or_else(DryrunFailure::no_route)?;
        let opposing = self.opposing.best().ok_or_else(DryrunFailure::no_route)?;
        if !ratios_cross(order, opposing) {
            return Err(DryrunFailure::no_route());
        }

        let block = ctx
            .client
            .block_number()
            .await
            .map_err(|e| rpc_failure(&e))?;

        let order_ratio = order.ratio();
        let (opposing_max_input, opposing_max_io_ratio) = opposing_limits(max_input, order_ratio);
        let inner = IOrderBookV4::takeOrders2Call {
            config: TakeOrdersConfigV3 {
                minimumInput: U256::from(1),
                maximumInput: onchain_limit(opposing_max_input, self.pair.buy_token.decimals),
                maximumIORatio: opposing_max_io_ratio,
                orders: vec![opposing.take_order.clone()],
                data: Bytes::new(),
            },
        }
        .abi_encode();

        let take_orders = TakeOrdersConfigV3 {
            minimumInput: U256::from(1),
            maximumInput: scale_from_18(max_input, self.pair.sell_token.decimals),
            maximumIORatio: if config.max_ratio { U256::MAX } else { order_ratio },
            orders: vec![order.take_order.clone()],
            data: (self.opposing.orderbook, self.opposing.orderbook, Bytes::from(inner))
                .abi_encode_params()
                .into(),
        };

        let market_price = if opposing.ratio().is_zero() {
            None
        } else {
            Some(div18(ONE18, opposing.ratio()))
        };
        let counterparty = self.opposing.orderbook.to_string();

        let guard = Guard::Bounty {
            input_to_eth_price: self.prices.input_to_eth_price,
            output_to_eth_price: self.prices.output_to_eth_price,
            sender: ctx.client.address(),
        };
        let gas_price = self.prices.gas_price;
        let orderbook = self.pair.orderbook;
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
            .map_err(|f| f.with_market_price(market_price).with_route(counterparty.clone()))?;

        let estimated_profit = estimate_profit(
            max_input,
            order,
            opposing,
            self.prices.input_to_eth_price,
            self.prices.output_to_eth_price,
        );

        let mut attributes = SpanAttributes::new();
        attributes.insert("against".to_string(), json!(format!("{}", opposing.id)));
        attributes.insert("opposingOrderbook".to_string(), json!(counterparty));
        attributes.insert("maxInput".to_string(), json!(max_input.to_string()));
        attributes.insert("blockNumber".to_string(), json!(block));
        attributes.insert("gasCost".to_string(), json!(estimated.gas_cost.to_string()));

        Ok(Opportunity {
            mode: ModeKind::InterOrderbook,
            rawtx: estimated.rawtx,
            maximum_input: max_input,
            opp_block_number: block,
            estimated_profit,
            estimated_gas_cost: estimated.gas_cost,
            take_orders_config: Some(take_orders),
            counterparty,
            orders: vec![order.id, opposing.id],
            attributes,
        })
    }
}

/// Opposing pairs on other orderbooks whose best order can cross ours
pub fn counterparties<'a>(pair: &OrderPairObject, all_pairs: &'a [OrderPairObject]) -> Vec<&'a OrderPairObject> {
    let Some(order) = pair.best() else {
        return Vec::new();
    };
    all_pairs
        .iter()
        .filter(|p| p.orderbook != pair.orderbook && pair.is_opposing(p))
        .filter(|p| {
            p.best()
                .map(|o| o.owner() != order.owner() && !o.max_output().is_zero() && ratios_cross(order, o))
                .unwrap_or(false)
        })
        .collect()
}

/// Search every opposing orderbook concurrently.
///
/// Picks the highest estimated profit, ties to list order. When none works
/// the halt carries one entry per opposing orderbook.
pub async fn find_opp(
    ctx: &OppContext,
    pair: &OrderPairObject,
    all_pairs: &[OrderPairObject],
    prices: &PairPrices,
) -> Result<Opportunity, DryrunHalt> {
    let max_input = pair.best().map(|o| o.max_output()).unwrap_or_default();
    let opposing = counterparties(pair, all_pairs);
    if max_input.is_zero() || opposing.is_empty() {
        return Err(DryrunHalt::new(HaltReason::NoRoute));
    }
    debug!("{}: {} opposing orderbook(s)", pair.symbol(), opposing.len());

    let results = join_all(opposing.iter().map(|opp| async move {
        let engine = InterOrderbookDryrun {
            ctx,
            pair,
            opposing: *opp,
            prices,
        };
        binary_search(&engine, max_input, &ctx.config.search).await
    }))
    .await;

    pick_best(
        opposing.iter().map(|p| p.orderbook.to_string()).zip(results).collect(),
    )
}

/// Best success by estimated profit (first wins ties), else an aggregate halt
pub(crate) fn pick_best(results: Vec<(String, Result<Opportunity, DryrunHalt>)>) -> Result<Opportunity, DryrunHalt> {
    let mut best: Option<Opportunity> = None;
    let mut halts: Vec<(String, DryrunHalt)> = Vec::new();
    for (key, result) in results {
        match result {
            Ok(opp) => {
                if best.as_ref().map_or(true, |b| opp.estimated_profit > b.estimated_profit) {
                    best = Some(opp);
                }
            }
            Err(halt) => halts.push((key, halt)),
        }
    }
    if let Some(opp) = best {
        return Ok(opp);
    }

    let reason = if halts.iter().any(|(_, h)| h.reason == HaltReason::NoWalletFund) {
        HaltReason::NoWalletFund
    } else if !halts.is_empty() && halts.iter().all(|(_, h)| h.reason == HaltReason::NoRoute) {
        HaltReason::NoRoute
    } else {
        HaltReason::NoOpportunity
    };
    let mut aggregate = DryrunHalt::new(reason);
    for (key, halt) in halts {
        let mut entry = serde_json::Map::new();
        entry.insert("reason".to_string(), json!(halt.reason.to_string()));
        entry.extend(halt.attributes);
        aggregate.attributes.insert(key, Value::Object(entry));
    }
    Err(aggregate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrage::testing::{client, context, engine_config, prices};
    use crate::router::mock::MockRouter;
    use crate::rpc::{RpcError, RpcErrorKind};
    use crate::types::fixtures::{pair, ten_tokens, token};
    use alloy::primitives::Address;
    use std::sync::Arc;

    fn ratio(milli: u64) -> U256 {
        U256::from(milli) * U256::from(1_000_000_000_000_000u64)
    }

    fn setup() -> (OrderPairObject, Vec<OrderPairObject>) {
        let usdt = token(0x11, 18, "USDT");
        let weth = token(0x22, 18, "WETH");
        // our order: gives WETH, wants 0.9 USDT per WETH
        let ours = pair(0xb1, 0x01, &usdt, &weth, ten_tokens(), ratio(900));
        // opposing: gives USDT, wants 1.0 WETH per USDT
        let theirs = pair(0xb2, 0x02, &weth, &usdt, ten_tokens(), ratio(1_000));
        // same direction on another orderbook, never a counterparty
        let same_side = pair(0xb3, 0x03, &usdt, &weth, ten_tokens(), ratio(900));
        (ours.clone(), vec![ours, theirs, same_side])
    }

    #[test]
    fn test_opposing_limits() {
        let (max_in, max_ratio) = opposing_limits(ten_tokens(), ratio(500));
        assert_eq!(max_in, U256::from(5) * ONE18);
        assert_eq!(max_ratio, U256::from(2) * ONE18);
        assert_eq!(opposing_limits(ten_tokens(), U256::ZERO), (U256::MAX, U256::MAX));
    }

    #[test]
    fn test_counterparties_filter() {
        let (ours, all) = setup();
        let found = counterparties(&ours, &all);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].orderbook, Address::repeat_byte(0xb2));
    }

    #[test]
    fn test_profit_both_sides() {
        let (ours, all) = setup();
        let order = ours.best().unwrap();
        let opposing = all[1].best().unwrap();
        // order takes 9 USDT for 10 WETH; opposing gives 9 USDT for 9 WETH
        // leftover 1 WETH at price 1
        let p = estimate_profit(ten_tokens(), order, opposing, ONE18, ONE18);
        assert_eq!(p, ONE18);
    }

    #[tokio::test]
    async fn test_builds_nested_take_orders() {
        let (ours, all) = setup();
        let mock = Arc::new(client(U256::ZERO));
        let ctx = context(mock, Arc::new(MockRouter::new(None)), engine_config());

        let opp = find_opp(&ctx, &ours, &all, &prices()).await.unwrap();
        assert_eq!(opp.mode, ModeKind::InterOrderbook);
        assert_eq!(opp.rawtx.to, Address::repeat_byte(0xa9));
        assert_eq!(opp.counterparty, Address::repeat_byte(0xb2).to_string());

        let outer = IArbV4::arb3Call::abi_decode(&opp.rawtx.data).unwrap();
        assert_eq!(outer.orderBook, ours.orderbook);
        assert_eq!(outer.takeOrders.maximumIORatio, ratio(900));

        let (ob1, ob2, inner) =
            <(Address, Address, Bytes)>::abi_decode_params(&outer.takeOrders.data).unwrap();
        assert_eq!(ob1, Address::repeat_byte(0xb2));
        assert_eq!(ob2, Address::repeat_byte(0xb2));
        let inner = IOrderBookV4::takeOrders2Call::abi_decode(&inner).unwrap();
        assert_eq!(inner.config.maximumInput, U256::from(9) * ONE18);
        assert_eq!(inner.config.orders[0].order, all[1].best().unwrap().take_order.order);
    }

    #[tokio::test]
    async fn test_limits_in_token_decimals() {
        let usdc = token(0x11, 6, "USDC");
        let weth = token(0x22, 18, "WETH");
        // gives 10 WETH, wants 0.9 USDC per WETH
        let ours = pair(0xb1, 0x01, &usdc, &weth, ten_tokens(), ratio(900));
        let theirs = pair(0xb2, 0x02, &weth, &usdc, ten_tokens(), ratio(1_000));
        let all = vec![ours.clone(), theirs];
        let ctx = context(Arc::new(client(U256::ZERO)), Arc::new(MockRouter::new(None)), engine_config());

        let opp = find_opp(&ctx, &ours, &all, &prices()).await.unwrap();
        assert_eq!(opp.maximum_input, ten_tokens());

        let outer = IArbV4::arb3Call::abi_decode(&opp.rawtx.data).unwrap();
        assert_eq!(outer.takeOrders.maximumInput, ten_tokens());
        let (_, _, inner) =
            <(Address, Address, Bytes)>::abi_decode_params(&outer.takeOrders.data).unwrap();
        let inner = IOrderBookV4::takeOrders2Call::abi_decode(&inner).unwrap();
        // 9 USDC
        assert_eq!(inner.config.maximumInput, U256::from(9_000_000u64));
        assert_eq!(inner.config.maximumIORatio, div18(ONE18, ratio(900)));
    }

    #[tokio::test]
    async fn test_no_opposing_orders_is_no_route() {
        let (ours, all) = setup();
        let ctx = context(Arc::new(client(U256::ZERO)), Arc::new(MockRouter::new(None)), engine_config());
        let only_same_side = vec![all[0].clone(), all[2].clone()];
        let halt = find_opp(&ctx, &ours, &only_same_side, &prices()).await.unwrap_err();
        assert_eq!(halt.reason, HaltReason::NoRoute);
    }

    #[tokio::test]
    async fn test_failures_keyed_by_opposing_orderbook() {
        let (ours, all) = setup();
        let mock = Arc::new(client(U256::ZERO).with_estimate(|_, _| {
            Err(RpcError::new(RpcErrorKind::ExecutionReverted, "execution reverted"))
        }));
        let ctx = context(mock, Arc::new(MockRouter::new(None)), engine_config());

        let halt = find_opp(&ctx, &ours, &all, &prices()).await.unwrap_err();
        assert_eq!(halt.reason, HaltReason::NoOpportunity);
        let key = Address::repeat_byte(0xb2).to_string();
        let entry = halt.attributes[&key].as_object().unwrap();
        assert_eq!(entry["hops"].as_array().unwrap().len(), 3);
        assert_eq!(entry["reason"], json!("NoOpportunity"));
    }
}
