//! Intra-Orderbook Mode
//!
//! Clears our order directly against an opposing order on the same orderbook.
//! The bounty lands in the bot's vaults, so the call is a `multicall` of
//! `clear2` followed by `withdraw2` for the buy and sell tokens; the guard
//! rides on the last withdraw and checks the bot's balance delta.
//!
//! `clear2` sizes the trade onchain, so the search runs a single hop.

use super::estimate::{estimate_with_guard, rpc_failure};
use super::inter_orderbook::{estimate_profit, ratios_cross};
use super::search::{binary_search, Dryrun, DryrunFailure, DryrunHalt, FailureKind, SearchConfig};
use super::{OppContext, PairPrices};
use crate::contracts::{ClearConfig, IOrderBookV4, IERC20};
use crate::math::scale_to_18;
use crate::task::Guard;
use crate::types::{ModeKind, Opportunity, OrderPairObject, RawTx, SpanAttributes, TakeOrder, TokenDetails};
use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::json;
use tracing::debug;

pub struct IntraOrderbookDryrun<'a> {
    pub ctx: &'a OppContext,
    pub pair: &'a OrderPairObject,
    pub opposing: &'a TakeOrder,
    pub prices: &'a PairPrices,
}

/// Bot's balance of `token`, scaled to 18 decimals
async fn balance_18(ctx: &OppContext, token: &TokenDetails, owner: Address) -> Result<U256, DryrunFailure> {
    let data = IERC20::balanceOfCall { account: owner }.abi_encode();
    let out = ctx
        .client
        .call(token.address, data.into())
        .await
        .map_err(|e| rpc_failure(&e))?;
    let balance = IERC20::balanceOfCall::abi_decode_returns(&out)
        .map_err(|e| DryrunFailure::new(FailureKind::NodeError, format!("balanceOf decode: {}", e)))?;
    Ok(scale_to_18(balance, token.decimals))
}

/// `multicall` payload: clear, withdraw buy token, withdraw sell token with the guard
pub fn clear_and_withdraw(
    pair: &OrderPairObject,
    order: &TakeOrder,
    opposing: &TakeOrder,
    bounty_vault_id: U256,
    task: crate::contracts::TaskV1,
) -> Vec<Bytes> {
    let clear = IOrderBookV4::clear2Call {
        alice: order.order().clone(),
        bob: opposing.order().clone(),
        clearConfig: ClearConfig {
            aliceInputIOIndex: U256::from(order.input_io_index()),
            aliceOutputIOIndex: U256::from(order.output_io_index()),
            bobInputIOIndex: U256::from(opposing.input_io_index()),
            bobOutputIOIndex: U256::from(opposing.output_io_index()),
            aliceBountyVaultId: bounty_vault_id,
            bobBountyVaultId: bounty_vault_id,
        },
        aliceSignedContext: vec![],
        bobSignedContext: vec![],
    }
    .abi_encode();
    let withdraw_input = IOrderBookV4::withdraw2Call {
        token: pair.buy_token.address,
        vaultId: bounty_vault_id,
        targetAmount: U256::MAX,
        tasks: vec![],
    }
    .abi_encode();
    let withdraw_output = IOrderBookV4::withdraw2Call {
        token: pair.sell_token.address,
        vaultId: bounty_vault_id,
        targetAmount: U256::MAX,
        tasks: vec![task],
    }
    .abi_encode();
    vec![clear.into(), withdraw_input.into(), withdraw_output.into()]
}

#[async_trait]
impl Dryrun for IntraOrderbookDryrun<'_> {
    async fn dryrun(&self, max_input: U256) -> Result<Opportunity, DryrunFailure> {
        let ctx = self.ctx;
        let pair = self.pair;
        let config = &ctx.config;
        let order = pair.best().ok_or_else(DryrunFailure::no_route)?;
        let opposing = self.opposing;

        let block = ctx
            .client
            .block_number()
            .await
            .map_err(|e| rpc_failure(&e))?;

        let bot = ctx.client.address();
        let input_balance = balance_18(ctx, &pair.buy_token, bot)
            .await
            .map_err(|f| f.with_block(block))?;
        let output_balance = balance_18(ctx, &pair.sell_token, bot)
            .await
            .map_err(|f| f.with_block(block))?;

        let guard = Guard::Withdraw {
            bot,
            input_token: pair.buy_token.address,
            output_token: pair.sell_token.address,
            org_input_balance_18: input_balance,
            org_output_balance_18: output_balance,
            input_to_eth_price: self.prices.input_to_eth_price,
            output_to_eth_price: self.prices.output_to_eth_price,
            sender: bot,
        };
        let gas_price = self.prices.gas_price;
        let orderbook = pair.orderbook;
        let vault = config.bounty_vault_id;
        let build = |task| {
            let data = IOrderBookV4::multicallCall {
                data: clear_and_withdraw(pair, order, opposing, vault, task),
            }
            .abi_encode();
            RawTx::new(orderbook, data.into(), gas_price)
        };

        let against = opposing.id.to_string();
        let estimated = estimate_with_guard(ctx, &guard, gas_price, block, build)
            .await
            .map_err(|f| f.with_route(against.clone()))?;

        let estimated_profit = estimate_profit(
            max_input,
            order,
            opposing,
            self.prices.input_to_eth_price,
            self.prices.output_to_eth_price,
        );

        let mut attributes = SpanAttributes::new();
        attributes.insert("against".to_string(), json!(against));
        attributes.insert("maxInput".to_string(), json!(max_input.to_string()));
        attributes.insert("blockNumber".to_string(), json!(block));
        attributes.insert("gasCost".to_string(), json!(estimated.gas_cost.to_string()));

        Ok(Opportunity {
            mode: ModeKind::IntraOrderbook,
            rawtx: estimated.rawtx,
            maximum_input: max_input,
            opp_block_number: block,
            estimated_profit,
            estimated_gas_cost: estimated.gas_cost,
            take_orders_config: None,
            counterparty: against,
            orders: vec![order.id, opposing.id],
            attributes,
        })
    }
}

/// Opposing take orders on the same orderbook, other owners only
pub fn counterparties<'a>(pair: &OrderPairObject, all_pairs: &'a [OrderPairObject]) -> Vec<&'a TakeOrder> {
    let Some(order) = pair.best() else {
        return Vec::new();
    };
    all_pairs
        .iter()
        .filter(|p| p.orderbook == pair.orderbook && pair.is_opposing(p))
        .flat_map(|p| p.take_orders.iter())
        .filter(|o| o.owner() != order.owner() && !o.max_output().is_zero() && ratios_cross(order, o))
        .collect()
}

/// Try every opposing order on the same orderbook; failures keyed by order id
pub async fn find_opp(
    ctx: &OppContext,
    pair: &OrderPairObject,
    all_pairs: &[OrderPairObject],
    prices: &PairPrices,
) -> Result<Opportunity, DryrunHalt> {
    let max_input = pair.best().map(|o| o.max_output()).unwrap_or_default();
    let opposing = counterparties(pair, all_pairs);
    if max_input.is_zero() || opposing.is_empty() {
        return Err(DryrunHalt::new(super::HaltReason::NoRoute));
    }
    debug!("{}: {} opposing order(s) on {}", pair.symbol(), opposing.len(), pair.orderbook);

    let search = SearchConfig {
        hops: 1,
        ..ctx.config.search
    };
    let results = join_all(opposing.iter().map(|opp| async move {
        let engine = IntraOrderbookDryrun {
            ctx,
            pair,
            opposing: *opp,
            prices,
        };
        binary_search(&engine, max_input, &search).await
    }))
    .await;

    super::inter_orderbook::pick_best(opposing.iter().map(|o| o.id.to_string()).zip(results).collect())
}
