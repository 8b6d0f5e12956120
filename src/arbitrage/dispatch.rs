//! Mode Dispatch
//!
//! Runs every enabled mode for a pair concurrently and keeps the most
//! profitable result. Modes are compared in a fixed order so ties and the
//! merged diagnostics never depend on completion order.

use super::search::{DryrunHalt, HaltReason};
use super::{inter_orderbook, intra_orderbook, route_processor, EngineConfig, OppContext, PairPrices};
use crate::types::{ModeKind, Opportunity, OrderPairObject, SpanAttributes};
use futures::future::join_all;
use serde_json::json;
use tracing::debug;

/// Every mode failed for a pair
#[derive(Debug, Clone, thiserror::Error)]
#[error("no opportunity found: {reason}")]
pub struct FindOppError {
    pub reason: HaltReason,
    /// Per-mode diagnostics under `routeProcessor.*`, `interOrderbook.*`, `intraOrderbook.*`
    pub attributes: SpanAttributes,
}

/// Modes searched for every pair, in tie-break order
pub fn enabled_modes(config: &EngineConfig) -> Vec<ModeKind> {
    let mut modes = vec![ModeKind::RouteProcessor];
    if !config.rp_only {
        if config.generic_arb_address.is_some() {
            modes.push(ModeKind::InterOrderbook);
        }
        modes.push(ModeKind::IntraOrderbook);
    }
    modes
}

/// Search a single mode
pub async fn find_mode_opp(
    mode: ModeKind,
    ctx: &OppContext,
    pair: &OrderPairObject,
    all_pairs: &[OrderPairObject],
    prices: &PairPrices,
) -> Result<Opportunity, DryrunHalt> {
    match mode {
        ModeKind::RouteProcessor => route_processor::find_opp(ctx, pair, prices).await,
        ModeKind::InterOrderbook => inter_orderbook::find_opp(ctx, pair, all_pairs, prices).await,
        ModeKind::IntraOrderbook => intra_orderbook::find_opp(ctx, pair, all_pairs, prices).await,
    }
}

fn merge_halts(halts: Vec<(ModeKind, DryrunHalt)>) -> FindOppError {
    let reason = if halts.iter().any(|(_, h)| h.reason == HaltReason::NoWalletFund) {
        HaltReason::NoWalletFund
    } else if halts.iter().all(|(_, h)| h.reason == HaltReason::NoRoute) {
        HaltReason::NoRoute
    } else if halts.iter().all(|(_, h)| h.reason == HaltReason::UnexpectedError) {
        HaltReason::UnexpectedError
    } else {
        HaltReason::NoOpportunity
    };

    let mut attributes = SpanAttributes::new();
    for (mode, halt) in halts {
        let prefix = mode.attribute_prefix();
        attributes.insert(format!("{}.reason", prefix), json!(halt.reason.to_string()));
        for (key, value) in halt.attributes {
            attributes.insert(format!("{}.{}", prefix, key), value);
        }
    }
    FindOppError { reason, attributes }
}

/// Best opportunity for `pair` across all enabled modes
pub async fn find_opp(
    ctx: &OppContext,
    pair: &OrderPairObject,
    all_pairs: &[OrderPairObject],
    prices: &PairPrices,
) -> Result<Opportunity, FindOppError> {
    let modes = enabled_modes(&ctx.config);
    let results = join_all(
        modes
            .iter()
            .map(|mode| find_mode_opp(*mode, ctx, pair, all_pairs, prices)),
    )
    .await;

    let mut best: Option<Opportunity> = None;
    let mut halts = Vec::new();
    for (mode, result) in modes.into_iter().zip(results) {
        match result {
            Ok(opp) => {
                debug!("{} {}: found, profit {}", pair.symbol(), mode, opp.estimated_profit);
                if best.as_ref().map_or(true, |b| opp.estimated_profit > b.estimated_profit) {
                    best = Some(opp);
                }
            }
            Err(halt) => {
                debug!("{} {}: {}", pair.symbol(), mode, halt.reason);
                halts.push((mode, halt));
            }
        }
    }
    best.ok_or_else(|| merge_halts(halts))
}

/// Run `retries` independent searches concurrently and keep the best.
///
/// Fails with the first error in run order, or `NoWalletFund` if any run hit it.
pub async fn find_opp_with_retries(
    ctx: &OppContext,
    pair: &OrderPairObject,
    all_pairs: &[OrderPairObject],
    prices: &PairPrices,
) -> Result<Opportunity, FindOppError> {
    let runs = ctx.config.retries.max(1) as usize;
    let results = join_all((0..runs).map(|_| find_opp(ctx, pair, all_pairs, prices))).await;

    let mut best: Option<Opportunity> = None;
    let mut first_error: Option<FindOppError> = None;
    for result in results {
        match result {
            Ok(opp) => {
                if best.as_ref().map_or(true, |b| opp.estimated_profit > b.estimated_profit) {
                    best = Some(opp);
                }
            }
            Err(e) => match &first_error {
                Some(prev) if prev.reason == HaltReason::NoWalletFund => {}
                Some(_) if e.reason != HaltReason::NoWalletFund => {}
                _ => first_error = Some(e),
            },
        }
    }
    match (best, first_error) {
        (Some(opp), _) => Ok(opp),
        (None, Some(e)) => Err(e),
        (None, None) => Err(FindOppError {
            reason: HaltReason::UnexpectedError,
            attributes: SpanAttributes::new(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrage::testing::{client, context, engine_config, prices};
    use crate::math::ONE18;
    use crate::router::mock::MockRouter;
    use crate::rpc::{RpcError, RpcErrorKind};
    use crate::types::fixtures::{pair, ten_tokens, token};
    use alloy::primitives::U256;
    use std::sync::Arc;

    fn ratio(milli: u64) -> U256 {
        U256::from(milli) * U256::from(1_000_000_000_000_000u64)
    }

    fn pairs() -> Vec<OrderPairObject> {
        let usdt = token(0x11, 18, "USDT");
        let weth = token(0x22, 18, "WETH");
        vec![
            pair(0xb1, 0x01, &usdt, &weth, ten_tokens(), ratio(900)),
            pair(0xb2, 0x02, &weth, &usdt, ten_tokens(), ratio(1_000)),
            pair(0xb1, 0x03, &weth, &usdt, ten_tokens(), ratio(500)),
        ]
    }

    #[test]
    fn test_enabled_modes() {
        let mut config = engine_config();
        assert_eq!(
            enabled_modes(&config),
            vec![ModeKind::RouteProcessor, ModeKind::InterOrderbook, ModeKind::IntraOrderbook]
        );
        config.generic_arb_address = None;
        assert_eq!(
            enabled_modes(&config),
            vec![ModeKind::RouteProcessor, ModeKind::IntraOrderbook]
        );
        config.rp_only = true;
        assert_eq!(enabled_modes(&config), vec![ModeKind::RouteProcessor]);
    }

    #[tokio::test]
    async fn test_picks_highest_profit_mode() {
        let all = pairs();
        // pool pays 0.95: route-processor profit 0.5, inter 1.0, intra 5.5
        let router = Arc::new(MockRouter::new(Some(ratio(950))));
        let ctx = context(Arc::new(client(U256::ZERO)), router, engine_config());

        let opp = find_opp(&ctx, &all[0], &all, &prices()).await.unwrap();
        assert_eq!(opp.mode, ModeKind::IntraOrderbook);

        let mut config = engine_config();
        config.rp_only = true;
        let ctx = context(Arc::new(client(U256::ZERO)), Arc::new(MockRouter::new(Some(ratio(950)))), config);
        let opp = find_opp(&ctx, &all[0], &all, &prices()).await.unwrap();
        assert_eq!(opp.mode, ModeKind::RouteProcessor);
        assert_eq!(opp.estimated_profit, ONE18 / U256::from(2));
    }

    #[tokio::test]
    async fn test_merged_diagnostics_are_prefixed() {
        let all = pairs();
        let mock = Arc::new(client(U256::ZERO).with_estimate(|_, _| {
            Err(RpcError::new(RpcErrorKind::ExecutionReverted, "execution reverted"))
        }));
        let ctx = context(mock, Arc::new(MockRouter::new(None)), engine_config());

        let err = find_opp(&ctx, &all[0], &all, &prices()).await.unwrap_err();
        assert_eq!(err.reason, HaltReason::NoOpportunity);
        assert_eq!(err.attributes["routeProcessor.reason"], json!("NoRoute"));
        assert!(!err.attributes.contains_key("routeProcessor.hops"));
        assert_eq!(err.attributes["interOrderbook.reason"], json!("NoOpportunity"));
        assert_eq!(err.attributes["intraOrderbook.reason"], json!("NoOpportunity"));
    }

    #[tokio::test]
    async fn test_wallet_fund_wins() {
        let all = pairs();
        let mock = Arc::new(client(U256::ZERO).with_estimate(|_, tx| {
            if tx.to == all_orderbook() {
                Err(RpcError::new(RpcErrorKind::InsufficientFunds, "insufficient funds"))
            } else {
                Err(RpcError::new(RpcErrorKind::ExecutionReverted, "execution reverted"))
            }
        }));
        let ctx = context(mock, Arc::new(MockRouter::new(Some(ratio(950)))), engine_config());

        let err = find_opp(&ctx, &all[0], &all, &prices()).await.unwrap_err();
        assert_eq!(err.reason, HaltReason::NoWalletFund);
        assert_eq!(err.attributes["intraOrderbook.reason"], json!("NoWalletFund"));
    }

    fn all_orderbook() -> alloy::primitives::Address {
        alloy::primitives::Address::repeat_byte(0xb1)
    }

    #[tokio::test]
    async fn test_retries_run_concurrently() {
        let all = pairs();
        let mock = Arc::new(client(U256::ZERO));
        let mut config = engine_config();
        config.retries = 3;
        config.rp_only = true;
        let router = Arc::new(MockRouter::new(Some(ratio(950))));
        let ctx = context(mock, router.clone(), config);

        let opp = find_opp_with_retries(&ctx, &all[0], &all, &prices()).await.unwrap();
        assert_eq!(opp.mode, ModeKind::RouteProcessor);
        assert_eq!(router.call_count(), 3);
    }
}
