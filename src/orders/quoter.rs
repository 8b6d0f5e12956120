//! Multicall3 Batch Quoting
//!
//! Refreshes every take order's quote with orderbook `quote` calls batched
//! into Multicall3 `aggregate3` eth_calls (`allowFailure: true`, so one
//! broken order does not sink the batch). Orders that do not exist or quote
//! zero output are dropped; the rest are sorted best ratio first.

use super::OrderSourceError;
use crate::client::ChainClient;
use crate::contracts::{Call3, IMulticall3, IOrderBookV4, Quote as QuoteConfig};
use crate::types::{OrderPairObject, Quote, TakeOrder};
use alloy::primitives::{address, Address};
use alloy::sol_types::SolCall;
use tracing::debug;

/// Multicall3 deployed address (same on all EVM chains)
pub const MULTICALL3_ADDRESS: Address = address!("cA11bde05977b3631167028862bE2a173976CA11");

/// Sub-calls per aggregate3 eth_call
const BATCH_SIZE: usize = 100;

fn quote_call(orderbook: Address, take_order: &TakeOrder) -> Call3 {
    let call = IOrderBookV4::quoteCall {
        quoteConfig: QuoteConfig {
            order: take_order.order().clone(),
            inputIOIndex: take_order.take_order.inputIOIndex,
            outputIOIndex: take_order.take_order.outputIOIndex,
            signedContext: vec![],
        },
    };
    Call3 {
        target: orderbook,
        allowFailure: true,
        callData: call.abi_encode().into(),
    }
}

fn decode_quote(success: bool, data: &[u8]) -> Option<Quote> {
    if !success {
        return None;
    }
    let ret = IOrderBookV4::quoteCall::abi_decode_returns(data).ok()?;
    ret.exists.then_some(Quote {
        max_output: ret.outputMax,
        ratio: ret.ioRatio,
    })
}

/// Quote every take order in `pairs` in place.
///
/// A failed batch is an error for the whole round; a failed sub-call only
/// drops its order.
pub async fn quote_pairs(
    client: &dyn ChainClient,
    multicall: Address,
    pairs: &mut [OrderPairObject],
) -> Result<(), OrderSourceError> {
    let slots: Vec<(usize, usize)> = pairs
        .iter()
        .enumerate()
        .flat_map(|(p, pair)| (0..pair.take_orders.len()).map(move |t| (p, t)))
        .collect();

    for chunk in slots.chunks(BATCH_SIZE) {
        let calls: Vec<Call3> = chunk
            .iter()
            .map(|&(p, t)| quote_call(pairs[p].orderbook, &pairs[p].take_orders[t]))
            .collect();
        let data = IMulticall3::aggregate3Call { calls }.abi_encode();
        let out = client.call(multicall, data.into()).await?;
        let results = IMulticall3::aggregate3Call::abi_decode_returns(&out)
            .map_err(|e| OrderSourceError::Decode(format!("aggregate3: {}", e)))?;
        if results.len() != chunk.len() {
            return Err(OrderSourceError::Decode(format!(
                "aggregate3 returned {} results, expected {}",
                results.len(),
                chunk.len()
            )));
        }
        for (&(p, t), result) in chunk.iter().zip(results) {
            pairs[p].take_orders[t].quote = decode_quote(result.success, &result.returnData);
        }
    }

    for pair in pairs.iter_mut() {
        let before = pair.take_orders.len();
        pair.take_orders
            .retain(|o| o.quote.map_or(false, |q| !q.max_output.is_zero()));
        pair.take_orders.sort_by(|a, b| a.ratio().cmp(&b.ratio()));
        if pair.take_orders.len() != before {
            debug!(
                "{}: {} of {} order(s) quotable",
                pair.symbol(),
                pair.take_orders.len(),
                before
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockClient;
    use crate::contracts::Result3;
    use crate::math::ONE18;
    use crate::types::fixtures::{order, token};
    use alloy::primitives::{Bytes, U256};
    use alloy::sol_types::SolValue;

    fn quote_return(exists: bool, max: U256, ratio: U256) -> Bytes {
        (exists, max, ratio).abi_encode_params().into()
    }

    /// Answers each quote by the order's nonce byte: 1 -> ratio 2, 2 -> ratio 1,
    /// 3 -> not exists, 4 -> zero output, 5 -> sub-call failure
    fn client() -> MockClient {
        MockClient::new().with_call(|_, data| {
            let call = IMulticall3::aggregate3Call::abi_decode(data).unwrap();
            let results: Vec<Result3> = call
                .calls
                .iter()
                .map(|c| {
                    let q = IOrderBookV4::quoteCall::abi_decode(&c.callData).unwrap();
                    let (success, return_data) = match q.quoteConfig.order.nonce[0] {
                        1 => (true, quote_return(true, ONE18, ONE18 * U256::from(2))),
                        2 => (true, quote_return(true, ONE18, ONE18)),
                        3 => (true, quote_return(false, U256::ZERO, U256::ZERO)),
                        4 => (true, quote_return(true, U256::ZERO, ONE18)),
                        _ => (false, Bytes::new()),
                    };
                    Result3 {
                        success,
                        returnData: return_data,
                    }
                })
                .collect();
            Ok(results.abi_encode().into())
        })
    }

    #[tokio::test]
    async fn test_quotes_filters_and_sorts() {
        let usdt = token(0x11, 6, "USDT");
        let weth = token(0x22, 18, "WETH");
        let take_orders = (1..=5)
            .map(|n| TakeOrder::new(order(n, &usdt, &weth, n), 0, 0))
            .collect();
        let mut pairs = vec![OrderPairObject {
            orderbook: Address::repeat_byte(0xb1),
            buy_token: usdt,
            sell_token: weth,
            take_orders,
        }];

        quote_pairs(&client(), MULTICALL3_ADDRESS, &mut pairs).await.unwrap();
        let orders = &pairs[0].take_orders;
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].ratio(), ONE18);
        assert_eq!(orders[1].ratio(), ONE18 * U256::from(2));
        assert_eq!(orders[0].max_output(), ONE18);
    }

    #[tokio::test]
    async fn test_batch_failure_is_an_error() {
        let usdt = token(0x11, 6, "USDT");
        let weth = token(0x22, 18, "WETH");
        let failing = MockClient::new().with_call(|_, _| {
            Err(crate::rpc::RpcError::new(crate::rpc::RpcErrorKind::Timeout, "timed out"))
        });
        let mut pairs = vec![OrderPairObject {
            orderbook: Address::repeat_byte(0xb1),
            buy_token: usdt.clone(),
            sell_token: weth.clone(),
            take_orders: vec![TakeOrder::new(order(1, &usdt, &weth, 1), 0, 0)],
        }];
        let err = quote_pairs(&failing, MULTICALL3_ADDRESS, &mut pairs).await.unwrap_err();
        assert!(matches!(err, OrderSourceError::Rpc(_)));
    }
}
