//! Transaction Submission
//!
//! Sends a found opportunity's transaction, waits for its receipt and turns
//! the outcome into a report or a halt. Nothing here retries; a failed
//! submission goes back to the round loop, which re-quotes next round.
//!
//! ```text
//!     send ──✗──> TxFailed (error + rawtx)
//!       │
//!       └──> wait receipt ──success──> SubmitReport
//!                  │
//!                  └──reverted / timeout──> TxMineFailed (receipt + url)
//! ```
//!
//! Created: 2026-10-19

use super::PairPrices;
use crate::client::{wait_for_receipt, ChainClient};
use crate::math::{div18, scale_from_18};
use crate::rpc::RpcError;
use crate::types::{ModeKind, Opportunity, OrderPairObject, RawTx, SpanAttributes, TxReceipt};
use alloy::primitives::{B256, U256};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{error, info, warn};

/// Receipt polling and link settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SubmitConfig {
    pub receipt_timeout_ms: u64,
    pub receipt_poll_interval_ms: u64,
    /// Block explorer base, e.g. "https://polygonscan.com"
    pub explorer_url: Option<String>,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            receipt_timeout_ms: 120_000,
            receipt_poll_interval_ms: 2_000,
            explorer_url: None,
        }
    }
}

impl SubmitConfig {
    /// Explorer link for `hash`, or the bare hash without an explorer
    pub fn tx_url(&self, hash: B256) -> String {
        match &self.explorer_url {
            Some(base) => format!("{}/tx/{}", base.trim_end_matches('/'), hash),
            None => hash.to_string(),
        }
    }
}

/// Successful settlement
#[derive(Debug, Clone)]
pub struct SubmitReport {
    pub mode: ModeKind,
    pub pair: String,
    pub buy_token: String,
    pub sell_token: String,
    pub tx_hash: B256,
    pub tx_url: String,
    /// effectiveGasPrice × gasUsed, native 18 decimals
    pub actual_gas_cost: U256,
    /// Gas cost in buy token units; None without a price
    pub actual_gas_cost_in_token: Option<U256>,
    pub estimated_profit: U256,
    pub cleared_orders: Vec<B256>,
    /// Blocks between finding the opportunity and sending it
    pub block_diff: Option<u64>,
    pub receipt: TxReceipt,
}

impl SubmitReport {
    pub fn attributes(&self) -> SpanAttributes {
        let mut attrs = SpanAttributes::new();
        attrs.insert("mode".to_string(), json!(self.mode.to_string()));
        attrs.insert("pair".to_string(), json!(self.pair));
        attrs.insert("buyToken".to_string(), json!(self.buy_token));
        attrs.insert("sellToken".to_string(), json!(self.sell_token));
        attrs.insert("txUrl".to_string(), json!(self.tx_url));
        attrs.insert("actualGasCost".to_string(), json!(self.actual_gas_cost.to_string()));
        if let Some(cost) = self.actual_gas_cost_in_token {
            attrs.insert("actualGasCostInToken".to_string(), json!(cost.to_string()));
        }
        attrs.insert("estimatedProfit".to_string(), json!(self.estimated_profit.to_string()));
        attrs.insert(
            "clearedOrders".to_string(),
            json!(self.cleared_orders.iter().map(|id| id.to_string()).collect::<Vec<_>>()),
        );
        if let Some(diff) = self.block_diff {
            attrs.insert("blockDiff".to_string(), json!(diff));
        }
        attrs
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SubmitHalt {
    /// Rejected before broadcast
    #[error("transaction failed to send: {error}")]
    TxFailed { error: RpcError, rawtx: RawTx },

    /// Mined and reverted, or never seen mined within the timeout
    #[error("transaction failed to mine: {tx_url}")]
    TxMineFailed {
        tx_url: String,
        receipt: Option<TxReceipt>,
        error: Option<RpcError>,
    },
}

impl SubmitHalt {
    pub fn attributes(&self) -> SpanAttributes {
        let mut attrs = SpanAttributes::new();
        match self {
            SubmitHalt::TxFailed { error, rawtx } => {
                attrs.insert("reason".to_string(), json!("TxFailed"));
                attrs.insert("error".to_string(), json!(error.to_string()));
                attrs.insert("rawtx".to_string(), rawtx.to_json());
            }
            SubmitHalt::TxMineFailed { tx_url, receipt, error } => {
                attrs.insert("reason".to_string(), json!("TxMineFailed"));
                attrs.insert("txUrl".to_string(), json!(tx_url));
                if let Some(receipt) = receipt {
                    attrs.insert(
                        "receipt".to_string(),
                        serde_json::to_value(receipt).unwrap_or(serde_json::Value::Null),
                    );
                }
                if let Some(error) = error {
                    attrs.insert("error".to_string(), json!(error.to_string()));
                }
            }
        }
        attrs
    }
}

/// Native cost converted to `decimals`-unit token amount at `token_to_eth_price`
pub fn gas_cost_in_token(gas_cost: U256, token_to_eth_price: U256, decimals: u8) -> Option<U256> {
    if token_to_eth_price.is_zero() {
        return None;
    }
    Some(scale_from_18(div18(gas_cost, token_to_eth_price), decimals))
}

/// Send `opp` and classify its receipt
pub async fn submit(
    client: &dyn ChainClient,
    opp: &Opportunity,
    pair: &OrderPairObject,
    prices: &PairPrices,
    config: &SubmitConfig,
) -> Result<SubmitReport, SubmitHalt> {
    let block_diff = match client.block_number().await {
        Ok(block) => Some(block.saturating_sub(opp.opp_block_number)),
        Err(e) => {
            warn!("block number before submit unavailable: {}", e);
            None
        }
    };

    let mut rawtx = opp.rawtx.clone();
    rawtx.from = Some(client.address());
    info!(
        "🚀 Submitting {} {} | est. profit {} | block diff {:?}",
        pair.symbol(),
        opp.mode,
        opp.estimated_profit,
        block_diff
    );

    let hash = match client.send_transaction(&rawtx).await {
        Ok(hash) => hash,
        Err(error) => {
            error!("Send failed for {}: {}", pair.symbol(), error);
            return Err(SubmitHalt::TxFailed { error, rawtx });
        }
    };
    let tx_url = config.tx_url(hash);
    info!("Transaction sent: {}", tx_url);

    let receipt = match wait_for_receipt(
        client,
        hash,
        Duration::from_millis(config.receipt_timeout_ms),
        Duration::from_millis(config.receipt_poll_interval_ms),
    )
    .await
    {
        Ok(receipt) => receipt,
        Err(error) => {
            warn!("No receipt for {}: {}", tx_url, error);
            return Err(SubmitHalt::TxMineFailed {
                tx_url,
                receipt: None,
                error: Some(error),
            });
        }
    };

    if !receipt.status {
        warn!("❌ Transaction reverted: {}", tx_url);
        return Err(SubmitHalt::TxMineFailed {
            tx_url,
            receipt: Some(receipt),
            error: None,
        });
    }

    let actual_gas_cost = U256::from(receipt.effective_gas_price) * U256::from(receipt.gas_used);
    let actual_gas_cost_in_token =
        gas_cost_in_token(actual_gas_cost, prices.input_to_eth_price, pair.buy_token.decimals);
    info!(
        "✅ Cleared {} order(s) on {} | gas {} | {}",
        opp.orders.len(),
        pair.symbol(),
        actual_gas_cost,
        tx_url
    );

    Ok(SubmitReport {
        mode: opp.mode,
        pair: pair.symbol(),
        buy_token: pair.buy_token.address.to_string(),
        sell_token: pair.sell_token.address.to_string(),
        tx_hash: hash,
        tx_url,
        actual_gas_cost,
        actual_gas_cost_in_token,
        estimated_profit: opp.estimated_profit,
        cleared_orders: opp.orders.clone(),
        block_diff,
        receipt,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrage::testing::prices;
    use crate::client::mock::MockClient;
    use crate::math::ONE18;
    use crate::rpc::RpcErrorKind;
    use crate::types::fixtures::{pair, ten_tokens, token};
    use alloy::primitives::{Address, Bytes};
    use std::sync::atomic::Ordering;

    fn opportunity(pair: &OrderPairObject) -> Opportunity {
        Opportunity {
            mode: ModeKind::RouteProcessor,
            rawtx: RawTx::new(Address::repeat_byte(0xa0), Bytes::from(vec![1, 2, 3]), 1_000),
            maximum_input: ten_tokens(),
            opp_block_number: 95,
            estimated_profit: ONE18,
            estimated_gas_cost: U256::from(100),
            take_orders_config: None,
            counterparty: "route-processor".to_string(),
            orders: vec![pair.best().unwrap().id],
            attributes: SpanAttributes::new(),
        }
    }

    fn fixture() -> OrderPairObject {
        pair(0xb1, 0x01, &token(0x11, 6, "USDT"), &token(0x22, 18, "WETH"), ten_tokens(), ONE18)
    }

    fn config() -> SubmitConfig {
        SubmitConfig {
            receipt_timeout_ms: 50,
            receipt_poll_interval_ms: 10,
            explorer_url: Some("https://scan.example/".to_string()),
        }
    }

    fn receipt(status: bool) -> TxReceipt {
        TxReceipt {
            transaction_hash: B256::repeat_byte(0x77),
            status,
            gas_used: 100_000,
            effective_gas_price: 2_000_000_000,
            block_number: Some(101),
        }
    }

    #[tokio::test]
    async fn test_success_report() {
        let client = MockClient::new().with_receipt(Some(receipt(true)));
        let pair = fixture();
        let opp = opportunity(&pair);
        // USDT priced at 0.0005 native
        let mut p = prices();
        p.input_to_eth_price = ONE18 / U256::from(2000);

        let report = submit(&client, &opp, &pair, &p, &config()).await.unwrap();
        assert_eq!(report.actual_gas_cost, U256::from(200_000_000_000_000u64));
        // 0.0002 native / 0.0005 = 0.4 USDT
        assert_eq!(report.actual_gas_cost_in_token, Some(U256::from(400_000)));
        assert_eq!(report.block_diff, Some(5));
        assert_eq!(report.cleared_orders, opp.orders);
        assert_eq!(report.tx_url, format!("https://scan.example/tx/{}", B256::repeat_byte(0x77)));
        assert_eq!(client.sent.lock().unwrap()[0].from, Some(client.signer));
        assert_eq!(report.attributes()["blockDiff"], json!(5));
    }

    #[tokio::test]
    async fn test_send_failure_carries_rawtx() {
        let client = MockClient::new();
        *client.send_error.lock().unwrap() =
            Some(RpcError::new(RpcErrorKind::InsufficientFunds, "insufficient funds"));
        let pair = fixture();

        let halt = submit(&client, &opportunity(&pair), &pair, &prices(), &config())
            .await
            .unwrap_err();
        match &halt {
            SubmitHalt::TxFailed { rawtx, .. } => assert_eq!(rawtx.data, Bytes::from(vec![1, 2, 3])),
            other => panic!("unexpected {:?}", other),
        }
        let attrs = halt.attributes();
        assert_eq!(attrs["reason"], json!("TxFailed"));
        assert!(attrs["rawtx"].is_object());
    }

    #[tokio::test]
    async fn test_reverted_receipt() {
        let client = MockClient::new().with_receipt(Some(receipt(false)));
        let pair = fixture();
        let halt = submit(&client, &opportunity(&pair), &pair, &prices(), &config())
            .await
            .unwrap_err();
        match halt {
            SubmitHalt::TxMineFailed { receipt, error, .. } => {
                assert!(!receipt.unwrap().status);
                assert!(error.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_receipt_timeout() {
        let client = MockClient::new();
        let pair = fixture();
        let halt = submit(&client, &opportunity(&pair), &pair, &prices(), &config())
            .await
            .unwrap_err();
        assert!(matches!(halt, SubmitHalt::TxMineFailed { receipt: None, error: Some(_), .. }));
        assert!(client.receipt_polls.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn test_gas_cost_in_token_without_price() {
        assert_eq!(gas_cost_in_token(U256::from(10), U256::ZERO, 18), None);
        assert_eq!(gas_cost_in_token(ONE18, ONE18, 6), Some(U256::from(1_000_000)));
    }
}
