//! Chain Access
//!
//! `ChainClient` is the narrow surface the engines, task builder and
//! submission path use to talk to the chain. The live implementation wraps
//! an alloy `Provider` built on the multi-endpoint `SolverTransport` with a
//! local signer; tests script it directly.
//!
//! Created: 2026-10-19

use crate::rpc::{RpcConfig, RpcError, RpcErrorKind, RpcState, SolverTransport, TransportConfig};
use crate::types::{RawTx, TxReceipt};
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::client::RpcClient;
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Chain operations the solver depends on. Every error is already classified.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Signer address transactions are sent from
    fn address(&self) -> Address;

    async fn block_number(&self) -> Result<u64, RpcError>;

    async fn gas_price(&self) -> Result<u128, RpcError>;

    /// eth_estimateGas; reverts surface as `ExecutionReverted`
    async fn estimate_gas(&self, tx: &RawTx) -> Result<u64, RpcError>;

    /// eth_call against latest state
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError>;

    /// Sign and broadcast, returning the transaction hash
    async fn send_transaction(&self, tx: &RawTx) -> Result<B256, RpcError>;

    async fn get_receipt(&self, hash: B256) -> Result<Option<TxReceipt>, RpcError>;
}

/// `ChainClient` over any alloy provider whose fillers can sign for `signer`
pub struct AlloyClient<P> {
    provider: P,
    signer: Address,
}

impl<P: Provider> AlloyClient<P> {
    pub fn new(provider: P, signer: Address) -> Self {
        Self { provider, signer }
    }

    fn request(&self, tx: &RawTx) -> TransactionRequest {
        let mut req = TransactionRequest::default()
            .with_from(tx.from.unwrap_or(self.signer))
            .with_to(tx.to)
            .with_input(tx.data.clone())
            .with_gas_price(tx.gas_price);
        if let Some(gas) = tx.gas {
            req = req.with_gas_limit(gas);
        }
        req
    }
}

#[async_trait]
impl<P: Provider + Send + Sync> ChainClient for AlloyClient<P> {
    fn address(&self) -> Address {
        self.signer
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn gas_price(&self) -> Result<u128, RpcError> {
        Ok(self.provider.get_gas_price().await?)
    }

    async fn estimate_gas(&self, tx: &RawTx) -> Result<u64, RpcError> {
        Ok(self.provider.estimate_gas(self.request(tx)).await?)
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError> {
        let req = TransactionRequest::default()
            .with_from(self.signer)
            .with_to(to)
            .with_input(data);
        Ok(self.provider.call(req).await?)
    }

    async fn send_transaction(&self, tx: &RawTx) -> Result<B256, RpcError> {
        let pending = self.provider.send_transaction(self.request(tx)).await?;
        Ok(*pending.tx_hash())
    }

    async fn get_receipt(&self, hash: B256) -> Result<Option<TxReceipt>, RpcError> {
        let receipt = self.provider.get_transaction_receipt(hash).await?;
        Ok(receipt.map(|r| TxReceipt {
            transaction_hash: r.transaction_hash,
            status: r.status(),
            gas_used: r.gas_used,
            effective_gas_price: r.effective_gas_price,
            block_number: r.block_number,
        }))
    }
}

/// Build the signing client over the multi-endpoint transport.
///
/// Returns the shared `RpcState` alongside so the caller can log endpoint
/// health between rounds.
pub fn connect(
    rpcs: Vec<RpcConfig>,
    transport: TransportConfig,
    signer: PrivateKeySigner,
    keep_cache_on_reset: bool,
) -> Result<(AlloyClient<DynProvider>, Arc<RpcState>), RpcError> {
    if rpcs.is_empty() {
        return Err(RpcError::new(RpcErrorKind::MalformedRequest, "no rpc endpoints configured"));
    }
    let address = signer.address();
    let state = Arc::new(RpcState::new(rpcs).with_keep_cache_on_reset(keep_cache_on_reset));
    let transport = SolverTransport::http(state.clone(), transport)?;

    let client = RpcClient::new(transport, false);
    let provider = ProviderBuilder::new()
        .wallet(EthereumWallet::from(signer))
        .connect_client(client)
        .erased();

    info!("Chain client ready: signer {} over {} endpoint(s)", address, state.len());
    Ok((AlloyClient::new(provider, address), state))
}

/// Poll for a receipt until it appears or `timeout` elapses.
///
/// Transient lookup errors are retried on the next poll; anything else is
/// returned. Expiry surfaces as an `RpcErrorKind::Timeout` error.
pub async fn wait_for_receipt(
    client: &dyn ChainClient,
    hash: B256,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<TxReceipt, RpcError> {
    let deadline = Instant::now() + timeout;
    loop {
        match client.get_receipt(hash).await {
            Ok(Some(receipt)) => return Ok(receipt),
            Ok(None) => {}
            Err(e) if e.is_transient() => {
                debug!("receipt lookup for {} failed transiently: {}", hash, e);
            }
            Err(e) => return Err(e),
        }
        if Instant::now() + poll_interval > deadline {
            return Err(RpcError::new(
                RpcErrorKind::Timeout,
                format!("no receipt for {} within {}ms", hash, timeout.as_millis()),
            ));
        }
        tokio::time::sleep(poll_interval).await;
    }
}


#[cfg(test)]
mod tests {
    use super::mock::MockClient;
    use super::*;

    fn receipt() -> TxReceipt {
        TxReceipt {
            transaction_hash: B256::repeat_byte(0x77),
            status: true,
            gas_used: 21_000,
            effective_gas_price: 2,
            block_number: Some(101),
        }
    }

    #[tokio::test]
    async fn test_wait_for_receipt_returns_mined_receipt() {
        let client = MockClient::new().with_receipt(Some(receipt()));
        let got = wait_for_receipt(
            &client,
            B256::repeat_byte(0x77),
            Duration::from_millis(200),
            Duration::from_millis(5),
        )
        .await
        .unwrap();
        assert_eq!(got, receipt());
    }

    #[tokio::test]
    async fn test_wait_for_receipt_times_out() {
        let client = MockClient::new();
        let err = wait_for_receipt(
            &client,
            B256::repeat_byte(0x77),
            Duration::from_millis(30),
            Duration::from_millis(5),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, RpcErrorKind::Timeout);
        assert!(client.receipt_polls.load(std::sync::atomic::Ordering::SeqCst) >= 2);
    }
}
