//! Multi-Endpoint Solver Transport
//!
//! One logical alloy transport backed by N physical endpoints. Every request:
//!     1. picks an endpoint from live `RpcState` weights (avoiding the one
//!        that just failed when there is a choice)
//!     2. `record_request()` → call with a bounded timeout
//!     3. success or deterministic JSON-RPC error → `record_success()`, return
//!     4. transient failure → `record_failure()`, wait `retry_delay`, retry on
//!        a freshly selected endpoint, up to `retry_count` extra attempts
//!
//! Deterministic errors (reverts, malformed requests, insufficient funds) are
//! answers, not endpoint faults: they are returned immediately and count as a
//! successful round-trip for the endpoint.
//!
//! Implements `tower::Service<RequestPacket>`, so alloy's blanket `Transport`
//! impl applies and `RpcClient::new(transport, false)` works unchanged.
//!
//! Created: 2026-10-19

use super::error::{RpcError, RpcErrorKind};
use super::metrics::RpcState;
use alloy::rpc::json_rpc::{RequestPacket, ResponsePacket, ResponsePayload};
use alloy::transports::http::Http;
use alloy::transports::{TransportError, TransportErrorKind, TransportFut};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tower::Service;
use tracing::{debug, warn};

/// Transport settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Transport identity used in logs
    #[serde(default = "default_key")]
    pub key: String,
    #[serde(default = "default_name")]
    pub name: String,
    /// Extra attempts after the first failure
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Double the delay after every failed attempt
    #[serde(default)]
    pub backoff: bool,
    /// Bound on each individual attempt
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Resolved calls an endpoint needs before it can be rotated
    #[serde(default = "default_rotate_min_calls")]
    pub rotate_min_calls: u64,
    /// Success rate under which an endpoint's metrics are reset between rounds
    #[serde(default = "default_rotate_success_floor")]
    pub rotate_success_floor: f64,
}

fn default_key() -> String { "solver".to_string() }
fn default_name() -> String { "Solver Transport".to_string() }
fn default_retry_count() -> u32 { 2 }
fn default_retry_delay_ms() -> u64 { 150 }
fn default_timeout_ms() -> u64 { 10_000 }
fn default_rotate_min_calls() -> u64 { 50 }
fn default_rotate_success_floor() -> f64 { 0.2 }

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            key: default_key(),
            name: default_name(),
            retry_count: default_retry_count(),
            retry_delay_ms: default_retry_delay_ms(),
            backoff: false,
            timeout_ms: default_timeout_ms(),
            rotate_min_calls: default_rotate_min_calls(),
            rotate_success_floor: default_rotate_success_floor(),
        }
    }
}

impl TransportConfig {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.retry_delay_ms;
        let ms = if self.backoff {
            base.saturating_mul(1u64 << attempt.saturating_sub(1).min(10))
        } else {
            base
        };
        Duration::from_millis(ms)
    }
}

/// Outcome of one attempt on one endpoint
enum Attempt {
    /// Response to hand back: a result, or a deterministic JSON-RPC error
    Answered(ResponsePacket),
    /// Transport failed but the request itself is at fault
    Rejected(TransportError),
    /// Endpoint failed; retry elsewhere
    Transient(TransportError),
    /// Endpoint answered with a transient error object (rate limit etc)
    TransientResponse(TransportError, ResponsePacket),
}

/// Multi-endpoint transport. Cheap to clone: endpoints and state are shared.
#[derive(Debug, Clone)]
pub struct SolverTransport<S = Http<reqwest::Client>> {
    endpoints: Arc<Vec<S>>,
    state: Arc<RpcState>,
    config: TransportConfig,
}

impl SolverTransport<Http<reqwest::Client>> {
    /// One HTTP endpoint per `state` URL, sharing a reqwest client
    pub fn http(state: Arc<RpcState>, config: TransportConfig) -> Result<Self, RpcError> {
        let client = reqwest::Client::new();
        let endpoints = state
            .configs()
            .iter()
            .map(|rpc| {
                rpc.url
                    .parse::<reqwest::Url>()
                    .map(|url| Http::with_client(client.clone(), url))
                    .map_err(|e| {
                        RpcError::new(
                            RpcErrorKind::MalformedRequest,
                            format!("invalid rpc url {}: {}", rpc.url, e),
                        )
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(endpoints, state, config))
    }
}

impl<S> SolverTransport<S>
where
    S: Service<RequestPacket, Response = ResponsePacket, Error = TransportError>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send,
{
    /// `endpoints` must be index-aligned with `state.urls()`
    pub fn new(endpoints: Vec<S>, state: Arc<RpcState>, config: TransportConfig) -> Self {
        debug_assert_eq!(endpoints.len(), state.len());
        Self {
            endpoints: Arc::new(endpoints),
            state,
            config,
        }
    }

    pub fn state(&self) -> &Arc<RpcState> {
        &self.state
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    async fn attempt(&self, index: usize, request: RequestPacket) -> Attempt {
        let url = &self.state.urls()[index];
        let mut endpoint = self.endpoints[index].clone();
        self.state.record_request(url);
        let started = Instant::now();
        let timeout = Duration::from_millis(self.config.timeout_ms);

        let result = tokio::time::timeout(timeout, endpoint.call(request)).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match result {
            Err(_) => {
                self.state.record_failure(url);
                Attempt::Transient(TransportErrorKind::custom_str("request timed out"))
            }
            Ok(Err(err)) => {
                let classified = RpcError::from_transport(&err);
                if classified.kind.should_throw() {
                    // the node answered; the request itself is bad
                    self.state.record_success(url, latency_ms);
                    return Attempt::Rejected(err);
                }
                self.state.record_failure(url);
                Attempt::Transient(err)
            }
            Ok(Ok(response)) => match worst_payload_kind(&response) {
                Some(kind) if kind.is_transient() => {
                    self.state.record_failure(url);
                    let err = TransportErrorKind::custom_str(&format!("transient rpc error: {}", kind));
                    Attempt::TransientResponse(err, response)
                }
                _ => {
                    self.state.record_success(url, latency_ms);
                    Attempt::Answered(response)
                }
            },
        }
    }

    /// Route one request through the endpoint set with retry/failover
    pub async fn request(&self, request: RequestPacket) -> Result<ResponsePacket, TransportError> {
        if self.endpoints.is_empty() {
            return Err(TransportErrorKind::custom_str("no rpc endpoints configured"));
        }

        let mut last_failed: Option<usize> = None;
        let mut last_error: Option<TransportError> = None;
        let mut last_response: Option<ResponsePacket> = None;

        for attempt in 0..=self.config.retry_count {
            if attempt > 0 {
                tokio::time::sleep(self.config.delay_for(attempt)).await;
            }
            let index = {
                let mut rng = rand::thread_rng();
                self.state.select(&mut rng, last_failed).unwrap_or(0)
            };

            match self.attempt(index, request.clone()).await {
                Attempt::Answered(response) => return Ok(response),
                Attempt::Rejected(err) => return Err(err),
                Attempt::Transient(err) => {
                    debug!(
                        transport = %self.config.key,
                        url = %self.state.urls()[index],
                        attempt,
                        "rpc attempt failed: {}",
                        err
                    );
                    last_failed = Some(index);
                    last_error = Some(err);
                }
                Attempt::TransientResponse(err, response) => {
                    debug!(
                        transport = %self.config.key,
                        url = %self.state.urls()[index],
                        attempt,
                        "rpc attempt returned transient error: {}",
                        err
                    );
                    last_failed = Some(index);
                    last_error = Some(err);
                    last_response = Some(response);
                }
            }
        }

        warn!(
            transport = %self.config.key,
            retries = self.config.retry_count,
            "rpc request failed on all attempts"
        );
        // a node's own error object carries more detail than our wrapper
        if let Some(response) = last_response {
            return Ok(response);
        }
        Err(last_error.unwrap_or_else(|| TransportErrorKind::custom_str("rpc request failed")))
    }
}

/// Most severe classified error among a packet's payloads, transient first
fn worst_payload_kind(response: &ResponsePacket) -> Option<RpcErrorKind> {
    let kinds: Vec<RpcErrorKind> = match response {
        ResponsePacket::Single(r) => payload_kind(&r.payload).into_iter().collect(),
        ResponsePacket::Batch(rs) => rs.iter().filter_map(|r| payload_kind(&r.payload)).collect(),
    };
    kinds
        .iter()
        .find(|k| k.is_transient())
        .or_else(|| kinds.first())
        .copied()
}

fn payload_kind(payload: &ResponsePayload) -> Option<RpcErrorKind> {
    match payload {
        ResponsePayload::Failure(err) => Some(RpcError::from_payload(err).kind),
        ResponsePayload::Success(_) => None,
    }
}

impl<S> Service<RequestPacket> for SolverTransport<S>
where
    S: Service<RequestPacket, Response = ResponsePacket, Error = TransportError>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send,
{
    type Response = ResponsePacket;
    type Error = TransportError;
    type Future = TransportFut<'static>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: RequestPacket) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { this.request(request).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::metrics::RpcConfig;
    use alloy::rpc::json_rpc::{Id, Request};
    use rand::Rng;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type MockResult = Result<ResponsePacket, TransportError>;

    fn request() -> RequestPacket {
        let req = Request::new("eth_blockNumber", Id::Number(1), ())
            .serialize()
            .unwrap();
        RequestPacket::Single(req)
    }

    fn ok_response() -> ResponsePacket {
        serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":"0x10"}"#).unwrap()
    }

    fn error_response(code: i64, message: &str) -> ResponsePacket {
        serde_json::from_str(&format!(
            r#"{{"jsonrpc":"2.0","id":1,"error":{{"code":{},"message":"{}"}}}}"#,
            code, message
        ))
        .unwrap()
    }

    fn fast_config(retry_count: u32) -> TransportConfig {
        TransportConfig {
            retry_count,
            retry_delay_ms: 0,
            timeout_ms: 1_000,
            ..Default::default()
        }
    }

    fn state(n: usize) -> Arc<RpcState> {
        Arc::new(RpcState::new(
            (0..n).map(|i| RpcConfig::new(format!("http://rpc-{}.test", i))).collect(),
        ))
    }

    fn is_error(response: &ResponsePacket) -> bool {
        worst_payload_kind(response).is_some()
    }

    /// Endpoint that always fails with a 502 or always answers
    fn fixed(fail: bool) -> impl Service<RequestPacket, Response = ResponsePacket, Error = TransportError, Future = impl std::future::Future<Output = MockResult> + Send> + Clone + Send + Sync + 'static {
        tower::service_fn(move |_req: RequestPacket| async move {
            let result: MockResult = if fail {
                Err(TransportErrorKind::http_error(502, "bad gateway".into()))
            } else {
                Ok(ok_response())
            };
            result
        })
    }

    #[tokio::test]
    async fn test_fails_over_to_healthy_endpoint() {
        let state = state(2);
        let transport = SolverTransport::new(vec![fixed(true), fixed(false)], state.clone(), fast_config(2));

        let response = transport.request(request()).await.unwrap();
        assert!(!is_error(&response));

        // a failed endpoint is never picked twice in a row when another exists
        let total: u64 = state.snapshot().iter().map(|s| s.req).sum();
        assert!(total <= 2);
        let healthy = state.metrics("http://rpc-1.test").unwrap();
        assert_eq!(healthy.success, 1);
    }

    #[tokio::test]
    async fn test_revert_is_returned_without_retry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let endpoint = tower::service_fn(move |_req: RequestPacket| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, TransportError>(error_response(3, "execution reverted")) }
        });
        let state = state(1);
        let transport = SolverTransport::new(vec![endpoint], state.clone(), fast_config(3));

        let response = transport.request(request()).await.unwrap();
        assert!(is_error(&response));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let m = state.metrics("http://rpc-0.test").unwrap();
        assert_eq!((m.req, m.success, m.failure), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_last_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let endpoint = tower::service_fn(move |_req: RequestPacket| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Err::<ResponsePacket, _>(TransportErrorKind::http_error(503, "unavailable".into())) }
        });
        let state = state(1);
        let transport = SolverTransport::new(vec![endpoint], state.clone(), fast_config(2));

        let err = transport.request(request()).await.unwrap_err();
        assert_eq!(RpcError::from_transport(&err).code, Some(503));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let m = state.metrics("http://rpc-0.test").unwrap();
        assert_eq!((m.req, m.success, m.failure), (3, 0, 3));
    }

    #[tokio::test]
    async fn test_rate_limited_payload_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let endpoint = tower::service_fn(move |_req: RequestPacket| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Ok::<_, TransportError>(error_response(-32005, "limit exceeded"))
                } else {
                    Ok(ok_response())
                }
            }
        });
        let transport = SolverTransport::new(vec![endpoint], state(1), fast_config(1));

        let response = transport.request(request()).await.unwrap();
        assert!(!is_error(&response));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_slow_endpoint_times_out() {
        let endpoint = tower::service_fn(|_req: RequestPacket| async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, TransportError>(ok_response())
        });
        let config = TransportConfig {
            retry_count: 0,
            retry_delay_ms: 0,
            timeout_ms: 20,
            ..Default::default()
        };
        let state = state(1);
        let transport = SolverTransport::new(vec![endpoint], state.clone(), config);

        assert!(transport.request(request()).await.is_err());
        let m = state.metrics("http://rpc-0.test").unwrap();
        assert_eq!(m.failure, 1);
    }

    #[tokio::test]
    async fn test_equally_flaky_endpoints_share_load() {
        let flaky = || {
            tower::service_fn(|_req: RequestPacket| async move {
                let fail = rand::thread_rng().gen_bool(0.5);
                let result: MockResult = if fail {
                    Err(TransportErrorKind::http_error(502, "bad gateway".into()))
                } else {
                    Ok(ok_response())
                };
                result
            })
        };
        let state = state(2);
        let transport = SolverTransport::new(vec![flaky(), flaky()], state.clone(), fast_config(0));

        for _ in 0..2_000 {
            let _ = transport.request(request()).await;
        }

        let a = state.metrics("http://rpc-0.test").unwrap();
        let b = state.metrics("http://rpc-1.test").unwrap();
        assert!(a.req > 500 && b.req > 500);
        assert!((a.success_rate() - b.success_rate()).abs() < 0.1);
        for m in [&a, &b] {
            assert_eq!(m.req, m.success + m.failure);
        }
    }

    #[test]
    fn test_backoff_doubles_delay() {
        let config = TransportConfig {
            retry_delay_ms: 100,
            backoff: true,
            ..Default::default()
        };
        assert_eq!(config.delay_for(1), Duration::from_millis(100));
        assert_eq!(config.delay_for(3), Duration::from_millis(400));
        let flat = TransportConfig { backoff: false, ..config };
        assert_eq!(flat.delay_for(3), Duration::from_millis(100));
    }
}
