//! RPC Error Classification
//!
//! Every provider failure is classified once, at the transport boundary,
//! into a closed `RpcErrorKind`. Retry decisions (transport), hop decisions
//! (search driver) and halt reasons (NoWalletFund) all match on the kind,
//! never on raw numeric codes.

use alloy::rpc::json_rpc::ErrorPayload;
use alloy::transports::{TransportError, TransportErrorKind};
use serde::Serialize;
use std::fmt;

/// Provider error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RpcErrorKind {
    /// 429 / limit exceeded / too many requests
    RateLimited,
    /// Request did not complete within the transport timeout
    Timeout,
    /// Sender cannot pay for gas
    InsufficientFunds,
    /// Call reverted during execution (eth_call / eth_estimateGas)
    ExecutionReverted,
    /// Invalid request, params, method or encoding
    MalformedRequest,
    /// Anything else: dropped connections, 5xx, garbled responses
    Unknown,
}

impl RpcErrorKind {
    /// Node-side failure that says nothing about the request itself
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RpcErrorKind::RateLimited | RpcErrorKind::Timeout | RpcErrorKind::Unknown
        )
    }

    /// The request is deterministic and retrying on another endpoint cannot help
    pub fn should_throw(&self) -> bool {
        !self.is_transient()
    }
}

impl fmt::Display for RpcErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            RpcErrorKind::RateLimited => "rate limited",
            RpcErrorKind::Timeout => "timeout",
            RpcErrorKind::InsufficientFunds => "insufficient funds",
            RpcErrorKind::ExecutionReverted => "execution reverted",
            RpcErrorKind::MalformedRequest => "malformed request",
            RpcErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Classified RPC failure carrying the provider's own code/message/data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RpcError {
    pub kind: RpcErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl RpcError {
    pub fn new(kind: RpcErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
            data: None,
        }
    }

    pub fn timeout() -> Self {
        Self::new(RpcErrorKind::Timeout, "request timed out")
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// Classify a JSON-RPC error object
    pub fn from_payload(payload: &ErrorPayload) -> Self {
        let message = payload.message.to_string();
        let data = payload.data.as_ref().map(|d| d.get().trim_matches('"').to_string());
        Self {
            kind: classify(Some(payload.code), &message, data.as_deref()),
            code: Some(payload.code),
            message,
            data,
        }
    }

    /// Classify any transport-level failure
    pub fn from_transport(err: &TransportError) -> Self {
        match err {
            TransportError::ErrorResp(payload) => Self::from_payload(payload),
            TransportError::Transport(TransportErrorKind::HttpError(http)) => {
                let code = http.status as i64;
                let kind = match http.status {
                    429 => RpcErrorKind::RateLimited,
                    408 | 504 => RpcErrorKind::Timeout,
                    400 => classify(None, &http.body, None),
                    _ => RpcErrorKind::Unknown,
                };
                Self {
                    kind,
                    code: Some(code),
                    message: http.body.clone(),
                    data: None,
                }
            }
            TransportError::SerError(_) | TransportError::LocalUsageError(_) => Self {
                kind: RpcErrorKind::MalformedRequest,
                code: None,
                message: err.to_string(),
                data: None,
            },
            other => {
                let message = other.to_string();
                Self {
                    kind: classify(None, &message, None),
                    code: None,
                    message,
                    data: None,
                }
            }
        }
    }
}

impl From<TransportError> for RpcError {
    fn from(err: TransportError) -> Self {
        RpcError::from_transport(&err)
    }
}

/// Classification shared by payload and transport paths.
///
/// Reverts are recognised first. Other message matching runs before code
/// matching because providers reuse -32000 for funding errors and rate
/// limits alike.
pub fn classify(code: Option<i64>, message: &str, data: Option<&str>) -> RpcErrorKind {
    let msg = message.to_ascii_lowercase();

    // EIP-1474 revert code; revert reasons are free text and may mention
    // limits or balances
    if code == Some(3) || msg.contains("execution reverted") || msg.contains("revert") {
        return RpcErrorKind::ExecutionReverted;
    }
    if msg.contains("insufficient funds")
        || msg.contains("insufficient balance for transfer")
        || msg.contains("gas required exceeds allowance")
    {
        return RpcErrorKind::InsufficientFunds;
    }
    if msg.contains("rate limit")
        || msg.contains("too many requests")
        || msg.contains("limit exceeded")
        || msg.contains("exceeded the quota")
        || msg.contains("compute units per second")
        || msg.contains("429")
    {
        return RpcErrorKind::RateLimited;
    }
    if msg.contains("timeout") || msg.contains("timed out") {
        return RpcErrorKind::Timeout;
    }
    match code {
        Some(-32005) | Some(-32016) | Some(429) => RpcErrorKind::RateLimited,
        Some(-32700) | Some(-32600) | Some(-32601) | Some(-32602) => {
            RpcErrorKind::MalformedRequest
        }
        Some(-32000) | Some(-32015) if data.map_or(false, |d| d.starts_with("0x")) => {
            RpcErrorKind::ExecutionReverted
        }
        _ => RpcErrorKind::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_funding_errors_are_fatal() {
        let kind = classify(
            Some(-32000),
            "insufficient funds for gas * price + value: address 0xabc have 0 want 1000",
            None,
        );
        assert_eq!(kind, RpcErrorKind::InsufficientFunds);
        assert!(kind.should_throw());
    }

    #[test]
    fn test_rate_limits_are_transient() {
        assert_eq!(classify(Some(-32005), "request failed", None), RpcErrorKind::RateLimited);
        assert_eq!(
            classify(Some(-32000), "Too Many Requests", None),
            RpcErrorKind::RateLimited
        );
        assert!(RpcErrorKind::RateLimited.is_transient());
        assert!(RpcErrorKind::Timeout.is_transient());
        assert!(RpcErrorKind::Unknown.is_transient());
    }

    #[test]
    fn test_reverts_and_malformed() {
        assert_eq!(
            classify(Some(3), "execution reverted: minimum sender output", Some("0x08c379a0")),
            RpcErrorKind::ExecutionReverted
        );
        assert_eq!(
            classify(Some(-32000), "some node error", Some("0xdeadbeef")),
            RpcErrorKind::ExecutionReverted
        );
        assert_eq!(classify(Some(-32602), "invalid params", None), RpcErrorKind::MalformedRequest);
        assert_eq!(classify(Some(-32000), "header not found", None), RpcErrorKind::Unknown);
    }

    #[test]
    fn test_revert_reason_wins_over_keywords() {
        assert_eq!(
            classify(Some(3), "execution reverted: limit exceeded", None),
            RpcErrorKind::ExecutionReverted
        );
        assert_eq!(
            classify(Some(-32000), "execution reverted: oracle timeout", None),
            RpcErrorKind::ExecutionReverted
        );
        assert_eq!(
            classify(
                Some(-32000),
                "execution reverted: ERC20: insufficient balance for transfer",
                None
            ),
            RpcErrorKind::ExecutionReverted
        );
        assert_eq!(classify(Some(3), "rate limit", None), RpcErrorKind::ExecutionReverted);
    }

    #[test]
    fn test_payload_conversion_keeps_provider_fields() {
        let payload: ErrorPayload = serde_json::from_str(
            r#"{"code":3,"message":"execution reverted","data":"0x1234"}"#,
        )
        .unwrap();
        let err = RpcError::from_payload(&payload);
        assert_eq!(err.kind, RpcErrorKind::ExecutionReverted);
        assert_eq!(err.code, Some(3));
        assert_eq!(err.data.as_deref(), Some("0x1234"));
    }

    #[test]
    fn test_http_status_mapping() {
        let err = TransportErrorKind::http_error(429, "slow down".to_string());
        assert_eq!(RpcError::from_transport(&err).kind, RpcErrorKind::RateLimited);
        let err = TransportErrorKind::http_error(502, "bad gateway".to_string());
        assert_eq!(RpcError::from_transport(&err).kind, RpcErrorKind::Unknown);
    }
}
