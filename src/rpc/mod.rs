//! RPC Reliability Layer
//!
//! Multi-endpoint transport with per-endpoint metrics, weighted selection,
//! failover and retry. Errors are classified once here and everything above
//! matches on `RpcErrorKind`.
//!
//! Created: 2026-10-19

pub mod error;
pub mod metrics;
pub mod transport;

pub use error::{classify, RpcError, RpcErrorKind};
pub use metrics::{normalize_url, RpcConfig, RpcMetrics, RpcMetricsSnapshot, RpcState};
pub use transport::{SolverTransport, TransportConfig};
