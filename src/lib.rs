//! Orderbook Solver Library
//!
//! Finds and settles clearing opportunities for onchain limit orders:
//! route-processor (AMM counter-trade), inter-orderbook and intra-orderbook
//! modes, each sized by a gas-estimation-gated binary search, over a
//! multi-endpoint RPC transport with per-endpoint health scoring.
//!
//! Created: 2026-10-19

pub mod arbitrage;
pub mod client;
pub mod config;
pub mod contracts;
pub mod math;
pub mod orders;
pub mod processor;
pub mod router;
pub mod rpc;
pub mod task;
pub mod types;

// Re-export commonly used types
pub use arbitrage::{find_opp, EngineConfig, FindOppError, OppContext, PairPrices};
pub use client::{connect, AlloyClient, ChainClient};
pub use config::SolverConfig;
pub use processor::{process_pair, run_round, PairReport, ProcessContext, ProcessHalt};
pub use rpc::{RpcError, RpcErrorKind, RpcState, SolverTransport};
pub use types::{ModeKind, Opportunity, OrderPairObject, RawTx, TakeOrder};
