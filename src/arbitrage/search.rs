//! Dryrun Binary Search
//!
//! Mode-agnostic driver: a mode only supplies "build the transaction for this
//! input size and gas-estimate it" (`Dryrun`). The driver owns sizing, hop
//! bookkeeping and halt classification.
//!
//! Sizing, for `hops = H` and full size `M`:
//!     - hop 0 tries `M`; success there is returned immediately
//!     - hop i moves the candidate by `M / 2^(i+1)`: up after a success,
//!       down after a revert, keeping the largest success seen
//!     - all-revert candidates are therefore `M, M/2, M/4, ...`
//!
//! Failure handling per hop:
//!     - Revert: recorded, halves
//!     - NodeError: retried at the same size from a separate transient
//!       budget; exhaustion ends the search with `isNodeError`
//!     - NoWalletFund: recorded, ends the search immediately
//!     - NoRoute before anything was attempted: ends with no `hops` key
//!     - Fatal (guard compile failure): ends the search
//!
//! Created: 2026-10-19

use crate::types::{Opportunity, RawTx, SpanAttributes};
use alloy::primitives::U256;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt;
use tracing::debug;

/// Why a single dryrun did not produce an opportunity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Execution reverted or the size is not viable
    Revert,
    /// Transient node failure; says nothing about the size
    NodeError,
    /// Signer cannot pay for gas
    NoWalletFund,
    /// No counterparty liquidity for this size
    NoRoute,
    /// Non-retryable local failure (guard compile)
    Fatal,
}

/// One failed dryrun with whatever context it gathered
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind:?}: {}", .error.as_deref().unwrap_or("no detail"))]
pub struct DryrunFailure {
    pub kind: FailureKind,
    pub error: Option<String>,
    pub market_price: Option<U256>,
    pub block_number: Option<u64>,
    pub route: Option<String>,
    pub rawtx: Option<RawTx>,
}

impl DryrunFailure {
    pub fn new(kind: FailureKind, error: impl Into<String>) -> Self {
        Self {
            kind,
            error: Some(error.into()),
            market_price: None,
            block_number: None,
            route: None,
            rawtx: None,
        }
    }

    pub fn no_route() -> Self {
        Self {
            kind: FailureKind::NoRoute,
            error: None,
            market_price: None,
            block_number: None,
            route: None,
            rawtx: None,
        }
    }

    pub fn with_market_price(mut self, price: Option<U256>) -> Self {
        self.market_price = price;
        self
    }

    pub fn with_block(mut self, block: u64) -> Self {
        self.block_number = Some(block);
        self
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    pub fn with_rawtx(mut self, rawtx: RawTx) -> Self {
        self.rawtx = Some(rawtx);
        self
    }
}

/// Closed set of search outcomes other than success
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum HaltReason {
    NoOpportunity,
    NoRoute,
    NoWalletFund,
    UnexpectedError,
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            HaltReason::NoOpportunity => "NoOpportunity",
            HaltReason::NoRoute => "NoRoute",
            HaltReason::NoWalletFund => "NoWalletFund",
            HaltReason::UnexpectedError => "UnexpectedError",
        };
        f.write_str(s)
    }
}

/// Search halt carrying the full diagnostic bag
#[derive(Debug, Clone, thiserror::Error)]
#[error("search halted: {reason}")]
pub struct DryrunHalt {
    pub reason: HaltReason,
    pub attributes: SpanAttributes,
}

impl DryrunHalt {
    pub fn new(reason: HaltReason) -> Self {
        Self {
            reason,
            attributes: SpanAttributes::new(),
        }
    }

    /// Hop records, if the search got far enough to attempt any
    pub fn hops(&self) -> Option<&Vec<Value>> {
        self.attributes.get("hops").and_then(Value::as_array)
    }

    pub fn is_node_error(&self) -> bool {
        self.attributes
            .get("isNodeError")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Per-mode primitive: build and gas-check the trade for one input size
#[async_trait]
pub trait Dryrun: Send + Sync {
    async fn dryrun(&self, max_input: U256) -> Result<Opportunity, DryrunFailure>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchConfig {
    /// Sized attempts, at least one
    pub hops: u32,
    /// Same-size retries allowed for node errors, across the whole search
    pub transient_retries: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            hops: 3,
            transient_retries: 2,
        }
    }
}

fn hop_record(max_input: U256, failure: &DryrunFailure) -> Value {
    json!({
        "maxInput": max_input.to_string(),
        "marketPrice": failure.market_price.map(|p| p.to_string()),
        "blockNumber": failure.block_number,
        "route": failure.route,
        "error": failure.error,
        "isNodeError": failure.kind == FailureKind::NodeError,
        "rawtx": failure.rawtx.as_ref().map(RawTx::to_json),
    })
}

fn halt(reason: HaltReason, hops: Option<Vec<Value>>, node_error: bool) -> DryrunHalt {
    let mut halt = DryrunHalt::new(reason);
    if let Some(hops) = hops {
        halt.attributes.insert("hops".to_string(), Value::Array(hops));
    }
    if node_error {
        halt.attributes.insert("isNodeError".to_string(), Value::Bool(true));
    }
    halt
}

/// Size the trade for `engine` starting from `max_input`
pub async fn binary_search<D: Dryrun + ?Sized>(
    engine: &D,
    max_input: U256,
    config: &SearchConfig,
) -> Result<Opportunity, DryrunHalt> {
    let hops = config.hops.max(1);
    let mut transient_budget = config.transient_retries;
    let mut records: Vec<Value> = Vec::new();
    let mut best: Option<Opportunity> = None;
    let mut candidate = max_input;

    for hop in 0..hops {
        let step = max_input >> (hop as usize + 1);

        let outcome = loop {
            match engine.dryrun(candidate).await {
                Err(f) if f.kind == FailureKind::NodeError && transient_budget > 0 => {
                    transient_budget -= 1;
                    debug!(
                        "node error at size {}, retrying same size ({} left): {}",
                        candidate, transient_budget, f
                    );
                }
                other => break other,
            }
        };

        match outcome {
            Ok(mut opp) => {
                if hop == 0 {
                    return Ok(opp);
                }
                debug!("hop {} succeeded at {}", hop, candidate);
                opp.attributes
                    .insert("hops".to_string(), Value::Array(records.clone()));
                best = Some(opp);
                candidate = candidate.saturating_add(step);
            }
            Err(failure) => match failure.kind {
                FailureKind::NoRoute if hop == 0 => {
                    return Err(halt(HaltReason::NoRoute, None, false));
                }
                FailureKind::NoWalletFund | FailureKind::Fatal => {
                    records.push(hop_record(candidate, &failure));
                    if let Some(opp) = best {
                        debug!("hop {} stopped the search at {}, keeping earlier success", hop, candidate);
                        return Ok(opp);
                    }
                    let reason = if failure.kind == FailureKind::NoWalletFund {
                        HaltReason::NoWalletFund
                    } else {
                        HaltReason::UnexpectedError
                    };
                    return Err(halt(reason, Some(records), false));
                }
                FailureKind::NodeError => {
                    records.push(hop_record(candidate, &failure));
                    return match best {
                        Some(opp) => Ok(opp),
                        None => Err(halt(HaltReason::NoOpportunity, Some(records), true)),
                    };
                }
                FailureKind::Revert | FailureKind::NoRoute => {
                    debug!("hop {} reverted at {}", hop, candidate);
                    records.push(hop_record(candidate, &failure));
                    candidate = candidate.saturating_sub(step);
                }
            },
        }
    }

    best.ok_or_else(|| halt(HaltReason::NoOpportunity, Some(records), false))
}
