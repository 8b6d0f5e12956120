//! Guarded Gas Estimation
//!
//! Every mode estimates its settlement call twice:
//!     1. guard minimum 0 → raw gas, gas cost = gas × price × limit%
//!     2. guard minimum = cost × coverage% × headroom% → must still pass
//! and then ships the call with minimum = cost × coverage%. A revert on the
//! second pass means the trade cannot pay for its own gas.

use super::search::{DryrunFailure, FailureKind};
use super::OppContext;
use crate::contracts::TaskV1;
use crate::rpc::{RpcError, RpcErrorKind};
use crate::task::{build_task, Guard, TaskError};
use crate::types::RawTx;
use alloy::primitives::U256;
use tracing::debug;

/// Final transaction and its gas figures
#[derive(Debug, Clone)]
pub struct Estimated {
    pub rawtx: RawTx,
    pub gas_limit: u64,
    /// gas_limit × gas_price, native 18 decimals
    pub gas_cost: U256,
    /// Bounty the shipped guard requires
    pub minimum_bounty: U256,
}

/// Map a classified provider failure onto the search's failure kinds
pub fn failure_kind(err: &RpcError) -> FailureKind {
    match err.kind {
        RpcErrorKind::InsufficientFunds => FailureKind::NoWalletFund,
        RpcErrorKind::ExecutionReverted | RpcErrorKind::MalformedRequest => FailureKind::Revert,
        RpcErrorKind::RateLimited | RpcErrorKind::Timeout | RpcErrorKind::Unknown => {
            FailureKind::NodeError
        }
    }
}

pub fn rpc_failure(err: &RpcError) -> DryrunFailure {
    DryrunFailure::new(failure_kind(err), err.to_string())
}

/// A node hiccup on parse2 is retried like any other; a rejected program is fatal
fn task_failure(err: TaskError) -> DryrunFailure {
    match &err {
        TaskError::Parse(e) if e.is_transient() => DryrunFailure::new(failure_kind(e), err.to_string()),
        _ => DryrunFailure::new(FailureKind::Fatal, err.to_string()),
    }
}

async fn estimate(ctx: &OppContext, rawtx: &RawTx, block: u64) -> Result<u64, DryrunFailure> {
    ctx.client
        .estimate_gas(rawtx)
        .await
        .map_err(|e| rpc_failure(&e).with_block(block).with_rawtx(rawtx.clone()))
}

/// Two-pass estimation of the call `build` produces for a given task
pub async fn estimate_with_guard<F>(
    ctx: &OppContext,
    guard: &Guard,
    gas_price: u128,
    block: u64,
    build: F,
) -> Result<Estimated, DryrunFailure>
where
    F: Fn(TaskV1) -> RawTx + Send + Sync,
{
    let config = &ctx.config;
    let client = ctx.client.as_ref();

    let task = build_task(client, guard, U256::ZERO, &config.dispair)
        .await
        .map_err(task_failure)?;
    let mut rawtx = build(task);
    let gas = estimate(ctx, &rawtx, block).await?;

    let gas_limit = gas.saturating_mul(config.gas_limit_multiplier) / 100;
    let gas_cost = U256::from(gas_limit) * U256::from(gas_price);
    let mut minimum_bounty = U256::ZERO;

    if config.gas_coverage_percentage > 0 {
        let coverage = U256::from(config.gas_coverage_percentage);
        let headroom_min =
            gas_cost * coverage * U256::from(config.gas_headroom_percentage) / U256::from(10_000);
        let task = build_task(client, guard, headroom_min, &config.dispair)
            .await
            .map_err(task_failure)?;
        let headroom_tx = build(task);
        estimate(ctx, &headroom_tx, block).await?;
        debug!("headroom estimate passed with minimum {}", headroom_min);

        minimum_bounty = gas_cost * coverage / U256::from(100);
        let task = build_task(client, guard, minimum_bounty, &config.dispair)
            .await
            .map_err(task_failure)?;
        rawtx = build(task);
    }

    rawtx.gas = Some(gas_limit);
    Ok(Estimated {
        rawtx,
        gas_limit,
        gas_cost,
        minimum_bounty,
    })
}
