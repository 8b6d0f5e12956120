//! Orderbook Solver
//!
//! Main entry point. Every round:
//!     fetch orders → bundle pairs → quote → find opportunities → submit
//! then logs endpoint health and sleeps until the next round. Ctrl-C stops
//! the loop between rounds or cuts a sleep short.
//!
//! Created: 2026-10-19

use anyhow::{Context, Result};
use clap::Parser;
use orderbook_solver::arbitrage::OppContext;
use orderbook_solver::client::connect;
use orderbook_solver::config::SolverConfig;
use orderbook_solver::orders::SubgraphSource;
use orderbook_solver::processor::{run_round, ProcessContext, ProcessHalt};
use orderbook_solver::router::SushiApiRouter;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Onchain orderbook clearing bot
#[derive(Parser)]
#[command(name = "orderbook-solver")]
struct Args {
    /// Path to the TOML config
    #[arg(short, long, env = "SOLVER_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    /// Log filter, overridden by RUST_LOG when set
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Run a single round and exit
    #[arg(long)]
    once: bool,
}

fn init_tracing(args: &Args) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if args.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    let config = SolverConfig::load(&args.config)?;
    info!(
        "Orderbook Solver starting — chain {} | {} rpc(s) | {} subgraph(s)",
        config.chain_id,
        config.rpc.len(),
        config.subgraphs.len()
    );

    let signer = config.signer()?;
    let (client, rpc_state) = connect(
        config.rpc.clone(),
        config.transport.clone(),
        signer,
        config.metrics_keep_cache_on_reset,
    )
    .context("Failed to build chain client")?;
    let router = SushiApiRouter::new(config.chain_id, config.router.clone())
        .context("Failed to build route client")?;
    let source = SubgraphSource::new(
        config.subgraphs.clone(),
        Duration::from_millis(config.subgraph_timeout_ms),
    )
    .context("Failed to build subgraph client")?;

    let engine = config.engine_config();
    if engine.generic_arb_address.is_none() {
        info!("No generic arb contract configured — inter-orderbook mode disabled");
    }
    if engine.rp_only {
        info!("Route-processor mode only");
    }

    let pctx = ProcessContext {
        opp: OppContext {
            client: Arc::new(client),
            router: Arc::new(router),
            config: Arc::new(engine),
        },
        submit: config.submit_config(),
        wrapped_native: config.wrapped_native,
        multicall: config.multicall_address,
        gas_price_multiplier: config.gas_price_multiplier,
        concurrency: config.concurrency,
        orderbooks: config.orderbooks.clone(),
    };

    let mut round: u64 = 0;
    loop {
        round += 1;
        let started = chrono::Utc::now();
        info!("── Round {} started at {} ──", round, started.format("%H:%M:%S"));

        match run_round(&pctx, &source).await {
            Ok(outcomes) => {
                let cleared = outcomes.iter().filter(|o| o.result.is_ok()).count();
                let skipped = outcomes
                    .iter()
                    .filter(|o| matches!(o.result, Err(ProcessHalt::ZeroOutput)))
                    .count();
                info!(
                    "Round {} done in {}ms: {} pair(s), {} cleared, {} without output",
                    round,
                    (chrono::Utc::now() - started).num_milliseconds(),
                    outcomes.len(),
                    cleared,
                    skipped
                );
            }
            Err(e) => error!("Round {} failed to load orders: {}", round, e),
        }

        for snapshot in rpc_state.snapshot() {
            info!(
                url = %snapshot.url,
                req = snapshot.req,
                success = snapshot.success,
                failure = snapshot.failure,
                timeout = snapshot.timeout,
                avg_request_intervals = snapshot.avg_request_intervals,
                avg_latency_ms = ?snapshot.avg_latency_ms,
                "rpc health"
            );
        }

        for url in rpc_state.rotate_unhealthy(
            config.transport.rotate_min_calls,
            config.transport.rotate_success_floor,
        ) {
            warn!("Rotated unhealthy rpc {} back to a fresh start", url);
        }

        if args.once {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(config.round_interval()) => {}
            _ = tokio::signal::ctrl_c() => {
                warn!("Ctrl-C received, shutting down");
                break;
            }
        }
    }

    info!("Orderbook Solver stopped after {} round(s)", round);
    Ok(())
}
