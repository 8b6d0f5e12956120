//! Solver Configuration
//!
//! One TOML file describes the chain, endpoints, contracts and tuning knobs.
//! Secrets stay out of it: the wallet key comes from `PRIVATE_KEY` (a `.env`
//! file is loaded first), and `RPC_URLS` may override the endpoint list.
//!
//! Created: 2026-10-19

use crate::arbitrage::{EngineConfig, SearchConfig, SubmitConfig};
use crate::router::RouterConfig;
use crate::rpc::{RpcConfig, TransportConfig};
use crate::types::Dispair;
use alloy::primitives::{Address, U256};
use alloy::signers::local::PrivateKeySigner;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct SolverConfig {
    pub chain_id: u64,
    #[serde(default)]
    pub rpc: Vec<RpcConfig>,
    #[serde(default)]
    pub transport: TransportConfig,
    /// Hex private key; read from `PRIVATE_KEY`, never from the file in practice
    #[serde(default)]
    pub wallet_key: Option<String>,

    /// Route-processor arb contract
    pub arb_address: Address,
    /// Inter-orderbook arb contract; that mode is off without it
    #[serde(default)]
    pub generic_arb_address: Option<Address>,
    pub dispair: Dispair,
    /// Only trade on these orderbooks when set
    #[serde(default)]
    pub orderbooks: Option<Vec<Address>>,
    pub subgraphs: Vec<String>,
    #[serde(default = "default_subgraph_timeout_ms")]
    pub subgraph_timeout_ms: u64,
    pub router: RouterConfig,
    pub wrapped_native: Address,
    #[serde(default = "default_multicall")]
    pub multicall_address: Address,

    #[serde(default = "default_hops")]
    pub hops: u32,
    #[serde(default = "default_transient_retries")]
    pub transient_retries: u32,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_gas_coverage")]
    pub gas_coverage_percentage: u64,
    #[serde(default = "default_percent")]
    pub gas_limit_multiplier: u64,
    #[serde(default = "default_gas_price_multiplier")]
    pub gas_price_multiplier: u64,
    #[serde(default = "default_gas_headroom")]
    pub gas_headroom_percentage: u64,
    #[serde(default)]
    pub max_ratio: bool,
    #[serde(default)]
    pub rp_only: bool,
    #[serde(default = "default_bounty_vault_id")]
    pub bounty_vault_id: u64,

    #[serde(default = "default_receipt_timeout_ms")]
    pub receipt_timeout_ms: u64,
    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,
    #[serde(default = "default_round_interval_secs")]
    pub round_interval_secs: u64,
    /// Pairs processed at once per round
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub explorer_url: Option<String>,
    #[serde(default)]
    pub metrics_keep_cache_on_reset: bool,
}

fn default_subgraph_timeout_ms() -> u64 { 30_000 }
fn default_multicall() -> Address { crate::orders::MULTICALL3_ADDRESS }
fn default_hops() -> u32 { 3 }
fn default_transient_retries() -> u32 { 2 }
fn default_retries() -> u32 { 1 }
fn default_gas_coverage() -> u64 { 100 }
fn default_percent() -> u64 { 100 }
fn default_gas_price_multiplier() -> u64 { 107 }
fn default_gas_headroom() -> u64 { 103 }
fn default_bounty_vault_id() -> u64 { 1 }
fn default_receipt_timeout_ms() -> u64 { 120_000 }
fn default_receipt_poll_interval_ms() -> u64 { 2_000 }
fn default_round_interval_secs() -> u64 { 10 }
fn default_concurrency() -> usize { 4 }

impl SolverConfig {
    /// Load `.env`, the TOML file, then environment overrides, and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        dotenv::dotenv().ok();

        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: Self =
            toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")?;

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Overrides from `lookup` (the process environment in `load`)
    pub fn apply_env<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        if let Some(key) = lookup("PRIVATE_KEY").filter(|k| !k.trim().is_empty()) {
            self.wallet_key = Some(key);
        }
        if let Some(urls) = lookup("RPC_URLS") {
            let rpcs: Vec<RpcConfig> = urls
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(RpcConfig::new)
                .collect();
            if !rpcs.is_empty() {
                self.rpc = rpcs;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.rpc.is_empty() {
            bail!("at least one rpc endpoint is required");
        }
        if self.subgraphs.is_empty() {
            bail!("at least one subgraph url is required");
        }
        if self.hops == 0 {
            bail!("hops must be at least 1");
        }
        if self.gas_limit_multiplier == 0 || self.gas_price_multiplier == 0 {
            bail!("gas multipliers must be greater than 0");
        }
        if self.gas_headroom_percentage < 100 {
            bail!("gas_headroom_percentage below 100 would loosen the guard");
        }
        if self.concurrency == 0 {
            bail!("concurrency must be at least 1");
        }
        Ok(())
    }

    pub fn signer(&self) -> Result<PrivateKeySigner> {
        let key = self
            .wallet_key
            .as_deref()
            .context("PRIVATE_KEY not set")?;
        key.trim()
            .trim_start_matches("0x")
            .parse::<PrivateKeySigner>()
            .context("PRIVATE_KEY is not a valid private key")
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            arb_address: self.arb_address,
            generic_arb_address: self.generic_arb_address,
            dispair: self.dispair,
            search: SearchConfig {
                hops: self.hops,
                transient_retries: self.transient_retries,
            },
            retries: self.retries,
            gas_coverage_percentage: self.gas_coverage_percentage,
            gas_limit_multiplier: self.gas_limit_multiplier,
            gas_headroom_percentage: self.gas_headroom_percentage,
            max_ratio: self.max_ratio,
            rp_only: self.rp_only,
            bounty_vault_id: U256::from(self.bounty_vault_id),
        }
    }

    pub fn submit_config(&self) -> SubmitConfig {
        SubmitConfig {
            receipt_timeout_ms: self.receipt_timeout_ms,
            receipt_poll_interval_ms: self.receipt_poll_interval_ms,
            explorer_url: self.explorer_url.clone(),
        }
    }

    pub fn round_interval(&self) -> Duration {
        Duration::from_secs(self.round_interval_secs)
    }
}
