//! Opportunity Engines
//!
//! Three settlement modes share one binary-search driver:
//!     - route-processor: counter-trade through an AMM route (`arb3`)
//!     - inter-orderbook: opposing order on another orderbook (`arb3`
//!       wrapping an inner `takeOrders2`)
//!     - intra-orderbook: opposing order on the same orderbook (`multicall`
//!       of `clear2` + two `withdraw2`)
//!
//! `dispatch` runs the modes per pair and aggregates their diagnostics;
//! `executor` submits the winner and classifies the receipt.
//!
//! Created: 2026-10-19

pub mod dispatch;
pub mod estimate;
pub mod executor;
pub mod inter_orderbook;
pub mod intra_orderbook;
pub mod route_processor;
pub mod search;

pub use dispatch::{find_opp, find_opp_with_retries, FindOppError};
pub use executor::{submit, SubmitConfig, SubmitHalt, SubmitReport};
pub use search::{binary_search, Dryrun, DryrunFailure, DryrunHalt, FailureKind, HaltReason, SearchConfig};

use crate::client::ChainClient;
use crate::router::RouteFinder;
use crate::types::Dispair;
use alloy::primitives::{Address, U256};
use std::sync::Arc;

/// Static engine settings, shared by every pair in a round
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Route-processor arb contract
    pub arb_address: Address,
    /// Arb contract for inter-orderbook settlement; mode disabled when unset
    pub generic_arb_address: Option<Address>,
    pub dispair: Dispair,
    pub search: SearchConfig,
    /// Concurrent find_opp runs per pair
    pub retries: u32,
    /// Share of gas cost the bounty guard must cover, percent
    pub gas_coverage_percentage: u64,
    /// Gas limit over the estimate, percent
    pub gas_limit_multiplier: u64,
    /// Extra margin for the second estimation pass, percent
    pub gas_headroom_percentage: u64,
    /// Take orders at any ratio instead of the observed price
    pub max_ratio: bool,
    /// Only search route-processor mode
    pub rp_only: bool,
    pub bounty_vault_id: U256,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            arb_address: Address::ZERO,
            generic_arb_address: None,
            dispair: Dispair {
                interpreter: Address::ZERO,
                store: Address::ZERO,
                deployer: Address::ZERO,
            },
            search: SearchConfig::default(),
            retries: 1,
            gas_coverage_percentage: 100,
            gas_limit_multiplier: 100,
            gas_headroom_percentage: 103,
            max_ratio: false,
            rp_only: false,
            bounty_vault_id: U256::from(1),
        }
    }
}

/// Chain, router and settings every dryrun needs
#[derive(Clone)]
pub struct OppContext {
    pub client: Arc<dyn ChainClient>,
    pub router: Arc<dyn RouteFinder>,
    pub config: Arc<EngineConfig>,
}

/// Per-pair market context read at the start of processing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairPrices {
    /// Gas price with the configured multiplier applied
    pub gas_price: u128,
    /// Native price of the orders' input (buy) token, 18 decimals
    pub input_to_eth_price: U256,
    /// Native price of the orders' output (sell) token, 18 decimals
    pub output_to_eth_price: U256,
}

#[cfg(test)]
pub(crate) mod testing {
    //! Context builders shared by the mode tests

    use super::*;
    use crate::client::mock::MockClient;
    use crate::contracts::IParserV2;
    use crate::math::ONE18;
    use crate::router::mock::MockRouter;
    use alloy::primitives::Bytes;
    use alloy::sol_types::{SolCall, SolValue};

    pub fn dispair() -> Dispair {
        Dispair {
            interpreter: Address::repeat_byte(0xd1),
            store: Address::repeat_byte(0xd2),
            deployer: Address::repeat_byte(0xd3),
        }
    }

    pub fn engine_config() -> EngineConfig {
        EngineConfig {
            arb_address: Address::repeat_byte(0xa0),
            generic_arb_address: Some(Address::repeat_byte(0xa9)),
            dispair: dispair(),
            ..Default::default()
        }
    }

    /// Mock client answering parse2 with fixed bytecode and balanceOf with `balance`
    pub fn client(balance: U256) -> MockClient {
        MockClient::new().with_call(move |_to, data| {
            if data.len() >= 4 && data[..4] == IParserV2::parse2Call::SELECTOR {
                Ok(Bytes::from(vec![0xbe, 0xef]).abi_encode().into())
            } else {
                Ok(balance.abi_encode().into())
            }
        })
    }

    pub fn context(client: Arc<MockClient>, router: Arc<MockRouter>, config: EngineConfig) -> OppContext {
        OppContext {
            client,
            router,
            config: Arc::new(config),
        }
    }

    pub fn prices() -> PairPrices {
        PairPrices {
            gas_price: 1_000_000_000,
            input_to_eth_price: ONE18,
            output_to_eth_price: ONE18,
        }
    }
}
