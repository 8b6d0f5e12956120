//! RPC Endpoint Metrics
//!
//! Per-endpoint request bookkeeping (volume, outcomes, inter-request timing)
//! and the shared `RpcState` that the transport selects endpoints from.
//!
//! Design:
//!     - One `RpcMetrics` per endpoint for the process lifetime, keyed by the
//!       normalized URL so equivalent URLs collapse into one record
//!     - `RpcState` holds them in a DashMap: updates take a shard lock for the
//!       counter read-modify-write only, never across an awaited call
//!     - Selection is a weighted random draw: smoothed success rate scaled by
//!       a latency factor, floored so weak endpoints are still probed
//!
//! Created: 2026-10-19

use dashmap::DashMap;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Default number of inter-request gaps kept per endpoint
pub const DEFAULT_TRACK_SIZE: usize = 100;

/// Minimum relative weight any endpoint keeps in selection
const PROBE_FLOOR: f64 = 0.05;

/// Latency (ms) at which an endpoint's weight is halved
const LATENCY_HALF_WEIGHT_MS: f64 = 1_000.0;

/// Smoothing factor for the latency moving average
const LATENCY_EMA_ALPHA: f64 = 0.2;

/// Per-endpoint configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcConfig {
    pub url: String,
    /// Static multiplier on the endpoint's selection weight (default 1.0)
    #[serde(default)]
    pub selection_weight: Option<f64>,
    /// Max inter-request gaps kept for this endpoint
    #[serde(default)]
    pub track_size: Option<usize>,
}

impl RpcConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            selection_weight: None,
            track_size: None,
        }
    }
}

/// Canonical endpoint key: guarantees exactly one trailing slash
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Request counters and timing for one endpoint
#[derive(Debug, Clone, Default)]
pub struct RpcMetrics {
    pub req: u64,
    pub success: u64,
    pub failure: u64,
    /// Opaque per-endpoint memo
    pub cache: HashMap<String, serde_json::Value>,
    /// Bounded history of gaps between consecutive requests (ms)
    pub request_intervals: VecDeque<u64>,
    pub last_request_timestamp: Option<u64>,
    /// Moving average of completed call latency (ms)
    pub avg_latency_ms: Option<f64>,
    track_size: usize,
}

impl RpcMetrics {
    pub fn new(track_size: usize) -> Self {
        Self {
            track_size: track_size.max(1),
            ..Default::default()
        }
    }

    pub fn record_request(&mut self) {
        self.record_request_at(now_ms());
    }

    /// Same as `record_request` with an explicit clock reading
    pub fn record_request_at(&mut self, now: u64) {
        self.req += 1;
        if let Some(last) = self.last_request_timestamp {
            self.request_intervals.push_back(now.saturating_sub(last));
            while self.request_intervals.len() > self.track_size.max(1) {
                self.request_intervals.pop_front();
            }
        }
        self.last_request_timestamp = Some(now);
    }

    pub fn record_success(&mut self) {
        self.success += 1;
    }

    pub fn record_failure(&mut self) {
        self.failure += 1;
    }

    pub fn record_latency(&mut self, latency_ms: u64) {
        let sample = latency_ms as f64;
        self.avg_latency_ms = Some(match self.avg_latency_ms {
            Some(avg) => avg + LATENCY_EMA_ALPHA * (sample - avg),
            None => sample,
        });
    }

    /// Calls that neither succeeded nor failed: in flight or never resolved
    pub fn timeout(&self) -> u64 {
        debug_assert!(self.success + self.failure <= self.req);
        self.req.saturating_sub(self.success + self.failure)
    }

    /// Mean inter-request gap in whole ms (fraction truncated), 0 when empty
    pub fn avg_request_intervals(&self) -> u64 {
        if self.request_intervals.is_empty() {
            return 0;
        }
        let total: u64 = self.request_intervals.iter().sum();
        total / self.request_intervals.len() as u64
    }

    /// Laplace-smoothed success rate over resolved calls
    pub fn success_rate(&self) -> f64 {
        (self.success as f64 + 1.0) / ((self.success + self.failure) as f64 + 2.0)
    }

    /// Zero all counters and history, clearing the cache
    pub fn reset(&mut self) {
        self.reset_inner();
        self.cache.clear();
    }

    /// Zero all counters and history, keeping the cache
    pub fn reset_keep_cache(&mut self) {
        self.reset_inner();
    }

    fn reset_inner(&mut self) {
        self.req = 0;
        self.success = 0;
        self.failure = 0;
        self.request_intervals.clear();
        self.last_request_timestamp = None;
        self.avg_latency_ms = None;
    }

    /// Selection weight before the static multiplier and probe floor
    fn raw_weight(&self) -> f64 {
        let latency_factor = match self.avg_latency_ms {
            Some(ms) => LATENCY_HALF_WEIGHT_MS / (LATENCY_HALF_WEIGHT_MS + ms.max(0.0)),
            None => 1.0,
        };
        self.success_rate() * latency_factor
    }
}

/// Snapshot of one endpoint's metrics for logging
#[derive(Debug, Clone, Serialize)]
pub struct RpcMetricsSnapshot {
    pub url: String,
    pub req: u64,
    pub success: u64,
    pub failure: u64,
    pub timeout: u64,
    pub avg_request_intervals: u64,
    pub avg_latency_ms: Option<f64>,
}

/// Fixed endpoint list plus the shared URL -> metrics map
#[derive(Debug)]
pub struct RpcState {
    configs: Vec<RpcConfig>,
    urls: Vec<String>,
    metrics: DashMap<String, RpcMetrics>,
    keep_cache_on_reset: bool,
}

impl RpcState {
    pub fn new(configs: Vec<RpcConfig>) -> Self {
        let metrics = DashMap::new();
        let mut urls = Vec::with_capacity(configs.len());
        for config in &configs {
            let key = normalize_url(&config.url);
            let track_size = config.track_size.unwrap_or(DEFAULT_TRACK_SIZE);
            metrics
                .entry(key.clone())
                .or_insert_with(|| RpcMetrics::new(track_size));
            urls.push(key);
        }
        Self {
            configs,
            urls,
            metrics,
            keep_cache_on_reset: false,
        }
    }

    pub fn with_keep_cache_on_reset(mut self, keep: bool) -> Self {
        self.keep_cache_on_reset = keep;
        self
    }

    /// Normalized endpoint keys, in configuration order
    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub fn configs(&self) -> &[RpcConfig] {
        &self.configs
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Copy of one endpoint's metrics (any URL spelling)
    pub fn metrics(&self, url: &str) -> Option<RpcMetrics> {
        self.metrics.get(&normalize_url(url)).map(|m| m.clone())
    }

    fn update<F: FnOnce(&mut RpcMetrics)>(&self, url: &str, f: F) {
        if let Some(mut entry) = self.metrics.get_mut(&normalize_url(url)) {
            f(entry.value_mut());
        }
    }

    pub fn record_request(&self, url: &str) {
        self.update(url, |m| m.record_request());
    }

    pub fn record_success(&self, url: &str, latency_ms: u64) {
        self.update(url, |m| {
            m.record_success();
            m.record_latency(latency_ms);
        });
    }

    pub fn record_failure(&self, url: &str) {
        self.update(url, |m| m.record_failure());
    }

    /// Reset one endpoint (manual rotation), honoring the cache retention flag
    pub fn reset(&self, url: &str) {
        let keep = self.keep_cache_on_reset;
        self.update(url, |m| {
            if keep {
                m.reset_keep_cache();
            } else {
                m.reset();
            }
        });
    }

    /// Reset endpoints that resolved at least `min_calls` calls with a success
    /// rate under `floor`, giving them a fresh start in selection. Returns the
    /// rotated URLs.
    pub fn rotate_unhealthy(&self, min_calls: u64, floor: f64) -> Vec<String> {
        let stale: Vec<String> = self
            .urls
            .iter()
            .filter(|url| {
                self.metrics(url).map_or(false, |m| {
                    m.success + m.failure >= min_calls.max(1) && m.success_rate() < floor
                })
            })
            .cloned()
            .collect();
        for url in &stale {
            self.reset(url);
        }
        stale
    }

    /// Current selection weights, index-aligned with `urls()`
    pub fn selection_weights(&self) -> Vec<f64> {
        let raw: Vec<f64> = self
            .urls
            .iter()
            .zip(&self.configs)
            .map(|(url, config)| {
                let multiplier = config.selection_weight.unwrap_or(1.0).max(0.0);
                self.metrics
                    .get(url)
                    .map(|m| m.raw_weight() * multiplier)
                    .unwrap_or(multiplier)
            })
            .collect();
        let max = raw.iter().cloned().fold(0.0_f64, f64::max);
        raw.into_iter()
            .map(|w| w.max(max * PROBE_FLOOR).max(f64::MIN_POSITIVE))
            .collect()
    }

    /// Pick an endpoint index, never returning `exclude` when another exists
    pub fn select<R: Rng + ?Sized>(&self, rng: &mut R, exclude: Option<usize>) -> Option<usize> {
        if self.urls.is_empty() {
            return None;
        }
        let mut weights = self.selection_weights();
        if let Some(ex) = exclude {
            if weights.len() > 1 && ex < weights.len() {
                weights[ex] = 0.0;
            }
        }
        match WeightedIndex::new(&weights) {
            Ok(dist) => Some(dist.sample(rng)),
            Err(e) => {
                debug!("Weighted selection failed ({}), falling back to uniform", e);
                Some(rng.gen_range(0..self.urls.len()))
            }
        }
    }

    pub fn snapshot(&self) -> Vec<RpcMetricsSnapshot> {
        self.urls
            .iter()
            .filter_map(|url| {
                self.metrics.get(url).map(|m| RpcMetricsSnapshot {
                    url: url.clone(),
                    req: m.req,
                    success: m.success,
                    failure: m.failure,
                    timeout: m.timeout(),
                    avg_request_intervals: m.avg_request_intervals(),
                    avg_latency_ms: m.avg_latency_ms,
                })
            })
            .collect()
    }
}
