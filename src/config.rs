// ABOUTME: Planner configuration with defaults and environment variable overrides
// ABOUTME: Holds policy constants like adjuster clamps, cache TTL, and retry temperatures
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nutriplan Coaching

//! Environment-overridable planner configuration
//!
//! Policy constants that were previously undocumented (the adjuster's scale
//! clamp, the quota "first failing day wins" ordering) live here as explicit
//! configuration rather than hard-coded invariants.

use std::env;
use std::time::Duration;
use tracing::warn;

/// Planner configuration
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Maximum plan length in days
    pub max_plan_days: u32,
    /// Lower bound of the quantity adjuster's scale factor
    pub scale_clamp_min: f64,
    /// Upper bound of the quantity adjuster's scale factor
    pub scale_clamp_max: f64,
    /// Quantity rounding step in grams
    pub round_step_grams: u32,
    /// Candidate pool cache time-to-live
    pub pool_cache_ttl: Duration,
    /// Maximum cached pool entries
    pub pool_cache_entries: usize,
    /// Result limit per category search term
    pub pool_search_limit: u32,
    /// Maximum candidates per category embedded in a prompt
    pub prompt_pool_cap: usize,
    /// Temperature of the first generation attempt
    pub initial_temperature: f32,
    /// Temperature of repair and regeneration attempts
    pub repair_temperature: f32,
    /// Output token ceiling per generator call, to avoid truncation
    pub max_output_tokens: u32,
    /// Report only the earliest failing day of the quota evaluation
    pub report_first_failing_day_only: bool,
    /// Fixed seed for provenance sampling; `None` derives one per request
    pub provenance_seed: Option<u64>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_plan_days: 28,
            scale_clamp_min: 0.7,
            scale_clamp_max: 1.3,
            round_step_grams: 5,
            pool_cache_ttl: Duration::from_secs(600),
            pool_cache_entries: 64,
            pool_search_limit: 20,
            prompt_pool_cap: 12,
            initial_temperature: 0.7,
            repair_temperature: 0.2,
            max_output_tokens: 8192,
            report_first_failing_day_only: true,
            provenance_seed: None,
        }
    }
}

impl PlannerConfig {
    /// Build a configuration from environment variables on top of defaults
    ///
    /// Unset variables keep their default; unparsable values are skipped with
    /// a warning rather than failing startup.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = parse_env::<u32>("NUTRIPLAN_MAX_PLAN_DAYS") {
            config.max_plan_days = v;
        }
        if let Some(v) = parse_env::<f64>("NUTRIPLAN_SCALE_CLAMP_MIN") {
            config.scale_clamp_min = v;
        }
        if let Some(v) = parse_env::<f64>("NUTRIPLAN_SCALE_CLAMP_MAX") {
            config.scale_clamp_max = v;
        }
        if let Some(v) = parse_env::<u64>("NUTRIPLAN_POOL_CACHE_TTL_SECS") {
            config.pool_cache_ttl = Duration::from_secs(v);
        }
        if let Some(v) = parse_env::<u32>("NUTRIPLAN_POOL_SEARCH_LIMIT") {
            config.pool_search_limit = v;
        }
        if let Some(v) = parse_env::<f32>("NUTRIPLAN_INITIAL_TEMPERATURE") {
            config.initial_temperature = v;
        }
        if let Some(v) = parse_env::<f32>("NUTRIPLAN_REPAIR_TEMPERATURE") {
            config.repair_temperature = v;
        }
        if let Some(v) = parse_env::<u32>("NUTRIPLAN_MAX_OUTPUT_TOKENS") {
            config.max_output_tokens = v;
        }

        config
    }
}

/// Parse an environment variable, warning on invalid values
fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring unparsable value '{raw}' for {name}");
            None
        }
    }
}
