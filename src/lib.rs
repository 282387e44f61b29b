// ABOUTME: Library entry point for the Nutriplan meal plan generation engine
// ABOUTME: Exposes plan generation with hard dietary constraint enforcement over external services
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nutriplan Coaching

#![deny(unsafe_code)]

//! # Nutriplan Engine
//!
//! A multi-day meal plan generation engine for a diet-coaching product. Every
//! accepted plan satisfies dietary hard constraints before it reaches a user:
//! meals are built only from ingredients identified by a stable
//! nutrition-database code, every day satisfies hard rules, and unreliable
//! output from the generative component is detected and repaired rather than
//! shown to the user.
//!
//! ## Architecture
//!
//! The engine consumes external collaborators behind async traits (a
//! nutrition lookup, a schema-constrained text-generation service, guardrails
//! and diet-logic rule loaders, a plausibility validator, and an optional
//! persisted meal pool) and exposes [`planner::MealPlanner::generate`] plus
//! day/meal regeneration calls.
//!
//! - **Candidate pool** ([`pool`]): category-representative candidates under
//!   an exclusion list, TTL-cached
//! - **Constraint evaluator** ([`constraints`]): pure hard-rule checks reused
//!   at plan, day, and meal granularity
//! - **Quantity adjuster** ([`adjuster`]): deterministic macro repair without
//!   a generator call
//! - **Attempt runner** ([`attempt`]): bounded generation state machine with
//!   one structural repair
//! - **Guardrails** ([`guardrails`]): hard allow/block rules and DROP/FORCE/
//!   LIMIT day quotas, fail-closed
//! - **Culinary checker** ([`culinary`]): term/regex rules against meal text
//! - **Template generator** ([`template`]): deterministic alternate path
//! - **Provenance composer** ([`provenance`]): history backfill and origin
//!   tracking
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use nutriplan::config::PlannerConfig;
//! use nutriplan::guardrails::{GuardrailsMode, StaticDietLogic, StaticGuardrailsLoader};
//! use nutriplan::planner::{MealPlanner, PlannerDependencies};
//! use nutriplan::pool::SystemClock;
//! use nutriplan::sanity::AlwaysPlausible;
//!
//! # async fn example(
//! #     nutrition: Arc<dyn nutriplan::nutrition::NutritionLookup>,
//! #     generator: Arc<dyn nutriplan::generation::GenerativeTextService>,
//! #     request: nutriplan::models::MealPlanRequest,
//! # ) -> nutriplan::errors::AppResult<()> {
//! let deps = PlannerDependencies {
//!     nutrition,
//!     generator,
//!     guardrails: Arc::new(StaticGuardrailsLoader::permissive("standaard")),
//!     diet_logic: Arc::new(StaticDietLogic::default()),
//!     sanity: Arc::new(AlwaysPlausible),
//!     meal_pool: None,
//!     editability: None,
//!     clock: Arc::new(SystemClock),
//! };
//! let planner = MealPlanner::new(deps, PlannerConfig::from_env(), Vec::new(), GuardrailsMode::Enforce)?;
//! let response = planner.generate(&request).await?;
//! println!("plan {} with {} day(s)", response.request_id, response.days.len());
//! # Ok(())
//! # }
//! ```

/// Deterministic quantity adjustment toward calorie/macro targets
pub mod adjuster;

/// Generation attempt state machine with bounded repair
pub mod attempt;

/// Planner configuration with environment overrides
pub mod config;

/// Constraint evaluation at plan, day, and meal granularity
pub mod constraints;

/// Culinary coherence rules against meal text
pub mod culinary;

/// Unified error taxonomy
pub mod errors;

/// Generative text service interface, schemas, and prompts
pub mod generation;

/// Guardrails rulesets and diet-logic day quotas
pub mod guardrails;

/// Structured logging setup
pub mod logging;

/// Plan data model and request normalization
pub mod models;

/// Nutrition database lookup interface
pub mod nutrition;

/// Meal plan orchestration
pub mod planner;

/// Candidate pool building and caching
pub mod pool;

/// Provenance backfill and budget checks
pub mod provenance;

/// Plausibility validation interface
pub mod sanity;

/// Deterministic template-based generation
pub mod template;

pub use errors::{AppError, AppResult, ErrorCode};
pub use models::{MealPlanRequest, MealPlanResponse};
pub use planner::MealPlanner;
