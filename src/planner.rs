// ABOUTME: Orchestrator sequencing pool build, generation, guardrails, sanity, and provenance
// ABOUTME: Exposes whole-plan generation plus day and meal regeneration with bounded retries
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nutriplan Coaching

//! # Meal Planner Orchestrator
//!
//! Sequences every stage of a plan generation call as a single-threaded,
//! cooperative chain of awaited stages. Retry ceilings are structural: the
//! attempt runner owns the single repair, and the boolean retry budget here
//! permits at most one guardrails-deficit regeneration and one sanity
//! regeneration per top-level call, bounding total generator calls to roughly
//! four. Every tentative plan edit is cloned and validated before acceptance.

use async_trait::async_trait;
use chrono::NaiveDate;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::attempt::{AttemptRunner, GenerationScope};
use crate::config::PlannerConfig;
use crate::constraints::ConstraintEvaluator;
use crate::culinary::{CulinaryChecker, CulinaryRule};
use crate::errors::{AppError, AppResult};
use crate::generation::prompts::{quota_deficit_hint, RetryHint};
use crate::generation::GenerativeTextService;
use crate::guardrails::{
    DietLogicLoader, GuardVerdict, GuardrailsEnforcer, GuardrailsMode, GuardrailsRulesetLoader,
};
use crate::models::{
    GeneratorMode, Meal, MealPlanDay, MealPlanRequest, MealPlanResponse, MealSlot, OutputLanguage,
    PlanMetadata, ProvenanceSummary, ResolvedRequest, RetryReason,
};
use crate::nutrition::NutritionLookup;
use crate::pool::{CandidatePoolBuilder, Clock};
use crate::provenance::{PersistedMealPool, ProvenanceComposer};
use crate::sanity::SanityValidator;
use crate::template::TemplateGenerator;

/// Editability collaborator for partial regeneration targets
#[async_trait]
pub trait EditabilityGate: Send + Sync {
    /// Whether the day (or the specific slot on it) may still be regenerated
    async fn is_editable(&self, date: NaiveDate, slot: Option<MealSlot>) -> AppResult<bool>;
}

/// External collaborators injected into the planner
pub struct PlannerDependencies {
    /// Nutrition database lookup
    pub nutrition: Arc<dyn NutritionLookup>,
    /// Schema-constrained text generation
    pub generator: Arc<dyn GenerativeTextService>,
    /// Hard guardrails ruleset loader/evaluator
    pub guardrails: Arc<dyn GuardrailsRulesetLoader>,
    /// Diet-logic quota rule loader
    pub diet_logic: Arc<dyn DietLogicLoader>,
    /// Plausibility predicate
    pub sanity: Arc<dyn SanityValidator>,
    /// Previously accepted meals for provenance backfill
    pub meal_pool: Option<Arc<dyn PersistedMealPool>>,
    /// Editability gate for partial regeneration
    pub editability: Option<Arc<dyn EditabilityGate>>,
    /// Time source for the candidate pool cache
    pub clock: Arc<dyn Clock>,
}

/// Boolean retry budget; each flag permits exactly one regeneration
#[derive(Debug, Default, Clone, Copy)]
struct RetryBudget {
    guardrails_used: bool,
    sanity_used: bool,
}

/// The meal plan generation engine
pub struct MealPlanner {
    deps: PlannerDependencies,
    config: PlannerConfig,
    pool_builder: CandidatePoolBuilder,
    evaluator: ConstraintEvaluator,
    culinary: CulinaryChecker,
    enforcer: GuardrailsEnforcer,
}

impl MealPlanner {
    /// Create a planner
    ///
    /// # Errors
    ///
    /// Returns an `EVALUATOR_ERROR` when a culinary rule fails to compile.
    pub fn new(
        deps: PlannerDependencies,
        config: PlannerConfig,
        culinary_rules: Vec<CulinaryRule>,
        guardrails_mode: GuardrailsMode,
    ) -> AppResult<Self> {
        let pool_builder = CandidatePoolBuilder::new(
            deps.nutrition.clone(),
            deps.clock.clone(),
            config.pool_cache_ttl,
            config.pool_cache_entries,
            config.pool_search_limit,
        );
        let evaluator = ConstraintEvaluator::new(deps.nutrition.clone());
        let culinary = CulinaryChecker::new(culinary_rules)?;
        let enforcer = GuardrailsEnforcer::new(
            deps.guardrails.clone(),
            deps.diet_logic.clone(),
            guardrails_mode,
            config.report_first_failing_day_only,
        );

        Ok(Self {
            deps,
            config,
            pool_builder,
            evaluator,
            culinary,
            enforcer,
        })
    }

    /// Generate a full meal plan
    ///
    /// # Errors
    ///
    /// Returns a typed error per the engine taxonomy once the structural retry
    /// ceilings are exhausted.
    pub async fn generate(&self, request: &MealPlanRequest) -> AppResult<MealPlanResponse> {
        let resolved = ResolvedRequest::resolve(request, self.config.max_plan_days)?;
        info!(
            "generating plan {} for diet '{}': {} day(s), {} slot(s), mode {:?}",
            resolved.request_id,
            resolved.diet_key,
            resolved.dates.len(),
            resolved.slots.len(),
            resolved.mode,
        );

        let (pool, cache_hit) = self
            .pool_builder
            .pool_for(&resolved.diet_key, &resolved.all_excluded_terms)
            .await?;
        let locale = locale_of(resolved.language);

        // Guardrails-derived exclusion terms feed the template path's own
        // sanitizer without altering the pool cache key
        let extra_terms = if resolved.mode == GeneratorMode::Template {
            self.enforcer
                .exclusion_terms(&resolved.diet_key, locale)
                .await?
        } else {
            Vec::new()
        };

        let mut budget = RetryBudget::default();
        let mut hint: Option<RetryHint> = None;
        let mut attempts: u32 = 0;
        let mut retry_reason: Option<RetryReason> = None;
        let mut sanity_passed_first: Option<bool> = None;
        let mut stamp = None;

        let accepted = loop {
            let days = match resolved.mode {
                GeneratorMode::Generative => {
                    let runner = AttemptRunner::new(
                        self.deps.generator.as_ref(),
                        &self.evaluator,
                        self.deps.nutrition.as_ref(),
                        &self.config,
                    );
                    let temperature = if budget.sanity_used {
                        self.config.repair_temperature
                    } else {
                        self.config.initial_temperature
                    };
                    let outcome = runner
                        .run(
                            GenerationScope::Plan,
                            &resolved,
                            &pool,
                            hint.as_ref(),
                            temperature,
                        )
                        .await?;
                    attempts += outcome.generator_calls;
                    outcome.days
                }
                GeneratorMode::Template => {
                    let retry_seed = if budget.sanity_used {
                        2
                    } else if budget.guardrails_used {
                        1
                    } else {
                        0
                    };
                    attempts += 1;
                    TemplateGenerator::generate(&resolved, &pool, &extra_terms, retry_seed)?
                }
            };

            // Culinary coherence runs only on the free-form path
            if resolved.mode == GeneratorMode::Generative {
                let violations = self.culinary.check_plan(&days);
                if !violations.is_empty() {
                    return Err(AppError::culinary_violation(
                        "plan contains blocked meal combinations",
                        serde_json::to_value(&violations).unwrap_or_default(),
                    ));
                }
            }

            let (verdict, ruleset_stamp) = self
                .enforcer
                .enforce(&resolved.diet_key, locale, &days)
                .await?;
            stamp = Some(ruleset_stamp);

            match verdict {
                GuardVerdict::Pass { warnings } => {
                    for warning in warnings {
                        debug!("guardrails warning: {warning}");
                    }
                }
                GuardVerdict::QuotaDeficit {
                    day_index,
                    date,
                    deficits,
                } => {
                    if !budget.guardrails_used && !deficits.is_empty() {
                        budget.guardrails_used = true;
                        retry_reason = Some(RetryReason::GuardrailsDeficit);
                        hint = Some(quota_deficit_hint(&deficits));
                        info!(
                            "day {} ({date}) misses {} quota(s); spending the targeted retry",
                            day_index + 1,
                            deficits.len(),
                        );
                        continue;
                    }
                    let stamp = stamp.unwrap_or_default();
                    let reason_codes: Vec<String> =
                        deficits.iter().map(|d| d.category_code.clone()).collect();
                    return Err(AppError::guardrails_violation(
                        format!("day {} ({date}) misses required category minimums", day_index + 1),
                        &reason_codes,
                        &stamp.version,
                        &stamp.hash,
                        &deficits,
                    ));
                }
                GuardVerdict::Blocked { reason_codes } => {
                    let stamp = stamp.unwrap_or_default();
                    return Err(AppError::guardrails_violation(
                        "plan is blocked by dietary guardrails",
                        &reason_codes,
                        &stamp.version,
                        &stamp.hash,
                        &[],
                    ));
                }
            }

            let verdict = self.deps.sanity.check(&days).await?;
            if sanity_passed_first.is_none() {
                sanity_passed_first = Some(verdict.plausible);
            }
            if !verdict.plausible {
                if !budget.sanity_used {
                    budget.sanity_used = true;
                    retry_reason = Some(RetryReason::SanityRejected);
                    hint = None;
                    warn!("sanity validator rejected the plan; spending the lower-temperature retry");
                    continue;
                }
                return Err(AppError::sanity_failed(
                    "plan failed the plausibility check after retry",
                    &verdict.reasons,
                ));
            }

            break days;
        };

        let mut days = accepted;
        let (provenance, budget_fallback) = self.compose_provenance(&mut days, &resolved).await?;

        let metadata = PlanMetadata {
            generator_mode: resolved.mode,
            attempts,
            retry_reason,
            pool_metrics: Some(pool.metrics(cache_hit)),
            sanity_passed_first,
            guardrails: stamp,
            provenance,
            budget_fallback,
        };

        Ok(MealPlanResponse {
            request_id: resolved.request_id,
            days,
            metadata,
        })
    }

    /// Regenerate a single day of an existing plan
    ///
    /// # Errors
    ///
    /// Returns `LOCKED` when the day is already committed; otherwise the same
    /// taxonomy as [`Self::generate`].
    pub async fn generate_day(
        &self,
        request: &MealPlanRequest,
        date: NaiveDate,
    ) -> AppResult<MealPlanDay> {
        let resolved = ResolvedRequest::resolve(request, self.config.max_plan_days)?;
        if !resolved.dates.contains(&date) {
            return Err(AppError::invalid_request(format!(
                "date {date} is outside the requested plan range"
            )));
        }
        self.check_editable(date, None).await?;

        let (pool, _) = self
            .pool_builder
            .pool_for(&resolved.diet_key, &resolved.all_excluded_terms)
            .await?;
        let locale = locale_of(resolved.language);
        let runner = AttemptRunner::new(
            self.deps.generator.as_ref(),
            &self.evaluator,
            self.deps.nutrition.as_ref(),
            &self.config,
        );

        let mut hint: Option<RetryHint> = None;
        let mut quota_retry_used = false;

        loop {
            let outcome = runner
                .run(
                    GenerationScope::Day(date),
                    &resolved,
                    &pool,
                    hint.as_ref(),
                    self.config.initial_temperature,
                )
                .await?;
            let Some(day) = outcome.days.into_iter().next() else {
                return Err(AppError::generation_failed("no day was produced", &[]));
            };

            let violations = self.culinary.check_plan(std::slice::from_ref(&day));
            if !violations.is_empty() {
                return Err(AppError::culinary_violation(
                    "day contains blocked meal combinations",
                    serde_json::to_value(&violations).unwrap_or_default(),
                ));
            }

            let (verdict, stamp) = self
                .enforcer
                .enforce(&resolved.diet_key, locale, std::slice::from_ref(&day))
                .await?;
            match verdict {
                GuardVerdict::Pass { .. } => return Ok(day),
                GuardVerdict::QuotaDeficit { deficits, .. }
                    if !quota_retry_used && !deficits.is_empty() =>
                {
                    quota_retry_used = true;
                    hint = Some(quota_deficit_hint(&deficits));
                }
                GuardVerdict::QuotaDeficit { deficits, .. } => {
                    let reason_codes: Vec<String> =
                        deficits.iter().map(|d| d.category_code.clone()).collect();
                    return Err(AppError::guardrails_violation(
                        format!("day {date} misses required category minimums"),
                        &reason_codes,
                        &stamp.version,
                        &stamp.hash,
                        &deficits,
                    ));
                }
                GuardVerdict::Blocked { reason_codes } => {
                    return Err(AppError::guardrails_violation(
                        format!("day {date} is blocked by dietary guardrails"),
                        &reason_codes,
                        &stamp.version,
                        &stamp.hash,
                        &[],
                    ));
                }
            }
        }
    }

    /// Regenerate a single meal of an existing plan
    ///
    /// # Errors
    ///
    /// Returns `LOCKED` when the slot is already committed; otherwise the same
    /// taxonomy as [`Self::generate`].
    pub async fn generate_meal(
        &self,
        request: &MealPlanRequest,
        date: NaiveDate,
        slot: MealSlot,
    ) -> AppResult<Meal> {
        let resolved = ResolvedRequest::resolve(request, self.config.max_plan_days)?;
        if !resolved.dates.contains(&date) {
            return Err(AppError::invalid_request(format!(
                "date {date} is outside the requested plan range"
            )));
        }
        if !resolved.slots.contains(&slot) {
            return Err(AppError::invalid_request(format!(
                "slot {slot} was not part of the requested plan"
            )));
        }
        self.check_editable(date, Some(slot)).await?;

        let (pool, _) = self
            .pool_builder
            .pool_for(&resolved.diet_key, &resolved.all_excluded_terms)
            .await?;
        let runner = AttemptRunner::new(
            self.deps.generator.as_ref(),
            &self.evaluator,
            self.deps.nutrition.as_ref(),
            &self.config,
        );

        let outcome = runner
            .run(
                GenerationScope::Meal(date, slot),
                &resolved,
                &pool,
                None,
                self.config.initial_temperature,
            )
            .await?;
        let Some(meal) = outcome
            .days
            .into_iter()
            .next()
            .and_then(|d| d.meals.into_iter().next())
        else {
            return Err(AppError::generation_failed("no meal was produced", &[]));
        };

        let wrapper = MealPlanDay {
            date,
            meals: vec![meal.clone()],
        };
        let violations = self.culinary.check_plan(std::slice::from_ref(&wrapper));
        if !violations.is_empty() {
            return Err(AppError::culinary_violation(
                "meal matches a blocked combination rule",
                serde_json::to_value(&violations).unwrap_or_default(),
            ));
        }

        Ok(meal)
    }

    async fn check_editable(&self, date: NaiveDate, slot: Option<MealSlot>) -> AppResult<()> {
        if let Some(gate) = &self.deps.editability {
            if !gate.is_editable(date, slot).await? {
                let target = slot.map_or_else(
                    || format!("day {date}"),
                    |slot| format!("{slot} on {date}"),
                );
                return Err(AppError::locked(target));
            }
        }
        Ok(())
    }

    /// Provenance backfill and budget checks
    async fn compose_provenance(
        &self,
        days: &mut [MealPlanDay],
        resolved: &ResolvedRequest,
    ) -> AppResult<(ProvenanceSummary, bool)> {
        match (&self.deps.meal_pool, &resolved.provenance) {
            (Some(meal_pool), Some(options)) => {
                let composer = ProvenanceComposer::new(&self.evaluator, meal_pool.as_ref());
                let seed = self
                    .config
                    .provenance_seed
                    .unwrap_or_else(|| request_seed(resolved));
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                let outcome = composer.backfill(days, resolved, options, &mut rng).await?;
                Ok((outcome.summary, outcome.budget_fallback))
            }
            (None, Some(options)) => {
                // No pool to reuse from, but the configured budgets still hold
                let summary = ProvenanceComposer::all_generated(days);
                let budget_fallback = ProvenanceComposer::check_budgets(&summary, options)?;
                Ok((summary, budget_fallback))
            }
            (_, None) => Ok((ProvenanceComposer::all_generated(days), false)),
        }
    }
}

const fn locale_of(language: OutputLanguage) -> &'static str {
    match language {
        OutputLanguage::Nl => "nl",
        OutputLanguage::En => "en",
    }
}

/// Deterministic per-request sampling seed derived from the request id
fn request_seed(resolved: &ResolvedRequest) -> u64 {
    let bytes = resolved.request_id.as_bytes();
    u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}
