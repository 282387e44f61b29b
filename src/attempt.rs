// ABOUTME: Generation attempt state machine with a bounded step counter and one structural repair
// ABOUTME: Covers prompt build, generator call, parse, schema validation, and hard constraints
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nutriplan Coaching

//! # Generation Attempt Runner
//!
//! One attempt walks BUILD_PROMPT → CALL_GENERATOR → PARSE → SCHEMA_VALIDATE →
//! HARD_CONSTRAINT_VALIDATE → {ACCEPT | REPAIR} as an explicit state machine
//! with a bounded step counter, so "at most one repair" is enforced by
//! structure rather than by manual tracking. Parse and schema failures route
//! to REPAIR instead of being retried blindly; the repair request carries the
//! original prompt, the rejected output verbatim, and the issue list. When all
//! outstanding issues are calorie/macro misses, the deterministic quantity
//! adjuster runs instead of spending the repair.

use chrono::NaiveDate;
use serde_json::Value;
use tracing::debug;

use crate::adjuster::{adjust_day, AdjusterPolicy};
use crate::config::PlannerConfig;
use crate::constraints::ConstraintEvaluator;
use crate::errors::{AppError, AppResult};
use crate::generation::prompts::{
    build_day_prompt, build_meal_prompt, build_plan_prompt, build_repair_prompt, RetryHint,
};
use crate::generation::schema;
use crate::generation::{GenerativeTextService, StructuredRequest};
use crate::models::{MealPlanDay, MealSlot, ResolvedRequest, ValidationIssue};
use crate::nutrition::NutritionLookup;
use crate::pool::CandidatePool;

/// Granularity of one generation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationScope {
    /// The full date range
    Plan,
    /// One day
    Day(NaiveDate),
    /// One meal
    Meal(NaiveDate, MealSlot),
}

/// States of the attempt machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    BuildPrompt,
    CallGenerator,
    Parse,
    SchemaValidate,
    HardConstraintValidate,
    Repair,
    Accept,
    Failed,
}

/// A successful attempt
#[derive(Debug, Clone)]
pub struct AttemptSuccess {
    /// Accepted days (a single wrapper day for meal scope)
    pub days: Vec<MealPlanDay>,
    /// Generator calls spent by this attempt (1 or 2)
    pub generator_calls: u32,
    /// Whether the repair call was spent
    pub repaired: bool,
}

/// Attempt runner over the generation and validation collaborators
pub struct AttemptRunner<'a> {
    generator: &'a dyn GenerativeTextService,
    evaluator: &'a ConstraintEvaluator,
    lookup: &'a dyn NutritionLookup,
    config: &'a PlannerConfig,
}

impl<'a> AttemptRunner<'a> {
    /// Upper bound on state transitions; the happy path takes six
    const MAX_STEPS: u32 = 16;

    /// Create a runner
    #[must_use]
    pub fn new(
        generator: &'a dyn GenerativeTextService,
        evaluator: &'a ConstraintEvaluator,
        lookup: &'a dyn NutritionLookup,
        config: &'a PlannerConfig,
    ) -> Self {
        Self {
            generator,
            evaluator,
            lookup,
            config,
        }
    }

    /// Run one attempt at the given scope
    ///
    /// # Errors
    ///
    /// Returns `GENERATION_FAILED` with the surviving issues once the single
    /// repair is exhausted; generator transport failures surface with their
    /// source attached.
    pub async fn run(
        &self,
        scope: GenerationScope,
        resolved: &ResolvedRequest,
        pool: &CandidatePool,
        hint: Option<&RetryHint>,
        temperature: f32,
    ) -> AppResult<AttemptSuccess> {
        let mut state = State::BuildPrompt;
        let mut steps: u32 = 0;

        let mut original_prompt = String::new();
        let mut prompt = String::new();
        let mut raw = String::new();
        let mut parsed: Option<Value> = None;
        let mut days: Vec<MealPlanDay> = Vec::new();
        let mut issues: Vec<ValidationIssue> = Vec::new();
        let mut generator_calls: u32 = 0;
        let mut repaired = false;

        loop {
            steps += 1;
            if steps > Self::MAX_STEPS {
                return Err(AppError::generation_failed(
                    "attempt exceeded its step budget",
                    &issues,
                ));
            }

            state = match state {
                State::BuildPrompt => {
                    original_prompt = self.build_prompt(scope, resolved, pool, hint);
                    prompt.clone_from(&original_prompt);
                    State::CallGenerator
                }

                State::CallGenerator => {
                    let request = StructuredRequest::new(
                        prompt.clone(),
                        Self::output_schema(scope, resolved),
                        if repaired {
                            self.config.repair_temperature
                        } else {
                            temperature
                        },
                        self.config.max_output_tokens,
                    );
                    raw = self.generator.generate_structured(&request).await.map_err(
                        |e| {
                            AppError::new(
                                crate::errors::ErrorCode::GenerationFailed,
                                "generation service call failed",
                            )
                            .with_source(e)
                        },
                    )?;
                    generator_calls += 1;
                    State::Parse
                }

                State::Parse => match schema::parse_output(&raw) {
                    Ok(value) => {
                        parsed = Some(value);
                        State::SchemaValidate
                    }
                    Err(issue) => {
                        debug!("parse failure routes to repair: {}", issue.message);
                        issues = vec![issue];
                        State::Repair
                    }
                },

                State::SchemaValidate => {
                    let value = parsed.take().unwrap_or(Value::Null);
                    issues = Self::validate_shape(scope, resolved, &value);
                    if issues.is_empty() {
                        match Self::into_days(scope, value) {
                            Ok(converted) => {
                                days = converted;
                                State::HardConstraintValidate
                            }
                            Err(issue) => {
                                issues = vec![issue];
                                State::Repair
                            }
                        }
                    } else {
                        State::Repair
                    }
                }

                State::HardConstraintValidate => {
                    issues = self.evaluate(scope, resolved, &days).await?;
                    if issues.is_empty() {
                        State::Accept
                    } else if issues.iter().all(|i| i.code.is_macro_related())
                        && !matches!(scope, GenerationScope::Meal(_, _))
                    {
                        // Macro-only misses: adjust deterministically instead of
                        // spending the repair
                        days = self.adjust_days(days, resolved).await?;
                        issues = self.evaluate(scope, resolved, &days).await?;
                        if issues.is_empty() {
                            State::Accept
                        } else {
                            // The adjusted days stay as the improved baseline
                            State::Repair
                        }
                    } else {
                        State::Repair
                    }
                }

                State::Repair => {
                    if repaired {
                        State::Failed
                    } else {
                        repaired = true;
                        prompt = build_repair_prompt(&original_prompt, &raw, &issues, resolved);
                        State::CallGenerator
                    }
                }

                State::Accept => {
                    return Ok(AttemptSuccess {
                        days,
                        generator_calls,
                        repaired,
                    });
                }

                State::Failed => {
                    return Err(AppError::generation_failed(
                        "generated output still violates hard constraints after repair",
                        &issues,
                    ));
                }
            };
        }
    }

    fn build_prompt(
        &self,
        scope: GenerationScope,
        resolved: &ResolvedRequest,
        pool: &CandidatePool,
        hint: Option<&RetryHint>,
    ) -> String {
        let cap = self.config.prompt_pool_cap;
        match scope {
            GenerationScope::Plan => build_plan_prompt(resolved, pool, cap, hint),
            GenerationScope::Day(date) => build_day_prompt(resolved, pool, cap, date, hint),
            GenerationScope::Meal(date, slot) => build_meal_prompt(resolved, pool, cap, date, slot),
        }
    }

    fn output_schema(scope: GenerationScope, resolved: &ResolvedRequest) -> Value {
        match scope {
            GenerationScope::Plan => schema::plan_schema(&resolved.dates, &resolved.slots),
            GenerationScope::Day(_) => schema::day_schema(&resolved.slots),
            GenerationScope::Meal(_, slot) => schema::meal_schema(slot),
        }
    }

    fn validate_shape(
        scope: GenerationScope,
        resolved: &ResolvedRequest,
        value: &Value,
    ) -> Vec<ValidationIssue> {
        match scope {
            GenerationScope::Plan => {
                schema::validate_plan_value(value, &resolved.dates, &resolved.slots)
            }
            GenerationScope::Day(date) => {
                schema::validate_day_value(value, date, &resolved.slots)
            }
            GenerationScope::Meal(_, slot) => schema::validate_meal_value(value, slot),
        }
    }

    /// Convert a structurally clean value into domain days
    fn into_days(
        scope: GenerationScope,
        value: Value,
    ) -> Result<Vec<MealPlanDay>, ValidationIssue> {
        let structural = |e: serde_json::Error| {
            ValidationIssue::new(
                "$",
                crate::models::IssueCode::StructuralMismatch,
                format!("typed conversion failed: {e}"),
            )
        };
        match scope {
            GenerationScope::Plan => {
                let draft: schema::PlanDraft = serde_json::from_value(value).map_err(structural)?;
                Ok(draft.into_days())
            }
            GenerationScope::Day(_) => {
                let draft: schema::DayDraft = serde_json::from_value(value).map_err(structural)?;
                Ok(vec![draft.into_day()])
            }
            GenerationScope::Meal(date, _) => {
                let draft: schema::MealDraft = serde_json::from_value(value).map_err(structural)?;
                let meal = draft.into_meal(date);
                Ok(vec![MealPlanDay {
                    date,
                    meals: vec![meal],
                }])
            }
        }
    }

    async fn evaluate(
        &self,
        scope: GenerationScope,
        resolved: &ResolvedRequest,
        days: &[MealPlanDay],
    ) -> AppResult<Vec<ValidationIssue>> {
        match scope {
            GenerationScope::Meal(_, _) => {
                let Some(meal) = days.first().and_then(|d| d.meals.first()) else {
                    return Ok(vec![ValidationIssue::new(
                        "$",
                        crate::models::IssueCode::StructuralMismatch,
                        "no meal was produced",
                    )]);
                };
                self.evaluator.evaluate_meal(meal, resolved).await
            }
            GenerationScope::Plan | GenerationScope::Day(_) => {
                self.evaluator.evaluate_plan(days, resolved).await
            }
        }
    }

    /// Apply the quantity adjuster to every day
    async fn adjust_days(
        &self,
        days: Vec<MealPlanDay>,
        resolved: &ResolvedRequest,
    ) -> AppResult<Vec<MealPlanDay>> {
        let policy = AdjusterPolicy {
            clamp_min: self.config.scale_clamp_min,
            clamp_max: self.config.scale_clamp_max,
            round_step_grams: self.config.round_step_grams,
        };

        let mut adjusted_days = Vec::with_capacity(days.len());
        for day in days {
            let all_refs: Vec<_> = day
                .meals
                .iter()
                .flat_map(|m| m.ingredients.iter().cloned())
                .collect();
            let totals = self.lookup.macro_totals(&all_refs).await?;
            let adjusted = adjust_day(
                &day,
                &totals,
                resolved.calorie_target.as_ref(),
                resolved.protein_min(),
                &policy,
            );
            if !adjusted.changes.is_empty() {
                debug!(
                    "adjusted {} quantities on {} by factor {:.3}",
                    adjusted.changes.len(),
                    day.date,
                    adjusted.scale,
                );
            }
            adjusted_days.push(adjusted.day);
        }
        Ok(adjusted_days)
    }
}
