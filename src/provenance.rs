// ABOUTME: Provenance composer backfilling plan slots from previously used meals
// ABOUTME: Samples target positions, substitutes under validation, and tracks slot origins
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nutriplan Coaching

//! # Provenance Composer
//!
//! After acceptance, a target fraction of slots is backfilled from a
//! caller-supplied pool of previously used meals. Positions are sampled
//! uniformly over the full (day, slot) grid, then processed in (day, slot)
//! order so per-day de-duplication stays consistent. Every substitution is
//! applied to a clone and kept only when the substituted plan still passes the
//! constraint evaluator. Per-slot origins and aggregate counts feed the
//! response metadata; budget checks read those counts downstream.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::constraints::ConstraintEvaluator;
use crate::errors::{AppError, AppResult};
use crate::models::{
    MealOrigin, MealPlanDay, MealSlot, ProvenanceOptions, ProvenanceSummary, ResolvedRequest,
    SlotProvenance,
};

/// Source a pooled meal was accepted from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolSource {
    /// Curated recipe store
    RecipeStore,
    /// The user's own meal history
    MealHistory,
}

impl PoolSource {
    const fn origin(self) -> MealOrigin {
        match self {
            Self::RecipeStore => MealOrigin::Db,
            Self::MealHistory => MealOrigin::History,
        }
    }
}

/// A previously accepted meal eligible for reuse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PooledMeal {
    /// The meal as previously accepted
    pub meal: crate::models::Meal,
    /// Where it came from
    pub source: PoolSource,
}

/// Optional collaborator supplying previously accepted meals per slot
#[async_trait]
pub trait PersistedMealPool: Send + Sync {
    /// Previously accepted meals for a slot, most relevant first
    async fn meals_for_slot(&self, slot: MealSlot) -> AppResult<Vec<PooledMeal>>;
}

/// Static in-memory meal pool for tests
#[derive(Debug, Default)]
pub struct StaticMealPool {
    meals: HashMap<MealSlot, Vec<PooledMeal>>,
}

impl StaticMealPool {
    /// Create an empty pool
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pooled meal under its slot
    pub fn add(&mut self, meal: PooledMeal) {
        self.meals.entry(meal.meal.slot).or_default().push(meal);
    }
}

#[async_trait]
impl PersistedMealPool for StaticMealPool {
    async fn meals_for_slot(&self, slot: MealSlot) -> AppResult<Vec<PooledMeal>> {
        Ok(self.meals.get(&slot).cloned().unwrap_or_default())
    }
}

/// Outcome of the backfill pass
#[derive(Debug, Clone)]
pub struct BackfillOutcome {
    /// Provenance counts and per-slot records
    pub summary: ProvenanceSummary,
    /// Whether a budget shortfall was accepted under the fallback flag
    pub budget_fallback: bool,
}

/// Provenance composer over a meal pool and the constraint evaluator
pub struct ProvenanceComposer<'a> {
    evaluator: &'a ConstraintEvaluator,
    pool: &'a dyn PersistedMealPool,
}

impl<'a> ProvenanceComposer<'a> {
    /// Create a composer
    #[must_use]
    pub fn new(evaluator: &'a ConstraintEvaluator, pool: &'a dyn PersistedMealPool) -> Self {
        Self { evaluator, pool }
    }

    /// Backfill the plan in place and return the provenance outcome
    ///
    /// # Errors
    ///
    /// Returns `AI_BUDGET_EXCEEDED` or `DB_COVERAGE_TOO_LOW` when the
    /// configured budgets are missed and the fallback flag is off; lookup
    /// failures propagate.
    pub async fn backfill(
        &self,
        days: &mut [MealPlanDay],
        resolved: &ResolvedRequest,
        options: &ProvenanceOptions,
        rng: &mut impl Rng,
    ) -> AppResult<BackfillOutcome> {
        let grid: Vec<(usize, MealSlot)> = days
            .iter()
            .enumerate()
            .flat_map(|(day_index, day)| day.meals.iter().map(move |m| (day_index, m.slot)))
            .collect();
        let total = grid.len();
        let target_count =
            ((total as f64) * options.target_fraction).round().min(total as f64) as usize;

        // Uniform sample of target positions, then (day, slot) processing order
        let mut positions = grid;
        positions.shuffle(rng);
        positions.truncate(target_count);
        positions.sort_unstable();

        let mut origins: HashMap<(usize, MealSlot), MealOrigin> = HashMap::new();

        for (day_index, slot) in positions {
            let candidates = self.pool.meals_for_slot(slot).await?;
            if candidates.is_empty() {
                continue;
            }

            let used_today: Vec<String> = days[day_index]
                .meals
                .iter()
                .map(|m| m.name.to_lowercase())
                .collect();
            let previous_day_meal: Option<String> = day_index.checked_sub(1).and_then(|prev| {
                days[prev]
                    .meals
                    .iter()
                    .find(|m| m.slot == slot)
                    .map(|m| m.name.to_lowercase())
            });

            let replacement = candidates.iter().find(|pooled| {
                let name = pooled.meal.name.to_lowercase();
                !used_today.contains(&name) && previous_day_meal.as_deref() != Some(name.as_str())
            });
            let Some(replacement) = replacement else {
                continue;
            };

            // Clone, substitute, validate; a rejected candidate never touches the plan
            let mut candidate_day = days[day_index].clone();
            if let Some(meal) = candidate_day.meals.iter_mut().find(|m| m.slot == slot) {
                let mut substituted = replacement.meal.clone();
                substituted.date = candidate_day.date;
                substituted.slot = slot;
                *meal = substituted;
            }

            let issues = self.evaluator.evaluate_day(&candidate_day, resolved).await?;
            if issues.is_empty() {
                days[day_index] = candidate_day;
                origins.insert((day_index, slot), replacement.source.origin());
            } else {
                debug!(
                    "skipping pooled meal '{}' for {slot} on day {day_index}: {} issue(s)",
                    replacement.meal.name,
                    issues.len(),
                );
            }
        }

        let summary = Self::summarize(days, &origins);
        Self::check_budgets(&summary, options).map(|budget_fallback| BackfillOutcome {
            summary,
            budget_fallback,
        })
    }

    /// Summary for a plan with no backfill at all (every slot AI-authored)
    #[must_use]
    pub fn all_generated(days: &[MealPlanDay]) -> ProvenanceSummary {
        Self::summarize(days, &HashMap::new())
    }

    fn summarize(
        days: &[MealPlanDay],
        origins: &HashMap<(usize, MealSlot), MealOrigin>,
    ) -> ProvenanceSummary {
        let mut summary = ProvenanceSummary::default();
        for (day_index, day) in days.iter().enumerate() {
            for meal in &day.meals {
                let origin = origins
                    .get(&(day_index, meal.slot))
                    .copied()
                    .unwrap_or(MealOrigin::Ai);
                match origin {
                    MealOrigin::Ai => summary.generated_recipe_count += 1,
                    MealOrigin::Db => {
                        summary.reused_recipe_count += 1;
                        summary.db_count += 1;
                    }
                    MealOrigin::History => {
                        summary.reused_recipe_count += 1;
                        summary.history_count += 1;
                    }
                }
                summary.slots.push(SlotProvenance {
                    date: day.date,
                    slot: meal.slot,
                    origin,
                });
            }
        }
        summary
    }

    /// Budget checks over the summary; returns whether fallback was used
    ///
    /// Also applies when no meal pool is available at all: a caller that
    /// bounds AI-authored slots or requires database coverage gets the same
    /// enforcement over an entirely generated plan.
    ///
    /// # Errors
    ///
    /// Returns `AI_BUDGET_EXCEEDED` or `DB_COVERAGE_TOO_LOW` when a budget is
    /// missed and the fallback flag is off.
    pub fn check_budgets(summary: &ProvenanceSummary, options: &ProvenanceOptions) -> AppResult<bool> {
        let total = summary.generated_recipe_count + summary.reused_recipe_count;
        if total == 0 {
            return Ok(false);
        }

        if let Some(max_ai) = options.max_ai_slots {
            if summary.generated_recipe_count > max_ai {
                if !options.allow_budget_fallback {
                    return Err(AppError::ai_budget_exceeded(
                        summary.generated_recipe_count,
                        max_ai,
                    ));
                }
                return Ok(true);
            }
        }

        if let Some(min_ratio) = options.min_db_ratio {
            let db_ratio = f64::from(summary.db_count) / f64::from(total);
            if db_ratio < min_ratio {
                if !options.allow_budget_fallback {
                    return Err(AppError::db_coverage_too_low(db_ratio, min_ratio));
                }
                return Ok(true);
            }
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::models::{
        DietProfile, GeneratorMode, IngredientRef, MacroSummary, Meal, MealPlanRequest,
    };
    use crate::nutrition::InMemoryNutritionLookup;
    use chrono::NaiveDate;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;
    use uuid::Uuid;

    fn lookup() -> Arc<InMemoryNutritionLookup> {
        let mut lookup = InMemoryNutritionLookup::new();
        for (code, name) in [
            ("nevo-1", "Kipfilet"),
            ("nevo-2", "Zalmfilet"),
            ("nevo-3", "Pindakaas"),
        ] {
            lookup.insert(InMemoryNutritionLookup::record(
                code,
                name,
                &[],
                MacroSummary::default(),
            ));
        }
        Arc::new(lookup)
    }

    fn resolved(allergies: Vec<String>) -> ResolvedRequest {
        let request = MealPlanRequest {
            start_date: NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 3, 4).unwrap(),
            slots: vec![MealSlot::Dinner],
            profile: DietProfile {
                diet_key: "standaard".into(),
                allergies,
                ..DietProfile::default()
            },
            exclude_ingredients: vec![],
            prefer_ingredients: vec![],
            therapeutic_targets: vec![],
            language: crate::models::OutputLanguage::Nl,
            mode: GeneratorMode::Generative,
            preapproved_candidates: std::collections::BTreeMap::new(),
            provenance: None,
        };
        ResolvedRequest::resolve(&request, 28).unwrap()
    }

    fn meal_named(name: &str, code: &str, date: NaiveDate) -> Meal {
        Meal {
            id: Uuid::new_v4(),
            name: name.into(),
            slot: MealSlot::Dinner,
            date,
            ingredients: vec![IngredientRef {
                code: code.into(),
                quantity_grams: 150,
                display_name: Some(name.into()),
                tags: vec![],
                canonical_id: None,
            }],
            macros: None,
            prep_time_minutes: None,
            servings: None,
        }
    }

    fn two_day_plan() -> Vec<MealPlanDay> {
        let d1 = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2025, 3, 4).unwrap();
        vec![
            MealPlanDay {
                date: d1,
                meals: vec![meal_named("Gegrilde kip", "nevo-1", d1)],
            },
            MealPlanDay {
                date: d2,
                meals: vec![meal_named("Gegrilde kip", "nevo-1", d2)],
            },
        ]
    }

    fn options(fraction: f64) -> ProvenanceOptions {
        ProvenanceOptions {
            target_fraction: fraction,
            max_ai_slots: None,
            min_db_ratio: None,
            allow_budget_fallback: false,
        }
    }

    #[tokio::test]
    async fn counts_always_sum_to_total_meals() {
        let evaluator = ConstraintEvaluator::new(lookup());
        let mut pool = StaticMealPool::new();
        pool.add(PooledMeal {
            meal: meal_named("Zalm uit de oven", "nevo-2", NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()),
            source: PoolSource::RecipeStore,
        });
        let composer = ProvenanceComposer::new(&evaluator, &pool);

        let mut days = two_day_plan();
        let resolved = resolved(vec![]);
        let mut rng = StdRng::seed_from_u64(7);
        let outcome = composer
            .backfill(&mut days, &resolved, &options(0.5), &mut rng)
            .await
            .unwrap();

        let total: u32 = days.iter().map(|d| d.meals.len() as u32).sum();
        assert_eq!(
            outcome.summary.generated_recipe_count + outcome.summary.reused_recipe_count,
            total,
        );
        assert_eq!(outcome.summary.slots.len(), total as usize);
    }

    #[tokio::test]
    async fn substitution_keeps_dates_consistent_and_validates() {
        let evaluator = ConstraintEvaluator::new(lookup());
        let mut pool = StaticMealPool::new();
        // The pooled meal violates the peanut allergy and must be skipped
        pool.add(PooledMeal {
            meal: meal_named("Pindakaas wrap", "nevo-3", NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()),
            source: PoolSource::RecipeStore,
        });
        let composer = ProvenanceComposer::new(&evaluator, &pool);

        let mut days = two_day_plan();
        let resolved = resolved(vec!["pinda".into()]);
        let mut rng = StdRng::seed_from_u64(7);
        let outcome = composer
            .backfill(&mut days, &resolved, &options(1.0), &mut rng)
            .await
            .unwrap();

        assert_eq!(outcome.summary.reused_recipe_count, 0);
        for day in &days {
            for meal in &day.meals {
                assert_eq!(meal.date, day.date);
                assert_ne!(meal.name, "Pindakaas wrap");
            }
        }
    }

    #[tokio::test]
    async fn consecutive_days_never_repeat_the_same_reused_meal() {
        let evaluator = ConstraintEvaluator::new(lookup());
        let mut pool = StaticMealPool::new();
        pool.add(PooledMeal {
            meal: meal_named("Zalm uit de oven", "nevo-2", NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()),
            source: PoolSource::MealHistory,
        });
        let composer = ProvenanceComposer::new(&evaluator, &pool);

        let mut days = two_day_plan();
        let resolved = resolved(vec![]);
        let mut rng = StdRng::seed_from_u64(7);
        let outcome = composer
            .backfill(&mut days, &resolved, &options(1.0), &mut rng)
            .await
            .unwrap();

        // Only one of the two consecutive dinners can take the single pooled meal
        assert_eq!(outcome.summary.reused_recipe_count, 1);
        assert_eq!(outcome.summary.history_count, 1);
    }

    #[tokio::test]
    async fn budget_violations_fail_or_fall_back_per_flag() {
        let evaluator = ConstraintEvaluator::new(lookup());
        let pool = StaticMealPool::new();
        let composer = ProvenanceComposer::new(&evaluator, &pool);
        let resolved = resolved(vec![]);

        let mut strict = options(0.0);
        strict.max_ai_slots = Some(1);
        let mut days = two_day_plan();
        let mut rng = StdRng::seed_from_u64(7);
        let err = composer
            .backfill(&mut days, &resolved, &strict, &mut rng)
            .await
            .unwrap_err();
        assert_eq!(err.code, crate::errors::ErrorCode::AiBudgetExceeded);

        let mut lenient = strict.clone();
        lenient.allow_budget_fallback = true;
        let mut days = two_day_plan();
        let outcome = composer
            .backfill(&mut days, &resolved, &lenient, &mut rng)
            .await
            .unwrap();
        assert!(outcome.budget_fallback);
    }
}
