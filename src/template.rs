// ABOUTME: Deterministic template-based plan generation from sanitized candidate pools
// ABOUTME: Seeded rotation through day/slot templates; reproducible per retry seed
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nutriplan Coaching

//! # Template Generator
//!
//! The deterministic alternate path. Merges a caller-provided pre-approved
//! pool with the sanitized candidate pool, filtered by the full exclusion list
//! including guardrails-derived terms. Produces a plan by rotating through
//! day/slot templates; a distinct retry seed (1 = guardrails retry, 2 = sanity
//! retry) yields a different but reproducible rotation. An empty required pool
//! raises an error before any plan exists, never a silently empty slot.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::{
    IngredientCandidate, IngredientRef, Meal, MealPlanDay, MealSlot, OutputLanguage,
    ResolvedRequest,
};
use crate::pool::{matches_any_term, CandidatePool};

/// Courses composing each slot: (pool category, default grams)
const SLOT_TEMPLATES: &[(MealSlot, &[(&str, u32)])] = &[
    (MealSlot::Breakfast, &[("dairy", 150), ("fruit", 100), ("carbs", 40)]),
    (MealSlot::Lunch, &[("carbs", 80), ("proteins", 100), ("vegetables", 150)]),
    (MealSlot::Dinner, &[("proteins", 150), ("vegetables", 200), ("carbs", 100)]),
    (MealSlot::Snack, &[("fruit", 120), ("fats", 20)]),
];

/// Seed mixer so consecutive retry seeds produce unrelated rotations
const SEED_STRIDE: u64 = 0x9e37_79b9_7f4a_7c15;

/// Deterministic template-based generator
pub struct TemplateGenerator;

impl TemplateGenerator {
    /// Generate a full plan from templates
    ///
    /// `extra_exclusion_terms` carries guardrails-derived terms on top of the
    /// request's own exclusion list. `retry_seed` is 0 for the first pass,
    /// 1 for the guardrails retry, 2 for the sanity retry.
    ///
    /// # Errors
    ///
    /// Returns `INSUFFICIENT_INGREDIENTS` when a category required by a
    /// requested slot has no candidates left after filtering.
    pub fn generate(
        resolved: &ResolvedRequest,
        pool: &CandidatePool,
        extra_exclusion_terms: &[String],
        retry_seed: u64,
    ) -> AppResult<Vec<MealPlanDay>> {
        let merged = Self::merged_pool(resolved, pool, extra_exclusion_terms);

        // Every required category must survive filtering before any day is built
        for slot in &resolved.slots {
            for (category, _) in Self::template_for(*slot) {
                if merged.get(*category).is_none_or(Vec::is_empty) {
                    return Err(AppError::insufficient_ingredients(*category));
                }
            }
        }

        // One reproducible shuffle per category; the retry seed shifts the
        // rotation start so a retry never replays the rejected plan
        let mut rng = ChaCha8Rng::seed_from_u64(SEED_STRIDE);
        let mut rotations: BTreeMap<String, Vec<IngredientCandidate>> = BTreeMap::new();
        for (category, candidates) in &merged {
            let mut shuffled = candidates.clone();
            shuffled.shuffle(&mut rng);
            rotations.insert(category.clone(), shuffled);
        }
        let seed_offset = retry_seed as usize;

        let mut days = Vec::with_capacity(resolved.dates.len());
        for (day_index, date) in resolved.dates.iter().enumerate() {
            let mut meals = Vec::with_capacity(resolved.slots.len());
            for (slot_index, slot) in resolved.slots.iter().enumerate() {
                let mut ingredients = Vec::new();
                for (course_index, (category, grams)) in
                    Self::template_for(*slot).iter().enumerate()
                {
                    // Empty categories were rejected above
                    let Some(candidates) = rotations.get(*category) else {
                        continue;
                    };
                    let pick =
                        (day_index + slot_index + course_index + seed_offset) % candidates.len();
                    let candidate = &candidates[pick];
                    ingredients.push(IngredientRef {
                        code: candidate.code.clone(),
                        quantity_grams: *grams,
                        display_name: Some(candidate.name.clone()),
                        tags: candidate.tags.clone(),
                        canonical_id: None,
                    });
                }
                meals.push(Meal {
                    id: Uuid::new_v4(),
                    name: Self::meal_name(&ingredients, resolved.language),
                    slot: *slot,
                    date: *date,
                    ingredients,
                    macros: None,
                    prep_time_minutes: None,
                    servings: Some(1),
                });
            }
            days.push(MealPlanDay { date: *date, meals });
        }

        Ok(days)
    }

    /// Merge pre-approved and sanitized candidates, filtered by the full exclusion list
    fn merged_pool(
        resolved: &ResolvedRequest,
        pool: &CandidatePool,
        extra_exclusion_terms: &[String],
    ) -> BTreeMap<String, Vec<IngredientCandidate>> {
        let excluded = |candidate: &IngredientCandidate| {
            matches_any_term(&candidate.name, &resolved.all_excluded_terms)
                || matches_any_term(&candidate.name, extra_exclusion_terms)
        };

        let mut merged: BTreeMap<String, Vec<IngredientCandidate>> = BTreeMap::new();

        for (category, candidates) in &resolved.preapproved_candidates {
            let kept: Vec<IngredientCandidate> = candidates
                .iter()
                .filter(|c| !excluded(c))
                .cloned()
                .collect();
            merged.entry(category.clone()).or_default().extend(kept);
        }

        for (category, candidates) in &pool.categories {
            let bucket = merged.entry(category.clone()).or_default();
            for candidate in candidates {
                if excluded(candidate) {
                    continue;
                }
                if bucket.iter().any(|existing| existing.code == candidate.code) {
                    continue;
                }
                bucket.push(candidate.clone());
            }
        }

        merged
    }

    fn template_for(slot: MealSlot) -> &'static [(&'static str, u32)] {
        SLOT_TEMPLATES
            .iter()
            .find(|(s, _)| *s == slot)
            .map_or(&[], |(_, courses)| courses)
    }

    fn meal_name(ingredients: &[IngredientRef], language: OutputLanguage) -> String {
        let joiner = match language {
            OutputLanguage::Nl => " met ",
            OutputLanguage::En => " with ",
        };
        let names: Vec<&str> = ingredients
            .iter()
            .filter_map(|i| i.display_name.as_deref())
            .take(2)
            .collect();
        names.join(joiner)
    }
}
