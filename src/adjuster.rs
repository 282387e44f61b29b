// ABOUTME: Deterministic quantity adjuster scaling a day's ingredient grams toward targets
// ABOUTME: Derives one clamped scale factor per day instead of spending a generation retry
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nutriplan Coaching

//! # Deterministic Quantity Adjuster
//!
//! Fixes calorie/macro misses without another generator call. One scale factor
//! is derived per day: an out-of-range calorie total scales toward the target
//! midpoint; an unmet protein minimum may raise the factor further while the
//! projected calories stay under the maximum. The factor applies to every
//! ingredient quantity, rounded to the configured step and floored at 1 g.
//! A day already inside its targets derives a factor of exactly 1.0, so
//! re-running the adjuster changes no quantity.

use serde::{Deserialize, Serialize};

use crate::models::{CalorieTarget, MacroSummary, MealPlanDay};

/// One recorded quantity change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantityChange {
    /// Ingredient code
    pub code: String,
    /// Quantity before adjustment
    pub old_grams: u32,
    /// Quantity after adjustment
    pub new_grams: u32,
}

/// Result of one adjustment pass
#[derive(Debug, Clone)]
pub struct AdjustedDay {
    /// The day with scaled quantities
    pub day: MealPlanDay,
    /// Every changed quantity
    pub changes: Vec<QuantityChange>,
    /// The applied scale factor
    pub scale: f64,
}

/// Adjuster policy bounds
#[derive(Debug, Clone, Copy)]
pub struct AdjusterPolicy {
    /// Lower clamp of the scale factor
    pub clamp_min: f64,
    /// Upper clamp of the scale factor
    pub clamp_max: f64,
    /// Rounding step in grams
    pub round_step_grams: u32,
}

/// Scale a day's quantities toward the given targets
///
/// `current` must be the day's macro totals as computed by the nutrition
/// lookup. The caller re-runs the constraint evaluator on the result and
/// keeps the adjusted day as the new baseline when it improved.
#[must_use]
pub fn adjust_day(
    day: &MealPlanDay,
    current: &MacroSummary,
    calorie_target: Option<&CalorieTarget>,
    protein_min: Option<f64>,
    policy: &AdjusterPolicy,
) -> AdjustedDay {
    let scale = derive_scale(current, calorie_target, protein_min, policy);

    if (scale - 1.0).abs() < f64::EPSILON {
        return AdjustedDay {
            day: day.clone(),
            changes: Vec::new(),
            scale: 1.0,
        };
    }

    let mut adjusted = day.clone();
    let mut changes = Vec::new();
    for meal in &mut adjusted.meals {
        for ingredient in &mut meal.ingredients {
            let new_grams = scale_quantity(ingredient.quantity_grams, scale, policy.round_step_grams);
            if new_grams != ingredient.quantity_grams {
                changes.push(QuantityChange {
                    code: ingredient.code.clone(),
                    old_grams: ingredient.quantity_grams,
                    new_grams,
                });
                ingredient.quantity_grams = new_grams;
            }
        }
    }

    AdjustedDay {
        day: adjusted,
        changes,
        scale,
    }
}

/// Derive the single scale factor for a day
fn derive_scale(
    current: &MacroSummary,
    calorie_target: Option<&CalorieTarget>,
    protein_min: Option<f64>,
    policy: &AdjusterPolicy,
) -> f64 {
    let mut scale = 1.0;

    if let Some(target) = calorie_target {
        if current.kcal > 0.0 && !target.contains(current.kcal) {
            scale = clamp(target.midpoint() / current.kcal, policy);
        }
    }

    if let Some(min_protein) = protein_min {
        if current.protein_g > 0.0 && current.protein_g * scale < min_protein {
            let candidate = clamp(min_protein / current.protein_g, policy);
            let projected_kcal = current.kcal * candidate;
            let under_max = calorie_target.is_none_or(|t| projected_kcal <= t.max_kcal);
            if candidate > scale && under_max {
                scale = candidate;
            }
        }
    }

    scale
}

fn clamp(value: f64, policy: &AdjusterPolicy) -> f64 {
    value.clamp(policy.clamp_min, policy.clamp_max)
}

/// Round to the nearest step, floored at 1 g
fn scale_quantity(grams: u32, scale: f64, step: u32) -> u32 {
    let step = f64::from(step.max(1));
    let scaled = f64::from(grams) * scale;
    let rounded = (scaled / step).round() * step;
    (rounded as u32).max(1)
}
