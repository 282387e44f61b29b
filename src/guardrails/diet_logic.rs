// ABOUTME: Ordered DROP/FORCE/LIMIT day-quota evaluation over a plan's ingredients
// ABOUTME: Surfaces force deficits that drive the single targeted regeneration
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nutriplan Coaching

//! # Diet-Logic Day Quotas
//!
//! Per day, ingredients pass ordered phases: DROP removes forbidden items
//! before anything is counted, FORCE checks category minimums, LIMIT warns on
//! soft maximums. A day fails when any FORCE minimum is unmet. Per-week
//! minimums are counted across the whole plan window.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::AppResult;
use crate::models::{ForceDeficitItem, IngredientRef, MealPlanDay};

/// Evaluation phase of a diet-logic rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaPhase {
    /// Remove matching ingredients before counting
    Drop,
    /// Enforce a category minimum
    Force,
    /// Warn on a soft category maximum
    Limit,
}

/// One ordered diet-logic rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DietPhaseRule {
    /// Evaluation phase
    pub phase: QuotaPhase,
    /// Stable category code
    pub category_code: String,
    /// Dutch display name, used in hints and messages
    pub category_name_nl: String,
    /// Terms matched against ingredient names and tags
    pub match_terms: Vec<String>,
    /// FORCE: required matches per day
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_per_day: Option<u32>,
    /// FORCE: required matches per week
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_per_week: Option<u32>,
    /// LIMIT: soft maximum matches per day
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_per_day: Option<u32>,
}

impl DietPhaseRule {
    fn matches(&self, ingredient: &IngredientRef) -> bool {
        let name = ingredient.searchable_name();
        self.match_terms.iter().any(|term| {
            let term = term.to_lowercase();
            name.contains(&term)
                || ingredient
                    .tags
                    .iter()
                    .any(|tag| tag.to_lowercase().contains(&term))
        })
    }

    fn deficit(&self) -> ForceDeficitItem {
        ForceDeficitItem {
            category_code: self.category_code.clone(),
            category_name_nl: self.category_name_nl.clone(),
            min_per_day: self.min_per_day,
            min_per_week: self.min_per_week,
        }
    }
}

/// Loader for a diet's ordered quota rules
#[async_trait]
pub trait DietLogicLoader: Send + Sync {
    /// Load the ordered DROP/FORCE/LIMIT rules for a diet
    async fn load(&self, diet_id: &str) -> AppResult<Vec<DietPhaseRule>>;
}

/// Static in-memory loader for tests and fixed deployments
#[derive(Debug, Default)]
pub struct StaticDietLogic {
    rules: Vec<DietPhaseRule>,
}

impl StaticDietLogic {
    /// Create a loader always returning the given rules
    #[must_use]
    pub fn new(rules: Vec<DietPhaseRule>) -> Self {
        Self { rules }
    }
}

#[async_trait]
impl DietLogicLoader for StaticDietLogic {
    async fn load(&self, _diet_id: &str) -> AppResult<Vec<DietPhaseRule>> {
        Ok(self.rules.clone())
    }
}

/// Quota result for one day
#[derive(Debug, Clone, Default)]
pub struct DayQuotaResult {
    /// Soft warnings from LIMIT rules
    pub warnings: Vec<String>,
    /// Unmet FORCE minimums
    pub deficits: Vec<ForceDeficitItem>,
}

impl DayQuotaResult {
    /// A day passes when no FORCE minimum is unmet
    #[must_use]
    pub fn ok(&self) -> bool {
        self.deficits.is_empty()
    }
}

/// Quota result for a whole plan
#[derive(Debug, Clone, Default)]
pub struct PlanQuotaResult {
    /// Soft warnings concatenated across days
    pub warnings: Vec<String>,
    /// The earliest failing day, when any day failed
    pub first_failure: Option<QuotaFailure>,
}

/// The earliest failing day and its deficits
#[derive(Debug, Clone)]
pub struct QuotaFailure {
    /// Zero-based index of the failing day
    pub day_index: usize,
    /// Date of the failing day
    pub date: NaiveDate,
    /// Unmet minimums on that day
    pub deficits: Vec<ForceDeficitItem>,
}

impl PlanQuotaResult {
    /// Whether every day met its quotas
    #[must_use]
    pub fn ok(&self) -> bool {
        self.first_failure.is_none()
    }
}

/// Evaluate one day's ingredients against the ordered rules
#[must_use]
pub fn evaluate_day(rules: &[DietPhaseRule], ingredients: &[IngredientRef]) -> DayQuotaResult {
    // DROP phase: forbidden items are removed before anything is counted
    let counted: Vec<&IngredientRef> = ingredients
        .iter()
        .filter(|ingredient| {
            !rules
                .iter()
                .filter(|r| r.phase == QuotaPhase::Drop)
                .any(|r| r.matches(ingredient))
        })
        .collect();

    let mut result = DayQuotaResult::default();

    // FORCE phase: category minimums
    for rule in rules.iter().filter(|r| r.phase == QuotaPhase::Force) {
        let count = counted.iter().filter(|i| rule.matches(i)).count() as u32;
        if let Some(min) = rule.min_per_day {
            if count < min {
                result.deficits.push(rule.deficit());
            }
        }
    }

    // LIMIT phase: soft maximums, warnings only
    for rule in rules.iter().filter(|r| r.phase == QuotaPhase::Limit) {
        let count = counted.iter().filter(|i| rule.matches(i)).count() as u32;
        if let Some(max) = rule.max_per_day {
            if count > max {
                result.warnings.push(format!(
                    "{}: {count} items exceed the advised maximum of {max}",
                    rule.category_name_nl,
                ));
            }
        }
    }

    result
}

/// Evaluate a whole plan
///
/// With `first_failing_day_only`, evaluation stops at the earliest failing day
/// and its deficits surface; otherwise warnings from every day concatenate and
/// the earliest failure is still the one reported. Per-week FORCE minimums are
/// counted across all days and attributed to the plan's first day.
#[must_use]
pub fn evaluate_plan(
    rules: &[DietPhaseRule],
    days: &[MealPlanDay],
    first_failing_day_only: bool,
) -> PlanQuotaResult {
    let mut result = PlanQuotaResult::default();

    for (day_index, day) in days.iter().enumerate() {
        let ingredients: Vec<IngredientRef> = day
            .meals
            .iter()
            .flat_map(|m| m.ingredients.iter().cloned())
            .collect();
        let day_result = evaluate_day(rules, &ingredients);

        for warning in &day_result.warnings {
            result.warnings.push(format!("{}: {warning}", day.date));
        }

        if !day_result.ok() && result.first_failure.is_none() {
            result.first_failure = Some(QuotaFailure {
                day_index,
                date: day.date,
                deficits: day_result.deficits,
            });
            if first_failing_day_only {
                return result;
            }
        }
    }

    // Per-week minimums over the whole window
    if result.first_failure.is_none() {
        if let Some(first_day) = days.first() {
            let all_ingredients: Vec<IngredientRef> = days
                .iter()
                .flat_map(|d| d.meals.iter())
                .flat_map(|m| m.ingredients.iter().cloned())
                .collect();
            let mut weekly_deficits = Vec::new();
            for rule in rules.iter().filter(|r| r.phase == QuotaPhase::Force) {
                if let Some(min_week) = rule.min_per_week {
                    let count = all_ingredients.iter().filter(|i| rule.matches(i)).count() as u32;
                    if count < min_week {
                        weekly_deficits.push(rule.deficit());
                    }
                }
            }
            if !weekly_deficits.is_empty() {
                result.first_failure = Some(QuotaFailure {
                    day_index: 0,
                    date: first_day.date,
                    deficits: weekly_deficits,
                });
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::models::{Meal, MealSlot};
    use uuid::Uuid;

    fn ingredient(name: &str, tags: &[&str]) -> IngredientRef {
        IngredientRef {
            code: format!("nevo-{name}"),
            quantity_grams: 100,
            display_name: Some(name.to_owned()),
            tags: tags.iter().map(|t| (*t).to_owned()).collect(),
            canonical_id: None,
        }
    }

    fn force_rule(code: &str, name: &str, terms: &[&str], min_per_day: u32) -> DietPhaseRule {
        DietPhaseRule {
            phase: QuotaPhase::Force,
            category_code: code.into(),
            category_name_nl: name.into(),
            match_terms: terms.iter().map(|t| (*t).to_owned()).collect(),
            min_per_day: Some(min_per_day),
            min_per_week: None,
            max_per_day: None,
        }
    }

    fn day(date: NaiveDate, ingredients: Vec<IngredientRef>) -> MealPlanDay {
        MealPlanDay {
            date,
            meals: vec![Meal {
                id: Uuid::new_v4(),
                name: "Maal".into(),
                slot: MealSlot::Dinner,
                date,
                ingredients,
                macros: None,
                prep_time_minutes: None,
                servings: None,
            }],
        }
    }

    #[test]
    fn dropped_ingredients_do_not_count_toward_force() {
        let rules = vec![
            DietPhaseRule {
                phase: QuotaPhase::Drop,
                category_code: "sugar".into(),
                category_name_nl: "suiker".into(),
                match_terms: vec!["snoep".into()],
                min_per_day: None,
                min_per_week: None,
                max_per_day: None,
            },
            force_rule("fiber_rich", "vezelrijk", &["volkoren", "snoep"], 1),
        ];
        // The only "match" is a dropped item, so FORCE is unmet
        let result = evaluate_day(&rules, &[ingredient("snoepreep", &[])]);
        assert!(!result.ok());
        assert_eq!(result.deficits[0].category_code, "fiber_rich");
    }

    #[test]
    fn earliest_failing_day_wins() {
        let rules = vec![force_rule("fiber_rich", "vezelrijk", &["vezelrijk"], 1)];
        let d1 = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2025, 3, 4).unwrap();
        let d3 = NaiveDate::from_ymd_opt(2025, 3, 5).unwrap();
        let days = vec![
            day(d1, vec![ingredient("volkorenbrood", &["vezelrijk"])]),
            day(d2, vec![ingredient("witbrood", &[])]),
            day(d3, vec![ingredient("croissant", &[])]),
        ];

        let result = evaluate_plan(&rules, &days, true);
        let failure = result.first_failure.unwrap();
        assert_eq!(failure.day_index, 1);
        assert_eq!(failure.date, d2);
        assert_eq!(failure.deficits[0].category_name_nl, "vezelrijk");
    }

    #[test]
    fn limit_rules_warn_without_failing() {
        let rules = vec![DietPhaseRule {
            phase: QuotaPhase::Limit,
            category_code: "red_meat".into(),
            category_name_nl: "rood vlees".into(),
            match_terms: vec!["rund".into()],
            min_per_day: None,
            min_per_week: None,
            max_per_day: Some(1),
        }];
        let d1 = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
        let days = vec![day(
            d1,
            vec![ingredient("rundergehakt", &[]), ingredient("runderlap", &[])],
        )];
        let result = evaluate_plan(&rules, &days, true);
        assert!(result.ok());
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn weekly_minimum_counts_across_days() {
        let rules = vec![DietPhaseRule {
            phase: QuotaPhase::Force,
            category_code: "fatty_fish".into(),
            category_name_nl: "vette vis".into(),
            match_terms: vec!["zalm".into(), "makreel".into()],
            min_per_day: None,
            min_per_week: Some(2),
            max_per_day: None,
        }];
        let d1 = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2025, 3, 4).unwrap();
        let days = vec![
            day(d1, vec![ingredient("zalmfilet", &[])]),
            day(d2, vec![ingredient("kipfilet", &[])]),
        ];
        let result = evaluate_plan(&rules, &days, true);
        let failure = result.first_failure.unwrap();
        assert_eq!(failure.deficits[0].category_code, "fatty_fish");
        assert_eq!(failure.day_index, 0);
    }
}
