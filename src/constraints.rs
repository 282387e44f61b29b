// ABOUTME: Constraint evaluator checking meals, days, and plans against profile-derived rules
// ABOUTME: Covers forbidden terms, allergens, dislikes, slot preferences, categories, and macros
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nutriplan Coaching

//! # Constraint Evaluator
//!
//! Pure rule checks over a plan, day, or meal, plus asynchronous ingredient
//! code resolution. The same logic backs whole-plan, single-day, and
//! single-meal validation; an empty issue list means acceptable. Only hard,
//! daily-scope calorie/macro targets are enforced here; soft and meal-scope
//! targets steer the prompt but never block acceptance.

use futures_util::future::try_join_all;
use std::sync::Arc;

use crate::errors::AppResult;
use crate::models::{
    IssueCode, Meal, MealPlanDay, ResolvedRequest, ValidationIssue,
};
use crate::nutrition::NutritionLookup;

/// Allergen synonym expansion table
///
/// Allergy keys arrive as single terms ("pinda"); matching must also cover the
/// common compound and derived product names the nutrition database uses.
const ALLERGEN_EXPANSIONS: &[(&str, &[&str])] = &[
    ("pinda", &["pinda", "pindakaas", "satesaus", "satésaus"]),
    ("noten", &["noot", "noten", "amandel", "hazelnoot", "walnoot", "cashew", "pecannoot"]),
    ("gluten", &["gluten", "tarwe", "rogge", "gerst", "spelt", "couscous"]),
    ("lactose", &["lactose", "melk", "kaas", "yoghurt", "kwark", "room", "boter"]),
    ("ei", &["ei", "eieren", "omelet"]),
    ("soja", &["soja", "tofu", "tempeh", "edamame"]),
    ("vis", &["vis", "zalm", "tonijn", "kabeljauw", "haring", "makreel"]),
    ("schaaldieren", &["schaaldier", "garnaal", "garnalen", "kreeft", "krab", "mossel"]),
];

/// Expand an allergy key to its matching terms
///
/// Unknown keys expand to themselves so novel allergens still match.
#[must_use]
pub fn expand_allergen(key: &str) -> Vec<String> {
    let lowered = key.trim().to_lowercase();
    ALLERGEN_EXPANSIONS
        .iter()
        .find(|(k, _)| *k == lowered)
        .map_or_else(
            || vec![lowered.clone()],
            |(_, terms)| terms.iter().map(|t| (*t).to_owned()).collect(),
        )
}

/// Constraint evaluator over a nutrition lookup
pub struct ConstraintEvaluator {
    lookup: Arc<dyn NutritionLookup>,
}

impl ConstraintEvaluator {
    /// Create an evaluator
    #[must_use]
    pub fn new(lookup: Arc<dyn NutritionLookup>) -> Self {
        Self { lookup }
    }

    /// Validate a whole plan; an empty result means acceptable
    ///
    /// # Errors
    ///
    /// Propagates nutrition lookup failures; rule checks themselves are pure.
    pub async fn evaluate_plan(
        &self,
        days: &[MealPlanDay],
        resolved: &ResolvedRequest,
    ) -> AppResult<Vec<ValidationIssue>> {
        let mut issues = Vec::new();
        for (index, day) in days.iter().enumerate() {
            issues.extend(
                self.evaluate_day_at(day, resolved, &format!("days[{index}]"))
                    .await?,
            );
        }
        Ok(issues)
    }

    /// Validate a single day
    ///
    /// # Errors
    ///
    /// Propagates nutrition lookup failures.
    pub async fn evaluate_day(
        &self,
        day: &MealPlanDay,
        resolved: &ResolvedRequest,
    ) -> AppResult<Vec<ValidationIssue>> {
        self.evaluate_day_at(day, resolved, "day").await
    }

    /// Validate a single meal: text rules and code resolution only
    ///
    /// # Errors
    ///
    /// Propagates nutrition lookup failures.
    pub async fn evaluate_meal(
        &self,
        meal: &Meal,
        resolved: &ResolvedRequest,
    ) -> AppResult<Vec<ValidationIssue>> {
        let mut issues = meal_rule_issues(meal, resolved, "meal");
        issues.extend(self.unresolved_code_issues(meal, "meal").await?);
        Ok(issues)
    }

    async fn evaluate_day_at(
        &self,
        day: &MealPlanDay,
        resolved: &ResolvedRequest,
        path: &str,
    ) -> AppResult<Vec<ValidationIssue>> {
        let mut issues = Vec::new();

        for (index, meal) in day.meals.iter().enumerate() {
            let meal_path = format!("{path}.meals[{index}]");
            if meal.date != day.date {
                issues.push(ValidationIssue::new(
                    meal_path.clone(),
                    IssueCode::StructuralMismatch,
                    format!("meal date {} differs from day date {}", meal.date, day.date),
                ));
            }
            issues.extend(meal_rule_issues(meal, resolved, &meal_path));
        }

        // Code resolution for every ingredient of the day, issued concurrently
        let code_checks = day.meals.iter().enumerate().map(|(index, meal)| {
            let meal_path = format!("{path}.meals[{index}]");
            async move { self.unresolved_code_issues(meal, &meal_path).await }
        });
        for found in try_join_all(code_checks).await? {
            issues.extend(found);
        }

        issues.extend(required_category_issues(day, resolved, path));
        issues.extend(self.day_macro_issues(day, resolved, path).await?);

        Ok(issues)
    }

    /// Hard daily calorie/macro totals for the day
    async fn day_macro_issues(
        &self,
        day: &MealPlanDay,
        resolved: &ResolvedRequest,
        path: &str,
    ) -> AppResult<Vec<ValidationIssue>> {
        if resolved.calorie_target.is_none() && resolved.hard_daily_macros.is_empty() {
            return Ok(Vec::new());
        }

        let all_refs: Vec<_> = day
            .meals
            .iter()
            .flat_map(|m| m.ingredients.iter().cloned())
            .collect();
        let totals = self.lookup.macro_totals(&all_refs).await?;

        let mut issues = Vec::new();
        if let Some(target) = &resolved.calorie_target {
            if !target.contains(totals.kcal) {
                issues.push(ValidationIssue::new(
                    path,
                    IssueCode::CalorieTargetMiss,
                    format!(
                        "day totals {:.0} kcal, outside the {:.0}-{:.0} range",
                        totals.kcal, target.min_kcal, target.max_kcal
                    ),
                ));
            }
        }
        for target in &resolved.hard_daily_macros {
            let grams = totals.grams_of(target.nutrient);
            let below = target.min_grams.is_some_and(|min| grams < min);
            let above = target.max_grams.is_some_and(|max| grams > max);
            if below || above {
                issues.push(ValidationIssue::new(
                    path,
                    IssueCode::MacroTargetMiss,
                    format!("day totals {grams:.1} g of {:?}, outside the target", target.nutrient),
                ));
            }
        }
        Ok(issues)
    }

    /// Issues for ingredient codes that do not resolve
    async fn unresolved_code_issues(
        &self,
        meal: &Meal,
        path: &str,
    ) -> AppResult<Vec<ValidationIssue>> {
        let resolutions = meal
            .ingredients
            .iter()
            .map(|ingredient| async move {
                let record = self.lookup.resolve(&ingredient.code).await?;
                Ok::<_, crate::errors::AppError>((ingredient.code.clone(), record.is_some()))
            });

        let mut issues = Vec::new();
        for (index, (code, resolves)) in try_join_all(resolutions).await?.into_iter().enumerate() {
            if !resolves {
                issues.push(ValidationIssue::new(
                    format!("{path}.ingredients[{index}]"),
                    IssueCode::UnknownIngredientCode,
                    format!("ingredient code '{code}' does not resolve"),
                ));
            }
        }
        Ok(issues)
    }
}

/// Pure per-meal rule checks: exclusion terms, quantities, slot preferences
fn meal_rule_issues(meal: &Meal, resolved: &ResolvedRequest, path: &str) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    for (index, ingredient) in meal.ingredients.iter().enumerate() {
        let ingredient_path = format!("{path}.ingredients[{index}]");
        let name = ingredient.searchable_name();

        if ingredient.quantity_grams < 1 {
            issues.push(ValidationIssue::new(
                ingredient_path.clone(),
                IssueCode::InvalidQuantity,
                format!("'{name}' has a zero quantity"),
            ));
        }

        if let Some(term) = first_match(&name, &ingredient.tags, &resolved.allergen_terms) {
            issues.push(ValidationIssue::new(
                ingredient_path.clone(),
                IssueCode::AllergenConflict,
                format!("'{name}' matches allergen term '{term}'"),
            ));
        } else if let Some(term) = first_match(&name, &ingredient.tags, &resolved.dislike_terms) {
            issues.push(ValidationIssue::new(
                ingredient_path.clone(),
                IssueCode::DislikedIngredient,
                format!("'{name}' matches disliked term '{term}'"),
            ));
        } else if let Some(term) = first_match(&name, &ingredient.tags, &resolved.exclusion_terms) {
            issues.push(ValidationIssue::new(
                ingredient_path,
                IssueCode::ForbiddenIngredient,
                format!("'{name}' matches excluded term '{term}'"),
            ));
        }
    }

    if let Some(preference) = resolved.preferences_for(meal.slot) {
        let meal_name = meal.name.to_lowercase();
        let satisfied = preference.terms.iter().any(|term| {
            let term = term.to_lowercase();
            meal_name.contains(&term)
                || meal
                    .ingredients
                    .iter()
                    .any(|i| i.searchable_name().contains(&term))
        });
        if !satisfied {
            issues.push(ValidationIssue::new(
                path,
                IssueCode::MealPreferenceMiss,
                format!(
                    "{} meal '{}' satisfies none of the configured preferences: {}",
                    meal.slot,
                    meal.name,
                    preference.terms.join(", "),
                ),
            ));
        }
    }

    issues
}

/// Required-category presence per day
fn required_category_issues(
    day: &MealPlanDay,
    resolved: &ResolvedRequest,
    path: &str,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    for category in &resolved.required_categories {
        let terms: Vec<String> = category
            .match_terms
            .iter()
            .map(|t| t.to_lowercase())
            .collect();
        let matching_meals = day
            .meals
            .iter()
            .filter(|meal| {
                meal.ingredients
                    .iter()
                    .any(|i| first_match(&i.searchable_name(), &i.tags, &terms).is_some())
            })
            .count();
        if (matching_meals as u32) < category.min_per_day {
            issues.push(ValidationIssue::new(
                path,
                IssueCode::MissingRequiredCategory,
                format!(
                    "day has {matching_meals} meal(s) with {}, {} required",
                    category.name_nl, category.min_per_day,
                ),
            ));
        }
    }
    issues
}

/// First term matching the ingredient name or any tag, case-insensitively
fn first_match<'a>(name: &str, tags: &[String], terms: &'a [String]) -> Option<&'a str> {
    terms
        .iter()
        .find(|term| {
            name.contains(term.as_str())
                || tags.iter().any(|tag| tag.to_lowercase().contains(term.as_str()))
        })
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::models::{
        CalorieTarget, DietProfile, IngredientRef, MacroSummary, MealPlanRequest, MealSlot,
        SlotPreference,
    };
    use crate::nutrition::InMemoryNutritionLookup;
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn lookup() -> Arc<InMemoryNutritionLookup> {
        let mut lookup = InMemoryNutritionLookup::new();
        lookup.insert(InMemoryNutritionLookup::record(
            "nevo-1",
            "Kipfilet",
            &["proteins"],
            MacroSummary {
                kcal: 110.0,
                protein_g: 23.0,
                ..MacroSummary::default()
            },
        ));
        lookup.insert(InMemoryNutritionLookup::record(
            "nevo-2",
            "Pindakaas",
            &["fats"],
            MacroSummary {
                kcal: 600.0,
                ..MacroSummary::default()
            },
        ));
        Arc::new(lookup)
    }

    fn resolved(profile: DietProfile) -> ResolvedRequest {
        let request = MealPlanRequest {
            start_date: NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
            slots: vec![MealSlot::Breakfast, MealSlot::Lunch],
            profile,
            exclude_ingredients: vec![],
            prefer_ingredients: vec![],
            therapeutic_targets: vec![],
            language: crate::models::OutputLanguage::Nl,
            mode: crate::models::GeneratorMode::Generative,
            preapproved_candidates: std::collections::BTreeMap::new(),
            provenance: None,
        };
        ResolvedRequest::resolve(&request, 28).unwrap()
    }

    fn meal(name: &str, slot: MealSlot, code: &str, display: &str, grams: u32) -> Meal {
        Meal {
            id: Uuid::new_v4(),
            name: name.into(),
            slot,
            date: NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
            ingredients: vec![IngredientRef {
                code: code.into(),
                quantity_grams: grams,
                display_name: Some(display.into()),
                tags: vec![],
                canonical_id: None,
            }],
            macros: None,
            prep_time_minutes: None,
            servings: None,
        }
    }

    #[tokio::test]
    async fn allergen_expansion_catches_compound_names() {
        let evaluator = ConstraintEvaluator::new(lookup());
        let resolved = resolved(DietProfile {
            diet_key: "standaard".into(),
            allergies: vec!["pinda".into()],
            ..DietProfile::default()
        });
        let meal = meal("Toast", MealSlot::Breakfast, "nevo-2", "Pindakaas", 30);
        let issues = evaluator.evaluate_meal(&meal, &resolved).await.unwrap();
        assert!(issues.iter().any(|i| i.code == IssueCode::AllergenConflict));
    }

    #[tokio::test]
    async fn unresolved_codes_are_always_flagged() {
        let evaluator = ConstraintEvaluator::new(lookup());
        let resolved = resolved(DietProfile {
            diet_key: "standaard".into(),
            ..DietProfile::default()
        });
        let meal = meal("Mysterie", MealSlot::Lunch, "nevo-404", "Mysterie", 100);
        let issues = evaluator.evaluate_meal(&meal, &resolved).await.unwrap();
        assert!(issues
            .iter()
            .any(|i| i.code == IssueCode::UnknownIngredientCode));
    }

    #[tokio::test]
    async fn slot_preference_must_be_satisfied_by_name_or_ingredient() {
        let evaluator = ConstraintEvaluator::new(lookup());
        let resolved = resolved(DietProfile {
            diet_key: "standaard".into(),
            slot_preferences: vec![SlotPreference {
                slot: MealSlot::Breakfast,
                terms: vec!["eiwitshake".into()],
            }],
            ..DietProfile::default()
        });

        let fruit_smoothie = meal(
            "Fruitsmoothie",
            MealSlot::Breakfast,
            "nevo-1",
            "Banaan",
            120,
        );
        let issues = evaluator
            .evaluate_meal(&fruit_smoothie, &resolved)
            .await
            .unwrap();
        assert!(issues
            .iter()
            .any(|i| i.code == IssueCode::MealPreferenceMiss));

        let shake = meal("Eiwitshake bosvruchten", MealSlot::Breakfast, "nevo-1", "Kwark", 250);
        let issues = evaluator.evaluate_meal(&shake, &resolved).await.unwrap();
        assert!(!issues.iter().any(|i| i.code == IssueCode::MealPreferenceMiss));
    }

    #[tokio::test]
    async fn day_calorie_totals_checked_against_hard_range() {
        let evaluator = ConstraintEvaluator::new(lookup());
        let resolved = resolved(DietProfile {
            diet_key: "standaard".into(),
            calorie_target: Some(CalorieTarget {
                min_kcal: 1800.0,
                max_kcal: 2200.0,
            }),
            ..DietProfile::default()
        });

        let day = MealPlanDay {
            date: NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
            meals: vec![meal("Kip", MealSlot::Lunch, "nevo-1", "Kipfilet", 200)],
        };
        let issues = evaluator.evaluate_day(&day, &resolved).await.unwrap();
        assert!(issues.iter().any(|i| i.code == IssueCode::CalorieTargetMiss));
    }

    #[test]
    fn unknown_allergen_expands_to_itself() {
        assert_eq!(expand_allergen("Selderij"), vec!["selderij".to_string()]);
        assert!(expand_allergen("pinda").contains(&"pindakaas".to_string()));
    }
}
