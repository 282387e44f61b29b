// ABOUTME: Prompt builders for plan, day, and meal generation plus repair and retry hints
// ABOUTME: Embeds constraints, targets, and a size-capped candidate pool into generator prompts
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nutriplan Coaching

//! # Generation Prompts
//!
//! Prompts are assembled from request state rather than loaded from static
//! files: every prompt embeds the date range, slots, hard constraint summary,
//! targets, and candidate pool for exactly one request. Retry hints are only
//! attached on the second pass.

use chrono::NaiveDate;
use std::fmt::Write as _;

use crate::models::{ForceDeficitItem, MealSlot, OutputLanguage, ResolvedRequest, ValidationIssue};
use crate::pool::CandidatePool;

/// Second-pass steering attached to a full regeneration
#[derive(Debug, Clone)]
pub enum RetryHint {
    /// Day-quota shortfall; category names become a positive hint
    QuotaDeficit(Vec<ForceDeficitItem>),
    /// Hard-rule block; reason codes steer the regeneration away
    GuardrailsRepair(Vec<String>),
}

/// Build the whole-plan generation prompt
#[must_use]
pub fn build_plan_prompt(
    resolved: &ResolvedRequest,
    pool: &CandidatePool,
    pool_cap: usize,
    hint: Option<&RetryHint>,
) -> String {
    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "Create a meal plan from {} through {} with these meals each day: {}.",
        resolved.dates[0],
        resolved.dates[resolved.dates.len() - 1],
        slot_list(&resolved.slots),
    );
    push_language(&mut prompt, resolved.language);
    push_constraints(&mut prompt, resolved);
    push_pool(&mut prompt, pool, pool_cap);
    push_hint(&mut prompt, hint);
    push_output_contract(&mut prompt);
    prompt
}

/// Build a single-day generation prompt
#[must_use]
pub fn build_day_prompt(
    resolved: &ResolvedRequest,
    pool: &CandidatePool,
    pool_cap: usize,
    date: NaiveDate,
    hint: Option<&RetryHint>,
) -> String {
    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "Create one day of meals for {date} with these meals: {}.",
        slot_list(&resolved.slots),
    );
    push_language(&mut prompt, resolved.language);
    push_constraints(&mut prompt, resolved);
    push_pool(&mut prompt, pool, pool_cap);
    push_hint(&mut prompt, hint);
    push_output_contract(&mut prompt);
    prompt
}

/// Build a single-meal generation prompt
#[must_use]
pub fn build_meal_prompt(
    resolved: &ResolvedRequest,
    pool: &CandidatePool,
    pool_cap: usize,
    date: NaiveDate,
    slot: MealSlot,
) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "Create one {slot} meal for {date}.");
    push_language(&mut prompt, resolved.language);
    push_constraints(&mut prompt, resolved);
    push_pool(&mut prompt, pool, pool_cap);
    push_output_contract(&mut prompt);
    prompt
}

/// Build the repair prompt from the failed attempt
///
/// The repair request carries the original prompt, the bad output verbatim,
/// and the full issue list, and must return a corrected object without schema
/// drift or invented codes. Preference misses get a slot-specific fix hint.
#[must_use]
pub fn build_repair_prompt(
    original_prompt: &str,
    bad_output: &str,
    issues: &[ValidationIssue],
    resolved: &ResolvedRequest,
) -> String {
    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "Your previous answer to the request below was rejected. \
         Return a corrected JSON object with the same schema. \
         Do not invent ingredient codes; only use codes from the candidate list."
    );
    let _ = writeln!(prompt, "\n--- Original request ---\n{original_prompt}");
    let _ = writeln!(prompt, "--- Rejected output ---\n{bad_output}");
    let _ = writeln!(prompt, "--- Problems to fix ---");
    for issue in issues {
        let _ = writeln!(prompt, "- {} at {}: {}", issue.code_name(), issue.path, issue.message);
    }

    // Slot-specific fix hints for preference misses
    for issue in issues {
        if issue.code == crate::models::IssueCode::MealPreferenceMiss {
            for preference in &resolved.slot_preferences {
                if issue.message.contains(preference.slot.as_str()) {
                    let _ = writeln!(
                        prompt,
                        "- The {} meal must be based on one of: {}.",
                        preference.slot,
                        preference.terms.join(", "),
                    );
                }
            }
        }
    }

    prompt
}

/// Deficit hint for the single quota-driven regeneration
#[must_use]
pub fn quota_deficit_hint(deficits: &[ForceDeficitItem]) -> RetryHint {
    RetryHint::QuotaDeficit(deficits.to_vec())
}

fn slot_list(slots: &[MealSlot]) -> String {
    slots
        .iter()
        .map(MealSlot::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn push_language(prompt: &mut String, language: OutputLanguage) {
    let line = match language {
        OutputLanguage::Nl => "Write all meal names and display names in Dutch.",
        OutputLanguage::En => "Write all meal names and display names in English.",
    };
    let _ = writeln!(prompt, "{line}");
}

fn push_constraints(prompt: &mut String, resolved: &ResolvedRequest) {
    let _ = writeln!(prompt, "\nHard constraints (every one must hold):");
    if !resolved.all_excluded_terms.is_empty() {
        let _ = writeln!(
            prompt,
            "- Never use ingredients matching: {}.",
            resolved.all_excluded_terms.join(", "),
        );
    }
    if let Some(target) = &resolved.calorie_target {
        let _ = writeln!(
            prompt,
            "- Each day must total between {:.0} and {:.0} kcal.",
            target.min_kcal, target.max_kcal,
        );
    }
    for target in &resolved.hard_daily_macros {
        let bounds = match (target.min_grams, target.max_grams) {
            (Some(min), Some(max)) => format!("between {min:.0} and {max:.0} g"),
            (Some(min), None) => format!("at least {min:.0} g"),
            (None, Some(max)) => format!("at most {max:.0} g"),
            (None, None) => continue,
        };
        let _ = writeln!(prompt, "- Each day: {bounds} of {:?}.", target.nutrient);
    }
    for preference in &resolved.slot_preferences {
        if !preference.terms.is_empty() {
            let _ = writeln!(
                prompt,
                "- The {} meal must be based on one of: {}.",
                preference.slot,
                preference.terms.join(", "),
            );
        }
    }
    for category in &resolved.required_categories {
        let _ = writeln!(
            prompt,
            "- At least {} meal(s) per day must include {} ({}).",
            category.min_per_day,
            category.name_nl,
            category.match_terms.join(", "),
        );
    }
    if let Some(minutes) = resolved.max_prep_time_minutes {
        let _ = writeln!(prompt, "- No meal may take longer than {minutes} minutes to prepare.");
    }
    if !resolved.prefer_terms.is_empty() {
        let _ = writeln!(
            prompt,
            "Prefer these ingredients when they fit: {}.",
            resolved.prefer_terms.join(", "),
        );
    }
}

fn push_pool(prompt: &mut String, pool: &CandidatePool, cap: usize) {
    let _ = writeln!(
        prompt,
        "\nUse only ingredient codes from this candidate list (code: name):"
    );
    for (category, candidates) in &pool.categories {
        let _ = writeln!(prompt, "{category}:");
        for candidate in candidates.iter().take(cap) {
            let _ = writeln!(prompt, "  {}: {}", candidate.code, candidate.name);
        }
    }
}

fn push_hint(prompt: &mut String, hint: Option<&RetryHint>) {
    match hint {
        Some(RetryHint::QuotaDeficit(deficits)) => {
            let _ = writeln!(prompt, "\nThe previous plan missed daily category minimums.");
            for deficit in deficits {
                let per_day = deficit.min_per_day.unwrap_or(1);
                let _ = writeln!(
                    prompt,
                    "- Include at least {per_day} {} item(s) every day.",
                    deficit.category_name_nl,
                );
            }
        }
        Some(RetryHint::GuardrailsRepair(reason_codes)) => {
            let _ = writeln!(
                prompt,
                "\nThe previous plan was blocked by dietary rules ({}); avoid those ingredients entirely.",
                reason_codes.join(", "),
            );
        }
        None => {}
    }
}

fn push_output_contract(prompt: &mut String) {
    let _ = writeln!(
        prompt,
        "\nAnswer with a single JSON object matching the provided schema. \
         No markdown, no commentary. Quantities are grams per ingredient."
    );
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::models::{
        DietProfile, IssueCode, MealPlanRequest, SlotPreference,
    };
    use std::collections::BTreeMap;

    fn resolved_with_breakfast_preference() -> ResolvedRequest {
        let request = MealPlanRequest {
            start_date: NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 3, 4).unwrap(),
            slots: vec![MealSlot::Breakfast, MealSlot::Lunch],
            profile: DietProfile {
                diet_key: "standaard".into(),
                slot_preferences: vec![SlotPreference {
                    slot: MealSlot::Breakfast,
                    terms: vec!["eiwitshake".into()],
                }],
                ..DietProfile::default()
            },
            exclude_ingredients: vec![],
            prefer_ingredients: vec![],
            therapeutic_targets: vec![],
            language: OutputLanguage::Nl,
            mode: crate::models::GeneratorMode::Generative,
            preapproved_candidates: BTreeMap::new(),
            provenance: None,
        };
        ResolvedRequest::resolve(&request, 28).unwrap()
    }

    #[test]
    fn plan_prompt_embeds_slots_and_preferences() {
        let resolved = resolved_with_breakfast_preference();
        let pool = CandidatePool::default();
        let prompt = build_plan_prompt(&resolved, &pool, 12, None);
        assert!(prompt.contains("breakfast, lunch"));
        assert!(prompt.contains("eiwitshake"));
        assert!(prompt.contains("2025-03-03 through 2025-03-04"));
    }

    #[test]
    fn repair_prompt_carries_bad_output_and_preference_fix_hint() {
        let resolved = resolved_with_breakfast_preference();
        let issues = vec![ValidationIssue::new(
            "days[0].meals[0]",
            IssueCode::MealPreferenceMiss,
            "breakfast does not satisfy any configured preference",
        )];
        let prompt = build_repair_prompt("ORIGINAL", "{\"bad\": true}", &issues, &resolved);
        assert!(prompt.contains("ORIGINAL"));
        assert!(prompt.contains("{\"bad\": true}"));
        assert!(prompt.contains("MEAL_PREFERENCE_MISS"));
        assert!(prompt.contains("eiwitshake"));
    }

    #[test]
    fn quota_hint_names_the_category() {
        let hint = quota_deficit_hint(&[ForceDeficitItem {
            category_code: "fiber_rich".into(),
            category_name_nl: "vezelrijk".into(),
            min_per_day: Some(1),
            min_per_week: None,
        }]);
        let resolved = resolved_with_breakfast_preference();
        let prompt = build_plan_prompt(&resolved, &CandidatePool::default(), 12, Some(&hint));
        assert!(prompt.contains("vezelrijk"));
    }
}
