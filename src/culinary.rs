// ABOUTME: Culinary coherence checker matching term and regex rules against meal text
// ABOUTME: Blocks implausible combinations; word-boundary matching for single-word terms
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nutriplan Coaching

//! # Culinary Coherence Checker
//!
//! Externally configured rules matched against per-meal searchable text (name
//! plus every ingredient display name and code). A meal additionally matches
//! the synthetic slot "smoothie" when its text contains shake/smoothie
//! keywords, on top of its literal slot. Single-word terms match on word
//! boundaries so "ei" matches "ei" but never "eiwit"; multi-word terms match
//! by substring. Regex rules compile once at construction; an invalid pattern
//! is a configuration error, never a silent skip. Runs only on the free-form
//! path; the template path's pool sanitizer already excludes offending items.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{AppError, AppResult};
use crate::models::{Meal, MealPlanDay};

/// Keywords that put a meal in the synthetic "smoothie" slot
const SMOOTHIE_KEYWORDS: &[&str] = &["smoothie", "shake", "milkshake"];

/// How a rule's match value is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Term matching: word-boundary for single words, substring for phrases
    Term,
    /// Regular expression matching
    Regex,
}

/// Action taken on a rule match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// Any match anywhere in the plan blocks it
    Block,
    /// Matches are logged only
    Warn,
}

/// One externally configured coherence rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CulinaryRule {
    /// Stable rule code
    pub rule_code: String,
    /// Slot the rule applies to, including the synthetic "smoothie" slot
    pub slot_type: String,
    /// Match interpretation
    pub match_mode: MatchMode,
    /// Term or pattern
    pub match_value: String,
    /// Block or warn
    pub action: RuleAction,
    /// Reason code reported on a match
    pub reason_code: String,
}

/// A blocked rule match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CulinaryViolation {
    /// Rule that matched
    pub rule_code: String,
    /// Configured reason code
    pub reason_code: String,
    /// Zero-based day index
    pub day_index: usize,
    /// Date of the offending meal
    pub date: chrono::NaiveDate,
    /// Literal slot of the offending meal
    pub slot: String,
}

#[derive(Debug)]
enum CompiledMatcher {
    /// Word-boundary regex for a single-word term
    BoundedTerm(Regex),
    /// Lowercase substring for a multi-word term
    Substring(String),
    /// Compiled-once regex rule
    Pattern(Regex),
}

#[derive(Debug)]
struct CompiledRule {
    rule: CulinaryRule,
    matcher: CompiledMatcher,
}

/// Culinary coherence checker with compiled-once rules
#[derive(Debug)]
pub struct CulinaryChecker {
    rules: Vec<CompiledRule>,
}

impl CulinaryChecker {
    /// Compile the configured rules
    ///
    /// # Errors
    ///
    /// Returns an `EVALUATOR_ERROR` for an invalid regex pattern or an
    /// unbuildable term matcher; configuration problems never skip silently.
    pub fn new(rules: Vec<CulinaryRule>) -> AppResult<Self> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            let matcher = match rule.match_mode {
                MatchMode::Term => {
                    let term = rule.match_value.trim().to_lowercase();
                    if term.split_whitespace().count() > 1 {
                        CompiledMatcher::Substring(term)
                    } else {
                        let pattern = format!(r"(?i)\b{}\b", regex::escape(&term));
                        let regex = Regex::new(&pattern).map_err(|e| {
                            AppError::evaluator(format!(
                                "culinary rule '{}' has an unbuildable term matcher",
                                rule.rule_code,
                            ))
                            .with_source(e)
                        })?;
                        CompiledMatcher::BoundedTerm(regex)
                    }
                }
                MatchMode::Regex => {
                    let regex = Regex::new(&rule.match_value).map_err(|e| {
                        AppError::evaluator(format!(
                            "culinary rule '{}' has an invalid regex pattern",
                            rule.rule_code,
                        ))
                        .with_source(e)
                    })?;
                    CompiledMatcher::Pattern(regex)
                }
            };
            compiled.push(CompiledRule { rule, matcher });
        }
        Ok(Self { rules: compiled })
    }

    /// Check a plan; block matches are returned, warn matches are logged
    #[must_use]
    pub fn check_plan(&self, days: &[MealPlanDay]) -> Vec<CulinaryViolation> {
        let mut violations = Vec::new();

        for (day_index, day) in days.iter().enumerate() {
            for meal in &day.meals {
                let text = meal_text(meal);
                let slots = meal_slot_types(meal, &text);

                for compiled in &self.rules {
                    if !slots.iter().any(|s| s == &compiled.rule.slot_type) {
                        continue;
                    }
                    if !compiled.matches(&text) {
                        continue;
                    }
                    match compiled.rule.action {
                        RuleAction::Block => violations.push(CulinaryViolation {
                            rule_code: compiled.rule.rule_code.clone(),
                            reason_code: compiled.rule.reason_code.clone(),
                            day_index,
                            date: day.date,
                            slot: meal.slot.as_str().to_owned(),
                        }),
                        RuleAction::Warn => warn!(
                            "culinary rule {} matched {} meal '{}' on {}",
                            compiled.rule.rule_code, meal.slot, meal.name, day.date,
                        ),
                    }
                }
            }
        }

        violations
    }
}

impl CompiledRule {
    fn matches(&self, text: &str) -> bool {
        match &self.matcher {
            CompiledMatcher::BoundedTerm(regex) | CompiledMatcher::Pattern(regex) => {
                regex.is_match(text)
            }
            CompiledMatcher::Substring(term) => text.contains(term.as_str()),
        }
    }
}

/// Per-meal searchable text: name plus every ingredient display name and code
fn meal_text(meal: &Meal) -> String {
    let mut parts = vec![meal.name.to_lowercase()];
    for ingredient in &meal.ingredients {
        parts.push(ingredient.searchable_name());
        parts.push(ingredient.code.to_lowercase());
    }
    parts.join(" ")
}

/// Slot types a meal matches: its literal slot plus the synthetic smoothie slot
fn meal_slot_types(meal: &Meal, text: &str) -> Vec<String> {
    let mut slots = vec![meal.slot.as_str().to_owned()];
    if SMOOTHIE_KEYWORDS.iter().any(|k| text.contains(k)) {
        slots.push("smoothie".to_owned());
    }
    slots
}
