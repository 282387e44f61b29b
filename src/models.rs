// ABOUTME: Core data model for meal plan requests, plans, meals, and validation results
// ABOUTME: Includes the fully-resolved internal request representation built once after parsing
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nutriplan Coaching

//! # Plan Data Model
//!
//! Request and response types for the planning engine. All entities are created
//! per call and discarded after the response is handed to the persistence
//! layer. The [`ResolvedRequest`] is the normalized internal representation:
//! deeply optional request fields are resolved exactly once, immediately after
//! request validation, so no downstream stage re-checks optionality.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};

// ============================================================================
// Slots and nutrients
// ============================================================================

/// A meal slot within a day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealSlot {
    /// Morning meal
    Breakfast,
    /// Midday meal
    Lunch,
    /// Evening meal
    Dinner,
    /// Between-meal snack
    Snack,
}

impl MealSlot {
    /// Stable wire/string representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Breakfast => "breakfast",
            Self::Lunch => "lunch",
            Self::Dinner => "dinner",
            Self::Snack => "snack",
        }
    }

    /// Parse from the wire representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "breakfast" => Some(Self::Breakfast),
            "lunch" => Some(Self::Lunch),
            "dinner" => Some(Self::Dinner),
            "snack" => Some(Self::Snack),
            _ => None,
        }
    }
}

impl std::fmt::Display for MealSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracked macro nutrients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Nutrient {
    /// Protein in grams
    Protein,
    /// Carbohydrates in grams
    Carbohydrates,
    /// Fat in grams
    Fat,
    /// Fiber in grams
    Fiber,
}

/// Scope of a macro target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetScope {
    /// Applies to a whole day
    Daily,
    /// Applies to a single meal
    Meal,
}

/// Severity of a macro target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetSeverity {
    /// Must hold for every accepted plan
    Hard,
    /// Optimized when possible, never blocks acceptance
    Soft,
}

/// A macro nutrient target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroTarget {
    /// Targeted nutrient
    pub nutrient: Nutrient,
    /// Minimum grams, if bounded below
    pub min_grams: Option<f64>,
    /// Maximum grams, if bounded above
    pub max_grams: Option<f64>,
    /// Daily or per-meal scope
    pub scope: TargetScope,
    /// Hard targets block acceptance; soft targets never do
    pub severity: TargetSeverity,
}

/// A daily calorie range target
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalorieTarget {
    /// Minimum kcal per day
    pub min_kcal: f64,
    /// Maximum kcal per day
    pub max_kcal: f64,
}

impl CalorieTarget {
    /// Midpoint of the range, the scaling anchor for the quantity adjuster
    #[must_use]
    pub fn midpoint(&self) -> f64 {
        (self.min_kcal + self.max_kcal) / 2.0
    }

    /// Whether a kcal total falls inside the range
    #[must_use]
    pub fn contains(&self, kcal: f64) -> bool {
        kcal >= self.min_kcal && kcal <= self.max_kcal
    }
}

/// Preference terms configured for one meal slot
///
/// A slot with configured preferences is satisfied when at least one term
/// matches the meal name or an ingredient name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotPreference {
    /// Slot the preference applies to
    pub slot: MealSlot,
    /// Acceptable preference terms (e.g. "eiwitshake")
    pub terms: Vec<String>,
}

/// A profile-level required ingredient category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredCategory {
    /// Stable category code
    pub code: String,
    /// Dutch display name
    pub name_nl: String,
    /// Terms that identify the category in ingredient names and tags
    pub match_terms: Vec<String>,
    /// Minimum matching meals per day
    pub min_per_day: u32,
}

// ============================================================================
// Profile and request
// ============================================================================

/// Dietary profile, immutable per call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DietProfile {
    /// Allergen keys (e.g. "pinda"), expanded to synonym terms at resolve time
    pub allergies: Vec<String>,
    /// Disliked ingredient terms
    pub dislikes: Vec<String>,
    /// Diet identifier for guardrails and diet-logic lookup
    pub diet_key: String,
    /// Daily calorie range, if configured
    pub calorie_target: Option<CalorieTarget>,
    /// Macro targets of mixed scope and severity
    pub macro_targets: Vec<MacroTarget>,
    /// Per-slot preference terms
    pub slot_preferences: Vec<SlotPreference>,
    /// Profile-level required categories checked by the constraint evaluator
    pub required_categories: Vec<RequiredCategory>,
    /// Maximum preparation time per meal in minutes
    pub max_prep_time_minutes: Option<u32>,
}

/// Output language for meal names and generated text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputLanguage {
    /// Dutch (product default)
    #[default]
    Nl,
    /// English
    En,
}

/// Which generation strategy to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorMode {
    /// Free-form generative path through the text-generation service
    #[default]
    Generative,
    /// Deterministic template-based path
    Template,
}

/// Options controlling provenance backfill and budget checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceOptions {
    /// Target fraction of slots to backfill from previously used meals (0.0 - 1.0)
    pub target_fraction: f64,
    /// Maximum AI-authored slots allowed, if bounded
    pub max_ai_slots: Option<u32>,
    /// Minimum database-backed slot ratio, if bounded
    pub min_db_ratio: Option<f64>,
    /// Accept budget shortfalls and annotate metadata instead of failing
    pub allow_budget_fallback: bool,
}

/// An ingredient candidate returned by the nutrition lookup search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngredientCandidate {
    /// Stable nutrition-database code
    pub code: String,
    /// Display name
    pub name: String,
    /// Category/tag labels
    pub tags: Vec<String>,
}

/// A meal plan generation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MealPlanRequest {
    /// First plan date, inclusive
    pub start_date: NaiveDate,
    /// Last plan date, inclusive
    pub end_date: NaiveDate,
    /// Requested meal slots per day
    pub slots: Vec<MealSlot>,
    /// Dietary profile
    pub profile: DietProfile,
    /// Extra ingredient terms to exclude
    #[serde(default)]
    pub exclude_ingredients: Vec<String>,
    /// Ingredient terms to prefer when possible
    #[serde(default)]
    pub prefer_ingredients: Vec<String>,
    /// Optional therapeutic macro targets layered over the profile
    #[serde(default)]
    pub therapeutic_targets: Vec<MacroTarget>,
    /// Output language
    #[serde(default)]
    pub language: OutputLanguage,
    /// Generation strategy
    #[serde(default)]
    pub mode: GeneratorMode,
    /// Caller-provided pre-approved candidates per category (template path)
    #[serde(default)]
    pub preapproved_candidates: BTreeMap<String, Vec<IngredientCandidate>>,
    /// Provenance backfill options, if history reuse is requested
    #[serde(default)]
    pub provenance: Option<ProvenanceOptions>,
}

// ============================================================================
// Plan entities
// ============================================================================

/// A reference to a nutrition-database ingredient with a quantity
///
/// The code must resolve via the nutrition lookup; unresolved codes are always
/// a hard failure, never dropped silently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngredientRef {
    /// Stable nutrition-database code
    pub code: String,
    /// Quantity in grams, at least 1
    pub quantity_grams: u32,
    /// Display name, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Category/tag labels
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Canonical ingredient id, if resolved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical_id: Option<Uuid>,
}

impl IngredientRef {
    /// Lowercased searchable text: display name when present, code otherwise
    #[must_use]
    pub fn searchable_name(&self) -> String {
        self.display_name
            .as_deref()
            .unwrap_or(&self.code)
            .to_lowercase()
    }
}

/// Summed macro nutrients for a meal or day
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MacroSummary {
    /// Energy in kcal
    pub kcal: f64,
    /// Protein in grams
    pub protein_g: f64,
    /// Carbohydrates in grams
    pub carbs_g: f64,
    /// Fat in grams
    pub fat_g: f64,
    /// Fiber in grams
    pub fiber_g: f64,
}

impl MacroSummary {
    /// Grams of the given nutrient
    #[must_use]
    pub const fn grams_of(&self, nutrient: Nutrient) -> f64 {
        match nutrient {
            Nutrient::Protein => self.protein_g,
            Nutrient::Carbohydrates => self.carbs_g,
            Nutrient::Fat => self.fat_g,
            Nutrient::Fiber => self.fiber_g,
        }
    }

    /// Accumulate another summary into this one
    pub fn add(&mut self, other: &Self) {
        self.kcal += other.kcal;
        self.protein_g += other.protein_g;
        self.carbs_g += other.carbs_g;
        self.fat_g += other.fat_g;
        self.fiber_g += other.fiber_g;
    }
}

/// A single meal, belonging to exactly one day and slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meal {
    /// Meal id
    pub id: Uuid,
    /// Meal name
    pub name: String,
    /// Slot within the day
    pub slot: MealSlot,
    /// Day the meal belongs to
    pub date: NaiveDate,
    /// Ingredient references
    pub ingredients: Vec<IngredientRef>,
    /// Computed macros, advisory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub macros: Option<MacroSummary>,
    /// Preparation time in minutes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prep_time_minutes: Option<u32>,
    /// Number of servings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub servings: Option<u32>,
}

/// One day of a meal plan
///
/// Invariant: every `meals[].date` equals `date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealPlanDay {
    /// Plan date
    pub date: NaiveDate,
    /// Meals for the day, in slot order
    pub meals: Vec<Meal>,
}

// ============================================================================
// Validation issues and guard decisions
// ============================================================================

/// Closed set of validation issue codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueCode {
    /// Ingredient code did not resolve via the nutrition lookup
    #[serde(rename = "UNKNOWN_INGREDIENT_CODE")]
    UnknownIngredientCode,
    /// Ingredient matches an explicitly excluded term
    #[serde(rename = "FORBIDDEN_INGREDIENT")]
    ForbiddenIngredient,
    /// Ingredient matches an expanded allergen term
    #[serde(rename = "ALLERGEN_CONFLICT")]
    AllergenConflict,
    /// Ingredient matches a disliked term
    #[serde(rename = "DISLIKED_INGREDIENT")]
    DislikedIngredient,
    /// No configured preference for the slot is satisfied
    #[serde(rename = "MEAL_PREFERENCE_MISS")]
    MealPreferenceMiss,
    /// A required category has no matching meal on the day
    #[serde(rename = "MISSING_REQUIRED_CATEGORY")]
    MissingRequiredCategory,
    /// Day calories outside the hard daily range
    #[serde(rename = "CALORIE_TARGET_MISS")]
    CalorieTargetMiss,
    /// Day macro total outside a hard daily target
    #[serde(rename = "MACRO_TARGET_MISS")]
    MacroTargetMiss,
    /// Quantity below 1 gram or otherwise invalid
    #[serde(rename = "INVALID_QUANTITY")]
    InvalidQuantity,
    /// Output shape mismatch: wrong dates, slots, or missing fields
    #[serde(rename = "STRUCTURAL_MISMATCH")]
    StructuralMismatch,
}

impl IssueCode {
    /// Whether this issue can be fixed by the deterministic quantity adjuster
    #[must_use]
    pub const fn is_macro_related(&self) -> bool {
        matches!(self, Self::CalorieTargetMiss | Self::MacroTargetMiss)
    }
}

/// A single validation finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Location of the issue (e.g. "days[1].meals[0]")
    pub path: String,
    /// Issue code
    pub code: IssueCode,
    /// Human-readable message
    pub message: String,
}

impl ValidationIssue {
    /// Create a new issue
    pub fn new(path: impl Into<String>, code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            code,
            message: message.into(),
        }
    }

    /// Stable wire name of the issue code, for prompt and log text
    #[must_use]
    pub fn code_name(&self) -> String {
        serde_json::to_value(self.code)
            .ok()
            .and_then(|v| v.as_str().map(ToOwned::to_owned))
            .unwrap_or_else(|| format!("{:?}", self.code))
    }
}

/// Outcome of a hard guardrails rule evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardOutcome {
    /// No rule matched, or only allow rules matched
    Allowed,
    /// Warn rules matched; non-blocking
    Warned,
    /// At least one block rule matched
    Blocked,
}

/// Decision from the hard allow/block guardrails evaluator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardDecision {
    /// Whether the plan may proceed ("warned" keeps this true)
    pub ok: bool,
    /// Matched outcome
    pub outcome: GuardOutcome,
    /// Reason codes of matched rules
    pub reason_codes: Vec<String>,
}

/// A day-quota shortfall driving exactly one targeted retry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForceDeficitItem {
    /// Stable category code
    pub category_code: String,
    /// Dutch display name, used in the retry hint
    pub category_name_nl: String,
    /// Required matches per day, if configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_per_day: Option<u32>,
    /// Required matches per week, if configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_per_week: Option<u32>,
}

// ============================================================================
// Response metadata
// ============================================================================

/// Origin of a plan slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealOrigin {
    /// Authored by the generator or template path this call
    Ai,
    /// Reused from the recipe store
    Db,
    /// Reused from the user's meal history
    History,
}

/// Per-slot provenance record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotProvenance {
    /// Day the slot belongs to
    pub date: NaiveDate,
    /// Slot
    pub slot: MealSlot,
    /// Origin of the meal occupying the slot
    pub origin: MealOrigin,
}

/// Aggregate provenance counts plus the per-slot records
///
/// Invariant: `reused_recipe_count + generated_recipe_count` equals the total
/// meal count of the returned plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceSummary {
    /// Slots authored this call
    pub generated_recipe_count: u32,
    /// Slots reused from the recipe store or history
    pub reused_recipe_count: u32,
    /// Reused slots backed by the recipe store
    pub db_count: u32,
    /// Reused slots backed by meal history
    pub history_count: u32,
    /// Per-slot origin records
    pub slots: Vec<SlotProvenance>,
}

/// Candidate pool metrics, advisory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolMetrics {
    /// Whether the pool came from a fresh cache entry
    pub cache_hit: bool,
    /// Candidate count per category after exclusion filtering
    pub category_counts: BTreeMap<String, usize>,
}

/// Ruleset identification attached to guardrails outcomes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailsStamp {
    /// Ruleset version label
    pub version: String,
    /// Content hash of the loaded ruleset
    pub hash: String,
}

/// Why a full regeneration was spent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryReason {
    /// Day-quota deficit triggered the targeted retry
    GuardrailsDeficit,
    /// Sanity validator rejected the first accepted plan
    SanityRejected,
}

/// Advisory response metadata; never required for correctness
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanMetadata {
    /// Strategy that produced the plan
    pub generator_mode: GeneratorMode,
    /// Generator calls spent, including repairs and regenerations
    pub attempts: u32,
    /// Why a regeneration was spent, if one was
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_reason: Option<RetryReason>,
    /// Candidate pool metrics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_metrics: Option<PoolMetrics>,
    /// Whether the sanity validator accepted on the first pass
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sanity_passed_first: Option<bool>,
    /// Guardrails ruleset identification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guardrails: Option<GuardrailsStamp>,
    /// Provenance counts and per-slot records
    pub provenance: ProvenanceSummary,
    /// Set when a provenance budget shortfall was accepted under the fallback flag
    pub budget_fallback: bool,
}

/// A generated meal plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MealPlanResponse {
    /// Request id for tracing
    pub request_id: Uuid,
    /// Plan days in date order
    pub days: Vec<MealPlanDay>,
    /// Advisory metadata
    pub metadata: PlanMetadata,
}

// ============================================================================
// Resolved request
// ============================================================================

/// Fully-normalized request, built once after validation
///
/// Exclusion terms are lowercased, deduped, and sorted; hard daily targets are
/// pre-filtered; the date list is materialized. Downstream stages never
/// re-check optionality.
#[derive(Debug, Clone)]
pub struct ResolvedRequest {
    /// Request id assigned for this call
    pub request_id: Uuid,
    /// All plan dates, in order
    pub dates: Vec<NaiveDate>,
    /// Requested slots, deduped, in canonical order
    pub slots: Vec<MealSlot>,
    /// Diet identifier
    pub diet_key: String,
    /// Expanded allergen terms, lowercase
    pub allergen_terms: Vec<String>,
    /// Dislike terms, lowercase
    pub dislike_terms: Vec<String>,
    /// Caller exclusion terms, lowercase
    pub exclusion_terms: Vec<String>,
    /// Union of all exclusion sources, deduped and sorted (the pool cache key input)
    pub all_excluded_terms: Vec<String>,
    /// Preferred ingredient terms
    pub prefer_terms: Vec<String>,
    /// Hard daily calorie range, if configured
    pub calorie_target: Option<CalorieTarget>,
    /// Hard daily macro targets only
    pub hard_daily_macros: Vec<MacroTarget>,
    /// All macro targets, for prompt context
    pub all_macro_targets: Vec<MacroTarget>,
    /// Per-slot preferences
    pub slot_preferences: Vec<SlotPreference>,
    /// Profile-level required categories
    pub required_categories: Vec<RequiredCategory>,
    /// Per-meal preparation ceiling in minutes
    pub max_prep_time_minutes: Option<u32>,
    /// Output language
    pub language: OutputLanguage,
    /// Generation strategy
    pub mode: GeneratorMode,
    /// Pre-approved candidates for the template path
    pub preapproved_candidates: BTreeMap<String, Vec<IngredientCandidate>>,
    /// Provenance options, if requested
    pub provenance: Option<ProvenanceOptions>,
}

impl ResolvedRequest {
    /// Validate and normalize a request
    ///
    /// # Errors
    ///
    /// Returns `INVALID_REQUEST` for an inverted or oversized date range, an
    /// empty slot list, or out-of-bounds provenance options. Raised before any
    /// external call.
    pub fn resolve(request: &MealPlanRequest, max_plan_days: u32) -> AppResult<Self> {
        if request.end_date < request.start_date {
            return Err(AppError::invalid_request(format!(
                "end date {} precedes start date {}",
                request.end_date, request.start_date
            )));
        }

        let dates: Vec<NaiveDate> = request
            .start_date
            .iter_days()
            .take_while(|d| *d <= request.end_date)
            .take(max_plan_days as usize + 1)
            .collect();
        if dates.len() as u32 > max_plan_days {
            return Err(AppError::invalid_request(format!(
                "date range spans more than the supported {max_plan_days} days"
            )));
        }

        if request.slots.is_empty() {
            return Err(AppError::invalid_request("at least one meal slot is required"));
        }
        let mut slots = request.slots.clone();
        slots.sort_unstable();
        slots.dedup();

        if request.profile.diet_key.trim().is_empty() {
            return Err(AppError::invalid_request("profile diet key must not be empty"));
        }

        if let Some(target) = &request.profile.calorie_target {
            if target.min_kcal <= 0.0 || target.max_kcal < target.min_kcal {
                return Err(AppError::invalid_request(format!(
                    "calorie range {}..{} is not a valid range",
                    target.min_kcal, target.max_kcal
                )));
            }
        }

        if let Some(options) = &request.provenance {
            if !(0.0..=1.0).contains(&options.target_fraction) {
                return Err(AppError::invalid_request(format!(
                    "provenance target fraction {} must be within 0.0..=1.0",
                    options.target_fraction
                )));
            }
            if let Some(ratio) = options.min_db_ratio {
                if !(0.0..=1.0).contains(&ratio) {
                    return Err(AppError::invalid_request(format!(
                        "minimum db ratio {ratio} must be within 0.0..=1.0"
                    )));
                }
            }
        }

        let allergen_terms = normalize_terms(
            request
                .profile
                .allergies
                .iter()
                .flat_map(|a| crate::constraints::expand_allergen(a)),
        );
        let dislike_terms = normalize_terms(request.profile.dislikes.iter().cloned());
        let exclusion_terms = normalize_terms(request.exclude_ingredients.iter().cloned());

        let all_excluded_terms = normalize_terms(
            allergen_terms
                .iter()
                .chain(&dislike_terms)
                .chain(&exclusion_terms)
                .cloned(),
        );

        let mut all_macro_targets = request.profile.macro_targets.clone();
        all_macro_targets.extend(request.therapeutic_targets.iter().cloned());
        let hard_daily_macros = all_macro_targets
            .iter()
            .filter(|t| t.severity == TargetSeverity::Hard && t.scope == TargetScope::Daily)
            .cloned()
            .collect();

        Ok(Self {
            request_id: Uuid::new_v4(),
            dates,
            slots,
            diet_key: request.profile.diet_key.clone(),
            allergen_terms,
            dislike_terms,
            exclusion_terms,
            all_excluded_terms,
            prefer_terms: normalize_terms(request.prefer_ingredients.iter().cloned()),
            calorie_target: request.profile.calorie_target,
            hard_daily_macros,
            all_macro_targets,
            slot_preferences: request.profile.slot_preferences.clone(),
            required_categories: request.profile.required_categories.clone(),
            max_prep_time_minutes: request.profile.max_prep_time_minutes,
            language: request.language,
            mode: request.mode,
            preapproved_candidates: request.preapproved_candidates.clone(),
            provenance: request.provenance.clone(),
        })
    }

    /// Hard daily protein minimum, the adjuster's secondary anchor
    #[must_use]
    pub fn protein_min(&self) -> Option<f64> {
        self.hard_daily_macros
            .iter()
            .find(|t| t.nutrient == Nutrient::Protein)
            .and_then(|t| t.min_grams)
    }

    /// Preference terms configured for a slot, if any
    #[must_use]
    pub fn preferences_for(&self, slot: MealSlot) -> Option<&SlotPreference> {
        self.slot_preferences
            .iter()
            .find(|p| p.slot == slot && !p.terms.is_empty())
    }

    /// Total number of (day, slot) positions in the plan grid
    #[must_use]
    pub fn grid_size(&self) -> usize {
        self.dates.len() * self.slots.len()
    }
}

/// Lowercase, trim, drop empties, dedupe, and sort a term collection
fn normalize_terms(terms: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = terms
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    out.sort_unstable();
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn base_request() -> MealPlanRequest {
        MealPlanRequest {
            start_date: NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 3, 7).unwrap(),
            slots: vec![MealSlot::Dinner, MealSlot::Breakfast, MealSlot::Breakfast],
            profile: DietProfile {
                diet_key: "standaard".into(),
                allergies: vec!["Pinda".into()],
                dislikes: vec!["  spruitjes ".into()],
                ..DietProfile::default()
            },
            exclude_ingredients: vec!["koriander".into()],
            prefer_ingredients: vec![],
            therapeutic_targets: vec![],
            language: OutputLanguage::Nl,
            mode: GeneratorMode::Generative,
            preapproved_candidates: BTreeMap::new(),
            provenance: None,
        }
    }

    #[test]
    fn resolve_materializes_dates_and_dedupes_slots() {
        let resolved = ResolvedRequest::resolve(&base_request(), 28).unwrap();
        assert_eq!(resolved.dates.len(), 5);
        assert_eq!(resolved.slots, vec![MealSlot::Breakfast, MealSlot::Dinner]);
        assert_eq!(resolved.grid_size(), 10);
    }

    #[test]
    fn resolve_expands_and_normalizes_exclusions() {
        let resolved = ResolvedRequest::resolve(&base_request(), 28).unwrap();
        assert!(resolved.allergen_terms.contains(&"pinda".to_string()));
        assert!(resolved.allergen_terms.contains(&"pindakaas".to_string()));
        assert!(resolved.all_excluded_terms.contains(&"spruitjes".to_string()));
        assert!(resolved.all_excluded_terms.contains(&"koriander".to_string()));
        // Sorted and deduped
        let mut sorted = resolved.all_excluded_terms.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted, resolved.all_excluded_terms);
    }

    #[test]
    fn resolve_rejects_inverted_range() {
        let mut request = base_request();
        request.end_date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let err = ResolvedRequest::resolve(&request, 28).unwrap_err();
        assert_eq!(err.code, crate::errors::ErrorCode::InvalidRequest);
    }

    #[test]
    fn resolve_rejects_empty_slots_and_oversized_range() {
        let mut request = base_request();
        request.slots.clear();
        assert!(ResolvedRequest::resolve(&request, 28).is_err());

        let mut request = base_request();
        request.end_date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        assert!(ResolvedRequest::resolve(&request, 28).is_err());
    }

    #[test]
    fn hard_daily_macros_exclude_soft_and_meal_scope() {
        let mut request = base_request();
        request.profile.macro_targets = vec![
            MacroTarget {
                nutrient: Nutrient::Protein,
                min_grams: Some(90.0),
                max_grams: None,
                scope: TargetScope::Daily,
                severity: TargetSeverity::Hard,
            },
            MacroTarget {
                nutrient: Nutrient::Fiber,
                min_grams: Some(10.0),
                max_grams: None,
                scope: TargetScope::Meal,
                severity: TargetSeverity::Hard,
            },
            MacroTarget {
                nutrient: Nutrient::Fat,
                min_grams: None,
                max_grams: Some(80.0),
                scope: TargetScope::Daily,
                severity: TargetSeverity::Soft,
            },
        ];
        let resolved = ResolvedRequest::resolve(&request, 28).unwrap();
        assert_eq!(resolved.hard_daily_macros.len(), 1);
        assert_eq!(resolved.protein_min(), Some(90.0));
    }
}
