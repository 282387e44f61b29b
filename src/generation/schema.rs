// ABOUTME: Output schema definitions and structural validation for generator responses
// ABOUTME: Strips markdown fencing, checks shape against the request, and builds typed drafts
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nutriplan Coaching

//! # Generator Output Schemas
//!
//! Hand-built JSON schemas passed to the generation service, plus the
//! structural validation that runs before typed deserialization. Parsing is
//! staged deliberately: PARSE turns raw text into a `serde_json::Value`,
//! SCHEMA_VALIDATE checks required fields, enums, and ranges against the
//! request, and only a structurally clean value becomes a typed draft.

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::models::{IngredientRef, IssueCode, Meal, MealPlanDay, MealSlot, ValidationIssue};

// ============================================================================
// Schema builders
// ============================================================================

fn meal_object_schema(slots: &[MealSlot]) -> Value {
    let slot_names: Vec<&str> = slots.iter().map(MealSlot::as_str).collect();
    json!({
        "type": "object",
        "required": ["name", "slot", "ingredients"],
        "properties": {
            "name": { "type": "string", "minLength": 1 },
            "slot": { "type": "string", "enum": slot_names },
            "ingredients": {
                "type": "array",
                "minItems": 1,
                "items": {
                    "type": "object",
                    "required": ["code", "quantity_grams"],
                    "properties": {
                        "code": { "type": "string", "minLength": 1 },
                        "quantity_grams": { "type": "number", "minimum": 1 },
                        "display_name": { "type": "string" }
                    }
                }
            },
            "prep_time_minutes": { "type": "integer", "minimum": 0 }
        }
    })
}

fn day_object_schema(slots: &[MealSlot]) -> Value {
    json!({
        "type": "object",
        "required": ["date", "meals"],
        "properties": {
            "date": { "type": "string", "format": "date" },
            "meals": {
                "type": "array",
                "minItems": slots.len(),
                "maxItems": slots.len(),
                "items": meal_object_schema(slots)
            }
        }
    })
}

/// Schema for a whole-plan generation response
#[must_use]
pub fn plan_schema(dates: &[NaiveDate], slots: &[MealSlot]) -> Value {
    json!({
        "type": "object",
        "required": ["days"],
        "properties": {
            "days": {
                "type": "array",
                "minItems": dates.len(),
                "maxItems": dates.len(),
                "items": day_object_schema(slots)
            }
        }
    })
}

/// Schema for a single-day generation response
#[must_use]
pub fn day_schema(slots: &[MealSlot]) -> Value {
    day_object_schema(slots)
}

/// Schema for a single-meal generation response
#[must_use]
pub fn meal_schema(slot: MealSlot) -> Value {
    meal_object_schema(std::slice::from_ref(&slot))
}

// ============================================================================
// Fence stripping and parsing
// ============================================================================

/// Strip surrounding markdown code fencing and whitespace
///
/// Generators wrap JSON in ```json fences often enough that stripping happens
/// unconditionally before structural parsing.
#[must_use]
pub fn strip_markdown_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") up to the first newline
    let body = rest.split_once('\n').map_or("", |(_, b)| b);
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Parse raw generator output into a JSON value
///
/// # Errors
///
/// Returns the parse failure as a single structural issue; the attempt runner
/// routes it to REPAIR rather than retrying blindly.
pub fn parse_output(raw: &str) -> Result<Value, ValidationIssue> {
    serde_json::from_str(strip_markdown_fences(raw)).map_err(|e| {
        ValidationIssue::new(
            "$",
            IssueCode::StructuralMismatch,
            format!("output is not valid JSON: {e}"),
        )
    })
}

// ============================================================================
// Structural validation
// ============================================================================

/// Validate a whole-plan value against the requested dates and slots
#[must_use]
pub fn validate_plan_value(
    value: &Value,
    dates: &[NaiveDate],
    slots: &[MealSlot],
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    let Some(days) = value.get("days").and_then(Value::as_array) else {
        issues.push(ValidationIssue::new(
            "$.days",
            IssueCode::StructuralMismatch,
            "missing 'days' array",
        ));
        return issues;
    };

    if days.len() != dates.len() {
        issues.push(ValidationIssue::new(
            "$.days",
            IssueCode::StructuralMismatch,
            format!("expected {} days, got {}", dates.len(), days.len()),
        ));
    }

    for (index, (day, expected_date)) in days.iter().zip(dates).enumerate() {
        issues.extend(validate_day_value_at(
            day,
            *expected_date,
            slots,
            &format!("$.days[{index}]"),
        ));
    }

    issues
}

/// Validate a single-day value
#[must_use]
pub fn validate_day_value(
    value: &Value,
    expected_date: NaiveDate,
    slots: &[MealSlot],
) -> Vec<ValidationIssue> {
    validate_day_value_at(value, expected_date, slots, "$")
}

fn validate_day_value_at(
    value: &Value,
    expected_date: NaiveDate,
    slots: &[MealSlot],
    path: &str,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    match value.get("date").and_then(Value::as_str) {
        Some(raw) => match raw.parse::<NaiveDate>() {
            Ok(date) if date == expected_date => {}
            Ok(date) => issues.push(ValidationIssue::new(
                format!("{path}.date"),
                IssueCode::StructuralMismatch,
                format!("expected date {expected_date}, got {date}"),
            )),
            Err(_) => issues.push(ValidationIssue::new(
                format!("{path}.date"),
                IssueCode::StructuralMismatch,
                format!("unparsable date '{raw}'"),
            )),
        },
        None => issues.push(ValidationIssue::new(
            format!("{path}.date"),
            IssueCode::StructuralMismatch,
            "missing 'date'",
        )),
    }

    let Some(meals) = value.get("meals").and_then(Value::as_array) else {
        issues.push(ValidationIssue::new(
            format!("{path}.meals"),
            IssueCode::StructuralMismatch,
            "missing 'meals' array",
        ));
        return issues;
    };

    let mut seen_slots = Vec::new();
    for (index, meal) in meals.iter().enumerate() {
        let meal_path = format!("{path}.meals[{index}]");
        if let Some(slot) = validate_meal_value_at(meal, slots, &meal_path, &mut issues) {
            if seen_slots.contains(&slot) {
                issues.push(ValidationIssue::new(
                    meal_path,
                    IssueCode::StructuralMismatch,
                    format!("duplicate meal for slot '{slot}'"),
                ));
            } else {
                seen_slots.push(slot);
            }
        }
    }

    for slot in slots {
        if !seen_slots.contains(slot) {
            issues.push(ValidationIssue::new(
                format!("{path}.meals"),
                IssueCode::StructuralMismatch,
                format!("no meal for requested slot '{slot}'"),
            ));
        }
    }

    issues
}

/// Validate a single-meal value for the given slot
#[must_use]
pub fn validate_meal_value(value: &Value, slot: MealSlot) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    validate_meal_value_at(value, std::slice::from_ref(&slot), "$", &mut issues);
    issues
}

/// Validate one meal object; returns the parsed slot when recognisable
fn validate_meal_value_at(
    value: &Value,
    allowed_slots: &[MealSlot],
    path: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Option<MealSlot> {
    if value
        .get("name")
        .and_then(Value::as_str)
        .is_none_or(|n| n.trim().is_empty())
    {
        issues.push(ValidationIssue::new(
            format!("{path}.name"),
            IssueCode::StructuralMismatch,
            "missing or empty meal name",
        ));
    }

    let slot = value
        .get("slot")
        .and_then(Value::as_str)
        .and_then(MealSlot::parse);
    match slot {
        Some(slot) if allowed_slots.contains(&slot) => {}
        Some(slot) => issues.push(ValidationIssue::new(
            format!("{path}.slot"),
            IssueCode::StructuralMismatch,
            format!("slot '{slot}' was not requested"),
        )),
        None => issues.push(ValidationIssue::new(
            format!("{path}.slot"),
            IssueCode::StructuralMismatch,
            "missing or unknown slot",
        )),
    }

    match value.get("ingredients").and_then(Value::as_array) {
        Some(ingredients) if !ingredients.is_empty() => {
            for (index, ingredient) in ingredients.iter().enumerate() {
                let ingredient_path = format!("{path}.ingredients[{index}]");
                if ingredient
                    .get("code")
                    .and_then(Value::as_str)
                    .is_none_or(|c| c.trim().is_empty())
                {
                    issues.push(ValidationIssue::new(
                        ingredient_path.clone(),
                        IssueCode::StructuralMismatch,
                        "missing ingredient code",
                    ));
                }
                match ingredient.get("quantity_grams").and_then(Value::as_f64) {
                    Some(grams) if grams >= 1.0 => {}
                    Some(grams) => issues.push(ValidationIssue::new(
                        ingredient_path,
                        IssueCode::InvalidQuantity,
                        format!("quantity {grams} g is below the 1 g minimum"),
                    )),
                    None => issues.push(ValidationIssue::new(
                        ingredient_path,
                        IssueCode::InvalidQuantity,
                        "missing numeric quantity_grams",
                    )),
                }
            }
        }
        _ => issues.push(ValidationIssue::new(
            format!("{path}.ingredients"),
            IssueCode::StructuralMismatch,
            "missing or empty 'ingredients' array",
        )),
    }

    slot
}

// ============================================================================
// Typed drafts
// ============================================================================

/// Typed whole-plan draft, deserialized after structural validation
#[derive(Debug, Clone, Deserialize)]
pub struct PlanDraft {
    /// Generated days
    pub days: Vec<DayDraft>,
}

/// Typed day draft
#[derive(Debug, Clone, Deserialize)]
pub struct DayDraft {
    /// Day date
    pub date: NaiveDate,
    /// Generated meals
    pub meals: Vec<MealDraft>,
}

/// Typed meal draft
#[derive(Debug, Clone, Deserialize)]
pub struct MealDraft {
    /// Meal name
    pub name: String,
    /// Slot wire name
    pub slot: String,
    /// Generated ingredients
    pub ingredients: Vec<IngredientDraft>,
    /// Preparation time in minutes
    #[serde(default)]
    pub prep_time_minutes: Option<u32>,
}

/// Typed ingredient draft
#[derive(Debug, Clone, Deserialize)]
pub struct IngredientDraft {
    /// Nutrition-database code
    pub code: String,
    /// Quantity in grams; generators occasionally emit fractions
    pub quantity_grams: f64,
    /// Display name, if provided
    #[serde(default)]
    pub display_name: Option<String>,
}

impl MealDraft {
    /// Convert to a domain meal pinned to the given date
    ///
    /// Assumes structural validation already ran: the slot parses and every
    /// quantity is at least 1 g.
    #[must_use]
    pub fn into_meal(self, date: NaiveDate) -> Meal {
        let slot = MealSlot::parse(&self.slot).unwrap_or(MealSlot::Snack);
        Meal {
            id: Uuid::new_v4(),
            name: self.name,
            slot,
            date,
            ingredients: self
                .ingredients
                .into_iter()
                .map(|i| IngredientRef {
                    code: i.code,
                    quantity_grams: (i.quantity_grams.round().max(1.0)) as u32,
                    display_name: i.display_name,
                    tags: Vec::new(),
                    canonical_id: None,
                })
                .collect(),
            macros: None,
            prep_time_minutes: self.prep_time_minutes,
            servings: None,
        }
    }
}

impl DayDraft {
    /// Convert to a domain day; meal dates are pinned to the day date
    #[must_use]
    pub fn into_day(self) -> MealPlanDay {
        let date = self.date;
        MealPlanDay {
            date,
            meals: self.meals.into_iter().map(|m| m.into_meal(date)).collect(),
        }
    }
}

impl PlanDraft {
    /// Convert to domain days
    #[must_use]
    pub fn into_days(self) -> Vec<MealPlanDay> {
        self.days.into_iter().map(DayDraft::into_day).collect()
    }
}
