// ABOUTME: Shared test fixtures for the planning engine integration tests
// ABOUTME: Provides a seeded nutrition lookup, scripted generator, and planner builder
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nutriplan Coaching
#![allow(
    dead_code,
    missing_docs,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::unwrap_used,
    clippy::module_name_repetitions
)]
//! Shared test utilities for the `nutriplan` engine
//!
//! Provides common fixture builders to reduce duplication across integration
//! tests: a seeded in-memory nutrition database, a scripted generator, and a
//! planner wired from overridable collaborator fakes.

use chrono::NaiveDate;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use nutriplan::config::PlannerConfig;
use nutriplan::culinary::CulinaryRule;
use nutriplan::generation::ScriptedGenerator;
use nutriplan::guardrails::{
    DietPhaseRule, GuardrailsMode, GuardrailsRuleset, StaticDietLogic, StaticGuardrailsLoader,
};
use nutriplan::models::{
    DietProfile, GeneratorMode, MacroSummary, MealPlanRequest, MealSlot, OutputLanguage,
};
use nutriplan::nutrition::InMemoryNutritionLookup;
use nutriplan::planner::{EditabilityGate, MealPlanner, PlannerDependencies};
use nutriplan::pool::SystemClock;
use nutriplan::provenance::PersistedMealPool;
use nutriplan::sanity::{AlwaysPlausible, SanityValidator};

/// Seed the in-memory nutrition database with Dutch staples
///
/// Codes are stable; tags double as pool category markers.
pub fn seeded_lookup() -> Arc<InMemoryNutritionLookup> {
    let mut lookup = InMemoryNutritionLookup::new();
    let entries: &[(&str, &str, &[&str], f64, f64)] = &[
        // (code, name, tags, kcal/100g, protein/100g)
        ("nevo-kip", "Kipfilet", &["proteins"], 110.0, 23.0),
        ("nevo-zalm", "Zalmfilet", &["proteins", "vis"], 180.0, 20.0),
        ("nevo-tofu", "Tofu naturel", &["proteins"], 120.0, 12.0),
        ("nevo-rijst", "Zilvervliesrijst", &["carbs"], 360.0, 7.0),
        ("nevo-havermout", "Havermout", &["carbs", "vezelrijk"], 370.0, 13.0),
        ("nevo-volkoren", "Volkorenbrood", &["carbs", "vezelrijk"], 240.0, 10.0),
        ("nevo-broccoli", "Broccoli", &["vegetables"], 35.0, 3.0),
        ("nevo-spinazie", "Spinazie", &["vegetables"], 25.0, 3.0),
        ("nevo-banaan", "Banaan", &["fruit"], 90.0, 1.0),
        ("nevo-appel", "Appel", &["fruit"], 55.0, 0.3),
        ("nevo-kwark", "Magere kwark", &["dairy"], 60.0, 10.0),
        ("nevo-yoghurt", "Yoghurt naturel", &["dairy"], 65.0, 4.0),
        ("nevo-eiwitpoeder", "Eiwitshake poeder", &["dairy"], 380.0, 80.0),
        ("nevo-olijfolie", "Olijfolie", &["fats"], 880.0, 0.0),
        ("nevo-pindakaas", "Pindakaas", &["fats"], 600.0, 25.0),
        ("nevo-mix", "Maaltijdmix", &["carbs"], 400.0, 20.0),
    ];
    for (code, name, tags, kcal, protein) in entries {
        lookup.insert(InMemoryNutritionLookup::record(
            code,
            name,
            tags,
            MacroSummary {
                kcal: *kcal,
                protein_g: *protein,
                carbs_g: 10.0,
                fat_g: 5.0,
                fiber_g: 2.0,
            },
        ));
    }
    Arc::new(lookup)
}

/// Base request: 2025-03-03 .. end, given slots, standard diet
pub fn request(days: u32, slots: Vec<MealSlot>) -> MealPlanRequest {
    let start = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
    MealPlanRequest {
        start_date: start,
        end_date: start + chrono::Days::new(u64::from(days) - 1),
        slots,
        profile: DietProfile {
            diet_key: "standaard".into(),
            ..DietProfile::default()
        },
        exclude_ingredients: vec![],
        prefer_ingredients: vec![],
        therapeutic_targets: vec![],
        language: OutputLanguage::Nl,
        mode: GeneratorMode::Generative,
        preapproved_candidates: BTreeMap::new(),
        provenance: None,
    }
}

/// One generated-meal JSON object
pub fn meal_json(name: &str, slot: MealSlot, items: &[(&str, u32, &str)]) -> serde_json::Value {
    json!({
        "name": name,
        "slot": slot.as_str(),
        "ingredients": items
            .iter()
            .map(|(code, grams, display)| json!({
                "code": code,
                "quantity_grams": grams,
                "display_name": display,
            }))
            .collect::<Vec<_>>(),
    })
}

/// Whole-plan JSON for a request's date range
///
/// `meal_for` yields the meal object for each (day index, slot).
pub fn plan_json(
    request: &MealPlanRequest,
    meal_for: impl Fn(usize, MealSlot) -> serde_json::Value,
) -> String {
    let mut days = Vec::new();
    let mut date = request.start_date;
    let mut index = 0usize;
    while date <= request.end_date {
        let meals: Vec<serde_json::Value> =
            request.slots.iter().map(|s| meal_for(index, *s)).collect();
        days.push(json!({ "date": date.to_string(), "meals": meals }));
        date = date.succ_opt().unwrap();
        index += 1;
    }
    json!({ "days": days }).to_string()
}

/// Overridable planner fixture
pub struct Fixture {
    pub lookup: Arc<InMemoryNutritionLookup>,
    pub generator: Arc<ScriptedGenerator>,
    pub ruleset: GuardrailsRuleset,
    pub diet_rules: Vec<DietPhaseRule>,
    pub sanity: Arc<dyn SanityValidator>,
    pub meal_pool: Option<Arc<dyn PersistedMealPool>>,
    pub editability: Option<Arc<dyn EditabilityGate>>,
    pub culinary_rules: Vec<CulinaryRule>,
    pub config: PlannerConfig,
    pub guardrails_mode: GuardrailsMode,
}

impl Default for Fixture {
    fn default() -> Self {
        Self {
            lookup: seeded_lookup(),
            generator: Arc::new(ScriptedGenerator::new()),
            ruleset: GuardrailsRuleset::new("standaard".into(), "v1".into(), Vec::new()),
            diet_rules: Vec::new(),
            sanity: Arc::new(AlwaysPlausible),
            meal_pool: None,
            editability: None,
            culinary_rules: Vec::new(),
            config: PlannerConfig::default(),
            guardrails_mode: GuardrailsMode::Enforce,
        }
    }
}

impl Fixture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the planner from the fixture's collaborators
    pub fn planner(&self) -> MealPlanner {
        let deps = PlannerDependencies {
            nutrition: self.lookup.clone(),
            generator: self.generator.clone(),
            guardrails: Arc::new(StaticGuardrailsLoader::new(self.ruleset.clone())),
            diet_logic: Arc::new(StaticDietLogic::new(self.diet_rules.clone())),
            sanity: self.sanity.clone(),
            meal_pool: self.meal_pool.clone(),
            editability: self.editability.clone(),
            clock: Arc::new(SystemClock),
        };
        MealPlanner::new(
            deps,
            self.config.clone(),
            self.culinary_rules.clone(),
            self.guardrails_mode,
        )
        .unwrap()
    }
}
