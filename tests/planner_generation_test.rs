// ABOUTME: Integration tests for the generative planning path and repair behavior
// ABOUTME: Covers code round-trips, allergen exclusion, preference repair, and the adjuster
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nutriplan Coaching

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;

use common::{meal_json, plan_json, request, Fixture};
use nutriplan::errors::{AppResult, ErrorCode};
use nutriplan::models::{CalorieTarget, GeneratorMode, MealSlot, SlotPreference};
use nutriplan::nutrition::NutritionLookup;
use nutriplan::planner::EditabilityGate;

#[tokio::test]
async fn accepted_plan_round_trips_every_ingredient_code() {
    let fixture = Fixture::new();
    let request = request(2, vec![MealSlot::Breakfast, MealSlot::Dinner]);

    fixture.generator.push_response(plan_json(&request, |_, slot| match slot {
        MealSlot::Breakfast => meal_json(
            "Havermout met banaan",
            slot,
            &[("nevo-havermout", 60, "Havermout"), ("nevo-banaan", 100, "Banaan")],
        ),
        _ => meal_json(
            "Kip met rijst",
            slot,
            &[("nevo-kip", 150, "Kipfilet"), ("nevo-rijst", 75, "Zilvervliesrijst")],
        ),
    }));

    let planner = fixture.planner();
    let response = planner.generate(&request).await.unwrap();

    assert_eq!(response.days.len(), 2);
    for day in &response.days {
        assert_eq!(day.meals.len(), 2);
        for meal in &day.meals {
            assert_eq!(meal.date, day.date);
            for ingredient in &meal.ingredients {
                let record = fixture.lookup.resolve(&ingredient.code).await.unwrap();
                assert_eq!(record.unwrap().code, ingredient.code);
            }
        }
    }

    let meta = &response.metadata;
    assert_eq!(meta.generator_mode, GeneratorMode::Generative);
    assert_eq!(meta.attempts, 1);
    assert!(meta.retry_reason.is_none());
    let total = response.days.iter().map(|d| d.meals.len() as u32).sum::<u32>();
    assert_eq!(
        meta.provenance.generated_recipe_count + meta.provenance.reused_recipe_count,
        total,
    );
}

#[tokio::test]
async fn peanut_allergy_candidate_never_survives_repair() {
    let fixture = Fixture::new();
    let mut request = request(1, vec![MealSlot::Dinner]);
    request.profile.allergies = vec!["pinda".into()];

    // First output smuggles peanut butter in; repair must remove it
    fixture.generator.push_response(plan_json(&request, |_, slot| {
        meal_json(
            "Wrap met pindakaas",
            slot,
            &[("nevo-pindakaas", 30, "Pindakaas"), ("nevo-kip", 120, "Kipfilet")],
        )
    }));
    fixture.generator.push_response(plan_json(&request, |_, slot| {
        meal_json(
            "Kip met broccoli",
            slot,
            &[("nevo-kip", 150, "Kipfilet"), ("nevo-broccoli", 200, "Broccoli")],
        )
    }));

    let planner = fixture.planner();
    let response = planner.generate(&request).await.unwrap();

    for day in &response.days {
        for meal in &day.meals {
            for ingredient in &meal.ingredients {
                assert!(!ingredient
                    .display_name
                    .as_deref()
                    .unwrap_or_default()
                    .to_lowercase()
                    .contains("pinda"));
            }
        }
    }

    assert_eq!(fixture.generator.call_count(), 2);
    let repair = &fixture.generator.recorded_requests()[1];
    assert!(repair.prompt.contains("ALLERGEN_CONFLICT"));
    assert!(repair.prompt.contains("Pindakaas"));
}

#[tokio::test]
async fn breakfast_preference_miss_repairs_with_the_specific_hint() {
    let fixture = Fixture::new();
    let mut request = request(1, vec![MealSlot::Breakfast]);
    request.profile.slot_preferences = vec![SlotPreference {
        slot: MealSlot::Breakfast,
        terms: vec!["eiwitshake".into()],
    }];

    // A fruit-only smoothie with no protein source misses the preference
    fixture.generator.push_response(plan_json(&request, |_, slot| {
        meal_json(
            "Fruitsmoothie",
            slot,
            &[("nevo-banaan", 120, "Banaan"), ("nevo-appel", 80, "Appel")],
        )
    }));
    fixture.generator.push_response(plan_json(&request, |_, slot| {
        meal_json(
            "Eiwitshake bosvruchten",
            slot,
            &[("nevo-eiwitpoeder", 40, "Eiwitshake poeder"), ("nevo-kwark", 200, "Magere kwark")],
        )
    }));

    let planner = fixture.planner();
    let response = planner.generate(&request).await.unwrap();

    assert!(response.days[0].meals[0].name.to_lowercase().contains("eiwitshake"));
    let repair = &fixture.generator.recorded_requests()[1];
    assert!(repair.prompt.contains("MEAL_PREFERENCE_MISS"));
    assert!(repair.prompt.contains("eiwitshake"));
}

#[tokio::test]
async fn calorie_miss_is_adjusted_without_spending_the_repair() {
    let fixture = Fixture::new();
    let mut request = request(1, vec![MealSlot::Dinner]);
    request.profile.calorie_target = Some(CalorieTarget {
        min_kcal: 1800.0,
        max_kcal: 2200.0,
    });

    // 400 g of Maaltijdmix at 400 kcal/100g is 1600 kcal; scale 1.25 lands on 2000
    fixture.generator.push_response(plan_json(&request, |_, slot| {
        meal_json("Maaltijdmix", slot, &[("nevo-mix", 400, "Maaltijdmix")])
    }));

    let planner = fixture.planner();
    let response = planner.generate(&request).await.unwrap();

    assert_eq!(response.metadata.attempts, 1);
    assert_eq!(fixture.generator.call_count(), 1);
    assert_eq!(response.days[0].meals[0].ingredients[0].quantity_grams, 500);
}

#[tokio::test]
async fn unfixable_calorie_miss_surfaces_generation_failed() {
    let fixture = Fixture::new();
    let mut request = request(1, vec![MealSlot::Dinner]);
    request.profile.calorie_target = Some(CalorieTarget {
        min_kcal: 1800.0,
        max_kcal: 2200.0,
    });

    // 900 kcal cannot reach 1800 within the 1.3 clamp, twice
    let low = plan_json(&request, |_, slot| {
        meal_json("Maaltijdmix", slot, &[("nevo-mix", 225, "Maaltijdmix")])
    });
    fixture.generator.push_response(low.clone());
    fixture.generator.push_response(low);

    let planner = fixture.planner();
    let err = planner.generate(&request).await.unwrap_err();

    assert_eq!(err.code, ErrorCode::GenerationFailed);
    assert!(err.details["issues"].to_string().contains("CALORIE_TARGET_MISS"));
}

#[tokio::test]
async fn unknown_ingredient_codes_fail_after_one_repair() {
    let fixture = Fixture::new();
    let request = request(1, vec![MealSlot::Dinner]);

    let phantom = plan_json(&request, |_, slot| {
        meal_json("Duivenborst", slot, &[("nevo-duif", 150, "Duivenborst")])
    });
    fixture.generator.push_response(phantom.clone());
    fixture.generator.push_response(phantom);

    let planner = fixture.planner();
    let err = planner.generate(&request).await.unwrap_err();

    assert_eq!(err.code, ErrorCode::GenerationFailed);
    assert!(err.details["issues"].to_string().contains("UNKNOWN_INGREDIENT_CODE"));
    assert_eq!(fixture.generator.call_count(), 2);
}

#[tokio::test]
async fn fenced_output_is_stripped_before_parsing() {
    let fixture = Fixture::new();
    let request = request(1, vec![MealSlot::Dinner]);

    let plan = plan_json(&request, |_, slot| {
        meal_json("Kip met rijst", slot, &[("nevo-kip", 150, "Kipfilet")])
    });
    fixture.generator.push_response(format!("```json\n{plan}\n```"));

    let planner = fixture.planner();
    let response = planner.generate(&request).await.unwrap();
    assert_eq!(response.metadata.attempts, 1);
}

#[tokio::test]
async fn day_regeneration_returns_a_single_day() {
    let fixture = Fixture::new();
    let request = request(2, vec![MealSlot::Dinner]);
    let date = NaiveDate::from_ymd_opt(2025, 3, 4).unwrap();

    fixture.generator.push_response(
        serde_json::json!({
            "date": date.to_string(),
            "meals": [meal_json("Zalm met spinazie", MealSlot::Dinner, &[
                ("nevo-zalm", 150, "Zalmfilet"),
                ("nevo-spinazie", 200, "Spinazie"),
            ])],
        })
        .to_string(),
    );

    let planner = fixture.planner();
    let day = planner.generate_day(&request, date).await.unwrap();
    assert_eq!(day.date, date);
    assert_eq!(day.meals.len(), 1);
    assert_eq!(day.meals[0].date, date);
}

#[tokio::test]
async fn meal_regeneration_returns_one_meal_in_the_requested_slot() {
    let fixture = Fixture::new();
    let request = request(1, vec![MealSlot::Lunch]);
    let date = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();

    fixture.generator.push_response(
        meal_json(
            "Volkoren wrap met kip",
            MealSlot::Lunch,
            &[("nevo-volkoren", 80, "Volkorenbrood"), ("nevo-kip", 100, "Kipfilet")],
        )
        .to_string(),
    );

    let planner = fixture.planner();
    let meal = planner.generate_meal(&request, date, MealSlot::Lunch).await.unwrap();
    assert_eq!(meal.slot, MealSlot::Lunch);
    assert_eq!(meal.date, date);
}

struct EverythingCommitted;

#[async_trait]
impl EditabilityGate for EverythingCommitted {
    async fn is_editable(&self, _date: NaiveDate, _slot: Option<MealSlot>) -> AppResult<bool> {
        Ok(false)
    }
}

#[tokio::test]
async fn committed_targets_are_locked_for_regeneration() {
    let mut fixture = Fixture::new();
    fixture.editability = Some(Arc::new(EverythingCommitted));
    let request = request(1, vec![MealSlot::Dinner]);
    let date = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();

    let planner = fixture.planner();
    let err = planner.generate_day(&request, date).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Locked);

    let err = planner
        .generate_meal(&request, date, MealSlot::Dinner)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Locked);
    assert_eq!(fixture.generator.call_count(), 0);
}

#[tokio::test]
async fn invalid_requests_fail_before_any_external_call() {
    let fixture = Fixture::new();
    let mut bad = request(1, vec![MealSlot::Dinner]);
    bad.end_date = bad.start_date - chrono::Days::new(1);

    let planner = fixture.planner();
    let err = planner.generate(&bad).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidRequest);
    assert_eq!(fixture.generator.call_count(), 0);
}
