// ABOUTME: Nutrition database lookup interface for code resolution, search, and macro sums
// ABOUTME: Ships an in-memory implementation for tests, mirroring the external client contract
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nutriplan Coaching

//! # Nutrition Lookup Interface
//!
//! The engine never talks to the nutrition database directly; it consumes this
//! lookup contract. Implementations resolve stable ingredient codes to
//! nutrient records, search candidates by term, and sum macros over an
//! ingredient list. Nutrient amounts are per 100 g.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::errors::AppResult;
use crate::models::{IngredientCandidate, IngredientRef, MacroSummary};

/// A resolved nutrition-database record
///
/// Macro amounts are per 100 g of the ingredient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutrientRecord {
    /// Stable nutrition-database code
    pub code: String,
    /// Display name
    pub name: String,
    /// Canonical ingredient id
    pub canonical_id: Uuid,
    /// Category/tag labels
    pub tags: Vec<String>,
    /// Macros per 100 g
    pub per_100g: MacroSummary,
}

/// Nutrition database lookup contract
#[async_trait]
pub trait NutritionLookup: Send + Sync {
    /// Resolve an ingredient code to its record, or `None` when unknown
    async fn resolve(&self, code: &str) -> AppResult<Option<NutrientRecord>>;

    /// Search candidates by term
    async fn search(&self, term: &str, limit: u32) -> AppResult<Vec<IngredientCandidate>>;

    /// Sum macros over an ingredient list, scaled by quantity
    ///
    /// Unknown codes contribute nothing to the sum; callers that care about
    /// resolution run the constraint evaluator's code check, which never drops
    /// an unresolved code silently.
    async fn macro_totals(&self, ingredients: &[IngredientRef]) -> AppResult<MacroSummary> {
        let mut total = MacroSummary::default();
        for ingredient in ingredients {
            if let Some(record) = self.resolve(&ingredient.code).await? {
                let factor = f64::from(ingredient.quantity_grams) / 100.0;
                total.add(&MacroSummary {
                    kcal: record.per_100g.kcal * factor,
                    protein_g: record.per_100g.protein_g * factor,
                    carbs_g: record.per_100g.carbs_g * factor,
                    fat_g: record.per_100g.fat_g * factor,
                    fiber_g: record.per_100g.fiber_g * factor,
                });
            }
        }
        Ok(total)
    }
}

/// In-memory nutrition lookup for tests and local development
#[derive(Debug, Default)]
pub struct InMemoryNutritionLookup {
    records: HashMap<String, NutrientRecord>,
}

impl InMemoryNutritionLookup {
    /// Create an empty lookup
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record, keyed by its code
    pub fn insert(&mut self, record: NutrientRecord) {
        self.records.insert(record.code.clone(), record);
    }

    /// Convenience constructor for a record with the given macros per 100 g
    #[must_use]
    pub fn record(code: &str, name: &str, tags: &[&str], per_100g: MacroSummary) -> NutrientRecord {
        NutrientRecord {
            code: code.to_owned(),
            name: name.to_owned(),
            canonical_id: Uuid::new_v4(),
            tags: tags.iter().map(|t| (*t).to_owned()).collect(),
            per_100g,
        }
    }
}

#[async_trait]
impl NutritionLookup for InMemoryNutritionLookup {
    async fn resolve(&self, code: &str) -> AppResult<Option<NutrientRecord>> {
        Ok(self.records.get(code).cloned())
    }

    async fn search(&self, term: &str, limit: u32) -> AppResult<Vec<IngredientCandidate>> {
        let needle = term.to_lowercase();
        let mut matches: Vec<IngredientCandidate> = self
            .records
            .values()
            .filter(|r| {
                r.name.to_lowercase().contains(&needle)
                    || r.tags.iter().any(|t| t.to_lowercase().contains(&needle))
            })
            .map(|r| IngredientCandidate {
                code: r.code.clone(),
                name: r.name.clone(),
                tags: r.tags.clone(),
            })
            .collect();
        matches.sort_by(|a, b| a.code.cmp(&b.code));
        matches.truncate(limit as usize);
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn lookup_with_kip() -> InMemoryNutritionLookup {
        let mut lookup = InMemoryNutritionLookup::new();
        lookup.insert(InMemoryNutritionLookup::record(
            "nevo-1001",
            "Kipfilet",
            &["proteins"],
            MacroSummary {
                kcal: 110.0,
                protein_g: 23.0,
                ..MacroSummary::default()
            },
        ));
        lookup
    }

    #[tokio::test]
    async fn resolve_round_trips_codes() {
        let lookup = lookup_with_kip();
        let record = lookup.resolve("nevo-1001").await.unwrap().unwrap();
        assert_eq!(record.code, "nevo-1001");
        assert!(lookup.resolve("nevo-9999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn macro_totals_scale_by_quantity() {
        let lookup = lookup_with_kip();
        let refs = vec![IngredientRef {
            code: "nevo-1001".into(),
            quantity_grams: 200,
            display_name: Some("Kipfilet".into()),
            tags: vec![],
            canonical_id: None,
        }];
        let total = lookup.macro_totals(&refs).await.unwrap();
        assert!((total.kcal - 220.0).abs() < 1e-9);
        assert!((total.protein_g - 46.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn search_matches_name_and_tags_case_insensitively() {
        let lookup = lookup_with_kip();
        assert_eq!(lookup.search("KIP", 10).await.unwrap().len(), 1);
        assert_eq!(lookup.search("proteins", 10).await.unwrap().len(), 1);
        assert!(lookup.search("vis", 10).await.unwrap().is_empty());
    }
}
