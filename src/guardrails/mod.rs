// ABOUTME: Guardrails enforcement combining hard allow/block rules and diet-logic day quotas
// ABOUTME: Loads versioned content-hashed rulesets and fails closed on evaluator errors
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nutriplan Coaching

//! # Guardrails Enforcer
//!
//! Two independent evaluators run over the same finished plan: hard
//! allow/block matching of a versioned, content-hashed ruleset, and diet-logic
//! day-quota evaluation. The combined block is hard-rule-blocked OR
//! any-day-failed-quota. A quota-only block with at least one deficit permits
//! exactly one extra regeneration; any other block is terminal. Loader or
//! evaluator failure fails closed and is never silently allowed through. Shadow
//! mode evaluates and logs but never blocks.

pub mod diet_logic;

pub use diet_logic::{DietLogicLoader, DietPhaseRule, QuotaPhase, StaticDietLogic};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};

use crate::errors::{AppError, AppResult};
use crate::models::{
    ForceDeficitItem, GuardDecision, GuardOutcome, GuardrailsStamp, MealPlanDay,
};

// ============================================================================
// Hard allow/block ruleset
// ============================================================================

/// Outcome configured on a hard rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleOutcome {
    /// Explicitly allowed; overrides nothing, documents intent
    Allow,
    /// Matched targets produce a warning, non-blocking
    Warn,
    /// Matched targets block the plan
    Block,
}

/// One hard allow/block rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardRule {
    /// Term matched against plan targets, case-insensitive substring
    pub target: String,
    /// Configured outcome
    pub outcome: RuleOutcome,
    /// Stable reason code reported on a match
    pub reason_code: String,
}

/// A versioned, content-hashed hard ruleset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailsRuleset {
    /// Diet the ruleset belongs to
    pub diet_id: String,
    /// Version label assigned by the ruleset owner
    pub version: String,
    /// Ordered rules
    pub rules: Vec<HardRule>,
    /// Exclusion terms derived from block rules, used by the template path
    pub extra_exclusion_terms: Vec<String>,
    /// Content hash over the rules, computed at load time
    pub hash: String,
}

impl GuardrailsRuleset {
    /// Build a ruleset and stamp it with its content hash
    #[must_use]
    pub fn new(diet_id: String, version: String, rules: Vec<HardRule>) -> Self {
        let hash = content_hash(&rules);
        let extra_exclusion_terms = rules
            .iter()
            .filter(|r| r.outcome == RuleOutcome::Block)
            .map(|r| r.target.to_lowercase())
            .collect();
        Self {
            diet_id,
            version,
            rules,
            extra_exclusion_terms,
            hash,
        }
    }

    /// Identification stamp for response metadata and errors
    #[must_use]
    pub fn stamp(&self) -> GuardrailsStamp {
        GuardrailsStamp {
            version: self.version.clone(),
            hash: self.hash.clone(),
        }
    }
}

/// SHA-256 content hash over the canonical JSON encoding of the rules
#[must_use]
pub fn content_hash(rules: &[HardRule]) -> String {
    let canonical = serde_json::to_string(rules).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)
}

/// Guardrails evaluation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardrailsMode {
    /// Blocks are enforced
    #[default]
    Enforce,
    /// Evaluation is logged only; strictly observational
    Shadow,
}

/// Evaluation context passed alongside the targets
#[derive(Debug, Clone)]
pub struct GuardContext {
    /// Diet the plan was generated for
    pub diet_id: String,
    /// Output locale of the plan
    pub locale: String,
}

/// Loader and evaluator for hard guardrails rulesets
#[async_trait]
pub trait GuardrailsRulesetLoader: Send + Sync {
    /// Load the ruleset for a diet
    async fn load(
        &self,
        diet_id: &str,
        mode: GuardrailsMode,
        locale: &str,
    ) -> AppResult<GuardrailsRuleset>;

    /// Evaluate a ruleset against extracted plan targets
    ///
    /// # Errors
    ///
    /// An evaluation failure is an infrastructure error; the enforcer fails
    /// closed on it.
    fn evaluate(
        &self,
        ruleset: &GuardrailsRuleset,
        context: &GuardContext,
        targets: &[String],
    ) -> AppResult<GuardDecision> {
        let _ = context;
        Ok(match_targets(ruleset, targets))
    }
}

/// Default matching: case-insensitive substring of rule targets in plan targets
#[must_use]
pub fn match_targets(ruleset: &GuardrailsRuleset, targets: &[String]) -> GuardDecision {
    let lowered: Vec<String> = targets.iter().map(|t| t.to_lowercase()).collect();
    let mut reason_codes = Vec::new();
    let mut outcome = GuardOutcome::Allowed;

    for rule in &ruleset.rules {
        let needle = rule.target.to_lowercase();
        if !lowered.iter().any(|t| t.contains(&needle)) {
            continue;
        }
        match rule.outcome {
            RuleOutcome::Allow => {}
            RuleOutcome::Warn => {
                if outcome == GuardOutcome::Allowed {
                    outcome = GuardOutcome::Warned;
                }
                reason_codes.push(rule.reason_code.clone());
            }
            RuleOutcome::Block => {
                outcome = GuardOutcome::Blocked;
                reason_codes.push(rule.reason_code.clone());
            }
        }
    }

    GuardDecision {
        ok: outcome != GuardOutcome::Blocked,
        outcome,
        reason_codes,
    }
}

/// Static in-memory loader for tests and fixed deployments
#[derive(Debug)]
pub struct StaticGuardrailsLoader {
    ruleset: GuardrailsRuleset,
}

impl StaticGuardrailsLoader {
    /// Create a loader always returning the given ruleset
    #[must_use]
    pub fn new(ruleset: GuardrailsRuleset) -> Self {
        Self { ruleset }
    }

    /// Loader with an empty ruleset, for tests that exercise other stages
    #[must_use]
    pub fn permissive(diet_id: &str) -> Self {
        Self::new(GuardrailsRuleset::new(
            diet_id.to_owned(),
            "v0".to_owned(),
            Vec::new(),
        ))
    }
}

#[async_trait]
impl GuardrailsRulesetLoader for StaticGuardrailsLoader {
    async fn load(
        &self,
        _diet_id: &str,
        _mode: GuardrailsMode,
        _locale: &str,
    ) -> AppResult<GuardrailsRuleset> {
        Ok(self.ruleset.clone())
    }
}

// ============================================================================
// Target extraction
// ============================================================================

/// Extract textual/categorical matching targets from a plan
#[must_use]
pub fn plan_targets(days: &[MealPlanDay]) -> Vec<String> {
    let mut targets = Vec::new();
    for day in days {
        for meal in &day.meals {
            targets.push(meal.name.clone());
            for ingredient in &meal.ingredients {
                targets.push(ingredient.searchable_name());
                targets.extend(ingredient.tags.iter().cloned());
            }
        }
    }
    targets
}

// ============================================================================
// Enforcer
// ============================================================================

/// Combined verdict over both evaluators
#[derive(Debug, Clone)]
pub enum GuardVerdict {
    /// Plan may proceed; soft warnings attached
    Pass {
        /// Concatenated quota warnings and warn-rule reason codes
        warnings: Vec<String>,
    },
    /// Quota-only block with deficits; permits one targeted regeneration
    QuotaDeficit {
        /// Zero-based index of the earliest failing day
        day_index: usize,
        /// Date of the failing day
        date: chrono::NaiveDate,
        /// Unmet minimums driving the retry hint
        deficits: Vec<ForceDeficitItem>,
    },
    /// Hard-rule block, or a quota failure without usable deficits; terminal
    Blocked {
        /// Reason codes from the hard decision and quota failure
        reason_codes: Vec<String>,
    },
}

/// Guardrails enforcer over both rule systems
pub struct GuardrailsEnforcer {
    loader: Arc<dyn GuardrailsRulesetLoader>,
    diet_logic: Arc<dyn DietLogicLoader>,
    mode: GuardrailsMode,
    first_failing_day_only: bool,
}

impl GuardrailsEnforcer {
    /// Create an enforcer
    #[must_use]
    pub fn new(
        loader: Arc<dyn GuardrailsRulesetLoader>,
        diet_logic: Arc<dyn DietLogicLoader>,
        mode: GuardrailsMode,
        first_failing_day_only: bool,
    ) -> Self {
        Self {
            loader,
            diet_logic,
            mode,
            first_failing_day_only,
        }
    }

    /// The loaded ruleset's extra exclusion terms, for the template path
    ///
    /// # Errors
    ///
    /// Fails closed when the loader fails.
    pub async fn exclusion_terms(&self, diet_id: &str, locale: &str) -> AppResult<Vec<String>> {
        let ruleset = self.load_ruleset(diet_id, locale).await?;
        Ok(ruleset.extra_exclusion_terms)
    }

    /// Evaluate a finished plan against both rule systems
    ///
    /// # Errors
    ///
    /// Loader or evaluator failure returns `EVALUATOR_ERROR`; the caller never
    /// treats that as an allow.
    pub async fn enforce(
        &self,
        diet_id: &str,
        locale: &str,
        days: &[MealPlanDay],
    ) -> AppResult<(GuardVerdict, GuardrailsStamp)> {
        let ruleset = self.load_ruleset(diet_id, locale).await?;
        let stamp = ruleset.stamp();

        let context = GuardContext {
            diet_id: diet_id.to_owned(),
            locale: locale.to_owned(),
        };
        let targets = plan_targets(days);
        let decision = self
            .loader
            .evaluate(&ruleset, &context, &targets)
            .map_err(|e| {
                AppError::evaluator("guardrails evaluation failed").with_source(e)
            })?;

        let quota_rules = self
            .diet_logic
            .load(diet_id)
            .await
            .map_err(|e| AppError::evaluator("diet logic load failed").with_source(e))?;
        let quota = diet_logic::evaluate_plan(&quota_rules, days, self.first_failing_day_only);

        if self.mode == GuardrailsMode::Shadow {
            // Strictly observational: log and pass
            if !decision.ok || !quota.ok() {
                warn!(
                    "shadow guardrails would block: hard={:?} quota_failed={}",
                    decision.outcome,
                    !quota.ok(),
                );
            }
            return Ok((Self::pass(&decision, &quota), stamp));
        }

        if decision.outcome == GuardOutcome::Blocked {
            let mut reason_codes = decision.reason_codes;
            if let Some(failure) = &quota.first_failure {
                reason_codes.extend(failure.deficits.iter().map(|d| d.category_code.clone()));
            }
            return Ok((GuardVerdict::Blocked { reason_codes }, stamp));
        }

        if let Some(failure) = &quota.first_failure {
            if failure.deficits.is_empty() {
                return Ok((
                    GuardVerdict::Blocked {
                        reason_codes: vec!["QUOTA_FAILED".to_owned()],
                    },
                    stamp,
                ));
            }
            return Ok((
                GuardVerdict::QuotaDeficit {
                    day_index: failure.day_index,
                    date: failure.date,
                    deficits: failure.deficits.clone(),
                },
                stamp,
            ));
        }

        info!("guardrails passed for diet {diet_id} (ruleset {})", stamp.version);
        Ok((Self::pass(&decision, &quota), stamp))
    }

    async fn load_ruleset(&self, diet_id: &str, locale: &str) -> AppResult<GuardrailsRuleset> {
        self.loader
            .load(diet_id, self.mode, locale)
            .await
            .map_err(|e| AppError::evaluator("guardrails ruleset load failed").with_source(e))
    }

    fn pass(decision: &GuardDecision, quota: &diet_logic::PlanQuotaResult) -> GuardVerdict {
        let mut warnings = quota.warnings.clone();
        if decision.outcome == GuardOutcome::Warned {
            warnings.extend(decision.reason_codes.iter().cloned());
        }
        GuardVerdict::Pass { warnings }
    }
}
