// ABOUTME: Unified error handling for the meal plan generation engine
// ABOUTME: Defines the closed error taxonomy, detail payloads, and convenience constructors
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nutriplan Coaching

//! # Unified Error Handling System
//!
//! This module provides the centralized error handling system for the planning
//! engine. Every failure that survives its documented retry ceiling surfaces as
//! a typed, user-safe [`AppError`] with machine-readable detail, never a raw
//! stack trace or prompt text.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::models::{ForceDeficitItem, ValidationIssue};

/// Standard error codes used throughout the engine
///
/// The set is closed: callers can match exhaustively and rely on every failure
/// mode mapping to exactly one code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Malformed input, detected before any external call
    #[serde(rename = "INVALID_REQUEST")]
    InvalidRequest,
    /// Parse/schema/constraint failure surviving one repair
    #[serde(rename = "GENERATION_FAILED")]
    GenerationFailed,
    /// Hard-rule or day-quota block from the guardrails enforcer
    #[serde(rename = "GUARDRAILS_VIOLATION")]
    GuardrailsViolation,
    /// Blocked culinary coherence rule match
    #[serde(rename = "CULINARY_VIOLATION")]
    CulinaryViolation,
    /// Plausibility failure after one retry
    #[serde(rename = "SANITY_FAILED")]
    SanityFailed,
    /// Required candidate pool empty after exclusion filtering
    #[serde(rename = "INSUFFICIENT_INGREDIENTS")]
    InsufficientIngredients,
    /// More AI-authored slots than the provenance budget allows
    #[serde(rename = "AI_BUDGET_EXCEEDED")]
    AiBudgetExceeded,
    /// Database-backed slot ratio below the provenance budget
    #[serde(rename = "DB_COVERAGE_TOO_LOW")]
    DbCoverageTooLow,
    /// Edit target already committed by the editability collaborator
    #[serde(rename = "LOCKED")]
    Locked,
    /// Ruleset/evaluator infrastructure failure; always fail-closed
    #[serde(rename = "EVALUATOR_ERROR")]
    EvaluatorError,
}

impl ErrorCode {
    /// Get a user-safe description of this error
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "The plan request is invalid",
            Self::GenerationFailed => "Plan generation failed after repair",
            Self::GuardrailsViolation => "The plan violates dietary guardrails",
            Self::CulinaryViolation => "The plan contains an implausible meal combination",
            Self::SanityFailed => "The plan failed the plausibility check",
            Self::InsufficientIngredients => "Not enough eligible ingredients remain",
            Self::AiBudgetExceeded => "Too many generated meals for the configured budget",
            Self::DbCoverageTooLow => "Too few database-backed meals for the configured budget",
            Self::Locked => "The target day or meal is already committed",
            Self::EvaluatorError => "Rule evaluation infrastructure failed",
        }
    }
}

/// Unified error type for the engine
#[derive(Debug, Error)]
pub struct AppError {
    /// Error code
    pub code: ErrorCode,
    /// Human-readable, user-safe message
    pub message: String,
    /// Machine-readable detail (issue lists, reason codes, deficits)
    pub details: serde_json::Value,
    /// Source error for error chaining
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    /// Create a new error with the given code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: serde_json::Value::Null,
            source: None,
        }
    }

    /// Attach machine-readable details
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    /// Attach a source error for chaining
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Invalid request, raised before any external call
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    /// Generation failure carrying the surviving validation issues
    pub fn generation_failed(message: impl Into<String>, issues: &[ValidationIssue]) -> Self {
        Self::new(ErrorCode::GenerationFailed, message).with_details(serde_json::json!({
            "issues": issues,
        }))
    }

    /// Guardrails block carrying reason codes and the ruleset stamp
    pub fn guardrails_violation(
        message: impl Into<String>,
        reason_codes: &[String],
        ruleset_version: &str,
        ruleset_hash: &str,
        deficits: &[ForceDeficitItem],
    ) -> Self {
        Self::new(ErrorCode::GuardrailsViolation, message).with_details(serde_json::json!({
            "reason_codes": reason_codes,
            "ruleset_version": ruleset_version,
            "ruleset_hash": ruleset_hash,
            "deficits": deficits,
        }))
    }

    /// Blocked culinary rule matches
    pub fn culinary_violation(message: impl Into<String>, violations: serde_json::Value) -> Self {
        Self::new(ErrorCode::CulinaryViolation, message).with_details(serde_json::json!({
            "violations": violations,
        }))
    }

    /// Plausibility failure after the bounded retry
    pub fn sanity_failed(message: impl Into<String>, reasons: &[String]) -> Self {
        Self::new(ErrorCode::SanityFailed, message).with_details(serde_json::json!({
            "reasons": reasons,
        }))
    }

    /// A required pool is empty after exclusion filtering
    pub fn insufficient_ingredients(category: impl Into<String>) -> Self {
        let category = category.into();
        Self::new(
            ErrorCode::InsufficientIngredients,
            format!("No eligible ingredients remain for category '{category}'"),
        )
        .with_details(serde_json::json!({ "category": category }))
    }

    /// Provenance budget: too many AI-authored slots
    pub fn ai_budget_exceeded(ai_slots: u32, max_ai_slots: u32) -> Self {
        Self::new(
            ErrorCode::AiBudgetExceeded,
            format!("{ai_slots} generated slots exceed the budget of {max_ai_slots}"),
        )
        .with_details(serde_json::json!({
            "ai_slots": ai_slots,
            "max_ai_slots": max_ai_slots,
        }))
    }

    /// Provenance budget: database-backed ratio below the floor
    pub fn db_coverage_too_low(db_ratio: f64, min_db_ratio: f64) -> Self {
        Self::new(
            ErrorCode::DbCoverageTooLow,
            format!("Database-backed slot ratio {db_ratio:.2} is below the floor {min_db_ratio:.2}"),
        )
        .with_details(serde_json::json!({
            "db_ratio": db_ratio,
            "min_db_ratio": min_db_ratio,
        }))
    }

    /// Edit target already committed
    pub fn locked(target: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::Locked,
            format!("{} is already committed and cannot be regenerated", target.into()),
        )
    }

    /// Evaluator/loader infrastructure failure, always fail-closed
    pub fn evaluator(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::EvaluatorError, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.description(), self.message)
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;

/// Conversion from `anyhow::Error` for collaborator implementations built on it
impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        match error.source() {
            Some(source) => Self::new(ErrorCode::EvaluatorError, error.to_string()).with_details(
                serde_json::json!({
                    "source": source.to_string(),
                }),
            ),
            None => Self::new(ErrorCode::EvaluatorError, error.to_string()),
        }
    }
}
