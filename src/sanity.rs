// ABOUTME: External plausibility predicate over a finished plan
// ABOUTME: Ships accepting and scripted implementations for tests
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nutriplan Coaching

//! # Sanity Validator Interface
//!
//! A black-box holistic plausibility predicate over a finished plan, treated
//! as an external collaborator. The orchestrator checks an accepted plan once
//! and spends at most one lower-temperature regeneration on a failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::errors::AppResult;
use crate::models::MealPlanDay;

/// Verdict of a plausibility check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanityVerdict {
    /// Whether the plan is plausible
    pub plausible: bool,
    /// Reasons for an implausible verdict
    pub reasons: Vec<String>,
}

impl SanityVerdict {
    /// A passing verdict
    #[must_use]
    pub const fn pass() -> Self {
        Self {
            plausible: true,
            reasons: Vec::new(),
        }
    }
}

/// Plausibility predicate contract
#[async_trait]
pub trait SanityValidator: Send + Sync {
    /// Check a finished plan
    async fn check(&self, days: &[MealPlanDay]) -> AppResult<SanityVerdict>;
}

/// Validator that accepts every plan
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysPlausible;

#[async_trait]
impl SanityValidator for AlwaysPlausible {
    async fn check(&self, _days: &[MealPlanDay]) -> AppResult<SanityVerdict> {
        Ok(SanityVerdict::pass())
    }
}

/// Validator that rejects the first N checks, for retry-path tests
#[derive(Debug, Default)]
pub struct RejectFirstN {
    remaining: AtomicU32,
}

impl RejectFirstN {
    /// Reject the next `n` checks, then accept
    #[must_use]
    pub fn new(n: u32) -> Self {
        Self {
            remaining: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl SanityValidator for RejectFirstN {
    async fn check(&self, _days: &[MealPlanDay]) -> AppResult<SanityVerdict> {
        let before = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
            .unwrap_or(0);
        if before > 0 {
            Ok(SanityVerdict {
                plausible: false,
                reasons: vec!["scripted rejection".to_owned()],
            })
        } else {
            Ok(SanityVerdict::pass())
        }
    }
}
