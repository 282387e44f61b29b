// ABOUTME: Generative text service abstraction for schema-constrained plan generation
// ABOUTME: Defines the request contract and ships a scripted in-memory provider for tests
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nutriplan Coaching

//! # Generative Text Service Interface
//!
//! The engine consumes a schema-constrained text-generation capability through
//! this contract. The raw response is *expected* to parse as JSON matching the
//! supplied schema, but carries no validity guarantee. Detecting and
//! repairing unreliable output is the attempt runner's job, never the
//! caller's.

pub mod prompts;
pub mod schema;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::errors::{AppError, AppResult};

/// A schema-constrained generation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredRequest {
    /// Full prompt text
    pub prompt: String,
    /// JSON schema the output must match
    pub output_schema: serde_json::Value,
    /// Sampling temperature; repairs run lower
    pub temperature: f32,
    /// Output token ceiling, bounded to avoid truncation
    pub max_output_tokens: u32,
}

impl StructuredRequest {
    /// Create a new request
    #[must_use]
    pub fn new(
        prompt: String,
        output_schema: serde_json::Value,
        temperature: f32,
        max_output_tokens: u32,
    ) -> Self {
        Self {
            prompt,
            output_schema,
            temperature,
            max_output_tokens,
        }
    }
}

/// Schema-constrained text generation contract
#[async_trait]
pub trait GenerativeTextService: Send + Sync {
    /// Issue one generation request and return the raw response text
    async fn generate_structured(&self, request: &StructuredRequest) -> AppResult<String>;
}

/// Scripted generator for tests: pops queued responses and records every request
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<StructuredRequest>>,
}

impl ScriptedGenerator {
    /// Create an empty scripted generator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response to return on the next call
    pub fn push_response(&self, response: impl Into<String>) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(response.into());
        }
    }

    /// All requests issued so far, in call order
    #[must_use]
    pub fn recorded_requests(&self) -> Vec<StructuredRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    /// Number of calls issued so far
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl GenerativeTextService for ScriptedGenerator {
    async fn generate_structured(&self, request: &StructuredRequest) -> AppResult<String> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        self.responses
            .lock()
            .ok()
            .and_then(|mut responses| responses.pop_front())
            .ok_or_else(|| {
                AppError::evaluator("scripted generator exhausted: no queued response")
            })
    }
}
