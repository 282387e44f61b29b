// ABOUTME: Logging configuration and structured logging setup for the planning engine
// ABOUTME: Configures log levels, formatters, and output destinations via tracing-subscriber
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nutriplan Coaching

//! Structured logging setup for host applications embedding the engine

use std::env;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Output format
    pub format: LogFormat,
    /// Include source file and line numbers
    pub include_location: bool,
}

/// Log output format options
#[derive(Debug, Clone)]
pub enum LogFormat {
    /// `JSON` format for production logging
    Json,
    /// Pretty format for development
    Pretty,
    /// Compact format for space-constrained environments
    Compact,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Pretty,
            include_location: false,
        }
    }
}

impl LoggingConfig {
    /// Build a logging configuration from environment variables
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(level) = env::var("NUTRIPLAN_LOG_LEVEL") {
            config.level = level;
        }
        if let Ok(format) = env::var("NUTRIPLAN_LOG_FORMAT") {
            config.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "compact" => LogFormat::Compact,
                _ => LogFormat::Pretty,
            };
        }
        config
    }
}

/// Initialize the global tracing subscriber
///
/// Respects `RUST_LOG` when set, falling back to the configured level.
/// Calling this twice returns an error from the subscriber registry; hosts
/// that install their own subscriber should simply skip this call.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Json => {
            registry
                .with(fmt::layer().json().with_file(config.include_location))
                .try_init()?;
        }
        LogFormat::Pretty => {
            registry
                .with(fmt::layer().pretty().with_file(config.include_location))
                .try_init()?;
        }
        LogFormat::Compact => {
            registry
                .with(fmt::layer().compact().with_file(config.include_location))
                .try_init()?;
        }
    }

    Ok(())
}
