//! Assistant configuration
//!
//! Read from the process environment (a `.env` file is honoured by the binary).
//!
//! - OPENAI_API_KEY: API key for the completion service
//! - OPENAI_BASE_URL: OpenAI-compatible endpoint (default: https://api.openai.com/v1)
//! - OPENAI_MODEL: model name (default: gpt-4o-mini)
//! - DATABASE_URL: PostgreSQL connection string
//! - ASSISTANT_TRANSLATION_TIMEOUT_SECS / ASSISTANT_COMPOSITION_TIMEOUT_SECS /
//!   ASSISTANT_FALLBACK_TIMEOUT_SECS / ASSISTANT_EXECUTION_TIMEOUT_SECS /
//!   ASSISTANT_PROBE_TIMEOUT_SECS
//! - ASSISTANT_MAX_RESULT_ROWS: rows shown to the composer (default: 50)
//! - ASSISTANT_AUDIT_SINK: log | file | postgres (default: log)
//! - ASSISTANT_AUDIT_PATH: target of the file sink (default: assistant_audit.jsonl)

use crate::error::{AssistantError, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Per-call upper bounds for every external round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub translation: Duration,
    pub composition: Duration,
    pub fallback: Duration,
    pub execution: Duration,
    pub probe: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            translation: Duration::from_secs(30),
            composition: Duration::from_secs(30),
            fallback: Duration::from_secs(30),
            execution: Duration::from_secs(10),
            probe: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditTarget {
    Log,
    File(PathBuf),
    Postgres,
}

#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub database_url: Option<String>,
    pub timeouts: Timeouts,
    pub max_result_rows: usize,
    pub audit: AuditTarget,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            database_url: None,
            timeouts: Timeouts::default(),
            max_result_rows: 50,
            audit: AuditTarget::Log,
        }
    }
}

impl AssistantConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let timeouts = Timeouts {
            translation: secs_var("ASSISTANT_TRANSLATION_TIMEOUT_SECS", defaults.timeouts.translation)?,
            composition: secs_var("ASSISTANT_COMPOSITION_TIMEOUT_SECS", defaults.timeouts.composition)?,
            fallback: secs_var("ASSISTANT_FALLBACK_TIMEOUT_SECS", defaults.timeouts.fallback)?,
            execution: secs_var("ASSISTANT_EXECUTION_TIMEOUT_SECS", defaults.timeouts.execution)?,
            probe: secs_var("ASSISTANT_PROBE_TIMEOUT_SECS", defaults.timeouts.probe)?,
        };

        let audit = match env::var("ASSISTANT_AUDIT_SINK").ok().as_deref() {
            None => defaults.audit,
            Some(kind) => {
                let path = env::var("ASSISTANT_AUDIT_PATH")
                    .unwrap_or_else(|_| "assistant_audit.jsonl".to_string());
                parse_audit_target(kind, PathBuf::from(path))?
            }
        };

        Ok(Self {
            api_key: env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            base_url: env::var("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            model: env::var("OPENAI_MODEL").unwrap_or(defaults.model),
            database_url: env::var("DATABASE_URL").ok(),
            timeouts,
            max_result_rows: parsed_var("ASSISTANT_MAX_RESULT_ROWS", defaults.max_result_rows)?,
            audit,
        })
    }
}

pub fn parse_audit_target(kind: &str, path: PathBuf) -> Result<AuditTarget> {
    match kind.trim().to_lowercase().as_str() {
        "log" => Ok(AuditTarget::Log),
        "file" => Ok(AuditTarget::File(path)),
        "postgres" | "pg" => Ok(AuditTarget::Postgres),
        other => Err(AssistantError::Config(format!(
            "Unknown audit sink '{}' (expected log, file or postgres)",
            other
        ))),
    }
}

fn parsed_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AssistantError::Config(format!("Invalid value for {}: '{}'", name, raw))),
        Err(_) => Ok(default),
    }
}

fn secs_var(name: &str, default: Duration) -> Result<Duration> {
    parsed_var(name, default.as_secs()).map(Duration::from_secs)
}
