//! Layered configuration.
//!
//! Defaults, then `<config_dir>/docket/config.json`, then environment
//! variables. A missing or unreadable file falls back to defaults.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};

use crate::completion::RetryPolicy;

const APP_NAME: &str = "docket";
const CONFIG_FILE: &str = "config.json";

pub const DEFAULT_COMPLETION_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "google/gemini-2.5-pro-preview";

/// Upper bound on retries per completion call, whatever the configuration says.
pub const MAX_RETRIES: u32 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub matching: MatchingConfig,
    pub extraction: ExtractionConfig,
    pub completion: CompletionConfig,
    /// Maximum number of items processed concurrently per project.
    pub max_workers: usize,
    /// Database file. Defaults to the platform data directory.
    pub database_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            matching: MatchingConfig::default(),
            extraction: ExtractionConfig::default(),
            completion: CompletionConfig::default(),
            max_workers: 4,
            database_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Minimum similarity (0..=1) for a template to be selected.
    pub threshold: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self { threshold: 0.35 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Answers below this confidence are left unset.
    pub min_confidence: f64,
    /// Context budget per completion call, in characters.
    pub max_context_chars: usize,
    pub max_tokens: u32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            max_context_chars: 12_000,
            max_tokens: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub base_url: String,
    pub model: String,
    /// Read from `OPENROUTER_API_KEY`; never written to the config file.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_COMPLETION_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            timeout_secs: 60,
            max_retries: 2,
            initial_backoff_ms: 500,
        }
    }
}

impl CompletionConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries.min(MAX_RETRIES),
            timeout: Duration::from_secs(self.timeout_secs),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            ..RetryPolicy::default()
        }
    }
}

impl Config {
    /// Load from the config file and environment.
    pub fn load() -> Self {
        let mut config = match Self::try_load() {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load config, using defaults");
                Self::default()
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    fn try_load() -> Result<Self> {
        let config_path = get_config_path()?;
        if !config_path.exists() {
            return Ok(Self::default());
        }
        Self::from_file(&config_path)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).context("Failed to read config file")?;
        let config = serde_json::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Apply environment overrides. Unparsable values are ignored.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("DOCKET_MATCH_THRESHOLD").and_then(|s| s.parse().ok()) {
            self.matching.threshold = v;
        }
        if let Some(v) = var("DOCKET_MIN_CONFIDENCE").and_then(|s| s.parse().ok()) {
            self.extraction.min_confidence = v;
        }
        if let Some(v) = var("DOCKET_MAX_WORKERS").and_then(|s| s.parse().ok()) {
            self.max_workers = v;
        }
        if let Some(v) = var("DOCKET_CALL_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
            self.completion.timeout_secs = v;
        }
        if let Some(v) = var("DOCKET_MAX_RETRIES").and_then(|s| s.parse().ok()) {
            self.completion.max_retries = v;
        }
        if let Some(v) = var("DOCKET_COMPLETION_URL") {
            self.completion.base_url = v;
        }
        if let Some(v) = var("DOCKET_MODEL") {
            self.completion.model = v;
        }
        if let Some(v) = var("OPENROUTER_API_KEY").filter(|s| !s.is_empty()) {
            self.completion.api_key = Some(v);
        }
        if let Some(v) = var("DOCKET_DB") {
            self.database_path = Some(PathBuf::from(v));
        }
    }
}

fn get_config_path() -> Result<PathBuf> {
    let mut path =
        config_dir().ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    path.push(APP_NAME);
    path.push(CONFIG_FILE);
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.matching.threshold, 0.35);
        assert_eq!(config.extraction.min_confidence, 0.5);
        assert_eq!(config.completion.timeout_secs, 60);
        assert_eq!(config.completion.max_retries, 2);
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("DOCKET_MATCH_THRESHOLD", "0.5"),
            ("DOCKET_MAX_WORKERS", "not-a-number"),
            ("OPENROUTER_API_KEY", "sk-test"),
        ]);
        let mut config = Config::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.matching.threshold, 0.5);
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.completion.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn retry_budget_is_capped() {
        let mut config = Config::default();
        config.apply_env(|key| (key == "DOCKET_MAX_RETRIES").then(|| u32::MAX.to_string()));

        assert_eq!(config.completion.max_retries, u32::MAX);
        assert_eq!(config.completion.retry_policy().max_retries, MAX_RETRIES);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "extraction": { "min_confidence": 0.7 } }"#).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.extraction.min_confidence, 0.7);
        assert_eq!(config.extraction.max_context_chars, 12_000);
        assert_eq!(config.matching.threshold, 0.35);
    }
}
