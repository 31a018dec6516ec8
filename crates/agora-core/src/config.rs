use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AgoraError, Result};
use crate::types::AgentUnit;

/// Per-token pricing for one provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProviderRate {
    #[serde(default)]
    pub input: f64,
    #[serde(default)]
    pub output: f64,
    #[serde(default)]
    pub reasoning: f64,
}

impl ProviderRate {
    /// Crude per-call cost estimate used when ranking providers by price.
    pub fn estimate(&self) -> f64 {
        self.input + self.output + self.reasoning
    }
}

/// Registry entry for one provider: credentials plus the models it serves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderEntry {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub models: Vec<String>,
}

/// Backend settings for the decision oracle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default = "default_oracle_model")]
    pub model: String,
    #[serde(default = "default_oracle_temperature")]
    pub temperature: f32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: default_oracle_model(),
            temperature: default_oracle_temperature(),
        }
    }
}

fn default_oracle_model() -> String { "gpt-4o-mini".to_string() }
fn default_oracle_temperature() -> f32 { 0.2 }

/// Backend settings for the workflow designer model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DesignerConfig {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

/// Top-level run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Hard cap on debate iterations; the oracle's budget is clamped to this.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Hard cap on per-call completion tokens.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Preferred provider when the objective is "balanced".
    #[serde(default)]
    pub default_provider: Option<String>,
    #[serde(default)]
    pub provider_rates: HashMap<String, ProviderRate>,
    #[serde(default)]
    pub providers: HashMap<String, ProviderEntry>,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub designer: DesignerConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_tokens: default_max_tokens(),
            default_provider: None,
            provider_rates: HashMap::new(),
            providers: HashMap::new(),
            oracle: OracleConfig::default(),
            designer: DesignerConfig::default(),
        }
    }
}

fn default_max_iterations() -> u32 { 4 }
fn default_max_tokens() -> u32 { 2048 }

impl RunConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| AgoraError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| AgoraError::Config(e.to_string()))
    }

    /// Rate for a provider, falling back to the `default` rate entry, then zero.
    pub fn rate_for(&self, provider: &str) -> ProviderRate {
        self.provider_rates
            .get(provider)
            .or_else(|| self.provider_rates.get("default"))
            .copied()
            .unwrap_or_default()
    }
}

/// A roster file: a list of `[[agents]]` tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RosterFile {
    #[serde(default)]
    pub agents: Vec<AgentUnit>,
}

impl RosterFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| AgoraError::ConfigNotFound(path.display().to_string()))?;
        toml::from_str(&expand_env_vars(&content)).map_err(|e| AgoraError::Config(e.to_string()))
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}
