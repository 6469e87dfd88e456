use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TandemError};

/// Top-level Tandem configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    pub model: ModelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Ceiling on model-invocation rounds per run.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default = "default_max_duration")]
    pub max_duration_secs: u64,
    /// Execute a batch of tool calls concurrently. Results are appended in
    /// request order either way.
    #[serde(default = "default_parallel_tools")]
    pub parallel_tools: bool,
    /// Token budget for the conversation view sent to the model.
    /// 0 disables windowing (full history).
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
    /// Number of trailing turns the window strategy always keeps.
    #[serde(default = "default_window_tail")]
    pub window_tail: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_duration_secs: default_max_duration(),
            parallel_tools: default_parallel_tools(),
            max_context_tokens: default_max_context_tokens(),
            window_tail: default_window_tail(),
        }
    }
}

fn default_max_turns() -> usize { 25 }
fn default_max_duration() -> u64 { 600 }
fn default_parallel_tools() -> bool { true }
fn default_max_context_tokens() -> usize { 80_000 }
fn default_window_tail() -> usize { 6 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

fn default_provider() -> String { "openai".to_string() }
fn default_max_tokens() -> u32 { 8192 }
fn default_temperature() -> f32 { 0.0 }

/// Retry configuration for model requests.
///
/// The default is the loop-controller policy: at most one immediate retry,
/// then the failure escalates as fatal for the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 1 }
fn default_initial_backoff() -> u64 { 500 }
fn default_max_backoff() -> u64 { 8000 }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| TandemError::ConfigNotFound(path.display().to_string()))?;

        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| TandemError::Config(e.to_string()))
    }
}

/// Expand `${ENV_VAR}` patterns in a string. Unset variables are left as-is.
fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match std::env::var(name) {
                    Ok(val) => out.push_str(&val),
                    Err(_) => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str("${");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
