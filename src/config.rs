//! Global configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::{AppError, Result};

/// Default resource limits applied to new sessions.
///
/// Every field is overridable per `create_session` request.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LimitsConfig {
    /// Agent actions a session may consume before forced abandonment.
    #[serde(default = "default_action_limit")]
    pub action_limit: i64,
    /// Errors a session may accumulate before it is flagged.
    #[serde(default = "default_error_limit")]
    pub error_limit: i64,
    /// Warnings a session may accumulate before it is flagged.
    #[serde(default = "default_warning_limit")]
    pub warning_limit: i64,
    /// Business-level session staleness horizon.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: i64,
    /// Findings carved into one session by default.
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
}

fn default_action_limit() -> i64 {
    200
}

fn default_error_limit() -> i64 {
    10
}

fn default_warning_limit() -> i64 {
    10
}

fn default_timeout_seconds() -> i64 {
    3600
}

fn default_batch_size() -> i64 {
    20
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            action_limit: default_action_limit(),
            error_limit: default_error_limit(),
            warning_limit: default_warning_limit(),
            timeout_seconds: default_timeout_seconds(),
            batch_size: default_batch_size(),
        }
    }
}

/// Scheduler and stall-sweep cadence.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SchedulerConfig {
    /// Seconds between periodic `schedule_next` ticks.
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,
    /// Seconds between stall-recovery sweeps.
    #[serde(default = "default_sweep_seconds")]
    pub stall_sweep_seconds: u64,
}

fn default_tick_seconds() -> u64 {
    60
}

fn default_sweep_seconds() -> u64 {
    300
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_seconds: default_tick_seconds(),
            stall_sweep_seconds: default_sweep_seconds(),
        }
    }
}

/// External agent process launch settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RunnerConfig {
    /// Agent binary (e.g. `claude`).
    pub agent_cmd: String,
    /// Default arguments passed before the rendered prompt.
    #[serde(default)]
    pub agent_args: Vec<String>,
    /// Hard per-session execution timeout (system-level kill switch).
    #[serde(default = "default_execution_timeout")]
    pub execution_timeout_seconds: u64,
    /// Actor-level cap on any single execution.
    #[serde(default = "default_actor_cap")]
    pub actor_cap_seconds: u64,
    /// Directory holding session-scoped agent logs.
    pub log_dir: PathBuf,
}

fn default_execution_timeout() -> u64 {
    3600
}

fn default_actor_cap() -> u64 {
    7200
}

/// Model connectivity for the agent process environment.
///
/// The API key is loaded at runtime via OS keychain or environment
/// variable, never from the TOML file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ModelConfig {
    /// Default model identifier handed to the agent.
    #[serde(default)]
    pub model: Option<String>,
    /// Credential injected into the agent environment (populated at runtime).
    #[serde(skip)]
    pub api_key: String,
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Path to the `SQLite` database file.
    pub db_path: PathBuf,
    /// Default session resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Scheduler cadence.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Agent process launch settings.
    pub runner: RunnerConfig,
    /// Model connectivity defaults.
    #[serde(default)]
    pub model: ModelConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the model API credential from OS keychain with env-var fallback.
    ///
    /// Tries the `assessd` keyring service first, then falls back to the
    /// `ASSESSD_MODEL_API_KEY` environment variable.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if neither keychain nor env var provide
    /// the credential.
    pub async fn load_credentials(&mut self) -> Result<()> {
        self.model.api_key = load_credential("model_api_key", "ASSESSD_MODEL_API_KEY").await?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.limits.action_limit <= 0 {
            return Err(AppError::Config(
                "limits.action_limit must be greater than zero".into(),
            ));
        }
        if self.limits.batch_size <= 0 {
            return Err(AppError::Config(
                "limits.batch_size must be greater than zero".into(),
            ));
        }
        if self.limits.timeout_seconds <= 0 {
            return Err(AppError::Config(
                "limits.timeout_seconds must be greater than zero".into(),
            ));
        }
        if self.runner.agent_cmd.is_empty() {
            return Err(AppError::Config("runner.agent_cmd must not be empty".into()));
        }
        if self.runner.execution_timeout_seconds == 0 {
            return Err(AppError::Config(
                "runner.execution_timeout_seconds must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<String> {
    let key = keyring_key.to_owned();

    // Try OS keychain first via spawn_blocking (keyring is synchronous I/O).
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new("assessd", &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(value),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            warn!(
                key = keyring_key,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    // Fallback to environment variable.
    env::var(env_key).map_err(|_| {
        AppError::Config(format!(
            "credential {keyring_key} not found in keychain or {env_key} env var"
        ))
    })
}
