//! Process-level configuration
//!
//! [`ApiConfig`] is read from YAML, adjusted by `BROWSERPILOT_*` environment
//! variables and validated before a [`TaskManager`] is built from it.
//!
//! [`TaskManager`]: browserpilot_task_center::TaskManager

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use agent_bridge::LlmProvider;
use browserpilot_task_center::TaskManagerConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::ConfigError;

pub const ENV_MODEL: &str = "BROWSERPILOT_MODEL";
pub const ENV_MAX_CONCURRENT: &str = "BROWSERPILOT_MAX_CONCURRENT";
pub const ENV_SCREENSHOT_DIR: &str = "BROWSERPILOT_SCREENSHOT_DIR";
pub const ENV_HEADLESS: &str = "BROWSERPILOT_HEADLESS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub default_model: String,
    pub max_concurrent_tasks: usize,
    /// Upper bound on how long the CLI waits for one task
    pub default_timeout_secs: u64,
    pub screenshot_dir: Option<PathBuf>,
    pub debug_mode: bool,
    pub headless: bool,
    pub max_steps: u32,
    pub task_interval_ms: u64,
    pub max_retries: u32,
    pub period_secs: u64,
    pub stop_on_error: bool,
    pub max_run_history: usize,
    pub max_log_entries: usize,
    pub log_dir: PathBuf,
    /// Per-instruction deadline; unset lets an agent call run as long as it needs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_timeout_ms: Option<u64>,
    pub require_api_key: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            default_model: "gpt-4o".to_string(),
            max_concurrent_tasks: 10,
            default_timeout_secs: 300,
            screenshot_dir: None,
            debug_mode: false,
            headless: true,
            max_steps: 10,
            task_interval_ms: 500,
            max_retries: 3,
            period_secs: 60,
            stop_on_error: true,
            max_run_history: 100,
            max_log_entries: 1000,
            log_dir: PathBuf::from("logs"),
            action_timeout_ms: None,
            require_api_key: true,
        }
    }
}

impl ApiConfig {
    pub fn from_yaml(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_with(|name| env::var(name).ok())
    }

    /// Apply `BROWSERPILOT_*` overrides read through `lookup`. Empty values
    /// are ignored.
    pub fn apply_overrides_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |var: &'static str| lookup(var).filter(|value| !value.trim().is_empty());

        if let Some(model) = read(ENV_MODEL) {
            debug!(var = ENV_MODEL, "overriding default model");
            self.default_model = model.trim().to_string();
        }
        if let Some(raw) = read(ENV_MAX_CONCURRENT) {
            self.max_concurrent_tasks = raw.trim().parse().map_err(|_| ConfigError::Env {
                var: ENV_MAX_CONCURRENT,
                value: raw.clone(),
            })?;
        }
        if let Some(dir) = read(ENV_SCREENSHOT_DIR) {
            self.screenshot_dir = Some(PathBuf::from(dir));
        }
        if let Some(raw) = read(ENV_HEADLESS) {
            self.headless = parse_bool(&raw).ok_or(ConfigError::Env {
                var: ENV_HEADLESS,
                value: raw,
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        LlmProvider::from_model(&self.default_model)
            .map_err(|err| ConfigError::Invalid(format!("default_model: {}", err)))?;
        if self.max_concurrent_tasks == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "max_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn screenshot_dir(&self) -> PathBuf {
        self.screenshot_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("screenshots"))
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn manager_config(&self) -> TaskManagerConfig {
        TaskManagerConfig {
            default_model: self.default_model.clone(),
            max_concurrent_tasks: self.max_concurrent_tasks,
            require_api_key: self.require_api_key,
            headless: self.headless,
            max_steps: self.max_steps,
            task_interval: Duration::from_millis(self.task_interval_ms),
            max_retries: self.max_retries,
            period: Duration::from_secs(self.period_secs),
            stop_on_error: self.stop_on_error,
            max_run_history: self.max_run_history,
            max_log_entries: self.max_log_entries,
            screenshot_dir: self.screenshot_dir(),
            action_timeout: self.action_timeout_ms.map(Duration::from_millis),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
