use std::env;
use std::fs as stdfs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use browserpilot::ApiConfig;
use tokio::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOCAL_ENV_PATH: &str = "config/local.env";
const LOG_FILE_NAME: &str = "browserpilot.log";

/// Outcome of reading `config/local.env`, reported once logging is up
#[derive(Debug, Default)]
pub struct LocalEnvReport {
    pub path: PathBuf,
    pub applied: usize,
    pub invalid_lines: Vec<usize>,
    pub read_error: Option<String>,
}

/// Export `KEY=VALUE` pairs from `config/local.env` without clobbering
/// variables already present in the environment.
pub fn load_local_env_overrides() -> Option<LocalEnvReport> {
    let path = Path::new(LOCAL_ENV_PATH);
    if !path.exists() {
        return None;
    }
    let mut report = LocalEnvReport {
        path: path.to_path_buf(),
        ..LocalEnvReport::default()
    };

    match stdfs::read_to_string(path) {
        Ok(contents) => {
            for (idx, raw_line) in contents.lines().enumerate() {
                let line = raw_line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let Some((key, value)) = line.split_once('=') else {
                    report.invalid_lines.push(idx + 1);
                    continue;
                };
                let key = key.trim();
                if key.is_empty() || env::var(key).is_ok() {
                    continue;
                }
                env::set_var(key, unescape_value(value.trim()));
                report.applied += 1;
            }
        }
        Err(err) => report.read_error = Some(err.to_string()),
    }
    Some(report)
}

/// Install the console layer on stderr plus a daily-rolling file under
/// `log_dir`. Keep the returned guard alive for the whole process.
pub fn init_logging(level: &str, debug: bool, log_dir: &Path) -> Result<WorkerGuard> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };

    stdfs::create_dir_all(log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;
    let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(level.to_string())),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    File,
    Defaults,
}

pub struct LoadedConfig {
    pub config: ApiConfig,
    pub path: PathBuf,
    pub source: ConfigSource,
}

pub async fn load_config(config_path: Option<&PathBuf>) -> Result<LoadedConfig> {
    let config_path = match config_path {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };

    let (mut config, source) = if config_path.exists() {
        let content = fs::read_to_string(&config_path)
            .await
            .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
        (
            ApiConfig::from_yaml(&content, &config_path)?,
            ConfigSource::File,
        )
    } else {
        (ApiConfig::default(), ConfigSource::Defaults)
    };

    config
        .apply_env_overrides()
        .context("Failed to apply environment overrides")?;
    config.validate()?;

    Ok(LoadedConfig {
        config,
        path: config_path,
        source,
    })
}

// Priority: ./config/config.yaml > <config dir>/browserpilot/config.yaml
fn default_config_path() -> Result<PathBuf> {
    let local_config = PathBuf::from("config/config.yaml");
    if local_config.exists() {
        return Ok(local_config);
    }
    let mut path = dirs::config_dir().context("Failed to get config directory")?;
    path.push("browserpilot");
    path.push("config.yaml");
    Ok(path)
}

fn unescape_value(value: &str) -> String {
    if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
        let inner = &value[1..value.len() - 1];
        inner
            .replace("\\\"", "\"")
            .replace("\\n", "\n")
            .replace("\\r", "\r")
            .replace("\\t", "\t")
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_values_are_unescaped() {
        assert_eq!(unescape_value("\"sk-\\\"x\\\"\""), "sk-\"x\"");
        assert_eq!(unescape_value("plain"), "plain");
        assert_eq!(unescape_value("\""), "\"");
    }

    #[tokio::test]
    async fn explicit_config_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "default_model: gpt-4o-mini\nmax_concurrent_tasks: 2\n").unwrap();

        let loaded = load_config(Some(&path)).await.unwrap();
        assert_eq!(loaded.source, ConfigSource::File);
        assert_eq!(loaded.config.max_concurrent_tasks, 2);
    }

    #[tokio::test]
    async fn missing_explicit_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");
        let loaded = load_config(Some(&path)).await.unwrap();
        assert_eq!(loaded.source, ConfigSource::Defaults);
        assert_eq!(loaded.path, path);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "max_retries: 0\n").unwrap();
        assert!(load_config(Some(&path)).await.is_err());
    }
}
