use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use super::context::CliContext;
use super::dispatch::dispatch;
use super::env::CliArgs;
use super::runtime::{init_logging, load_config, load_local_env_overrides, ConfigSource, LoadedConfig};

pub async fn run() -> Result<()> {
    let local_env = load_local_env_overrides();
    let cli = CliArgs::parse();

    let LoadedConfig {
        config,
        path,
        source,
    } = load_config(cli.config.as_ref()).await?;
    let _log_guard = init_logging(&cli.log_level, cli.debug || config.debug_mode, &config.log_dir)?;

    info!("Starting BrowserPilot v{}", env!("CARGO_PKG_VERSION"));
    if let Some(report) = local_env {
        if let Some(err) = report.read_error {
            warn!(path = %report.path.display(), %err, "failed to read local.env overrides");
        } else {
            for line in &report.invalid_lines {
                warn!(line, "invalid local.env entry; skipping");
            }
            info!(
                path = %report.path.display(),
                applied = report.applied,
                "Loaded environment overrides from local.env"
            );
        }
    }
    match source {
        ConfigSource::File => info!("Loaded configuration from: {}", path.display()),
        ConfigSource::Defaults => warn!("Config file not found, using defaults: {}", path.display()),
    }

    let cli_context = CliContext::new(config, path, cli.output);
    match dispatch(&cli, &cli_context).await {
        Ok(()) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(err) => {
            error!("Command failed: {}", err);
            Err(err)
        }
    }
}
