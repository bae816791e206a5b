use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use browserpilot::DryRunFactory;
use browserpilot_core_types::{TaskId, TaskStatus};
use browserpilot_task_center::{Task, TaskConfig, TaskManager, TaskRequest};
use clap::{ArgGroup, Args};
use tracing::{debug, info, warn};

use super::context::CliContext;
use super::output::print_structured;
use super::script::{into_variables, load_script, parse_var};

#[derive(Args, Clone, Debug)]
#[command(group(ArgGroup::new("input").required(true).args(["script", "task"])))]
pub struct RunArgs {
    /// Script file (JSON, or YAML by extension)
    #[arg(short, long)]
    pub script: Option<PathBuf>,

    /// Free-form goal handed to the agent instead of a script
    #[arg(short, long)]
    pub task: Option<String>,

    /// Script variable override
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
    pub vars: Vec<(String, String)>,

    /// Repeat the script until cancelled
    #[arg(long)]
    pub periodic: bool,

    /// Pause between periodic runs (e.g. "90s", "5m")
    #[arg(long, requires = "periodic")]
    pub period: Option<humantime::Duration>,

    /// Attempts per action before it counts as failed
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Keep going after an action exhausts its retries
    #[arg(long)]
    pub continue_on_error: bool,

    /// Directory for screenshots
    #[arg(long)]
    pub screenshot_dir: Option<PathBuf>,

    /// Model to drive the agent with
    #[arg(short, long)]
    pub model: Option<String>,

    /// API key for the model's provider
    #[arg(long)]
    pub api_key: Option<String>,

    /// Give up and cancel after this long; periodic tasks wait for Ctrl-C by default
    #[arg(long)]
    pub timeout: Option<humantime::Duration>,
}

pub async fn cmd_run(args: RunArgs, ctx: &CliContext) -> Result<()> {
    let config = ctx.config();
    debug!(config = %ctx.config_path().display(), "building task manager");
    let manager = TaskManager::new(config.manager_config(), Arc::new(DryRunFactory));

    let deadline = match (args.timeout.as_deref().copied(), args.periodic) {
        (Some(limit), _) => Some(limit),
        (None, true) => None,
        (None, false) => Some(config.default_timeout()),
    };
    let request = build_request(&args, config.debug_mode).await?;
    let task_id = manager
        .submit(request)
        .context("task submission rejected")?;
    info!(task_id = %task_id, "task submitted");

    let task = tokio::select! {
        task = manager.wait(&task_id) => task?,
        _ = tokio::signal::ctrl_c() => {
            warn!(task_id = %task_id, "interrupt received; cancelling task");
            cancel_and_wait(&manager, &task_id).await?
        }
        _ = expire(deadline) => {
            warn!(task_id = %task_id, "task did not finish in time; cancelling");
            cancel_and_wait(&manager, &task_id).await?
        }
    };
    manager.shutdown().await;

    print_structured(&task, ctx.output())?;
    match task.status {
        TaskStatus::Completed => Ok(()),
        TaskStatus::Failed => bail!(
            "task {} failed: {}",
            task.task_id,
            task.error.as_deref().unwrap_or("unknown error")
        ),
        TaskStatus::Cancelled => bail!("task {} was cancelled", task.task_id),
        TaskStatus::Running => bail!("task {} is still running", task.task_id),
    }
}

async fn build_request(args: &RunArgs, debug_mode: bool) -> Result<TaskRequest> {
    let mut task_config = TaskConfig {
        debug_mode,
        variables: into_variables(args.vars.clone()),
        max_retries: args.max_retries,
        screenshot_dir: args.screenshot_dir.clone(),
        model: args.model.clone(),
        ..TaskConfig::default()
    };
    if let Some(key) = &args.api_key {
        task_config = task_config.with_api_key(key.clone());
    }
    if args.continue_on_error {
        task_config = task_config.with_stop_on_error(false);
    }
    if args.periodic {
        task_config.periodic = true;
        task_config.period_secs = args.period.as_deref().map(Duration::as_secs_f64);
    }

    let request = match (&args.script, &args.task) {
        (Some(path), _) => TaskRequest::script(load_script(path).await?),
        (None, Some(goal)) => TaskRequest::free_form(goal.clone()),
        (None, None) => bail!("either --script or --task is required"),
    };
    Ok(request.with_config(task_config))
}

async fn cancel_and_wait(manager: &TaskManager, task_id: &TaskId) -> Result<Task> {
    manager.cancel_task(task_id);
    Ok(manager.wait(task_id).await?)
}

async fn expire(deadline: Option<Duration>) {
    match deadline {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}
