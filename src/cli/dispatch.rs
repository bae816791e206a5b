use super::env::CliArgs;
use super::models::cmd_check_model;
use super::plan::cmd_plan;
use super::run::cmd_run;
use crate::cli::commands::Commands;
use crate::cli::context::CliContext;
use anyhow::Result;

pub async fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<()> {
    match cli.command.clone() {
        Commands::Plan(args) => cmd_plan(args, ctx).await,
        Commands::Run(args) => cmd_run(args, ctx).await,
        Commands::CheckModel(args) => cmd_check_model(args, ctx),
    }
}
