use clap::Subcommand;

use super::models::CheckModelArgs;
use super::plan::PlanArgs;
use super::run::RunArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Validate a script and print the instructions it translates to
    Plan(PlanArgs),

    /// Run a script or a free-form goal as a task
    Run(RunArgs),

    /// Check that a model name maps to a supported LLM provider
    CheckModel(CheckModelArgs),
}
