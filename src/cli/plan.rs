use std::path::PathBuf;

use action_flow::{plan, ScriptVariables};
use anyhow::{Context, Result};
use clap::Args;

use super::context::CliContext;
use super::output::{print_structured, OutputFormat};
use super::script::{into_variables, load_script, parse_var};

#[derive(Args, Clone, Debug)]
pub struct PlanArgs {
    /// Script file (JSON, or YAML by extension)
    #[arg(short, long)]
    pub script: PathBuf,

    /// Script variable override
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
    pub vars: Vec<(String, String)>,
}

pub async fn cmd_plan(args: PlanArgs, ctx: &CliContext) -> Result<()> {
    let script = load_script(&args.script).await?;
    let variables = ScriptVariables::new(into_variables(args.vars));
    let instructions = plan(&script, &variables)
        .with_context(|| format!("translating {}", args.script.display()))?;

    match ctx.output() {
        OutputFormat::Human => {
            println!(
                "Script '{}': {} step(s), {} instruction(s)",
                script.name,
                script.steps.len(),
                instructions.len()
            );
            for (idx, instruction) in instructions.iter().enumerate() {
                println!("{:>3}. [{}] {}", idx + 1, instruction.step_id, instruction.text);
            }
        }
        format => print_structured(&instructions, format)?,
    }
    Ok(())
}
