use agent_bridge::{resolve_llm_config, AgentError, LlmProvider};
use anyhow::{bail, Result};
use clap::Args;

use super::context::CliContext;
use super::output::{print_structured, OutputFormat};

#[derive(Args, Clone, Debug)]
pub struct CheckModelArgs {
    /// Model name; defaults to the configured default model
    pub model: Option<String>,

    /// API key to use instead of the provider's environment variable
    #[arg(long)]
    pub api_key: Option<String>,
}

pub fn cmd_check_model(args: CheckModelArgs, ctx: &CliContext) -> Result<()> {
    let model = args
        .model
        .unwrap_or_else(|| ctx.config().default_model.clone());
    let provider = LlmProvider::from_model(&model)?;

    let llm = match resolve_llm_config(&model, args.api_key.as_deref()) {
        Ok(llm) => llm,
        Err(AgentError::MissingApiKey(_)) => bail!(
            "model '{}' uses provider {} but no API key is available; pass --api-key or set {}",
            model,
            provider.as_str(),
            provider.api_key_env()
        ),
        Err(err) => return Err(err.into()),
    };

    match ctx.output() {
        OutputFormat::Human => {
            println!("Model:    {}", llm.model());
            println!("Provider: {}", provider.as_str());
            println!("API key:  ***");
        }
        format => print_structured(&llm, format)?,
    }
    Ok(())
}
