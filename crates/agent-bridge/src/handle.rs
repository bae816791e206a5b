use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use browserpilot_core_types::TaskId;
use serde_json::Value;

use crate::errors::AgentError;
use crate::instruction::Instruction;
use crate::llm::LlmConfig;

/// Opaque capability able to carry out one instruction at a time.
///
/// Each task owns its handle exclusively; implementations never see two
/// concurrent `execute` calls from the same task.
#[async_trait]
pub trait AgentHandle: Send + Sync {
    /// Carry out a single instruction and return whatever result it produced.
    async fn execute(&self, instruction: &Instruction) -> Result<Value, AgentError>;

    /// Release the underlying browser session. Called exactly once per task.
    async fn close(&self) -> Result<(), AgentError> {
        Ok(())
    }
}

/// Creates agent handles for tasks.
#[async_trait]
pub trait AgentFactory: Send + Sync {
    async fn create(
        &self,
        task_id: &TaskId,
        options: &AgentOptions,
    ) -> Result<Arc<dyn AgentHandle>, AgentError>;
}

/// Per-task settings used when an agent is created
#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Resolved model configuration; `None` for non-AI agents
    pub llm: Option<LlmConfig>,
    pub headless: bool,
    pub max_steps: u32,
    pub record_video: bool,
    pub debug_mode: bool,
    pub screenshot_dir: PathBuf,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            llm: None,
            headless: true,
            max_steps: 10,
            record_video: false,
            debug_mode: false,
            screenshot_dir: PathBuf::from("screenshots"),
        }
    }
}

impl AgentOptions {
    pub fn with_llm(mut self, llm: LlmConfig) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_screenshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.screenshot_dir = dir.into();
        self
    }
}
