//! Offline agent used when no browser driver is attached
//!
//! Every instruction is logged and acknowledged with a deterministic payload,
//! so scripts can be exercised end to end without launching a browser.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent_bridge::{AgentError, AgentFactory, AgentHandle, AgentOptions, BrowserOp, Instruction};
use async_trait::async_trait;
use browserpilot_core_types::TaskId;
use serde_json::{json, Value};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunFactory;

#[async_trait]
impl AgentFactory for DryRunFactory {
    async fn create(
        &self,
        task_id: &TaskId,
        options: &AgentOptions,
    ) -> Result<Arc<dyn AgentHandle>, AgentError> {
        info!(
            task_id = %task_id,
            provider = options.llm.as_ref().map(|llm| llm.provider().as_str()).unwrap_or("none"),
            headless = options.headless,
            "starting dry-run agent"
        );
        Ok(Arc::new(DryRunAgent::new(
            task_id.clone(),
            options.screenshot_dir.clone(),
        )))
    }
}

#[derive(Debug)]
pub struct DryRunAgent {
    task_id: TaskId,
    screenshot_dir: PathBuf,
    screenshots: AtomicU64,
}

impl DryRunAgent {
    pub fn new(task_id: TaskId, screenshot_dir: PathBuf) -> Self {
        Self {
            task_id,
            screenshot_dir,
            screenshots: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl AgentHandle for DryRunAgent {
    async fn execute(&self, instruction: &Instruction) -> Result<Value, AgentError> {
        info!(
            task_id = %self.task_id,
            step_id = %instruction.step_id,
            op = instruction.op.name(),
            "{}",
            instruction.text
        );
        let payload = match &instruction.op {
            BrowserOp::Wait { duration_ms } => {
                tokio::time::sleep(Duration::from_millis(*duration_ms)).await;
                json!({ "dry_run": true, "waited_ms": duration_ms })
            }
            BrowserOp::Screenshot { .. } => {
                let seq = self.screenshots.fetch_add(1, Ordering::Relaxed) + 1;
                let path = self
                    .screenshot_dir
                    .join(format!("{}_{}.png", self.task_id, seq));
                json!({ "dry_run": true, "screenshot": path.display().to_string() })
            }
            BrowserOp::Extract { .. } => json!({ "dry_run": true, "text": "" }),
            BrowserOp::Task { goal, max_steps } => json!({
                "dry_run": true,
                "goal": goal,
                "max_steps": max_steps,
                "steps_taken": 0,
            }),
            _ => json!({ "dry_run": true, "acknowledged": instruction.op.name() }),
        };
        Ok(payload)
    }

    async fn close(&self) -> Result<(), AgentError> {
        debug!(task_id = %self.task_id, "dry-run agent closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn screenshots_are_numbered_per_agent() {
        let agent = DryRunAgent::new(TaskId::from("task_1"), PathBuf::from("shots"));
        let shot = Instruction::new(
            "s",
            "Take screenshot of the page",
            BrowserOp::Screenshot { selector: None },
        );
        agent.execute(&shot).await.unwrap();
        let second = agent.execute(&shot).await.unwrap();
        assert_eq!(
            second["screenshot"],
            json!(PathBuf::from("shots").join("task_1_2.png").display().to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn free_form_goals_are_acknowledged() {
        let agent = DryRunFactory
            .create(&TaskId::from("task_2"), &AgentOptions::default())
            .await
            .unwrap();
        let result = agent
            .execute(&Instruction::free_form("book a table", 5))
            .await
            .unwrap();
        assert_eq!(result["dry_run"], json!(true));
        assert_eq!(result["goal"], json!("book a table"));
    }
}
