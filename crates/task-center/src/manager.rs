use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use action_flow::{
    plan, ExecutionEvent, ExecutionOptions, ExecutionStatus, Script, ScriptExecutor,
    ScriptVariables,
};
use agent_bridge::{
    create_llm_config, resolve_api_key, AgentError, AgentFactory, AgentHandle, AgentOptions,
    Instruction, LlmConfig, LlmProvider,
};
use browserpilot_core_types::{TaskId, TaskStatus};
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::TaskCenterError;
use crate::model::{
    AgentStatus, Task, TaskConfig, TaskEvent, TaskManagerConfig, TaskRequest,
};
use crate::registry::TaskRegistry;

/// What a task context executes
#[derive(Debug, Clone)]
enum Work {
    FreeForm { goal: String, max_steps: u32 },
    Script {
        script: Script,
        options: ExecutionOptions,
    },
}

/// Control surface of one running task
#[derive(Debug, Clone)]
struct TaskContext {
    cancel: CancellationToken,
    variables: ScriptVariables,
}

struct Inner {
    config: TaskManagerConfig,
    registry: TaskRegistry,
    factory: Arc<dyn AgentFactory>,
    slots: Arc<Semaphore>,
    contexts: DashMap<TaskId, TaskContext>,
    agents: DashMap<TaskId, Arc<dyn AgentHandle>>,
    shutdown: CancellationToken,
}

/// Owns task identities, their lifecycle and their execution contexts.
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<Inner>,
}

impl TaskManager {
    pub fn new(config: TaskManagerConfig, factory: Arc<dyn AgentFactory>) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1)));
        let registry = TaskRegistry::new(config.max_log_entries);
        Self {
            inner: Arc::new(Inner {
                config,
                registry,
                factory,
                slots,
                contexts: DashMap::new(),
                agents: DashMap::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &TaskManagerConfig {
        &self.inner.config
    }

    pub fn generate_task_id(&self) -> TaskId {
        self.inner.registry.generate_id()
    }

    /// Create a `running` record for `task_id`.
    pub fn register_task(&self, task_id: TaskId) -> Result<(), TaskCenterError> {
        self.inner.registry.register(task_id, String::new())
    }

    pub fn complete_task(&self, task_id: &TaskId, result: Value) -> bool {
        self.inner.complete(task_id, result)
    }

    pub fn fail_task(&self, task_id: &TaskId, error: impl Into<String>) -> bool {
        self.inner.fail(task_id, error.into(), None)
    }

    /// Returns true only when the task was running; the execution context is
    /// signalled and unwinds at its next suspension point.
    pub fn cancel_task(&self, task_id: &TaskId) -> bool {
        self.inner.cancel(task_id)
    }

    pub fn get_task(&self, task_id: &TaskId) -> Option<Task> {
        self.inner.registry.get(task_id)
    }

    pub fn list_tasks(&self) -> Vec<Task> {
        self.inner.registry.list()
    }

    /// Remove every finished task and release any agent still bound to one.
    pub async fn clear_history(&self) -> usize {
        let removed = self.inner.registry.clear_finished();
        for task_id in &removed {
            self.inner.release_agent(task_id).await;
        }
        info!(removed = removed.len(), "cleared task history");
        removed.len()
    }

    pub fn add_log(&self, task_id: &TaskId, message: impl AsRef<str>) -> bool {
        self.inner.registry.add_log(task_id, message.as_ref())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.inner.registry.subscribe()
    }

    /// Validate `request`, register a task and start executing it in the
    /// background. Returns the new task id immediately.
    ///
    /// Unsupported models, missing credentials and untranslatable scripts are
    /// rejected here, before a task id is handed out.
    pub fn submit(&self, request: TaskRequest) -> Result<TaskId, TaskCenterError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(TaskCenterError::ShuttingDown);
        }
        let agent_options = self.inner.agent_options(&request.config)?;
        let work = self.inner.work(&request)?;

        let task_id = self.generate_task_id();
        let context = TaskContext {
            cancel: self.inner.shutdown.child_token(),
            variables: ScriptVariables::new(request.config.variables.clone()),
        };
        self.inner.contexts.insert(task_id.clone(), context.clone());
        if let Err(err) = self
            .inner
            .registry
            .register(task_id.clone(), request.task.clone())
        {
            self.inner.contexts.remove(&task_id);
            return Err(err);
        }
        self.add_log(&task_id, format!("Task submitted: {}", request.task));
        info!(task_id = %task_id, "task submitted");

        tokio::spawn(run_task(
            Arc::clone(&self.inner),
            task_id.clone(),
            work,
            agent_options,
            context,
        ));
        Ok(task_id)
    }

    pub fn submit_script(
        &self,
        script: Script,
        config: TaskConfig,
    ) -> Result<TaskId, TaskCenterError> {
        self.submit(TaskRequest::script(script).with_config(config))
    }

    pub fn agent_status(&self, task_id: &TaskId) -> AgentStatus {
        if self.inner.agents.contains_key(task_id) {
            AgentStatus::Active
        } else {
            AgentStatus::Stopped
        }
    }

    /// Eagerly bind an agent to a running task.
    pub async fn start_agent(
        &self,
        task_id: &TaskId,
        options: &AgentOptions,
    ) -> Result<AgentStatus, TaskCenterError> {
        match self.inner.registry.status(task_id) {
            None => return Err(TaskCenterError::NotFound(task_id.clone())),
            Some(status) if status.is_terminal() => {
                return Err(TaskCenterError::NotRunning(task_id.clone()))
            }
            Some(_) => {}
        }
        self.inner.acquire_agent(task_id, options).await?;
        Ok(AgentStatus::Active)
    }

    /// Best-effort close of the agent bound to `task_id`.
    pub async fn stop_agent(&self, task_id: &TaskId) -> bool {
        self.inner.release_agent(task_id).await
    }

    /// Override script variables of a running task; applied from its next run.
    pub fn update_variables(
        &self,
        task_id: &TaskId,
        variables: HashMap<String, String>,
    ) -> Result<(), TaskCenterError> {
        let context = self
            .inner
            .contexts
            .get(task_id)
            .map(|entry| entry.value().clone());
        match context {
            Some(context) => {
                let names: Vec<String> = variables.keys().cloned().collect();
                context.variables.extend(variables);
                self.add_log(task_id, format!("Variables updated: {}", names.join(", ")));
                Ok(())
            }
            None if self.inner.registry.status(task_id).is_some() => {
                Err(TaskCenterError::NotRunning(task_id.clone()))
            }
            None => Err(TaskCenterError::NotFound(task_id.clone())),
        }
    }

    /// Resolve once the task is terminal and its execution context has ended.
    pub async fn wait(&self, task_id: &TaskId) -> Result<Task, TaskCenterError> {
        let mut events = self.subscribe();
        loop {
            let task = self
                .get_task(task_id)
                .ok_or_else(|| TaskCenterError::NotFound(task_id.clone()))?;
            if task.status.is_terminal() && !self.inner.contexts.contains_key(task_id) {
                return Ok(task);
            }
            match events.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Ok(task),
            }
        }
    }

    /// Cancel every running task and close every agent.
    pub async fn shutdown(&self) {
        info!("task manager shutting down");
        for task_id in self.inner.registry.running_ids() {
            self.inner.cancel(&task_id);
        }
        self.inner.shutdown.cancel();
        let bound: Vec<TaskId> = self
            .inner
            .agents
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for task_id in bound {
            self.inner.release_agent(&task_id).await;
        }
    }
}

impl Inner {
    fn complete(&self, task_id: &TaskId, result: Value) -> bool {
        if self
            .registry
            .transition(task_id, TaskStatus::Completed, Some(result), None)
        {
            self.registry.add_log(task_id, "Task completed");
            self.signal_context(task_id);
            true
        } else {
            false
        }
    }

    fn fail(&self, task_id: &TaskId, error: String, result: Option<Value>) -> bool {
        let message = format!("Task failed: {}", error);
        if self
            .registry
            .transition(task_id, TaskStatus::Failed, result, Some(error))
        {
            self.registry.add_log(task_id, &message);
            self.signal_context(task_id);
            true
        } else {
            false
        }
    }

    fn cancel(&self, task_id: &TaskId) -> bool {
        if !self
            .registry
            .transition(task_id, TaskStatus::Cancelled, None, None)
        {
            return false;
        }
        self.signal_context(task_id);
        self.registry.add_log(task_id, "Task cancelled");
        info!(task_id = %task_id, "task cancelled");
        true
    }

    /// Wake the execution context of a task that just became terminal so it
    /// unwinds and releases its agent.
    fn signal_context(&self, task_id: &TaskId) {
        if let Some(context) = self.contexts.get(task_id) {
            context.cancel.cancel();
        }
    }

    /// Record a finished payload: normal completion when still running,
    /// otherwise attached to the cancelled record.
    fn settle(&self, task_id: &TaskId, outcome: Result<Value, (String, Option<Value>)>) {
        let settled = match outcome {
            Ok(result) => self.complete(task_id, result.clone()) || self.attach(task_id, result),
            Err((error, partial)) => {
                self.fail(task_id, error, partial.clone())
                    || partial.map_or(false, |result| self.attach(task_id, result))
            }
        };
        if !settled {
            debug!(task_id = %task_id, "outcome arrived after task was finalised");
        }
    }

    fn attach(&self, task_id: &TaskId, result: Value) -> bool {
        self.registry.attach_partial_result(task_id, result)
    }

    fn agent_options(&self, config: &TaskConfig) -> Result<AgentOptions, TaskCenterError> {
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| self.config.default_model.clone());
        LlmProvider::from_model(&model)?;
        let explicit = config.api_key.as_ref().map(|key| key.expose());
        let llm: Option<LlmConfig> = match resolve_api_key(&model, explicit) {
            Ok(key) => Some(create_llm_config(&model, key)?),
            Err(AgentError::MissingApiKey(_)) if !self.config.require_api_key => {
                debug!(model = %model, "no API key configured; agent runs without LLM settings");
                None
            }
            Err(err) => return Err(err.into()),
        };

        Ok(AgentOptions {
            llm,
            headless: config.headless.unwrap_or(self.config.headless),
            max_steps: config.max_steps.unwrap_or(self.config.max_steps),
            record_video: config.record_video,
            debug_mode: config.debug_mode,
            screenshot_dir: config
                .screenshot_dir
                .clone()
                .unwrap_or_else(|| self.config.screenshot_dir.clone()),
        })
    }

    fn work(&self, request: &TaskRequest) -> Result<Work, TaskCenterError> {
        let config = &request.config;
        match &request.script {
            Some(script) => {
                plan(script, &ScriptVariables::new(config.variables.clone()))?;
                let mut options = ExecutionOptions {
                    task_interval: config
                        .task_interval_ms
                        .map(Duration::from_millis)
                        .unwrap_or(self.config.task_interval),
                    periodic: config.periodic,
                    period: self.config.period,
                    max_retries: config.max_retries.unwrap_or(self.config.max_retries),
                    stop_on_error: config.stop_on_error.unwrap_or(self.config.stop_on_error),
                    max_run_history: self.config.max_run_history,
                    action_timeout: self.config.action_timeout,
                };
                if let Some(period_secs) = config.period_secs {
                    if !period_secs.is_finite() || period_secs < 0.0 {
                        return Err(TaskCenterError::InvalidRequest(format!(
                            "period must be a non-negative number of seconds, got {}",
                            period_secs
                        )));
                    }
                    options.period = Duration::try_from_secs_f64(period_secs).map_err(|err| {
                        TaskCenterError::InvalidRequest(format!(
                            "period of {} seconds is out of range: {}",
                            period_secs, err
                        ))
                    })?;
                }
                Ok(Work::Script {
                    script: script.clone(),
                    options,
                })
            }
            None if request.task.trim().is_empty() => Err(TaskCenterError::InvalidRequest(
                "task description is empty".to_string(),
            )),
            None => Ok(Work::FreeForm {
                goal: request.task.clone(),
                max_steps: config.max_steps.unwrap_or(self.config.max_steps),
            }),
        }
    }

    async fn acquire_agent(
        &self,
        task_id: &TaskId,
        options: &AgentOptions,
    ) -> Result<Arc<dyn AgentHandle>, AgentError> {
        if let Some(agent) = self.agents.get(task_id) {
            return Ok(Arc::clone(agent.value()));
        }
        let created = self.factory.create(task_id, options).await?;
        let bound = Arc::clone(
            self.agents
                .entry(task_id.clone())
                .or_insert_with(|| Arc::clone(&created))
                .value(),
        );
        if !Arc::ptr_eq(&bound, &created) {
            // Lost a race with another acquirer; keep theirs.
            if let Err(err) = created.close().await {
                warn!(task_id = %task_id, "failed to close surplus agent: {}", err);
            }
        } else {
            self.registry.add_log(task_id, "Agent started");
        }
        Ok(bound)
    }

    async fn release_agent(&self, task_id: &TaskId) -> bool {
        let Some((_, agent)) = self.agents.remove(task_id) else {
            return false;
        };
        if let Err(err) = agent.close().await {
            warn!(task_id = %task_id, "failed to close agent: {}", err);
        }
        self.registry.add_log(task_id, "Agent stopped");
        true
    }
}

/// Task context: waits for a slot, runs the work in a nested task so a panic
/// is contained, then releases the agent on every exit path.
async fn run_task(
    inner: Arc<Inner>,
    task_id: TaskId,
    work: Work,
    options: AgentOptions,
    context: TaskContext,
) {
    let permit = tokio::select! {
        biased;
        _ = context.cancel.cancelled() => None,
        permit = Arc::clone(&inner.slots).acquire_owned() => permit.ok(),
    };

    if let Some(permit) = permit {
        let worker = tokio::spawn(execute(
            Arc::clone(&inner),
            task_id.clone(),
            work,
            options,
            context.clone(),
        ));
        if let Err(join_err) = worker.await {
            error!(task_id = %task_id, "task context aborted: {}", join_err);
            inner.fail(&task_id, format!("task aborted: {}", join_err), None);
        }
        drop(permit);
    } else if inner.registry.status(&task_id) == Some(TaskStatus::Running) {
        inner.fail(&task_id, "no execution slot available".to_string(), None);
    }

    inner.release_agent(&task_id).await;
    inner.contexts.remove(&task_id);
    inner.registry.emit(TaskEvent::ContextClosed {
        task_id: task_id.clone(),
    });
    debug!(task_id = %task_id, "task context closed");
}

async fn execute(
    inner: Arc<Inner>,
    task_id: TaskId,
    work: Work,
    options: AgentOptions,
    context: TaskContext,
) {
    let agent = match inner.acquire_agent(&task_id, &options).await {
        Ok(agent) => agent,
        Err(err) => {
            inner.fail(&task_id, format!("agent unavailable: {}", err), None);
            return;
        }
    };
    if context.cancel.is_cancelled() {
        return;
    }

    match work {
        Work::FreeForm { goal, max_steps } => {
            inner
                .registry
                .add_log(&task_id, &format!("Executing task: {}", goal));
            let instruction = Instruction::free_form(goal, max_steps);
            let outcome = agent
                .execute(&instruction)
                .await
                .map_err(|err| (err.to_string(), None));
            inner.settle(&task_id, outcome);
        }
        Work::Script { script, options } => {
            let executor = ScriptExecutor::new(options);
            let observer = {
                let inner = Arc::clone(&inner);
                let task_id = task_id.clone();
                move |event: &ExecutionEvent| {
                    inner.registry.add_log(&task_id, &event.describe());
                }
            };
            let outcome = match executor
                .execute_script(
                    &script,
                    &context.variables,
                    agent.as_ref(),
                    &context.cancel,
                    &observer,
                )
                .await
            {
                Ok(execution) => {
                    let status = execution.status;
                    let error = execution.error.clone();
                    let payload = serde_json::to_value(&execution)
                        .unwrap_or_else(|err| json!({ "serialization_error": err.to_string() }));
                    match status {
                        ExecutionStatus::Completed => Ok(payload),
                        ExecutionStatus::Failed => Err((
                            error.unwrap_or_else(|| "script execution failed".to_string()),
                            Some(payload),
                        )),
                        ExecutionStatus::Cancelled | ExecutionStatus::Running => {
                            inner.cancel(&task_id);
                            inner.attach(&task_id, payload);
                            return;
                        }
                    }
                }
                Err(err) => Err((err.to_string(), None)),
            };
            inner.settle(&task_id, outcome);
        }
    }
}
