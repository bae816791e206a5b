//! Script executor implementation

use std::collections::HashMap;
use std::sync::Arc;

use agent_bridge::{AgentError, AgentHandle, Instruction};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{ExecutorError, ScriptError};
use crate::strategies::{FailureDecision, FailureStrategy, RetryPolicy};
use crate::translate::translate_script;
use crate::types::{ActionOutcome, ExecutionStatus, RunRecord, Script, ScriptExecution};

/// Knobs for a script execution
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOptions {
    /// Pause between attempts and after each action
    pub task_interval: Duration,
    pub periodic: bool,
    /// Pause between runs when periodic
    pub period: Duration,
    /// Total attempts per action
    pub max_retries: u32,
    pub stop_on_error: bool,
    /// Runs kept in [`ScriptExecution::runs`]
    pub max_run_history: usize,
    /// Hard limit per agent call; a timeout counts as a failed attempt
    pub action_timeout: Option<Duration>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            task_interval: Duration::from_millis(500),
            periodic: false,
            period: Duration::from_secs(60),
            max_retries: 3,
            stop_on_error: true,
            max_run_history: 100,
            action_timeout: None,
        }
    }
}

impl ExecutionOptions {
    pub fn with_task_interval(mut self, interval: Duration) -> Self {
        self.task_interval = interval;
        self
    }

    pub fn with_periodic(mut self, period: Duration) -> Self {
        self.periodic = true;
        self.period = period;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_stop_on_error(mut self, stop_on_error: bool) -> Self {
        self.stop_on_error = stop_on_error;
        self
    }

    pub fn with_max_run_history(mut self, max_run_history: usize) -> Self {
        self.max_run_history = max_run_history;
        self
    }

    pub fn with_action_timeout(mut self, limit: Duration) -> Self {
        self.action_timeout = Some(limit);
        self
    }
}

/// Runtime variable overrides shared between a running execution and its owner.
///
/// Values set here take precedence over the script's own variables and are
/// picked up at the start of the next run.
#[derive(Debug, Clone, Default)]
pub struct ScriptVariables {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl ScriptVariables {
    pub fn new(initial: HashMap<String, String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.write().insert(name.into(), value.into());
    }

    pub fn extend(&self, values: HashMap<String, String>) {
        self.inner.write().extend(values);
    }

    pub fn snapshot(&self) -> HashMap<String, String> {
        self.inner.read().clone()
    }

    /// Script variables overlaid with the current overrides
    pub fn resolve(&self, script: &Script) -> HashMap<String, String> {
        let mut merged = script.variables.clone();
        merged.extend(self.snapshot());
        merged
    }
}

/// Progress notifications emitted while a script executes
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    RunStarted {
        run_number: u64,
    },
    RetryScheduled {
        task: String,
        attempt: u32,
        error: String,
    },
    ActionFinished {
        run_number: u64,
        outcome: ActionOutcome,
    },
    RunFinished {
        run_number: u64,
        success: bool,
        complete: bool,
    },
}

impl ExecutionEvent {
    /// One-line rendering for task logs
    pub fn describe(&self) -> String {
        match self {
            ExecutionEvent::RunStarted { run_number } => format!("Run {} started", run_number),
            ExecutionEvent::RetryScheduled {
                task,
                attempt,
                error,
            } => format!("Retrying '{}' (attempt {}): {}", task, attempt, error),
            ExecutionEvent::ActionFinished { outcome, .. } if outcome.success => format!(
                "Completed '{}' (attempt {})",
                outcome.task, outcome.attempts
            ),
            ExecutionEvent::ActionFinished { outcome, .. } => format!(
                "Failed '{}' after {} attempt(s): {}",
                outcome.task,
                outcome.attempts,
                outcome.error.as_deref().unwrap_or("unknown error")
            ),
            ExecutionEvent::RunFinished {
                run_number,
                complete: false,
                ..
            } => format!("Run {} interrupted", run_number),
            ExecutionEvent::RunFinished {
                run_number,
                success,
                ..
            } => format!(
                "Run {} {}",
                run_number,
                if *success { "succeeded" } else { "failed" }
            ),
        }
    }
}

/// Receives [`ExecutionEvent`]s
pub trait ExecutionObserver: Send + Sync {
    fn on_event(&self, event: &ExecutionEvent);
}

impl<F> ExecutionObserver for F
where
    F: Fn(&ExecutionEvent) + Send + Sync,
{
    fn on_event(&self, event: &ExecutionEvent) {
        self(event)
    }
}

/// Observer that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ExecutionObserver for NoopObserver {
    fn on_event(&self, _event: &ExecutionEvent) {}
}

/// Drives runs of a translated script against an agent handle
#[derive(Debug, Clone)]
pub struct ScriptExecutor {
    options: ExecutionOptions,
    retry: RetryPolicy,
    strategy: FailureStrategy,
}

impl ScriptExecutor {
    pub fn new(options: ExecutionOptions) -> Self {
        let retry = RetryPolicy::new(options.max_retries, options.task_interval);
        let strategy = FailureStrategy::from_stop_on_error(options.stop_on_error);
        Self {
            options,
            retry,
            strategy,
        }
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    /// Execute `script` once, or repeatedly when periodic, until it finishes,
    /// fails under stop-on-error, or `cancel` fires.
    ///
    /// Only translation problems are returned as errors; run failures and
    /// cancellation are reported through [`ScriptExecution::status`] so the
    /// partial history is never lost.
    pub async fn execute_script(
        &self,
        script: &Script,
        variables: &ScriptVariables,
        agent: &dyn AgentHandle,
        cancel: &CancellationToken,
        observer: &dyn ExecutionObserver,
    ) -> Result<ScriptExecution, ExecutorError> {
        // Fail fast before anything reaches the agent.
        let mut pending = Some(translate_script(script, &variables.resolve(script))?);

        let mut execution = ScriptExecution::new(
            &script.name,
            self.options.periodic,
            self.options.period.as_secs_f64(),
        );
        info!(
            script = %script.name,
            periodic = self.options.periodic,
            "Starting script execution"
        );

        let mut run_number = 0u64;
        loop {
            if cancel.is_cancelled() {
                return Ok(execution.finish(ExecutionStatus::Cancelled, None));
            }
            run_number += 1;

            let instructions = match pending.take() {
                Some(instructions) => instructions,
                None => match translate_script(script, &variables.resolve(script)) {
                    Ok(instructions) => instructions,
                    Err(err) => {
                        return Ok(execution.finish(ExecutionStatus::Failed, Some(err.to_string())))
                    }
                },
            };

            let run = self
                .run_once(run_number, &instructions, agent, cancel, observer)
                .await;
            let complete = run.complete;
            let success = run.success;
            let run_error = run.error.clone();
            execution.record_run(run, self.options.max_run_history);

            if !complete {
                info!(script = %script.name, run_number, "Script execution cancelled");
                return Ok(execution.finish(ExecutionStatus::Cancelled, None));
            }

            if !success && (self.options.stop_on_error || !self.options.periodic) {
                let failure = ExecutorError::RunFailure {
                    run_number,
                    last_error: run_error.unwrap_or_else(|| "one or more actions failed".into()),
                };
                warn!(script = %script.name, "{}", failure);
                return Ok(execution.finish(ExecutionStatus::Failed, Some(failure.to_string())));
            }

            if !self.options.periodic {
                return Ok(execution.finish(ExecutionStatus::Completed, None));
            }

            debug!(
                run_number,
                period_ms = self.options.period.as_millis() as u64,
                "Waiting for next run"
            );
            if !pause(self.options.period, cancel).await {
                return Ok(execution.finish(ExecutionStatus::Cancelled, None));
            }
        }
    }

    /// Execute every instruction once in order, applying the retry policy per
    /// instruction and the failure strategy on exhaustion.
    pub async fn run_once(
        &self,
        run_number: u64,
        instructions: &[Instruction],
        agent: &dyn AgentHandle,
        cancel: &CancellationToken,
        observer: &dyn ExecutionObserver,
    ) -> RunRecord {
        let mut run = RunRecord::start(run_number);
        observer.on_event(&ExecutionEvent::RunStarted { run_number });
        debug!(run_number, actions = instructions.len(), "Run started");

        let run = 'run: {
            for instruction in instructions {
                if cancel.is_cancelled() {
                    break 'run run.interrupt();
                }

                let outcome = match self.run_action(instruction, agent, cancel, observer).await {
                    Ok(outcome) => outcome,
                    Err(ExecutorError::Cancelled) => break 'run run.interrupt(),
                    Err(err) => {
                        let attempts = match &err {
                            ExecutorError::ActionExecution { attempts, .. } => *attempts,
                            _ => 0,
                        };
                        run.error = Some(err.to_string());
                        ActionOutcome::failed(instruction, attempts, err.to_string())
                    }
                };

                let failed = !outcome.success;
                observer.on_event(&ExecutionEvent::ActionFinished {
                    run_number,
                    outcome: outcome.clone(),
                });
                run.results.push(outcome);

                if failed && self.strategy == FailureStrategy::Abort {
                    warn!(run_number, "Stopping run after failed action");
                    break 'run run.finish();
                }

                if !pause(self.options.task_interval, cancel).await {
                    break 'run run.interrupt();
                }
            }
            run.finish()
        };

        observer.on_event(&ExecutionEvent::RunFinished {
            run_number,
            success: run.success,
            complete: run.complete,
        });
        info!(
            run_number,
            success = run.success,
            complete = run.complete,
            "Run finished"
        );
        run
    }

    /// Dispatch one instruction with bounded retries.
    ///
    /// Returns [`ExecutorError::ActionExecution`] once every attempt failed and
    /// [`ExecutorError::Cancelled`] when cancellation is observed between attempts.
    pub async fn run_action(
        &self,
        instruction: &Instruction,
        agent: &dyn AgentHandle,
        cancel: &CancellationToken,
        observer: &dyn ExecutionObserver,
    ) -> Result<ActionOutcome, ExecutorError> {
        let mut attempt = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(ExecutorError::Cancelled);
            }
            debug!(attempt, "Dispatching: {}", instruction);

            let error = match self.dispatch(instruction, agent).await {
                Ok(result) => return Ok(ActionOutcome::succeeded(instruction, attempt, result)),
                Err(error) => error,
            };
            if cancel.is_cancelled() {
                return Err(ExecutorError::Cancelled);
            }

            match self.retry.decide(&instruction.text, attempt, &error) {
                FailureDecision::Retry {
                    attempt: next,
                    wait,
                } => {
                    observer.on_event(&ExecutionEvent::RetryScheduled {
                        task: instruction.text.clone(),
                        attempt: next,
                        error: error.to_string(),
                    });
                    if !pause(wait, cancel).await {
                        return Err(ExecutorError::Cancelled);
                    }
                    attempt = next;
                }
                FailureDecision::Exhausted { attempts } => {
                    return Err(ExecutorError::ActionExecution {
                        instruction: instruction.text.clone(),
                        attempts,
                        source: error,
                    })
                }
            }
        }
    }

    async fn dispatch(
        &self,
        instruction: &Instruction,
        agent: &dyn AgentHandle,
    ) -> Result<Value, AgentError> {
        match self.options.action_timeout {
            Some(limit) => match timeout(limit, agent.execute(instruction)).await {
                Ok(result) => result,
                Err(_) => Err(AgentError::Timeout(limit.as_millis() as u64)),
            },
            None => agent.execute(instruction).await,
        }
    }
}

impl Default for ScriptExecutor {
    fn default() -> Self {
        Self::new(ExecutionOptions::default())
    }
}

/// Translate `script` without executing it.
pub fn plan(script: &Script, variables: &ScriptVariables) -> Result<Vec<Instruction>, ScriptError> {
    translate_script(script, &variables.resolve(script))
}

/// Sleep for `duration` unless `cancel` fires first. Returns false on cancellation.
async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = sleep(duration) => true,
    }
}
