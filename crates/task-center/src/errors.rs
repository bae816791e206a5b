use action_flow::ScriptError;
use agent_bridge::AgentError;
use browserpilot_core_types::TaskId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskCenterError {
    #[error("task {0} is already registered")]
    AlreadyRegistered(TaskId),
    #[error("task {0} not found")]
    NotFound(TaskId),
    #[error("task {0} is not running")]
    NotRunning(TaskId),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error("task manager is shutting down")]
    ShuttingDown,
}

impl TaskCenterError {
    /// Errors caused by the submitted request rather than the system
    pub fn is_caller_error(&self) -> bool {
        match self {
            TaskCenterError::InvalidRequest(_) | TaskCenterError::Script(_) => true,
            TaskCenterError::Agent(err) => err.is_caller_error(),
            _ => false,
        }
    }
}
