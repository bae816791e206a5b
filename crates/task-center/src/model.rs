use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::time::Duration;

use action_flow::Script;
use agent_bridge::ApiKey;
use browserpilot_core_types::{TaskId, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Read-only snapshot of a task
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub description: String,
    pub status: TaskStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub logs: Vec<String>,
}

#[derive(Debug)]
pub(crate) struct TaskRecord {
    pub task_id: TaskId,
    pub description: String,
    pub status: TaskStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub logs: VecDeque<String>,
    pub log_capacity: usize,
}

impl TaskRecord {
    pub fn new(task_id: TaskId, description: String, log_capacity: usize) -> Self {
        Self {
            task_id,
            description,
            status: TaskStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            result: None,
            error: None,
            logs: VecDeque::new(),
            log_capacity: log_capacity.max(1),
        }
    }

    pub fn push_log(&mut self, message: &str) -> String {
        let line = format!("{}: {}", Utc::now().to_rfc3339(), message);
        if self.logs.len() == self.log_capacity {
            self.logs.pop_front();
        }
        self.logs.push_back(line.clone());
        line
    }

    pub fn snapshot(&self) -> Task {
        Task {
            task_id: self.task_id.clone(),
            description: self.description.clone(),
            status: self.status,
            start_time: self.start_time,
            end_time: self.end_time,
            result: self.result.clone(),
            error: self.error.clone(),
            logs: self.logs.iter().cloned().collect(),
        }
    }
}

/// Change notifications published by the task registry
#[derive(Clone, Debug, PartialEq)]
pub enum TaskEvent {
    Registered { task_id: TaskId },
    StatusChanged { task_id: TaskId, status: TaskStatus },
    Log { task_id: TaskId, line: String },
    /// The task's execution context ended and its agent was released
    ContextClosed { task_id: TaskId },
}

impl TaskEvent {
    pub fn task_id(&self) -> &TaskId {
        match self {
            TaskEvent::Registered { task_id }
            | TaskEvent::StatusChanged { task_id, .. }
            | TaskEvent::Log { task_id, .. }
            | TaskEvent::ContextClosed { task_id } => task_id,
        }
    }
}

/// Whether a live agent handle is bound to a task
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Stopped,
}

/// Per-task overrides; unset fields fall back to [`TaskManagerConfig`]
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<ApiKey>,
    pub headless: Option<bool>,
    pub max_steps: Option<u32>,
    pub record_video: bool,
    pub debug_mode: bool,
    pub max_retries: Option<u32>,
    pub stop_on_error: Option<bool>,
    pub periodic: bool,
    pub period_secs: Option<f64>,
    pub task_interval_ms: Option<u64>,
    pub variables: HashMap<String, String>,
    pub screenshot_dir: Option<PathBuf>,
}

impl TaskConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(ApiKey::new(key));
        self
    }

    pub fn with_periodic(mut self, period_secs: f64) -> Self {
        self.periodic = true;
        self.period_secs = Some(period_secs);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_stop_on_error(mut self, stop_on_error: bool) -> Self {
        self.stop_on_error = Some(stop_on_error);
        self
    }

    pub fn with_task_interval_ms(mut self, interval_ms: u64) -> Self {
        self.task_interval_ms = Some(interval_ms);
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_screenshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.screenshot_dir = Some(dir.into());
        self
    }
}

/// A submission: free-form goal or structured script
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Natural-language goal, or a description when a script is supplied
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<Script>,
    #[serde(default)]
    pub config: TaskConfig,
}

impl TaskRequest {
    pub fn free_form(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            script: None,
            config: TaskConfig::default(),
        }
    }

    pub fn script(script: Script) -> Self {
        let task = if script.description.is_empty() {
            script.name.clone()
        } else {
            format!("{}: {}", script.name, script.description)
        };
        Self {
            task,
            script: Some(script),
            config: TaskConfig::default(),
        }
    }

    pub fn with_config(mut self, config: TaskConfig) -> Self {
        self.config = config;
        self
    }
}

#[derive(Clone, Debug)]
pub struct TaskManagerConfig {
    pub default_model: String,
    pub max_concurrent_tasks: usize,
    /// Reject submissions whose model has no API key; when false the agent
    /// is created without language-model settings instead
    pub require_api_key: bool,
    pub headless: bool,
    pub max_steps: u32,
    pub task_interval: Duration,
    pub max_retries: u32,
    pub period: Duration,
    pub stop_on_error: bool,
    pub max_run_history: usize,
    pub max_log_entries: usize,
    pub screenshot_dir: PathBuf,
    pub action_timeout: Option<Duration>,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            default_model: "gpt-4o".to_string(),
            max_concurrent_tasks: 10,
            require_api_key: true,
            headless: true,
            max_steps: 10,
            task_interval: Duration::from_millis(500),
            max_retries: 3,
            period: Duration::from_secs(60),
            stop_on_error: true,
            max_run_history: 100,
            max_log_entries: 1000,
            screenshot_dir: PathBuf::from("screenshots"),
            action_timeout: None,
        }
    }
}
