//! Core types for script execution

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use agent_bridge::Instruction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ScriptError;

/// Default timeout applied to validation checks
pub const DEFAULT_VALIDATION_TIMEOUT_MS: u64 = 5000;

/// Browser operation kind of an [`Action`]
///
/// Unknown kinds deserialize into [`ActionKind::Other`] so that they are
/// rejected at translation time rather than at parse time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionKind {
    Navigate,
    Click,
    Type,
    Wait,
    Scroll,
    Screenshot,
    Extract,
    Other(String),
}

impl ActionKind {
    pub fn as_str(&self) -> &str {
        match self {
            ActionKind::Navigate => "navigate",
            ActionKind::Click => "click",
            ActionKind::Type => "type",
            ActionKind::Wait => "wait",
            ActionKind::Scroll => "scroll",
            ActionKind::Screenshot => "screenshot",
            ActionKind::Extract => "extract",
            ActionKind::Other(other) => other,
        }
    }
}

impl From<String> for ActionKind {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "navigate" => ActionKind::Navigate,
            "click" => ActionKind::Click,
            "type" => ActionKind::Type,
            "wait" => ActionKind::Wait,
            "scroll" => ActionKind::Scroll,
            "screenshot" => ActionKind::Screenshot,
            "extract" => ActionKind::Extract,
            _ => ActionKind::Other(value),
        }
    }
}

impl From<ActionKind> for String {
    fn from(kind: ActionKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: i64,
    pub y: i64,
}

/// One browser operation
///
/// Only the fields relevant to `kind` are read by the translator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "action_type", alias = "kind")]
    pub kind: ActionKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,

    /// May contain `${name}` placeholders
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,

    /// Milliseconds, for `wait`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_time: Option<u64>,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            selector: None,
            value: None,
            url: None,
            coordinates: None,
            wait_time: None,
        }
    }

    pub fn navigate(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::new(ActionKind::Navigate)
        }
    }

    pub fn click(selector: impl Into<String>) -> Self {
        Self::new(ActionKind::Click).with_selector(selector)
    }

    pub fn type_text(selector: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::new(ActionKind::Type).with_selector(selector)
        }
    }

    pub fn wait(millis: u64) -> Self {
        Self {
            wait_time: Some(millis),
            ..Self::new(ActionKind::Wait)
        }
    }

    pub fn scroll(coordinates: Option<Coordinates>) -> Self {
        Self {
            coordinates,
            ..Self::new(ActionKind::Scroll)
        }
    }

    pub fn screenshot(selector: Option<String>) -> Self {
        Self {
            selector,
            ..Self::new(ActionKind::Screenshot)
        }
    }

    pub fn extract(selector: impl Into<String>) -> Self {
        Self::new(ActionKind::Extract).with_selector(selector)
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }
}

/// Post-condition kind of a [`Validation`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ValidationKind {
    ElementExists,
    TextContains,
    UrlChanged,
    Other(String),
}

impl ValidationKind {
    pub fn as_str(&self) -> &str {
        match self {
            ValidationKind::ElementExists => "element_exists",
            ValidationKind::TextContains => "text_contains",
            ValidationKind::UrlChanged => "url_changed",
            ValidationKind::Other(other) => other,
        }
    }
}

impl From<String> for ValidationKind {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "element_exists" => ValidationKind::ElementExists,
            "text_contains" => ValidationKind::TextContains,
            "url_changed" => ValidationKind::UrlChanged,
            _ => ValidationKind::Other(value),
        }
    }
}

impl From<ValidationKind> for String {
    fn from(kind: ValidationKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Step post-condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    #[serde(rename = "type", alias = "kind")]
    pub kind: ValidationKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_value: Option<String>,

    /// Milliseconds; [`DEFAULT_VALIDATION_TIMEOUT_MS`] when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl Validation {
    pub fn element_exists(selector: impl Into<String>) -> Self {
        Self {
            kind: ValidationKind::ElementExists,
            selector: Some(selector.into()),
            expected_value: None,
            timeout: None,
        }
    }

    pub fn text_contains(selector: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            kind: ValidationKind::TextContains,
            selector: Some(selector.into()),
            expected_value: Some(expected.into()),
            timeout: None,
        }
    }

    pub fn url_changed() -> Self {
        Self {
            kind: ValidationKind::UrlChanged,
            selector: None,
            expected_value: None,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout.unwrap_or(DEFAULT_VALIDATION_TIMEOUT_MS)
    }
}

/// Named group of ordered actions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub step_id: String,

    #[serde(default)]
    pub description: String,

    pub actions: Vec<Action>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<Validation>,
}

impl Step {
    pub fn new(step_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            description: description.into(),
            actions: Vec::new(),
            validation: None,
        }
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_validation(mut self, validation: Validation) -> Self {
        self.validation = Some(validation);
        self
    }
}

/// Automation script definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub steps: Vec<Step>,

    /// Substitution inputs only
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

impl Script {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            steps: Vec::new(),
            variables: HashMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Structural checks: a name, at least one step, unique step ids.
    pub fn validate(&self) -> Result<(), ScriptError> {
        if self.name.trim().is_empty() {
            return Err(ScriptError::InvalidScript("script name is empty".to_string()));
        }
        if self.steps.is_empty() {
            return Err(ScriptError::InvalidScript(format!(
                "script '{}' has no steps",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.step_id.as_str()) {
                return Err(ScriptError::DuplicateStep(step.step_id.clone()));
            }
        }
        Ok(())
    }

    pub fn action_count(&self) -> usize {
        self.steps.iter().map(|step| step.actions.len()).sum()
    }
}

/// Log entry for one dispatched instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub step_id: String,

    /// Natural-language rendering that was dispatched
    pub task: String,

    pub success: bool,

    /// Attempts made, including the successful one
    pub attempts: u32,

    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn succeeded(instruction: &Instruction, attempts: u32, result: Value) -> Self {
        Self {
            step_id: instruction.step_id.clone(),
            task: instruction.text.clone(),
            success: true,
            attempts,
            timestamp: Utc::now(),
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(instruction: &Instruction, attempts: u32, error: impl Into<String>) -> Self {
        Self {
            step_id: instruction.step_id.clone(),
            task: instruction.text.clone(),
            success: false,
            attempts,
            timestamp: Utc::now(),
            result: None,
            error: Some(error.into()),
        }
    }

    /// Screenshot path reported by the agent, if any
    pub fn screenshot(&self) -> Option<&str> {
        self.result.as_ref()?.get("screenshot")?.as_str()
    }
}

/// One execution attempt of a script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_number: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,

    /// False when the run was interrupted by cancellation
    pub complete: bool,

    pub results: Vec<ActionOutcome>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunRecord {
    pub fn start(run_number: u64) -> Self {
        let now = Utc::now();
        Self {
            run_number,
            started_at: now,
            finished_at: now,
            success: false,
            complete: false,
            results: Vec::new(),
            error: None,
        }
    }

    /// Close the run after every instruction was attempted or the run aborted
    pub fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self.complete = true;
        self.success = self.error.is_none() && self.results.iter().all(|r| r.success);
        self
    }

    /// Close the run after a cancellation was observed
    pub fn interrupt(mut self) -> Self {
        self.finished_at = Utc::now();
        self.complete = false;
        self.success = false;
        self
    }

    pub fn failed_actions(&self) -> usize {
        self.results.iter().filter(|r| !r.success).count()
    }
}

/// Final state of a script execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Aggregate over every run of one script execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptExecution {
    pub script_name: String,

    /// Most recent runs, oldest first
    pub runs: VecDeque<RunRecord>,

    pub is_periodic: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_secs: Option<f64>,

    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,

    /// Runs evicted from `runs` by the history cap
    pub dropped_runs: u64,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    pub status: ExecutionStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Paths reported by screenshot actions, in capture order
    #[serde(default)]
    pub screenshots: Vec<String>,
}

impl ScriptExecution {
    pub fn new(script_name: impl Into<String>, periodic: bool, period_secs: f64) -> Self {
        Self {
            script_name: script_name.into(),
            runs: VecDeque::new(),
            is_periodic: periodic,
            period_secs: periodic.then_some(period_secs),
            total_runs: 0,
            successful_runs: 0,
            failed_runs: 0,
            dropped_runs: 0,
            started_at: Utc::now(),
            finished_at: None,
            status: ExecutionStatus::Running,
            error: None,
            screenshots: Vec::new(),
        }
    }

    /// Append a run, counting it when complete and evicting the oldest run
    /// once `max_history` is exceeded.
    pub fn record_run(&mut self, run: RunRecord, max_history: usize) {
        self.screenshots.extend(
            run.results
                .iter()
                .filter_map(ActionOutcome::screenshot)
                .map(str::to_string),
        );
        if run.complete {
            self.total_runs += 1;
            if run.success {
                self.successful_runs += 1;
            } else {
                self.failed_runs += 1;
            }
        }
        self.runs.push_back(run);
        while self.runs.len() > max_history.max(1) {
            self.runs.pop_front();
            self.dropped_runs += 1;
        }
    }

    pub fn finish(mut self, status: ExecutionStatus, error: Option<String>) -> Self {
        self.status = status;
        self.error = error;
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn last_run(&self) -> Option<&RunRecord> {
        self.runs.back()
    }
}
