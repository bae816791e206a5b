//! Script execution layer
//!
//! This module turns automation scripts into agent instructions and drives
//! them through an agent handle with per-action retry, optional fail-fast,
//! inter-action pacing, periodic repetition and cooperative cancellation.

pub mod errors;
pub mod executor;
pub mod strategies;
pub mod translate;
pub mod types;

pub use errors::{ExecutorError, ScriptError};
pub use executor::{
    plan, ExecutionEvent, ExecutionObserver, ExecutionOptions, NoopObserver, ScriptExecutor,
    ScriptVariables,
};
pub use strategies::{FailureDecision, FailureStrategy, RetryPolicy};
pub use translate::{
    substitute, translate, translate_script, translate_step, translate_validation,
    DEFAULT_WAIT_MS,
};
pub use types::{
    Action, ActionKind, ActionOutcome, Coordinates, ExecutionStatus, RunRecord, Script,
    ScriptExecution, Step, Validation, ValidationKind, DEFAULT_VALIDATION_TIMEOUT_MS,
};
