//! Task lifecycle management for BrowserPilot
//!
//! [`TaskManager`] hands out task ids, keeps the authoritative status of every
//! task in a [`TaskRegistry`], and runs each submission in its own cancellable
//! execution context bound to a lazily created agent.

pub mod errors;
pub mod manager;
pub mod model;
pub mod registry;

pub use errors::TaskCenterError;
pub use manager::TaskManager;
pub use model::{
    AgentStatus, Task, TaskConfig, TaskEvent, TaskManagerConfig, TaskRequest,
};
pub use registry::TaskRegistry;
