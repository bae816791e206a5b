//! Collaborator interfaces consumed by the BrowserPilot task engine
//!
//! This crate defines the narrow seams between task execution and the outside
//! world:
//! - [`AgentHandle`] / [`AgentFactory`]: per-task automation agents
//! - [`BrowserHandle`] / [`BrowserAgent`]: raw browser sessions without an AI agent
//! - [`LlmProvider`] / [`LlmConfig`]: language-model selection by model name

pub mod browser;
pub mod errors;
pub mod handle;
pub mod instruction;
pub mod llm;

pub use browser::*;
pub use errors::*;
pub use handle::*;
pub use instruction::*;
pub use llm::*;
