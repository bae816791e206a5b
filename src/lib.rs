//! BrowserPilot library
//!
//! Process-level pieces shared by the binary and integration tests.

pub mod config;
pub mod dry_run;
pub mod errors;

pub use config::ApiConfig;
pub use dry_run::{DryRunAgent, DryRunFactory};
pub use errors::ConfigError;
