//! Instructions handed to agent handles
//!
//! An [`Instruction`] pairs a natural-language rendering (for AI agents) with a
//! structured [`BrowserOp`] (for raw browser sessions). Both views describe the
//! same operation; handles pick whichever they understand.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured browser operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BrowserOp {
    Navigate {
        url: String,
    },
    Click {
        selector: String,
    },
    Type {
        selector: String,
        text: String,
    },
    Wait {
        duration_ms: u64,
    },
    /// Scroll to coordinates, or to the bottom of the page when none are given
    Scroll {
        coordinates: Option<(i64, i64)>,
    },
    /// Capture the element matching `selector`, or the whole page
    Screenshot {
        selector: Option<String>,
    },
    Extract {
        selector: String,
    },
    ElementExists {
        selector: String,
        timeout_ms: u64,
    },
    TextContains {
        selector: String,
        expected: String,
        timeout_ms: u64,
    },
    UrlChanged {
        timeout_ms: u64,
    },
    /// Free-form goal for an AI agent
    Task {
        goal: String,
        max_steps: u32,
    },
}

impl BrowserOp {
    /// Post-condition checks rather than actions
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BrowserOp::ElementExists { .. }
                | BrowserOp::TextContains { .. }
                | BrowserOp::UrlChanged { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            BrowserOp::Navigate { .. } => "navigate",
            BrowserOp::Click { .. } => "click",
            BrowserOp::Type { .. } => "type",
            BrowserOp::Wait { .. } => "wait",
            BrowserOp::Scroll { .. } => "scroll",
            BrowserOp::Screenshot { .. } => "screenshot",
            BrowserOp::Extract { .. } => "extract",
            BrowserOp::ElementExists { .. } => "element_exists",
            BrowserOp::TextContains { .. } => "text_contains",
            BrowserOp::UrlChanged { .. } => "url_changed",
            BrowserOp::Task { .. } => "task",
        }
    }
}

/// A single unit of work for an agent handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// Step the instruction belongs to (empty for free-form tasks)
    pub step_id: String,

    /// Natural-language rendering
    pub text: String,

    /// Structured operation
    pub op: BrowserOp,
}

impl Instruction {
    pub fn new(step_id: impl Into<String>, text: impl Into<String>, op: BrowserOp) -> Self {
        Self {
            step_id: step_id.into(),
            text: text.into(),
            op,
        }
    }

    /// Wrap a natural-language task for an AI agent
    pub fn free_form(goal: impl Into<String>, max_steps: u32) -> Self {
        let goal = goal.into();
        Self {
            step_id: String::new(),
            text: goal.clone(),
            op: BrowserOp::Task { goal, max_steps },
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_ops_are_flagged() {
        assert!(BrowserOp::UrlChanged { timeout_ms: 10 }.is_validation());
        assert!(!BrowserOp::Click {
            selector: "#go".into()
        }
        .is_validation());
    }

    #[test]
    fn free_form_instruction_carries_goal() {
        let instruction = Instruction::free_form("find the cheapest flight", 12);
        assert_eq!(instruction.text, "find the cheapest flight");
        assert_eq!(instruction.op.name(), "task");
        assert!(instruction.step_id.is_empty());
    }
}
