//! Action translation
//!
//! Maps script actions and validations onto [`Instruction`]s. Every instruction
//! carries both the natural-language text an AI agent expects and the
//! structured [`BrowserOp`] a raw browser session can execute.

use std::collections::HashMap;

use agent_bridge::{BrowserOp, Instruction};

use crate::errors::ScriptError;
use crate::types::{Action, ActionKind, Script, Step, Validation, ValidationKind};

/// Applied when a `wait` action has no `wait_time`
pub const DEFAULT_WAIT_MS: u64 = 1000;

/// Replace every `${name}` in `value` with `variables[name]`.
///
/// Unknown names are left verbatim. Substituted text is not rescanned.
pub fn substitute(value: &str, variables: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match variables.get(name) {
                    Some(replacement) => out.push_str(replacement),
                    None => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn required<'a>(
    step_id: &str,
    kind: &str,
    field: &'static str,
    value: Option<&'a String>,
) -> Result<&'a str, ScriptError> {
    value
        .map(String::as_str)
        .ok_or_else(|| ScriptError::MissingField {
            step_id: step_id.to_string(),
            kind: kind.to_string(),
            field,
        })
}

/// Translate one action of step `step_id`, substituting variables into `value`.
pub fn translate(
    step_id: &str,
    action: &Action,
    variables: &HashMap<String, String>,
) -> Result<Instruction, ScriptError> {
    let kind = action.kind.as_str();
    let selector = || required(step_id, kind, "selector", action.selector.as_ref());

    let (text, op) = match &action.kind {
        ActionKind::Navigate => {
            let url = required(step_id, kind, "url", action.url.as_ref())?;
            (
                format!("Navigate to {}", url),
                BrowserOp::Navigate {
                    url: url.to_string(),
                },
            )
        }
        ActionKind::Click => {
            let selector = selector()?;
            (
                format!("Click on element matching selector: {}", selector),
                BrowserOp::Click {
                    selector: selector.to_string(),
                },
            )
        }
        ActionKind::Type => {
            let selector = selector()?;
            let value = required(step_id, kind, "value", action.value.as_ref())?;
            let value = substitute(value, variables);
            (
                format!(
                    "Type '{}' into element matching selector: {}",
                    value, selector
                ),
                BrowserOp::Type {
                    selector: selector.to_string(),
                    text: value,
                },
            )
        }
        ActionKind::Wait => {
            let duration_ms = action.wait_time.unwrap_or(DEFAULT_WAIT_MS);
            (
                format!("Wait for {} milliseconds", duration_ms),
                BrowserOp::Wait { duration_ms },
            )
        }
        ActionKind::Scroll => match action.coordinates {
            Some(point) => (
                format!("Scroll to coordinates x:{}, y:{}", point.x, point.y),
                BrowserOp::Scroll {
                    coordinates: Some((point.x, point.y)),
                },
            ),
            None => (
                "Scroll to bottom of page".to_string(),
                BrowserOp::Scroll { coordinates: None },
            ),
        },
        ActionKind::Screenshot => match action.selector.as_deref() {
            Some(selector) => (
                format!("Take screenshot of element matching selector: {}", selector),
                BrowserOp::Screenshot {
                    selector: Some(selector.to_string()),
                },
            ),
            None => (
                "Take screenshot of the page".to_string(),
                BrowserOp::Screenshot { selector: None },
            ),
        },
        ActionKind::Extract => {
            let selector = selector()?;
            (
                format!("Extract text from element matching selector: {}", selector),
                BrowserOp::Extract {
                    selector: selector.to_string(),
                },
            )
        }
        ActionKind::Other(other) => return Err(ScriptError::UnsupportedAction(other.clone())),
    };

    Ok(Instruction::new(step_id, text, op))
}

/// Translate a step's post-condition into a check instruction.
pub fn translate_validation(
    step_id: &str,
    validation: &Validation,
) -> Result<Instruction, ScriptError> {
    let kind = validation.kind.as_str();
    let timeout_ms = validation.timeout_ms();

    let (text, op) = match &validation.kind {
        ValidationKind::ElementExists => {
            let selector = required(step_id, kind, "selector", validation.selector.as_ref())?;
            (
                format!(
                    "Wait for element matching selector: {} (timeout: {}ms)",
                    selector, timeout_ms
                ),
                BrowserOp::ElementExists {
                    selector: selector.to_string(),
                    timeout_ms,
                },
            )
        }
        ValidationKind::TextContains => {
            let selector = required(step_id, kind, "selector", validation.selector.as_ref())?;
            let expected = required(
                step_id,
                kind,
                "expected_value",
                validation.expected_value.as_ref(),
            )?;
            (
                format!(
                    "Verify text in {} contains '{}' (timeout: {}ms)",
                    selector, expected, timeout_ms
                ),
                BrowserOp::TextContains {
                    selector: selector.to_string(),
                    expected: expected.to_string(),
                    timeout_ms,
                },
            )
        }
        ValidationKind::UrlChanged => (
            format!("Wait for URL to change (timeout: {}ms)", timeout_ms),
            BrowserOp::UrlChanged { timeout_ms },
        ),
        ValidationKind::Other(other) => {
            return Err(ScriptError::UnsupportedValidation(other.clone()))
        }
    };

    Ok(Instruction::new(step_id, text, op))
}

/// Translate one step: its actions in order, then its validation.
///
/// The validation is emitted once per step, after the last action, rather
/// than after every action.
pub fn translate_step(
    step: &Step,
    variables: &HashMap<String, String>,
) -> Result<Vec<Instruction>, ScriptError> {
    let mut instructions = step
        .actions
        .iter()
        .map(|action| translate(&step.step_id, action, variables))
        .collect::<Result<Vec<_>, _>>()?;
    if let Some(validation) = &step.validation {
        instructions.push(translate_validation(&step.step_id, validation)?);
    }
    Ok(instructions)
}

/// Translate a whole script in document order. Fails on the first
/// untranslatable action without producing any instruction.
pub fn translate_script(
    script: &Script,
    variables: &HashMap<String, String>,
) -> Result<Vec<Instruction>, ScriptError> {
    script.validate()?;
    let mut instructions = Vec::with_capacity(script.action_count() + script.steps.len());
    for step in &script.steps {
        instructions.extend(translate_step(step, variables)?);
    }
    Ok(instructions)
}
