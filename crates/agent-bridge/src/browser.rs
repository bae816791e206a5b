//! Raw browser sessions driven without an AI agent
//!
//! [`BrowserAgent`] adapts any [`BrowserHandle`] into an [`AgentHandle`] by
//! executing the structured [`BrowserOp`] of each instruction directly.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::errors::AgentError;
use crate::handle::AgentHandle;
use crate::instruction::{BrowserOp, Instruction};

/// Concrete browser driver session
#[async_trait]
pub trait BrowserHandle: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), AgentError>;

    async fn click(&self, selector: &str) -> Result<(), AgentError>;

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), AgentError>;

    async fn scroll(&self, x: i64, y: i64) -> Result<(), AgentError>;

    async fn scroll_to_bottom(&self) -> Result<(), AgentError> {
        self.scroll(0, i64::MAX).await
    }

    /// Capture the page and return the path actually written
    async fn screenshot(&self, path: &Path) -> Result<PathBuf, AgentError>;

    async fn screenshot_element(
        &self,
        selector: &str,
        path: &Path,
    ) -> Result<PathBuf, AgentError> {
        let _ = selector;
        self.screenshot(path).await
    }

    async fn element_exists(&self, selector: &str) -> Result<bool, AgentError>;

    async fn get_current_url(&self) -> Result<String, AgentError>;

    async fn text_visible(&self, text: &str) -> Result<bool, AgentError>;

    async fn extract_text(&self, selector: &str) -> Result<String, AgentError> {
        Err(AgentError::InvalidInstruction(format!(
            "text extraction not supported for {}",
            selector
        )))
    }

    async fn close(&self) -> Result<(), AgentError> {
        Ok(())
    }
}

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Executes instructions against a browser session without a language model
pub struct BrowserAgent<B> {
    browser: B,
    screenshot_dir: PathBuf,
    poll_interval: Duration,
    screenshot_seq: AtomicU64,
    /// URL observed before the most recent page-affecting action
    baseline_url: Mutex<Option<String>>,
}

impl<B: BrowserHandle> BrowserAgent<B> {
    pub fn new(browser: B, screenshot_dir: impl Into<PathBuf>) -> Self {
        Self {
            browser,
            screenshot_dir: screenshot_dir.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            screenshot_seq: AtomicU64::new(0),
            baseline_url: Mutex::new(None),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn browser(&self) -> &B {
        &self.browser
    }

    async fn remember_url(&self) {
        match self.browser.get_current_url().await {
            Ok(url) => *self.baseline_url.lock() = Some(url),
            Err(err) => debug!("could not read current url: {}", err),
        }
    }

    fn next_screenshot_path(&self, selector: Option<&str>) -> PathBuf {
        let seq = self.screenshot_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let label = selector.map(sanitize_label).unwrap_or_else(|| "page".to_string());
        self.screenshot_dir.join(format!("{}_{}.png", label, seq))
    }

    /// Poll `check` until it reports true or `timeout_ms` elapses.
    async fn poll_until<F, Fut>(&self, timeout_ms: u64, mut check: F) -> Result<(), AgentError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<bool, AgentError>>,
    {
        let deadline = far_deadline(Duration::from_millis(timeout_ms));
        loop {
            if check().await? {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(AgentError::Timeout(timeout_ms));
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn text_contains(&self, selector: &str, expected: &str) -> Result<bool, AgentError> {
        match self.browser.extract_text(selector).await {
            Ok(text) => Ok(text.contains(expected)),
            Err(AgentError::InvalidInstruction(_)) => self.browser.text_visible(expected).await,
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl<B: BrowserHandle> AgentHandle for BrowserAgent<B> {
    async fn execute(&self, instruction: &Instruction) -> Result<Value, AgentError> {
        debug!(op = instruction.op.name(), "browser agent executing: {}", instruction);
        match &instruction.op {
            BrowserOp::Navigate { url } => {
                self.remember_url().await;
                self.browser.navigate(url).await?;
                Ok(json!({ "url": url }))
            }
            BrowserOp::Click { selector } => {
                self.remember_url().await;
                self.browser.click(selector).await?;
                Ok(json!({ "clicked": selector }))
            }
            BrowserOp::Type { selector, text } => {
                self.remember_url().await;
                self.browser.type_text(selector, text).await?;
                Ok(json!({ "typed": selector }))
            }
            BrowserOp::Wait { duration_ms } => {
                tokio::time::sleep(Duration::from_millis(*duration_ms)).await;
                Ok(json!({ "waited_ms": duration_ms }))
            }
            BrowserOp::Scroll { coordinates } => {
                self.remember_url().await;
                match coordinates {
                    Some((x, y)) => self.browser.scroll(*x, *y).await?,
                    None => self.browser.scroll_to_bottom().await?,
                }
                Ok(json!({ "scrolled": coordinates }))
            }
            BrowserOp::Screenshot { selector } => {
                tokio::fs::create_dir_all(&self.screenshot_dir).await?;
                let path = self.next_screenshot_path(selector.as_deref());
                let written = match selector {
                    Some(selector) => self.browser.screenshot_element(selector, &path).await?,
                    None => self.browser.screenshot(&path).await?,
                };
                Ok(json!({ "screenshot": written.to_string_lossy() }))
            }
            BrowserOp::Extract { selector } => {
                let text = self.browser.extract_text(selector).await?;
                Ok(json!({ "text": text }))
            }
            BrowserOp::ElementExists {
                selector,
                timeout_ms,
            } => {
                self.poll_until(*timeout_ms, || self.browser.element_exists(selector))
                    .await
                    .map_err(|err| match err {
                        AgentError::Timeout(_) => AgentError::ElementNotFound(selector.clone()),
                        other => other,
                    })?;
                Ok(json!({ "element_exists": selector }))
            }
            BrowserOp::TextContains {
                selector,
                expected,
                timeout_ms,
            } => {
                self.poll_until(*timeout_ms, || self.text_contains(selector, expected))
                    .await?;
                Ok(json!({ "text_contains": expected }))
            }
            BrowserOp::UrlChanged { timeout_ms } => {
                let baseline = self.baseline_url.lock().clone();
                let Some(baseline) = baseline else {
                    warn!("url_changed check without a prior page action");
                    return Err(AgentError::InvalidInstruction(
                        "no baseline url recorded before url_changed".to_string(),
                    ));
                };
                self.poll_until(*timeout_ms, || {
                    let baseline = baseline.clone();
                    async move { Ok(self.browser.get_current_url().await? != baseline) }
                })
                .await?;
                let current = self.browser.get_current_url().await?;
                Ok(json!({ "url": current }))
            }
            BrowserOp::Task { .. } => Err(AgentError::InvalidInstruction(
                "free-form tasks need an AI agent".to_string(),
            )),
        }
    }

    async fn close(&self) -> Result<(), AgentError> {
        self.browser.close().await
    }
}

// Roughly 30 years, the same horizon tokio uses for a "never" deadline.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn far_deadline(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

fn sanitize_label(selector: &str) -> String {
    let label: String = selector
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let trimmed = label.trim_matches('_');
    if trimmed.is_empty() {
        "element".to_string()
    } else {
        trimmed.to_string()
    }
}
