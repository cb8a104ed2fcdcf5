//! The automation-driver port.
//!
//! Executors drive a browser only through this capability set, so the
//! whole execution pipeline runs against either a live Chromium session
//! or the scripted [`MockDriver`] used throughout the tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::events::types::{Modifiers, MouseButton};
use crate::transform::steps::Selector;

/// Result type for driver operations
pub type DriverResult<T> = Result<T, DriverError>;

/// Error types for driver operations
#[derive(Debug)]
pub enum DriverError {
    /// No element matched the selector
    ElementNotFound(String),
    /// An operation exceeded its timeout
    Timeout { what: String, timeout_ms: u64 },
    /// Navigation failed
    Navigation { url: String, reason: String },
    /// Script evaluation failed
    Script(String),
    /// The browser session is gone
    Connection(String),
}

impl std::fmt::Display for DriverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverError::ElementNotFound(selector) => {
                write!(f, "No element matches selector '{}'", selector)
            }
            DriverError::Timeout { what, timeout_ms } => {
                write!(f, "Timed out after {}ms waiting for {}", timeout_ms, what)
            }
            DriverError::Navigation { url, reason } => {
                write!(f, "Navigation to '{}' failed: {}", url, reason)
            }
            DriverError::Script(msg) => write!(f, "Script error: {}", msg),
            DriverError::Connection(msg) => write!(f, "Browser connection lost: {}", msg),
        }
    }
}

impl std::error::Error for DriverError {}

impl DriverError {
    /// Connection loss is fatal for a run; everything else is a
    /// per-step failure.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DriverError::Connection(_))
    }
}

/// The automation capability set consumed by step executors.
///
/// Selectors are resolved against the live session at call time; no
/// capture-time DOM reference survives into playback.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn navigate(&self, url: &str) -> DriverResult<()>;

    /// Wait until the selector resolves to at least one element.
    async fn wait_for_selector(&self, selector: &Selector, timeout_ms: u64) -> DriverResult<()>;

    async fn click(
        &self,
        selector: &Selector,
        button: MouseButton,
        click_count: u8,
    ) -> DriverResult<()>;

    /// Focus the element and replace its value with `text`.
    async fn type_text(&self, selector: &Selector, text: &str) -> DriverResult<()>;

    async fn press_key(&self, key: &str, modifiers: Modifiers) -> DriverResult<()>;

    /// Scroll the element (or the window when `selector` is `None`).
    async fn scroll(&self, selector: Option<&Selector>, x: f64, y: f64) -> DriverResult<()>;

    async fn select_option(&self, selector: &Selector, value: &str) -> DriverResult<()>;

    /// PNG screenshot of the current viewport.
    async fn screenshot(&self) -> DriverResult<Vec<u8>>;

    /// Evaluate a script in the page and return its JSON value.
    async fn evaluate(&self, script: &str) -> DriverResult<serde_json::Value>;
}

/// Scripted in-memory driver for tests.
///
/// Records every capability call in order, resolves selectors against a
/// configured set of "present" elements, and can be told to fail
/// specific selectors, scripts or screenshots.
#[derive(Debug, Default)]
pub struct MockDriver {
    calls: Mutex<Vec<String>>,
    missing_selectors: Mutex<Vec<String>>,
    eval_results: Mutex<HashMap<String, serde_json::Value>>,
    fail_screenshot: Mutex<bool>,
    fail_navigation: Mutex<Option<String>>,
    disconnected: Mutex<bool>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `wait_for_selector` (and everything after it) fail for a
    /// selector value.
    pub fn missing(self, selector: &str) -> Self {
        self.missing_selectors
            .lock()
            .expect("mock lock")
            .push(selector.to_string());
        self
    }

    /// Canned result for an evaluated script (matched by substring).
    pub fn eval_result(self, script_fragment: &str, value: serde_json::Value) -> Self {
        self.eval_results
            .lock()
            .expect("mock lock")
            .insert(script_fragment.to_string(), value);
        self
    }

    pub fn failing_screenshot(self) -> Self {
        *self.fail_screenshot.lock().expect("mock lock") = true;
        self
    }

    pub fn failing_navigation(self, reason: &str) -> Self {
        *self.fail_navigation.lock().expect("mock lock") = Some(reason.to_string());
        self
    }

    /// Every subsequent call fails with a connection error.
    pub fn disconnected(self) -> Self {
        *self.disconnected.lock().expect("mock lock") = true;
        self
    }

    /// Ordered log of capability calls.
    pub fn call_log(&self) -> Vec<String> {
        self.calls.lock().expect("mock lock").clone()
    }

    fn record(&self, call: String) -> DriverResult<()> {
        if *self.disconnected.lock().expect("mock lock") {
            return Err(DriverError::Connection("mock disconnected".to_string()));
        }
        self.calls.lock().expect("mock lock").push(call);
        Ok(())
    }

    fn check_selector(&self, selector: &Selector) -> DriverResult<()> {
        let missing = self.missing_selectors.lock().expect("mock lock");
        if missing.iter().any(|m| m == &selector.value) {
            return Err(DriverError::ElementNotFound(selector.value.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn navigate(&self, url: &str) -> DriverResult<()> {
        self.record(format!("navigate {}", url))?;
        if let Some(reason) = self.fail_navigation.lock().expect("mock lock").clone() {
            return Err(DriverError::Navigation {
                url: url.to_string(),
                reason,
            });
        }
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &Selector, timeout_ms: u64) -> DriverResult<()> {
        self.record(format!("wait {}", selector.value))?;
        self.check_selector(selector).map_err(|_| DriverError::Timeout {
            what: format!("selector '{}'", selector.value),
            timeout_ms,
        })
    }

    async fn click(
        &self,
        selector: &Selector,
        button: MouseButton,
        click_count: u8,
    ) -> DriverResult<()> {
        self.record(format!(
            "click {} {:?} x{}",
            selector.value, button, click_count
        ))?;
        self.check_selector(selector)
    }

    async fn type_text(&self, selector: &Selector, text: &str) -> DriverResult<()> {
        self.record(format!("type {} {}", selector.value, text))?;
        self.check_selector(selector)
    }

    async fn press_key(&self, key: &str, modifiers: Modifiers) -> DriverResult<()> {
        let mut chord = String::new();
        if modifiers.ctrl {
            chord.push_str("ctrl+");
        }
        if modifiers.meta {
            chord.push_str("meta+");
        }
        if modifiers.alt {
            chord.push_str("alt+");
        }
        if modifiers.shift {
            chord.push_str("shift+");
        }
        self.record(format!("press {}{}", chord, key))
    }

    async fn scroll(&self, selector: Option<&Selector>, x: f64, y: f64) -> DriverResult<()> {
        let target = selector.map(|s| s.value.clone()).unwrap_or_else(|| "window".to_string());
        self.record(format!("scroll {} {} {}", target, x, y))
    }

    async fn select_option(&self, selector: &Selector, value: &str) -> DriverResult<()> {
        self.record(format!("select {} {}", selector.value, value))?;
        self.check_selector(selector)
    }

    async fn screenshot(&self) -> DriverResult<Vec<u8>> {
        self.record("screenshot".to_string())?;
        if *self.fail_screenshot.lock().expect("mock lock") {
            return Err(DriverError::Script("screenshot unavailable".to_string()));
        }
        // Minimal PNG header so artifact files look plausible.
        Ok(vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A])
    }

    async fn evaluate(&self, script: &str) -> DriverResult<serde_json::Value> {
        self.record(format!("evaluate {}", script))?;
        let results = self.eval_results.lock().expect("mock lock");
        for (fragment, value) in results.iter() {
            if script.contains(fragment.as_str()) {
                return Ok(value.clone());
            }
        }
        Ok(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::steps::SelectorStrategy;

    fn css(value: &str) -> Selector {
        Selector::new(SelectorStrategy::Css, value)
    }

    #[tokio::test]
    async fn test_mock_records_calls_in_order() {
        let driver = MockDriver::new();
        driver.navigate("https://app.example/").await.unwrap();
        driver
            .click(&css("#go"), MouseButton::Left, 1)
            .await
            .unwrap();
        let log = driver.call_log();
        assert_eq!(log[0], "navigate https://app.example/");
        assert!(log[1].starts_with("click #go"));
    }

    #[tokio::test]
    async fn test_missing_selector_times_out_wait() {
        let driver = MockDriver::new().missing("#ghost");
        let err = driver.wait_for_selector(&css("#ghost"), 500).await.unwrap_err();
        assert!(matches!(err, DriverError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_disconnected_is_fatal() {
        let driver = MockDriver::new().disconnected();
        let err = driver.navigate("https://x/").await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_eval_results_matched_by_fragment() {
        let driver =
            MockDriver::new().eval_result("document.title", serde_json::json!("My App"));
        let value = driver.evaluate("document.title").await.unwrap();
        assert_eq!(value, serde_json::json!("My App"));
        let other = driver.evaluate("1 + 1").await.unwrap();
        assert!(other.is_null());
    }
}
