//! Live [`Driver`] implementation over a headless Chromium session.
//!
//! Element interaction prefers native CDP input (find + click/type).
//! Operations CDP has no primitive for (modified clicks, XPath
//! targets, option selection) fall back to dispatching the equivalent
//! events from an evaluated script.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::events::types::{Modifiers, MouseButton};
use crate::player::driver::{Driver, DriverError, DriverResult};
use crate::player::executors::element_lookup_js;
use crate::transform::steps::{Selector, Viewport};

/// Poll interval for selector and readiness waits.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Launch options for a playback browser.
#[derive(Debug, Clone)]
pub struct ChromiumLaunchConfig {
    pub headless: bool,
    pub viewport: Viewport,
}

impl Default for ChromiumLaunchConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport: Viewport {
                width: crate::config::DEFAULT_VIEWPORT_WIDTH,
                height: crate::config::DEFAULT_VIEWPORT_HEIGHT,
            },
        }
    }
}

/// A Chromium-backed automation driver.
pub struct ChromiumDriver {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
}

impl ChromiumDriver {
    /// Launch a browser process and open a blank page.
    pub async fn launch(config: ChromiumLaunchConfig) -> DriverResult<Self> {
        let mut builder = BrowserConfig::builder()
            .window_size(config.viewport.width, config.viewport.height);
        if !config.headless {
            builder = builder.with_head();
        }
        let browser_config = builder
            .build()
            .map_err(DriverError::Connection)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| DriverError::Connection(e.to_string()))?;

        // The handler stream must be polled for the browser to make
        // progress at all.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "browser handler event error");
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| DriverError::Connection(e.to_string()))?;

        Ok(Self {
            browser,
            page,
            handler_task,
        })
    }

    /// The underlying page, for hosts layering extra CDP listeners.
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Close the browser and stop the handler task.
    pub async fn close(mut self) -> DriverResult<()> {
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "browser close failed");
        }
        self.handler_task.abort();
        Ok(())
    }

    async fn eval(&self, script: &str) -> DriverResult<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| DriverError::Script(e.to_string()))?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    /// Poll until a script yields `true`, within `timeout_ms`.
    async fn wait_until(&self, script: &str, what: &str, timeout_ms: u64) -> DriverResult<()> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            match self.eval(script).await {
                Ok(value) if value.as_bool() == Some(true) => return Ok(()),
                // Transient script failures (mid-navigation) keep polling.
                Ok(_) | Err(DriverError::Script(_)) => {}
                Err(err) => return Err(err),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DriverError::Timeout {
                    what: what.to_string(),
                    timeout_ms,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Dispatch pointer events from script, for the cases native input
    /// cannot express (XPath targets, non-left buttons, double clicks).
    async fn scripted_click(
        &self,
        selector: &Selector,
        button: MouseButton,
        click_count: u8,
    ) -> DriverResult<()> {
        let button_code = match button {
            MouseButton::Left => 0,
            MouseButton::Middle => 1,
            MouseButton::Right => 2,
        };
        let script = format!(
            r#"(() => {{
                const el = {lookup};
                if (!el) return false;
                const opts = {{ bubbles: true, cancelable: true, button: {button_code} }};
                el.dispatchEvent(new MouseEvent('mousedown', opts));
                el.dispatchEvent(new MouseEvent('mouseup', opts));
                el.dispatchEvent(new MouseEvent('click', opts));
                if ({click_count} > 1) el.dispatchEvent(new MouseEvent('dblclick', opts));
                return true;
            }})()"#,
            lookup = element_lookup_js(selector),
        );
        let clicked = self.eval(&script).await?;
        if clicked.as_bool() != Some(true) {
            return Err(DriverError::ElementNotFound(selector.value.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl Driver for ChromiumDriver {
    async fn navigate(&self, url: &str) -> DriverResult<()> {
        self.page
            .goto(url)
            .await
            .map_err(|e| DriverError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        self.wait_until(
            "document.readyState === 'complete'",
            "document ready",
            crate::config::step_timeout_ms(),
        )
        .await
    }

    async fn wait_for_selector(&self, selector: &Selector, timeout_ms: u64) -> DriverResult<()> {
        let script = format!("!!({})", element_lookup_js(selector));
        self.wait_until(
            &script,
            &format!("selector '{}'", selector.value),
            timeout_ms,
        )
        .await
    }

    async fn click(
        &self,
        selector: &Selector,
        button: MouseButton,
        click_count: u8,
    ) -> DriverResult<()> {
        let plain_left = button == MouseButton::Left && click_count == 1;
        if plain_left && !selector.is_xpath() {
            let element = self
                .page
                .find_element(selector.value.as_str())
                .await
                .map_err(|_| DriverError::ElementNotFound(selector.value.clone()))?;
            element
                .click()
                .await
                .map_err(|e| DriverError::Script(e.to_string()))?;
            return Ok(());
        }
        self.scripted_click(selector, button, click_count).await
    }

    async fn type_text(&self, selector: &Selector, text: &str) -> DriverResult<()> {
        if selector.is_xpath() {
            // XPath target: set the value and fire the framework events.
            let script = format!(
                r#"(() => {{
                    const el = {lookup};
                    if (!el) return false;
                    el.focus();
                    el.value = {value};
                    el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                    el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                    return true;
                }})()"#,
                lookup = element_lookup_js(selector),
                value = serde_json::to_string(text)
                    .map_err(|e| DriverError::Script(e.to_string()))?,
            );
            let typed = self.eval(&script).await?;
            if typed.as_bool() != Some(true) {
                return Err(DriverError::ElementNotFound(selector.value.clone()));
            }
            return Ok(());
        }

        let element = self
            .page
            .find_element(selector.value.as_str())
            .await
            .map_err(|_| DriverError::ElementNotFound(selector.value.clone()))?;
        element
            .focus()
            .await
            .map_err(|e| DriverError::Script(e.to_string()))?;
        // Clear any previous value so typing replaces rather than appends.
        let clear = format!(
            "(() => {{ const el = {lookup}; if (el) el.value = ''; }})()",
            lookup = element_lookup_js(selector)
        );
        self.eval(&clear).await?;
        element
            .type_str(text)
            .await
            .map_err(|e| DriverError::Script(e.to_string()))?;
        Ok(())
    }

    async fn press_key(&self, key: &str, modifiers: Modifiers) -> DriverResult<()> {
        let script = format!(
            r#"(() => {{
                const target = document.activeElement || document.body;
                const opts = {{
                    key: {key},
                    bubbles: true,
                    cancelable: true,
                    ctrlKey: {ctrl},
                    altKey: {alt},
                    shiftKey: {shift},
                    metaKey: {meta}
                }};
                target.dispatchEvent(new KeyboardEvent('keydown', opts));
                target.dispatchEvent(new KeyboardEvent('keyup', opts));
                return true;
            }})()"#,
            key = serde_json::to_string(key).map_err(|e| DriverError::Script(e.to_string()))?,
            ctrl = modifiers.ctrl,
            alt = modifiers.alt,
            shift = modifiers.shift,
            meta = modifiers.meta,
        );
        self.eval(&script).await?;
        Ok(())
    }

    async fn scroll(&self, selector: Option<&Selector>, x: f64, y: f64) -> DriverResult<()> {
        let script = match selector {
            Some(selector) => format!(
                r#"(() => {{
                    const el = {lookup};
                    if (!el) return false;
                    el.scrollTo({x}, {y});
                    return true;
                }})()"#,
                lookup = element_lookup_js(selector),
            ),
            None => format!("(() => {{ window.scrollTo({x}, {y}); return true; }})()"),
        };
        let scrolled = self.eval(&script).await?;
        if scrolled.as_bool() != Some(true) {
            if let Some(selector) = selector {
                return Err(DriverError::ElementNotFound(selector.value.clone()));
            }
        }
        Ok(())
    }

    async fn select_option(&self, selector: &Selector, value: &str) -> DriverResult<()> {
        let script = format!(
            r#"(() => {{
                const el = {lookup};
                if (!el) return false;
                el.value = {value};
                el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return true;
            }})()"#,
            lookup = element_lookup_js(selector),
            value = serde_json::to_string(value).map_err(|e| DriverError::Script(e.to_string()))?,
        );
        let selected = self.eval(&script).await?;
        if selected.as_bool() != Some(true) {
            return Err(DriverError::ElementNotFound(selector.value.clone()));
        }
        Ok(())
    }

    async fn screenshot(&self) -> DriverResult<Vec<u8>> {
        self.page
            .screenshot(ScreenshotParams::default())
            .await
            .map_err(|e| DriverError::Script(e.to_string()))
    }

    async fn evaluate(&self, script: &str) -> DriverResult<serde_json::Value> {
        self.eval(script).await
    }
}
