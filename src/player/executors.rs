//! One executor per step kind.
//!
//! Executors return errors on failure (element not found, timeout,
//! assertion mismatch); whether that skips, continues, pauses or stops
//! the run is the player's job, never theirs. Selectors are re-resolved
//! against the live session at execution time.

use std::time::Duration;
use tracing::debug;

use crate::api::assertions::path_and_query;
use crate::player::context::{substitute, ExecContext};
use crate::player::driver::{Driver, DriverError};
use crate::transform::steps::{ApiExpectation, ApiMatch, Selector, Step, StepAction};

/// Poll interval for wait loops (API observation, element absence).
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Result type for step execution
pub type ExecResult = Result<(), ExecError>;

/// Error types for step execution
#[derive(Debug)]
pub enum ExecError {
    /// A driver capability failed
    Driver(DriverError),
    /// An assertion did not hold
    Assertion(String),
    /// Writing an artifact failed
    Artifact(std::io::Error),
}

impl std::fmt::Display for ExecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecError::Driver(err) => write!(f, "{}", err),
            ExecError::Assertion(msg) => write!(f, "Assertion failed: {}", msg),
            ExecError::Artifact(err) => write!(f, "Artifact error: {}", err),
        }
    }
}

impl std::error::Error for ExecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExecError::Driver(err) => Some(err),
            ExecError::Assertion(_) => None,
            ExecError::Artifact(err) => Some(err),
        }
    }
}

impl From<DriverError> for ExecError {
    fn from(err: DriverError) -> Self {
        ExecError::Driver(err)
    }
}

impl ExecError {
    /// True when the underlying cause is a lost browser session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExecError::Driver(err) if err.is_fatal())
    }
}

/// Dispatch one step to its executor.
pub async fn execute_step<D: Driver>(step: &Step, ctx: &ExecContext<'_, D>) -> ExecResult {
    debug!(kind = step.kind_name(), id = %step.id, "executing step");
    match &step.action {
        StepAction::Navigate { url } => execute_navigate(url, ctx).await,
        StepAction::Click {
            selector,
            button,
            click_count,
            ..
        } => {
            ctx.driver
                .wait_for_selector(selector, ctx.options.step_timeout_ms)
                .await?;
            ctx.driver.click(selector, *button, *click_count).await?;
            Ok(())
        }
        StepAction::Type {
            selector, value, ..
        } => {
            ctx.driver
                .wait_for_selector(selector, ctx.options.step_timeout_ms)
                .await?;
            let value = substitute(value, ctx.variables);
            ctx.driver.type_text(selector, &value).await?;
            Ok(())
        }
        StepAction::Keypress {
            key,
            modifiers,
            selector,
        } => {
            if let Some(selector) = selector {
                ctx.driver
                    .wait_for_selector(selector, ctx.options.step_timeout_ms)
                    .await?;
            }
            ctx.driver.press_key(key, *modifiers).await?;
            Ok(())
        }
        StepAction::Wait { ms } => {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
            Ok(())
        }
        StepAction::Hover { selector } => execute_hover(selector, ctx).await,
        StepAction::Scroll { x, y, selector } => {
            ctx.driver
                .scroll(selector.as_ref(), x.unwrap_or(0.0), y.unwrap_or(0.0))
                .await?;
            Ok(())
        }
        StepAction::Select { selector, value } => {
            ctx.driver
                .wait_for_selector(selector, ctx.options.step_timeout_ms)
                .await?;
            let value = substitute(value, ctx.variables);
            ctx.driver.select_option(selector, &value).await?;
            Ok(())
        }
        StepAction::AssertApi {
            matcher,
            expect,
            wait_for,
        } => execute_assert_api(matcher, expect, *wait_for, ctx).await,
        StepAction::AssertElement {
            selector,
            exists,
            text,
        } => execute_assert_element(selector, *exists, text.as_deref(), ctx).await,
        StepAction::SnapshotDom { selector } => execute_snapshot_dom(step, selector.as_ref(), ctx).await,
    }
}

async fn execute_navigate<D: Driver>(url: &str, ctx: &ExecContext<'_, D>) -> ExecResult {
    let url = ctx.options.resolve_url(&substitute(url, ctx.variables));
    ctx.driver.navigate(&url).await?;
    Ok(())
}

/// Hover is composed from `evaluate`: the capability set has no pointer
/// primitive, so the executor dispatches the events the page would see.
async fn execute_hover<D: Driver>(selector: &Selector, ctx: &ExecContext<'_, D>) -> ExecResult {
    ctx.driver
        .wait_for_selector(selector, ctx.options.step_timeout_ms)
        .await?;
    let script = format!(
        r#"(() => {{
            const el = {lookup};
            if (!el) return false;
            for (const type of ['pointerover', 'mouseover', 'mouseenter']) {{
                el.dispatchEvent(new MouseEvent(type, {{ bubbles: true }}));
            }}
            return true;
        }})()"#,
        lookup = element_lookup_js(selector)
    );
    let hovered = ctx.driver.evaluate(&script).await?;
    if hovered.as_bool() != Some(true) {
        return Err(ExecError::Driver(DriverError::ElementNotFound(
            selector.value.clone(),
        )));
    }
    Ok(())
}

async fn execute_assert_api<D: Driver>(
    matcher: &ApiMatch,
    expect: &ApiExpectation,
    wait_for: bool,
    ctx: &ExecContext<'_, D>,
) -> ExecResult {
    let deadline = tokio::time::Instant::now()
        + Duration::from_millis(if wait_for { ctx.options.api_wait_timeout_ms } else { 0 });

    loop {
        let matched = ctx
            .api_log
            .lock()
            .ok()
            .and_then(|log| {
                log.snapshot().into_iter().rev().find(|call| {
                    call.response.is_some()
                        && call.request.method.eq_ignore_ascii_case(&matcher.method)
                        && path_and_query(&call.request.url) == matcher.url
                })
            });

        if let Some(call) = matched {
            let status = call.response.as_ref().map(|r| r.status).unwrap_or_default();
            if status == expect.status {
                return Ok(());
            }
            return Err(ExecError::Assertion(format!(
                "{} {} returned {}, expected {}",
                matcher.method, matcher.url, status, expect.status
            )));
        }

        if tokio::time::Instant::now() >= deadline {
            return Err(ExecError::Assertion(format!(
                "no call observed for {} {}",
                matcher.method, matcher.url
            )));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn execute_assert_element<D: Driver>(
    selector: &Selector,
    exists: bool,
    text: Option<&str>,
    ctx: &ExecContext<'_, D>,
) -> ExecResult {
    if exists {
        ctx.driver
            .wait_for_selector(selector, ctx.options.step_timeout_ms)
            .await?;
        if let Some(expected) = text {
            let script = format!(
                "(() => {{ const el = {lookup}; return el ? el.textContent : null; }})()",
                lookup = element_lookup_js(selector)
            );
            let actual = ctx.driver.evaluate(&script).await?;
            let actual = actual.as_str().unwrap_or_default().to_string();
            // Recorded text is a trimmed fragment; containment is the
            // stable comparison.
            if !actual.contains(expected) {
                return Err(ExecError::Assertion(format!(
                    "element '{}' text {:?} does not contain {:?}",
                    selector.value, actual, expected
                )));
            }
        }
        return Ok(());
    }

    // Absence: poll within the step budget until no element matches.
    let deadline =
        tokio::time::Instant::now() + Duration::from_millis(ctx.options.step_timeout_ms);
    loop {
        let script = format!(
            "(() => {{ const el = {lookup}; return el === null; }})()",
            lookup = element_lookup_js(selector)
        );
        let absent = ctx.driver.evaluate(&script).await?;
        if absent.as_bool() == Some(true) {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(ExecError::Assertion(format!(
                "element '{}' still present",
                selector.value
            )));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn execute_snapshot_dom<D: Driver>(
    step: &Step,
    selector: Option<&Selector>,
    ctx: &ExecContext<'_, D>,
) -> ExecResult {
    let script = match selector {
        Some(selector) => format!(
            "(() => {{ const el = {lookup}; return el ? el.outerHTML : null; }})()",
            lookup = element_lookup_js(selector)
        ),
        None => "document.documentElement.outerHTML".to_string(),
    };
    let html = ctx.driver.evaluate(&script).await?;
    let Some(html) = html.as_str() else {
        return Err(ExecError::Assertion(
            "DOM snapshot target not found".to_string(),
        ));
    };

    if let Some(dir) = &ctx.options.artifact_dir {
        std::fs::create_dir_all(dir).map_err(ExecError::Artifact)?;
        let path = dir.join(format!("snapshot_{}.html", step.id));
        std::fs::write(&path, html).map_err(ExecError::Artifact)?;
        debug!(path = %path.display(), "DOM snapshot written");
    }
    Ok(())
}

/// JavaScript expression resolving a selector to an element or null.
///
/// XPath values (leading `//`) go through `document.evaluate`; anything
/// else through `querySelector`. Values are JSON-encoded so arbitrary
/// recorded selectors cannot break out of the script.
pub(crate) fn element_lookup_js(selector: &Selector) -> String {
    let encoded = serde_json::to_string(&selector.value).unwrap_or_else(|_| "\"\"".to_string());
    if selector.is_xpath() {
        format!(
            "document.evaluate({encoded}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue"
        )
    } else {
        format!("document.querySelector({encoded})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::calls::{shared_api_log, CapturedApiCall};
    use crate::player::context::PlayerOptions;
    use crate::player::driver::MockDriver;
    use crate::transform::steps::SelectorStrategy;
    use std::collections::HashMap;

    fn css(value: &str) -> Selector {
        Selector::new(SelectorStrategy::Css, value)
    }

    fn options() -> PlayerOptions {
        PlayerOptions {
            api_wait_timeout_ms: 0,
            base_url: None,
            ..PlayerOptions::default()
        }
    }

    async fn run(step: Step, driver: &MockDriver, options: &PlayerOptions) -> ExecResult {
        let variables = HashMap::new();
        let api_log = shared_api_log();
        let ctx = ExecContext {
            driver,
            options,
            variables: &variables,
            api_log: &api_log,
        };
        execute_step(&step, &ctx).await
    }

    #[tokio::test]
    async fn test_click_waits_then_clicks() {
        let driver = MockDriver::new();
        let step = Step::new(StepAction::Click {
            selector: css("#go"),
            button: Default::default(),
            click_count: 1,
            modifiers: Default::default(),
        });
        run(step, &driver, &options()).await.unwrap();
        let log = driver.call_log();
        assert_eq!(log[0], "wait #go");
        assert!(log[1].starts_with("click #go"));
    }

    #[tokio::test]
    async fn test_type_substitutes_variables() {
        let driver = MockDriver::new();
        let mut variables = HashMap::new();
        variables.insert("user".to_string(), "ada".to_string());
        let api_log = shared_api_log();
        let opts = options();
        let ctx = ExecContext {
            driver: &driver,
            options: &opts,
            variables: &variables,
            api_log: &api_log,
        };
        let step = Step::new(StepAction::Type {
            selector: css("#email"),
            value: "{{user}}@example.com".to_string(),
            sensitive: false,
        });
        execute_step(&step, &ctx).await.unwrap();
        assert!(driver
            .call_log()
            .contains(&"type #email ada@example.com".to_string()));
    }

    #[tokio::test]
    async fn test_navigate_joins_base_url() {
        let driver = MockDriver::new();
        let opts = PlayerOptions {
            base_url: Some("https://staging.example".to_string()),
            ..options()
        };
        let step = Step::new(StepAction::Navigate {
            url: "/items?page=2".to_string(),
        });
        run(step, &driver, &opts).await.unwrap();
        assert_eq!(
            driver.call_log()[0],
            "navigate https://staging.example/items?page=2"
        );
    }

    #[tokio::test]
    async fn test_missing_element_is_an_error() {
        let driver = MockDriver::new().missing("#ghost");
        let step = Step::new(StepAction::Click {
            selector: css("#ghost"),
            button: Default::default(),
            click_count: 1,
            modifiers: Default::default(),
        });
        let err = run(step, &driver, &options()).await.unwrap_err();
        assert!(matches!(err, ExecError::Driver(DriverError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_assert_api_pass_and_mismatch() {
        let driver = MockDriver::new();
        let api_log = shared_api_log();
        api_log.lock().unwrap().record(CapturedApiCall::completed(
            "https://api.example/orders?draft=1",
            "POST",
            0,
            201,
            10,
        ));
        let variables = HashMap::new();
        let opts = options();
        let ctx = ExecContext {
            driver: &driver,
            options: &opts,
            variables: &variables,
            api_log: &api_log,
        };

        let pass = Step::new(StepAction::AssertApi {
            matcher: ApiMatch {
                url: "/orders?draft=1".to_string(),
                method: "POST".to_string(),
            },
            expect: ApiExpectation { status: 201 },
            wait_for: false,
        });
        execute_step(&pass, &ctx).await.unwrap();

        let mismatch = Step::new(StepAction::AssertApi {
            matcher: ApiMatch {
                url: "/orders?draft=1".to_string(),
                method: "POST".to_string(),
            },
            expect: ApiExpectation { status: 200 },
            wait_for: false,
        });
        let err = execute_step(&mismatch, &ctx).await.unwrap_err();
        assert!(matches!(err, ExecError::Assertion(_)));

        let absent = Step::new(StepAction::AssertApi {
            matcher: ApiMatch {
                url: "/missing".to_string(),
                method: "GET".to_string(),
            },
            expect: ApiExpectation { status: 200 },
            wait_for: false,
        });
        let err = execute_step(&absent, &ctx).await.unwrap_err();
        assert!(matches!(err, ExecError::Assertion(_)));
    }

    #[tokio::test]
    async fn test_assert_element_text_containment() {
        let driver = MockDriver::new().eval_result("textContent", serde_json::json!("  Saved! "));
        let step = Step::new(StepAction::AssertElement {
            selector: css("[data-testid=\"toast\"]"),
            exists: true,
            text: Some("Saved".to_string()),
        });
        run(step, &driver, &options()).await.unwrap();

        let driver = MockDriver::new().eval_result("textContent", serde_json::json!("Error"));
        let step = Step::new(StepAction::AssertElement {
            selector: css("[data-testid=\"toast\"]"),
            exists: true,
            text: Some("Saved".to_string()),
        });
        let err = run(step, &driver, &options()).await.unwrap_err();
        assert!(matches!(err, ExecError::Assertion(_)));
    }

    #[tokio::test]
    async fn test_hover_dispatches_events() {
        let driver = MockDriver::new().eval_result("dispatchEvent", serde_json::json!(true));
        let step = Step::new(StepAction::Hover {
            selector: css("#menu"),
        });
        run(step, &driver, &options()).await.unwrap();
        let log = driver.call_log();
        assert_eq!(log[0], "wait #menu");
        assert!(log[1].contains("mouseover"));
    }

    #[tokio::test]
    async fn test_snapshot_dom_writes_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let driver =
            MockDriver::new().eval_result("outerHTML", serde_json::json!("<html></html>"));
        let opts = PlayerOptions {
            artifact_dir: Some(dir.path().to_path_buf()),
            ..options()
        };
        let step = Step::new(StepAction::SnapshotDom { selector: None });
        let id = step.id.clone();
        run(step, &driver, &opts).await.unwrap();
        let path = dir.path().join(format!("snapshot_{}.html", id));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "<html></html>");
    }

    #[test]
    fn test_element_lookup_js_escapes_and_routes() {
        let css_lookup = element_lookup_js(&css("a\"b"));
        assert!(css_lookup.starts_with("document.querySelector("));
        assert!(css_lookup.contains("\\\""));

        let xpath = Selector::new(SelectorStrategy::Xpath, "//button[1]");
        assert!(element_lookup_js(&xpath).starts_with("document.evaluate("));
    }
}
