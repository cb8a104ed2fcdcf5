//! Network-call relevance filtering and assertion synthesis.
//!
//! Two phases. Relevance keeps the calls whose completion falls inside
//! the idle window and whose URL is not infrastructure noise.
//! Qualification keeps state-changing calls and error responses, ranks
//! them, and emits capped `assertApi` steps.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::api::calls::CapturedApiCall;
use crate::config;
use crate::transform::steps::{ApiExpectation, ApiMatch, Step, StepAction};

/// Methods that change server state and always qualify.
const STATE_CHANGING_METHODS: &[&str] = &["POST", "PUT", "PATCH", "DELETE"];

/// URLs that never become assertions: analytics and tracking beacons,
/// dev-server HMR traffic, static assets, auth refreshes.
static EXCLUDED_URL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)google-analytics|googletagmanager|segment\.(io|com)|mixpanel|hotjar|sentry|amplitude|datadoghq",
        r"(?i)/(track|beacon|telemetry|collect)(/|\?|$)",
        r"(?i)hot-update|__vite|/@vite|sockjs-node|webpack[-_]hmr",
        r"(?i)\.(js|mjs|css|map|png|jpe?g|gif|svg|webp|ico|woff2?|ttf|eot)(\?|$)",
        r"(?i)/(token/refresh|refresh[-_]token|auth/refresh)(/|\?|$)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("exclude pattern is valid"))
    .collect()
});

/// Configuration for assertion synthesis.
#[derive(Debug, Clone)]
pub struct AssertionConfig {
    /// Cap on emitted assertion steps per idle window.
    pub max_assertions: usize,
}

impl Default for AssertionConfig {
    fn default() -> Self {
        Self {
            max_assertions: config::DEFAULT_MAX_API_ASSERTIONS,
        }
    }
}

/// Phase one: calls completed inside the idle window, noise excluded,
/// deduplicated by URL with the first occurrence winning.
pub fn relevant_api_calls(
    calls: &[CapturedApiCall],
    last_event_timestamp: i64,
    idle_detected_at: i64,
) -> Vec<CapturedApiCall> {
    let mut seen_urls: Vec<&str> = Vec::new();
    let mut relevant = Vec::new();

    for call in calls {
        // Pending or errored exchanges have nothing to assert on.
        let Some(completion) = call.completion_timestamp() else {
            continue;
        };
        // Both bounds inclusive.
        if completion < last_event_timestamp || completion > idle_detected_at {
            continue;
        }
        if is_excluded_url(&call.request.url) {
            continue;
        }
        if seen_urls.contains(&call.request.url.as_str()) {
            continue;
        }
        seen_urls.push(&call.request.url);
        relevant.push(call.clone());
    }
    relevant
}

/// Phase two: qualify, rank and emit capped `assertApi` steps.
///
/// A call qualifies when its method changes state (priority 0) or its
/// status is 4xx/5xx regardless of method (priority 1). Successful
/// reads are noise. Ties preserve input order.
pub fn generate_api_assertions(calls: &[CapturedApiCall], config: &AssertionConfig) -> Vec<Step> {
    let mut qualified: Vec<(u8, &CapturedApiCall)> = Vec::new();

    for call in calls {
        let Some(response) = &call.response else {
            continue;
        };
        let method = call.request.method.to_ascii_uppercase();
        if STATE_CHANGING_METHODS.contains(&method.as_str()) {
            qualified.push((0, call));
        } else if response.status >= 400 {
            qualified.push((1, call));
        }
    }

    // Stable: same-priority entries keep original input order.
    qualified.sort_by_key(|(priority, _)| *priority);
    qualified.truncate(config.max_assertions);

    qualified
        .into_iter()
        .map(|(_, call)| {
            let status = call
                .response
                .as_ref()
                .map(|r| r.status)
                .unwrap_or_default();
            let method = call.request.method.to_ascii_uppercase();
            let url = path_and_query(&call.request.url);
            let description = format!("Auto: {} {} → {}", method, url, status);
            Step::new(StepAction::AssertApi {
                matcher: ApiMatch { url, method },
                expect: ApiExpectation { status },
                wait_for: true,
            })
            .with_description(description)
        })
        .collect()
}

/// Relevance then qualification in one pass over an idle window.
pub fn assertions_for_idle_window(
    calls: &[CapturedApiCall],
    last_event_timestamp: i64,
    idle_detected_at: i64,
    config: &AssertionConfig,
) -> Vec<Step> {
    let relevant = relevant_api_calls(calls, last_event_timestamp, idle_detected_at);
    generate_api_assertions(&relevant, config)
}

fn is_excluded_url(url: &str) -> bool {
    EXCLUDED_URL_PATTERNS.iter().any(|p| p.is_match(url))
}

/// Pathname plus search string; hash and origin dropped.
pub fn path_and_query(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(url) => {
            let mut out = url.path().to_string();
            if let Some(query) = url.query() {
                out.push('?');
                out.push_str(query);
            }
            out
        }
        Err(_) => raw.split('#').next().unwrap_or(raw).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn call(url: &str, method: &str, ts: i64, status: u16, rt: i64) -> CapturedApiCall {
        CapturedApiCall::completed(url, method, ts, status, rt)
    }

    #[test]
    fn test_window_bounds_inclusive() {
        let calls = vec![
            call("https://api.example/a", "GET", 1_000, 200, 0), // exactly lower bound
            call("https://api.example/b", "GET", 2_000, 200, 0), // exactly upper bound
            call("https://api.example/c", "GET", 999, 200, 0),   // 1ms early
            call("https://api.example/d", "GET", 2_001, 200, 0), // 1ms late
        ];
        let relevant = relevant_api_calls(&calls, 1_000, 2_000);
        let urls: Vec<&str> = relevant.iter().map(|c| c.request.url.as_str()).collect();
        assert_eq!(urls, vec!["https://api.example/a", "https://api.example/b"]);
    }

    #[test]
    fn test_completion_uses_response_time() {
        // Request before the window whose response lands inside it.
        let calls = vec![call("https://api.example/slow", "GET", 500, 200, 700)];
        assert_eq!(relevant_api_calls(&calls, 1_000, 2_000).len(), 1);
    }

    #[test]
    fn test_pending_and_errored_excluded() {
        let mut failed = CapturedApiCall::pending("https://api.example/x", "POST", 1_100);
        failed.pending = false;
        failed.error = Some("reset".to_string());
        let calls = vec![
            CapturedApiCall::pending("https://api.example/p", "GET", 1_100),
            failed,
        ];
        assert!(relevant_api_calls(&calls, 1_000, 2_000).is_empty());
    }

    #[test]
    fn test_noise_urls_excluded() {
        let noisy = [
            "https://www.google-analytics.com/g/collect?v=2",
            "https://app.example/assets/main.css",
            "https://app.example/bundle.js?v=3",
            "http://localhost:5173/@vite/client",
            "https://app.example/main.abc123.hot-update.json",
            "https://auth.example/token/refresh",
        ];
        for url in noisy {
            let calls = vec![call(url, "GET", 1_100, 200, 0)];
            assert!(
                relevant_api_calls(&calls, 1_000, 2_000).is_empty(),
                "{} should be excluded",
                url
            );
        }
        let fine = vec![call("https://app.example/api/items", "GET", 1_100, 404, 0)];
        assert_eq!(relevant_api_calls(&fine, 1_000, 2_000).len(), 1);
    }

    #[test]
    fn test_dedup_first_occurrence_wins() {
        let calls = vec![
            call("https://api.example/a", "GET", 1_100, 500, 0),
            call("https://api.example/a", "GET", 1_200, 200, 0),
        ];
        let relevant = relevant_api_calls(&calls, 1_000, 2_000);
        assert_eq!(relevant.len(), 1);
        assert_eq!(relevant[0].response.as_ref().unwrap().status, 500);
    }

    #[test]
    fn test_qualification_priority_and_cap() {
        let calls = vec![
            call("https://api.example/orders", "POST", 0, 201, 0),
            call("https://api.example/items", "GET", 0, 200, 0),
            call("https://api.example/missing", "GET", 0, 404, 0),
        ];

        let capped = generate_api_assertions(&calls, &AssertionConfig { max_assertions: 2 });
        assert_eq!(capped.len(), 2);
        match &capped[0].action {
            StepAction::AssertApi { matcher, expect, wait_for } => {
                assert_eq!(matcher.method, "POST");
                assert_eq!(matcher.url, "/orders");
                assert_eq!(expect.status, 201);
                assert!(wait_for);
            }
            other => panic!("expected assertApi, got {:?}", other),
        }
        match &capped[1].action {
            StepAction::AssertApi { matcher, expect, .. } => {
                assert_eq!(matcher.method, "GET");
                assert_eq!(expect.status, 404);
            }
            other => panic!("expected assertApi, got {:?}", other),
        }

        // Raising the cap does not invent more: the 200 GET stays noise.
        let wide = generate_api_assertions(&calls, &AssertionConfig { max_assertions: 5 });
        assert_eq!(wide.len(), 2);
    }

    #[test]
    fn test_same_priority_preserves_input_order() {
        let calls = vec![
            call("https://api.example/b", "PUT", 0, 204, 0),
            call("https://api.example/a", "POST", 0, 201, 0),
            call("https://api.example/x", "GET", 0, 500, 0),
            call("https://api.example/y", "GET", 0, 404, 0),
        ];
        let steps = generate_api_assertions(&calls, &AssertionConfig { max_assertions: 5 });
        let urls: Vec<String> = steps
            .iter()
            .map(|s| match &s.action {
                StepAction::AssertApi { matcher, .. } => matcher.url.clone(),
                other => panic!("expected assertApi, got {:?}", other),
            })
            .collect();
        assert_eq!(urls, vec!["/b", "/a", "/x", "/y"]);
    }

    #[test]
    fn test_error_status_qualifies_state_changing_once() {
        // A failed POST is priority 0, not double-counted.
        let calls = vec![call("https://api.example/a", "POST", 0, 500, 0)];
        let steps = generate_api_assertions(&calls, &AssertionConfig::default());
        assert_eq!(steps.len(), 1);
    }

    #[test]
    fn test_description_format() {
        let calls = vec![call("https://api.example/orders?draft=1", "post", 0, 201, 0)];
        let steps = generate_api_assertions(&calls, &AssertionConfig::default());
        assert_eq!(
            steps[0].description.as_deref(),
            Some("Auto: POST /orders?draft=1 → 201")
        );
    }

    #[test]
    fn test_end_to_end_window() {
        let calls = vec![
            call("https://api.example/orders", "POST", 1_100, 201, 50),
            call("https://www.google-analytics.com/collect", "POST", 1_100, 204, 10),
            call("https://api.example/items", "GET", 1_200, 200, 20),
        ];
        let steps =
            assertions_for_idle_window(&calls, 1_000, 3_000, &AssertionConfig::default());
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].kind_name(), "assertApi");
    }
}
