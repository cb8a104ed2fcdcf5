//! Execution context handed to step executors.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::api::calls::SharedApiLog;
use crate::config;
use crate::player::driver::Driver;

/// Resolved playback options.
#[derive(Debug, Clone)]
pub struct PlayerOptions {
    /// Per-step driver timeout (ms).
    pub step_timeout_ms: u64,
    /// Wait budget for `assertApi` steps with `waitFor` (ms).
    pub api_wait_timeout_ms: u64,
    /// Base URL joined with recorded relative paths.
    pub base_url: Option<String>,
    /// Keep executing after a non-optional failure.
    pub continue_on_failure: bool,
    /// Pause instead of stopping on a non-optional failure.
    pub pause_on_failure: bool,
    /// Best-effort screenshot on any step failure.
    pub screenshot_on_failure: bool,
    /// Where failure screenshots and DOM snapshots land.
    pub artifact_dir: Option<PathBuf>,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        let cfg = config::get();
        Self {
            step_timeout_ms: cfg.playback.step_timeout_ms,
            api_wait_timeout_ms: config::DEFAULT_API_WAIT_TIMEOUT_MS,
            base_url: cfg.playback.base_url.clone(),
            continue_on_failure: false,
            pause_on_failure: false,
            screenshot_on_failure: false,
            artifact_dir: None,
        }
    }
}

impl PlayerOptions {
    /// Join a recorded path with the configured base URL.
    ///
    /// Absolute URLs pass through; without a base URL the recorded
    /// value is used as-is and the driver decides whether it resolves.
    pub fn resolve_url(&self, recorded: &str) -> String {
        if recorded.starts_with("http://") || recorded.starts_with("https://") {
            return recorded.to_string();
        }
        match &self.base_url {
            Some(base) => format!(
                "{}/{}",
                base.trim_end_matches('/'),
                recorded.trim_start_matches('/')
            ),
            None => recorded.to_string(),
        }
    }
}

/// Everything an executor needs: the driver handle, resolved options,
/// the variable-substitution map, and the API-call observer.
pub struct ExecContext<'a, D: Driver> {
    pub driver: &'a D,
    pub options: &'a PlayerOptions,
    pub variables: &'a HashMap<String, String>,
    pub api_log: &'a SharedApiLog,
}

/// Replace `{{name}}` placeholders from the variable map. Unknown
/// placeholders are left untouched.
pub fn substitute(template: &str, variables: &HashMap<String, String>) -> String {
    let mut out = template.to_string();
    for (name, value) in variables {
        out = out.replace(&format!("{{{{{}}}}}", name), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_substitute() {
        let mut vars = HashMap::new();
        vars.insert("user".to_string(), "ada".to_string());
        vars.insert("password".to_string(), "s3cret".to_string());
        assert_eq!(substitute("{{user}}@example.com", &vars), "ada@example.com");
        assert_eq!(substitute("{{password}}", &vars), "s3cret");
        assert_eq!(substitute("{{unknown}}", &vars), "{{unknown}}");
        assert_eq!(substitute("plain", &vars), "plain");
    }

    #[test]
    fn test_resolve_url() {
        let mut options = PlayerOptions {
            base_url: Some("https://staging.example".to_string()),
            ..PlayerOptions::default()
        };
        assert_eq!(
            options.resolve_url("/items?page=2"),
            "https://staging.example/items?page=2"
        );
        assert_eq!(
            options.resolve_url("https://other.example/x"),
            "https://other.example/x"
        );

        options.base_url = Some("https://staging.example/".to_string());
        assert_eq!(options.resolve_url("items"), "https://staging.example/items");

        options.base_url = None;
        assert_eq!(options.resolve_url("/items"), "/items");
    }
}
