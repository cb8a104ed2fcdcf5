//! Session management for playback-run artifacts.
//!
//! Provides centralized management of run directories with:
//! - Unique run directories under a global base location
//! - Automatic cleanup unless explicitly preserved
//! - Run metadata tracking

use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config;

/// A playback run with organized artifact storage
#[derive(Debug, Clone)]
pub struct Session {
    /// Unique session ID
    pub id: String,
    /// Root directory for this session
    pub dir: PathBuf,
    /// Whether to keep artifacts after the session ends
    pub keep: bool,
}

impl Session {
    /// Create a new session with a unique ID
    pub fn new() -> Self {
        let id = generate_session_id();
        let dir = PathBuf::from(config::session_base_dir()).join(&id);
        Self {
            id,
            dir,
            keep: false,
        }
    }

    /// Create a session with a specific name/prefix
    pub fn with_name(name: &str) -> Self {
        let timestamp = generate_timestamp_suffix();
        let id = format!("{}_{}", sanitize_name(name), timestamp);
        let dir = PathBuf::from(config::session_base_dir()).join(&id);
        Self {
            id,
            dir,
            keep: false,
        }
    }

    /// Create a session in a specific directory
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let id = dir
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(generate_session_id);
        Self {
            id,
            dir,
            // User-specified directories are kept by default
            keep: true,
        }
    }

    /// Set whether to keep artifacts after the session ends
    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    /// Initialize the session directory
    pub fn init(&self, scenario_id: Option<&str>) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir)?;

        let metadata = serde_json::json!({
            "id": self.id,
            "created": chrono::Utc::now().to_rfc3339(),
            "scenario": scenario_id,
        });
        let metadata_path = self.dir.join(".session.json");
        fs::write(metadata_path, serde_json::to_string_pretty(&metadata)?)?;
        Ok(())
    }

    /// Path for a failure screenshot of one step
    pub fn screenshot_path(&self, step_index: usize) -> PathBuf {
        self.dir.join(format!("failure_step_{}.png", step_index))
    }

    /// Path for the run report JSON
    pub fn report_path(&self) -> PathBuf {
        self.dir.join("report.json")
    }

    /// List all artifacts (screenshots, snapshots, reports) in the session
    pub fn list_artifacts(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut artifacts = Vec::new();
        if self.dir.exists() {
            for entry in fs::read_dir(&self.dir)? {
                let entry = entry?;
                let path = entry.path();
                let relevant = path
                    .extension()
                    .map(|e| e == "png" || e == "html" || e == "json")
                    .unwrap_or(false);
                let is_metadata = path
                    .file_name()
                    .map(|n| n == ".session.json")
                    .unwrap_or(false);
                if relevant && !is_metadata {
                    artifacts.push(path);
                }
            }
        }
        artifacts.sort();
        Ok(artifacts)
    }

    /// Clean up the session directory
    pub fn cleanup(&self) -> std::io::Result<()> {
        if self.dir.exists() && !self.keep {
            fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.keep {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }
}

/// Generate a unique session ID
fn generate_session_id() -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let pid = std::process::id();
    format!("run_{}_{}", timestamp, pid)
}

/// Generate a timestamp suffix
fn generate_timestamp_suffix() -> String {
    chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Sanitize a name for use in filenames
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

/// Clean up runs older than the specified duration
pub fn cleanup_old_sessions(max_age: std::time::Duration) -> std::io::Result<usize> {
    let base = PathBuf::from(config::session_base_dir());
    if !base.exists() {
        return Ok(0);
    }

    let now = SystemTime::now();
    let mut cleaned = 0;

    for entry in fs::read_dir(&base)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if let Ok(metadata) = entry.metadata() {
            if let Ok(modified) = metadata.modified() {
                if let Ok(age) = now.duration_since(modified) {
                    if age > max_age && fs::remove_dir_all(&path).is_ok() {
                        cleaned += 1;
                    }
                }
            }
        }
    }

    Ok(cleaned)
}

/// List all existing run directories
pub fn list_sessions() -> std::io::Result<Vec<PathBuf>> {
    let base = PathBuf::from(config::session_base_dir());
    if !base.exists() {
        return Ok(Vec::new());
    }

    let mut sessions = Vec::new();
    for entry in fs::read_dir(&base)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            sessions.push(path);
        }
    }
    sessions.sort();
    Ok(sessions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_new() {
        let session = Session::new();
        assert!(session.id.starts_with("run_"));
        assert!(!session.keep);
    }

    #[test]
    fn test_session_with_name() {
        let session = Session::with_name("checkout flow");
        assert!(session.id.starts_with("checkout_flow_"));
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("hello world"), "hello_world");
        assert_eq!(sanitize_name("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_name("run-2"), "run-2");
    }

    #[test]
    fn test_artifact_paths() {
        let session = Session::new();
        assert!(session.screenshot_path(3).ends_with("failure_step_3.png"));
        assert!(session.report_path().ends_with("report.json"));
    }

    #[test]
    fn test_in_dir_keeps_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::in_dir(dir.path().join("my-run"));
        assert!(session.keep);
        assert_eq!(session.id, "my-run");
    }

    #[test]
    fn test_init_and_cleanup() {
        let base = tempfile::tempdir().unwrap();
        let session = Session::in_dir(base.path().join("r1")).keep(false);
        session.init(Some("scenario-1")).unwrap();
        assert!(session.dir.join(".session.json").exists());

        let artifacts = session.list_artifacts().unwrap();
        assert!(artifacts.is_empty(), "metadata is not an artifact");

        session.cleanup().unwrap();
        assert!(!session.dir.exists());
    }
}
