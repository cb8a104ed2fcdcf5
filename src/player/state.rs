//! Playback state, per-step results and lifecycle notifications.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// State machine positions for the step player.
///
/// Transitions: `idle → playing → {paused, completed, error, stopped}`;
/// `paused → playing`; terminal states return to `idle` only via a new
/// `load()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    Idle,
    Playing,
    Paused,
    Stopped,
    Completed,
    Error,
}

impl PlayerState {
    /// States a new scenario may be loaded from.
    pub fn accepts_load(self) -> bool {
        matches!(
            self,
            PlayerState::Idle | PlayerState::Stopped | PlayerState::Completed | PlayerState::Error
        )
    }
}

impl std::fmt::Display for PlayerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PlayerState::Idle => "idle",
            PlayerState::Playing => "playing",
            PlayerState::Paused => "paused",
            PlayerState::Stopped => "stopped",
            PlayerState::Completed => "completed",
            PlayerState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Outcome category of one executed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Passed,
    Failed,
    Skipped,
}

/// The outcome of executing one step during playback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_id: String,
    pub index: usize,
    pub status: StepStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<PathBuf>,
}

/// Ordered lifecycle notifications, drained by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PlayerNotification {
    StepStart {
        index: usize,
        step_id: String,
    },
    StepComplete {
        result: StepResult,
    },
    StateChange {
        from: PlayerState,
        to: PlayerState,
    },
    PlaybackComplete {
        passed: usize,
        failed: usize,
        skipped: usize,
    },
    PlaybackError {
        message: String,
    },
}

/// Summary of one playback run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunSummary {
    pub fn from_results(results: &[StepResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            match result.status {
                StepStatus::Passed => summary.passed += 1,
                StepStatus::Failed => summary.failed += 1,
                StepStatus::Skipped => summary.skipped += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_load() {
        assert!(PlayerState::Idle.accepts_load());
        assert!(PlayerState::Stopped.accepts_load());
        assert!(PlayerState::Completed.accepts_load());
        assert!(PlayerState::Error.accepts_load());
        assert!(!PlayerState::Playing.accepts_load());
        assert!(!PlayerState::Paused.accepts_load());
    }

    #[test]
    fn test_notification_serialization() {
        let n = PlayerNotification::StateChange {
            from: PlayerState::Idle,
            to: PlayerState::Playing,
        };
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["event"], "stateChange");
        assert_eq!(json["from"], "idle");
        assert_eq!(json["to"], "playing");
    }

    #[test]
    fn test_run_summary() {
        let results = vec![
            StepResult {
                step_id: "a".into(),
                index: 0,
                status: StepStatus::Passed,
                duration_ms: 10,
                error: None,
                screenshot_path: None,
            },
            StepResult {
                step_id: "b".into(),
                index: 1,
                status: StepStatus::Skipped,
                duration_ms: 5,
                error: Some("not found".into()),
                screenshot_path: None,
            },
        ];
        let summary = RunSummary::from_results(&results);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.total(), 2);
    }
}
