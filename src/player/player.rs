//! The step player: a sequential, failure-aware execution state machine.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::api::calls::{shared_api_log, SharedApiLog};
use crate::player::context::{ExecContext, PlayerOptions};
use crate::player::driver::Driver;
use crate::player::executors::{execute_step, ExecError};
use crate::player::state::{PlayerNotification, PlayerState, RunSummary, StepResult, StepStatus};
use crate::transform::steps::Step;

const CONTROL_NONE: u8 = 0;
const CONTROL_PAUSE: u8 = 1;
const CONTROL_STOP: u8 = 2;

/// Result type for player operations
pub type PlayerResult<T> = Result<T, PlayerError>;

/// Error types for player operations
#[derive(Debug)]
pub enum PlayerError {
    /// The operation is not legal in the current state
    InvalidTransition {
        from: PlayerState,
        operation: &'static str,
    },
    /// No scenario has been loaded
    NoScenario,
}

impl std::fmt::Display for PlayerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerError::InvalidTransition { from, operation } => {
                write!(f, "Cannot {} from state '{}'", operation, from)
            }
            PlayerError::NoScenario => write!(f, "No scenario loaded"),
        }
    }
}

impl std::error::Error for PlayerError {}

/// Cooperative cancellation handle.
///
/// Requests take effect at the next step boundary; an in-flight driver
/// call cannot be aborted, and its late completion is ignored once a
/// stop has been requested.
#[derive(Debug, Clone)]
pub struct PlayerControl(Arc<AtomicU8>);

impl PlayerControl {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(CONTROL_NONE)))
    }

    pub fn request_pause(&self) {
        // Never downgrade a stop request.
        let _ = self.0.compare_exchange(
            CONTROL_NONE,
            CONTROL_PAUSE,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    pub fn request_stop(&self) {
        self.0.store(CONTROL_STOP, Ordering::SeqCst);
    }

    fn stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst) == CONTROL_STOP
    }

    fn take(&self) -> u8 {
        self.0.swap(CONTROL_NONE, Ordering::SeqCst)
    }
}

/// Executes a loaded scenario sequentially, one driver at a time.
pub struct StepPlayer<D: Driver> {
    driver: D,
    options: PlayerOptions,
    variables: HashMap<String, String>,
    api_log: SharedApiLog,
    state: PlayerState,
    steps: Vec<Step>,
    /// Index of the last executed step; -1 before the first.
    current_index: i64,
    results: Vec<StepResult>,
    notifications: VecDeque<PlayerNotification>,
    control: PlayerControl,
}

impl<D: Driver> StepPlayer<D> {
    pub fn new(driver: D, options: PlayerOptions) -> Self {
        Self {
            driver,
            options,
            variables: HashMap::new(),
            api_log: shared_api_log(),
            state: PlayerState::Idle,
            steps: Vec::new(),
            current_index: -1,
            results: Vec::new(),
            notifications: VecDeque::new(),
            control: PlayerControl::new(),
        }
    }

    /// Variable-substitution map applied at execution time.
    pub fn set_variables(&mut self, variables: HashMap<String, String>) {
        self.variables = variables;
    }

    /// API-call observer consulted by `assertApi` steps.
    pub fn api_log(&self) -> SharedApiLog {
        self.api_log.clone()
    }

    /// Cancellation handle usable from outside the play loop.
    pub fn control(&self) -> PlayerControl {
        self.control.clone()
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn results(&self) -> &[StepResult] {
        &self.results
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary::from_results(&self.results)
    }

    /// Ordered lifecycle notifications accumulated since the last drain.
    pub fn drain_notifications(&mut self) -> Vec<PlayerNotification> {
        self.notifications.drain(..).collect()
    }

    /// Load a scenario. Legal only from idle and terminal states; the
    /// loaded step list is immutable for the duration of the run.
    pub fn load(&mut self, steps: Vec<Step>) -> PlayerResult<()> {
        if !self.state.accepts_load() {
            return Err(PlayerError::InvalidTransition {
                from: self.state,
                operation: "load",
            });
        }
        info!(steps = steps.len(), "scenario loaded");
        self.steps = steps;
        self.current_index = -1;
        self.results.clear();
        self.control.take();
        self.set_state(PlayerState::Idle);
        Ok(())
    }

    /// Execute steps sequentially from the current position until the
    /// scenario completes, a failure halts the run, or a pause/stop
    /// request lands at a step boundary.
    pub async fn play(&mut self) -> PlayerResult<()> {
        if !matches!(self.state, PlayerState::Idle | PlayerState::Paused) {
            return Err(PlayerError::InvalidTransition {
                from: self.state,
                operation: "play",
            });
        }
        self.set_state(PlayerState::Playing);

        while ((self.current_index + 1) as usize) < self.steps.len() {
            match self.control.take() {
                CONTROL_PAUSE => {
                    self.set_state(PlayerState::Paused);
                    return Ok(());
                }
                CONTROL_STOP => {
                    self.set_state(PlayerState::Stopped);
                    return Ok(());
                }
                _ => {}
            }

            let index = (self.current_index + 1) as usize;
            let outcome = self.run_step(index).await;

            // A stop requested while the step was in flight discards
            // the late completion: the result is never committed.
            if self.control.stop_requested() {
                self.control.take();
                self.set_state(PlayerState::Stopped);
                return Ok(());
            }

            self.current_index = index as i64;
            let halt = self.commit(outcome);
            if halt {
                return Ok(());
            }
        }

        let summary = self.summary();
        self.set_state(PlayerState::Completed);
        self.notifications.push_back(PlayerNotification::PlaybackComplete {
            passed: summary.passed,
            failed: summary.failed,
            skipped: summary.skipped,
        });
        Ok(())
    }

    /// Execute exactly the next step and advance, without entering
    /// `playing`. Legal only from idle and paused.
    pub async fn step(&mut self) -> PlayerResult<Option<StepResult>> {
        if !matches!(self.state, PlayerState::Idle | PlayerState::Paused) {
            return Err(PlayerError::InvalidTransition {
                from: self.state,
                operation: "step",
            });
        }
        let index = (self.current_index + 1) as usize;
        if index >= self.steps.len() {
            return Ok(None);
        }

        let outcome = self.run_step(index).await;
        self.current_index = index as i64;
        self.commit(outcome);
        Ok(self.results.last().cloned())
    }

    /// Request a pause at the next step boundary. Index and results are
    /// preserved for a later `play()`.
    pub fn pause(&mut self) {
        self.control.request_pause();
    }

    /// End the run. Terminal; only `load()` leaves this state.
    pub fn stop(&mut self) {
        self.control.request_stop();
        if matches!(self.state, PlayerState::Idle | PlayerState::Paused) {
            self.control.take();
            self.set_state(PlayerState::Stopped);
        }
    }

    fn set_state(&mut self, to: PlayerState) {
        if self.state != to {
            debug!(from = %self.state, to = %to, "player state change");
            self.notifications.push_back(PlayerNotification::StateChange {
                from: self.state,
                to,
            });
            self.state = to;
        }
    }

    /// Execute one step and build its result, without committing it.
    /// Executor errors never escape; they become the result's error.
    async fn run_step(&mut self, index: usize) -> StepOutcome {
        let step = self.steps[index].clone();
        self.notifications.push_back(PlayerNotification::StepStart {
            index,
            step_id: step.id.clone(),
        });

        let started = Instant::now();
        let exec_result = {
            let ctx = ExecContext {
                driver: &self.driver,
                options: &self.options,
                variables: &self.variables,
                api_log: &self.api_log,
            };
            execute_step(&step, &ctx).await
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let mut result = StepResult {
            step_id: step.id.clone(),
            index,
            status: StepStatus::Passed,
            duration_ms,
            error: None,
            screenshot_path: None,
        };
        let mut halted_error = None;
        let mut fatal = false;

        if let Err(err) = exec_result {
            warn!(index, error = %err, "step failed");
            result.screenshot_path = self.capture_failure_screenshot(index).await;
            result.error = Some(err.to_string());
            fatal = err.is_fatal();
            if step.optional {
                result.status = StepStatus::Skipped;
            } else {
                result.status = StepStatus::Failed;
                halted_error = Some(err);
            }
        }

        StepOutcome {
            result,
            halted_error,
            fatal,
        }
    }

    /// Commit a step outcome (result + notification) and apply the
    /// failure-disposition policy. Returns true when the run must halt.
    fn commit(&mut self, outcome: StepOutcome) -> bool {
        self.results.push(outcome.result.clone());
        self.notifications
            .push_back(PlayerNotification::StepComplete {
                result: outcome.result,
            });

        let Some(err) = outcome.halted_error else {
            return false;
        };
        if self.options.continue_on_failure && !outcome.fatal {
            return false;
        }
        self.notifications.push_back(PlayerNotification::PlaybackError {
            message: err.to_string(),
        });
        if outcome.fatal {
            self.set_state(PlayerState::Error);
        } else if self.options.pause_on_failure {
            self.set_state(PlayerState::Paused);
        } else {
            self.set_state(PlayerState::Stopped);
        }
        true
    }

    /// Best-effort screenshot on failure; all errors are swallowed.
    async fn capture_failure_screenshot(&self, index: usize) -> Option<std::path::PathBuf> {
        if !self.options.screenshot_on_failure {
            return None;
        }
        let dir = self.options.artifact_dir.as_ref()?;
        let png = match self.driver.screenshot().await {
            Ok(png) => png,
            Err(err) => {
                debug!(error = %err, "failure screenshot skipped");
                return None;
            }
        };
        if std::fs::create_dir_all(dir).is_err() {
            return None;
        }
        let path = dir.join(format!("failure_step_{}.png", index));
        match std::fs::write(&path, png) {
            Ok(()) => Some(path),
            Err(err) => {
                debug!(error = %err, "failure screenshot not written");
                None
            }
        }
    }
}

/// What one executed step means for the rest of the run.
struct StepOutcome {
    result: StepResult,
    /// The error that should halt the run, unless policy keeps it alive.
    halted_error: Option<ExecError>,
    fatal: bool,
}
