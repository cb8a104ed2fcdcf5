//! Flow Replay - record browser interactions, replay them as tests.
//!
//! This crate provides:
//! - Typed capture of DOM interactions with stable selector resolution
//! - Idle and mutation-stability detection for assertion synthesis
//! - A portable, versioned scenario document (JSON)
//! - A sequential step player with per-step pass/fail results
//! - A Chromium-backed driver plus a scripted mock for tests
//!
//! # Example
//!
//! ```rust,no_run
//! use flow_replay::player::{MockDriver, PlayerOptions, StepPlayer};
//! use flow_replay::transform::ScenarioDoc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let doc = ScenarioDoc::load(std::path::Path::new("scenario.json"))?;
//! let mut player = StepPlayer::new(MockDriver::new(), PlayerOptions::default());
//! player.load(doc.steps)?;
//! player.play().await?;
//! println!("{:?}", player.summary());
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod capture;
pub mod config;
pub mod detect;
pub mod driver;
pub mod events;
pub mod player;
pub mod session;
pub mod transform;

// Re-export the capture pipeline
pub use events::{CollectorConfig, EventCollector, RecordingState};

// Re-export detection types
pub use detect::{DomInspector, DomStateInspector, IdleDetector, MutationTracker};

// Re-export the step AST and scenario document
pub use transform::{ScenarioDoc, Selector, Step, StepAction, Viewport};

// Re-export playback
pub use player::{Driver, MockDriver, PlayerOptions, PlayerState, StepPlayer, StepResult};

// Re-export session management
pub use session::{cleanup_old_sessions, list_sessions, Session};
