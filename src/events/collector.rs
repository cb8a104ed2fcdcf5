//! The event collector: recording state, the append-only event log,
//! and idle-driven assertion synthesis.
//!
//! The collector's state is the single authority consulted before any
//! listener payload, mutation or network call is stored. The host
//! drives it with `record_*` calls plus a periodic [`EventCollector::tick`],
//! which polls the idle detector and the mutation tracker and appends
//! synthesized assertion steps at the current position in the log.

use tracing::{debug, info};

use crate::api::assertions::{assertions_for_idle_window, AssertionConfig};
use crate::api::calls::{shared_api_log, CapturedApiCall, SharedApiLog};
use crate::detect::dom::{DomInspector, NodeId};
use crate::detect::idle::{IdleConfig, IdleDetector, IdleEpisode};
use crate::detect::mutations::{DomMutation, MutationConfig, MutationTracker, TrackedMutation};
use crate::events::listeners::{normalize, DomEventPayload};
use crate::events::types::RawEvent;
use crate::transform::steps::{Selector, SelectorStrategy, Step, StepAction};
use crate::transform::transformer::{merge_steps, transform_event};

/// Recording lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Recording,
    Paused,
}

/// Configuration for a recording session.
#[derive(Debug, Clone, Default)]
pub struct CollectorConfig {
    pub idle: IdleConfig,
    pub mutations: MutationConfig,
    pub assertions: AssertionConfig,
}

/// Outcome of one tick, for host progress reporting.
#[derive(Debug, Clone, Default)]
pub struct TickOutcome {
    pub idle_episode: Option<IdleEpisode>,
    pub api_assertions: usize,
    pub element_assertions: usize,
}

/// One slot in the collector's ordered log: a captured event, or an
/// assertion synthesized at that point in the recording.
#[derive(Debug, Clone)]
enum CollectedEntry {
    Event(RawEvent),
    Synthesized(Step),
}

/// Orchestrates listener lifecycle and owns everything a recording
/// session accumulates.
pub struct EventCollector {
    config: CollectorConfig,
    state: RecordingState,
    entries: Vec<CollectedEntry>,
    idle: IdleDetector,
    mutations: MutationTracker,
    api_log: SharedApiLog,
}

impl EventCollector {
    pub fn new(config: CollectorConfig) -> Self {
        let idle = IdleDetector::new(config.idle);
        let mutations = MutationTracker::new(config.mutations.clone());
        Self {
            config,
            state: RecordingState::Idle,
            entries: Vec::new(),
            idle,
            mutations,
            api_log: shared_api_log(),
        }
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    /// Handle the network-interception layer writes into.
    pub fn api_log(&self) -> SharedApiLog {
        self.api_log.clone()
    }

    /// Begin (or restart) recording: arms the detectors.
    pub fn start(&mut self) {
        self.state = RecordingState::Recording;
        self.idle.start();
        self.mutations.start();
        info!("recording started");
    }

    /// Suspend storage without tearing down detectors' configuration.
    pub fn pause(&mut self) {
        if self.state == RecordingState::Recording {
            self.state = RecordingState::Paused;
            info!("recording paused");
        }
    }

    pub fn resume(&mut self) {
        if self.state == RecordingState::Paused {
            self.state = RecordingState::Recording;
            info!("recording resumed");
        }
    }

    /// End the session. Detector deadlines are cleared; a tick after
    /// this never fires anything.
    pub fn stop(&mut self) {
        self.state = RecordingState::Idle;
        self.idle.stop();
        self.mutations.stop();
        info!(events = self.event_count(), "recording stopped");
    }

    /// Store one listener payload, if recording. Returns the typed
    /// event when it was accepted.
    pub fn record_dom_event(&mut self, payload: DomEventPayload, now: i64) -> Option<&RawEvent> {
        if self.state != RecordingState::Recording {
            return None;
        }
        let event = normalize(payload)?;
        self.idle.record_event(event.kind_name(), now);
        self.entries.push(CollectedEntry::Event(event));
        match self.entries.last() {
            Some(CollectedEntry::Event(e)) => Some(e),
            _ => None,
        }
    }

    /// Forward one observed mutation to the tracker, if recording.
    pub fn record_mutation(&mut self, mutation: DomMutation, now: i64) {
        if self.state != RecordingState::Recording {
            return;
        }
        self.mutations.record(mutation, now);
    }

    /// Store one captured network exchange, if recording.
    pub fn record_api_call(&mut self, call: CapturedApiCall) {
        if self.state != RecordingState::Recording {
            return;
        }
        if let Ok(mut log) = self.api_log.lock() {
            log.record(call);
        }
    }

    /// Node ids currently buffered by the mutation tracker, for hosts
    /// that refresh live DOM state before ticking.
    pub fn buffered_mutation_nodes(&self) -> Vec<NodeId> {
        self.mutations.buffered_nodes()
    }

    /// Poll both detectors and append any synthesized assertions.
    pub fn tick(&mut self, now: i64, inspector: &dyn DomInspector) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        if self.state != RecordingState::Recording {
            return outcome;
        }

        if let Some(episode) = self.idle.poll(now) {
            let calls = self
                .api_log
                .lock()
                .map(|log| log.snapshot())
                .unwrap_or_default();
            let steps = assertions_for_idle_window(
                &calls,
                episode.started_at,
                now,
                &self.config.assertions,
            );
            outcome.api_assertions = steps.len();
            debug!(
                duration_ms = episode.duration_ms,
                assertions = steps.len(),
                "idle window closed"
            );
            for step in steps {
                self.entries.push(CollectedEntry::Synthesized(step));
            }
            outcome.idle_episode = Some(episode);
        }

        if let Some(batch) = self.mutations.poll(now, inspector) {
            let steps: Vec<Step> = batch.iter().map(element_assertion).collect();
            outcome.element_assertions = steps.len();
            debug!(tracked = steps.len(), "mutation window stabilized");
            for step in steps {
                self.entries.push(CollectedEntry::Synthesized(step));
            }
        }

        outcome
    }

    /// The append-only event log, in capture order.
    pub fn events(&self) -> Vec<&RawEvent> {
        self.entries
            .iter()
            .filter_map(|e| match e {
                CollectedEntry::Event(event) => Some(event),
                CollectedEntry::Synthesized(_) => None,
            })
            .collect()
    }

    pub fn event_count(&self) -> usize {
        self.events().len()
    }

    /// The transformed, merged scenario body.
    pub fn steps(&self, inspector: Option<&dyn DomInspector>) -> Vec<Step> {
        let steps = self
            .entries
            .iter()
            .filter_map(|entry| match entry {
                CollectedEntry::Event(event) => transform_event(event, inspector),
                CollectedEntry::Synthesized(step) => Some(step.clone()),
            })
            .collect();
        merge_steps(steps)
    }
}

/// Turn one tracked mutation into an element assertion.
fn element_assertion(mutation: &TrackedMutation) -> Step {
    let selector = Selector::new(SelectorStrategy::Css, mutation.selector.clone());
    let description = format!("Auto: {} visible", mutation.selector);
    Step::new(StepAction::AssertElement {
        selector,
        exists: true,
        text: mutation.text_content.clone(),
    })
    .with_description(description)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::dom::{BoundingBox, DomStateInspector, NodeSnapshot};
    use crate::detect::mutations::MutationKind;
    use crate::events::types::ElementInfo;
    use pretty_assertions::assert_eq;

    fn click_payload(test_id: &str, ts: i64) -> DomEventPayload {
        let mut target = ElementInfo::for_tag("button");
        target.test_id = Some(test_id.to_string());
        DomEventPayload {
            event: "click".to_string(),
            timestamp: ts,
            url: "https://app.example/".to_string(),
            target: Some(target),
            ..DomEventPayload::default()
        }
    }

    fn empty_inspector() -> DomStateInspector {
        DomStateInspector::new(1280.0, 720.0)
    }

    fn collector() -> EventCollector {
        let mut c = EventCollector::new(CollectorConfig::default());
        c.start();
        c
    }

    #[test]
    fn test_state_gates_storage() {
        let mut c = EventCollector::new(CollectorConfig::default());
        assert_eq!(c.state(), RecordingState::Idle);
        assert!(c.record_dom_event(click_payload("a", 0), 0).is_none());

        c.start();
        assert!(c.record_dom_event(click_payload("a", 1), 1).is_some());

        c.pause();
        assert!(c.record_dom_event(click_payload("b", 2), 2).is_none());

        c.resume();
        assert!(c.record_dom_event(click_payload("c", 3), 3).is_some());

        c.stop();
        assert!(c.record_dom_event(click_payload("d", 4), 4).is_none());
        assert_eq!(c.event_count(), 2);
    }

    #[test]
    fn test_idle_window_appends_api_assertions() {
        let mut c = collector();
        c.record_dom_event(click_payload("save", 1_000), 1_000);
        c.record_api_call(CapturedApiCall::completed(
            "https://api.example/orders",
            "POST",
            1_100,
            201,
            50,
        ));

        // Quiet period closes at 3000.
        let outcome = c.tick(3_000, &empty_inspector());
        assert!(outcome.idle_episode.is_some());
        assert_eq!(outcome.api_assertions, 1);

        let steps = c.steps(None);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].kind_name(), "click");
        assert_eq!(steps[1].kind_name(), "assertApi");

        // The window is consumed; another tick synthesizes nothing.
        let outcome = c.tick(10_000, &empty_inspector());
        assert!(outcome.idle_episode.is_none());
    }

    #[test]
    fn test_call_outside_window_not_asserted() {
        let mut c = collector();
        c.record_dom_event(click_payload("save", 1_000), 1_000);
        // Completed before the last event.
        c.record_api_call(CapturedApiCall::completed(
            "https://api.example/old",
            "POST",
            0,
            201,
            10,
        ));
        let outcome = c.tick(3_000, &empty_inspector());
        assert_eq!(outcome.api_assertions, 0);
    }

    #[test]
    fn test_mutation_batch_appends_element_assertions() {
        let mut c = collector();
        c.record_dom_event(click_payload("open", 0), 0);
        c.record_mutation(
            DomMutation {
                kind: MutationKind::Added,
                node: NodeSnapshot::new(7, "div")
                    .with_test_id("toast")
                    .with_text("Saved"),
            },
            100,
        );

        let inspector = DomStateInspector::new(1280.0, 720.0)
            .connected(7, BoundingBox::new(600.0, 340.0, 80.0, 40.0));
        let outcome = c.tick(1_600, &inspector);
        assert_eq!(outcome.element_assertions, 1);

        let steps = c.steps(None);
        assert_eq!(steps.len(), 2);
        let assert_step = steps
            .iter()
            .find(|s| s.kind_name() == "assertElement")
            .unwrap();
        match &assert_step.action {
            StepAction::AssertElement {
                selector,
                exists,
                text,
            } => {
                assert_eq!(selector.value, "[data-testid=\"toast\"]");
                assert!(exists);
                assert_eq!(text.as_deref(), Some("Saved"));
            }
            other => panic!("expected assertElement, got {:?}", other),
        }
    }

    #[test]
    fn test_api_calls_gated_by_state() {
        let mut c = collector();
        c.pause();
        c.record_api_call(CapturedApiCall::completed(
            "https://api.example/x",
            "POST",
            0,
            201,
            10,
        ));
        assert!(c.api_log().lock().unwrap().is_empty());
    }

    #[test]
    fn test_events_are_append_only_in_order() {
        let mut c = collector();
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            c.record_dom_event(click_payload(id, i as i64 * 100), i as i64 * 100);
        }
        let events = c.events();
        assert_eq!(events.len(), 3);
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }
}
