//! DOM mutation tracking with debounced stability windows.
//!
//! While a page reacts to an interaction, observed subtree changes are
//! buffered. Every new entry moves the stability deadline; once no
//! mutation has arrived for the configured threshold, the buffer is
//! filtered, deduplicated, scored and reported as a bounded ranked
//! batch, then cleared atomically.

use serde::{Deserialize, Serialize};

use crate::config;
use crate::detect::dom::{matches_simple_selector, DomInspector, NodeSnapshot};

/// Tags whose additions are never tracked.
const IGNORED_TAGS: &[&str] = &["script", "style", "link", "meta", "noscript"];

/// Score granted to entries carrying non-empty text.
const TEXT_SCORE: f64 = 100.0;

/// Maximum score granted for viewport-center proximity.
const PROXIMITY_SCORE: f64 = 50.0;

/// Configuration for the mutation tracker.
#[derive(Debug, Clone)]
pub struct MutationConfig {
    /// Quiet time after the last buffered mutation before reporting.
    pub stability_threshold_ms: i64,
    /// Cap on the reported batch size.
    pub max_reported: usize,
    /// Elements matching any of these selectors are not tracked.
    /// Invalid selector syntax is treated as "does not match".
    pub ignore_selectors: Vec<String>,
    /// Elements carrying this attribute are not tracked.
    pub ignore_attribute: String,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            stability_threshold_ms: config::DEFAULT_STABILITY_THRESHOLD_MS,
            max_reported: config::DEFAULT_MAX_TRACKED_MUTATIONS,
            ignore_selectors: Vec::new(),
            ignore_attribute: config::IGNORE_ATTRIBUTE.to_string(),
        }
    }
}

/// Classification of a tracked change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationKind {
    Added,
    TextChanged,
}

/// One observed subtree change, as delivered by the observation host.
///
/// Character-data mutations are resolved to their parent element by the
/// host before reaching the tracker.
#[derive(Debug, Clone)]
pub struct DomMutation {
    pub kind: MutationKind,
    pub node: NodeSnapshot,
}

/// One reported element change. Ephemeral: exists only inside a single
/// stability window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedMutation {
    pub kind: MutationKind,
    pub selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
    pub tag_name: String,
}

/// Buffers observed mutations and reports a ranked batch per window.
#[derive(Debug)]
pub struct MutationTracker {
    config: MutationConfig,
    observing: bool,
    buffer: Vec<DomMutation>,
    last_mutation_at: Option<i64>,
}

impl MutationTracker {
    pub fn new(config: MutationConfig) -> Self {
        Self {
            config,
            observing: false,
            buffer: Vec::new(),
            last_mutation_at: None,
        }
    }

    /// Begin observing. Mutations recorded while stopped are dropped.
    pub fn start(&mut self) {
        self.observing = true;
    }

    /// Detach and clear the buffer and any pending deadline.
    pub fn stop(&mut self) {
        self.observing = false;
        self.clear();
    }

    /// Clear the buffer without detaching.
    pub fn reset(&mut self) {
        self.clear();
    }

    fn clear(&mut self) {
        self.buffer.clear();
        self.last_mutation_at = None;
    }

    pub fn is_observing(&self) -> bool {
        self.observing
    }

    /// Node ids currently buffered, for hosts that refresh live state
    /// before polling.
    pub fn buffered_nodes(&self) -> Vec<u64> {
        self.buffer.iter().map(|m| m.node.node).collect()
    }

    /// Buffer one observed mutation. Every accepted entry restarts the
    /// stability deadline (debounce, not throttle).
    pub fn record(&mut self, mutation: DomMutation, now: i64) {
        if !self.observing {
            return;
        }
        if mutation.kind == MutationKind::Added && self.is_ignored(&mutation.node) {
            return;
        }
        self.buffer.push(mutation);
        self.last_mutation_at = Some(now);
    }

    fn is_ignored(&self, node: &NodeSnapshot) -> bool {
        let tag = node.tag_name.to_ascii_lowercase();
        if IGNORED_TAGS.contains(&tag.as_str()) {
            return true;
        }
        if node.has_attribute(&self.config.ignore_attribute) {
            return true;
        }
        self.config
            .ignore_selectors
            .iter()
            .any(|sel| matches_simple_selector(node, sel))
    }

    /// Check the stability deadline. Once the window is quiet, returns
    /// the ranked batch and clears the buffer atomically; otherwise
    /// returns `None`.
    pub fn poll(&mut self, now: i64, inspector: &dyn DomInspector) -> Option<Vec<TrackedMutation>> {
        if !self.observing {
            return None;
        }
        let last = self.last_mutation_at?;
        if now - last < self.config.stability_threshold_ms {
            return None;
        }

        let buffer = std::mem::take(&mut self.buffer);
        self.last_mutation_at = None;

        let report = finalize(buffer, &self.config, inspector);
        Some(report)
    }
}

/// Filter, dedupe, score, rank and cap one window's worth of mutations.
fn finalize(
    buffer: Vec<DomMutation>,
    config: &MutationConfig,
    inspector: &dyn DomInspector,
) -> Vec<TrackedMutation> {
    let mut seen: Vec<u64> = Vec::new();
    let mut scored: Vec<(f64, DomMutation)> = Vec::new();

    for mutation in buffer {
        if !inspector.is_connected(mutation.node.node) {
            continue;
        }
        let Some(bbox) = inspector.bounding_box(mutation.node.node) else {
            continue;
        };
        if bbox.is_near_zero() {
            continue;
        }
        // Dedup by element identity: the first classification recorded
        // within the window wins; later entries for the same element
        // are dropped.
        if seen.contains(&mutation.node.node) {
            continue;
        }
        seen.push(mutation.node.node);

        let mut score = 0.0;
        let has_text = mutation
            .node
            .text_content
            .as_deref()
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false);
        if has_text {
            score += TEXT_SCORE;
        }

        let (vw, vh) = inspector.viewport();
        let (cx, cy) = bbox.center();
        let dx = cx - vw / 2.0;
        let dy = cy - vh / 2.0;
        let distance = (dx * dx + dy * dy).sqrt();
        let max_distance = ((vw * vw + vh * vh) / 4.0).sqrt();
        if max_distance > 0.0 {
            let proximity = 1.0 - (distance / max_distance).min(1.0);
            score += PROXIMITY_SCORE * proximity;
        }

        scored.push((score, mutation));
    }

    // Stable sort: equal scores keep buffer order.
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(config.max_reported);

    scored
        .into_iter()
        .map(|(_, m)| TrackedMutation {
            kind: m.kind,
            selector: mutation_selector(&m.node),
            text_content: m
                .node
                .text_content
                .as_deref()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            tag_name: m.node.tag_name.to_ascii_lowercase(),
        })
        .collect()
}

/// Selector for a reported mutation, by priority:
/// testid > role+aria-label > role > id > tag with stable classes > tag.
fn mutation_selector(node: &NodeSnapshot) -> String {
    if let Some(test_id) = &node.test_id {
        return format!("[data-testid=\"{}\"]", test_id);
    }
    if let Some(role) = &node.role {
        if let Some(label) = &node.aria_label {
            return format!("[role=\"{}\"][aria-label=\"{}\"]", role, label);
        }
        return format!("[role=\"{}\"]", role);
    }
    if let Some(id) = &node.id {
        return format!("#{}", id);
    }
    let tag = node.tag_name.to_ascii_lowercase();
    let stable: Vec<&String> = node
        .class_names
        .iter()
        .filter(|c| crate::transform::selector::is_stable_class(c))
        .take(2)
        .collect();
    if stable.is_empty() {
        tag
    } else {
        let mut selector = tag;
        for class in stable {
            selector.push('.');
            selector.push_str(class);
        }
        selector
    }
}
