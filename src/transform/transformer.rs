//! Raw-event-to-step transformation.
//!
//! Each captured event maps to zero or one step. Unmappable events are
//! filtering decisions, silently dropped: clicks without a resolvable
//! selector, uncommitted input ticks, plain character keystrokes,
//! zero-distance scrolls. A final merge pass collapses consecutive
//! `type` runs on one selector down to the latest value.

use tracing::trace;
use url::Url;

use crate::detect::dom::DomInspector;
use crate::events::listeners::is_sensitive_field;
use crate::events::types::{InputSource, RawEvent, RawEventKind};
use crate::transform::selector::best_selector;
use crate::transform::steps::{Step, StepAction};

/// Keys that are meaningful on their own; everything else is typing
/// noise unless part of a ctrl/meta/alt chord.
const STANDALONE_KEYS: &[&str] = &["Enter", "Tab", "Escape"];

/// Map one raw event to at most one step.
pub fn transform_event(event: &RawEvent, inspector: Option<&dyn DomInspector>) -> Option<Step> {
    let action = match &event.kind {
        RawEventKind::Click {
            target,
            button,
            click_count,
            modifiers,
        } => {
            let selector = best_selector(target, inspector).or_else(|| {
                trace!(tag = %target.tag_name, "dropping click without resolvable selector");
                None
            })?;
            StepAction::Click {
                selector,
                button: *button,
                click_count: *click_count,
                modifiers: *modifiers,
            }
        }
        RawEventKind::Input {
            target,
            value,
            previous_value,
            source,
        } => {
            // Raw per-keystroke ticks are noise; only the committed
            // value matters.
            if *source == InputSource::Tick {
                return None;
            }
            if value.is_empty() && previous_value.is_empty() {
                return None;
            }
            let selector = best_selector(target, inspector)?;
            StepAction::Type {
                selector,
                value: value.clone(),
                sensitive: is_sensitive_field(target),
            }
        }
        RawEventKind::Keyboard {
            target,
            key,
            modifiers,
        } => {
            if !STANDALONE_KEYS.contains(&key.as_str()) && !modifiers.is_chord() {
                return None;
            }
            StepAction::Keypress {
                key: key.clone(),
                modifiers: *modifiers,
                selector: best_selector(target, inspector),
            }
        }
        RawEventKind::Scroll {
            target,
            scroll_x,
            scroll_y,
        } => {
            if *scroll_x == 0.0 && *scroll_y == 0.0 {
                return None;
            }
            StepAction::Scroll {
                x: (*scroll_x != 0.0).then_some(*scroll_x),
                y: (*scroll_y != 0.0).then_some(*scroll_y),
                selector: best_selector(target, inspector),
            }
        }
        RawEventKind::Navigation { to } => StepAction::Navigate {
            url: strip_origin(to),
        },
    };
    Some(Step::new(action))
}

/// Batch-map an event log and merge the result.
pub fn transform_events(events: &[RawEvent], inspector: Option<&dyn DomInspector>) -> Vec<Step> {
    let steps = events
        .iter()
        .filter_map(|e| transform_event(e, inspector))
        .collect();
    merge_steps(steps)
}

/// Collapse each run of consecutive `type` steps on an identical
/// selector into the last one; all other steps pass through unchanged.
pub fn merge_steps(steps: Vec<Step>) -> Vec<Step> {
    let mut merged: Vec<Step> = Vec::with_capacity(steps.len());
    for step in steps {
        let collapses = match (&step.action, merged.last().map(|s| &s.action)) {
            (
                StepAction::Type { selector, .. },
                Some(StepAction::Type {
                    selector: previous, ..
                }),
            ) => selector == previous,
            _ => false,
        };
        if collapses {
            let last = merged.len() - 1;
            merged[last] = step;
        } else {
            merged.push(step);
        }
    }
    merged
}

/// Reduce a navigation URL to path + query + hash so scenarios stay
/// portable across environments.
pub fn strip_origin(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(url) => {
            let mut out = url.path().to_string();
            if let Some(query) = url.query() {
                out.push('?');
                out.push_str(query);
            }
            if let Some(fragment) = url.fragment() {
                out.push('#');
                out.push_str(fragment);
            }
            out
        }
        // Already relative (or unparseable): keep as recorded.
        Err(_) => raw.to_string(),
    }
}
