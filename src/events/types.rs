//! Core types for captured interaction events.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::transform::steps::SelectorCandidate;

/// Maximum ancestor depth carried by an [`ElementInfo`] chain.
pub const MAX_PARENT_DEPTH: usize = 5;

/// Attribute names worth persisting on a captured element.
///
/// Everything else on the element is noise for selector resolution and
/// replay, and may carry user data.
pub const ATTRIBUTE_WHITELIST: &[&str] = &[
    "name",
    "type",
    "placeholder",
    "href",
    "alt",
    "title",
    "value",
];

/// Mouse button involved in a click event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

impl Default for MouseButton {
    fn default() -> Self {
        MouseButton::Left
    }
}

/// Modifier keys held during an interaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifiers {
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub alt: bool,
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub meta: bool,
}

impl Modifiers {
    /// True when any chord modifier (ctrl/meta/alt) is held.
    ///
    /// Shift alone does not make a chord; it only changes the character.
    pub fn is_chord(&self) -> bool {
        self.ctrl || self.alt || self.meta
    }
}

/// Descriptor of the DOM element an event targeted.
///
/// Captured once at event time; never re-queried. The `parent` chain is
/// bounded at [`MAX_PARENT_DEPTH`] ancestors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementInfo {
    pub tag_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aria_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
    #[serde(default)]
    pub class_names: Vec<String>,
    /// Whitelisted attributes only; see [`ATTRIBUTE_WHITELIST`].
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub sibling_index: usize,
    #[serde(default)]
    pub sibling_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Box<ElementInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xpath: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selector_candidates: Vec<SelectorCandidate>,
}

impl ElementInfo {
    /// Minimal descriptor for a bare tag, used heavily in tests.
    pub fn for_tag(tag: impl Into<String>) -> Self {
        Self {
            tag_name: tag.into(),
            id: None,
            test_id: None,
            role: None,
            aria_label: None,
            name: None,
            text_content: None,
            class_names: Vec::new(),
            attributes: BTreeMap::new(),
            sibling_index: 0,
            sibling_count: 1,
            parent: None,
            xpath: None,
            selector_candidates: Vec::new(),
        }
    }

    /// Attribute lookup against the whitelisted set.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Depth of the ancestor chain hanging off this element.
    pub fn parent_depth(&self) -> usize {
        let mut depth = 0;
        let mut cursor = self.parent.as_deref();
        while let Some(p) = cursor {
            depth += 1;
            cursor = p.parent.as_deref();
        }
        depth
    }
}

/// Where in the input lifecycle an input event was observed.
///
/// Raw per-keystroke ticks are recorded but only committed values
/// (blur/change) become steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputSource {
    Tick,
    Change,
    Blur,
}

/// One captured DOM interaction, semantically typed.
///
/// Immutable once created; the collector appends these to an ordered,
/// append-only log for the life of a recording session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    pub id: String,
    /// Epoch milliseconds at capture time.
    pub timestamp: i64,
    /// Full page URL at capture time.
    pub url: String,
    #[serde(flatten)]
    pub kind: RawEventKind,
}

/// Per-interaction-kind payload of a [`RawEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RawEventKind {
    Click {
        target: ElementInfo,
        #[serde(default)]
        button: MouseButton,
        /// 2 for a double click.
        #[serde(default = "default_click_count")]
        click_count: u8,
        #[serde(default)]
        modifiers: Modifiers,
    },
    Input {
        target: ElementInfo,
        /// Current field value; masked upstream for sensitive fields.
        value: String,
        #[serde(default)]
        previous_value: String,
        source: InputSource,
    },
    Keyboard {
        target: ElementInfo,
        key: String,
        #[serde(default)]
        modifiers: Modifiers,
    },
    Scroll {
        target: ElementInfo,
        #[serde(default)]
        scroll_x: f64,
        #[serde(default)]
        scroll_y: f64,
    },
    /// Navigation carries no target element.
    Navigation { to: String },
}

impl RawEvent {
    pub fn new(timestamp: i64, url: impl Into<String>, kind: RawEventKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp,
            url: url.into(),
            kind,
        }
    }

    /// Short kind name used for idle-detector bookkeeping and logging.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            RawEventKind::Click { .. } => "click",
            RawEventKind::Input { .. } => "input",
            RawEventKind::Keyboard { .. } => "keyboard",
            RawEventKind::Scroll { .. } => "scroll",
            RawEventKind::Navigation { .. } => "navigation",
        }
    }

    /// The element the event targeted, when the kind carries one.
    pub fn target(&self) -> Option<&ElementInfo> {
        match &self.kind {
            RawEventKind::Click { target, .. }
            | RawEventKind::Input { target, .. }
            | RawEventKind::Keyboard { target, .. }
            | RawEventKind::Scroll { target, .. } => Some(target),
            RawEventKind::Navigation { .. } => None,
        }
    }
}

fn default_click_count() -> u8 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn click_event() -> RawEvent {
        RawEvent::new(
            1_000,
            "https://app.example/cart",
            RawEventKind::Click {
                target: ElementInfo::for_tag("button"),
                button: MouseButton::Left,
                click_count: 1,
                modifiers: Modifiers::default(),
            },
        )
    }

    #[test]
    fn test_raw_event_serializes_with_type_tag() {
        let json = serde_json::to_value(click_event()).unwrap();
        assert_eq!(json["type"], "click");
        assert_eq!(json["url"], "https://app.example/cart");
        assert!(json["id"].as_str().is_some());
    }

    #[test]
    fn test_navigation_has_no_target() {
        let event = RawEvent::new(
            5,
            "https://app.example/",
            RawEventKind::Navigation {
                to: "/checkout".to_string(),
            },
        );
        assert!(event.target().is_none());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "navigation");
        assert!(json.get("target").is_none());
    }

    #[test]
    fn test_parent_depth() {
        let mut info = ElementInfo::for_tag("span");
        let mut parent = ElementInfo::for_tag("div");
        parent.parent = Some(Box::new(ElementInfo::for_tag("body")));
        info.parent = Some(Box::new(parent));
        assert_eq!(info.parent_depth(), 2);
    }

    #[test]
    fn test_modifiers_chord() {
        let mut m = Modifiers::default();
        assert!(!m.is_chord());
        m.shift = true;
        assert!(!m.is_chord());
        m.ctrl = true;
        assert!(m.is_chord());
    }

    #[test]
    fn test_raw_event_roundtrip() {
        let event = click_event();
        let json = serde_json::to_string(&event).unwrap();
        let back: RawEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
