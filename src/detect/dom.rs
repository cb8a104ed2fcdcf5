//! DOM-observation port.
//!
//! The mutation tracker and selector ranking never touch a live DOM
//! directly. They consume:
//! - [`NodeSnapshot`]s captured when a mutation is observed, and
//! - a [`DomInspector`] consulted at stabilization time for element
//!   state that may have changed since buffering (connectivity,
//!   geometry, selector match counts).
//!
//! The record-mode browser host builds a [`DomStateInspector`] by
//! querying the page just before each stability poll; tests build one
//! programmatically.

use std::collections::{BTreeMap, HashMap};

/// Identity of an observed DOM node within one recording session.
pub type NodeId = u64;

/// Geometry of an element relative to the viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Boxes under ~1px in either dimension are treated as invisible.
    pub fn is_near_zero(&self) -> bool {
        self.width < 1.0 || self.height < 1.0
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Element descriptor captured when a mutation was observed.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSnapshot {
    pub node: NodeId,
    pub tag_name: String,
    pub id: Option<String>,
    pub test_id: Option<String>,
    pub role: Option<String>,
    pub aria_label: Option<String>,
    pub class_names: Vec<String>,
    pub attributes: BTreeMap<String, String>,
    pub text_content: Option<String>,
}

impl NodeSnapshot {
    pub fn new(node: NodeId, tag: impl Into<String>) -> Self {
        Self {
            node,
            tag_name: tag.into(),
            id: None,
            test_id: None,
            role: None,
            aria_label: None,
            class_names: Vec::new(),
            attributes: BTreeMap::new(),
            text_content: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_test_id(mut self, test_id: impl Into<String>) -> Self {
        self.test_id = Some(test_id.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_aria_label(mut self, label: impl Into<String>) -> Self {
        self.aria_label = Some(label.into());
        self
    }

    pub fn with_classes(mut self, classes: &[&str]) -> Self {
        self.class_names = classes.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text_content = Some(text.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }
}

/// Live element state consulted at stabilization time.
pub trait DomInspector {
    /// Whether the node is still attached to the document.
    fn is_connected(&self, node: NodeId) -> bool;

    /// Current viewport-relative geometry, if the node renders at all.
    fn bounding_box(&self, node: NodeId) -> Option<BoundingBox>;

    /// Viewport dimensions as (width, height).
    fn viewport(&self) -> (f64, f64);

    /// How many elements a query matches, or `None` when the check is
    /// not feasible for this selector.
    fn count_matches(&self, selector: &str) -> Option<usize>;
}

/// Snapshot-backed [`DomInspector`].
///
/// The record-mode host fills one from a single page evaluation; tests
/// construct one directly. Unknown nodes read as disconnected.
#[derive(Debug, Clone)]
pub struct DomStateInspector {
    states: HashMap<NodeId, NodeState>,
    viewport: (f64, f64),
    selector_counts: HashMap<String, usize>,
}

#[derive(Debug, Clone, Copy)]
struct NodeState {
    connected: bool,
    bbox: Option<BoundingBox>,
}

impl DomStateInspector {
    pub fn new(viewport_width: f64, viewport_height: f64) -> Self {
        Self {
            states: HashMap::new(),
            viewport: (viewport_width, viewport_height),
            selector_counts: HashMap::new(),
        }
    }

    /// Record a connected node with the given geometry.
    pub fn connected(mut self, node: NodeId, bbox: BoundingBox) -> Self {
        self.states.insert(
            node,
            NodeState {
                connected: true,
                bbox: Some(bbox),
            },
        );
        self
    }

    /// Record a node that has been detached since buffering.
    pub fn disconnected(mut self, node: NodeId) -> Self {
        self.states.insert(
            node,
            NodeState {
                connected: false,
                bbox: None,
            },
        );
        self
    }

    /// Record a connected node that does not render (no geometry).
    pub fn connected_hidden(mut self, node: NodeId) -> Self {
        self.states.insert(
            node,
            NodeState {
                connected: true,
                bbox: None,
            },
        );
        self
    }

    /// Record a match count for a selector, enabling uniqueness checks.
    pub fn selector_count(mut self, selector: impl Into<String>, count: usize) -> Self {
        self.selector_counts.insert(selector.into(), count);
        self
    }
}

impl DomInspector for DomStateInspector {
    fn is_connected(&self, node: NodeId) -> bool {
        self.states.get(&node).map(|s| s.connected).unwrap_or(false)
    }

    fn bounding_box(&self, node: NodeId) -> Option<BoundingBox> {
        self.states.get(&node).and_then(|s| s.bbox)
    }

    fn viewport(&self) -> (f64, f64) {
        self.viewport
    }

    fn count_matches(&self, selector: &str) -> Option<usize> {
        self.selector_counts.get(selector).copied()
    }
}

// =============================================================================
// Simple-selector matching
// =============================================================================

/// A parsed compound of simple selector parts (no combinators).
#[derive(Debug, Clone, PartialEq, Default)]
struct SimpleSelector {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attributes: Vec<(String, Option<String>)>,
}

/// Match a node snapshot against one simple selector.
///
/// Supports `tag`, `#id`, `.class`, `[attr]` and `[attr="value"]`
/// compounds. Anything the parser cannot understand (combinators,
/// pseudo-classes, malformed syntax) is treated as "does not match"
/// rather than an error, so a bad configured ignore selector can never
/// abort a tracking cycle.
pub fn matches_simple_selector(snapshot: &NodeSnapshot, selector: &str) -> bool {
    let Some(parsed) = parse_simple_selector(selector) else {
        return false;
    };

    if let Some(tag) = &parsed.tag {
        if !snapshot.tag_name.eq_ignore_ascii_case(tag) {
            return false;
        }
    }
    if let Some(id) = &parsed.id {
        if snapshot.id.as_deref() != Some(id.as_str()) {
            return false;
        }
    }
    for class in &parsed.classes {
        if !snapshot.class_names.iter().any(|c| c == class) {
            return false;
        }
    }
    for (name, expected) in &parsed.attributes {
        let actual = match name.as_str() {
            "data-testid" => snapshot.test_id.as_deref(),
            "role" => snapshot.role.as_deref(),
            "aria-label" => snapshot.aria_label.as_deref(),
            "id" => snapshot.id.as_deref(),
            other => snapshot.attributes.get(other).map(String::as_str),
        };
        match (actual, expected) {
            (None, _) => return false,
            (Some(_), None) => {}
            (Some(actual), Some(expected)) if actual == expected => {}
            _ => return false,
        }
    }
    true
}

fn parse_simple_selector(selector: &str) -> Option<SimpleSelector> {
    let selector = selector.trim();
    if selector.is_empty() || selector.contains(char::is_whitespace) {
        return None;
    }
    // Combinators and pseudo-selectors are out of scope for the safe
    // matcher; treat them as unparseable.
    if selector.contains('>') || selector.contains('~') || selector.contains('+') {
        return None;
    }
    if selector.contains(':') {
        return None;
    }

    let mut parsed = SimpleSelector::default();
    let mut chars = selector.chars().peekable();

    if matches!(chars.peek(), Some(c) if c.is_ascii_alphabetic() || *c == '*') {
        let mut tag = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_alphanumeric() || c == '-' || c == '*' {
                tag.push(c);
                chars.next();
            } else {
                break;
            }
        }
        if tag != "*" {
            parsed.tag = Some(tag);
        }
    }

    while let Some(&c) = chars.peek() {
        match c {
            '#' => {
                chars.next();
                let ident = take_identifier(&mut chars)?;
                parsed.id = Some(ident);
            }
            '.' => {
                chars.next();
                let ident = take_identifier(&mut chars)?;
                parsed.classes.push(ident);
            }
            '[' => {
                chars.next();
                let mut body = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    body.push(c);
                }
                if !closed || body.is_empty() {
                    return None;
                }
                match body.split_once('=') {
                    Some((name, value)) => {
                        let value = value.trim_matches('"').trim_matches('\'');
                        parsed
                            .attributes
                            .push((name.trim().to_string(), Some(value.to_string())));
                    }
                    None => parsed.attributes.push((body.trim().to_string(), None)),
                }
            }
            _ => return None,
        }
    }

    if parsed.tag.is_none()
        && parsed.id.is_none()
        && parsed.classes.is_empty()
        && parsed.attributes.is_empty()
    {
        return None;
    }
    Some(parsed)
}

fn take_identifier(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<String> {
    let mut ident = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            ident.push(c);
            chars.next();
        } else {
            break;
        }
    }
    if ident.is_empty() { None } else { Some(ident) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn banner() -> NodeSnapshot {
        NodeSnapshot::new(1, "div")
            .with_id("banner")
            .with_classes(&["toast", "toast-success"])
            .with_attribute("data-temp", "1")
    }

    #[test]
    fn test_matches_tag_id_class() {
        let node = banner();
        assert!(matches_simple_selector(&node, "div"));
        assert!(matches_simple_selector(&node, "#banner"));
        assert!(matches_simple_selector(&node, "div.toast"));
        assert!(matches_simple_selector(&node, "div.toast.toast-success"));
        assert!(!matches_simple_selector(&node, "span.toast"));
        assert!(!matches_simple_selector(&node, ".missing"));
    }

    #[test]
    fn test_matches_attribute_forms() {
        let node = NodeSnapshot::new(2, "li")
            .with_test_id("row-4")
            .with_role("listitem")
            .with_attribute("data-temp", "x");
        assert!(matches_simple_selector(&node, "[data-testid=\"row-4\"]"));
        assert!(matches_simple_selector(&node, "[role=listitem]"));
        assert!(matches_simple_selector(&node, "[data-temp]"));
        assert!(!matches_simple_selector(&node, "[data-temp=\"y\"]"));
    }

    #[test]
    fn test_invalid_selector_is_non_match() {
        let node = banner();
        // Unsupported or malformed syntax never matches and never panics.
        assert!(!matches_simple_selector(&node, "div > span"));
        assert!(!matches_simple_selector(&node, "div:hover"));
        assert!(!matches_simple_selector(&node, "[unclosed"));
        assert!(!matches_simple_selector(&node, ""));
        assert!(!matches_simple_selector(&node, "div..double"));
    }

    #[test]
    fn test_inspector_defaults_unknown_to_disconnected() {
        let inspector = DomStateInspector::new(1280.0, 720.0)
            .connected(1, BoundingBox::new(0.0, 0.0, 100.0, 20.0));
        assert!(inspector.is_connected(1));
        assert!(!inspector.is_connected(99));
        assert!(inspector.bounding_box(99).is_none());
        assert_eq!(inspector.viewport(), (1280.0, 720.0));
    }

    #[test]
    fn test_near_zero_bbox() {
        assert!(BoundingBox::new(0.0, 0.0, 0.5, 40.0).is_near_zero());
        assert!(!BoundingBox::new(0.0, 0.0, 10.0, 10.0).is_near_zero());
    }
}
