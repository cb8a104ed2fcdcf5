//! The step AST: the immutable, typed units of a replayable scenario.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::events::types::{Modifiers, MouseButton};

/// Version stamped into persisted scenario documents.
pub const AST_SCHEMA_VERSION: u32 = 1;

/// How a selector value was derived.
///
/// Strategies are ordered by how resilient they are to markup churn;
/// the transformer always prefers the highest-ranked resolvable one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SelectorStrategy {
    TestId,
    AriaLabel,
    Role,
    Id,
    Name,
    Css,
    Xpath,
}

/// A resolvable element locator.
///
/// `value` is a query string: an XPath expression when it starts with
/// `//`, a CSS selector otherwise. The strategy records which rung of
/// the ranking chain produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    pub strategy: SelectorStrategy,
    pub value: String,
}

impl Selector {
    pub fn new(strategy: SelectorStrategy, value: impl Into<String>) -> Self {
        Self {
            strategy,
            value: value.into(),
        }
    }

    /// True when the value must be resolved as an XPath expression.
    pub fn is_xpath(&self) -> bool {
        self.value.starts_with("//")
    }
}

/// One ranked, scored strategy for locating an element later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorCandidate {
    #[serde(flatten)]
    pub selector: Selector,
    pub score: u32,
    /// `Some(true)` when a DOM-uniqueness check confirmed exactly one
    /// match, `None` when the check was not feasible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique: Option<bool>,
}

/// Network-call matcher carried by an `assertApi` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiMatch {
    /// Path plus query string; the origin is stripped for portability.
    pub url: String,
    pub method: String,
}

/// Expected response shape for an `assertApi` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiExpectation {
    pub status: u16,
}

/// One immutable unit of a replayable scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    /// Failures on optional steps downgrade to `skipped`.
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub action: StepAction,
}

impl Step {
    pub fn new(action: StepAction) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            optional: false,
            description: None,
            action,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// The selector the step targets, when its kind carries one.
    pub fn selector(&self) -> Option<&Selector> {
        match &self.action {
            StepAction::Click { selector, .. }
            | StepAction::Type { selector, .. }
            | StepAction::Hover { selector }
            | StepAction::Select { selector, .. }
            | StepAction::AssertElement { selector, .. } => Some(selector),
            StepAction::Keypress { selector, .. }
            | StepAction::Scroll { selector, .. }
            | StepAction::SnapshotDom { selector } => selector.as_ref(),
            StepAction::Navigate { .. } | StepAction::Wait { .. } | StepAction::AssertApi { .. } => {
                None
            }
        }
    }

    /// Discriminant string as persisted in the scenario document.
    pub fn kind_name(&self) -> &'static str {
        match self.action {
            StepAction::Navigate { .. } => "navigate",
            StepAction::Click { .. } => "click",
            StepAction::Type { .. } => "type",
            StepAction::Keypress { .. } => "keypress",
            StepAction::Wait { .. } => "wait",
            StepAction::Hover { .. } => "hover",
            StepAction::Scroll { .. } => "scroll",
            StepAction::Select { .. } => "select",
            StepAction::AssertApi { .. } => "assertApi",
            StepAction::AssertElement { .. } => "assertElement",
            StepAction::SnapshotDom { .. } => "snapshotDom",
        }
    }
}

/// Per-kind payload of a [`Step`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum StepAction {
    Navigate {
        /// Path + query + hash; no origin.
        url: String,
    },
    Click {
        selector: Selector,
        #[serde(default)]
        button: MouseButton,
        #[serde(default = "default_click_count")]
        click_count: u8,
        #[serde(default)]
        modifiers: Modifiers,
    },
    Type {
        selector: Selector,
        value: String,
        #[serde(default)]
        sensitive: bool,
    },
    Keypress {
        key: String,
        #[serde(default)]
        modifiers: Modifiers,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<Selector>,
    },
    Wait {
        ms: u64,
    },
    Hover {
        selector: Selector,
    },
    Scroll {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        x: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        y: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<Selector>,
    },
    Select {
        selector: Selector,
        value: String,
    },
    AssertApi {
        #[serde(rename = "match")]
        matcher: ApiMatch,
        expect: ApiExpectation,
        #[serde(default)]
        wait_for: bool,
    },
    AssertElement {
        selector: Selector,
        #[serde(default = "default_true")]
        exists: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    SnapshotDom {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<Selector>,
    },
}

fn default_click_count() -> u8 {
    1
}

fn default_true() -> bool {
    true
}

/// Viewport dimensions recorded with a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Metadata block of a persisted scenario document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioMeta {
    pub recorded_at: DateTime<Utc>,
    /// Page URL the recording started on.
    pub url: String,
    pub viewport: Viewport,
    pub ast_schema_version: u32,
}

/// The persisted scenario document.
///
/// Compatibility requires preserving each step's `type` discriminant
/// and its per-type fields exactly; see [`StepAction`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioDoc {
    pub id: String,
    pub meta: ScenarioMeta,
    pub steps: Vec<Step>,
}

impl ScenarioDoc {
    pub fn new(url: impl Into<String>, viewport: Viewport, steps: Vec<Step>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            meta: ScenarioMeta {
                recorded_at: Utc::now(),
                url: url.into(),
                viewport,
                ast_schema_version: AST_SCHEMA_VERSION,
            },
            steps,
        }
    }

    /// Load a scenario document from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Save the document as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), ScenarioError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Error types for scenario persistence.
#[derive(Debug)]
pub enum ScenarioError {
    /// I/O error
    Io(std::io::Error),
    /// Serialization error
    Serialization(serde_json::Error),
}

impl std::fmt::Display for ScenarioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScenarioError::Io(err) => write!(f, "I/O error: {}", err),
            ScenarioError::Serialization(err) => write!(f, "Serialization error: {}", err),
        }
    }
}

impl std::error::Error for ScenarioError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScenarioError::Io(err) => Some(err),
            ScenarioError::Serialization(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for ScenarioError {
    fn from(err: std::io::Error) -> Self {
        ScenarioError::Io(err)
    }
}

impl From<serde_json::Error> for ScenarioError {
    fn from(err: serde_json::Error) -> Self {
        ScenarioError::Serialization(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn css(value: &str) -> Selector {
        Selector::new(SelectorStrategy::Css, value)
    }

    #[test]
    fn test_step_type_discriminants() {
        let step = Step::new(StepAction::AssertApi {
            matcher: ApiMatch {
                url: "/api/items?page=2".to_string(),
                method: "POST".to_string(),
            },
            expect: ApiExpectation { status: 201 },
            wait_for: true,
        });
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["type"], "assertApi");
        assert_eq!(json["match"]["method"], "POST");
        assert_eq!(json["expect"]["status"], 201);
        assert_eq!(json["waitFor"], true);

        let snap = Step::new(StepAction::SnapshotDom { selector: None });
        assert_eq!(
            serde_json::to_value(&snap).unwrap()["type"],
            "snapshotDom"
        );
    }

    #[test]
    fn test_type_step_roundtrip() {
        let step = Step::new(StepAction::Type {
            selector: css("#email"),
            value: "user@example.com".to_string(),
            sensitive: false,
        });
        let json = serde_json::to_string(&step).unwrap();
        let back: Step = serde_json::from_str(&json).unwrap();
        assert_eq!(back, step);
        assert_eq!(back.kind_name(), "type");
    }

    #[test]
    fn test_selector_xpath_detection() {
        assert!(Selector::new(SelectorStrategy::Xpath, "//button[1]").is_xpath());
        assert!(!css("button.primary").is_xpath());
    }

    #[test]
    fn test_scenario_doc_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenario.json");

        let doc = ScenarioDoc::new(
            "https://app.example/login",
            Viewport {
                width: 1280,
                height: 720,
            },
            vec![
                Step::new(StepAction::Navigate {
                    url: "/login".to_string(),
                }),
                Step::new(StepAction::Click {
                    selector: css("[data-testid=\"submit\"]"),
                    button: MouseButton::Left,
                    click_count: 1,
                    modifiers: Modifiers::default(),
                }),
            ],
        );
        doc.save(&path).unwrap();

        let loaded = ScenarioDoc::load(&path).unwrap();
        assert_eq!(loaded, doc);
        assert_eq!(loaded.meta.ast_schema_version, AST_SCHEMA_VERSION);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"recordedAt\""));
        assert!(raw.contains("\"astSchemaVersion\""));
    }
}
