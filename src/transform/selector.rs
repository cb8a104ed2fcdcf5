//! Selector-candidate ranking.
//!
//! Each captured element resolves through a ranked strategy chain:
//! testId > aria-label(+role) > role(+visible text) > id > name >
//! stable classes > nth-child CSS > xpath fallback. Every candidate
//! carries a priority score and, where the inspector can answer, a
//! DOM-uniqueness check.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::detect::dom::DomInspector;
use crate::events::types::ElementInfo;
use crate::transform::steps::{Selector, SelectorCandidate, SelectorStrategy};

pub const PRIORITY_TEST_ID: u32 = 100;
pub const PRIORITY_ARIA_LABEL: u32 = 90;
pub const PRIORITY_ROLE: u32 = 80;
pub const PRIORITY_ID: u32 = 70;
pub const PRIORITY_NAME: u32 = 60;
pub const PRIORITY_CLASS: u32 = 50;
pub const PRIORITY_NTH_CHILD: u32 = 40;
pub const PRIORITY_XPATH: u32 = 10;

/// Ids that look generated (numeric, uuid, hex hashes, React useId)
/// make unstable selectors.
static HASH_LIKE_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        ^\d+$ |
        ^[0-9a-fA-F-]{8,}$ |
        ^:.*:$ |
        [0-9a-f]{8}-[0-9a-f]{4}",
    )
    .expect("hash-like id pattern is valid")
});

/// Class names minted by CSS-in-JS tooling or content hashing. BEM
/// names like `card__header` stay stable; a digit in the `__` suffix
/// marks a generated one.
static DYNAMIC_CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        ^(css|sc|jss|emotion|chakra)- |
        __[A-Za-z0-9]*\d[A-Za-z0-9]*$ |
        [0-9a-f]{8,}",
    )
    .expect("dynamic class pattern is valid")
});

/// True when a class name is stable enough to select on.
pub fn is_stable_class(class: &str) -> bool {
    !class.is_empty() && !DYNAMIC_CLASS.is_match(class)
}

/// True when an id looks auto-generated and should not be selected on.
pub fn is_hash_like_id(id: &str) -> bool {
    HASH_LIKE_ID.is_match(id)
}

/// Escape a value for use inside a double-quoted CSS attribute selector.
fn escape_attribute(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Build the ranked candidate list for one captured element.
///
/// When an inspector is supplied, each CSS candidate gets a uniqueness
/// check; candidates the inspector cannot answer for stay unknown.
pub fn rank_candidates(
    info: &ElementInfo,
    inspector: Option<&dyn DomInspector>,
) -> Vec<SelectorCandidate> {
    let mut candidates = Vec::new();
    let tag = info.tag_name.to_ascii_lowercase();

    if let Some(test_id) = &info.test_id {
        candidates.push(candidate(
            SelectorStrategy::TestId,
            format!("[data-testid=\"{}\"]", escape_attribute(test_id)),
            PRIORITY_TEST_ID,
        ));
    }

    if let Some(label) = &info.aria_label {
        let value = match &info.role {
            Some(role) => format!(
                "[role=\"{}\"][aria-label=\"{}\"]",
                escape_attribute(role),
                escape_attribute(label)
            ),
            None => format!("[aria-label=\"{}\"]", escape_attribute(label)),
        };
        candidates.push(candidate(SelectorStrategy::AriaLabel, value, PRIORITY_ARIA_LABEL));
    }

    if let Some(role) = &info.role {
        let visible_text = info
            .text_content
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty() && t.len() <= 60);
        let value = match visible_text {
            // Text matching needs XPath; CSS cannot express it.
            Some(text) => format!(
                "//*[@role='{}'][normalize-space()='{}']",
                role.replace('\'', ""),
                text.replace('\'', "")
            ),
            None => format!("[role=\"{}\"]", escape_attribute(role)),
        };
        candidates.push(candidate(SelectorStrategy::Role, value, PRIORITY_ROLE));
    }

    if let Some(id) = &info.id {
        if !is_hash_like_id(id) {
            candidates.push(candidate(
                SelectorStrategy::Id,
                format!("#{}", id),
                PRIORITY_ID,
            ));
        }
    }

    if let Some(name) = info.name.as_deref().or(info.attribute("name")) {
        candidates.push(candidate(
            SelectorStrategy::Name,
            format!("{}[name=\"{}\"]", tag, escape_attribute(name)),
            PRIORITY_NAME,
        ));
    }

    let stable: Vec<&String> = info
        .class_names
        .iter()
        .filter(|c| is_stable_class(c))
        .take(2)
        .collect();
    if !stable.is_empty() {
        let mut value = tag.clone();
        for class in stable {
            value.push('.');
            value.push_str(class);
        }
        candidates.push(candidate(SelectorStrategy::Css, value, PRIORITY_CLASS));
    }

    if let Some(value) = nth_child_css(info) {
        candidates.push(candidate(SelectorStrategy::Css, value, PRIORITY_NTH_CHILD));
    }

    if let Some(xpath) = &info.xpath {
        candidates.push(candidate(
            SelectorStrategy::Xpath,
            xpath.clone(),
            PRIORITY_XPATH,
        ));
    }

    if let Some(inspector) = inspector {
        for c in &mut candidates {
            if !c.selector.is_xpath() {
                c.unique = inspector.count_matches(&c.selector.value).map(|n| n == 1);
            }
        }
    }

    candidates.sort_by(|a, b| b.score.cmp(&a.score));
    candidates
}

/// Resolve the best stable selector for a captured element.
///
/// The highest-priority candidate not proven ambiguous wins; an element
/// with no candidates at all (no tag is impossible, so only an empty
/// descriptor) yields `None`.
pub fn best_selector(info: &ElementInfo, inspector: Option<&dyn DomInspector>) -> Option<Selector> {
    let candidates = rank_candidates(info, inspector);
    candidates
        .iter()
        .find(|c| c.unique != Some(false))
        .or_else(|| candidates.first())
        .map(|c| c.selector.clone())
}

fn candidate(strategy: SelectorStrategy, value: String, score: u32) -> SelectorCandidate {
    SelectorCandidate {
        selector: Selector::new(strategy, value),
        score,
        unique: None,
    }
}

/// Positional CSS fallback: parent tag (when known) plus nth-child.
fn nth_child_css(info: &ElementInfo) -> Option<String> {
    if info.tag_name.is_empty() {
        return None;
    }
    let tag = info.tag_name.to_ascii_lowercase();
    let position = info.sibling_index + 1;
    match info.parent.as_deref() {
        Some(parent) => Some(format!(
            "{} > {}:nth-child({})",
            parent.tag_name.to_ascii_lowercase(),
            tag,
            position
        )),
        None => Some(format!("{}:nth-child({})", tag, position)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::dom::DomStateInspector;
    use pretty_assertions::assert_eq;

    fn full_element() -> ElementInfo {
        let mut info = ElementInfo::for_tag("button");
        info.test_id = Some("submit-order".to_string());
        info.id = Some("order-submit".to_string());
        info.role = Some("button".to_string());
        info.aria_label = Some("Submit order".to_string());
        info.class_names = vec!["btn".to_string(), "btn-primary".to_string()];
        info.xpath = Some("//form/button[1]".to_string());
        info
    }

    #[test]
    fn test_test_id_always_wins() {
        let selector = best_selector(&full_element(), None).unwrap();
        assert_eq!(selector.strategy, SelectorStrategy::TestId);
        assert_eq!(selector.value, "[data-testid=\"submit-order\"]");
    }

    #[test]
    fn test_chain_order_without_test_id() {
        let mut info = full_element();
        info.test_id = None;
        let candidates = rank_candidates(&info, None);
        let strategies: Vec<SelectorStrategy> =
            candidates.iter().map(|c| c.selector.strategy).collect();
        assert_eq!(
            strategies,
            vec![
                SelectorStrategy::AriaLabel,
                SelectorStrategy::Role,
                SelectorStrategy::Id,
                SelectorStrategy::Css,
                SelectorStrategy::Css,
                SelectorStrategy::Xpath,
            ]
        );
    }

    #[test]
    fn test_hash_like_ids_excluded() {
        for id in ["12345", "a3f9c2d84be1", ":r1:", "550e8400-e29b-41d4-a716-446655440000"] {
            assert!(is_hash_like_id(id), "{} should look generated", id);
        }
        assert!(!is_hash_like_id("order-submit"));
        assert!(!is_hash_like_id("sidebar"));

        let mut info = ElementInfo::for_tag("div");
        info.id = Some("12345".to_string());
        let candidates = rank_candidates(&info, None);
        assert!(candidates
            .iter()
            .all(|c| c.selector.strategy != SelectorStrategy::Id));
    }

    #[test]
    fn test_dynamic_classes_filtered() {
        assert!(is_stable_class("btn"));
        assert!(is_stable_class("btn-primary"));
        assert!(!is_stable_class("css-1x2y3z4a"));
        assert!(!is_stable_class("sc-bdVaJa"));
        assert!(!is_stable_class("Button__a1b2c3"));

        let mut info = ElementInfo::for_tag("div");
        info.class_names = vec![
            "css-9f8e7d6c".to_string(),
            "card".to_string(),
            "wide".to_string(),
            "tall".to_string(),
        ];
        let candidates = rank_candidates(&info, None);
        let class_candidate = candidates
            .iter()
            .find(|c| c.score == PRIORITY_CLASS)
            .unwrap();
        assert_eq!(class_candidate.selector.value, "div.card.wide");
    }

    #[test]
    fn test_role_with_text_uses_xpath_value() {
        let mut info = ElementInfo::for_tag("button");
        info.role = Some("button".to_string());
        info.text_content = Some(" Save ".to_string());
        let candidates = rank_candidates(&info, None);
        let role = candidates
            .iter()
            .find(|c| c.selector.strategy == SelectorStrategy::Role)
            .unwrap();
        assert_eq!(
            role.selector.value,
            "//*[@role='button'][normalize-space()='Save']"
        );
        assert!(role.selector.is_xpath());
    }

    #[test]
    fn test_uniqueness_demotes_ambiguous_candidates() {
        let mut info = ElementInfo::for_tag("input");
        info.name = Some("q".to_string());
        info.class_names = vec!["field".to_string()];

        let inspector = DomStateInspector::new(1280.0, 720.0)
            .selector_count("input[name=\"q\"]", 3)
            .selector_count("input.field", 1);

        let selector = best_selector(&info, Some(&inspector)).unwrap();
        assert_eq!(selector.value, "input.field");
    }

    #[test]
    fn test_nth_child_fallback() {
        let mut info = ElementInfo::for_tag("li");
        info.sibling_index = 2;
        info.sibling_count = 5;
        info.parent = Some(Box::new(ElementInfo::for_tag("ul")));
        let candidates = rank_candidates(&info, None);
        let positional = candidates
            .iter()
            .find(|c| c.score == PRIORITY_NTH_CHILD)
            .unwrap();
        assert_eq!(positional.selector.value, "ul > li:nth-child(3)");
    }

    #[test]
    fn test_attribute_escaping() {
        let mut info = ElementInfo::for_tag("button");
        info.aria_label = Some("Say \"hi\"".to_string());
        let candidates = rank_candidates(&info, None);
        assert_eq!(
            candidates[0].selector.value,
            "[aria-label=\"Say \\\"hi\\\"\"]"
        );
    }
}
