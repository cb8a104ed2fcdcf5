//! Per-interaction-kind listener normalizers.
//!
//! The browser host delivers untyped listener payloads; each kind has a
//! normalizer that turns one payload into a semantically-typed
//! [`RawEvent`], masking sensitive input values before anything else
//! sees them. Payloads that cannot be typed are dropped: a filtering
//! decision, not an error.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::events::types::{
    ElementInfo, InputSource, Modifiers, MouseButton, RawEvent, RawEventKind,
};

/// Replacement for sensitive input values.
pub const MASKED_VALUE: &str = "***";

/// Field names/ids that mark an input as sensitive.
static SENSITIVE_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)
        password | passwd | pwd | secret | token | api[-_]?key |
        ssn | credit | card[-_]?number | cvv | cvc | \bpin\b | \botp\b",
    )
    .expect("sensitive field pattern is valid")
});

/// Untyped listener payload as delivered by the browser host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DomEventPayload {
    /// DOM event name: click, dblclick, input, change, blur, keydown,
    /// scroll, navigation.
    pub event: String,
    pub timestamp: i64,
    pub url: String,
    pub target: Option<ElementInfo>,
    pub button: Option<u8>,
    pub modifiers: Modifiers,
    pub value: Option<String>,
    pub previous_value: Option<String>,
    pub key: Option<String>,
    pub scroll_x: Option<f64>,
    pub scroll_y: Option<f64>,
    /// Navigation destination (full URL or path).
    pub to: Option<String>,
}

/// True when the element should have its values masked.
pub fn is_sensitive_field(target: &ElementInfo) -> bool {
    if target
        .attribute("type")
        .is_some_and(|t| t.eq_ignore_ascii_case("password"))
    {
        return true;
    }
    let name_hit = target
        .name
        .as_deref()
        .or(target.attribute("name"))
        .is_some_and(|n| SENSITIVE_FIELD.is_match(n));
    let id_hit = target.id.as_deref().is_some_and(|i| SENSITIVE_FIELD.is_match(i));
    name_hit || id_hit
}

/// Normalize one listener payload into a typed event, or drop it.
pub fn normalize(payload: DomEventPayload) -> Option<RawEvent> {
    let kind = match payload.event.as_str() {
        "click" => normalize_click(&payload, 1)?,
        "dblclick" => normalize_click(&payload, 2)?,
        "input" => normalize_input(&payload, InputSource::Tick)?,
        "change" => normalize_input(&payload, InputSource::Change)?,
        "blur" => normalize_input(&payload, InputSource::Blur)?,
        "keydown" => normalize_keyboard(&payload)?,
        "scroll" => normalize_scroll(&payload)?,
        "navigation" => RawEventKind::Navigation {
            to: payload.to.clone()?,
        },
        other => {
            trace!(event = other, "dropping unrecognized listener payload");
            return None;
        }
    };
    Some(RawEvent::new(payload.timestamp, payload.url, kind))
}

fn normalize_click(payload: &DomEventPayload, click_count: u8) -> Option<RawEventKind> {
    let target = payload.target.clone()?;
    let button = match payload.button {
        Some(1) => MouseButton::Middle,
        Some(2) => MouseButton::Right,
        _ => MouseButton::Left,
    };
    Some(RawEventKind::Click {
        target,
        button,
        click_count,
        modifiers: payload.modifiers,
    })
}

fn normalize_input(payload: &DomEventPayload, source: InputSource) -> Option<RawEventKind> {
    let mut target = payload.target.clone()?;
    let mut value = payload.value.clone().unwrap_or_default();
    let mut previous_value = payload.previous_value.clone().unwrap_or_default();

    // Mask before the values reach the event log; the transformer only
    // flags sensitivity, it never sees the cleartext.
    if is_sensitive_field(&target) {
        if !value.is_empty() {
            value = MASKED_VALUE.to_string();
        }
        if !previous_value.is_empty() {
            previous_value = MASKED_VALUE.to_string();
        }
        if target.attributes.contains_key("value") {
            target
                .attributes
                .insert("value".to_string(), MASKED_VALUE.to_string());
        }
    }

    Some(RawEventKind::Input {
        target,
        value,
        previous_value,
        source,
    })
}

fn normalize_keyboard(payload: &DomEventPayload) -> Option<RawEventKind> {
    let target = payload.target.clone()?;
    let key = payload.key.clone()?;
    Some(RawEventKind::Keyboard {
        target,
        key,
        modifiers: payload.modifiers,
    })
}

fn normalize_scroll(payload: &DomEventPayload) -> Option<RawEventKind> {
    let target = payload.target.clone()?;
    Some(RawEventKind::Scroll {
        target,
        scroll_x: payload.scroll_x.unwrap_or(0.0),
        scroll_y: payload.scroll_y.unwrap_or(0.0),
    })
}
