pub mod collector;
pub mod listeners;
pub mod types;

pub use collector::{CollectorConfig, EventCollector, RecordingState, TickOutcome};
pub use listeners::{is_sensitive_field, normalize, DomEventPayload, MASKED_VALUE};
pub use types::{ElementInfo, InputSource, Modifiers, MouseButton, RawEvent, RawEventKind};
