pub mod dom;
pub mod idle;
pub mod mutations;

pub use dom::{matches_simple_selector, BoundingBox, DomInspector, DomStateInspector, NodeId, NodeSnapshot};
pub use idle::{IdleConfig, IdleDetector, IdleEpisode};
pub use mutations::{DomMutation, MutationConfig, MutationKind, MutationTracker, TrackedMutation};
