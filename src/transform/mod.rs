pub mod selector;
pub mod steps;
pub mod transformer;

pub use selector::{best_selector, is_hash_like_id, is_stable_class, rank_candidates};
pub use steps::{
    ApiExpectation, ApiMatch, ScenarioDoc, ScenarioError, ScenarioMeta, Selector,
    SelectorCandidate, SelectorStrategy, Step, StepAction, Viewport, AST_SCHEMA_VERSION,
};
pub use transformer::{merge_steps, strip_origin, transform_event, transform_events};
