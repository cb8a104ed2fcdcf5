pub mod assertions;
pub mod calls;

pub use assertions::{
    assertions_for_idle_window, generate_api_assertions, relevant_api_calls, AssertionConfig,
};
pub use calls::{shared_api_log, ApiCallLog, ApiRequest, ApiResponse, CapturedApiCall, SharedApiLog};
