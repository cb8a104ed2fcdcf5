pub mod context;
pub mod driver;
pub mod executors;
pub mod player;
pub mod state;

pub use context::{substitute, ExecContext, PlayerOptions};
pub use driver::{Driver, DriverError, DriverResult, MockDriver};
pub use executors::{execute_step, ExecError, ExecResult};
pub use player::{PlayerControl, PlayerError, PlayerResult, StepPlayer};
pub use state::{PlayerNotification, PlayerState, RunSummary, StepResult, StepStatus};
