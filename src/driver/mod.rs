pub mod chromium;

pub use chromium::{ChromiumDriver, ChromiumLaunchConfig};
