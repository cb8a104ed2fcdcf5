pub mod browser;

pub use browser::{observe_network, CaptureBrowser, CaptureError, CaptureMessage, CaptureResult};
