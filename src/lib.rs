//! Pushes an application-version profile update to every device listed in a
//! CSV batch file, over a bounded pool of concurrent workers.

pub mod batch;
pub mod cli;
pub mod client;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod hostname;
pub mod logging;
pub mod payload;

mod app;

pub use batch::run_batch;
pub use client::{EndpointConfig, UpdateClient, UpdateOutcome, Updater};
pub use device::{DeviceId, DeviceReader};
pub use dispatch::{BatchSummary, Dispatcher};
pub use error::BatchError;
pub use payload::{AppVersions, UpdatePayload};

#[inline(always)]
pub fn main() -> std::process::ExitCode {
    app::main()
}
