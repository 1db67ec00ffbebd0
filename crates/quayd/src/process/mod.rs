//! Foreground process supervision: bootstrap, serve, wait for a signal,
//! stop.

mod errors;
mod launch;
mod shutdown;

pub use errors::LaunchError;
pub use launch::{run_server, run_server_with};
pub use shutdown::{ShutdownError, ShutdownSignal, SystemShutdownSignal};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
