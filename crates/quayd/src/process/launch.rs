//! Supervises server launch sequencing and runtime orchestration.

use tracing::{info, warn};

use crate::bootstrap::{ConfigLoader, SystemConfigLoader, bootstrap_with};
use crate::health::{HealthReporter, StructuredHealthReporter};

use super::PROCESS_TARGET;
use super::errors::LaunchError;
use super::shutdown::{ShutdownSignal, SystemShutdownSignal};

/// Runs the server with the production collaborators until a termination
/// signal arrives.
///
/// # Errors
///
/// Returns [`LaunchError`] when bootstrap, binding or signal handling fails.
pub fn run_server() -> Result<(), LaunchError> {
    run_server_with(
        &SystemConfigLoader,
        &StructuredHealthReporter::new(),
        &SystemShutdownSignal::new(),
    )
}

/// Runs the server with injected collaborators.
///
/// # Errors
///
/// Returns [`LaunchError`] when bootstrap, binding or signal handling fails.
pub fn run_server_with(
    loader: &dyn ConfigLoader,
    reporter: &dyn HealthReporter,
    shutdown: &dyn ShutdownSignal,
) -> Result<(), LaunchError> {
    let server = bootstrap_with(loader, reporter)?;
    info!(
        target: PROCESS_TARGET,
        endpoint = %server.config().listen_endpoint(),
        "starting server runtime"
    );
    let running = server.start()?;
    reporter.server_listening(running.local_addr());

    let waited = shutdown.wait();
    if let Err(error) = &waited {
        warn!(
            target: PROCESS_TARGET,
            error = %error,
            "shutdown signal unavailable, stopping"
        );
    }
    let sessions = running.shutdown()?;
    reporter.server_stopped(sessions);
    waited?;
    info!(
        target: PROCESS_TARGET,
        "shutdown sequence completed"
    );
    Ok(())
}
