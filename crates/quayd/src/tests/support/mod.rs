//! Test harness utilities shared by the daemon suites.

mod config_loader;
mod net;
mod reporter;
mod server_world;
mod shutdown;

pub(crate) use config_loader::{FailingConfigLoader, TestConfigLoader};
pub(crate) use net::{
    FrameBuilder, Recorder, assert_closed, assert_silent, connect, detached_socket, read_frame,
    read_reply, socket_pair, write_in_chunks,
};
pub(crate) use reporter::{HealthEvent, RecordingHealthReporter};
pub(crate) use shutdown::TestShutdownSignal;
pub(crate) use server_world::{ServerWorld, world};
