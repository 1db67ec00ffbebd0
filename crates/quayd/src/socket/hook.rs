use std::fmt;
use std::net::SocketAddr;

use tracing::debug;

use super::{ConnectionId, SOCKET_TARGET};

type CloseCallback = Box<dyn FnOnce(ConnectionId) + Send>;

/// Action taken when a connection's last reference is released.
#[derive(Default)]
pub enum CloseHook {
    /// Do nothing.
    None,
    /// Log the release.
    #[default]
    Default,
    /// Run caller code.
    Custom(CloseCallback),
}

impl CloseHook {
    /// Wraps a closure.
    pub fn custom<F>(callback: F) -> Self
    where
        F: FnOnce(ConnectionId) + Send + 'static,
    {
        Self::Custom(Box::new(callback))
    }

    pub(super) fn run(self, id: ConnectionId, peer: SocketAddr) {
        match self {
            Self::None => {}
            Self::Default => debug!(
                target: SOCKET_TARGET,
                connection = %id,
                peer = %peer,
                "connection released"
            ),
            Self::Custom(callback) => callback(id),
        }
    }
}

impl fmt::Debug for CloseHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::None => "None",
            Self::Default => "Default",
            Self::Custom(_) => "Custom",
        };
        f.write_str(label)
    }
}
