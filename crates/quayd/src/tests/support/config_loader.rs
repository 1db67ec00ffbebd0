//! Configuration loaders for scenarios covering success and failure paths.

use std::ffi::OsString;
use std::sync::Arc;

use ortho_config::OrthoError;

use quay_config::Config;

use crate::bootstrap::ConfigLoader;

/// Loader that binds an ephemeral loopback port.
#[derive(Debug, Clone)]
pub(crate) struct TestConfigLoader {
    config: Config,
}

impl TestConfigLoader {
    pub(crate) fn new() -> Self {
        Self {
            config: Config::default().with_listen("127.0.0.1", 0),
        }
    }

    /// Applies further overrides on top of the loopback listen address.
    pub(crate) fn with(mut self, adjust: impl FnOnce(Config) -> Config) -> Self {
        self.config = adjust(self.config);
        self
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Loader that fails by passing a malformed command line.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("quayd"),
            OsString::from("--listen-port"),
            OsString::from("not-a-port"),
        ];
        Config::load_from_iter(args)
    }
}
