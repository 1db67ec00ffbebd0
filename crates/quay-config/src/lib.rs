//! Layered configuration for the quay daemon.
//!
//! Values resolve, lowest precedence first, from built-in defaults, an
//! optional configuration file (`--config-path`), `QUAY_*` environment
//! variables and command-line flags.

mod defaults;
mod logging;

use std::ffi::OsString;
use std::sync::Arc;
use std::time::Duration;

use ortho_config::{OrthoConfig, OrthoError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use defaults::{
    DEFAULT_LISTEN_HOST, DEFAULT_LISTEN_PORT, DEFAULT_LOG_FILTER, DEFAULT_PARTIAL_FRAME_TIMEOUT_MS,
    DEFAULT_QUEUE_BUSY_THRESHOLD, DEFAULT_QUEUE_REPORT_INTERVAL, DEFAULT_QUEUE_WARNING_THRESHOLD,
    default_listen_host, default_listen_port, default_log_filter, default_log_filter_string,
    default_log_format, default_partial_frame_timeout_ms, default_queue_busy_threshold,
    default_queue_report_interval, default_queue_warning_threshold,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Resolved daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "QUAY")]
pub struct Config {
    /// Host or address the TCP listener binds.
    #[serde(default = "default_listen_host")]
    #[ortho_config(default = default_listen_host())]
    listen_host: String,
    /// TCP port the listener binds; zero picks an ephemeral port.
    #[serde(default = "default_listen_port")]
    #[ortho_config(default = default_listen_port())]
    listen_port: u16,
    /// `tracing` filter expression.
    #[serde(default = "default_log_filter_string")]
    #[ortho_config(default = default_log_filter_string())]
    log_filter: String,
    /// Log output format.
    #[serde(default = "default_log_format")]
    #[ortho_config(default = default_log_format())]
    log_format: LogFormat,
    /// Queue size above which admission logs warnings.
    #[serde(default = "default_queue_warning_threshold")]
    #[ortho_config(default = default_queue_warning_threshold())]
    queue_warning_threshold: usize,
    /// Queue size above which requests are refused as busy.
    #[serde(default = "default_queue_busy_threshold")]
    #[ortho_config(default = default_queue_busy_threshold())]
    queue_busy_threshold: usize,
    /// Admission messages are logged once per this many observations.
    #[serde(default = "default_queue_report_interval")]
    #[ortho_config(default = default_queue_report_interval())]
    queue_report_interval: usize,
    /// Idle time after which a partially received frame closes its
    /// connection; zero disables the check.
    #[serde(default = "default_partial_frame_timeout_ms")]
    #[ortho_config(default = default_partial_frame_timeout_ms())]
    partial_frame_timeout_ms: u64,
    /// Module names advertised to clients through the client-module query.
    #[serde(default)]
    client_modules: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_host: default_listen_host(),
            listen_port: default_listen_port(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            queue_warning_threshold: default_queue_warning_threshold(),
            queue_busy_threshold: default_queue_busy_threshold(),
            queue_report_interval: default_queue_report_interval(),
            partial_frame_timeout_ms: default_partial_frame_timeout_ms(),
            client_modules: Vec::new(),
        }
    }
}

/// Semantic problems found after the layers merged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The busy threshold must sit above the warning threshold.
    #[error("queue busy threshold {busy} must be greater than the warning threshold {warning}")]
    Thresholds {
        /// Configured warning threshold.
        warning: usize,
        /// Configured busy threshold.
        busy: usize,
    },
    /// A zero interval would divide by zero.
    #[error("queue report interval must be at least 1")]
    ReportInterval,
}

impl Config {
    /// Loads configuration from the process arguments, environment and files.
    ///
    /// # Errors
    ///
    /// Returns the loader error when a layer cannot be read or parsed.
    pub fn load() -> Result<Self, Arc<OrthoError>> {
        Self::load_from_iter(std::env::args_os())
    }

    /// Loads configuration treating `args` as the command line.
    ///
    /// # Errors
    ///
    /// Returns the loader error when a layer cannot be read or parsed.
    pub fn load_from_iter<I, T>(args: I) -> Result<Self, Arc<OrthoError>>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as OrthoConfig>::load_from_iter(args)
    }

    /// Checks relationships between values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the admission thresholds are inverted or
    /// the report interval is zero.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_busy_threshold <= self.queue_warning_threshold {
            return Err(ConfigError::Thresholds {
                warning: self.queue_warning_threshold,
                busy: self.queue_busy_threshold,
            });
        }
        if self.queue_report_interval == 0 {
            return Err(ConfigError::ReportInterval);
        }
        Ok(())
    }

    /// Host the listener binds.
    #[must_use]
    pub fn listen_host(&self) -> &str {
        &self.listen_host
    }

    /// Port the listener binds.
    #[must_use]
    pub const fn listen_port(&self) -> u16 {
        self.listen_port
    }

    /// `host:port` form of the listen address, for logs.
    #[must_use]
    pub fn listen_endpoint(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }

    /// `tracing` filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Warning threshold for queue admission.
    #[must_use]
    pub const fn queue_warning_threshold(&self) -> usize {
        self.queue_warning_threshold
    }

    /// Busy threshold for queue admission.
    #[must_use]
    pub const fn queue_busy_threshold(&self) -> usize {
        self.queue_busy_threshold
    }

    /// Interval between repeated admission messages.
    #[must_use]
    pub const fn queue_report_interval(&self) -> usize {
        self.queue_report_interval
    }

    /// Partial frame idle timeout, `None` when disabled.
    #[must_use]
    pub const fn partial_frame_timeout(&self) -> Option<Duration> {
        if self.partial_frame_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.partial_frame_timeout_ms))
        }
    }

    /// Module names served to clients.
    #[must_use]
    pub fn client_modules(&self) -> &[String] {
        &self.client_modules
    }

    /// Overrides the listen address.
    #[must_use]
    pub fn with_listen(mut self, host: impl Into<String>, port: u16) -> Self {
        self.listen_host = host.into();
        self.listen_port = port;
        self
    }

    /// Overrides the admission thresholds.
    #[must_use]
    pub const fn with_queue_thresholds(mut self, warning: usize, busy: usize) -> Self {
        self.queue_warning_threshold = warning;
        self.queue_busy_threshold = busy;
        self
    }

    /// Overrides the advertised client modules.
    #[must_use]
    pub fn with_client_modules<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.client_modules = modules.into_iter().map(Into::into).collect();
        self
    }

    /// Overrides the partial frame timeout, rounding up to whole
    /// milliseconds so a non-zero duration never disables the check.
    #[must_use]
    pub fn with_partial_frame_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.partial_frame_timeout_ms = timeout
            .map(|duration| {
                u64::try_from(duration.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX)
            })
            .unwrap_or_default();
        self
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.listen_endpoint(), "0.0.0.0:5000");
        assert_eq!(config.partial_frame_timeout(), None);
        assert!(config.client_modules().is_empty());
    }

    #[rstest]
    #[case(10, 10)]
    #[case(20, 10)]
    fn inverted_thresholds_are_rejected(#[case] warning: usize, #[case] busy: usize) {
        let config = Config::default().with_queue_thresholds(warning, busy);
        assert_eq!(
            config.validate(),
            Err(ConfigError::Thresholds { warning, busy })
        );
    }

    #[test]
    fn timeout_round_trips_through_millis() {
        let config =
            Config::default().with_partial_frame_timeout(Some(Duration::from_millis(1500)));
        assert_eq!(
            config.partial_frame_timeout(),
            Some(Duration::from_millis(1500))
        );
        let disabled = config.with_partial_frame_timeout(None);
        assert_eq!(disabled.partial_frame_timeout(), None);
    }

    #[rstest]
    #[case(Duration::from_micros(1), 1)]
    #[case(Duration::from_micros(999), 1)]
    #[case(Duration::from_micros(1001), 2)]
    #[case(Duration::ZERO, 0)]
    fn sub_millisecond_timeouts_round_up(#[case] timeout: Duration, #[case] millis: u64) {
        let config = Config::default().with_partial_frame_timeout(Some(timeout));
        let expected = (millis > 0).then_some(Duration::from_millis(millis));
        assert_eq!(config.partial_frame_timeout(), expected);
    }

    #[test]
    fn bare_command_line_resolves_to_defaults() {
        let config = Config::load_from_iter(["quayd"]).expect("defaults load");
        assert_eq!(config.listen_port(), DEFAULT_LISTEN_PORT);
        assert_eq!(config.queue_busy_threshold(), DEFAULT_QUEUE_BUSY_THRESHOLD);
        assert_eq!(config.log_format(), default_log_format());
        assert!(config.client_modules().is_empty());
    }
}
