//! Default values shared by the configuration layers and the daemon.

use crate::logging::LogFormat;

/// Address the listener binds when none is configured.
pub const DEFAULT_LISTEN_HOST: &str = "0.0.0.0";

/// Port the listener binds when none is configured.
pub const DEFAULT_LISTEN_PORT: u16 = 5000;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Queue size above which admission starts logging warnings.
pub const DEFAULT_QUEUE_WARNING_THRESHOLD: usize = 512;

/// Queue size above which requests are refused as busy.
pub const DEFAULT_QUEUE_BUSY_THRESHOLD: usize = 1024;

/// Admission warnings are emitted once per this many observations.
pub const DEFAULT_QUEUE_REPORT_INTERVAL: usize = 100;

/// Partial frames never time out by default.
pub const DEFAULT_PARTIAL_FRAME_TIMEOUT_MS: u64 = 0;

/// Owned listen host used where allocation is required (e.g. serde).
pub fn default_listen_host() -> String {
    DEFAULT_LISTEN_HOST.to_owned()
}

/// Default listen port.
pub const fn default_listen_port() -> u16 {
    DEFAULT_LISTEN_PORT
}

/// Default log filter expression used by the binaries.
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Default warning threshold.
pub const fn default_queue_warning_threshold() -> usize {
    DEFAULT_QUEUE_WARNING_THRESHOLD
}

/// Default busy threshold.
pub const fn default_queue_busy_threshold() -> usize {
    DEFAULT_QUEUE_BUSY_THRESHOLD
}

/// Default report interval.
pub const fn default_queue_report_interval() -> usize {
    DEFAULT_QUEUE_REPORT_INTERVAL
}

/// Default partial frame timeout in milliseconds.
pub const fn default_partial_frame_timeout_ms() -> u64 {
    DEFAULT_PARTIAL_FRAME_TIMEOUT_MS
}
