//! Test suites for the quay daemon.

pub(crate) mod support;
