//! Test suites for the actions daemon.

pub(crate) mod support;
