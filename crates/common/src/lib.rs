//! Common utilities for usbip-autoredir
//!
//! This crate provides functionality shared by the auto-redirection daemon and
//! the TLS proxy: the device filter engine and its rule-file format, the
//! external command runner used to drive the USB/IP control utility, error
//! types, logging setup, configuration helpers and systemd integration.

pub mod command;
pub mod duration;
pub mod error;
pub mod filter;
pub mod logging;
pub mod service;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use command::{CommandOutput, CommandRunner, SystemRunner, command_line};
pub use error::{CommandError, Error, Result};
pub use filter::{
    Disposition, FilterRule, RuleList, RuleMatch, RuleParseError, filter_devices, glob_match,
    load_rules_file, load_rules_or_empty, matches, parse_rules,
};
pub use logging::setup_logging;
