//! Common error types

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Failed to read rules file {path}: {source}")]
    RulesFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to run an external command at all
///
/// A command that runs and exits nonzero is not an error at this level; see
/// [`crate::CommandOutput::success`].
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command '{command}' timed out after {timeout:?}")]
    TimedOut {
        command: String,
        timeout: std::time::Duration,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
