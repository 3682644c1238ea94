//! Error types for sensor box device operations.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for sensor box operations.
pub type Result<T> = std::result::Result<T, RigError>;

/// Error types for particle counter and stepper controller communication.
#[derive(Error, Debug)]
pub enum RigError {
    /// Serial port could not be opened or configured
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    /// General I/O error on an open link
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport unusable (closed channel, bad port)
    #[error("Connection error: {0}")]
    Connection(String),

    /// An expected acknowledge, idle report or data did not arrive in time
    #[error("Timed out after {timeout:?} waiting for {waiting_for}")]
    Timeout {
        /// What the caller was waiting for
        waiting_for: String,
        /// Deadline that expired
        timeout: Duration,
    },

    /// Telemetry line without exactly one `=` separator
    #[error("Couldn't parse data {line:?}")]
    Parse {
        /// Offending raw line
        line: String,
    },

    /// Device response violated a structural invariant
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Operation requires a homed controller
    #[error("Invalid state: {0}")]
    State(String),

    /// Unknown position name or invalid parameters
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Broad failure category, for callers deciding between retry and abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transport could not be opened or used
    Connection,
    /// Acknowledge, idle report or data missed its deadline
    Timeout,
    /// Malformed telemetry line
    Parse,
    /// Device response broke a structural invariant
    Protocol,
    /// Controller not homed
    State,
    /// Unknown position or invalid parameters
    Config,
}

impl RigError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RigError::SerialPort(_) | RigError::Io(_) | RigError::Connection(_) => {
                ErrorKind::Connection
            }
            RigError::Timeout { .. } => ErrorKind::Timeout,
            RigError::Parse { .. } => ErrorKind::Parse,
            RigError::Protocol(_) => ErrorKind::Protocol,
            RigError::State(_) => ErrorKind::State,
            RigError::Config(_) => ErrorKind::Config,
        }
    }

    pub(crate) fn timeout(waiting_for: impl Into<String>, timeout: Duration) -> Self {
        RigError::Timeout {
            waiting_for: waiting_for.into(),
            timeout,
        }
    }
}
