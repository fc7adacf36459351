//! OBD-II Error Types

use thiserror::Error;

/// Errors that can occur during OBD-II communication
#[derive(Debug, Clone, Error)]
pub enum ObdError {
    /// Transport could not be opened or written to
    #[error("Transport error: {0}")]
    Transport(String),

    /// Timeout waiting for response
    #[error("Timeout waiting for OBD response after {0}ms")]
    Timeout(u64),

    /// Response did not carry the expected PID header
    #[error("Cannot decode PID {pid:02X}: {reason}")]
    DecodeFailure { pid: u8, reason: String },

    /// PID not supported by vehicle
    #[error("PID {0:02X} not supported by vehicle")]
    PidNotSupported(u8),

    /// An adapter init command failed
    #[error("Adapter init failed at {command}: {message}")]
    InitFailed { command: String, message: String },

    /// No transport is bound
    #[error("OBD adapter not connected")]
    NotConnected,

    /// The transport dropped while a command was outstanding
    #[error("Link to OBD adapter lost")]
    LinkLost,

    /// A second transaction was started while one is pending
    #[error("Command channel busy: a transaction is already pending")]
    ChannelBusy,

    /// Operation not valid in the current session state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl From<std::io::Error> for ObdError {
    fn from(err: std::io::Error) -> Self {
        ObdError::Transport(err.to_string())
    }
}

impl From<tokio_serial::Error> for ObdError {
    fn from(err: tokio_serial::Error) -> Self {
        ObdError::Transport(err.to_string())
    }
}
