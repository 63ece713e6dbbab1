//! Error types shared by the transaction engine and device operations

use thiserror::Error;

/// Modem error types
#[derive(Error, Debug)]
pub enum ModemError {
    /// No matching line arrived before the deadline
    #[error("Timeout")]
    Timeout,

    /// Malformed framing or an unparseable mandatory field
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The device answered `REJECT` or `NO CARRIER4NP`
    #[error("Rejected by device: {0}")]
    DeviceRejected(String),

    /// Underlying stream read/write failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Data channel or connection already in use
    #[error("Resource conflict: {0}")]
    ResourceConflict(String),

    /// Caller supplied an argument the device cannot accept
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// GPIO/status collaborator failure
    #[error("Status control error: {0}")]
    Status(String),

    /// The signal reader task is gone
    #[error("Signal channel closed")]
    ChannelClosed,
}

impl ModemError {
    /// Shorthand for [`ModemError::Protocol`]
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Is this a timeout?
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

impl From<tokio_serial::Error> for ModemError {
    fn from(err: tokio_serial::Error) -> Self {
        match err.kind() {
            tokio_serial::ErrorKind::Io(kind) => Self::Io(std::io::Error::new(kind, err.description)),
            tokio_serial::ErrorKind::NoDevice => Self::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                err.description,
            )),
            _ => Self::Io(std::io::Error::new(std::io::ErrorKind::Other, err.description)),
        }
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, ModemError>;
