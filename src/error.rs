use std::io;

use thiserror::Error;

/// Result type used across this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (socket, OS, etc.).
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A datagram could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// A datagram could not be decoded.
    #[error("protocol error: {0}")]
    ProtocolOwned(String),

    /// Authentication code could not be computed or verified.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(&'static str),

    /// Unsupported configuration or protocol feature.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// Invalid caller-supplied argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// No session is registered under the given id.
    #[error("session {0:#010x} not found")]
    SessionNotFound(u32),

    /// The session registry is at capacity.
    #[error("session limit of {0} reached")]
    SessionLimit(usize),

    /// The configuration file is unreadable or inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// The configuration file is not valid TOML for this crate.
    #[error("configuration error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// The power-controllable target rejected or failed an operation.
    #[error("target error: {0}")]
    Target(String),
}

impl Error {
    pub(crate) fn protocol_owned(msg: impl Into<String>) -> Self {
        Self::ProtocolOwned(msg.into())
    }

    pub(crate) fn target(msg: impl Into<String>) -> Self {
        Self::Target(msg.into())
    }
}
