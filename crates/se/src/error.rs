//! Error types for the secure element channel layer
//!
//! [`Error`] is the internal taxonomy used by terminals and channels.
//! [`ServiceError`] is what clients of a [`Session`](crate::Session) see; it
//! collapses the internal kinds into the codes of the service boundary.

use nexum_apdu_core::{CommandError, ResponseError};
use thiserror::Error;

use crate::access::{AccessControlError, Pid};
use crate::hal::HalError;

/// Result type for secure element operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type of the session boundary
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Errors raised by terminals and channels
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The secure element is not connected
    #[error("Secure Element is not connected")]
    NotConnected,

    /// Communication with the secure element failed
    #[error("I/O error: {0}")]
    Io(String),

    /// AID outside of the 5..=16 byte range
    #[error("AID out of range: {0} bytes")]
    InvalidAid(usize),

    /// The channel has been closed
    #[error("Channel is closed")]
    ChannelClosed,

    /// The session has been closed
    #[error("Session is closed")]
    SessionClosed,

    /// The channel carries no access decision
    #[error("Channel access not set")]
    NoAccessDecision,

    /// The channel belongs to another process
    #[error("Wrong caller: channel belongs to {expected:?}, called by {actual}")]
    WrongCaller {
        /// Process the channel was opened for
        expected: Option<Pid>,
        /// Process that made the call
        actual: Pid,
    },

    /// Malformed command APDU
    #[error(transparent)]
    Format(#[from] CommandError),

    /// Refused by access rules or a forbidden command
    #[error("Security error: {0}")]
    Security(String),

    /// Not supported by the secure element or this channel
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Selected applet not found
    #[error("No such element: {0}")]
    NotFound(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create an I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    /// Create a security error
    pub fn security(message: impl Into<String>) -> Self {
        Self::Security(message.into())
    }

    /// Create an unsupported operation error
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedOperation(message.into())
    }

    /// Whether the error denies the caller rather than reporting a failure
    pub const fn is_security(&self) -> bool {
        matches!(
            self,
            Self::Security(_) | Self::WrongCaller { .. } | Self::NoAccessDecision
        )
    }
}

impl From<HalError> for Error {
    fn from(error: HalError) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<ResponseError> for Error {
    fn from(error: ResponseError) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<AccessControlError> for Error {
    fn from(error: AccessControlError) -> Self {
        match error {
            AccessControlError::Denied(reason) => Self::Security(reason),
            AccessControlError::Io(reason) | AccessControlError::RulesUnavailable(reason) => {
                Self::Io(reason)
            }
        }
    }
}

/// Errors returned across the session boundary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// Communication failure, code [`ServiceError::IO_ERROR`]
    #[error("I/O error: {0}")]
    Io(String),

    /// Applet not found, code [`ServiceError::NO_SUCH_ELEMENT_ERROR`]
    #[error("No such element: {0}")]
    NoSuchElement(String),

    /// Caller not permitted
    #[error("Security exception: {0}")]
    Security(String),

    /// Object used after close
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Malformed argument
    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    /// Not supported
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
}

impl ServiceError {
    /// Service specific code for I/O failures
    pub const IO_ERROR: i32 = 1;
    /// Service specific code for a missing applet
    pub const NO_SUCH_ELEMENT_ERROR: i32 = 2;

    /// Service specific code, for the kinds that carry one
    pub const fn code(&self) -> Option<i32> {
        match self {
            Self::Io(_) => Some(Self::IO_ERROR),
            Self::NoSuchElement(_) => Some(Self::NO_SUCH_ELEMENT_ERROR),
            _ => None,
        }
    }
}

impl From<Error> for ServiceError {
    fn from(error: Error) -> Self {
        let message = error.to_string();
        match error {
            Error::NotConnected | Error::Io(_) => Self::Io(message),
            Error::NotFound(_) => Self::NoSuchElement(message),
            Error::Security(_) | Error::WrongCaller { .. } | Error::NoAccessDecision => {
                Self::Security(message)
            }
            Error::ChannelClosed | Error::SessionClosed | Error::Config(_) => {
                Self::IllegalState(message)
            }
            Error::InvalidAid(_) | Error::Format(_) => Self::IllegalArgument(message),
            Error::UnsupportedOperation(_) => Self::UnsupportedOperation(message),
        }
    }
}
