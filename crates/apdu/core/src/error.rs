//! Core error type for APDU framing
//!
//! Wraps the command and response error kinds so callers that deal with both
//! can bubble either up with `?`.

use thiserror::Error;

use crate::command::CommandError;
use crate::response::ResponseError;

/// Result type for APDU framing operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type that encompasses the command and response errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// Malformed command
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Malformed or unexpected response
    #[error(transparent)]
    Response(#[from] ResponseError),
}
