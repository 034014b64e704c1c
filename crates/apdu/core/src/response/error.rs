//! Error types specific to APDU responses

use thiserror::Error;

use super::status::StatusWord;

/// Error for APDU response processing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ResponseError {
    /// Incomplete response (less than 2 bytes)
    #[error("Incomplete response")]
    Incomplete,

    /// Card answered with an unexpected status word
    #[error("Unexpected status {}: {}", .0, .0.description())]
    Status(StatusWord),
}

impl From<StatusWord> for ResponseError {
    fn from(status: StatusWord) -> Self {
        Self::Status(status)
    }
}
