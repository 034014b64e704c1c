//! APDU response definitions
//!
//! Responses coming back from a card are raw bytes with a trailing status
//! word. [`Response`] splits them, and [`utils`] holds the helpers used when
//! several responses are stitched together during GET RESPONSE chaining.

pub mod error;
pub mod status;
pub mod utils;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

pub use error::ResponseError;
use status::StatusWord;

/// Basic APDU response structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response payload data, possibly empty
    payload: Bytes,
    /// Status word
    status: StatusWord,
}

impl Response {
    /// Create a new response with payload and status
    pub fn new(payload: impl Into<Bytes>, status: impl Into<StatusWord>) -> Self {
        Self {
            payload: payload.into(),
            status: status.into(),
        }
    }

    /// Parse response from raw bytes (including status word)
    ///
    /// # Errors
    ///
    /// Returns [`ResponseError::Incomplete`] when fewer than two bytes are given.
    pub fn from_bytes(data: &Bytes) -> Result<Self, ResponseError> {
        let (status, payload) = utils::extract_status_and_payload(data)?;

        trace!(
            sw1 = format_args!("{:#04x}", status.sw1),
            sw2 = format_args!("{:#04x}", status.sw2),
            payload_len = payload.len(),
            "Parsed APDU response"
        );

        Ok(Self {
            payload: data.slice(..payload.len()),
            status,
        })
    }

    /// Response data without the status word
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Status word of the response
    pub const fn status(&self) -> StatusWord {
        self.status
    }

    /// Check if the response indicates success
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Serialize back to payload followed by the status word
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.payload.len() + 2);
        buf.put_slice(&self.payload);
        buf.put_u8(self.status.sw1);
        buf.put_u8(self.status.sw2);
        buf.freeze()
    }
}

impl TryFrom<Bytes> for Response {
    type Error = ResponseError;

    fn try_from(data: Bytes) -> Result<Self, ResponseError> {
        Self::from_bytes(&data)
    }
}

impl From<Response> for Bytes {
    fn from(response: Response) -> Self {
        response.to_bytes()
    }
}
