//! Utility functions for APDU response handling

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::response::error::ResponseError;
use crate::response::status::StatusWord;

/// Extract status word (SW1, SW2) and payload from raw APDU response data
///
/// # Errors
/// Returns an error if the data is too short to contain a valid status word.
pub fn extract_response_parts(data: &[u8]) -> Result<((u8, u8), &[u8]), ResponseError> {
    match data {
        [payload @ .., sw1, sw2] => Ok(((*sw1, *sw2), payload)),
        _ => {
            debug!("Response too short: {} bytes", data.len());
            Err(ResponseError::Incomplete)
        }
    }
}

/// Extract status word as a StatusWord object and payload from raw APDU response data
///
/// # Errors
/// Returns an error if the data is too short to contain a valid status word.
pub fn extract_status_and_payload(data: &[u8]) -> Result<(StatusWord, &[u8]), ResponseError> {
    let ((sw1, sw2), payload) = extract_response_parts(data)?;
    Ok((StatusWord::new(sw1, sw2), payload))
}

/// Accumulates the data of chained responses
///
/// Each pushed response contributes its payload; the status word of the
/// last one pushed is the status of the whole.
#[derive(Debug, Clone)]
pub struct ResponseBuffer {
    data: BytesMut,
    status: StatusWord,
    segments: usize,
}

impl ResponseBuffer {
    /// Start from the first response of a chain
    ///
    /// # Errors
    /// Returns an error if `first` has no status word.
    pub fn new(first: &[u8]) -> Result<Self, ResponseError> {
        let (status, payload) = extract_status_and_payload(first)?;
        let mut data = BytesMut::with_capacity(first.len());
        data.put_slice(payload);
        Ok(Self {
            data,
            status,
            segments: 1,
        })
    }

    /// Append the next response of the chain
    ///
    /// # Errors
    /// Returns an error if `next` has no status word.
    pub fn push(&mut self, next: &[u8]) -> Result<(), ResponseError> {
        let (status, payload) = extract_status_and_payload(next)?;
        self.data.put_slice(payload);
        self.status = status;
        self.segments += 1;
        Ok(())
    }

    /// Status word of the last response pushed
    pub const fn status(&self) -> StatusWord {
        self.status
    }

    /// Number of responses accumulated so far
    pub const fn segments(&self) -> usize {
        self.segments
    }

    /// Concatenated data followed by the final status word
    pub fn finish(mut self) -> Bytes {
        self.data.put_u8(self.status.sw1);
        self.data.put_u8(self.status.sw2);
        self.data.freeze()
    }
}
