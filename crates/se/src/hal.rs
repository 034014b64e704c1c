//! Hardware link to a secure element
//!
//! A [`SecureElementHal`] moves raw bytes to and from one physical secure
//! element and opens or closes channels on it. It knows nothing about channel
//! ownership, access rules or response chaining; the
//! [`Terminal`](crate::Terminal) layers those on top.

use std::fmt;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, trace};

/// Outcome codes reported by the hardware link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HalStatus {
    /// Operation completed
    Success,
    /// Generic failure
    Failed,
    /// No channel left on the secure element
    ChannelNotAvailable,
    /// The requested applet does not exist
    NoSuchElement,
    /// The operation is not supported by the secure element
    UnsupportedOperation,
    /// Communication with the secure element failed
    IoError,
}

impl HalStatus {
    /// Decode the numeric status used on the wire by HAL services
    pub const fn from_code(code: u8) -> Self {
        match code {
            0x00 => Self::Success,
            0x02 => Self::ChannelNotAvailable,
            0x03 => Self::NoSuchElement,
            0x04 => Self::UnsupportedOperation,
            0x05 => Self::IoError,
            _ => Self::Failed,
        }
    }

    /// Numeric status used on the wire by HAL services
    pub const fn code(&self) -> u8 {
        match self {
            Self::Success => 0x00,
            Self::Failed => 0x01,
            Self::ChannelNotAvailable => 0x02,
            Self::NoSuchElement => 0x03,
            Self::UnsupportedOperation => 0x04,
            Self::IoError => 0x05,
        }
    }

    /// Check if this status reports success
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Answer of the hardware to a basic channel open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicChannelResponse {
    /// Response to the SELECT issued while opening, possibly empty
    pub select_response: Bytes,
    /// Outcome of the open
    pub status: HalStatus,
}

/// Answer of the hardware to a logical channel open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalChannelResponse {
    /// Channel number assigned by the secure element
    ///
    /// Signed because HAL services report failures as negative numbers.
    pub channel_number: i32,
    /// Response to the SELECT issued on the new channel, possibly empty
    pub select_response: Bytes,
    /// Outcome of the open
    pub status: HalStatus,
}

/// Failures of the link itself, as opposed to statuses reported through it
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HalError {
    /// The remote HAL service went away
    #[error("Hardware link is dead")]
    Dead,

    /// A call across the link failed
    #[error("Hardware link call failed: {0}")]
    Remote(String),
}

/// Raw access to one secure element
///
/// Implementations are driven by a single [`Terminal`](crate::Terminal),
/// which serializes every call, so methods take `&mut self`.
pub trait SecureElementHal: Send + fmt::Debug {
    /// Bring up the link; the terminal is told about the resulting
    /// connection state through
    /// [`Terminal::on_connection_state_changed`](crate::Terminal::on_connection_state_changed)
    fn init(&mut self) -> Result<(), HalError>;

    /// Open the basic channel, selecting `aid` (empty for no selection)
    fn open_basic_channel(&mut self, aid: &[u8], p2: u8)
    -> Result<BasicChannelResponse, HalError>;

    /// Open a logical channel, selecting `aid` (empty for the default application)
    fn open_logical_channel(
        &mut self,
        aid: &[u8],
        p2: u8,
    ) -> Result<LogicalChannelResponse, HalError>;

    /// Close the given channel on the secure element
    fn close_channel(&mut self, channel_number: u8) -> Result<HalStatus, HalError>;

    /// Send raw APDU bytes and return the raw response
    fn transmit(&mut self, command: &[u8]) -> Result<Bytes, HalError> {
        trace!(command = %hex::encode(command), "Transmitting to secure element");
        let result = self.do_transmit(command);
        match &result {
            Ok(response) => {
                trace!(response = %hex::encode(response), "Received from secure element");
            }
            Err(e) => {
                debug!(error = %e, "Hardware link error during transmission");
            }
        }
        result
    }

    /// Internal implementation of [`transmit`](Self::transmit)
    fn do_transmit(&mut self, command: &[u8]) -> Result<Bytes, HalError>;

    /// Answer-to-reset of the secure element, empty when unavailable
    fn atr(&mut self) -> Result<Bytes, HalError>;

    /// Whether a secure element is physically present
    fn is_card_present(&mut self) -> Result<bool, HalError>;

    /// Reset the secure element
    fn reset(&mut self) -> Result<HalStatus, HalError> {
        Ok(HalStatus::UnsupportedOperation)
    }
}
