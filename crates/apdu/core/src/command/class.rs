//! Logical channel coding of the class byte
//!
//! ISO/IEC 7816-4 carries the logical channel number in the CLA byte. Channels
//! 0-3 use the first inter-industry coding (bits 2-1), channels 4-19 the
//! further inter-industry coding (b7 set, bits 4-1 hold `n - 4`).

use super::error::CommandError;
use crate::constants::{channel, cla};

/// Rewrite the channel bits of `class` so the command addresses `channel_number`
///
/// A secure messaging indication in the first coding is carried over to the
/// further coding.
///
/// # Errors
///
/// Returns [`CommandError::InvalidChannel`] for channel numbers above 19.
pub const fn set_channel(class: u8, channel_number: u8) -> Result<u8, CommandError> {
    if channel_number < 4 {
        Ok((class & cla::FIRST_KEEP_MASK) | channel_number)
    } else if channel_number <= channel::MAX {
        let secure_messaging = class & cla::FIRST_SM_MASK != 0;
        let mut coded =
            (class & cla::FURTHER_KEEP_MASK) | cla::FURTHER_INTERINDUSTRY | (channel_number - 4);
        if secure_messaging {
            coded |= cla::FURTHER_SM;
        }
        Ok(coded)
    } else {
        Err(CommandError::InvalidChannel(channel_number))
    }
}

/// Decode the logical channel number carried by `class`
pub const fn channel_of(class: u8) -> u8 {
    if class & cla::FURTHER_INTERINDUSTRY == 0 {
        class & cla::FIRST_CHANNEL_MASK
    } else {
        (class & cla::FURTHER_CHANNEL_MASK) + 4
    }
}

/// Whether `class` is an inter-industry class whose instruction set is defined
/// by ISO/IEC 7816-4
///
/// Proprietary classes (b8 set) and the reserved `01` type are excluded.
pub const fn is_interindustry(class: u8) -> bool {
    class & cla::PROPRIETARY == 0 && class & cla::TYPE_MASK != cla::TYPE_RFU
}
