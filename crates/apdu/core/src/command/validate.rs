//! Structural validation of command APDUs
//!
//! Every command coming from a client is run through [`validate`] before it is
//! allowed anywhere near a card. The checks follow the ISO/IEC 7816-4 command
//! cases, both short and extended length.

use tracing::trace;

use super::error::CommandError;
use crate::constants::cla;

/// Largest value Le may take once decoded
pub const MAX_LE: i64 = 65536;

/// Length of the CLA/INS/P1/P2 header
pub const HEADER_LEN: usize = 4;

/// The ISO/IEC 7816-4 command case a byte sequence was recognized as
///
/// Lengths are the raw field values; a zero Le keeps its "maximum" meaning and
/// is not expanded here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApduCase {
    /// Header only
    Case1,
    /// Header and a one byte Le
    Case2Short {
        /// Expected response length
        le: u32,
    },
    /// Header, one byte Lc and data
    Case3Short {
        /// Data length
        lc: usize,
    },
    /// Header, one byte Lc, data and a one byte Le
    Case4Short {
        /// Data length
        lc: usize,
        /// Expected response length
        le: u32,
    },
    /// Header, `00` and a two byte Le
    Case2Extended {
        /// Expected response length
        le: u32,
    },
    /// Header, `00`, two byte Lc and data
    Case3Extended {
        /// Data length
        lc: usize,
    },
    /// Header, `00`, two byte Lc, data and a two byte Le
    Case4Extended {
        /// Data length
        lc: usize,
        /// Expected response length
        le: u32,
    },
}

impl ApduCase {
    /// Whether the command uses extended length fields
    pub const fn is_extended(&self) -> bool {
        matches!(
            self,
            Self::Case2Extended { .. } | Self::Case3Extended { .. } | Self::Case4Extended { .. }
        )
    }

    /// Length of the data field
    pub const fn data_len(&self) -> usize {
        match self {
            Self::Case3Short { lc }
            | Self::Case4Short { lc, .. }
            | Self::Case3Extended { lc }
            | Self::Case4Extended { lc, .. } => *lc,
            _ => 0,
        }
    }

    /// Offset of the data field, if there is one
    pub const fn data_offset(&self) -> Option<usize> {
        match self {
            Self::Case3Short { .. } | Self::Case4Short { .. } => Some(HEADER_LEN + 1),
            Self::Case3Extended { .. } | Self::Case4Extended { .. } => Some(HEADER_LEN + 3),
            _ => None,
        }
    }

    /// Raw Le value, if the command carries one
    pub const fn le(&self) -> Option<u32> {
        match self {
            Self::Case2Short { le }
            | Self::Case4Short { le, .. }
            | Self::Case2Extended { le }
            | Self::Case4Extended { le, .. } => Some(*le),
            _ => None,
        }
    }
}

/// Validate that `apdu` is a well-formed command APDU
///
/// Returns the recognized [`ApduCase`]. This function has no side effects.
///
/// # Errors
///
/// Returns a [`CommandError`] describing the first rule the command breaks.
pub fn validate(apdu: &[u8]) -> Result<ApduCase, CommandError> {
    let length = apdu.len();
    if length < HEADER_LEN {
        return Err(CommandError::TooShort(length));
    }

    let class = apdu[0];
    if class == cla::INVALID {
        return Err(CommandError::InvalidCla(class));
    }

    let ins = apdu[1];
    if matches!(ins & 0xF0, 0x60 | 0x90) {
        return Err(CommandError::InvalidIns(ins));
    }

    let case = classify(apdu)?;
    trace!(case = ?case, length, "Validated command APDU");
    Ok(case)
}

fn classify(apdu: &[u8]) -> Result<ApduCase, CommandError> {
    let length = apdu.len();

    if length == HEADER_LEN {
        return Ok(ApduCase::Case1);
    }

    if length == HEADER_LEN + 1 {
        let le = check_le(i64::from(apdu[4]))?;
        return Ok(ApduCase::Case2Short { le });
    }

    let p3 = usize::from(apdu[4]);
    if p3 != 0 {
        let lc = p3;
        return if length == HEADER_LEN + 1 + lc {
            Ok(ApduCase::Case3Short { lc })
        } else if length == HEADER_LEN + 2 + lc {
            let le = check_le(i64::from(apdu[length - 1]))?;
            Ok(ApduCase::Case4Short { lc, le })
        } else {
            Err(CommandError::unexpected_lc(lc, length))
        };
    }

    if length == HEADER_LEN + 3 {
        let le = check_le(i64::from(u16::from_be_bytes([apdu[5], apdu[6]])))?;
        return Ok(ApduCase::Case2Extended { le });
    }

    if length <= HEADER_LEN + 3 {
        return Err(CommandError::UnexpectedLcLe(length));
    }

    let lc = usize::from(u16::from_be_bytes([apdu[5], apdu[6]]));
    if lc == 0 {
        return Err(CommandError::unexpected_lc(lc, length));
    }

    if length == HEADER_LEN + 3 + lc {
        Ok(ApduCase::Case3Extended { lc })
    } else if length == HEADER_LEN + 5 + lc {
        let le = check_le(i64::from(u16::from_be_bytes([
            apdu[length - 2],
            apdu[length - 1],
        ])))?;
        Ok(ApduCase::Case4Extended { lc, le })
    } else {
        Err(CommandError::unexpected_lc(lc, length))
    }
}

fn check_le(le: i64) -> Result<u32, CommandError> {
    if !(0..=MAX_LE).contains(&le) {
        return Err(CommandError::InvalidLe(le));
    }
    Ok(le as u32)
}
