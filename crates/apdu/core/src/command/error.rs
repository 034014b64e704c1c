//! Error types specific to APDU commands

use thiserror::Error;

/// Reasons a command APDU is rejected before it reaches a card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Fewer than the four header bytes
    #[error("Command too short: {0} bytes")]
    TooShort(usize),

    /// Reserved class byte
    #[error("Invalid CLA byte: {0:#04X}")]
    InvalidCla(u8),

    /// Instruction in a reserved range (6X, 9X)
    #[error("Invalid INS byte: {0:#04X}")]
    InvalidIns(u8),

    /// Lc does not match the length of the command
    #[error("Unexpected value of Lc ({lc}) for a {length} byte command")]
    UnexpectedLc {
        /// Decoded Lc
        lc: usize,
        /// Total command length
        length: usize,
    },

    /// Neither a short nor an extended Lc/Le layout fits
    #[error("Unexpected value of Lc or Le for a {0} byte command")]
    UnexpectedLcLe(usize),

    /// Le outside of [0, 65536]
    #[error("Invalid value of Le ({0})")]
    InvalidLe(i64),

    /// Channel number that cannot be encoded in the class byte
    #[error("Channel number must be within [0..19], got {0}")]
    InvalidChannel(u8),

    /// Data field too long to be encoded
    #[error("Data too long: {0} bytes (max {1})")]
    DataTooLong(usize, usize),
}

impl CommandError {
    /// Create an unexpected Lc error
    pub const fn unexpected_lc(lc: usize, length: usize) -> Self {
        Self::UnexpectedLc { lc, length }
    }

    /// Create a data too long error
    pub const fn data_too_long(actual: usize, max: usize) -> Self {
        Self::DataTooLong(actual, max)
    }
}
