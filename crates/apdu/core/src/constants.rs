//! Constants from ISO/IEC 7816-4 used when framing and routing commands
//!
//! Only the values the channel layer actually needs are listed here: the
//! class byte layout for logical channel coding, the handful of instructions
//! that are either synthesized by the transport or forbidden to clients, and
//! the SELECT parameters.

/// Class byte (CLA) values and masks
pub mod cla {
    /// Inter-industry class used by synthesized commands
    pub const ISO7816: u8 = 0x00;
    /// Reserved class value, never valid in a command
    pub const INVALID: u8 = 0xFF;
    /// b8 set means a proprietary class
    pub const PROPRIETARY: u8 = 0x80;
    /// Bits 7-6 of the class byte
    pub const TYPE_MASK: u8 = 0x60;
    /// Bits 7-6 value `01`, reserved for future use
    pub const TYPE_RFU: u8 = 0x20;
    /// Set for the further inter-industry coding (channels 4-19)
    pub const FURTHER_INTERINDUSTRY: u8 = 0x40;
    /// Secure messaging indication of the first inter-industry coding
    pub const FIRST_SM_MASK: u8 = 0x0C;
    /// Secure messaging indication of the further inter-industry coding
    pub const FURTHER_SM: u8 = 0x20;
    /// Channel bits of the first inter-industry coding
    pub const FIRST_CHANNEL_MASK: u8 = 0x03;
    /// Channel bits of the further inter-industry coding
    pub const FURTHER_CHANNEL_MASK: u8 = 0x0F;
    /// Bits preserved when applying the first inter-industry coding
    pub const FIRST_KEEP_MASK: u8 = 0xBC;
    /// Bits preserved when applying the further inter-industry coding
    pub const FURTHER_KEEP_MASK: u8 = 0xB0;
}

/// Instruction codes (INS)
pub mod ins {
    /// MANAGE CHANNEL
    pub const MANAGE_CHANNEL: u8 = 0x70;
    /// SELECT
    pub const SELECT: u8 = 0xA4;
    /// GET RESPONSE
    pub const GET_RESPONSE: u8 = 0xC0;
}

/// Parameter values for SELECT (P1)
pub mod select_p1 {
    /// Select by DF name (AID)
    pub const BY_DF_NAME: u8 = 0x04;
}

/// Parameter values for SELECT (P2)
pub mod select_p2 {
    /// First or only occurrence, return FCI
    pub const FIRST_OR_ONLY: u8 = 0x00;
    /// Next occurrence
    pub const NEXT_OCCURRENCE: u8 = 0x02;
}

/// Channel number limits
pub mod channel {
    /// The basic channel
    pub const BASIC: u8 = 0;
    /// Highest number addressable through the class byte
    pub const MAX: u8 = 19;
}

/// Status word first bytes with a transport meaning
pub mod sw1 {
    /// Response bytes still available, SW2 holds the count
    pub const MORE_DATA: u8 = 0x61;
    /// Wrong Le field, SW2 holds the exact length
    pub const WRONG_LE: u8 = 0x6C;
}
