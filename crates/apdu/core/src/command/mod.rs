//! APDU command definitions
//!
//! This module provides the generic [`Command`] type, its serialization in
//! short or extended form, and the commands the channel layer synthesizes on
//! its own (SELECT variants and GET RESPONSE).

pub mod class;
pub mod error;
pub mod validate;

use bytes::{BufMut, Bytes, BytesMut};

pub use error::CommandError;
pub use validate::{ApduCase, validate};

use crate::constants::{cla, ins, select_p1, select_p2};

/// Expected length type for APDU commands (decoded, 1..=65536)
pub type ExpectedLength = u32;

const SHORT_MAX_DATA: usize = 255;
const SHORT_MAX_LE: ExpectedLength = 256;
const EXTENDED_MAX_DATA: usize = 65535;

/// Generic APDU command structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// Parameter 1
    pub p1: u8,
    /// Parameter 2
    pub p2: u8,
    /// Command data (optional)
    pub data: Option<Bytes>,
    /// Expected length (optional)
    pub le: Option<ExpectedLength>,
}

impl Command {
    /// Create a new command with just the header bytes
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            le: None,
        }
    }

    /// Set the data field
    pub fn with_data<T: Into<Bytes>>(mut self, data: T) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Set the expected length field
    pub const fn with_le(mut self, le: ExpectedLength) -> Self {
        self.le = Some(le);
        self
    }

    /// SELECT by DF name, first or only occurrence
    ///
    /// An empty AID selects the default application (`00 A4 04 00 00`).
    pub fn select_by_name(aid: &[u8]) -> Self {
        let command = Self::new(
            cla::ISO7816,
            ins::SELECT,
            select_p1::BY_DF_NAME,
            select_p2::FIRST_OR_ONLY,
        );
        if aid.is_empty() {
            command.with_le(SHORT_MAX_LE)
        } else {
            command.with_data(Bytes::copy_from_slice(aid))
        }
    }

    /// SELECT by DF name, next occurrence of `aid`
    pub fn select_next(aid: &[u8]) -> Self {
        Self::new(
            cla::ISO7816,
            ins::SELECT,
            select_p1::BY_DF_NAME,
            select_p2::NEXT_OCCURRENCE,
        )
        .with_data(Bytes::copy_from_slice(aid))
    }

    /// GET RESPONSE for `remaining` bytes, as announced by a `61xx` status
    ///
    /// `remaining == 0` asks for the maximum of 256 bytes.
    pub fn get_response(class: u8, remaining: u8) -> Self {
        let le = if remaining == 0 {
            SHORT_MAX_LE
        } else {
            ExpectedLength::from(remaining)
        };
        Self::new(class, ins::GET_RESPONSE, 0x00, 0x00).with_le(le)
    }

    /// Whether this command needs extended length fields
    pub fn is_extended(&self) -> bool {
        self.data.as_ref().is_some_and(|d| d.len() > SHORT_MAX_DATA)
            || self.le.is_some_and(|le| le > SHORT_MAX_LE)
    }

    /// Calculate length of serialized command
    pub fn command_length(&self) -> usize {
        let extended = self.is_extended();
        let mut length = 4;

        if let Some(data) = &self.data {
            length += if extended { 3 } else { 1 } + data.len();
        }

        if self.le.is_some() {
            length += match (extended, self.data.is_some()) {
                (false, _) => 1,
                (true, true) => 2,
                (true, false) => 3,
            };
        }

        length
    }

    /// Convert to raw APDU bytes
    ///
    /// # Errors
    ///
    /// Fails when the data field exceeds the extended length limit.
    pub fn to_bytes(&self) -> Result<Bytes, CommandError> {
        if let Some(data) = &self.data {
            if data.len() > EXTENDED_MAX_DATA {
                return Err(CommandError::data_too_long(data.len(), EXTENDED_MAX_DATA));
            }
        }

        let extended = self.is_extended();
        let mut buffer = BytesMut::with_capacity(self.command_length());
        buffer.put_slice(&[self.cla, self.ins, self.p1, self.p2]);

        if let Some(data) = &self.data {
            if extended {
                buffer.put_u8(0x00);
                buffer.put_u16(data.len() as u16);
            } else {
                buffer.put_u8(data.len() as u8);
            }
            buffer.put_slice(data);
        }

        if let Some(le) = self.le {
            if extended {
                if self.data.is_none() {
                    buffer.put_u8(0x00);
                }
                // 65536 is encoded as 0000
                buffer.put_u16(le as u16);
            } else {
                // 256 is encoded as 00
                buffer.put_u8(le as u8);
            }
        }

        Ok(buffer.freeze())
    }

    /// Parse a command from raw bytes
    ///
    /// The bytes must pass [`validate`]. A zero Le is expanded to its maximum
    /// (256 short, 65536 extended).
    ///
    /// # Errors
    ///
    /// Returns the validation error for malformed commands.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, CommandError> {
        let case = validate(raw)?;
        let mut command = Self::new(raw[0], raw[1], raw[2], raw[3]);

        if let Some(offset) = case.data_offset() {
            command.data = Some(Bytes::copy_from_slice(
                &raw[offset..offset + case.data_len()],
            ));
        }

        command.le = case.le().map(|le| match (le, case.is_extended()) {
            (0, false) => SHORT_MAX_LE,
            (0, true) => EXTENDED_MAX_DATA as ExpectedLength + 1,
            (le, _) => le,
        });

        Ok(command)
    }
}
