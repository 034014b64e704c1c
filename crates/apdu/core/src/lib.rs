//! Core types for APDU (Application Protocol Data Unit) framing
//!
//! This crate provides the ISO/IEC 7816-4 building blocks used by the secure
//! element channel layer:
//!
//! - Structural validation of command APDUs in all four cases, short and
//!   extended ([`validate`])
//! - Logical channel coding of the class byte ([`command::class`])
//! - Command serialization and the commands the transport synthesizes itself
//! - Response parsing, status word interpretation and chaining helpers
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

pub mod command;
pub mod constants;
pub mod error;
pub mod response;

pub use command::{ApduCase, Command, CommandError, ExpectedLength, validate};
pub use error::{Error, Result};
pub use response::status::StatusWord;
pub use response::{Response, ResponseError};

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::command::class::{channel_of, is_interindustry, set_channel};
    pub use crate::response::status::common as status;
    pub use crate::response::utils::{self, ResponseBuffer};
    pub use crate::{
        ApduCase, Bytes, BytesMut, Command, CommandError, Error, Response, ResponseError, Result,
        StatusWord, validate,
    };
}
