//! Secure element channel multiplexing
//!
//! This crate opens, tracks and closes basic and logical channels on secure
//! elements (UICCs and embedded secure elements), and gates every command
//! through an access control decision before it reaches the hardware.
//!
//! - [`Terminal`] owns one hardware link and the channels opened on it,
//!   serializes hardware access and stitches chained responses together
//! - [`Channel`] validates and checks each command of its client and tags it
//!   with its channel number
//! - [`Session`] and [`Reader`] group channels per client and expose them
//!   through [`ServiceError`] codes
//! - [`SecureElementHal`] and [`AccessControl`] are the seams to the
//!   hardware link and to the access rule engine
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod access;
pub mod channel;
pub mod config;
pub mod error;
pub mod hal;
pub mod reader;
pub mod service;
pub mod session;
pub mod terminal;

#[cfg(test)]
pub(crate) mod testing;

pub use access::{AccessControl, AccessStatus, Caller, ChannelAccess, Pid};
pub use channel::{Channel, OwnerLink, OwnerListener};
pub use config::{ServiceConfig, TerminalConfig};
pub use error::{Error, Result, ServiceError, ServiceResult};
pub use hal::{HalStatus, SecureElementHal};
pub use reader::Reader;
pub use service::SecureElementService;
pub use session::{ChannelHandle, Session};
pub use terminal::{ChannelBinding, Terminal};

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::access::{AccessControlError, ApduFilter};
    pub use crate::hal::{BasicChannelResponse, HalError, LogicalChannelResponse};
    pub use crate::{
        AccessControl, AccessStatus, Caller, Channel, ChannelAccess, ChannelBinding,
        ChannelHandle, Error, HalStatus, OwnerLink, OwnerListener, Pid, Reader, Result,
        SecureElementHal, SecureElementService, ServiceConfig, ServiceError, ServiceResult,
        Session, Terminal, TerminalConfig,
    };
    pub use nexum_apdu_core::{Bytes, Command, StatusWord, validate};
}
