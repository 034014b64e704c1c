//! Client channels
//!
//! A [`Channel`] is one basic or logical channel opened on a
//! [`Terminal`](crate::Terminal) for one client. It checks every command the
//! client sends, rewrites the class byte to its own channel number and hands
//! the command to the terminal.

use std::fmt;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use nexum_apdu_core::command::class::{is_interindustry, set_channel};
use nexum_apdu_core::constants::{channel, ins, select_p1};
use nexum_apdu_core::{Command, StatusWord, validate};
use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use crate::access::{Caller, ChannelAccess};
use crate::error::{Error, Result};
use crate::session::Session;
use crate::terminal::Terminal;

/// Notified when the client owning a channel goes away
pub trait OwnerListener: Send + Sync {
    /// The owner disconnected; release everything held for it
    fn on_owner_disconnected(&self);
}

/// Liveness link to the client owning a channel
///
/// The terminal links each channel it opens; the implementation calls
/// [`OwnerListener::on_owner_disconnected`] once the client dies, if the
/// listener is still alive.
pub trait OwnerLink: Send + Sync + fmt::Debug {
    /// Watch the owner on behalf of `listener`
    fn link(&self, listener: Weak<dyn OwnerListener>);
}

/// One open channel on a secure element
pub struct Channel {
    number: u8,
    terminal: Weak<Terminal>,
    session: Weak<Session>,
    aid: Option<Bytes>,
    select_response: Mutex<Bytes>,
    access: Option<ChannelAccess>,
    closed: AtomicBool,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("number", &self.number)
            .field("aid", &self.aid.as_ref().map(hex::encode))
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Channel {
    pub(crate) fn new(
        terminal: Weak<Terminal>,
        session: Weak<Session>,
        number: u8,
        select_response: Bytes,
        aid: Option<Bytes>,
        access: Option<ChannelAccess>,
    ) -> Self {
        Self {
            number,
            terminal,
            session,
            aid,
            select_response: Mutex::new(select_response),
            access,
            closed: AtomicBool::new(false),
        }
    }

    /// Channel number, 0 for the basic channel
    pub const fn number(&self) -> u8 {
        self.number
    }

    /// Whether this is the basic channel
    pub const fn is_basic_channel(&self) -> bool {
        self.number == channel::BASIC
    }

    /// AID selected when the channel was opened
    pub const fn aid(&self) -> Option<&Bytes> {
        self.aid.as_ref()
    }

    /// Whether an applet was selected explicitly
    pub const fn has_selected_aid(&self) -> bool {
        self.aid.is_some()
    }

    /// Response to the latest successful SELECT, if an applet was selected
    pub fn select_response(&self) -> Option<Bytes> {
        self.has_selected_aid()
            .then(|| self.select_response.lock().clone())
    }

    /// Access decision taken when the channel was opened
    pub const fn access(&self) -> Option<&ChannelAccess> {
        self.access.as_ref()
    }

    /// Whether the channel has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Session the channel was opened through
    pub fn session(&self) -> Option<Arc<Session>> {
        self.session.upgrade()
    }

    /// Send a command on this channel
    ///
    /// The command is validated, checked against the access decision and
    /// the forbidden inter-industry commands, then sent with the class byte
    /// rewritten to this channel.
    ///
    /// # Errors
    ///
    /// - [`Error::ChannelClosed`], [`Error::NoAccessDecision`] or
    ///   [`Error::WrongCaller`] when the channel cannot be used by `caller`
    /// - [`Error::Format`] for malformed commands
    /// - [`Error::Security`] for MANAGE CHANNEL, SELECT by DF name, or a
    ///   command refused by the access rules
    /// - any error of [`Terminal::transmit`]
    #[instrument(level = "trace", skip_all, fields(channel = self.number))]
    pub fn transmit(&self, caller: &Caller, command: &[u8]) -> Result<Bytes> {
        self.ensure_usable(caller)?;
        validate(command)?;

        let (class, instruction, p1) = (command[0], command[1], command[2]);
        if is_interindustry(class) {
            if instruction == ins::MANAGE_CHANNEL {
                return Err(Error::security("MANAGE CHANNEL command not allowed"));
            }
            if instruction == ins::SELECT && p1 == select_p1::BY_DF_NAME {
                return Err(Error::security("SELECT by DF name command not allowed"));
            }
        }

        let terminal = self.terminal()?;
        terminal.access_control().check_command(self, command)?;

        let mut command = command.to_vec();
        command[0] = set_channel(class, self.number)?;
        terminal.transmit(&command)
    }

    /// Select the next applet matching the AID this channel was opened with
    ///
    /// Returns `true` when another applet was selected (its SELECT response
    /// replaces the stored one) and `false` when no further applet matches.
    ///
    /// # Errors
    ///
    /// - the usability errors of [`transmit`](Self::transmit)
    /// - [`Error::UnsupportedOperation`] when no AID was selected or the
    ///   secure element answers with an unexpected status
    /// - any error of [`Terminal::transmit`]
    #[instrument(level = "debug", skip_all, fields(channel = self.number))]
    pub fn select_next(&self, caller: &Caller) -> Result<bool> {
        self.ensure_usable(caller)?;
        let aid = match &self.aid {
            Some(aid) if !aid.is_empty() => aid,
            _ => return Err(Error::unsupported("No AID given")),
        };

        let terminal = self.terminal()?;
        let mut command = Command::select_next(aid).to_bytes()?.to_vec();
        command[0] = set_channel(command[0], self.number)?;

        let response = terminal.transmit(&command)?;
        let status = StatusWord::from_response(&response)
            .ok_or_else(|| Error::unsupported("Transmit failed"))?;

        if status.is_selected() {
            *self.select_response.lock() = response;
            Ok(true)
        } else if status.is_incorrect_parameters() {
            Ok(false)
        } else {
            warn!(%status, "Unexpected answer to SELECT next");
            Err(Error::unsupported(format!("SELECT next answered {status}")))
        }
    }

    /// Close the channel
    ///
    /// Releases the channel on the terminal (restoring the default
    /// application first for the basic channel) and detaches it from its
    /// session. Only the first call has any effect.
    pub fn close(&self) {
        if !self.mark_closed() {
            return;
        }
        debug!(channel = self.number, "Closing channel");

        if let Some(terminal) = self.terminal.upgrade() {
            terminal.release_channel(self);
        }
        self.detach_from_session();
    }

    /// Flip the closed flag, returning whether this call did it
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn detach_from_session(&self) {
        if let Some(session) = self.session.upgrade() {
            session.forget_channel(self);
        }
    }

    pub(crate) fn belongs_to(&self, terminal: &Terminal) -> bool {
        std::ptr::eq(self.terminal.as_ptr(), terminal)
    }

    fn ensure_usable(&self, caller: &Caller) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ChannelClosed);
        }
        let access = self.access.as_ref().ok_or(Error::NoAccessDecision)?;
        if access.caller() != Some(caller.pid()) {
            return Err(Error::WrongCaller {
                expected: access.caller(),
                actual: caller.pid(),
            });
        }
        Ok(())
    }

    fn terminal(&self) -> Result<Arc<Terminal>> {
        self.terminal.upgrade().ok_or(Error::NotConnected)
    }
}

impl OwnerListener for Channel {
    fn on_owner_disconnected(&self) {
        debug!(channel = self.number, "Channel owner died");
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::ApduFilter;
    use crate::config::TerminalConfig;
    use crate::hal::HalStatus;
    use crate::terminal::ChannelBinding;
    use crate::testing::{AID, MockHal, caller, connected_terminal, intruder};
    use hex_literal::hex;
    use nexum_apdu_core::CommandError;

    fn logical_channel() -> (Arc<Terminal>, Arc<Channel>, MockHal) {
        let (terminal, hal, _) = connected_terminal(TerminalConfig::new("eSE1"));
        let channel = terminal
            .open_logical_channel(Some(&AID), 0x00, &caller(), ChannelBinding::default())
            .unwrap()
            .unwrap();
        hal.clear_transmitted();
        (terminal, channel, hal)
    }

    #[test]
    fn test_transmit_sets_channel_number() {
        let (_terminal, channel, hal) = logical_channel();
        hal.push_response(&hex!("01029000"));

        let response = channel.transmit(&caller(), &hex!("00B0000000")).unwrap();
        assert_eq!(response.as_ref(), &hex!("01029000"));
        assert_eq!(hal.transmitted()[0].as_ref(), &hex!("01B0000000"));
    }

    #[test]
    fn test_transmit_on_further_channel() {
        let (terminal, hal, _) = connected_terminal(TerminalConfig::new("eSE1"));
        hal.push_logical(5, HalStatus::Success);
        let channel = terminal
            .open_logical_channel(Some(&AID), 0x00, &caller(), ChannelBinding::default())
            .unwrap()
            .unwrap();

        channel.transmit(&caller(), &hex!("00B0000000")).unwrap();
        channel.transmit(&caller(), &hex!("04B0000000")).unwrap();

        let transmitted = hal.transmitted();
        assert_eq!(transmitted[0].as_ref(), &hex!("41B0000000"));
        assert_eq!(transmitted[1].as_ref(), &hex!("61B0000000"));
    }

    #[test]
    fn test_basic_channel_keeps_class() {
        let (terminal, hal, _) = connected_terminal(TerminalConfig::new("eSE1"));
        let channel = terminal
            .open_basic_channel(Some(&AID), 0x00, &caller(), ChannelBinding::default())
            .unwrap()
            .unwrap();

        channel.transmit(&caller(), &hex!("80CA9F7F00")).unwrap();
        assert_eq!(hal.transmitted()[0].as_ref(), &hex!("80CA9F7F00"));
    }

    #[test]
    fn test_wrong_caller() {
        let (_terminal, channel, hal) = logical_channel();

        assert_eq!(
            channel.transmit(&intruder(), &hex!("00B0000000")),
            Err(Error::WrongCaller {
                expected: Some(caller().pid()),
                actual: intruder().pid(),
            })
        );
        assert!(matches!(
            channel.select_next(&intruder()),
            Err(Error::WrongCaller { .. })
        ));
        assert!(hal.transmitted().is_empty());
    }

    #[test]
    fn test_no_access_decision() {
        let (terminal, hal, _) = connected_terminal(TerminalConfig::new("eSE1"));
        let channel = terminal
            .open_logical_channel(None, 0x00, &Caller::anonymous(100), ChannelBinding::default())
            .unwrap()
            .unwrap();

        assert_eq!(
            channel.transmit(&Caller::anonymous(100), &hex!("00B0000000")),
            Err(Error::NoAccessDecision)
        );
        assert!(hal.transmitted().is_empty());
    }

    #[test]
    fn test_closed_channel() {
        let (_terminal, channel, hal) = logical_channel();
        channel.close();

        assert_eq!(
            channel.transmit(&caller(), &hex!("00B0000000")),
            Err(Error::ChannelClosed)
        );
        assert_eq!(channel.select_next(&caller()), Err(Error::ChannelClosed));
        assert!(hal.transmitted().is_empty());
    }

    #[test]
    fn test_malformed_command() {
        let (_terminal, channel, hal) = logical_channel();

        assert_eq!(
            channel.transmit(&caller(), &hex!("00B0")),
            Err(Error::Format(CommandError::TooShort(2)))
        );
        assert_eq!(
            channel.transmit(&caller(), &hex!("FFB00000")),
            Err(Error::Format(CommandError::InvalidCla(0xFF)))
        );
        assert!(hal.transmitted().is_empty());
    }

    #[test]
    fn test_forbidden_commands() {
        let (_terminal, channel, hal) = logical_channel();

        for command in [
            &hex!("0070000001")[..],
            &hex!("0070800100")[..],
            &hex!("00A4040008A000000151000000")[..],
            &hex!("01A4040008A000000151000000")[..],
        ] {
            assert!(matches!(
                channel.transmit(&caller(), command),
                Err(Error::Security(_))
            ));
        }
        assert!(hal.transmitted().is_empty());

        // proprietary class and SELECT by path are passed through
        channel.transmit(&caller(), &hex!("8070000001")).unwrap();
        channel.transmit(&caller(), &hex!("00A40800023F00")).unwrap();
        assert_eq!(hal.transmitted().len(), 2);
    }

    #[test]
    fn test_access_rule_filters() {
        let (terminal, hal, access_control) = connected_terminal(TerminalConfig::new("eSE1"));
        access_control.set_filters(vec![ApduFilter::new(hex!("80CA0000"), hex!("FFFF0000"))]);
        let channel = terminal
            .open_logical_channel(Some(&AID), 0x00, &caller(), ChannelBinding::default())
            .unwrap()
            .unwrap();

        assert_eq!(
            channel.transmit(&caller(), &hex!("00B0000000")),
            Err(Error::Security("Access Rule does not allow command".into()))
        );
        channel.transmit(&caller(), &hex!("80CA9F7F00")).unwrap();

        assert_eq!(hal.transmitted().len(), 1);
        assert_eq!(access_control.checked().len(), 2);
    }

    #[test]
    fn test_select_next() {
        let (_terminal, channel, hal) = logical_channel();

        hal.push_response(&hex!("6F0A8408A0000001510000019000"));
        assert_eq!(channel.select_next(&caller()), Ok(true));
        assert_eq!(
            hal.transmitted()[0].as_ref(),
            &hex!("01A4040208A000000151000000")
        );
        assert_eq!(
            channel.select_response().as_deref(),
            Some(&hex!("6F0A8408A0000001510000019000")[..])
        );

        hal.push_response(&hex!("6283"));
        assert_eq!(channel.select_next(&caller()), Ok(true));

        hal.push_response(&hex!("6A82"));
        assert_eq!(channel.select_next(&caller()), Ok(false));
        assert_eq!(channel.select_response().as_deref(), Some(&hex!("6283")[..]));

        hal.push_response(&hex!("6985"));
        assert!(matches!(
            channel.select_next(&caller()),
            Err(Error::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_select_next_without_aid() {
        let (terminal, hal, _) = connected_terminal(TerminalConfig::new("eSE1"));
        let channel = terminal
            .open_logical_channel(None, 0x00, &caller(), ChannelBinding::default())
            .unwrap()
            .unwrap();

        assert!(matches!(
            channel.select_next(&caller()),
            Err(Error::UnsupportedOperation(_))
        ));
        assert!(channel.select_response().is_none());
        assert!(hal.transmitted().is_empty());
    }

    #[test]
    fn test_owner_disconnected() {
        let (terminal, channel, hal) = logical_channel();

        channel.on_owner_disconnected();
        channel.on_owner_disconnected();

        assert!(channel.is_closed());
        assert_eq!(hal.closed(), vec![1]);
        assert_eq!(terminal.channel_count(), 0);
    }

    #[test]
    fn test_terminal_gone() {
        let (terminal, channel, _hal) = logical_channel();
        drop(terminal);

        assert_eq!(
            channel.transmit(&caller(), &hex!("00B0000000")),
            Err(Error::NotConnected)
        );
        channel.close();
        assert!(channel.is_closed());
    }
}
