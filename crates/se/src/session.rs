//! Client sessions
//!
//! A [`Session`] groups the channels one client opened on a reader so they
//! can be closed together. It is also the client boundary: its operations
//! return [`ServiceError`]s rather than the internal [`Error`](crate::Error).

use std::fmt;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use crate::access::Caller;
use crate::channel::{Channel, OwnerLink};
use crate::error::{Error, ServiceError, ServiceResult};
use crate::reader::Reader;
use crate::terminal::{ChannelBinding, Terminal};

/// P2 values accepted when opening a channel
pub const SUPPORTED_P2: [u8; 4] = [0x00, 0x04, 0x08, 0x0C];

#[derive(Debug, Default)]
struct SessionState {
    channels: Vec<Weak<Channel>>,
    closed: bool,
}

/// Channels opened by one client on one reader
pub struct Session {
    reader: Weak<Reader>,
    terminal: Arc<Terminal>,
    atr: Option<Bytes>,
    state: Mutex<SessionState>,
    this: Weak<Self>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("terminal", &self.terminal.name())
            .field("atr", &self.atr.as_ref().map(hex::encode))
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(reader: Weak<Reader>, terminal: Arc<Terminal>) -> Arc<Self> {
        let atr = terminal.atr();
        Arc::new_cyclic(|this| Self {
            reader,
            terminal,
            atr,
            state: Mutex::new(SessionState::default()),
            this: this.clone(),
        })
    }

    /// ATR captured when the session was opened
    pub fn atr(&self) -> Option<Bytes> {
        self.atr.clone()
    }

    /// Whether the session has been closed
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Reader the session was opened on
    pub fn reader(&self) -> Option<Arc<Reader>> {
        self.reader.upgrade()
    }

    /// Number of channels still open in this session
    pub fn channel_count(&self) -> usize {
        self.state
            .lock()
            .channels
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|c| !c.is_closed())
            .count()
    }

    /// Open the basic channel
    ///
    /// Returns `None` on UICC terminals unless their configuration allows
    /// basic channels, and whenever the terminal returns `None`.
    ///
    /// # Errors
    ///
    /// [`ServiceError::IllegalState`] once closed,
    /// [`ServiceError::UnsupportedOperation`] for an unsupported `p2`, and
    /// the translated errors of [`Terminal::open_basic_channel`].
    pub fn open_basic_channel(
        &self,
        aid: Option<&[u8]>,
        p2: u8,
        caller: &Caller,
        owner: Option<Arc<dyn OwnerLink>>,
    ) -> ServiceResult<Option<ChannelHandle>> {
        self.ensure_open()?;
        let config = self.terminal.config();
        if config.is_uicc() && !config.allow_uicc_basic_channel {
            debug!(terminal = %config.name, "Basic channel not available on UICC");
            return Ok(None);
        }
        check_p2(p2)?;

        let binding = ChannelBinding::new(self.this.clone(), owner);
        let channel = self
            .terminal
            .open_basic_channel(aid, p2, caller, binding)?;
        Ok(channel.map(|c| self.track(c)))
    }

    /// Open a logical channel
    ///
    /// # Errors
    ///
    /// [`ServiceError::IllegalState`] once closed,
    /// [`ServiceError::UnsupportedOperation`] for an unsupported `p2`, and
    /// the translated errors of [`Terminal::open_logical_channel`].
    pub fn open_logical_channel(
        &self,
        aid: Option<&[u8]>,
        p2: u8,
        caller: &Caller,
        owner: Option<Arc<dyn OwnerLink>>,
    ) -> ServiceResult<Option<ChannelHandle>> {
        self.ensure_open()?;
        check_p2(p2)?;

        let binding = ChannelBinding::new(self.this.clone(), owner);
        let channel = self
            .terminal
            .open_logical_channel(aid, p2, caller, binding)?;
        Ok(channel.map(|c| self.track(c)))
    }

    /// Close every channel of this session
    pub fn close_channels(&self) {
        let channels = std::mem::take(&mut self.state.lock().channels);
        for channel in channels.iter().filter_map(Weak::upgrade) {
            channel.close();
        }
    }

    /// Close the session and its channels
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.close_channels();
        if let Some(reader) = self.reader.upgrade() {
            reader.forget_session(self);
        }
        debug!(terminal = %self.terminal.name(), "Session closed");
    }

    /// Stop tracking a channel that closed on its own
    pub(crate) fn forget_channel(&self, channel: &Channel) {
        self.state
            .lock()
            .channels
            .retain(|c| c.strong_count() > 0 && !std::ptr::eq(c.as_ptr(), channel));
    }

    fn ensure_open(&self) -> ServiceResult<()> {
        if self.is_closed() {
            return Err(Error::SessionClosed.into());
        }
        Ok(())
    }

    fn track(&self, channel: Arc<Channel>) -> ChannelHandle {
        let closed = {
            let mut state = self.state.lock();
            state.channels.push(Arc::downgrade(&channel));
            state.closed
        };
        // closed concurrently while the channel was being opened
        if closed {
            channel.close();
        }
        ChannelHandle { channel }
    }
}

fn check_p2(p2: u8) -> ServiceResult<()> {
    if SUPPORTED_P2.contains(&p2) {
        Ok(())
    } else {
        Err(ServiceError::UnsupportedOperation(format!(
            "p2 not supported: {p2:#04x}"
        )))
    }
}

/// Client view of an open channel
///
/// Forwards to the [`Channel`] and translates its errors into
/// [`ServiceError`]s.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    channel: Arc<Channel>,
}

impl ChannelHandle {
    /// Underlying channel
    pub const fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    /// Send a command, see [`Channel::transmit`]
    ///
    /// # Errors
    ///
    /// The translated errors of [`Channel::transmit`].
    pub fn transmit(&self, caller: &Caller, command: &[u8]) -> ServiceResult<Bytes> {
        Ok(self.channel.transmit(caller, command)?)
    }

    /// Select the next matching applet, see [`Channel::select_next`]
    ///
    /// # Errors
    ///
    /// The translated errors of [`Channel::select_next`].
    pub fn select_next(&self, caller: &Caller) -> ServiceResult<bool> {
        Ok(self.channel.select_next(caller)?)
    }

    /// Close the channel
    pub fn close(&self) {
        self.channel.close();
    }

    /// Whether the channel has been closed
    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }

    /// Whether this is the basic channel
    pub fn is_basic_channel(&self) -> bool {
        self.channel.is_basic_channel()
    }

    /// Response to the latest successful SELECT
    pub fn select_response(&self) -> Option<Bytes> {
        self.channel.select_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TerminalConfig;
    use crate::testing::{AID, MockHal, caller, connected_terminal, intruder};
    use hex_literal::hex;

    fn open_session(config: TerminalConfig) -> (Arc<Session>, Arc<Terminal>, MockHal) {
        let (terminal, hal, _) = connected_terminal(config);
        let session = Session::new(Weak::new(), Arc::clone(&terminal));
        (session, terminal, hal)
    }

    #[test]
    fn test_open_and_close() {
        let (session, terminal, hal) = open_session(TerminalConfig::new("eSE1"));
        assert!(session.atr().is_some());

        let first = session
            .open_logical_channel(Some(&AID), 0x00, &caller(), None)
            .unwrap()
            .unwrap();
        let _second = session
            .open_logical_channel(Some(&AID), 0x04, &caller(), None)
            .unwrap()
            .unwrap();
        assert_eq!(session.channel_count(), 2);
        assert!(Arc::ptr_eq(
            &first.channel().session().unwrap(),
            &session
        ));

        first.close();
        assert_eq!(session.channel_count(), 1);

        session.close();
        assert!(session.is_closed());
        assert_eq!(session.channel_count(), 0);
        assert_eq!(terminal.channel_count(), 0);
        assert_eq!(hal.closed(), vec![1, 2]);

        assert_eq!(
            session
                .open_logical_channel(Some(&AID), 0x00, &caller(), None)
                .map(|c| c.is_some()),
            Err(ServiceError::IllegalState("Session is closed".into()))
        );
    }

    #[test]
    fn test_unsupported_p2() {
        let (session, _, hal) = open_session(TerminalConfig::new("eSE1"));

        assert!(matches!(
            session.open_logical_channel(Some(&AID), 0x02, &caller(), None),
            Err(ServiceError::UnsupportedOperation(_))
        ));
        assert!(matches!(
            session.open_basic_channel(Some(&AID), 0x10, &caller(), None),
            Err(ServiceError::UnsupportedOperation(_))
        ));
        assert_eq!(hal.logical_opens() + hal.basic_opens(), 0);
    }

    #[test]
    fn test_uicc_basic_channel() {
        let (session, _, hal) = open_session(TerminalConfig::new("SIM1"));
        assert!(
            session
                .open_basic_channel(Some(&AID), 0x00, &caller(), None)
                .unwrap()
                .is_none()
        );
        assert_eq!(hal.basic_opens(), 0);

        let (session, _, _) =
            open_session(TerminalConfig::new("SIM1").with_uicc_basic_channel(true));
        let basic = session
            .open_basic_channel(Some(&AID), 0x00, &caller(), None)
            .unwrap()
            .unwrap();
        assert!(basic.is_basic_channel());
    }

    #[test]
    fn test_error_translation() {
        let (session, terminal, hal) = open_session(TerminalConfig::new("eSE1"));
        let channel = session
            .open_logical_channel(Some(&AID), 0x00, &caller(), None)
            .unwrap()
            .unwrap();

        assert!(matches!(
            channel.transmit(&intruder(), &hex!("00B0000000")),
            Err(ServiceError::Security(_))
        ));
        assert!(matches!(
            channel.transmit(&caller(), &hex!("00B0")),
            Err(ServiceError::IllegalArgument(_))
        ));

        hal.push_response(&hex!("6A82"));
        assert_eq!(channel.select_next(&caller()), Ok(false));

        hal.set_dead(true);
        let error = channel.transmit(&caller(), &hex!("00B0000000")).unwrap_err();
        assert_eq!(error.code(), Some(ServiceError::IO_ERROR));

        hal.set_dead(false);
        terminal.on_connection_state_changed(false);
        assert!(channel.is_closed());
        assert_eq!(session.channel_count(), 0);
        assert!(matches!(
            channel.transmit(&caller(), &hex!("00B0000000")),
            Err(ServiceError::IllegalState(_))
        ));
        assert!(matches!(
            session.open_logical_channel(Some(&AID), 0x00, &caller(), None),
            Err(ServiceError::Io(_))
        ));
    }

    #[test]
    fn test_close_channels_keeps_session_open() {
        let (session, terminal, _) = open_session(TerminalConfig::new("eSE1"));
        let channel = session
            .open_basic_channel(Some(&AID), 0x00, &caller(), None)
            .unwrap()
            .unwrap();

        session.close_channels();
        assert!(channel.is_closed());
        assert!(!session.is_closed());
        assert_eq!(terminal.channel_count(), 0);

        assert!(
            session
                .open_basic_channel(None, 0x00, &caller(), None)
                .unwrap()
                .is_some()
        );
    }
}
