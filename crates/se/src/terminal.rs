//! One secure element and the channels multiplexed onto it
//!
//! A [`Terminal`] owns the hardware link of a single secure element. All
//! hardware access goes through its lock, which also guards the channel map
//! and the connection flags, so check-then-act sequences such as "is the basic
//! channel free, then register it" are atomic.
//!
//! Lock order is terminal before session. The access control engine is never
//! called for rule decisions while the lock is held.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use nexum_apdu_core::constants::{channel, cla};
use nexum_apdu_core::prelude::ResponseBuffer;
use nexum_apdu_core::{Command, StatusWord};
use parking_lot::Mutex;
use tracing::{Level, debug, error, info, instrument, warn};

use crate::access::{AccessControl, AccessControlError, AccessStatus, Caller, ChannelAccess, Pid};
use crate::channel::{Channel, OwnerLink, OwnerListener};
use crate::config::TerminalConfig;
use crate::error::{Error, Result};
use crate::hal::{HalStatus, SecureElementHal};
use crate::session::Session;

/// Shortest AID accepted when opening a channel
pub const AID_MIN_LEN: usize = 5;
/// Longest AID accepted when opening a channel
pub const AID_MAX_LEN: usize = 16;

/// Where a newly opened channel gets attached
#[derive(Debug, Default, Clone)]
pub struct ChannelBinding {
    /// Session tracking the channel
    pub session: Weak<Session>,
    /// Liveness link to the client owning the channel
    pub owner: Option<Arc<dyn OwnerLink>>,
}

impl ChannelBinding {
    /// Bind to `session` and, if given, watch `owner`
    pub fn new(session: Weak<Session>, owner: Option<Arc<dyn OwnerLink>>) -> Self {
        Self { session, owner }
    }

    fn link(&self, channel: &Arc<Channel>) {
        if let Some(owner) = &self.owner {
            let channel: Weak<Channel> = Arc::downgrade(channel);
            let listener: Weak<dyn OwnerListener> = channel;
            owner.link(listener);
        }
    }
}

struct TerminalState {
    hal: Box<dyn SecureElementHal>,
    connected: bool,
    default_application_selected: bool,
    access_control_ready: bool,
    channels: BTreeMap<u8, Arc<Channel>>,
}

/// A secure element reachable through one hardware link
pub struct Terminal {
    name: String,
    config: TerminalConfig,
    access_control: Arc<dyn AccessControl>,
    state: Mutex<TerminalState>,
    this: Weak<Self>,
}

impl fmt::Debug for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Terminal")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("access_control", &self.access_control)
            .finish_non_exhaustive()
    }
}

impl Terminal {
    /// Create a disconnected terminal over `hal`
    ///
    /// Call [`initialize`](Self::initialize) to bring the link up; the link
    /// then reports its state through
    /// [`on_connection_state_changed`](Self::on_connection_state_changed).
    pub fn new(
        config: TerminalConfig,
        hal: Box<dyn SecureElementHal>,
        access_control: Arc<dyn AccessControl>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            name: config.name.clone(),
            config,
            access_control,
            state: Mutex::new(TerminalState {
                hal,
                connected: false,
                default_application_selected: true,
                access_control_ready: false,
                channels: BTreeMap::new(),
            }),
            this: this.clone(),
        })
    }

    /// Terminal name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Terminal configuration
    pub const fn config(&self) -> &TerminalConfig {
        &self.config
    }

    /// Access control engine of this terminal
    pub const fn access_control(&self) -> &Arc<dyn AccessControl> {
        &self.access_control
    }

    /// Whether the hardware link is usable
    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Whether the default application is selected on the basic channel
    pub fn is_default_application_selected(&self) -> bool {
        self.state.lock().default_application_selected
    }

    /// Open channel with the given number
    pub fn channel(&self, number: u8) -> Option<Arc<Channel>> {
        self.state.lock().channels.get(&number).cloned()
    }

    /// Number of open channels
    pub fn channel_count(&self) -> usize {
        self.state.lock().channels.len()
    }

    /// Bring up the hardware link
    ///
    /// Also used to reconnect after [`on_link_died`](Self::on_link_died).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the link cannot be initialized.
    pub fn initialize(&self) -> Result<()> {
        self.state.lock().hal.init()?;
        info!(terminal = %self.name, "Hardware link initialized");
        Ok(())
    }

    /// Handle a connection state notification from the hardware link
    ///
    /// Every open channel is closed on either transition. Going down drops
    /// the access rules; coming up reloads them and marks the default
    /// application as selected.
    pub fn on_connection_state_changed(&self, connected: bool) {
        let closed = {
            let mut state = self.state.lock();
            info!(
                terminal = %self.name,
                was_connected = state.connected,
                connected,
                "Connection state changed"
            );
            state.connected = connected;
            if !connected {
                state.access_control_ready = false;
            }
            let closed = self.close_channels_locked(&mut state);
            if connected {
                state.default_application_selected = true;
            }
            closed
        };

        for channel in &closed {
            channel.detach_from_session();
        }

        if connected {
            if let Err(e) = self.initialize_access_control() {
                warn!(terminal = %self.name, error = %e, "Access control initialization failed");
            }
        } else {
            self.access_control.reset();
        }
    }

    /// Handle the death of the hardware link
    ///
    /// The terminal behaves as disconnected until the link is initialized
    /// again.
    pub fn on_link_died(&self) {
        error!(terminal = %self.name, "Hardware link died");
        self.on_connection_state_changed(false);
    }

    /// Answer-to-reset of the secure element
    pub fn atr(&self) -> Option<Bytes> {
        let mut state = self.state.lock();
        if !state.connected {
            return None;
        }
        match state.hal.atr() {
            Ok(atr) if !atr.is_empty() => Some(atr),
            Ok(_) => None,
            Err(e) => {
                debug!(terminal = %self.name, error = %e, "Failed to read ATR");
                None
            }
        }
    }

    /// Whether a secure element is present, false when the link fails
    pub fn is_secure_element_present(&self) -> bool {
        match self.state.lock().hal.is_card_present() {
            Ok(present) => present,
            Err(e) => {
                debug!(terminal = %self.name, error = %e, "Presence check failed");
                false
            }
        }
    }

    /// Reset the secure element
    ///
    /// Returns whether the reset was triggered. The link reports the
    /// resulting disconnect and reconnect through
    /// [`on_connection_state_changed`](Self::on_connection_state_changed).
    pub fn reset(&self) -> bool {
        let mut state = self.state.lock();
        if !state.connected {
            return false;
        }
        match state.hal.reset() {
            Ok(HalStatus::Success) => true,
            Ok(status) => {
                debug!(terminal = %self.name, ?status, "Reset not performed");
                false
            }
            Err(e) => {
                warn!(terminal = %self.name, error = %e, "Reset failed");
                false
            }
        }
    }

    /// Open the basic channel
    ///
    /// Returns `None` when the basic channel is taken, when no AID is given
    /// and the default application is not selected, when the secure element
    /// has no channel available, or when access rules are unavailable for now.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidAid`] for an AID outside of 5..=16 bytes
    /// - [`Error::NotConnected`] when the link is down
    /// - [`Error::Security`] when the access rules refuse the caller
    /// - [`Error::UnsupportedOperation`], [`Error::Io`] or
    ///   [`Error::NotFound`] as reported by the hardware
    #[instrument(level = "debug", skip_all, fields(terminal = %self.name, p2))]
    pub fn open_basic_channel(
        &self,
        aid: Option<&[u8]>,
        p2: u8,
        caller: &Caller,
        binding: ChannelBinding,
    ) -> Result<Option<Arc<Channel>>> {
        let aid = normalize_aid(aid)?;
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let access = match caller.package_name() {
            Some(package) => match self.channel_access(aid.as_deref(), package, caller.pid())? {
                Some(access) => Some(access),
                None => return Ok(None),
            },
            None => None,
        };

        let channel = {
            let mut state = self.state.lock();
            if !state.connected {
                return Err(Error::NotConnected);
            }
            if state.channels.contains_key(&channel::BASIC) {
                warn!("Basic channel in use");
                return Ok(None);
            }
            if aid.is_none() && !state.default_application_selected {
                warn!("Default application is not selected");
                return Ok(None);
            }

            let response = state
                .hal
                .open_basic_channel(aid.as_deref().unwrap_or_default(), p2)?;
            check_open_status(response.status, "openBasicChannel")?;
            if !response.status.is_success() {
                warn!(status = ?response.status, "Basic channel not opened");
                return Ok(None);
            }

            let channel = Arc::new(Channel::new(
                self.this.clone(),
                binding.session.clone(),
                channel::BASIC,
                response.select_response,
                aid.clone(),
                access,
            ));
            if aid.is_some() {
                state.default_application_selected = false;
            }
            state.channels.insert(channel::BASIC, Arc::clone(&channel));
            channel
        };

        binding.link(&channel);
        info!(aid = ?aid.as_ref().map(hex::encode), "Basic channel opened");
        Ok(Some(channel))
    }

    /// Open a logical channel
    ///
    /// Without a package name no access decision is attached, and the
    /// channel rejects every transmit.
    ///
    /// Returns `None` when the secure element has no channel available, when
    /// it reports no valid channel number, or when access rules are
    /// unavailable for now.
    ///
    /// # Errors
    ///
    /// The errors of [`open_basic_channel`](Self::open_basic_channel), plus
    /// [`Error::Io`] when the secure element assigns a channel number that
    /// cannot be encoded.
    #[instrument(level = "debug", skip_all, fields(terminal = %self.name, p2))]
    pub fn open_logical_channel(
        &self,
        aid: Option<&[u8]>,
        p2: u8,
        caller: &Caller,
        binding: ChannelBinding,
    ) -> Result<Option<Arc<Channel>>> {
        let aid = normalize_aid(aid)?;
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let access = match caller.package_name() {
            Some(package) => match self.channel_access(aid.as_deref(), package, caller.pid())? {
                Some(access) => Some(access),
                None => return Ok(None),
            },
            None => None,
        };

        let channel = {
            let mut state = self.state.lock();
            if !state.connected {
                return Err(Error::NotConnected);
            }
            let response = state
                .hal
                .open_logical_channel(aid.as_deref().unwrap_or_default(), p2)?;
            check_open_status(response.status, "openLogicalChannel")?;
            if response.channel_number <= 0 || !response.status.is_success() {
                warn!(
                    channel = response.channel_number,
                    status = ?response.status,
                    "Logical channel not opened"
                );
                return Ok(None);
            }

            let number = match u8::try_from(response.channel_number) {
                Ok(number) if number <= channel::MAX => number,
                _ => {
                    error!(channel = response.channel_number, "Channel number out of range");
                    if let Ok(number) = u8::try_from(response.channel_number) {
                        if let Err(e) = state.hal.close_channel(number) {
                            debug!(error = %e, "Failed to close out of range channel");
                        }
                    }
                    return Err(Error::io(format!(
                        "Channel number out of range: {}",
                        response.channel_number
                    )));
                }
            };

            let channel = Arc::new(Channel::new(
                self.this.clone(),
                binding.session.clone(),
                number,
                response.select_response,
                aid.clone(),
                access,
            ));
            if let Some(stale) = state.channels.insert(number, Arc::clone(&channel)) {
                error!(channel = number, "Secure element reused an open channel number");
                stale.mark_closed();
            }
            channel
        };

        binding.link(&channel);
        info!(
            channel = channel.number(),
            aid = ?aid.as_ref().map(hex::encode),
            "Logical channel opened"
        );
        Ok(Some(channel))
    }

    /// Close `channel` if it was opened on this terminal
    pub fn close_channel(&self, channel: &Channel) {
        if channel.belongs_to(self) {
            channel.close();
        }
    }

    /// Close every open channel
    pub fn close_channels(&self) {
        let closed = {
            let mut state = self.state.lock();
            self.close_channels_locked(&mut state)
        };
        for channel in &closed {
            channel.detach_from_session();
        }
    }

    /// Select the default application on the basic channel
    ///
    /// Falls back to the access control AID when the default application is
    /// not found. Failures are logged and dropped.
    pub fn select_default_application(&self) {
        let mut state = self.state.lock();
        self.select_default_application_locked(&mut state);
    }

    /// Send raw APDU bytes and return the complete response
    ///
    /// A `6Cxx` answer is retried once with the corrected Le. `61xx` answers
    /// are followed by GET RESPONSE commands and the data is concatenated.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] when the link is down
    /// - [`Error::Io`] on link failure, a response without status word, or a
    ///   response chain longer than the configured limit
    #[instrument(level = "trace", skip_all, fields(terminal = %self.name))]
    pub fn transmit(&self, command: &[u8]) -> Result<Bytes> {
        let response = {
            let mut state = self.state.lock();
            self.transmit_locked(&mut state, command)?
        };
        if let Some(status) = StatusWord::from_response(&response) {
            log_status(status);
        }
        Ok(response)
    }

    /// Decide which packages may receive NFC events from `aid`
    ///
    /// Returns `None` when the rules cannot be consulted.
    pub fn is_nfc_event_allowed(&self, aid: &[u8], package_names: &[String]) -> Option<Vec<bool>> {
        let result = self.ensure_access_control().and_then(|check_refresh_tag| {
            self.access_control
                .is_nfc_event_allowed(aid, package_names, check_refresh_tag)
        });
        match result {
            Ok(allowed) => Some(allowed),
            Err(e) => {
                info!(terminal = %self.name, error = %e, "NFC event check failed");
                None
            }
        }
    }

    /// Release a channel that has just been marked closed
    pub(crate) fn release_channel(&self, channel: &Channel) {
        let mut state = self.state.lock();
        self.release_locked(&mut state, channel);
    }

    fn initialize_access_control(&self) -> std::result::Result<(), AccessControlError> {
        self.access_control.initialize()?;
        self.state.lock().access_control_ready = true;
        Ok(())
    }

    /// Make sure rules are loaded, returning whether the refresh tag must be
    /// checked on the next lookup
    fn ensure_access_control(&self) -> std::result::Result<bool, AccessControlError> {
        let ready = self.state.lock().access_control_ready;
        if ready && !self.access_control.is_no_rule_found() {
            return Ok(true);
        }
        self.initialize_access_control()?;
        Ok(false)
    }

    /// Access decision for `package`, `None` when rules are unavailable for now
    fn channel_access(
        &self,
        aid: Option<&[u8]>,
        package: &str,
        pid: Pid,
    ) -> Result<Option<ChannelAccess>> {
        if self.config.is_privileged(package) {
            debug!(package, "Privileged package, granting full access");
            return Ok(Some(ChannelAccess::privileged(package, pid)));
        }

        let lookup = self.ensure_access_control().and_then(|check_refresh_tag| {
            self.access_control
                .set_up_channel_access(aid, package, check_refresh_tag)
        });
        let access = match lookup {
            Ok(access) => access,
            Err(AccessControlError::RulesUnavailable(reason)) => {
                warn!(terminal = %self.name, reason = %reason, "Access rules unavailable");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if access.access() != AccessStatus::Allowed {
            return Err(Error::security(access.reason()));
        }
        Ok(Some(access.with_caller(pid)))
    }

    fn transmit_locked(&self, state: &mut TerminalState, command: &[u8]) -> Result<Bytes> {
        if !state.connected {
            return Err(Error::NotConnected);
        }

        let response = exchange(state, command)?;
        let Some(status) = StatusWord::from_response(&response) else {
            return Ok(response);
        };

        if let Some(le) = status.corrected_le() {
            debug!(le, "Wrong Le, resending command");
            let mut retry = command.to_vec();
            if let Some(last) = retry.last_mut() {
                *last = le;
            }
            return exchange(state, &retry);
        }

        if !status.is_more_data_available() {
            return Ok(response);
        }

        let class = command.first().copied().unwrap_or(cla::ISO7816);
        let mut buffer = ResponseBuffer::new(&response)?;
        while let Some(remaining) = buffer.status().remaining_bytes() {
            if buffer.segments() > self.config.max_response_chain {
                error!(segments = buffer.segments(), "Response chain limit exceeded");
                return Err(Error::io("Response chain limit exceeded"));
            }
            let get_response = Command::get_response(class, remaining).to_bytes()?;
            let next = exchange(state, &get_response)?;
            buffer.push(&next)?;
        }
        Ok(buffer.finish())
    }

    fn select_locked(&self, state: &mut TerminalState, aid: &[u8]) -> Result<()> {
        let command = Command::select_by_name(aid).to_bytes()?;
        let response = self.transmit_locked(state, &command)?;
        match StatusWord::from_response(&response) {
            Some(status) if status.is_success() => Ok(()),
            Some(status) => Err(Error::NotFound(format!("Status word is incorrect: {status}"))),
            None => Err(Error::NotFound("Status word is missing".into())),
        }
    }

    fn select_default_application_locked(&self, state: &mut TerminalState) {
        match self.select_locked(state, &[]) {
            Ok(()) => {
                state.default_application_selected = true;
            }
            Err(Error::NotFound(reason)) => {
                debug!(terminal = %self.name, reason = %reason, "Default application not found");
                if let Some(aid) = self.access_control.default_access_control_aid() {
                    if let Err(e) = self.select_locked(state, &aid) {
                        debug!(
                            terminal = %self.name,
                            error = %e,
                            "Access control applet not selected"
                        );
                    }
                }
            }
            Err(e) => {
                debug!(terminal = %self.name, error = %e, "Default application selection failed");
            }
        }
    }

    /// Tear down `channel` on the hardware and drop it from the map
    ///
    /// Only acts when the map still holds this very channel.
    fn release_locked(&self, state: &mut TerminalState, channel: &Channel) {
        let number = channel.number();
        let registered = state
            .channels
            .get(&number)
            .is_some_and(|entry| std::ptr::eq(Arc::as_ptr(entry), channel));
        if !registered {
            debug!(channel = number, "Channel already released");
            return;
        }

        if channel.is_basic_channel() {
            self.select_default_application_locked(state);
        }

        if state.connected {
            match state.hal.close_channel(number) {
                Ok(HalStatus::Success) => {}
                Ok(status) if channel.is_basic_channel() => {
                    debug!(?status, "Basic channel close reported an error");
                }
                Ok(status) => {
                    error!(channel = number, ?status, "Error closing channel");
                }
                Err(e) => {
                    error!(channel = number, error = %e, "Exception closing channel");
                }
            }
        }

        state.channels.remove(&number);
    }

    fn close_channels_locked(&self, state: &mut TerminalState) -> Vec<Arc<Channel>> {
        let snapshot: Vec<_> = state.channels.values().cloned().collect();
        let mut closed = Vec::with_capacity(snapshot.len());
        for channel in snapshot {
            if channel.mark_closed() {
                self.release_locked(state, &channel);
                closed.push(channel);
            }
        }
        closed
    }
}

/// Log the final status word at the level it calls for
fn log_status(status: StatusWord) {
    let level = status.tracing_level();
    if level == Level::WARN {
        warn!(%status, description = status.description(), "Command answered");
    } else if level == Level::INFO {
        info!(%status, description = status.description(), "Command answered");
    } else {
        debug!(%status, "Command answered");
    }
}

/// Send one command and require a status word in the answer
fn exchange(state: &mut TerminalState, command: &[u8]) -> Result<Bytes> {
    let response = state.hal.transmit(command)?;
    if response.len() < 2 {
        return Err(Error::io("Error in transmit()"));
    }
    Ok(response)
}

fn normalize_aid(aid: Option<&[u8]>) -> Result<Option<Bytes>> {
    match aid {
        None | Some([]) => Ok(None),
        Some(aid) if (AID_MIN_LEN..=AID_MAX_LEN).contains(&aid.len()) => {
            Ok(Some(Bytes::copy_from_slice(aid)))
        }
        Some(aid) => Err(Error::InvalidAid(aid.len())),
    }
}

/// Map hardware open statuses that are errors
fn check_open_status(status: HalStatus, operation: &str) -> Result<()> {
    match status {
        HalStatus::UnsupportedOperation => {
            Err(Error::unsupported(format!("{operation}() Not supported")))
        }
        HalStatus::IoError => Err(Error::io(format!("{operation}() failed"))),
        HalStatus::NoSuchElement => Err(Error::NotFound(format!("{operation}() failed"))),
        HalStatus::Success | HalStatus::Failed | HalStatus::ChannelNotAvailable => Ok(()),
    }
}
