//! Scripted hardware link and access control for unit tests

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use hex_literal::hex;
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

use crate::access::{AccessControl, AccessControlError, ApduFilter, Caller, ChannelAccess};
use crate::config::TerminalConfig;
use crate::hal::{
    BasicChannelResponse, HalError, HalStatus, LogicalChannelResponse, SecureElementHal,
};
use crate::terminal::Terminal;

pub(crate) const PACKAGE: &str = "com.example.wallet";
pub(crate) const AID: [u8; 8] = hex!("A000000151000000");
pub(crate) const SUCCESS: [u8; 2] = hex!("9000");

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub(crate) fn caller() -> Caller {
    Caller::new(100, PACKAGE)
}

pub(crate) fn intruder() -> Caller {
    Caller::new(200, PACKAGE)
}

/// Terminal over fresh mocks, already connected
pub(crate) fn connected_terminal(
    config: TerminalConfig,
) -> (Arc<Terminal>, MockHal, MockAccessControl) {
    init_tracing();
    let hal = MockHal::new();
    let access_control = MockAccessControl::new();
    let terminal = Terminal::new(config, hal.boxed(), Arc::new(access_control.clone()));
    terminal.on_connection_state_changed(true);
    (terminal, hal, access_control)
}

#[derive(Debug)]
struct HalScript {
    responses: VecDeque<Bytes>,
    transmitted: Vec<Bytes>,
    closed: Vec<u8>,
    basic_opens: usize,
    logical_opens: usize,
    basic_status: HalStatus,
    logical: VecDeque<LogicalChannelResponse>,
    next_channel: i32,
    close_status: HalStatus,
    reset_status: HalStatus,
    present: bool,
    atr: Bytes,
    dead: bool,
    inits: usize,
}

/// Hardware link answering from a script; clones share the script
#[derive(Debug, Clone)]
pub(crate) struct MockHal(Arc<Mutex<HalScript>>);

impl MockHal {
    pub(crate) fn new() -> Self {
        Self(Arc::new(Mutex::new(HalScript {
            responses: VecDeque::new(),
            transmitted: Vec::new(),
            closed: Vec::new(),
            basic_opens: 0,
            logical_opens: 0,
            basic_status: HalStatus::Success,
            logical: VecDeque::new(),
            next_channel: 1,
            close_status: HalStatus::Success,
            reset_status: HalStatus::Success,
            present: true,
            atr: Bytes::from_static(&hex!("3B8F8001804F0CA0000003060300030000000068")),
            dead: false,
            inits: 0,
        })))
    }

    pub(crate) fn boxed(&self) -> Box<dyn SecureElementHal> {
        Box::new(self.clone())
    }

    /// Queue a response; once the queue is empty every command gets 9000
    pub(crate) fn push_response(&self, response: &[u8]) {
        self.0
            .lock()
            .responses
            .push_back(Bytes::copy_from_slice(response));
    }

    pub(crate) fn push_logical(&self, channel_number: i32, status: HalStatus) {
        self.0.lock().logical.push_back(LogicalChannelResponse {
            channel_number,
            select_response: Bytes::from_static(&SUCCESS),
            status,
        });
    }

    pub(crate) fn set_basic_status(&self, status: HalStatus) {
        self.0.lock().basic_status = status;
    }

    pub(crate) fn set_close_status(&self, status: HalStatus) {
        self.0.lock().close_status = status;
    }

    pub(crate) fn set_reset_status(&self, status: HalStatus) {
        self.0.lock().reset_status = status;
    }

    pub(crate) fn set_present(&self, present: bool) {
        self.0.lock().present = present;
    }

    pub(crate) fn set_atr(&self, atr: &[u8]) {
        self.0.lock().atr = Bytes::copy_from_slice(atr);
    }

    pub(crate) fn set_dead(&self, dead: bool) {
        self.0.lock().dead = dead;
    }

    pub(crate) fn transmitted(&self) -> Vec<Bytes> {
        self.0.lock().transmitted.clone()
    }

    pub(crate) fn clear_transmitted(&self) {
        self.0.lock().transmitted.clear();
    }

    pub(crate) fn closed(&self) -> Vec<u8> {
        self.0.lock().closed.clone()
    }

    pub(crate) fn basic_opens(&self) -> usize {
        self.0.lock().basic_opens
    }

    pub(crate) fn logical_opens(&self) -> usize {
        self.0.lock().logical_opens
    }

    pub(crate) fn inits(&self) -> usize {
        self.0.lock().inits
    }
}

impl SecureElementHal for MockHal {
    fn init(&mut self) -> Result<(), HalError> {
        let mut script = self.0.lock();
        if script.dead {
            return Err(HalError::Dead);
        }
        script.inits += 1;
        Ok(())
    }

    fn open_basic_channel(
        &mut self,
        _aid: &[u8],
        _p2: u8,
    ) -> Result<BasicChannelResponse, HalError> {
        let mut script = self.0.lock();
        script.basic_opens += 1;
        Ok(BasicChannelResponse {
            select_response: Bytes::from_static(&SUCCESS),
            status: script.basic_status,
        })
    }

    fn open_logical_channel(
        &mut self,
        _aid: &[u8],
        _p2: u8,
    ) -> Result<LogicalChannelResponse, HalError> {
        let mut script = self.0.lock();
        script.logical_opens += 1;
        if let Some(response) = script.logical.pop_front() {
            return Ok(response);
        }
        let channel_number = script.next_channel;
        script.next_channel += 1;
        Ok(LogicalChannelResponse {
            channel_number,
            select_response: Bytes::from_static(&SUCCESS),
            status: HalStatus::Success,
        })
    }

    fn close_channel(&mut self, channel_number: u8) -> Result<HalStatus, HalError> {
        let mut script = self.0.lock();
        script.closed.push(channel_number);
        Ok(script.close_status)
    }

    fn do_transmit(&mut self, command: &[u8]) -> Result<Bytes, HalError> {
        let mut script = self.0.lock();
        if script.dead {
            return Err(HalError::Dead);
        }
        script.transmitted.push(Bytes::copy_from_slice(command));
        Ok(script
            .responses
            .pop_front()
            .unwrap_or_else(|| Bytes::from_static(&SUCCESS)))
    }

    fn atr(&mut self) -> Result<Bytes, HalError> {
        Ok(self.0.lock().atr.clone())
    }

    fn is_card_present(&mut self) -> Result<bool, HalError> {
        let script = self.0.lock();
        if script.dead {
            return Err(HalError::Dead);
        }
        Ok(script.present)
    }

    fn reset(&mut self) -> Result<HalStatus, HalError> {
        Ok(self.0.lock().reset_status)
    }
}

#[derive(Debug, Default)]
struct AccessScript {
    denied: bool,
    unavailable: bool,
    io_error: bool,
    no_rule_found: bool,
    filters: Vec<ApduFilter>,
    default_aid: Option<Bytes>,
    inits: usize,
    resets: usize,
    refresh_tags: Vec<bool>,
    checked: Vec<Bytes>,
}

/// Access control engine answering from a script; clones share the script
#[derive(Debug, Clone, Default)]
pub(crate) struct MockAccessControl(Arc<Mutex<AccessScript>>);

impl MockAccessControl {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_denied(&self, denied: bool) {
        self.0.lock().denied = denied;
    }

    pub(crate) fn set_unavailable(&self, unavailable: bool) {
        self.0.lock().unavailable = unavailable;
    }

    pub(crate) fn set_io_error(&self, io_error: bool) {
        self.0.lock().io_error = io_error;
    }

    pub(crate) fn set_no_rule_found(&self, no_rule_found: bool) {
        self.0.lock().no_rule_found = no_rule_found;
    }

    pub(crate) fn set_filters(&self, filters: Vec<ApduFilter>) {
        self.0.lock().filters = filters;
    }

    pub(crate) fn set_default_aid(&self, aid: &[u8]) {
        self.0.lock().default_aid = Some(Bytes::copy_from_slice(aid));
    }

    pub(crate) fn inits(&self) -> usize {
        self.0.lock().inits
    }

    pub(crate) fn resets(&self) -> usize {
        self.0.lock().resets
    }

    /// Refresh tag flag of every rule lookup so far
    pub(crate) fn refresh_tags(&self) -> Vec<bool> {
        self.0.lock().refresh_tags.clone()
    }

    pub(crate) fn checked(&self) -> Vec<Bytes> {
        self.0.lock().checked.clone()
    }
}

impl AccessControl for MockAccessControl {
    fn initialize(&self) -> Result<(), AccessControlError> {
        let mut script = self.0.lock();
        if script.unavailable {
            return Err(AccessControlError::RulesUnavailable("ARA not ready".into()));
        }
        script.inits += 1;
        Ok(())
    }

    fn reset(&self) {
        self.0.lock().resets += 1;
    }

    fn is_no_rule_found(&self) -> bool {
        self.0.lock().no_rule_found
    }

    fn set_up_channel_access(
        &self,
        _aid: Option<&[u8]>,
        package_name: &str,
        check_refresh_tag: bool,
    ) -> Result<ChannelAccess, AccessControlError> {
        let mut script = self.0.lock();
        script.refresh_tags.push(check_refresh_tag);
        if script.unavailable {
            return Err(AccessControlError::RulesUnavailable("ARA not ready".into()));
        }
        if script.io_error {
            return Err(AccessControlError::Io("rule read failed".into()));
        }
        if script.denied {
            return Ok(ChannelAccess::denied(package_name, "denied by rule"));
        }
        Ok(ChannelAccess::allowed(package_name).with_apdu_filters(script.filters.clone()))
    }

    fn check_command(
        &self,
        channel: &crate::Channel,
        command: &[u8],
    ) -> Result<(), AccessControlError> {
        self.0.lock().checked.push(Bytes::copy_from_slice(command));
        channel
            .access()
            .ok_or_else(|| AccessControlError::Denied("Channel access not set".into()))?
            .check_command(command)
    }

    fn default_access_control_aid(&self) -> Option<Bytes> {
        self.0.lock().default_aid.clone()
    }

    fn is_nfc_event_allowed(
        &self,
        _aid: &[u8],
        package_names: &[String],
        check_refresh_tag: bool,
    ) -> Result<Vec<bool>, AccessControlError> {
        let mut script = self.0.lock();
        script.refresh_tags.push(check_refresh_tag);
        if script.io_error {
            return Err(AccessControlError::Io("rule read failed".into()));
        }
        Ok(package_names.iter().map(|p| p == PACKAGE).collect())
    }
}
