//! Access control seam
//!
//! Every channel carries the [`ChannelAccess`] decision taken when it was
//! opened. The rules behind those decisions live in an external
//! [`AccessControl`] engine; this module only defines its interface and the
//! data it hands back.

use std::fmt;

use bytes::Bytes;
use derive_more::Display;
use thiserror::Error;

use crate::channel::Channel;

/// Process identifier of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub struct Pid(pub u32);

/// Identity of the client performing an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pid: Pid,
    package_name: Option<String>,
}

impl Caller {
    /// Client identified by process and package
    pub fn new(pid: u32, package_name: impl Into<String>) -> Self {
        Self {
            pid: Pid(pid),
            package_name: Some(package_name.into()),
        }
    }

    /// Client known only by its process
    pub const fn anonymous(pid: u32) -> Self {
        Self {
            pid: Pid(pid),
            package_name: None,
        }
    }

    /// Process of the client
    pub const fn pid(&self) -> Pid {
        self.pid
    }

    /// Package of the client, if known
    pub fn package_name(&self) -> Option<&str> {
        self.package_name.as_deref()
    }
}

/// Tri-state outcome of a rule lookup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AccessStatus {
    /// Granted
    Allowed,
    /// Refused
    Denied,
    /// No rule applied
    #[default]
    Undefined,
}

/// Header pattern admitted by an access rule
///
/// A command matches when `header[i] & mask[i] == apdu[i]` for the four
/// header bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ApduFilter {
    apdu: [u8; 4],
    mask: [u8; 4],
}

impl ApduFilter {
    /// Create a filter from a header pattern and its mask
    pub const fn new(apdu: [u8; 4], mask: [u8; 4]) -> Self {
        Self { apdu, mask }
    }

    /// Check a command against this filter
    ///
    /// Commands shorter than a header never match.
    pub fn matches(&self, command: &[u8]) -> bool {
        command.len() >= 4
            && command
                .iter()
                .zip(self.mask.iter().zip(self.apdu.iter()))
                .all(|(byte, (mask, apdu))| byte & mask == *apdu)
    }
}

/// Access decision attached to a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelAccess {
    package_name: String,
    caller: Option<Pid>,
    access: AccessStatus,
    apdu_access: AccessStatus,
    nfc_event_access: AccessStatus,
    privilege_access: AccessStatus,
    apdu_filters: Vec<ApduFilter>,
    reason: String,
}

impl ChannelAccess {
    /// Decision for `package_name` with every status undefined
    pub fn new(package_name: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            caller: None,
            access: AccessStatus::Undefined,
            apdu_access: AccessStatus::Undefined,
            nfc_event_access: AccessStatus::Undefined,
            privilege_access: AccessStatus::Undefined,
            apdu_filters: Vec::new(),
            reason: String::from("no access by default"),
        }
    }

    /// Decision granting channel and APDU access
    pub fn allowed(package_name: impl Into<String>) -> Self {
        Self::new(package_name)
            .with_access(AccessStatus::Allowed, "")
            .with_apdu_access(AccessStatus::Allowed)
    }

    /// Decision refusing the channel
    pub fn denied(package_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(package_name).with_access(AccessStatus::Denied, reason)
    }

    /// Full access for a privileged package
    pub fn privileged(package_name: impl Into<String>, caller: Pid) -> Self {
        let mut access = Self::new(package_name)
            .with_access(AccessStatus::Allowed, "Allow privilege application")
            .with_apdu_access(AccessStatus::Allowed)
            .with_nfc_event_access(AccessStatus::Allowed)
            .with_caller(caller);
        access.privilege_access = AccessStatus::Allowed;
        access
    }

    /// Set the channel access status and the reason behind it
    pub fn with_access(mut self, access: AccessStatus, reason: impl Into<String>) -> Self {
        self.access = access;
        self.reason = reason.into();
        self
    }

    /// Set the APDU access status
    pub const fn with_apdu_access(mut self, access: AccessStatus) -> Self {
        self.apdu_access = access;
        self
    }

    /// Set the NFC event access status
    pub const fn with_nfc_event_access(mut self, access: AccessStatus) -> Self {
        self.nfc_event_access = access;
        self
    }

    /// Restrict APDU access to commands matching one of `filters`
    pub fn with_apdu_filters(mut self, filters: impl IntoIterator<Item = ApduFilter>) -> Self {
        self.apdu_filters = filters.into_iter().collect();
        self
    }

    /// Bind the decision to the process that requested it
    pub const fn with_caller(mut self, caller: Pid) -> Self {
        self.caller = Some(caller);
        self
    }

    /// Package the decision was taken for
    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    /// Process the decision is bound to
    pub const fn caller(&self) -> Option<Pid> {
        self.caller
    }

    /// Channel access status
    pub const fn access(&self) -> AccessStatus {
        self.access
    }

    /// APDU access status
    pub const fn apdu_access(&self) -> AccessStatus {
        self.apdu_access
    }

    /// NFC event access status
    pub const fn nfc_event_access(&self) -> AccessStatus {
        self.nfc_event_access
    }

    /// Privilege access status
    pub const fn privilege_access(&self) -> AccessStatus {
        self.privilege_access
    }

    /// APDU filters, empty when the rule does not filter
    pub fn apdu_filters(&self) -> &[ApduFilter] {
        &self.apdu_filters
    }

    /// Reason given for the decision
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Check a command against this decision
    ///
    /// # Errors
    ///
    /// Returns [`AccessControlError::Denied`] when the channel is not allowed,
    /// when filters are set and none matches, or when APDU access is not
    /// granted.
    pub fn check_command(&self, command: &[u8]) -> Result<(), AccessControlError> {
        if self.access != AccessStatus::Allowed {
            return Err(AccessControlError::Denied(self.reason.clone()));
        }

        if !self.apdu_filters.is_empty() {
            if self.apdu_filters.iter().any(|f| f.matches(command)) {
                return Ok(());
            }
            return Err(AccessControlError::Denied(
                "Access Rule does not allow command".into(),
            ));
        }

        match self.apdu_access {
            AccessStatus::Allowed => Ok(()),
            _ => Err(AccessControlError::Denied("APDU access NOT allowed".into())),
        }
    }
}

/// Failures reported by an access control engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessControlError {
    /// Reading the rules from the secure element failed
    #[error("Access control I/O error: {0}")]
    Io(String),

    /// Rules cannot be obtained right now
    #[error("Access rules unavailable: {0}")]
    RulesUnavailable(String),

    /// The rules refuse the operation
    #[error("Access denied: {0}")]
    Denied(String),
}

/// Access rule engine consulted by a [`Terminal`](crate::Terminal)
///
/// Implementations must not call back into the terminal that owns them; the
/// terminal may invoke [`default_access_control_aid`](Self::default_access_control_aid)
/// while holding its own lock.
pub trait AccessControl: Send + Sync + fmt::Debug {
    /// Load or refresh the rules
    fn initialize(&self) -> Result<(), AccessControlError>;

    /// Drop cached rules
    fn reset(&self);

    /// Whether the last load found no rule at all
    fn is_no_rule_found(&self) -> bool {
        false
    }

    /// Decide the access of `package_name` to a channel selecting `aid`
    ///
    /// `aid` is `None` when no applet is selected explicitly.
    fn set_up_channel_access(
        &self,
        aid: Option<&[u8]>,
        package_name: &str,
        check_refresh_tag: bool,
    ) -> Result<ChannelAccess, AccessControlError>;

    /// Check a command about to be sent on `channel`
    fn check_command(&self, channel: &Channel, command: &[u8]) -> Result<(), AccessControlError> {
        channel
            .access()
            .ok_or_else(|| AccessControlError::Denied("Channel access not set".into()))?
            .check_command(command)
    }

    /// Applet to select when the default application cannot be selected
    fn default_access_control_aid(&self) -> Option<Bytes> {
        None
    }

    /// Decide which of `package_names` may receive NFC events from `aid`
    fn is_nfc_event_allowed(
        &self,
        aid: &[u8],
        package_names: &[String],
        check_refresh_tag: bool,
    ) -> Result<Vec<bool>, AccessControlError>;
}
