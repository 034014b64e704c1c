//! Registry of the readers a service exposes

use std::sync::Arc;

use tracing::{info, warn};

use crate::access::AccessControl;
use crate::config::{ServiceConfig, TerminalConfig, UICC_TERMINAL};
use crate::error::{ServiceError, ServiceResult};
use crate::hal::SecureElementHal;
use crate::reader::Reader;
use crate::terminal::Terminal;

/// Hardware link and access control engine for one configured terminal
pub type TerminalParts = (Box<dyn SecureElementHal>, Arc<dyn AccessControl>);

/// Ordered set of readers
#[derive(Debug, Default)]
pub struct SecureElementService {
    readers: Vec<Arc<Reader>>,
}

impl SecureElementService {
    /// Create an empty service
    pub const fn new() -> Self {
        Self {
            readers: Vec::new(),
        }
    }

    /// Build the readers listed in `config`
    ///
    /// `connect` supplies the parts of each terminal, or `None` when its
    /// hardware is absent. Terminals whose link fails to initialize are
    /// skipped.
    pub fn from_config<F>(config: &ServiceConfig, mut connect: F) -> Self
    where
        F: FnMut(&TerminalConfig) -> Option<TerminalParts>,
    {
        let mut service = Self::new();
        for terminal_config in &config.terminals {
            let Some((hal, access_control)) = connect(terminal_config) else {
                info!(terminal = %terminal_config.name, "No hardware link, skipping terminal");
                continue;
            };
            let terminal = Terminal::new(terminal_config.clone(), hal, access_control);
            if let Err(e) = terminal.initialize() {
                warn!(
                    terminal = %terminal_config.name,
                    error = %e,
                    "Terminal initialization failed"
                );
                continue;
            }
            service.add_terminal(terminal);
        }
        service
    }

    /// Register a terminal, returning its reader
    pub fn add_terminal(&mut self, terminal: Arc<Terminal>) -> Arc<Reader> {
        let reader = Reader::new(terminal);
        info!(reader = %reader.name(), "Reader registered");
        self.readers.push(Arc::clone(&reader));
        reader
    }

    /// Reader names in registration order
    pub fn reader_names(&self) -> Vec<String> {
        self.readers.iter().map(|r| r.name().to_owned()).collect()
    }

    /// Readers in registration order
    pub fn readers(&self) -> &[Arc<Reader>] {
        &self.readers
    }

    /// Reader called `name`
    pub fn reader(&self, name: &str) -> Option<Arc<Reader>> {
        self.readers.iter().find(|r| r.name() == name).cloned()
    }

    /// Reader of the UICC in `slot`, counted from 1
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::IllegalArgument`] when no UICC sits in `slot`.
    pub fn uicc_reader(&self, slot: u32) -> ServiceResult<Arc<Reader>> {
        let name = format!("{UICC_TERMINAL}{slot}");
        self.reader(&name)
            .ok_or_else(|| ServiceError::IllegalArgument(format!("slot {slot} not supported")))
    }

    /// Decide which packages may receive NFC events from `aid` on `reader`
    ///
    /// `Ok(None)` when the access rules cannot be consulted.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::IllegalArgument`] for an unknown reader.
    pub fn is_nfc_event_allowed(
        &self,
        reader: &str,
        aid: &[u8],
        package_names: &[String],
    ) -> ServiceResult<Option<Vec<bool>>> {
        let reader = self
            .reader(reader)
            .ok_or_else(|| ServiceError::IllegalArgument(format!("unknown reader: {reader}")))?;
        Ok(reader.terminal().is_nfc_event_allowed(aid, package_names))
    }

    /// Close every session and channel
    pub fn shutdown(&self) {
        for reader in &self.readers {
            reader.close_sessions();
            reader.terminal().close_channels();
        }
        info!("Secure element service shut down");
    }
}
