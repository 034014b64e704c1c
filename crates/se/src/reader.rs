//! Readers expose a terminal to clients through sessions

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::info;

use crate::error::{ServiceError, ServiceResult};
use crate::session::Session;
use crate::terminal::Terminal;

/// Client entry point to one terminal
pub struct Reader {
    terminal: Arc<Terminal>,
    sessions: Mutex<Vec<Arc<Session>>>,
    this: Weak<Self>,
}

impl fmt::Debug for Reader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("name", &self.terminal.name())
            .field("sessions", &self.sessions.lock().len())
            .finish_non_exhaustive()
    }
}

impl Reader {
    /// Create a reader for `terminal`
    pub fn new(terminal: Arc<Terminal>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            terminal,
            sessions: Mutex::new(Vec::new()),
            this: this.clone(),
        })
    }

    /// Name of the underlying terminal
    pub fn name(&self) -> &str {
        self.terminal.name()
    }

    /// Underlying terminal
    pub const fn terminal(&self) -> &Arc<Terminal> {
        &self.terminal
    }

    /// Whether a secure element is present
    pub fn is_secure_element_present(&self) -> bool {
        self.terminal.is_secure_element_present()
    }

    /// Open a session on this reader
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Io`] when no secure element is present.
    pub fn open_session(&self) -> ServiceResult<Arc<Session>> {
        if !self.is_secure_element_present() {
            return Err(ServiceError::Io("Secure Element is not present.".into()));
        }
        let session = Session::new(self.this.clone(), Arc::clone(&self.terminal));
        self.sessions.lock().push(Arc::clone(&session));
        Ok(session)
    }

    /// Number of open sessions
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Close every session opened on this reader
    pub fn close_sessions(&self) {
        let sessions = std::mem::take(&mut *self.sessions.lock());
        for session in sessions {
            session.close();
        }
    }

    /// Reset the secure element, see [`Terminal::reset`]
    pub fn reset(&self) -> bool {
        let reset = self.terminal.reset();
        info!(reader = %self.name(), reset, "Reset requested");
        reset
    }

    pub(crate) fn forget_session(&self, session: &Session) {
        self.sessions
            .lock()
            .retain(|s| !std::ptr::eq(Arc::as_ptr(s), session));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TerminalConfig;
    use crate::hal::HalStatus;
    use crate::testing::{AID, caller, connected_terminal};

    #[test]
    fn test_sessions() {
        let (terminal, hal, _) = connected_terminal(TerminalConfig::new("eSE1"));
        let reader = Reader::new(terminal);
        assert_eq!(reader.name(), "eSE1");
        assert!(reader.is_secure_element_present());

        let first = reader.open_session().unwrap();
        let second = reader.open_session().unwrap();
        assert!(Arc::ptr_eq(&first.reader().unwrap(), &reader));
        first
            .open_logical_channel(Some(&AID), 0x00, &caller(), None)
            .unwrap()
            .unwrap();
        assert_eq!(reader.session_count(), 2);

        first.close();
        assert_eq!(reader.session_count(), 1);
        assert_eq!(hal.closed(), vec![1]);

        reader.close_sessions();
        assert!(second.is_closed());
        assert_eq!(reader.session_count(), 0);
    }

    #[test]
    fn test_no_secure_element() {
        let (terminal, hal, _) = connected_terminal(TerminalConfig::new("eSE1"));
        hal.set_present(false);
        let reader = Reader::new(terminal);

        let error = reader.open_session().unwrap_err();
        assert_eq!(error.code(), Some(ServiceError::IO_ERROR));
    }

    #[test]
    fn test_reset() {
        let (terminal, hal, _) = connected_terminal(TerminalConfig::new("eSE1"));
        let reader = Reader::new(terminal);
        assert!(reader.reset());

        hal.set_reset_status(HalStatus::Failed);
        assert!(!reader.reset());
    }
}
