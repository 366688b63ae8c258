//! Remote session contract and the single-session cache
//!
//! The synchronizer reuses one session across cycles. A session that fails
//! its liveness check, or whose listing failed, is dropped and the next
//! cycle reconnects.

use std::io::Write;

use crate::entry::RemoteFileEntry;
use crate::error::{ConnectionError, SessionError};

/// Operations the synchronizer needs from an open session.
pub trait RemoteSession: Send {
    /// List a remote directory, in the server's order.
    fn list(&mut self, dir: &str) -> Result<Vec<RemoteFileEntry>, SessionError>;

    /// Stream a remote file into `out`, returning the bytes copied.
    fn download(&mut self, path: &str, out: &mut dyn Write) -> Result<u64, SessionError>;

    fn remove(&mut self, path: &str) -> Result<(), SessionError>;

    /// Liveness check run before a cached session is reused.
    fn is_open(&self) -> bool;

    /// Best-effort orderly disconnect.
    fn close(&mut self) {}
}

/// Opens new sessions to one remote endpoint.
pub trait Connect: Send {
    type Session: RemoteSession;

    fn connect(&self) -> Result<Self::Session, ConnectionError>;

    /// `user@host:port` style label for log lines.
    fn target(&self) -> String;
}

/// Keeps at most one open session and hands it out on demand.
pub struct CachingSessionFactory<C: Connect> {
    connector: C,
    cached: Option<C::Session>,
}

impl<C: Connect> CachingSessionFactory<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            cached: None,
        }
    }

    /// Return the cached session if it is still alive, otherwise connect.
    pub fn acquire(&mut self) -> Result<&mut C::Session, ConnectionError> {
        let session = match self.cached.take() {
            Some(session) if session.is_open() => session,
            Some(mut stale) => {
                log::info!("Session to {} went stale, reconnecting", self.connector.target());
                stale.close();
                self.open()?
            }
            None => self.open()?,
        };
        Ok(self.cached.insert(session))
    }

    /// Drop the cached session without trying to reuse it.
    pub fn discard(&mut self) {
        if let Some(mut session) = self.cached.take() {
            log::debug!("discarding session to {}", self.connector.target());
            session.close();
        }
    }

    /// Close the cached session at shutdown.
    pub fn release(&mut self) {
        if let Some(mut session) = self.cached.take() {
            session.close();
            log::info!("Closed session to {}", self.connector.target());
        }
    }

    pub fn has_session(&self) -> bool {
        self.cached.is_some()
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    fn open(&self) -> Result<C::Session, ConnectionError> {
        let session = self.connector.connect()?;
        log::info!("Connected to {}", self.connector.target());
        Ok(session)
    }
}
