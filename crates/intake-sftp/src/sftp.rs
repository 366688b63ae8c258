//! SFTP sessions over libssh2

use std::io::{self, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use ssh2::{CheckResult, FileStat, KnownHostFileKind, Session, Sftp};

use crate::entry::{Marker, RemoteFileEntry};
use crate::error::{ConnectionError, HostKeyProblem, SessionError};
use crate::session::{Connect, RemoteSession};

/// Seconds between SSH keepalive messages on an idle session.
const KEEPALIVE_INTERVAL_SECS: u32 = 30;

/// What to do with a server whose host key is not in known_hosts.
///
/// A key that contradicts a known_hosts record is refused under either policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    Strict,
    #[default]
    AcceptUnknown,
}

impl FromStr for HostKeyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(Self::Strict),
            "accept-unknown" => Ok(Self::AcceptUnknown),
            other => Err(format!(
                "unknown host key policy {other:?} (expected strict or accept-unknown)"
            )),
        }
    }
}

#[derive(Clone)]
pub enum Credentials {
    Password(String),
    PrivateKey {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Password(_) => write!(f, "Password(***)"),
            Self::PrivateKey { path, .. } => write!(f, "PrivateKey({})", path.display()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SftpSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub credentials: Credentials,
    pub host_key_policy: HostKeyPolicy,
    /// OpenSSH known_hosts file; a missing file counts as empty.
    pub known_hosts: Option<PathBuf>,
    pub connect_timeout: Duration,
}

/// Opens authenticated SFTP sessions to one server.
#[derive(Debug, Clone)]
pub struct SftpConnector {
    settings: SftpSettings,
}

impl SftpConnector {
    pub fn new(settings: SftpSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SftpSettings {
        &self.settings
    }

    fn protocol(&self, source: ssh2::Error) -> ConnectionError {
        ConnectionError::Protocol {
            target: self.target(),
            source: source.into(),
        }
    }

    fn open_tcp(&self) -> Result<TcpStream, ConnectionError> {
        let s = &self.settings;
        let unreachable = |source| ConnectionError::Unreachable {
            target: self.target(),
            source,
        };
        let addr = (s.host.as_str(), s.port)
            .to_socket_addrs()
            .map_err(unreachable)?
            .next()
            .ok_or_else(|| {
                unreachable(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} did not resolve", s.host),
                ))
            })?;
        let tcp = TcpStream::connect_timeout(&addr, s.connect_timeout).map_err(unreachable)?;
        Ok(tcp)
    }

    fn verify_host_key(&self, session: &Session) -> Result<(), ConnectionError> {
        let s = &self.settings;
        let rejected = |problem| ConnectionError::HostKey {
            target: self.target(),
            problem,
        };
        let (key, _) = session
            .host_key()
            .ok_or_else(|| rejected(HostKeyProblem::Missing))?;

        let mut known = session.known_hosts().map_err(|e| self.protocol(e))?;
        if let Some(path) = s.known_hosts.as_deref().filter(|p| p.exists()) {
            known
                .read_file(path, KnownHostFileKind::OpenSSH)
                .map_err(|e| self.protocol(e))?;
        }

        match known.check_port(&s.host, s.port, key) {
            CheckResult::Match => Ok(()),
            CheckResult::NotFound if s.host_key_policy == HostKeyPolicy::AcceptUnknown => {
                log::warn!("Accepting unknown host key for {}", self.target());
                Ok(())
            }
            CheckResult::NotFound => Err(rejected(HostKeyProblem::Unknown)),
            CheckResult::Mismatch => Err(rejected(HostKeyProblem::Mismatch)),
            CheckResult::Failure => Err(rejected(HostKeyProblem::CheckFailed)),
        }
    }

    fn authenticate(&self, session: &Session) -> Result<(), ConnectionError> {
        let s = &self.settings;
        let result = match &s.credentials {
            Credentials::Password(password) => session.userauth_password(&s.user, password),
            Credentials::PrivateKey { path, passphrase } => {
                session.userauth_pubkey_file(&s.user, None, path, passphrase.as_deref())
            }
        };
        match result {
            Ok(()) if session.authenticated() => Ok(()),
            Ok(()) => Err(ConnectionError::Auth {
                target: self.target(),
                user: s.user.clone(),
                source: None,
            }),
            Err(e) => Err(ConnectionError::Auth {
                target: self.target(),
                user: s.user.clone(),
                source: Some(e.into()),
            }),
        }
    }
}

impl Connect for SftpConnector {
    type Session = SftpSession;

    fn connect(&self) -> Result<SftpSession, ConnectionError> {
        let tcp = self.open_tcp()?;

        let mut session = Session::new().map_err(|e| self.protocol(e))?;
        session.set_tcp_stream(tcp);
        let timeout_ms = self.settings.connect_timeout.as_millis().min(u32::MAX as u128) as u32;
        session.set_timeout(timeout_ms);
        session.handshake().map_err(|e| self.protocol(e))?;

        self.verify_host_key(&session)?;
        self.authenticate(&session)?;

        let sftp = session.sftp().map_err(|e| self.protocol(e))?;
        session.set_keepalive(true, KEEPALIVE_INTERVAL_SECS);
        Ok(SftpSession { session, sftp })
    }

    fn target(&self) -> String {
        let s = &self.settings;
        format!("{}@{}:{}", s.user, s.host, s.port)
    }
}

/// An authenticated session with its SFTP channel.
pub struct SftpSession {
    session: Session,
    sftp: Sftp,
}

impl RemoteSession for SftpSession {
    fn list(&mut self, dir: &str) -> Result<Vec<RemoteFileEntry>, SessionError> {
        let listing = self
            .sftp
            .readdir(Path::new(dir))
            .map_err(|e| SessionError::new("list", dir, e))?;

        Ok(listing
            .iter()
            .filter_map(|(path, stat)| listing_entry(path, stat))
            .collect())
    }

    fn download(&mut self, path: &str, out: &mut dyn Write) -> Result<u64, SessionError> {
        let mut file = self
            .sftp
            .open(Path::new(path))
            .map_err(|e| SessionError::new("download", path, e))?;
        io::copy(&mut file, out).map_err(|e| SessionError::new("download", path, e))
    }

    fn remove(&mut self, path: &str) -> Result<(), SessionError> {
        self.sftp
            .unlink(Path::new(path))
            .map_err(|e| SessionError::new("remove", path, e))
    }

    /// Round trip on the SFTP channel; a dropped connection fails within the session timeout.
    fn is_open(&self) -> bool {
        if let Err(e) = self.session.keepalive_send() {
            log::debug!("keepalive failed: {e}");
            return false;
        }
        match self.sftp.realpath(Path::new(".")) {
            Ok(_) => true,
            Err(e) => {
                log::debug!("session check failed: {e}");
                false
            }
        }
    }

    fn close(&mut self) {
        if let Err(e) = self.session.disconnect(None, "intake shutting down", None) {
            log::debug!("disconnect failed: {e}");
        }
    }
}

/// Convert one readdir record. `.`, `..` and names that are not UTF-8 are skipped.
fn listing_entry(path: &Path, stat: &FileStat) -> Option<RemoteFileEntry> {
    let raw = path.file_name()?;
    let Some(name) = raw.to_str() else {
        log::warn!("Skipping remote entry with non UTF-8 name: {}", path.display());
        return None;
    };
    if name == "." || name == ".." {
        return None;
    }
    let is_directory = stat.is_dir();
    Some(RemoteFileEntry {
        name: name.to_string(),
        marker: Marker::new(stat.mtime.unwrap_or(0)),
        is_directory,
        size: if is_directory { None } else { stat.size },
    })
}
