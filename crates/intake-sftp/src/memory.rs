//! In-process remote used by tests and dry runs.
//!
//! Files live in a shared map keyed by directory; listings come back in
//! insertion order. Failures can be injected per operation.

use std::collections::{BTreeMap, HashSet};
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::entry::{Marker, RemoteFileEntry};
use crate::error::{ConnectionError, SessionError};
use crate::session::{Connect, RemoteSession};

#[derive(Debug, Clone)]
struct MemoryFile {
    name: String,
    marker: Marker,
    contents: Vec<u8>,
    is_directory: bool,
}

#[derive(Debug)]
struct RemoteState {
    dirs: BTreeMap<String, Vec<MemoryFile>>,
    reachable: bool,
    fail_listing: bool,
    failing_downloads: HashSet<String>,
    generation: u64,
    connections: usize,
    open_sessions: usize,
    downloads: usize,
}

impl Default for RemoteState {
    fn default() -> Self {
        Self {
            dirs: BTreeMap::new(),
            reachable: true,
            fail_listing: false,
            failing_downloads: HashSet::new(),
            generation: 0,
            connections: 0,
            open_sessions: 0,
            downloads: 0,
        }
    }
}

/// Shared handle to a fake remote server. Clones see the same files.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<RemoteState>>,
}

fn normalize(dir: &str) -> String {
    dir.trim_end_matches('/').to_string()
}

fn split(path: &str) -> (String, &str) {
    match path.rsplit_once('/') {
        Some((dir, name)) => (normalize(dir), name),
        None => (String::new(), path),
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            remote: self.clone(),
        }
    }

    /// Create or replace a file. A replaced file keeps its listing position.
    pub fn put_file(&self, dir: &str, name: &str, marker: u64, contents: impl Into<Vec<u8>>) {
        let file = MemoryFile {
            name: name.to_string(),
            marker: Marker::new(marker),
            contents: contents.into(),
            is_directory: false,
        };
        let mut state = self.state();
        let files = state.dirs.entry(normalize(dir)).or_default();
        match files.iter_mut().find(|f| f.name == name) {
            Some(existing) => *existing = file,
            None => files.push(file),
        }
    }

    pub fn add_directory(&self, dir: &str, name: &str) {
        let mut state = self.state();
        state.dirs.entry(normalize(dir)).or_default().push(MemoryFile {
            name: name.to_string(),
            marker: Marker::default(),
            contents: Vec::new(),
            is_directory: true,
        });
    }

    pub fn contains(&self, dir: &str, name: &str) -> bool {
        self.state()
            .dirs
            .get(&normalize(dir))
            .is_some_and(|files| files.iter().any(|f| f.name == name))
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state().reachable = reachable;
    }

    pub fn set_fail_listing(&self, fail: bool) {
        self.state().fail_listing = fail;
    }

    /// Make every download of `name` fail until cleared.
    pub fn fail_download(&self, name: &str, fail: bool) {
        let mut state = self.state();
        if fail {
            state.failing_downloads.insert(name.to_string());
        } else {
            state.failing_downloads.remove(name);
        }
    }

    /// Invalidate every session handed out so far.
    pub fn drop_sessions(&self) {
        let mut state = self.state();
        state.generation += 1;
        state.open_sessions = 0;
    }

    /// Sessions opened since creation.
    pub fn connections(&self) -> usize {
        self.state().connections
    }

    pub fn open_sessions(&self) -> usize {
        self.state().open_sessions
    }

    /// Successful downloads since creation.
    pub fn downloads(&self) -> usize {
        self.state().downloads
    }
}

/// [`Connect`] implementation over a [`MemoryRemote`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    remote: MemoryRemote,
}

impl Connect for MemoryConnector {
    type Session = MemorySession;

    fn connect(&self) -> Result<MemorySession, ConnectionError> {
        let mut state = self.remote.state();
        if !state.reachable {
            return Err(ConnectionError::Unreachable {
                target: self.target(),
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "remote is down"),
            });
        }
        state.connections += 1;
        state.open_sessions += 1;
        Ok(MemorySession {
            remote: self.remote.clone(),
            generation: state.generation,
            closed: false,
        })
    }

    fn target(&self) -> String {
        "memory".to_string()
    }
}

#[derive(Debug)]
pub struct MemorySession {
    remote: MemoryRemote,
    generation: u64,
    closed: bool,
}

impl MemorySession {
    fn check_open(&self, operation: &'static str, path: &str) -> Result<(), SessionError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(SessionError::new(operation, path, "session is closed"))
        }
    }
}

impl RemoteSession for MemorySession {
    fn list(&mut self, dir: &str) -> Result<Vec<RemoteFileEntry>, SessionError> {
        self.check_open("list", dir)?;
        let state = self.remote.state();
        if state.fail_listing {
            return Err(SessionError::new("list", dir, "listing refused"));
        }
        let files = state
            .dirs
            .get(&normalize(dir))
            .ok_or_else(|| SessionError::new("list", dir, "no such directory"))?;
        Ok(files
            .iter()
            .map(|f| RemoteFileEntry {
                name: f.name.clone(),
                marker: f.marker,
                is_directory: f.is_directory,
                size: (!f.is_directory).then_some(f.contents.len() as u64),
            })
            .collect())
    }

    fn download(&mut self, path: &str, out: &mut dyn Write) -> Result<u64, SessionError> {
        self.check_open("download", path)?;
        let (dir, name) = split(path);
        let contents = {
            let state = self.remote.state();
            if state.failing_downloads.contains(name) {
                return Err(SessionError::new("download", path, "transfer aborted"));
            }
            state
                .dirs
                .get(&dir)
                .and_then(|files| files.iter().find(|f| f.name == name && !f.is_directory))
                .map(|f| f.contents.clone())
                .ok_or_else(|| SessionError::new("download", path, "no such file"))?
        };
        out.write_all(&contents)
            .map_err(|e| SessionError::new("download", path, e))?;
        self.remote.state().downloads += 1;
        Ok(contents.len() as u64)
    }

    fn remove(&mut self, path: &str) -> Result<(), SessionError> {
        self.check_open("remove", path)?;
        let (dir, name) = split(path);
        let mut state = self.remote.state();
        let files = state
            .dirs
            .get_mut(&dir)
            .ok_or_else(|| SessionError::new("remove", path, "no such directory"))?;
        let before = files.len();
        files.retain(|f| f.name != name);
        if files.len() == before {
            return Err(SessionError::new("remove", path, "no such file"));
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed && self.remote.state().generation == self.generation
    }

    fn close(&mut self) {
        if self.is_open() {
            let mut state = self.remote.state();
            state.open_sessions = state.open_sessions.saturating_sub(1);
        }
        self.closed = true;
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.close();
    }
}
