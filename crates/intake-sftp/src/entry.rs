//! Remote directory listing entries

use std::fmt;

/// Opaque, comparable modification marker of a remote file.
///
/// Backed by the remote mtime in seconds; servers that do not report an
/// mtime yield `0`, so such files are accepted once and never again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Marker(u64);

impl Marker {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    /// Parse the persisted form produced by `Display`.
    pub fn parse(s: &str) -> Option<Self> {
        s.trim().parse().ok().map(Self)
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One result of a remote directory listing. Produced fresh every cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileEntry {
    pub name: String,
    pub marker: Marker,
    pub is_directory: bool,
    /// Size in bytes when the server reports it
    pub size: Option<u64>,
}

impl RemoteFileEntry {
    pub fn file(name: impl Into<String>, marker: Marker) -> Self {
        Self {
            name: name.into(),
            marker,
            is_directory: false,
            size: None,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            marker: Marker::default(),
            is_directory: true,
            size: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Whether the name can be used as a plain file name in the staging
    /// directory (no separators, no `.`/`..`).
    pub fn has_safe_name(&self) -> bool {
        !self.name.is_empty()
            && self.name != "."
            && self.name != ".."
            && !self.name.contains(['/', '\\', '\0'])
    }
}

/// Join a remote directory and a file name with `/`.
pub fn remote_path(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        if name.starts_with('/') {
            name.to_string()
        } else {
            format!("/{name}")
        }
    } else {
        format!("{dir}/{name}")
    }
}
