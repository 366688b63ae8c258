//! Listing filters: name pattern and persistent accept-once
//!
//! Filters run in order and stop at the first rejection, so the pattern
//! check guards the store and non-matching names are never recorded.

use std::sync::Arc;

use glob::Pattern;
use intake_core::staging::NAME_MATCH_OPTIONS;
use intake_store::{MetadataStore, StoreError};

use crate::entry::RemoteFileEntry;

/// A single accept/reject decision over a listing entry.
///
/// Implementations may record state as a side effect of accepting.
pub trait FileListFilter: Send {
    fn accept(&self, entry: &RemoteFileEntry) -> Result<bool, StoreError>;
}

/// Accepts regular files whose name matches a glob.
#[derive(Debug, Clone)]
pub struct PatternFilter {
    pattern: Pattern,
}

impl PatternFilter {
    pub fn new(pattern: &str) -> Result<Self, glob::PatternError> {
        Ok(Self {
            pattern: Pattern::new(pattern)?,
        })
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn matches(&self, name: &str) -> bool {
        self.pattern.matches_with(name, NAME_MATCH_OPTIONS)
    }
}

impl FileListFilter for PatternFilter {
    fn accept(&self, entry: &RemoteFileEntry) -> Result<bool, StoreError> {
        Ok(!entry.is_directory && self.matches(&entry.name))
    }
}

/// Accepts an entry when the store holds no marker for its name, or a
/// different one, and records the new marker before returning.
///
/// Store failures propagate so the caller can treat the entry as not yet
/// fetchable.
pub struct PersistentAcceptOnceFilter {
    store: Arc<dyn MetadataStore>,
    namespace: String,
}

impl PersistentAcceptOnceFilter {
    pub fn new(store: Arc<dyn MetadataStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

impl FileListFilter for PersistentAcceptOnceFilter {
    fn accept(&self, entry: &RemoteFileEntry) -> Result<bool, StoreError> {
        let marker = entry.marker.to_string();
        match self.store.get(&self.namespace, &entry.name)? {
            Some(seen) if seen == marker => Ok(false),
            previous => {
                self.store.put(&self.namespace, &entry.name, &marker)?;
                match previous {
                    Some(old) => log::debug!(
                        "filter: {} changed (marker {old} -> {marker})",
                        entry.name
                    ),
                    None => log::debug!("filter: {} is new (marker {marker})", entry.name),
                }
                Ok(true)
            }
        }
    }
}

/// Ordered chain of filters. An entry passes only if every filter accepts.
#[derive(Default)]
pub struct CompositeFilter {
    filters: Vec<Box<dyn FileListFilter>>,
}

impl CompositeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pattern first, then the persistent accept-once check.
    pub fn standard(
        pattern: &str,
        store: Arc<dyn MetadataStore>,
        namespace: &str,
    ) -> Result<Self, glob::PatternError> {
        Ok(Self::new()
            .with(PatternFilter::new(pattern)?)
            .with(PersistentAcceptOnceFilter::new(store, namespace)))
    }

    pub fn with(mut self, filter: impl FileListFilter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Filter a whole listing, preserving order.
    pub fn filter(&self, entries: Vec<RemoteFileEntry>) -> Result<Vec<RemoteFileEntry>, StoreError> {
        self.filter_up_to(entries, usize::MAX)
    }

    /// Filter a listing, stopping once `max` entries were accepted.
    ///
    /// Entries after the cutoff are not offered to any filter, so nothing is
    /// recorded for them and they stay eligible for a later cycle.
    pub fn filter_up_to(
        &self,
        entries: Vec<RemoteFileEntry>,
        max: usize,
    ) -> Result<Vec<RemoteFileEntry>, StoreError> {
        let mut accepted = Vec::new();
        for entry in entries {
            if accepted.len() >= max {
                break;
            }
            if self.accept(&entry)? {
                accepted.push(entry);
            }
        }
        Ok(accepted)
    }
}

impl FileListFilter for CompositeFilter {
    fn accept(&self, entry: &RemoteFileEntry) -> Result<bool, StoreError> {
        for filter in &self.filters {
            if !filter.accept(entry)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Marker;
    use intake_store::MemoryStore;

    fn file(name: &str, marker: u64) -> RemoteFileEntry {
        RemoteFileEntry::file(name, Marker::new(marker))
    }

    fn names(entries: &[RemoteFileEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Store whose writes always fail.
    struct ReadOnlyStore;

    impl MetadataStore for ReadOnlyStore {
        fn get(&self, _: &str, _: &str) -> Result<Option<String>, StoreError> {
            Ok(None)
        }

        fn put(&self, _: &str, _: &str, _: &str) -> Result<(), StoreError> {
            Err(StoreError::backend("put", "read-only"))
        }

        fn entries(&self, _: &str) -> Result<Vec<(String, String)>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn pattern_matches_whole_name() {
        let f = PatternFilter::new("*.txt").unwrap();
        assert!(f.accept(&file("a.txt", 1)).unwrap());
        assert!(!f.accept(&file("a.txt.bak", 1)).unwrap());
        assert!(!f.accept(&file("a.csv", 1)).unwrap());
        assert!(!f.accept(&RemoteFileEntry::directory("dir.txt")).unwrap());
    }

    #[test]
    fn pattern_is_case_sensitive() {
        let f = PatternFilter::new("*.txt").unwrap();
        assert!(!f.matches("A.TXT"));
        assert!(f.matches(".hidden.txt"));
    }

    #[test]
    fn pattern_agrees_with_staging_recovery() {
        let dir = tempfile::TempDir::new().unwrap();
        let names = ["a.txt", "A.TXT", ".dot.txt", "b.txt.bak", "c[1].txt"];
        for name in names {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let filter = PatternFilter::new("*.txt").unwrap();

        let recovered = intake_core::staging::recover(dir.path(), filter.pattern()).unwrap();
        let mut recovered: Vec<&str> = recovered.iter().map(|h| h.remote_name()).collect();
        recovered.sort();
        let mut accepted: Vec<&str> = names.into_iter().filter(|n| filter.matches(n)).collect();
        accepted.sort();

        assert_eq!(recovered, accepted);
        assert_eq!(accepted, vec![".dot.txt", "a.txt", "c[1].txt"]);
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        assert!(PatternFilter::new("[").is_err());
    }

    #[test]
    fn accept_once_until_marker_changes() {
        let store = Arc::new(MemoryStore::new());
        let f = PersistentAcceptOnceFilter::new(store.clone(), "sftp");

        assert!(f.accept(&file("a.txt", 100)).unwrap());
        assert!(!f.accept(&file("a.txt", 100)).unwrap());
        assert!(f.accept(&file("a.txt", 200)).unwrap());
        assert_eq!(store.get("sftp", "a.txt").unwrap().as_deref(), Some("200"));
    }

    #[test]
    fn older_marker_counts_as_changed() {
        let store = Arc::new(MemoryStore::new());
        let f = PersistentAcceptOnceFilter::new(store, "sftp");
        assert!(f.accept(&file("a.txt", 200)).unwrap());
        assert!(f.accept(&file("a.txt", 100)).unwrap());
    }

    #[test]
    fn non_matching_names_are_never_recorded() {
        let store = Arc::new(MemoryStore::new());
        let chain = CompositeFilter::standard("*.txt", store.clone(), "sftp").unwrap();

        let out = chain
            .filter(vec![file("a.csv", 1), file("b.txt", 1)])
            .unwrap();

        assert_eq!(names(&out), vec!["b.txt"]);
        assert_eq!(store.get("sftp", "a.csv").unwrap(), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn filter_preserves_listing_order() {
        let store = Arc::new(MemoryStore::new());
        let chain = CompositeFilter::standard("*", store, "sftp").unwrap();
        let out = chain
            .filter(vec![file("c", 1), file("a", 1), file("b", 1)])
            .unwrap();
        assert_eq!(names(&out), vec!["c", "a", "b"]);
    }

    #[test]
    fn cap_leaves_remaining_entries_unrecorded() {
        let store = Arc::new(MemoryStore::new());
        let chain = CompositeFilter::standard("*.txt", store.clone(), "sftp").unwrap();
        let listing = vec![file("a.txt", 1), file("b.txt", 1), file("c.txt", 1)];

        let first = chain.filter_up_to(listing.clone(), 1).unwrap();
        assert_eq!(names(&first), vec!["a.txt"]);
        assert_eq!(store.get("sftp", "b.txt").unwrap(), None);

        let second = chain.filter_up_to(listing.clone(), 1).unwrap();
        assert_eq!(names(&second), vec!["b.txt"]);

        let third = chain.filter_up_to(listing, 1).unwrap();
        assert_eq!(names(&third), vec!["c.txt"]);
    }

    #[test]
    fn store_failure_propagates() {
        let chain = CompositeFilter::standard("*.txt", Arc::new(ReadOnlyStore), "sftp").unwrap();
        let err = chain.filter(vec![file("a.txt", 1)]).unwrap_err();
        assert!(matches!(err, StoreError::Backend { operation: "put", .. }));
    }

    #[test]
    fn empty_chain_accepts_everything() {
        let chain = CompositeFilter::new();
        assert!(chain.is_empty());
        assert!(chain.accept(&RemoteFileEntry::directory("x")).unwrap());
    }
}
