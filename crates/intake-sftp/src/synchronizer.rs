//! One synchronization cycle: list, filter, download into staging.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use indicatif::ProgressBar;
use intake_core::progress::fmt_bytes;
use intake_core::{staging, LocalFileHandle, PollSource, ProgressContext, SharedProgress};

use crate::entry::{remote_path, RemoteFileEntry};
use crate::error::{DownloadError, SyncError};
use crate::filter::CompositeFilter;
use crate::session::{CachingSessionFactory, Connect, RemoteSession};

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub remote_directory: String,
    /// Staging directory downloads land in
    pub local_directory: PathBuf,
    /// Files accepted per cycle; `0` means unlimited
    pub max_fetch_amount: usize,
    pub delete_remote_files: bool,
}

impl SyncSettings {
    fn cap(&self) -> usize {
        match self.max_fetch_amount {
            0 => usize::MAX,
            n => n,
        }
    }
}

/// What a single cycle did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleSummary {
    pub listed: usize,
    /// Entries held back because an earlier copy is still in staging
    pub deferred: usize,
    pub accepted: usize,
    pub downloaded: usize,
    pub failed: usize,
    pub bytes: u64,
    pub elapsed: Duration,
}

impl CycleSummary {
    fn log(&self) {
        if self.deferred > 0 {
            log::debug!("sync: {} entries still staged, deferred", self.deferred);
        }
        if self.accepted == 0 {
            log::debug!("sync: {} listed, nothing new", self.listed);
            return;
        }
        log::info!(
            "Fetched {}/{} new files ({}) in {:.1?}",
            self.downloaded,
            self.accepted,
            fmt_bytes(self.bytes),
            self.elapsed
        );
        if self.failed > 0 {
            log::warn!(
                "{} accepted files failed to download and wait for a changed marker",
                self.failed
            );
        }
    }
}

/// Mirrors new remote files into the staging directory, one cycle at a time.
pub struct Synchronizer<C: Connect> {
    sessions: CachingSessionFactory<C>,
    filter: CompositeFilter,
    settings: SyncSettings,
    progress: SharedProgress,
    status: ProgressBar,
    last: CycleSummary,
}

impl<C: Connect> Synchronizer<C> {
    pub fn new(
        connector: C,
        filter: CompositeFilter,
        settings: SyncSettings,
        progress: SharedProgress,
    ) -> Self {
        let status = progress.status_line("sftp");
        Self {
            sessions: CachingSessionFactory::new(connector),
            filter,
            settings,
            progress,
            status,
            last: CycleSummary::default(),
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Summary of the most recent successful cycle.
    pub fn last_summary(&self) -> &CycleSummary {
        &self.last
    }

    /// Run one cycle and return the files now sitting in staging, in listing order.
    ///
    /// Connection, listing, store, and staging failures abort the whole cycle.
    /// A failed download only skips that file. Entries whose staged copy has
    /// not been cleaned up yet are left for a later cycle without touching the
    /// store, so one staging path never has two handles.
    pub fn synchronize(&mut self) -> Result<Vec<LocalFileHandle>, SyncError> {
        let started = Instant::now();
        let mut summary = CycleSummary::default();
        let dir = self.settings.remote_directory.clone();

        self.status.set_message(format!("listing {dir}"));
        let session = self.sessions.acquire()?;
        let listing = match session.list(&dir) {
            Ok(listing) => listing,
            Err(e) => {
                self.sessions.discard();
                self.status.set_message("listing failed");
                return Err(SyncError::Listing(e));
            }
        };
        summary.listed = listing.len();

        staging::ensure_dir(&self.settings.local_directory).map_err(|source| {
            SyncError::Staging {
                path: self.settings.local_directory.clone(),
                source,
            }
        })?;

        let (staged, listing): (Vec<_>, Vec<_>) = listing
            .into_iter()
            .partition(|entry| is_staged(&self.settings, entry));
        for entry in &staged {
            log::debug!("{} is still staged, deferring", entry.name);
        }
        summary.deferred = staged.len();

        let accepted = self.filter.filter_up_to(listing, self.settings.cap())?;
        summary.accepted = accepted.len();

        let mut fetched = Vec::with_capacity(accepted.len());
        for entry in &accepted {
            self.status.set_message(format!("fetching {}", entry.name));
            match download(session, &self.settings, &self.progress, entry) {
                Ok((handle, bytes)) => {
                    summary.downloaded += 1;
                    summary.bytes += bytes;
                    if self.settings.delete_remote_files {
                        delete_remote(session, &self.settings, entry);
                    }
                    fetched.push(handle);
                }
                Err(e) => {
                    log::error!("Failed to fetch {}: {e}", entry.name);
                    summary.failed += 1;
                }
            }
        }

        summary.elapsed = started.elapsed();
        summary.log();
        self.status.set_message(format!(
            "idle, last cycle fetched {}/{}",
            summary.downloaded, summary.accepted
        ));
        self.last = summary;
        Ok(fetched)
    }

    /// Close the cached session.
    pub fn release(&mut self) {
        self.sessions.release();
        self.status.finish_and_clear();
    }
}

impl<C: Connect> PollSource for Synchronizer<C> {
    type Item = LocalFileHandle;
    type Error = SyncError;

    fn poll(&mut self) -> Result<Vec<LocalFileHandle>, SyncError> {
        let result = self.synchronize();
        if let Err(e) = &result {
            if e.is_connection() {
                self.status
                    .set_message("remote unavailable, retrying next cycle");
            }
        }
        result
    }

    fn release(&mut self) {
        Synchronizer::release(self);
    }
}

/// A previous download of this name is still staged and owned by a handle.
///
/// Partial `.writing` files are not owned and get overwritten.
fn is_staged(settings: &SyncSettings, entry: &RemoteFileEntry) -> bool {
    if entry.is_directory || !entry.has_safe_name() {
        return false;
    }
    settings.local_directory.join(&entry.name).exists()
}

/// Fetch one entry to `<name>.writing`, then rename it into place.
fn download<S: RemoteSession>(
    session: &mut S,
    settings: &SyncSettings,
    progress: &ProgressContext,
    entry: &RemoteFileEntry,
) -> Result<(LocalFileHandle, u64), DownloadError> {
    if !entry.has_safe_name() {
        return Err(DownloadError::UnsafeName(entry.name.clone()));
    }
    let remote = remote_path(&settings.remote_directory, &entry.name);
    let target = settings.local_directory.join(&entry.name);
    let partial = staging::writing_path(&target);
    let local_err = |path: &PathBuf| {
        let path = path.clone();
        move |source| DownloadError::Local { path, source }
    };

    let file = File::create(&partial).map_err(local_err(&partial))?;
    let pb = progress.file_bar(&entry.name, entry.size);
    let mut out = BufWriter::new(pb.wrap_write(file));

    let copied = session
        .download(&remote, &mut out)
        .map_err(DownloadError::Remote)
        .and_then(|bytes| {
            out.flush().map_err(local_err(&partial))?;
            Ok(bytes)
        });
    drop(out);
    pb.finish_and_clear();

    let bytes = match copied {
        Ok(bytes) => bytes,
        Err(e) => {
            if let Err(rm) = fs::remove_file(&partial) {
                log::warn!("Couldn't remove partial download {}: {rm}", partial.display());
            }
            return Err(e);
        }
    };

    fs::rename(&partial, &target).map_err(local_err(&target))?;
    log::debug!("downloaded {remote} ({})", fmt_bytes(bytes));
    Ok((LocalFileHandle::new(target, entry.name.clone()), bytes))
}

fn delete_remote<S: RemoteSession>(
    session: &mut S,
    settings: &SyncSettings,
    entry: &RemoteFileEntry,
) {
    let remote = remote_path(&settings.remote_directory, &entry.name);
    match session.remove(&remote) {
        Ok(()) => log::debug!("removed remote {remote}"),
        Err(e) => log::warn!("Couldn't delete remote file: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use intake_store::{MemoryStore, MetadataStore, StoreError};
    use tempfile::TempDir;

    use crate::memory::{MemoryConnector, MemoryRemote};

    struct Fixture {
        remote: MemoryRemote,
        store: Arc<MemoryStore>,
        staging: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                remote: MemoryRemote::new(),
                store: Arc::new(MemoryStore::new()),
                staging: TempDir::new().unwrap(),
            }
        }

        fn settings(&self, max_fetch_amount: usize) -> SyncSettings {
            SyncSettings {
                remote_directory: "upload".into(),
                local_directory: self.staging.path().join("inbound"),
                max_fetch_amount,
                delete_remote_files: false,
            }
        }

        fn synchronizer_with(&self, settings: SyncSettings) -> Synchronizer<MemoryConnector> {
            let filter = CompositeFilter::standard("*.txt", self.store.clone(), "sftp").unwrap();
            Synchronizer::new(
                self.remote.connector(),
                filter,
                settings,
                Arc::new(ProgressContext::hidden()),
            )
        }

        fn synchronizer(&self, max_fetch_amount: usize) -> Synchronizer<MemoryConnector> {
            self.synchronizer_with(self.settings(max_fetch_amount))
        }

        fn staged(&self) -> Vec<String> {
            let mut names: Vec<String> = fs::read_dir(self.staging.path().join("inbound"))
                .map(|rd| {
                    rd.map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                        .collect()
                })
                .unwrap_or_default();
            names.sort();
            names
        }
    }

    fn names(handles: &[LocalFileHandle]) -> Vec<&str> {
        handles.iter().map(|h| h.remote_name()).collect()
    }

    #[test]
    fn fetches_matching_files_once() {
        let fx = Fixture::new();
        fx.remote.put_file("upload", "a.txt", 10, "alpha");
        fx.remote.put_file("upload", "b.csv", 10, "beta");
        let mut sync = fx.synchronizer(0);

        let first = sync.synchronize().unwrap();
        assert_eq!(names(&first), vec!["a.txt"]);
        assert_eq!(fs::read(first[0].path()).unwrap(), b"alpha");
        assert_eq!(sync.last_summary().listed, 2);

        let second = sync.synchronize().unwrap();
        assert!(second.is_empty());
        assert_eq!(fx.remote.downloads(), 1);
        assert_eq!(fx.staged(), vec!["a.txt"]);
    }

    #[test]
    fn changed_marker_is_fetched_again() {
        let fx = Fixture::new();
        fx.remote.put_file("upload", "a.txt", 10, "v1");
        let mut sync = fx.synchronizer(0);
        let first = sync.synchronize().unwrap();
        intake_core::stage::cleanup(first.into_iter().next().unwrap()).unwrap();

        fx.remote.put_file("upload", "a.txt", 20, "v2");
        let again = sync.synchronize().unwrap();

        assert_eq!(names(&again), vec!["a.txt"]);
        assert_eq!(fs::read(again[0].path()).unwrap(), b"v2");
        assert_eq!(fx.store.get("sftp", "a.txt").unwrap().as_deref(), Some("20"));
    }

    #[test]
    fn batch_cap_spreads_files_over_cycles() {
        let fx = Fixture::new();
        for name in ["a.txt", "b.txt", "c.txt"] {
            fx.remote.put_file("upload", name, 1, name);
        }
        let mut sync = fx.synchronizer(1);

        let mut order = Vec::new();
        for _ in 0..3 {
            let batch = sync.synchronize().unwrap();
            assert_eq!(batch.len(), 1);
            order.push(batch[0].remote_name().to_string());
        }

        assert_eq!(order, vec!["a.txt", "b.txt", "c.txt"]);
        assert!(sync.synchronize().unwrap().is_empty());
    }

    #[test]
    fn directories_are_skipped() {
        let fx = Fixture::new();
        fx.remote.add_directory("upload", "nested.txt");
        fx.remote.put_file("upload", "ok.txt", 1, "x");
        let mut sync = fx.synchronizer(0);

        let out = sync.synchronize().unwrap();
        assert_eq!(names(&out), vec!["ok.txt"]);
    }

    #[test]
    fn failed_download_leaves_no_partial_and_continues() {
        let fx = Fixture::new();
        fx.remote.put_file("upload", "a.txt", 1, "a");
        fx.remote.put_file("upload", "b.txt", 1, "b");
        fx.remote.fail_download("a.txt", true);
        let mut sync = fx.synchronizer(0);

        let out = sync.synchronize().unwrap();

        assert_eq!(names(&out), vec!["b.txt"]);
        assert_eq!(sync.last_summary().failed, 1);
        assert_eq!(fx.staged(), vec!["b.txt"]);
        // Recorded at decision time: not retried until the marker changes
        fx.remote.fail_download("a.txt", false);
        assert!(sync.synchronize().unwrap().is_empty());
    }

    #[test]
    fn unreachable_remote_fails_cycle_then_recovers() {
        let fx = Fixture::new();
        fx.remote.put_file("upload", "a.txt", 1, "a");
        fx.remote.set_reachable(false);
        let mut sync = fx.synchronizer(0);

        assert!(matches!(sync.synchronize(), Err(SyncError::Connection(_))));
        assert!(fx.store.is_empty());

        fx.remote.set_reachable(true);
        assert_eq!(names(&sync.synchronize().unwrap()), vec!["a.txt"]);
    }

    #[test]
    fn listing_failure_discards_session() {
        let fx = Fixture::new();
        fx.remote.put_file("upload", "a.txt", 1, "a");
        let mut sync = fx.synchronizer(0);
        sync.synchronize().unwrap();

        fx.remote.set_fail_listing(true);
        assert!(matches!(sync.synchronize(), Err(SyncError::Listing(_))));
        fx.remote.set_fail_listing(false);
        sync.synchronize().unwrap();

        assert_eq!(fx.remote.connections(), 2);
    }

    #[test]
    fn dead_session_is_replaced() {
        let fx = Fixture::new();
        fx.remote.put_file("upload", "a.txt", 1, "a");
        let mut sync = fx.synchronizer(0);
        sync.synchronize().unwrap();

        fx.remote.drop_sessions();
        fx.remote.put_file("upload", "b.txt", 1, "b");
        let out = sync.synchronize().unwrap();

        assert_eq!(names(&out), vec!["b.txt"]);
        assert_eq!(fx.remote.connections(), 2);
    }

    #[test]
    fn delete_remote_files_removes_after_download() {
        let fx = Fixture::new();
        fx.remote.put_file("upload", "a.txt", 1, "a");
        fx.remote.put_file("upload", "b.log", 1, "b");
        let mut settings = fx.settings(0);
        settings.delete_remote_files = true;
        let mut sync = fx.synchronizer_with(settings);

        sync.synchronize().unwrap();

        assert!(!fx.remote.contains("upload", "a.txt"));
        assert!(fx.remote.contains("upload", "b.log"));
    }

    #[test]
    fn store_failure_aborts_cycle() {
        struct BrokenStore;

        impl MetadataStore for BrokenStore {
            fn get(&self, _: &str, _: &str) -> Result<Option<String>, StoreError> {
                Err(StoreError::backend("get", "database is locked"))
            }
            fn put(&self, _: &str, _: &str, _: &str) -> Result<(), StoreError> {
                Err(StoreError::backend("put", "database is locked"))
            }
            fn entries(&self, _: &str) -> Result<Vec<(String, String)>, StoreError> {
                Ok(Vec::new())
            }
        }

        let fx = Fixture::new();
        fx.remote.put_file("upload", "a.txt", 1, "a");
        let filter = CompositeFilter::standard("*.txt", Arc::new(BrokenStore), "sftp").unwrap();
        let mut sync = Synchronizer::new(
            fx.remote.connector(),
            filter,
            fx.settings(0),
            Arc::new(ProgressContext::hidden()),
        );

        assert!(matches!(sync.synchronize(), Err(SyncError::Store(_))));
        assert_eq!(fx.remote.downloads(), 0);
        assert!(fx.staged().is_empty());
    }

    #[test]
    fn release_closes_session() {
        let fx = Fixture::new();
        fx.remote.put_file("upload", "a.txt", 1, "a");
        let mut sync = fx.synchronizer(0);
        sync.synchronize().unwrap();
        assert_eq!(fx.remote.open_sessions(), 1);

        PollSource::release(&mut sync);
        assert_eq!(fx.remote.open_sessions(), 0);
    }

    #[test]
    fn changed_marker_waits_while_previous_copy_is_staged() {
        let fx = Fixture::new();
        fx.remote.put_file("upload", "a.txt", 10, "v1");
        let mut sync = fx.synchronizer(0);
        let first = sync.synchronize().unwrap();

        fx.remote.put_file("upload", "a.txt", 20, "v2");
        assert!(sync.synchronize().unwrap().is_empty());
        assert_eq!(sync.last_summary().deferred, 1);
        assert_eq!(fs::read(first[0].path()).unwrap(), b"v1");
        // Deferred entries are not recorded
        assert_eq!(fx.store.get("sftp", "a.txt").unwrap().as_deref(), Some("10"));
        assert_eq!(fx.remote.downloads(), 1);

        intake_core::stage::cleanup(first.into_iter().next().unwrap()).unwrap();
        let again = sync.synchronize().unwrap();
        assert_eq!(names(&again), vec!["a.txt"]);
        assert_eq!(fs::read(again[0].path()).unwrap(), b"v2");
        assert_eq!(fx.store.get("sftp", "a.txt").unwrap().as_deref(), Some("20"));
    }

    #[test]
    fn leftover_partial_is_overwritten() {
        let fx = Fixture::new();
        fx.remote.put_file("upload", "a.txt", 10, "v1");
        let inbound = fx.staging.path().join("inbound");
        fs::create_dir_all(&inbound).unwrap();
        fs::write(inbound.join("a.txt.writing"), b"truncated partial").unwrap();
        let mut sync = fx.synchronizer(0);

        let out = sync.synchronize().unwrap();
        assert_eq!(names(&out), vec!["a.txt"]);
        assert_eq!(fs::read(out[0].path()).unwrap(), b"v1");
        assert_eq!(fx.staged(), vec!["a.txt"]);
    }

    #[test]
    fn staging_failure_records_nothing() {
        let fx = Fixture::new();
        fx.remote.put_file("upload", "a.txt", 1, "a");
        let blocker = fx.staging.path().join("blocker");
        fs::write(&blocker, b"not a directory").unwrap();
        let mut settings = fx.settings(0);
        settings.local_directory = blocker.join("inbound");
        let mut sync = fx.synchronizer_with(settings);

        assert!(matches!(sync.synchronize(), Err(SyncError::Staging { .. })));
        assert!(fx.store.is_empty());
        assert_eq!(fx.remote.downloads(), 0);
    }
}
