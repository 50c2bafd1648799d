//! Shared header and directory cache with fetch deduplication.
//!
//! One [`SharedCache`] can serve any number of archives. Entries are keyed by
//! the reader's identifier plus what the entry holds, so two stores never
//! collide:
//!
//! ```text
//! (source, Header)                               -> Arc<Header>
//! (source, Directory { offset, length, version }) -> Arc<Directory>
//! ```
//!
//! A directory's key carries the version of the header it was read for, so a
//! caller holding an older header never sees a directory read from a newer
//! copy of the archive.
//!
//! # Singleflight
//!
//! The first caller for a missing key inserts a pending slot and becomes the
//! leader. Later callers for the same key find the pending slot and wait for
//! the leader's result instead of issuing their own read. The state lock is a
//! plain `std::sync::Mutex` and is never held across an `.await`; only the
//! byte-range read and the wait for a leader suspend.
//!
//! ```text
//! caller A ── miss ──> insert Pending ──> read ──> publish ──> Ready
//! caller B ── Pending ──> wait ─────────────────────────────┘
//! ```
//!
//! Failed fetches remove their slot, so errors are delivered to the callers
//! that were waiting but never cached. A leader that is dropped mid-fetch
//! removes its slot and hands [`ArchiveError::FetchAbandoned`] to its waiters.
//!
//! # Resource versions
//!
//! Every directory read is checked against the `etag` of the header the
//! caller passed in. A read that comes back with a different version fails
//! with [`ArchiveError::ResourceVersionMismatch`] and caches nothing; see
//! [`SharedCache::invalidate`] for recovery. The version seen with the last
//! header read is recorded per source and decides what `invalidate` does.

use std::collections::HashMap;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use lru::LruCache;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::{ArchiveError, IoError};
use crate::format::{decompress, Directory, Header};
use crate::io::RangeReader;

/// Bytes read for a header fetch. The root directory usually fits in the
/// same read.
pub const HEADER_PREFETCH_BYTES: usize = 16_384;

// =============================================================================
// Keys and slots
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum EntryKind {
    Header,
    Directory {
        offset: u64,
        length: u64,
        version: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    source: Arc<str>,
    kind: EntryKind,
}

impl CacheKey {
    fn header(source: &Arc<str>) -> Self {
        Self {
            source: Arc::clone(source),
            kind: EntryKind::Header,
        }
    }

    fn directory(source: &Arc<str>, offset: u64, length: u64, version: Option<String>) -> Self {
        Self {
            source: Arc::clone(source),
            kind: EntryKind::Directory {
                offset,
                length,
                version,
            },
        }
    }
}

#[derive(Debug, Clone)]
enum CachedValue {
    Header(Arc<Header>),
    Directory(Arc<Directory>),
}

impl CachedValue {
    fn into_header(self) -> Result<Arc<Header>, ArchiveError> {
        match self {
            CachedValue::Header(header) => Ok(header),
            CachedValue::Directory(_) => Err(ArchiveError::InvalidArgument(
                "header slot holds a directory".to_string(),
            )),
        }
    }

    fn into_directory(self) -> Result<Arc<Directory>, ArchiveError> {
        match self {
            CachedValue::Directory(directory) => Ok(directory),
            CachedValue::Header(_) => Err(ArchiveError::InvalidArgument(
                "directory slot holds a header".to_string(),
            )),
        }
    }
}

enum Slot {
    Pending(Arc<InFlight>),
    Ready(CachedValue),
}

/// Shared state for one in-progress fetch.
struct InFlight {
    notify: Notify,
    result: OnceLock<Result<CachedValue, ArchiveError>>,
}

impl InFlight {
    fn new() -> Self {
        Self {
            notify: Notify::new(),
            result: OnceLock::new(),
        }
    }

    fn publish(&self, result: Result<CachedValue, ArchiveError>) {
        // Only the leader publishes, and only once.
        let _ = self.result.set(result);
        self.notify.notify_waiters();
    }

    async fn wait(&self) -> Result<CachedValue, ArchiveError> {
        let mut notified = pin!(self.notify.notified());
        notified.as_mut().enable();
        if let Some(result) = self.result.get() {
            return result.clone();
        }
        notified.await;
        self.result
            .get()
            .cloned()
            .unwrap_or(Err(ArchiveError::FetchAbandoned))
    }
}

/// What is known about one source's resource version.
#[derive(Debug, Clone, Default)]
struct SourceVersion {
    /// Version seen with the cached header. `None` when unknown.
    recorded: Option<String>,
    /// Version dropped by the last hard invalidation.
    replaced: Option<String>,
}

struct CacheState {
    entries: LruCache<CacheKey, Slot>,
    /// Per source, kept only while the source has entries or was just
    /// invalidated.
    versions: HashMap<Arc<str>, SourceVersion>,
}

impl CacheState {
    fn owns(&self, key: &CacheKey, flight: &Arc<InFlight>) -> bool {
        matches!(
            self.entries.peek(key),
            Some(Slot::Pending(current)) if Arc::ptr_eq(current, flight)
        )
    }

    fn holds_source(&self, source: &Arc<str>) -> bool {
        self.entries.iter().any(|(key, _)| &key.source == source)
    }

    /// Remove every entry for `source`, returning how many were dropped.
    fn drop_source(&mut self, source: &Arc<str>) -> usize {
        let stale: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(key, _)| &key.source == source)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            self.entries.pop(key);
        }
        stale.len()
    }

    fn prune(&mut self, max_entries: usize) {
        while self.entries.len() > max_entries {
            // iter() runs most to least recent
            let victim = self
                .entries
                .iter()
                .rev()
                .find(|(_, slot)| matches!(slot, Slot::Ready(_)))
                .map(|(key, _)| key.clone());

            let Some(key) = victim else { break };
            debug!(source = %key.source, kind = ?key.kind, "Evicting cache entry");
            self.entries.pop(&key);
            if !self.holds_source(&key.source) {
                self.versions.remove(&key.source);
            }
        }
    }
}

enum Claim<'a> {
    Ready(CachedValue),
    Wait(Arc<InFlight>),
    Lead(LeaderGuard<'a>),
}

/// Held by the caller performing a fetch. Dropping it without completing
/// releases the slot and wakes the waiters with an error.
struct LeaderGuard<'a> {
    cache: &'a SharedCache,
    key: CacheKey,
    flight: Arc<InFlight>,
    completed: bool,
}

/// Result of a header read.
struct HeaderFetch {
    header: Arc<Header>,
    root: Option<Arc<Directory>>,
}

impl LeaderGuard<'_> {
    /// Publish the leader's result.
    ///
    /// `extra` entries and the recorded version are only stored if this
    /// leader's slot survived; an `invalidate` during the fetch discards
    /// them.
    fn complete(
        mut self,
        result: Result<CachedValue, ArchiveError>,
        extra: Option<(CacheKey, CachedValue)>,
        version: Option<Option<String>>,
    ) -> Result<CachedValue, ArchiveError> {
        {
            let mut state = self.cache.lock();
            if state.owns(&self.key, &self.flight) {
                match &result {
                    Ok(value) => {
                        state
                            .entries
                            .put(self.key.clone(), Slot::Ready(value.clone()));
                        if let Some(version) = version {
                            state
                                .versions
                                .entry(Arc::clone(&self.key.source))
                                .or_default()
                                .recorded = version;
                        }
                        if let Some((key, value)) = extra {
                            if state.entries.peek(&key).is_none() {
                                state.entries.put(key, Slot::Ready(value));
                            }
                        }
                        state.prune(self.cache.config.max_entries);
                    }
                    Err(_) => {
                        state.entries.pop(&self.key);
                    }
                }
            }
        }

        self.flight.publish(result.clone());
        self.completed = true;
        result
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        {
            let mut state = self.cache.lock();
            if state.owns(&self.key, &self.flight) {
                state.entries.pop(&self.key);
            }
        }
        debug!(source = %self.key.source, kind = ?self.key.kind, "Fetch abandoned");
        self.flight.publish(Err(ArchiveError::FetchAbandoned));
    }
}

// =============================================================================
// SharedCache
// =============================================================================

/// Concurrency-safe cache of archive headers and directories.
///
/// Wrap it in an `Arc` to share it between archives.
pub struct SharedCache {
    config: CacheConfig,
    state: Mutex<CacheState>,
}

impl Default for SharedCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedCache {
    /// Create a cache with default settings (100 entries, root prefetch on).
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CacheState {
                entries: LruCache::unbounded(),
                versions: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn claim(&self, key: &CacheKey) -> Claim<'_> {
        let mut state = self.lock();
        match state.entries.get(key) {
            Some(Slot::Ready(value)) => Claim::Ready(value.clone()),
            Some(Slot::Pending(flight)) => Claim::Wait(Arc::clone(flight)),
            None => {
                let flight = Arc::new(InFlight::new());
                state
                    .entries
                    .put(key.clone(), Slot::Pending(Arc::clone(&flight)));
                Claim::Lead(LeaderGuard {
                    cache: self,
                    key: key.clone(),
                    flight,
                    completed: false,
                })
            }
        }
    }

    /// Get the header for `reader`, reading it on a miss.
    ///
    /// A miss reads the first [`HEADER_PREFETCH_BYTES`] of the resource. With
    /// root prefetch enabled, a root directory inside those bytes is decoded
    /// and cached from the same read.
    pub async fn get_header<R>(&self, reader: &R) -> Result<Arc<Header>, ArchiveError>
    where
        R: RangeReader + ?Sized,
    {
        let source: Arc<str> = Arc::from(reader.identifier());
        let key = CacheKey::header(&source);

        let guard = match self.claim(&key) {
            Claim::Ready(value) => return value.into_header(),
            Claim::Wait(flight) => return flight.wait().await?.into_header(),
            Claim::Lead(guard) => guard,
        };

        debug!(source = %source, "Header cache miss");
        let (result, extra, version) = match self.fetch_header(reader).await {
            Ok(HeaderFetch { header, root }) => {
                let version = Some(header.etag.clone());
                let extra = root.map(|root| {
                    let key = CacheKey::directory(
                        &source,
                        header.root_directory_offset,
                        header.root_directory_length,
                        header.etag.clone(),
                    );
                    (key, CachedValue::Directory(root))
                });
                (Ok(CachedValue::Header(header)), extra, version)
            }
            Err(err) => (Err(err), None, None),
        };
        guard.complete(result, extra, version)?.into_header()
    }

    async fn fetch_header<R>(&self, reader: &R) -> Result<HeaderFetch, ArchiveError>
    where
        R: RangeReader + ?Sized,
    {
        let resp = reader.read_range(0, HEADER_PREFETCH_BYTES).await?;
        let header = Header::parse(&resp.data, resp.version)?;

        let root = if self.config.prefetch_root && header.root_directory_within(resp.data.len()) {
            let start = header.root_directory_offset as usize;
            let end = start + header.root_directory_length as usize;
            let bytes = decompress(resp.data.slice(start..end), header.internal_compression)?;
            let root = Directory::decode(&bytes)?;
            debug!(
                source = reader.identifier(),
                entries = root.len(),
                "Prefetched root directory"
            );
            Some(Arc::new(root))
        } else {
            None
        };

        Ok(HeaderFetch {
            header: Arc::new(header),
            root,
        })
    }

    /// Get the directory stored at `offset..offset + length`, reading and
    /// decoding it on a miss.
    ///
    /// # Errors
    /// - [`IoError::UnexpectedLength`] if the store returns a different number
    ///   of bytes than requested
    /// - [`ArchiveError::ResourceVersionMismatch`] if the store reports a
    ///   different version than `header.etag`
    pub async fn get_directory<R>(
        &self,
        reader: &R,
        offset: u64,
        length: u64,
        header: &Header,
    ) -> Result<Arc<Directory>, ArchiveError>
    where
        R: RangeReader + ?Sized,
    {
        let source: Arc<str> = Arc::from(reader.identifier());
        let key = CacheKey::directory(&source, offset, length, header.etag.clone());

        let guard = match self.claim(&key) {
            Claim::Ready(value) => return value.into_directory(),
            Claim::Wait(flight) => return flight.wait().await?.into_directory(),
            Claim::Lead(guard) => guard,
        };

        debug!(source = %source, offset, length, "Directory cache miss");
        let result = self
            .fetch_directory(reader, &source, offset, length, header)
            .await
            .map(CachedValue::Directory);
        guard.complete(result, None, None)?.into_directory()
    }

    async fn fetch_directory<R>(
        &self,
        reader: &R,
        source: &Arc<str>,
        offset: u64,
        length: u64,
        header: &Header,
    ) -> Result<Arc<Directory>, ArchiveError>
    where
        R: RangeReader + ?Sized,
    {
        let len = usize::try_from(length).map_err(|_| {
            ArchiveError::InvalidArgument(format!("directory length {length} exceeds usize"))
        })?;

        let resp = reader.read_range(offset, len).await?;

        if let (Some(expected), Some(actual)) = (&header.etag, &resp.version) {
            if expected != actual {
                warn!(
                    source = %source,
                    expected = %expected,
                    actual = %actual,
                    "Resource version changed since header was read"
                );
                return Err(ArchiveError::ResourceVersionMismatch {
                    expected: header.etag.clone(),
                    actual: resp.version,
                });
            }
        }

        if resp.data.len() != len {
            return Err(IoError::UnexpectedLength {
                offset,
                expected: length,
                actual: resp.data.len() as u64,
            }
            .into());
        }

        let bytes = decompress(resp.data, header.internal_compression)?;
        Ok(Arc::new(Directory::decode(&bytes)?))
    }

    /// Recover after a [`ArchiveError::ResourceVersionMismatch`].
    ///
    /// If the version recorded for `reader` equals `expected_version`, every
    /// entry for the source is dropped and the next call reads everything
    /// again. A second call with the same `expected_version` after that is a
    /// no-op, so concurrent callers recovering from one replacement do not
    /// undo each other.
    ///
    /// Any other mismatch, or the replaced version showing up again, means
    /// the store's versions are unreliable. The recorded version becomes
    /// unknown and the cached header loses its `etag`, so later reads are not
    /// checked.
    pub fn invalidate<R>(&self, reader: &R, expected_version: Option<&str>)
    where
        R: RangeReader + ?Sized,
    {
        let source: Arc<str> = Arc::from(reader.identifier());
        let mut state = self.lock();

        let Some(known) = state.versions.get(&source).cloned() else {
            let dropped = state.drop_source(&source);
            debug!(source = %source, dropped, "Invalidated untracked source");
            return;
        };

        // The version dropped last time came back: the store flips between versions
        let flipped_back =
            expected_version.is_some() && known.replaced.as_deref() == expected_version;

        if known.recorded.as_deref() == expected_version && !flipped_back {
            let dropped = state.drop_source(&source);
            state.versions.insert(
                Arc::clone(&source),
                SourceVersion {
                    recorded: None,
                    replaced: expected_version.map(str::to_owned),
                },
            );
            debug!(source = %source, dropped, "Invalidated source");
            return;
        }

        if flipped_back && known.recorded.as_deref() != expected_version {
            debug!(
                source = %source,
                expected = ?expected_version,
                "Version already replaced"
            );
            return;
        }

        warn!(
            source = %source,
            expected = ?expected_version,
            recorded = ?known.recorded,
            "Unstable resource version, disabling version checks"
        );
        if let Some(entry) = state.versions.get_mut(&source) {
            entry.recorded = None;
        }

        let key = CacheKey::header(&source);
        if let Some(Slot::Ready(CachedValue::Header(header))) = state.entries.peek_mut(&key) {
            let mut relaxed = (**header).clone();
            relaxed.etag = None;
            *header = Arc::new(relaxed);
        }
    }

    /// Evict least recently used entries until at most `max_entries` remain.
    ///
    /// Pending fetches are never evicted. Runs automatically after every
    /// insert.
    pub fn prune(&self) {
        self.lock().prune(self.config.max_entries);
    }

    /// Number of entries, pending fetches included.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_entries(&self) -> usize {
        self.config.max_entries
    }

    /// Drop every entry and recorded version.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.versions.clear();
    }

    #[cfg(test)]
    fn insert_directory_for_test(&self, source: &str, offset: u64, directory: Directory) {
        let source: Arc<str> = Arc::from(source);
        self.lock().entries.put(
            CacheKey::directory(&source, offset, 0, None),
            Slot::Ready(CachedValue::Directory(Arc::new(directory))),
        );
    }

    #[cfg(test)]
    fn contains_directory_for_test(&self, source: &str, offset: u64) -> bool {
        let source: Arc<str> = Arc::from(source);
        self.lock()
            .entries
            .contains(&CacheKey::directory(&source, offset, 0, None))
    }
}
