use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use cairn_types::{LogEntry, Seq, StreamOptions, Watchable, NO_SEQ};

use crate::error::{LogError, LogResult};
use crate::tail::{stream_entries, EntrySource};
use crate::traits::{Log, LogStream};

/// In-memory log for tests, local demos, and embedding.
///
/// Sequence numbers are dense and start at 0.
pub struct InMemoryLog {
    state: Arc<MemoryState>,
    since: Watchable<Option<Seq>>,
    filename: Option<PathBuf>,
}

#[derive(Default)]
struct MemoryState {
    entries: RwLock<Vec<Value>>,
    cold_streams: AtomicU64,
}

impl InMemoryLog {
    /// An empty log that is immediately loaded.
    pub fn new() -> Self {
        Self::with_since(Some(NO_SEQ))
    }

    /// A log that reports no watermark until [`Self::mark_loaded`] is called.
    pub fn deferred() -> Self {
        Self::with_since(None)
    }

    /// A loaded log pre-populated with `values` at seqs `0..n`.
    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        let log = Self::deferred_from_values(values);
        log.mark_loaded();
        log
    }

    /// Like [`Self::from_values`], but the watermark stays unknown until
    /// [`Self::mark_loaded`]; models a log still reading its backing store.
    pub fn deferred_from_values(values: impl IntoIterator<Item = Value>) -> Self {
        let log = Self::with_since(None);
        if let Ok(mut guard) = log.state.entries.write() {
            *guard = values.into_iter().collect();
        }
        log
    }

    fn with_since(since: Option<Seq>) -> Self {
        Self {
            state: Arc::new(MemoryState::default()),
            since: Watchable::new(since),
            filename: None,
        }
    }

    /// Attach a nominal file name, used to derive a storage directory.
    pub fn with_filename(mut self, filename: impl Into<PathBuf>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Establish the watermark of a deferred log.
    pub fn mark_loaded(&self) {
        let len = self.len();
        self.since
            .set_if(Option::is_none, Some(len as Seq - 1));
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.state.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Streams opened with `cache: false`.
    pub fn cold_streams(&self) -> u64 {
        self.state.cold_streams.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EntrySource for MemoryState {
    fn next_after(&self, after: Seq, _cache: bool) -> LogResult<Option<LogEntry>> {
        let entries = self.entries.read().map_err(|_| LogError::LockPoisoned)?;
        let next = after.max(NO_SEQ) + 1;
        Ok(entries
            .get(next as usize)
            .map(|value| LogEntry::new(next, value.clone())))
    }
}

#[async_trait]
impl Log for InMemoryLog {
    fn since(&self) -> &Watchable<Option<Seq>> {
        &self.since
    }

    async fn append(&self, value: Value) -> LogResult<Seq> {
        if self.since.value().is_none() {
            return Err(LogError::NotLoaded);
        }
        let mut entries = self
            .state
            .entries
            .write()
            .map_err(|_| LogError::LockPoisoned)?;
        entries.push(value);
        let seq = entries.len() as Seq - 1;
        // Published under the lock so concurrent appends advance in order.
        self.since.set(Some(seq));
        debug!(seq, "memory log append");
        Ok(seq)
    }

    async fn get(&self, seq: Seq) -> LogResult<Value> {
        if seq < 0 {
            return Err(LogError::NotFound(seq));
        }
        let entries = self
            .state
            .entries
            .read()
            .map_err(|_| LogError::LockPoisoned)?;
        entries
            .get(seq as usize)
            .cloned()
            .ok_or(LogError::NotFound(seq))
    }

    fn stream(&self, opts: StreamOptions) -> LogStream {
        if !opts.cache {
            self.state.cold_streams.fetch_add(1, Ordering::SeqCst);
        }
        stream_entries(Arc::clone(&self.state), &self.since, opts)
    }

    fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }
}
