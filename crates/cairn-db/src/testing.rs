//! Log and view doubles for facade tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};

use cairn_log::{InMemoryLog, Log, LogError, LogResult, LogStream};
use cairn_types::{LogEntry, Seq, StreamOptions, Watchable, NO_SEQ};
use cairn_view::{MethodTable, View, ViewError, ViewResult};

/// In-memory log whose first `failures` streams fail after `after` items.
pub(crate) struct FlakyLog {
    inner: InMemoryLog,
    failures: AtomicUsize,
    after: usize,
}

impl FlakyLog {
    pub(crate) fn new(failures: usize, after: usize) -> Self {
        Self {
            inner: InMemoryLog::new(),
            failures: AtomicUsize::new(failures),
            after,
        }
    }
}

#[async_trait]
impl Log for FlakyLog {
    fn since(&self) -> &Watchable<Option<Seq>> {
        self.inner.since()
    }

    async fn append(&self, value: Value) -> LogResult<Seq> {
        self.inner.append(value).await
    }

    async fn get(&self, seq: Seq) -> LogResult<Value> {
        self.inner.get(seq).await
    }

    fn stream(&self, opts: StreamOptions) -> LogStream {
        let stream = self.inner.stream(opts);
        let fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !fail {
            return stream;
        }
        let failure = futures::stream::once(async { Err(LogError::Stream("injected failure".into())) });
        stream.take(self.after).chain(failure).boxed()
    }
}

#[derive(Default)]
struct Recorded {
    applied: Vec<Seq>,
    history: Vec<Seq>,
    destroys: usize,
    closes: usize,
}

/// View that records every entry it applies.
///
/// `apply` fails on a seq that does not follow the previous one, so a
/// reordered or repeated entry surfaces as a replay error.
pub(crate) struct RecordingView {
    since: Watchable<Seq>,
    state: Arc<Mutex<Recorded>>,
    methods: bool,
    fail_destroy: bool,
}

impl RecordingView {
    pub(crate) fn new() -> Self {
        Self {
            since: Watchable::new(NO_SEQ),
            state: Arc::default(),
            methods: true,
            fail_destroy: false,
        }
    }

    pub(crate) fn without_methods() -> Self {
        Self {
            methods: false,
            ..Self::new()
        }
    }

    pub(crate) fn failing_destroy(self) -> Self {
        Self {
            fail_destroy: true,
            ..self
        }
    }

    /// Seqs applied since the last destroy.
    pub(crate) fn applied(&self) -> Vec<Seq> {
        self.state.lock().unwrap().applied.clone()
    }

    /// Every seq ever applied.
    pub(crate) fn history(&self) -> Vec<Seq> {
        self.state.lock().unwrap().history.clone()
    }

    pub(crate) fn destroys(&self) -> usize {
        self.state.lock().unwrap().destroys
    }

    pub(crate) fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }
}

#[async_trait]
impl View for RecordingView {
    fn since(&self) -> &Watchable<Seq> {
        &self.since
    }

    fn methods(&self) -> Option<MethodTable> {
        if !self.methods {
            return None;
        }
        let for_seqs = Arc::clone(&self.state);
        let for_len = Arc::clone(&self.state);
        Some(
            MethodTable::new()
                .with_async("seqs", move |_| {
                    let state = Arc::clone(&for_seqs);
                    async move { Ok(json!(state.lock().unwrap().applied)) }
                })
                .with_sync("len", move |_| Ok(json!(for_len.lock().unwrap().applied.len()))),
        )
    }

    async fn apply(&self, entry: &LogEntry) -> ViewResult<()> {
        let mut state = self.state.lock().unwrap();
        let last = state.applied.last().copied().unwrap_or(NO_SEQ);
        if entry.seq <= last {
            return Err(ViewError::OutOfOrder {
                seq: entry.seq,
                since: last,
            });
        }
        state.applied.push(entry.seq);
        state.history.push(entry.seq);
        Ok(())
    }

    async fn destroy(&self) -> ViewResult<()> {
        if self.fail_destroy {
            return Err(ViewError::internal("destroy refused"));
        }
        let mut state = self.state.lock().unwrap();
        state.applied.clear();
        state.destroys += 1;
        Ok(())
    }

    async fn close(&self, _cause: Option<&ViewError>) -> ViewResult<()> {
        self.state.lock().unwrap().closes += 1;
        Ok(())
    }
}
