use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cairn_log::{Log, LogError};
use cairn_types::{Lifecycle, StreamItem, StreamOptions, NO_SEQ};
use cairn_view::{GatedView, SinkStep};

use crate::config::DbConfig;
use crate::error::DbError;

/// Counters kept by a running build engine.
#[derive(Debug, Default)]
pub struct BuildStats {
    restarts: AtomicU64,
    applied: AtomicU64,
}

impl BuildStats {
    /// Times the replay loop started over.
    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    /// Entries applied to the view across all passes.
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> BuildSnapshot {
        BuildSnapshot {
            restarts: self.restarts(),
            applied: self.applied(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BuildSnapshot {
    pub restarts: u64,
    pub applied: u64,
}

/// Replay loop keeping one view in step with the log.
///
/// Each pass reads the view's watermark, destroys the view if it is ahead of
/// the log, and otherwise pipes a live stream of everything after the
/// watermark into the view's sink. A pass ends when the stream ends or
/// fails, when the view is destroyed underneath the sink, or when the log's
/// watermark falls behind the view; the loop then starts a new pass. It
/// stops for good once the instance starts closing.
pub struct BuildEngine {
    name: String,
    stats: Arc<BuildStats>,
    handle: JoinHandle<()>,
}

enum Pass {
    Closed,
    Restart(&'static str),
    Failed(DbError),
}

enum Event {
    Closed,
    Item(Option<Result<StreamItem, LogError>>),
    ViewMoved(bool),
    LogMoved(bool),
}

impl BuildEngine {
    pub fn spawn(
        log: Arc<dyn Log>,
        view: GatedView,
        lifecycle: Lifecycle,
        config: &DbConfig,
    ) -> Self {
        let name = view.name().to_string();
        let stats = Arc::new(BuildStats::default());
        let worker = Worker {
            log,
            view,
            lifecycle,
            backoff: config.restart_backoff(),
            stats: Arc::clone(&stats),
        };
        let handle = tokio::spawn(worker.run());
        Self {
            name,
            stats,
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> &Arc<BuildStats> {
        &self.stats
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the loop to exit. It only exits once the lifecycle closes.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            warn!(view = %self.name, error = %e, "build engine task failed");
        }
    }
}

struct Worker {
    log: Arc<dyn Log>,
    view: GatedView,
    lifecycle: Lifecycle,
    backoff: Duration,
    stats: Arc<BuildStats>,
}

impl Worker {
    async fn run(self) {
        let name = self.view.name().to_string();
        debug!(view = %name, "build engine started");
        loop {
            match self.pass().await {
                Pass::Closed => break,
                Pass::Restart(reason) => {
                    self.stats.restarts.fetch_add(1, Ordering::Relaxed);
                    debug!(view = %name, reason, "restarting replay");
                }
                Pass::Failed(e) => {
                    self.stats.restarts.fetch_add(1, Ordering::Relaxed);
                    if self.lifecycle.is_closed() {
                        break;
                    }
                    warn!(view = %name, error = %e, "view stream error");
                    tokio::select! {
                        biased;
                        _ = self.lifecycle.closed() => break,
                        _ = tokio::time::sleep(self.backoff) => {}
                    }
                }
            }
        }
        debug!(view = %name, "build engine stopped");
    }

    async fn pass(&self) -> Pass {
        if self.lifecycle.is_closed() {
            return Pass::Closed;
        }
        tokio::select! {
            biased;
            _ = self.lifecycle.closed() => return Pass::Closed,
            _ = self.log.since().wait_for(Option::is_some) => {}
        };

        // Watermarks are read only once the log is loaded, so a destroy
        // that lands during the wait is reflected in the cursor.
        let mut view_since = self.view.since().subscribe();
        let mut log_since = self.log.since().subscribe();
        let mut sink = self.view.sink();
        let upto = sink.cursor();
        let since = (*log_since.borrow_and_update()).unwrap_or(NO_SEQ);
        if *view_since.borrow_and_update() != upto {
            return Pass::Restart("view watermark reset");
        }

        if upto > since {
            info!(view = %self.view.name(), upto, since, "view is ahead of the log, rebuilding");
            return match self.view.destroy().await {
                Ok(()) => Pass::Restart("view ahead of log"),
                Err(e) => Pass::Failed(e.into()),
            };
        }

        let opts = StreamOptions::live_after(upto).cache(upto != NO_SEQ);
        let mut entries = self.log.stream(opts);
        debug!(view = %self.view.name(), upto, since, "streaming log into view");

        loop {
            let event = tokio::select! {
                biased;
                _ = self.lifecycle.closed() => Event::Closed,
                changed = view_since.changed() => Event::ViewMoved(changed.is_ok()),
                changed = log_since.changed() => Event::LogMoved(changed.is_ok()),
                item = entries.next() => Event::Item(item),
            };

            match event {
                Event::Closed => return Pass::Closed,
                Event::ViewMoved(false) | Event::LogMoved(false) => return Pass::Closed,
                Event::ViewMoved(true) => {
                    let since = *view_since.borrow_and_update();
                    if since != sink.cursor() {
                        return Pass::Restart("view watermark reset");
                    }
                }
                Event::LogMoved(true) => {
                    let since = *log_since.borrow_and_update();
                    if matches!(since, Some(since) if since < sink.cursor()) {
                        return Pass::Restart("log watermark regressed");
                    }
                }
                Event::Item(None) => return Pass::Restart("log stream ended"),
                Event::Item(Some(Err(e))) => return Pass::Failed(e.into()),
                Event::Item(Some(Ok(item))) => {
                    let Some(entry) = item.into_entry() else {
                        return Pass::Failed(
                            LogError::Stream("expected {seq, value} items".into()).into(),
                        );
                    };
                    match sink.consume(entry).await {
                        Ok(SinkStep::Applied) => {
                            self.stats.applied.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(SinkStep::Reset) => return Pass::Restart("view watermark reset"),
                        Err(e) => return Pass::Failed(e.into()),
                    }
                }
            }
        }
    }
}
