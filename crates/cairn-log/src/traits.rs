use std::path::Path;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use cairn_types::{Seq, StreamItem, StreamOptions, Watchable};

use crate::error::LogResult;

/// Lazily produced sequence of log items.
pub type LogStream = BoxStream<'static, LogResult<StreamItem>>;

/// The append-only source of truth that views are built from.
///
/// Implementations must satisfy these invariants:
/// - Sequence numbers are strictly increasing; entries are never mutated or
///   removed.
/// - `since` is `None` until the log has loaded, then holds the highest
///   durably appended seq (`Some(NO_SEQ)` when empty). Only the log writes it.
/// - A live stream never ends on its own; it emits new entries as they are
///   appended.
#[async_trait]
pub trait Log: Send + Sync {
    /// Watermark of the log.
    fn since(&self) -> &Watchable<Option<Seq>>;

    /// Append a value and return its sequence number.
    async fn append(&self, value: Value) -> LogResult<Seq>;

    /// Read the value stored at `seq`.
    async fn get(&self, seq: Seq) -> LogResult<Value>;

    /// Stream entries shaped and bounded by `opts`.
    fn stream(&self, opts: StreamOptions) -> LogStream;

    /// Backing file, if the log has one.
    fn filename(&self) -> Option<&Path> {
        None
    }
}
