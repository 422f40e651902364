use std::sync::Arc;

use cairn_types::{LogEntry, Seq, StreamOptions, Watchable, NO_SEQ};
use tracing::trace;

use crate::error::LogResult;
use crate::traits::LogStream;

/// Random access used by [`stream_entries`].
pub(crate) trait EntrySource: Send + Sync + 'static {
    /// First entry whose seq is strictly greater than `after`.
    fn next_after(&self, after: Seq, cache: bool) -> LogResult<Option<LogEntry>>;
}

/// Stream every entry after `opts.gt` in order.
///
/// Once caught up, a non-live stream ends; a live stream waits for the log
/// watermark to move and continues. A read error is yielded and ends the
/// stream.
pub(crate) fn stream_entries<S: EntrySource>(
    source: Arc<S>,
    since: &Watchable<Option<Seq>>,
    opts: StreamOptions,
) -> LogStream {
    let mut rx = since.subscribe();
    Box::pin(async_stream::stream! {
        let mut cursor = opts.gt.unwrap_or(NO_SEQ);
        'tail: loop {
            // Mark the current watermark seen before reading, so an append
            // that lands mid-read still wakes the wait below.
            let _ = rx.borrow_and_update();
            loop {
                match source.next_after(cursor, opts.cache) {
                    Ok(Some(entry)) => {
                        cursor = entry.seq;
                        yield Ok(opts.shape(entry));
                    }
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(e);
                        break 'tail;
                    }
                }
            }
            if !opts.live {
                break;
            }
            trace!(cursor, "stream caught up; waiting for appends");
            if rx.changed().await.is_err() {
                break;
            }
        }
    })
}
