use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::trace;

use cairn_types::{LogEntry, Seq};

use crate::error::{ViewError, ViewResult};
use crate::traits::View;

/// Outcome of offering one entry to a [`ViewSink`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkStep {
    /// The entry was applied and the watermark advanced to its seq.
    Applied,
    /// The view's watermark moved underneath the sink (it was destroyed);
    /// the entry was not applied and the caller must restart.
    Reset,
}

/// Entry consumer that feeds a view and advances its watermark.
///
/// Shares a write lock with the owning gated view's `destroy`, so an entry
/// is never applied concurrently with a reset.
pub struct ViewSink {
    name: String,
    view: Arc<dyn View>,
    write_lock: Arc<Mutex<()>>,
    cursor: Seq,
}

impl ViewSink {
    pub(crate) fn new(name: String, view: Arc<dyn View>, write_lock: Arc<Mutex<()>>) -> Self {
        let cursor = view.since().value();
        Self {
            name,
            view,
            write_lock,
            cursor,
        }
    }

    /// Watermark the sink expects the view to be at.
    pub fn cursor(&self) -> Seq {
        self.cursor
    }

    pub async fn consume(&mut self, entry: LogEntry) -> ViewResult<SinkStep> {
        let _guard = self.write_lock.lock().await;

        let since = self.view.since().value();
        if since != self.cursor {
            trace!(view = %self.name, since, cursor = self.cursor, "sink reset");
            return Ok(SinkStep::Reset);
        }
        if entry.seq <= since {
            return Err(ViewError::OutOfOrder {
                seq: entry.seq,
                since,
            });
        }

        self.view.apply(&entry).await?;
        self.view.since().set(entry.seq);
        self.cursor = entry.seq;
        trace!(view = %self.name, seq = entry.seq, "entry applied");
        Ok(SinkStep::Applied)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::builtin::CountView;

    fn sink_for(view: Arc<CountView>) -> ViewSink {
        ViewSink::new("count".into(), view, Arc::new(Mutex::new(())))
    }

    #[tokio::test]
    async fn applies_in_order_and_advances_watermark() {
        let view = Arc::new(CountView::new());
        let mut sink = sink_for(Arc::clone(&view));
        assert_eq!(sink.consume(LogEntry::new(0, json!(1))).await.unwrap(), SinkStep::Applied);
        assert_eq!(sink.consume(LogEntry::new(4, json!(2))).await.unwrap(), SinkStep::Applied);
        assert_eq!(view.since().value(), 4);
        assert_eq!(sink.cursor(), 4);

        let err = sink.consume(LogEntry::new(4, json!(3))).await.unwrap_err();
        assert_eq!(err, ViewError::OutOfOrder { seq: 4, since: 4 });
        assert_eq!(view.count(), 2);
    }

    #[tokio::test]
    async fn reports_reset_when_watermark_moves_underneath() {
        let view = Arc::new(CountView::new());
        let mut sink = sink_for(Arc::clone(&view));
        sink.consume(LogEntry::new(0, json!(1))).await.unwrap();

        view.since().set(-1);
        assert_eq!(sink.consume(LogEntry::new(1, json!(2))).await.unwrap(), SinkStep::Reset);
        assert_eq!(view.count(), 1);
    }
}
