use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::{json, Value};

use cairn_types::{LogEntry, Seq, Watchable, NO_SEQ};

use crate::error::{ViewError, ViewResult};
use crate::method::MethodTable;
use crate::traits::View;

/// Counts entries and remembers which seqs were applied.
///
/// Methods:
/// - `count` (async): number of applied entries.
/// - `peek` (sync): the same number, without waiting for catch-up.
/// - `applied` (source): every applied seq, in order.
pub struct CountView {
    since: Watchable<Seq>,
    state: Arc<RwLock<CountState>>,
}

#[derive(Debug, Default)]
struct CountState {
    count: u64,
    applied: Vec<Seq>,
}

impl CountView {
    pub fn new() -> Self {
        Self::restored(NO_SEQ, 0)
    }

    /// A view resuming from previously persisted state.
    pub fn restored(since: Seq, count: u64) -> Self {
        Self {
            since: Watchable::new(since),
            state: Arc::new(RwLock::new(CountState {
                count,
                applied: Vec::new(),
            })),
        }
    }

    pub fn count(&self) -> u64 {
        read_count(&self.state).unwrap_or(0)
    }
}

impl Default for CountView {
    fn default() -> Self {
        Self::new()
    }
}

fn read_count(state: &RwLock<CountState>) -> ViewResult<u64> {
    state
        .read()
        .map(|s| s.count)
        .map_err(|_| ViewError::internal("count state poisoned"))
}

#[async_trait]
impl View for CountView {
    fn since(&self) -> &Watchable<Seq> {
        &self.since
    }

    fn methods(&self) -> Option<MethodTable> {
        let for_count = Arc::clone(&self.state);
        let for_peek = Arc::clone(&self.state);
        let for_applied = Arc::clone(&self.state);

        Some(
            MethodTable::new()
                .with_async("count", move |_| {
                    let state = Arc::clone(&for_count);
                    async move { read_count(&state).map(|n| json!(n)) }
                })
                .with_sync("peek", move |_| read_count(&for_peek).map(|n| json!(n)))
                .with_source("applied", move |_| {
                    let seqs = for_applied
                        .read()
                        .map(|s| s.applied.clone())
                        .map_err(|_| ViewError::internal("count state poisoned"));
                    let items: Vec<ViewResult<Value>> = match seqs {
                        Ok(seqs) => seqs.into_iter().map(|seq| Ok(json!(seq))).collect(),
                        Err(e) => vec![Err(e)],
                    };
                    futures::stream::iter(items)
                }),
        )
    }

    async fn apply(&self, entry: &LogEntry) -> ViewResult<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| ViewError::internal("count state poisoned"))?;
        state.count += 1;
        state.applied.push(entry.seq);
        Ok(())
    }

    async fn destroy(&self) -> ViewResult<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| ViewError::internal("count state poisoned"))?;
        *state = CountState::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[tokio::test]
    async fn counts_and_resets() {
        let view = CountView::new();
        view.apply(&LogEntry::new(0, json!("a"))).await.unwrap();
        view.apply(&LogEntry::new(3, json!("b"))).await.unwrap();
        assert_eq!(view.count(), 2);

        let methods = view.methods().unwrap().validate().unwrap();
        let crate::Method::Source(applied) = methods.get("applied").unwrap() else {
            panic!("applied must be a source");
        };
        let seqs: Vec<_> = applied(Value::Null).map(Result::unwrap).collect().await;
        assert_eq!(seqs, vec![json!(0), json!(3)]);

        view.destroy().await.unwrap();
        assert_eq!(view.count(), 0);
    }

    #[test]
    fn restored_view_keeps_its_watermark() {
        let view = CountView::restored(9, 10);
        assert_eq!(view.since().value(), 9);
        assert_eq!(view.count(), 10);
    }
}
