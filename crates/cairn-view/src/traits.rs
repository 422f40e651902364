use async_trait::async_trait;

use cairn_types::{LogEntry, Seq, Watchable};

use crate::error::{ViewError, ViewResult};
use crate::method::MethodTable;

/// A derived read-model built solely by replaying log entries in order.
///
/// Implementations must satisfy these invariants:
/// - `since` starts at the view's recorded watermark (`NO_SEQ` when empty)
///   and is advanced only by the sink after a successful [`View::apply`].
/// - `apply` is called with strictly increasing seqs, never concurrently
///   with itself or with `destroy`.
/// - `destroy` discards all derived state; the wrapper then resets `since`.
#[async_trait]
pub trait View: Send + Sync {
    /// Highest seq incorporated into the view.
    fn since(&self) -> &Watchable<Seq>;

    /// Declared query methods. `None` makes the view unusable.
    fn methods(&self) -> Option<MethodTable>;

    /// Incorporate one entry.
    async fn apply(&self, entry: &LogEntry) -> ViewResult<()>;

    /// Discard all derived state.
    async fn destroy(&self) -> ViewResult<()>;

    /// Release resources. `cause` is the reason for shutdown, when one is
    /// known.
    async fn close(&self, cause: Option<&ViewError>) -> ViewResult<()> {
        let _ = cause;
        Ok(())
    }
}
