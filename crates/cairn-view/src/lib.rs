//! Views and readiness gating for Cairn.
//!
//! A view is a read-model derived from the log by replaying entries in
//! order. This crate defines the [`View`] contract, the method table a view
//! publishes, and [`GatedView`], the wrapper that makes every method safe to
//! call at any time by deferring `async` and `source` calls until the view
//! has caught up with the log.
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use cairn_types::{Lifecycle, LogEntry, Watchable};
//! use cairn_view::{CountView, GatedView};
//! use serde_json::{json, Value};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let log_since = Watchable::new(Some(0));
//! let gate = GatedView::wrap(
//!     "count",
//!     Arc::new(CountView::new()),
//!     log_since,
//!     Lifecycle::default(),
//! )
//! .unwrap();
//!
//! let mut sink = gate.sink();
//! sink.consume(LogEntry::new(0, json!("A"))).await.unwrap();
//!
//! let count = gate.call_async("count", Value::Null).await.unwrap();
//! assert_eq!(count, json!(1));
//! # }
//! ```

pub mod builtin;
pub mod error;
pub mod gated;
pub mod meta;
pub mod method;
mod queue;
pub mod sink;
pub mod traits;

pub use builtin::{CountView, LatestView};
pub use error::{ViewError, ViewResult};
pub use gated::GatedView;
pub use meta::CallCounters;
pub use method::{
    AsyncHandler, Method, MethodKind, MethodTable, Methods, SourceHandler, SyncHandler, ViewStream,
};
pub use sink::{SinkStep, ViewSink};
pub use traits::View;
