//! Cairn: materialized views kept consistent with an append-only log.
//!
//! [`CairnDb`] owns one [`Log`](cairn_log::Log) and any number of named
//! views. Each view is rebuilt from the log by its own [`BuildEngine`] and
//! queried through a [`GatedView`](cairn_view::GatedView), which holds calls
//! back until the view has caught up with the log.
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use cairn_db::{CairnDb, CountView, DbConfig, InMemoryLog};
//! use serde_json::{json, Value};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let db = CairnDb::open(Arc::new(InMemoryLog::new()), DbConfig::default()).unwrap();
//! db.use_view("count", |_, _| Arc::new(CountView::new())).unwrap();
//!
//! for value in ["A", "B", "C"] {
//!     db.append(json!(value)).await.unwrap();
//! }
//!
//! let count = db.view("count").unwrap();
//! assert_eq!(count.call_async("count", Value::Null).await.unwrap(), json!(3));
//! assert_eq!(db.get(1).await.unwrap(), json!("B"));
//! db.close().await.unwrap();
//! # }
//! ```

pub mod build;
pub mod config;
pub mod db;
pub mod error;
pub mod mapper;
pub mod meta;

#[cfg(test)]
mod testing;

pub use build::{BuildEngine, BuildSnapshot, BuildStats};
pub use config::DbConfig;
pub use db::{CairnDb, RESERVED_NAMES};
pub use error::{DbError, DbResult};
pub use mapper::ValueMapper;
pub use meta::{DbMeta, ViewMeta};

// Re-export the building blocks so embedders need a single dependency.
pub use cairn_log::{FileLog, FileLogConfig, InMemoryLog, Log, LogError, SyncMode};
pub use cairn_types::{Lifecycle, LogEntry, Phase, Seq, StreamItem, StreamOptions, Watchable, NO_SEQ};
pub use cairn_view::{
    CountView, GatedView, LatestView, Method, MethodKind, MethodTable, View, ViewError,
};
