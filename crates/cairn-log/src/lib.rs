//! Append-only log for Cairn.
//!
//! The log is the single source of truth every view is rebuilt from. This
//! crate provides:
//! - the [`Log`] trait boundary consumed by the view and database layers
//! - [`InMemoryLog`] for tests and embedding
//! - [`FileLog`], a durable CRC-framed single-file log with a read cache
//! - live tailing: streams that keep emitting entries as they are appended

pub mod error;
pub mod file;
pub mod memory;
mod tail;
pub mod traits;

pub use error::{LogError, LogResult};
pub use file::{FileLog, FileLogConfig, SyncMode};
pub use memory::InMemoryLog;
pub use traits::{Log, LogStream};
