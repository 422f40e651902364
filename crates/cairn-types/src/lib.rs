//! Foundation types for Cairn.
//!
//! Cairn keeps any number of derived views consistent with one append-only
//! log. This crate holds the vocabulary shared by every other crate.
//!
//! # Key Types
//!
//! - [`Seq`] / [`NO_SEQ`]: sequence numbers and the "nothing yet" watermark
//! - [`LogEntry`]: one log record
//! - [`StreamItem`] / [`StreamOptions`]: shape and bounds of log streams
//! - [`Watchable`]: observable cell backing every watermark and flag
//! - [`Lifecycle`]: shutdown phase plus the global ready flag

pub mod entry;
pub mod lifecycle;
pub mod options;
pub mod watch;

pub use entry::{LogEntry, Seq, StreamItem, NO_SEQ};
pub use lifecycle::{Lifecycle, Phase};
pub use options::StreamOptions;
pub use watch::{Subscription, Watchable};
