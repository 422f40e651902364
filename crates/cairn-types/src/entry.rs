use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Log sequence number.
///
/// Sequence numbers are strictly increasing but may be sparse. Watermarks use
/// the same type, with [`NO_SEQ`] standing for "nothing incorporated yet".
pub type Seq = i64;

/// Watermark of an empty log, or of a view that has never been built.
pub const NO_SEQ: Seq = -1;

/// A single record of the append-only log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub seq: Seq,
    pub value: Value,
}

impl LogEntry {
    pub fn new(seq: Seq, value: Value) -> Self {
        Self { seq, value }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.seq, self.value)
    }
}

/// One item produced by a log stream, shaped by
/// [`StreamOptions`](crate::StreamOptions).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamItem {
    /// `seqs` and `values` both requested.
    Entry(LogEntry),
    /// Only `values` requested.
    Value(Value),
    /// Only `seqs` requested: a bare watermark marker.
    Seq(Seq),
}

impl StreamItem {
    /// Sequence number of the item, when the stream was asked to carry one.
    pub fn seq(&self) -> Option<Seq> {
        match self {
            Self::Entry(entry) => Some(entry.seq),
            Self::Seq(seq) => Some(*seq),
            Self::Value(_) => None,
        }
    }

    /// Payload of the item, when the stream was asked to carry one.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Entry(entry) => Some(&entry.value),
            Self::Value(value) => Some(value),
            Self::Seq(_) => None,
        }
    }

    pub fn into_entry(self) -> Option<LogEntry> {
        match self {
            Self::Entry(entry) => Some(entry),
            _ => None,
        }
    }
}
