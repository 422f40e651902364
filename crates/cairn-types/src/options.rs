use serde::{Deserialize, Serialize};

use crate::entry::{LogEntry, Seq, StreamItem};

/// Options controlling a log stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamOptions {
    /// Exclusive lower bound. `None` streams from the first entry.
    pub gt: Option<Seq>,
    /// Keep the stream open past the current tail and emit new appends.
    pub live: bool,
    /// Carry sequence numbers.
    pub seqs: bool,
    /// Carry payloads.
    pub values: bool,
    /// Allow the log to serve and populate its read cache.
    pub cache: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            gt: None,
            live: false,
            seqs: true,
            values: true,
            cache: true,
        }
    }
}

impl StreamOptions {
    /// Live `{seq, value}` stream strictly after `gt`, as used to build views.
    pub fn live_after(gt: Seq) -> Self {
        Self {
            gt: Some(gt),
            live: true,
            ..Self::default()
        }
    }

    pub fn with_gt(mut self, gt: Seq) -> Self {
        self.gt = Some(gt);
        self
    }

    pub fn live(mut self, live: bool) -> Self {
        self.live = live;
        self
    }

    pub fn seqs(mut self, seqs: bool) -> Self {
        self.seqs = seqs;
        self
    }

    pub fn values(mut self, values: bool) -> Self {
        self.values = values;
        self
    }

    pub fn cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    /// Whether `seq` falls after the lower bound.
    pub fn admits(&self, seq: Seq) -> bool {
        self.gt.map_or(true, |gt| seq > gt)
    }

    /// Shape an entry into the item these options ask for.
    ///
    /// Asking for neither seqs nor values yields the bare payload.
    pub fn shape(&self, entry: LogEntry) -> StreamItem {
        match (self.seqs, self.values) {
            (true, true) => StreamItem::Entry(entry),
            (true, false) => StreamItem::Seq(entry.seq),
            (false, _) => StreamItem::Value(entry.value),
        }
    }
}
