use std::collections::BTreeMap;

use serde::Serialize;

use cairn_types::Seq;

use crate::build::BuildSnapshot;

/// Diagnostics snapshot of an instance.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DbMeta {
    /// Log watermark; `None` while the log is still loading.
    pub since: Option<Seq>,
    pub closed: bool,
    /// Calls made against the log through the facade.
    pub log: BTreeMap<String, u64>,
    pub views: BTreeMap<String, ViewMeta>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ViewMeta {
    pub since: Seq,
    /// Calls dispatched per method.
    pub calls: BTreeMap<String, u64>,
    pub build: BuildSnapshot,
}

impl DbMeta {
    /// Total calls across the log and every view.
    pub fn total_calls(&self) -> u64 {
        self.log.values().sum::<u64>()
            + self
                .views
                .values()
                .flat_map(|view| view.calls.values())
                .sum::<u64>()
    }
}
