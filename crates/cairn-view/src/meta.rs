use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-operation call counters.
///
/// The set of operation names is fixed at construction, so counting never
/// takes a lock.
#[derive(Debug, Default)]
pub struct CallCounters {
    counts: BTreeMap<String, AtomicU64>,
}

impl CallCounters {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            counts: names
                .into_iter()
                .map(|name| (name.into(), AtomicU64::new(0)))
                .collect(),
        }
    }

    /// Count one call. Unknown names are ignored and report 0.
    pub fn increment(&self, name: &str) -> u64 {
        self.counts
            .get(name)
            .map(|c| c.fetch_add(1, Ordering::Relaxed) + 1)
            .unwrap_or(0)
    }

    pub fn get(&self, name: &str) -> u64 {
        self.counts
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counts
            .iter()
            .map(|(name, c)| (name.clone(), c.load(Ordering::Relaxed)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_known_names_only() {
        let counters = CallCounters::new(["get", "read"]);
        assert_eq!(counters.increment("get"), 1);
        assert_eq!(counters.increment("get"), 2);
        assert_eq!(counters.increment("missing"), 0);
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["get"], 2);
        assert_eq!(snapshot["read"], 0);
    }
}
