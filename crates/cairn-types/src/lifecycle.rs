use std::fmt;

use serde::{Deserialize, Serialize};

use crate::watch::Watchable;

/// Phase of a database instance. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    Open,
    Closing,
    Closed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Shared instance state: the shutdown phase and the global ready flag.
///
/// Cloning yields another handle to the same state.
#[derive(Clone, Debug)]
pub struct Lifecycle {
    phase: Watchable<Phase>,
    ready: Watchable<bool>,
}

impl Lifecycle {
    pub fn new(ready: bool) -> Self {
        Self {
            phase: Watchable::new(Phase::Open),
            ready: Watchable::new(ready),
        }
    }

    pub fn phase(&self) -> &Watchable<Phase> {
        &self.phase
    }

    /// Global readiness flag, settable by the embedding application.
    pub fn ready(&self) -> &Watchable<bool> {
        &self.ready
    }

    pub fn is_ready(&self) -> bool {
        self.ready.value()
    }

    /// `true` once shutdown has started.
    pub fn is_closed(&self) -> bool {
        self.phase.value() != Phase::Open
    }

    /// Move `Open -> Closing`. Returns `true` only for the caller that made
    /// the transition.
    pub fn begin_close(&self) -> bool {
        self.phase.set_if(|p| *p == Phase::Open, Phase::Closing)
    }

    /// Move `Closing -> Closed`.
    pub fn finish_close(&self) {
        self.phase.set_if(|p| *p == Phase::Closing, Phase::Closed);
    }

    /// Resolve once shutdown has started.
    pub async fn closed(&self) {
        self.phase.wait_for(|p| *p != Phase::Open).await;
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_transitions_once() {
        let lc = Lifecycle::default();
        assert!(!lc.is_closed());
        assert!(lc.begin_close());
        assert!(!lc.begin_close());
        assert!(lc.is_closed());
        assert_eq!(lc.phase().value(), Phase::Closing);
        lc.finish_close();
        assert_eq!(lc.phase().value(), Phase::Closed);
        assert!(!lc.begin_close());
        assert_eq!(lc.phase().value(), Phase::Closed);
    }

    #[test]
    fn finish_without_begin_is_ignored() {
        let lc = Lifecycle::new(false);
        lc.finish_close();
        assert_eq!(lc.phase().value(), Phase::Open);
        assert!(!lc.is_ready());
    }

    #[tokio::test]
    async fn closed_resolves_after_begin_close() {
        let lc = Lifecycle::default();
        let other = lc.clone();
        let waiter = tokio::spawn(async move { other.closed().await });
        lc.begin_close();
        waiter.await.unwrap();
    }
}
