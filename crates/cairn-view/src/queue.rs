use std::collections::VecDeque;

use tokio::sync::oneshot;

use cairn_types::Seq;

use crate::error::{ViewError, ViewResult};

/// A deferred call waiting for a view to reach `target`.
#[derive(Debug)]
struct Waiter {
    target: Seq,
    tx: oneshot::Sender<ViewResult<()>>,
}

/// FIFO queue of deferred calls.
///
/// Release only ever pops from the front: a waiter whose target is already
/// covered still waits behind an earlier waiter that is not.
#[derive(Debug, Default)]
pub(crate) struct WaitQueue {
    waiters: VecDeque<Waiter>,
}

impl WaitQueue {
    pub(crate) fn push(&mut self, target: Seq) -> oneshot::Receiver<ViewResult<()>> {
        let (tx, rx) = oneshot::channel();
        self.waiters.push_back(Waiter { target, tx });
        rx
    }

    /// Release front waiters whose target is at or below `upto`.
    pub(crate) fn release_through(&mut self, upto: Seq) -> usize {
        let mut released = 0;
        while self.waiters.front().is_some_and(|w| w.target <= upto) {
            if let Some(waiter) = self.waiters.pop_front() {
                // A dropped receiver means the caller gave up; nothing to do.
                let _ = waiter.tx.send(Ok(()));
                released += 1;
            }
        }
        released
    }

    /// Fail every waiter with [`ViewError::ClosedBeforeReady`].
    pub(crate) fn fail_all(&mut self) -> usize {
        let count = self.waiters.len();
        for waiter in self.waiters.drain(..) {
            let _ = waiter.tx.send(Err(ViewError::ClosedBeforeReady));
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn releases_in_fifo_order_only() {
        let mut queue = WaitQueue::default();
        let mut first = queue.push(5);
        let mut second = queue.push(2);

        // The second waiter is satisfiable but sits behind the first.
        assert_eq!(queue.release_through(3), 0);
        assert!(first.try_recv().is_err());
        assert!(second.try_recv().is_err());
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.release_through(5), 2);
        assert_eq!(first.try_recv().unwrap(), Ok(()));
        assert_eq!(second.try_recv().unwrap(), Ok(()));
        assert!(queue.is_empty());
    }

    #[test]
    fn release_stops_at_first_unsatisfied() {
        let mut queue = WaitQueue::default();
        let mut a = queue.push(1);
        let mut b = queue.push(4);
        let mut c = queue.push(2);

        assert_eq!(queue.release_through(2), 1);
        assert_eq!(a.try_recv().unwrap(), Ok(()));
        assert!(b.try_recv().is_err());
        assert!(c.try_recv().is_err());
    }

    #[test]
    fn fail_all_drains_queue() {
        let mut queue = WaitQueue::default();
        let mut a = queue.push(1);
        let mut b = queue.push(2);
        assert_eq!(queue.fail_all(), 2);
        assert_eq!(a.try_recv().unwrap(), Err(ViewError::ClosedBeforeReady));
        assert_eq!(b.try_recv().unwrap(), Err(ViewError::ClosedBeforeReady));
        assert!(queue.is_empty());
    }

    #[test]
    fn abandoned_waiters_do_not_block_release() {
        let mut queue = WaitQueue::default();
        drop(queue.push(1));
        let mut live = queue.push(1);
        assert_eq!(queue.release_through(1), 2);
        assert_eq!(live.try_recv().unwrap(), Ok(()));
    }
}
