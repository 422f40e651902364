use std::fmt;
use std::sync::Arc;

use futures::stream::BoxStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A shared mutable cell whose changes can be observed.
///
/// Every clone refers to the same cell. Setting a value always notifies
/// observers, even when the new value equals the old one. Observers that fall
/// behind see the latest value, not every intermediate one.
pub struct Watchable<T> {
    tx: Arc<watch::Sender<T>>,
}

impl<T> Clone for Watchable<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Watchable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Watchable").field(&*self.tx.borrow()).finish()
    }
}

impl<T: Default + Clone + Send + Sync + 'static> Default for Watchable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + Send + Sync + 'static> Watchable<T> {
    pub fn new(value: T) -> Self {
        let (tx, _rx) = watch::channel(value);
        Self { tx: Arc::new(tx) }
    }

    /// Current value.
    pub fn value(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Replace the value and notify observers.
    pub fn set(&self, value: T) {
        self.tx.send_replace(value);
    }

    /// Modify the value in place and notify observers.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.tx.send_modify(f);
    }

    /// Replace the value only if `pred` holds for the current one.
    ///
    /// The check and the write happen atomically with respect to other
    /// writers. Returns whether the value was replaced.
    pub fn set_if(&self, pred: impl FnOnce(&T) -> bool, value: T) -> bool {
        self.tx.send_if_modified(|current| {
            if pred(current) {
                *current = value;
                true
            } else {
                false
            }
        })
    }

    /// Raw receiver for use in `select!` loops.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }

    /// Resolve with the first value satisfying `pred`, starting with the
    /// current one.
    pub async fn wait_for(&self, mut pred: impl FnMut(&T) -> bool) -> T {
        let mut rx = self.tx.subscribe();
        let result = rx.wait_for(&mut pred).await.map(|v| (*v).clone());
        // The sender lives as long as `self`, so the wait cannot observe a
        // closed channel.
        result.unwrap_or_else(|_| self.value())
    }

    /// Run `f` with the new value after every change.
    ///
    /// The listener runs on a spawned task until the returned
    /// [`Subscription`] is cancelled or dropped. Must be called from within a
    /// tokio runtime.
    pub fn watch<F>(&self, mut f: F) -> Subscription
    where
        F: FnMut(T) + Send + 'static,
    {
        let mut rx = self.tx.subscribe();
        let handle = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let value = rx.borrow_and_update().clone();
                f(value);
            }
        });
        Subscription { handle }
    }

    /// Stream of values: the current one, then each change.
    pub fn changes(&self) -> BoxStream<'static, T> {
        let mut rx = self.tx.subscribe();
        Box::pin(async_stream::stream! {
            let current = rx.borrow_and_update().clone();
            yield current;
            while rx.changed().await.is_ok() {
                let value = rx.borrow_and_update().clone();
                yield value;
            }
        })
    }
}

/// Handle to a listener registered with [`Watchable::watch`].
#[derive(Debug)]
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    /// Remove the listener.
    pub fn cancel(self) {
        self.handle.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::Duration;

    use futures::StreamExt;

    use super::*;

    #[test]
    fn set_and_read() {
        let w = Watchable::new(1_i64);
        let alias = w.clone();
        w.set(5);
        assert_eq!(alias.value(), 5);
        alias.update(|v| *v += 1);
        assert_eq!(w.value(), 6);
    }

    #[test]
    fn set_if_checks_current_value() {
        let w = Watchable::new(3_i64);
        assert!(!w.set_if(|v| *v == 2, 10));
        assert_eq!(w.value(), 3);
        assert!(w.set_if(|v| *v == 3, 10));
        assert_eq!(w.value(), 10);
    }

    #[tokio::test]
    async fn wait_for_resolves_immediately_when_satisfied() {
        let w = Watchable::new(Some(4_i64));
        assert_eq!(w.wait_for(Option::is_some).await, Some(4));
    }

    #[tokio::test]
    async fn wait_for_resolves_on_later_change() {
        let w = Watchable::new(-1_i64);
        let setter = w.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            setter.set(0);
            setter.set(2);
        });
        let v = w.wait_for(|v| *v >= 2).await;
        assert_eq!(v, 2);
    }

    #[tokio::test]
    async fn watch_sees_changes_until_cancelled() {
        let w = Watchable::new(0_i64);
        let seen = Arc::new(AtomicI64::new(0));
        let sink = Arc::clone(&seen);
        let sub = w.watch(move |v| sink.store(v, Ordering::SeqCst));

        w.set(7);
        tokio::time::timeout(Duration::from_secs(1), async {
            while seen.load(Ordering::SeqCst) != 7 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        sub.cancel();
        tokio::task::yield_now().await;
        w.set(9);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn changes_starts_with_current_value() {
        let w = Watchable::new(String::from("a"));
        let mut changes = w.changes();
        assert_eq!(changes.next().await.as_deref(), Some("a"));
        w.set("b".into());
        assert_eq!(changes.next().await.as_deref(), Some("b"));
    }
}
