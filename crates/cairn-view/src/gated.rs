use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use cairn_types::{Lifecycle, Seq, Watchable, NO_SEQ};

use crate::error::{ViewError, ViewResult};
use crate::meta::CallCounters;
use crate::method::{AsyncHandler, Method, MethodKind, Methods, SourceHandler, SyncHandler, ViewStream};
use crate::queue::WaitQueue;
use crate::sink::ViewSink;
use crate::traits::View;

/// A view wrapped so that every call is safe at any time.
///
/// `async` and `source` calls are deferred until the view has replayed the
/// log up to the watermark observed when the call was made and the global
/// ready flag is set. Deferred calls are released strictly in FIFO order.
/// After close, new calls fail with [`ViewError::Closed`] and deferred ones
/// with [`ViewError::ClosedBeforeReady`].
///
/// Cloning yields another handle to the same gated view.
#[derive(Clone)]
pub struct GatedView {
    inner: Arc<GateInner>,
}

struct GateInner {
    name: String,
    view: Arc<dyn View>,
    methods: Methods,
    counters: CallCounters,
    log_since: Watchable<Option<Seq>>,
    lifecycle: Lifecycle,
    queue: Mutex<WaitQueue>,
    closed: AtomicBool,
    write_lock: Arc<AsyncMutex<()>>,
    release_task: Mutex<Option<JoinHandle<()>>>,
}

impl GatedView {
    /// Validate the view's method table and wrap it.
    ///
    /// Spawns the task that releases deferred calls, so this must run inside
    /// a tokio runtime.
    pub fn wrap(
        name: impl Into<String>,
        view: Arc<dyn View>,
        log_since: Watchable<Option<Seq>>,
        lifecycle: Lifecycle,
    ) -> ViewResult<Self> {
        let name = name.into();
        let methods = view
            .methods()
            .ok_or(ViewError::MissingMethodTable)?
            .validate()?;
        let counters = CallCounters::new(methods.names());

        let inner = Arc::new(GateInner {
            name,
            view,
            methods,
            counters,
            log_since,
            lifecycle,
            queue: Mutex::new(WaitQueue::default()),
            closed: AtomicBool::new(false),
            write_lock: Arc::new(AsyncMutex::new(())),
            release_task: Mutex::new(None),
        });

        let task = spawn_release(&inner);
        *lock(&inner.release_task) = Some(task);
        debug!(view = %inner.name, methods = inner.methods.len(), "view wrapped");

        Ok(Self { inner })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Watermark of the wrapped view.
    pub fn since(&self) -> &Watchable<Seq> {
        self.inner.view.since()
    }

    /// Declared method conventions.
    pub fn methods(&self) -> BTreeMap<String, MethodKind> {
        self.inner.methods.kinds()
    }

    /// Calls dispatched per method.
    pub fn meta(&self) -> BTreeMap<String, u64> {
        self.inner.counters.snapshot()
    }

    /// Number of deferred calls.
    pub fn pending(&self) -> usize {
        self.inner.lock_queue().len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Wait until the view is consistent with the log.
    ///
    /// Resolves immediately when the ready flag is set, nothing is queued,
    /// and the view's watermark equals the log's. Otherwise the call queues
    /// behind earlier ones with the log watermark observed now, and resolves
    /// once the view's watermark or the ready flag next changes such that
    /// the view covers it while the ready flag is set.
    pub async fn ready(&self) -> ViewResult<()> {
        let inner = &self.inner;
        let upto = tokio::select! {
            biased;
            _ = inner.lifecycle.closed() => return Err(ViewError::ClosedBeforeReady),
            since = inner.log_since.wait_for(Option::is_some) => since.unwrap_or(NO_SEQ),
        };

        let rx = {
            let mut queue = inner.lock_queue();
            if inner.is_closed() {
                return Err(ViewError::ClosedBeforeReady);
            }
            let ready = inner.lifecycle.is_ready();
            let current = inner.view.since().value();
            if queue.is_empty() && ready && upto == current {
                return Ok(());
            }
            // Only the release task drains the queue, so a view that is ahead
            // of the log keeps its callers until it has been rebuilt.
            let rx = queue.push(upto);
            debug!(view = %inner.name, upto, current, pending = queue.len(), "call deferred");
            rx
        };

        rx.await.unwrap_or(Err(ViewError::ClosedBeforeReady))
    }

    /// Invoke a `sync` method. Not gated on readiness.
    pub fn call_sync(&self, name: &str, args: Value) -> ViewResult<Value> {
        self.inner.check_open(name)?;
        let handler = self.sync_handler(name)?;
        self.inner.counters.increment(name);
        handler(args)
    }

    /// Invoke an `async` method once the view is ready.
    pub async fn call_async(&self, name: &str, args: Value) -> ViewResult<Value> {
        self.inner.check_open(name)?;
        let handler = self.async_handler(name)?;
        self.inner.counters.increment(name);
        self.ready().await?;
        handler(args).await
    }

    /// Invoke a `source` method.
    ///
    /// Fails immediately if the view is closed. Otherwise returns a stream
    /// that waits for readiness on first poll, then delegates to the view.
    pub fn call_source(&self, name: &str, args: Value) -> ViewResult<ViewStream> {
        self.inner.check_open(name)?;
        let handler = self.source_handler(name)?;
        self.inner.counters.increment(name);

        let gate = self.clone();
        Ok(Box::pin(async_stream::stream! {
            match gate.ready().await {
                Err(e) => yield Err(e),
                Ok(()) => {
                    let mut items = handler(args);
                    while let Some(item) = items.next().await {
                        yield item;
                    }
                }
            }
        }))
    }

    /// Entry consumer for the build engine.
    pub fn sink(&self) -> ViewSink {
        ViewSink::new(
            self.inner.name.clone(),
            Arc::clone(&self.inner.view),
            Arc::clone(&self.inner.write_lock),
        )
    }

    /// Discard the view's state and reset its watermark to `NO_SEQ`.
    ///
    /// Waits for any entry being applied to finish first.
    pub async fn destroy(&self) -> ViewResult<()> {
        let _guard = self.inner.write_lock.lock().await;
        self.inner.view.destroy().await?;
        self.inner.view.since().set(NO_SEQ);
        info!(view = %self.inner.name, "view destroyed");
        Ok(())
    }

    /// Fail deferred calls and close the underlying view. Idempotent.
    pub async fn close(&self, cause: Option<&ViewError>) -> ViewResult<()> {
        let failed = {
            let mut queue = self.inner.lock_queue();
            if self.inner.closed.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            queue.fail_all()
        };
        if let Some(task) = lock(&self.inner.release_task).take() {
            task.abort();
        }
        debug!(view = %self.inner.name, failed, "closing view");
        self.inner.view.close(cause).await
    }

    fn method(&self, name: &str) -> ViewResult<&Method> {
        self.inner
            .methods
            .get(name)
            .ok_or_else(|| ViewError::UnknownMethod(name.to_string()))
    }

    fn sync_handler(&self, name: &str) -> ViewResult<SyncHandler> {
        match self.method(name)? {
            Method::Sync(f) => Ok(Arc::clone(f)),
            other => Err(wrong_convention(name, other, MethodKind::Sync)),
        }
    }

    fn async_handler(&self, name: &str) -> ViewResult<AsyncHandler> {
        match self.method(name)? {
            Method::Async(f) => Ok(Arc::clone(f)),
            other => Err(wrong_convention(name, other, MethodKind::Async)),
        }
    }

    fn source_handler(&self, name: &str) -> ViewResult<SourceHandler> {
        match self.method(name)? {
            Method::Source(f) => Ok(Arc::clone(f)),
            other => Err(wrong_convention(name, other, MethodKind::Source)),
        }
    }
}

impl std::fmt::Debug for GatedView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatedView")
            .field("name", &self.inner.name)
            .field("since", &self.inner.view.since().value())
            .field("closed", &self.inner.is_closed())
            .finish()
    }
}

impl GateInner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.lifecycle.is_closed()
    }

    fn check_open(&self, method: &str) -> ViewResult<()> {
        if self.is_closed() {
            return Err(ViewError::Closed {
                method: method.to_string(),
            });
        }
        Ok(())
    }

    fn lock_queue(&self) -> MutexGuard<'_, WaitQueue> {
        lock(&self.queue)
    }

    /// Release deferred calls the view now covers.
    fn release(&self) {
        let mut queue = self.lock_queue();
        if queue.is_empty() || !self.lifecycle.is_ready() {
            return;
        }
        let upto = self.view.since().value();
        let released = queue.release_through(upto);
        if released > 0 {
            debug!(view = %self.name, upto, released, "released deferred calls");
        }
    }

    fn fail_waiters(&self) {
        let failed = self.lock_queue().fail_all();
        if failed > 0 {
            debug!(view = %self.name, failed, "failed deferred calls on close");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn wrong_convention(name: &str, method: &Method, called: MethodKind) -> ViewError {
    ViewError::WrongConvention {
        name: name.to_string(),
        actual: method.kind(),
        called,
    }
}

/// Drain the wait queue whenever the view's watermark, the ready flag, or
/// the lifecycle phase changes.
fn spawn_release(inner: &Arc<GateInner>) -> JoinHandle<()> {
    let weak: Weak<GateInner> = Arc::downgrade(inner);
    let mut view_since = inner.view.since().subscribe();
    let mut ready = inner.lifecycle.ready().subscribe();
    let mut phase = inner.lifecycle.phase().subscribe();

    tokio::spawn(async move {
        loop {
            let changed = tokio::select! {
                r = view_since.changed() => r,
                r = ready.changed() => r,
                r = phase.changed() => r,
            };
            let Some(inner) = weak.upgrade() else {
                break;
            };
            if changed.is_err() || inner.is_closed() {
                inner.fail_waiters();
                break;
            }
            inner.release();
        }
    })
}
