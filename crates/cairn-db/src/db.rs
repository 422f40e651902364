use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use futures::future::join_all;
use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, info, warn};

use cairn_log::{Log, LogError, LogResult, LogStream};
use cairn_types::{Lifecycle, Seq, StreamOptions, Watchable, NO_SEQ};
use cairn_view::{CallCounters, GatedView, View};

use crate::build::{BuildEngine, BuildStats};
use crate::config::DbConfig;
use crate::error::{DbError, DbResult};
use crate::mapper::{map_stream, ValueMapper};
use crate::meta::{DbMeta, ViewMeta};

/// Names that can never be used for a view.
pub const RESERVED_NAMES: &[&str] = &[
    "append", "get", "stream", "use", "use_view", "view", "rebuild", "close", "ready", "since",
    "meta", "dir", "closed",
];

/// An append-only log plus the views kept consistent with it.
///
/// Every registered view is wrapped in a [`GatedView`] and driven by its own
/// [`BuildEngine`]. Reads through a view wait until it has caught up with
/// the log; reads through the facade wait only for the log itself.
pub struct CairnDb {
    log: Arc<dyn Log>,
    config: DbConfig,
    lifecycle: Lifecycle,
    mapper: Option<Arc<dyn ValueMapper>>,
    views: RwLock<BTreeMap<String, Registered>>,
    engines: Mutex<Vec<BuildEngine>>,
    log_calls: CallCounters,
    dir: Option<PathBuf>,
}

struct Registered {
    view: GatedView,
    stats: Arc<BuildStats>,
}

impl CairnDb {
    /// Wrap an opened log. The log outlives the instance.
    pub fn open(log: Arc<dyn Log>, config: DbConfig) -> DbResult<Self> {
        config.validate()?;
        let dir = log
            .filename()
            .and_then(Path::parent)
            .map(Path::to_path_buf);
        let lifecycle = Lifecycle::new(config.ready);
        info!(dir = ?dir, ready = config.ready, "opened cairn instance");

        Ok(Self {
            log,
            config,
            lifecycle,
            mapper: None,
            views: RwLock::new(BTreeMap::new()),
            engines: Mutex::new(Vec::new()),
            log_calls: CallCounters::new(["get"]),
            dir,
        })
    }

    /// Transform every value read through [`Self::get`] and [`Self::stream`].
    pub fn with_mapper(mut self, mapper: impl ValueMapper) -> Self {
        self.mapper = Some(Arc::new(mapper));
        self
    }

    /// Register a view under `name` and start building it.
    ///
    /// `factory` receives the log and the name. Fails if the name is a
    /// facade member or already taken, or if the view's method table is
    /// missing or inconsistent.
    pub fn use_view<V, F>(&self, name: &str, factory: F) -> DbResult<&Self>
    where
        V: View + 'static,
        F: FnOnce(Arc<dyn Log>, &str) -> Arc<V>,
    {
        if self.is_closed() {
            return Err(DbError::closed("use"));
        }
        let mut views = self.views.write().unwrap_or_else(PoisonError::into_inner);
        if RESERVED_NAMES.contains(&name) || views.contains_key(name) {
            return Err(DbError::NameInUse(name.to_string()));
        }

        let view: Arc<dyn View> = factory(Arc::clone(&self.log), name);
        let gated = GatedView::wrap(
            name,
            view,
            self.log.since().clone(),
            self.lifecycle.clone(),
        )?;
        let engine = BuildEngine::spawn(
            Arc::clone(&self.log),
            gated.clone(),
            self.lifecycle.clone(),
            &self.config,
        );
        let stats = Arc::clone(engine.stats());

        views.insert(name.to_string(), Registered { view: gated, stats });
        self.engines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(engine);
        info!(view = %name, "view registered");
        Ok(self)
    }

    pub fn view(&self, name: &str) -> Option<GatedView> {
        self.views
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|r| r.view.clone())
    }

    pub fn view_names(&self) -> Vec<String> {
        self.views
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Append to the log. Not gated on any view.
    pub async fn append(&self, value: Value) -> DbResult<Seq> {
        if self.is_closed() {
            return Err(DbError::closed("append"));
        }
        let seq = self.log.append(value).await?;
        debug!(seq, "appended");
        Ok(seq)
    }

    /// Read one value once the log has loaded.
    pub async fn get(&self, seq: Seq) -> DbResult<Value> {
        self.log_calls.increment("get");
        log_loaded(self.log.as_ref(), &self.lifecycle).await?;
        let value = self.log.get(seq).await?;
        Ok(match &self.mapper {
            Some(mapper) => mapper.map(value).await,
            None => value,
        })
    }

    /// Stream from the log once it has loaded.
    ///
    /// The returned stream is lazy: it waits for the log on first poll.
    pub fn stream(&self, opts: StreamOptions) -> LogStream {
        let log = Arc::clone(&self.log);
        let lifecycle = self.lifecycle.clone();
        let mapper = self.mapper.clone();
        let concurrency = self.config.map_concurrency;

        Box::pin(async_stream::stream! {
            if let Err(e) = log_loaded(log.as_ref(), &lifecycle).await {
                yield Err(e);
                return;
            }
            let inner = log.stream(opts);
            let mut items = match mapper {
                Some(mapper) => map_stream(inner, mapper, concurrency),
                None => inner,
            };
            while let Some(item) = items.next().await {
                yield item;
            }
        })
    }

    /// Destroy every view and wait until each has replayed the log again.
    ///
    /// All destroys run concurrently; the first failure is returned once
    /// every view has been handled.
    pub async fn rebuild(&self) -> DbResult<()> {
        if self.is_closed() {
            return Err(DbError::closed("rebuild"));
        }
        let views: Vec<GatedView> = self
            .views
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|r| r.view.clone())
            .collect();
        info!(views = views.len(), "rebuilding views");

        let results = join_all(views.iter().map(|view| self.rebuild_view(view))).await;
        results.into_iter().collect::<DbResult<Vec<()>>>()?;
        info!("rebuild complete");
        Ok(())
    }

    async fn rebuild_view(&self, view: &GatedView) -> DbResult<()> {
        view.destroy().await?;
        // Only a loaded log has a watermark to rebuild up to.
        log_loaded(self.log.as_ref(), &self.lifecycle)
            .await
            .map_err(|_| DbError::closed("rebuild"))?;
        let target = self.log.since().value().unwrap_or(NO_SEQ);
        tokio::select! {
            biased;
            _ = self.lifecycle.closed() => Err(DbError::closed("rebuild")),
            since = view.since().wait_for(|since| *since >= target) => {
                debug!(view = %view.name(), since, "view rebuilt");
                Ok(())
            }
        }
    }

    /// Close the instance and every view. Later calls are no-ops.
    pub async fn close(&self) -> DbResult<()> {
        if !self.lifecycle.begin_close() {
            return Ok(());
        }
        info!("closing cairn instance");

        let engines: Vec<BuildEngine> = self
            .engines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        join_all(engines.into_iter().map(BuildEngine::join)).await;

        let views: Vec<GatedView> = self
            .views
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|r| r.view.clone())
            .collect();
        let results = join_all(views.iter().map(|view| view.close(None))).await;
        self.lifecycle.finish_close();

        for (view, result) in views.iter().zip(&results) {
            if let Err(e) = result {
                warn!(view = %view.name(), error = %e, "view failed to close");
            }
        }
        results.into_iter().collect::<Result<Vec<()>, _>>()?;
        info!("cairn instance closed");
        Ok(())
    }

    /// Global ready flag. Gated calls wait while it is `false`.
    pub fn ready(&self) -> &Watchable<bool> {
        self.lifecycle.ready()
    }

    /// The log's watermark.
    pub fn since(&self) -> &Watchable<Option<Seq>> {
        self.log.since()
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// Directory holding the log, when the log has a file name.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    pub fn meta(&self) -> DbMeta {
        let views = self
            .views
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, r)| {
                let meta = ViewMeta {
                    since: r.view.since().value(),
                    calls: r.view.meta(),
                    build: r.stats.snapshot(),
                };
                (name.clone(), meta)
            })
            .collect();
        DbMeta {
            since: self.log.since().value(),
            closed: self.is_closed(),
            log: self.log_calls.snapshot(),
            views,
        }
    }
}

impl std::fmt::Debug for CairnDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CairnDb")
            .field("since", &self.log.since().value())
            .field("views", &self.view_names())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Wait for the log's watermark to be established. Fails if the instance
/// closes first.
async fn log_loaded(log: &dyn Log, lifecycle: &Lifecycle) -> LogResult<()> {
    tokio::select! {
        biased;
        _ = log.since().wait_for(Option::is_some) => Ok(()),
        _ = lifecycle.closed() => Err(LogError::NotLoaded),
    }
}
