use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{ViewError, ViewResult};

/// Stream returned by `source` methods.
pub type ViewStream = BoxStream<'static, ViewResult<Value>>;

pub type SyncHandler = Arc<dyn Fn(Value) -> ViewResult<Value> + Send + Sync>;
pub type AsyncHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, ViewResult<Value>> + Send + Sync>;
pub type SourceHandler = Arc<dyn Fn(Value) -> ViewStream + Send + Sync>;

/// Calling convention of a view method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    /// Runs immediately; not gated on readiness.
    Sync,
    /// Runs once the view has caught up.
    Async,
    /// Returns a stream that starts producing once the view has caught up.
    Source,
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Sync => "sync",
            Self::Async => "async",
            Self::Source => "source",
        };
        f.write_str(s)
    }
}

/// A method implementation tagged with its convention.
#[derive(Clone)]
pub enum Method {
    Sync(SyncHandler),
    Async(AsyncHandler),
    Source(SourceHandler),
}

impl Method {
    pub fn sync_fn<F>(f: F) -> Self
    where
        F: Fn(Value) -> ViewResult<Value> + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    pub fn async_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ViewResult<Value>> + Send + 'static,
    {
        Self::Async(Arc::new(move |args| Box::pin(f(args))))
    }

    pub fn source_fn<F, S>(f: F) -> Self
    where
        F: Fn(Value) -> S + Send + Sync + 'static,
        S: Stream<Item = ViewResult<Value>> + Send + 'static,
    {
        Self::Source(Arc::new(move |args| Box::pin(f(args))))
    }

    pub fn kind(&self) -> MethodKind {
        match self {
            Self::Sync(_) => MethodKind::Sync,
            Self::Async(_) => MethodKind::Async,
            Self::Source(_) => MethodKind::Source,
        }
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Method::{}", self.kind())
    }
}

/// Declared method conventions of a view plus their implementations.
///
/// Declarations and implementations are kept apart so a view can publish
/// its capability map independently; [`MethodTable::validate`] checks that
/// every declaration is backed by an implementation of the same convention.
#[derive(Clone, Debug, Default)]
pub struct MethodTable {
    declared: BTreeMap<String, MethodKind>,
    handlers: HashMap<String, Method>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a method without implementing it.
    pub fn declare(mut self, name: impl Into<String>, kind: MethodKind) -> Self {
        self.declared.insert(name.into(), kind);
        self
    }

    /// Provide an implementation without declaring it.
    pub fn implement(mut self, name: impl Into<String>, method: Method) -> Self {
        self.handlers.insert(name.into(), method);
        self
    }

    /// Declare and implement in one step.
    pub fn with(self, name: impl Into<String>, method: Method) -> Self {
        let name = name.into();
        let kind = method.kind();
        self.declare(name.clone(), kind).implement(name, method)
    }

    pub fn with_sync<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> ViewResult<Value> + Send + Sync + 'static,
    {
        self.with(name, Method::sync_fn(f))
    }

    pub fn with_async<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ViewResult<Value>> + Send + 'static,
    {
        self.with(name, Method::async_fn(f))
    }

    pub fn with_source<F, S>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> S + Send + Sync + 'static,
        S: Stream<Item = ViewResult<Value>> + Send + 'static,
    {
        self.with(name, Method::source_fn(f))
    }

    pub fn declared(&self) -> &BTreeMap<String, MethodKind> {
        &self.declared
    }

    /// Resolve every declaration against the implementations.
    ///
    /// Implementations without a declaration are not exposed.
    pub fn validate(mut self) -> ViewResult<Methods> {
        let mut entries = BTreeMap::new();
        for (name, declared) in &self.declared {
            let method = self
                .handlers
                .remove(name)
                .ok_or_else(|| ViewError::MissingMethod {
                    name: name.clone(),
                    kind: *declared,
                })?;
            if method.kind() != *declared {
                return Err(ViewError::ConventionMismatch {
                    name: name.clone(),
                    declared: *declared,
                    implemented: method.kind(),
                });
            }
            entries.insert(name.clone(), method);
        }
        for name in self.handlers.keys() {
            debug!(method = %name, "ignoring undeclared method implementation");
        }
        Ok(Methods { entries })
    }
}

/// A validated method table.
#[derive(Clone, Debug, Default)]
pub struct Methods {
    entries: BTreeMap<String, Method>,
}

impl Methods {
    pub fn get(&self, name: &str) -> Option<&Method> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn kinds(&self) -> BTreeMap<String, MethodKind> {
        self.entries
            .iter()
            .map(|(name, method)| (name.clone(), method.kind()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn validate_accepts_matching_table() {
        let methods = MethodTable::new()
            .with_sync("peek", |_| Ok(json!(1)))
            .with_async("get", |args| async move { Ok(args) })
            .with_source("read", |_| futures::stream::empty())
            .validate()
            .unwrap();
        assert_eq!(methods.len(), 3);
        assert_eq!(methods.kinds()["get"], MethodKind::Async);
        assert_eq!(methods.names().collect::<Vec<_>>(), vec!["get", "peek", "read"]);
    }

    #[test]
    fn validate_rejects_missing_implementation() {
        let err = MethodTable::new()
            .declare("get", MethodKind::Async)
            .validate()
            .unwrap_err();
        assert_eq!(
            err,
            ViewError::MissingMethod {
                name: "get".into(),
                kind: MethodKind::Async
            }
        );
    }

    #[test]
    fn validate_rejects_convention_mismatch() {
        let err = MethodTable::new()
            .declare("get", MethodKind::Source)
            .implement("get", Method::sync_fn(|_| Ok(Value::Null)))
            .validate()
            .unwrap_err();
        assert!(matches!(
            err,
            ViewError::ConventionMismatch {
                declared: MethodKind::Source,
                implemented: MethodKind::Sync,
                ..
            }
        ));
    }

    #[test]
    fn undeclared_implementations_are_hidden() {
        let methods = MethodTable::new()
            .implement("secret", Method::sync_fn(|_| Ok(Value::Null)))
            .validate()
            .unwrap();
        assert!(methods.is_empty());
        assert!(methods.get("secret").is_none());
    }
}
