use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::trace;

use cairn_types::{LogEntry, Seq, Watchable, NO_SEQ};

use crate::error::{ViewError, ViewResult};
use crate::method::MethodTable;
use crate::traits::View;

type Latest = Arc<RwLock<BTreeMap<String, LogEntry>>>;

/// Keeps the most recent entry for each value of a key field.
///
/// Entries whose value is not an object, or lacks the field, are skipped.
/// String keys are used as-is; other JSON keys use their serialized form.
///
/// Methods:
/// - `get` (async): latest value for the key given as the argument.
/// - `keys` (sync): all keys seen so far.
/// - `read` (source): every `{seq, value}` entry in key order.
pub struct LatestView {
    field: String,
    since: Watchable<Seq>,
    latest: Latest,
}

impl LatestView {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            since: Watchable::new(NO_SEQ),
            latest: Arc::default(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    fn key_of(&self, value: &Value) -> Option<String> {
        match value.as_object()?.get(&self.field)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

fn poisoned() -> ViewError {
    ViewError::internal("latest state poisoned")
}

fn key_arg(args: &Value) -> ViewResult<String> {
    match args {
        Value::String(s) => Ok(s.clone()),
        Value::Object(map) => map
            .get("key")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ViewError::InvalidArgs("expected {\"key\": string}".into())),
        other => Err(ViewError::InvalidArgs(format!("expected a key, got {other}"))),
    }
}

#[async_trait]
impl View for LatestView {
    fn since(&self) -> &Watchable<Seq> {
        &self.since
    }

    fn methods(&self) -> Option<MethodTable> {
        let for_get = Arc::clone(&self.latest);
        let for_keys = Arc::clone(&self.latest);
        let for_read = Arc::clone(&self.latest);

        Some(
            MethodTable::new()
                .with_async("get", move |args| {
                    let latest = Arc::clone(&for_get);
                    async move {
                        let key = key_arg(&args)?;
                        let latest = latest.read().map_err(|_| poisoned())?;
                        latest
                            .get(&key)
                            .map(|entry| entry.value.clone())
                            .ok_or(ViewError::NotFound(key))
                    }
                })
                .with_sync("keys", move |_| {
                    let latest = for_keys.read().map_err(|_| poisoned())?;
                    Ok(json!(latest.keys().collect::<Vec<_>>()))
                })
                .with_source("read", move |_| {
                    let items: Vec<ViewResult<Value>> = match for_read.read() {
                        Ok(latest) => latest
                            .values()
                            .map(|entry| serde_json::to_value(entry).map_err(|e| ViewError::internal(e.to_string())))
                            .collect(),
                        Err(_) => vec![Err(poisoned())],
                    };
                    futures::stream::iter(items)
                }),
        )
    }

    async fn apply(&self, entry: &LogEntry) -> ViewResult<()> {
        let Some(key) = self.key_of(&entry.value) else {
            trace!(seq = entry.seq, field = %self.field, "entry has no key");
            return Ok(());
        };
        self.latest
            .write()
            .map_err(|_| poisoned())?
            .insert(key, entry.clone());
        Ok(())
    }

    async fn destroy(&self) -> ViewResult<()> {
        self.latest.write().map_err(|_| poisoned())?.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::Method;

    #[tokio::test]
    async fn keeps_latest_per_key() {
        let view = LatestView::new("id");
        view.apply(&LogEntry::new(0, json!({"id": "a", "n": 1}))).await.unwrap();
        view.apply(&LogEntry::new(1, json!({"id": "b", "n": 2}))).await.unwrap();
        view.apply(&LogEntry::new(2, json!({"id": "a", "n": 3}))).await.unwrap();
        view.apply(&LogEntry::new(3, json!("no key"))).await.unwrap();

        let methods = view.methods().unwrap().validate().unwrap();
        let Some(Method::Async(get)) = methods.get("get") else {
            panic!("get must be async");
        };
        assert_eq!(get(json!("a")).await.unwrap(), json!({"id": "a", "n": 3}));
        assert_eq!(get(json!({"key": "b"})).await.unwrap(), json!({"id": "b", "n": 2}));
        assert_eq!(get(json!("z")).await, Err(ViewError::NotFound("z".into())));
        assert!(matches!(get(json!(5)).await, Err(ViewError::InvalidArgs(_))));

        let Some(Method::Sync(keys)) = methods.get("keys") else {
            panic!("keys must be sync");
        };
        assert_eq!(keys(Value::Null).unwrap(), json!(["a", "b"]));

        let Some(Method::Source(read)) = methods.get("read") else {
            panic!("read must be a source");
        };
        let seqs: Vec<_> = read(Value::Null)
            .map(|item| item.unwrap()["seq"].clone())
            .collect()
            .await;
        assert_eq!(seqs, vec![json!(2), json!(1)]);
    }

    #[tokio::test]
    async fn non_string_keys_are_serialized() {
        let view = LatestView::new("id");
        view.apply(&LogEntry::new(0, json!({"id": 7}))).await.unwrap();
        view.apply(&LogEntry::new(1, json!({"id": null}))).await.unwrap();
        assert_eq!(view.latest.read().unwrap().keys().collect::<Vec<_>>(), vec!["7"]);

        view.destroy().await.unwrap();
        assert!(view.latest.read().unwrap().is_empty());
    }
}
