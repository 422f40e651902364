use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;

use cairn_log::LogStream;
use cairn_types::StreamItem;

/// Transform applied to every value read through the facade.
#[async_trait]
pub trait ValueMapper: Send + Sync + 'static {
    async fn map(&self, value: Value) -> Value;
}

#[async_trait]
impl<F> ValueMapper for F
where
    F: Fn(Value) -> Value + Send + Sync + 'static,
{
    async fn map(&self, value: Value) -> Value {
        (self)(value)
    }
}

/// Map the value carried by a stream item.
///
/// Seq-only items and bare numbers are watermark markers, not domain values,
/// and pass through untouched.
pub(crate) async fn map_item(mapper: &dyn ValueMapper, item: StreamItem) -> StreamItem {
    match item {
        StreamItem::Entry(mut entry) => {
            entry.value = mapper.map(entry.value).await;
            StreamItem::Entry(entry)
        }
        StreamItem::Value(value) if value.is_number() => StreamItem::Value(value),
        StreamItem::Value(value) => StreamItem::Value(mapper.map(value).await),
        StreamItem::Seq(seq) => StreamItem::Seq(seq),
    }
}

/// Map a log stream with at most `concurrency` values in flight, keeping
/// output in log order.
pub(crate) fn map_stream(
    stream: LogStream,
    mapper: Arc<dyn ValueMapper>,
    concurrency: usize,
) -> LogStream {
    stream
        .map(move |item| {
            let mapper = Arc::clone(&mapper);
            async move {
                match item {
                    Ok(item) => Ok(map_item(mapper.as_ref(), item).await),
                    Err(e) => Err(e),
                }
            }
        })
        .buffered(concurrency.max(1))
        .boxed()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cairn_types::LogEntry;
    use serde_json::json;

    use super::*;

    fn upper(value: Value) -> Value {
        match value {
            Value::String(s) => Value::String(s.to_uppercase()),
            other => other,
        }
    }

    #[tokio::test]
    async fn maps_entries_and_values_but_not_markers() {
        let mapper = upper;
        let entry = map_item(&mapper, StreamItem::Entry(LogEntry::new(0, json!("a")))).await;
        assert_eq!(entry, StreamItem::Entry(LogEntry::new(0, json!("A"))));

        let value = map_item(&mapper, StreamItem::Value(json!("b"))).await;
        assert_eq!(value, StreamItem::Value(json!("B")));

        let seq = map_item(&mapper, StreamItem::Seq(4)).await;
        assert_eq!(seq, StreamItem::Seq(4));
    }

    #[tokio::test]
    async fn bare_numbers_are_not_mapped() {
        let mapper = |_: Value| json!("mapped");
        let item = map_item(&mapper, StreamItem::Value(json!(7))).await;
        assert_eq!(item, StreamItem::Value(json!(7)));
    }

    struct SlowFirst;

    #[async_trait]
    impl ValueMapper for SlowFirst {
        async fn map(&self, value: Value) -> Value {
            if value == json!(0) {
                tokio::time::sleep(Duration::from_millis(30)).await;
            }
            json!({ "mapped": value })
        }
    }

    #[tokio::test]
    async fn concurrent_mapping_preserves_order() {
        let source: LogStream = futures::stream::iter(
            (0..5).map(|i| Ok(StreamItem::Value(json!({ "n": i })))),
        )
        .boxed();
        let items: Vec<_> = map_stream(source, Arc::new(SlowFirst), 4)
            .map(|item| item.unwrap())
            .collect()
            .await;
        let ns: Vec<_> = items
            .iter()
            .map(|item| item.value().unwrap()["mapped"]["n"].clone())
            .collect();
        assert_eq!(ns, vec![json!(0), json!(1), json!(2), json!(3), json!(4)]);
    }
}
