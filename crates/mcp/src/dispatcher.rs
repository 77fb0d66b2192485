// Tool invocation: validation, caching and the uniform result envelope

use crate::tools::{RegisteredTool, ToolRegistry, ToolSpec};
use coinlens_core::error::{ErrorBody, ErrorKind, ToolError, ToolResult};
use coinlens_core::storage::CacheStore;
use coinlens_core::Fingerprint;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;
use uuid::Uuid;

/// Uniform wrapper returned by every invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Envelope {
    pub fn success(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: &ToolError) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error.to_body()),
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// Pretty JSON for text transports
    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| {
            format!(
                r#"{{"ok": false, "error": {{"kind": "Internal", "message": "failed to serialize envelope: {}"}}}}"#,
                e
            )
        })
    }
}

/// Dispatches validated calls to tool handlers
pub struct Dispatcher {
    registry: ToolRegistry,
    cache: Option<Arc<dyn CacheStore>>,
    ttl: Duration,
}

impl Dispatcher {
    pub fn new(registry: ToolRegistry, cache: Option<Arc<dyn CacheStore>>, ttl: Duration) -> Self {
        Self {
            registry,
            cache,
            ttl,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Registered specs in registration order
    pub fn list_tools(&self) -> Vec<ToolSpec> {
        self.registry.list_tools()
    }

    /// Invoke a tool; never fails, every outcome is an envelope
    pub async fn invoke(&self, name: &str, arguments: &Value) -> Envelope {
        let invocation_id = Uuid::new_v4();
        let span = tracing::info_span!("invoke", tool = name, invocation_id = %invocation_id);

        async move {
            let started = Instant::now();
            let envelope = match self.try_invoke(name, arguments).await {
                Ok(data) => Envelope::success(data),
                Err(e) => {
                    tracing::warn!(kind = %e.kind(), error = %e, "Tool invocation failed");
                    Envelope::failure(&e)
                }
            };
            tracing::info!(
                ok = envelope.ok,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Tool invocation finished"
            );
            envelope
        }
        .instrument(span)
        .await
    }

    async fn try_invoke(&self, name: &str, arguments: &Value) -> ToolResult<Value> {
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        let args = tool.spec.coerce(arguments)?;
        let fingerprint = Fingerprint::compute(name, args.values());

        if let Some(data) = self.cached(tool, &fingerprint).await {
            tracing::debug!(fingerprint = %fingerprint, "Cache hit");
            return Ok(data);
        }

        let output = AssertUnwindSafe(tool.handler.call(args))
            .catch_unwind()
            .await
            .map_err(|panic| {
                ToolError::Internal(format!("handler panicked: {}", panic_message(&*panic)))
            })??;

        if output.cacheable {
            self.store(&fingerprint, &output.data).await;
        }
        Ok(output.data)
    }

    /// Look up a cached payload; store errors and mis-shaped payloads are misses
    async fn cached(&self, tool: &RegisteredTool, fingerprint: &Fingerprint) -> Option<Value> {
        let cache = self.cache.clone()?;
        let key = fingerprint.clone();

        let data = match tokio::task::spawn_blocking(move || cache.get(&key)).await {
            Ok(Ok(data)) => data?,
            Ok(Err(e)) => {
                tracing::warn!(fingerprint = %fingerprint, error = %e, "Cache read failed");
                return None;
            }
            Err(e) => {
                tracing::warn!(fingerprint = %fingerprint, error = %e, "Cache read task failed");
                return None;
            }
        };

        if tool.spec.output.matches(&data) {
            Some(data)
        } else {
            tracing::warn!(fingerprint = %fingerprint, "Cached payload has unexpected shape, refetching");
            None
        }
    }

    async fn store(&self, fingerprint: &Fingerprint, data: &Value) {
        let Some(cache) = self.cache.clone() else {
            return;
        };
        let key = fingerprint.clone();
        let payload = data.clone();
        let ttl = self.ttl;

        match tokio::task::spawn_blocking(move || cache.put(&key, &payload, ttl)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(fingerprint = %fingerprint, error = %e, "Cache write failed"),
            Err(e) => tracing::warn!(fingerprint = %fingerprint, error = %e, "Cache write task failed"),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{OutputShape, ParamSpec, ParamType, ToolArgs, ToolHandler, ToolOutput};
    use chrono::Utc;
    use coinlens_core::storage::{InMemoryCacheStore, RedbCacheStore};
    use coinlens_core::types::{BatchEntry, MarketSnapshot};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Counts calls and answers with a fixed snapshot
    struct CountingPrice {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ToolHandler for CountingPrice {
        async fn call(&self, args: ToolArgs) -> ToolResult<ToolOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let coin = args.required_str("coin_id")?;
            if coin == "nonexistent-coin-xyz" {
                return Err(coinlens_core::ProviderError::NotFound(coin.to_string()).into());
            }
            let mut snapshot = MarketSnapshot::new(
                coin,
                0.1 + 0.2,
                args.str("currency").unwrap_or("usd"),
                Utc::now(),
            );
            snapshot.change_24h = Some(-1.0 / 3.0);
            ToolOutput::new(&snapshot)
        }
    }

    struct Panicking;

    #[async_trait::async_trait]
    impl ToolHandler for Panicking {
        async fn call(&self, _args: ToolArgs) -> ToolResult<ToolOutput> {
            panic!("boom");
        }
    }

    struct PartialBatch {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ToolHandler for PartialBatch {
        async fn call(&self, _args: ToolArgs) -> ToolResult<ToolOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let entries = vec![
                BatchEntry::Snapshot(MarketSnapshot::new("bitcoin", 1.0, "usd", Utc::now())),
                BatchEntry::failed(
                    "nonexistent-coin-xyz",
                    &coinlens_core::ProviderError::NotFound("x".to_string()).into(),
                ),
            ];
            ToolOutput::batch(&entries)
        }
    }

    fn price_spec() -> ToolSpec {
        ToolSpec::new("get_coin_price", "Current price", OutputShape::MarketSnapshot)
            .param(ParamSpec::required("coin_id", ParamType::String, "Coin id"))
            .param(ParamSpec::optional("currency", ParamType::String, "Currency").with_default("usd"))
    }

    fn dispatcher(cache: Option<Arc<dyn CacheStore>>) -> (Dispatcher, Arc<CountingPrice>, Arc<PartialBatch>) {
        let price = Arc::new(CountingPrice {
            calls: AtomicUsize::new(0),
        });
        let batch = Arc::new(PartialBatch {
            calls: AtomicUsize::new(0),
        });

        let mut registry = ToolRegistry::new();
        registry.register(price_spec(), price.clone()).unwrap();
        registry
            .register(
                ToolSpec::new("explode", "Always panics", OutputShape::MarketSnapshot),
                Arc::new(Panicking),
            )
            .unwrap();
        registry
            .register(
                ToolSpec::new("get_batch_prices", "Batch", OutputShape::BatchList),
                batch.clone(),
            )
            .unwrap();

        (
            Dispatcher::new(registry, cache, Duration::from_secs(60)),
            price,
            batch,
        )
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let (dispatcher, _, _) = dispatcher(None);
        let envelope = dispatcher.invoke("not_a_real_tool", &json!({})).await;

        assert!(!envelope.ok);
        assert!(envelope.data.is_none());
        assert_eq!(envelope.error_kind(), Some(ErrorKind::UnknownTool));
    }

    #[tokio::test]
    async fn test_missing_argument_never_reaches_handler() {
        let (dispatcher, price, _) = dispatcher(None);
        let envelope = dispatcher.invoke("get_coin_price", &json!({})).await;

        assert_eq!(envelope.error_kind(), Some(ErrorKind::InvalidArgument));
        assert_eq!(price.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handler_error_becomes_envelope() {
        let (dispatcher, _, _) = dispatcher(None);
        let envelope = dispatcher
            .invoke("get_coin_price", &json!({"coin_id": "nonexistent-coin-xyz"}))
            .await;

        assert!(!envelope.ok);
        assert_eq!(envelope.error_kind(), Some(ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn test_panic_is_caught() {
        let (dispatcher, _, _) = dispatcher(None);
        let envelope = dispatcher.invoke("explode", &Value::Null).await;

        assert_eq!(envelope.error_kind(), Some(ErrorKind::Internal));
        assert!(envelope.error.unwrap().message.contains("boom"));
    }

    #[tokio::test]
    async fn test_cache_idempotence() {
        let temp_dir = TempDir::new().unwrap();
        let store = RedbCacheStore::new(temp_dir.path().join("cache.redb")).unwrap();
        let (dispatcher, price, _) = dispatcher(Some(Arc::new(store)));

        let args = json!({"coin_id": "bitcoin", "currency": "usd"});
        let first = dispatcher.invoke("get_coin_price", &args).await;
        let second = dispatcher.invoke("get_coin_price", &args).await;

        assert!(first.ok);
        assert_eq!(price.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            serde_json::to_vec(&first.data).unwrap(),
            serde_json::to_vec(&second.data).unwrap()
        );
    }

    #[tokio::test]
    async fn test_argument_order_and_explicit_default_share_cache_entry() {
        let (dispatcher, price, _) = dispatcher(Some(Arc::new(InMemoryCacheStore::new())));

        let forward: Value =
            serde_json::from_str(r#"{"coin_id": "bitcoin", "currency": "usd"}"#).unwrap();
        let reversed: Value =
            serde_json::from_str(r#"{"currency": "usd", "coin_id": "bitcoin"}"#).unwrap();
        let defaulted = json!({"coin_id": "bitcoin"});

        dispatcher.invoke("get_coin_price", &forward).await;
        dispatcher.invoke("get_coin_price", &reversed).await;
        dispatcher.invoke("get_coin_price", &defaulted).await;

        assert_eq!(price.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let (dispatcher, price, _) = dispatcher(Some(Arc::new(InMemoryCacheStore::new())));
        let args = json!({"coin_id": "nonexistent-coin-xyz"});

        dispatcher.invoke("get_coin_price", &args).await;
        dispatcher.invoke("get_coin_price", &args).await;

        assert_eq!(price.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_partial_batch_is_ok_but_not_cached() {
        let (dispatcher, _, batch) = dispatcher(Some(Arc::new(InMemoryCacheStore::new())));

        let envelope = dispatcher.invoke("get_batch_prices", &json!({})).await;
        assert!(envelope.ok);
        let data = envelope.data.unwrap();
        assert_eq!(data[0]["coin_id"], "bitcoin");
        assert_eq!(data[1]["error"]["kind"], "NotFound");

        dispatcher.invoke("get_batch_prices", &json!({})).await;
        assert_eq!(batch.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_mis_shaped_cache_entry_is_refetched() {
        let cache = Arc::new(InMemoryCacheStore::new());
        let (dispatcher, price, _) = dispatcher(Some(cache.clone()));

        let args = json!({"coin_id": "bitcoin", "currency": "usd"});
        let fingerprint = Fingerprint::compute(
            "get_coin_price",
            &price_spec().coerce(&args).unwrap().values().clone(),
        );
        cache
            .put(&fingerprint, &json!({"unexpected": true}), Duration::from_secs(60))
            .unwrap();

        let envelope = dispatcher.invoke("get_coin_price", &args).await;
        assert!(envelope.ok);
        assert_eq!(price.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_envelope_serialization() {
        let ok = Envelope::success(json!([]));
        assert_eq!(serde_json::to_value(&ok).unwrap(), json!({"ok": true, "data": []}));

        let failed = Envelope::failure(&ToolError::UnknownTool("x".to_string()));
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["ok"], false);
        assert_eq!(value["error"]["kind"], "UnknownTool");
        assert!(value.get("data").is_none());
        assert!(failed.to_pretty_json().contains("UnknownTool"));
    }
}
