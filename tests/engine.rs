//! End-to-end engine behaviour against a recording provider and an in-memory store.
//! Runs on paused Tokio time so the batch window and persistence delay elapse instantly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use lexcache::provider::ProviderError;
use lexcache::translate::batch::BatchPhase;
use lexcache::translate::blob::{self, TRANSLATION_CACHE_KEY};
use lexcache::translate::{now_millis, CacheEntry, DAY_MS};
use lexcache::{
    CacheKey, DurableStore, EngineConfig, MemoryStore, ProviderMode, Providers,
    TranslationEngine, TranslationProvider,
};

type Call = (Vec<String>, String);

struct MockProvider {
    mode: ProviderMode,
    calls: Mutex<Vec<Call>>,
    fail: AtomicBool,
    panic: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl MockProvider {
    fn new(mode: ProviderMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            calls: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            panic: AtomicBool::new(false),
            delay: Mutex::new(None),
        })
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl TranslationProvider for MockProvider {
    fn mode(&self) -> ProviderMode {
        self.mode
    }

    async fn translate_batch(
        &self,
        texts: &[String],
        target: &str,
    ) -> Result<Vec<String>, ProviderError> {
        self.calls.lock().push((texts.to_vec(), target.to_string()));

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.panic.load(Ordering::SeqCst) {
            panic!("provider exploded");
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProviderError::Status {
                status: 500,
                body: "internal error".into(),
            });
        }
        Ok(texts
            .iter()
            .map(|t| {
                if t.starts_with("blank") {
                    String::new()
                } else {
                    format!("{}:{}:{t}", self.mode, target)
                }
            })
            .collect())
    }
}

struct Harness {
    engine: TranslationEngine,
    store: Arc<MemoryStore>,
    public: Arc<MockProvider>,
    cloud: Arc<MockProvider>,
    config_tx: watch::Sender<EngineConfig>,
}

fn harness(store: MemoryStore, config: EngineConfig) -> Harness {
    let store = Arc::new(store);
    let public = MockProvider::new(ProviderMode::Public);
    let cloud = MockProvider::new(ProviderMode::Cloud);
    let providers = Providers::new(cloud.clone(), public.clone());
    let (config_tx, config_rx) = watch::channel(config);
    let engine = TranslationEngine::start(store.clone(), providers, config_rx);
    Harness {
        engine,
        store,
        public,
        cloud,
        config_tx,
    }
}

fn public_key(text: &str, target: &str) -> CacheKey {
    CacheKey::new(ProviderMode::Public, text, target)
}

fn blob_with(entries: &[(CacheKey, CacheEntry)]) -> String {
    blob::encode(entries.iter().map(|(k, e)| (k, e)))
}

fn persisted(store: &MemoryStore) -> Vec<(CacheKey, CacheEntry)> {
    store
        .peek(TRANSLATION_CACHE_KEY)
        .map(|raw| blob::decode(&raw, 0).unwrap())
        .unwrap_or_default()
}

async fn settle_persistence() {
    tokio::time::sleep(Duration::from_secs(3)).await;
}

#[tokio::test(start_paused = true)]
async fn identical_concurrent_requests_share_one_call() {
    let h = harness(MemoryStore::new(), EngineConfig::default());

    let (a, b) = tokio::join!(
        h.engine.translate("שלום", "en"),
        h.engine.translate("שלום", "en")
    );

    assert_eq!(a, "public:en:שלום");
    assert_eq!(a, b);
    assert_eq!(
        h.public.calls(),
        vec![(vec!["שלום".to_string()], "en".to_string())]
    );
    assert!(h.cloud.calls().is_empty());

    let stats = h.engine.stats().await.unwrap();
    assert_eq!(stats.coalescer.coalesced_requests, 1);
    assert_eq!(stats.counters.provider_calls, 1);
}

#[tokio::test(start_paused = true)]
async fn burst_for_one_language_is_one_batch() {
    let h = harness(MemoryStore::new(), EngineConfig::default());

    let mut requests = Vec::new();
    for _ in 0..10 {
        requests.push(h.engine.translate("hola", "en"));
    }
    requests.push(h.engine.translate("adiós", "en"));
    let results = futures_util::future::join_all(requests).await;

    assert!(results[..10].iter().all(|r| r == "public:en:hola"));
    assert_eq!(results[10], "public:en:adiós");
    assert_eq!(
        h.public.calls(),
        vec![(
            vec!["hola".to_string(), "adiós".to_string()],
            "en".to_string()
        )]
    );
}

#[tokio::test(start_paused = true)]
async fn each_target_language_gets_its_own_call() {
    let h = harness(MemoryStore::new(), EngineConfig::default());

    let (a, b) = tokio::join!(h.engine.translate("A", "en"), h.engine.translate("B", "fr"));
    assert_eq!(a, "public:en:A");
    assert_eq!(b, "public:fr:B");

    let mut calls = h.public.calls();
    calls.sort_by(|x, y| x.1.cmp(&y.1));
    assert_eq!(
        calls,
        vec![
            (vec!["A".to_string()], "en".to_string()),
            (vec!["B".to_string()], "fr".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn failed_call_yields_empty_and_is_retried_later() {
    let h = harness(MemoryStore::new(), EngineConfig::default());
    h.public.fail.store(true, Ordering::SeqCst);

    assert_eq!(h.engine.translate("hola", "en").await, "");
    settle_persistence().await;

    let stats = h.engine.stats().await.unwrap();
    assert_eq!(stats.fast_entries, 0);
    assert_eq!(stats.durable_entries, 0);
    assert_eq!(stats.counters.provider_failures, 1);
    assert!(!stats.persist_armed);
    assert_eq!(h.store.writes(), 0);

    h.public.fail.store(false, Ordering::SeqCst);
    assert_eq!(h.engine.translate("hola", "en").await, "public:en:hola");
    assert_eq!(h.public.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn blank_provider_values_are_not_cached() {
    let h = harness(MemoryStore::new(), EngineConfig::default());

    assert_eq!(h.engine.try_translate("blank line", "en").await, None);
    assert_eq!(h.engine.try_translate("blank line", "en").await, None);
    assert_eq!(h.public.call_count(), 2);
    assert_eq!(h.engine.stats().await.unwrap().fast_entries, 0);
}

#[tokio::test(start_paused = true)]
async fn empty_input_never_reaches_the_provider() {
    let h = harness(MemoryStore::new(), EngineConfig::default());
    assert_eq!(h.engine.translate("", "en").await, "");
    assert_eq!(h.engine.try_translate("text", "").await, None);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.public.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn resolved_values_are_served_from_cache() {
    let h = harness(MemoryStore::new(), EngineConfig::default());

    let first = h.engine.translate("hola", "en").await;
    let second = h.engine.translate("hola", "en").await;
    assert_eq!(first, second);
    assert_eq!(h.public.call_count(), 1);

    let stats = h.engine.stats().await.unwrap();
    assert_eq!(stats.counters.cache_hits, 1);
    assert_eq!(stats.counters.cache_misses, 1);
}

#[tokio::test(start_paused = true)]
async fn persistence_is_capped_at_max_entries() {
    let now = now_millis();
    let preload: Vec<(CacheKey, CacheEntry)> = (0..1001)
        .map(|i| {
            (
                public_key(&format!("text {i}"), "en"),
                CacheEntry::new(format!("value {i}"), now - i as i64),
            )
        })
        .collect();
    let store = MemoryStore::new().with_entry(TRANSLATION_CACHE_KEY, blob_with(&preload));
    let config = EngineConfig {
        max_persist_entries: 1000,
        ..EngineConfig::default()
    };
    let h = harness(store, config);

    assert_eq!(h.engine.translate("fresh", "en").await, "public:en:fresh");
    settle_persistence().await;

    let written = persisted(&h.store);
    assert_eq!(written.len(), 1000);
    assert!(written.iter().any(|(k, _)| k.text == "fresh"));
    assert_eq!(h.engine.stats().await.unwrap().durable_entries, 1000);
}

#[tokio::test(start_paused = true)]
async fn persistence_is_debounced_into_one_write() {
    let h = harness(MemoryStore::new(), EngineConfig::default());

    h.engine.translate("one", "en").await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    h.engine.translate("two", "en").await;
    assert!(h.engine.stats().await.unwrap().persist_armed);
    assert_eq!(h.store.writes(), 0);

    settle_persistence().await;
    assert_eq!(h.store.writes(), 1);
    assert_eq!(persisted(&h.store).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn expired_entries_are_dropped_on_load() {
    let old = now_millis() - 31 * DAY_MS;
    let blob = blob_with(&[(public_key("hola", "en"), CacheEntry::new("cached", old))]);

    let h = harness(
        MemoryStore::new().with_entry(TRANSLATION_CACHE_KEY, blob.clone()),
        EngineConfig {
            cache_ttl_days: 30,
            ..EngineConfig::default()
        },
    );
    assert_eq!(h.engine.translate("hola", "en").await, "public:en:hola");
    assert_eq!(h.public.call_count(), 1);

    let h = harness(
        MemoryStore::new().with_entry(TRANSLATION_CACHE_KEY, blob),
        EngineConfig {
            cache_ttl_days: 0,
            ..EngineConfig::default()
        },
    );
    assert_eq!(h.engine.translate("hola", "en").await, "cached");
    assert_eq!(h.public.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn legacy_blob_values_load_as_fresh() {
    let store = MemoryStore::new().with_entry(TRANSLATION_CACHE_KEY, r#"{"public|en|hola":"hello"}"#);
    let h = harness(store, EngineConfig::default());
    assert_eq!(h.engine.translate("hola", "en").await, "hello");
    assert_eq!(h.public.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn out_of_range_timestamp_does_not_stop_the_engine() {
    let raw = format!(
        r#"{{"public|en|bad": {{"v": "x", "t": {}}}, "public|en|good": {{"v": "fine", "t": {}}}}}"#,
        i64::MIN,
        now_millis()
    );
    let store = MemoryStore::new().with_entry(TRANSLATION_CACHE_KEY, raw);
    let h = harness(store, EngineConfig::default());

    let stats = h.engine.stats().await.expect("engine should be running");
    assert_eq!(stats.durable_entries, 1);
    assert_eq!(h.engine.translate("good", "en").await, "fine");
    assert_eq!(h.public.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn target_with_separator_is_rejected() {
    let h = harness(MemoryStore::new(), EngineConfig::default());
    assert_eq!(h.engine.try_translate("hola", "en|x").await, None);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.public.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn purge_expired_is_idempotent() {
    let now = now_millis();
    let blob = blob_with(&[
        (public_key("a", "en"), CacheEntry::new("1", now - 10 * DAY_MS)),
        (public_key("b", "en"), CacheEntry::new("2", now - 10 * DAY_MS)),
        (public_key("c", "en"), CacheEntry::new("3", now)),
    ]);
    let h = harness(
        MemoryStore::new().with_entry(TRANSLATION_CACHE_KEY, blob),
        EngineConfig {
            cache_ttl_days: 0,
            ..EngineConfig::default()
        },
    );
    assert_eq!(h.engine.stats().await.unwrap().durable_entries, 3);

    h.config_tx.send_modify(|c| c.cache_ttl_days = 5);
    assert_eq!(h.engine.purge_expired().await, 2);
    assert_eq!(h.engine.purge_expired().await, 0);

    // Written straight away, not after the debounce delay.
    let written = persisted(&h.store);
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].0.text, "c");
    assert_eq!(h.store.writes(), 1);
}

#[tokio::test(start_paused = true)]
async fn requests_during_a_call_attach_to_it() {
    let h = harness(MemoryStore::new(), EngineConfig::default());
    *h.public.delay.lock() = Some(Duration::from_secs(1));

    let engine = h.engine.clone();
    let first = tokio::spawn(async move { engine.translate("hola", "en").await });
    tokio::time::sleep(Duration::from_millis(500)).await;

    let stats = h.engine.stats().await.unwrap();
    assert_eq!(stats.phase, BatchPhase::Flushing);
    assert_eq!(stats.in_flight_batches, 1);
    assert_eq!(stats.waiting_keys, 1);

    let second = h.engine.translate("hola", "en").await;
    assert_eq!(first.await.unwrap(), second);
    assert_eq!(h.public.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn new_texts_during_a_call_start_a_fresh_cycle() {
    let h = harness(MemoryStore::new(), EngineConfig::default());
    *h.public.delay.lock() = Some(Duration::from_secs(1));

    let engine = h.engine.clone();
    let first = tokio::spawn(async move { engine.translate("uno", "en").await });
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(h.engine.translate("dos", "en").await, "public:en:dos");
    assert_eq!(first.await.unwrap(), "public:en:uno");
    assert_eq!(
        h.public.calls(),
        vec![
            (vec!["uno".to_string()], "en".to_string()),
            (vec!["dos".to_string()], "en".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn provider_mode_is_part_of_the_key() {
    let h = harness(
        MemoryStore::new(),
        EngineConfig {
            use_cloud_provider: true,
            cloud_api_key: "key".into(),
            ..EngineConfig::default()
        },
    );
    assert_eq!(h.engine.translate("hola", "en").await, "cloud:en:hola");

    h.config_tx.send_modify(|c| c.use_cloud_provider = false);
    assert_eq!(h.engine.translate("hola", "en").await, "public:en:hola");

    assert_eq!(h.cloud.call_count(), 1);
    assert_eq!(h.public.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn cloud_without_key_uses_public() {
    let h = harness(
        MemoryStore::new(),
        EngineConfig {
            use_cloud_provider: true,
            ..EngineConfig::default()
        },
    );
    assert_eq!(h.engine.translate("hola", "en").await, "public:en:hola");
    assert_eq!(h.cloud.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn clear_cache_drops_everything() {
    let h = harness(MemoryStore::new(), EngineConfig::default());
    h.engine.translate("hola", "en").await;
    settle_persistence().await;
    assert!(h.store.peek(TRANSLATION_CACHE_KEY).is_some());

    h.engine.clear_cache().await;
    assert!(h.store.peek(TRANSLATION_CACHE_KEY).is_none());
    let stats = h.engine.stats().await.unwrap();
    assert_eq!(stats.fast_entries, 0);
    assert_eq!(stats.durable_entries, 0);

    h.engine.translate("hola", "en").await;
    assert_eq!(h.public.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn reload_picks_up_external_blob() {
    let h = harness(MemoryStore::new(), EngineConfig::default());
    let blob = blob_with(&[(public_key("hola", "en"), CacheEntry::new("hi", now_millis()))]);
    h.store.set(TRANSLATION_CACHE_KEY, blob).await.unwrap();

    assert_eq!(h.engine.reload().await, 1);
    assert_eq!(h.engine.translate("hola", "en").await, "hi");
    assert_eq!(h.public.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn items_cached_before_the_flush_skip_the_provider() {
    let h = harness(MemoryStore::new(), EngineConfig::default());

    let engine = h.engine.clone();
    let queued = tokio::spawn(async move { engine.translate("hola", "en").await });
    let engine = h.engine.clone();
    let other = tokio::spawn(async move { engine.translate("adiós", "en").await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.engine.stats().await.unwrap().pending_items, 2);

    let blob = blob_with(&[(public_key("hola", "en"), CacheEntry::new("hi", now_millis()))]);
    h.store.set(TRANSLATION_CACHE_KEY, blob).await.unwrap();
    assert_eq!(h.engine.reload().await, 1);

    assert_eq!(queued.await.unwrap(), "hi");
    assert_eq!(other.await.unwrap(), "public:en:adiós");
    assert_eq!(
        h.public.calls(),
        vec![(vec!["adiós".to_string()], "en".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn failed_write_keeps_memory_authoritative() {
    let h = harness(MemoryStore::new(), EngineConfig::default());
    h.store.set_fail_writes(true);

    h.engine.translate("hola", "en").await;
    settle_persistence().await;

    let stats = h.engine.stats().await.unwrap();
    assert_eq!(stats.counters.persist_failures, 1);
    assert!(!stats.persist_armed);

    assert_eq!(h.engine.translate("hola", "en").await, "public:en:hola");
    assert_eq!(h.public.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn panicking_provider_still_releases_waiters() {
    let h = harness(MemoryStore::new(), EngineConfig::default());
    h.public.panic.store(true, Ordering::SeqCst);

    let (a, b) = tokio::join!(
        h.engine.translate("hola", "en"),
        h.engine.translate("hola", "en")
    );
    assert_eq!(a, "");
    assert_eq!(b, "");

    h.public.panic.store(false, Ordering::SeqCst);
    assert_eq!(h.engine.translate("hola", "en").await, "public:en:hola");
}

#[tokio::test(start_paused = true)]
async fn shutdown_writes_pending_persistence() {
    let h = harness(MemoryStore::new(), EngineConfig::default());
    h.engine.translate("hola", "en").await;
    assert_eq!(h.store.writes(), 0);

    h.engine.shutdown().await;
    assert_eq!(persisted(&h.store).len(), 1);
    assert_eq!(h.engine.translate("hola", "en").await, "");
}

#[tokio::test(start_paused = true)]
async fn shutdown_releases_waiting_callers() {
    let h = harness(MemoryStore::new(), EngineConfig::default());
    *h.public.delay.lock() = Some(Duration::from_secs(10));

    let engine = h.engine.clone();
    let waiter = tokio::spawn(async move { engine.translate("hola", "en").await });
    tokio::time::sleep(Duration::from_millis(500)).await;

    h.engine.shutdown().await;
    assert_eq!(waiter.await.unwrap(), "");
}
