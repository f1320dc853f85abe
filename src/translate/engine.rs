//! Engine worker: the single owner of all cache, coalescing and batching state.
//!
//! Callers hold a cheap `TranslationEngine` handle and talk to the worker over
//! an unbounded channel. The worker is one Tokio task looping on `select!`
//! over: shutdown, configuration changes, finished provider calls, the batch
//! window, the persistence deadline and inbound commands. Provider calls run
//! in spawned tasks and report back over a second channel, so the worker keeps
//! accumulating the next batch while one is on the wire.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::batch::{BatchGroup, BatchPhase, BatchScheduler, PendingBatchItem};
use super::blob::{self, TRANSLATION_CACHE_KEY};
use super::cache::CacheManager;
use super::coalesce::{CoalescerStats, Registration, RequestCoalescer};
use super::persist::PersistenceDebouncer;
use super::{now_millis, CacheKey};
use crate::config::EngineConfig;
use crate::metrics::{metric_names, CounterSnapshot, Counters, MetricSummary, MetricsRegistry};
use crate::provider::{translate_or_empty, Providers};
use crate::store::DurableStore;

/// Point-in-time view of the engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub fast_entries: usize,
    pub durable_entries: usize,
    /// Items accumulating for the next flush.
    pub pending_items: usize,
    /// Keys with waiters (accumulating or on the wire).
    pub waiting_keys: usize,
    pub in_flight_batches: usize,
    pub phase: BatchPhase,
    pub persist_armed: bool,
    pub coalescer: CoalescerStats,
    pub counters: CounterSnapshot,
    pub timings: HashMap<String, MetricSummary>,
}

enum Command {
    Translate {
        text: String,
        target: String,
        reply: oneshot::Sender<Lookup>,
    },
    Clear {
        reply: oneshot::Sender<()>,
    },
    PurgeExpired {
        reply: oneshot::Sender<usize>,
    },
    Reload {
        reply: oneshot::Sender<usize>,
    },
    Stats {
        reply: oneshot::Sender<EngineStats>,
    },
}

enum Lookup {
    Hit(String),
    Wait(broadcast::Receiver<String>),
}

/// Result of one provider call, matched back to keys by position.
struct BatchOutcome {
    batch_id: Uuid,
    keys: Vec<CacheKey>,
    results: Vec<String>,
}

/// Reports a batch even if the provider task dies before finishing, so the
/// keys' waiters always get an answer.
struct OutcomeGuard {
    batch_id: Uuid,
    keys: Option<Vec<CacheKey>>,
    done_tx: mpsc::UnboundedSender<BatchOutcome>,
}

impl OutcomeGuard {
    fn finish(mut self, results: Vec<String>) {
        if let Some(keys) = self.keys.take() {
            let _ = self.done_tx.send(BatchOutcome {
                batch_id: self.batch_id,
                keys,
                results,
            });
        }
    }
}

impl Drop for OutcomeGuard {
    fn drop(&mut self) {
        if let Some(keys) = self.keys.take() {
            warn!(batch_id = %self.batch_id, "provider task ended without a result");
            let _ = self.done_tx.send(BatchOutcome {
                batch_id: self.batch_id,
                keys,
                results: Vec::new(),
            });
        }
    }
}

/// Handle to a running engine. Clones share the same worker.
#[derive(Clone)]
pub struct TranslationEngine {
    tx: mpsc::UnboundedSender<Command>,
    shutdown: CancellationToken,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl TranslationEngine {
    /// Spawn the worker on the current Tokio runtime. The durable blob is
    /// loaded before the first command is served.
    pub fn start(
        store: Arc<dyn DurableStore>,
        providers: Providers,
        config_rx: watch::Receiver<EngineConfig>,
    ) -> Self {
        Self::start_with_metrics(store, providers, config_rx, Arc::new(MetricsRegistry::new()))
    }

    pub fn start_with_metrics(
        store: Arc<dyn DurableStore>,
        providers: Providers,
        config_rx: watch::Receiver<EngineConfig>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let config = config_rx.borrow().clone().sanitize();
        providers.configure(&config);

        let worker = Worker {
            cache: CacheManager::new(config.cache_ttl_days, config.max_persist_entries),
            coalescer: RequestCoalescer::new(),
            batches: BatchScheduler::default(),
            persistence: PersistenceDebouncer::default(),
            config,
            config_rx,
            config_open: true,
            store,
            providers,
            done_tx,
            metrics,
        };
        let handle = tokio::spawn(worker.run(rx, done_rx, shutdown.clone()));

        Self {
            tx,
            shutdown,
            worker: Arc::new(Mutex::new(Some(handle))),
        }
    }

    /// Translate `text` into `target`. An empty string means no translation is
    /// available (failure, empty provider reply, or empty input).
    pub async fn translate(&self, text: &str, target: &str) -> String {
        self.try_translate(text, target).await.unwrap_or_default()
    }

    /// Like `translate`, with `None` for "unavailable".
    pub async fn try_translate(&self, text: &str, target: &str) -> Option<String> {
        if text.is_empty() || !CacheKey::is_valid_target(target) {
            return None;
        }
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Translate {
                text: text.to_string(),
                target: target.to_string(),
                reply,
            })
            .ok()?;

        let value = match rx.await.ok()? {
            Lookup::Hit(value) => value,
            // Closed channel: the item was dropped without a result.
            Lookup::Wait(mut waiter) => waiter.recv().await.ok()?,
        };
        Some(value).filter(|v| !v.is_empty())
    }

    /// Drop both cache tiers and the durable blob.
    pub async fn clear_cache(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Clear { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Remove expired entries and persist immediately. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::PurgeExpired { reply }).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Re-read the durable blob and rebuild both tiers. Returns entries loaded.
    pub async fn reload(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Reload { reply }).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    pub async fn stats(&self) -> Option<EngineStats> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Stats { reply }).ok()?;
        rx.await.ok()
    }

    /// Stop the worker, writing any scheduled persistence first. Waiters still
    /// pending resolve to an empty string.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "engine worker ended abnormally");
            }
        }
    }
}

struct Worker {
    config: EngineConfig,
    config_rx: watch::Receiver<EngineConfig>,
    config_open: bool,
    store: Arc<dyn DurableStore>,
    providers: Providers,
    cache: CacheManager,
    coalescer: RequestCoalescer,
    batches: BatchScheduler,
    persistence: PersistenceDebouncer,
    done_tx: mpsc::UnboundedSender<BatchOutcome>,
    metrics: Arc<MetricsRegistry>,
}

/// Sleep until `deadline`, or forever when there is none.
async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl Worker {
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<Command>,
        mut done_rx: mpsc::UnboundedReceiver<BatchOutcome>,
        shutdown: CancellationToken,
    ) {
        self.reload().await;
        info!(
            mode = %self.config.provider_mode(),
            ttl_days = self.config.cache_ttl_days,
            max_entries = self.config.max_persist_entries,
            "translation engine started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                changed = self.config_rx.changed(), if self.config_open => match changed {
                    Ok(()) => self.apply_config(),
                    Err(_) => {
                        debug!("configuration channel closed, keeping last snapshot");
                        self.config_open = false;
                    }
                },
                Some(outcome) = done_rx.recv() => self.resolve(outcome),
                _ = sleep_until_opt(self.batches.deadline()) => self.flush_batches(),
                _ = sleep_until_opt(self.persistence.deadline()) => self.flush_persistence().await,
                cmd = rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd).await,
                    None => break,
                },
            }
        }

        if self.persistence.is_armed() {
            self.flush_persistence().await;
        }
        info!(
            abandoned_keys = self.coalescer.len(),
            "translation engine stopped"
        );
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Translate {
                text,
                target,
                reply,
            } => {
                let lookup = self.lookup(CacheKey::new(self.config.provider_mode(), text, target));
                let _ = reply.send(lookup);
            }
            Command::Clear { reply } => {
                self.clear().await;
                let _ = reply.send(());
            }
            Command::PurgeExpired { reply } => {
                let removed = self.cache.purge_expired(now_millis());
                if removed > 0 {
                    self.flush_persistence().await;
                }
                let _ = reply.send(removed);
            }
            Command::Reload { reply } => {
                let loaded = self.reload().await;
                let _ = reply.send(loaded);
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    /// Cache hit, or attach to (or create) the pending work for the key.
    fn lookup(&mut self, key: CacheKey) -> Lookup {
        if let Some(value) = self.cache.lookup(&key, now_millis()) {
            Counters::bump(&self.metrics.counters.cache_hits);
            return Lookup::Hit(value);
        }
        Counters::bump(&self.metrics.counters.cache_misses);

        let registration = self.coalescer.register(&key);
        if matches!(registration, Registration::New(_))
            && self.batches.enqueue(PendingBatchItem::new(key, Instant::now()))
        {
            debug!("batch window armed");
        }
        Lookup::Wait(registration.into_receiver())
    }

    /// Window expired: send one provider call per (mode, target) group.
    fn flush_batches(&mut self) {
        let groups = self.batches.take_groups();
        let now_ms = now_millis();

        for mut group in groups {
            let metrics = &self.metrics;
            let cache = &mut self.cache;
            let coalescer = &mut self.coalescer;
            group.items.retain(|item| {
                metrics.record(
                    metric_names::BATCH_WAIT,
                    item.enqueued_at.elapsed().as_micros() as f64,
                );
                // Resolved by another path since it was queued.
                match cache.lookup(&item.key, now_ms) {
                    Some(value) => {
                        coalescer.complete(&item.key, value);
                        false
                    }
                    None => true,
                }
            });
            if group.items.is_empty() {
                continue;
            }

            let texts = group.texts();
            let BatchGroup {
                mode,
                target,
                items,
            } = group;
            let keys: Vec<CacheKey> = items.into_iter().map(|item| item.key).collect();
            let provider = self.providers.for_mode(mode);
            let batch_id = Uuid::new_v4();
            let guard = OutcomeGuard {
                batch_id,
                keys: Some(keys),
                done_tx: self.done_tx.clone(),
            };
            let metrics = Arc::clone(&self.metrics);

            self.batches.begin_flight();
            Counters::bump(&self.metrics.counters.provider_calls);
            debug!(
                %batch_id,
                mode = %mode,
                lang = %target,
                size = texts.len(),
                "flushing translation batch"
            );

            tokio::spawn(async move {
                let span = metrics.span(metric_names::PROVIDER_CALL);
                let results = translate_or_empty(provider.as_ref(), &texts, &target).await;
                span.finish();
                guard.finish(results);
            });
        }
    }

    /// Fan results out to waiters; cache the non-empty ones.
    fn resolve(&mut self, outcome: BatchOutcome) {
        self.batches.end_flight();
        let BatchOutcome {
            batch_id,
            keys,
            results,
        } = outcome;

        if results.is_empty() {
            Counters::bump(&self.metrics.counters.provider_failures);
        }

        let now_ms = now_millis();
        let mut stored = 0usize;
        let mut results = results.into_iter();
        for key in &keys {
            let value = results.next().unwrap_or_default();
            if self.cache.insert(key.clone(), value.clone(), now_ms) {
                stored += 1;
            }
            self.coalescer.complete(key, value);
        }

        debug!(%batch_id, keys = keys.len(), stored, "batch resolved");
        if stored > 0 && self.persistence.schedule(Instant::now()) {
            debug!("persistence flush scheduled");
        }
    }

    /// Write the capped fast tier to the store. Failures are logged and dropped.
    async fn flush_persistence(&mut self) {
        self.persistence.fire();
        let snapshot = self.cache.snapshot(now_millis());
        let raw = blob::encode(snapshot.iter().map(|(key, entry)| (key, entry)));

        let span = self.metrics.span(metric_names::PERSIST_WRITE);
        match self.store.set(TRANSLATION_CACHE_KEY, raw).await {
            Ok(()) => {
                Counters::bump(&self.metrics.counters.persist_writes);
                debug!(entries = snapshot.len(), "translation cache persisted");
            }
            Err(e) => {
                Counters::bump(&self.metrics.counters.persist_failures);
                warn!(error = %e, "translation cache persist failed");
            }
        }
        span.finish();
    }

    /// Rebuild both tiers from the durable blob. A failed read keeps what is in memory.
    async fn reload(&mut self) -> usize {
        let span = self.metrics.span(metric_names::STORE_LOAD);
        let now_ms = now_millis();

        let entries = match self.store.get(TRANSLATION_CACHE_KEY).await {
            Ok(Some(raw)) => blob::decode(&raw, now_ms).unwrap_or_else(|e| {
                warn!(error = %e, "cache blob unreadable, starting empty");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "cache blob read failed, keeping current cache");
                span.finish();
                return self.cache.durable_len();
            }
        };

        let found = entries.len();
        let loaded = self.cache.rebuild(entries, now_ms);
        span.finish();
        info!(loaded, expired = found - loaded, "translation cache loaded");
        loaded
    }

    async fn clear(&mut self) {
        self.cache.clear();
        // Nothing left to write.
        self.persistence.fire();
        if let Err(e) = self.store.remove(TRANSLATION_CACHE_KEY).await {
            warn!(error = %e, "durable cache removal failed");
        }
        info!("translation cache cleared");
    }

    fn apply_config(&mut self) {
        let config = self.config_rx.borrow_and_update().clone().sanitize();
        if config == self.config {
            return;
        }
        self.cache
            .set_limits(config.cache_ttl_days, config.max_persist_entries);
        self.providers.configure(&config);
        info!(
            mode = %config.provider_mode(),
            ttl_days = config.cache_ttl_days,
            max_entries = config.max_persist_entries,
            "configuration applied"
        );
        self.config = config;
    }

    fn stats(&self) -> EngineStats {
        EngineStats {
            fast_entries: self.cache.fast_len(),
            durable_entries: self.cache.durable_len(),
            pending_items: self.batches.pending_len(),
            waiting_keys: self.coalescer.len(),
            in_flight_batches: self.batches.flights(),
            phase: self.batches.phase(),
            persist_armed: self.persistence.is_armed(),
            coalescer: self.coalescer.stats(),
            counters: self.metrics.counters.snapshot(),
            timings: self.metrics.summary(),
        }
    }
}
