//! Keyed cache of per-instance sample history with time-based expiry.
//!
//! All writes and all projection reads go through one mutex, so a reader
//! never observes a half-applied write. Every change is queued for the
//! listeners while that mutex is held, so they see writes and removals in
//! the order the store applied them. Listeners run on a dedicated notifier
//! thread and never inside a caller's `put`.

use crate::core::config::StoreConfig;
use crate::core::{CollectorError, ExpiryPolicy, Result, Sample};
use crate::metrics::clock::{Clock, SystemClock};
use crate::metrics::history::SampleHistory;
use ahash::AHashMap;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Why an entry left the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    /// The entry outlived the eviction timeout.
    Expired,
    /// The entry was invalidated by a caller.
    Explicit,
}

/// Observer of changes to the store.
///
/// Called on the store's notifier thread in the order the store applied the
/// changes. Errors and panics are logged and never stop later notifications.
pub trait StoreListener: Send + Sync {
    /// Handles a write to `key`; `history` is its history after the write.
    fn on_write(&self, _key: &str, _history: &SampleHistory) -> Result<()> {
        Ok(())
    }

    /// Handles the removal of `key`, whose most recent reading was `sample`.
    fn on_evict(&self, key: &str, sample: &Sample, cause: RemovalCause) -> Result<()>;
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups that found a live entry
    pub hit_count: u64,
    /// Lookups that found nothing
    pub miss_count: u64,
    /// Entries removed because they expired
    pub eviction_count: u64,
    /// Entries removed by invalidation
    pub invalidation_count: u64,
    /// Samples refused for missing identity
    pub rejected_count: u64,
    /// Entries currently held, expired-but-unswept included
    pub entry_count: usize,
}

impl CacheStats {
    /// Total lookups.
    pub fn request_count(&self) -> u64 {
        self.hit_count + self.miss_count
    }

    /// Fraction of lookups that hit; 1.0 before any lookup.
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        match self.request_count() {
            0 => 1.0,
            requests => self.hit_count as f64 / requests as f64,
        }
    }

    /// Fraction of lookups that missed; 0.0 before any lookup.
    #[allow(clippy::cast_precision_loss)]
    pub fn miss_rate(&self) -> f64 {
        match self.request_count() {
            0 => 0.0,
            requests => self.miss_count as f64 / requests as f64,
        }
    }
}

#[derive(Debug, Default)]
struct StoreCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
    rejected: AtomicU64,
}

#[derive(Debug)]
struct Entry {
    history: SampleHistory,
    touched: Duration,
}

#[derive(Debug)]
enum Change {
    Write(SampleHistory),
    Removal(Sample, RemovalCause),
}

#[derive(Debug)]
enum Notification {
    Change { key: String, change: Change },
    Flush(Sender<()>),
}

type Listeners = Arc<RwLock<Vec<Arc<dyn StoreListener>>>>;

/// Authoritative store of recent samples, keyed by `stream.app.guid`.
pub struct SampleStore {
    entries: Mutex<AHashMap<String, Entry>>,
    timeout: Duration,
    policy: ExpiryPolicy,
    cleanup_interval: Duration,
    clock: Arc<dyn Clock>,
    last_sweep_nanos: AtomicU64,
    counters: StoreCounters,
    listeners: Listeners,
    notifier: Sender<Notification>,
}

impl SampleStore {
    /// Creates a store on the system clock.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Creates a store on the given clock and starts its notifier thread.
    pub fn with_clock(config: &StoreConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let (notifier, notifications) = crossbeam_channel::unbounded();
        let listeners: Listeners = Arc::new(RwLock::new(Vec::new()));

        let dispatch_listeners = Arc::clone(&listeners);
        std::thread::Builder::new()
            .name("sample-store-notifier".to_string())
            .spawn(move || dispatch(&notifications, &dispatch_listeners))?;

        Ok(Self {
            entries: Mutex::new(AHashMap::new()),
            timeout: config.eviction_timeout,
            policy: config.expiry,
            cleanup_interval: config.cleanup_interval,
            last_sweep_nanos: AtomicU64::new(duration_nanos(clock.now())),
            clock,
            counters: StoreCounters::default(),
            listeners,
            notifier,
        })
    }

    /// Registers a listener for writes and removals.
    pub fn add_listener(&self, listener: Arc<dyn StoreListener>) {
        self.listeners.write().push(listener);
    }

    /// Eviction timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Expiry policy.
    pub fn policy(&self) -> ExpiryPolicy {
        self.policy
    }

    /// Prepends `sample` to the history of its key.
    ///
    /// Samples without a full identity are refused with
    /// [`CollectorError::InvalidSample`] and never stored.
    pub fn put(&self, sample: Sample) -> Result<()> {
        if let Err(property) = sample.identity() {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(CollectorError::InvalidSample { property });
        }

        let now = self.clock.now();
        let key = sample.key.clone();
        {
            let mut entries = self.entries.lock();
            let entry = entries.entry(key.clone()).or_insert_with(|| Entry {
                history: SampleHistory::new(),
                touched: now,
            });

            // An expired entry rewritten before the sweep reached it starts a
            // fresh history; the key never left, so no removal is sent.
            if self.is_expired(entry, now) {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                entry.history = SampleHistory::new();
            }

            entry.history.push(sample);
            entry.touched = now;

            if !self.listeners.read().is_empty() {
                self.send(key, Change::Write(entry.history.clone()));
            }
        }

        self.sweep_if_due(now);
        Ok(())
    }

    /// Returns a copy of the history for `key`.
    pub fn get(&self, key: &str) -> Option<SampleHistory> {
        let now = self.clock.now();
        let found = {
            let mut entries = self.entries.lock();
            let is_expired = entries.get(key).map(|entry| self.is_expired(entry, now));
            match is_expired {
                Some(true) => {
                    if let Some(entry) = entries.remove(key) {
                        self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                        self.notify(key.to_string(), &entry, RemovalCause::Expired);
                    }
                    None
                },
                Some(false) => entries.get_mut(key).map(|entry| {
                    if self.policy == ExpiryPolicy::AfterAccess {
                        entry.touched = now;
                    }
                    entry.history.clone()
                }),
                None => None,
            }
        };

        if found.is_some() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
        }

        self.sweep_if_due(now);
        found
    }

    /// Returns a copy of the live history for `key` without counting a
    /// lookup or refreshing its access time.
    pub fn peek(&self, key: &str) -> Option<SampleHistory> {
        let now = self.clock.now();
        self.entries
            .lock()
            .get(key)
            .filter(|entry| !self.is_expired(entry, now))
            .map(|entry| entry.history.clone())
    }

    /// Keys of all live entries.
    pub fn keys(&self) -> BTreeSet<String> {
        let now = self.clock.now();
        self.entries
            .lock()
            .iter()
            .filter(|(_, entry)| !self.is_expired(entry, now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .lock()
            .values()
            .filter(|entry| !self.is_expired(entry, now))
            .count()
    }

    /// Whether no live entry remains.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes `key`, notifying listeners. Returns whether it was present.
    pub fn invalidate(&self, key: &str) -> bool {
        let mut entries = self.entries.lock();
        match entries.remove(key) {
            Some(entry) => {
                self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
                self.notify(key.to_string(), &entry, RemovalCause::Explicit);
                true
            },
            None => false,
        }
    }

    /// Removes every entry, notifying listeners for each.
    pub fn invalidate_all(&self) {
        let mut entries = self.entries.lock();
        for (key, entry) in entries.drain() {
            self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
            self.notify(key, &entry, RemovalCause::Explicit);
        }
    }

    /// Sweeps expired entries now. Returns how many were evicted.
    pub fn run_pending_tasks(&self) -> usize {
        let now = self.clock.now();
        self.last_sweep_nanos.store(duration_nanos(now), Ordering::Relaxed);

        let mut entries = self.entries.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| self.is_expired(entry, now))
            .map(|(key, _)| key.clone())
            .collect();

        let count = expired.len();
        if count > 0 {
            tracing::debug!(count, "Evicting expired samples");
        }
        for key in expired {
            if let Some(entry) = entries.remove(&key) {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                self.notify(key, &entry, RemovalCause::Expired);
            }
        }
        count
    }

    /// Blocks until listeners have handled every change made before the call.
    ///
    /// Must not be called from a listener, which runs on the thread this
    /// waits for.
    pub fn flush(&self) {
        let (done, delivered) = crossbeam_channel::bounded(1);
        if self.notifier.send(Notification::Flush(done)).is_ok() {
            // An error means the notifier thread is gone and nothing is pending.
            let _ = delivered.recv();
        }
    }

    /// Runs `f` over every live history while holding the store lock.
    ///
    /// Writers wait until `f` returns, so `f` sees one consistent state.
    pub fn scan<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&mut dyn Iterator<Item = (&str, &SampleHistory)>) -> T,
    {
        let now = self.clock.now();
        let entries = self.entries.lock();
        let mut live = entries
            .iter()
            .filter(|(_, entry)| !self.is_expired(entry, now))
            .map(|(key, entry)| (key.as_str(), &entry.history));
        f(&mut live)
    }

    /// Current statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hit_count: self.counters.hits.load(Ordering::Relaxed),
            miss_count: self.counters.misses.load(Ordering::Relaxed),
            eviction_count: self.counters.evictions.load(Ordering::Relaxed),
            invalidation_count: self.counters.invalidations.load(Ordering::Relaxed),
            rejected_count: self.counters.rejected.load(Ordering::Relaxed),
            entry_count: self.entries.lock().len(),
        }
    }

    fn is_expired(&self, entry: &Entry, now: Duration) -> bool {
        now.saturating_sub(entry.touched) >= self.timeout
    }

    fn sweep_if_due(&self, now: Duration) {
        let last = Duration::from_nanos(self.last_sweep_nanos.load(Ordering::Relaxed));
        if now.saturating_sub(last) >= self.cleanup_interval {
            self.run_pending_tasks();
        }
    }

    /// Queues a removal. Callers hold the entries lock.
    fn notify(&self, key: String, entry: &Entry, cause: RemovalCause) {
        if let Some(sample) = entry.history.latest() {
            self.send(key, Change::Removal(sample.clone(), cause));
        }
    }

    fn send(&self, key: String, change: Change) {
        if self.notifier.send(Notification::Change { key, change }).is_err() {
            tracing::warn!("Store notifier is gone, dropping notification");
        }
    }
}

impl std::fmt::Debug for SampleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleStore")
            .field("timeout", &self.timeout)
            .field("policy", &self.policy)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[allow(clippy::cast_possible_truncation)]
fn duration_nanos(duration: Duration) -> u64 {
    duration.as_nanos() as u64
}

fn dispatch(notifications: &Receiver<Notification>, listeners: &Listeners) {
    for note in notifications {
        let (key, change) = match note {
            Notification::Change { key, change } => (key, change),
            Notification::Flush(done) => {
                let _ = done.send(());
                continue;
            },
        };

        let current: Vec<Arc<dyn StoreListener>> = listeners.read().iter().map(Arc::clone).collect();
        for listener in &current {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| match &change {
                Change::Write(history) => listener.on_write(&key, history),
                Change::Removal(sample, cause) => listener.on_evict(&key, sample, *cause),
            }));
            match outcome {
                Ok(Ok(())) => {},
                Ok(Err(e)) => {
                    tracing::warn!(key = %key, error = %e, "Store listener failed");
                },
                Err(_) => {
                    tracing::error!(key = %key, "Store listener panicked");
                },
            }
        }
    }
    tracing::debug!("Store notifier stopped");
}
