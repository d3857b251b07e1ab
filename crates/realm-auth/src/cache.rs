//! Single-flight TTL cache.
//!
//! Memoizes an expensive keyed async load (in practice: a realm's key set)
//! and guarantees that concurrent callers asking for the same missing or
//! expired key share ONE loader invocation.
//!
//! # Concurrency
//!
//! - Each key owns a slot; slots live in a sharded `DashMap`, so work on one
//!   key never waits on another key
//! - A slot's mutex only guards the check-and-claim step and is never held
//!   across an `.await`
//! - The winning caller spawns the load on its own task and publishes it as a
//!   shared future; every other caller for that key awaits the same future
//! - A caller that is cancelled only drops its handle to the shared future;
//!   the spawned load keeps running for the remaining waiters
//! - Every load is bounded by a timeout; when it fires the claim is released
//!   and the timeout is delivered to all waiters
//!
//! # Expiry
//!
//! With [`RefreshPolicy::WaitForRefresh`] (the default) an expired entry is
//! treated exactly like a miss, so staleness is bounded by the TTL.
//! [`RefreshPolicy::StaleWhileRevalidate`] keeps serving the expired value
//! while a single background refresh runs, but only until `ttl + load_timeout`
//! after it was stored. Past that point the entry is a miss again, even when
//! every refresh so far has failed.

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Default upper bound for a single load (10 seconds).
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline used when `start + offset` is not representable (about 30 years).
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `start + offset`, saturating instead of panicking on overflow.
fn deadline(start: Instant, offset: Duration) -> Instant {
    start
        .checked_add(offset)
        .or_else(|| start.checked_add(FAR_FUTURE))
        .unwrap_or(start)
}

/// What to do with an entry whose TTL has elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshPolicy {
    /// Treat an expired entry as a miss; callers wait for the refresh.
    #[default]
    WaitForRefresh,

    /// Serve the expired value while one background refresh runs.
    StaleWhileRevalidate,
}

/// Failure delivered to every waiter of a failed load.
///
/// Nothing is cached on failure; the next `get_with` for the key retries.
#[derive(Debug, Clone, Error)]
pub enum CacheError<E> {
    /// The loader itself returned an error.
    #[error("load failed: {0}")]
    Load(E),

    /// The loader did not finish within the load timeout.
    #[error("load timed out after {0:?}")]
    Timeout(Duration),

    /// The load task ended without producing a value.
    #[error("load aborted: {0}")]
    Aborted(String),
}

type LoadResult<V, E> = Result<V, CacheError<E>>;
type InFlight<V, E> = Shared<BoxFuture<'static, LoadResult<V, E>>>;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

struct SlotState<V, E> {
    entry: Option<Entry<V>>,
    in_flight: Option<InFlight<V, E>>,
}

/// Per-key state. At most one load is in flight per slot.
struct Slot<V, E> {
    state: Mutex<SlotState<V, E>>,
}

impl<V: Clone, E> Slot<V, E> {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                entry: None,
                in_flight: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<V, E>> {
        // The critical sections cannot leave the state half-written
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Release the claim, storing the value only on success.
    fn complete(&self, outcome: &LoadResult<V, E>, ttl: Duration) {
        let mut state = self.lock();
        state.in_flight = None;
        if let Ok(value) = outcome {
            state.entry = Some(Entry {
                value: value.clone(),
                expires_at: deadline(Instant::now(), ttl),
            });
        }
    }
}

/// Keyed TTL cache with per-key single-flight loading.
pub struct SingleFlightCache<K, V, E> {
    slots: DashMap<K, Arc<Slot<V, E>>>,
    ttl: Duration,
    load_timeout: Duration,
    policy: RefreshPolicy,
}

impl<K, V, E> SingleFlightCache<K, V, E>
where
    K: Eq + Hash,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create a cache with the given TTL, the default load timeout and the
    /// wait-for-refresh policy.
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: DashMap::new(),
            ttl,
            load_timeout: DEFAULT_LOAD_TIMEOUT,
            policy: RefreshPolicy::default(),
        }
    }

    /// Bound every load by `load_timeout`.
    #[must_use]
    pub fn with_load_timeout(mut self, load_timeout: Duration) -> Self {
        self.load_timeout = load_timeout;
        self
    }

    /// Select the expiry policy.
    #[must_use]
    pub fn with_policy(mut self, policy: RefreshPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.policy
    }

    /// Return the value for `key`, loading it with `loader` when it is
    /// missing or expired.
    ///
    /// `loader` is only invoked by the caller that wins the claim for `key`;
    /// concurrent callers attach to that load and observe its outcome.
    ///
    /// # Errors
    ///
    /// Returns the [`CacheError`] of the load this call attached to. Errors
    /// are never cached.
    pub async fn get_with<F, Fut>(&self, key: K, loader: F) -> LoadResult<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let slot = self.slot(key);

        let in_flight = {
            let mut state = slot.lock();
            let now = Instant::now();

            let stale = match &state.entry {
                Some(entry) if entry.expires_at > now => {
                    tracing::trace!(target: "realm_auth.cache", "Cache hit");
                    return Ok(entry.value.clone());
                }
                Some(entry)
                    if self.policy == RefreshPolicy::StaleWhileRevalidate
                        && deadline(entry.expires_at, self.load_timeout) > now =>
                {
                    Some(entry.value.clone())
                }
                _ => None,
            };

            let in_flight = if let Some(in_flight) = state.in_flight.clone() {
                tracing::debug!(target: "realm_auth.cache", "Joining in-flight load");
                in_flight
            } else {
                tracing::debug!(target: "realm_auth.cache", "Cache miss, starting load");
                let in_flight = self.start_load(Arc::clone(&slot), loader());
                state.in_flight = Some(in_flight.clone());
                in_flight
            };

            if let Some(value) = stale {
                tracing::debug!(
                    target: "realm_auth.cache",
                    "Serving expired value while refresh runs"
                );
                return Ok(value);
            }

            in_flight
        };

        in_flight.await
    }

    fn slot(&self, key: K) -> Arc<Slot<V, E>> {
        if let Some(slot) = self.slots.get(&key) {
            return Arc::clone(slot.value());
        }
        Arc::clone(
            self.slots
                .entry(key)
                .or_insert_with(|| Arc::new(Slot::new()))
                .value(),
        )
    }

    /// Spawn the load so that it outlives any single waiter.
    fn start_load<Fut>(&self, slot: Arc<Slot<V, E>>, load: Fut) -> InFlight<V, E>
    where
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let ttl = self.ttl;
        let load_timeout = self.load_timeout;

        let task = tokio::spawn(async move {
            let bounded = tokio::time::timeout(load_timeout, AssertUnwindSafe(load).catch_unwind());
            let outcome = match bounded.await {
                Ok(Ok(Ok(value))) => Ok(value),
                Ok(Ok(Err(e))) => Err(CacheError::Load(e)),
                Ok(Err(_)) => Err(CacheError::Aborted("loader panicked".to_string())),
                Err(_) => {
                    tracing::warn!(
                        target: "realm_auth.cache",
                        timeout_ms = u64::try_from(load_timeout.as_millis()).unwrap_or(u64::MAX),
                        "Load timed out"
                    );
                    Err(CacheError::Timeout(load_timeout))
                }
            };
            slot.complete(&outcome, ttl);
            outcome
        });

        async move {
            task.await
                .unwrap_or_else(|e| Err(CacheError::Aborted(e.to_string())))
        }
        .boxed()
        .shared()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    type TestCache = SingleFlightCache<&'static str, usize, String>;

    /// Loader that counts invocations and yields the invocation number.
    fn counted(
        calls: Arc<AtomicUsize>,
        delay: Duration,
    ) -> impl Future<Output = Result<usize, String>> + Send + 'static {
        async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(delay).await;
            Ok(n)
        }
    }

    fn failing(
        calls: Arc<AtomicUsize>,
        delay: Duration,
    ) -> impl Future<Output = Result<usize, String>> + Send + 'static {
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            Err("key set endpoint unreachable".to_string())
        }
    }

    #[test]
    fn test_defaults() {
        let cache = TestCache::new(Duration::from_secs(60));
        assert_eq!(cache.ttl(), Duration::from_secs(60));
        assert_eq!(cache.policy(), RefreshPolicy::WaitForRefresh);
        assert_eq!(cache.load_timeout, DEFAULT_LOAD_TIMEOUT);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_gets_trigger_single_load() {
        let cache = Arc::new(TestCache::new(Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .get_with("edu", || counted(calls, Duration::from_millis(50)))
                        .await
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 1);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_value_served_before_ttl() {
        let cache = TestCache::new(Duration::from_millis(100));
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache
            .get_with("edu", || counted(Arc::clone(&calls), Duration::ZERO))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_millis(50)).await;
        let second = cache
            .get_with("edu", || counted(Arc::clone(&calls), Duration::ZERO))
            .await
            .unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_triggers_exactly_one_reload() {
        let cache = TestCache::new(Duration::from_millis(100));
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_with("edu", || counted(Arc::clone(&calls), Duration::ZERO))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_millis(150)).await;
        let refreshed = cache
            .get_with("edu", || counted(Arc::clone(&calls), Duration::ZERO))
            .await
            .unwrap();

        assert_eq!(refreshed, 2, "expired value must not be served");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_concurrent_with_refresh_share_it() {
        let cache = TestCache::new(Duration::from_millis(100));
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_with("edu", || counted(Arc::clone(&calls), Duration::ZERO))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_millis(150)).await;

        let results = join_all((0..10).map(|_| {
            cache.get_with("edu", || counted(Arc::clone(&calls), Duration::from_millis(20)))
        }))
        .await;

        assert!(results.iter().all(|r| matches!(r, Ok(2))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let cache = TestCache::new(Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));

        let result = cache
            .get_with("edu", || failing(Arc::clone(&calls), Duration::ZERO))
            .await;
        assert!(matches!(result, Err(CacheError::Load(_))));

        let retried = cache
            .get_with("edu", || counted(Arc::clone(&calls), Duration::ZERO))
            .await;
        assert_eq!(retried.unwrap(), 2, "next get must retry the loader");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_delivered_to_all_attached_waiters() {
        let cache = TestCache::new(Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));

        let results = join_all((0..8).map(|_| {
            cache.get_with("edu", || failing(Arc::clone(&calls), Duration::from_millis(20)))
        }))
        .await;

        for result in results {
            match result {
                Err(CacheError::Load(msg)) => assert_eq!(msg, "key set endpoint unreachable"),
                other => panic!("expected load failure, got {other:?}"),
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_releases_claim() {
        let cache = TestCache::new(Duration::from_secs(60)).with_load_timeout(Duration::from_secs(1));
        let calls = Arc::new(AtomicUsize::new(0));

        let result = cache
            .get_with("edu", || counted(Arc::clone(&calls), Duration::from_secs(60)))
            .await;
        assert!(matches!(result, Err(CacheError::Timeout(d)) if d == Duration::from_secs(1)));

        let retried = cache
            .get_with("edu", || counted(Arc::clone(&calls), Duration::ZERO))
            .await;
        assert_eq!(retried.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_does_not_cancel_shared_load() {
        let cache = Arc::new(TestCache::new(Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));
        let started = Arc::new(Notify::new());

        let first = {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            let started = Arc::clone(&started);
            tokio::spawn(async move {
                cache
                    .get_with("edu", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        started.notify_one();
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<usize, String>(7)
                    })
                    .await
            })
        };

        started.notified().await;
        first.abort();

        let value = cache
            .get_with("edu", || counted(Arc::clone(&calls), Duration::ZERO))
            .await
            .unwrap();

        assert_eq!(value, 7, "second caller must observe the original load");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_keys_do_not_block_each_other() {
        let cache = Arc::new(TestCache::new(Duration::from_secs(60)));
        let release = Arc::new(Notify::new());

        let blocked = {
            let cache = Arc::clone(&cache);
            let release = Arc::clone(&release);
            tokio::spawn(async move {
                cache
                    .get_with("slow-realm", move || async move {
                        release.notified().await;
                        Ok::<usize, String>(1)
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        let other = tokio::time::timeout(
            Duration::from_secs(1),
            cache.get_with("edu", || async { Ok::<usize, String>(2) }),
        )
        .await
        .expect("independent key must not wait on another key's load");
        assert_eq!(other.unwrap(), 2);

        release.notify_one();
        assert_eq!(blocked.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_panicking_loader_releases_claim() {
        let cache = TestCache::new(Duration::from_secs(60));

        let result = cache
            .get_with("edu", || async {
                let missing: Option<usize> = None;
                Ok::<usize, String>(missing.expect("loader exploded"))
            })
            .await;
        assert!(matches!(result, Err(CacheError::Aborted(_))));

        let retried = cache.get_with("edu", || async { Ok::<usize, String>(3) }).await;
        assert_eq!(retried.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_while_revalidate_serves_expired_value() {
        let cache = TestCache::new(Duration::from_millis(100))
            .with_policy(RefreshPolicy::StaleWhileRevalidate);
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_with("edu", || counted(Arc::clone(&calls), Duration::ZERO))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_millis(150)).await;

        let stale = cache
            .get_with("edu", || counted(Arc::clone(&calls), Duration::from_millis(10)))
            .await
            .unwrap();
        assert_eq!(stale, 1, "expired value is served while refreshing");

        // Let the background refresh finish
        tokio::time::sleep(Duration::from_millis(20)).await;

        let fresh = cache
            .get_with("edu", || counted(Arc::clone(&calls), Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(fresh, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_value_survives_failed_refresh_within_grace() {
        let cache = TestCache::new(Duration::from_millis(100))
            .with_load_timeout(Duration::from_secs(1))
            .with_policy(RefreshPolicy::StaleWhileRevalidate);
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_with("edu", || counted(Arc::clone(&calls), Duration::ZERO))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_millis(150)).await;

        let stale = cache
            .get_with("edu", || failing(Arc::clone(&calls), Duration::ZERO))
            .await;
        assert_eq!(stale.unwrap(), 1);

        // Let the failing refresh finish
        tokio::time::sleep(Duration::from_millis(10)).await;

        let again = cache
            .get_with("edu", || failing(Arc::clone(&calls), Duration::ZERO))
            .await;
        assert_eq!(again.unwrap(), 1, "still inside ttl + load_timeout");

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_value_not_served_after_grace_when_refresh_fails() {
        let cache = TestCache::new(Duration::from_millis(100))
            .with_load_timeout(Duration::from_secs(1))
            .with_policy(RefreshPolicy::StaleWhileRevalidate);
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_with("edu", || counted(Arc::clone(&calls), Duration::ZERO))
            .await
            .unwrap();

        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(3600)).await;
            let result = cache
                .get_with("edu", || failing(Arc::clone(&calls), Duration::ZERO))
                .await;
            assert!(
                matches!(result, Err(CacheError::Load(_))),
                "expired value served long after ttl + load_timeout: {result:?}"
            );
        }

        let recovered = cache
            .get_with("edu", || counted(Arc::clone(&calls), Duration::ZERO))
            .await;
        assert_eq!(recovered.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_unrepresentable_ttl_still_caches() {
        let cache = TestCache::new(Duration::from_secs(u64::MAX));
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache
            .get_with("edu", || counted(Arc::clone(&calls), Duration::ZERO))
            .await;
        let second = cache
            .get_with("edu", || counted(Arc::clone(&calls), Duration::ZERO))
            .await;

        assert_eq!(first.unwrap(), 1);
        assert_eq!(second.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_deadline_saturates() {
        let now = Instant::now();
        assert_eq!(deadline(now, Duration::from_secs(5)), now + Duration::from_secs(5));
        assert!(deadline(now, Duration::from_secs(u64::MAX)) > now);
    }
}
