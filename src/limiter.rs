//! Limiter service
//!
//! The per-process orchestrator in front of the five strategies. It owns two
//! pieces of shared state: the [`ScriptExecutor`] (with its script cache) and
//! a per-kind strategy cache. Strategy lookup is a lock-free read in the
//! common case; first use of a kind constructs the strategy under the map's
//! entry lock, so concurrent first callers observe exactly one instance.
//!
//! ## Fail-open
//!
//! `check` converts any [`StorageError`] into an **admitted** decision with
//! zero observed load and a max-representable limit, after logging at error
//! level: when the KVS cannot answer, availability wins over enforcement.
//! `reset` logs and swallows storage errors; a failed reset must not cascade
//! to the caller. Validation faults are not storage faults and are never
//! converted to admits; they are ruled out before a kind reaches this type
//! (tags parse into [`AlgorithmKind`], configs validate at their setters).

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{error, warn};

use crate::config::StrategyConfig;
use crate::decision::Decision;
use crate::kind::AlgorithmKind;
use crate::script::ScriptExecutor;
use crate::strategy::{build_strategy, Strategy};

/// Shared rate-limiter service: one per process, cloned by reference into
/// every request task.
pub struct Limiter {
    executor: Arc<ScriptExecutor>,
    defaults: StrategyConfig,
    strategies: DashMap<AlgorithmKind, Arc<dyn Strategy>>,
}

impl Limiter {
    /// Build a limiter over `executor` using `defaults` for every strategy
    /// the service constructs.
    pub fn new(executor: Arc<ScriptExecutor>, defaults: StrategyConfig) -> Self {
        Self {
            executor,
            defaults,
            strategies: DashMap::new(),
        }
    }

    /// Run one admission decision for `identifier` under `kind`.
    ///
    /// Storage failures fail open; the returned decision then reports
    /// `current = 0`, `limit = i64::MAX`, and no reset hint.
    pub async fn check(&self, kind: AlgorithmKind, identifier: &str) -> Decision {
        let strategy = self.strategy(kind);
        match strategy.check(identifier).await {
            Ok(decision) => decision,
            Err(e) => {
                error!(algorithm = %kind, identifier, error = %e, "check failed, admitting");
                Decision::fail_open(kind)
            }
        }
    }

    /// Clear all persisted state for `identifier` under `kind`. Storage
    /// failures are logged and swallowed.
    pub async fn reset(&self, kind: AlgorithmKind, identifier: &str) {
        let strategy = self.strategy(kind);
        if let Err(e) = strategy.reset(identifier).await {
            warn!(algorithm = %kind, identifier, error = %e, "reset failed");
        }
    }

    /// Parameter summary of the strategy serving `kind`.
    pub fn describe(&self, kind: AlgorithmKind) -> String {
        self.strategy(kind).describe()
    }

    /// Look up the strategy for `kind`, constructing it on first use.
    ///
    /// The vacant-entry arm runs under the map's shard lock; construction is
    /// pure (no I/O), so the lock is held only briefly and racing first
    /// callers all receive the same instance.
    fn strategy(&self, kind: AlgorithmKind) -> Arc<dyn Strategy> {
        if let Some(strategy) = self.strategies.get(&kind) {
            return strategy.clone();
        }
        match self.strategies.entry(kind) {
            Entry::Occupied(occupied) => occupied.get().clone(),
            Entry::Vacant(vacant) => {
                let strategy = build_strategy(kind, &self.defaults, self.executor.clone());
                vacant.insert(strategy.clone());
                strategy
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn unreachable_limiter() -> Limiter {
        let executor = Arc::new(
            ScriptExecutor::with_timeout("redis://127.0.0.1:9/", Duration::from_millis(250))
                .unwrap(),
        );
        Limiter::new(executor, StrategyConfig::default())
    }

    #[test]
    fn strategy_cache_returns_one_instance_per_kind() {
        let limiter = unreachable_limiter();
        let a = limiter.strategy(AlgorithmKind::TokenBucket);
        let b = limiter.strategy(AlgorithmKind::TokenBucket);
        let c = limiter.strategy(AlgorithmKind::FixedWindow);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(c.kind(), AlgorithmKind::FixedWindow);
        assert_eq!(limiter.strategies.len(), 2);
    }

    #[test]
    fn describe_reflects_defaults() {
        let limiter = unreachable_limiter();
        assert_eq!(
            limiter.describe(AlgorithmKind::TokenBucket),
            "token_bucket(capacity=10, refill_rate=1/s)"
        );
        assert_eq!(
            limiter.describe(AlgorithmKind::FixedWindow),
            "fixed_window(limit=10, window=60s)"
        );
    }

    #[tokio::test]
    async fn check_fails_open_when_kvs_is_unreachable() {
        let limiter = unreachable_limiter();
        for kind in AlgorithmKind::ALL {
            let d = limiter.check(kind, "u").await;
            assert!(d.admitted(), "{kind} must admit on storage failure");
            assert_eq!(d.current(), 0);
            assert_eq!(d.limit(), i64::MAX);
            assert_eq!(d.reset_at(), None);
        }
    }

    #[tokio::test]
    async fn reset_swallows_storage_failures() {
        let limiter = unreachable_limiter();
        // Must not panic or surface an error.
        limiter.reset(AlgorithmKind::SlidingWindowCounter, "u").await;
    }

    // ------------------------------------------------------------------
    // End-to-end scenarios against a live KVS. Run with:
    //   REDIS_URL=redis://127.0.0.1:6379/ cargo test -- --ignored
    // ------------------------------------------------------------------

    fn live_limiter(defaults: StrategyConfig) -> Limiter {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/".to_string());
        let executor = Arc::new(ScriptExecutor::connect(&url).unwrap());
        Limiter::new(executor, defaults)
    }

    /// Identifier unique to one test run, so reruns never observe stale
    /// counters.
    fn fresh_id(tag: &str) -> String {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .subsec_nanos();
        format!("it-{tag}-{}-{nanos}", std::process::id())
    }

    #[tokio::test]
    #[ignore = "requires a running redis (REDIS_URL)"]
    async fn token_bucket_admits_capacity_then_denies() {
        let limiter = live_limiter(StrategyConfig::default());
        let id = fresh_id("tb");

        let mut admits = 0;
        let mut last_admit_remaining = i64::MAX;
        for _ in 0..10 {
            let d = limiter.check(AlgorithmKind::TokenBucket, &id).await;
            assert!(d.admitted());
            admits += 1;
            last_admit_remaining = d.remaining();
        }
        assert_eq!(admits, 10);
        // Back-to-back calls can refill a sliver of a token between the
        // first and the last admit, which rounds remaining up by one.
        assert!(last_admit_remaining <= 1, "got {last_admit_remaining}");

        let denied = limiter.check(AlgorithmKind::TokenBucket, &id).await;
        assert!(!denied.admitted());

        limiter.reset(AlgorithmKind::TokenBucket, &id).await;
    }

    #[tokio::test]
    #[ignore = "requires a running redis (REDIS_URL)"]
    async fn fixed_window_reset_restores_pristine_state() {
        let limiter = live_limiter(StrategyConfig::default());
        let id = fresh_id("fw");

        for _ in 0..10 {
            assert!(limiter.check(AlgorithmKind::FixedWindow, &id).await.admitted());
        }
        assert!(!limiter.check(AlgorithmKind::FixedWindow, &id).await.admitted());

        // Idempotent: a second reset observes the same state as one.
        limiter.reset(AlgorithmKind::FixedWindow, &id).await;
        limiter.reset(AlgorithmKind::FixedWindow, &id).await;

        let d = limiter.check(AlgorithmKind::FixedWindow, &id).await;
        assert!(d.admitted());
        assert_eq!(d.current(), 1);

        limiter.reset(AlgorithmKind::FixedWindow, &id).await;
    }

    #[tokio::test]
    #[ignore = "requires a running redis (REDIS_URL)"]
    async fn leaky_bucket_banks_fractional_leak_time() {
        let defaults = StrategyConfig::new().leak_rate(0.5).unwrap();
        let limiter = live_limiter(defaults);
        let id = fresh_id("lb");

        for _ in 0..10 {
            assert!(limiter.check(AlgorithmKind::LeakyBucket, &id).await.admitted());
        }
        assert!(!limiter.check(AlgorithmKind::LeakyBucket, &id).await.admitted());

        // One item per 2 s: three items leak over six seconds.
        tokio::time::sleep(Duration::from_millis(6_100)).await;

        let d = limiter.check(AlgorithmKind::LeakyBucket, &id).await;
        assert!(d.admitted());
        assert_eq!(d.metadata().queue_size, Some(8));

        limiter.reset(AlgorithmKind::LeakyBucket, &id).await;
    }

    #[tokio::test]
    #[ignore = "requires a running redis (REDIS_URL)"]
    async fn sliding_window_log_never_undercounts() {
        let defaults = StrategyConfig::new().limit(30).unwrap();
        let limiter = live_limiter(defaults);
        let id = fresh_id("swl");

        // Every check must land one distinct member: the cardinality-derived
        // count increments by exactly one even when calls land in the same
        // microsecond.
        for i in 1..=25 {
            let d = limiter.check(AlgorithmKind::SlidingWindowLog, &id).await;
            assert!(d.admitted());
            assert_eq!(d.current(), i);
        }

        limiter.reset(AlgorithmKind::SlidingWindowLog, &id).await;
    }

    #[tokio::test]
    #[ignore = "requires a running redis (REDIS_URL)"]
    async fn sliding_window_log_denies_over_limit() {
        let limiter = live_limiter(StrategyConfig::default());
        let id = fresh_id("swl-deny");

        let mut admitted = 0;
        let mut denied = 0;
        for _ in 0..15 {
            let d = limiter.check(AlgorithmKind::SlidingWindowLog, &id).await;
            if d.admitted() {
                admitted += 1;
            } else {
                denied += 1;
                assert_eq!(d.current(), 10);
            }
        }
        assert_eq!(admitted, 10);
        assert_eq!(denied, 5);

        limiter.reset(AlgorithmKind::SlidingWindowLog, &id).await;
    }

    #[tokio::test]
    #[ignore = "requires a running redis (REDIS_URL)"]
    async fn independent_identifiers_do_not_interfere() {
        let limiter = live_limiter(StrategyConfig::default());
        let a = fresh_id("ind-a");
        let b = fresh_id("ind-b");

        for _ in 0..10 {
            assert!(limiter.check(AlgorithmKind::FixedWindow, &a).await.admitted());
        }
        assert!(!limiter.check(AlgorithmKind::FixedWindow, &a).await.admitted());

        // Exhausting `a` must leave `b` untouched.
        let d = limiter.check(AlgorithmKind::FixedWindow, &b).await;
        assert!(d.admitted());
        assert_eq!(d.current(), 1);

        limiter.reset(AlgorithmKind::FixedWindow, &a).await;
        limiter.reset(AlgorithmKind::FixedWindow, &b).await;
    }
}
