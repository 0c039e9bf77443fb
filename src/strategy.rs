//! Strategy trait & factory
//!
//! The capability set every algorithm implements is `{check, reset,
//! describe}`. Strategies are stateless apart from their parameters and a
//! shared [`ScriptExecutor`] handle: all counter state lives KVS-side, so one
//! strategy instance serves every identifier concurrently.
//!
//! The family is **closed**: [`build_strategy`] is the single registration
//! point, and adding an algorithm means adding a variant to
//! [`AlgorithmKind`] and an arm here. Parameter validity is established
//! before this seam: [`crate::config::StrategyConfig`] rejects bad values at
//! its setters, so a config that reaches the factory is valid by
//! construction and instantiation cannot fail.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::StrategyConfig;
use crate::decision::Decision;
use crate::fixed_window::FixedWindow;
use crate::kind::AlgorithmKind;
use crate::leaky_bucket::LeakyBucket;
use crate::script::{ScriptExecutor, ScriptValue, StorageError};
use crate::sliding_window_counter::SlidingWindowCounter;
use crate::sliding_window_log::SlidingWindowLog;
use crate::token_bucket::TokenBucket;

/// One rate-limiting algorithm bound to its parameters and the shared
/// executor.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// The algorithm this strategy implements.
    fn kind(&self) -> AlgorithmKind;

    /// Human-readable parameter summary, e.g.
    /// `token_bucket(capacity=10, refill_rate=1/s)`.
    fn describe(&self) -> String;

    /// Run one atomic admission decision for `identifier`.
    async fn check(&self, identifier: &str) -> Result<Decision, StorageError>;

    /// Remove all persisted state for `identifier`, returning it to the
    /// never-seen condition. Idempotent.
    async fn reset(&self, identifier: &str) -> Result<(), StorageError>;
}

/// Instantiate the strategy for `kind` with the parameters it draws from
/// `config`.
pub fn build_strategy(
    kind: AlgorithmKind,
    config: &StrategyConfig,
    executor: Arc<ScriptExecutor>,
) -> Arc<dyn Strategy> {
    match kind {
        AlgorithmKind::TokenBucket => Arc::new(TokenBucket::new(executor, config)),
        AlgorithmKind::LeakyBucket => Arc::new(LeakyBucket::new(executor, config)),
        AlgorithmKind::FixedWindow => Arc::new(FixedWindow::new(executor, config)),
        AlgorithmKind::SlidingWindowLog => Arc::new(SlidingWindowLog::new(executor, config)),
        AlgorithmKind::SlidingWindowCounter => {
            Arc::new(SlidingWindowCounter::new(executor, config))
        }
    }
}

// ============================================================================
// Reply decoding helpers shared by the strategy decoders
// ============================================================================

/// Integer element at `idx`, or a reply-contract error naming the position.
pub(crate) fn int_at(reply: &[ScriptValue], idx: usize) -> Result<i64, StorageError> {
    reply
        .get(idx)
        .and_then(ScriptValue::as_int)
        .ok_or_else(|| StorageError::Reply(format!("expected integer at element {idx}")))
}

/// Double element at `idx` (string re-parse or integer cast).
pub(crate) fn f64_at(reply: &[ScriptValue], idx: usize) -> Result<f64, StorageError> {
    reply
        .get(idx)
        .and_then(ScriptValue::as_f64)
        .ok_or_else(|| StorageError::Reply(format!("expected number at element {idx}")))
}

/// The 0/1 admission flag every check script returns first.
pub(crate) fn admitted_at(reply: &[ScriptValue], idx: usize) -> Result<bool, StorageError> {
    Ok(int_at(reply, idx)? == 1)
}

/// Wall-clock seconds used for advisory reset hints computed caller-side.
///
/// Admission decisions never read this clock; only the bucket algorithms'
/// reset *hints* do, and those are best-effort by contract.
#[inline]
pub(crate) fn hint_now() -> i64 {
    chrono::Utc::now().timestamp()
}
