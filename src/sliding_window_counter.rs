//! Sliding Window Counter
//!
//! Approximates the sliding-window count with two fixed counters: the current
//! window's and the previous window's, blended linearly by how far into the
//! current window "now" falls:
//!
//! ```text
//! weighted = prev_count × (1 − elapsed_frac) + cur_count
//! ```
//!
//! Memory per identifier stays O(1) and the fixed-window boundary burst is
//! smoothed away, at the cost of assuming the previous window's requests were
//! evenly distributed.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::StrategyConfig;
use crate::decision::{Decision, DecisionMetadata};
use crate::kind::{key_pattern, key_prefix, AlgorithmKind};
use crate::script::{ScriptExecutor, ScriptValue, StorageError};
use crate::strategy::{admitted_at, int_at, Strategy};

/// KEYS: the `rate_limit:sliding_window_counter:<id>` prefix; both window
/// keys are derived in-script from the server clock. ARGV: limit, window
/// seconds. Returns
/// `{admitted, ⌊weighted⌋, limit, reset_at, prev_count, cur_count}`.
const CHECK_SCRIPT: &str = r#"
local prefix = KEYS[1]
local limit = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local t = redis.call('TIME')
local now = tonumber(t[1]) + tonumber(t[2]) / 1000000
local cur_id = math.floor(now / window)
local cur_key = prefix .. ':' .. cur_id
local prev_key = prefix .. ':' .. (cur_id - 1)
local cur_count = tonumber(redis.call('GET', cur_key))
if cur_count == nil then
  cur_count = 0
end
local prev_count = tonumber(redis.call('GET', prev_key))
if prev_count == nil then
  prev_count = 0
end
local elapsed_frac = (now - cur_id * window) / window
local weighted = prev_count * (1 - elapsed_frac) + cur_count
local admitted = 0
if weighted < limit then
  cur_count = redis.call('INCR', cur_key)
  redis.call('EXPIRE', cur_key, window * 2)
  weighted = prev_count * (1 - elapsed_frac) + cur_count
  admitted = 1
end
return {admitted, math.floor(weighted), limit, (cur_id + 1) * window, prev_count, cur_count}
"#;

/// Sliding Window Counter strategy.
pub struct SlidingWindowCounter {
    executor: Arc<ScriptExecutor>,
    limit: u32,
    window_size: u64,
}

impl SlidingWindowCounter {
    /// Bind the algorithm to its parameters and the shared executor.
    pub fn new(executor: Arc<ScriptExecutor>, config: &StrategyConfig) -> Self {
        Self {
            executor,
            limit: config.get_limit(),
            window_size: config.get_window_size(),
        }
    }

    /// Decode the six-element reply. `current` is the floored weighted count
    /// (post-admit when admitted); both raw window counts travel in the
    /// metadata.
    fn decode(reply: &[ScriptValue]) -> Result<Decision, StorageError> {
        let admitted = admitted_at(reply, 0)?;
        let weighted = int_at(reply, 1)?;
        let limit = int_at(reply, 2)?;
        let reset_at = int_at(reply, 3)?;
        let prev_count = int_at(reply, 4)?;
        let cur_count = int_at(reply, 5)?;

        let metadata = DecisionMetadata {
            previous_window_count: Some(prev_count),
            current_window_count: Some(cur_count),
            ..Default::default()
        };
        Ok(Decision::new(
            admitted,
            AlgorithmKind::SlidingWindowCounter,
            weighted,
            limit,
            Some(reset_at),
            metadata,
        ))
    }
}

#[async_trait]
impl Strategy for SlidingWindowCounter {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::SlidingWindowCounter
    }

    fn describe(&self) -> String {
        format!(
            "sliding_window_counter(limit={}, window={}s)",
            self.limit, self.window_size
        )
    }

    async fn check(&self, identifier: &str) -> Result<Decision, StorageError> {
        let keys = [key_prefix(AlgorithmKind::SlidingWindowCounter, identifier)];
        let args = [self.limit.to_string(), self.window_size.to_string()];
        let reply = self
            .executor
            .execute_script_raw(CHECK_SCRIPT, &keys, &args)
            .await?;
        Self::decode(&reply)
    }

    /// Scan-and-delete: the per-window suffixes are server-derived, so they
    /// cannot be enumerated client-side. One racing admit may leave a
    /// residual window key behind; it expires with its TTL.
    async fn reset(&self, identifier: &str) -> Result<(), StorageError> {
        let pattern = key_pattern(AlgorithmKind::SlidingWindowCounter, identifier);
        let keys = self.executor.find_keys(&pattern).await?;
        self.executor.delete_keys(&keys).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(
        admitted: i64,
        weighted: i64,
        limit: i64,
        reset_at: i64,
        prev: i64,
        cur: i64,
    ) -> Vec<ScriptValue> {
        vec![
            ScriptValue::Int(admitted),
            ScriptValue::Int(weighted),
            ScriptValue::Int(limit),
            ScriptValue::Int(reset_at),
            ScriptValue::Int(prev),
            ScriptValue::Int(cur),
        ]
    }

    #[test]
    fn interpolated_admit_carries_both_window_counts() {
        // Halfway into the window with prev=8, cur=2: weighted = 8×0.5 + 2
        // = 6 < 10, admitted; the post-admit weighted count is 7.
        let d = SlidingWindowCounter::decode(&reply(1, 7, 10, 1_700_000_060, 8, 3)).unwrap();
        assert!(d.admitted());
        assert_eq!(d.current(), 7);
        assert_eq!(d.remaining(), 3);
        assert_eq!(d.metadata().previous_window_count, Some(8));
        assert_eq!(d.metadata().current_window_count, Some(3));
        assert_eq!(d.reset_at(), Some(1_700_000_060));
    }

    #[test]
    fn weighted_at_limit_denies() {
        let d = SlidingWindowCounter::decode(&reply(0, 10, 10, 1_700_000_060, 12, 4)).unwrap();
        assert!(!d.admitted());
        assert_eq!(d.current(), 10);
        assert_eq!(d.remaining(), 0);
        assert_eq!(d.metadata().current_window_count, Some(4));
    }

    #[test]
    fn missing_window_counts_are_rejected() {
        let bad = vec![
            ScriptValue::Int(1),
            ScriptValue::Int(6),
            ScriptValue::Int(10),
            ScriptValue::Int(1_700_000_060),
        ];
        assert!(matches!(
            SlidingWindowCounter::decode(&bad),
            Err(StorageError::Reply(_))
        ));
    }
}
