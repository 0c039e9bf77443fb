//! Sliding Window Log
//!
//! The exact algorithm: every admitted request is one entry in a sorted set
//! scored by its arrival time. A check evicts entries older than one window,
//! counts what remains, and admits iff the count is under the limit.
//!
//! ## Member uniqueness
//!
//! A sorted-set insert with an existing member only updates its score. If
//! members were derived from the timestamp alone, two requests landing in the
//! same microsecond would collapse into one entry and silently undercount.
//! Each insert therefore takes a number from a per-identifier `seq` counter
//! (`INCR`, atomic within the script) and builds the member as
//! `"<sec>:<usec>:<seq>"`, unique without leaning on randomness.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::StrategyConfig;
use crate::decision::{Decision, DecisionMetadata};
use crate::kind::{state_key, AlgorithmKind};
use crate::script::{ScriptExecutor, ScriptValue, StorageError};
use crate::strategy::{admitted_at, f64_at, int_at, Strategy};

/// Atomic evict-count-insert. KEYS: log (zset), seq. ARGV: limit, window
/// seconds. Returns `{admitted, current, limit, window_start_as_string}`.
const CHECK_SCRIPT: &str = r#"
local log_key = KEYS[1]
local seq_key = KEYS[2]
local limit = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local t = redis.call('TIME')
local now = tonumber(t[1]) + tonumber(t[2]) / 1000000
local window_start = now - window
redis.call('ZREMRANGEBYSCORE', log_key, '-inf', string.format('%.17g', window_start))
local current = redis.call('ZCARD', log_key)
local admitted = 0
if current < limit then
  local seq = redis.call('INCR', seq_key)
  local member = t[1] .. ':' .. t[2] .. ':' .. seq
  redis.call('ZADD', log_key, string.format('%.17g', now), member)
  current = current + 1
  admitted = 1
  redis.call('EXPIRE', log_key, window * 2)
  redis.call('EXPIRE', seq_key, window * 2)
end
return {admitted, current, limit, string.format('%.6f', window_start)}
"#;

/// Sliding Window Log strategy.
pub struct SlidingWindowLog {
    executor: Arc<ScriptExecutor>,
    limit: u32,
    window_size: u64,
}

impl SlidingWindowLog {
    /// Bind the algorithm to its parameters and the shared executor.
    pub fn new(executor: Arc<ScriptExecutor>, config: &StrategyConfig) -> Self {
        Self {
            executor,
            limit: config.get_limit(),
            window_size: config.get_window_size(),
        }
    }

    fn keys(&self, identifier: &str) -> [String; 2] {
        [
            state_key(AlgorithmKind::SlidingWindowLog, identifier, "log"),
            state_key(AlgorithmKind::SlidingWindowLog, identifier, "seq"),
        ]
    }

    /// Decode `{admitted, current, limit, window_start}`.
    ///
    /// The reset hint is when the newest possible entry ages out of the
    /// window: `window_start + 2 × window` (= "now" + one window), rounded up.
    fn decode(&self, reply: &[ScriptValue]) -> Result<Decision, StorageError> {
        let admitted = admitted_at(reply, 0)?;
        let current = int_at(reply, 1)?;
        let limit = int_at(reply, 2)?;
        let window_start = f64_at(reply, 3)?;

        let reset_at = (window_start + 2.0 * self.window_size as f64).ceil() as i64;
        let metadata = DecisionMetadata {
            window_start: Some(window_start),
            ..Default::default()
        };
        Ok(Decision::new(
            admitted,
            AlgorithmKind::SlidingWindowLog,
            current,
            limit,
            Some(reset_at),
            metadata,
        ))
    }
}

#[async_trait]
impl Strategy for SlidingWindowLog {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::SlidingWindowLog
    }

    fn describe(&self) -> String {
        format!(
            "sliding_window_log(limit={}, window={}s)",
            self.limit, self.window_size
        )
    }

    async fn check(&self, identifier: &str) -> Result<Decision, StorageError> {
        let keys = self.keys(identifier);
        let args = [self.limit.to_string(), self.window_size.to_string()];
        let reply = self
            .executor
            .execute_script_raw(CHECK_SCRIPT, &keys, &args)
            .await?;
        self.decode(&reply)
    }

    async fn reset(&self, identifier: &str) -> Result<(), StorageError> {
        self.executor.delete_keys(&self.keys(identifier)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy(limit: u32, window: u64) -> SlidingWindowLog {
        let executor = Arc::new(ScriptExecutor::connect("redis://127.0.0.1:6379/").unwrap());
        let config = StrategyConfig::new()
            .limit(limit)
            .unwrap()
            .window_size(window)
            .unwrap();
        SlidingWindowLog::new(executor, &config)
    }

    fn reply(admitted: i64, current: i64, limit: i64, window_start: &str) -> Vec<ScriptValue> {
        vec![
            ScriptValue::Int(admitted),
            ScriptValue::Int(current),
            ScriptValue::Int(limit),
            ScriptValue::Text(window_start.to_string()),
        ]
    }

    #[test]
    fn admit_counts_the_inserted_entry() {
        let d = strategy(10, 60)
            .decode(&reply(1, 7, 10, "1700000000.250000"))
            .unwrap();
        assert!(d.admitted());
        assert_eq!(d.current(), 7);
        assert_eq!(d.remaining(), 3);
        assert_eq!(d.metadata().window_start, Some(1_700_000_000.25));
        // window_start + 2 × 60, fraction rounded up.
        assert_eq!(d.reset_at(), Some(1_700_000_121));
    }

    #[test]
    fn full_log_denies_at_cardinality() {
        let d = strategy(10, 60)
            .decode(&reply(0, 10, 10, "1700000000.000000"))
            .unwrap();
        assert!(!d.admitted());
        assert_eq!(d.current(), 10);
        assert_eq!(d.remaining(), 0);
        assert_eq!(d.reset_at(), Some(1_700_000_120));
    }

    #[test]
    fn window_start_must_be_numeric() {
        let bad = reply(1, 1, 10, "not-a-number");
        assert!(matches!(
            strategy(10, 60).decode(&bad),
            Err(StorageError::Reply(_))
        ));
    }
}
