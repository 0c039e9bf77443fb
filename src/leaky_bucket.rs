//! Leaky Bucket
//!
//! State per identifier: `queue` (whole items) and `last_leak` (seconds,
//! fractional). The script drains `⌊elapsed × leak_rate⌋` items, then admits
//! iff the queue is below capacity, enqueueing one item.
//!
//! The drain step advances `last_leak` by `leaked / leak_rate` (whole leak
//! periods only) instead of snapping it to `now`. Snapping would discard the
//! fraction of a leak period accumulated since the last whole leak, and that
//! loss compounds: up to one undrained item per call. With the inverse
//! calculation the unconsumed remainder of the current leak period carries to
//! the next call exactly.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::StrategyConfig;
use crate::decision::{Decision, DecisionMetadata};
use crate::kind::{state_key, AlgorithmKind};
use crate::script::{ScriptExecutor, ScriptValue, StorageError};
use crate::strategy::{admitted_at, hint_now, int_at, Strategy};

/// Atomic drain-and-enqueue. KEYS: queue, timestamp. ARGV: capacity,
/// leak_rate. Returns `{admitted, queue_size, capacity}`.
const CHECK_SCRIPT: &str = r#"
local queue_key = KEYS[1]
local stamp_key = KEYS[2]
local capacity = tonumber(ARGV[1])
local leak_rate = tonumber(ARGV[2])
local t = redis.call('TIME')
local now = tonumber(t[1]) + tonumber(t[2]) / 1000000
local queue = tonumber(redis.call('GET', queue_key))
if queue == nil then
  queue = 0
end
local last = tonumber(redis.call('GET', stamp_key))
if last == nil then
  last = now
end
local elapsed = math.max(0, now - last)
local leaked = math.floor(elapsed * leak_rate)
if leaked > 0 then
  queue = math.max(0, queue - leaked)
  -- advance by whole leak periods only; the fractional remainder stays
  -- banked for the next call
  last = last + leaked / leak_rate
end
local admitted = 0
if queue < capacity then
  queue = queue + 1
  admitted = 1
end
redis.call('SET', queue_key, tostring(queue), 'EX', 3600)
redis.call('SET', stamp_key, string.format('%.17g', last), 'EX', 3600)
return {admitted, queue, capacity}
"#;

/// Leaky Bucket strategy.
pub struct LeakyBucket {
    executor: Arc<ScriptExecutor>,
    capacity: u32,
    leak_rate: f64,
}

impl LeakyBucket {
    /// Bind the algorithm to its parameters and the shared executor.
    pub fn new(executor: Arc<ScriptExecutor>, config: &StrategyConfig) -> Self {
        Self {
            executor,
            capacity: config.get_capacity(),
            leak_rate: config.get_leak_rate(),
        }
    }

    fn keys(&self, identifier: &str) -> [String; 2] {
        [
            state_key(AlgorithmKind::LeakyBucket, identifier, "queue"),
            state_key(AlgorithmKind::LeakyBucket, identifier, "timestamp"),
        ]
    }

    /// Decode `{admitted, queue_size, capacity}`. The reset hint is the
    /// instant the current queue fully drains.
    fn decode(&self, reply: &[ScriptValue], now: i64) -> Result<Decision, StorageError> {
        let admitted = admitted_at(reply, 0)?;
        let queue = int_at(reply, 1)?;
        let capacity = int_at(reply, 2)?;

        let drain_secs = ((queue as f64) / self.leak_rate).ceil() as i64;
        let metadata = DecisionMetadata {
            queue_size: Some(queue),
            ..Default::default()
        };
        Ok(Decision::new(
            admitted,
            AlgorithmKind::LeakyBucket,
            queue,
            capacity,
            Some(now + drain_secs),
            metadata,
        ))
    }
}

#[async_trait]
impl Strategy for LeakyBucket {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::LeakyBucket
    }

    fn describe(&self) -> String {
        format!(
            "leaky_bucket(capacity={}, leak_rate={}/s)",
            self.capacity, self.leak_rate
        )
    }

    async fn check(&self, identifier: &str) -> Result<Decision, StorageError> {
        let keys = self.keys(identifier);
        let args = [self.capacity.to_string(), self.leak_rate.to_string()];
        let reply = self
            .executor
            .execute_script_raw(CHECK_SCRIPT, &keys, &args)
            .await?;
        self.decode(&reply, hint_now())
    }

    async fn reset(&self, identifier: &str) -> Result<(), StorageError> {
        self.executor.delete_keys(&self.keys(identifier)).await
    }
}
