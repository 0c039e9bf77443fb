//! Token Bucket
//!
//! State per identifier: `tokens` (fractional) and `last_refreshed` (seconds,
//! fractional), both stored as strings. On every check the script refills
//! `elapsed × refill_rate` tokens up to `capacity`, then admits iff at least
//! one whole token remains, consuming it.
//!
//! ## Precision
//!
//! Tokens and timestamps are doubles. Lua's `tostring` prints 14 significant
//! digits, which does **not** round-trip an IEEE double, so the script
//! persists and returns both values via `string.format('%.17g', …)`; 17
//! significant digits identify a double uniquely. The strategy re-parses the
//! string reply with Rust's `f64` parser, which selects the nearest double,
//! so a save/load cycle is exact.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::StrategyConfig;
use crate::decision::{Decision, DecisionMetadata};
use crate::kind::{state_key, AlgorithmKind};
use crate::script::{ScriptExecutor, ScriptValue, StorageError};
use crate::strategy::{admitted_at, f64_at, hint_now, int_at, Strategy};

/// Atomic refill-and-take. KEYS: tokens, timestamp. ARGV: capacity,
/// refill_rate. Returns `{admitted, tokens_as_string, capacity}`.
const CHECK_SCRIPT: &str = r#"
local tokens_key = KEYS[1]
local stamp_key = KEYS[2]
local capacity = tonumber(ARGV[1])
local refill_rate = tonumber(ARGV[2])
local t = redis.call('TIME')
local now = tonumber(t[1]) + tonumber(t[2]) / 1000000
local tokens = tonumber(redis.call('GET', tokens_key))
if tokens == nil then
  tokens = capacity
end
local last = tonumber(redis.call('GET', stamp_key))
if last == nil then
  last = now
end
local delta = math.max(0, now - last)
tokens = math.min(capacity, tokens + delta * refill_rate)
local admitted = 0
if tokens >= 1 then
  tokens = tokens - 1
  admitted = 1
end
local encoded = string.format('%.17g', tokens)
redis.call('SET', tokens_key, encoded, 'EX', 3600)
redis.call('SET', stamp_key, string.format('%.17g', now), 'EX', 3600)
return {admitted, encoded, capacity}
"#;

/// Token Bucket strategy. One instance serves every identifier.
pub struct TokenBucket {
    executor: Arc<ScriptExecutor>,
    capacity: u32,
    refill_rate: f64,
}

impl TokenBucket {
    /// Bind the algorithm to its parameters and the shared executor.
    pub fn new(executor: Arc<ScriptExecutor>, config: &StrategyConfig) -> Self {
        Self {
            executor,
            capacity: config.get_capacity(),
            refill_rate: config.get_refill_rate(),
        }
    }

    fn keys(&self, identifier: &str) -> [String; 2] {
        [
            state_key(AlgorithmKind::TokenBucket, identifier, "tokens"),
            state_key(AlgorithmKind::TokenBucket, identifier, "timestamp"),
        ]
    }

    /// Decode `{admitted, tokens_as_string, capacity}`.
    ///
    /// `current` reports consumed capacity (`⌊capacity − tokens⌋`); the exact
    /// fractional token count travels in the metadata. The reset hint is the
    /// instant the bucket refills completely at the configured rate.
    fn decode(&self, reply: &[ScriptValue], now: i64) -> Result<Decision, StorageError> {
        let admitted = admitted_at(reply, 0)?;
        let tokens = f64_at(reply, 1)?;
        let capacity = int_at(reply, 2)?;

        let consumed = ((capacity as f64) - tokens).floor() as i64;
        let refill_secs = ((capacity as f64 - tokens) / self.refill_rate).ceil() as i64;
        let metadata = DecisionMetadata {
            tokens: Some(tokens),
            ..Default::default()
        };
        Ok(Decision::new(
            admitted,
            AlgorithmKind::TokenBucket,
            consumed,
            capacity,
            Some(now + refill_secs),
            metadata,
        ))
    }
}

#[async_trait]
impl Strategy for TokenBucket {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::TokenBucket
    }

    fn describe(&self) -> String {
        format!(
            "token_bucket(capacity={}, refill_rate={}/s)",
            self.capacity, self.refill_rate
        )
    }

    async fn check(&self, identifier: &str) -> Result<Decision, StorageError> {
        let keys = self.keys(identifier);
        let args = [self.capacity.to_string(), self.refill_rate.to_string()];
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
