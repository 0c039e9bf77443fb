//! Fixed Window
//!
//! One counter per window id (`⌊now / window⌋`), incremented on admit with a
//! TTL of two windows. At a window boundary a client can land up to
//! `2 × limit` requests in a short span; that is the algorithm's defining
//! trade-off and is reported as-is.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::StrategyConfig;
use crate::decision::{Decision, DecisionMetadata};
use crate::kind::{key_pattern, key_prefix, AlgorithmKind};
use crate::script::{ScriptExecutor, ScriptValue, StorageError};
use crate::strategy::{admitted_at, int_at, Strategy};

/// KEYS: the `rate_limit:fixed_window:<id>` prefix; the window-suffixed key
/// is derived in-script because the window id comes from the server clock.
/// ARGV: limit, window seconds. Returns `{admitted, current, limit, reset_at}`.
const CHECK_SCRIPT: &str = r#"
local prefix = KEYS[1]
local limit = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local t = redis.call('TIME')
local now = tonumber(t[1])
local window_id = math.floor(now / window)
local window_key = prefix .. ':' .. window_id
local current = tonumber(redis.call('GET', window_key))
if current == nil then
  current = 0
end
local admitted = 0
if current < limit then
  current = redis.call('INCR', window_key)
  redis.call('EXPIRE', window_key, window * 2)
  admitted = 1
end
return {admitted, current, limit, (window_id + 1) * window}
"#;

/// Fixed Window strategy.
pub struct FixedWindow {
    executor: Arc<ScriptExecutor>,
    limit: u32,
    window_size: u64,
}

impl FixedWindow {
    /// Bind the algorithm to its parameters and the shared executor.
    pub fn new(executor: Arc<ScriptExecutor>, config: &StrategyConfig) -> Self {
        Self {
            executor,
            limit: config.get_limit(),
            window_size: config.get_window_size(),
        }
    }

    /// Decode `{admitted, current, limit, reset_at}`. `current` is the
    /// post-increment count on admit, the untouched count on deny; `reset_at`
    /// is the start of the next window, computed from the server clock.
    fn decode(reply: &[ScriptValue]) -> Result<Decision, StorageError> {
        let admitted = admitted_at(reply, 0)?;
        let current = int_at(reply, 1)?;
        let limit = int_at(reply, 2)?;
        let reset_at = int_at(reply, 3)?;
        Ok(Decision::new(
            admitted,
            AlgorithmKind::FixedWindow,
            current,
            limit,
            Some(reset_at),
            DecisionMetadata::default(),
        ))
    }
}

#[async_trait]
impl Strategy for FixedWindow {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::FixedWindow
    }

    fn describe(&self) -> String {
        format!(
            "fixed_window(limit={}, window={}s)",
            self.limit, self.window_size
        )
    }

    async fn check(&self, identifier: &str) -> Result<Decision, StorageError> {
        let keys = [key_prefix(AlgorithmKind::FixedWindow, identifier)];
        let args = [self.limit.to_string(), self.window_size.to_string()];
        let reply = self
            .executor
            .execute_script_raw(CHECK_SCRIPT, &keys, &args)
            .await?;
        Self::decode(&reply)
    }

    /// Window keys carry server-derived suffixes, so reset scans for them.
    /// An admit racing the scan can leave one residual window key; it expires
    /// with its TTL.
    async fn reset(&self, identifier: &str) -> Result<(), StorageError> {
        let pattern = key_pattern(AlgorithmKind::FixedWindow, identifier);
        let keys = self.executor.find_keys(&pattern).await?;
        self.executor.delete_keys(&keys).await
    }
}
