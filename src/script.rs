//! Script executor: compiled-script cache, atomic execution, key scans
//!
//! Every admission decision in this crate is one server-side Lua script, and
//! every script goes through this module. Three concerns live here:
//!
//! - **Script caching.** A process-wide map from verbatim script text to a
//!   compiled [`redis::Script`] handle. Repeat lookups are a single map probe;
//!   a first caller inserts under the entry lock, so at most one handle per
//!   distinct text is ever observed. `Script` hashes the text to its SHA1 once
//!   at insertion and invokes via `EVALSHA` with a transparent `EVAL` fallback
//!   when the server has not seen the script yet.
//!
//! - **Precision across the wire.** Lua truncates any number it returns to an
//!   integer, so scripts that carry fractional state return it as a string.
//!   [`ScriptExecutor::execute_script_raw`] therefore yields mixed
//!   [`ScriptValue`] elements: integers stay `i64`, strings reach the caller
//!   verbatim for re-parsing as `f64`. The numeric-only
//!   [`ScriptExecutor::execute_script`] convenience filters strings out.
//!
//! - **Non-blocking enumeration.** [`ScriptExecutor::find_keys`] walks the
//!   keyspace with cursor-based `SCAN` in bounded batches. The KVS is
//!   single-threaded; a one-shot `KEYS` sweep would stall every other client
//!   for the duration of the walk. The result is unordered and may contain
//!   transient duplicates, which callers must tolerate.
//!
//! Every operation is bounded by a deadline. Expiry, cancellation, and any
//! KVS-side error all surface as the single recoverable [`StorageError`] kind
//! with the original cause attached, never as a silent partial result. A call
//! abandoned at the deadline may still complete on the server; callers must
//! tolerate the mutation having happened.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::{Client, Script, Value};
use tokio::sync::OnceCell;
use tracing::trace;

/// Recoverable storage fault raised by every executor operation.
///
/// Callers either fail open (the limiter's `check` path) or log and swallow
/// (`reset`). The original cause is always attached.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The KVS returned an error or the connection failed.
    #[error("kvs operation failed: {0}")]
    Backend(#[from] redis::RedisError),
    /// The operation did not complete within the configured deadline.
    ///
    /// The script may still run to completion server-side.
    #[error("kvs operation exceeded its {0:?} deadline")]
    Deadline(Duration),
    /// The script returned a reply shape the caller's contract does not allow.
    #[error("unexpected script reply: {0}")]
    Reply(String),
}

/// One element of a mixed-type script reply.
#[derive(Clone, Debug, PartialEq)]
pub enum ScriptValue {
    /// A Lua number, converted to a signed 64-bit integer by the KVS.
    Int(i64),
    /// A Lua string, delivered verbatim.
    Text(String),
}

impl ScriptValue {
    /// The integer value, if this element is numeric.
    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ScriptValue::Int(i) => Some(*i),
            ScriptValue::Text(_) => None,
        }
    }

    /// Re-parse the element as a double. Strings parse; integers cast.
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScriptValue::Int(i) => Some(*i as f64),
            ScriptValue::Text(s) => s.parse().ok(),
        }
    }
}

/// Shared, clone-free handle to the KVS: script cache, connection, deadline.
///
/// One executor per process is shared (via `Arc`) by every strategy. The
/// connection manager is initialized lazily on first use and reconnects on
/// its own thereafter; cloning it per call is cheap.
pub struct ScriptExecutor {
    client: Client,
    connection: OnceCell<ConnectionManager>,
    scripts: DashMap<String, Arc<Script>>,
    op_timeout: Duration,
    scan_batch: usize,
}

impl ScriptExecutor {
    /// Default per-operation deadline.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

    /// Default `SCAN` batch size.
    pub const DEFAULT_SCAN_BATCH: usize = 100;

    /// Create an executor for the KVS at `url` with the default deadline.
    ///
    /// The URL is validated here; the connection itself is established on
    /// first use.
    pub fn connect(url: &str) -> Result<Self, StorageError> {
        Self::with_timeout(url, Self::DEFAULT_TIMEOUT)
    }

    /// Create an executor with an explicit per-operation deadline.
    pub fn with_timeout(url: &str, op_timeout: Duration) -> Result<Self, StorageError> {
        let client = Client::open(url)?;
        Ok(Self {
            client,
            connection: OnceCell::new(),
            scripts: DashMap::new(),
            op_timeout,
            scan_batch: Self::DEFAULT_SCAN_BATCH,
        })
    }

    /// Override the `SCAN` batch size (clamped to at least 1).
    pub fn scan_batch(mut self, batch: usize) -> Self {
        self.scan_batch = batch.max(1);
        self
    }

    /// Execute `text` atomically and return the numeric elements of its reply.
    ///
    /// Non-numeric elements are filtered out; strategies that carry fractional
    /// state through strings use [`Self::execute_script_raw`] instead.
    pub async fn execute_script(
        &self,
        text: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<Vec<i64>, StorageError> {
        let raw = self.execute_script_raw(text, keys, args).await?;
        Ok(numeric_elements(&raw))
    }

    /// Execute `text` atomically and return its reply with element types
    /// preserved.
    pub async fn execute_script_raw(
        &self,
        text: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<Vec<ScriptValue>, StorageError> {
        let script = self.script_handle(text);
        let mut conn = self.connection().await?;
        let mut invocation = script.prepare_invoke();
        for key in keys {
            invocation.key(key.as_str());
        }
        for arg in args {
            invocation.arg(arg.as_str());
        }
        let reply: Value = self.bounded(invocation.invoke_async(&mut conn)).await?;
        decode_reply(reply)
    }

    /// Delete the given keys. Missing keys are not an error.
    pub async fn delete_keys(&self, keys: &[String]) -> Result<(), StorageError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        let removed: i64 = self
            .bounded(redis::cmd("DEL").arg(keys).query_async(&mut conn))
            .await?;
        trace!(removed, "deleted keys");
        Ok(())
    }

    /// Enumerate keys matching `pattern` without blocking the KVS.
    ///
    /// Walks the full cursor in `scan_batch`-sized steps. The returned list is
    /// unordered and, under concurrent writes, may contain duplicates.
    pub async fn find_keys(&self, pattern: &str) -> Result<Vec<String>, StorageError> {
        let mut conn = self.connection().await?;
        let mut found = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = self
                .bounded(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(self.scan_batch)
                        .query_async(&mut conn),
                )
                .await?;
            found.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(found)
    }

    /// Look up (or insert) the compiled handle for `text`.
    ///
    /// The fast path is a read-only probe; the entry lock makes first-use
    /// insertion at-most-once under racing callers.
    fn script_handle(&self, text: &str) -> Arc<Script> {
        if let Some(handle) = self.scripts.get(text) {
            return handle.clone();
        }
        self.scripts
            .entry(text.to_string())
            .or_insert_with(|| Arc::new(Script::new(text)))
            .clone()
    }

    /// Number of distinct scripts compiled so far.
    pub fn cached_scripts(&self) -> usize {
        self.scripts.len()
    }

    async fn connection(&self) -> Result<ConnectionManager, StorageError> {
        let manager = self
            .connection
            .get_or_try_init(|| async {
                match tokio::time::timeout(
                    self.op_timeout,
                    ConnectionManager::new(self.client.clone()),
                )
                .await
                {
                    Ok(Ok(manager)) => Ok(manager),
                    Ok(Err(e)) => Err(StorageError::Backend(e)),
                    Err(_) => Err(StorageError::Deadline(self.op_timeout)),
                }
            })
            .await?;
        Ok(manager.clone())
    }

    async fn bounded<T>(
        &self,
        op: impl Future<Output = redis::RedisResult<T>>,
    ) -> Result<T, StorageError> {
        match tokio::time::timeout(self.op_timeout, op).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(StorageError::Backend(e)),
            Err(_) => Err(StorageError::Deadline(self.op_timeout)),
        }
    }
}

/// Numeric elements of a mixed reply, in order.
fn numeric_elements(reply: &[ScriptValue]) -> Vec<i64> {
    reply.iter().filter_map(ScriptValue::as_int).collect()
}

/// Decode a script reply into typed elements.
///
/// Scripts in this crate always return a Lua table, which arrives as a bulk
/// of integers and bulk strings. Anything else violates the reply contract.
fn decode_reply(value: Value) -> Result<Vec<ScriptValue>, StorageError> {
    let items = match value {
        Value::Bulk(items) => items,
        other => {
            return Err(StorageError::Reply(format!(
                "expected a bulk reply, got {other:?}"
            )))
        }
    };
    items
        .into_iter()
        .map(|element| match element {
            Value::Int(i) => Ok(ScriptValue::Int(i)),
            Value::Data(bytes) => String::from_utf8(bytes)
                .map(ScriptValue::Text)
                .map_err(|e| StorageError::Reply(format!("non-utf8 string element: {e}"))),
            Value::Status(s) => Ok(ScriptValue::Text(s)),
            other => Err(StorageError::Reply(format!(
                "unsupported element in reply: {other:?}"
            ))),
        })
        .collect()
}
