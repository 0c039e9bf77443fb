//! Algorithm enumeration & KVS key namespace
//!
//! The five algorithms form a **closed family**: adding a kind means adding a
//! variant here, a strategy module, and one arm in the factory. The snake_case
//! tag of each kind doubles as its wire name (HTTP paths, the
//! `X-RateLimit-Algorithm` header) and as its segment in the persisted key
//! namespace, so the mapping below is part of the stable storage layout:
//!
//! ```text
//! rate_limit:<algorithm>:<identifier>:<suffix>
//! ```
//!
//! Suffixes in use: `tokens`, `timestamp`, `queue`, `log`, `seq`, and the
//! numeric `<window_id>` for the windowed algorithms.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::ValidationError;

/// Prefix shared by every key the crate writes.
pub const KEY_NAMESPACE: &str = "rate_limit";

/// Tag identifying one of the five rate-limiting algorithms.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    /// Refill-over-time bucket; admits while at least one token remains.
    TokenBucket,
    /// Bounded queue drained at a constant rate; admits while not full.
    LeakyBucket,
    /// One counter per `⌊now / window⌋` bucket; admits while under the limit.
    FixedWindow,
    /// Exact request log in a sorted set; admits while cardinality is under
    /// the limit.
    SlidingWindowLog,
    /// Two adjacent window counters blended by elapsed fraction.
    SlidingWindowCounter,
}

impl AlgorithmKind {
    /// All kinds, in factory registration order.
    pub const ALL: [AlgorithmKind; 5] = [
        AlgorithmKind::TokenBucket,
        AlgorithmKind::LeakyBucket,
        AlgorithmKind::FixedWindow,
        AlgorithmKind::SlidingWindowLog,
        AlgorithmKind::SlidingWindowCounter,
    ];

    /// The stable snake_case tag (wire name and key-namespace segment).
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            AlgorithmKind::TokenBucket => "token_bucket",
            AlgorithmKind::LeakyBucket => "leaky_bucket",
            AlgorithmKind::FixedWindow => "fixed_window",
            AlgorithmKind::SlidingWindowLog => "sliding_window_log",
            AlgorithmKind::SlidingWindowCounter => "sliding_window_counter",
        }
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlgorithmKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "token_bucket" => Ok(AlgorithmKind::TokenBucket),
            "leaky_bucket" => Ok(AlgorithmKind::LeakyBucket),
            "fixed_window" => Ok(AlgorithmKind::FixedWindow),
            "sliding_window_log" => Ok(AlgorithmKind::SlidingWindowLog),
            "sliding_window_counter" => Ok(AlgorithmKind::SlidingWindowCounter),
            other => Err(ValidationError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// Key prefix for one (algorithm, identifier) pair: `rate_limit:<algo>:<id>`.
///
/// Window-suffixed keys are derived from this prefix **inside** the Lua
/// scripts, because the window id must come from the KVS clock.
#[inline]
pub fn key_prefix(kind: AlgorithmKind, identifier: &str) -> String {
    format!("{KEY_NAMESPACE}:{}:{identifier}", kind.as_str())
}

/// Fully-suffixed state key: `rate_limit:<algo>:<id>:<suffix>`.
#[inline]
pub fn state_key(kind: AlgorithmKind, identifier: &str, suffix: &str) -> String {
    format!("{KEY_NAMESPACE}:{}:{identifier}:{suffix}", kind.as_str())
}

/// Glob pattern matching every key of one (algorithm, identifier) pair.
///
/// Used by the scan-based reset of the windowed algorithms.
#[inline]
pub fn key_pattern(kind: AlgorithmKind, identifier: &str) -> String {
    format!("{KEY_NAMESPACE}:{}:{identifier}:*", kind.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip() {
        for kind in AlgorithmKind::ALL {
            assert_eq!(kind.as_str().parse::<AlgorithmKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_tag_is_a_validation_error() {
        let err = "token-bucket".parse::<AlgorithmKind>().unwrap_err();
        assert!(matches!(err, ValidationError::UnknownAlgorithm(_)));
    }

    #[test]
    fn key_layout_is_stable() {
        assert_eq!(
            state_key(AlgorithmKind::TokenBucket, "user-1", "tokens"),
            "rate_limit:token_bucket:user-1:tokens"
        );
        assert_eq!(
            key_prefix(AlgorithmKind::SlidingWindowCounter, "u"),
            "rate_limit:sliding_window_counter:u"
        );
        assert_eq!(
            key_pattern(AlgorithmKind::FixedWindow, "u"),
            "rate_limit:fixed_window:u:*"
        );
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&AlgorithmKind::SlidingWindowLog).unwrap();
        assert_eq!(json, "\"sliding_window_log\"");
    }
}
