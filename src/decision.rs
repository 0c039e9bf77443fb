//! Admission decisions & algorithm metadata
//!
//! [`Decision`] is the immutable value object every `check` returns: the
//! admit/deny verdict, the counter state the script observed, an advisory
//! reset-time hint, and algorithm-specific metadata. Fields are private and
//! set once at construction; there are no mutators.
//!
//! [`DecisionMetadata`] is an all-optional record. A field a strategy never
//! set serializes as **absent**, never as zero: consumers must be able to
//! distinguish "no queue" from "queue of size 0".

use serde::{Deserialize, Serialize};

use crate::kind::AlgorithmKind;

/// Outcome of one admission check. Immutable after construction.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Decision {
    admitted: bool,
    algorithm: AlgorithmKind,
    current: i64,
    limit: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    reset_at: Option<i64>,
    #[serde(skip_serializing_if = "DecisionMetadata::is_empty")]
    metadata: DecisionMetadata,
}

impl Decision {
    /// Assemble a decision. Crate-internal: only strategies and the limiter
    /// construct these.
    pub(crate) fn new(
        admitted: bool,
        algorithm: AlgorithmKind,
        current: i64,
        limit: i64,
        reset_at: Option<i64>,
        metadata: DecisionMetadata,
    ) -> Self {
        Self {
            admitted,
            algorithm,
            current,
            limit,
            reset_at,
            metadata,
        }
    }

    /// The admit used when storage is unreachable: zero observed load, a
    /// max-representable limit, and no reset hint.
    pub(crate) fn fail_open(algorithm: AlgorithmKind) -> Self {
        Self::new(true, algorithm, 0, i64::MAX, None, DecisionMetadata::default())
    }

    /// Whether the request was admitted.
    #[inline]
    pub fn admitted(&self) -> bool {
        self.admitted
    }

    /// Which algorithm produced this decision.
    #[inline]
    pub fn algorithm(&self) -> AlgorithmKind {
        self.algorithm
    }

    /// Count representation at decision time; meaning is per-algorithm
    /// (consumed tokens, queue depth, window count, weighted count).
    #[inline]
    pub fn current(&self) -> i64 {
        self.current
    }

    /// The configured admission limit.
    #[inline]
    pub fn limit(&self) -> i64 {
        self.limit
    }

    /// Advisory instant (epoch seconds) at which capacity is expected to be
    /// fully restored. Absent when the algorithm cannot give a hint.
    #[inline]
    pub fn reset_at(&self) -> Option<i64> {
        self.reset_at
    }

    /// Algorithm-specific metadata.
    #[inline]
    pub fn metadata(&self) -> &DecisionMetadata {
        &self.metadata
    }

    /// Requests left before denial: `max(0, limit − current)`.
    #[inline]
    pub fn remaining(&self) -> i64 {
        (self.limit - self.current).max(0)
    }
}

/// Optional per-algorithm detail attached to a [`Decision`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionMetadata {
    /// Fractional tokens left in the bucket (Token Bucket).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<f64>,
    /// Queue depth after the decision (Leaky Bucket).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_size: Option<i64>,
    /// Start of the observed window, seconds since epoch (Sliding Window Log).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_start: Option<f64>,
    /// Count carried from the previous window (Sliding Window Counter).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_window_count: Option<i64>,
    /// Count in the current window (Sliding Window Counter).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_window_count: Option<i64>,
}

impl DecisionMetadata {
    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_none()
            && self.queue_size.is_none()
            && self.window_start.is_none()
            && self.previous_window_count.is_none()
            && self.current_window_count.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_clamps_at_zero() {
        let d = Decision::new(
            false,
            AlgorithmKind::FixedWindow,
            12,
            10,
            Some(1_700_000_060),
            DecisionMetadata::default(),
        );
        assert_eq!(d.remaining(), 0);

        let d = Decision::new(
            true,
            AlgorithmKind::FixedWindow,
            3,
            10,
            None,
            DecisionMetadata::default(),
        );
        assert_eq!(d.remaining(), 7);
    }

    #[test]
    fn fail_open_shape() {
        let d = Decision::fail_open(AlgorithmKind::TokenBucket);
        assert!(d.admitted());
        assert_eq!(d.current(), 0);
        assert_eq!(d.limit(), i64::MAX);
        assert_eq!(d.reset_at(), None);
        assert!(d.metadata().is_empty());
    }

    #[test]
    fn unset_metadata_serializes_as_absent() {
        let meta = DecisionMetadata {
            queue_size: Some(0),
            ..Default::default()
        };
        let json = serde_json::to_value(&meta).unwrap();
        // A set zero survives; unset fields do not appear at all.
        assert_eq!(json.get("queue_size"), Some(&serde_json::json!(0)));
        assert!(json.get("tokens").is_none());
        assert!(json.get("window_start").is_none());
        assert!(json.get("previous_window_count").is_none());
    }

    #[test]
    fn metadata_round_trips() {
        let meta = DecisionMetadata {
            tokens: Some(7.25),
            window_start: Some(1_700_000_000.123456),
            ..Default::default()
        };
        let json = serde_json::to_string(&meta).unwrap();
        let back: DecisionMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
        assert!(back.queue_size.is_none());
    }

    #[test]
    fn absent_reset_is_omitted_from_the_body() {
        let d = Decision::fail_open(AlgorithmKind::LeakyBucket);
        let json = serde_json::to_value(&d).unwrap();
        assert!(json.get("reset_at").is_none());
        assert!(json.get("metadata").is_none());
        assert_eq!(json.get("algorithm"), Some(&serde_json::json!("leaky_bucket")));
    }
}
