//! Crate root: public surface, core enums, and service-wide invariants
//!
//! This module is the **single canonical entry-point** for downstream users of
//! the library. It centralizes the algorithm enumeration, the shared error
//! categories, and re-exports the main submodules that implement the
//! distributed rate-limiting core.
//!
//! ## Invariants
//!
//! - **Single source of truth.** All counter state lives in one logical Redis
//!   instance. Application processes never cache admission state; every
//!   decision is one atomic server-side Lua script, so horizontally scaled
//!   instances agree without cross-instance locks.
//!
//! - **Server clock only.** Every script obtains "now" from
//!   `redis.call('TIME')`, never from the calling process. Clock skew between
//!   application instances and NTP drift cannot affect admission decisions.
//!
//! - **Atomicity.** The entire read-decide-write sequence of one admission
//!   runs inside a single script invocation. No strategy performs multi-step
//!   logic from the application side, so the KVS serializes all state
//!   transitions per (algorithm, identifier).
//!
//! - **Fail-open.** If the KVS cannot be reached, [`Limiter::check`] logs the
//!   storage error and admits the request (availability over correctness).
//!   Validation errors are never converted to admits; they surface to the
//!   caller.
//!
//! - **Precision.** Fractional state (token counts, leak timestamps) crosses
//!   the KVS boundary as explicit 17-significant-digit string encodings and
//!   re-reads to the same `f64` within one ULP.
//!
//! If any invariant is violated at runtime, the failure mode is a **precise
//! error** (never UB); we **forbid unsafe** throughout the crate.

#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms)]

/// Strategy configuration (builder with fail-fast validation).
pub mod config;
/// Immutable admission decisions and algorithm metadata.
pub mod decision;
/// Algorithm enumeration and the KVS key namespace.
pub mod kind;
/// Limiter service: per-kind strategy cache, dispatch, fail-open.
pub mod limiter;
/// Script executor: compiled-script cache, atomic execution, key scans.
pub mod script;
/// Strategy trait and the factory over the closed algorithm family.
pub mod strategy;

/// Token Bucket: refill-over-time with burst up to capacity.
pub mod token_bucket;
/// Leaky Bucket: bounded queue drained at a constant rate.
pub mod leaky_bucket;
/// Fixed Window: one counter per window id.
pub mod fixed_window;
/// Sliding Window Log: exact timestamps in a sorted set.
pub mod sliding_window_log;
/// Sliding Window Counter: two windows, linear interpolation.
pub mod sliding_window_counter;

// ============================================================================
// Canonical re-exports (centralization)
// ============================================================================

/// Centralized algorithm tag used across the crate.
///
/// Downstream code should import it from the crate root (e.g.
/// `use flowgate::AlgorithmKind;`) rather than from the defining module.
pub use crate::kind::AlgorithmKind;

pub use crate::config::{StrategyConfig, ValidationError};
pub use crate::script::{ScriptExecutor, ScriptValue, StorageError};

pub use crate::decision::{Decision, DecisionMetadata};

pub use crate::limiter::Limiter;
pub use crate::strategy::{build_strategy, Strategy};
