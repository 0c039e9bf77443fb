//! Strategy configuration (fail-fast builder)
//!
//! [`StrategyConfig`] carries every parameter any of the five algorithms can
//! consume. Each setter validates **at the point of assignment** and returns a
//! [`ValidationError`] for a non-positive (or non-finite) value, so a bad
//! parameter is rejected where it originates rather than at first use. Once a
//! config reaches the factory it is immutable; strategies copy the fields they
//! need at construction.
//!
//! Validation failures are a *recoverable* error kind with fixed message
//! strings, safe to surface to API clients verbatim.

/// Recoverable configuration / lookup fault.
///
/// Surfaces to HTTP clients as 400; never converted to a fail-open admit.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// A numeric parameter was zero or negative.
    #[error("{field} must be positive (got {value})")]
    NonPositive {
        /// Name of the offending parameter.
        field: &'static str,
        /// The rejected value.
        value: f64,
    },
    /// A rate parameter was NaN or infinite.
    #[error("{field} must be finite (got {value})")]
    NonFinite {
        /// Name of the offending parameter.
        field: &'static str,
        /// The rejected value.
        value: f64,
    },
    /// An algorithm tag did not name one of the five kinds.
    #[error("unknown algorithm: {0}")]
    UnknownAlgorithm(String),
}

/// Validated parameters for strategy construction.
///
/// Defaults: `capacity` 10, `refill_rate` 1.0/s, `leak_rate` 1.0/s,
/// `limit` 10, `window_size` 60 s.
///
/// Construction goes through the setters only, so every value a strategy
/// reads from a config is already validated.
#[derive(Clone, Debug, PartialEq)]
pub struct StrategyConfig {
    capacity: u32,
    refill_rate: f64,
    leak_rate: f64,
    limit: u32,
    window_size: u64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_rate: 1.0,
            leak_rate: 1.0,
            limit: 10,
            window_size: 60,
        }
    }
}

impl StrategyConfig {
    /// Start from the per-kind defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum bucket size (Token Bucket, Leaky Bucket).
    pub fn capacity(mut self, capacity: u32) -> Result<Self, ValidationError> {
        if capacity == 0 {
            return Err(ValidationError::NonPositive {
                field: "capacity",
                value: 0.0,
            });
        }
        self.capacity = capacity;
        Ok(self)
    }

    /// Token replenishment rate in tokens per second (Token Bucket).
    pub fn refill_rate(mut self, rate: f64) -> Result<Self, ValidationError> {
        validate_rate("refill_rate", rate)?;
        self.refill_rate = rate;
        Ok(self)
    }

    /// Queue drain rate in items per second (Leaky Bucket).
    pub fn leak_rate(mut self, rate: f64) -> Result<Self, ValidationError> {
        validate_rate("leak_rate", rate)?;
        self.leak_rate = rate;
        Ok(self)
    }

    /// Admissions per window (the windowed algorithms).
    pub fn limit(mut self, limit: u32) -> Result<Self, ValidationError> {
        if limit == 0 {
            return Err(ValidationError::NonPositive {
                field: "limit",
                value: 0.0,
            });
        }
        self.limit = limit;
        Ok(self)
    }

    /// Window length in whole seconds (the windowed algorithms).
    pub fn window_size(mut self, seconds: u64) -> Result<Self, ValidationError> {
        if seconds == 0 {
            return Err(ValidationError::NonPositive {
                field: "window_size",
                value: 0.0,
            });
        }
        self.window_size = seconds;
        Ok(self)
    }

    /// Bucket size.
    #[inline]
    pub fn get_capacity(&self) -> u32 {
        self.capacity
    }

    /// Tokens per second.
    #[inline]
    pub fn get_refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Items leaked per second.
    #[inline]
    pub fn get_leak_rate(&self) -> f64 {
        self.leak_rate
    }

    /// Admissions per window.
    #[inline]
    pub fn get_limit(&self) -> u32 {
        self.limit
    }

    /// Window length in seconds.
    #[inline]
    pub fn get_window_size(&self) -> u64 {
        self.window_size
    }
}

fn validate_rate(field: &'static str, rate: f64) -> Result<(), ValidationError> {
    if !rate.is_finite() {
        return Err(ValidationError::NonFinite { field, value: rate });
    }
    if rate <= 0.0 {
        return Err(ValidationError::NonPositive { field, value: rate });
    }
    Ok(())
}
