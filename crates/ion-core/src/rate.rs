//! The shared refill/leak rate type used by both bucket limiters (spec §3).

use std::fmt;
use std::time::Duration;

/// A refill or leak rate expressed in tokens per second.
///
/// Zero is valid and means "never refills" (token bucket) or "never leaks"
/// (leaky bucket) — the bucket then behaves as a fixed allowance that is
/// never replenished. Negative and non-finite rates are rejected at
/// construction; there is no lazy validation path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rate {
    tokens_per_second: f64,
}

/// Returned when a [`Rate`] is constructed from an invalid value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("rate must be finite and non-negative")]
pub struct InvalidRate;

impl Rate {
    /// Constructs a rate directly from tokens per second.
    ///
    /// # Errors
    /// Returns [`InvalidRate`] if `tokens_per_second` is negative, `NaN`,
    /// or infinite.
    pub fn new(tokens_per_second: f64) -> Result<Self, InvalidRate> {
        if !tokens_per_second.is_finite() || tokens_per_second < 0.0 {
            return Err(InvalidRate);
        }
        Ok(Self { tokens_per_second })
    }

    /// Constructs a rate from a count of tokens over a duration, e.g.
    /// `Rate::per(100, Duration::from_secs(1))` for "100 per second" or
    /// `Rate::per(5, Duration::from_secs(60))` for "5 per minute".
    ///
    /// # Errors
    /// Returns [`InvalidRate`] if `duration` is zero (division by zero) or
    /// the resulting rate is not finite.
    pub fn per(count: u64, duration: Duration) -> Result<Self, InvalidRate> {
        if duration.is_zero() {
            return Err(InvalidRate);
        }
        Self::new(count as f64 / duration.as_secs_f64())
    }

    /// The zero rate: never refills, never leaks.
    pub const fn zero() -> Self {
        Self {
            tokens_per_second: 0.0,
        }
    }

    /// True if this is the zero rate.
    pub fn is_zero(&self) -> bool {
        self.tokens_per_second == 0.0
    }

    /// Tokens per second as a raw float.
    pub fn tokens_per_second(&self) -> f64 {
        self.tokens_per_second
    }

    /// Tokens accrued over `elapsed` at this rate.
    pub fn tokens_over(&self, elapsed: Duration) -> f64 {
        self.tokens_per_second * elapsed.as_secs_f64()
    }

    /// Duration required to accrue `tokens` at this rate, or `None` if the
    /// rate is zero (the wait would never end).
    pub fn duration_for(&self, tokens: f64) -> Option<Duration> {
        if self.is_zero() {
            return None;
        }
        Some(Duration::from_secs_f64((tokens / self.tokens_per_second).max(0.0)))
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/s", self.tokens_per_second)
    }
}
