//! The closed error taxonomy shared by every ion primitive.
//!
//! Every fallible operation in the toolkit returns (or wraps) an
//! [`IonError`] variant instead of inventing per-crate error enums, so
//! callers composing a pool behind a limiter behind a breaker can match
//! on one type. Each component crate still exposes a thin, component-local
//! alias (e.g. `ion_workerpool::Error`) for ergonomics, but it is always
//! this enum underneath.

use std::fmt;
use std::time::Duration;

/// The closed set of errors produced by ion's primitives.
///
/// The set is intentionally closed (spec §7): adding a new failure mode
/// here is a breaking change, which is why every variant is named for the
/// precise condition rather than grouped into a generic "rejected" case.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IonError {
    /// A worker pool rejected a submission because it is no longer running.
    #[error("worker pool '{pool_name}' is closed")]
    PoolClosed {
        /// Name of the pool that rejected the submission.
        pool_name: String,
    },

    /// `try_submit` found the queue (or the single rendezvous slot) full.
    #[error("worker pool '{pool_name}' queue is full (capacity {queue_capacity})")]
    QueueFull {
        /// Name of the pool.
        pool_name: String,
        /// Configured queue capacity.
        queue_capacity: usize,
    },

    /// A nil/empty task was submitted. Always a caller bug.
    #[error("nil task submitted")]
    NilTask,

    /// The operation's cancellation token tripped before it could complete.
    #[error("operation canceled")]
    Canceled {
        /// Human-readable cause, if the cancellation carried one.
        cause: Option<String>,
    },

    /// A deadline derived from a [`crate::context::Ctx`] elapsed.
    ///
    /// Distinguishable from a bare [`IonError::Canceled`] so callers can
    /// tell a timeout from an explicit cancel.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// A semaphore weight, or a bucket request, exceeded the component's
    /// configured ceiling.
    #[error("requested {requested} exceeds capacity {capacity}")]
    ExceedsCapacity {
        /// What was requested (permits, or tokens for a bucket operation).
        requested: u64,
        /// The ceiling that was exceeded (semaphore capacity, or bucket burst/capacity).
        capacity: u64,
    },

    /// A blocking limiter operation targeted a zero-rate limiter that can
    /// never satisfy the request.
    #[error("rate is zero; request can never be satisfied")]
    RateZero,

    /// The named circuit breaker rejected the call because it is open.
    #[error("circuit '{circuit_name}' is open")]
    CircuitOpen {
        /// Name of the circuit breaker.
        circuit_name: String,
    },

    /// The named circuit breaker observed the wrapped call exceed its deadline.
    #[error("circuit '{circuit_name}' observed a timeout")]
    CircuitTimeout {
        /// Name of the circuit breaker.
        circuit_name: String,
    },

    /// Typed rate-limit signal for non-blocking callers that want a
    /// `retry_after` hint instead of a plain boolean.
    #[error("rate limit '{limiter_name}' exceeded, retry after {retry_after:?}")]
    RateLimitExceeded {
        /// Name of the limiter (or tier) that denied the request.
        limiter_name: String,
        /// How long the caller should wait before retrying, if known.
        retry_after: Option<Duration>,
    },

    /// Like [`IonError::RateLimitExceeded`] but specifically the global tier.
    #[error("global rate limit '{limiter_name}' exceeded, retry after {retry_after:?}")]
    GlobalRateLimit {
        /// Name of the multi-tier limiter.
        limiter_name: String,
        /// How long the caller should wait before retrying, if known.
        retry_after: Option<Duration>,
    },

    /// A remote (header-reported) bucket limit was hit.
    #[error(
        "bucket '{bucket}' of limiter '{limiter_name}' exhausted ({remaining}/{limit} remaining), retry after {retry_after:?}"
    )]
    BucketLimit {
        /// Name of the multi-tier limiter.
        limiter_name: String,
        /// Remote bucket identifier, as reported by `X-RateLimit-Bucket`.
        bucket: String,
        /// Remaining requests as last reported.
        remaining: u64,
        /// Configured limit as last reported.
        limit: u64,
        /// How long the caller should wait before retrying, if known.
        retry_after: Option<Duration>,
    },
}

impl IonError {
    /// Shorthand for a plain cancellation with no recorded cause.
    pub fn canceled() -> Self {
        IonError::Canceled { cause: None }
    }

    /// Cancellation with a recorded human-readable cause.
    pub fn canceled_because(cause: impl fmt::Display) -> Self {
        IonError::Canceled {
            cause: Some(cause.to_string()),
        }
    }

    /// True for any variant that represents cooperative cancellation
    /// (explicit cancel or an elapsed deadline).
    pub fn is_canceled(&self) -> bool {
        matches!(self, IonError::Canceled { .. } | IonError::DeadlineExceeded)
    }

    /// True if this is any flavor of rate-limit rejection.
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            IonError::RateLimitExceeded { .. }
                | IonError::GlobalRateLimit { .. }
                | IonError::BucketLimit { .. }
                | IonError::RateZero
        )
    }

    /// True if this is a circuit breaker rejection (not an inner-call error).
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, IonError::CircuitOpen { .. })
    }

    /// `retry_after` hint, if this variant carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            IonError::RateLimitExceeded { retry_after, .. }
            | IonError::GlobalRateLimit { retry_after, .. }
            | IonError::BucketLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
