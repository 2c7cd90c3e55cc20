//! Events emitted by rate limiters for observability.

use ion_core::IonEvent;
use std::time::{Duration, Instant};

/// Events emitted by a token bucket, leaky bucket, or multi-tier limiter.
#[derive(Debug, Clone)]
pub enum RateLimiterEvent {
    /// A request was admitted, either immediately or after waiting.
    Admitted {
        /// Name of the limiter instance.
        limiter_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// Tier that admitted the request (`"global"`, `"route"`, `"resource"`, or the bucket's own name).
        tier: String,
        /// How long the caller waited, zero if admitted immediately.
        wait_duration: Duration,
    },
    /// A request was denied.
    Denied {
        /// Name of the limiter instance.
        limiter_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// Tier that denied the request.
        tier: String,
    },
    /// A multi-tier limiter entered a paused state.
    Paused {
        /// Name of the limiter instance.
        limiter_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// Absolute instant the pause is scheduled to end.
        until: Instant,
    },
    /// A multi-tier limiter's pause ended or was cleared.
    Resumed {
        /// Name of the limiter instance.
        limiter_name: String,
        /// When the event occurred.
        timestamp: Instant,
    },
    /// A limiter's buckets and counters were reset to their initial state.
    Reset {
        /// Name of the limiter instance.
        limiter_name: String,
        /// When the event occurred.
        timestamp: Instant,
    },
}

impl IonEvent for RateLimiterEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RateLimiterEvent::Admitted { .. } => "admitted",
            RateLimiterEvent::Denied { .. } => "denied",
            RateLimiterEvent::Paused { .. } => "paused",
            RateLimiterEvent::Resumed { .. } => "resumed",
            RateLimiterEvent::Reset { .. } => "reset",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            RateLimiterEvent::Admitted { timestamp, .. }
            | RateLimiterEvent::Denied { timestamp, .. }
            | RateLimiterEvent::Paused { timestamp, .. }
            | RateLimiterEvent::Resumed { timestamp, .. }
            | RateLimiterEvent::Reset { timestamp, .. } => *timestamp,
        }
    }

    fn pattern_name(&self) -> &str {
        match self {
            RateLimiterEvent::Admitted { limiter_name, .. }
            | RateLimiterEvent::Denied { limiter_name, .. }
            | RateLimiterEvent::Paused { limiter_name, .. }
            | RateLimiterEvent::Resumed { limiter_name, .. }
            | RateLimiterEvent::Reset { limiter_name, .. } => limiter_name,
        }
    }
}
