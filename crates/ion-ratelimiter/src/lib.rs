//! Token bucket, leaky bucket, and multi-tier rate limiters (spec §4.2-4.4).
//!
//! All three share [`ion_core::Rate`] for their refill/leak rate and
//! [`ion_core::Ctx`] for cooperative cancellation of blocking waits. None of
//! them own a background task: time only passes when the configured
//! [`ion_core::Clock`] is consulted or advanced, which is what makes the
//! deterministic scenarios in the crate's test suites reproducible.

mod error;
mod events;
mod leaky_bucket;
mod multi_tier;
mod token_bucket;

pub use error::{Error, Result};
pub use events::RateLimiterEvent;
pub use leaky_bucket::{LeakyBucket, LeakyBucketConfig, LeakyBucketConfigBuilder};
pub use multi_tier::{Headers, MultiTierLimiter, MultiTierLimiterBuilder, RateLimitHeaders, Request};
pub use token_bucket::{TokenBucket, TokenBucketConfig, TokenBucketConfigBuilder};
