//! Smoothing leaky bucket limiter (spec §4.3): operations mirror the token
//! bucket but inverted — `level` grows on admission and decays over time.

use crate::error::Result;
use crate::events::RateLimiterEvent;
use ion_core::clock::Clock;
use ion_core::{Ctx, EventListeners, FnListener, IonError, Observability, Rate};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

struct Inner {
    rate: Rate,
    capacity: f64,
    level: f64,
    last_leak: Instant,
}

impl Inner {
    fn leak(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_leak);
        if elapsed > Duration::ZERO {
            self.level = (self.level - self.rate.tokens_over(elapsed)).max(0.0);
            self.last_leak = now;
        }
    }
}

struct Shared {
    name: String,
    clock: Arc<dyn Clock>,
    jitter: f64,
    state: Mutex<Inner>,
    event_listeners: EventListeners<RateLimiterEvent>,
    obs: Observability,
}

/// A leaky bucket: each admission raises `level`, which decays linearly at
/// `rate` between observations. Admission is denied once `level + n` would
/// exceed `capacity`.
///
/// Cheap to clone; clones share the same underlying bucket.
#[derive(Clone)]
pub struct LeakyBucket {
    shared: Arc<Shared>,
}

/// Configuration for a [`LeakyBucket`].
pub struct LeakyBucketConfig {
    name: String,
    rate: Rate,
    capacity: f64,
    clock: Arc<dyn Clock>,
    jitter: f64,
    event_listeners: EventListeners<RateLimiterEvent>,
    obs: Observability,
}

/// Builder for [`LeakyBucketConfig`].
pub struct LeakyBucketConfigBuilder {
    name: String,
    rate: Rate,
    capacity: f64,
    clock: Arc<dyn Clock>,
    jitter: f64,
    event_listeners: EventListeners<RateLimiterEvent>,
    obs: Observability,
}

impl Default for LeakyBucketConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LeakyBucketConfigBuilder {
    /// Creates a builder with defaults: `rate = 0` (never leaks),
    /// `capacity = 0`, the real clock, no jitter, name `"<unnamed>"`.
    pub fn new() -> Self {
        Self {
            name: "<unnamed>".to_string(),
            rate: Rate::zero(),
            capacity: 0.0,
            clock: Arc::new(ion_core::RealClock::new()),
            jitter: 0.0,
            event_listeners: EventListeners::new(),
            obs: Observability::default(),
        }
    }

    /// Sets the leak rate.
    pub fn rate(mut self, rate: Rate) -> Self {
        self.rate = rate;
        self
    }

    /// Sets the maximum level the bucket may hold.
    pub fn capacity(mut self, capacity: f64) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the name used in events and metric labels.
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Overrides the clock (primarily for tests, via [`ion_core::TestClock`]).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the jitter fraction `∈ [0, 1]` applied to computed waits in
    /// `wait_n`.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Sets the observability sinks (logger, metrics, tracer).
    pub fn observability(mut self, obs: Observability) -> Self {
        self.obs = obs;
        self
    }

    /// Registers a callback invoked when a request is admitted.
    pub fn on_admitted<F>(mut self, f: F) -> Self
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let RateLimiterEvent::Admitted { wait_duration, .. } = event {
                f(*wait_duration);
            }
        }));
        self
    }

    /// Registers a callback invoked when a request is denied.
    pub fn on_denied<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let RateLimiterEvent::Denied { .. } = event {
                f();
            }
        }));
        self
    }

    /// Builds the bucket.
    pub fn build(self) -> LeakyBucket {
        LeakyBucket::from_config(LeakyBucketConfig {
            name: self.name,
            rate: self.rate,
            capacity: self.capacity,
            clock: self.clock,
            jitter: self.jitter,
            event_listeners: self.event_listeners,
            obs: self.obs,
        })
    }
}

impl LeakyBucket {
    /// Starts building a leaky bucket.
    pub fn builder() -> LeakyBucketConfigBuilder {
        LeakyBucketConfigBuilder::new()
    }

    fn from_config(config: LeakyBucketConfig) -> Self {
        let now = config.clock.now();
        Self {
            shared: Arc::new(Shared {
                name: config.name,
                clock: config.clock,
                jitter: config.jitter,
                state: Mutex::new(Inner {
                    rate: config.rate,
                    capacity: config.capacity,
                    level: 0.0,
                    last_leak: now,
                }),
                event_listeners: config.event_listeners,
                obs: config.obs,
            }),
        }
    }

    /// Non-blocking admission check for `n` units. Leaks lazily first.
    /// A non-positive `n` is always admitted without raising the level.
    pub fn allow_n(&self, n: i64) -> bool {
        if n <= 0 {
            return true;
        }
        let now = self.shared.clock.now();
        let mut state = self.shared.state.lock().unwrap();
        state.leak(now);
        if state.level + n as f64 <= state.capacity {
            state.level += n as f64;
            drop(state);
            self.record(&RateLimiterEvent::Admitted {
                limiter_name: self.shared.name.clone(),
                timestamp: now,
                tier: "leaky_bucket".to_string(),
                wait_duration: Duration::ZERO,
            });
            true
        } else {
            drop(state);
            self.record(&RateLimiterEvent::Denied {
                limiter_name: self.shared.name.clone(),
                timestamp: now,
                tier: "leaky_bucket".to_string(),
            });
            false
        }
    }

    /// Blocking admission for `n` units, honoring `ctx` cancellation.
    pub async fn wait_n(&self, ctx: &Ctx, n: i64) -> Result<()> {
        if self.allow_n(n) {
            return Ok(());
        }

        let capacity = { self.shared.state.lock().unwrap().capacity };
        if n as f64 > capacity {
            return Err(IonError::ExceedsCapacity {
                requested: n as u64,
                capacity: capacity as u64,
            });
        }

        loop {
            let (rate, level) = {
                let state = self.shared.state.lock().unwrap();
                (state.rate, state.level)
            };
            if rate.is_zero() {
                return Err(IonError::RateZero);
            }
            let overflow = (level + n as f64 - capacity).max(0.0);
            let mut wait = rate.duration_for(overflow).unwrap_or(Duration::ZERO);
            if self.shared.jitter > 0.0 {
                use rand::Rng;
                let mut rng = rand::thread_rng();
                let extra = rng.gen_range(0.0..=self.shared.jitter);
                wait += Duration::from_secs_f64(wait.as_secs_f64() * extra);
            }

            tokio::select! {
                _ = self.shared.clock.sleep(wait) => {}
                _ = ctx.canceled() => {
                    return Err(ctx.cancellation_error());
                }
            }

            if self.allow_n(n) {
                return Ok(());
            }
        }
    }

    /// Current level, after a lazy leak.
    pub fn level(&self) -> f64 {
        let now = self.shared.clock.now();
        let mut state = self.shared.state.lock().unwrap();
        state.leak(now);
        state.level
    }

    /// Remaining admissible capacity, floored to an integer count.
    pub fn available(&self) -> u64 {
        (self.shared.state.lock().unwrap().capacity - self.level()).floor().max(0.0) as u64
    }

    /// Configured capacity.
    pub fn capacity(&self) -> f64 {
        self.shared.state.lock().unwrap().capacity
    }

    /// Configured leak rate.
    pub fn rate(&self) -> Rate {
        self.shared.state.lock().unwrap().rate
    }

    fn record(&self, event: &RateLimiterEvent) {
        self.shared.event_listeners.emit(event);
        match event {
            RateLimiterEvent::Admitted { .. } => {
                self.shared.obs.metrics.inc(
                    "ion_ratelimit_requests_total",
                    &[("limiter_name", &self.shared.name), ("result", &"allowed")],
                );
            }
            RateLimiterEvent::Denied { .. } => {
                self.shared.obs.metrics.inc(
                    "ion_ratelimit_requests_total",
                    &[("limiter_name", &self.shared.name), ("result", &"denied")],
                );
            }
            _ => {}
        }
        self.shared.obs.metrics.gauge(
            "ion_ratelimit_bucket_level",
            self.shared.state.lock().unwrap().level,
            &[("limiter_name", &self.shared.name)],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ion_core::TestClock;

    fn bucket(rate: f64, capacity: f64, clock: Arc<dyn Clock>) -> LeakyBucket {
        LeakyBucket::builder()
            .rate(Rate::new(rate).unwrap())
            .capacity(capacity)
            .clock(clock)
            .build()
    }

    #[test]
    fn fill_and_leak_s2() {
        let test_clock = TestClock::new();
        let bucket = bucket(10.0, 5.0, Arc::new(test_clock.clone()));

        for _ in 0..5 {
            assert!(bucket.allow_n(1));
        }
        assert!(!bucket.allow_n(1));

        test_clock.advance(Duration::from_millis(500));
        assert_eq!(bucket.available(), 5);

        for _ in 0..5 {
            assert!(bucket.allow_n(1));
        }
    }

    #[test]
    fn level_is_bounded_by_capacity() {
        let test_clock = TestClock::new();
        let bucket = bucket(0.0, 5.0, Arc::new(test_clock.clone()));
        for _ in 0..10 {
            bucket.allow_n(1);
        }
        assert!(bucket.level() <= 5.0);
    }

    #[tokio::test]
    async fn wait_n_succeeds_after_clock_advances() {
        let test_clock = TestClock::new();
        let clock: Arc<dyn Clock> = Arc::new(test_clock.clone());
        let bucket = bucket(10.0, 1.0, clock);
        assert!(bucket.allow_n(1));

        let ctx = Ctx::new();
        let bucket_for_wait = bucket.clone();
        let waiter = tokio::spawn(async move { bucket_for_wait.wait_n(&ctx, 1).await });

        tokio::task::yield_now().await;
        test_clock.advance(Duration::from_millis(100));
        waiter.await.unwrap().unwrap();
    }
}

#[cfg(test)]
mod properties {
    use super::*;
    use ion_core::TestClock;
    use proptest::prelude::*;

    proptest! {
        /// Property 3 (spec §8): the leaky bucket mirrors the token
        /// bucket's boundedness, with `level` in `[0, capacity]` instead of
        /// `tokens` in `[0, burst]`.
        #[test]
        fn level_stays_within_capacity(
            rate in 0.0f64..1000.0,
            capacity in 0.1f64..1000.0,
            requests in prop::collection::vec(0i64..50, 1..50),
        ) {
            let clock: Arc<dyn Clock> = Arc::new(TestClock::new());
            let bucket = LeakyBucket::builder()
                .rate(Rate::new(rate).unwrap())
                .capacity(capacity)
                .clock(clock)
                .build();

            for n in requests {
                bucket.allow_n(n);
                let level = bucket.level();
                prop_assert!(level >= 0.0);
                prop_assert!(level <= capacity + f64::EPSILON);
            }
        }

        /// Property 3 continued: with no admissions in between, elapsed
        /// time decays `level` monotonically toward zero, never past it.
        #[test]
        fn decay_is_monotone_and_bounded_below(
            rate in 0.01f64..1000.0,
            capacity in 1.0f64..1000.0,
            fill_n in 0i64..1000,
            millis in 0u64..5000,
        ) {
            let test_clock = TestClock::new();
            let clock: Arc<dyn Clock> = Arc::new(test_clock.clone());
            let bucket = LeakyBucket::builder()
                .rate(Rate::new(rate).unwrap())
                .capacity(capacity)
                .clock(clock)
                .build();

            bucket.allow_n(fill_n.min(capacity as i64));
            let before = bucket.level();

            test_clock.advance(Duration::from_millis(millis));
            let after = bucket.level();

            prop_assert!(after <= before + f64::EPSILON);
            prop_assert!(after >= 0.0);
        }
    }
}
