//! Burst-tolerant token bucket limiter (spec §4.2).

use crate::error::{Error, Result};
use crate::events::RateLimiterEvent;
use ion_core::clock::{Clock, Generation, Timer};
use ion_core::{Ctx, EventListeners, FnListener, IonError, Observability, Rate};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

struct Inner {
    rate: Rate,
    burst: f64,
    tokens: f64,
    last_refill: Instant,
    /// `(rate, burst)` to restore when the active temporary override expires.
    saved: Option<(Rate, f64)>,
    override_timer: Option<Timer>,
}

impl Inner {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed > Duration::ZERO {
            self.tokens = (self.tokens + self.rate.tokens_over(elapsed)).min(self.burst);
            self.last_refill = now;
        }
    }
}

struct Shared {
    name: String,
    clock: Arc<dyn Clock>,
    jitter: f64,
    state: Mutex<Inner>,
    generation: Generation,
    event_listeners: EventListeners<RateLimiterEvent>,
    obs: Observability,
}

/// A burst-tolerant token bucket: tokens refill continuously at `rate` up to
/// `burst`, and each admitted unit of work consumes one or more tokens.
///
/// Cheap to clone; clones share the same underlying bucket.
#[derive(Clone)]
pub struct TokenBucket {
    shared: Arc<Shared>,
}

/// Configuration for a [`TokenBucket`].
pub struct TokenBucketConfig {
    name: String,
    rate: Rate,
    burst: f64,
    clock: Arc<dyn Clock>,
    jitter: f64,
    event_listeners: EventListeners<RateLimiterEvent>,
    obs: Observability,
}

/// Builder for [`TokenBucketConfig`].
pub struct TokenBucketConfigBuilder {
    name: String,
    rate: Rate,
    burst: f64,
    clock: Arc<dyn Clock>,
    jitter: f64,
    event_listeners: EventListeners<RateLimiterEvent>,
    obs: Observability,
}

impl Default for TokenBucketConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenBucketConfigBuilder {
    /// Creates a builder with defaults: `rate = 0` (never refills),
    /// `burst = 0`, the real clock, no jitter, name `"<unnamed>"`.
    pub fn new() -> Self {
        Self {
            name: "<unnamed>".to_string(),
            rate: Rate::zero(),
            burst: 0.0,
            clock: Arc::new(ion_core::RealClock::new()),
            jitter: 0.0,
            event_listeners: EventListeners::new(),
            obs: Observability::default(),
        }
    }

    /// Sets the refill rate.
    pub fn rate(mut self, rate: Rate) -> Self {
        self.rate = rate;
        self
    }

    /// Sets the maximum number of tokens the bucket may hold.
    pub fn burst(mut self, burst: f64) -> Self {
        self.burst = burst;
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
    /// `wait_n`, to avoid thundering-herd retries.
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
    pub fn build(self) -> TokenBucket {
        TokenBucket::from_config(TokenBucketConfig {
            name: self.name,
            rate: self.rate,
            burst: self.burst,
            clock: self.clock,
            jitter: self.jitter,
            event_listeners: self.event_listeners,
            obs: self.obs,
        })
    }
}

impl TokenBucket {
    /// Starts building a token bucket.
    pub fn builder() -> TokenBucketConfigBuilder {
        TokenBucketConfigBuilder::new()
    }

    fn from_config(config: TokenBucketConfig) -> Self {
        let now = config.clock.now();
        Self {
            shared: Arc::new(Shared {
                name: config.name,
                clock: config.clock,
                jitter: config.jitter,
                state: Mutex::new(Inner {
                    rate: config.rate,
                    burst: config.burst,
                    tokens: config.burst,
                    last_refill: now,
                    saved: None,
                    override_timer: None,
                }),
                generation: Generation::new(),
                event_listeners: config.event_listeners,
                obs: config.obs,
            }),
        }
    }

    /// Non-blocking admission check for `n` tokens. Refills lazily first.
    /// A non-positive `n` is always admitted without consuming tokens.
    pub fn allow_n(&self, n: i64) -> bool {
        if n <= 0 {
            return true;
        }
        let now = self.shared.clock.now();
        let mut state = self.shared.state.lock().unwrap();
        state.refill(now);
        if state.tokens >= n as f64 {
            state.tokens -= n as f64;
            drop(state);
            self.record(&RateLimiterEvent::Admitted {
                limiter_name: self.shared.name.clone(),
                timestamp: now,
                tier: "token_bucket".to_string(),
                wait_duration: Duration::ZERO,
            });
            true
        } else {
            drop(state);
            self.record(&RateLimiterEvent::Denied {
                limiter_name: self.shared.name.clone(),
                timestamp: now,
                tier: "token_bucket".to_string(),
            });
            false
        }
    }

    /// Blocking admission for `n` tokens: tries immediately, and if that
    /// fails, sleeps for the computed deficit (plus jitter) via the clock
    /// and retries, honoring `ctx` cancellation throughout.
    pub async fn wait_n(&self, ctx: &Ctx, n: i64) -> Result<()> {
        if self.allow_n(n) {
            return Ok(());
        }

        let burst = { self.shared.state.lock().unwrap().burst };
        if n as f64 > burst {
            return Err(IonError::ExceedsCapacity {
                requested: n as u64,
                capacity: burst as u64,
            });
        }

        loop {
            let (rate, tokens) = {
                let state = self.shared.state.lock().unwrap();
                (state.rate, state.tokens)
            };
            if rate.is_zero() {
                return Err(IonError::RateZero);
            }
            let deficit = (n as f64 - tokens).max(0.0);
            let mut wait = rate.duration_for(deficit).unwrap_or(Duration::ZERO);
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

    /// Current token count, after a lazy refill.
    pub fn tokens(&self) -> f64 {
        let now = self.shared.clock.now();
        let mut state = self.shared.state.lock().unwrap();
        state.refill(now);
        state.tokens
    }

    /// Current refill rate (the temporary override's, if one is active).
    pub fn rate(&self) -> Rate {
        self.shared.state.lock().unwrap().rate
    }

    /// Current burst capacity (the temporary override's, if one is active).
    pub fn burst(&self) -> f64 {
        self.shared.state.lock().unwrap().burst
    }

    /// Updates the refill rate in place.
    pub fn set_rate(&self, rate: Rate) {
        self.shared.state.lock().unwrap().rate = rate;
    }

    /// Updates the burst capacity in place. Lowering it caps any tokens
    /// already held above the new ceiling.
    pub fn set_burst(&self, burst: f64) {
        let mut state = self.shared.state.lock().unwrap();
        state.burst = burst;
        state.tokens = state.tokens.min(burst);
    }

    /// Clamps the token count to `[0, n]` ∩ `[0, burst]`.
    pub fn drain_to(&self, n: f64) {
        let mut state = self.shared.state.lock().unwrap();
        let burst = state.burst;
        state.tokens = n.clamp(0.0, burst);
    }

    /// Temporarily swaps in `(rate, burst)`, restoring the bucket's prior
    /// rate and burst once `duration` elapses (unless cleared or replaced
    /// sooner by another call to this method).
    pub fn set_temporary_limit(&self, rate: Rate, burst: f64, duration: Duration) {
        let generation = self.shared.generation.next();
        let mut state = self.shared.state.lock().unwrap();
        let now = self.shared.clock.now();
        state.refill(now);

        if let Some(timer) = state.override_timer.take() {
            timer.stop();
        }
        if state.saved.is_none() {
            state.saved = Some((state.rate, state.burst));
        }
        state.rate = rate;
        state.burst = burst;
        state.tokens = state.tokens.min(burst);

        let shared = Arc::clone(&self.shared);
        let timer = self.shared.clock.after(
            duration,
            Box::new(move || {
                if shared.generation.current() != generation {
                    return;
                }
                let mut state = shared.state.lock().unwrap();
                if let Some((rate, burst)) = state.saved.take() {
                    state.rate = rate;
                    state.burst = burst;
                    state.tokens = state.tokens.min(burst);
                }
                state.override_timer = None;
            }),
        );
        state.override_timer = Some(timer);
    }

    /// Cancels a pending temporary-limit restoration and restores the
    /// original `(rate, burst)` immediately. A no-op if no override is
    /// active.
    pub fn clear_temporary_limit(&self) {
        self.shared.generation.next();
        let mut state = self.shared.state.lock().unwrap();
        if let Some(timer) = state.override_timer.take() {
            timer.stop();
        }
        if let Some((rate, burst)) = state.saved.take() {
            state.rate = rate;
            state.burst = burst;
            state.tokens = state.tokens.min(burst);
        }
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
            "ion_ratelimit_tokens_available",
            self.shared.state.lock().unwrap().tokens,
            &[("limiter_name", &self.shared.name)],
        );
    }
}
