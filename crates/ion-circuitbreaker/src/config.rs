//! Configuration for a [`crate::CircuitBreaker`] (spec §4.7).

use crate::circuit::CircuitState;
use crate::events::CircuitBreakerEvent;
use ion_core::clock::Clock;
use ion_core::{EventListeners, FnListener, Observability};
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a [`crate::CircuitBreaker`].
pub struct CircuitBreakerConfig {
    pub(crate) name: String,
    pub(crate) failure_threshold: u32,
    pub(crate) recovery_timeout: Duration,
    pub(crate) half_open_max_requests: u32,
    pub(crate) half_open_success_threshold: u32,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) event_listeners: EventListeners<CircuitBreakerEvent>,
    pub(crate) on_state_change: Option<Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>>,
    pub(crate) obs: Observability,
}

impl CircuitBreakerConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }
}

/// Builder for [`CircuitBreakerConfig`].
pub struct CircuitBreakerConfigBuilder {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    half_open_max_requests: u32,
    half_open_success_threshold: u32,
    clock: Arc<dyn Clock>,
    event_listeners: EventListeners<CircuitBreakerEvent>,
    on_state_change: Option<Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>>,
    obs: Observability,
}

impl Default for CircuitBreakerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakerConfigBuilder {
    /// Creates a builder with defaults: `failure_threshold = 5`,
    /// `recovery_timeout = 30s`, `half_open_max_requests = 1`,
    /// `half_open_success_threshold = 1`, name `"<unnamed>"`.
    pub fn new() -> Self {
        Self {
            name: "<unnamed>".to_string(),
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_requests: 1,
            half_open_success_threshold: 1,
            clock: Arc::new(ion_core::RealClock::new()),
            event_listeners: EventListeners::new(),
            on_state_change: None,
            obs: Observability::default(),
        }
    }

    /// Sets the name used in events and metric labels.
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the number of consecutive failures that trips the breaker from
    /// `Closed` to `Open`.
    pub fn failure_threshold(mut self, n: u32) -> Self {
        self.failure_threshold = n;
        self
    }

    /// Sets the minimum dwell time in `Open` before the next call may probe
    /// `HalfOpen`.
    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Sets the maximum number of trial calls admitted while `HalfOpen`.
    pub fn half_open_max_requests(mut self, n: u32) -> Self {
        self.half_open_max_requests = n;
        self
    }

    /// Sets the number of successful trial calls required to close the
    /// breaker from `HalfOpen`. Clamped to `half_open_max_requests` at
    /// `build()` if larger (spec: `half_open_success_threshold ≤ max_requests`).
    pub fn half_open_success_threshold(mut self, n: u32) -> Self {
        self.half_open_success_threshold = n;
        self
    }

    /// Overrides the clock (primarily for tests, via [`ion_core::TestClock`]).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the observability sinks (logger, metrics, tracer).
    pub fn observability(mut self, obs: Observability) -> Self {
        self.obs = obs;
        self
    }

    /// Registers a callback invoked synchronously on every state transition.
    pub fn on_state_change<F>(mut self, f: F) -> Self
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Arc::new(f));
        self
    }

    /// Registers a callback invoked when a call is admitted.
    pub fn on_call_permitted<F>(mut self, f: F) -> Self
    where
        F: Fn(CircuitState) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let CircuitBreakerEvent::CallPermitted { state, .. } = event {
                f(*state);
            }
        }));
        self
    }

    /// Registers a callback invoked when a call is rejected.
    pub fn on_call_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if matches!(event, CircuitBreakerEvent::CallRejected { .. }) {
                f();
            }
        }));
        self
    }

    /// Builds the breaker.
    pub fn build(self) -> crate::CircuitBreaker {
        let half_open_success_threshold = self
            .half_open_success_threshold
            .min(self.half_open_max_requests.max(1));
        let config = CircuitBreakerConfig {
            name: self.name,
            failure_threshold: self.failure_threshold.max(1),
            recovery_timeout: self.recovery_timeout,
            half_open_max_requests: self.half_open_max_requests.max(1),
            half_open_success_threshold,
            clock: self.clock,
            event_listeners: self.event_listeners,
            on_state_change: self.on_state_change,
            obs: self.obs,
        };
        crate::CircuitBreaker::from_config(config)
    }
}
