//! Three-state circuit breaker with automatic recovery (spec §4.7).
//!
//! A circuit breaker wraps calls to a flaky dependency and stops issuing
//! them once consecutive failures cross a threshold, giving the dependency
//! time to recover before probing it again.
//!
//! ## States
//! - **Closed**: normal operation, every call is admitted.
//! - **Open**: tripped, every call is rejected with [`CircuitBreakerError::Open`].
//! - **HalfOpen**: probing recovery with a bounded number of trial calls.
//!
//! ```rust
//! use ion_circuitbreaker::CircuitBreaker;
//! use ion_core::Ctx;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let breaker = CircuitBreaker::builder()
//!     .name("payments-api")
//!     .failure_threshold(5)
//!     .recovery_timeout(Duration::from_secs(30))
//!     .build();
//!
//! let ctx = Ctx::new();
//! let result = breaker
//!     .execute(&ctx, |_ctx| async { Ok::<_, std::io::Error>(42) })
//!     .await;
//! # }
//! ```

mod circuit;
mod config;
mod error;
mod events;

pub use circuit::{CircuitMetrics, CircuitState};
pub use config::{CircuitBreakerConfig, CircuitBreakerConfigBuilder};
pub use error::{CircuitBreakerError, Result};
pub use events::CircuitBreakerEvent;

use circuit::Circuit;
use ion_core::Ctx;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;

struct Shared {
    config: CircuitBreakerConfig,
    circuit: Mutex<Circuit>,
}

/// A three-state circuit breaker guarding calls to an unreliable dependency.
///
/// Cheap to clone; clones share the same underlying state machine.
#[derive(Clone)]
pub struct CircuitBreaker {
    shared: Arc<Shared>,
}

impl CircuitBreaker {
    /// Starts building a circuit breaker.
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    pub(crate) fn from_config(config: CircuitBreakerConfig) -> Self {
        let now = config.clock.now();
        Self {
            shared: Arc::new(Shared {
                circuit: Mutex::new(Circuit::new(now)),
                config,
            }),
        }
    }

    /// Current state, snapshotted without admitting or rejecting a call.
    pub fn state(&self) -> CircuitState {
        self.shared.circuit.lock().unwrap().state()
    }

    /// Atomic snapshot of the breaker's counters.
    pub fn metrics(&self) -> CircuitMetrics {
        self.shared.circuit.lock().unwrap().metrics()
    }

    /// Forces the breaker back to `Closed`, regardless of its current state.
    pub fn reset(&self) {
        let now = self.shared.config.clock.now();
        self.shared
            .circuit
            .lock()
            .unwrap()
            .reset(&self.shared.config, now);
        self.shared.config.obs.metrics.inc(
            "circuit.manual_reset",
            &[("name", self.shared.config.name.as_str())],
        );
    }

    /// Forces the breaker into `Open`, as if it had just tripped.
    pub fn force_open(&self) {
        let now = self.shared.config.clock.now();
        self.shared
            .circuit
            .lock()
            .unwrap()
            .force_open(&self.shared.config, now);
    }

    /// Forces the breaker into `Closed`, without the bookkeeping `reset()`
    /// performs (no `manual_resets` increment, no `ManualReset` event).
    pub fn force_closed(&self) {
        let now = self.shared.config.clock.now();
        self.shared
            .circuit
            .lock()
            .unwrap()
            .force_closed(&self.shared.config, now);
    }

    /// Runs `f` under the breaker using the default failure classifier: any
    /// `Err` counts as a failure.
    ///
    /// Admission is checked first; if the breaker is not admitting, `f` is
    /// never invoked and [`CircuitBreakerError::Open`] is returned. The
    /// breaker only suspends inside `f` itself (spec §5).
    pub async fn execute<T, E, F, Fut>(
        &self,
        ctx: &Ctx,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&Ctx) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        self.execute_with(ctx, f, |result| result.is_err()).await
    }

    /// Like [`Self::execute`] but with an explicit `is_failure` predicate,
    /// evaluated against the call's outcome to decide whether it counts
    /// against `failure_threshold` / `half_open_success_threshold`.
    pub async fn execute_with<T, E, F, Fut, P>(
        &self,
        ctx: &Ctx,
        f: F,
        is_failure: P,
    ) -> Result<T, E>
    where
        F: FnOnce(&Ctx) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        P: FnOnce(&std::result::Result<T, E>) -> bool,
    {
        let name = &self.shared.config.name;
        let now = self.shared.config.clock.now();
        let admission = self
            .shared
            .circuit
            .lock()
            .unwrap()
            .try_admit(&self.shared.config, now);

        if !admission.permitted {
            self.shared
                .config
                .event_listeners
                .emit(&CircuitBreakerEvent::CallRejected {
                    circuit_name: name.clone(),
                    timestamp: now,
                });
            self.shared
                .config
                .obs
                .metrics
                .inc("circuit.requests_rejected", &[("name", name.as_str())]);
            return Err(CircuitBreakerError::Open {
                circuit_name: name.clone(),
            });
        }

        self.shared
            .config
            .event_listeners
            .emit(&CircuitBreakerEvent::CallPermitted {
                circuit_name: name.clone(),
                timestamp: now,
                state: admission.state,
            });

        let started = Instant::now();
        let result = f(ctx).await;
        let elapsed = started.elapsed();
        self.shared.config.obs.metrics.histogram(
            "circuit.request_duration",
            elapsed.as_secs_f64(),
            &[("name", name.as_str())],
        );

        let failed = is_failure(&result);
        let record_at = self.shared.config.clock.now();
        {
            let mut circuit = self.shared.circuit.lock().unwrap();
            if failed {
                circuit.record_failure(&self.shared.config, record_at);
            } else {
                circuit.record_success(&self.shared.config, record_at);
            }
        }

        let event_state = admission.state;
        if failed {
            self.shared
                .config
                .event_listeners
                .emit(&CircuitBreakerEvent::FailureRecorded {
                    circuit_name: name.clone(),
                    timestamp: record_at,
                    state: event_state,
                });
            self.shared
                .config
                .obs
                .metrics
                .inc("circuit.requests_failed", &[("name", name.as_str())]);
        } else {
            self.shared
                .config
                .event_listeners
                .emit(&CircuitBreakerEvent::SuccessRecorded {
                    circuit_name: name.clone(),
                    timestamp: record_at,
                    state: event_state,
                });
            self.shared
                .config
                .obs
                .metrics
                .inc("circuit.requests_succeeded", &[("name", name.as_str())]);
        }
        self.shared
            .config
            .obs
            .metrics
            .inc("circuit.requests_total", &[("name", name.as_str())]);

        result.map_err(CircuitBreakerError::Inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ion_core::TestClock;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn breaker(clock: Arc<dyn ion_core::clock::Clock>) -> CircuitBreaker {
        CircuitBreaker::builder()
            .name("s5")
            .failure_threshold(2)
            .recovery_timeout(Duration::from_millis(100))
            .half_open_max_requests(2)
            .half_open_success_threshold(1)
            .clock(clock)
            .build()
    }

    #[tokio::test]
    async fn s5_breaker_trip_and_recover() {
        let test_clock = TestClock::new();
        let breaker = breaker(Arc::new(test_clock.clone()));
        let ctx = Ctx::new();

        for _ in 0..2 {
            let result: Result<(), &str> = breaker
                .execute(&ctx, |_| async { Err("boom") })
                .await;
            assert!(result.is_err());
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let result: Result<(), &str> = breaker.execute(&ctx, |_| async { Ok(()) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::Open { .. })));

        test_clock.advance(Duration::from_millis(100));

        let result: Result<(), &str> = breaker.execute(&ctx, |_| async { Ok(()) }).await;
        assert!(result.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn execute_never_calls_f_when_open() {
        let test_clock = TestClock::new();
        let breaker = breaker(Arc::new(test_clock));
        let ctx = Ctx::new();
        breaker.force_open();

        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = Arc::clone(&calls);
        let result: Result<(), &str> = breaker
            .execute(&ctx, move |_| {
                calls2.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(matches!(result, Err(CircuitBreakerError::Open { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn property_breaker_admissibility() {
        // Property #7: while Closed or HalfOpen with remaining trial slots,
        // execute always invokes f; while Open before recovery_timeout, it
        // never does.
        let test_clock = TestClock::new();
        let breaker = breaker(Arc::new(test_clock.clone()));
        let ctx = Ctx::new();

        let calls = Arc::new(AtomicU32::new(0));
        for _ in 0..3 {
            let calls2 = Arc::clone(&calls);
            let _: Result<(), &str> = breaker
                .execute(&ctx, move |_| {
                    calls2.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                })
                .await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn property_breaker_progress() {
        // Property #8: with a deterministic clock, after recovery_timeout
        // elapses in Open, the next execute transitions to HalfOpen.
        let test_clock = TestClock::new();
        let breaker = breaker(Arc::new(test_clock.clone()));
        let ctx = Ctx::new();
        breaker.force_open();

        test_clock.advance(Duration::from_millis(100));
        let _: Result<(), &str> = breaker.execute(&ctx, |_| async { Ok(()) }).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn on_state_change_callback_fires_synchronously() {
        let test_clock = TestClock::new();
        let transitions = Arc::new(Mutex::new(Vec::new()));
        let transitions2 = Arc::clone(&transitions);
        let breaker = CircuitBreaker::builder()
            .name("callback")
            .failure_threshold(1)
            .recovery_timeout(Duration::from_millis(10))
            .clock(Arc::new(test_clock))
            .on_state_change(move |from, to| {
                transitions2.lock().unwrap().push((from, to));
            })
            .build();
        let ctx = Ctx::new();

        let _: Result<(), &str> = breaker.execute(&ctx, |_| async { Err("x") }).await;

        let recorded = transitions.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0], (CircuitState::Closed, CircuitState::Open));
    }

    #[tokio::test]
    async fn reset_counts_manual_resets_and_clears_state() {
        let test_clock = TestClock::new();
        let breaker = breaker(Arc::new(test_clock));
        breaker.force_open();
        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().manual_resets, 1);
    }
}
