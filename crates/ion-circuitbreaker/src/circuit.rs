//! Three-state failure detector (spec §4.7).

use crate::config::CircuitBreakerConfig;
use crate::events::CircuitBreakerEvent;
use std::time::Instant;

/// The state of a [`crate::CircuitBreaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    /// Normal operation; every call is admitted.
    Closed = 0,
    /// Tripped; every call is rejected until `recovery_timeout` elapses.
    Open = 1,
    /// Probing recovery with a bounded number of trial calls.
    HalfOpen = 2,
}

impl CircuitState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Point-in-time snapshot of a breaker's counters (spec §3 "atomic
/// snapshots").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitMetrics {
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures recorded while `Closed`.
    pub consecutive_failures: u32,
    /// Successful trial calls recorded in the current `HalfOpen` window.
    pub half_open_successes: u32,
    /// Trial calls admitted in the current `HalfOpen` window.
    pub half_open_admitted: u32,
    /// Total admitted calls.
    pub requests_total: u64,
    /// Admitted calls classified as successes.
    pub requests_succeeded: u64,
    /// Admitted calls classified as failures.
    pub requests_failed: u64,
    /// Calls rejected while the breaker was not admitting.
    pub requests_rejected: u64,
    /// Number of state transitions since construction (or last `reset`).
    pub state_changes: u64,
    /// Number of manual `reset()` calls.
    pub manual_resets: u64,
}

/// Interior state machine. Pure and synchronous; [`crate::CircuitBreaker`]
/// wraps it in a `Mutex` and supplies the clock, events, and metrics.
pub(crate) struct Circuit {
    state: CircuitState,
    last_transition_at: Instant,
    consecutive_failures: u32,
    half_open_successes: u32,
    half_open_admitted: u32,
    requests_total: u64,
    requests_succeeded: u64,
    requests_failed: u64,
    requests_rejected: u64,
    state_changes: u64,
    manual_resets: u64,
}

/// Outcome of an admission check: the caller got the current state plus an
/// optional event the breaker wants recorded.
pub(crate) struct Admission {
    pub(crate) permitted: bool,
    pub(crate) state: CircuitState,
}

impl Circuit {
    pub(crate) fn new(now: Instant) -> Self {
        Self {
            state: CircuitState::Closed,
            last_transition_at: now,
            consecutive_failures: 0,
            half_open_successes: 0,
            half_open_admitted: 0,
            requests_total: 0,
            requests_succeeded: 0,
            requests_failed: 0,
            requests_rejected: 0,
            state_changes: 0,
            manual_resets: 0,
        }
    }

    pub(crate) fn state(&self) -> CircuitState {
        self.state
    }

    pub(crate) fn metrics(&self) -> CircuitMetrics {
        CircuitMetrics {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            half_open_successes: self.half_open_successes,
            half_open_admitted: self.half_open_admitted,
            requests_total: self.requests_total,
            requests_succeeded: self.requests_succeeded,
            requests_failed: self.requests_failed,
            requests_rejected: self.requests_rejected,
            state_changes: self.state_changes,
            manual_resets: self.manual_resets,
        }
    }

    /// Admission check, evaluating `recovery_timeout` lazily (spec: "not by
    /// a timer"). `Open → HalfOpen` happens here, on the admitting call.
    pub(crate) fn try_admit(&mut self, config: &CircuitBreakerConfig, now: Instant) -> Admission {
        match self.state {
            CircuitState::Closed => {
                self.requests_total += 1;
                Admission {
                    permitted: true,
                    state: CircuitState::Closed,
                }
            }
            CircuitState::Open => {
                if now.saturating_duration_since(self.last_transition_at)
                    >= config.recovery_timeout
                {
                    self.transition_to(CircuitState::HalfOpen, config, now);
                    self.half_open_admitted = 1;
                    self.requests_total += 1;
                    Admission {
                        permitted: true,
                        state: CircuitState::HalfOpen,
                    }
                } else {
                    self.requests_rejected += 1;
                    Admission {
                        permitted: false,
                        state: CircuitState::Open,
                    }
                }
            }
            CircuitState::HalfOpen => {
                if self.half_open_admitted < config.half_open_max_requests {
                    self.half_open_admitted += 1;
                    self.requests_total += 1;
                    Admission {
                        permitted: true,
                        state: CircuitState::HalfOpen,
                    }
                } else {
                    self.requests_rejected += 1;
                    Admission {
                        permitted: false,
                        state: CircuitState::HalfOpen,
                    }
                }
            }
        }
    }

    pub(crate) fn record_success(&mut self, config: &CircuitBreakerConfig, now: Instant) {
        self.requests_succeeded += 1;
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                self.half_open_successes += 1;
                if self.half_open_successes >= config.half_open_success_threshold {
                    self.transition_to(CircuitState::Closed, config, now);
                }
            }
            CircuitState::Open => {}
        }
    }

    pub(crate) fn record_failure(&mut self, config: &CircuitBreakerConfig, now: Instant) {
        self.requests_failed += 1;
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= config.failure_threshold {
                    self.transition_to(CircuitState::Open, config, now);
                }
            }
            CircuitState::HalfOpen => {
                self.transition_to(CircuitState::Open, config, now);
            }
            CircuitState::Open => {}
        }
    }

    pub(crate) fn force_open(&mut self, config: &CircuitBreakerConfig, now: Instant) {
        self.transition_to(CircuitState::Open, config, now);
    }

    pub(crate) fn force_closed(&mut self, config: &CircuitBreakerConfig, now: Instant) {
        self.transition_to(CircuitState::Closed, config, now);
    }

    /// Forces `Closed` without waiting, and records a manual reset
    /// regardless of whether the state actually changed.
    pub(crate) fn reset(&mut self, config: &CircuitBreakerConfig, now: Instant) {
        self.manual_resets += 1;
        config
            .event_listeners
            .emit(&CircuitBreakerEvent::ManualReset {
                circuit_name: config.name.clone(),
                timestamp: now,
            });
        self.transition_to(CircuitState::Closed, config, now);
    }

    fn transition_to(&mut self, to: CircuitState, config: &CircuitBreakerConfig, now: Instant) {
        let from = self.state;
        self.state = to;
        self.last_transition_at = now;
        self.consecutive_failures = 0;
        self.half_open_successes = 0;
        self.half_open_admitted = 0;
        if from == to {
            return;
        }
        self.state_changes += 1;

        config
            .event_listeners
            .emit(&CircuitBreakerEvent::StateTransition {
                circuit_name: config.name.clone(),
                timestamp: now,
                from,
                to,
            });
        if let Some(callback) = &config.on_state_change {
            callback(from, to);
        }
    }
}


#[cfg(test)]
mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property 7 (spec §8): once `Open` transitions into `HalfOpen`
        /// after the recovery timeout, no more than `half_open_max_requests`
        /// trial calls are ever admitted before the next transition,
        /// regardless of the configured threshold.
        #[test]
        fn half_open_never_admits_past_its_request_cap(
            half_open_max_requests in 1u32..10,
            attempts in 1usize..20,
        ) {
            let config = CircuitBreakerConfig::builder()
                .failure_threshold(1)
                .recovery_timeout(std::time::Duration::from_millis(100))
                .half_open_max_requests(half_open_max_requests)
                .half_open_success_threshold(half_open_max_requests)
                .build();

            let now = Instant::now();
            let mut circuit = Circuit::new(now);
            circuit.force_open(&config, now);
            let later = now + std::time::Duration::from_millis(100);

            let mut admitted = 0u32;
            for _ in 0..attempts {
                if circuit.try_admit(&config, later).permitted {
                    admitted += 1;
                }
                // Stop once a transition out of HalfOpen would reset the
                // window; this property only concerns the single window.
                if circuit.state() != CircuitState::HalfOpen {
                    break;
                }
            }
            prop_assert!(admitted <= half_open_max_requests);
        }

        /// Property 8 (spec §8): with a deterministic clock, the first
        /// admission attempt at or after `recovery_timeout` transitions
        /// `Open` into `HalfOpen` and is itself admitted.
        #[test]
        fn recovery_timeout_elapsed_transitions_to_half_open(
            recovery_ms in 1u64..5000,
            elapsed_ms in 0u64..10_000,
        ) {
            let config = CircuitBreakerConfig::builder()
                .failure_threshold(1)
                .recovery_timeout(std::time::Duration::from_millis(recovery_ms))
                .half_open_max_requests(1)
                .half_open_success_threshold(1)
                .build();

            let now = Instant::now();
            let mut circuit = Circuit::new(now);
            circuit.force_open(&config, now);

            let later = now + std::time::Duration::from_millis(elapsed_ms);
            let admission = circuit.try_admit(&config, later);

            if elapsed_ms >= recovery_ms {
                prop_assert!(admission.permitted);
                prop_assert_eq!(circuit.state(), CircuitState::HalfOpen);
            } else {
                prop_assert!(!admission.permitted);
                prop_assert_eq!(circuit.state(), CircuitState::Open);
            }
        }
    }
}
