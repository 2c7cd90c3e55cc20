//! Events emitted by a circuit breaker for observability.

use crate::circuit::CircuitState;
use ion_core::IonEvent;
use std::time::Instant;

/// Events emitted by a [`crate::CircuitBreaker`].
#[derive(Debug, Clone)]
pub enum CircuitBreakerEvent {
    /// The breaker changed state.
    StateTransition {
        /// Name of the breaker instance.
        circuit_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// State before the transition.
        from: CircuitState,
        /// State after the transition.
        to: CircuitState,
    },
    /// A call was admitted.
    CallPermitted {
        /// Name of the breaker instance.
        circuit_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// State that admitted the call.
        state: CircuitState,
    },
    /// A call was rejected because the breaker is open.
    CallRejected {
        /// Name of the breaker instance.
        circuit_name: String,
        /// When the event occurred.
        timestamp: Instant,
    },
    /// An admitted call's outcome was classified as a success.
    SuccessRecorded {
        /// Name of the breaker instance.
        circuit_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// State the breaker was in when the outcome was recorded.
        state: CircuitState,
    },
    /// An admitted call's outcome was classified as a failure.
    FailureRecorded {
        /// Name of the breaker instance.
        circuit_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// State the breaker was in when the outcome was recorded.
        state: CircuitState,
    },
    /// `reset()` forced the breaker back to `Closed`.
    ManualReset {
        /// Name of the breaker instance.
        circuit_name: String,
        /// When the event occurred.
        timestamp: Instant,
    },
}

impl IonEvent for CircuitBreakerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CircuitBreakerEvent::StateTransition { .. } => "state_transition",
            CircuitBreakerEvent::CallPermitted { .. } => "call_permitted",
            CircuitBreakerEvent::CallRejected { .. } => "call_rejected",
            CircuitBreakerEvent::SuccessRecorded { .. } => "success_recorded",
            CircuitBreakerEvent::FailureRecorded { .. } => "failure_recorded",
            CircuitBreakerEvent::ManualReset { .. } => "manual_reset",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            CircuitBreakerEvent::StateTransition { timestamp, .. }
            | CircuitBreakerEvent::CallPermitted { timestamp, .. }
            | CircuitBreakerEvent::CallRejected { timestamp, .. }
            | CircuitBreakerEvent::SuccessRecorded { timestamp, .. }
            | CircuitBreakerEvent::FailureRecorded { timestamp, .. }
            | CircuitBreakerEvent::ManualReset { timestamp, .. } => *timestamp,
        }
    }

    fn pattern_name(&self) -> &str {
        match self {
            CircuitBreakerEvent::StateTransition { circuit_name, .. }
            | CircuitBreakerEvent::CallPermitted { circuit_name, .. }
            | CircuitBreakerEvent::CallRejected { circuit_name, .. }
            | CircuitBreakerEvent::SuccessRecorded { circuit_name, .. }
            | CircuitBreakerEvent::FailureRecorded { circuit_name, .. }
            | CircuitBreakerEvent::ManualReset { circuit_name, .. } => circuit_name,
        }
    }
}
