//! Error type for this crate.

use std::fmt;

/// Error returned by [`crate::CircuitBreaker::execute`].
///
/// Generic over the wrapped operation's own error type `E`: a breaker
/// rejection is distinguishable from an error the wrapped call itself
/// produced (spec §7: "the breaker never transforms the wrapped function's
/// error into `CircuitOpen`; it only returns `CircuitOpen` when it itself
/// rejected admission").
#[derive(Debug, Clone)]
pub enum CircuitBreakerError<E> {
    /// The breaker rejected the call because it is open.
    Open {
        /// Name of the circuit breaker.
        circuit_name: String,
    },
    /// The wrapped call ran and returned this error, propagated verbatim.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitBreakerError::Open { circuit_name } => {
                write!(f, "circuit '{circuit_name}' is open")
            }
            CircuitBreakerError::Inner(e) => write!(f, "{e}"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for CircuitBreakerError<E> {}

impl<E> CircuitBreakerError<E> {
    /// True if the breaker itself rejected the call (as opposed to the
    /// wrapped call returning an error).
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CircuitBreakerError::Open { .. })
    }

    /// Returns the wrapped call's error, if this is that variant.
    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitBreakerError::Inner(e) => Some(e),
            CircuitBreakerError::Open { .. } => None,
        }
    }
}

impl CircuitBreakerError<ion_core::IonError> {
    /// Flattens into a single [`ion_core::IonError`] when the wrapped
    /// operation's error type already is one, mapping `Open` to
    /// [`ion_core::IonError::CircuitOpen`].
    pub fn into_ion_error(self) -> ion_core::IonError {
        match self {
            CircuitBreakerError::Open { circuit_name } => {
                ion_core::IonError::CircuitOpen { circuit_name }
            }
            CircuitBreakerError::Inner(e) => e,
        }
    }
}

/// Convenience alias for `Result<T, CircuitBreakerError<E>>`.
pub type Result<T, E> = std::result::Result<T, CircuitBreakerError<E>>;
