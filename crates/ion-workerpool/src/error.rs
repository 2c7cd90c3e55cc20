//! Error type for this crate.

/// Error type returned by pool lifecycle operations (`submit`, `drain`, `close`, ...).
pub type Error = ion_core::IonError;

/// Convenience alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type returned by an individual task, boxed so callers can use
/// whatever error type is convenient; never propagated to a caller of
/// `submit`/`try_submit` (spec §7: the pool logs and swallows task errors).
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// The result a task body returns.
pub type TaskResult = std::result::Result<(), TaskError>;
