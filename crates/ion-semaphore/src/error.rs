//! Error type for this crate.

/// Error type returned by semaphore operations.
pub type Error = ion_core::IonError;

/// Convenience alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
