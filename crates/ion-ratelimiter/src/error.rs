//! Error type for this crate.
//!
//! Rate limiter operations produce [`ion_core::IonError`] directly; this
//! module only supplies the crate-local alias convention the other `ion`
//! crates share.

/// Error type returned by rate limiter operations.
pub type Error = ion_core::IonError;

/// Convenience alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
