//! Core infrastructure shared by every `ion` primitive.
//!
//! This crate has no notion of pools, limiters, semaphores, or breakers; it
//! provides only what they all need underneath:
//! - [`clock`]: pluggable monotonic time, real or deterministic for tests
//! - [`context`]: cooperative cancellation and deadlines ([`Ctx`])
//! - [`error`]: the closed [`IonError`] taxonomy every component returns
//! - [`events`]: panic-isolated event-listener fan-out
//! - [`observability`]: the `Logger`/`Metrics`/`Tracer` contract components
//!   are constructed with, plus no-op defaults and optional `tracing`/`metrics`
//!   adapters
//! - [`rate`]: the [`Rate`] type shared by the token and leaky buckets

pub mod clock;
pub mod context;
pub mod error;
pub mod events;
pub mod observability;
pub mod rate;

pub use clock::{Clock, Generation, RealClock, TestClock, Timer, TimerCallback};
pub use context::Ctx;
pub use error::IonError;
pub use events::{EventListener, EventListeners, FnListener, IonEvent};
pub use observability::{Kv, Label, Logger, Metrics, NoopLogger, NoopMetrics, NoopTracer, Observability, SpanGuard, Tracer};
pub use rate::{InvalidRate, Rate};
