//! The observability contract the core consumes (spec §6).
//!
//! The toolkit never calls `tracing::*` or `metrics::*` macros directly
//! outside of this module's adapters. Every component takes an
//! `Arc<dyn Logger>`, `Arc<dyn Metrics>`, and `Arc<dyn Tracer>` at
//! construction time (no process-wide singletons, per spec §9), defaulting
//! to the no-op implementations below. Enabling this crate's `tracing` /
//! `metrics` features makes the matching adapter available as a drop-in
//! non-default choice, so a binary can opt into the teacher's usual stack
//! (`tracing` + the `metrics` facade) without the library crates forcing
//! it on every consumer.

use std::fmt;
use std::sync::Arc;

/// A single structured key-value pair attached to a log line or span.
pub type Kv<'a> = (&'a str, &'a dyn fmt::Display);

/// Structured logger, with unknown keys treated opaquely (spec §6).
pub trait Logger: Send + Sync {
    /// Debug-level structured log line.
    fn debug(&self, message: &str, fields: &[Kv<'_>]);
    /// Info-level structured log line.
    fn info(&self, message: &str, fields: &[Kv<'_>]);
    /// Warn-level structured log line.
    fn warn(&self, message: &str, fields: &[Kv<'_>]);
    /// Error-level structured log line.
    fn error(&self, message: &str, fields: &[Kv<'_>]);
}

/// A label attached to a metric emission.
pub type Label<'a> = (&'a str, &'a str);

/// Counter / gauge / histogram metrics sink (spec §6).
pub trait Metrics: Send + Sync {
    /// Increments a counter by 1.
    fn inc(&self, name: &str, labels: &[Label<'_>]);
    /// Adds `value` to a counter.
    fn add(&self, name: &str, value: f64, labels: &[Label<'_>]);
    /// Sets a gauge to `value`.
    fn gauge(&self, name: &str, value: f64, labels: &[Label<'_>]);
    /// Records `value` into a histogram.
    fn histogram(&self, name: &str, value: f64, labels: &[Label<'_>]);
}

/// A span in progress; dropping it without calling `finish` is allowed but
/// loses the outcome (no error is recorded).
pub trait SpanGuard: Send {
    /// Closes the span, optionally recording the error that ended it.
    fn finish(self: Box<Self>, err: Option<&dyn std::error::Error>);
}

/// Distributed tracer contract (spec §6).
pub trait Tracer: Send + Sync {
    /// Starts a span, returning a guard that must be finished by the caller.
    fn start(&self, span_name: &str, fields: &[Kv<'_>]) -> Box<dyn SpanGuard>;
}

/// No-op logger; the default when no logging sink is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn debug(&self, _message: &str, _fields: &[Kv<'_>]) {}
    fn info(&self, _message: &str, _fields: &[Kv<'_>]) {}
    fn warn(&self, _message: &str, _fields: &[Kv<'_>]) {}
    fn error(&self, _message: &str, _fields: &[Kv<'_>]) {}
}

/// No-op metrics sink; the default when no metrics sink is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn inc(&self, _name: &str, _labels: &[Label<'_>]) {}
    fn add(&self, _name: &str, _value: f64, _labels: &[Label<'_>]) {}
    fn gauge(&self, _name: &str, _value: f64, _labels: &[Label<'_>]) {}
    fn histogram(&self, _name: &str, _value: f64, _labels: &[Label<'_>]) {}
}

struct NoopSpanGuard;
impl SpanGuard for NoopSpanGuard {
    fn finish(self: Box<Self>, _err: Option<&dyn std::error::Error>) {}
}

/// No-op tracer; the default when no tracer is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl Tracer for NoopTracer {
    fn start(&self, _span_name: &str, _fields: &[Kv<'_>]) -> Box<dyn SpanGuard> {
        Box::new(NoopSpanGuard)
    }
}

/// Bundle of the three observability sinks a component is constructed with.
///
/// Builders expose `.logger(...)`, `.metrics(...)`, `.tracer(...)` setters
/// that replace the individual fields; `Observability::default()` is all
/// no-ops.
#[derive(Clone)]
pub struct Observability {
    /// Structured logger.
    pub logger: Arc<dyn Logger>,
    /// Metrics sink.
    pub metrics: Arc<dyn Metrics>,
    /// Span tracer.
    pub tracer: Arc<dyn Tracer>,
}

impl fmt::Debug for Observability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observability").finish_non_exhaustive()
    }
}

impl Default for Observability {
    fn default() -> Self {
        Self {
            logger: Arc::new(NoopLogger),
            metrics: Arc::new(NoopMetrics),
            tracer: Arc::new(NoopTracer),
        }
    }
}

#[cfg(feature = "tracing")]
mod tracing_adapter {
    use super::*;

    /// [`Logger`] adapter that forwards to the `tracing` crate.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct TracingLogger;

    fn format_fields(fields: &[Kv<'_>]) -> String {
        fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    impl Logger for TracingLogger {
        fn debug(&self, message: &str, fields: &[Kv<'_>]) {
            tracing::debug!(fields = %format_fields(fields), "{message}");
        }
        fn info(&self, message: &str, fields: &[Kv<'_>]) {
            tracing::info!(fields = %format_fields(fields), "{message}");
        }
        fn warn(&self, message: &str, fields: &[Kv<'_>]) {
            tracing::warn!(fields = %format_fields(fields), "{message}");
        }
        fn error(&self, message: &str, fields: &[Kv<'_>]) {
            tracing::error!(fields = %format_fields(fields), "{message}");
        }
    }

    struct TracingSpanGuard {
        span: tracing::Span,
        _entered: tracing::span::EnteredSpan,
    }

    impl SpanGuard for TracingSpanGuard {
        fn finish(self: Box<Self>, err: Option<&dyn std::error::Error>) {
            if let Some(err) = err {
                self.span.record("error", tracing::field::display(err));
            }
            drop(self._entered);
        }
    }

    /// [`Tracer`] adapter that forwards to the `tracing` crate.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct TracingTracer;

    impl Tracer for TracingTracer {
        fn start(&self, span_name: &str, fields: &[Kv<'_>]) -> Box<dyn SpanGuard> {
            let span = tracing::info_span!("ion", name = %span_name, fields = %format_fields(fields), error = tracing::field::Empty);
            let entered = span.clone().entered();
            Box::new(TracingSpanGuard {
                span,
                _entered: entered,
            })
        }
    }
}

#[cfg(feature = "tracing")]
pub use tracing_adapter::{TracingLogger, TracingTracer};

#[cfg(feature = "metrics")]
mod metrics_adapter {
    use super::*;

    /// [`Metrics`] adapter that forwards to the `metrics` crate's global
    /// recorder.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct MetricsRecorderAdapter;

    fn owned_labels(labels: &[Label<'_>]) -> Vec<(String, String)> {
        labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    impl Metrics for MetricsRecorderAdapter {
        fn inc(&self, name: &str, labels: &[Label<'_>]) {
            metrics::counter!(name.to_string(), owned_labels(labels)).increment(1);
        }
        fn add(&self, name: &str, value: f64, labels: &[Label<'_>]) {
            metrics::counter!(name.to_string(), owned_labels(labels)).increment(value as u64);
        }
        fn gauge(&self, name: &str, value: f64, labels: &[Label<'_>]) {
            metrics::gauge!(name.to_string(), owned_labels(labels)).set(value);
        }
        fn histogram(&self, name: &str, value: f64, labels: &[Label<'_>]) {
            metrics::histogram!(name.to_string(), owned_labels(labels)).record(value);
        }
    }
}

#[cfg(feature = "metrics")]
pub use metrics_adapter::MetricsRecorderAdapter;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn noop_sinks_do_not_panic() {
        let obs = Observability::default();
        obs.logger.info("hello", &[("k", &"v")]);
        obs.metrics.inc("counter", &[]);
        let guard = obs.tracer.start("span", &[]);
        guard.finish(None);
    }

    struct CountingLogger {
        count: AtomicUsize,
    }
    impl Logger for CountingLogger {
        fn debug(&self, _m: &str, _f: &[Kv<'_>]) {}
        fn info(&self, _m: &str, _f: &[Kv<'_>]) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
        fn warn(&self, _m: &str, _f: &[Kv<'_>]) {}
        fn error(&self, _m: &str, _f: &[Kv<'_>]) {}
    }

    #[test]
    fn custom_logger_is_invoked() {
        let logger = Arc::new(CountingLogger {
            count: AtomicUsize::new(0),
        });
        let obs = Observability {
            logger: logger.clone(),
            ..Observability::default()
        };
        obs.logger.info("x", &[]);
        obs.logger.info("y", &[]);
        assert_eq!(logger.count.load(Ordering::SeqCst), 2);
    }
}
