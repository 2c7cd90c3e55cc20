//! Configuration for a [`crate::WorkerPool`] (spec §4.6).

use crate::events::{TaskStatus, WorkerPoolEvent};
use crate::TaskFuture;
use ion_core::clock::Clock;
use ion_core::{Ctx, EventListeners, FnListener, Observability};
use std::sync::Arc;
use std::time::Duration;

/// Wraps every task's future before it is polled, e.g. for timing or tracing.
/// Receives the task's merged context and the task's future, and must
/// return a future with the same output.
pub type TaskWrapper = Arc<dyn Fn(Ctx, TaskFuture) -> TaskFuture + Send + Sync>;

/// Configuration for a [`crate::WorkerPool`].
pub struct WorkerPoolConfig {
    pub(crate) name: String,
    pub(crate) size: usize,
    pub(crate) queue_capacity: usize,
    pub(crate) drain_timeout: Duration,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) task_wrapper: Option<TaskWrapper>,
    pub(crate) on_panic: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub(crate) event_listeners: EventListeners<WorkerPoolEvent>,
    pub(crate) obs: Observability,
}

impl WorkerPoolConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> WorkerPoolConfigBuilder {
        WorkerPoolConfigBuilder::new()
    }
}

/// Builder for [`WorkerPoolConfig`].
pub struct WorkerPoolConfigBuilder {
    name: String,
    size: usize,
    queue_capacity: usize,
    drain_timeout: Duration,
    clock: Arc<dyn Clock>,
    task_wrapper: Option<TaskWrapper>,
    on_panic: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    event_listeners: EventListeners<WorkerPoolEvent>,
    obs: Observability,
}

impl Default for WorkerPoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerPoolConfigBuilder {
    /// Creates a builder with defaults: `size = 0` (host parallelism),
    /// `queue_capacity = 0` (rendezvous), `drain_timeout = 30s`, name
    /// `"<unnamed>"`.
    pub fn new() -> Self {
        Self {
            name: "<unnamed>".to_string(),
            size: 0,
            queue_capacity: 0,
            drain_timeout: Duration::from_secs(30),
            clock: Arc::new(ion_core::RealClock::new()),
            task_wrapper: None,
            on_panic: None,
            event_listeners: EventListeners::new(),
            obs: Observability::default(),
        }
    }

    /// Sets the name used in events and metric labels.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the number of worker tasks. `0` defaults to the host's
    /// parallelism hint at `build()` time.
    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Sets the queue buffer size. `0` means rendezvous: a submission is
    /// only accepted once a worker is ready to take it.
    pub fn queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Sets the bound on how long `drain` waits for `close` to finish once
    /// the queue has emptied.
    ///
    /// Default: 30s.
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Overrides the clock (primarily for tests, via [`ion_core::TestClock`]).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets a wrapper invoked around every task's future, e.g. for timing.
    pub fn task_wrapper(mut self, wrapper: TaskWrapper) -> Self {
        self.task_wrapper = Some(wrapper);
        self
    }

    /// Registers a handler invoked with the panic message whenever a task
    /// panics. If unset, the panic is logged instead.
    pub fn on_panic<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_panic = Some(Arc::new(f));
        self
    }

    /// Sets the observability sinks (logger, metrics, tracer).
    pub fn observability(mut self, obs: Observability) -> Self {
        self.obs = obs;
        self
    }

    /// Registers a callback invoked whenever a task completes (success,
    /// error, or panic).
    pub fn on_task_completed<F>(mut self, f: F) -> Self
    where
        F: Fn(TaskStatus) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let WorkerPoolEvent::TaskCompleted { status, .. } = event {
                f(*status);
            }
        }));
        self
    }

    /// Builds the pool and immediately spawns its workers.
    pub fn build(self) -> crate::WorkerPool {
        let config = WorkerPoolConfig {
            name: self.name,
            size: self.size,
            queue_capacity: self.queue_capacity,
            drain_timeout: self.drain_timeout,
            clock: self.clock,
            task_wrapper: self.task_wrapper,
            on_panic: self.on_panic,
            event_listeners: self.event_listeners,
            obs: self.obs,
        };
        crate::WorkerPool::from_config(config)
    }
}
