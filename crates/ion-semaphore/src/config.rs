//! Configuration for a [`crate::Semaphore`] (spec §4.5).

use crate::events::SemaphoreEvent;
use ion_core::{EventListeners, FnListener, Observability};

/// Queue discipline governing which waiter is served when permits free up
/// (spec §4.5, §9 "Fairness Unfair mode").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fairness {
    /// Waiters are served strictly in enqueue order. A large-weight waiter
    /// at the head blocks smaller ones behind it (head-of-line blocking) —
    /// this is what prevents the head from ever being starved.
    #[default]
    Fifo,
    /// The most recently enqueued waiter is served first when its weight
    /// fits the current available permits; a waiter closer to the front
    /// blocks waiters behind it the same way FIFO's head does.
    Lifo,
    /// No queue discipline: any waiter whose weight currently fits may be
    /// woken, regardless of position. Maximizes throughput under mixed
    /// weights; a large-weight waiter can be starved indefinitely by a
    /// stream of smaller ones. Do not use this for correctness-critical
    /// workloads.
    Unfair,
}

/// Configuration for a [`crate::Semaphore`].
pub struct SemaphoreConfig {
    pub(crate) name: String,
    pub(crate) capacity: u32,
    pub(crate) fairness: Fairness,
    pub(crate) event_listeners: EventListeners<SemaphoreEvent>,
    pub(crate) obs: Observability,
}

impl SemaphoreConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> SemaphoreConfigBuilder {
        SemaphoreConfigBuilder::new()
    }
}

/// Builder for [`SemaphoreConfig`].
pub struct SemaphoreConfigBuilder {
    name: String,
    capacity: u32,
    fairness: Fairness,
    event_listeners: EventListeners<SemaphoreEvent>,
    obs: Observability,
}

impl Default for SemaphoreConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SemaphoreConfigBuilder {
    /// Creates a builder with defaults: `capacity = 1`, `fairness = Fifo`,
    /// name `"<unnamed>"`.
    pub fn new() -> Self {
        Self {
            name: "<unnamed>".to_string(),
            capacity: 1,
            fairness: Fairness::Fifo,
            event_listeners: EventListeners::new(),
            obs: Observability::default(),
        }
    }

    /// Sets the name used in events and metric labels.
    ///
    /// Default: `"<unnamed>"`.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the total number of permits this semaphore hands out.
    ///
    /// Default: 1.
    pub fn capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the queue discipline used to pick the next waiter to serve.
    ///
    /// Default: [`Fairness::Fifo`].
    pub fn fairness(mut self, fairness: Fairness) -> Self {
        self.fairness = fairness;
        self
    }

    /// Sets the observability sinks (logger, metrics, tracer).
    pub fn observability(mut self, obs: Observability) -> Self {
        self.obs = obs;
        self
    }

    /// Registers a callback invoked whenever a permit request is granted.
    pub fn on_acquired<F>(mut self, f: F) -> Self
    where
        F: Fn(u32, bool) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let SemaphoreEvent::Acquired { weight, waited, .. } = event {
                f(*weight, *waited);
            }
        }));
        self
    }

    /// Registers a callback invoked whenever permits are released.
    pub fn on_released<F>(mut self, f: F) -> Self
    where
        F: Fn(u32, u32) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let SemaphoreEvent::Released {
                weight,
                available_after,
                ..
            } = event
            {
                f(*weight, *available_after);
            }
        }));
        self
    }

    /// Builds the semaphore, starting with every permit available.
    pub fn build(self) -> crate::Semaphore {
        let config = SemaphoreConfig {
            name: self.name,
            capacity: self.capacity,
            fairness: self.fairness,
            event_listeners: self.event_listeners,
            obs: self.obs,
        };
        crate::Semaphore::from_config(config)
    }
}
