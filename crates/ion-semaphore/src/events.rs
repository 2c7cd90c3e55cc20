//! Events emitted by a weighted semaphore for observability.

use ion_core::IonEvent;
use std::time::Instant;

/// Events emitted by a [`crate::Semaphore`].
#[derive(Debug, Clone)]
pub enum SemaphoreEvent {
    /// A permit request was granted, either immediately or after waiting.
    Acquired {
        /// Name of the semaphore instance.
        semaphore_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// Weight acquired.
        weight: u32,
        /// Whether the caller had to enqueue and wait.
        waited: bool,
    },
    /// A waiter's request was canceled before it was granted.
    Canceled {
        /// Name of the semaphore instance.
        semaphore_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// Weight that was requested.
        weight: u32,
    },
    /// Permits were returned to the semaphore.
    Released {
        /// Name of the semaphore instance.
        semaphore_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// Weight released.
        weight: u32,
        /// Permits available immediately after the release.
        available_after: u32,
    },
}

impl IonEvent for SemaphoreEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SemaphoreEvent::Acquired { .. } => "acquired",
            SemaphoreEvent::Canceled { .. } => "canceled",
            SemaphoreEvent::Released { .. } => "released",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            SemaphoreEvent::Acquired { timestamp, .. }
            | SemaphoreEvent::Canceled { timestamp, .. }
            | SemaphoreEvent::Released { timestamp, .. } => *timestamp,
        }
    }

    fn pattern_name(&self) -> &str {
        match self {
            SemaphoreEvent::Acquired { semaphore_name, .. }
            | SemaphoreEvent::Canceled { semaphore_name, .. }
            | SemaphoreEvent::Released { semaphore_name, .. } => semaphore_name,
        }
    }
}
