//! Events emitted by a worker pool for observability.

use crate::Phase;
use ion_core::IonEvent;
use std::time::Instant;

/// How a task's execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// The task returned `Ok(())`.
    Success,
    /// The task returned `Err(_)`.
    Failed,
    /// The task panicked; the panic was caught at the worker boundary.
    Panicked,
}

impl TaskStatus {
    /// The metric label value for this status.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskStatus::Success => "success",
            TaskStatus::Failed => "error",
            TaskStatus::Panicked => "panic",
        }
    }
}

/// Events emitted by a [`crate::WorkerPool`].
#[derive(Debug, Clone)]
pub enum WorkerPoolEvent {
    /// A task was accepted into the pool's queue.
    TaskSubmitted {
        /// Name of the pool instance.
        pool_name: String,
        /// When the event occurred.
        timestamp: Instant,
    },
    /// A worker picked up a task and began running it.
    TaskStarted {
        /// Name of the pool instance.
        pool_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// Index of the worker that picked up the task.
        worker_id: usize,
    },
    /// A task finished, successfully, with an error, or by panicking.
    TaskCompleted {
        /// Name of the pool instance.
        pool_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// How the task ended.
        status: TaskStatus,
    },
    /// The pool's lifecycle phase changed.
    PhaseChanged {
        /// Name of the pool instance.
        pool_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// Phase transitioned from.
        from: Phase,
        /// Phase transitioned to.
        to: Phase,
    },
}

impl IonEvent for WorkerPoolEvent {
    fn event_type(&self) -> &'static str {
        match self {
            WorkerPoolEvent::TaskSubmitted { .. } => "task_submitted",
            WorkerPoolEvent::TaskStarted { .. } => "task_started",
            WorkerPoolEvent::TaskCompleted { .. } => "task_completed",
            WorkerPoolEvent::PhaseChanged { .. } => "phase_changed",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            WorkerPoolEvent::TaskSubmitted { timestamp, .. }
            | WorkerPoolEvent::TaskStarted { timestamp, .. }
            | WorkerPoolEvent::TaskCompleted { timestamp, .. }
            | WorkerPoolEvent::PhaseChanged { timestamp, .. } => *timestamp,
        }
    }

    fn pattern_name(&self) -> &str {
        match self {
            WorkerPoolEvent::TaskSubmitted { pool_name, .. }
            | WorkerPoolEvent::TaskStarted { pool_name, .. }
            | WorkerPoolEvent::TaskCompleted { pool_name, .. }
            | WorkerPoolEvent::PhaseChanged { pool_name, .. } => pool_name,
        }
    }
}
