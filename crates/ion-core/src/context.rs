//! Cooperative cancellation and deadlines.
//!
//! Every blocking operation in the toolkit (bucket `wait_n`, semaphore
//! `acquire`, pool `submit`/`drain`/`close`, breaker `execute`) takes a
//! [`Ctx`] instead of owning its own timer (spec §5: "no operation owns an
//! independent timer for its caller"). A `Ctx` can be canceled explicitly,
//! derived with a deadline, or derived from a parent — canceling a parent
//! cancels every child transitively.

use crate::clock::Clock;
use crate::error::IonError;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

struct Inner {
    canceled: AtomicBool,
    cause: Mutex<Option<String>>,
    /// Set (alongside `canceled`) when this token's *own* deadline timer is
    /// what tripped it, so a caller can tell a timeout from an explicit
    /// cancel (spec §7: "`DeadlineExceeded` ... distinguishable"). Carried
    /// down to descendants when the trip propagates, since their
    /// cancellation has the same root cause.
    deadline_exceeded: AtomicBool,
    notify: Notify,
    children: Mutex<Vec<Arc<Inner>>>,
    deadline_timer: Mutex<Option<crate::clock::Timer>>,
}

impl Inner {
    fn new() -> Self {
        Self {
            canceled: AtomicBool::new(false),
            cause: Mutex::new(None),
            deadline_exceeded: AtomicBool::new(false),
            notify: Notify::new(),
            children: Mutex::new(Vec::new()),
            deadline_timer: Mutex::new(None),
        }
    }

    fn cancel(self: &Arc<Self>, cause: Option<String>) {
        self.cancel_with(cause, false);
    }

    fn cancel_with(self: &Arc<Self>, cause: Option<String>, deadline: bool) {
        if self
            .canceled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        *self.cause.lock().unwrap() = cause.clone();
        if deadline {
            self.deadline_exceeded.store(true, Ordering::Release);
        }
        self.notify.notify_waiters();
        let children = self.children.lock().unwrap().clone();
        for child in children {
            child.cancel_with(cause.clone(), deadline);
        }
    }
}

/// A cancellation token with an optional deadline, cloneable and cheap to
/// share across tasks.
///
/// `Ctx` forms a tree: [`Ctx::child`] and [`Ctx::with_deadline`] both
/// return a new token whose cancellation is independent of siblings but
/// implied by the parent's. This mirrors how a pool derives each task's
/// context from its own base token and the submission's token (spec §4.6):
/// the task context trips when either does.
#[derive(Clone)]
pub struct Ctx {
    inner: Arc<Inner>,
}

impl fmt::Debug for Ctx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ctx")
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

impl Default for Ctx {
    fn default() -> Self {
        Self::new()
    }
}

impl Ctx {
    /// Creates a fresh, uncanceled, deadline-less root token.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::new()),
        }
    }

    /// Creates a child token. Canceling `self` cancels the child; canceling
    /// the child does not affect `self` or its other children.
    pub fn child(&self) -> Self {
        let child = Self {
            inner: Arc::new(Inner::new()),
        };
        if self.is_canceled() {
            child.inner.cancel_with(
                self.inner.cause.lock().unwrap().clone(),
                self.is_deadline_exceeded(),
            );
        } else {
            self.inner.children.lock().unwrap().push(Arc::clone(&child.inner));
        }
        child
    }

    /// Creates a child token that additionally cancels itself with
    /// [`crate::IonError::DeadlineExceeded`] semantics once `timeout`
    /// elapses on `clock`, unless canceled sooner.
    pub fn with_deadline(&self, clock: &dyn Clock, timeout: Duration) -> Self {
        let child = self.child();
        let child_inner = Arc::clone(&child.inner);
        let timer = clock.after(
            timeout,
            Box::new(move || {
                child_inner.cancel_with(Some("deadline exceeded".to_string()), true);
            }),
        );
        *child.inner.deadline_timer.lock().unwrap() = Some(timer);
        child
    }

    /// Derives a token that trips when either `self` or `other` does.
    ///
    /// This is how a worker pool combines its own base token with a
    /// per-submission token (spec §4.6).
    pub fn merge(&self, other: &Ctx) -> Self {
        let merged = self.child();
        let merged_inner = Arc::clone(&merged.inner);
        if other.is_canceled() {
            merged_inner.cancel_with(
                other.inner.cause.lock().unwrap().clone(),
                other.is_deadline_exceeded(),
            );
        } else {
            other
                .inner
                .children
                .lock()
                .unwrap()
                .push(Arc::clone(&merged_inner));
        }
        merged
    }

    /// Cancels this token (and transitively, every descendant) with no
    /// recorded cause.
    pub fn cancel(&self) {
        self.inner.cancel(None);
    }

    /// Cancels this token with a recorded human-readable cause.
    pub fn cancel_because(&self, cause: impl fmt::Display) {
        self.inner.cancel(Some(cause.to_string()));
    }

    /// True once this token (or an ancestor) has been canceled.
    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::Acquire)
    }

    /// The recorded cancellation cause, if any and if canceled.
    pub fn cause(&self) -> Option<String> {
        self.inner.cause.lock().unwrap().clone()
    }

    /// True if this token's cancellation (its own, or the ancestor it
    /// inherited it from) originated from a [`Ctx::with_deadline`] timer
    /// firing, rather than an explicit [`Ctx::cancel`]/[`Ctx::cancel_because`].
    pub fn is_deadline_exceeded(&self) -> bool {
        self.inner.deadline_exceeded.load(Ordering::Acquire)
    }

    /// The [`IonError`] this token's current cancellation should surface as:
    /// [`IonError::DeadlineExceeded`] if a deadline tripped it,
    /// [`IonError::Canceled`] (carrying the recorded cause) otherwise.
    ///
    /// Returns a plain `Canceled` with no cause if called on a token that
    /// is not actually canceled; callers should check [`Ctx::is_canceled`]
    /// first.
    pub fn cancellation_error(&self) -> IonError {
        if self.is_deadline_exceeded() {
            IonError::DeadlineExceeded
        } else {
            self.cause()
                .map(IonError::canceled_because)
                .unwrap_or_else(IonError::canceled)
        }
    }

    /// Resolves once this token is canceled. Already-canceled tokens
    /// resolve immediately.
    pub async fn canceled(&self) {
        if self.is_canceled() {
            return;
        }
        // Notify::notified() must be constructed before the cancellation
        // check it races against; re-check after subscribing to close the
        // TOCTOU window between the check above and the await below.
        let notified = self.inner.notify.notified();
        if self.is_canceled() {
            return;
        }
        notified.await;
    }
}
