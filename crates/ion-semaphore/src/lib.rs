//! Weighted permit broker with explicit fairness (spec §4.5).
//!
//! Unlike a plain counting semaphore, callers may request (and release)
//! more than one permit at a time — a "weight" — which is what lets a
//! single semaphore model both simple concurrency limits (`weight == 1`
//! everywhere) and heterogeneous resource reservations (a big batch job
//! asking for `weight == 8` out of a pool of 16).
//!
//! ```rust
//! use ion_semaphore::Semaphore;
//! use ion_core::Ctx;
//!
//! # async fn example() {
//! let sem = Semaphore::builder().name("db-pool").capacity(10).build();
//!
//! assert!(sem.try_acquire(3));
//! assert_eq!(sem.available(), 7);
//!
//! let ctx = Ctx::new();
//! sem.acquire(&ctx, 2).await.unwrap();
//! assert_eq!(sem.available(), 5);
//!
//! sem.release(5);
//! assert_eq!(sem.available(), 10);
//! # }
//! ```
//!
//! # Fairness
//!
//! [`config::Fairness`] picks the queue discipline used when multiple
//! callers are waiting and permits free up: strict FIFO (the default),
//! LIFO, or unfair best-effort. See spec §4.5 and §9 for the tradeoffs.

pub mod config;
pub mod error;
pub mod events;

pub use config::{Fairness, SemaphoreConfig, SemaphoreConfigBuilder};
pub use error::{Error, Result};
pub use events::SemaphoreEvent;

use ion_core::{Ctx, IonError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::Notify;

struct Waiter {
    seq: u64,
    weight: u32,
    signal: Arc<Notify>,
    granted: Arc<AtomicBool>,
}

struct Inner {
    available: u32,
    waiters: VecDeque<Waiter>,
}

impl Inner {
    /// Pops and grants every waiter the configured `fairness` allows,
    /// given the permits currently available (spec §4.5: "on release,
    /// repeatedly pop waiters whose weight ≤ current available until none
    /// fits or the queue is empty").
    fn wake_eligible(&mut self, fairness: Fairness) {
        match fairness {
            Fairness::Fifo => {
                while let Some(front) = self.waiters.front() {
                    if front.weight > self.available {
                        break;
                    }
                    let waiter = self.waiters.pop_front().unwrap();
                    self.grant(waiter);
                }
            }
            Fairness::Lifo => {
                while let Some(back) = self.waiters.back() {
                    if back.weight > self.available {
                        break;
                    }
                    let waiter = self.waiters.pop_back().unwrap();
                    self.grant(waiter);
                }
            }
            Fairness::Unfair => {
                let mut i = 0;
                while i < self.waiters.len() {
                    if self.waiters[i].weight <= self.available {
                        let waiter = self.waiters.remove(i).unwrap();
                        self.grant(waiter);
                    } else {
                        i += 1;
                    }
                }
            }
        }
    }

    fn grant(&mut self, waiter: Waiter) {
        self.available -= waiter.weight;
        waiter.granted.store(true, Ordering::Release);
        waiter.signal.notify_one();
    }
}

struct Shared {
    name: String,
    capacity: u32,
    fairness: Fairness,
    state: Mutex<Inner>,
    next_seq: AtomicU64,
    event_listeners: ion_core::EventListeners<SemaphoreEvent>,
    obs: ion_core::Observability,
}

/// A capacity-bounded permit broker (spec §4.5, §3 "Semaphore state").
///
/// Cheap to clone; clones share the same underlying state.
#[derive(Clone)]
pub struct Semaphore {
    shared: Arc<Shared>,
}

impl Semaphore {
    /// Starts building a semaphore.
    pub fn builder() -> SemaphoreConfigBuilder {
        SemaphoreConfigBuilder::new()
    }

    fn from_config(config: SemaphoreConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: config.name,
                capacity: config.capacity,
                fairness: config.fairness,
                state: Mutex::new(Inner {
                    available: config.capacity,
                    waiters: VecDeque::new(),
                }),
                next_seq: AtomicU64::new(0),
                event_listeners: config.event_listeners,
                obs: config.obs,
            }),
        }
    }

    /// Total permits this semaphore was constructed with.
    pub fn capacity(&self) -> u32 {
        self.shared.capacity
    }

    /// Permits currently available to acquire without waiting.
    pub fn available(&self) -> u32 {
        self.shared.state.lock().unwrap().available
    }

    /// Non-blocking acquire of `weight` permits. Succeeds and decrements
    /// `available` iff `weight ≤ available`; never waits or enqueues.
    pub fn try_acquire(&self, weight: u32) -> bool {
        let mut state = self.shared.state.lock().unwrap();
        if weight > state.available {
            drop(state);
            self.record_denied(weight);
            return false;
        }
        state.available -= weight;
        drop(state);
        self.record_acquired(weight, false);
        true
    }

    /// Acquires `weight` permits, waiting (subject to `ctx` cancellation)
    /// if they are not immediately available.
    ///
    /// Fails with [`IonError::ExceedsCapacity`] if `weight` exceeds the
    /// semaphore's total capacity (it could never be satisfied), or with
    /// a cancellation error if `ctx` trips first. On cancellation, the
    /// waiter is always removed from the queue before returning and no
    /// permits are consumed (spec §8 property 9).
    pub async fn acquire(&self, ctx: &Ctx, weight: u32) -> Result<()> {
        if weight > self.shared.capacity {
            return Err(IonError::ExceedsCapacity {
                requested: weight as u64,
                capacity: self.shared.capacity as u64,
            });
        }
        if self.try_acquire(weight) {
            return Ok(());
        }
        if ctx.is_canceled() {
            return Err(canceled_error(ctx));
        }

        let seq = self.shared.next_seq.fetch_add(1, Ordering::Relaxed);
        let signal = Arc::new(Notify::new());
        let granted = Arc::new(AtomicBool::new(false));
        {
            let mut state = self.shared.state.lock().unwrap();
            // Re-check under the lock: another release may have landed
            // between the fast-path check above and taking the lock here.
            if weight <= state.available {
                state.available -= weight;
                drop(state);
                self.record_acquired(weight, false);
                return Ok(());
            }
            state.waiters.push_back(Waiter {
                seq,
                weight,
                signal: Arc::clone(&signal),
                granted: Arc::clone(&granted),
            });
        }

        loop {
            let notified = signal.notified();
            tokio::select! {
                _ = notified => {
                    if granted.load(Ordering::Acquire) {
                        self.record_acquired(weight, true);
                        return Ok(());
                    }
                    // Spurious wake with no grant recorded: re-subscribe and wait again.
                }
                _ = ctx.canceled() => {
                    if granted.load(Ordering::Acquire) {
                        // Already handed a permit before the cancellation
                        // was observed; honor the grant rather than
                        // silently dropping permits (spec §5: cancellation
                        // must not consume a permit it did not obtain —
                        // this one *was* obtained).
                        self.record_acquired(weight, true);
                        return Ok(());
                    }
                    let mut state = self.shared.state.lock().unwrap();
                    state.waiters.retain(|w| w.seq != seq);
                    drop(state);
                    self.record_canceled(weight);
                    return Err(canceled_error(ctx));
                }
            }
        }
    }

    /// Returns `weight` permits to the semaphore and wakes waiters the
    /// configured fairness mode admits.
    ///
    /// # Panics
    ///
    /// Panics if `available + weight` would exceed `capacity` — an
    /// over-release is always a caller bug (more permits returned than
    /// were ever held) and spec §4.5 requires it be detectable.
    pub fn release(&self, weight: u32) {
        if weight == 0 {
            return;
        }
        let mut state = self.shared.state.lock().unwrap();
        let available_after = state.available.checked_add(weight).unwrap_or_else(|| {
            panic!(
                "ion_semaphore '{}': release overflowed available permits",
                self.shared.name
            )
        });
        assert!(
            available_after <= self.shared.capacity,
            "ion_semaphore '{}': release({weight}) would push available ({}) past capacity ({})",
            self.shared.name,
            state.available,
            self.shared.capacity,
        );
        state.available = available_after;
        state.wake_eligible(self.shared.fairness);
        drop(state);
        self.record_released(weight, available_after);
    }

    fn record_acquired(&self, weight: u32, waited: bool) {
        let now = Instant::now();
        self.shared.event_listeners.emit(&SemaphoreEvent::Acquired {
            semaphore_name: self.shared.name.clone(),
            timestamp: now,
            weight,
            waited,
        });
        self.shared.obs.metrics.inc(
            "ion_semaphore_acquired_total",
            &[
                ("semaphore_name", self.shared.name.as_str()),
                ("waited", if waited { "true" } else { "false" }),
            ],
        );
        self.report_available_gauge();
    }

    fn record_denied(&self, weight: u32) {
        let _ = weight;
        self.shared.obs.metrics.inc(
            "ion_semaphore_denied_total",
            &[("semaphore_name", self.shared.name.as_str())],
        );
    }

    fn record_canceled(&self, weight: u32) {
        let now = Instant::now();
        self.shared.event_listeners.emit(&SemaphoreEvent::Canceled {
            semaphore_name: self.shared.name.clone(),
            timestamp: now,
            weight,
        });
        self.shared.obs.metrics.inc(
            "ion_semaphore_acquire_canceled_total",
            &[("semaphore_name", self.shared.name.as_str())],
        );
    }

    fn record_released(&self, weight: u32, available_after: u32) {
        let now = Instant::now();
        self.shared.event_listeners.emit(&SemaphoreEvent::Released {
            semaphore_name: self.shared.name.clone(),
            timestamp: now,
            weight,
            available_after,
        });
        self.shared.obs.metrics.gauge(
            "ion_semaphore_available",
            available_after as f64,
            &[("semaphore_name", self.shared.name.as_str())],
        );
    }

    fn report_available_gauge(&self) {
        let available = self.available();
        self.shared.obs.metrics.gauge(
            "ion_semaphore_available",
            available as f64,
            &[("semaphore_name", self.shared.name.as_str())],
        );
    }
}

fn canceled_error(ctx: &Ctx) -> IonError {
    ctx.cancellation_error()
}


#[cfg(test)]
mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property 4 (spec §8): `available + sum(outstanding weights) ==
        /// capacity` at every quiescent point, for any sequence of
        /// non-blocking acquire/release calls that never oversubscribes.
        #[test]
        fn conservation_holds_for_any_try_acquire_release_sequence(
            capacity in 1u32..64,
            weights in prop::collection::vec(1u32..8, 1..30),
        ) {
            let sem = Semaphore::builder().capacity(capacity).build();
            let mut outstanding = 0u32;

            for weight in weights {
                if sem.try_acquire(weight) {
                    outstanding += weight;
                    prop_assert_eq!(sem.available() + outstanding, capacity);
                } else {
                    // Denied: state must be unchanged.
                    prop_assert_eq!(sem.available() + outstanding, capacity);
                }
                if outstanding > 0 && weight <= outstanding {
                    sem.release(weight);
                    outstanding -= weight;
                    prop_assert_eq!(sem.available() + outstanding, capacity);
                }
            }
        }
    }
}
