//! Pluggable monotonic time, used by every time-sensitive primitive in the
//! toolkit (token/leaky buckets, semaphore deadlines, pool drains, the
//! circuit breaker's recovery timeout).
//!
//! Production code takes `Arc<dyn Clock>` and defaults to [`RealClock`].
//! Tests take the same trait object but construct a [`TestClock`], which
//! advances only when told to and fires due timers in monotonic order —
//! this is what makes the deterministic scenarios in spec §8 (S1, S2, S5)
//! reproducible without `tokio::time::pause`.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A callback scheduled with [`Clock::after`].
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

const TIMER_PENDING: u8 = 0;
const TIMER_FIRED: u8 = 1;
const TIMER_CANCELED: u8 = 2;

/// A handle to a callback scheduled with [`Clock::after`].
///
/// Cloning a `Timer` shares the same underlying schedule; calling
/// [`Timer::stop`] from any clone cancels it for all of them.
#[derive(Clone)]
pub struct Timer {
    state: Arc<AtomicU8>,
}

impl Timer {
    fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(TIMER_PENDING)),
        }
    }

    /// Attempts to cancel the scheduled callback.
    ///
    /// Returns `true` if the callback was canceled before it fired,
    /// `false` if it had already fired (or had already been canceled).
    pub fn stop(&self) -> bool {
        self.state
            .compare_exchange(
                TIMER_PENDING,
                TIMER_CANCELED,
                AtomicOrdering::AcqRel,
                AtomicOrdering::Acquire,
            )
            .is_ok()
    }

    /// Returns `true` once the callback has fired.
    pub fn has_fired(&self) -> bool {
        self.state.load(AtomicOrdering::Acquire) == TIMER_FIRED
    }

    fn mark_fired(&self) -> bool {
        self.state
            .compare_exchange(
                TIMER_PENDING,
                TIMER_FIRED,
                AtomicOrdering::AcqRel,
                AtomicOrdering::Acquire,
            )
            .is_ok()
    }
}

/// Pluggable monotonic clock.
///
/// Implementations must be safe to share across threads: every
/// time-sensitive component stores this behind an `Arc`.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current monotonic instant, as seen by this clock.
    fn now(&self) -> Instant;

    /// Returns a future that resolves after `duration` has elapsed on
    /// this clock.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;

    /// Schedules `callback` to run after `duration` has elapsed on this
    /// clock, returning a [`Timer`] that can cancel it beforehand.
    fn after(&self, duration: Duration, callback: TimerCallback) -> Timer;
}

/// The real wall clock, backed by `std::time::Instant` and
/// `tokio::time::sleep`.
#[derive(Debug, Clone, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock. Carries no state; all instances are
    /// interchangeable.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(duration).boxed()
    }

    fn after(&self, duration: Duration, callback: TimerCallback) -> Timer {
        let timer = Timer::new();
        let timer_for_task = timer.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if timer_for_task.mark_fired() {
                callback();
            }
        });
        timer
    }
}

struct ScheduledTimer {
    due: Duration,
    seq: u64,
    timer: Timer,
    callback: Mutex<Option<TimerCallback>>,
}

impl PartialEq for ScheduledTimer {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}
impl Eq for ScheduledTimer {}

impl PartialOrd for ScheduledTimer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTimer {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want the earliest due time (and,
        // within a tie, the earliest-scheduled seq) to pop first.
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct TestClockState {
    offset: Duration,
    next_seq: u64,
    pending: BinaryHeap<ScheduledTimer>,
}

/// A deterministic clock for tests.
///
/// `now()` returns a fixed base instant plus an accumulated offset.
/// [`TestClock::advance`] moves the offset forward and synchronously
/// fires every timer whose due time has been reached, in monotonic
/// (due-time, then scheduling-order) order — matching spec §4.1's
/// "firing due callbacks in monotonic order".
#[derive(Clone)]
pub struct TestClock {
    base: Instant,
    state: Arc<Mutex<TestClockState>>,
}

impl fmt::Debug for TestClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestClock").finish_non_exhaustive()
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TestClock {
    /// Creates a new test clock starting at its construction instant
    /// with zero elapsed offset.
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            state: Arc::new(Mutex::new(TestClockState {
                offset: Duration::ZERO,
                next_seq: 0,
                pending: BinaryHeap::new(),
            })),
        }
    }

    /// Advances the clock by `duration`, firing (in order) every timer
    /// whose deadline falls at or before the new offset.
    pub fn advance(&self, duration: Duration) {
        let callbacks = {
            let mut state = self.state.lock().unwrap();
            state.offset += duration;
            let mut due = Vec::new();
            while let Some(top) = state.pending.peek() {
                if top.due <= state.offset {
                    due.push(state.pending.pop().unwrap());
                } else {
                    break;
                }
            }
            due
        };

        for scheduled in callbacks {
            if scheduled.timer.mark_fired() {
                if let Some(cb) = scheduled.callback.lock().unwrap().take() {
                    cb();
                }
            }
        }
    }

    /// Current accumulated offset since construction.
    pub fn elapsed_offset(&self) -> Duration {
        self.state.lock().unwrap().offset
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed_offset()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.after(
            duration,
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        async move {
            let _ = rx.await;
        }
        .boxed()
    }

    fn after(&self, duration: Duration, callback: TimerCallback) -> Timer {
        let timer = Timer::new();
        let mut state = self.state.lock().unwrap();
        let seq = state.next_seq;
        state.next_seq += 1;
        let due = state.offset + duration;
        state.pending.push(ScheduledTimer {
            due,
            seq,
            timer: timer.clone(),
            callback: Mutex::new(Some(callback)),
        });
        timer
    }
}

/// Monotonically-increasing generation counter.
///
/// Used by [`crate::clock`] consumers (the token bucket's temporary
/// override, primarily) to detect a stale, late-firing timer after a
/// newer override has replaced it — spec §9 "temporary limit race".
#[derive(Debug, Default)]
pub struct Generation(AtomicU64);

impl Generation {
    /// Creates a generation counter starting at zero.
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Bumps to a new generation and returns it.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, AtomicOrdering::AcqRel) + 1
    }

    /// Returns the current generation without bumping it.
    pub fn current(&self) -> u64 {
        self.0.load(AtomicOrdering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AO};

    #[test]
    fn real_clock_now_is_monotonic() {
        let clock = RealClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn test_clock_advance_fires_due_timers_in_order() {
        let clock = TestClock::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = Arc::clone(&order);
        clock.after(Duration::from_millis(10), Box::new(move || o1.lock().unwrap().push(1)));
        let o2 = Arc::clone(&order);
        clock.after(Duration::from_millis(5), Box::new(move || o2.lock().unwrap().push(2)));
        let o3 = Arc::clone(&order);
        clock.after(Duration::from_millis(5), Box::new(move || o3.lock().unwrap().push(3)));

        clock.advance(Duration::from_millis(7));
        assert_eq!(*order.lock().unwrap(), vec![2, 3]);

        clock.advance(Duration::from_millis(5));
        assert_eq!(*order.lock().unwrap(), vec![2, 3, 1]);
    }

    #[test]
    fn timer_stop_before_fire_returns_true_and_suppresses_callback() {
        let clock = TestClock::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        let timer = clock.after(Duration::from_millis(10), Box::new(move || {
            f.fetch_add(1, AO::SeqCst);
        }));

        assert!(timer.stop());
        clock.advance(Duration::from_millis(20));
        assert_eq!(fired.load(AO::SeqCst), 0);
        assert!(!timer.stop());
    }

    #[test]
    fn timer_stop_after_fire_returns_false() {
        let clock = TestClock::new();
        let timer = clock.after(Duration::from_millis(1), Box::new(|| {}));
        clock.advance(Duration::from_millis(1));
        assert!(timer.has_fired());
        assert!(!timer.stop());
    }

    #[tokio::test]
    async fn test_clock_sleep_resolves_on_advance() {
        let clock = TestClock::new();
        let clock_for_advance = clock.clone();
        let sleeper = clock.sleep(Duration::from_millis(50));

        let advancer = tokio::spawn(async move {
            tokio::task::yield_now().await;
            clock_for_advance.advance(Duration::from_millis(50));
        });

        sleeper.await;
        advancer.await.unwrap();
    }

    #[test]
    fn generation_counter_increments() {
        let gen = Generation::new();
        assert_eq!(gen.current(), 0);
        assert_eq!(gen.next(), 1);
        assert_eq!(gen.next(), 2);
        assert_eq!(gen.current(), 2);
    }
}
