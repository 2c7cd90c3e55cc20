//! A concurrency toolkit for in-process resource and traffic control.
//!
//! `ion` supplies four coupled primitives that interlock the way production
//! services actually use them: a worker pool submits tasks that consult a
//! rate limiter and/or acquire semaphore permits, and calls to external
//! effects are wrapped by a circuit breaker. Each primitive is available as
//! its own crate and as a feature of this meta-crate.
//!
//! # Quick Start
//!
//! ```toml
//! [dependencies]
//! ion = { version = "0.1", features = ["workerpool", "circuitbreaker"] }
//! ```
//!
//! # Components
//!
//! - **[Worker Pool]** - Bounded-concurrency task executor with graceful shutdown
//! - **[Weighted Semaphore]** - Capacity-bounded permit broker with explicit fairness
//! - **[Rate Limiters]** - Token bucket, leaky bucket, and a multi-tier limiter
//! - **[Circuit Breaker]** - Three-state failure detector with automatic recovery
//!
//! [Worker Pool]: #worker-pool
//! [Weighted Semaphore]: #weighted-semaphore
//! [Rate Limiters]: #rate-limiters
//! [Circuit Breaker]: #circuit-breaker
//!
//! All four share [`core::Clock`] for time and [`core::Ctx`] for cooperative
//! cancellation, and report through the same [`core::Observability`]
//! contract, so swapping a real clock for [`core::TestClock`] in tests makes
//! every one of them deterministic.
//!
//! # Component Guides
//!
//! ## Worker Pool
//!
//! A bounded pool of workers draining a task queue, with an explicit
//! `Running → Draining → Closed` lifecycle instead of the implicit shutdown
//! most executors leave to `Drop`.
//!
//! ### When to Use
//!
//! - **Bounding fan-out**: Cap how many tasks run concurrently against a
//!   downstream dependency
//! - **Graceful shutdown**: Stop accepting new work but let in-flight tasks
//!   finish before the process exits
//! - **Panic isolation**: One task panicking should not take down its
//!   siblings or the pool itself
//!
//! ### Trade-offs
//!
//! - **Queue depth vs backpressure**: A larger `queue_capacity` smooths
//!   bursts but delays backpressure reaching the caller
//! - **Fixed size**: The pool does not resize after construction; size it
//!   for steady-state load, not peaks
//!
//! ### Anti-Patterns
//!
//! ❌ **Calling `close` and assuming queued tasks ran**: `close` aborts the
//! drain immediately.
//! ✅ Call `drain` first to let the queue empty, then `close`.
//!
//! ### Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "workerpool")]
//! # {
//! use ion::workerpool::WorkerPoolConfig;
//!
//! # async fn example() {
//! let pool = WorkerPoolConfig::builder()
//!     .name("fetchers")
//!     .size(8)
//!     .queue_capacity(64)
//!     .build();
//!
//! let ctx = ion::core::Ctx::new();
//! pool.submit(&ctx, |_ctx| async { Ok(()) }).await.unwrap();
//! # }
//! # }
//! ```
//!
//! ## Weighted Semaphore
//!
//! A permit broker where a waiter can request more than one permit at a
//! time, with a configurable queue discipline for who gets served next.
//!
//! ### When to Use
//!
//! - **Heterogeneous resource costs**: A batch job that needs 4 permits
//!   should queue behind, not jump ahead of, one that needs 1
//! - **Strict ordering**: FIFO fairness guarantees the head of the queue is
//!   never starved, at the cost of head-of-line blocking
//!
//! ### Trade-offs
//!
//! - **Fifo** is starvation-free but a large waiter at the head blocks
//!   everyone behind it
//! - **Lifo** favors recently-enqueued waiters, useful for shedding load
//!   under sustained overload
//! - **Unfair** maximizes throughput but can starve a large-weight waiter
//!   indefinitely; avoid it for correctness-critical workloads
//!
//! ### Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "semaphore")]
//! # {
//! use ion::semaphore::{Fairness, SemaphoreConfig};
//!
//! # async fn example() {
//! let sem = SemaphoreConfig::builder()
//!     .capacity(10)
//!     .fairness(Fairness::Fifo)
//!     .build();
//!
//! let ctx = ion::core::Ctx::new();
//! sem.acquire(&ctx, 3).await.unwrap();
//! sem.release(3);
//! # }
//! # }
//! ```
//!
//! ## Rate Limiters
//!
//! Token bucket for burst-tolerant shaping, leaky bucket for smoothing, and
//! a multi-tier limiter that layers a global bucket over per-route and
//! per-resource buckets keyed off the request itself.
//!
//! ### When to Use
//!
//! - **Token bucket**: Allow bursts up to a cap while holding a long-run
//!   average rate
//! - **Leaky bucket**: Smooth a bursty producer into a steady output rate
//! - **Multi-tier**: Protect a shared upstream globally while still giving
//!   each route or resource its own budget
//!
//! ### Anti-Patterns
//!
//! ❌ **Polling `allow_n` in a tight loop to wait for tokens**: burns CPU and
//! starves the refill accounting of wall-clock accuracy.
//! ✅ Use `wait_n`, which sleeps through the same clock the bucket refills
//! against.
//!
//! ### Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "ratelimiter")]
//! # {
//! use ion::ratelimiter::TokenBucketConfig;
//! use ion::core::Rate;
//!
//! # async fn example() {
//! let bucket = TokenBucketConfig::builder()
//!     .rate(Rate::per(100, std::time::Duration::from_secs(1)).unwrap())
//!     .burst(20.0)
//!     .build();
//!
//! if bucket.allow_n(1) {
//!     // proceed
//! }
//! # }
//! # }
//! ```
//!
//! ## Circuit Breaker
//!
//! Trips from `Closed` to `Open` after consecutive failures, admits a
//! bounded number of trial calls in `HalfOpen` once the recovery timeout has
//! elapsed, and closes again once enough of those trials succeed.
//!
//! ### When to Use
//!
//! - **Failing downstream dependencies**: Stop hammering a service that is
//!   already struggling
//! - **Wrapping pool tasks**: Combine with the worker pool so a failing
//!   dependency sheds load before its queue backs up
//!
//! ### Anti-Patterns
//!
//! ❌ **Treating `Open` as a retry signal**: the breaker doesn't retry on
//! your behalf.
//! ✅ Pair it with your own retry/backoff layer above the call site.
//!
//! ### Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "circuitbreaker")]
//! # {
//! use ion::circuitbreaker::CircuitBreakerConfig;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let breaker = CircuitBreakerConfig::builder()
//!     .failure_threshold(5)
//!     .recovery_timeout(Duration::from_secs(30))
//!     .build();
//!
//! let ctx = ion::core::Ctx::new();
//! let result = breaker
//!     .execute(&ctx, |_ctx| async { Ok::<_, std::io::Error>(()) })
//!     .await;
//! let _ = result;
//! # }
//! # }
//! ```

pub use ion_core as core;

#[cfg(feature = "circuitbreaker")]
pub use ion_circuitbreaker as circuitbreaker;

#[cfg(feature = "ratelimiter")]
pub use ion_ratelimiter as ratelimiter;

#[cfg(feature = "semaphore")]
pub use ion_semaphore as semaphore;

#[cfg(feature = "workerpool")]
pub use ion_workerpool as workerpool;
