//! Cross-component scenarios: a worker pool submitting tasks that acquire a
//! semaphore permit, consult a rate limiter, and call through a circuit
//! breaker, the way spec §2's "control flow" paragraph describes. None of
//! the per-crate unit test suites exercise this combination, since each one
//! only drives its own primitive in isolation.

use ion::circuitbreaker::{CircuitBreakerConfig, CircuitState};
use ion::core::{Ctx, Rate, TestClock};
use ion::ratelimiter::TokenBucketConfig;
use ion::semaphore::SemaphoreConfig;
use ion::workerpool::{TaskError, WorkerPoolConfig};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A pool task that fans out through a semaphore, a rate limiter, and a
/// circuit breaker before "calling" a downstream effect, mirroring the
/// order spec §4.4 and §4.7 each expect: acquire capacity, then check the
/// budget, then guard the call itself.
#[tokio::test(flavor = "multi_thread")]
async fn pool_task_chains_semaphore_limiter_and_breaker() {
    let clock = Arc::new(TestClock::new());

    let sem = Arc::new(
        SemaphoreConfig::builder()
            .name("downstream-conns")
            .capacity(2)
            .build(),
    );

    let bucket = Arc::new(
        TokenBucketConfig::builder()
            .name("downstream-rps")
            .rate(Rate::per(1_000, Duration::from_secs(1)).unwrap())
            .burst(10.0)
            .build(),
    );

    let breaker = Arc::new(
        CircuitBreakerConfig::builder()
            .name("downstream-call")
            .failure_threshold(2)
            .recovery_timeout(Duration::from_millis(100))
            .half_open_max_requests(1)
            .half_open_success_threshold(1)
            .clock(clock.clone())
            .build(),
    );

    // The first two calls fail, tripping the breaker; the third (after the
    // recovery timeout) succeeds.
    let remaining_failures = Arc::new(AtomicUsize::new(2));
    let completed = Arc::new(AtomicU32::new(0));

    let pool = WorkerPoolConfig::builder()
        .name("downstream-workers")
        .size(1)
        .queue_capacity(4)
        .build();

    let ctx = Ctx::new();

    for _ in 0..2 {
        let sem = sem.clone();
        let bucket = bucket.clone();
        let breaker = breaker.clone();
        let remaining_failures = remaining_failures.clone();
        let completed = completed.clone();
        pool.submit(&ctx, move |task_ctx| async move {
            sem.acquire(&task_ctx, 1).await?;
            assert!(bucket.allow_n(1), "budget should not be exhausted yet");
            let result = breaker
                .execute(&task_ctx, |_ctx| async {
                    if remaining_failures.fetch_sub(1, Ordering::SeqCst) > 0 {
                        Err(std::io::Error::other("downstream unavailable"))
                    } else {
                        Ok(())
                    }
                })
                .await;
            sem.release(1);
            completed.fetch_add(1, Ordering::SeqCst);
            // The breaker's own rejection/failure is business-level here,
            // not a pool-level failure: the task itself ran to completion.
            let _ = result;
            Ok(())
        })
        .await
        .unwrap();
    }

    pool.drain(&ctx).await.unwrap();
    assert_eq!(completed.load(Ordering::SeqCst), 2);
    assert_eq!(sem.available(), 2, "permits must be fully returned between tasks");
    assert_eq!(breaker.state(), CircuitState::Open);

    // No timer fires this; the breaker evaluates its recovery timeout
    // lazily on the next admission attempt (spec §4.7).
    clock.advance(Duration::from_millis(100));

    let sem2 = sem.clone();
    let bucket2 = bucket.clone();
    let breaker2 = breaker.clone();
    let completed2 = completed.clone();
    pool.submit(&ctx, move |task_ctx| async move {
        sem2.acquire(&task_ctx, 1).await?;
        assert!(bucket2.allow_n(1));
        let result: Result<(), TaskError> = breaker2
            .execute(&task_ctx, |_ctx| async { Ok::<_, std::io::Error>(()) })
            .await
            .map_err(|e| Box::new(e) as TaskError);
        sem2.release(1);
        completed2.fetch_add(1, Ordering::SeqCst);
        result
    })
    .await
    .unwrap();

    pool.drain(&ctx).await.unwrap();
    assert_eq!(completed.load(Ordering::SeqCst), 3);
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(pool.metrics().completed, 3);
    assert_eq!(pool.metrics().failed, 0);
}

/// A denied global tier must stop a multi-tier check before it ever
/// consults the route tier underneath it, combined here with a pool
/// draining its queue once the shared budget is gone (spec §8 property 10).
#[tokio::test(flavor = "multi_thread")]
async fn pool_tasks_share_a_single_rate_budget() {
    let bucket = Arc::new(
        TokenBucketConfig::builder()
            .name("shared-budget")
            .rate(Rate::per(0, Duration::from_secs(1)).unwrap())
            .burst(3.0)
            .build(),
    );

    let admitted = Arc::new(AtomicU32::new(0));
    let denied = Arc::new(AtomicU32::new(0));

    let pool = WorkerPoolConfig::builder()
        .name("shared-budget-workers")
        .size(4)
        .queue_capacity(8)
        .build();

    let ctx = Ctx::new();
    for _ in 0..6 {
        let bucket = bucket.clone();
        let admitted = admitted.clone();
        let denied = denied.clone();
        pool.submit(&ctx, move |_task_ctx| async move {
            if bucket.allow_n(1) {
                admitted.fetch_add(1, Ordering::SeqCst);
            } else {
                denied.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        })
        .await
        .unwrap();
    }

    pool.drain(&ctx).await.unwrap();
    assert_eq!(admitted.load(Ordering::SeqCst), 3, "burst caps admissions across all workers");
    assert_eq!(denied.load(Ordering::SeqCst), 3);
    assert_eq!(pool.metrics().completed, 6, "denial is a business outcome, not a task failure");
}
