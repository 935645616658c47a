//! Stress tests for the concurrency limiter's in-flight accounting.
//!
//! The admit/complete pairing is the limiter's core contract: every `allow`
//! balanced by exactly one `done` must leave the in-flight gauge at zero, no
//! matter how many tasks race through it.

use std::sync::Arc;

use breakwater::{BbrConfig, BbrLimiter};
use tokio::task::JoinSet;

fn limiter_with_cpu(cpu: i64) -> Arc<BbrLimiter> {
    Arc::new(BbrLimiter::with_cpu_getter(
        BbrConfig::default(),
        Arc::new(move || cpu),
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_parallel_round_trips_balance_to_zero() {
    let limiter = limiter_with_cpu(0);

    let mut tasks = JoinSet::new();
    for _ in 0..1000 {
        let limiter = Arc::clone(&limiter);
        tasks.spawn(async move {
            let done = limiter.allow().expect("idle cpu must admit");
            tokio::task::yield_now().await;
            done.done();
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap();
    }

    assert_eq!(limiter.stat().in_flight, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_rejections_never_unbalance_the_gauge() {
    // Saturated CPU: some admissions will be rejected once traffic builds.
    let limiter = limiter_with_cpu(950);

    let mut tasks = JoinSet::new();
    for _ in 0..500 {
        let limiter = Arc::clone(&limiter);
        tasks.spawn(async move {
            match limiter.allow() {
                Ok(done) => {
                    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
                    done.done();
                    true
                }
                Err(_) => false,
            }
        });
    }
    let mut admitted = 0;
    while let Some(result) = tasks.join_next().await {
        if result.unwrap() {
            admitted += 1;
        }
    }

    // Whatever mix of admits and rejects happened, completions balanced out.
    assert!(admitted > 0);
    assert_eq!(limiter.stat().in_flight, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_gauge_never_goes_negative() {
    let limiter = limiter_with_cpu(0);

    let mut tasks = JoinSet::new();
    for _ in 0..200 {
        let limiter = Arc::clone(&limiter);
        tasks.spawn(async move {
            for _ in 0..50 {
                let done = limiter.allow().expect("idle cpu must admit");
                assert!(limiter.stat().in_flight >= 1);
                done.done();
                assert!(limiter.stat().in_flight >= 0);
            }
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap();
    }
    assert_eq!(limiter.stat().in_flight, 0);
}
