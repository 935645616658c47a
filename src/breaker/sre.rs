//! SRE adaptive-throttling breaker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::Outcome;
use crate::error::NotAllowed;
use crate::window::RollingCounter;

/// Advisory breaker state.
///
/// The state reflects whether the breaker is currently in its rejecting
/// regime. It is maintained for observation (dashboards, logs) only; the
/// admission decision never reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// The breaker is actively rejecting a share of requests.
    Open,
    /// Traffic is healthy; requests pass through.
    Closed,
}

/// Configuration for [`SreBreaker`].
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Statistical window covered by the breaker.
    pub window: Duration,
    /// Number of buckets the window is divided into.
    pub buckets: usize,
    /// Minimum requests in the window before the breaker may reject.
    pub min_requests: u64,
    /// Sensitivity constant. Lowering K makes throttling more aggressive,
    /// raising it more lenient.
    pub k: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        BreakerConfig {
            window: Duration::from_secs(3),
            buckets: 10,
            min_requests: 100,
            k: 1.5,
        }
    }
}

/// Adaptive circuit breaker driven by the client-side accept ratio.
///
/// Every attempt is recorded into a rolling window: successes as `1`,
/// failures as `0`. [`allow`] admits unconditionally while the window holds
/// fewer than `min_requests` samples or while `total < K * accepts`; beyond
/// that it rejects with probability `(total - K * accepts) / (total + 1)`.
///
/// Local rejections are recorded as failures too: the extra `total` raises
/// the rejection probability further, which is the mechanism that lets the
/// breaker shed most traffic while the backend is drowning.
///
/// [`allow`]: SreBreaker::allow
pub struct SreBreaker {
    stat: RollingCounter,
    // The PRNG is not Sync; a dedicated lock keeps `allow` callable from any
    // thread.
    rng: Mutex<StdRng>,
    k: f64,
    min_requests: u64,
    open: AtomicBool,
}

impl SreBreaker {
    /// Creates a breaker with the given configuration.
    pub fn new(config: BreakerConfig) -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos() as u64 ^ d.as_secs())
            .unwrap_or(0);
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    pub(crate) fn with_rng(config: BreakerConfig, rng: StdRng) -> Self {
        SreBreaker {
            stat: RollingCounter::new(config.window, config.buckets),
            rng: Mutex::new(rng),
            k: config.k,
            min_requests: config.min_requests,
            open: AtomicBool::new(false),
        }
    }

    /// Decides whether a request may proceed.
    ///
    /// On rejection the caller must not invoke the guarded work, and the
    /// rejection itself is recorded as a failure.
    pub fn allow(&self) -> Result<(), NotAllowed> {
        let (accepts, total) = self.summary();
        let weighted = self.k * accepts;

        if total < self.min_requests || (total as f64) < weighted {
            if self
                .open
                .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                info!("circuit breaker closed: traffic healthy again");
            }
            return Ok(());
        }
        if self
            .open
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            warn!(
                "circuit breaker open: {} accepts out of {} requests in window",
                accepts as u64, total
            );
        }

        let probability = ((total as f64 - weighted) / (total + 1) as f64).max(0.0);
        if self.true_on_probability(probability) {
            debug!("circuit breaker rejected request (p = {:.3})", probability);
            self.mark_failed();
            return Err(NotAllowed);
        }
        Ok(())
    }

    /// Records a successful request.
    pub fn mark_success(&self) {
        self.stat.add(1.0);
    }

    /// Records a failed request.
    ///
    /// Local rejections are recorded through this path too, inflating
    /// `total` and thereby raising the rejection probability.
    pub fn mark_failed(&self) {
        self.stat.add(0.0);
    }

    /// Records a business-level [`Outcome`].
    pub fn mark(&self, outcome: Outcome) {
        match outcome {
            Outcome::Success | Outcome::Ignore => self.mark_success(),
            Outcome::Failure | Outcome::Drop => self.mark_failed(),
        }
    }

    /// Current advisory state.
    pub fn state(&self) -> State {
        if self.open.load(Ordering::SeqCst) {
            State::Open
        } else {
            State::Closed
        }
    }

    /// Sums the window: accepted requests (point values) and total attempts
    /// (sample counts).
    fn summary(&self) -> (f64, u64) {
        let mut accepts = 0.0;
        let mut total = 0u64;
        self.stat.reduce(|iter| {
            for bucket in iter {
                total += bucket.count();
                accepts += bucket.points().iter().sum::<f64>();
            }
            0.0
        });
        (accepts, total)
    }

    fn true_on_probability(&self, probability: f64) -> bool {
        self.rng.lock().gen::<f64>() < probability
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Finds a seed whose first draw satisfies `want`, so probabilistic
    /// decisions become deterministic.
    fn seed_where<F: Fn(f64) -> bool>(want: F) -> StdRng {
        for seed in 0..10_000 {
            let mut rng = StdRng::seed_from_u64(seed);
            if want(rng.gen::<f64>()) {
                return StdRng::seed_from_u64(seed);
            }
        }
        panic!("no seed found");
    }

    fn breaker_with_rng(rng: StdRng) -> SreBreaker {
        SreBreaker::with_rng(BreakerConfig::default(), rng)
    }

    #[test]
    fn test_below_request_floor_always_admits() {
        let breaker = SreBreaker::new(BreakerConfig::default());
        for _ in 0..99 {
            breaker.mark_failed();
        }
        // 99 failures, still under the floor of 100.
        assert!(breaker.allow().is_ok());
        assert_eq!(breaker.state(), State::Closed);
    }

    #[test]
    fn test_unlucky_draw_rejects_at_floor() {
        // 99 failures + 1 success: total = 100, accepts = 1,
        // p = (100 - 1.5) / 101, roughly 0.975.
        let breaker = breaker_with_rng(seed_where(|u| u < 0.9));
        for _ in 0..99 {
            breaker.mark_failed();
        }
        breaker.mark_success();
        assert_eq!(breaker.allow(), Err(NotAllowed));
        assert_eq!(breaker.state(), State::Open);
    }

    #[test]
    fn test_lucky_draw_admits_at_floor() {
        let breaker = breaker_with_rng(seed_where(|u| u > 0.99));
        for _ in 0..99 {
            breaker.mark_failed();
        }
        breaker.mark_success();
        assert!(breaker.allow().is_ok());
        // The predicate still flags the window as unhealthy.
        assert_eq!(breaker.state(), State::Open);
    }

    #[test]
    fn test_healthy_traffic_short_circuits() {
        let breaker = SreBreaker::new(BreakerConfig::default());
        for _ in 0..1000 {
            breaker.mark_success();
        }
        for _ in 0..100 {
            breaker.mark_failed();
        }
        // total = 1100 < 1.5 * 1000: admitted without drawing.
        for _ in 0..50 {
            assert!(breaker.allow().is_ok());
        }
        assert_eq!(breaker.state(), State::Closed);
    }

    #[test]
    fn test_rejection_probability_is_monotonic() {
        let p = |accepts: f64, total: u64, k: f64| -> f64 {
            ((total as f64 - k * accepts) / (total + 1) as f64).max(0.0)
        };
        // Non-decreasing in total for fixed accepts.
        let mut prev = 0.0;
        for total in 100..2000 {
            let cur = p(50.0, total, 1.5);
            assert!(cur >= prev);
            assert!((0.0..1.0).contains(&cur));
            prev = cur;
        }
        // Non-increasing in accepts for fixed total.
        let mut prev = 1.0;
        for accepts in 0..1000 {
            let cur = p(accepts as f64, 1000, 1.5);
            assert!(cur <= prev);
            assert!((0.0..1.0).contains(&cur));
            prev = cur;
        }
    }

    #[test]
    fn test_local_rejections_inflate_total() {
        let breaker = breaker_with_rng(seed_where(|u| u < 0.5));
        for _ in 0..200 {
            breaker.mark_failed();
        }
        let (_, total_before) = breaker.summary();
        assert_eq!(breaker.allow(), Err(NotAllowed));
        let (_, total_after) = breaker.summary();
        // The rejection itself was recorded as a failure.
        assert_eq!(total_after, total_before + 1);
    }

    #[test]
    fn test_mark_outcome_mapping() {
        let breaker = SreBreaker::new(BreakerConfig::default());
        breaker.mark(Outcome::Success);
        breaker.mark(Outcome::Ignore);
        breaker.mark(Outcome::Failure);
        breaker.mark(Outcome::Drop);
        let (accepts, total) = breaker.summary();
        assert_eq!(accepts, 2.0);
        assert_eq!(total, 4);
    }

    #[test]
    fn test_state_recovers_after_window_slides() {
        let breaker = SreBreaker::with_rng(
            BreakerConfig {
                window: Duration::from_millis(200),
                buckets: 10,
                min_requests: 10,
                k: 1.5,
            },
            seed_where(|u| u < 0.5),
        );
        for _ in 0..50 {
            breaker.mark_failed();
        }
        assert_eq!(breaker.allow(), Err(NotAllowed));
        assert_eq!(breaker.state(), State::Open);
        // Once the failures age out the breaker admits again.
        std::thread::sleep(Duration::from_millis(250));
        assert!(breaker.allow().is_ok());
        assert_eq!(breaker.state(), State::Closed);
    }
}
