//! Process-wide CPU utilization average.
//!
//! A single background task samples an injected CPU provider every 500 ms
//! and folds the reading into an exponential moving average shared by every
//! limiter in the process. The provider reports thousandths of total
//! utilization across the cores the process may use (0..1000), however it
//! obtains that figure; this crate deliberately knows nothing about
//! `/proc` or cgroups.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use once_cell::sync::OnceCell;
use tokio_util::sync::CancellationToken;

/// Reader for the current CPU load, on a 0..1000 scale.
pub type CpuGetter = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Smoothing factor: each new sample contributes 5%.
const EMA_DECAY: f64 = 0.95;

/// Matches the cadence of typical CPU accounting sources.
const SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

static CPU_EMA: AtomicI64 = AtomicI64::new(0);
static SAMPLER: OnceCell<CancellationToken> = OnceCell::new();

/// Current process-wide CPU EMA (0..1000).
///
/// Returns 0 until [`spawn_cpu_sampler`] has been started and produced its
/// first sample, which reads as "unloaded" and keeps limiters permissive.
pub fn cpu_ema() -> i64 {
    CPU_EMA.load(Ordering::Relaxed)
}

/// Starts the process-wide CPU sampler, once.
///
/// The first call spawns the background task onto the current Tokio runtime
/// and returns its cancellation token; later calls are no-ops returning the
/// same token. A panic in the provider is caught and logged, and sampling
/// continues on the next tick.
pub fn spawn_cpu_sampler<P>(provider: P) -> CancellationToken
where
    P: Fn() -> i64 + Send + Sync + 'static,
{
    SAMPLER
        .get_or_init(|| {
            let token = CancellationToken::new();
            tokio::spawn(sampler_loop(Arc::new(provider), token.clone()));
            debug!("cpu sampler started ({}ms cadence)", SAMPLE_INTERVAL.as_millis());
            token
        })
        .clone()
}

async fn sampler_loop(provider: CpuGetter, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match catch_unwind(AssertUnwindSafe(|| provider())) {
                    Ok(sample) => record_sample(sample),
                    Err(_) => warn!("cpu provider panicked; sampler continues"),
                }
            }
            _ = shutdown.cancelled() => {
                debug!("cpu sampler shutting down");
                break;
            }
        }
    }
}

fn record_sample(sample: i64) {
    let next = fold(CPU_EMA.load(Ordering::Relaxed), sample);
    CPU_EMA.store(next, Ordering::Relaxed);
}

/// One EMA step: `ema = prev * 0.95 + sample * 0.05`.
fn fold(prev: i64, sample: i64) -> i64 {
    let sample = sample.clamp(0, 1000);
    (prev as f64 * EMA_DECAY + sample as f64 * (1.0 - EMA_DECAY)).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_ema_converges_towards_samples() {
        let mut ema = 0;
        for _ in 0..200 {
            ema = fold(ema, 1000);
        }
        assert!(ema > 990);
        for _ in 0..200 {
            ema = fold(ema, 0);
        }
        assert!(ema < 10);
    }

    #[test]
    fn test_samples_are_clamped_to_scale() {
        let mut ema = 0;
        for _ in 0..500 {
            ema = fold(ema, 50_000);
        }
        assert!(ema <= 1000);
    }

    #[test]
    fn test_single_sample_moves_five_percent() {
        assert_eq!(fold(0, 1000), 50);
        assert_eq!(fold(800, 0), 760);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sampler_survives_panicking_provider() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_provider = Arc::clone(&calls);
        let token = CancellationToken::new();
        let loop_token = token.clone();
        let handle = tokio::spawn(sampler_loop(
            Arc::new(move || {
                let n = calls_in_provider.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    panic!("probe failed");
                }
                700
            }),
            loop_token,
        ));

        // Enough ticks for the two panics plus several good samples.
        tokio::time::sleep(Duration::from_millis(2600)).await;
        token.cancel();
        handle.await.unwrap();

        assert!(calls.load(Ordering::SeqCst) >= 4);
        assert!(cpu_ema() > 0);
    }
}
