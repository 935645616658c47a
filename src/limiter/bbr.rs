//! BBR-style concurrency limiter.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;

use super::cpu::{cpu_ema, CpuGetter};
use crate::error::LimitExceeded;
use crate::window::RollingCounter;

/// How long a started drop regime keeps rejecting after CPU falls back
/// below the threshold.
const DROP_STICKINESS_MS: u64 = 1000;

/// Configuration for [`BbrLimiter`].
#[derive(Debug, Clone)]
pub struct BbrConfig {
    /// Statistical window for the pass/latency counters.
    pub window: Duration,
    /// Number of buckets the window is divided into.
    pub buckets: usize,
    /// CPU saturation threshold on the 0..1000 scale.
    pub cpu_threshold: i64,
}

impl Default for BbrConfig {
    fn default() -> Self {
        BbrConfig {
            window: Duration::from_secs(10),
            buckets: 100,
            cpu_threshold: 800,
        }
    }
}

/// Metrics snapshot of a limiter, for observation.
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    /// Current CPU reading (0..1000).
    pub cpu: i64,
    /// Requests currently in flight.
    pub in_flight: i64,
    /// Estimated maximum in-flight capacity.
    pub max_in_flight: i64,
    /// Minimum per-bucket average latency, in milliseconds.
    pub min_rt: i64,
    /// Maximum per-bucket pass count.
    pub max_pass: i64,
}

struct Inner {
    cpu: CpuGetter,
    pass_stat: RollingCounter,
    rt_stat: RollingCounter,
    in_flight: AtomicI64,
    buckets: usize,
    bucket_ms: u64,
    bucket_per_second: i64,
    cpu_threshold: i64,
    started_at: Instant,
    /// Milliseconds since `started_at` of the drop that opened the current
    /// drop regime; 0 when no regime is active.
    prev_drop_ms: AtomicU64,
    /// Estimator caches, packed as `stamp_ms << 32 | value`; 0 means empty.
    max_pass_cache: AtomicU64,
    min_rt_cache: AtomicU64,
}

/// Concurrency limiter gating on CPU saturation plus estimated capacity.
///
/// The limiter applies Little's law at bucket granularity: the bottleneck
/// throughput is the best per-bucket pass count recently observed, the base
/// latency is the best per-bucket average round-trip, and their product
/// (scaled to one second) estimates how much work the system can keep in
/// flight. Requests are dropped only while the CPU runs above the
/// configured threshold and the in-flight count exceeds that estimate; a
/// one-second stickiness window prevents the decision from oscillating
/// around the threshold.
pub struct BbrLimiter {
    inner: Arc<Inner>,
}

impl BbrLimiter {
    /// Creates a limiter reading CPU load from the process-wide EMA
    /// maintained by [`spawn_cpu_sampler`].
    ///
    /// [`spawn_cpu_sampler`]: super::spawn_cpu_sampler
    pub fn new(config: BbrConfig) -> Self {
        Self::with_cpu_getter(config, Arc::new(cpu_ema))
    }

    /// Creates a limiter with an explicit CPU reader. Tests and embedders
    /// with their own CPU accounting inject deterministic values here.
    pub fn with_cpu_getter(config: BbrConfig, cpu: CpuGetter) -> Self {
        let pass_stat = RollingCounter::new(config.window, config.buckets);
        let bucket_duration = pass_stat.bucket_duration();
        BbrLimiter {
            inner: Arc::new(Inner {
                cpu,
                pass_stat,
                rt_stat: RollingCounter::new(config.window, config.buckets),
                in_flight: AtomicI64::new(0),
                buckets: config.buckets,
                bucket_ms: (bucket_duration.as_millis() as u64).max(1),
                bucket_per_second: (Duration::from_secs(1).as_nanos()
                    / bucket_duration.as_nanos()) as i64,
                cpu_threshold: config.cpu_threshold,
                started_at: Instant::now(),
                prev_drop_ms: AtomicU64::new(0),
                max_pass_cache: AtomicU64::new(0),
                min_rt_cache: AtomicU64::new(0),
            }),
        }
    }

    /// Admits or rejects a unit of work.
    ///
    /// On admission the returned [`Done`] handle must be invoked exactly
    /// once when the work finishes; it records the measured latency and
    /// releases the in-flight slot. Skipping it leaks a slot permanently.
    pub fn allow(&self) -> Result<Done, LimitExceeded> {
        if self.inner.should_drop() {
            return Err(LimitExceeded);
        }
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok(Done {
            inner: Arc::clone(&self.inner),
            started_at: Instant::now(),
        })
    }

    /// Snapshot of the limiter's current estimates.
    pub fn stat(&self) -> Stat {
        Stat {
            cpu: (self.inner.cpu)(),
            in_flight: self.inner.in_flight.load(Ordering::SeqCst),
            max_in_flight: self.inner.max_in_flight(),
            min_rt: self.inner.min_rt(),
            max_pass: self.inner.max_pass(),
        }
    }
}

/// One-shot completion handle returned by [`BbrLimiter::allow`].
#[must_use = "the handle must be invoked when the admitted work finishes"]
pub struct Done {
    inner: Arc<Inner>,
    started_at: Instant,
}

impl Done {
    /// Reports completion: records the round-trip, counts the pass, and
    /// releases the in-flight slot. Consumes the handle, so reporting twice
    /// is unrepresentable.
    pub fn done(self) {
        let rt_ms = self.started_at.elapsed().as_millis() as f64;
        self.inner.rt_stat.add(rt_ms);
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.inner.pass_stat.add(1.0);
    }
}

impl Inner {
    fn now_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    /// Maximum per-bucket pass count over the completed buckets, floored to
    /// 1 and cached for one bucket duration.
    fn max_pass(&self) -> i64 {
        let now = self.now_ms();
        let packed = self.max_pass_cache.load(Ordering::SeqCst);
        if let Some(cached) = unpack_fresh(packed, now, self.bucket_ms) {
            return cached;
        }
        let completed = self.buckets.saturating_sub(1);
        let raw = self
            .pass_stat
            .reduce(|iter| {
                let mut best = 1.0f64;
                for bucket in iter.take(completed) {
                    best = best.max(bucket.points().iter().sum::<f64>());
                }
                best
            })
            .max(1.0) as i64;
        self.max_pass_cache.store(pack(now, raw), Ordering::SeqCst);
        raw
    }

    /// Minimum per-bucket average round-trip over the completed buckets, in
    /// milliseconds, with a floor of 1 and cached for one bucket duration.
    fn min_rt(&self) -> i64 {
        let now = self.now_ms();
        let packed = self.min_rt_cache.load(Ordering::SeqCst);
        if let Some(cached) = unpack_fresh(packed, now, self.bucket_ms) {
            return cached;
        }
        let completed = self.buckets.saturating_sub(1);
        let best = self.rt_stat.reduce(|iter| {
            let mut best = f64::MAX;
            for bucket in iter.take(completed) {
                if bucket.count() == 0 {
                    continue;
                }
                let avg = bucket.points().iter().sum::<f64>() / bucket.count() as f64;
                best = best.min(avg);
            }
            best
        });
        // An empty latency window reads as "no evidence of pressure".
        let raw = if best < u32::MAX as f64 {
            (best.ceil() as i64).max(1)
        } else {
            i64::from(u32::MAX)
        };
        self.min_rt_cache.store(pack(now, raw), Ordering::SeqCst);
        raw
    }

    /// Little's law at bucket grain: capacity = throughput x latency.
    fn max_in_flight(&self) -> i64 {
        let estimate = self.max_pass() as f64 * self.min_rt() as f64 * self.bucket_per_second as f64
            / 1000.0;
        estimate.round() as i64
    }

    fn should_drop(&self) -> bool {
        let now = self.now_ms();
        if (self.cpu)() < self.cpu_threshold {
            let prev_drop = self.prev_drop_ms.load(Ordering::SeqCst);
            if prev_drop == 0 {
                return false;
            }
            if now.saturating_sub(prev_drop) <= DROP_STICKINESS_MS {
                // Still inside the drop regime: keep shedding the excess.
                let in_flight = self.in_flight.load(Ordering::SeqCst);
                return in_flight > 1 && in_flight > self.max_in_flight();
            }
            self.prev_drop_ms.store(0, Ordering::SeqCst);
            debug!("concurrency limiter left drop regime");
            return false;
        }
        let in_flight = self.in_flight.load(Ordering::SeqCst);
        let drop = in_flight > 1 && in_flight > self.max_in_flight();
        if drop && self.prev_drop_ms.load(Ordering::SeqCst) == 0 {
            debug!(
                "concurrency limiter started dropping: {} in flight over estimated capacity",
                in_flight
            );
            self.prev_drop_ms.store(now.max(1), Ordering::SeqCst);
        }
        drop
    }
}

fn pack(stamp_ms: u64, value: i64) -> u64 {
    ((stamp_ms as u32 as u64) << 32) | value.clamp(0, i64::from(u32::MAX)) as u64
}

fn unpack_fresh(packed: u64, now_ms: u64, bucket_ms: u64) -> Option<i64> {
    if packed == 0 {
        return None;
    }
    let stamp = packed >> 32;
    let now = now_ms as u32 as u64;
    if now >= stamp && now - stamp < bucket_ms {
        Some((packed & u64::from(u32::MAX)) as i64)
    } else {
        None
    }
}
