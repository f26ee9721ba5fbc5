//! A bounded FIFO of timestamped call samples backing the circuit breaker's
//! failure accounting and the load balancer's least-response-time strategy.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Tag recorded alongside each sample: whether the call succeeded, failed,
/// or was rejected outright (e.g. by an open circuit, never reaching the
/// guarded function).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleOutcome {
    Success,
    Failure,
    Rejected,
}

#[derive(Clone, Copy, Debug)]
struct Sample {
    at: Instant,
    outcome: SampleOutcome,
    latency: Duration,
}

/// Point-in-time aggregate over the retained samples.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindowSnapshot {
    pub success: usize,
    pub failure: usize,
    pub rejected: usize,
    pub total: usize,
    pub failure_rate: f64,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub avg_latency: Duration,
}

/// Fixed-capacity ring of `{ts, outcome, latency_ms}` samples. Eviction by
/// capacity is O(1) (the ring never grows past `capacity`); eviction by
/// horizon is lazy, amortized over reads and writes.
pub struct SlidingWindow {
    capacity: usize,
    horizon: Duration,
    samples: VecDeque<Sample>,
}

impl SlidingWindow {
    pub fn new(capacity: usize, horizon: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            horizon,
            samples: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some(front) = self.samples.front() {
            if now.duration_since(front.at) > self.horizon {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Records one sample, evicting the oldest entry if at capacity and any
    /// entries that have aged out of the horizon.
    pub fn record(&mut self, outcome: SampleOutcome, latency: Duration) {
        let now = Instant::now();
        self.evict_expired(now);
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample {
            at: now,
            outcome,
            latency,
        });
    }

    pub fn len(&mut self) -> usize {
        self.evict_expired(Instant::now());
        self.samples.len()
    }

    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    /// Aggregates the currently retained (non-expired) samples. `rejected`
    /// calls count toward `total` but never toward `failure_rate`'s
    /// denominator in the conventional sense used by the breaker — callers
    /// that need a failure-only rate should use `failure as f64 / (success +
    /// failure) as f64` directly; `failure_rate` here is `failure / total`.
    pub fn snapshot(&mut self) -> WindowSnapshot {
        self.evict_expired(Instant::now());

        let mut success = 0usize;
        let mut failure = 0usize;
        let mut rejected = 0usize;
        let mut latencies: Vec<Duration> = Vec::with_capacity(self.samples.len());
        let mut total_latency = Duration::ZERO;

        for sample in &self.samples {
            match sample.outcome {
                SampleOutcome::Success => success += 1,
                SampleOutcome::Failure => failure += 1,
                SampleOutcome::Rejected => rejected += 1,
            }
            latencies.push(sample.latency);
            total_latency += sample.latency;
        }

        let total = success + failure + rejected;
        let failure_rate = if total == 0 {
            0.0
        } else {
            failure as f64 / total as f64
        };
        let avg_latency = if latencies.is_empty() {
            Duration::ZERO
        } else {
            total_latency / latencies.len() as u32
        };

        latencies.sort_unstable();
        let percentile = |p: f64| -> Duration {
            if latencies.is_empty() {
                return Duration::ZERO;
            }
            let rank = ((p * latencies.len() as f64).ceil() as usize)
                .saturating_sub(1)
                .min(latencies.len() - 1);
            latencies[rank]
        };

        WindowSnapshot {
            success,
            failure,
            rejected,
            total,
            failure_rate,
            p50: percentile(0.50),
            p95: percentile(0.95),
            p99: percentile(0.99),
            avg_latency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_evicts_oldest() {
        let mut w = SlidingWindow::new(2, Duration::from_secs(60));
        w.record(SampleOutcome::Success, Duration::from_millis(1));
        w.record(SampleOutcome::Failure, Duration::from_millis(1));
        w.record(SampleOutcome::Success, Duration::from_millis(1));
        let snap = w.snapshot();
        assert_eq!(snap.total, 2);
        assert_eq!(snap.failure, 0);
    }

    #[test]
    fn failure_rate_reflects_retained_set() {
        let mut w = SlidingWindow::new(10, Duration::from_secs(60));
        for _ in 0..3 {
            w.record(SampleOutcome::Failure, Duration::from_millis(5));
        }
        for _ in 0..7 {
            w.record(SampleOutcome::Success, Duration::from_millis(5));
        }
        let snap = w.snapshot();
        assert!((snap.failure_rate - 0.3).abs() < 1e-9);
    }

    #[test]
    fn empty_window_snapshot_is_zeroed() {
        let mut w = SlidingWindow::new(5, Duration::from_secs(60));
        let snap = w.snapshot();
        assert_eq!(snap.total, 0);
        assert_eq!(snap.failure_rate, 0.0);
        assert_eq!(snap.p99, Duration::ZERO);
    }
}
