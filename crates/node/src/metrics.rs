//! Latency and throughput of completed client requests.

use byzshard_messages::PerformanceReport;
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Highest latency tracked exactly; larger samples are clamped.
const MAX_TRACKED_LATENCY_MS: u64 = 60 * 60 * 1000;

/// Samples kept for windowed reports.
const RECENT_CAPACITY: usize = 100_000;

#[derive(Debug, Clone, Copy)]
struct Sample {
    started_ms: u64,
    finished_ms: u64,
}

impl Sample {
    fn latency_ms(&self) -> u64 {
        self.finished_ms.saturating_sub(self.started_ms)
    }
}

#[derive(Debug)]
struct Inner {
    all: Histogram<u64>,
    total_latency_ms: u64,
    first_started_ms: Option<u64>,
    last_finished_ms: u64,
    recent: VecDeque<Sample>,
}

/// Recorder for request latencies.
///
/// Latency runs from the transaction's creation to the client reply.
#[derive(Debug)]
pub struct Metrics {
    inner: Mutex<Inner>,
}

impl Metrics {
    /// Create an empty recorder.
    pub fn new() -> Result<Self, hdrhistogram::CreationError> {
        let all = Histogram::new_with_bounds(1, MAX_TRACKED_LATENCY_MS, 3)?;
        Ok(Self {
            inner: Mutex::new(Inner {
                all,
                total_latency_ms: 0,
                first_started_ms: None,
                last_finished_ms: 0,
                recent: VecDeque::with_capacity(1024),
            }),
        })
    }

    /// Record one completed request.
    pub fn record(&self, started_ms: u64, finished_ms: u64) {
        let sample = Sample {
            started_ms,
            finished_ms: finished_ms.max(started_ms),
        };
        let mut inner = self.inner.lock();
        inner.all.saturating_record(sample.latency_ms().max(1));
        inner.total_latency_ms += sample.latency_ms();
        inner.first_started_ms = Some(
            inner
                .first_started_ms
                .map_or(sample.started_ms, |first| first.min(sample.started_ms)),
        );
        inner.last_finished_ms = inner.last_finished_ms.max(sample.finished_ms);
        if inner.recent.len() == RECENT_CAPACITY {
            inner.recent.pop_front();
        }
        inner.recent.push_back(sample);
    }

    /// Number of requests recorded.
    pub fn count(&self) -> u64 {
        self.inner.lock().all.len()
    }

    /// Report over every recorded request.
    pub fn report(&self) -> PerformanceReport {
        let inner = self.inner.lock();
        let count = inner.all.len();
        match inner.first_started_ms {
            Some(first) if count > 0 => PerformanceReport {
                count,
                total_latency_ms: inner.total_latency_ms,
                mean_latency_ms: inner.total_latency_ms as f64 / count as f64,
                p99_latency_ms: inner.all.value_at_quantile(0.99),
                throughput: throughput(count, first, inner.last_finished_ms),
            },
            _ => PerformanceReport::empty(),
        }
    }

    /// Report over the most recent `n` requests.
    pub fn report_last(&self, n: usize) -> PerformanceReport {
        let inner = self.inner.lock();
        let take = n.min(inner.recent.len());
        if take == 0 {
            return PerformanceReport::empty();
        }
        let window = inner.recent.iter().skip(inner.recent.len() - take);

        let mut histogram = Histogram::<u64>::new_from(&inner.all);
        let mut total = 0u64;
        let mut first = u64::MAX;
        let mut last = 0u64;
        for sample in window {
            histogram.saturating_record(sample.latency_ms().max(1));
            total += sample.latency_ms();
            first = first.min(sample.started_ms);
            last = last.max(sample.finished_ms);
        }
        let count = take as u64;
        PerformanceReport {
            count,
            total_latency_ms: total,
            mean_latency_ms: total as f64 / count as f64,
            p99_latency_ms: histogram.value_at_quantile(0.99),
            throughput: throughput(count, first, last),
        }
    }
}

/// Requests per second between the first start and the last finish.
fn throughput(count: u64, first_started_ms: u64, last_finished_ms: u64) -> f64 {
    let span_ms = last_finished_ms.saturating_sub(first_started_ms).max(1);
    count as f64 * 1000.0 / span_ms as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_report() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.report(), PerformanceReport::empty());
        assert_eq!(metrics.report_last(10), PerformanceReport::empty());
    }

    #[test]
    fn test_report_over_all_requests() {
        let metrics = Metrics::new().unwrap();
        metrics.record(1_000, 1_100);
        metrics.record(1_000, 1_300);
        metrics.record(1_500, 2_000);

        let report = metrics.report();
        assert_eq!(report.count, 3);
        assert_eq!(report.total_latency_ms, 900);
        assert!((report.mean_latency_ms - 300.0).abs() < f64::EPSILON);
        // Three requests over one second.
        assert!((report.throughput - 3.0).abs() < 1e-9);
        assert!(report.p99_latency_ms >= 499 && report.p99_latency_ms <= 501);
    }

    #[test]
    fn test_benchmark_window_uses_latest_requests() {
        let metrics = Metrics::new().unwrap();
        metrics.record(0, 5_000);
        metrics.record(10_000, 10_010);
        metrics.record(10_000, 10_030);

        let report = metrics.report_last(2);
        assert_eq!(report.count, 2);
        assert_eq!(report.total_latency_ms, 40);
        // The window's own histogram excludes the 5s outlier.
        assert!((30..=31).contains(&report.p99_latency_ms));
        assert_eq!(metrics.report_last(50).count, 3);
        assert_eq!(metrics.count(), 3);
    }

    #[test]
    fn test_clock_skew_clamped() {
        let metrics = Metrics::new().unwrap();
        metrics.record(2_000, 1_000);
        assert_eq!(metrics.report().total_latency_ms, 0);
    }
}
