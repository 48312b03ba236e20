//! Log-scale histogram of query latency keyed by result-set size.
//!
//! Result sizes fall into buckets whose boundaries follow the sequence
//! `1, 2, 5, 10, 20, 50, ...`. Workers record one [`QuerySample`] per query
//! into a shared [`LatencyHistogram`]; once every worker has finished the
//! histogram is consumed into a [`HistogramReport`] for rendering.

use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

const STEPS: [u64; 3] = [1, 2, 5];

/// Map a result-set size to its bucket index.
///
/// # Examples
/// ```
/// use geoload_core::bucket_index;
///
/// assert_eq!(bucket_index(0), 0);
/// assert_eq!(bucket_index(1), 1);
/// assert_eq!(bucket_index(25), 7);
/// assert_eq!(bucket_index(100), 8);
/// ```
pub fn bucket_index(size: u64) -> usize {
    if size == 0 {
        return 0;
    }
    let mut decade = 0;
    let mut base = 1_u64;
    while size / base >= 10 {
        base *= 10;
        decade += 1;
    }
    let offset = if size == base {
        1
    } else if size <= base.saturating_mul(2) {
        2
    } else if size <= base.saturating_mul(5) {
        3
    } else {
        4
    };
    if decade == 0 {
        offset
    } else {
        decade * 3 + offset + 1
    }
}

// Boundary `k` of the sequence 1, 2, 5, 10, 20, 50, ...
fn boundary(k: usize) -> u64 {
    let exponent = u32::try_from(k / 3).unwrap_or(u32::MAX);
    10_u64
        .saturating_pow(exponent)
        .saturating_mul(STEPS[k % 3])
}

/// Human-readable range covered by bucket `index`.
///
/// # Examples
/// ```
/// use geoload_core::bucket_label;
///
/// assert_eq!(bucket_label(0), "[0]");
/// assert_eq!(bucket_label(7), "(20 - 50]");
/// ```
pub fn bucket_label(index: usize) -> String {
    match index {
        0 => "[0]".to_owned(),
        1 => "[1]".to_owned(),
        2 => "(1 - 2]".to_owned(),
        3 => "(2 - 5]".to_owned(),
        4 => "(5 - 10)".to_owned(),
        i => format!("({} - {}]", boundary(i - 3), boundary(i - 2)),
    }
}

/// Measurements for a single query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuerySample {
    /// Number of records returned.
    pub results: u64,
    /// Payload bytes attributed to the returned records.
    pub bytes: u64,
    /// Time from issuing the query to its first callback.
    pub first_result: Duration,
    /// Time from issuing the query to its completion.
    pub total: Duration,
}

/// Running totals for one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BucketStats {
    /// Queries that fell into the bucket.
    pub count: u64,
    /// Sum of first-result latencies.
    pub first_result: Duration,
    /// Sum of total latencies.
    pub total: Duration,
}

impl BucketStats {
    fn mean_ms(sum: Duration, count: u64) -> f64 {
        if count == 0 {
            return 0.0;
        }
        sum.as_secs_f64() * 1000.0 / count as f64
    }

    /// Mean first-result latency in milliseconds.
    pub fn mean_first_result_ms(&self) -> f64 {
        Self::mean_ms(self.first_result, self.count)
    }

    /// Mean total latency in milliseconds.
    pub fn mean_total_ms(&self) -> f64 {
        Self::mean_ms(self.total, self.count)
    }
}

/// Histogram shared by concurrent workers.
///
/// Bucket counters sit behind one mutex; result and byte totals are atomic so
/// they can be bumped without taking the lock.
#[derive(Debug, Default)]
pub struct LatencyHistogram {
    buckets: Mutex<BTreeMap<usize, BucketStats>>,
    results: AtomicU64,
    bytes: AtomicU64,
}

impl LatencyHistogram {
    /// Create an empty histogram.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one query's measurements into the histogram.
    pub fn record(&self, sample: QuerySample) {
        self.results.fetch_add(sample.results, Ordering::Relaxed);
        self.bytes.fetch_add(sample.bytes, Ordering::Relaxed);
        let index = bucket_index(sample.results);
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let stats = buckets.entry(index).or_default();
        stats.count += 1;
        stats.first_result += sample.first_result;
        stats.total += sample.total;
    }

    /// Finish aggregation, attaching the wall-clock span the samples cover.
    pub fn into_report(self, elapsed: Duration) -> HistogramReport {
        HistogramReport {
            buckets: self
                .buckets
                .into_inner()
                .unwrap_or_else(PoisonError::into_inner),
            results: self.results.into_inner(),
            bytes: self.bytes.into_inner(),
            elapsed,
        }
    }
}

/// Final, read-only view of a [`LatencyHistogram`].
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramReport {
    buckets: BTreeMap<usize, BucketStats>,
    results: u64,
    bytes: u64,
    elapsed: Duration,
}

impl HistogramReport {
    /// Non-empty buckets in ascending index order.
    pub fn buckets(&self) -> impl Iterator<Item = (usize, &BucketStats)> {
        self.buckets.iter().map(|(index, stats)| (*index, stats))
    }

    /// Total number of recorded queries.
    pub fn queries(&self) -> u64 {
        self.buckets.values().map(|stats| stats.count).sum()
    }

    /// Total number of returned records.
    pub const fn results(&self) -> u64 {
        self.results
    }

    /// Total attributed payload bytes.
    pub const fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Wall-clock span of the run.
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Mean number of results per query.
    pub fn average_results(&self) -> f64 {
        match self.queries() {
            0 => 0.0,
            queries => self.results as f64 / queries as f64,
        }
    }

    fn per_second(&self, amount: u64) -> f64 {
        let seconds = self.elapsed.as_secs_f64();
        if seconds > 0.0 {
            amount as f64 / seconds
        } else {
            0.0
        }
    }

    /// Queries completed per second.
    pub fn queries_per_sec(&self) -> f64 {
        self.per_second(self.queries())
    }

    /// Records returned per second.
    pub fn results_per_sec(&self) -> f64 {
        self.per_second(self.results)
    }

    /// Payload bytes returned per second.
    pub fn bytes_per_sec(&self) -> f64 {
        self.per_second(self.bytes)
    }

    /// Payload throughput in megabits per second.
    pub fn megabits_per_sec(&self) -> f64 {
        self.bytes_per_sec() * 8.0 / 1_000_000.0
    }
}

impl fmt::Display for HistogramReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Query latency (ms) by result size:")?;
        writeln!(f, "{:>20} {:>8} {:>8} {:>8}", "retsz", "count", "first", "all")?;
        for (index, stats) in self.buckets() {
            writeln!(
                f,
                "{:>20} {:>8} {:>8.2} {:>8.2}",
                bucket_label(index),
                stats.count,
                stats.mean_first_result_ms(),
                stats.mean_total_ms()
            )?;
        }
        writeln!(f, "{}", "-".repeat(47))?;
        writeln!(f, "{:>20} {:>8}", "Total", self.queries())?;
        writeln!(f, "Average return {:.2} results/query", self.average_results())?;
        writeln!(f, "Query throughput {:.1} queries/sec", self.queries_per_sec())?;
        writeln!(f, "Result throughput {:.1} results/sec", self.results_per_sec())?;
        writeln!(f, "Byte throughput {:.1} bytes/sec", self.bytes_per_sec())?;
        write!(f, "Network throughput {:.3} Mbit/s", self.megabits_per_sec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::thread;

    #[rstest]
    #[case(0, 0)]
    #[case(1, 1)]
    #[case(2, 2)]
    #[case(5, 3)]
    #[case(9, 4)]
    #[case(10, 5)]
    #[case(11, 6)]
    #[case(20, 6)]
    #[case(25, 7)]
    #[case(50, 7)]
    #[case(51, 8)]
    #[case(100, 8)]
    #[case(101, 9)]
    #[case(1000, 11)]
    fn buckets_sizes(#[case] size: u64, #[case] expected: usize) {
        assert_eq!(bucket_index(size), expected);
    }

    #[rstest]
    #[case(0, "[0]")]
    #[case(2, "(1 - 2]")]
    #[case(4, "(5 - 10)")]
    #[case(5, "(5 - 10]")]
    #[case(6, "(10 - 20]")]
    #[case(7, "(20 - 50]")]
    #[case(8, "(50 - 100]")]
    #[case(11, "(500 - 1000]")]
    fn labels_buckets(#[case] index: usize, #[case] expected: &str) {
        assert_eq!(bucket_label(index), expected);
    }

    #[rstest]
    fn handles_the_largest_sizes() {
        let index = bucket_index(u64::MAX);
        assert!(index > bucket_index(u64::MAX / 10));
        assert!(!bucket_label(index).is_empty());
    }

    #[rstest]
    fn conserves_counts_across_threads() {
        let histogram = LatencyHistogram::new();
        thread::scope(|scope| {
            for worker in 0..8_u64 {
                let histogram = &histogram;
                scope.spawn(move || {
                    for results in 0..100 {
                        histogram.record(QuerySample {
                            results: results + worker,
                            bytes: 8 * (results + worker),
                            first_result: Duration::from_micros(10),
                            total: Duration::from_micros(20),
                        });
                    }
                });
            }
        });
        let report = histogram.into_report(Duration::from_secs(2));
        assert_eq!(report.queries(), 800);
        let expected_results: u64 = (0..8).map(|w| (0..100).map(|r| r + w).sum::<u64>()).sum();
        assert_eq!(report.results(), expected_results);
        assert_eq!(report.bytes(), expected_results * 8);
        assert!((report.queries_per_sec() - 400.0).abs() < f64::EPSILON);
    }

    #[rstest]
    fn renders_buckets_and_totals() {
        let histogram = LatencyHistogram::new();
        for results in [0, 3, 3, 30] {
            histogram.record(QuerySample {
                results,
                bytes: results * 8,
                first_result: Duration::from_millis(1),
                total: Duration::from_millis(4),
            });
        }
        let rendered = histogram.into_report(Duration::from_secs(1)).to_string();
        let lines: Vec<_> = rendered.lines().collect();
        assert_eq!(
            lines.get(2).map(|l| l.trim()),
            Some("[0]        1     1.00     4.00")
        );
        assert!(lines.iter().any(|l| l.trim_start().starts_with("(2 - 5]        2")));
        assert!(lines.iter().any(|l| l.trim_start().starts_with("(20 - 50]        1")));
        assert!(rendered.contains("Total        4"));
        assert!(rendered.contains("Average return 9.00 results/query"));
        assert!(rendered.contains("Byte throughput 288.0 bytes/sec"));
    }

    #[rstest]
    fn empty_report_has_zero_rates() {
        let report = LatencyHistogram::new().into_report(Duration::ZERO);
        assert_eq!(report.queries(), 0);
        assert!(report.average_results().abs() < f64::EPSILON);
        assert!(report.megabits_per_sec().abs() < f64::EPSILON);
    }
}
