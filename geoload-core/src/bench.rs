//! Query benchmark: a pool of workers draining a shared list of sample
//! points, issuing one "regions containing this point" query per sample and
//! folding the measurements into a [`LatencyHistogram`].

use std::{
    num::NonZeroUsize,
    panic,
    sync::{Mutex, MutexGuard, PoisonError},
    thread,
    time::Instant,
};

use geo::Coord;
use log::{debug, info, warn};
use thiserror::Error;

use crate::{
    HistogramReport, LatencyHistogram, Query, QueryPredicate, QuerySample, StoreConnection,
    StoreError, bins,
};

/// A stored position selected for querying.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplePoint {
    /// Value of the record's hash bin.
    pub hash: i64,
    /// Record position.
    pub location: Coord<f64>,
}

/// Mutex-protected list drained destructively by worker threads.
#[derive(Debug)]
pub struct WorkList<T> {
    items: Mutex<Vec<T>>,
}

impl<T> WorkList<T> {
    /// Wrap a fully populated list.
    pub const fn new(items: Vec<T>) -> Self {
        Self {
            items: Mutex::new(items),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove one entry, or `None` once the list is exhausted.
    pub fn take(&self) -> Option<T> {
        self.lock().pop()
    }

    /// Discard every remaining entry.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Entries still waiting.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the list is exhausted.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Hash window used to pick benchmark samples.
///
/// Record hashes are uniform over `[0, 2^63)`, so a window sized to
/// `samples * 1.1` points out of `total_points` holds slightly more than
/// `samples` records on average.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleWindow {
    /// Approximate number of records in the set.
    pub total_points: u64,
    /// Number of samples wanted.
    pub samples: usize,
    /// Window offset, in units of one record's share of the hash space.
    pub offset: u64,
}

impl Default for SampleWindow {
    fn default() -> Self {
        Self {
            total_points: 11_269_358,
            samples: 10_000,
            offset: 0,
        }
    }
}

impl SampleWindow {
    /// Inclusive hash range covered by the window.
    ///
    /// # Examples
    /// ```
    /// use geoload_core::SampleWindow;
    ///
    /// let window = SampleWindow { total_points: 1 << 20, samples: 10, offset: 2 };
    /// let (min, max) = window.hash_range();
    /// assert_eq!(min, 2 << 43);
    /// assert_eq!(max, min + (11 << 43));
    /// ```
    pub fn hash_range(&self) -> (i64, i64) {
        let factor = (1_u64 << 63) / self.total_points.max(1);
        let min = self.offset.saturating_mul(factor);
        let span = self.samples as f64 * 1.1 * factor as f64;
        let max = min.saturating_add(span as u64);
        (clamp_hash(min), clamp_hash(max))
    }
}

fn clamp_hash(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Sample points picked by [`collect_samples`].
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSet {
    /// Candidates found in the hash window before truncation.
    pub candidates: usize,
    /// Exactly `samples` points, sorted by hash then position.
    pub points: Vec<SamplePoint>,
}

/// Errors returned by [`collect_samples`].
#[derive(Debug, Error)]
pub enum SamplingError {
    /// The sampling query failed.
    #[error("sampling query failed: {0}")]
    Store(#[from] StoreError),
    /// The hash window held fewer points than requested.
    #[error("not enough sample points: found {found}, need {required}")]
    NotEnoughSamples {
        /// Points found.
        found: usize,
        /// Points requested.
        required: usize,
    },
}

/// Pick a deterministic set of sample points from the store.
///
/// Records whose location is not a GeoJSON point are skipped.
///
/// # Errors
/// Returns [`SamplingError::NotEnoughSamples`] when the window yields fewer
/// than `window.samples` points, or [`SamplingError::Store`] when the query
/// fails.
pub fn collect_samples<C: StoreConnection + ?Sized>(
    connection: &C,
    namespace: &str,
    set: &str,
    window: &SampleWindow,
) -> Result<SampleSet, SamplingError> {
    let (min, max) = window.hash_range();
    debug!("sampling hashes in [{min}, {max}]");
    let query = Query::new(
        namespace,
        set,
        QueryPredicate::IntegerRange {
            bin: bins::HASH.to_owned(),
            min,
            max,
        },
    )
    .select([bins::HASH, bins::LOCATION]);

    let mut points = Vec::new();
    connection.query(&query, &mut |record| {
        let sample = record.and_then(|record| {
            Some(SamplePoint {
                hash: record.get_int(bins::HASH)?,
                location: record.get_geojson(bins::LOCATION)?.as_point()?,
            })
        });
        points.extend(sample);
        true
    })?;

    points.sort_by(|a, b| {
        a.hash
            .cmp(&b.hash)
            .then(a.location.y.total_cmp(&b.location.y))
            .then(a.location.x.total_cmp(&b.location.x))
    });
    let candidates = points.len();
    info!("found {candidates} candidate samples");
    if candidates < window.samples {
        return Err(SamplingError::NotEnoughSamples {
            found: candidates,
            required: window.samples,
        });
    }
    points.truncate(window.samples);
    Ok(SampleSet { candidates, points })
}

/// Options for [`run_benchmark`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchOptions {
    /// Namespace holding the regions.
    pub namespace: String,
    /// Set holding the regions.
    pub set: String,
    /// Number of worker threads.
    pub threads: NonZeroUsize,
}

/// Outcome of a benchmark run.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkReport {
    /// Latency histogram covering every query.
    pub histogram: HistogramReport,
    /// Samples completed by each worker, indexed by worker.
    pub completed: Vec<Vec<SamplePoint>>,
}

impl BenchmarkReport {
    /// Total number of completed queries.
    pub fn queries(&self) -> usize {
        self.completed.iter().map(Vec::len).sum()
    }
}

/// Errors returned by [`run_benchmark`].
#[derive(Debug, Error)]
pub enum BenchError {
    /// The benchmark was started without a store connection.
    #[error("at least one store connection is required")]
    NoConnections,
    /// A query failed.
    #[error("query for sample {hash} failed: {source}")]
    Store {
        /// Hash of the sample being queried.
        hash: i64,
        /// Store failure.
        #[source]
        source: StoreError,
    },
}

/// Query for the regions containing `point`, returning only their ids.
pub fn containing_query(namespace: &str, set: &str, point: Coord<f64>) -> Query {
    Query::new(
        namespace,
        set,
        QueryPredicate::GeoContains {
            bin: bins::REGION.to_owned(),
            point,
        },
    )
    .select([bins::ID])
}

/// Run `query` and measure it.
///
/// The first-result latency is taken at the first callback, which is the
/// completion signal when nothing matches.
///
/// # Errors
/// Propagates the store failure.
pub fn timed_query<C: StoreConnection + ?Sized>(
    connection: &C,
    query: &Query,
) -> Result<QuerySample, StoreError> {
    let started = Instant::now();
    let mut first_result = None;
    let mut results = 0_u64;
    let mut bytes = 0_u64;
    connection.query(query, &mut |record| {
        first_result.get_or_insert_with(|| started.elapsed());
        if let Some(record) = record {
            results += 1;
            bytes += record.payload_size();
        }
        true
    })?;
    let total = started.elapsed();
    Ok(QuerySample {
        results,
        bytes,
        first_result: first_result.unwrap_or(total),
        total,
    })
}

/// Query every sample once, spreading `options.threads` workers round-robin
/// over `connections`.
///
/// A failed query clears the work list so the remaining workers stop after
/// their current query, and the first failure is returned.
///
/// # Errors
/// Returns [`BenchError::NoConnections`] for an empty connection slice and
/// [`BenchError::Store`] when a query fails.
pub fn run_benchmark<C: StoreConnection>(
    samples: Vec<SamplePoint>,
    connections: &[C],
    options: &BenchOptions,
) -> Result<BenchmarkReport, BenchError> {
    if connections.is_empty() {
        return Err(BenchError::NoConnections);
    }
    let work = WorkList::new(samples);
    let histogram = LatencyHistogram::new();
    let started = Instant::now();

    let outcomes: Vec<_> = thread::scope(|scope| {
        let workers: Vec<_> = connections
            .iter()
            .cycle()
            .take(options.threads.get())
            .enumerate()
            .map(|(index, connection)| {
                let worker = QueryWorker {
                    index,
                    work: &work,
                    histogram: &histogram,
                    connection,
                    options,
                };
                scope.spawn(move || worker.run())
            })
            .collect();
        workers
            .into_iter()
            .map(|handle| handle.join().unwrap_or_else(|payload| panic::resume_unwind(payload)))
            .collect()
    });
    let elapsed = started.elapsed();

    let completed = outcomes.into_iter().collect::<Result<Vec<_>, _>>()?;
    Ok(BenchmarkReport {
        histogram: histogram.into_report(elapsed),
        completed,
    })
}

struct QueryWorker<'a, C> {
    index: usize,
    work: &'a WorkList<SamplePoint>,
    histogram: &'a LatencyHistogram,
    connection: &'a C,
    options: &'a BenchOptions,
}

impl<C: StoreConnection> QueryWorker<'_, C> {
    fn run(self) -> Result<Vec<SamplePoint>, BenchError> {
        let mut completed = Vec::new();
        while let Some(point) = self.work.take() {
            let query =
                containing_query(&self.options.namespace, &self.options.set, point.location);
            match timed_query(self.connection, &query) {
                Ok(sample) => self.histogram.record(sample),
                Err(source) => {
                    warn!("query worker {} failed on sample {}", self.index, point.hash);
                    self.work.clear();
                    return Err(BenchError::Store {
                        hash: point.hash,
                        source,
                    });
                }
            }
            completed.push(point);
        }
        debug!(
            "query worker {} finished {} samples",
            self.index,
            completed.len()
        );
        Ok(completed)
    }
}
