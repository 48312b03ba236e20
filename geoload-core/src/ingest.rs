//! Load pipeline: one producer feeding a [`BoundedQueue`] drained by a pool
//! of worker threads that encode records and write them to the store.

use std::{
    num::NonZeroUsize,
    panic,
    sync::atomic::{AtomicU64, Ordering},
    thread,
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use thiserror::Error;

use crate::{
    BoundedQueue, GeoRecord, InputError, InputSource, QueueClosed, RecordKey, SharedRecord,
    StoreConnection, StoreError, StoreRecord, TaggedPoint,
};

/// Turns records into store keys and bins.
pub trait RecordEncoder: Sync {
    /// Key under which `record` is stored.
    fn key(&self, record: &GeoRecord) -> RecordKey;

    /// Store representation of `record`.
    fn encode(&self, record: &GeoRecord) -> StoreRecord;
}

/// Receives the running count of written records.
pub trait Progress: Sync {
    /// Called by a worker after each successful write with the new total.
    fn record_written(&self, total: u64);
}

/// [`Progress`] sink that ignores updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn record_written(&self, _total: u64) {}
}

/// Tuning for [`run_ingest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOptions {
    /// Number of worker threads.
    pub workers: NonZeroUsize,
    /// Queue capacity between the producer and the workers.
    pub queue_capacity: NonZeroUsize,
    /// Tag a unit must carry to be loaded; `None` loads every unit.
    pub required_tag: Option<String>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            workers: NonZeroUsize::new(100).unwrap_or(NonZeroUsize::MIN),
            queue_capacity: NonZeroUsize::new(1_000_000).unwrap_or(NonZeroUsize::MIN),
            required_tag: Some("name".to_owned()),
        }
    }
}

impl IngestOptions {
    /// Whether `unit` should be loaded.
    pub fn selects(&self, unit: &TaggedPoint) -> bool {
        self.required_tag
            .as_deref()
            .is_none_or(|tag| unit.has_tag(tag))
    }
}

/// Outcome of a successful [`run_ingest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    /// Units decoded from the input.
    pub units: u64,
    /// Units that qualified and were queued.
    pub queued: u64,
    /// Records written to the store.
    pub written: u64,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

/// Errors returned by [`run_ingest`].
#[derive(Debug, Error)]
pub enum IngestError {
    /// The pipeline was started without a store connection.
    #[error("at least one store connection is required")]
    NoConnections,
    /// Decoding the input failed.
    #[error(transparent)]
    Input(#[from] InputError),
    /// Writing a record failed.
    #[error("failed to write record {id}: {source}")]
    Store {
        /// Identifier of the record being written.
        id: i64,
        /// Store failure.
        #[source]
        source: StoreError,
    },
}

/// Load every qualifying unit of `source` into the store.
///
/// Worker `i` writes through `connections[i % connections.len()]`. The
/// calling thread acts as the producer; once the input is exhausted it
/// terminates the queue, lets the workers drain it and joins them. A failed
/// write terminates the queue so the producer stops early, and the first
/// such failure is returned.
///
/// # Errors
/// Returns [`IngestError::NoConnections`] for an empty connection slice,
/// [`IngestError::Store`] when a write fails and [`IngestError::Input`] when
/// the input cannot be decoded.
pub fn run_ingest<C, E>(
    source: &mut dyn InputSource,
    connections: &[C],
    encoder: &E,
    options: &IngestOptions,
    progress: &dyn Progress,
) -> Result<IngestReport, IngestError>
where
    C: StoreConnection,
    E: RecordEncoder,
{
    if connections.is_empty() {
        return Err(IngestError::NoConnections);
    }
    let started = Instant::now();
    let queue = BoundedQueue::<SharedRecord>::new(options.queue_capacity);
    let written = AtomicU64::new(0);
    let mut units = 0_u64;
    let mut queued = 0_u64;

    let (produced, outcomes) = thread::scope(|scope| {
        let workers: Vec<_> = connections
            .iter()
            .cycle()
            .take(options.workers.get())
            .enumerate()
            .map(|(index, connection)| {
                let worker = Worker {
                    index,
                    queue: &queue,
                    connection,
                    encoder,
                    written: &written,
                    progress,
                };
                scope.spawn(move || worker.run())
            })
            .collect();

        let produced = source.for_each_unit(&mut |unit| {
            units += 1;
            if !options.selects(&unit) {
                return true;
            }
            match queue.push(GeoRecord::from(unit).into_shared()) {
                Ok(()) => {
                    queued += 1;
                    true
                }
                Err(QueueClosed(rejected)) => {
                    debug!("queue closed; dropping record {}", rejected.id);
                    false
                }
            }
        });
        queue.terminate();

        let outcomes: Vec<_> = workers
            .into_iter()
            .map(|handle| handle.join().unwrap_or_else(|payload| panic::resume_unwind(payload)))
            .collect();
        (produced, outcomes)
    });

    for outcome in outcomes {
        outcome?;
    }
    if let Err(err) = produced {
        warn!("input failed after {units} units: {err}");
        return Err(err.into());
    }
    let report = IngestReport {
        units,
        queued,
        written: written.into_inner(),
        elapsed: started.elapsed(),
    };
    info!(
        "ingest finished: {} units, {} queued, {} written",
        report.units, report.queued, report.written
    );
    Ok(report)
}

struct Worker<'a, C, E> {
    index: usize,
    queue: &'a BoundedQueue<SharedRecord>,
    connection: &'a C,
    encoder: &'a E,
    written: &'a AtomicU64,
    progress: &'a dyn Progress,
}

// Closes the queue if its worker unwinds so the producer cannot block on a
// full queue that nobody drains.
struct CloseOnPanic<'a>(&'a BoundedQueue<SharedRecord>);

impl Drop for CloseOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.terminate();
        }
    }
}

impl<C: StoreConnection, E: RecordEncoder> Worker<'_, C, E> {
    fn run(self) -> Result<u64, IngestError> {
        debug!("ingest worker {} started", self.index);
        let _close_on_panic = CloseOnPanic(self.queue);
        let mut local = 0_u64;
        while let Ok(record) = self.queue.pop() {
            let key = self.encoder.key(&record);
            let bins = self.encoder.encode(&record);
            if let Err(source) = self.connection.put(&key, &bins) {
                warn!("ingest worker {} failed on record {}", self.index, record.id);
                self.queue.terminate();
                return Err(IngestError::Store {
                    id: record.id,
                    source,
                });
            }
            local += 1;
            let total = self.written.fetch_add(1, Ordering::Relaxed) + 1;
            self.progress.record_written(total);
        }
        debug!("ingest worker {} stopped after {local} writes", self.index);
        Ok(local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        BinValue, Tags,
        test_support::{FailingConnection, MemoryConnection, VecSource},
    };
    use geo::Coord;
    use rstest::{fixture, rstest};
    use std::sync::Mutex;

    struct IdEncoder;

    impl RecordEncoder for IdEncoder {
        fn key(&self, record: &GeoRecord) -> RecordKey {
            RecordKey::new("test", "points", record.id)
        }

        fn encode(&self, record: &GeoRecord) -> StoreRecord {
            StoreRecord::new().with_bin("id", BinValue::Int(record.id))
        }
    }

    struct ExplodingEncoder;

    impl RecordEncoder for ExplodingEncoder {
        fn key(&self, _record: &GeoRecord) -> RecordKey {
            panic!("encoder exploded");
        }

        fn encode(&self, _record: &GeoRecord) -> StoreRecord {
            StoreRecord::new()
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<u64>>);

    impl Progress for Recorder {
        fn record_written(&self, total: u64) {
            self.0.lock().expect("progress lock").push(total);
        }
    }

    fn unit(id: i64, named: bool) -> TaggedPoint {
        let mut tags = Tags::new();
        if named {
            tags.insert("name".into(), format!("poi {id}"));
        }
        TaggedPoint::new(id, Coord { x: 0.0, y: 0.0 }, tags)
    }

    #[fixture]
    fn source() -> VecSource {
        VecSource::new((0..50).map(|id| unit(id, id % 5 != 0)))
    }

    fn options(workers: usize, capacity: usize) -> IngestOptions {
        IngestOptions {
            workers: NonZeroUsize::new(workers).expect("workers"),
            queue_capacity: NonZeroUsize::new(capacity).expect("capacity"),
            ..IngestOptions::default()
        }
    }

    #[rstest]
    #[case(1, 1, 1)]
    #[case(4, 2, 3)]
    #[case(16, 100, 5)]
    fn writes_every_named_unit(
        mut source: VecSource,
        #[case] workers: usize,
        #[case] capacity: usize,
        #[case] connections: usize,
    ) {
        let pool = MemoryConnection::pool(connections);
        let progress = Recorder::default();
        let report = run_ingest(
            &mut source,
            &pool,
            &IdEncoder,
            &options(workers, capacity),
            &progress,
        )
        .expect("ingest succeeds");

        assert_eq!(report.units, 50);
        assert_eq!(report.queued, 40);
        assert_eq!(report.written, 40);
        let store = pool.first().expect("one connection");
        assert_eq!(store.record_count(), 40);
        assert!(store.get(&RecordKey::new("test", "points", 5)).is_none());

        let mut totals = progress.0.into_inner().expect("progress lock");
        totals.sort_unstable();
        assert_eq!(totals, (1..=40).collect::<Vec<_>>());
    }

    #[rstest]
    fn spreads_workers_round_robin(mut source: VecSource) {
        let pool = MemoryConnection::pool(3);
        run_ingest(&mut source, &pool, &IdEncoder, &options(6, 4), &NoProgress)
            .expect("ingest succeeds");
        let puts: u64 = pool.iter().map(MemoryConnection::puts).sum();
        assert_eq!(puts, 40);
    }

    #[rstest]
    fn selects_everything_without_required_tag(mut source: VecSource) {
        let pool = MemoryConnection::pool(1);
        let opts = IngestOptions {
            required_tag: None,
            ..options(2, 2)
        };
        let report =
            run_ingest(&mut source, &pool, &IdEncoder, &opts, &NoProgress).expect("ingest");
        assert_eq!(report.written, 50);
    }

    #[rstest]
    fn store_failure_stops_the_pipeline(mut source: VecSource) {
        let pool = [FailingConnection::new(StoreError::SERVER, "disk full")];
        let err = run_ingest(&mut source, &pool, &IdEncoder, &options(3, 1), &NoProgress)
            .expect_err("write fails");
        match err {
            IngestError::Store { source: failure, .. } => {
                assert_eq!(failure.code, StoreError::SERVER);
                assert_eq!(failure.message, "disk full");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[rstest]
    fn rejects_empty_connection_pool(mut source: VecSource) {
        let pool: [MemoryConnection; 0] = [];
        let err = run_ingest(&mut source, &pool, &IdEncoder, &options(1, 1), &NoProgress)
            .expect_err("no connections");
        assert!(matches!(err, IngestError::NoConnections));
    }

    #[rstest]
    #[should_panic(expected = "encoder exploded")]
    fn worker_panic_reaches_the_caller(mut source: VecSource) {
        let pool = MemoryConnection::pool(1);
        // A single worker with a one-slot queue: the producer would block
        // forever if the panicking worker left the queue open.
        let _ = run_ingest(&mut source, &pool, &ExplodingEncoder, &options(1, 1), &NoProgress);
    }
}
