//! Concurrency core of the geoload tools.
//!
//! The crate provides the pieces shared by the loader and the benchmark:
//! a capacity-bounded queue with drain-then-stop termination, a shared
//! record handle, the store and input interfaces, the two worker pools built
//! on them and the log-scale latency histogram. Concrete inputs and the
//! SQLite store live in `geoload-data`.

#![forbid(unsafe_code)]

mod bench;
pub mod bins;
mod geojson;
mod histogram;
mod ingest;
mod input;
mod queue;
mod record;
mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use bench::{
    BenchError, BenchOptions, BenchmarkReport, SampleSet, SamplePoint, SampleWindow,
    SamplingError, WorkList, collect_samples, containing_query, run_benchmark, timed_query,
};
pub use geojson::{GeoJson, distance_m};
pub use histogram::{
    BucketStats, HistogramReport, LatencyHistogram, QuerySample, bucket_index, bucket_label,
};
pub use ingest::{
    IngestError, IngestOptions, IngestReport, NoProgress, Progress, RecordEncoder, run_ingest,
};
pub use input::{InputError, InputSource, TaggedPoint};
pub use queue::{BoundedQueue, QueueClosed, QueueState};
pub use record::{GeoRecord, SharedRecord, Tags};
pub use store::{
    BinValue, IndexKind, IndexSpec, Query, QueryPredicate, RecordKey, StoreConnection,
    StoreError, StoreRecord,
};
