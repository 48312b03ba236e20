//! Facade crate for the geoload toolkit.
//!
//! This crate re-exports the pipeline and store interfaces and exposes the
//! concrete input formats and SQLite store behind the `data` feature.

#![forbid(unsafe_code)]

pub use geoload_core::{
    BenchOptions, BenchmarkReport, BoundedQueue, GeoRecord, HistogramReport, IngestOptions,
    IngestReport, InputSource, LatencyHistogram, QueueClosed, RecordEncoder, SampleWindow,
    SharedRecord, StoreConnection, StoreError, StoreRecord, collect_samples, run_benchmark,
    run_ingest,
};

#[cfg(feature = "data")]
pub use geoload_data::{
    JsonLinesSource, OsmPbfSource, PoiRecordEncoder, SqliteConnection, SqliteStore,
    SqliteStoreError, open_source,
};
