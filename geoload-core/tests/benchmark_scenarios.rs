//! End-to-end checks of the query worker pool against the in-memory store.

use std::{collections::BTreeSet, num::NonZeroUsize};

use geo::Coord;
use geoload_core::{
    BenchError, BenchOptions, BinValue, GeoJson, RecordKey, SamplePoint, SampleWindow,
    StoreConnection, StoreError, StoreRecord, bins, collect_samples, run_benchmark,
    test_support::{FailingConnection, MemoryConnection},
};
use rstest::{fixture, rstest};

fn options(threads: usize) -> BenchOptions {
    BenchOptions {
        namespace: "test".into(),
        set: "osm".into(),
        threads: NonZeroUsize::new(threads).expect("threads"),
    }
}

fn samples(count: i64) -> Vec<SamplePoint> {
    (0..count)
        .map(|hash| SamplePoint {
            hash,
            location: Coord {
                x: (hash % 100) as f64 * 0.01,
                y: (hash / 100) as f64 * 0.01,
            },
        })
        .collect()
}

/// Regions of 2 km around a coarse grid, so sample points hit zero or more regions.
#[fixture]
fn region_store() -> MemoryConnection {
    let store = MemoryConnection::new();
    for id in 0..20_i64 {
        let center = Coord {
            x: (id % 5) as f64 * 0.2,
            y: (id / 5) as f64 * 0.2,
        };
        let record = StoreRecord::new()
            .with_bin(bins::ID, BinValue::Int(id))
            .with_bin(bins::HASH, BinValue::Int(id))
            .with_bin(bins::LOCATION, BinValue::GeoJson(GeoJson::point(center).to_json()))
            .with_bin(
                bins::REGION,
                BinValue::GeoJson(GeoJson::circle(center, 2_000.0).to_json()),
            );
        store
            .put(&RecordKey::new("test", "osm", id), &record)
            .expect("seed region");
    }
    store
}

#[rstest]
fn work_list_is_exhausted_exactly_once(region_store: MemoryConnection) {
    let pool: Vec<_> = (0..3).map(|_| region_store.clone()).collect();
    let report = run_benchmark(samples(1000), &pool, &options(10)).expect("benchmark");

    assert_eq!(report.completed.len(), 10);
    let mut seen = BTreeSet::new();
    for point in report.completed.iter().flatten() {
        assert!(seen.insert(point.hash), "sample {} queried twice", point.hash);
    }
    assert_eq!(seen, (0..1000).collect());
}

#[rstest]
#[case(1, 1)]
#[case(8, 4)]
fn histogram_conserves_queries_and_results(
    region_store: MemoryConnection,
    #[case] threads: usize,
    #[case] connections: usize,
) {
    let pool: Vec<_> = (0..connections).map(|_| region_store.clone()).collect();
    let report = run_benchmark(samples(300), &pool, &options(threads)).expect("benchmark");
    let histogram = &report.histogram;

    let bucket_total: u64 = histogram.buckets().map(|(_, stats)| stats.count).sum();
    assert_eq!(bucket_total, 300);
    assert_eq!(histogram.queries(), 300);
    assert_eq!(report.queries(), 300);
    assert_eq!(histogram.bytes(), histogram.results() * 8);
    assert!(histogram.results() > 0, "some sample points should hit a region");
}

#[rstest]
fn failing_query_surfaces_the_store_error() {
    let pool = [FailingConnection::after(5, StoreError::SERVER, "timeout")];
    let err = run_benchmark(samples(100), &pool, &options(4)).expect_err("query fails");
    match err {
        BenchError::Store { source, .. } => {
            assert_eq!(source.code, StoreError::SERVER);
            assert_eq!(source.message, "timeout");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[rstest]
fn samples_feed_the_benchmark(region_store: MemoryConnection) {
    let window = SampleWindow {
        total_points: 1,
        samples: 10,
        offset: 0,
    };
    let set = collect_samples(&region_store, "test", "osm", &window).expect("samples");
    assert_eq!(set.candidates, 20);
    assert_eq!(set.points.len(), 10);

    let report = run_benchmark(set.points, &[&region_store], &options(2)).expect("benchmark");
    assert_eq!(report.queries(), 10);
    // Every sample sits at the centre of its own region.
    assert!(report.histogram.results() >= 10);
}
