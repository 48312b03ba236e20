//! Bench command implementation for the geoload CLI.

use std::{io::Write, num::NonZeroUsize};

use camino::Utf8PathBuf;
use clap::Parser;
use geoload_core::{
    BenchError, BenchOptions, BenchmarkReport, SampleWindow, collect_samples, run_benchmark,
};
use geoload_data::SqliteStore;
use log::debug;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};

use crate::{
    ARG_CONNECTIONS, ARG_NAMESPACE, ARG_SAMPLE_OFFSET, ARG_SAMPLES, ARG_SET, ARG_STORE,
    ARG_THREADS, ARG_TOTAL_POINTS, CliError, StoreTarget, non_zero, require_existing,
};

const DEFAULT_CONNECTIONS: usize = 4;
const DEFAULT_THREADS: usize = 80;

/// CLI arguments for the `bench` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    long_about = "Pick sample points from a window of the record hash space \
                 and time a \"regions containing this point\" query for each, \
                 printing a latency histogram keyed by result-set size.",
    about = "Benchmark region containment queries"
)]
#[ortho_config(prefix = "GEOLOAD")]
pub(crate) struct BenchArgs {
    /// SQLite database holding the records.
    #[arg(long = ARG_STORE, value_name = "path")]
    #[serde(default)]
    pub(crate) store: Option<Utf8PathBuf>,
    /// Namespace to query.
    #[arg(long = ARG_NAMESPACE, value_name = "name")]
    #[serde(default)]
    pub(crate) namespace: Option<String>,
    /// Set to query.
    #[arg(long = ARG_SET, value_name = "name")]
    #[serde(default)]
    pub(crate) set: Option<String>,
    /// Number of store connections shared by the query threads.
    #[arg(long = ARG_CONNECTIONS, value_name = "count")]
    #[serde(default)]
    pub(crate) connections: Option<usize>,
    /// Number of query threads.
    #[arg(long = ARG_THREADS, value_name = "count")]
    #[serde(default)]
    pub(crate) threads: Option<usize>,
    /// Approximate number of records in the set.
    #[arg(long = ARG_TOTAL_POINTS, value_name = "count")]
    #[serde(default)]
    pub(crate) total_points: Option<u64>,
    /// Number of sample points to query.
    #[arg(long = ARG_SAMPLES, value_name = "count")]
    #[serde(default)]
    pub(crate) samples: Option<usize>,
    /// Offset of the sample window in records.
    #[arg(long = ARG_SAMPLE_OFFSET, value_name = "count")]
    #[serde(default)]
    pub(crate) sample_offset: Option<u64>,
}

impl BenchArgs {
    pub(crate) fn into_config(self) -> Result<BenchConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        BenchConfig::try_from(merged)
    }
}

/// Resolved `bench` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BenchConfig {
    pub(crate) target: StoreTarget,
    pub(crate) connections: NonZeroUsize,
    pub(crate) threads: NonZeroUsize,
    pub(crate) window: SampleWindow,
}

impl TryFrom<BenchArgs> for BenchConfig {
    type Error = CliError;

    fn try_from(args: BenchArgs) -> Result<Self, Self::Error> {
        let defaults = SampleWindow::default();
        let total_points = args.total_points.unwrap_or(defaults.total_points);
        if total_points == 0 {
            return Err(CliError::InvalidArgument {
                field: ARG_TOTAL_POINTS,
                reason: "must be greater than zero",
            });
        }
        let window = SampleWindow {
            total_points,
            samples: non_zero(args.samples, defaults.samples, ARG_SAMPLES)?.get(),
            offset: args.sample_offset.unwrap_or(defaults.offset),
        };
        Ok(Self {
            target: StoreTarget::resolve(args.store, args.namespace, args.set),
            connections: non_zero(args.connections, DEFAULT_CONNECTIONS, ARG_CONNECTIONS)?,
            threads: non_zero(args.threads, DEFAULT_THREADS, ARG_THREADS)?,
            window,
        })
    }
}

pub(crate) fn run_bench(args: BenchArgs, out: &mut dyn Write) -> Result<(), CliError> {
    let config = args.into_config()?;
    execute(&config, out).map(|_| ())
}

/// Sample the store and benchmark containment queries, reporting to `out`.
pub(crate) fn execute(
    config: &BenchConfig,
    out: &mut dyn Write,
) -> Result<BenchmarkReport, CliError> {
    let target = &config.target;
    writeln!(out, "store: {}", target.store)?;
    writeln!(out, "namespace: {}", target.namespace)?;
    writeln!(out, "set: {}", target.set)?;
    writeln!(out, "connections: {}", config.connections)?;
    writeln!(out, "threads: {}", config.threads)?;
    writeln!(out, "total points: {}", config.window.total_points)?;
    writeln!(out, "samples: {}", config.window.samples)?;
    writeln!(out, "sample offset: {}", config.window.offset)?;

    require_existing(&target.store, ARG_STORE)?;
    let store = SqliteStore::open(&target.store, config.connections)?;
    let connections = store.connections();
    let samples = match connections.first() {
        Some(connection) => {
            collect_samples(connection, &target.namespace, &target.set, &config.window)?
        }
        None => return Err(CliError::Bench(BenchError::NoConnections)),
    };
    writeln!(out, "found {} candidate sample points", samples.candidates)?;

    let options = BenchOptions {
        namespace: target.namespace.clone(),
        set: target.set.clone(),
        threads: config.threads,
    };
    let report = run_benchmark(samples.points, connections, &options)?;
    for (index, completed) in report.completed.iter().enumerate() {
        debug!("worker {index} completed {} queries", completed.len());
    }
    writeln!(out, "{}", report.histogram)?;
    Ok(report)
}
