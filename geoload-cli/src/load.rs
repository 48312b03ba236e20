//! Load command implementation for the geoload CLI.

use std::{
    io::Write,
    num::{NonZeroU64, NonZeroUsize},
};

use camino::Utf8PathBuf;
use clap::Parser;
use geoload_core::{IngestOptions, IngestReport, StoreConnection, run_ingest};
use geoload_data::{
    DEFAULT_AMENITY, DEFAULT_RADIUS_M, PoiRecordEncoder, SqliteStore, TagTally, index_specs,
    open_source,
};
use log::info;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};

use crate::{
    ARG_AMENITY, ARG_CONNECTIONS, ARG_INPUT, ARG_NAMESPACE, ARG_PROGRESS_INTERVAL,
    ARG_QUEUE_CAPACITY, ARG_RADIUS, ARG_SET, ARG_STORE, ARG_WORKERS, CliError, ENV_LOAD_INPUT,
    StoreTarget, non_zero, progress::DotProgress, require_existing, required, validate_radius,
};

const DEFAULT_WORKERS: usize = 100;
const DEFAULT_CONNECTIONS: usize = 1;
const DEFAULT_QUEUE_CAPACITY: usize = 1_000_000;
const DEFAULT_PROGRESS_INTERVAL: u64 = 1_000;

/// CLI arguments for the `load` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    long_about = "Load every named point of an OSM PBF extract or a JSON-lines \
                 file into the store. Points whose amenity matches --amenity \
                 also receive a circular region of --radius metres. Options can \
                 come from CLI flags, configuration files, or environment \
                 variables.",
    about = "Load points of interest into the store"
)]
#[ortho_config(prefix = "GEOLOAD")]
pub(crate) struct LoadArgs {
    /// OSM PBF (`.pbf`) or JSON-lines input file.
    #[arg(value_name = "path")]
    #[serde(default)]
    pub(crate) input: Option<Utf8PathBuf>,
    /// SQLite database holding the records.
    #[arg(long = ARG_STORE, value_name = "path")]
    #[serde(default)]
    pub(crate) store: Option<Utf8PathBuf>,
    /// Namespace to write into.
    #[arg(long = ARG_NAMESPACE, value_name = "name")]
    #[serde(default)]
    pub(crate) namespace: Option<String>,
    /// Set to write into.
    #[arg(long = ARG_SET, value_name = "name")]
    #[serde(default)]
    pub(crate) set: Option<String>,
    /// Amenity whose points receive a region.
    #[arg(long = ARG_AMENITY, value_name = "value")]
    #[serde(default)]
    pub(crate) amenity: Option<String>,
    /// Region radius in metres.
    #[arg(long = ARG_RADIUS, value_name = "metres")]
    #[serde(default)]
    pub(crate) radius: Option<f64>,
    /// Number of writer threads.
    #[arg(long = ARG_WORKERS, value_name = "count")]
    #[serde(default)]
    pub(crate) workers: Option<usize>,
    /// Number of store connections shared by the writers.
    #[arg(long = ARG_CONNECTIONS, value_name = "count")]
    #[serde(default)]
    pub(crate) connections: Option<usize>,
    /// Records buffered between the reader and the writers.
    #[arg(long = ARG_QUEUE_CAPACITY, value_name = "count")]
    #[serde(default)]
    pub(crate) queue_capacity: Option<usize>,
    /// Written records per progress dot.
    #[arg(long = ARG_PROGRESS_INTERVAL, value_name = "count")]
    #[serde(default)]
    pub(crate) progress_interval: Option<u64>,
}

impl LoadArgs {
    pub(crate) fn into_config(self) -> Result<LoadConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        LoadConfig::try_from(merged)
    }
}

/// Resolved `load` command configuration.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LoadConfig {
    pub(crate) input: Utf8PathBuf,
    pub(crate) target: StoreTarget,
    pub(crate) amenity: String,
    pub(crate) radius_m: f64,
    pub(crate) workers: NonZeroUsize,
    pub(crate) connections: NonZeroUsize,
    pub(crate) queue_capacity: NonZeroUsize,
    pub(crate) progress_interval: NonZeroU64,
}

impl LoadConfig {
    pub(crate) fn validate_sources(&self) -> Result<(), CliError> {
        require_existing(&self.input, ARG_INPUT)
    }
}

impl TryFrom<LoadArgs> for LoadConfig {
    type Error = CliError;

    fn try_from(args: LoadArgs) -> Result<Self, Self::Error> {
        let input = required(args.input, ARG_INPUT, ENV_LOAD_INPUT)?;
        let progress_interval = NonZeroU64::new(
            args.progress_interval.unwrap_or(DEFAULT_PROGRESS_INTERVAL),
        )
        .ok_or(CliError::InvalidArgument {
            field: ARG_PROGRESS_INTERVAL,
            reason: "must be greater than zero",
        })?;
        Ok(Self {
            input,
            target: StoreTarget::resolve(args.store, args.namespace, args.set),
            amenity: args.amenity.unwrap_or_else(|| DEFAULT_AMENITY.to_owned()),
            radius_m: validate_radius(args.radius.unwrap_or(DEFAULT_RADIUS_M))?,
            workers: non_zero(args.workers, DEFAULT_WORKERS, ARG_WORKERS)?,
            connections: non_zero(args.connections, DEFAULT_CONNECTIONS, ARG_CONNECTIONS)?,
            queue_capacity: non_zero(
                args.queue_capacity,
                DEFAULT_QUEUE_CAPACITY,
                ARG_QUEUE_CAPACITY,
            )?,
            progress_interval,
        })
    }
}

pub(crate) fn run_load(args: LoadArgs, out: &mut (dyn Write + Send)) -> Result<(), CliError> {
    let config = args.into_config()?;
    config.validate_sources()?;
    execute(&config, out).map(|_| ())
}

/// Load `config.input`, writing progress and the final report to `out`.
pub(crate) fn execute(
    config: &LoadConfig,
    out: &mut (dyn Write + Send),
) -> Result<IngestReport, CliError> {
    let target = &config.target;
    let store = SqliteStore::open(&target.store, config.connections)?;
    create_indexes(&store, target)?;

    let encoder = PoiRecordEncoder::new(target.namespace.as_str(), target.set.as_str())
        .with_region(config.amenity.as_str(), config.radius_m);
    let options = IngestOptions {
        workers: config.workers,
        queue_capacity: config.queue_capacity,
        ..IngestOptions::default()
    };
    info!(
        "loading {} into {} with {} workers",
        config.input, target.store, config.workers
    );

    let mut source = open_source(&config.input);
    let progress = DotProgress::new(config.progress_interval, out);
    let outcome = run_ingest(
        source.as_mut(),
        store.connections(),
        &encoder,
        &options,
        &progress,
    );
    let writer = progress.into_inner();
    let report = outcome.map_err(|source| CliError::Load {
        path: config.input.clone(),
        source,
    })?;

    writeln!(writer)?;
    writeln!(
        writer,
        "Loaded {} points in {:.3} seconds",
        report.written,
        report.elapsed.as_secs_f64()
    )?;
    write_tally(writer, "amenity", encoder.amenities())?;
    write_tally(writer, "cuisine", encoder.cuisines())?;
    Ok(report)
}

fn create_indexes(store: &SqliteStore, target: &StoreTarget) -> Result<(), CliError> {
    let Some(connection) = store.connections().first() else {
        return Ok(());
    };
    for spec in index_specs(&target.namespace, &target.set) {
        connection
            .create_index(&spec)
            .map_err(|source| CliError::CreateIndex {
                name: spec.name.clone(),
                source,
            })?;
    }
    Ok(())
}

fn write_tally(
    out: &mut (dyn Write + Send),
    label: &str,
    tally: &TagTally,
) -> std::io::Result<()> {
    writeln!(out, "{label} counts:")?;
    for (value, count) in tally.sorted() {
        writeln!(out, "  {value}: {count}")?;
    }
    Ok(())
}
