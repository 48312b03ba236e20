//! Command-line interface for loading points of interest into a store and
//! benchmarking region queries against it.
#![forbid(unsafe_code)]

use std::{io, num::NonZeroUsize};

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};

mod bench;
mod error;
mod load;
mod progress;
mod query;

pub use error::CliError;

use bench::BenchArgs;
use load::LoadArgs;
use query::{AroundArgs, ContainingArgs};

const ARG_INPUT: &str = "input";
const ARG_STORE: &str = "store";
const ARG_NAMESPACE: &str = "namespace";
const ARG_SET: &str = "set";
const ARG_AMENITY: &str = "amenity";
const ARG_RADIUS: &str = "radius";
const ARG_WORKERS: &str = "workers";
const ARG_CONNECTIONS: &str = "connections";
const ARG_QUEUE_CAPACITY: &str = "queue-capacity";
const ARG_PROGRESS_INTERVAL: &str = "progress-interval";
const ARG_THREADS: &str = "threads";
const ARG_TOTAL_POINTS: &str = "total-points";
const ARG_SAMPLES: &str = "samples";
const ARG_SAMPLE_OFFSET: &str = "sample-offset";
const ARG_LATITUDE: &str = "lat";
const ARG_LONGITUDE: &str = "lng";

const ENV_LOAD_INPUT: &str = "GEOLOAD_CMDS_LOAD_INPUT";
const ENV_AROUND_LATITUDE: &str = "GEOLOAD_CMDS_AROUND_LAT";
const ENV_AROUND_LONGITUDE: &str = "GEOLOAD_CMDS_AROUND_LNG";
const ENV_AROUND_RADIUS: &str = "GEOLOAD_CMDS_AROUND_RADIUS";
const ENV_CONTAINING_LATITUDE: &str = "GEOLOAD_CMDS_CONTAINING_LAT";
const ENV_CONTAINING_LONGITUDE: &str = "GEOLOAD_CMDS_CONTAINING_LNG";

const DEFAULT_STORE: &str = "geoload.db";
const DEFAULT_NAMESPACE: &str = "test";
const DEFAULT_SET: &str = "osm";

/// Run the geoload CLI with the current process arguments and environment.
///
/// Reports and progress go to stderr; query results go to stdout.
pub fn run() -> Result<(), CliError> {
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    match cli.command {
        Command::Load(args) => load::run_load(args, &mut io::stderr()),
        Command::Bench(args) => bench::run_bench(args, &mut io::stderr()),
        Command::Around(args) => query::run_around(args, &mut io::stdout().lock()),
        Command::Containing(args) => query::run_containing(args, &mut io::stdout().lock()),
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "geoload",
    about = "Load points of interest into a geospatial store and benchmark region queries",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load an OSM PBF or JSON-lines file into the store.
    Load(LoadArgs),
    /// Measure "regions containing this point" queries over sampled points.
    Bench(BenchArgs),
    /// Print the points within a radius of a position.
    Around(AroundArgs),
    /// Print the ids of the regions containing a position.
    Containing(ContainingArgs),
}

/// Store location and record set shared by every command.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StoreTarget {
    store: Utf8PathBuf,
    namespace: String,
    set: String,
}

impl StoreTarget {
    fn resolve(
        store: Option<Utf8PathBuf>,
        namespace: Option<String>,
        set: Option<String>,
    ) -> Self {
        Self {
            store: store.unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_STORE)),
            namespace: namespace.unwrap_or_else(|| DEFAULT_NAMESPACE.to_owned()),
            set: set.unwrap_or_else(|| DEFAULT_SET.to_owned()),
        }
    }
}

fn non_zero(
    value: Option<usize>,
    default: usize,
    field: &'static str,
) -> Result<NonZeroUsize, CliError> {
    NonZeroUsize::new(value.unwrap_or(default)).ok_or(CliError::InvalidArgument {
        field,
        reason: "must be greater than zero",
    })
}

fn required<T>(value: Option<T>, field: &'static str, env: &'static str) -> Result<T, CliError> {
    value.ok_or(CliError::MissingArgument { field, env })
}

fn require_existing(path: &Utf8Path, field: &'static str) -> Result<(), CliError> {
    match geoload_fs::is_regular_file(path) {
        Ok(true) => Ok(()),
        Ok(false) => Err(CliError::MissingSourceFile {
            field,
            path: path.to_path_buf(),
        }),
        Err(source) => Err(CliError::InspectSourcePath {
            field,
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn validate_position(latitude: f64, longitude: f64) -> Result<geo::Coord<f64>, CliError> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(CliError::InvalidArgument {
            field: ARG_LATITUDE,
            reason: "must lie within [-90, 90]",
        });
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(CliError::InvalidArgument {
            field: ARG_LONGITUDE,
            reason: "must lie within [-180, 180]",
        });
    }
    Ok(geo::Coord {
        x: longitude,
        y: latitude,
    })
}

fn validate_radius(radius: f64) -> Result<f64, CliError> {
    if radius.is_finite() && radius > 0.0 {
        Ok(radius)
    } else {
        Err(CliError::InvalidArgument {
            field: ARG_RADIUS,
            reason: "must be a positive number of metres",
        })
    }
}

#[cfg(test)]
mod tests;
