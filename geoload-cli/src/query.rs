//! Interactive `around` and `containing` queries.

use std::{io, io::Write, num::NonZeroUsize};

use camino::Utf8PathBuf;
use clap::Parser;
use geo::Coord;
use geoload_core::{Query, QueryPredicate, StoreConnection, StoreRecord, bins, containing_query};
use geoload_data::SqliteStore;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};

use crate::{
    ARG_AMENITY, ARG_LATITUDE, ARG_LONGITUDE, ARG_NAMESPACE, ARG_RADIUS, ARG_SET, ARG_STORE,
    CliError, ENV_AROUND_LATITUDE, ENV_AROUND_LONGITUDE, ENV_AROUND_RADIUS,
    ENV_CONTAINING_LATITUDE, ENV_CONTAINING_LONGITUDE, StoreTarget, require_existing, required,
    validate_position, validate_radius,
};

/// CLI arguments for the `around` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    long_about = "Print the stored value of every point within --radius \
                 metres of the given position, optionally keeping only one \
                 amenity.",
    about = "Find points near a position"
)]
#[ortho_config(prefix = "GEOLOAD")]
pub(crate) struct AroundArgs {
    /// Latitude in degrees.
    #[arg(value_name = "lat", allow_negative_numbers = true)]
    #[serde(default)]
    pub(crate) lat: Option<f64>,
    /// Longitude in degrees.
    #[arg(value_name = "lng", allow_negative_numbers = true)]
    #[serde(default)]
    pub(crate) lng: Option<f64>,
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
    /// Search radius in metres.
    #[arg(long = ARG_RADIUS, value_name = "metres")]
    #[serde(default)]
    pub(crate) radius: Option<f64>,
    /// Only report points with this amenity.
    #[arg(long = ARG_AMENITY, value_name = "value")]
    #[serde(default)]
    pub(crate) amenity: Option<String>,
}

impl AroundArgs {
    pub(crate) fn into_config(self) -> Result<AroundConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        AroundConfig::try_from(merged)
    }
}

/// Resolved `around` command configuration.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AroundConfig {
    pub(crate) target: StoreTarget,
    pub(crate) center: Coord<f64>,
    pub(crate) radius_m: f64,
    pub(crate) amenity: Option<String>,
}

impl TryFrom<AroundArgs> for AroundConfig {
    type Error = CliError;

    fn try_from(args: AroundArgs) -> Result<Self, Self::Error> {
        let lat = required(args.lat, ARG_LATITUDE, ENV_AROUND_LATITUDE)?;
        let lng = required(args.lng, ARG_LONGITUDE, ENV_AROUND_LONGITUDE)?;
        let radius = required(args.radius, ARG_RADIUS, ENV_AROUND_RADIUS)?;
        Ok(Self {
            target: StoreTarget::resolve(args.store, args.namespace, args.set),
            center: validate_position(lat, lng)?,
            radius_m: validate_radius(radius)?,
            amenity: args.amenity,
        })
    }
}

/// CLI arguments for the `containing` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(about = "Find the regions containing a position")]
#[ortho_config(prefix = "GEOLOAD")]
pub(crate) struct ContainingArgs {
    /// Latitude in degrees.
    #[arg(value_name = "lat", allow_negative_numbers = true)]
    #[serde(default)]
    pub(crate) lat: Option<f64>,
    /// Longitude in degrees.
    #[arg(value_name = "lng", allow_negative_numbers = true)]
    #[serde(default)]
    pub(crate) lng: Option<f64>,
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
}

impl ContainingArgs {
    pub(crate) fn into_config(self) -> Result<ContainingConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        ContainingConfig::try_from(merged)
    }
}

/// Resolved `containing` command configuration.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ContainingConfig {
    pub(crate) target: StoreTarget,
    pub(crate) point: Coord<f64>,
}

impl TryFrom<ContainingArgs> for ContainingConfig {
    type Error = CliError;

    fn try_from(args: ContainingArgs) -> Result<Self, Self::Error> {
        let lat = required(args.lat, ARG_LATITUDE, ENV_CONTAINING_LATITUDE)?;
        let lng = required(args.lng, ARG_LONGITUDE, ENV_CONTAINING_LONGITUDE)?;
        Ok(Self {
            target: StoreTarget::resolve(args.store, args.namespace, args.set),
            point: validate_position(lat, lng)?,
        })
    }
}

pub(crate) fn run_around(args: AroundArgs, out: &mut dyn Write) -> Result<(), CliError> {
    let config = args.into_config()?;
    around(&config, out).map(|_| ())
}

pub(crate) fn run_containing(args: ContainingArgs, out: &mut dyn Write) -> Result<(), CliError> {
    let config = args.into_config()?;
    containing(&config, out).map(|_| ())
}

/// Print the `val` bin of every point near `config.center`; returns how many
/// were printed.
pub(crate) fn around(config: &AroundConfig, out: &mut dyn Write) -> Result<u64, CliError> {
    let target = &config.target;
    let query = Query::new(
        target.namespace.as_str(),
        target.set.as_str(),
        QueryPredicate::GeoWithin {
            bin: bins::LOCATION.to_owned(),
            center: config.center,
            radius_m: config.radius_m,
        },
    )
    .select([bins::VALUE, bins::AMENITY]);
    // The store has no compound predicates, so the amenity is filtered here.
    let wanted = |record: &StoreRecord| {
        config
            .amenity
            .as_deref()
            .is_none_or(|amenity| record.get_str(bins::AMENITY) == Some(amenity))
    };
    stream(target, &query, out, |record, out| {
        if !wanted(record) {
            return Ok(false);
        }
        match record.get_str(bins::VALUE) {
            Some(value) => writeln!(out, "{value}").map(|()| true),
            None => Ok(false),
        }
    })
}

/// Print the `id` of every region containing `config.point`; returns how many
/// were printed.
pub(crate) fn containing(config: &ContainingConfig, out: &mut dyn Write) -> Result<u64, CliError> {
    let target = &config.target;
    let query = containing_query(&target.namespace, &target.set, config.point);
    stream(target, &query, out, |record, out| {
        match record.get_int(bins::ID) {
            Some(id) => writeln!(out, "{id}").map(|()| true),
            None => Ok(false),
        }
    })
}

// Run `query` against a single connection, feeding each record to `emit`,
// which reports whether it printed anything.
fn stream<F>(
    target: &StoreTarget,
    query: &Query,
    out: &mut dyn Write,
    mut emit: F,
) -> Result<u64, CliError>
where
    F: FnMut(&StoreRecord, &mut dyn Write) -> io::Result<bool>,
{
    // Opening creates missing databases, which only `load` should do.
    require_existing(&target.store, ARG_STORE)?;
    let store = SqliteStore::open(&target.store, NonZeroUsize::MIN)?;
    let Some(connection) = store.connections().first() else {
        return Ok(0);
    };
    let mut printed = 0_u64;
    let mut failure = None;
    connection
        .query(query, &mut |record| {
            let Some(record) = record else {
                return true;
            };
            match emit(record, out) {
                Ok(shown) => {
                    printed += u64::from(shown);
                    true
                }
                Err(err) => {
                    failure = Some(err);
                    false
                }
            }
        })
        .map_err(CliError::Query)?;
    match failure {
        Some(err) => Err(CliError::WriteOutput(err)),
        None => Ok(printed),
    }
}
