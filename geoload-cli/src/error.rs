//! Error types emitted by the geoload CLI.
//!
//! Keep this error type reasonably small, as every command returns
//! `Result<_, CliError>`.

use std::sync::Arc;

use camino::Utf8PathBuf;
use geoload_core::{BenchError, IngestError, SamplingError, StoreError};
use geoload_data::SqliteStoreError;
use thiserror::Error;

/// Errors emitted by the geoload CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed Clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// Configuration layering failed (files, env, CLI).
    #[error("failed to load configuration: {0}")]
    Configuration(#[from] Arc<ortho_config::OrthoError>),
    /// A required option is missing after configuration merging.
    #[error("missing {field} (set --{field} or {env})")]
    MissingArgument {
        field: &'static str,
        env: &'static str,
    },
    /// A numeric option is outside its accepted range.
    #[error("invalid {field}: {reason}")]
    InvalidArgument {
        field: &'static str,
        reason: &'static str,
    },
    /// A referenced input path does not exist on disk or is not a file.
    #[error("{field} path {path:?} does not exist or is not a file")]
    MissingSourceFile {
        field: &'static str,
        path: Utf8PathBuf,
    },
    /// A referenced input path could not be inspected due to an IO error.
    #[error("failed to inspect {field} path {path:?}: {source}")]
    InspectSourcePath {
        field: &'static str,
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Opening the store failed.
    #[error(transparent)]
    OpenStore(#[from] SqliteStoreError),
    /// Registering a secondary index failed.
    #[error("failed to create index {name}: {source}")]
    CreateIndex {
        name: String,
        #[source]
        source: StoreError,
    },
    /// Loading the input failed.
    #[error("failed to load {path:?}: {source}")]
    Load {
        path: Utf8PathBuf,
        #[source]
        source: IngestError,
    },
    /// Picking benchmark samples failed.
    #[error(transparent)]
    Sampling(#[from] SamplingError),
    /// The benchmark failed.
    #[error(transparent)]
    Bench(#[from] BenchError),
    /// An interactive query failed.
    #[error("query failed: {0}")]
    Query(#[source] StoreError),
    /// Writing command output failed.
    #[error("failed to write output: {0}")]
    WriteOutput(#[from] std::io::Error),
}

impl CliError {
    /// Short category used to prefix the diagnostic line.
    pub fn category(&self) -> &'static str {
        match self {
            Self::ArgumentParsing(_)
            | Self::MissingArgument { .. }
            | Self::InvalidArgument { .. } => "arguments",
            Self::Configuration(_) => "configuration",
            Self::MissingSourceFile { .. } | Self::InspectSourcePath { .. } => "input",
            Self::OpenStore(_) | Self::CreateIndex { .. } => "store",
            Self::Load { .. } => "load",
            Self::Sampling(_) | Self::Bench(_) => "bench",
            Self::Query(_) => "query",
            Self::WriteOutput(_) => "output",
        }
    }
}
