//! Input formats, record encoding and storage backends for `geoload`.
//!
//! Responsibilities:
//! - Decode OSM PBF and JSON-lines files into tagged points.
//! - Encode loaded records into store bins and define their indexes.
//! - Provide a SQLite-backed [`geoload_core::StoreConnection`].
//!
//! Boundaries:
//! - Pipeline orchestration lives in `geoload-core`.
//! - Command-line handling lives in `geoload-cli`.

#![forbid(unsafe_code)]

use camino::Utf8Path;
use geoload_core::InputSource;

mod encode;
mod json_lines;
mod osm;
pub mod store;

pub use encode::{
    DEFAULT_AMENITY, DEFAULT_RADIUS_M, PoiRecordEncoder, TagTally, id_to_hash, index_specs,
};
pub use json_lines::JsonLinesSource;
pub use osm::OsmPbfSource;
pub use store::{SqliteConnection, SqliteStore, SqliteStoreError};

/// Input format, chosen from a file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// OpenStreetMap protocol buffer extract.
    OsmPbf,
    /// One JSON object per line.
    JsonLines,
}

impl InputFormat {
    /// Format for `path`: `.pbf` files are OSM extracts, anything else is
    /// read as JSON lines.
    ///
    /// # Examples
    /// ```
    /// use camino::Utf8Path;
    /// use geoload_data::InputFormat;
    ///
    /// assert_eq!(InputFormat::detect(Utf8Path::new("city.osm.pbf")), InputFormat::OsmPbf);
    /// assert_eq!(InputFormat::detect(Utf8Path::new("poi.jsonl")), InputFormat::JsonLines);
    /// ```
    pub fn detect(path: &Utf8Path) -> Self {
        match path.extension() {
            Some(extension) if extension.eq_ignore_ascii_case("pbf") => Self::OsmPbf,
            _ => Self::JsonLines,
        }
    }
}

/// Open the input at `path` with the decoder matching its extension.
///
/// Nothing is read until the returned source is traversed.
pub fn open_source(path: &Utf8Path) -> Box<dyn InputSource + Send> {
    match InputFormat::detect(path) {
        InputFormat::OsmPbf => Box::new(OsmPbfSource::new(path)),
        InputFormat::JsonLines => Box::new(JsonLinesSource::new(path)),
    }
}
