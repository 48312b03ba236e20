//! Input decoding interface used by the producer thread.

use std::{error::Error, io};

use camino::Utf8PathBuf;
use geo::Coord;
use thiserror::Error;

use crate::{GeoRecord, Tags};

/// One decoded input unit: an identified, tagged position.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedPoint {
    /// Source identifier.
    pub id: i64,
    /// WGS84 position, `x = longitude`, `y = latitude`.
    pub location: Coord<f64>,
    /// Tags carried by the unit.
    pub tags: Tags,
}

impl TaggedPoint {
    /// Build a unit from its parts.
    pub const fn new(id: i64, location: Coord<f64>, tags: Tags) -> Self {
        Self { id, location, tags }
    }

    /// Whether the unit carries tag `key`.
    pub fn has_tag(&self, key: &str) -> bool {
        self.tags.contains_key(key)
    }
}

impl From<TaggedPoint> for GeoRecord {
    fn from(point: TaggedPoint) -> Self {
        Self::new(point.id, point.location, point.tags)
    }
}

/// Errors raised while decoding input.
#[derive(Debug, Error)]
pub enum InputError {
    /// Reading the input failed.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Input path.
        path: Utf8PathBuf,
        /// Source error.
        #[source]
        source: io::Error,
    },
    /// A line was not valid JSON.
    #[error("{path}:{line}: invalid JSON: {source}")]
    Parse {
        /// Input path.
        path: Utf8PathBuf,
        /// One-based line number.
        line: usize,
        /// Source error.
        #[source]
        source: serde_json::Error,
    },
    /// A qualifying unit lacked a required field.
    #[error("{path}:{line}: missing required field `{field}`")]
    MissingField {
        /// Input path.
        path: Utf8PathBuf,
        /// One-based line number.
        line: usize,
        /// Missing field name.
        field: &'static str,
    },
    /// A field held a value of the wrong type.
    #[error("{path}:{line}: field `{field}` has an invalid value")]
    InvalidField {
        /// Input path.
        path: Utf8PathBuf,
        /// One-based line number.
        line: usize,
        /// Offending field name.
        field: &'static str,
    },
    /// A binary container could not be decoded.
    #[error("failed to decode {path}: {source}")]
    Decode {
        /// Input path.
        path: Utf8PathBuf,
        /// Decoder error.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

/// A source of input units, traversed exactly once.
pub trait InputSource {
    /// Feed every unit to `handler` in input order, blocking until done.
    ///
    /// Returning `false` from `handler` stops the traversal early without
    /// error.
    ///
    /// # Errors
    /// Returns [`InputError`] when the input cannot be read or decoded.
    fn for_each_unit(
        &mut self,
        handler: &mut dyn FnMut(TaggedPoint) -> bool,
    ) -> Result<(), InputError>;
}
