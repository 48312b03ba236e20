//! Record store abstraction.
//!
//! A store holds records made of named bins, keyed by
//! `(namespace, set, user_key)`. Secondary indexes must be registered before
//! a bin can be queried. Each [`StoreConnection`] is independent, so worker
//! pools spread their threads across several of them.

use std::collections::BTreeMap;

use geo::Coord;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::GeoJson;

/// Value held in a single bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum BinValue {
    /// 64-bit signed integer.
    Int(i64),
    /// Double-precision float.
    Double(f64),
    /// UTF-8 string.
    Str(String),
    /// GeoJSON geometry text.
    GeoJson(String),
    /// Nested string-keyed map.
    Map(BTreeMap<String, BinValue>),
}

impl BinValue {
    /// Approximate wire size of the value in bytes.
    pub fn payload_size(&self) -> u64 {
        match self {
            Self::Int(_) | Self::Double(_) => 8,
            Self::Str(text) | Self::GeoJson(text) => text.len() as u64,
            Self::Map(map) => map
                .iter()
                .map(|(key, value)| key.len() as u64 + value.payload_size())
                .sum(),
        }
    }
}

/// A record as held by the store: an ordered map of bin name to value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreRecord {
    bins: BTreeMap<String, BinValue>,
}

impl StoreRecord {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`StoreRecord::insert`].
    #[must_use]
    pub fn with_bin(mut self, name: impl Into<String>, value: BinValue) -> Self {
        self.insert(name, value);
        self
    }

    /// Set bin `name`, replacing any previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: BinValue) {
        self.bins.insert(name.into(), value);
    }

    /// Value of bin `name`.
    pub fn get(&self, name: &str) -> Option<&BinValue> {
        self.bins.get(name)
    }

    /// Integer value of bin `name`.
    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            BinValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// String value of bin `name`.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            BinValue::Str(value) => Some(value),
            _ => None,
        }
    }

    /// Parsed geometry of bin `name`. Malformed GeoJSON yields `None`.
    pub fn get_geojson(&self, name: &str) -> Option<GeoJson> {
        match self.get(name)? {
            BinValue::GeoJson(text) => GeoJson::parse(text).ok(),
            _ => None,
        }
    }

    /// Iterate over bins in name order.
    pub fn bins(&self) -> impl Iterator<Item = (&str, &BinValue)> {
        self.bins.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Number of bins.
    pub fn len(&self) -> usize {
        self.bins.len()
    }

    /// Whether the record has no bins.
    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Copy of the record restricted to `names`.
    #[must_use]
    pub fn select(&self, names: &[String]) -> Self {
        Self {
            bins: self
                .bins
                .iter()
                .filter(|(name, _)| names.contains(name))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        }
    }

    /// Bytes attributed to the record when it is returned by a query.
    pub fn payload_size(&self) -> u64 {
        self.bins.values().map(BinValue::payload_size).sum()
    }
}

/// Primary key of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    /// Top-level partition.
    pub namespace: String,
    /// Record set within the namespace.
    pub set: String,
    /// Caller-chosen integer key.
    pub user_key: i64,
}

impl RecordKey {
    /// Build a key from its parts.
    pub fn new(namespace: impl Into<String>, set: impl Into<String>, user_key: i64) -> Self {
        Self {
            namespace: namespace.into(),
            set: set.into(),
            user_key,
        }
    }
}

/// Kind of a secondary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// Integer bins, for range queries.
    Numeric,
    /// String bins, for equality queries.
    String,
    /// GeoJSON bins, for spatial queries.
    Geo2dSphere,
}

impl IndexKind {
    /// Stable lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Numeric => "numeric",
            Self::String => "string",
            Self::Geo2dSphere => "geo2dsphere",
        }
    }
}

/// Definition of a named secondary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Index name, unique per namespace.
    pub name: String,
    /// Namespace covered by the index.
    pub namespace: String,
    /// Set covered by the index.
    pub set: String,
    /// Indexed bin.
    pub bin: String,
    /// Index kind.
    pub kind: IndexKind,
}

/// Filter applied by a [`Query`].
#[derive(Debug, Clone, PartialEq)]
pub enum QueryPredicate {
    /// Integer bin within `[min, max]`.
    IntegerRange {
        /// Queried bin.
        bin: String,
        /// Inclusive lower bound.
        min: i64,
        /// Inclusive upper bound.
        max: i64,
    },
    /// Point bin within `radius_m` metres of `center`.
    GeoWithin {
        /// Queried bin.
        bin: String,
        /// Circle centre.
        center: Coord<f64>,
        /// Circle radius in metres.
        radius_m: f64,
    },
    /// Region bin containing `point`.
    GeoContains {
        /// Queried bin.
        bin: String,
        /// Probe position.
        point: Coord<f64>,
    },
}

impl QueryPredicate {
    /// Bin the predicate reads.
    pub fn bin(&self) -> &str {
        match self {
            Self::IntegerRange { bin, .. }
            | Self::GeoWithin { bin, .. }
            | Self::GeoContains { bin, .. } => bin,
        }
    }

    /// Index kind required to evaluate the predicate.
    pub const fn index_kind(&self) -> IndexKind {
        match self {
            Self::IntegerRange { .. } => IndexKind::Numeric,
            Self::GeoWithin { .. } | Self::GeoContains { .. } => IndexKind::Geo2dSphere,
        }
    }

    /// Whether `record` satisfies the predicate.
    pub fn matches(&self, record: &StoreRecord) -> bool {
        match self {
            Self::IntegerRange { bin, min, max } => record
                .get_int(bin)
                .is_some_and(|value| (*min..=*max).contains(&value)),
            Self::GeoWithin {
                bin,
                center,
                radius_m,
            } => record
                .get_geojson(bin)
                .is_some_and(|geometry| geometry.is_within(*center, *radius_m)),
            Self::GeoContains { bin, point } => record
                .get_geojson(bin)
                .is_some_and(|geometry| geometry.contains(*point)),
        }
    }
}

/// Secondary-index query over one set.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Namespace to scan.
    pub namespace: String,
    /// Set to scan.
    pub set: String,
    /// Bins to return; `None` returns every bin.
    pub bins: Option<Vec<String>>,
    /// Filter.
    pub predicate: QueryPredicate,
}

impl Query {
    /// Query returning every bin of matching records.
    pub fn new(
        namespace: impl Into<String>,
        set: impl Into<String>,
        predicate: QueryPredicate,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            set: set.into(),
            bins: None,
            predicate,
        }
    }

    /// Restrict the returned bins.
    #[must_use]
    pub fn select<I, S>(mut self, bins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bins = Some(bins.into_iter().map(Into::into).collect());
        self
    }

    /// Apply the bin projection to a matching record.
    pub fn project(&self, record: &StoreRecord) -> StoreRecord {
        match &self.bins {
            Some(bins) => record.select(bins),
            None => record.clone(),
        }
    }
}

/// Failure reported by a store, carrying its numeric status code.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("store error {code}: {message}")]
pub struct StoreError {
    /// Store status code.
    pub code: i32,
    /// Human-readable description.
    pub message: String,
}

impl StoreError {
    /// Generic client-side failure.
    pub const CLIENT: i32 = -1;
    /// Generic server-side failure.
    pub const SERVER: i32 = 1;
    /// Invalid request parameter.
    pub const PARAMETER: i32 = 4;
    /// An index with the same name but a different definition exists.
    pub const INDEX_FOUND: i32 = 200;
    /// No index covers the queried bin.
    pub const INDEX_NOT_FOUND: i32 = 201;

    /// Build an error from a code and message.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Connection to a record store.
///
/// Implementations must be safe to share between worker threads; each
/// connection is independent of the others.
pub trait StoreConnection: Send + Sync {
    /// Insert or replace the record stored under `key`.
    ///
    /// # Errors
    /// Returns the store's failure code and message.
    fn put(&self, key: &RecordKey, record: &StoreRecord) -> Result<(), StoreError>;

    /// Stream records matching `query`.
    ///
    /// `on_result` is called with `Some(record)` once per match and then with
    /// `None` once the stream is complete. Returning `false` ends the stream
    /// early, in which case no completion call follows.
    ///
    /// # Errors
    /// Returns the store's failure code and message, for example
    /// [`StoreError::INDEX_NOT_FOUND`] when no index covers the queried bin.
    fn query(
        &self,
        query: &Query,
        on_result: &mut dyn FnMut(Option<&StoreRecord>) -> bool,
    ) -> Result<(), StoreError>;

    /// Register a secondary index. Re-registering an identical index succeeds.
    ///
    /// # Errors
    /// Returns [`StoreError::INDEX_FOUND`] when the name is taken by a
    /// different definition.
    fn create_index(&self, spec: &IndexSpec) -> Result<(), StoreError>;
}

impl<C: StoreConnection + ?Sized> StoreConnection for &C {
    fn put(&self, key: &RecordKey, record: &StoreRecord) -> Result<(), StoreError> {
        (**self).put(key, record)
    }

    fn query(
        &self,
        query: &Query,
        on_result: &mut dyn FnMut(Option<&StoreRecord>) -> bool,
    ) -> Result<(), StoreError> {
        (**self).query(query, on_result)
    }

    fn create_index(&self, spec: &IndexSpec) -> Result<(), StoreError> {
        (**self).create_index(spec)
    }
}
