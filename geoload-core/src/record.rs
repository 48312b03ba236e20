//! Geotagged records and the shared handle used to pass them between the
//! producer and the worker threads.

use std::{cmp::Ordering, collections::HashMap, fmt, ops::Deref, sync::Arc};

use geo::Coord;

/// Free-form key/value tags attached to a record.
pub type Tags = HashMap<String, String>;

/// One geotagged record produced from a qualifying input unit.
///
/// Coordinates are WGS84 with `x = longitude` and `y = latitude`.
///
/// # Examples
/// ```
/// use geo::Coord;
/// use geoload_core::{GeoRecord, Tags};
///
/// let record = GeoRecord::new(
///     42,
///     Coord { x: 13.4, y: 52.5 },
///     Tags::from([("name".into(), "Cafe".into())]),
/// );
/// assert_eq!(record.latitude(), 52.5);
/// assert_eq!(record.tag("name"), Some("Cafe"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct GeoRecord {
    /// Source identifier, e.g. an OSM node id.
    pub id: i64,
    /// Geospatial position.
    pub location: Coord<f64>,
    /// Tags copied from the input unit.
    pub tags: Tags,
}

impl GeoRecord {
    /// Construct a record from its parts.
    pub const fn new(id: i64, location: Coord<f64>, tags: Tags) -> Self {
        Self { id, location, tags }
    }

    /// Latitude in degrees.
    pub const fn latitude(&self) -> f64 {
        self.location.y
    }

    /// Longitude in degrees.
    pub const fn longitude(&self) -> f64 {
        self.location.x
    }

    /// Look up a tag value by key.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Wrap the record in a [`SharedRecord`] handle.
    pub fn into_shared(self) -> SharedRecord {
        SharedRecord::new(self)
    }
}

/// Shared-ownership handle over a [`GeoRecord`].
///
/// Cloning a handle bumps an atomic reference count; the record is dropped
/// when the last handle goes away, whichever thread releases it. Comparisons
/// delegate to the record's identifier, so two handles over distinct records
/// with the same id compare equal. Use [`SharedRecord::same`] to test identity.
///
/// # Examples
/// ```
/// use geo::Coord;
/// use geoload_core::{GeoRecord, Tags};
///
/// let first = GeoRecord::new(1, Coord { x: 0.0, y: 0.0 }, Tags::new()).into_shared();
/// let second = first.clone();
/// assert!(first.same(&second));
/// assert_eq!(first.handle_count(), 2);
/// drop(second);
/// assert_eq!(first.handle_count(), 1);
/// ```
#[derive(Clone)]
pub struct SharedRecord(Arc<GeoRecord>);

impl SharedRecord {
    /// Take ownership of `record` behind a new handle.
    pub fn new(record: GeoRecord) -> Self {
        Self(Arc::new(record))
    }

    /// Whether both handles point at the same allocation.
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Number of live handles for the underlying record.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Recover the record when this is the last handle, otherwise hand the
    /// handle back.
    pub fn try_unwrap(self) -> Result<GeoRecord, Self> {
        Arc::try_unwrap(self.0).map_err(Self)
    }
}

impl Deref for SharedRecord {
    type Target = GeoRecord;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<GeoRecord> for SharedRecord {
    fn from(record: GeoRecord) -> Self {
        Self::new(record)
    }
}

impl fmt::Debug for SharedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedRecord").field(&*self.0).finish()
    }
}

impl PartialEq for SharedRecord {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for SharedRecord {}

impl PartialOrd for SharedRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SharedRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.id.cmp(&other.0.id)
    }
}
