//! Bin names shared by the record encoder, the benchmark and the query tools.

/// Source identifier (`Int`).
pub const ID: &str = "id";
/// Position as a GeoJSON point.
pub const LOCATION: &str = "loc";
/// Tags and coordinates as compact JSON text.
pub const VALUE: &str = "val";
/// Tags and coordinates as a nested map.
pub const MAP: &str = "map";
/// Uniformly distributed hash of the identifier (`Int`).
pub const HASH: &str = "hash";
/// `amenity` tag value.
pub const AMENITY: &str = "amenity";
/// `cuisine` tag value.
pub const CUISINE: &str = "cuisine";
/// Circular region around the position, for matching amenities.
pub const REGION: &str = "rgn";
