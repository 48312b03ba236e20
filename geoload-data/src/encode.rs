//! Conversion of loaded records into store bins.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Mutex, PoisonError},
};

use geoload_core::{
    BinValue, GeoJson, GeoRecord, IndexKind, IndexSpec, RecordEncoder, RecordKey, StoreRecord,
    bins,
};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Default amenity that receives a circular region.
pub const DEFAULT_AMENITY: &str = "restaurant";
/// Default region radius in metres.
pub const DEFAULT_RADIUS_M: f64 = 500.0;

/// Map an identifier onto a uniformly distributed non-negative integer.
///
/// The value is the first eight bytes of the SHA-256 digest of the id's
/// little-endian bytes, read little-endian, with the sign bit cleared.
///
/// # Examples
/// ```
/// use geoload_data::id_to_hash;
///
/// let hash = id_to_hash(42);
/// assert!(hash >= 0);
/// assert_eq!(hash, id_to_hash(42));
/// assert_ne!(hash, id_to_hash(43));
/// ```
pub fn id_to_hash(id: i64) -> i64 {
    let digest = Sha256::digest(id.to_le_bytes());
    let mut head = [0_u8; 8];
    head.copy_from_slice(digest.get(..8).unwrap_or(&[0; 8]));
    i64::from_le_bytes(head) & i64::MAX
}

/// Thread-safe counts of tag values.
#[derive(Debug, Default)]
pub struct TagTally {
    counts: Mutex<HashMap<String, u64>>,
}

impl TagTally {
    /// Count one occurrence of `value`.
    pub fn add(&self, value: &str) {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        match counts.get_mut(value) {
            Some(count) => *count += 1,
            None => {
                counts.insert(value.to_owned(), 1);
            }
        }
    }

    /// Values with their counts, most frequent first, ties by value.
    pub fn sorted(&self) -> Vec<(String, u64)> {
        let counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        let mut sorted: Vec<_> = counts
            .iter()
            .map(|(value, count)| (value.clone(), *count))
            .collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        sorted
    }
}

/// Encodes points of interest into `id`, `loc`, `val`, `map`, `hash`,
/// `amenity`, `cuisine` and, for the configured amenity, `rgn` bins.
#[derive(Debug)]
pub struct PoiRecordEncoder {
    namespace: String,
    set: String,
    amenity: String,
    radius_m: f64,
    amenities: TagTally,
    cuisines: TagTally,
}

impl PoiRecordEncoder {
    /// Encoder for `namespace`/`set` with the default amenity and radius.
    pub fn new(namespace: impl Into<String>, set: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            set: set.into(),
            amenity: DEFAULT_AMENITY.to_owned(),
            radius_m: DEFAULT_RADIUS_M,
            amenities: TagTally::default(),
            cuisines: TagTally::default(),
        }
    }

    /// Give records tagged `amenity=<amenity>` a region of `radius_m` metres.
    #[must_use]
    pub fn with_region(mut self, amenity: impl Into<String>, radius_m: f64) -> Self {
        self.amenity = amenity.into();
        self.radius_m = radius_m;
        self
    }

    /// Amenity values seen so far.
    pub const fn amenities(&self) -> &TagTally {
        &self.amenities
    }

    /// Cuisine values seen so far.
    pub const fn cuisines(&self) -> &TagTally {
        &self.cuisines
    }

    fn value_json(record: &GeoRecord) -> String {
        let mut object: Map<String, Value> = record
            .tags
            .iter()
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect();
        object.insert("osmid".into(), Value::from(record.id));
        object.insert("latitude".into(), Value::from(record.latitude()));
        object.insert("longitude".into(), Value::from(record.longitude()));
        Value::Object(object).to_string()
    }

    fn value_map(record: &GeoRecord) -> BTreeMap<String, BinValue> {
        let mut map: BTreeMap<_, _> = record
            .tags
            .iter()
            .map(|(key, value)| (key.clone(), BinValue::Str(value.clone())))
            .collect();
        map.insert("osmid".into(), BinValue::Int(record.id));
        map.insert("latitude".into(), BinValue::Double(record.latitude()));
        map.insert("longitude".into(), BinValue::Double(record.longitude()));
        map
    }
}

impl RecordEncoder for PoiRecordEncoder {
    fn key(&self, record: &GeoRecord) -> RecordKey {
        RecordKey::new(self.namespace.as_str(), self.set.as_str(), record.id)
    }

    fn encode(&self, record: &GeoRecord) -> StoreRecord {
        let mut bins_out = StoreRecord::new()
            .with_bin(bins::ID, BinValue::Int(record.id))
            .with_bin(
                bins::LOCATION,
                BinValue::GeoJson(GeoJson::point(record.location).to_json()),
            )
            .with_bin(bins::VALUE, BinValue::Str(Self::value_json(record)))
            .with_bin(bins::MAP, BinValue::Map(Self::value_map(record)))
            .with_bin(bins::HASH, BinValue::Int(id_to_hash(record.id)));

        if let Some(amenity) = record.tag("amenity") {
            self.amenities.add(amenity);
            bins_out.insert(bins::AMENITY, BinValue::Str(amenity.to_owned()));
            if amenity == self.amenity {
                bins_out.insert(
                    bins::REGION,
                    BinValue::GeoJson(GeoJson::circle(record.location, self.radius_m).to_json()),
                );
            }
        }
        if let Some(cuisine) = record.tag("cuisine") {
            self.cuisines.add(cuisine);
            bins_out.insert(bins::CUISINE, BinValue::Str(cuisine.to_owned()));
        }
        bins_out
    }
}

/// Secondary indexes used by the loader and the query tools for `set`.
pub fn index_specs(namespace: &str, set: &str) -> Vec<IndexSpec> {
    [
        (bins::LOCATION, "loc", IndexKind::Geo2dSphere),
        (bins::HASH, "hsh", IndexKind::Numeric),
        (bins::AMENITY, "amen", IndexKind::String),
        (bins::CUISINE, "cuis", IndexKind::String),
        (bins::REGION, "rgn", IndexKind::Geo2dSphere),
    ]
    .into_iter()
    .map(|(bin, suffix, kind)| IndexSpec {
        name: format!("{set}-{suffix}-index"),
        namespace: namespace.to_owned(),
        set: set.to_owned(),
        bin: bin.to_owned(),
        kind,
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Coord;
    use geoload_core::Tags;
    use rstest::{fixture, rstest};

    fn record(id: i64, tags: &[(&str, &str)]) -> GeoRecord {
        let tags: Tags = tags
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect();
        GeoRecord::new(id, Coord { x: -0.12, y: 51.5 }, tags)
    }

    #[fixture]
    fn encoder() -> PoiRecordEncoder {
        PoiRecordEncoder::new("test", "osm")
    }

    #[rstest]
    fn hash_is_stable_and_non_negative() {
        for id in [-5, 0, 1, i64::MAX] {
            assert!(id_to_hash(id) >= 0);
        }
        let digest = Sha256::digest(1_i64.to_le_bytes());
        let mut head = [0_u8; 8];
        head.copy_from_slice(&digest[..8]);
        assert_eq!(id_to_hash(1), i64::from_le_bytes(head) & i64::MAX);
    }

    #[rstest]
    fn encodes_core_bins(encoder: PoiRecordEncoder) {
        let bins_out = encoder.encode(&record(7, &[("name", "The Crown")]));
        assert_eq!(bins_out.get_int(bins::ID), Some(7));
        assert_eq!(bins_out.get_int(bins::HASH), Some(id_to_hash(7)));
        assert_eq!(
            bins_out.get_geojson(bins::LOCATION).and_then(|g| g.as_point()),
            Some(Coord { x: -0.12, y: 51.5 })
        );
        let value: Value =
            serde_json::from_str(bins_out.get_str(bins::VALUE).expect("val bin")).expect("json");
        assert_eq!(value["name"], "The Crown");
        assert_eq!(value["osmid"], 7);
        assert_eq!(value["latitude"], 51.5);
        assert!(bins_out.get(bins::REGION).is_none());
        assert!(bins_out.get(bins::AMENITY).is_none());
        match bins_out.get(bins::MAP) {
            Some(BinValue::Map(map)) => {
                assert_eq!(map.get("osmid"), Some(&BinValue::Int(7)));
                assert_eq!(map.get("name"), Some(&BinValue::Str("The Crown".into())));
            }
            other => panic!("unexpected map bin: {other:?}"),
        }
    }

    #[rstest]
    #[case("restaurant", true)]
    #[case("cafe", false)]
    fn region_only_for_configured_amenity(
        encoder: PoiRecordEncoder,
        #[case] amenity: &str,
        #[case] has_region: bool,
    ) {
        let bins_out = encoder.encode(&record(1, &[("name", "x"), ("amenity", amenity)]));
        assert_eq!(bins_out.get_str(bins::AMENITY), Some(amenity));
        assert_eq!(bins_out.get(bins::REGION).is_some(), has_region);
        if has_region {
            assert_eq!(
                bins_out.get_geojson(bins::REGION),
                Some(GeoJson::circle(Coord { x: -0.12, y: 51.5 }, DEFAULT_RADIUS_M))
            );
        }
    }

    #[rstest]
    fn custom_region_settings_apply() {
        let encoder = PoiRecordEncoder::new("test", "osm").with_region("pub", 50.0);
        let bins_out = encoder.encode(&record(1, &[("amenity", "pub")]));
        assert_eq!(
            bins_out.get_geojson(bins::REGION),
            Some(GeoJson::circle(Coord { x: -0.12, y: 51.5 }, 50.0))
        );
    }

    #[rstest]
    fn tallies_sort_by_descending_count(encoder: PoiRecordEncoder) {
        for (id, cuisine) in [(1, "thai"), (2, "pizza"), (3, "thai"), (4, "burger")] {
            encoder.encode(&record(id, &[("amenity", "restaurant"), ("cuisine", cuisine)]));
        }
        assert_eq!(
            encoder.cuisines().sorted(),
            vec![
                ("thai".to_owned(), 2),
                ("burger".to_owned(), 1),
                ("pizza".to_owned(), 1)
            ]
        );
        assert_eq!(encoder.amenities().sorted(), vec![("restaurant".to_owned(), 4)]);
    }

    #[rstest]
    fn index_names_follow_the_set() {
        let specs = index_specs("test", "osm");
        let names: Vec<_> = specs.iter().map(|spec| spec.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "osm-loc-index",
                "osm-hsh-index",
                "osm-amen-index",
                "osm-cuis-index",
                "osm-rgn-index"
            ]
        );
    }
}
