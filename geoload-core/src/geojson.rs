//! The small GeoJSON subset stored in geo bins: points and the store's
//! circular `AeroCircle` region.

use geo::{Coord, Distance, Haversine, Point};
use serde::{Deserialize, Serialize};

/// A geometry as stored in a [`BinValue::GeoJson`](crate::BinValue) bin.
///
/// # Examples
/// ```
/// use geo::Coord;
/// use geoload_core::GeoJson;
///
/// let circle = GeoJson::circle(Coord { x: 13.4, y: 52.5 }, 500.0);
/// assert_eq!(
///     circle.to_json(),
///     r#"{"type":"AeroCircle","coordinates":[[13.4,52.5],500.0]}"#
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GeoJson {
    /// Position as `[longitude, latitude]`.
    Point {
        /// `[longitude, latitude]`.
        coordinates: [f64; 2],
    },
    /// Circle as `[[longitude, latitude], radius_in_metres]`.
    AeroCircle {
        /// `[[longitude, latitude], radius_in_metres]`.
        coordinates: ([f64; 2], f64),
    },
}

impl GeoJson {
    /// Point geometry at `location`.
    pub const fn point(location: Coord<f64>) -> Self {
        Self::Point {
            coordinates: [location.x, location.y],
        }
    }

    /// Circle of `radius_m` metres around `center`.
    pub const fn circle(center: Coord<f64>, radius_m: f64) -> Self {
        Self::AeroCircle {
            coordinates: ([center.x, center.y], radius_m),
        }
    }

    /// Parse a GeoJSON string.
    ///
    /// # Errors
    /// Returns the decoder error for malformed JSON or unsupported types.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Compact JSON text.
    pub fn to_json(&self) -> String {
        // Serialising plain numbers into a String cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// The point's position, if this is a point.
    pub const fn as_point(&self) -> Option<Coord<f64>> {
        match self {
            Self::Point { coordinates: [x, y] } => Some(Coord { x: *x, y: *y }),
            Self::AeroCircle { .. } => None,
        }
    }

    /// Whether this geometry lies within `radius_m` metres of `center`.
    ///
    /// Only points qualify.
    pub fn is_within(&self, center: Coord<f64>, radius_m: f64) -> bool {
        self.as_point()
            .is_some_and(|p| distance_m(p, center) <= radius_m)
    }

    /// Whether this geometry contains `point`.
    ///
    /// Circles contain points on their boundary; points contain only
    /// themselves.
    pub fn contains(&self, point: Coord<f64>) -> bool {
        match self {
            Self::Point { .. } => self.as_point() == Some(point),
            Self::AeroCircle {
                coordinates: ([x, y], radius),
            } => distance_m(Coord { x: *x, y: *y }, point) <= *radius,
        }
    }
}

/// Great-circle distance in metres.
pub fn distance_m(a: Coord<f64>, b: Coord<f64>) -> f64 {
    Haversine.distance(Point::from(a), Point::from(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const BERLIN: Coord<f64> = Coord { x: 13.405, y: 52.52 };

    #[rstest]
    fn parses_point() {
        let geometry = GeoJson::parse(r#"{ "type": "Point", "coordinates": [13.405, 52.52] }"#)
            .expect("valid point");
        assert_eq!(geometry.as_point(), Some(BERLIN));
    }

    #[rstest]
    fn rejects_unknown_geometry() {
        let result = GeoJson::parse(r#"{ "type": "Polygon", "coordinates": [] }"#);
        assert!(result.is_err());
    }

    #[rstest]
    #[case(0.001, true)]
    #[case(0.01, false)]
    fn circle_contains_nearby_points(#[case] delta: f64, #[case] inside: bool) {
        let circle = GeoJson::circle(BERLIN, 500.0);
        let position = Coord {
            x: BERLIN.x,
            y: BERLIN.y + delta,
        };
        assert_eq!(circle.contains(position), inside);
        assert_eq!(GeoJson::point(position).is_within(BERLIN, 500.0), inside);
    }

    #[rstest]
    fn circles_are_never_within_a_radius() {
        assert!(!GeoJson::circle(BERLIN, 1.0).is_within(BERLIN, 1000.0));
    }

    #[rstest]
    fn round_trips_through_text() {
        let circle = GeoJson::circle(BERLIN, 250.0);
        assert_eq!(GeoJson::parse(&circle.to_json()).expect("valid"), circle);
    }
}
