//! Line-oriented JSON source: one object per line.
//!
//! Each object needs an integer `id` plus numeric `latitude` and `longitude`
//! fields. Every other field becomes a tag; strings are copied verbatim and
//! other values keep their compact JSON text.

use std::io::{BufRead, BufReader, Read};

use camino::{Utf8Path, Utf8PathBuf};
use geo::Coord;
use geoload_core::{InputError, InputSource, TaggedPoint, Tags};
use log::debug;
use serde_json::{Map, Value};

const ID: &str = "id";
const LATITUDE: &str = "latitude";
const LONGITUDE: &str = "longitude";

/// [`InputSource`] over a JSON-lines file.
#[derive(Debug, Clone)]
pub struct JsonLinesSource {
    path: Utf8PathBuf,
}

impl JsonLinesSource {
    /// Source reading `path`.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Input path.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Traverse lines from an arbitrary reader; `self.path` labels errors.
    pub fn read_from<R: Read>(
        &self,
        reader: R,
        handler: &mut dyn FnMut(TaggedPoint) -> bool,
    ) -> Result<(), InputError> {
        let mut skipped = 0_u64;
        for (index, line) in BufReader::new(reader).lines().enumerate() {
            let line_no = index + 1;
            let text = line.map_err(|source| InputError::Io {
                path: self.path.clone(),
                source,
            })?;
            if text.trim().is_empty() {
                continue;
            }
            match self.parse_line(&text, line_no)? {
                Some(unit) => {
                    if !handler(unit) {
                        break;
                    }
                }
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            debug!("skipped {skipped} lines without an id in {}", self.path);
        }
        Ok(())
    }

    fn parse_line(&self, text: &str, line: usize) -> Result<Option<TaggedPoint>, InputError> {
        let object: Map<String, Value> =
            serde_json::from_str(text).map_err(|source| InputError::Parse {
                path: self.path.clone(),
                line,
                source,
            })?;
        let Some(id) = object.get(ID) else {
            return Ok(None);
        };
        let id = id.as_i64().ok_or_else(|| self.invalid(line, ID))?;
        let latitude = self.coordinate(&object, LATITUDE, line)?;
        let longitude = self.coordinate(&object, LONGITUDE, line)?;
        let tags: Tags = object
            .into_iter()
            .filter(|(key, _)| !matches!(key.as_str(), ID | LATITUDE | LONGITUDE))
            .map(|(key, value)| (key, tag_text(value)))
            .collect();
        Ok(Some(TaggedPoint::new(
            id,
            Coord {
                x: longitude,
                y: latitude,
            },
            tags,
        )))
    }

    fn coordinate(
        &self,
        object: &Map<String, Value>,
        field: &'static str,
        line: usize,
    ) -> Result<f64, InputError> {
        let value = object.get(field).ok_or_else(|| InputError::MissingField {
            path: self.path.clone(),
            line,
            field,
        })?;
        value.as_f64().ok_or_else(|| self.invalid(line, field))
    }

    fn invalid(&self, line: usize, field: &'static str) -> InputError {
        InputError::InvalidField {
            path: self.path.clone(),
            line,
            field,
        }
    }
}

fn tag_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

impl InputSource for JsonLinesSource {
    fn for_each_unit(
        &mut self,
        handler: &mut dyn FnMut(TaggedPoint) -> bool,
    ) -> Result<(), InputError> {
        let file = geoload_fs::open_input(&self.path).map_err(|source| InputError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.read_from(file, handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn source() -> JsonLinesSource {
        JsonLinesSource::new("listings.jsonl")
    }

    fn collect(source: &JsonLinesSource, text: &str) -> Result<Vec<TaggedPoint>, InputError> {
        let mut units = Vec::new();
        source.read_from(text.as_bytes(), &mut |unit| {
            units.push(unit);
            true
        })?;
        Ok(units)
    }

    #[rstest]
    fn decodes_objects_into_units(source: JsonLinesSource) {
        let text = concat!(
            r#"{"id": 1, "latitude": 52.5, "longitude": 13.4, "name": "Cafe", "stars": 4.5}"#,
            "\n\n",
            r#"{"name": "no id"}"#,
            "\n",
            r#"{"id": 2, "latitude": -33.9, "longitude": 151.2, "open": true}"#,
            "\n",
        );
        let units = collect(&source, text).expect("valid input");
        assert_eq!(units.len(), 2);
        let first = units.first().expect("first unit");
        assert_eq!(first.location, Coord { x: 13.4, y: 52.5 });
        assert_eq!(first.tags.get("name").map(String::as_str), Some("Cafe"));
        assert_eq!(first.tags.get("stars").map(String::as_str), Some("4.5"));
        assert!(!first.tags.contains_key("latitude"));
        let second = units.get(1).expect("second unit");
        assert_eq!(second.tags.get("open").map(String::as_str), Some("true"));
    }

    #[rstest]
    #[case(r#"{"id": 3, "longitude": 1.0}"#, "latitude")]
    #[case(r#"{"id": 3, "latitude": 1.0}"#, "longitude")]
    fn missing_coordinates_are_fatal(
        source: JsonLinesSource,
        #[case] text: &str,
        #[case] expected: &str,
    ) {
        let err = collect(&source, text).expect_err("missing coordinate");
        match err {
            InputError::MissingField { line, field, .. } => {
                assert_eq!(line, 1);
                assert_eq!(field, expected);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[rstest]
    fn malformed_json_is_fatal(source: JsonLinesSource) {
        let text = "{\"id\": 1, \"latitude\": 0, \"longitude\": 0}\n{not json\n";
        let err = collect(&source, text).expect_err("bad json");
        assert!(matches!(err, InputError::Parse { line: 2, .. }));
    }

    #[rstest]
    fn non_numeric_id_is_rejected(source: JsonLinesSource) {
        let err = collect(&source, r#"{"id": "abc", "latitude": 0, "longitude": 0}"#)
            .expect_err("bad id");
        assert!(matches!(err, InputError::InvalidField { field: "id", .. }));
    }

    #[rstest]
    fn handler_can_stop_early(source: JsonLinesSource) {
        let text = "{\"id\": 1, \"latitude\": 0, \"longitude\": 0}\n\
                    {\"id\": 2, \"latitude\": 0, \"longitude\": 0}\n";
        let mut seen = 0;
        source
            .read_from(text.as_bytes(), &mut |_| {
                seen += 1;
                false
            })
            .expect("valid input");
        assert_eq!(seen, 1);
    }
}
