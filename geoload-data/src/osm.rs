//! OSM PBF node source.

use std::io::BufReader;

use camino::{Utf8Path, Utf8PathBuf};
use geo::Coord;
use geoload_core::{InputError, InputSource, TaggedPoint, Tags};
use log::debug;
use osmpbf::{Blob, BlobDecode, BlobReader, Element};

/// [`InputSource`] yielding the tagged nodes of an OSM PBF file.
///
/// Untagged nodes only carry way geometry and are not reported. Ways and
/// relations are ignored.
#[derive(Debug, Clone)]
pub struct OsmPbfSource {
    path: Utf8PathBuf,
}

impl OsmPbfSource {
    /// Source reading `path`.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Input path.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

/// Convert a node's parts into a unit; `None` for untagged nodes.
pub(crate) fn tagged_node<'a, T>(id: i64, lon: f64, lat: f64, tags: T) -> Option<TaggedPoint>
where
    T: IntoIterator<Item = (&'a str, &'a str)>,
{
    let tags: Tags = tags
        .into_iter()
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .collect();
    if tags.is_empty() {
        return None;
    }
    Some(TaggedPoint::new(id, Coord { x: lon, y: lat }, tags))
}

impl InputSource for OsmPbfSource {
    fn for_each_unit(
        &mut self,
        handler: &mut dyn FnMut(TaggedPoint) -> bool,
    ) -> Result<(), InputError> {
        let file = geoload_fs::open_input(&self.path).map_err(|source| InputError::Io {
            path: self.path.clone(),
            source,
        })?;
        let path = self.path.as_path();
        let blocks = BlobReader::new(BufReader::new(file)).map(|blob| block_units(blob, path));
        let nodes = feed_blocks(blocks, handler)?;
        debug!("read {nodes} tagged nodes from {}", self.path);
        Ok(())
    }
}

/// Decode one blob into its tagged nodes. Header blobs yield nothing.
fn block_units(
    blob: Result<Blob, osmpbf::Error>,
    path: &Utf8Path,
) -> Result<Vec<TaggedPoint>, InputError> {
    let decode_error = |source: osmpbf::Error| InputError::Decode {
        path: path.to_path_buf(),
        source: Box::new(source),
    };
    let blob = blob.map_err(decode_error)?;
    let BlobDecode::OsmData(block) = blob.decode().map_err(decode_error)? else {
        return Ok(Vec::new());
    };
    Ok(block
        .elements()
        .filter_map(|element| match element {
            Element::Node(node) => tagged_node(node.id(), node.lon(), node.lat(), node.tags()),
            Element::DenseNode(node) => tagged_node(node.id(), node.lon(), node.lat(), node.tags()),
            Element::Way(_) | Element::Relation(_) => None,
        })
        .collect())
}

/// Feed decoded blocks to `handler`, pulling no further block once it
/// declines a unit. Returns the number of units handed over.
pub(crate) fn feed_blocks<I>(
    blocks: I,
    handler: &mut dyn FnMut(TaggedPoint) -> bool,
) -> Result<u64, InputError>
where
    I: IntoIterator<Item = Result<Vec<TaggedPoint>, InputError>>,
{
    let mut nodes = 0_u64;
    for block in blocks {
        for unit in block? {
            nodes += 1;
            if !handler(unit) {
                return Ok(nodes);
            }
        }
    }
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn untagged_nodes_are_skipped() {
        assert!(tagged_node(1, 0.0, 0.0, std::iter::empty()).is_none());
    }

    #[rstest]
    fn tagged_nodes_keep_position_and_tags() {
        let unit = tagged_node(9, 13.4, 52.5, [("name", "Cafe"), ("amenity", "cafe")])
            .expect("tagged node");
        assert_eq!(unit.id, 9);
        assert_eq!(unit.location, Coord { x: 13.4, y: 52.5 });
        assert_eq!(unit.tags.get("amenity").map(String::as_str), Some("cafe"));
    }

    #[rstest]
    fn missing_file_is_an_io_error() {
        let mut source = OsmPbfSource::new("/nonexistent/planet.osm.pbf");
        let err = source
            .for_each_unit(&mut |_| true)
            .expect_err("file is missing");
        assert!(matches!(err, InputError::Io { .. }));
    }

    fn block(ids: std::ops::Range<i64>) -> Result<Vec<TaggedPoint>, InputError> {
        Ok(ids
            .filter_map(|id| tagged_node(id, 0.0, 0.0, [("name", "poi")]))
            .collect())
    }

    #[rstest]
    fn stops_pulling_blocks_once_the_handler_declines() {
        let pulled = std::cell::Cell::new(0_usize);
        let blocks = [0..3, 3..6, 6..9].into_iter().map(|ids| {
            pulled.set(pulled.get() + 1);
            block(ids)
        });
        let mut seen = Vec::new();
        let nodes = feed_blocks(blocks, &mut |unit| {
            seen.push(unit.id);
            unit.id < 1
        })
        .expect("blocks decode");
        assert_eq!(nodes, 2);
        assert_eq!(seen, vec![0, 1]);
        assert_eq!(pulled.get(), 1);
    }

    #[rstest]
    fn decode_errors_keep_their_source() {
        let failure = InputError::Decode {
            path: "planet.osm.pbf".into(),
            source: Box::new(std::io::Error::other("truncated blob")),
        };
        let blocks = [block(0..2), Err(failure), block(2..4)];
        let mut seen = 0;
        let err = feed_blocks(blocks, &mut |_| {
            seen += 1;
            true
        })
        .expect_err("second block fails");
        assert_eq!(seen, 2);
        let source = std::error::Error::source(&err).expect("decoder error is chained");
        assert_eq!(source.to_string(), "truncated blob");
    }
}
