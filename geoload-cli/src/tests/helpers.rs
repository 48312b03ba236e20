//! Test helpers for building throwaway datasets and stores.

use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use tempfile::TempDir;

pub(super) const LISTINGS: &str = concat!(
    r#"{"id": 1, "latitude": 51.5000, "longitude": -0.1200, "name": "Rules", "amenity": "restaurant", "cuisine": "british"}"#,
    "\n",
    r#"{"id": 2, "latitude": 51.5005, "longitude": -0.1200, "name": "Monmouth", "amenity": "cafe"}"#,
    "\n",
    r#"{"id": 3, "latitude": 51.6000, "longitude": -0.2000, "name": "Dishoom", "amenity": "restaurant", "cuisine": "indian"}"#,
    "\n",
    r#"{"id": 4, "latitude": 51.7000, "longitude": -0.3000, "amenity": "bench"}"#,
    "\n",
);

/// Temporary directory holding an input file and a store path.
pub(super) struct Workspace {
    _dir: TempDir,
    root: Utf8PathBuf,
}

impl Workspace {
    pub(super) fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 workspace");
        Self { _dir: dir, root }
    }

    pub(super) fn write(&self, name: &str, contents: &str) -> Utf8PathBuf {
        let path = self.root.join(name);
        write_utf8(&path, contents.as_bytes());
        path
    }

    pub(super) fn store(&self) -> Utf8PathBuf {
        self.root.join("artefacts/geoload.db")
    }
}

pub(super) fn write_utf8(path: &Utf8Path, contents: &[u8]) {
    fs::write(path.as_std_path(), contents).expect("write file");
}
