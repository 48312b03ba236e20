//! Capability-based filesystem helpers shared by the geoload crates.
//!
//! Paths are `camino` UTF-8 paths; every operation starts from an ambient
//! directory handle and works relative to it through `cap-std`.
#![forbid(unsafe_code)]

use std::io;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8};

/// Open an input file for reading.
pub fn open_input(path: &Utf8Path) -> io::Result<fs_utf8::File> {
    fs_utf8::File::open_ambient(path, ambient_authority())
}

/// Whether `path` names an existing regular file.
///
/// A missing file or parent directory yields `Ok(false)`.
pub fn is_regular_file(path: &Utf8Path) -> io::Result<bool> {
    let Some(name) = path.file_name() else {
        return Ok(false);
    };
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    let dir = match fs_utf8::Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    match dir.metadata(name) {
        Ok(meta) => Ok(meta.is_file()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Create every missing directory above `path`.
pub fn create_parent_dirs(path: &Utf8Path) -> io::Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    let (anchor, relative) = anchor_dir(parent)?;
    if relative.as_str().is_empty() {
        return Ok(());
    }
    anchor.create_dir_all(&relative)
}

/// Split `path` into an ambient anchor directory (root, drive prefix or the
/// current directory) and the remainder relative to it.
fn anchor_dir(path: &Utf8Path) -> io::Result<(fs_utf8::Dir, Utf8PathBuf)> {
    let mut anchor = Utf8PathBuf::new();
    let mut relative = Utf8PathBuf::new();
    for component in path.components() {
        match component {
            Utf8Component::Prefix(prefix) => anchor.push(prefix.as_str()),
            Utf8Component::RootDir => anchor.push(std::path::MAIN_SEPARATOR_STR),
            Utf8Component::CurDir => {}
            other => relative.push(other.as_str()),
        }
    }
    if anchor.as_str().is_empty() {
        anchor.push(".");
    }
    let dir = fs_utf8::Dir::open_ambient_dir(&anchor, ambient_authority())?;
    Ok((dir, relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use std::io::Read;
    use tempfile::TempDir;

    #[fixture]
    fn temp() -> TempDir {
        TempDir::new().expect("create temp dir")
    }

    fn utf8(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("UTF-8 temp path")
    }

    #[rstest]
    fn creates_nested_parents(temp: TempDir) {
        let target = utf8(&temp).join("a/b/c/store.db");
        create_parent_dirs(&target).expect("create parents");
        assert!(target.parent().expect("parent").is_dir());
        assert!(!is_regular_file(&target).expect("stat"));
    }

    #[rstest]
    fn bare_file_names_need_no_parents() {
        create_parent_dirs(Utf8Path::new("store.db")).expect("nothing to create");
    }

    #[rstest]
    fn reports_regular_files(temp: TempDir) {
        let root = utf8(&temp);
        let file = root.join("input.jsonl");
        std::fs::write(&file, "{}\n").expect("write file");
        assert!(is_regular_file(&file).expect("stat"));
        assert!(!is_regular_file(&root).expect("stat"));
        assert!(!is_regular_file(&root.join("missing/input.jsonl")).expect("stat"));
    }

    #[rstest]
    fn opens_inputs_for_reading(temp: TempDir) {
        let file = utf8(&temp).join("data.txt");
        std::fs::write(&file, "hello").expect("write file");
        let mut text = String::new();
        open_input(&file)
            .expect("open")
            .read_to_string(&mut text)
            .expect("read");
        assert_eq!(text, "hello");
    }
}
