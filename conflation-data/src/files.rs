//! Capability-based file helpers built on `cap-std` and `camino`.

use std::io;
use std::path::Component;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8};

/// Open the directory holding `path` and return it with the file name.
///
/// # Errors
///
/// Fails when `path` has no file name or the directory cannot be opened.
pub fn open_dir_and_file(path: &Utf8Path) -> io::Result<(fs_utf8::Dir, String)> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::other(format!("{path} does not name a file")))?
        .to_owned();
    let dir = fs_utf8::Dir::open_ambient_dir(parent, ambient_authority())?;
    Ok((dir, file_name))
}

/// Whether `path` exists and is a regular file.
///
/// A missing parent directory counts as "no file".
///
/// # Errors
///
/// Propagates I/O failures other than `NotFound`.
pub fn file_exists(path: &Utf8Path) -> io::Result<bool> {
    let (dir, name) = match open_dir_and_file(path) {
        Ok(opened) => opened,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    match dir.metadata(name.as_str()) {
        Ok(meta) => Ok(meta.is_file()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Whether `path` is a regular file.
///
/// # Errors
///
/// Propagates I/O failures, including `NotFound` for missing paths.
pub fn file_is_file(path: &Utf8Path) -> io::Result<bool> {
    let (dir, name) = open_dir_and_file(path)?;
    dir.metadata(name.as_str()).map(|meta| meta.is_file())
}

/// Read a UTF-8 text file.
///
/// # Errors
///
/// Propagates I/O and UTF-8 decoding failures.
pub fn read_to_string(path: &Utf8Path) -> io::Result<String> {
    let (dir, name) = open_dir_and_file(path)?;
    dir.read_to_string(name.as_str())
}

/// Write `contents` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Propagates I/O failures.
pub fn write_string(path: &Utf8Path, contents: &str) -> io::Result<()> {
    ensure_parent_dir(path)?;
    let (dir, name) = open_dir_and_file(path)?;
    dir.write(name.as_str(), contents)
}

/// Create the parent directory of `path` if it is missing.
///
/// # Errors
///
/// Propagates I/O failures.
pub fn ensure_parent_dir(path: &Utf8Path) -> io::Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_str().is_empty() || parent == Utf8Path::new("/") {
        return Ok(());
    }
    let (base_dir, relative) = base_dir_and_relative(parent)?;
    if relative.as_str().is_empty() {
        return Ok(());
    }
    base_dir.create_dir_all(&relative)
}

/// Split a directory path into an ambient base directory and the relative
/// remainder, so absolute paths can be created through `cap-std`.
fn base_dir_and_relative(parent: &Utf8Path) -> io::Result<(fs_utf8::Dir, Utf8PathBuf)> {
    let (base, relative) = match parent.as_std_path().components().next() {
        Some(Component::Prefix(_) | Component::RootDir) => {
            let root = parent
                .ancestors()
                .last()
                .unwrap_or(parent)
                .to_path_buf();
            let relative = parent
                .strip_prefix(&root)
                .map_err(|_| io::Error::other(format!("cannot strip {root} from {parent}")))?
                .to_path_buf();
            (root, relative)
        }
        _ => (Utf8PathBuf::from("."), parent.to_path_buf()),
    };
    let dir = fs_utf8::Dir::open_ambient_dir(&base, ambient_authority())?;
    Ok((dir, relative))
}
