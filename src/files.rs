//! Small filesystem helpers over `cap-std` UTF-8 directories.
//!
//! Each helper opens the parent directory with ambient authority and then
//! operates on the file name inside it, mirroring how the state files under
//! the dock home are managed.

use std::fs::Permissions;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs_utf8::{Dir, OpenOptions};
use thiserror::Error;

/// Errors raised by filesystem helpers.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FsError {
    /// Raised when an I/O operation fails.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a path has no file name component.
    #[error("path {path} is missing a file name")]
    MissingFileName {
        /// Offending path.
        path: Utf8PathBuf,
    },
}

fn io_error(path: &Utf8Path, err: &io::Error) -> FsError {
    FsError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn split(path: &Utf8Path) -> Result<(&Utf8Path, &str), FsError> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let parent_dir = if parent.as_str().is_empty() {
        Utf8Path::new(".")
    } else {
        parent
    };
    let file_name = path.file_name().ok_or_else(|| FsError::MissingFileName {
        path: path.to_path_buf(),
    })?;
    Ok((parent_dir, file_name))
}

fn open_parent(path: &Utf8Path) -> Result<Option<(Dir, &str)>, FsError> {
    let (parent, file_name) = split(path)?;
    match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => Ok(Some((dir, file_name))),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_error(parent, &err)),
    }
}

fn create_parent(path: &Utf8Path) -> Result<(Dir, &str), FsError> {
    let (parent, file_name) = split(path)?;
    Dir::create_ambient_dir_all(parent, ambient_authority())
        .map_err(|err| io_error(parent, &err))?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|err| io_error(parent, &err))?;
    Ok((dir, file_name))
}

/// Returns `true` when `path` exists.
///
/// # Errors
///
/// Returns [`FsError`] when the parent directory cannot be inspected.
pub fn exists(path: &Utf8Path) -> Result<bool, FsError> {
    let Some((dir, file_name)) = open_parent(path)? else {
        return Ok(false);
    };
    dir.try_exists(file_name).map_err(|err| io_error(path, &err))
}

/// Reads `path`, returning `None` when it does not exist.
///
/// # Errors
///
/// Returns [`FsError`] when the file exists but cannot be read.
pub fn read_optional(path: &Utf8Path) -> Result<Option<String>, FsError> {
    let Some((dir, file_name)) = open_parent(path)? else {
        return Ok(None);
    };
    match dir.read_to_string(file_name) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_error(path, &err)),
    }
}

/// Writes `contents` to `path`, creating parent directories.
///
/// # Errors
///
/// Returns [`FsError`] when directories or the file cannot be written.
pub fn write(path: &Utf8Path, contents: impl AsRef<[u8]>) -> Result<(), FsError> {
    let (dir, file_name) = create_parent(path)?;
    dir.write(file_name, contents)
        .map_err(|err| io_error(path, &err))
}

/// Appends `contents` to `path`, creating it when missing.
///
/// # Errors
///
/// Returns [`FsError`] when the file cannot be opened or written.
pub fn append(path: &Utf8Path, contents: &str) -> Result<(), FsError> {
    let (dir, file_name) = create_parent(path)?;
    let mut options = OpenOptions::new();
    options.append(true).create(true);
    let mut file = dir
        .open_with(file_name, &options)
        .map_err(|err| io_error(path, &err))?;
    file.write_all(contents.as_bytes())
        .map_err(|err| io_error(path, &err))
}

/// Copies `from` to `to`, creating the destination's parent.
///
/// # Errors
///
/// Returns [`FsError`] when either side cannot be accessed.
pub fn copy(from: &Utf8Path, to: &Utf8Path) -> Result<(), FsError> {
    let contents = read_optional(from)?.ok_or_else(|| FsError::Io {
        path: from.to_path_buf(),
        message: String::from("file not found"),
    })?;
    write(to, contents)
}

/// Renames `from` over `to`, creating the destination's parent.
///
/// # Errors
///
/// Returns [`FsError`] when the source is missing or the rename fails,
/// including renames across filesystems.
pub fn rename(from: &Utf8Path, to: &Utf8Path) -> Result<(), FsError> {
    let (from_dir, from_name) = open_parent(from)?.ok_or_else(|| FsError::Io {
        path: from.to_path_buf(),
        message: String::from("file not found"),
    })?;
    let (to_dir, to_name) = create_parent(to)?;
    from_dir
        .rename(from_name, &to_dir, to_name)
        .map_err(|err| io_error(from, &err))
}

/// Removes `path`, returning `false` when it was already gone.
///
/// # Errors
///
/// Returns [`FsError`] when removal fails for another reason.
pub fn remove_file(path: &Utf8Path) -> Result<bool, FsError> {
    let Some((dir, file_name)) = open_parent(path)? else {
        return Ok(false);
    };
    match dir.remove_file(file_name) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(io_error(path, &err)),
    }
}

/// Creates `path` and all missing parents.
///
/// # Errors
///
/// Returns [`FsError`] when a directory cannot be created.
pub fn create_dir_all(path: &Utf8Path) -> Result<(), FsError> {
    Dir::create_ambient_dir_all(path, ambient_authority()).map_err(|err| io_error(path, &err))
}

/// Lists entry names in `path`; a missing directory yields an empty list.
///
/// # Errors
///
/// Returns [`FsError`] when the directory cannot be read.
pub fn list_dir(path: &Utf8Path) -> Result<Vec<String>, FsError> {
    let dir = match Dir::open_ambient_dir(path, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(io_error(path, &err)),
    };
    let mut names = Vec::new();
    for item in dir.entries().map_err(|err| io_error(path, &err))? {
        let entry = item.map_err(|err| io_error(path, &err))?;
        names.push(entry.file_name().map_err(|err| io_error(path, &err))?);
    }
    names.sort();
    Ok(names)
}

/// Applies unix permission bits to `path`.
///
/// # Errors
///
/// Returns [`FsError`] when permissions cannot be changed.
pub fn set_mode(path: &Utf8Path, mode: u32) -> Result<(), FsError> {
    std::fs::set_permissions(path, Permissions::from_mode(mode))
        .map_err(|err| io_error(path, &err))
}
