use std::{
    env, io,
    path::{Path, PathBuf},
    result,
    time::Duration,
};

use geopack_shared::{
    log::warn,
    thiserror,
    walkdir::{DirEntry, WalkDir},
};

/// Extension of the asset description files.
pub const VISUAL_EXTENSION: &str = "visual";

/// Extension of the binary files that the packers produce.
pub const GEOMETRY_EXTENSION: &str = "geometry";

/// Extension of the artifacts that an interrupted packer run leaves in the source tree.
pub const TEMP_MODEL_EXTENSION: &str = "temp_model";

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Directory does not exist: {0}")]
    MissingDirectory(PathBuf),
    #[error("Expected a directory but found something else: {0}")]
    NotADirectory(PathBuf),
    #[error("File does not exist: {0}")]
    MissingFile(PathBuf),
    #[error("Expected a file but found something else: {0}")]
    NotAFile(PathBuf),
    #[error("Invalid path: {0}")]
    InvalidPath(PathBuf),
    #[error("Failed to create directory {path}: {source}")]
    FailedToCreateDirectory { path: PathBuf, source: io::Error },
    #[error("Failed to move {from} to {to}: {source}")]
    FailedToMove { from: PathBuf, to: PathBuf, source: io::Error },
    #[error("Failed to read the configuration file {path}: {message}")]
    InvalidConfiguration { path: PathBuf, message: String },
    #[error("Failed to start thread '{0}'")]
    FailedToStartThread(String),
    #[error("Failed to start the packer [{label}] with command '{command}': {source}")]
    PackerSpawn { label: String, command: String, source: io::Error },
    #[error("The packer [{label}] did not finish within {timeout:?} and was killed: {command}")]
    PackerTimeout { label: String, timeout: Duration, command: String },
    #[error("The packer [{label}] exited with {}: {command}", describe_exit_code(.code))]
    PackerFailed { label: String, code: Option<i32>, command: String },
    #[error("IoError: {0}")]
    IoError(#[from] io::Error),
}

fn describe_exit_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (terminated by a signal)".to_owned(),
    }
}

/// Returns whether the path has the given extension. The comparison ignores the case.
pub fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|path_extension| path_extension.to_str())
        .map_or(false, |path_extension| path_extension.eq_ignore_ascii_case(extension))
}

/// Checks that the path exists and is a directory.
pub fn check_directory(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(Error::MissingDirectory(path.to_owned()));
    }
    if !path.is_dir() {
        return Err(Error::NotADirectory(path.to_owned()));
    }
    Ok(())
}

/// Checks that the path exists and is a file.
pub fn check_file(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(Error::MissingFile(path.to_owned()));
    }
    if !path.is_file() {
        return Err(Error::NotAFile(path.to_owned()));
    }
    Ok(())
}

/// Makes a relative path absolute by joining it to the working directory.
pub(crate) fn absolute_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_owned())
    } else {
        Ok(env::current_dir()?.join(path))
    }
}

/// Path for log messages. Falls back to the full path when it's not inside `root`.
pub(crate) fn display_relative(path: &Path, root: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).display().to_string()
}

/// Collects all files below `root` that have the given extension, in a stable order.
///
/// Entries for which `descend` returns `false` are skipped together with their contents.
/// Entries that can't be read are reported and skipped.
pub(crate) fn collect_files_with_extension(root: &Path, extension: &str, descend: impl FnMut(&DirEntry) -> bool) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name().into_iter().filter_entry(descend) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Failed to read directory entry below '{}': {err}", root.display());
                continue;
            }
        };
        if entry.file_type().is_file() && has_extension(entry.path(), extension) {
            files.push(entry.into_path());
        }
    }
    files
}
