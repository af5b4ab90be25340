//! Operations that bring the working directories into the shape the pipeline expects.
//!
//! None of them keeps state between runs. Cleanup failures are reported as warnings while
//! failures that would corrupt the result (e.g. a geometry file that can't be moved) are errors.

use std::{
    collections::HashSet,
    ffi::OsStr,
    fs,
    path::{Path, PathBuf},
};

use geopack_shared::{
    byte_unit::{Byte, UnitType},
    log::{error, info, warn},
    pathdiff,
    walkdir::WalkDir,
};

use crate::{
    common::{check_directory, collect_files_with_extension, display_relative, GEOMETRY_EXTENSION, VISUAL_EXTENSION},
    Error, Result,
};

/// Counters of a [`purge_files_with_extension`] run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PurgeReport {
    pub removed: usize,
    pub failed: usize,
}

/// Counters of a [`flatten_geometry`] run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlattenReport {
    /// Number of geometry files that were moved to the root.
    pub moved: usize,
    /// Number of moved files that got a numbered name because the plain name was taken.
    pub renamed: usize,
    /// Number of subdirectories that were removed afterwards.
    pub removed_directories: usize,
    /// Number of subdirectories that couldn't be removed.
    pub failed_directories: usize,
}

/// Counters of a [`copy_forward_visuals`] run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CopyReport {
    pub copied: usize,
    /// Files whose destination was already written by an earlier source root.
    pub skipped_duplicates: usize,
    pub failed: usize,
}

/// Total size of all files below `path`.
fn directory_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}

/// Deletes the directory with all of its content and creates it again.
///
/// The deletion is best effort: when it fails, a warning is logged and the remaining content
/// stays in place. Only a failure to (re)create the directory is an error.
pub fn clear_directory(path: &Path) -> Result<()> {
    if path.exists() {
        let size = Byte::from_u64(directory_size(path)).get_appropriate_unit(UnitType::Binary);
        info!("Clearing directory '{}' (size: {size:.2})", path.display());

        if let Err(err) = fs::remove_dir_all(path) {
            warn!("Failed to remove directory '{}': {err}", path.display());
        }
        if path.exists() {
            warn!("Directory '{}' was not cleared completely, please check it manually", path.display());
        } else {
            info!("Cleared directory '{}'", path.display());
        }
    }

    fs::create_dir_all(path).map_err(|err| Error::FailedToCreateDirectory {
        path: path.to_owned(),
        source: err,
    })
}

/// Deletes all files below `root` that have the given extension.
pub fn purge_files_with_extension(root: &Path, extension: &str) -> PurgeReport {
    let mut report = PurgeReport::default();
    for path in collect_files_with_extension(root, extension, |_| true) {
        match fs::remove_file(&path) {
            Ok(()) => {
                report.removed += 1;
                info!("Deleted temporary file: {}", display_relative(&path, root));
            }
            Err(err) => {
                report.failed += 1;
                error!("Failed to delete '{}': {err}", path.display());
            }
        }
    }
    report
}

/// Deletes the directory containing previously generated LOD variants.
///
/// Returns whether the directory was deleted. A failed deletion is logged as a warning.
pub fn remove_lod_cache(lod_root: &Path) -> bool {
    if !lod_root.exists() {
        info!("No LOD directory to delete at '{}'", lod_root.display());
        return false;
    }
    match fs::remove_dir_all(lod_root) {
        Ok(()) => {
            info!("Deleted LOD directory '{}'", lod_root.display());
            true
        }
        Err(err) => {
            warn!("Failed to delete LOD directory '{}': {err}", lod_root.display());
            false
        }
    }
}

/// Returns `path` when nothing exists there. Otherwise returns the path with the smallest
/// number `n >= 1` for which `<stem> (<n>).<extension>` doesn't exist yet.
///
/// # Example
///
/// ```rust
/// use std::path::Path;
/// use geopack_content::reconciler::next_available_path;
/// let path = Path::new("this/directory/does/not/exist/part.geometry");
/// assert_eq!(next_available_path(path), path);
/// ```
pub fn next_available_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_owned();
    }
    let stem = path.file_stem().unwrap_or_default().to_string_lossy();
    let suffix = path
        .extension()
        .map(|extension| format!(".{}", extension.to_string_lossy()))
        .unwrap_or_default();
    let mut counter = 1;
    loop {
        let candidate = path.with_file_name(format!("{stem} ({counter}){suffix}"));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Moves all geometry files from the subdirectories of `root` into `root` and removes the
/// subdirectories afterwards.
///
/// Files are moved in path order so that the numbering of colliding names is stable.
pub fn flatten_geometry(root: &Path) -> Result<FlattenReport> {
    check_directory(root)?;
    info!("Moving geometry files to '{}'", root.display());

    let mut report = FlattenReport::default();
    let geometry_files = collect_files_with_extension(root, GEOMETRY_EXTENSION, |_| true)
        .into_iter()
        .filter(|path| path.parent() != Some(root));
    for source in geometry_files {
        let Some(file_name) = source.file_name() else {
            return Err(Error::InvalidPath(source));
        };
        let destination = next_available_path(&root.join(file_name));
        fs::rename(&source, &destination).map_err(|err| Error::FailedToMove {
            from: source.clone(),
            to: destination.clone(),
            source: err,
        })?;

        report.moved += 1;
        if destination.file_name() != Some(file_name) {
            report.renamed += 1;
        }
        info!("Moved {} -> {}", display_relative(&source, root), display_relative(&destination, root));
    }

    let (removed_directories, failed_directories) = prune_subdirectories(root);
    report.removed_directories = removed_directories;
    report.failed_directories = failed_directories;

    info! {
        "Moved {} geometry files ({} renamed), removed {} directories ({} failed)",
        report.moved, report.renamed, report.removed_directories, report.failed_directories
    }
    Ok(report)
}

/// Removes every directory below `root`, deepest first. Returns the number of removed and
/// failed directories.
fn prune_subdirectories(root: &Path) -> (usize, usize) {
    let directories = WalkDir::new(root)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.into_path())
        .collect::<Vec<_>>();

    let mut removed = 0;
    let mut failed = 0;
    for directory in directories {
        if !directory.exists() {
            continue;
        }
        match fs::remove_dir_all(&directory) {
            Ok(()) => {
                removed += 1;
                info!("Removed directory {}", display_relative(&directory, root));
            }
            Err(err) => {
                failed += 1;
                warn!("Failed to remove directory '{}': {err}", directory.display());
            }
        }
    }
    (removed, failed)
}

/// Copies the `.visual` files of all `source_roots` into `target` and keeps their relative
/// location.
///
/// A root whose last component is `lod_directory_name` is taken relative to its parent so that
/// its files keep the location they have inside the main source tree. When two roots produce
/// the same destination, the root that comes first wins.
pub fn copy_forward_visuals(source_roots: &[PathBuf], lod_directory_name: &str, target: &Path) -> Result<CopyReport> {
    fs::create_dir_all(target).map_err(|err| Error::FailedToCreateDirectory {
        path: target.to_owned(),
        source: err,
    })?;

    let mut report = CopyReport::default();
    let mut written = HashSet::new();
    for source_root in source_roots {
        if !source_root.is_dir() {
            warn!("Skipping source directory that doesn't exist: {}", source_root.display());
            continue;
        }

        let base = match source_root.parent() {
            Some(parent) if source_root.file_name() == Some(OsStr::new(lod_directory_name)) => parent,
            _ => source_root.as_path(),
        };
        info!("Copying visual files from '{}'", source_root.display());

        for visual_file in collect_files_with_extension(source_root, VISUAL_EXTENSION, |_| true) {
            let Some(relative_path) = pathdiff::diff_paths(&visual_file, base) else {
                error!("Failed to get relative path of '{}' relative to '{}'", visual_file.display(), base.display());
                report.failed += 1;
                continue;
            };
            let destination = target.join(&relative_path);
            if !written.insert(destination.clone()) {
                report.skipped_duplicates += 1;
                continue;
            }

            match copy_file(&visual_file, &destination) {
                Ok(()) => {
                    report.copied += 1;
                    info!("Copied {}", relative_path.display());
                }
                Err(err) => {
                    report.failed += 1;
                    error!("Failed to copy '{}' to '{}': {err}", visual_file.display(), destination.display());
                }
            }
        }
    }

    info! {
        "Copied {} visual files ({} duplicates skipped, {} failed)",
        report.copied, report.skipped_duplicates, report.failed
    }
    Ok(report)
}

fn copy_file(source: &Path, destination: &Path) -> std::io::Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(source, destination)?;
    let modified = fs::metadata(source)?.modified()?;
    fs::File::options().write(true).open(destination)?.set_modified(modified)
}
