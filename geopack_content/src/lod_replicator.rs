//! Generates level-of-detail variants of the `.visual` files.
//!
//! For every `<source>/<dir>/<name>.visual` the replicator writes the copies
//! `<lod root>/<dir>/<name>_lod1.visual` up to `<name>_lod<N>.visual`. Inside each copy every
//! whole-word occurrence of `<name>` is renamed to `<name>_lod<k>` so that the copy references
//! its own geometry. Existing copies are never overwritten.

use std::{
    fs,
    path::{Path, PathBuf},
};

use geopack_shared::{
    log::{error, info, trace},
    pathdiff,
};

use crate::{
    common::{check_directory, collect_files_with_extension, display_relative, VISUAL_EXTENSION},
    Error, Result,
};

/// Number of variants that are generated per file unless configured otherwise.
pub const DEFAULT_LOD_COPIES: u32 = 3;

/// Counters of a [`replicate_lods`] run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LodReport {
    /// Number of variants that were written.
    pub generated: usize,
    /// Number of variants that already existed.
    pub skipped_existing: usize,
    /// Number of source files or variants that couldn't be processed.
    pub failed: usize,
}

/// Returns the file name of the `index`-th variant of a file with the given stem and extension.
pub fn lod_file_name(stem: &str, extension: Option<&str>, index: u32) -> String {
    match extension {
        Some(extension) => format!("{stem}_lod{index}.{extension}"),
        None => format!("{stem}_lod{index}"),
    }
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Replaces every occurrence of `word` that is not directly preceded or followed by an
/// identifier character (alphanumeric or `_`).
///
/// # Example
///
/// ```rust
/// use geopack_content::lod_replicator::replace_whole_word;
/// let text = "hull hull.primitives hullbar my_hull";
/// assert_eq!(
///     replace_whole_word(text, "hull", "hull_lod1"),
///     "hull_lod1 hull_lod1.primitives hullbar my_hull"
/// );
/// ```
pub fn replace_whole_word(text: &str, word: &str, replacement: &str) -> String {
    if word.is_empty() {
        return text.to_owned();
    }

    let mut result = String::with_capacity(text.len());
    // Everything before `copied` is already in `result`.
    let mut copied = 0;
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find(word) {
        let start = search_from + offset;
        let end = start + word.len();
        let free_before = text[..start].chars().next_back().map_or(true, |c| !is_identifier_char(c));
        let free_after = text[end..].chars().next().map_or(true, |c| !is_identifier_char(c));
        if free_before && free_after {
            result.push_str(&text[copied..start]);
            result.push_str(replacement);
            copied = end;
            search_from = end;
        } else {
            // A candidate may start inside a rejected one.
            search_from = start + text[start..].chars().next().map_or(1, char::len_utf8);
        }
    }
    result.push_str(&text[copied..]);
    result
}

/// Writes `copies` variants of every `.visual` file below `source` into `lod_root`.
///
/// Directories named like `lod_root` are not searched for source files, wherever they are
/// located below `source`, and neither is `lod_root` itself.
pub fn replicate_lods(source: &Path, lod_root: &Path, copies: u32) -> Result<LodReport> {
    check_directory(source)?;
    fs::create_dir_all(lod_root).map_err(|err| Error::FailedToCreateDirectory {
        path: lod_root.to_owned(),
        source: err,
    })?;
    info!("Generating {copies} LOD variants per file from '{}' in '{}'", source.display(), lod_root.display());

    let mut report = LodReport::default();
    let lod_directory_name = lod_root.file_name();
    let source_files = collect_files_with_extension(source, VISUAL_EXTENSION, |entry| {
        let is_lod_directory = entry.depth() > 0 && entry.file_type().is_dir() && Some(entry.file_name()) == lod_directory_name;
        entry.path() != lod_root && !is_lod_directory
    });
    for source_file in source_files {
        replicate_file(source, lod_root, &source_file, copies, &mut report);
    }

    info! {
        "Generated {} LOD variants ({} already existed, {} failed)",
        report.generated, report.skipped_existing, report.failed
    }
    Ok(report)
}

fn replicate_file(source: &Path, lod_root: &Path, source_file: &Path, copies: u32, report: &mut LodReport) {
    let Some(relative_path) = pathdiff::diff_paths(source_file, source) else {
        error!("Failed to get relative path of '{}' relative to '{}'", source_file.display(), source.display());
        report.failed += 1;
        return;
    };
    let Some(stem) = source_file.file_stem().and_then(|stem| stem.to_str()) else {
        error!("File name is not valid UTF-8: {}", source_file.display());
        report.failed += 1;
        return;
    };
    let extension = source_file.extension().and_then(|extension| extension.to_str());
    let destination_directory = match relative_path.parent() {
        Some(parent) => lod_root.join(parent),
        None => lod_root.to_owned(),
    };

    let content = match fs::read_to_string(source_file) {
        Ok(content) => content,
        Err(err) => {
            error!("Failed to read '{}': {err}", source_file.display());
            report.failed += 1;
            return;
        }
    };
    if let Err(err) = fs::create_dir_all(&destination_directory) {
        error!("Failed to create directory '{}': {err}", destination_directory.display());
        report.failed += 1;
        return;
    }

    for index in 1..=copies {
        let destination: PathBuf = destination_directory.join(lod_file_name(stem, extension, index));
        if destination.exists() {
            trace!("LOD variant already exists: {}", destination.display());
            report.skipped_existing += 1;
            continue;
        }

        let renamed = format!("{stem}_lod{index}");
        match fs::write(&destination, replace_whole_word(&content, stem, &renamed)) {
            Ok(()) => {
                report.generated += 1;
                info!("Generated: {}", display_relative(&destination, lod_root));
            }
            Err(err) => {
                report.failed += 1;
                error!("Failed to generate LOD{index} of '{}': {err}", source_file.display());
            }
        }
    }
}
