//! Removes the `Shape` suffix from node names in `.visual` files.
//!
//! The old packer names the nodes that carry geometry `<prefix>Shape`, the new one expects
//! just `<prefix>`:
//!
//! ```text
//! <node>turretShape</node>   =>   <node>turret</node>
//! ```
//!
//! Only a suffix that is immediately followed by `</node>` and preceded by at least one word
//! character is removed. Everything else in the file stays untouched byte for byte.

use std::{borrow::Cow, fs, io, path::Path, sync::OnceLock};

use geopack_shared::{
    log::{error, info, trace},
    regex::Regex,
};

use crate::{
    common::{check_directory, collect_files_with_extension, VISUAL_EXTENSION},
    Result,
};

/// Counters of a [`strip_shape_tags`] run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TagStripReport {
    /// Number of `.visual` files that were found.
    pub visited: usize,
    /// Number of files whose content changed and that were written back.
    pub rewritten: usize,
    /// Number of files that couldn't be read or written.
    pub failed: usize,
}

fn shape_suffix_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?P<prefix>\w+)Shape</node>").expect("the shape suffix pattern is valid"))
}

/// Replaces every `<prefix>Shape</node>` by `<prefix></node>`.
///
/// # Example
///
/// ```rust
/// use geopack_content::tag_stripper::strip_shape_suffix;
/// let text = "<node>hullShape</node><node>gun</node>";
/// assert_eq!(strip_shape_suffix(text), "<node>hull</node><node>gun</node>");
/// ```
pub fn strip_shape_suffix(text: &str) -> Cow<'_, str> {
    shape_suffix_pattern().replace_all(text, "${prefix}</node>")
}

/// Rewrites all `.visual` files below `root` in place.
///
/// Files that can't be processed are reported and counted but don't stop the run.
pub fn strip_shape_tags(root: &Path) -> Result<TagStripReport> {
    check_directory(root)?;
    info!("Stripping shape suffixes in '{}'", root.display());

    let mut report = TagStripReport::default();
    for path in collect_files_with_extension(root, VISUAL_EXTENSION, |_| true) {
        report.visited += 1;
        match strip_file(&path) {
            Ok(true) => {
                report.rewritten += 1;
                info!("Stripped shape suffixes: {}", path.display());
            }
            Ok(false) => trace!("No shape suffixes in: {}", path.display()),
            Err(err) => {
                report.failed += 1;
                error!("Failed to strip shape suffixes in '{}': {err}", path.display());
            }
        }
    }

    info! {
        "Stripped shape suffixes in {} of {} files ({} failed)",
        report.rewritten, report.visited, report.failed
    }
    Ok(report)
}

/// Returns whether the file was rewritten.
fn strip_file(path: &Path) -> io::Result<bool> {
    let content = fs::read_to_string(path)?;
    match strip_shape_suffix(&content) {
        Cow::Borrowed(_) => Ok(false),
        Cow::Owned(stripped) => {
            fs::write(path, stripped)?;
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use geopack_shared::function_name;
    use geopack_test::{read_file, setup_logger, temp_root, write_file};

    use super::*;

    #[test]
    fn strips_suffix_before_closing_node() {
        assert_eq!(strip_shape_suffix("<node>hullShape</node>"), "<node>hull</node>");
    }

    #[test]
    fn strips_every_occurrence_independently() {
        let text = "<a><node>hullShape</node>\n<node>gun_01Shape</node>\n</a>";
        assert_eq!(strip_shape_suffix(text), "<a><node>hull</node>\n<node>gun_01</node>\n</a>");
    }

    #[test]
    fn keeps_shape_without_closing_node() {
        let text = "<node>hullShape</name><identifier>hullShape</identifier> hullShape </node>";
        assert!(matches!(strip_shape_suffix(text), Cow::Borrowed(_)));
    }

    #[test]
    fn keeps_shape_without_prefix() {
        let text = "<node>Shape</node>";
        assert_eq!(strip_shape_suffix(text), text);
    }

    #[test]
    fn strips_only_last_shape() {
        assert_eq!(strip_shape_suffix("<node>hullShapeShape</node>"), "<node>hullShape</node>");
    }

    #[test]
    fn rewrites_files_in_place() {
        setup_logger();
        let root = temp_root(function_name!());
        let changed = write_file(root.path(), "tank/hull.visual", "<root>\n\t<node>hullShape</node>\n</root>\n");
        let unchanged = write_file(root.path(), "tank/turret.visual", "<root>\n\t<node>turret</node>\n</root>\n");
        let other = write_file(root.path(), "tank/notes.txt", "<node>hullShape</node>");

        let report = strip_shape_tags(root.path()).unwrap();

        assert_eq!(
            report,
            TagStripReport {
                visited: 2,
                rewritten: 1,
                failed: 0
            }
        );
        assert_eq!(read_file(&changed), "<root>\n\t<node>hull</node>\n</root>\n");
        assert_eq!(read_file(&unchanged), "<root>\n\t<node>turret</node>\n</root>\n");
        assert_eq!(read_file(&other), "<node>hullShape</node>");
    }

    #[test]
    fn shorter_content_is_truncated() {
        setup_logger();
        let root = temp_root(function_name!());
        let path = write_file(root.path(), "a.visual", "<node>aShape</node><node>bShape</node>");
        strip_shape_tags(root.path()).unwrap();
        assert_eq!(read_file(&path), "<node>a</node><node>b</node>");
    }

    #[test]
    fn second_run_changes_nothing() {
        setup_logger();
        let root = temp_root(function_name!());
        write_file(root.path(), "a.visual", "<node>aShape</node>");
        strip_shape_tags(root.path()).unwrap();
        let report = strip_shape_tags(root.path()).unwrap();
        assert_eq!(report.rewritten, 0);
        assert_eq!(report.visited, 1);
    }

    #[test]
    fn invalid_utf8_is_counted_and_skipped() {
        setup_logger();
        let root = temp_root(function_name!());
        let broken = write_file(root.path(), "a/broken.visual", [0xff, 0xfe, 0x00, b'S']);
        let good = write_file(root.path(), "b/good.visual", "<node>goodShape</node>");

        let report = strip_shape_tags(root.path()).unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.rewritten, 1);
        assert_eq!(fs::read(&broken).unwrap(), vec![0xff, 0xfe, 0x00, b'S']);
        assert_eq!(read_file(&good), "<node>good</node>");
    }

    #[test]
    fn missing_root() {
        let root = temp_root(function_name!());
        let result = strip_shape_tags(&root.path().join("missing"));
        assert!(matches!(result, Err(crate::Error::MissingDirectory(_))));
    }
}
