use std::{
    fs,
    path::{Path, PathBuf},
};

use geopack_shared::{
    log,
    parking_lot::{const_mutex, Mutex, MutexGuard},
    walkdir::WalkDir,
};
use simple_logger::SimpleLogger;
use tempdir::TempDir;

pub use spectral;

/// Serializes tests that write executable scripts and spawn processes. A script that is
/// executed while another thread of the same process holds a forked copy of its write handle
/// fails with "text file busy".
static PROCESS_LOCK: Mutex<()> = const_mutex(());

/// Installs a logger that prints everything. Calling it more than once is fine.
pub fn setup_logger() {
    let _ = SimpleLogger::new().with_level(log::LevelFilter::Trace).init();
}

/// Creates a temporary directory named after the given test function.
///
/// Use it together with [`geopack_shared::function_name`].
pub fn temp_root(function_name: &str) -> TempDir {
    let prefix = function_name.replace("::", ".");
    TempDir::new(&prefix).unwrap_or_else(|err| panic!("Failed to create temporary directory for '{prefix}': {err}"))
}

/// Writes `content` to `root/relative_path` and creates the parent directories.
pub fn write_file(root: &Path, relative_path: impl AsRef<Path>, content: impl AsRef<[u8]>) -> PathBuf {
    let path = root.join(relative_path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap_or_else(|err| panic!("Failed to create directory \"{}\": {err}", parent.display()));
    }
    fs::write(&path, content).unwrap_or_else(|err| panic!("Failed to write file \"{}\": {err}", path.display()));
    path
}

/// Reads the file at `path` and expects it to be valid UTF-8.
pub fn read_file(path: impl AsRef<Path>) -> String {
    let path = path.as_ref();
    fs::read_to_string(path).unwrap_or_else(|err| panic!("Failed to read file \"{}\": {err}", path.display()))
}

/// Returns the paths of all files below `root` relative to `root`, sorted and with `/` as separator.
pub fn list_files(root: &Path) -> Vec<String> {
    let mut files = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let relative = entry.path().strip_prefix(root).expect("walked path must be inside the root");
            relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/")
        })
        .collect::<Vec<_>>();
    files.sort();
    files
}

/// Returns the names of all directories directly inside `root`.
pub fn list_directories(root: &Path) -> Vec<String> {
    let mut directories = fs::read_dir(root)
        .unwrap_or_else(|err| panic!("Failed to read directory \"{}\": {err}", root.display()))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    directories.sort();
    directories
}

/// Acquires the lock that must be held while writing and running scripts.
pub fn process_lock() -> MutexGuard<'static, ()> {
    PROCESS_LOCK.lock()
}

/// Shell scripts that stand in for the packer executables.
#[cfg(unix)]
pub mod fake_packer {
    use std::{
        fs,
        os::unix::fs::PermissionsExt,
        path::{Path, PathBuf},
    };

    /// Prints its arguments and exits with the given code.
    pub fn exit_code(code: i32) -> String {
        format!("#!/bin/sh\necho \"packer called with $*\"\necho \"packer failing\" >&2\nexit {code}\n")
    }

    /// Never finishes on its own.
    pub fn sleeping(seconds: u32) -> String {
        format!("#!/bin/sh\necho \"packer is sleeping\"\nexec sleep {seconds}\n")
    }

    /// Writes every argument on its own line into `arguments.txt` next to the output directory
    /// and prints to both standard streams.
    pub fn recording() -> String {
        r#"#!/bin/sh
for last; do :; done
for argument in "$@"; do echo "$argument"; done > "$last/arguments.txt"
echo "to stdout"
echo "to stderr" >&2
"#
        .to_owned()
    }

    /// Behaves like the old packer: one `.geometry` (and a copy of the `.visual`) per `.visual`
    /// in the input tree, written at the same relative location in the output tree.
    pub fn old_version() -> String {
        r#"#!/bin/sh
echo "old packer called with $*"
while [ "$#" -gt 2 ]; do shift; done
input="$1"
output="$2"
cd "$input" || exit 3
find . -name '*.visual' | while read -r visual; do
    dir=$(dirname "$visual")
    stem=$(basename "$visual" .visual)
    mkdir -p "$output/$dir"
    printf 'geometry of %s\n' "$stem" > "$output/$dir/$stem.geometry"
    cp "$visual" "$output/$dir/$stem.visual"
    echo "packed $visual"
done
"#
        .to_owned()
    }

    /// Behaves like the new packer in update mode: requires `--update-content`, copies every
    /// `.geometry` of the input tree and writes an upgraded variant into `upgraded/`.
    pub fn new_version() -> String {
        r#"#!/bin/sh
echo "new packer called with $*"
case " $* " in
    *" --update-content "*) ;;
    *) echo "missing --update-content" >&2; exit 4 ;;
esac
while [ "$#" -gt 2 ]; do shift; done
input="$1"
output="$2"
cd "$input" || exit 3
mkdir -p "$output/upgraded"
find . -name '*.geometry' | while read -r geometry; do
    dir=$(dirname "$geometry")
    name=$(basename "$geometry")
    mkdir -p "$output/$dir"
    cp "$geometry" "$output/$dir/$name"
    printf 'upgraded\n' > "$output/upgraded/$name"
    echo "upgraded $geometry"
done
"#
        .to_owned()
    }

    /// Writes `script` to `path` and makes it executable.
    pub fn install(path: impl AsRef<Path>, script: &str) -> PathBuf {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap_or_else(|err| panic!("Failed to create directory \"{}\": {err}", parent.display()));
        }
        fs::write(path, script).unwrap_or_else(|err| panic!("Failed to write script \"{}\": {err}", path.display()));
        let mut permissions = fs::metadata(path).expect("script must exist").permissions();
        permissions.set_mode(0o755);
        fs::set_permissions(path, permissions).unwrap_or_else(|err| panic!("Failed to make \"{}\" executable: {err}", path.display()));
        path.to_owned()
    }
}
