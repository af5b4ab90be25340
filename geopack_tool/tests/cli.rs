#![cfg(unix)]

use std::{
    fs,
    path::Path,
    process::{Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use geopack_content::config::PipelineConfig;
use geopack_shared::function_name;
use geopack_test::{fake_packer, list_files, process_lock, read_file, temp_root, write_file};

const HULL: &str = "<root>\n\t<node>hullShape</node>\n</root>\n";

fn geopack() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_geopack"));
    command.args(["--log-level", "warn"]).stdin(Stdio::null()).stdout(Stdio::null());
    command
}

/// Creates all directories and packers that a run needs.
fn setup_base_dir(base_dir: &Path, new_packer: &str) -> PipelineConfig {
    write_file(base_dir, "geopack.yaml", "poll_interval_ms: 20\nsample_interval_ms: 20\n");
    let config = PipelineConfig::load(base_dir, None).unwrap();
    write_file(&config.source_path(), "tank/hull.visual", HULL);
    fs::create_dir_all(config.temp_path()).unwrap();
    fs::create_dir_all(config.output_path()).unwrap();
    fake_packer::install(config.old_packer_path(), &fake_packer::old_version());
    fake_packer::install(config.new_packer_path(), new_packer);
    config
}

fn run(command: &mut Command) -> ExitStatus {
    command.status().unwrap_or_else(|err| panic!("Failed to run geopack: {err}"))
}

#[test]
fn successful_run_exits_with_zero() {
    let _lock = process_lock();
    let root = temp_root(function_name!());
    let config = setup_base_dir(root.path(), &fake_packer::new_version());

    let status = run(geopack().arg("run").arg("--base-dir").arg(root.path()));

    assert_eq!(status.code(), Some(0));
    assert_eq!(read_file(config.source_path().join("tank/hull.visual")), "<root>\n\t<node>hull</node>\n</root>\n");
    assert!(list_files(&config.output_path()).contains(&"hull_lod3.geometry".to_owned()));
    assert!(config.output_path().join("tank/hull.visual").exists());
}

#[test]
fn missing_source_exits_with_one() {
    let _lock = process_lock();
    let root = temp_root(function_name!());
    let config = setup_base_dir(root.path(), &fake_packer::new_version());
    fs::remove_dir_all(config.source_path()).unwrap();

    let status = run(geopack().arg("run").arg("--base-dir").arg(root.path()).stderr(Stdio::null()));

    assert_eq!(status.code(), Some(1));
}

#[test]
fn failing_packer_exits_with_one() {
    let _lock = process_lock();
    let root = temp_root(function_name!());
    setup_base_dir(root.path(), &fake_packer::exit_code(2));

    let status = run(geopack().arg("run").arg("--base-dir").arg(root.path()).stderr(Stdio::null()));

    assert_eq!(status.code(), Some(1));
}

#[test]
fn interrupt_exits_with_zero() {
    let _lock = process_lock();
    let root = temp_root(function_name!());
    let config = setup_base_dir(root.path(), &fake_packer::sleeping(30));

    let mut child = geopack()
        .arg("run")
        .arg("--base-dir")
        .arg(root.path())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    // The LOD variants are generated right before the old packer starts.
    let started = Instant::now();
    while !config.lod_path().join("tank/hull_lod1.visual").exists() {
        assert!(started.elapsed() < Duration::from_secs(30), "geopack didn't reach the packer step");
        thread::sleep(Duration::from_millis(20));
    }
    thread::sleep(Duration::from_millis(500));
    let kill = Command::new("kill").arg("-INT").arg(child.id().to_string()).status().unwrap();
    assert!(kill.success());

    let status = child.wait().unwrap();
    assert_eq!(status.code(), Some(0));
}

#[test]
fn strip_tags_rewrites_the_given_directory() {
    let _lock = process_lock();
    let root = temp_root(function_name!());
    let visual = write_file(root.path(), "a/hull.visual", HULL);

    let status = run(geopack().arg("strip-tags").arg("--input").arg(root.path()));

    assert_eq!(status.code(), Some(0));
    assert_eq!(read_file(visual), "<root>\n\t<node>hull</node>\n</root>\n");
}
