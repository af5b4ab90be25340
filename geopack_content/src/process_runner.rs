use std::{
    ffi::OsString,
    fmt,
    io::{BufRead, BufReader, Read},
    path::PathBuf,
    process::{Child, Command, Stdio},
    str,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use geopack_shared::{
    crossbeam_channel::{self, Sender},
    log::{error, info, trace, warn},
};

use crate::{
    common::absolute_path,
    resource_monitor::{ResourceMonitor, Thresholds},
    Error, Result,
};

/// Flags that every packer invocation starts with.
pub const FIXED_FLAGS: [&str; 2] = ["--verbose", "--tree"];

/// Flag that makes the packer update the content of an existing output tree.
pub const UPDATE_CONTENT_FLAG: &str = "--update-content";

/// Describes one call of a packer executable.
///
/// The command line is `<executable> --verbose --tree [extra flags...] <input> <output>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackerInvocation {
    /// Short name that prefixes the output lines of the packer, e.g. `OLD`.
    pub label: String,
    pub executable: PathBuf,
    pub input: PathBuf,
    pub output: PathBuf,
    pub extra_flags: Vec<String>,
}

impl PackerInvocation {
    pub fn new(label: impl Into<String>, executable: impl Into<PathBuf>, input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            executable: executable.into(),
            input: input.into(),
            output: output.into(),
            extra_flags: Vec::new(),
        }
    }

    /// Adds flags that are inserted between the fixed flags and the directories.
    pub fn with_flags<S: Into<String>>(mut self, flags: impl IntoIterator<Item = S>) -> Self {
        self.extra_flags.extend(flags.into_iter().map(Into::into));
        self
    }

    /// Arguments passed to the executable.
    ///
    /// # Example
    ///
    /// ```rust
    /// use geopack_content::process_runner::PackerInvocation;
    /// let invocation = PackerInvocation::new("NEW", "packer", "in", "out").with_flags(["--update-content"]);
    /// assert_eq!(invocation.arguments(), vec!["--verbose", "--tree", "--update-content", "in", "out"]);
    /// ```
    pub fn arguments(&self) -> Vec<OsString> {
        FIXED_FLAGS
            .iter()
            .map(OsString::from)
            .chain(self.extra_flags.iter().map(OsString::from))
            .chain([self.input.as_os_str().to_owned(), self.output.as_os_str().to_owned()])
            .collect()
    }

    /// Same invocation with absolute paths so that the packer doesn't depend on its working directory.
    fn resolved(&self) -> Result<Self> {
        Ok(Self {
            label: self.label.clone(),
            executable: absolute_path(&self.executable)?,
            input: absolute_path(&self.input)?,
            output: absolute_path(&self.output)?,
            extra_flags: self.extra_flags.clone(),
        })
    }
}

impl fmt::Display for PackerInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.executable.display())?;
        for argument in self.arguments() {
            write!(f, " {}", argument.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Result of a successful packer run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub duration: Duration,
    /// Number of non-empty output lines the packer wrote to stdout and stderr.
    pub output_lines: usize,
}

/// Runs packer executables and supervises them.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessRunner {
    timeout: Duration,
    poll_interval: Duration,
    sample_interval: Duration,
    thresholds: Thresholds,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            poll_interval: Duration::from_millis(500),
            sample_interval: Duration::from_secs(1),
            thresholds: Thresholds::default(),
        }
    }
}

impl ProcessRunner {
    pub fn new(timeout: Duration, poll_interval: Duration, sample_interval: Duration, thresholds: Thresholds) -> Self {
        Self {
            timeout,
            poll_interval,
            sample_interval,
            thresholds,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs the packer and waits until it finishes.
    ///
    /// Fails when the packer can't be started, when it runs longer than the timeout (it is
    /// killed in that case) and when it exits with a non-zero status.
    pub fn run(&self, invocation: &PackerInvocation) -> Result<RunSummary> {
        let invocation = invocation.resolved()?;
        let label = invocation.label.clone();
        let command = invocation.to_string();
        info!("[{label}] Running: {command}");

        let mut child = Command::new(&invocation.executable)
            .args(invocation.arguments())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| Error::PackerSpawn {
                label: label.clone(),
                command: command.clone(),
                source: err,
            })?;
        let started = Instant::now();

        // stdout and stderr are merged into one stream of lines.
        let (line_sender, line_receiver) = crossbeam_channel::unbounded::<String>();
        let mut readers = Vec::with_capacity(2);
        let streams: [(&str, Option<Box<dyn Read + Send>>); 2] = [
            ("stdout", child.stdout.take().map(|stream| Box::new(stream) as Box<dyn Read + Send>)),
            ("stderr", child.stderr.take().map(|stream| Box::new(stream) as Box<dyn Read + Send>)),
        ];
        for (stream_name, stream) in streams {
            let Some(stream) = stream else {
                continue;
            };
            match spawn_line_reader(&label, stream_name, stream, line_sender.clone()) {
                Ok(reader) => readers.push(reader),
                Err(err) => {
                    kill_and_reap(&mut child, &label);
                    return Err(err);
                }
            }
        }
        drop(line_sender);

        let monitor = match ResourceMonitor::spawn(
            child.id(),
            label.clone(),
            line_receiver.clone(),
            self.thresholds,
            self.sample_interval,
        ) {
            Ok(monitor) => monitor,
            Err(err) => {
                kill_and_reap(&mut child, &label);
                return Err(err);
            }
        };

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(err) => {
                    kill_and_reap(&mut child, &label);
                    monitor.stop();
                    return Err(err.into());
                }
            }
            if started.elapsed() > self.timeout {
                warn!("[{label}] Timeout after {:?}, killing the process", self.timeout);
                kill_and_reap(&mut child, &label);
                monitor.stop();
                return Err(Error::PackerTimeout {
                    label,
                    timeout: self.timeout,
                    command,
                });
            }
            thread::sleep(self.poll_interval);
        };
        let duration = started.elapsed();

        for reader in readers {
            if reader.join().is_err() {
                error!("[{label}] Output reader thread panicked");
            }
        }
        let mut output_lines = monitor.stop();
        for line in line_receiver.try_iter() {
            info!("[{label}] {line}");
            output_lines += 1;
        }

        if !status.success() {
            return Err(Error::PackerFailed {
                label,
                code: status.code(),
                command,
            });
        }

        info!("[{label}] Finished after {duration:.1?}");
        Ok(RunSummary { duration, output_lines })
    }
}

fn kill_and_reap(child: &mut Child, label: &str) {
    if let Err(err) = child.kill() {
        error!("[{label}] Failed to kill process {}: {err}", child.id());
    }
    if let Err(err) = child.wait() {
        error!("[{label}] Failed to wait for process {}: {err}", child.id());
    }
}

/// Forwards every line of `stream` to `sender`. Lines that aren't valid UTF-8 are dropped.
fn spawn_line_reader(label: &str, stream_name: &str, stream: Box<dyn Read + Send>, sender: Sender<String>) -> Result<JoinHandle<()>> {
    let thread_name = format!("{label} {stream_name} reader");
    thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            let mut reader = BufReader::new(stream);
            let mut buffer = Vec::new();
            loop {
                buffer.clear();
                match reader.read_until(b'\n', &mut buffer) {
                    Ok(0) => break,
                    Ok(_) => {
                        let Ok(line) = str::from_utf8(&buffer) else {
                            trace!("{thread_name} dropped a line that is not valid UTF-8");
                            continue;
                        };
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        if sender.send(line.to_owned()).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!("{thread_name} failed to read: {err}");
                        break;
                    }
                }
            }
        })
        .map_err(|_| Error::FailedToStartThread(format!("{label} {stream_name} reader")))
}

#[cfg(all(test, unix))]
mod tests {
    use geopack_shared::function_name;
    use geopack_test::{fake_packer, list_files, process_lock, read_file, setup_logger, temp_root};

    use super::*;

    fn fast_runner(timeout: Duration) -> ProcessRunner {
        ProcessRunner::new(timeout, Duration::from_millis(20), Duration::from_millis(20), Thresholds::default())
    }

    #[test]
    fn display_command_line() {
        let invocation = PackerInvocation::new("OLD", "tools/packer", "in", "out");
        assert_eq!(invocation.to_string(), "tools/packer --verbose --tree in out");
    }

    #[test]
    fn passes_arguments_in_order() {
        setup_logger();
        let _lock = process_lock();
        let root = temp_root(function_name!());
        let packer = fake_packer::install(root.path().join("packer"), &fake_packer::recording());
        let input = root.path().join("in");
        let output = root.path().join("out");
        std::fs::create_dir_all(&input).unwrap();
        std::fs::create_dir_all(&output).unwrap();

        let invocation = PackerInvocation::new("NEW", &packer, &input, &output).with_flags([UPDATE_CONTENT_FLAG]);
        let summary = fast_runner(Duration::from_secs(30)).run(&invocation).unwrap();

        assert_eq!(summary.output_lines, 2);
        let arguments = read_file(output.join("arguments.txt"));
        let expected = format!("--verbose\n--tree\n--update-content\n{}\n{}\n", input.display(), output.display());
        assert_eq!(arguments, expected);
        assert_eq!(list_files(&output), vec!["arguments.txt"]);
    }

    #[test]
    fn non_zero_exit_is_an_error() {
        setup_logger();
        let _lock = process_lock();
        let root = temp_root(function_name!());
        let packer = fake_packer::install(root.path().join("packer"), &fake_packer::exit_code(3));

        let invocation = PackerInvocation::new("OLD", &packer, root.path(), root.path());
        let result = fast_runner(Duration::from_secs(30)).run(&invocation);

        match result {
            Err(Error::PackerFailed { label, code, command }) => {
                assert_eq!(label, "OLD");
                assert_eq!(code, Some(3));
                assert!(command.contains("--verbose --tree"));
            }
            other => panic!("expected PackerFailed but got {other:?}"),
        }
    }

    #[test]
    fn timeout_kills_the_process() {
        setup_logger();
        let _lock = process_lock();
        let root = temp_root(function_name!());
        let packer = fake_packer::install(root.path().join("packer"), &fake_packer::sleeping(30));

        let invocation = PackerInvocation::new("OLD", &packer, root.path(), root.path());
        let started = Instant::now();
        let result = fast_runner(Duration::from_millis(300)).run(&invocation);

        assert!(matches!(result, Err(Error::PackerTimeout { .. })), "got {result:?}");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn missing_executable() {
        setup_logger();
        let root = temp_root(function_name!());
        let invocation = PackerInvocation::new("OLD", root.path().join("missing"), root.path(), root.path());
        let result = fast_runner(Duration::from_secs(1)).run(&invocation);
        assert!(matches!(result, Err(Error::PackerSpawn { .. })), "got {result:?}");
    }
}
