use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use geopack_shared::{
    crossbeam_channel::{Receiver, RecvTimeoutError},
    log::{error, info, trace, warn},
};
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessStatus, System};

use crate::{Error, Result};

/// Utilization above which the [`ResourceMonitor`] logs a warning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// CPU usage in percent. Values above 100 are possible on machines with multiple cores.
    pub cpu_percent: f32,
    /// Share of the total memory in percent.
    pub memory_percent: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu_percent: 90.0,
            memory_percent: 80.0,
        }
    }
}

impl Thresholds {
    /// Returns whether any of the thresholds is exceeded by `usage`.
    pub fn exceeded_by(&self, usage: &ResourceUsage) -> bool {
        usage.cpu_percent > self.cpu_percent || usage.memory_percent > self.memory_percent
    }
}

/// One sample of the resource usage of a process.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceUsage {
    pub cpu_percent: f32,
    pub memory_percent: f32,
}

struct ProcessSampler {
    system: System,
    pid: Pid,
}

impl ProcessSampler {
    fn new(pid: u32) -> Self {
        let mut system = System::new();
        system.refresh_memory();
        Self {
            system,
            pid: Pid::from_u32(pid),
        }
    }

    /// Returns `None` when the process can't be queried anymore.
    fn sample(&mut self) -> Option<ResourceUsage> {
        if !self.system.refresh_process(self.pid) {
            return None;
        }
        let process = self.system.process(self.pid)?;
        if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
            return None;
        }
        let total_memory = self.system.total_memory();
        let memory_percent = if total_memory == 0 {
            0.0
        } else {
            (process.memory() as f64 / total_memory as f64 * 100.0) as f32
        };
        Some(ResourceUsage {
            cpu_percent: process.cpu_usage(),
            memory_percent,
        })
    }
}

/// Watches a running packer on a background thread.
///
/// The monitor echoes the output lines it receives, tagged with a label, and samples the CPU
/// and memory usage of the process. It stops when [`ResourceMonitor::stop`] is called or when
/// the process can no longer be queried.
pub struct ResourceMonitor {
    stop_requested: Arc<AtomicBool>,
    handle: JoinHandle<usize>,
}

impl ResourceMonitor {
    /// Starts the monitor for the process with the given `pid`.
    ///
    /// Every iteration waits at most `sample_interval` for an output line and samples the
    /// process at most once per `sample_interval`.
    pub fn spawn(
        pid: u32,
        label: impl Into<String>,
        lines: Receiver<String>,
        thresholds: Thresholds,
        sample_interval: Duration,
    ) -> Result<Self> {
        let label = label.into();
        let stop_requested = Arc::new(AtomicBool::new(false));
        let stop_requested2 = stop_requested.clone();
        let thread_name = format!("ResourceMonitor {label}");
        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                trace!("Starting {thread_name} for process {pid}");
                let mut sampler = ProcessSampler::new(pid);
                let mut last_sample: Option<Instant> = None;
                let mut echoed = 0;
                while !stop_requested2.load(Ordering::SeqCst) {
                    match lines.recv_timeout(sample_interval) {
                        Ok(line) => {
                            info!("[{label}] {line}");
                            echoed += 1;
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        // Both output streams are closed. Keep sampling until the process is gone.
                        Err(RecvTimeoutError::Disconnected) => thread::sleep(sample_interval),
                    }

                    if last_sample.map_or(false, |last_sample| last_sample.elapsed() < sample_interval) {
                        continue;
                    }
                    last_sample = Some(Instant::now());
                    let Some(usage) = sampler.sample() else {
                        trace!("[{label}] Process {pid} can no longer be queried");
                        break;
                    };
                    if thresholds.exceeded_by(&usage) {
                        warn! {
                            "[{label}] Resource warning CPU: {:.1}% MEM: {:.1}%",
                            usage.cpu_percent, usage.memory_percent
                        }
                    }
                }
                trace!("{thread_name} will stop now");
                echoed
            })
            .map_err(|_| Error::FailedToStartThread(format!("ResourceMonitor {}", pid)))?;
        Ok(Self { stop_requested, handle })
    }

    /// Asks the monitor to stop and waits for it. Returns the number of lines it echoed.
    pub fn stop(self) -> usize {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.handle.join().unwrap_or_else(|_| {
            error!("ResourceMonitor thread panicked");
            0
        })
    }
}

#[cfg(test)]
mod tests {
    use std::process;

    use geopack_shared::crossbeam_channel;
    use geopack_test::setup_logger;

    use super::*;

    #[test]
    fn default_thresholds() {
        let thresholds = Thresholds::default();
        assert!(!thresholds.exceeded_by(&ResourceUsage {
            cpu_percent: 90.0,
            memory_percent: 80.0
        }));
        assert!(thresholds.exceeded_by(&ResourceUsage {
            cpu_percent: 90.5,
            memory_percent: 0.0
        }));
        assert!(thresholds.exceeded_by(&ResourceUsage {
            cpu_percent: 0.0,
            memory_percent: 80.5
        }));
    }

    #[test]
    fn samples_own_process() {
        let mut sampler = ProcessSampler::new(process::id());
        let usage = sampler.sample().unwrap();
        assert!(usage.cpu_percent >= 0.0);
        assert!((0.0..=100.0).contains(&usage.memory_percent));
    }

    #[test]
    fn echoes_lines_until_stopped() {
        setup_logger();
        let (sender, receiver) = crossbeam_channel::unbounded();
        let monitor = ResourceMonitor::spawn(process::id(), "TEST", receiver, Thresholds::default(), Duration::from_millis(10)).unwrap();
        sender.send("first".to_owned()).unwrap();
        sender.send("second".to_owned()).unwrap();

        // The monitor runs until it is stopped because the test process stays alive.
        let deadline = Instant::now() + Duration::from_secs(5);
        while !sender.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        thread::sleep(Duration::from_millis(50));

        assert_eq!(monitor.stop(), 2);
    }

    #[test]
    fn stops_when_process_is_gone() {
        setup_logger();
        let (_sender, receiver) = crossbeam_channel::unbounded::<String>();
        // Pids this large are never assigned.
        let monitor = ResourceMonitor::spawn(u32::MAX - 1, "TEST", receiver, Thresholds::default(), Duration::from_millis(10)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !monitor.handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(monitor.handle.is_finished());
        assert_eq!(monitor.stop(), 0);
    }
}
