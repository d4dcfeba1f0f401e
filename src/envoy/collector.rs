//! Envoy process resource sampling.
//!
//! # Responsibilities
//! - Periodically look up the supervised envoy pid
//! - Read its CPU, memory, descriptor and thread usage from procfs
//! - Publish the sample as `process_*` gauges labelled `process = "envoy"`
//!
//! # Design Decisions
//! - Platform support is decided once; without procfs the task exits
//! - A failed sample is logged and skipped, the ticker keeps going

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::time::{self, Instant};

use crate::lifecycle::ShutdownSignal;
use crate::observability::metrics;

/// Label value attached to every published sample.
pub const PROCESS_LABEL: &str = "envoy";

/// How often the supervised process is sampled.
pub const DEFAULT_COLLECT_INTERVAL: Duration = Duration::from_secs(10);

/// Errors reading a process sample.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("failed to read {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("malformed {path:?}: {reason}")]
    Parse { path: PathBuf, reason: String },
}

/// One resource usage sample.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessStats {
    pub cpu_seconds: f64,
    pub resident_memory_bytes: u64,
    pub virtual_memory_bytes: u64,
    pub start_time_seconds: f64,
    pub threads: u64,
    pub open_fds: Option<u64>,
    pub max_fds: Option<u64>,
}

/// Fields of `/proc/<pid>/stat` we care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StatFields {
    utime: u64,
    stime: u64,
    num_threads: u64,
    starttime: u64,
    vsize: u64,
    rss_pages: u64,
}

/// Reads process statistics from procfs.
#[derive(Debug, Clone)]
pub struct ProcessCollector {
    proc_root: PathBuf,
    clock_ticks: f64,
    page_size: u64,
    boot_time: f64,
}

impl ProcessCollector {
    /// A collector for `/proc`, or `None` when sampling is unsupported here.
    pub fn new() -> Option<Self> {
        Self::with_proc_root("/proc")
    }

    /// A collector for an alternate procfs mount.
    pub fn with_proc_root(proc_root: impl Into<PathBuf>) -> Option<Self> {
        let proc_root = proc_root.into();
        let (clock_ticks, page_size) = system_constants()?;
        let boot_time = fs::read_to_string(proc_root.join("stat"))
            .ok()
            .and_then(|content| parse_boot_time(&content))?;

        Some(Self {
            proc_root,
            clock_ticks,
            page_size,
            boot_time,
        })
    }

    /// Sample the process with the given pid.
    pub fn measure(&self, pid: u32) -> Result<ProcessStats, CollectorError> {
        let dir = self.proc_root.join(pid.to_string());

        let stat_path = dir.join("stat");
        let stat = read(&stat_path)?;
        let fields = parse_stat(&stat).map_err(|reason| CollectorError::Parse {
            path: stat_path,
            reason,
        })?;

        let open_fds = fs::read_dir(dir.join("fd"))
            .ok()
            .map(|entries| entries.count() as u64);
        let max_fds = fs::read_to_string(dir.join("limits"))
            .ok()
            .and_then(|content| parse_max_open_files(&content));

        Ok(ProcessStats {
            cpu_seconds: (fields.utime + fields.stime) as f64 / self.clock_ticks,
            resident_memory_bytes: fields.rss_pages * self.page_size,
            virtual_memory_bytes: fields.vsize,
            start_time_seconds: self.boot_time + fields.starttime as f64 / self.clock_ticks,
            threads: fields.num_threads,
            open_fds,
            max_fds,
        })
    }
}

fn read(path: &Path) -> Result<String, CollectorError> {
    fs::read_to_string(path).map_err(|source| CollectorError::Read {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(target_os = "linux")]
fn system_constants() -> Option<(f64, u64)> {
    use nix::unistd::{sysconf, SysconfVar};

    let ticks = sysconf(SysconfVar::CLK_TCK).ok().flatten()?;
    let page_size = sysconf(SysconfVar::PAGE_SIZE).ok().flatten()?;
    if ticks <= 0 || page_size <= 0 {
        return None;
    }
    Some((ticks as f64, page_size as u64))
}

#[cfg(not(target_os = "linux"))]
fn system_constants() -> Option<(f64, u64)> {
    None
}

/// Parse `/proc/<pid>/stat`. The command name may contain spaces and
/// parentheses, so fields are counted from the last `)`.
fn parse_stat(content: &str) -> Result<StatFields, String> {
    let (_, rest) = content
        .rsplit_once(')')
        .ok_or_else(|| "missing command name".to_string())?;
    let fields: Vec<&str> = rest.split_whitespace().collect();

    // fields[0] is the state (field 3 in proc(5)).
    let field = |n: usize| -> Result<u64, String> {
        let raw = fields
            .get(n - 3)
            .ok_or_else(|| format!("missing field {n}"))?;
        raw.parse::<u64>()
            .map_err(|e| format!("field {n} '{raw}': {e}"))
    };

    Ok(StatFields {
        utime: field(14)?,
        stime: field(15)?,
        num_threads: field(20)?,
        starttime: field(22)?,
        vsize: field(23)?,
        rss_pages: field(24)?,
    })
}

fn parse_boot_time(content: &str) -> Option<f64> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("btime "))
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(|secs| secs as f64)
}

fn parse_max_open_files(content: &str) -> Option<u64> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("Max open files"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|soft| soft.parse::<u64>().ok())
}

/// Sample the process returned by `current_pid` every `interval` until
/// shutdown. Returns immediately on platforms without procfs.
pub async fn run_process_collector<F>(interval: Duration, current_pid: F, mut shutdown: ShutdownSignal)
where
    F: Fn() -> Option<u32>,
{
    let Some(collector) = ProcessCollector::new() else {
        tracing::info!(service = "envoy", "process metrics are not supported on this platform");
        return;
    };

    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(pid) = current_pid().filter(|pid| *pid > 0) else {
                    continue;
                };
                match collector.measure(pid) {
                    Ok(stats) => metrics::record_process_stats(PROCESS_LABEL, &stats),
                    Err(e) => tracing::error!(
                        service = "envoy",
                        pid,
                        error = %e,
                        "failed to measure envoy process metrics"
                    ),
                }
            }
            _ = shutdown.recv() => {
                tracing::debug!(service = "envoy", "process collector stopping");
                break;
            }
        }
    }
}
