//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Install the Prometheus exporter
//! - Republish envoy process resource usage
//! - Count restarts and configuration changes
//!
//! # Metrics
//! - `process_cpu_seconds_total` (gauge): user + system CPU time
//! - `process_resident_memory_bytes` (gauge): resident set size
//! - `process_virtual_memory_bytes` (gauge): virtual memory size
//! - `process_open_fds` / `process_max_fds` (gauge): descriptor usage
//! - `process_start_time_seconds` (gauge): start time since the epoch
//! - `process_threads` (gauge): thread count
//! - `envoy_restarts_total` (counter): restart attempts by outcome
//! - `envoy_config_changes_total` (counter): change notifications by outcome
//!
//! # Design Decisions
//! - Process gauges carry a `process` label so the supervisor's own
//!   process metrics can coexist in the same registry

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::envoy::collector::ProcessStats;

/// Install the global Prometheus recorder with an HTTP listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe_metrics();
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_gauge!("process_cpu_seconds_total", "Total user and system CPU time spent in seconds.");
    describe_gauge!("process_resident_memory_bytes", "Resident memory size in bytes.");
    describe_gauge!("process_virtual_memory_bytes", "Virtual memory size in bytes.");
    describe_gauge!("process_open_fds", "Number of open file descriptors.");
    describe_gauge!("process_max_fds", "Maximum number of open file descriptors.");
    describe_gauge!("process_start_time_seconds", "Start time of the process since unix epoch in seconds.");
    describe_gauge!("process_threads", "Number of OS threads in the process.");
    describe_counter!("envoy_restarts_total", "Envoy process restarts by outcome.");
    describe_counter!("envoy_config_changes_total", "Configuration change notifications by outcome.");
}

/// Publish one resource usage sample.
pub fn record_process_stats(process: &'static str, stats: &ProcessStats) {
    gauge!("process_cpu_seconds_total", "process" => process).set(stats.cpu_seconds);
    gauge!("process_resident_memory_bytes", "process" => process).set(stats.resident_memory_bytes as f64);
    gauge!("process_virtual_memory_bytes", "process" => process).set(stats.virtual_memory_bytes as f64);
    gauge!("process_start_time_seconds", "process" => process).set(stats.start_time_seconds);
    gauge!("process_threads", "process" => process).set(stats.threads as f64);
    if let Some(open) = stats.open_fds {
        gauge!("process_open_fds", "process" => process).set(open as f64);
    }
    if let Some(max) = stats.max_fds {
        gauge!("process_max_fds", "process" => process).set(max as f64);
    }
}

/// Count a restart attempt ("success" or "failure").
pub fn record_restart(outcome: &'static str) {
    counter!("envoy_restarts_total", "outcome" => outcome).increment(1);
}

/// Count a configuration change notification ("applied", "unchanged", "rejected").
pub fn record_config_change(outcome: &'static str) {
    counter!("envoy_config_changes_total", "outcome" => outcome).increment(1);
}
