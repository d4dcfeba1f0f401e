//! Shared utilities for supervisor integration tests.
#![allow(dead_code)]

use std::fs;
use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use envoy_supervisor::envoy::ServerSettings;
use tempfile::TempDir;

/// Stand-in for envoy: writes the assigned base id to `--base-id-path` (if
/// one was assigned), records its pid and arguments, prints one log line in
/// envoy's format and then idles like a running proxy.
const FAKE_ENVOY: &str = r#"#!/bin/sh
dir="$(dirname "$0")"
prev=""
for arg in "$@"; do
    if [ "$prev" = "--base-id-path" ] && [ -f "$dir/assigned-base-id" ]; then
        cp "$dir/assigned-base-id" "$arg"
    fi
    prev="$arg"
done
echo "$$ $*" >> "$dir/invocations.log"
echo "[LOG_FORMAT]info--main--starting fake envoy"
exec sleep 10
"#;

/// A scratch directory holding a fake envoy binary and supervisor paths.
pub struct Harness {
    pub dir: TempDir,
    pub envoy: PathBuf,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let envoy = dir.path().join("envoy");
        install_fake_envoy(&envoy);
        Self { dir, envoy }
    }

    pub fn settings(&self) -> ServerSettings {
        ServerSettings {
            working_dir: self.dir.path().join("wd"),
            base_id_path: self.dir.path().join("base-id"),
            envoy_path: Some(self.envoy.clone()),
            checksum: None,
            grpc_port: "5443".into(),
            collect_interval: Duration::from_millis(50),
            close_grace: Duration::from_millis(200),
        }
    }

    pub fn persist_base_id(&self, id: u32) {
        fs::write(self.dir.path().join("base-id"), id.to_string()).unwrap();
    }

    /// Base id the fake envoy persists when asked for a dynamic one.
    pub fn assign_dynamic_base_id(&self, id: u32) {
        fs::write(self.dir.path().join("assigned-base-id"), id.to_string()).unwrap();
    }

    /// Argument lists of every fake envoy run so far, pid first.
    pub fn invocations(&self) -> Vec<Vec<String>> {
        let Ok(log) = fs::read_to_string(self.dir.path().join("invocations.log")) else {
            return Vec::new();
        };
        log.lines()
            .map(|line| line.split_whitespace().map(str::to_string).collect())
            .collect()
    }

    /// Wait until at least `count` runs have been recorded.
    pub async fn wait_for_invocations(&self, count: usize) -> Vec<Vec<String>> {
        assert!(
            wait_until(Duration::from_secs(5), || self.invocations().len() >= count).await,
            "expected {count} envoy invocations, saw {:?}",
            self.invocations()
        );
        self.invocations()
    }
}

pub fn install_fake_envoy(path: &Path) {
    fs::write(path, FAKE_ENVOY).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

/// Value following `flag` in an argument list.
pub fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

/// Run `fut` with a timeout so a hung supervisor fails the test.
pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(10), fut)
        .await
        .expect("operation timed out")
}

pub fn process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), None).is_ok()
}
