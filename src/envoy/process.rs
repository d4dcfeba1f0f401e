//! Envoy child process launching.
//!
//! Provides the command line for each hot-reload generation and a handle
//! that can be released (left running for envoy's own handoff) or killed.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, ChildStderr, ChildStdout, Command};

use crate::envoy::logs::LOG_FORMAT;

/// File name of the bootstrap document inside the working directory.
pub const CONFIG_FILE_NAME: &str = "envoy-config.json";

/// How a generation identifies its hot-reload lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseId {
    /// Reuse a base id persisted by an earlier generation.
    Persisted(u32),
    /// Let envoy pick a base id and write it to the base-id path.
    Dynamic,
}

/// Read a persisted base id. Missing or unparsable files yield `None`.
pub fn read_base_id(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Everything needed to start one envoy generation.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub binary: PathBuf,
    pub working_dir: PathBuf,
    pub config_path: PathBuf,
    pub log_level: String,
    pub base_id: BaseId,
    pub base_id_path: PathBuf,
    pub restart_epoch: u32,
}

impl LaunchSpec {
    /// Envoy command line arguments.
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-c".into(),
            self.config_path.clone().into(),
            "--log-level".into(),
            self.log_level.clone().into(),
            "--log-format".into(),
            LOG_FORMAT.into(),
            "--log-format-escaped".into(),
        ];

        match self.base_id {
            BaseId::Persisted(id) => {
                args.push("--base-id".into());
                args.push(id.to_string().into());
                args.push("--restart-epoch".into());
                args.push(self.restart_epoch.to_string().into());
            }
            BaseId::Dynamic => {
                args.push("--use-dynamic-base-id".into());
                args.push("--base-id-path".into());
                args.push(self.base_id_path.clone().into());
            }
        }
        args
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(self.args())
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);

        // Make sure envoy is killed if we're killed.
        // SAFETY: the hook runs in the forked child before exec and only
        // calls prctl(2), which is async-signal-safe and touches no memory
        // shared with the parent.
        #[cfg(target_os = "linux")]
        unsafe {
            cmd.pre_exec(|| {
                nix::sys::prctl::set_pdeathsig(nix::sys::signal::Signal::SIGKILL)
                    .map_err(io::Error::from)
            });
        }

        cmd
    }
}

/// Output pipes of a freshly spawned generation.
pub struct ProcessPipes {
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
}

/// A running envoy generation.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    pid: u32,
    base_id: BaseId,
    restart_epoch: Option<u32>,
}

impl ProcessHandle {
    /// Start envoy. Must be called within a Tokio runtime context.
    pub fn spawn(spec: &LaunchSpec) -> io::Result<(Self, ProcessPipes)> {
        let mut child = spec.command().spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| io::Error::other("spawned envoy has no process id"))?;

        let pipes = ProcessPipes {
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
        };

        let restart_epoch = match spec.base_id {
            BaseId::Persisted(_) => Some(spec.restart_epoch),
            BaseId::Dynamic => None,
        };

        Ok((
            Self {
                child,
                pid,
                base_id: spec.base_id,
                restart_epoch,
            },
            pipes,
        ))
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Epoch passed on the command line, if the lineage was persisted.
    pub fn restart_epoch(&self) -> Option<u32> {
        self.restart_epoch
    }

    /// Stop supervising the process without signalling it, so it can drain
    /// and exit through envoy's own hot-restart protocol.
    pub fn release(self) {
        tracing::info!(
            service = "envoy",
            pid = self.pid,
            base_id = ?self.base_id,
            epoch = ?self.restart_epoch,
            "releasing envoy process for hot-reload"
        );
        drop(self.child);
    }

    /// Send SIGKILL (or the platform equivalent) without waiting.
    pub fn kill(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }

    /// Wait for the process to exit.
    pub async fn wait(&mut self) -> io::Result<std::process::ExitStatus> {
        self.child.wait().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(base_id: BaseId, restart_epoch: u32) -> LaunchSpec {
        LaunchSpec {
            binary: PathBuf::from("/usr/bin/envoy"),
            working_dir: PathBuf::from("/tmp/wd"),
            config_path: PathBuf::from("/tmp/wd/envoy-config.json"),
            log_level: "info".into(),
            base_id,
            base_id_path: PathBuf::from("/tmp/base-id"),
            restart_epoch,
        }
    }

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_args_with_persisted_base_id() {
        let args = strings(spec(BaseId::Persisted(7), 3).args());
        assert_eq!(
            args,
            vec![
                "-c",
                "/tmp/wd/envoy-config.json",
                "--log-level",
                "info",
                "--log-format",
                "[LOG_FORMAT]%l--%n--%v",
                "--log-format-escaped",
                "--base-id",
                "7",
                "--restart-epoch",
                "3",
            ]
        );
    }

    #[test]
    fn test_args_with_dynamic_base_id() {
        let args = strings(spec(BaseId::Dynamic, 0).args());
        assert!(args.ends_with(&[
            "--use-dynamic-base-id".to_string(),
            "--base-id-path".to_string(),
            "/tmp/base-id".to_string(),
        ]));
        assert!(!args.contains(&"--restart-epoch".to_string()));
    }

    #[test]
    fn test_read_base_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("base-id");
        assert_eq!(read_base_id(&path), None);

        fs::write(&path, "42\n").unwrap();
        assert_eq!(read_base_id(&path), Some(42));

        fs::write(&path, "not a number").unwrap();
        assert_eq!(read_base_id(&path), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_and_kill() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = spec(BaseId::Persisted(1), 0);
        spec.binary = PathBuf::from("/bin/sh");
        spec.working_dir = dir.path().to_path_buf();
        // sh reads "-c <script>"; the script path is the config path here.
        spec.config_path = PathBuf::from("sleep 30");

        let (mut handle, pipes) = ProcessHandle::spawn(&spec).unwrap();
        assert!(handle.pid() > 0);
        assert_eq!(handle.restart_epoch(), Some(0));
        assert!(pipes.stdout.is_some() && pipes.stderr.is_some());

        handle.kill().unwrap();
        let status = handle.wait().await.unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_fails() {
        let mut spec = spec(BaseId::Dynamic, 0);
        spec.binary = PathBuf::from("/nonexistent/envoy-binary-12345");
        spec.working_dir = std::env::temp_dir();
        assert!(ProcessHandle::spawn(&spec).is_err());
    }
}
