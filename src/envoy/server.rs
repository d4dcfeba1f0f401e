//! The envoy supervisor.
//!
//! Owns the working directory, the current [`ServerOptions`] and the current
//! [`ProcessHandle`]. Configuration changes are the only mutation entry
//! point; they are serialized by a reload lock, while the live state sits
//! behind a separate mutex that is only held for short reads and writes
//! (and across the spawn itself, so two restarts can never interleave).

use std::env;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tempfile::Builder;
use tokio::runtime::Handle;
use tokio::task::JoinSet;

use crate::config::schema::ApplicationConfig;
use crate::config::source::{ChangeListener, ConfigSource};
use crate::envoy::binary::{resolve_binary, ResolvedBinary, BUILD_CHECKSUM};
use crate::envoy::bootstrap::build_bootstrap;
use crate::envoy::collector::{run_process_collector, DEFAULT_COLLECT_INTERVAL};
use crate::envoy::error::{EnvoyError, EnvoyResult};
use crate::envoy::logs::{EnvoyLogDecoder, LogRelay};
use crate::envoy::options::ServerOptions;
use crate::envoy::process::{read_base_id, BaseId, LaunchSpec, ProcessHandle, ProcessPipes, CONFIG_FILE_NAME};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;

/// Static settings fixed for the supervisor's lifetime.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Directory envoy runs in and where its bootstrap file lives.
    pub working_dir: PathBuf,
    /// Where envoy persists its base id between generations.
    pub base_id_path: PathBuf,
    /// Preferred (bundled) envoy binary. Falls back to `envoy` on `PATH`.
    pub envoy_path: Option<PathBuf>,
    /// Trusted SHA-256 of the binary, lowercase hex.
    pub checksum: Option<String>,
    /// Port of the control plane's gRPC listener on localhost.
    pub grpc_port: String,
    pub collect_interval: Duration,
    /// How long `close` waits for background tasks before aborting them.
    pub close_grace: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        let tmp = env::temp_dir();
        Self {
            working_dir: tmp.join(".envoy-supervisor"),
            base_id_path: tmp.join("envoy-supervisor-base-id"),
            envoy_path: None,
            checksum: BUILD_CHECKSUM.map(str::to_string),
            grpc_port: "5443".to_string(),
            collect_interval: DEFAULT_COLLECT_INTERVAL,
            close_grace: Duration::from_secs(5),
        }
    }
}

/// Supervisor lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No process has been started yet.
    Idle,
    /// A process is current.
    Running,
    /// Terminal; no further starts are accepted.
    Closed,
}

/// Result of handling one configuration change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// The relevant options did not change.
    Unchanged,
    /// A new envoy generation was started.
    Restarted { pid: u32 },
}

#[derive(Debug)]
struct State {
    phase: Phase,
    started: bool,
    options: Option<ServerOptions>,
    current: Option<ProcessHandle>,
    restart_epoch: u32,
}

struct Inner {
    config_path: PathBuf,
    working_dir: PathBuf,
    base_id_path: PathBuf,
    binary: ResolvedBinary,
    grpc_port: String,
    collect_interval: Duration,
    close_grace: Duration,
    runtime: Handle,
    state: Mutex<State>,
    reload: Mutex<()>,
    shutdown: Shutdown,
    tasks: Mutex<JoinSet<()>>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pid(&self) -> Option<u32> {
        self.state().current.as_ref().map(ProcessHandle::pid)
    }
}

/// Supervises an envoy process. Cheap to clone.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

impl Server {
    /// Prepare the working directory and resolve the envoy binary.
    ///
    /// Must be called inside a Tokio runtime. Nothing is started until
    /// [`Server::start`].
    pub fn new(settings: ServerSettings) -> EnvoyResult<Self> {
        let runtime = Handle::try_current().map_err(|_| EnvoyError::NoRuntime)?;

        std::fs::create_dir_all(&settings.working_dir).map_err(|source| EnvoyError::WorkingDirectory {
            path: settings.working_dir.clone(),
            source,
        })?;

        let binary = resolve_binary(settings.envoy_path.as_deref(), settings.checksum.as_deref())?;
        tracing::info!(
            service = "envoy",
            path = %binary.path.display(),
            checksum = binary.checksum.as_deref().unwrap_or(""),
            "running envoy"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config_path: settings.working_dir.join(CONFIG_FILE_NAME),
                working_dir: settings.working_dir,
                base_id_path: settings.base_id_path,
                binary,
                grpc_port: settings.grpc_port,
                collect_interval: settings.collect_interval,
                close_grace: settings.close_grace,
                runtime,
                state: Mutex::new(State {
                    phase: Phase::Idle,
                    started: false,
                    options: None,
                    current: None,
                    restart_epoch: 0,
                }),
                reload: Mutex::new(()),
                shutdown: Shutdown::new(),
                tasks: Mutex::new(JoinSet::new()),
            }),
        })
    }

    /// Start background tasks, subscribe to `source` and apply its current
    /// configuration.
    pub fn start(&self, source: &dyn ConfigSource) -> EnvoyResult<()> {
        {
            let mut state = self.inner.state();
            if state.phase == Phase::Closed {
                return Err(EnvoyError::Closed);
            }
            if state.started {
                tracing::warn!(service = "envoy", "envoy supervisor already started");
                return Ok(());
            }
            state.started = true;
        }

        self.inner.tasks().spawn_on(
            run_process_collector(self.inner.collect_interval, self.pid_lookup(), self.inner.shutdown.subscribe()),
            &self.inner.runtime,
        );

        let weak = Arc::downgrade(&self.inner);
        let listener: ChangeListener = Arc::new(move |config: Arc<ApplicationConfig>| {
            if let Some(inner) = weak.upgrade() {
                // Failures are logged by the handler.
                let _ = Server { inner }.on_config_change(&config);
            }
        });
        source.on_config_change(listener);

        // A bad initial config is logged; the next change may fix it.
        let _ = self.on_config_change(&source.get_config());
        Ok(())
    }

    /// Pid lookup for the process collector. Holds only a weak reference,
    /// so the collector never keeps the supervisor alive.
    fn pid_lookup(&self) -> impl Fn() -> Option<u32> + Send + 'static {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        move || weak.upgrade().and_then(|inner| inner.pid())
    }

    /// Apply a configuration snapshot, restarting envoy if the options that
    /// affect it changed. On any failure the running process is untouched.
    pub fn on_config_change(&self, config: &ApplicationConfig) -> EnvoyResult<ReloadOutcome> {
        let _reload = self.inner.reload.lock().unwrap_or_else(PoisonError::into_inner);

        let result = self.apply(config);
        match &result {
            Ok(ReloadOutcome::Unchanged) => {
                tracing::debug!(service = "envoy", "no config changes detected");
                metrics::record_config_change("unchanged");
            }
            Ok(ReloadOutcome::Restarted { .. }) => metrics::record_config_change("applied"),
            Err(EnvoyError::Closed) => {
                tracing::debug!(service = "envoy", "envoy supervisor closed, ignoring config change");
            }
            Err(e) => {
                tracing::error!(service = "envoy", error = %e, "failed to apply envoy config");
                metrics::record_config_change("rejected");
            }
        }
        result
    }

    fn apply(&self, config: &ApplicationConfig) -> EnvoyResult<ReloadOutcome> {
        let options = ServerOptions::from_config(config)?;

        {
            let state = self.inner.state();
            if state.phase == Phase::Closed {
                return Err(EnvoyError::Closed);
            }
            if state.options.as_ref() == Some(&options) {
                return Ok(ReloadOutcome::Unchanged);
            }
        }

        let bootstrap = build_bootstrap(config, &options, &self.inner.grpc_port)?;
        let contents = bootstrap.to_json()?;
        write_config(&self.inner.config_path, &contents).map_err(|source| EnvoyError::WriteConfig {
            path: self.inner.config_path.clone(),
            source,
        })?;
        tracing::debug!(
            service = "envoy",
            location = %self.inner.config_path.display(),
            "wrote config file to location"
        );

        let pid = self.restart(options)?;
        Ok(ReloadOutcome::Restarted { pid })
    }

    /// Start a new generation and hand off from the previous one.
    fn restart(&self, options: ServerOptions) -> EnvoyResult<u32> {
        let mut state = self.inner.state();
        if state.phase == Phase::Closed {
            return Err(EnvoyError::Closed);
        }

        let base_id = match read_base_id(&self.inner.base_id_path) {
            Some(id) => BaseId::Persisted(id),
            None => BaseId::Dynamic,
        };
        let spec = LaunchSpec {
            binary: self.inner.binary.path.clone(),
            working_dir: self.inner.working_dir.clone(),
            config_path: self.inner.config_path.clone(),
            log_level: options.log_level.clone(),
            base_id,
            base_id_path: self.inner.base_id_path.clone(),
            restart_epoch: state.restart_epoch,
        };

        tracing::info!(service = "envoy", ?base_id, epoch = state.restart_epoch, "starting envoy process");
        let (handle, pipes) = {
            let _rt = self.inner.runtime.enter();
            ProcessHandle::spawn(&spec)
        }
        .map_err(|e| {
            metrics::record_restart("failure");
            EnvoyError::Spawn(e)
        })?;
        metrics::record_restart("success");

        let pid = handle.pid();
        self.spawn_relays(pipes);

        if let Some(previous) = state.current.replace(handle) {
            previous.release();
        }
        if matches!(base_id, BaseId::Persisted(_)) {
            state.restart_epoch += 1;
        }
        state.options = Some(options);
        state.phase = Phase::Running;

        tracing::info!(service = "envoy", pid, "envoy process started");
        Ok(pid)
    }

    fn spawn_relays(&self, pipes: ProcessPipes) {
        let mut tasks = self.inner.tasks();
        // Relays of exited generations are done; drop their results.
        while tasks.try_join_next().is_some() {}

        if let Some(stdout) = pipes.stdout {
            tasks.spawn_on(LogRelay::new(EnvoyLogDecoder, "stdout").run(stdout), &self.inner.runtime);
        }
        if let Some(stderr) = pipes.stderr {
            tasks.spawn_on(LogRelay::new(EnvoyLogDecoder, "stderr").run(stderr), &self.inner.runtime);
        }
    }

    /// Kill the current process and stop all background tasks.
    ///
    /// Released generations are not signalled; their relays are aborted if
    /// they are still draining once the grace period ends.
    pub async fn close(&self) -> EnvoyResult<()> {
        let current = {
            let mut state = self.inner.state();
            if state.phase == Phase::Closed {
                return Ok(());
            }
            state.phase = Phase::Closed;
            state.options = None;
            state.current.take()
        };

        let mut result = Ok(());
        if let Some(mut handle) = current {
            tracing::info!(service = "envoy", pid = handle.pid(), "killing envoy process");
            match handle.kill() {
                Ok(()) => {
                    if tokio::time::timeout(self.inner.close_grace, handle.wait()).await.is_err() {
                        tracing::warn!(service = "envoy", pid = handle.pid(), "envoy did not exit after kill");
                    }
                }
                Err(e) => result = Err(EnvoyError::Kill(e)),
            }
        }

        self.inner.shutdown.trigger();

        let mut tasks = std::mem::take(&mut *self.inner.tasks());
        let drained = tokio::time::timeout(self.inner.close_grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(service = "envoy", remaining = tasks.len(), "aborting background tasks");
            tasks.shutdown().await;
        }

        tracing::info!(service = "envoy", "envoy supervisor closed");
        result
    }

    /// Pid of the current process, if any.
    pub fn pid(&self) -> Option<u32> {
        self.inner.pid()
    }

    pub fn phase(&self) -> Phase {
        self.inner.state().phase
    }

    /// Epoch the next persisted-lineage restart will pass to envoy.
    pub fn restart_epoch(&self) -> u32 {
        self.inner.state().restart_epoch
    }

    /// Location of the bootstrap document.
    pub fn config_path(&self) -> &Path {
        &self.inner.config_path
    }

    pub fn binary(&self) -> &ResolvedBinary {
        &self.inner.binary
    }
}

/// Replace `path` with `contents` so readers never see a partial file.
fn write_config(path: &Path, contents: &[u8]) -> io::Result<()> {
    let directory = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "config path has no parent directory"))?;

    let mut file = Builder::new().prefix(CONFIG_FILE_NAME).tempfile_in(directory)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}
