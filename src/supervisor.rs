//! Backend process lifecycle supervision
//!
//! When supervision is enabled the proxy spawns the backend as a child
//! process, polls its health endpoint until it responds or the attempt budget
//! runs out, and terminates it on shutdown. Startup blocks on the supervisor:
//! the listener only starts accepting once the backend is healthy.

use crate::config::BackendConfig;
use http_body_util::Empty;
use hyper::body::Bytes;
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

/// Timeout for a single health probe
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle state of the supervised backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// No process has been spawned yet
    NotStarted,
    /// Process is running, waiting for the first successful health probe
    Starting,
    /// A health probe succeeded; the backend is serving traffic
    Healthy,
    /// The process died early or the probe budget ran out
    StartFailed,
    /// A stop was requested and termination is in progress
    Stopping,
    /// The process exit has been observed
    Stopped,
}

/// Why the backend never became healthy
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("backend supervision requires a 'command'")]
    MissingCommand,
    #[error("failed to spawn backend process: {0}")]
    Spawn(std::io::Error),
    #[error("backend process exited before becoming healthy ({status})")]
    ProcessExited { status: ExitStatus, output: String },
    #[error("backend not healthy after {attempts} attempts")]
    NeverHealthy { attempts: u32, output: String },
}

impl StartupError {
    /// Captured stdout/stderr of the failed backend, if any
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            StartupError::ProcessExited { output, .. }
            | StartupError::NeverHealthy { output, .. } => Some(output),
            _ => None,
        }
    }
}

/// Spawns, health-checks and terminates the single backend process.
///
/// At most one child process is live per supervisor. Health probes are
/// strictly sequential; the configured interval is the minimum spacing
/// between two consecutive probes.
pub struct BackendSupervisor {
    config: BackendConfig,
    health_client: Client<HttpConnector, Empty<Bytes>>,
    child: Option<Child>,
    state: SupervisorState,
}

impl BackendSupervisor {
    pub fn new(config: BackendConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.enforce_http(true);

        let health_client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            config,
            health_client,
            child: None,
            state: SupervisorState::NotStarted,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn is_healthy(&self) -> bool {
        self.state == SupervisorState::Healthy
    }

    /// Spawn the backend and block until it is healthy or startup fails.
    ///
    /// Probes run after an initial settle delay, one at a time, up to the
    /// configured attempt budget. The child exiting on its own before a
    /// successful probe fails startup immediately.
    pub async fn start(&mut self) -> Result<(), StartupError> {
        if self.state != SupervisorState::NotStarted {
            debug!(state = ?self.state, "Backend already started");
            return Ok(());
        }

        let command = self
            .config
            .command
            .as_ref()
            .ok_or(StartupError::MissingCommand)?;

        info!(command = %command, args = ?self.config.args, "Starting backend process");

        let mut cmd = Command::new(command);
        cmd.args(&self.config.args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        if let Some(ref working_dir) = self.config.working_dir {
            cmd.current_dir(working_dir);
        }

        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }

        let child = cmd.spawn().map_err(StartupError::Spawn)?;
        let pid = child.id().unwrap_or(0);
        info!(pid, "Backend process spawned");

        self.child = Some(child);
        self.state = SupervisorState::Starting;

        tokio::time::sleep(self.config.settle_delay()).await;

        let health_url = self.config.health_url();
        let max_attempts = self.config.health_max_attempts;
        let interval = self.config.health_interval();

        debug!(%health_url, max_attempts, "Waiting for backend to become healthy");

        for attempt in 1..=max_attempts {
            // A child that died on its own will never answer a probe
            let child = self.child.as_mut().expect("child set in Starting state");
            if let Ok(Some(status)) = child.try_wait() {
                let output = drain_output(child).await;
                self.child = None;
                self.state = SupervisorState::StartFailed;
                error!(%status, "Backend process exited before becoming healthy");
                return Err(StartupError::ProcessExited { status, output });
            }

            if self.probe_once(&health_url).await {
                self.state = SupervisorState::Healthy;
                info!(attempts = attempt, "Backend is healthy");
                return Ok(());
            }

            debug!(attempt, max_attempts, "Backend not ready yet");

            if attempt < max_attempts {
                tokio::time::sleep(interval).await;
            }
        }

        error!(
            attempts = max_attempts,
            "Backend never became healthy, terminating it"
        );

        let mut child = self.child.take().expect("child set in Starting state");
        terminate(&mut child, self.config.shutdown_grace()).await;
        let output = drain_output(&mut child).await;
        self.state = SupervisorState::StartFailed;

        Err(StartupError::NeverHealthy {
            attempts: max_attempts,
            output,
        })
    }

    /// One health probe; healthy means exactly HTTP 200
    async fn probe_once(&self, health_url: &str) -> bool {
        let req = match Request::builder()
            .method(Method::GET)
            .uri(health_url)
            .body(Empty::<Bytes>::new())
        {
            Ok(r) => r,
            Err(_) => return false,
        };

        match tokio::time::timeout(HEALTH_PROBE_TIMEOUT, self.health_client.request(req)).await {
            Ok(Ok(response)) => response.status() == StatusCode::OK,
            Ok(Err(e)) => {
                debug!(error = %e, "Health probe failed");
                false
            }
            Err(_) => {
                debug!("Health probe timed out");
                false
            }
        }
    }

    /// Terminate the backend: SIGTERM, bounded wait, then SIGKILL.
    ///
    /// Runs the termination sequence at most once; later calls are no-ops.
    pub async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            debug!(state = ?self.state, "No backend process to stop");
            return;
        };

        self.state = SupervisorState::Stopping;
        terminate(&mut child, self.config.shutdown_grace()).await;
        self.state = SupervisorState::Stopped;
    }
}

/// Send SIGTERM and wait for the exit, escalating to SIGKILL when the grace
/// period runs out. The wait is always bounded.
async fn terminate(child: &mut Child, grace_period: Duration) {
    if let Some(pid) = child.id() {
        info!(pid, "Sending SIGTERM to backend");

        #[cfg(unix)]
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }

        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
        }
    }

    match tokio::time::timeout(grace_period, child.wait()).await {
        Ok(Ok(status)) => {
            info!(%status, "Backend process exited");
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Error waiting for backend to exit");
        }
        Err(_) => {
            warn!(
                grace_period_secs = grace_period.as_secs(),
                "Grace period exceeded, sending SIGKILL"
            );
            let _ = child.kill().await;
        }
    }
}

/// Read whatever the dead child left in its stdout/stderr pipes
async fn drain_output(child: &mut Child) -> String {
    let mut output = String::new();

    if let Some(mut stdout) = child.stdout.take() {
        let mut buf = String::new();
        if stdout.read_to_string(&mut buf).await.is_ok() && !buf.is_empty() {
            output.push_str("stdout:\n");
            output.push_str(&buf);
        }
    }

    if let Some(mut stderr) = child.stderr.take() {
        let mut buf = String::new();
        if stderr.read_to_string(&mut buf).await.is_ok() && !buf.is_empty() {
            if !output.is_empty() {
                output.push('\n');
            }
            output.push_str("stderr:\n");
            output.push_str(&buf);
        }
    }

    output
}
