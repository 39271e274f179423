// SPDX-License-Identifier: GPL-2.0-or-later

//! Spawning and supervising the external tunnel helper.
//!
//! A `connect` helper announces one line on stdout (the bound port, or an
//! opaque status token) and then keeps running as the tunnel transport. The
//! launcher reads that handshake under a hard timeout so the job-startup
//! path is never stalled by a misbehaving helper, and keeps the process
//! handle either way so step exit can reap it.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::debug;

use super::command::HelperCommand;
use crate::error::TunnelError;
use crate::slurm::JobRef;

/// Recommended handshake timeout; tunnel setup is best-effort and must not
/// hold up job startup longer than this.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Handshake lines longer than this are nonsense from a broken helper.
const HANDSHAKE_LIMIT: u64 = 256;

/// Grace period for an already-EOFed or killed helper to be reaped.
const EXIT_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Starting,
    Active,
    Failed,
    Closed,
}

/// One launched helper, tracked from spawn until teardown.
#[derive(Debug)]
pub struct TunnelHandle {
    node: String,
    job: JobRef,
    state: TunnelState,
    bound_port: Option<u16>,
    announcement: Option<String>,
    failure: Option<TunnelError>,
    child: Option<Child>,
}

impl TunnelHandle {
    fn starting(node: &str, job: JobRef, child: Child) -> Self {
        Self {
            node: node.to_string(),
            job,
            state: TunnelState::Starting,
            bound_port: None,
            announcement: None,
            failure: None,
            child: Some(child),
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn job(&self) -> JobRef {
        self.job
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    /// Port the helper actually bound; may differ from the requested
    /// submit port under contention. None for pass-through announcements.
    pub fn bound_port(&self) -> Option<u16> {
        self.bound_port
    }

    /// Raw whitespace-trimmed handshake line.
    pub fn announcement(&self) -> Option<&str> {
        self.announcement.as_deref()
    }

    pub fn failure(&self) -> Option<&TunnelError> {
        self.failure.as_ref()
    }

    /// Pid of the still-running helper transport, if any.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    fn activated(mut self, line: &str) -> Self {
        self.state = TunnelState::Active;
        self.bound_port = line.parse().ok();
        self.announcement = Some(line.to_string());
        self
    }

    fn failed(mut self, failure: TunnelError) -> Self {
        self.state = TunnelState::Failed;
        self.failure = Some(failure);
        self
    }

    #[cfg(test)]
    pub(crate) fn stub_active(node: &str, job: JobRef, bound_port: Option<u16>) -> Self {
        Self {
            node: node.to_string(),
            job,
            state: TunnelState::Active,
            bound_port,
            announcement: bound_port.map(|p| p.to_string()),
            failure: None,
            child: None,
        }
    }

    /// Signal the helper transport and reap it. Idempotent.
    pub(crate) async fn shutdown(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        self.child = None;
        self.state = TunnelState::Closed;
    }
}

/// Seam between the hooks/registry and the operating system. The production
/// implementation is [`ProcessSpawner`]; tests substitute recording fakes.
#[async_trait]
pub trait HelperSpawner: Send + Sync {
    /// Spawn a persistent helper and capture its one-line handshake.
    ///
    /// Only a spawn failure is an `Err`; handshake trouble comes back as a
    /// `Failed` handle that still tracks the process for later reaping.
    async fn launch(
        &self,
        node: &str,
        job: JobRef,
        cmd: &HelperCommand,
        handshake_timeout: Duration,
    ) -> Result<TunnelHandle, TunnelError>;

    /// Run a one-shot helper (greet/remove) to completion and return its
    /// trimmed single-line output, which may be empty.
    async fn run_once(
        &self,
        cmd: &HelperCommand,
        deadline: Duration,
    ) -> Result<String, TunnelError>;
}

#[derive(Debug, Default)]
pub struct ProcessSpawner;

impl ProcessSpawner {
    fn spawn(cmd: &HelperCommand) -> Result<Child, TunnelError> {
        debug!(helper = %cmd, "spawning tunnel helper");
        Command::new(cmd.program())
            .args(cmd.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(TunnelError::SpawnFailed)
    }
}

#[async_trait]
impl HelperSpawner for ProcessSpawner {
    async fn launch(
        &self,
        node: &str,
        job: JobRef,
        cmd: &HelperCommand,
        handshake_timeout: Duration,
    ) -> Result<TunnelHandle, TunnelError> {
        let mut child = Self::spawn(cmd)?;
        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                return Ok(TunnelHandle::starting(node, job, child).failed(
                    TunnelError::HandshakeFailed("helper stdout was not captured".to_string()),
                ));
            }
        };
        let mut reader = BufReader::new(stdout.take(HANDSHAKE_LIMIT));
        let mut line = String::new();

        match timeout(handshake_timeout, reader.read_line(&mut line)).await {
            // No line within the deadline. The helper may still come up,
            // but the job-startup path cannot wait; keep the pid so step
            // exit performs the forced reap.
            Err(_) => Ok(TunnelHandle::starting(node, job, child)
                .failed(TunnelError::HandshakeTimeout)),
            Ok(Err(err)) => {
                let mut handle = TunnelHandle::starting(node, job, child);
                handle.reap_if_exited().await;
                Ok(handle.failed(TunnelError::HandshakeFailed(err.to_string())))
            }
            Ok(Ok(0)) => {
                let mut handle = TunnelHandle::starting(node, job, child);
                handle.reap_if_exited().await;
                Ok(handle.failed(TunnelError::HandshakeFailed(
                    "helper closed stdout before announcing".to_string(),
                )))
            }
            Ok(Ok(_)) => {
                let token = line.trim();
                if token.is_empty() {
                    let mut handle = TunnelHandle::starting(node, job, child);
                    handle.reap_if_exited().await;
                    Ok(handle.failed(TunnelError::HandshakeFailed(
                        "helper announced an empty line".to_string(),
                    )))
                } else {
                    Ok(TunnelHandle::starting(node, job, child).activated(token))
                }
            }
        }
    }

    async fn run_once(
        &self,
        cmd: &HelperCommand,
        deadline: Duration,
    ) -> Result<String, TunnelError> {
        let mut child = Self::spawn(cmd)?;
        let stdout = child.stdout.take();
        let mut line = String::new();
        if let Some(stdout) = stdout {
            let mut reader = BufReader::new(stdout.take(HANDSHAKE_LIMIT));
            if timeout(deadline, reader.read_line(&mut line)).await.is_err() {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(TunnelError::HandshakeTimeout);
            }
        }
        let status = match timeout(deadline, child.wait()).await {
            Ok(status) => status.map_err(TunnelError::SpawnFailed)?,
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(TunnelError::HandshakeTimeout);
            }
        };
        if !status.success() {
            return Err(TunnelError::HelperFailed(status.code().unwrap_or(-1)));
        }
        Ok(line.trim().to_string())
    }
}

impl TunnelHandle {
    /// Reap the helper if it already exited; keep it tracked otherwise.
    async fn reap_if_exited(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if timeout(EXIT_GRACE, child.wait()).await.is_ok() {
                self.child = None;
            }
        }
    }
}
