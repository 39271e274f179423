// SPDX-License-Identifier: GPL-2.0-or-later

//! The three moments the host job-management runtime calls into the plugin:
//! submission-side setup, remote step start, and step exit.
//!
//! Setup is best-effort: a tunnel that cannot be established is logged and
//! skipped, never a reason to fail the job. The one exception is a failing
//! job query, which aborts the current hook with a recoverable error. Step
//! exit always succeeds, whatever teardown reports.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::config::PluginConfig;
use crate::error::TunnelError;
use crate::forward::{self, ForwardMode, TunnelRequest, MODE_ENV, PORT_ENV};
use crate::slurm::{JobQuery, JobRef, StepEnv};
use crate::tunnel::{
    HelperCommand, HelperSpawner, ProcessSpawner, TunnelHandle, TunnelRegistry, TunnelState,
    DEFAULT_HANDSHAKE_TIMEOUT,
};

pub struct TunnelPlugin {
    cfg: PluginConfig,
    registry: TunnelRegistry,
    spawner: Arc<dyn HelperSpawner>,
    jobs: Arc<dyn JobQuery>,
    handshake_timeout: Duration,
}

impl TunnelPlugin {
    pub fn new(cfg: PluginConfig, jobs: Arc<dyn JobQuery>) -> Self {
        Self::with_spawner(cfg, jobs, Arc::new(ProcessSpawner))
    }

    pub fn with_spawner(
        cfg: PluginConfig,
        jobs: Arc<dyn JobQuery>,
        spawner: Arc<dyn HelperSpawner>,
    ) -> Self {
        Self {
            cfg,
            registry: TunnelRegistry::new(),
            spawner,
            jobs,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &TunnelRegistry {
        &self.registry
    }

    /// Submission-side hook: launch one tunnel per requested forward (or a
    /// single generic tunnel) toward each node the mode selects, and mirror
    /// the mode into the job environment for the remote steps.
    ///
    /// Only [`TunnelError::JobQueryFailed`] propagates; the host treats it
    /// as a recoverable status and the job continues without tunneling.
    pub async fn local_setup(
        &self,
        env: &dyn StepEnv,
        request: &TunnelRequest,
    ) -> Result<(), TunnelError> {
        if request.mode == ForwardMode::None {
            debug!("no forwarding requested, skipping tunnel setup");
            return Ok(());
        }

        let job = self.jobs.current_job().await?;
        let node_expr = self.jobs.allocated_nodes(job).await?;
        let targets = match forward::resolve_targets(&node_expr, request.mode) {
            Ok(targets) => targets,
            Err(err) => {
                error!(%job, expr = %node_expr, "cannot resolve tunnel targets: {err}");
                return Ok(());
            }
        };

        env.set(MODE_ENV, request.mode.as_token());

        for node in &targets {
            if request.forwards.is_empty() {
                let cmd = HelperCommand::connect(node, job, None, &self.cfg, false);
                self.launch_and_register(node, job, &cmd, env).await;
            } else {
                for forward in &request.forwards {
                    let cmd = HelperCommand::connect(node, job, Some(*forward), &self.cfg, false);
                    self.launch_and_register(node, job, &cmd, env).await;
                }
            }
        }
        Ok(())
    }

    async fn launch_and_register(
        &self,
        node: &str,
        job: JobRef,
        cmd: &HelperCommand,
        env: &dyn StepEnv,
    ) {
        match self
            .spawner
            .launch(node, job, cmd, self.handshake_timeout)
            .await
        {
            Ok(handle) => {
                self.note_outcome(&handle, env);
                self.track(handle).await;
            }
            Err(err) => {
                error!(%job, node, "unable to launch tunnel helper: {err}");
            }
        }
    }

    fn note_outcome(&self, handle: &TunnelHandle, env: &dyn StepEnv) {
        match handle.state() {
            TunnelState::Active => {
                info!(
                    job = %handle.job(),
                    node = handle.node(),
                    forward = handle.announcement().unwrap_or("?"),
                    "tunnel established"
                );
                if let Some(port) = handle.bound_port() {
                    env.set(PORT_ENV, &port.to_string());
                }
            }
            _ => {
                let reason = handle
                    .failure()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "unknown failure".to_string());
                error!(
                    job = %handle.job(),
                    node = handle.node(),
                    "unable to connect node: {reason}"
                );
            }
        }
    }

    /// Keep any handle that is live or still holds a process to reap.
    async fn track(&self, handle: TunnelHandle) {
        if handle.state() == TunnelState::Active || handle.pid().is_some() {
            self.registry.register(handle).await;
        }
    }

    /// Remote-side hook, run where the step starts.
    ///
    /// Batch script steps in batch mode carry the submission-side value one
    /// hop further through a persistent helper; all other steps ask the
    /// helper for the value negotiated at submission (greet) and store it.
    /// Every failure here degrades to forwarding-disabled.
    pub async fn remote_setup(&self, env: &dyn StepEnv) -> Result<(), TunnelError> {
        let mode = ForwardMode::from_env(env.get(MODE_ENV).as_deref());
        if mode == ForwardMode::None {
            return Ok(());
        }

        let job = self.jobs.current_job().await?;
        if job.is_batch() && mode == ForwardMode::Batch {
            self.forward_batch_value(job, env).await;
        } else if mode != ForwardMode::Batch {
            self.adopt_greeted_value(job, env).await;
        }
        Ok(())
    }

    async fn forward_batch_value(&self, job: JobRef, env: &dyn StepEnv) {
        let Some(inherited) = env.get(PORT_ENV) else {
            error!(%job, "batch step has no inherited forward value");
            return;
        };
        let (user, alloc_node, localhost) = match self.batch_endpoints(job).await {
            Ok(endpoints) => endpoints,
            Err(err) => {
                error!(%job, "cannot resolve batch forwarding endpoints: {err}");
                return;
            }
        };

        let cmd = HelperCommand::batch_forward(
            &user,
            &alloc_node,
            &inherited,
            &localhost,
            job,
            &self.cfg,
        );
        match self
            .spawner
            .launch(&alloc_node, job, &cmd, self.handshake_timeout)
            .await
        {
            Ok(handle) => {
                if handle.state() == TunnelState::Active {
                    if let Some(value) = handle.announcement() {
                        env.set(PORT_ENV, value);
                        info!(%job, value, "batch forward established");
                    }
                } else {
                    let reason = handle
                        .failure()
                        .map(ToString::to_string)
                        .unwrap_or_else(|| "unknown failure".to_string());
                    error!(%job, "batch forward failed: {reason}");
                }
                self.track(handle).await;
            }
            Err(err) => error!(%job, "unable to launch batch forward helper: {err}"),
        }
    }

    async fn batch_endpoints(&self, job: JobRef) -> Result<(String, String, String), TunnelError> {
        let user = self.jobs.user_name(job).await?;
        let alloc_node = self.jobs.allocation_node(job).await?;
        let localhost = self.jobs.local_hostname()?;
        Ok((user, alloc_node, localhost))
    }

    async fn adopt_greeted_value(&self, job: JobRef, env: &dyn StepEnv) {
        let cmd = HelperCommand::greet(job, &self.cfg);
        match self.spawner.run_once(&cmd, self.handshake_timeout).await {
            Ok(value) if !value.is_empty() => {
                env.set(PORT_ENV, &value);
                info!(%job, value = %value, "adopted negotiated forward value");
            }
            Ok(_) => error!(%job, "helper greeted with an empty value"),
            Err(err) => error!(%job, "unable to read negotiated forward value: {err}"),
        }
    }

    /// Step-exit hook: tear down whatever is registered for the step.
    /// Never fails; cleanup must not block step completion.
    pub async fn step_exit(&self) {
        let job = match self.jobs.current_job().await {
            Ok(job) => job,
            Err(err) => {
                error!("cannot identify exiting step, leaving tunnels to the reaper: {err}");
                return;
            }
        };
        let closed = self
            .registry
            .teardown(job, self.spawner.as_ref(), &self.cfg, self.handshake_timeout)
            .await;
        if closed > 0 {
            info!(%job, closed, "tore down tunnels for step");
        }
    }
}
