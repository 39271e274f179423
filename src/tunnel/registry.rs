// SPDX-License-Identifier: GPL-2.0-or-later

//! Process-wide table of live tunnels, keyed by job step.
//!
//! One entry per active step keeps contention negligible, so a single
//! registry-wide lock is enough. Entries are created lazily on the first
//! registered handle and discarded unconditionally at teardown.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::command::HelperCommand;
use super::launcher::{HelperSpawner, TunnelHandle, TunnelState};
use crate::config::PluginConfig;
use crate::error::TunnelError;
use crate::slurm::JobRef;

/// Snapshot of one registered tunnel, for lookups and logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelInfo {
    pub node: String,
    pub pid: Option<u32>,
    pub bound_port: Option<u16>,
    pub state: TunnelState,
}

#[derive(Default)]
pub struct TunnelRegistry {
    tunnels: RwLock<HashMap<JobRef, Vec<TunnelHandle>>>,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, handle: TunnelHandle) {
        let mut tunnels = self.tunnels.write().await;
        tunnels.entry(handle.job()).or_default().push(handle);
    }

    pub async fn lookup(&self, job: JobRef) -> Vec<TunnelInfo> {
        let tunnels = self.tunnels.read().await;
        tunnels
            .get(&job)
            .map(|handles| {
                handles
                    .iter()
                    .map(|h| TunnelInfo {
                        node: h.node().to_string(),
                        pid: h.pid(),
                        bound_port: h.bound_port(),
                        state: h.state(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Tear down every tunnel registered for `job` and drop the entry.
    ///
    /// Each handle gets a helper `remove` invocation and its tracked
    /// transport is signalled and reaped. Removal failures are logged and
    /// never propagated; step exit must not be blocked by cleanup trouble.
    /// Returns the number of tunnels closed.
    pub async fn teardown(
        &self,
        job: JobRef,
        spawner: &dyn HelperSpawner,
        cfg: &PluginConfig,
        deadline: Duration,
    ) -> usize {
        let handles = {
            let mut tunnels = self.tunnels.write().await;
            tunnels.remove(&job)
        };
        let Some(mut handles) = handles else {
            debug!(%job, "no tunnels registered for step");
            return 0;
        };

        let total = handles.len();
        let mut failed = 0usize;
        for handle in &mut handles {
            let remove = HelperCommand::remove(job, cfg);
            if let Err(err) = spawner.run_once(&remove, deadline).await {
                failed += 1;
                warn!(%job, node = handle.node(), error = %err, "tunnel removal command failed");
            }
            handle.shutdown().await;
        }
        if failed > 0 {
            let summary = TunnelError::TeardownPartialFailure { failed, total };
            warn!(%job, "{summary}");
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Remove-command runner that fails on selected calls and records every
    /// invocation.
    struct FlakyRemover {
        calls: Mutex<Vec<HelperCommand>>,
        fail_on: Vec<usize>,
    }

    impl FlakyRemover {
        fn new(fail_on: Vec<usize>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_on,
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HelperSpawner for FlakyRemover {
        async fn launch(
            &self,
            _node: &str,
            _job: JobRef,
            _cmd: &HelperCommand,
            _timeout: Duration,
        ) -> Result<TunnelHandle, TunnelError> {
            unreachable!("registry tests never launch")
        }

        async fn run_once(
            &self,
            cmd: &HelperCommand,
            _deadline: Duration,
        ) -> Result<String, TunnelError> {
            let mut calls = self.calls.lock().unwrap();
            let index = calls.len();
            calls.push(cmd.clone());
            if self.fail_on.contains(&index) {
                Err(TunnelError::HelperFailed(1))
            } else {
                Ok(String::new())
            }
        }
    }

    const JOB: JobRef = JobRef {
        job_id: 42,
        step_id: 0,
    };

    #[tokio::test]
    async fn lookup_reflects_registered_handles() {
        let registry = TunnelRegistry::new();
        registry
            .register(TunnelHandle::stub_active("n1", JOB, Some(10022)))
            .await;
        registry
            .register(TunnelHandle::stub_active("n2", JOB, None))
            .await;

        let infos = registry.lookup(JOB).await;
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].node, "n1");
        assert_eq!(infos[0].bound_port, Some(10022));
        assert_eq!(infos[1].state, TunnelState::Active);

        let other = JobRef::new(42, 1);
        assert!(registry.lookup(other).await.is_empty());
    }

    #[tokio::test]
    async fn teardown_removes_entry_and_counts_closed_tunnels() {
        let registry = TunnelRegistry::new();
        registry
            .register(TunnelHandle::stub_active("n1", JOB, Some(10022)))
            .await;
        registry
            .register(TunnelHandle::stub_active("n2", JOB, Some(10023)))
            .await;

        let remover = FlakyRemover::new(Vec::new());
        let cfg = PluginConfig::default();
        let closed = registry
            .teardown(JOB, &remover, &cfg, Duration::from_secs(1))
            .await;
        assert_eq!(closed, 2);
        assert_eq!(remover.call_count(), 2);
        assert!(registry.lookup(JOB).await.is_empty());
    }

    #[tokio::test]
    async fn teardown_survives_failing_removal_commands() {
        let registry = TunnelRegistry::new();
        registry
            .register(TunnelHandle::stub_active("n1", JOB, Some(10022)))
            .await;
        registry
            .register(TunnelHandle::stub_active("n2", JOB, Some(10023)))
            .await;

        // First removal exits non-zero; both entries must still go away.
        let remover = FlakyRemover::new(vec![0]);
        let cfg = PluginConfig::default();
        let closed = registry
            .teardown(JOB, &remover, &cfg, Duration::from_secs(1))
            .await;
        assert_eq!(closed, 2);
        assert!(registry.lookup(JOB).await.is_empty());
    }

    #[tokio::test]
    async fn teardown_of_unknown_step_is_a_noop() {
        let registry = TunnelRegistry::new();
        let remover = FlakyRemover::new(Vec::new());
        let cfg = PluginConfig::default();
        let closed = registry
            .teardown(JOB, &remover, &cfg, Duration::from_secs(1))
            .await;
        assert_eq!(closed, 0);
        assert_eq!(remover.call_count(), 0);
    }

    #[tokio::test]
    async fn steps_do_not_interfere() {
        let registry = TunnelRegistry::new();
        let other = JobRef::new(42, 1);
        registry
            .register(TunnelHandle::stub_active("n1", JOB, Some(10022)))
            .await;
        registry
            .register(TunnelHandle::stub_active("n1", other, Some(10023)))
            .await;

        let remover = FlakyRemover::new(Vec::new());
        let cfg = PluginConfig::default();
        assert_eq!(
            registry
                .teardown(JOB, &remover, &cfg, Duration::from_secs(1))
                .await,
            1
        );
        assert_eq!(registry.lookup(other).await.len(), 1);
    }
}
