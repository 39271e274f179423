// SPDX-License-Identifier: GPL-2.0-or-later

//! Identity of the current job step and the query surface onto the
//! scheduler. The real SPANK/scheduler bindings live in the host process;
//! the hooks only see these traits.

use async_trait::async_trait;

use crate::error::TunnelError;

/// Sentinel step id the scheduler assigns to the batch script step.
pub const BATCH_STEP_ID: u32 = 0xfffffffb;

/// One job step: a job id plus a step id. Immutable once obtained; fetched
/// fresh from the query interface at each lifecycle hook, never cached
/// across hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobRef {
    pub job_id: u32,
    pub step_id: u32,
}

impl JobRef {
    pub fn new(job_id: u32, step_id: u32) -> Self {
        Self { job_id, step_id }
    }

    /// Whether this step is the job's batch script.
    pub fn is_batch(&self) -> bool {
        self.step_id == BATCH_STEP_ID
    }
}

impl std::fmt::Display for JobRef {
    /// The `job.step` form embedded in helper invocations.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.job_id, self.step_id)
    }
}

/// Scheduler queries the hooks depend on. Any failure maps to
/// [`TunnelError::JobQueryFailed`] and aborts the current hook without
/// failing the job.
#[async_trait]
pub trait JobQuery: Send + Sync {
    /// Identity of the step the current hook runs for.
    async fn current_job(&self) -> Result<JobRef, TunnelError>;

    /// Compact host-range expression of the job's allocated nodes.
    async fn allocated_nodes(&self, job: JobRef) -> Result<String, TunnelError>;

    /// Submission-originating node, used by remote-side batch forwarding.
    async fn allocation_node(&self, job: JobRef) -> Result<String, TunnelError>;

    /// Login name of the job owner.
    async fn user_name(&self, job: JobRef) -> Result<String, TunnelError>;

    /// Hostname of the node this hook runs on.
    fn local_hostname(&self) -> Result<String, TunnelError>;
}

/// Job-step environment as exposed by the host runtime (spank_getenv /
/// spank_setenv on the remote side, the process environment locally).
pub trait StepEnv: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
    fn set(&self, name: &str, value: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ref_displays_as_dotted_pair() {
        assert_eq!(JobRef::new(103, 2).to_string(), "103.2");
    }

    #[test]
    fn batch_step_detection() {
        assert!(JobRef::new(1, BATCH_STEP_ID).is_batch());
        assert!(!JobRef::new(1, 0).is_batch());
    }
}
