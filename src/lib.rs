// SPDX-License-Identifier: GPL-2.0-or-later

//! SSH-based TCP port forwarding between a job's submission host and its
//! execution nodes, scoped to the lifetime of one scheduler job step.
//!
//! The host runtime (a SPANK-style plugin shim) calls the three lifecycle
//! hooks on [`hooks::TunnelPlugin`]; everything else — node resolution,
//! forward-spec parsing, helper argv construction, launch supervision and
//! the tunnel registry — hangs off those. Scheduler access is abstracted
//! behind [`slurm::JobQuery`] and the actual forwarding is done by an
//! external helper program driven over a one-line stdout handshake.

pub mod config;
pub mod error;
pub mod forward;
pub mod hooks;
pub mod hostlist;
pub mod logging;
pub mod slurm;
pub mod tunnel;

pub use config::PluginConfig;
pub use error::TunnelError;
pub use forward::{ForwardMode, ForwardRequest, TunnelRequest};
pub use hooks::TunnelPlugin;
pub use slurm::{JobQuery, JobRef, StepEnv};
pub use tunnel::{TunnelHandle, TunnelRegistry, TunnelState};
