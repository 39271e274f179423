// SPDX-License-Identifier: GPL-2.0-or-later

use std::io;
use thiserror::Error as ThisError;

/// Everything that can go wrong between option parsing and step exit.
///
/// Setup-time errors are logged and skip the affected tunnel; they never
/// abort job submission. Teardown-time errors are logged and swallowed.
/// `JobQueryFailed` is the only kind a setup hook propagates to its caller.
#[derive(Debug, ThisError)]
pub enum TunnelError {
    #[error("invalid node expression: {0}")]
    InvalidExpression(String),

    #[error("allocation expands to zero hosts")]
    EmptyNodeSet,

    #[error("malformed forward spec token: {0:?}")]
    MalformedForwardSpec(String),

    #[error("port out of range: {0}")]
    PortOutOfRange(u64),

    #[error("failed to spawn tunnel helper: {0}")]
    SpawnFailed(#[source] io::Error),

    #[error("no handshake line from tunnel helper within the timeout")]
    HandshakeTimeout,

    #[error("tunnel helper handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("tunnel helper exited with status {0}")]
    HelperFailed(i32),

    #[error("job query failed: {0}")]
    JobQueryFailed(String),

    #[error("teardown removed {total} tunnels but {failed} removal commands failed")]
    TeardownPartialFailure { failed: usize, total: usize },
}
