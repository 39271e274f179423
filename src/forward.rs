// SPDX-License-Identifier: GPL-2.0-or-later

//! Forwarding policy: which nodes get a tunnel and which port pairs are
//! forwarded. Also owns the single user-facing option value and the
//! environment mirror that carries the chosen mode to the remote side.

use crate::error::TunnelError;
use crate::hostlist;

/// Name of the environment variable that mirrors the forward mode from the
/// submission command into the job's steps.
pub const MODE_ENV: &str = "SLURM_STUNNEL";

/// Environment variable holding the negotiated port/value handed from the
/// submission side to batch steps, and rewritten by the remote hook.
pub const PORT_ENV: &str = "SLURM_STUNNEL_PORT";

/// Policy selecting which allocated node(s) receive a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForwardMode {
    #[default]
    First,
    Last,
    All,
    /// Batch jobs: the remote batch-script hook forwards through the
    /// allocation node instead of the client connecting directly.
    Batch,
    /// No forwarding requested. Callers treat the empty target list as
    /// "skip tunnel setup", never as an error.
    None,
}

impl ForwardMode {
    /// Token stored in [`MODE_ENV`]; inverse of [`ForwardMode::from_token`].
    pub fn as_token(self) -> &'static str {
        match self {
            ForwardMode::First => "first",
            ForwardMode::Last => "last",
            ForwardMode::All => "all",
            ForwardMode::Batch => "batch",
            ForwardMode::None => "none",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "first" => Some(ForwardMode::First),
            "last" => Some(ForwardMode::Last),
            "all" => Some(ForwardMode::All),
            "batch" => Some(ForwardMode::Batch),
            "none" => Some(ForwardMode::None),
            _ => None,
        }
    }

    /// Mode as seen by a remote step. An absent or unrecognized variable
    /// means no forwarding was requested for this job.
    pub fn from_env(value: Option<&str>) -> Self {
        value
            .map(str::trim)
            .and_then(Self::from_token)
            .unwrap_or(ForwardMode::None)
    }
}

/// One `submit_port:exec_port` pair from the user option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardRequest {
    pub submit_port: u16,
    pub exec_port: u16,
}

impl std::fmt::Display for ForwardRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.submit_port, self.exec_port)
    }
}

/// Parsed value of the `--tunnel` option: a node-selection mode plus zero or
/// more explicit port forwards.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TunnelRequest {
    pub mode: ForwardMode,
    pub forwards: Vec<ForwardRequest>,
}

/// Expand the allocation expression and select the nodes to tunnel to.
///
/// `First`/`Last` select positionally from the expanded list; `Batch`
/// behaves like `First` here (the batch path resolves its target through
/// the allocation node separately); `None` always yields an empty list.
pub fn resolve_targets(node_expr: &str, mode: ForwardMode) -> Result<Vec<String>, TunnelError> {
    if mode == ForwardMode::None {
        return Ok(Vec::new());
    }
    let mut hosts = hostlist::expand(node_expr)?;
    if hosts.is_empty() {
        return Err(TunnelError::EmptyNodeSet);
    }
    match mode {
        ForwardMode::First | ForwardMode::Batch => {
            hosts.truncate(1);
            Ok(hosts)
        }
        ForwardMode::Last => Ok(vec![hosts.pop().unwrap_or_default()]),
        ForwardMode::All => Ok(hosts),
        ForwardMode::None => unreachable!("handled above"),
    }
}

/// Parse a comma-separated list of `submit:exec` port pairs.
///
/// Empty input means no explicit forwards were requested and is not an
/// error. Duplicate submit ports are the user's responsibility; input order
/// is preserved for predictable log output.
pub fn parse_forwards(spec: &str) -> Result<Vec<ForwardRequest>, TunnelError> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Ok(Vec::new());
    }
    spec.split(',').map(parse_pair).collect()
}

fn parse_pair(token: &str) -> Result<ForwardRequest, TunnelError> {
    let malformed = || TunnelError::MalformedForwardSpec(token.to_string());
    let (submit, exec) = token.split_once(':').ok_or_else(malformed)?;
    Ok(ForwardRequest {
        submit_port: parse_port(submit).ok_or_else(malformed)??,
        exec_port: parse_port(exec).ok_or_else(malformed)??,
    })
}

/// Outer `None` means not a number at all; inner error means a number that
/// is not a usable port.
fn parse_port(text: &str) -> Option<Result<u16, TunnelError>> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: u64 = text.parse().ok()?;
    if value == 0 || value > u64::from(u16::MAX) {
        return Some(Err(TunnelError::PortOutOfRange(value)));
    }
    Some(Ok(value as u16))
}

/// Parse the user option value: either a mode keyword or a forward list.
///
/// A forward list implies mode `First`. Anything that is neither a known
/// keyword nor a well-formed forward list is rejected here, before job
/// submission proceeds; there is no silent fallthrough for unknown tokens.
pub fn parse_option(value: &str) -> Result<TunnelRequest, TunnelError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(TunnelRequest::default());
    }
    if let Some(mode) = ForwardMode::from_token(value) {
        return Ok(TunnelRequest {
            mode,
            forwards: Vec::new(),
        });
    }
    let forwards = parse_forwards(value)?;
    Ok(TunnelRequest {
        mode: ForwardMode::First,
        forwards,
    })
}
