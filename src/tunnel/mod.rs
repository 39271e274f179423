// SPDX-License-Identifier: GPL-2.0-or-later

pub mod command;
pub mod launcher;
pub mod registry;

pub use command::HelperCommand;
pub use launcher::{
    HelperSpawner, ProcessSpawner, TunnelHandle, TunnelState, DEFAULT_HANDSHAKE_TIMEOUT,
};
pub use registry::{TunnelInfo, TunnelRegistry};
