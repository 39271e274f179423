// SPDX-License-Identifier: GPL-2.0-or-later

//! Tracing setup for host processes that embed the plugin. Messages land on
//! the job-management system's standard log stream; there is no separate
//! user-facing error channel.

use std::env;

use tracing_subscriber::EnvFilter;

/// Initialize a compact subscriber. `STUNNEL_LOG` overrides the level
/// filter; `verbose` bumps the default from `info` to `debug`.
///
/// Returns quietly if a global subscriber is already set, so embedding
/// hosts that configure their own logging keep it.
pub fn init(verbose: bool) {
    let filter = match env::var("STUNNEL_LOG") {
        Ok(value) => EnvFilter::new(value),
        Err(_) => {
            if verbose {
                EnvFilter::new("debug")
            } else {
                EnvFilter::new("info")
            }
        }
    };
    let _ = tracing_subscriber::fmt()
        .compact()
        .with_env_filter(filter)
        .try_init();
}
