// SPDX-License-Identifier: GPL-2.0-or-later

const DEFAULT_SSH_CMD: &str = "ssh";
const DEFAULT_SSH_ARGS: &str = "";
const DEFAULT_HELPERTASK_ARGS: &str = "";
const DEFAULT_HELPER_PROG: &str = "/usr/libexec/stunnel-helper";

/// SSH overrides read once from the plugstack configuration line.
///
/// Built at plugin load and passed by reference afterwards; nothing mutates
/// it, so it needs no synchronization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginConfig {
    /// Command the helper uses to reach the execution node.
    pub ssh_cmd: String,
    /// Extra arguments appended to the ssh invocation.
    pub ssh_args: String,
    /// Trailing arguments appended to every helper invocation.
    pub helpertask_args: String,
    /// Path of the external tunnel helper binary.
    pub helper_prog: String,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            ssh_cmd: DEFAULT_SSH_CMD.to_string(),
            ssh_args: DEFAULT_SSH_ARGS.to_string(),
            helpertask_args: DEFAULT_HELPERTASK_ARGS.to_string(),
            helper_prog: DEFAULT_HELPER_PROG.to_string(),
        }
    }
}

impl PluginConfig {
    /// Parse `key=value` tokens from the plugstack line.
    ///
    /// Multi-word values use `|` as a space escape, since plugstack tokens
    /// cannot themselves contain spaces. Unknown tokens are ignored; absent
    /// tokens keep their documented defaults.
    pub fn from_plugstack_args<S: AsRef<str>>(args: &[S]) -> Self {
        let mut cfg = Self::default();
        for arg in args {
            let arg = arg.as_ref();
            if let Some(value) = arg.strip_prefix("ssh_cmd=") {
                cfg.ssh_cmd = unescape(value);
            } else if let Some(value) = arg.strip_prefix("ssh_args=") {
                cfg.ssh_args = unescape(value);
            } else if let Some(value) = arg.strip_prefix("helpertask_args=") {
                cfg.helpertask_args = unescape(value);
            } else if let Some(value) = arg.strip_prefix("helper_prog=") {
                cfg.helper_prog = unescape(value);
            }
        }
        cfg
    }
}

fn unescape(value: &str) -> String {
    value.replace('|', " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_no_tokens_given() {
        let cfg = PluginConfig::from_plugstack_args::<&str>(&[]);
        assert_eq!(cfg, PluginConfig::default());
        assert_eq!(cfg.ssh_cmd, "ssh");
        assert_eq!(cfg.ssh_args, "");
    }

    #[test]
    fn parses_all_known_tokens() {
        let cfg = PluginConfig::from_plugstack_args(&[
            "ssh_cmd=/usr/bin/ssh",
            "ssh_args=-oBatchMode=yes",
            "helpertask_args=-v",
            "helper_prog=/opt/stunnel/helper",
        ]);
        assert_eq!(cfg.ssh_cmd, "/usr/bin/ssh");
        assert_eq!(cfg.ssh_args, "-oBatchMode=yes");
        assert_eq!(cfg.helpertask_args, "-v");
        assert_eq!(cfg.helper_prog, "/opt/stunnel/helper");
    }

    #[test]
    fn pipe_unescapes_to_space() {
        let cfg = PluginConfig::from_plugstack_args(&["ssh_args=-p|2022|-oBatchMode=yes"]);
        assert_eq!(cfg.ssh_args, "-p 2022 -oBatchMode=yes");
    }

    #[test]
    fn unknown_tokens_are_ignored() {
        let cfg = PluginConfig::from_plugstack_args(&["nope=1", "ssh_cmd=ssh2"]);
        assert_eq!(cfg.ssh_cmd, "ssh2");
        assert_eq!(cfg.helpertask_args, "");
    }
}
