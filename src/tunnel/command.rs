// SPDX-License-Identifier: GPL-2.0-or-later

//! Argument-vector construction for the external tunnel helper.
//!
//! Invocations are typed argv lists executed directly, never strings handed
//! to a shell, so node names and user names need no escaping. The mode
//! flags `-c`, `-g` and `-r` are mutually exclusive; teardown is never
//! combined with setup flags.

use crate::config::PluginConfig;
use crate::forward::ForwardRequest;
use crate::slurm::JobRef;

/// A ready-to-spawn helper invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperCommand {
    program: String,
    args: Vec<String>,
}

impl HelperCommand {
    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    #[cfg(test)]
    pub(crate) fn raw(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Establish a forward to `node` and announce the bound port.
    ///
    /// With `wait_for_greeting` the helper blocks until the remote side has
    /// greeted before announcing. Without an explicit `forward` the helper
    /// sets up its single generic tunnel.
    pub fn connect(
        node: &str,
        job: JobRef,
        forward: Option<ForwardRequest>,
        cfg: &PluginConfig,
        wait_for_greeting: bool,
    ) -> Self {
        let mut cmd = Self::base(cfg, job);
        cmd.push_flag_value("-t", node);
        cmd.args.push("-c".to_string());
        if wait_for_greeting {
            cmd.args.push("-w".to_string());
        }
        if let Some(forward) = forward {
            cmd.push_flag_value("-p", &forward.to_string());
        }
        cmd.push_ssh(cfg);
        cmd
    }

    /// Remote batch-script forward: carry the inherited value from the
    /// allocation node onward and announce the rewritten value.
    pub fn batch_forward(
        user: &str,
        alloc_node: &str,
        inherited: &str,
        localhost: &str,
        job: JobRef,
        cfg: &PluginConfig,
    ) -> Self {
        let mut cmd = Self::base(cfg, job);
        cmd.push_flag_value("-u", user);
        cmd.push_flag_value("-f", alloc_node);
        cmd.push_flag_value("-d", inherited);
        cmd.push_flag_value("-t", localhost);
        cmd.args.push("-c".to_string());
        cmd.args.push("-w".to_string());
        cmd.push_ssh(cfg);
        cmd
    }

    /// One-shot: print the value negotiated for this step, then exit.
    pub fn greet(job: JobRef, cfg: &PluginConfig) -> Self {
        let mut cmd = Self::base(cfg, job);
        cmd.args.push("-g".to_string());
        cmd
    }

    /// Signal the tunnel registered for this step to terminate.
    pub fn remove(job: JobRef, cfg: &PluginConfig) -> Self {
        let mut cmd = Self::base(cfg, job);
        cmd.args.push("-r".to_string());
        cmd
    }

    fn base(cfg: &PluginConfig, job: JobRef) -> Self {
        let mut cmd = Self {
            program: cfg.helper_prog.clone(),
            args: Vec::new(),
        };
        cmd.push_flag_value("-i", &job.to_string());
        cmd
    }

    fn push_flag_value(&mut self, flag: &str, value: &str) {
        self.args.push(flag.to_string());
        self.args.push(value.to_string());
    }

    /// Effective ssh command/arguments plus trailing helper-task arguments.
    /// Multi-word configured values become separate argv elements.
    fn push_ssh(&mut self, cfg: &PluginConfig) {
        self.push_flag_value("-s", &cfg.ssh_cmd);
        self.push_flag_value("-o", &cfg.ssh_args);
        self.args
            .extend(cfg.helpertask_args.split_whitespace().map(str::to_string));
    }
}

impl std::fmt::Display for HelperCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg:?}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::ForwardRequest;

    fn cfg() -> PluginConfig {
        PluginConfig::from_plugstack_args(&["ssh_args=-oBatchMode=yes|-p|2022"])
    }

    #[test]
    fn connect_carries_node_job_and_mode_flags() {
        let cmd = HelperCommand::connect(
            "n12",
            JobRef::new(103, 0),
            Some(ForwardRequest {
                submit_port: 10000,
                exec_port: 2222,
            }),
            &cfg(),
            true,
        );
        assert_eq!(cmd.program(), "/usr/libexec/stunnel-helper");
        let args = cmd.args();
        assert_eq!(&args[..7], &["-i", "103.0", "-t", "n12", "-c", "-w", "-p"]);
        assert_eq!(args[7], "10000:2222");
        assert!(args.contains(&"-s".to_string()));
    }

    #[test]
    fn generic_connect_has_no_port_pair() {
        let cmd = HelperCommand::connect("n1", JobRef::new(7, 1), None, &cfg(), false);
        assert!(!cmd.args().contains(&"-p".to_string()));
        assert!(!cmd.args().contains(&"-w".to_string()));
    }

    #[test]
    fn hostile_node_name_stays_one_argv_element() {
        let node = "n1; rm -rf /";
        let cmd = HelperCommand::connect(node, JobRef::new(1, 0), None, &cfg(), false);
        assert!(cmd.args().iter().any(|a| a == node));
    }

    #[test]
    fn multiword_ssh_args_split_into_discrete_elements() {
        let cmd = HelperCommand::connect("n1", JobRef::new(1, 0), None, &cfg(), false);
        let args = cmd.args();
        let o = args.iter().position(|a| a == "-o").unwrap();
        // The configured value is one argv element after -o; the helper
        // splits it when composing its own ssh invocation.
        assert_eq!(args[o + 1], "-oBatchMode=yes -p 2022");
    }

    #[test]
    fn helpertask_args_trail_as_separate_elements() {
        let cfg = PluginConfig::from_plugstack_args(&["helpertask_args=--nice|-v"]);
        let cmd = HelperCommand::connect("n1", JobRef::new(1, 0), None, &cfg, false);
        let args = cmd.args();
        assert_eq!(&args[args.len() - 2..], &["--nice", "-v"]);
    }

    #[test]
    fn remove_never_combines_with_setup_flags() {
        let cmd = HelperCommand::remove(JobRef::new(9, 3), &cfg());
        assert_eq!(cmd.args(), &["-i", "9.3", "-r"]);
    }

    #[test]
    fn greet_is_a_bare_one_shot() {
        let cmd = HelperCommand::greet(JobRef::new(9, 3), &cfg());
        assert_eq!(cmd.args(), &["-i", "9.3", "-g"]);
    }

    #[test]
    fn batch_forward_carries_identity_and_endpoints() {
        let cmd = HelperCommand::batch_forward(
            "alice",
            "login1",
            "10022",
            "node7",
            JobRef::new(42, crate::slurm::BATCH_STEP_ID),
            &cfg(),
        );
        let args = cmd.args();
        let id = format!("42.{}", crate::slurm::BATCH_STEP_ID);
        assert_eq!(&args[..2], &["-i", id.as_str()]);
        for pair in [
            ["-u", "alice"],
            ["-f", "login1"],
            ["-d", "10022"],
            ["-t", "node7"],
        ] {
            let at = args.iter().position(|a| a == pair[0]).unwrap();
            assert_eq!(args[at + 1], pair[1]);
        }
        assert!(args.contains(&"-c".to_string()));
        assert!(args.contains(&"-w".to_string()));
        assert!(!args.contains(&"-r".to_string()));
    }
}
