//! Remote execution capabilities.
//!
//! Jobs and schedulers never talk to `ssh` directly; they go through two
//! small capabilities so the scheduling logic can be exercised against
//! fakes:
//!
//! - [`RemoteRunner`]: run a shell command on a target, read a small file
//!   back, synchronize the experiment tree.
//! - [`Prober`]: host liveness checks (`hostname` over ssh, icmp ping).
//!
//! [`ShellRunner`] is the production implementation of both, shelling out
//! to `sh`, `ssh`, `rsync` and `ping`.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod shell;

pub use shell::ShellRunner;

/// Hostnames that resolve to the machine the scheduler runs on.
pub fn is_local_host(host: &str) -> bool {
    matches!(host, "" | "local" | "localhost" | "127.0.0.1")
}

/// Where a command runs: the local shell, or a `user@host` ssh target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    Local,
    Remote { user: String, host: String },
}

impl Target {
    /// Build a target from optional job fields. A missing host, a missing
    /// user or a loopback host name all mean "run locally".
    pub fn new(user: Option<&str>, host: Option<&str>) -> Self {
        match (user, host) {
            (Some(user), Some(host)) if !is_local_host(host) => Target::Remote {
                user: user.to_string(),
                host: host.to_string(),
            },
            _ => Target::Local,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Target::Local)
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Local => write!(f, "local"),
            Target::Remote { user, host } => write!(f, "{user}@{host}"),
        }
    }
}

/// Captured output of a finished command.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Shell command execution on a local or ssh target.
///
/// Futures are required to be `Send` so callers can drive jobs from
/// spawned watcher tasks.
pub trait RemoteRunner: Send + Sync {
    /// Run a shell command on the target and capture its output.
    ///
    /// An `Err` means the command could not be executed at all (spawn
    /// failure); a command that ran and exited nonzero is an `Ok` with a
    /// nonzero `exit_code`.
    fn run(
        &self,
        target: &Target,
        command: &str,
    ) -> impl Future<Output = Result<RunOutput>> + Send;

    /// Read a small file from the target.
    fn read_file(
        &self,
        target: &Target,
        path: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    /// One-way synchronization of the experiment tree to the target.
    /// A no-op for local targets.
    fn sync(
        &self,
        target: &Target,
        experiment: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Host liveness checks, independent of any particular job.
pub trait Prober: Send + Sync {
    /// Execute a trivial command on the host and verify the answer came
    /// from the machine we think we are talking to. Returns `false` on
    /// any failure; probing never errors.
    fn probe(&self, user: &str, host: &str) -> impl Future<Output = bool> + Send;

    /// ICMP reachability, independent of ssh.
    fn ping(&self, ip: &str) -> impl Future<Output = bool> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_names_are_local() {
        assert!(is_local_host("localhost"));
        assert!(is_local_host("127.0.0.1"));
        assert!(is_local_host("local"));
        assert!(is_local_host(""));
        assert!(!is_local_host("red01"));
    }

    #[test]
    fn target_requires_user_and_remote_host() {
        assert_eq!(Target::new(None, None), Target::Local);
        assert_eq!(Target::new(Some("pi"), Some("localhost")), Target::Local);
        assert_eq!(Target::new(None, Some("red01")), Target::Local);
        assert_eq!(
            Target::new(Some("pi"), Some("red01")),
            Target::Remote {
                user: "pi".to_string(),
                host: "red01".to_string()
            }
        );
    }

    #[test]
    fn target_display() {
        assert_eq!(Target::Local.to_string(), "local");
        assert_eq!(
            Target::new(Some("pi"), Some("red01")).to_string(),
            "pi@red01"
        );
    }
}
