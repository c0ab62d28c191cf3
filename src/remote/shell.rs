use std::process::Stdio;

use tokio::process::Command;

use crate::error::{Result, SshqError};
use crate::remote::{is_local_host, Prober, RemoteRunner, RunOutput, Target};

/// Production runner: local commands go through `sh -c`, remote commands
/// through `ssh user@host`, directory sync through `rsync`.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    /// Seconds ssh waits for a connection before giving up. Keeps a dead
    /// host from stalling the scheduler for the TCP default.
    pub connect_timeout_secs: u64,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
        }
    }
}

impl ShellRunner {
    pub fn new() -> Self {
        Self::default()
    }

    async fn output(mut command: Command) -> Result<RunOutput> {
        let output = command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        Ok(RunOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
        })
    }

    fn ssh_command(&self, user: &str, host: &str, remote_command: &str) -> Command {
        let mut command = Command::new("ssh");
        command
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout_secs))
            .arg("-o")
            .arg("BatchMode=yes")
            .arg(format!("{user}@{host}"))
            .arg(remote_command);
        command
    }
}

impl RemoteRunner for ShellRunner {
    async fn run(&self, target: &Target, command: &str) -> Result<RunOutput> {
        let command = match target {
            Target::Local => {
                let mut local = Command::new("sh");
                local.arg("-c").arg(command);
                local
            }
            Target::Remote { user, host } => self.ssh_command(user, host, command),
        };
        Self::output(command).await
    }

    async fn read_file(&self, target: &Target, path: &str) -> Result<String> {
        match target {
            Target::Local => Ok(tokio::fs::read_to_string(path).await?),
            Target::Remote { .. } => {
                let output = self.run(target, &format!("cat {path}")).await?;
                if output.success() {
                    Ok(output.stdout)
                } else {
                    Err(SshqError::Remote(format!(
                        "cat {path}: {}",
                        output.stderr.trim()
                    )))
                }
            }
        }
    }

    async fn sync(&self, target: &Target, experiment: &str) -> Result<()> {
        let Target::Remote { user, host } = target else {
            return Ok(());
        };
        let command = format!("rsync -r {experiment}/ {user}@{host}:{experiment}");
        let output = self.run(&Target::Local, &command).await?;
        if output.success() {
            Ok(())
        } else {
            Err(SshqError::Remote(format!(
                "rsync to {user}@{host} failed: {}",
                output.stderr.trim()
            )))
        }
    }
}

impl Prober for ShellRunner {
    async fn probe(&self, user: &str, host: &str) -> bool {
        if is_local_host(host) {
            return true;
        }
        let target = Target::Remote {
            user: user.to_string(),
            host: host.to_string(),
        };
        match self.run(&target, "hostname").await {
            // A reply from some other machine (a misconfigured alias, a
            // bastion answering for a dead box) counts as a failed probe.
            Ok(output) => output.success() && output.stdout.trim() == host,
            Err(error) => {
                tracing::debug!(host, %error, "probe failed to execute");
                false
            }
        }
    }

    async fn ping(&self, ip: &str) -> bool {
        let command = format!("ping -c 4 -W 2 {ip}");
        match self.run(&Target::Local, &command).await {
            Ok(output) => output.success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_local_captures_stdout() {
        let runner = ShellRunner::new();
        let output = runner.run(&Target::Local, "echo hello").await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "hello\n");
    }

    #[tokio::test]
    async fn run_local_reports_exit_code() {
        let runner = ShellRunner::new();
        let output = runner.run(&Target::Local, "exit 3").await.unwrap();
        assert!(!output.success());
        assert_eq!(output.exit_code, Some(3));
    }

    #[tokio::test]
    async fn read_missing_local_file_is_an_error() {
        let runner = ShellRunner::new();
        let result = runner
            .read_file(&Target::Local, "/nonexistent/sshq-test-file")
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn probe_of_local_host_always_succeeds() {
        let runner = ShellRunner::new();
        assert!(runner.probe("anyone", "localhost").await);
    }

    #[tokio::test]
    async fn sync_to_local_target_is_a_noop() {
        let runner = ShellRunner::new();
        runner.sync(&Target::Local, "./experiment").await.unwrap();
    }
}
