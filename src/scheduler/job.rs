use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ExecConfig;
use crate::error::{Result, SshqError};
use crate::remote::{Prober, RemoteRunner, Target};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// No host/user assigned yet.
    Undefined,
    /// Bound to a host and ready to launch.
    Ready,
    /// The remote log shows the script began.
    Start,
    /// Launched; the pid file has been read back.
    Run,
    /// Normal completion observed in the log.
    End,
    /// Explicitly terminated.
    Kill,
    /// The host or process went away while the job was believed running.
    Crash,
    /// The launch produced no pid.
    FailStart,
    /// Declined by a scheduler or an operator.
    #[serde(alias = "skipped")]
    Skip,
}

impl JobStatus {
    /// Terminal states only leave via an explicit `reset()`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::End | JobStatus::Kill | JobStatus::Crash | JobStatus::FailStart
        )
    }

    pub fn is_running(self) -> bool {
        matches!(self, JobStatus::Start | JobStatus::Run)
    }

    /// Parse a `# cloudmesh state: <token>` marker token. Unknown tokens
    /// yield `None` and leave the last known status in place.
    pub fn from_marker(token: &str) -> Option<Self> {
        match token {
            "undefined" => Some(JobStatus::Undefined),
            "ready" => Some(JobStatus::Ready),
            "start" => Some(JobStatus::Start),
            "run" => Some(JobStatus::Run),
            "end" => Some(JobStatus::End),
            "kill" => Some(JobStatus::Kill),
            "crash" => Some(JobStatus::Crash),
            "fail_start" => Some(JobStatus::FailStart),
            "skip" | "skipped" => Some(JobStatus::Skip),
            _ => None,
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_marker(s).ok_or_else(|| format!("unknown job status: {s}"))
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let token = match self {
            JobStatus::Undefined => "undefined",
            JobStatus::Ready => "ready",
            JobStatus::Start => "start",
            JobStatus::Run => "run",
            JobStatus::End => "end",
            JobStatus::Kill => "kill",
            JobStatus::Crash => "crash",
            JobStatus::FailStart => "fail_start",
            JobStatus::Skip => "skip",
        };
        write!(f, "{token}")
    }
}

/// User-facing description of a job. Everything except `name` is
/// optional; [`Job::from_spec`] fills the defaults.
#[derive(Debug, Clone, Default)]
pub struct JobSpec {
    pub name: String,
    pub command: Option<String>,
    pub executable: Option<String>,
    pub arguments: Option<String>,
    pub experiment: Option<String>,
    pub directory: Option<String>,
    pub input: Option<String>,
    pub output: Option<String>,
    pub log: Option<String>,
    pub shell: Option<String>,
    pub gpu: Option<String>,
    pub pyenv: Option<String>,
    pub host: Option<String>,
    pub user: Option<String>,
    pub status: Option<JobStatus>,
}

impl JobSpec {
    pub fn new(name: &str, command: &str) -> Self {
        Self {
            name: name.to_string(),
            command: Some(command.to_string()),
            ..Default::default()
        }
    }

    pub fn on_host(mut self, user: &str, host: &str) -> Self {
        self.user = Some(user.to_string());
        self.host = Some(host.to_string());
        self
    }

    pub fn in_directory(mut self, directory: &str) -> Self {
        self.directory = Some(directory.to_string());
        self
    }

    pub fn in_experiment(mut self, experiment: &str) -> Self {
        self.experiment = Some(experiment.to_string());
        self
    }
}

/// Output of a `ps` lookup for a job's pid.
#[derive(Debug, Clone)]
pub struct PsEntry {
    pub pid: String,
    pub user: String,
    pub ppid: String,
    pub sz: String,
    pub tty: String,
    pub cpu: String,
    pub mem: String,
    pub cmd: String,
}

/// One schedulable unit of work: a command, a working directory and,
/// eventually, a host to run on.
///
/// A job executes asynchronously on its host: [`Job::run`] launches a
/// generated shell script under `nohup`, detached from the ssh session,
/// and all progress tracking happens by re-reading the remote log file
/// (`state`) and the remote process table (`check_running`). The job
/// record itself is plain data and persists in a [`Queue`](crate::Queue).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Job {
    pub name: String,
    pub id: Uuid,
    pub experiment: String,
    pub directory: String,
    pub input: String,
    pub output: String,
    pub log: String,
    pub status: JobStatus,
    pub gpu: String,
    pub arguments: String,
    pub executable: String,
    pub command: Option<String>,
    pub shell: String,
    pub shell_path: String,
    pub scriptname: String,
    pub remote_command: String,
    pub pid: Option<String>,
    pub host: Option<String>,
    pub user: Option<String>,
    pub pyenv: String,
    pub last_probe_check: Option<DateTime<Utc>>,
}

impl Default for Job {
    fn default() -> Self {
        Self {
            name: String::new(),
            id: Uuid::new_v4(),
            experiment: "experiment".to_string(),
            directory: "./experiment".to_string(),
            input: String::new(),
            output: String::new(),
            log: String::new(),
            status: JobStatus::Undefined,
            gpu: String::new(),
            arguments: String::new(),
            executable: String::new(),
            command: None,
            shell: "bash".to_string(),
            shell_path: String::new(),
            scriptname: String::new(),
            remote_command: String::new(),
            pid: None,
            host: None,
            user: None,
            pyenv: String::new(),
            last_probe_check: None,
        }
    }
}

impl Job {
    /// Build a job from a spec, filling defaults and deriving the launch
    /// script path and remote command. The script itself is written to
    /// disk by [`Job::materialize`].
    pub fn from_spec(spec: JobSpec) -> Result<Self> {
        if spec.name.trim().is_empty() {
            return Err(SshqError::InvalidJob("job name must not be empty".into()));
        }
        if spec.host.is_some() && spec.user.is_none() {
            return Err(SshqError::InvalidJob(format!(
                "job {}: a host requires a user for ssh",
                spec.name
            )));
        }

        let mut job = Job {
            name: spec.name,
            ..Job::default()
        };
        if let Some(experiment) = spec.experiment {
            job.directory = if experiment.starts_with('/') || experiment.starts_with("./") {
                experiment.clone()
            } else {
                format!("./{experiment}")
            };
            job.experiment = experiment;
        }
        if let Some(directory) = spec.directory {
            job.directory = directory;
        }
        if let Some(shell) = spec.shell {
            job.shell = shell;
        }
        job.shell_path = format!("/usr/bin/{}", job.shell);
        job.input = spec.input.unwrap_or(format!("{}/input", job.name));
        job.output = spec.output.unwrap_or(format!("{}.out", job.name));
        job.log = spec.log.unwrap_or(format!("{}.log", job.name));
        job.gpu = spec.gpu.unwrap_or_default();
        job.pyenv = spec.pyenv.unwrap_or_default();
        job.host = spec.host;
        job.user = spec.user;

        match (spec.command, spec.executable) {
            (Some(command), _) => job.set_command(&command),
            (None, Some(executable)) => {
                let arguments = spec.arguments.unwrap_or_default();
                let command = if arguments.is_empty() {
                    executable.clone()
                } else {
                    format!("{executable} {arguments}")
                };
                job.executable = executable;
                job.arguments = arguments;
                job.command = Some(command);
            }
            (None, None) => {
                return Err(SshqError::InvalidJob(format!(
                    "job {}: no command or executable given",
                    job.name
                )));
            }
        }

        job.status = spec.status.unwrap_or(JobStatus::Undefined);
        if job.status == JobStatus::Undefined && job.host.is_some() && job.user.is_some() {
            job.status = JobStatus::Ready;
        }

        job.scriptname = format!(
            "{}/{}/{}.{}",
            job.experiment, job.name, job.name, job.shell
        );
        job.generate_remote_command();
        Ok(job)
    }

    /// Split a command line into executable and arguments.
    pub fn set_command(&mut self, command: &str) {
        let command = command.trim().to_string();
        let mut parts = command.split_whitespace();
        self.executable = parts.next().unwrap_or_default().to_string();
        self.arguments = parts.collect::<Vec<_>>().join(" ");
        self.command = Some(command);
    }

    pub fn target(&self) -> Target {
        Target::new(self.user.as_deref(), self.host.as_deref())
    }

    pub fn is_local(&self) -> bool {
        self.target().is_local()
    }

    /// The job's working directory on its host.
    pub fn job_dir(&self) -> String {
        format!("{}/{}", self.directory, self.name)
    }

    /// Path of a file inside the job's working directory.
    pub fn artifact(&self, file: &str) -> String {
        format!("{}/{}", self.job_dir(), file)
    }

    fn nohup_command(&self) -> String {
        format!(
            "nohup {shell} {name}.{shell} >> {name}-nohup.log 2>&1 &",
            shell = self.shell,
            name = self.name
        )
    }

    /// The command `run()` hands to the runner; `cd` into the job dir and
    /// detach the script so it survives the ssh session.
    pub fn launch_command(&self) -> String {
        format!("cd {}; {}", self.job_dir(), self.nohup_command())
    }

    /// Recompute `remote_command` from the current host binding. Must be
    /// called after the multi-host scheduler assigns a host.
    pub fn generate_remote_command(&mut self) {
        self.remote_command = match self.target() {
            Target::Local => self.launch_command(),
            Target::Remote { user, host } => {
                format!("ssh {user}@{host} \"{}\"", self.launch_command())
            }
        };
    }

    fn marker_line(&self, state: &str, append: bool) -> String {
        let redirect = if append { ">>" } else { ">" };
        format!(
            "echo \"# cloudmesh state: {state}\" {redirect} {}",
            self.log
        )
    }

    /// The generated launch script. State transitions are appended to the
    /// log as `# cloudmesh state: <token>` markers; the pid lands in
    /// `<name>.pid` so `run()` can read it back.
    pub fn script_body(&self) -> String {
        let date_line = format!(
            "echo -ne \"# date: \" >> {log}; date >> {log}",
            log = self.log
        );
        let mut lines = vec![
            format!("#! {} -x", self.shell_path),
            format!("echo $$ > {}.pid", self.name),
            format!("rm -f {}", self.output),
            format!("rm -f {}", self.log),
            self.marker_line("start", false),
            date_line.clone(),
        ];
        if !self.pyenv.is_empty() {
            lines.push(format!("source {}", self.pyenv));
        }
        if !self.gpu.is_empty() {
            lines.push(format!("export CUDA_VISIBLE_DEVICES={}", self.gpu));
        }
        let command = self.command.as_deref().unwrap_or(&self.executable);
        lines.push(format!("{} >> {}", command, self.output));
        lines.push(date_line);
        lines.push(self.marker_line("end", true));
        lines.push("#".to_string());
        lines.join("\n")
    }

    /// Write the launch script under the experiment tree. For a remote
    /// host the tree must be synchronized over before `run()`.
    pub fn materialize(&self) -> Result<()> {
        let dir = format!("{}/{}", self.experiment, self.name);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(&self.scriptname, self.script_body())?;
        Ok(())
    }

    /// Launch the job and block only long enough to read back the pid the
    /// script wrote. On success the status becomes `run`; if no pid ever
    /// appears the launch is classified `fail_start` and the job is left
    /// for an explicit `reset()`.
    pub async fn run<R: RemoteRunner>(
        &mut self,
        runner: &R,
        exec: &ExecConfig,
    ) -> Result<JobStatus> {
        tracing::info!(job = %self.name, target = %self.target(), command = %self.remote_command, "launching");
        match runner.run(&self.target(), &self.launch_command()).await {
            Ok(output) if !output.success() => {
                tracing::warn!(job = %self.name, stderr = %output.stderr.trim(), "launch command exited nonzero");
            }
            Err(error) => {
                tracing::warn!(job = %self.name, %error, "launch command could not be executed");
            }
            Ok(_) => {}
        }
        match self.read_pid(runner, exec).await {
            Some(pid) => {
                self.pid = Some(pid);
                self.status = JobStatus::Run;
            }
            None => {
                self.pid = None;
                self.status = JobStatus::FailStart;
                tracing::warn!(job = %self.name, "no pid observed, marking fail_start");
            }
        }
        Ok(self.status)
    }

    /// Poll the pid file the script writes as its first action.
    async fn read_pid<R: RemoteRunner>(&self, runner: &R, exec: &ExecConfig) -> Option<String> {
        let path = self.artifact(&format!("{}.pid", self.name));
        for attempt in 0..=exec.pid_retries {
            if attempt > 0 {
                tokio::time::sleep(exec.pid_retry_delay).await;
            }
            if let Ok(content) = runner.read_file(&self.target(), &path).await {
                let pid = content.lines().next().unwrap_or("").trim();
                if !pid.is_empty() && pid.chars().all(|c| c.is_ascii_digit()) {
                    return Some(pid.to_string());
                }
            }
        }
        None
    }

    /// Refresh the status from the remote log: the last
    /// `# cloudmesh state:` marker wins. An unreadable or missing log
    /// leaves the last known status untouched, and a terminal status is
    /// never downgraded by a stale marker.
    pub async fn state<R: RemoteRunner>(&mut self, runner: &R) -> JobStatus {
        let path = self.artifact(&self.log);
        if let Ok(content) = runner.read_file(&self.target(), &path).await {
            if let Some(status) = Self::last_marker(&content) {
                if !(self.status.is_terminal() && !status.is_terminal()) {
                    self.status = status;
                }
            }
        }
        self.status
    }

    fn last_marker(content: &str) -> Option<JobStatus> {
        content
            .lines()
            .filter_map(|line| {
                let (_, token) = line.split_once("# cloudmesh state:")?;
                JobStatus::from_marker(token.trim())
            })
            .next_back()
    }

    /// Live process-table lookup by pid. False when the job never ran.
    pub async fn check_running<R: RemoteRunner>(&self, runner: &R) -> bool {
        let Some(pid) = &self.pid else {
            return false;
        };
        match runner
            .run(&self.target(), &format!("ps -o pid= -p {pid}"))
            .await
        {
            Ok(output) => output.success() && !output.stdout.trim().is_empty(),
            Err(_) => false,
        }
    }

    /// Full `ps` record for the job's pid, if the process is alive.
    pub async fn ps<R: RemoteRunner>(&self, runner: &R) -> Option<PsEntry> {
        let pid = self.pid.as_ref()?;
        let command = format!("ps --format pid,user,ppid,sz,tty,%cpu,%mem,cmd {pid}");
        let output = runner.run(&self.target(), &command).await.ok()?;
        if !output.success() {
            return None;
        }
        let line = output.stdout.lines().nth(1)?;
        let mut fields = line.split_whitespace();
        Some(PsEntry {
            pid: fields.next()?.to_string(),
            user: fields.next()?.to_string(),
            ppid: fields.next()?.to_string(),
            sz: fields.next()?.to_string(),
            tty: fields.next()?.to_string(),
            cpu: fields.next()?.to_string(),
            mem: fields.next()?.to_string(),
            cmd: fields.collect::<Vec<_>>().join(" "),
        })
    }

    /// Terminate the job if it is actually running: children first, then
    /// the pid itself (locally) or the whole process group (remotely),
    /// and record a `kill` marker in the log. A job with no live process
    /// is left untouched.
    pub async fn kill<R: RemoteRunner>(&mut self, runner: &R) -> Result<bool> {
        if !self.check_running(runner).await {
            tracing::debug!(job = %self.name, "kill skipped, no running process");
            return Ok(false);
        }
        // check_running() is false without a pid, so it is present here.
        let pid = self
            .pid
            .clone()
            .ok_or_else(|| SshqError::Internal(format!("job {} has no pid", self.name)))?;
        let marker = self.marker_line("kill", true);
        let command = if self.is_local() {
            format!(
                "cd {dir}; kill -9 $(ps -o pid= --ppid {pid}); kill -9 {pid}; {marker};",
                dir = self.job_dir()
            )
        } else {
            format!(
                "cd {dir}; kill -9 \"-$(ps -o pgid= {pid} | xargs)\"; {marker};",
                dir = self.job_dir()
            )
        };
        let output = runner.run(&self.target(), &command).await?;
        if !output.success() {
            tracing::warn!(job = %self.name, stderr = %output.stderr.trim(), "kill command exited nonzero");
        }
        self.status = JobStatus::Kill;
        tracing::info!(job = %self.name, "killed");
        Ok(true)
    }

    /// Decide whether a job believed running has crashed.
    ///
    /// Two classifications: the host of a remote job stops answering its
    /// periodic probe (at most one probe per `timeout_min` minutes), or
    /// the process disappears from the process table while the log still
    /// says `start`/`run`; in that case a `crash` marker is appended so
    /// the log agrees with the record.
    ///
    /// Returns `Some(true)` exactly once per crash, `Some(false)` while
    /// the job is genuinely running, and `None` when the job is not in a
    /// running state at all.
    pub async fn check_crashed<R: RemoteRunner + Prober>(
        &mut self,
        runner: &R,
        timeout_min: u64,
        exec: &ExecConfig,
    ) -> Option<bool> {
        if !self.status.is_running() {
            return None;
        }

        if !self.is_local() {
            let probe_due = match self.last_probe_check {
                None => true,
                Some(t) => Utc::now() - t >= chrono::Duration::minutes(timeout_min as i64),
            };
            if probe_due {
                let (user, host) = (self.user.clone()?, self.host.clone()?);
                self.last_probe_check = Some(Utc::now());
                if !runner.probe(&user, &host).await {
                    tracing::warn!(job = %self.name, host = %host, "host unreachable, marking crash");
                    self.status = JobStatus::Crash;
                    return Some(true);
                }
            }
        }

        if self.check_running(runner).await {
            return Some(false);
        }
        // The process may have just exited normally; give the end marker
        // time to land before concluding anything.
        tokio::time::sleep(exec.settle_delay).await;
        let state = self.state(runner).await;
        if state.is_running() {
            let command = format!(
                "cd {}; {}",
                self.job_dir(),
                self.marker_line("crash", true)
            );
            let _ = runner.run(&self.target(), &command).await;
            self.status = JobStatus::Crash;
            tracing::warn!(job = %self.name, "process gone while log still running, marking crash");
            return Some(true);
        }
        Some(false)
    }

    /// Delete the job's working directory on its host. Replacing a job
    /// without this step would leave stale pid/log files that corrupt
    /// state inference on the next run.
    pub async fn remove_dir<R: RemoteRunner>(&self, runner: &R) -> Result<()> {
        let command = format!("rm -rf {}", self.job_dir());
        let output = runner.run(&self.target(), &command).await?;
        if !output.success() {
            return Err(SshqError::Remote(format!(
                "could not remove {}: {}",
                self.job_dir(),
                output.stderr.trim()
            )));
        }
        Ok(())
    }

    /// Return the job to an executable state: kill it if running, wipe
    /// its remote artifacts and rewrite the launch script. Idempotent.
    pub async fn reset<R: RemoteRunner>(&mut self, runner: &R) -> Result<JobStatus> {
        if self.check_running(runner).await {
            self.kill(runner).await?;
        }
        self.remove_dir(runner).await?;
        self.pid = None;
        self.last_probe_check = None;
        self.status = if self.host.is_some() && self.user.is_some() {
            JobStatus::Ready
        } else {
            JobStatus::Undefined
        };
        self.materialize()?;
        tracing::info!(job = %self.name, status = %self.status, "reset");
        Ok(self.status)
    }

    /// Current contents of the job's log, empty if not yet available.
    pub async fn get_log<R: RemoteRunner>(&self, runner: &R) -> String {
        runner
            .read_file(&self.target(), &self.artifact(&self.log))
            .await
            .unwrap_or_default()
    }

    /// Captured stdout of the job's command, empty if not yet available.
    pub async fn get_output<R: RemoteRunner>(&self, runner: &R) -> String {
        runner
            .read_file(&self.target(), &self.artifact(&self.output))
            .await
            .unwrap_or_default()
    }

    /// Stdout/stderr of the nohup wrapper, empty if not yet available.
    pub async fn get_nohup_log<R: RemoteRunner>(&self, runner: &R) -> String {
        let file = format!("{}-nohup.log", self.name);
        runner
            .read_file(&self.target(), &self.artifact(&file))
            .await
            .unwrap_or_default()
    }
}
