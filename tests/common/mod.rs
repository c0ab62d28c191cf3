//! Shared test support: an in-memory fake of the remote side.
//!
//! `FakeRunner` speaks the same file-based protocol the generated launch
//! scripts do (a pid file, an append-only log of state markers, a
//! process table) without any real processes or ssh. Tests drive
//! completions, crashes and probe failures explicitly.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sshq::config::{ExecConfig, SchedulerConfig};
use sshq::error::{Result, SshqError};
use sshq::remote::{Prober, RemoteRunner, RunOutput, Target};
use sshq::scheduler::{Job, JobSpec, Queue};

/// One recorded nohup launch.
#[derive(Debug, Clone)]
pub struct Launch {
    pub name: String,
    pub dir: String,
    pub pid: Option<String>,
}

pub struct FakeRunner {
    /// Remote filesystem: absolute-ish path -> content.
    fs: Mutex<HashMap<String, String>>,
    /// Process table: pid -> still running.
    procs: Mutex<HashMap<String, bool>>,
    /// Probe outcomes per host name; unlisted hosts probe fine.
    probes: Mutex<HashMap<String, bool>>,
    /// Job names whose launch silently produces no pid.
    fail_launch: Mutex<HashSet<String>>,
    /// Every nohup launch issued, in order.
    launches: Mutex<Vec<Launch>>,
    /// When set, launched jobs complete immediately.
    auto_complete: AtomicBool,
    next_pid: AtomicU32,
}

impl FakeRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fs: Mutex::new(HashMap::new()),
            procs: Mutex::new(HashMap::new()),
            probes: Mutex::new(HashMap::new()),
            fail_launch: Mutex::new(HashSet::new()),
            launches: Mutex::new(Vec::new()),
            auto_complete: AtomicBool::new(false),
            next_pid: AtomicU32::new(1000),
        })
    }

    /// A runner whose jobs finish the moment they are launched.
    pub fn auto_completing() -> Arc<Self> {
        let runner = Self::new();
        runner.auto_complete.store(true, Ordering::SeqCst);
        runner
    }

    pub fn set_probe(&self, host: &str, ok: bool) {
        self.probes.lock().unwrap().insert(host.to_string(), ok);
    }

    pub fn fail_launch_of(&self, job_name: &str) {
        self.fail_launch.lock().unwrap().insert(job_name.to_string());
    }

    /// Names launched so far, in launch order.
    pub fn launches(&self) -> Vec<String> {
        self.launches
            .lock()
            .unwrap()
            .iter()
            .map(|launch| launch.name.clone())
            .collect()
    }

    /// Launch records, including the pids that were handed out.
    pub fn launch_records(&self) -> Vec<Launch> {
        self.launches.lock().unwrap().clone()
    }

    pub fn launch_count(&self, job_name: &str) -> usize {
        self.launches
            .lock()
            .unwrap()
            .iter()
            .filter(|launch| launch.name == job_name)
            .count()
    }

    /// Let a launched job end normally, addressed by its launch record.
    pub fn finish_launch(&self, launch: &Launch) {
        self.fs
            .lock()
            .unwrap()
            .entry(format!("{}/{}.log", launch.dir, launch.name))
            .or_default()
            .push_str("# cloudmesh state: end\n");
        if let Some(pid) = &launch.pid {
            self.procs.lock().unwrap().insert(pid.clone(), false);
        }
    }

    /// Let a running job end normally: end marker plus process exit.
    pub fn finish_job(&self, job: &Job) {
        self.append_marker(job, "end");
        if let Some(pid) = &job.pid {
            self.procs.lock().unwrap().insert(pid.clone(), false);
        }
    }

    /// Kill the backing process out-of-band: no marker, process gone.
    pub fn kill_process(&self, job: &Job) {
        if let Some(pid) = &job.pid {
            self.procs.lock().unwrap().insert(pid.clone(), false);
        }
    }

    pub fn log_of(&self, job: &Job) -> String {
        let path = format!("{}/{}", job.job_dir(), job.log);
        self.fs.lock().unwrap().get(&path).cloned().unwrap_or_default()
    }

    pub fn write_file(&self, path: &str, content: &str) {
        self.fs
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_string());
    }

    fn append_marker(&self, job: &Job, token: &str) {
        let path = format!("{}/{}", job.job_dir(), job.log);
        let mut fs = self.fs.lock().unwrap();
        fs.entry(path)
            .or_default()
            .push_str(&format!("# cloudmesh state: {token}\n"));
    }

    fn handle_launch(&self, command: &str) -> RunOutput {
        // "cd <dir>; nohup <shell> <name>.<shell> >> <name>-nohup.log 2>&1 &"
        let dir = command
            .strip_prefix("cd ")
            .and_then(|rest| rest.split_once(';'))
            .map(|(dir, _)| dir.trim().to_string())
            .unwrap_or_default();
        let script = command
            .split_whitespace()
            .skip_while(|token| *token != "nohup")
            .nth(2)
            .unwrap_or_default();
        let name = script.split('.').next().unwrap_or_default().to_string();

        if self.fail_launch.lock().unwrap().contains(&name) {
            self.launches.lock().unwrap().push(Launch {
                name,
                dir,
                pid: None,
            });
            return ok_output("");
        }

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst).to_string();
        self.launches.lock().unwrap().push(Launch {
            name: name.clone(),
            dir: dir.clone(),
            pid: Some(pid.clone()),
        });
        let mut fs = self.fs.lock().unwrap();
        fs.insert(format!("{dir}/{name}.pid"), format!("{pid}\n"));
        fs.insert(
            format!("{dir}/{name}.log"),
            "# cloudmesh state: start\n".to_string(),
        );
        let mut procs = self.procs.lock().unwrap();
        if self.auto_complete.load(Ordering::SeqCst) {
            fs.get_mut(&format!("{dir}/{name}.log"))
                .unwrap()
                .push_str("# cloudmesh state: end\n");
            procs.insert(pid, false);
        } else {
            procs.insert(pid, true);
        }
        ok_output("")
    }

    fn handle_ps(&self, command: &str) -> RunOutput {
        let pid = command.split_whitespace().last().unwrap_or_default();
        let running = self
            .procs
            .lock()
            .unwrap()
            .get(pid)
            .copied()
            .unwrap_or(false);
        if running {
            ok_output(&format!("{pid}\n"))
        } else {
            RunOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: Some(1),
            }
        }
    }

    fn handle_kill(&self, command: &str) {
        let named: HashSet<String> = command
            .split(|c: char| !c.is_ascii_digit())
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .collect();
        let mut procs = self.procs.lock().unwrap();
        let pids: Vec<String> = procs.keys().cloned().collect();
        for pid in pids {
            if named.contains(&pid) {
                procs.insert(pid, false);
            }
        }
    }

    fn handle_marker(&self, command: &str) {
        // "cd <dir>; ... echo "# cloudmesh state: <token>" >> <file>; ..."
        let dir = command
            .strip_prefix("cd ")
            .and_then(|rest| rest.split_once(';'))
            .map(|(dir, _)| dir.trim().to_string())
            .unwrap_or_default();
        let Some((_, after)) = command.split_once("# cloudmesh state:") else {
            return;
        };
        let Some((token, after_quote)) = after.split_once('"') else {
            return;
        };
        let Some((_, after_redirect)) = after_quote.split_once(">>") else {
            return;
        };
        let file = after_redirect
            .trim()
            .trim_end_matches(';')
            .split_whitespace()
            .next()
            .unwrap_or_default();
        let path = if dir.is_empty() {
            file.to_string()
        } else {
            format!("{dir}/{file}")
        };
        self.fs
            .lock()
            .unwrap()
            .entry(path)
            .or_default()
            .push_str(&format!("# cloudmesh state: {}\n", token.trim()));
    }

    fn handle_rm(&self, command: &str) {
        let path = command
            .strip_prefix("rm -rf ")
            .unwrap_or_default()
            .trim()
            .to_string();
        if path.is_empty() {
            return;
        }
        self.fs
            .lock()
            .unwrap()
            .retain(|key, _| !key.starts_with(&path));
    }
}

fn ok_output(stdout: &str) -> RunOutput {
    RunOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code: Some(0),
    }
}

impl RemoteRunner for FakeRunner {
    async fn run(&self, _target: &Target, command: &str) -> Result<RunOutput> {
        if command.contains("nohup") {
            return Ok(self.handle_launch(command));
        }
        if command.starts_with("ps -o pid=") {
            return Ok(self.handle_ps(command));
        }
        if command.contains("kill -9") {
            self.handle_kill(command);
        }
        if command.contains("# cloudmesh state:") {
            self.handle_marker(command);
            return Ok(ok_output(""));
        }
        if command.starts_with("rm -rf") {
            self.handle_rm(command);
            return Ok(ok_output(""));
        }
        Ok(ok_output(""))
    }

    async fn read_file(&self, _target: &Target, path: &str) -> Result<String> {
        self.fs
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| SshqError::Remote(format!("cat {path}: No such file or directory")))
    }

    async fn sync(&self, _target: &Target, _experiment: &str) -> Result<()> {
        Ok(())
    }
}

impl Prober for FakeRunner {
    async fn probe(&self, _user: &str, host: &str) -> bool {
        self.probes.lock().unwrap().get(host).copied().unwrap_or(true)
    }

    async fn ping(&self, ip: &str) -> bool {
        self.probes.lock().unwrap().get(ip).copied().unwrap_or(true)
    }
}

/// Timing tuned for tests: everything in milliseconds.
pub fn fast_exec() -> ExecConfig {
    ExecConfig {
        pid_retries: 2,
        pid_retry_delay: Duration::from_millis(5),
        settle_delay: Duration::from_millis(5),
        poll_interval: Duration::from_millis(10),
        assign_retry: Duration::from_millis(20),
    }
}

pub fn fast_config(max_parallel: usize) -> SchedulerConfig {
    SchedulerConfig {
        max_parallel,
        timeout_min: 10,
        exec: fast_exec(),
    }
}

/// A queue in a temp directory.
pub fn open_queue(dir: &tempfile::TempDir) -> Queue {
    Queue::open("a", Some(dir.path().to_str().unwrap())).unwrap()
}

/// A job bound to localhost, materialized under the temp experiment dir.
pub fn local_job(dir: &tempfile::TempDir, name: &str, command: &str) -> Job {
    let experiment = dir.path().to_str().unwrap();
    Job::from_spec(
        JobSpec::new(name, command)
            .on_host("me", "localhost")
            .in_experiment(experiment),
    )
    .unwrap()
}

/// An unbound job for the multi-host scheduler.
pub fn unbound_job(dir: &tempfile::TempDir, name: &str, command: &str) -> Job {
    let experiment = dir.path().to_str().unwrap();
    Job::from_spec(JobSpec::new(name, command).in_experiment(experiment)).unwrap()
}

/// A job bound to a remote host.
pub fn remote_job(dir: &tempfile::TempDir, name: &str, user: &str, host: &str) -> Job {
    let experiment = dir.path().to_str().unwrap();
    Job::from_spec(
        JobSpec::new(name, "/usr/bin/sleep infinity")
            .on_host(user, host)
            .in_experiment(experiment),
    )
    .unwrap()
}
