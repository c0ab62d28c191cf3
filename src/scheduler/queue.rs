use std::path::PathBuf;

use crate::error::{Result, SshqError};
use crate::remote::RemoteRunner;
use crate::scheduler::job::{Job, JobStatus};
use crate::store::Store;

/// A persisted, named collection of jobs for one experiment.
///
/// The backing file is saved after every mutation, so a queue can be
/// driven across process restarts; only scheduler bookkeeping is
/// in-memory. Jobs are stored in insertion order, which is the order
/// the FIFO schedulers offer them in.
#[derive(Debug)]
pub struct Queue {
    pub name: String,
    pub experiment: String,
    jobs: Store<Job>,
}

impl Queue {
    /// Open (or create) the queue `<experiment>/<name>-queue.yaml`.
    pub fn open(name: &str, experiment: Option<&str>) -> Result<Self> {
        let experiment = experiment.unwrap_or("./experiment").to_string();
        let filename = PathBuf::from(&experiment).join(format!("{name}-queue.yaml"));
        Self::open_file(name, &experiment, filename)
    }

    /// Open a queue from an explicit file path.
    pub fn open_file(name: &str, experiment: &str, filename: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(experiment)?;
        let jobs: Store<Job> = Store::open(filename)?;
        for (key, job) in jobs.iter() {
            if job.name != *key {
                return Err(SshqError::InvalidJob(format!(
                    "record {key} names job {}",
                    job.name
                )));
            }
        }
        Ok(Self {
            name: name.to_string(),
            experiment: experiment.to_string(),
            jobs,
        })
    }

    pub fn filename(&self) -> &std::path::Path {
        self.jobs.path()
    }

    /// Add a job, writing its launch script as a side effect so the job
    /// is runnable (after a sync, for remote hosts).
    pub fn add(&mut self, job: Job) -> Result<()> {
        job.materialize()?;
        self.jobs.set(&job.name.clone(), job)
    }

    pub fn get(&self, name: &str) -> Result<Job> {
        self.jobs
            .get(name)
            .cloned()
            .ok_or_else(|| SshqError::JobNotFound(name.to_string()))
    }

    /// Overwrite a job record (inserting it if new) and persist.
    pub fn set(&mut self, job: &Job) -> Result<()> {
        self.jobs.set(&job.name, job.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.jobs.contains(name)
    }

    pub fn keys(&self) -> Vec<String> {
        self.jobs.keys()
    }

    pub fn all(&self) -> Vec<Job> {
        self.jobs.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Remove a job from the queue, killing it first if it is still
    /// running. The returned job carries its final status.
    pub async fn delete<R: RemoteRunner>(&mut self, name: &str, runner: &R) -> Result<Job> {
        let mut job = self.get(name)?;
        if job.state(runner).await.is_running() {
            job.kill(runner).await?;
        }
        self.jobs.delete(name)?;
        tracing::info!(job = %name, "deleted from queue");
        Ok(job)
    }

    /// Kill a running job, persisting the resulting status.
    pub async fn kill<R: RemoteRunner>(&mut self, name: &str, runner: &R) -> Result<Job> {
        let mut job = self.get(name)?;
        job.kill(runner).await?;
        self.set(&job)?;
        Ok(job)
    }

    /// Refresh every job's status from its remote log and persist.
    pub async fn refresh<R: RemoteRunner>(&mut self, runner: &R) -> Result<()> {
        for name in self.keys() {
            let mut job = self.get(&name)?;
            job.state(runner).await;
            self.set(&job)?;
        }
        Ok(())
    }

    /// Reset jobs back to an executable state: kill them if running and
    /// wipe their remote artifacts. `keys` limits the reset to named
    /// jobs, `status` to jobs currently in that status; both `None`
    /// resets the whole queue. Returns the names that were reset.
    pub async fn reset<R: RemoteRunner>(
        &mut self,
        keys: Option<&[String]>,
        status: Option<JobStatus>,
        runner: &R,
    ) -> Result<Vec<String>> {
        let selected: Vec<String> = match keys {
            Some(keys) => {
                for key in keys {
                    if !self.contains(key) {
                        return Err(SshqError::JobNotFound(key.clone()));
                    }
                }
                keys.to_vec()
            }
            None => self.keys(),
        };
        let mut reset = Vec::new();
        for name in selected {
            let mut job = self.get(&name)?;
            if let Some(wanted) = status {
                if job.status != wanted {
                    continue;
                }
            }
            job.reset(runner).await?;
            self.set(&job)?;
            reset.push(name);
        }
        Ok(reset)
    }
}
