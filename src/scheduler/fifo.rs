use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::SchedulerConfig;
use crate::error::{Result, SshqError};
use crate::remote::{Prober, RemoteRunner};
use crate::scheduler::job::{Job, JobStatus};
use crate::scheduler::queue::Queue;
use crate::scheduler::{spawn_watcher, JobEvent};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Runs the jobs of a queue in persisted order under a global
/// parallelism cap. Every job must already be bound to a host.
///
/// Each job is offered at most once per scheduler instance: the cursor
/// only moves forward, and a job that is not `ready` when its turn comes
/// is passed over for good. Crashed jobs are not retried; recovery is an
/// explicit [`Queue::reset`].
pub struct SchedulerFifo<R> {
    queue: Queue,
    runner: Arc<R>,
    config: SchedulerConfig,
    cursor: usize,
    running_jobs: Vec<String>,
    completed_jobs: Vec<String>,
    ran_jobs: Vec<String>,
    tx: mpsc::Sender<JobEvent>,
    rx: mpsc::Receiver<JobEvent>,
    watchers: Vec<JoinHandle<()>>,
}

impl<R> SchedulerFifo<R>
where
    R: RemoteRunner + Prober + 'static,
{
    pub fn new(queue: Queue, runner: Arc<R>, config: SchedulerConfig) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            queue,
            runner,
            config,
            cursor: 0,
            running_jobs: Vec::new(),
            completed_jobs: Vec::new(),
            ran_jobs: Vec::new(),
            tx,
            rx,
            watchers: Vec::new(),
        }
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut Queue {
        &mut self.queue
    }

    /// Names of the jobs this scheduler launched, in launch order.
    pub fn ran_jobs(&self) -> &[String] {
        &self.ran_jobs
    }

    /// Names of the launched jobs that reached `end` (or `kill`).
    pub fn completed_jobs(&self) -> &[String] {
        &self.completed_jobs
    }

    /// Names of the launched jobs still in flight.
    pub fn running_jobs(&self) -> &[String] {
        &self.running_jobs
    }

    /// Launch every ready job, in order, never exceeding `max_parallel`
    /// in flight. Returns the names that were launched. Launch failures
    /// (`fail_start`) do not consume a slot and do not stop the sweep.
    pub async fn run(&mut self) -> Result<Vec<String>> {
        let names = self.queue.keys();
        while self.cursor < names.len() {
            if self.running_jobs.len() >= self.config.max_parallel {
                self.recv_event().await?;
                continue;
            }
            let name = names[self.cursor].clone();
            self.cursor += 1;
            let job = self.queue.get(&name)?;
            if job.status != JobStatus::Ready {
                tracing::debug!(job = %name, status = %job.status, "not ready, passed over");
                continue;
            }
            if job.host.is_none() || job.user.is_none() {
                tracing::warn!(job = %name, "no host bound, passed over");
                continue;
            }
            self.launch(job).await?;
        }
        Ok(self.ran_jobs.clone())
    }

    /// Block until every launched job is terminal. Returns the completed
    /// names; crashed jobs are absent from the result.
    pub async fn wait_on_running(&mut self) -> Result<Vec<String>> {
        while !self.running_jobs.is_empty() {
            self.recv_event().await?;
        }
        // every watcher has reported a terminal event by now
        for watcher in self.watchers.drain(..) {
            let _ = watcher.await;
        }
        Ok(self.completed_jobs.clone())
    }

    async fn launch(&mut self, mut job: Job) -> Result<()> {
        // Seed the liveness clock so the watcher's first probe is not
        // immediately due.
        if let (Some(user), Some(host)) = (job.user.clone(), job.host.clone()) {
            if !job.is_local() {
                let ok = self.runner.probe(&user, &host).await;
                tracing::debug!(job = %job.name, host = %host, ok, "pre-launch probe");
                if let Err(error) = self.runner.sync(&job.target(), &self.queue.experiment).await {
                    tracing::warn!(job = %job.name, %error, "experiment sync failed");
                }
            }
        }
        job.last_probe_check = Some(Utc::now());

        let status = job.run(&*self.runner, &self.config.exec).await?;
        self.queue.set(&job)?;
        if status == JobStatus::Run {
            self.running_jobs.push(job.name.clone());
            self.ran_jobs.push(job.name.clone());
            self.watchers.push(spawn_watcher(
                self.runner.clone(),
                job,
                self.config.timeout_min,
                self.config.exec.clone(),
                self.tx.clone(),
            ));
        } else {
            tracing::warn!(job = %job.name, status = %status, "launch failed, moving on");
        }
        Ok(())
    }

    async fn recv_event(&mut self) -> Result<()> {
        match self.rx.recv().await {
            Some(event) => self.handle_event(event),
            None => Err(SshqError::Internal("scheduler event channel closed".into())),
        }
    }

    fn handle_event(&mut self, event: JobEvent) -> Result<()> {
        match event {
            JobEvent::Status(job) => {
                if self.queue.contains(&job.name) {
                    self.queue.set(&job)?;
                }
            }
            JobEvent::Completed(job) => {
                self.running_jobs.retain(|name| name != &job.name);
                if self.queue.contains(&job.name) {
                    self.queue.set(&job)?;
                    self.completed_jobs.push(job.name.clone());
                    tracing::info!(job = %job.name, status = %job.status, "completed");
                }
            }
            JobEvent::Crashed(job) => {
                self.running_jobs.retain(|name| name != &job.name);
                if self.queue.contains(&job.name) {
                    self.queue.set(&job)?;
                    tracing::warn!(job = %job.name, "crashed; reset() to retry");
                }
            }
        }
        Ok(())
    }
}
