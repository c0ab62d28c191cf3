use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::SchedulerConfig;
use crate::error::{Result, SshqError};
use crate::host::{Host, HostStatus};
use crate::remote::{Prober, RemoteRunner};
use crate::scheduler::job::{Job, JobStatus};
use crate::scheduler::queue::Queue;
use crate::scheduler::{spawn_watcher, JobEvent};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// FIFO scheduler that assigns unbound jobs to hosts from a pool.
///
/// The pool is held as live host objects for the lifetime of the
/// scheduler; capacity bookkeeping (`job_counter`) happens here and only
/// here. Selection is first-fit in pool order, not most-available-first;
/// capacity is respected either way and first-fit keeps the policy
/// predictable.
pub struct SchedulerFifoMultiHost<R> {
    queue: Queue,
    hosts: Vec<Host>,
    job_hosts: HashMap<String, usize>,
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

impl<R> SchedulerFifoMultiHost<R>
where
    R: RemoteRunner + Prober + 'static,
{
    pub fn new(queue: Queue, hosts: Vec<Host>, runner: Arc<R>, config: SchedulerConfig) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            queue,
            hosts,
            job_hosts: HashMap::new(),
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

    /// The host pool with current counters.
    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub fn ran_jobs(&self) -> &[String] {
        &self.ran_jobs
    }

    pub fn completed_jobs(&self) -> &[String] {
        &self.completed_jobs
    }

    pub fn running_jobs(&self) -> &[String] {
        &self.running_jobs
    }

    /// Assign every unbound job to a host and launch it, in persisted
    /// order. Blocks while no host in the pool has a free slot; running
    /// jobs completing (or crashing) free capacity and wake the sweep.
    pub async fn run(&mut self) -> Result<Vec<String>> {
        let names = self.queue.keys();
        while self.cursor < names.len() {
            let name = names[self.cursor].clone();
            self.cursor += 1;
            let job = self.queue.get(&name)?;
            let unbound = job.host.is_none()
                && matches!(job.status, JobStatus::Undefined | JobStatus::Ready);
            if !unbound {
                tracing::debug!(job = %name, status = %job.status, "not eligible, passed over");
                continue;
            }
            let index = self.assign_host().await?;
            self.launch(job, index).await?;
        }
        Ok(self.ran_jobs.clone())
    }

    /// Block until every launched job is terminal. Host counters are
    /// decremented as completions and crashes arrive; when this returns,
    /// all capacity lent out by this scheduler has been returned.
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

    /// First-fit scan of the pool. A host qualifies only if it has a
    /// free slot *and* answers a probe right now; an unreachable host is
    /// skipped for this round, not removed. When nothing qualifies, wait
    /// for a completion to free capacity, then rescan.
    async fn assign_host(&mut self) -> Result<usize> {
        loop {
            if let Some(index) = self.scan_pool().await {
                return Ok(index);
            }
            tracing::debug!("no host available, waiting for capacity");
            match tokio::time::timeout(self.config.exec.assign_retry, self.rx.recv()).await {
                Ok(Some(event)) => self.handle_event(event)?,
                Ok(None) => {
                    return Err(SshqError::Internal("scheduler event channel closed".into()))
                }
                Err(_elapsed) => {} // rescan; an unreachable host may be back
            }
        }
    }

    async fn scan_pool(&mut self) -> Option<usize> {
        for index in 0..self.hosts.len() {
            {
                let host = &self.hosts[index];
                if host.status == HostStatus::Inactive || host.free_slots() == 0 {
                    continue;
                }
            }
            let runner = self.runner.clone();
            if self.hosts[index].probe(&*runner).await {
                return Some(index);
            }
            tracing::warn!(host = %self.hosts[index].name, "host unreachable, skipped this round");
        }
        None
    }

    async fn launch(&mut self, mut job: Job, index: usize) -> Result<()> {
        let (user, host_name, is_local) = {
            let host = &self.hosts[index];
            (host.user.clone(), host.name.clone(), host.is_local())
        };
        job.user = Some(user);
        job.host = Some(host_name.clone());
        job.status = JobStatus::Ready;
        job.generate_remote_command();
        job.last_probe_check = Some(Utc::now());
        self.hosts[index].job_counter += 1;
        tracing::info!(job = %job.name, host = %host_name, "assigned");

        if !is_local {
            if let Err(error) = self.runner.sync(&job.target(), &self.queue.experiment).await {
                tracing::warn!(job = %job.name, %error, "experiment sync failed");
            }
        }

        let status = job.run(&*self.runner, &self.config.exec).await?;
        self.queue.set(&job)?;
        if status == JobStatus::Run {
            self.running_jobs.push(job.name.clone());
            self.ran_jobs.push(job.name.clone());
            self.job_hosts.insert(job.name.clone(), index);
            self.watchers.push(spawn_watcher(
                self.runner.clone(),
                job,
                self.config.timeout_min,
                self.config.exec.clone(),
                self.tx.clone(),
            ));
        } else {
            // The slot was reserved before the launch; give it back so a
            // failed submission cannot starve the pool.
            let host = &mut self.hosts[index];
            host.job_counter = host.job_counter.saturating_sub(1);
            tracing::warn!(job = %job.name, status = %status, "launch failed, slot released");
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
                self.release(&job.name);
                if self.queue.contains(&job.name) {
                    self.queue.set(&job)?;
                    self.completed_jobs.push(job.name.clone());
                    tracing::info!(job = %job.name, status = %job.status, "completed");
                }
            }
            JobEvent::Crashed(job) => {
                self.release(&job.name);
                if self.queue.contains(&job.name) {
                    self.queue.set(&job)?;
                    tracing::warn!(job = %job.name, "crashed; reset() to retry");
                }
            }
        }
        Ok(())
    }

    /// Return a finished job's slot to its host.
    fn release(&mut self, name: &str) {
        self.running_jobs.retain(|running| running != name);
        if let Some(index) = self.job_hosts.remove(name) {
            let host = &mut self.hosts[index];
            host.job_counter = host.job_counter.saturating_sub(1);
        }
    }
}
