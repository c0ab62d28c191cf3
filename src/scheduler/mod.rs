//! Job lifecycle and the two FIFO schedulers.
//!
//! - [`Job`]: one unit of work and its remote execution protocol
//! - [`Queue`]: persisted collection of jobs, offered in insertion order
//! - [`SchedulerFifo`]: runs pre-bound jobs under a global parallelism cap
//! - [`SchedulerFifoMultiHost`]: additionally assigns unbound jobs to the
//!   first live host with spare capacity
//!
//! Scheduling is coordinated by a single task per scheduler: `run()` and
//! `wait_on_running()` are the only control flow that touches queue or
//! host state. Each launched job gets a watcher task that polls the
//! remote log and process table and reports back over a channel, so the
//! coordinator never busy-waits and never shares mutable state.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::ExecConfig;
use crate::remote::{Prober, RemoteRunner};

pub mod fifo;
pub mod job;
pub mod multihost;
pub mod queue;

pub use fifo::SchedulerFifo;
pub use job::{Job, JobSpec, JobStatus, PsEntry};
pub use multihost::SchedulerFifoMultiHost;
pub use queue::Queue;

/// What a watcher task reports back to its scheduler.
#[derive(Debug)]
pub enum JobEvent {
    /// Status changed but the job is still in flight.
    Status(Job),
    /// Terminal: the log reached `end` (or `kill`).
    Completed(Job),
    /// Terminal: the host or process went away while believed running.
    Crashed(Job),
}

/// Spawn a task that polls one launched job until it is terminal,
/// reporting over `tx`. The watcher owns a snapshot of the job; the
/// scheduler persists whatever state arrives with each event.
pub(crate) fn spawn_watcher<R>(
    runner: Arc<R>,
    mut job: Job,
    timeout_min: u64,
    exec: ExecConfig,
    tx: mpsc::Sender<JobEvent>,
) -> JoinHandle<()>
where
    R: RemoteRunner + Prober + 'static,
{
    tokio::spawn(async move {
        let mut poll = tokio::time::interval(exec.poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            poll.tick().await;
            let previous = job.status;
            let status = job.state(&*runner).await;
            match status {
                JobStatus::End | JobStatus::Kill => {
                    let _ = tx.send(JobEvent::Completed(job)).await;
                    return;
                }
                JobStatus::Crash => {
                    let _ = tx.send(JobEvent::Crashed(job)).await;
                    return;
                }
                JobStatus::Start | JobStatus::Run => {
                    if status != previous {
                        let _ = tx.send(JobEvent::Status(job.clone())).await;
                    }
                    if let Some(true) = job.check_crashed(&*runner, timeout_min, &exec).await {
                        let _ = tx.send(JobEvent::Crashed(job)).await;
                        return;
                    }
                }
                _ => {}
            }
        }
    })
}
