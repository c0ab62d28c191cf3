//! sshq is an asynchronous job queue for machines reachable over ssh.
//!
//! Jobs are shell commands wrapped in a generated launch script that runs
//! detached (`nohup`) on a local or remote host. Progress is tracked
//! entirely through files the script leaves behind (a pid file and an
//! append-only log of state markers), so the scheduler survives ssh
//! disconnects and process restarts. Two schedulers drive a persisted
//! [`Queue`]: [`SchedulerFifo`] for jobs already bound to hosts, and
//! [`SchedulerFifoMultiHost`] which places unbound jobs onto the first
//! live host with a free slot from a [`Cluster`]-backed pool.

pub mod cluster;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod host;
pub mod remote;
pub mod scheduler;
pub mod shutdown;
pub mod store;

pub use cluster::Cluster;
pub use config::{ExecConfig, SchedulerConfig};
pub use error::{Result, SshqError};
pub use host::{Host, HostStatus};
pub use remote::{Prober, RemoteRunner, RunOutput, ShellRunner, Target};
pub use scheduler::{Job, JobSpec, JobStatus, Queue, SchedulerFifo, SchedulerFifoMultiHost};
