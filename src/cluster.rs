use std::path::PathBuf;

use crate::error::{Result, SshqError};
use crate::host::{Host, HostStatus};
use crate::remote::{Prober, RemoteRunner};
use crate::store::Store;

/// A persisted, named collection of hosts for one experiment.
///
/// Same persistence discipline as [`Queue`](crate::Queue): every
/// mutation saves the backing file.
#[derive(Debug)]
pub struct Cluster {
    pub name: String,
    pub experiment: String,
    hosts: Store<Host>,
}

impl Cluster {
    /// Open (or create) the cluster `<experiment>/<name>-cluster.yaml`.
    pub fn open(name: &str, experiment: Option<&str>) -> Result<Self> {
        let experiment = experiment.unwrap_or("./experiment").to_string();
        let filename = PathBuf::from(&experiment).join(format!("{name}-cluster.yaml"));
        Self::open_file(name, &experiment, filename)
    }

    /// Open a cluster from an explicit file path.
    pub fn open_file(name: &str, experiment: &str, filename: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(experiment)?;
        let hosts: Store<Host> = Store::open(filename)?;
        for (key, host) in hosts.iter() {
            if host.name != *key {
                return Err(SshqError::InvalidHost(format!(
                    "record {key} names host {}",
                    host.name
                )));
            }
        }
        Ok(Self {
            name: name.to_string(),
            experiment: experiment.to_string(),
            hosts,
        })
    }

    pub fn filename(&self) -> &std::path::Path {
        self.hosts.path()
    }

    pub fn add(&mut self, host: Host) -> Result<()> {
        if host.name.trim().is_empty() {
            return Err(SshqError::InvalidHost("host name must not be empty".into()));
        }
        self.hosts.set(&host.name.clone(), host)
    }

    pub fn get(&self, name: &str) -> Result<Host> {
        self.hosts
            .get(name)
            .cloned()
            .ok_or_else(|| SshqError::HostNotFound(name.to_string()))
    }

    pub fn set(&mut self, host: &Host) -> Result<()> {
        self.hosts.set(&host.name, host.clone())
    }

    /// Remove a host. Refused while the host still has assigned jobs.
    pub fn delete(&mut self, name: &str) -> Result<Host> {
        let host = self.get(name)?;
        if host.job_counter > 0 {
            return Err(SshqError::HostBusy {
                host: name.to_string(),
                jobs: host.job_counter,
            });
        }
        self.hosts.delete(name)?;
        Ok(host)
    }

    pub fn keys(&self) -> Vec<String> {
        self.hosts.keys()
    }

    pub fn all(&self) -> Vec<Host> {
        self.hosts.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Enable or disable a host for scheduling.
    pub fn activate(&mut self, name: &str, active: bool) -> Result<()> {
        let mut host = self.get(name)?;
        host.status = if active {
            HostStatus::Active
        } else {
            HostStatus::Inactive
        };
        self.set(&host)
    }

    /// Hosts that currently have spare capacity and are not disabled.
    /// This is what seeds the multi-host scheduler's pool.
    pub fn free_hosts(&self) -> Vec<Host> {
        self.hosts
            .values()
            .filter(|h| h.status != HostStatus::Inactive && h.free_slots() > 0)
            .cloned()
            .collect()
    }

    /// Probe every host, persisting the recorded outcomes.
    pub async fn probe_all<P: Prober>(&mut self, prober: &P) -> Result<()> {
        for name in self.keys() {
            let mut host = self.get(&name)?;
            let ok = host.probe(prober).await;
            tracing::info!(host = %name, ok, "probe");
            self.set(&host)?;
        }
        Ok(())
    }

    /// Ping every host, persisting the recorded outcomes.
    pub async fn ping_all<P: Prober>(&mut self, prober: &P) -> Result<()> {
        for name in self.keys() {
            let mut host = self.get(&name)?;
            let ok = host.ping(prober).await;
            tracing::info!(host = %name, ok, "ping");
            self.set(&host)?;
        }
        Ok(())
    }

    /// Push the experiment tree to every remote host in the cluster.
    pub async fn sync_all<R: RemoteRunner>(&self, runner: &R) -> Result<()> {
        for host in self.hosts.values() {
            host.sync(runner, &self.experiment).await?;
        }
        Ok(())
    }
}
