use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::remote::{is_local_host, Prober, RemoteRunner, Target};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    Free,
    Active,
    Inactive,
}

impl std::fmt::Display for HostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostStatus::Free => write!(f, "free"),
            HostStatus::Active => write!(f, "active"),
            HostStatus::Inactive => write!(f, "inactive"),
        }
    }
}

/// A named ssh-reachable compute target with a bounded number of
/// concurrent job slots.
///
/// `job_counter` tracks how many jobs a scheduler currently has assigned
/// here; the scheduler owning the host pool is its only legitimate
/// mutator. A manual edit of the persisted record can leave the counter
/// inconsistent, which [`Host::free_slots`] absorbs by saturating.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Host {
    pub user: String,
    pub name: String,
    pub ip: Option<String>,
    pub status: HostStatus,
    pub job_counter: u32,
    pub max_jobs_allowed: u32,
    pub cores: u32,
    pub threads: u32,
    pub gpus: String,
    pub probe_status: bool,
    pub probe_time: Option<DateTime<Utc>>,
    pub ping_status: bool,
    pub ping_time: Option<DateTime<Utc>>,
}

impl Default for Host {
    fn default() -> Self {
        Self {
            user: std::env::var("USER").unwrap_or_else(|_| "root".to_string()),
            name: "localhost".to_string(),
            ip: None,
            status: HostStatus::Free,
            job_counter: 0,
            max_jobs_allowed: 1,
            cores: 1,
            threads: 1,
            gpus: String::new(),
            probe_status: false,
            probe_time: None,
            ping_status: false,
            ping_time: None,
        }
    }
}

impl Host {
    pub fn new(name: &str, user: &str) -> Self {
        Self {
            name: name.to_string(),
            user: user.to_string(),
            ..Default::default()
        }
    }

    pub fn with_max_jobs(mut self, max_jobs_allowed: u32) -> Self {
        self.max_jobs_allowed = max_jobs_allowed.max(1);
        self
    }

    pub fn is_local(&self) -> bool {
        is_local_host(&self.name)
    }

    /// Remaining capacity. Saturating, so an externally mangled counter
    /// reads as "full" rather than wrapping.
    pub fn free_slots(&self) -> u32 {
        self.max_jobs_allowed.saturating_sub(self.job_counter)
    }

    /// A host takes new jobs when it has spare capacity, is not disabled
    /// and its last probe succeeded.
    pub fn is_available(&self) -> bool {
        self.status != HostStatus::Inactive && self.free_slots() > 0 && self.probe_status
    }

    /// Run the liveness probe and record the outcome.
    pub async fn probe<P: Prober>(&mut self, prober: &P) -> bool {
        self.probe_status = prober.probe(&self.user, &self.name).await;
        self.probe_time = Some(Utc::now());
        self.probe_status
    }

    /// ICMP reachability check, recorded independently of the probe.
    /// Falls back to the host name when no ip is configured.
    pub async fn ping<P: Prober>(&mut self, prober: &P) -> bool {
        let addr = self.ip.as_deref().unwrap_or(&self.name);
        self.ping_status = prober.ping(addr).await;
        self.ping_time = Some(Utc::now());
        self.ping_status
    }

    /// Push the experiment tree to this host. Skipped for local hosts.
    pub async fn sync<R: RemoteRunner>(&self, runner: &R, experiment: &str) -> Result<()> {
        let target = Target::new(Some(&self.user), Some(&self.name));
        runner.sync(&target, experiment).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_slots_saturate() {
        let mut host = Host::new("red01", "pi").with_max_jobs(2);
        assert_eq!(host.free_slots(), 2);
        host.job_counter = 2;
        assert_eq!(host.free_slots(), 0);
        // externally mangled counter
        host.job_counter = 5;
        assert_eq!(host.free_slots(), 0);
    }

    #[test]
    fn availability_requires_probe_and_capacity() {
        let mut host = Host::new("red01", "pi");
        assert!(!host.is_available()); // never probed
        host.probe_status = true;
        assert!(host.is_available());
        host.job_counter = 1;
        assert!(!host.is_available()); // full
        host.job_counter = 0;
        host.status = HostStatus::Inactive;
        assert!(!host.is_available()); // disabled
    }

    #[test]
    fn max_jobs_is_at_least_one() {
        let host = Host::new("red01", "pi").with_max_jobs(0);
        assert_eq!(host.max_jobs_allowed, 1);
    }

    #[test]
    fn localhost_is_local() {
        assert!(Host::new("localhost", "me").is_local());
        assert!(!Host::new("red01", "pi").is_local());
    }
}
