use std::time::Duration;

/// Timing knobs for the remote execution protocol.
///
/// The remote side only communicates through files (`<name>.pid`,
/// `<name>.log`), so every state observation is a poll. These settings
/// control how patient each poll is.
#[derive(Debug, Clone)]
pub struct ExecConfig {
    /// How many times to re-read the pid file after a launch before
    /// declaring the launch failed.
    pub pid_retries: u32,
    /// Delay between pid file reads.
    pub pid_retry_delay: Duration,
    /// Grace period between "process gone" and re-reading the log, so a
    /// job that just finished normally is not misclassified as crashed.
    pub settle_delay: Duration,
    /// Interval at which a watcher re-reads a running job's log.
    pub poll_interval: Duration,
    /// How long the multi-host scheduler waits before re-scanning the
    /// pool when no host currently qualifies.
    pub assign_retry: Duration,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            pid_retries: 5,
            pid_retry_delay: Duration::from_secs(1),
            settle_delay: Duration::from_secs(2),
            poll_interval: Duration::from_secs(2),
            assign_retry: Duration::from_secs(5),
        }
    }
}

/// Configuration shared by both schedulers.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Global cap on concurrently running jobs (FIFO scheduler).
    pub max_parallel: usize,
    /// Minutes between host liveness probes for a running remote job.
    pub timeout_min: u64,
    pub exec: ExecConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_parallel: 1,
            timeout_min: 10,
            exec: ExecConfig::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn with_timeout_min(mut self, timeout_min: u64) -> Self {
        self.timeout_min = timeout_min;
        self
    }
}
