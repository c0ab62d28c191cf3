use thiserror::Error;

#[derive(Error, Debug)]
pub enum SshqError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Host not found: {0}")]
    HostNotFound(String),

    #[error("Host {host} is running {jobs} job(s); kill them before deleting the host")]
    HostBusy { host: String, jobs: u32 },

    #[error("Invalid job definition: {0}")]
    InvalidJob(String),

    #[error("Invalid host definition: {0}")]
    InvalidHost(String),

    #[error("Remote command failed: {0}")]
    Remote(String),

    #[error("Store error: {0}")]
    Store(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SshqError>;
