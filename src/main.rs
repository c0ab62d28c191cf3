use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::RwLock;
use tracing_subscriber::EnvFilter;

use sshq::cluster::Cluster;
use sshq::config::{ExecConfig, SchedulerConfig};
use sshq::dashboard::{run_api, ApiState};
use sshq::host::Host;
use sshq::remote::ShellRunner;
use sshq::scheduler::{Job, JobSpec, JobStatus, Queue, SchedulerFifo, SchedulerFifoMultiHost};
use sshq::shutdown::shutdown_token;

#[derive(Parser, Debug)]
#[command(name = "sshq")]
#[command(version)]
#[command(about = "Asynchronous SSH job queue with FIFO schedulers")]
#[command(propagate_version = true)]
struct Args {
    /// Directory holding experiment data and the queue/cluster files
    #[arg(long, global = true, default_value = "./experiment")]
    experiment: String,

    /// Output format for list/info commands
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Job management commands
    Job {
        /// Queue the job belongs to
        #[arg(long, default_value = "default")]
        queue: String,

        #[command(subcommand)]
        command: JobCommands,
    },

    /// Host management commands
    Host {
        /// Cluster the host belongs to
        #[arg(long, default_value = "default")]
        cluster: String,

        #[command(subcommand)]
        command: HostCommands,
    },

    /// Run a queue through a scheduler
    Run(RunArgs),

    /// Serve the REST API
    Serve {
        #[arg(long, default_value = "127.0.0.1:8000")]
        addr: SocketAddr,

        #[arg(long, default_value = "default")]
        queue: String,

        #[arg(long, default_value = "default")]
        cluster: String,
    },
}

#[derive(Subcommand, Debug)]
enum JobCommands {
    /// Add a job to the queue
    Add {
        name: String,

        /// Command line the job executes
        #[arg(long)]
        command: String,

        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        user: Option<String>,

        #[arg(long)]
        shell: Option<String>,

        /// Value for CUDA_VISIBLE_DEVICES on the host
        #[arg(long)]
        gpu: Option<String>,

        /// Environment activation file sourced before the command
        #[arg(long)]
        pyenv: Option<String>,
    },

    /// List all jobs in the queue
    List,

    /// Show one job
    Info { name: String },

    /// Launch one job directly, without a scheduler
    Run { name: String },

    /// Kill a running job
    Kill { name: String },

    /// Delete a job (killing it first if it is running)
    Delete { name: String },

    /// Reset jobs to an executable state
    Reset {
        /// Only these jobs (repeatable); default is the whole queue
        #[arg(long = "name")]
        names: Vec<String>,

        /// Only jobs currently in this status
        #[arg(long)]
        status: Option<JobStatus>,
    },

    /// Print a job's log file
    Log { name: String },

    /// Print a job's captured output
    Output { name: String },
}

#[derive(Subcommand, Debug)]
enum HostCommands {
    /// Add a host to the cluster
    Add {
        name: String,

        #[arg(long)]
        user: String,

        #[arg(long)]
        ip: Option<String>,

        /// Concurrent job slots on this host
        #[arg(long, default_value_t = 1)]
        max_jobs: u32,

        #[arg(long, default_value_t = 1)]
        cores: u32,

        #[arg(long, default_value_t = 1)]
        threads: u32,

        #[arg(long, default_value = "")]
        gpus: String,
    },

    /// List all hosts in the cluster
    List,

    /// Delete a host (refused while it has assigned jobs)
    Delete { name: String },

    /// Enable a host for scheduling
    Activate { name: String },

    /// Disable a host for scheduling
    Deactivate { name: String },

    /// Probe every host over ssh
    Probe,

    /// Ping every host
    Ping,

    /// Push the experiment tree to every remote host
    Sync,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Queue to run
    #[arg(long, default_value = "default")]
    queue: String,

    /// Assign unbound jobs to hosts from a pool instead of requiring
    /// every job to carry a host
    #[arg(long)]
    multihost: bool,

    /// Cluster supplying the host pool (multihost)
    #[arg(long, default_value = "default")]
    cluster: String,

    /// Explicit host pool as user@host pairs, comma separated (multihost)
    #[arg(long)]
    hosts: Option<String>,

    /// Concurrently running jobs cap (fifo)
    #[arg(long, default_value_t = 1)]
    max_parallel: usize,

    /// Minutes between host liveness probes for running jobs
    #[arg(long, default_value_t = 10)]
    timeout: u64,
}

// =============================================================================
// Job handlers
// =============================================================================

fn print_jobs(jobs: &[Job], output: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(jobs)?),
        OutputFormat::Table => {
            println!(
                "{:<14} {:<10} {:<18} {:<10} {:<8} COMMAND",
                "NAME", "STATUS", "HOST", "USER", "PID"
            );
            println!("{}", "-".repeat(80));
            for job in jobs {
                println!(
                    "{:<14} {:<10} {:<18} {:<10} {:<8} {}",
                    job.name,
                    job.status.to_string(),
                    job.host.as_deref().unwrap_or("-"),
                    job.user.as_deref().unwrap_or("-"),
                    job.pid.as_deref().unwrap_or("-"),
                    job.command.as_deref().unwrap_or(""),
                );
            }
        }
    }
    Ok(())
}

async fn handle_job(
    queue_name: &str,
    experiment: &str,
    output: OutputFormat,
    command: JobCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    let runner = ShellRunner::new();
    let mut queue = Queue::open(queue_name, Some(experiment))?;

    match command {
        JobCommands::Add {
            name,
            command,
            host,
            user,
            shell,
            gpu,
            pyenv,
        } => {
            let spec = JobSpec {
                name: name.clone(),
                command: Some(command),
                host,
                user,
                shell,
                gpu,
                pyenv,
                experiment: Some(experiment.to_string()),
                ..Default::default()
            };
            let job = Job::from_spec(spec)?;
            queue.add(job)?;
            println!("Added job {name} to queue {queue_name}");
        }
        JobCommands::List => print_jobs(&queue.all(), output)?,
        JobCommands::Info { name } => {
            let mut job = queue.get(&name)?;
            job.state(&runner).await;
            queue.set(&job)?;
            print_jobs(&[job], output)?;
        }
        JobCommands::Run { name } => {
            let mut job = queue.get(&name)?;
            let status = job.run(&runner, &ExecConfig::default()).await?;
            queue.set(&job)?;
            println!(
                "Job {name}: status {status}, pid {}",
                job.pid.as_deref().unwrap_or("-")
            );
        }
        JobCommands::Kill { name } => {
            let job = queue.kill(&name, &runner).await?;
            println!("Job {name}: status {}", job.status);
        }
        JobCommands::Delete { name } => {
            queue.delete(&name, &runner).await?;
            println!("Deleted job {name} from queue {queue_name}");
        }
        JobCommands::Reset { names, status } => {
            let keys = if names.is_empty() {
                None
            } else {
                Some(names.as_slice())
            };
            let reset = queue.reset(keys, status, &runner).await?;
            println!("Reset jobs: {}", reset.join(", "));
        }
        JobCommands::Log { name } => {
            let job = queue.get(&name)?;
            print!("{}", job.get_log(&runner).await);
        }
        JobCommands::Output { name } => {
            let job = queue.get(&name)?;
            print!("{}", job.get_output(&runner).await);
        }
    }
    Ok(())
}

// =============================================================================
// Host handlers
// =============================================================================

fn print_hosts(hosts: &[Host], output: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(hosts)?),
        OutputFormat::Table => {
            println!(
                "{:<18} {:<10} {:<10} {:<6} {:<6} {:<6} PROBE",
                "NAME", "USER", "STATUS", "JOBS", "MAX", "CORES"
            );
            println!("{}", "-".repeat(70));
            for host in hosts {
                let probe = if host.probe_status { "[+]" } else { "[-]" };
                println!(
                    "{:<18} {:<10} {:<10} {:<6} {:<6} {:<6} {}",
                    host.name,
                    host.user,
                    host.status.to_string(),
                    host.job_counter,
                    host.max_jobs_allowed,
                    host.cores,
                    probe,
                );
            }
        }
    }
    Ok(())
}

async fn handle_host(
    cluster_name: &str,
    experiment: &str,
    output: OutputFormat,
    command: HostCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    let runner = ShellRunner::new();
    let mut cluster = Cluster::open(cluster_name, Some(experiment))?;

    match command {
        HostCommands::Add {
            name,
            user,
            ip,
            max_jobs,
            cores,
            threads,
            gpus,
        } => {
            let mut host = Host::new(&name, &user).with_max_jobs(max_jobs);
            host.ip = ip;
            host.cores = cores;
            host.threads = threads;
            host.gpus = gpus;
            cluster.add(host)?;
            println!("Added host {name} to cluster {cluster_name}");
        }
        HostCommands::List => print_hosts(&cluster.all(), output)?,
        HostCommands::Delete { name } => {
            cluster.delete(&name)?;
            println!("Deleted host {name} from cluster {cluster_name}");
        }
        HostCommands::Activate { name } => {
            cluster.activate(&name, true)?;
            println!("Activated host {name}");
        }
        HostCommands::Deactivate { name } => {
            cluster.activate(&name, false)?;
            println!("Deactivated host {name}");
        }
        HostCommands::Probe => {
            cluster.probe_all(&runner).await?;
            print_hosts(&cluster.all(), output)?;
        }
        HostCommands::Ping => {
            cluster.ping_all(&runner).await?;
            print_hosts(&cluster.all(), output)?;
        }
        HostCommands::Sync => {
            cluster.sync_all(&runner).await?;
            println!("Synchronized {experiment} to all remote hosts");
        }
    }
    Ok(())
}

// =============================================================================
// Scheduler handlers
// =============================================================================

fn parse_host_pool(pairs: &str) -> Result<Vec<Host>, Box<dyn std::error::Error>> {
    let mut hosts = Vec::new();
    for pair in pairs.split(',') {
        let (user, name) = pair
            .trim()
            .split_once('@')
            .ok_or_else(|| format!("expected user@host, got {pair}"))?;
        hosts.push(Host::new(name, user));
    }
    Ok(hosts)
}

async fn handle_run(
    experiment: &str,
    args: RunArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let runner = Arc::new(ShellRunner::new());
    let queue = Queue::open(&args.queue, Some(experiment))?;
    let config = SchedulerConfig::default()
        .with_max_parallel(args.max_parallel)
        .with_timeout_min(args.timeout);

    if args.multihost {
        let hosts = match &args.hosts {
            Some(pairs) => parse_host_pool(pairs)?,
            None => {
                let cluster = Cluster::open(&args.cluster, Some(experiment))?;
                cluster.free_hosts()
            }
        };
        if hosts.is_empty() {
            return Err("no free hosts available for scheduling".into());
        }
        let mut scheduler = SchedulerFifoMultiHost::new(queue, hosts, runner, config);
        let ran = scheduler.run().await?;
        println!("Ran jobs: {}", ran.join(", "));
        let completed = scheduler.wait_on_running().await?;
        println!("Completed jobs: {}", completed.join(", "));
    } else {
        let mut scheduler = SchedulerFifo::new(queue, runner, config);
        let ran = scheduler.run().await?;
        println!("Ran jobs: {}", ran.join(", "));
        let completed = scheduler.wait_on_running().await?;
        println!("Completed jobs: {}", completed.join(", "));
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Job { queue, command } => {
            handle_job(&queue, &args.experiment, args.output, command).await?;
        }
        Commands::Host { cluster, command } => {
            handle_host(&cluster, &args.experiment, args.output, command).await?;
        }
        Commands::Run(run_args) => {
            handle_run(&args.experiment, run_args).await?;
        }
        Commands::Serve {
            addr,
            queue,
            cluster,
        } => {
            let state = ApiState {
                queue: Arc::new(RwLock::new(Queue::open(&queue, Some(&args.experiment))?)),
                cluster: Arc::new(RwLock::new(Cluster::open(
                    &cluster,
                    Some(&args.experiment),
                )?)),
                runner: Arc::new(ShellRunner::new()),
            };
            run_api(addr, state, shutdown_token()).await?;
        }
    }

    Ok(())
}
