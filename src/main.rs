use backup_engine::backup::job::spawn_job;
use backup_engine::backup::job_config::JobConfig;
use backup_engine::backup::progress::{ProgressEvent, Reporter};
use backup_engine::backup::restore::{ArtifactLocator, RestoreOrchestrator, RestoreRequest};
use backup_engine::backup::result_error::error::Error;
use backup_engine::backup::result_error::result::Result;
use backup_engine::backup::result_error::AddMsg;
use backup_engine::backup::retention::{discover, RetentionManager};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::exit;
use tracing::error;

/// Backs up local paths to local and SFTP destinations, restores and prunes them.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the job: back up, then apply the retention policy
    Run {
        #[command(flatten)]
        job: JobArg,
    },
    /// Restore an artifact into a directory
    Restore {
        #[command(flatten)]
        job: JobArg,
        #[command(flatten)]
        artifact: ArtifactArg,
        /// Directory to restore into, created when missing
        #[arg(short, long)]
        target: PathBuf,
        /// Replace files that already exist
        #[arg(long)]
        overwrite: bool,
    },
    /// List the files inside an artifact
    Contents {
        #[command(flatten)]
        job: JobArg,
        #[command(flatten)]
        artifact: ArtifactArg,
    },
    /// Apply the retention policy without backing up
    Prune {
        #[command(flatten)]
        job: JobArg,
    },
    /// List the job's artifacts on one destination, newest last
    List {
        #[command(flatten)]
        job: JobArg,
        /// Destination id
        #[arg(short, long)]
        destination: String,
    },
}

#[derive(Args, Debug)]
struct JobArg {
    /// Location of the job file
    #[arg(short, long)]
    config: PathBuf,
}

impl JobArg {
    fn load(&self) -> Result<JobConfig> {
        JobConfig::load(&self.config)
    }
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct ArtifactArg {
    /// Artifact file on this machine
    #[arg(long)]
    archive: Option<PathBuf>,
    /// Artifact on a destination, as `<destination id>:<file name>`
    #[arg(long)]
    remote: Option<String>,
}

impl ArtifactArg {
    fn locator(&self) -> Result<ArtifactLocator> {
        if let Some(path) = &self.archive {
            return Ok(ArtifactLocator::Local(path.clone()));
        }
        let remote = self.remote.as_deref().unwrap_or_default();
        remote
            .split_once(':')
            .filter(|(id, name)| !id.is_empty() && !name.is_empty())
            .map(|(id, name)| ArtifactLocator::Remote {
                destination_id: id.to_string(),
                remote_name: name.to_string(),
            })
            .ok_or_else(|| Error::config(format!("expected <destination id>:<file name>, got {remote:?}")))
    }
}

fn print_event(event: &ProgressEvent) {
    println!("[{}] {:>3}% {}", event.level, event.percent, event.message);
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| Error::format(e.to_string()))
        .add_msg("Serializing result")?;
    println!("{json}");
    Ok(())
}

fn execute(command: Command) -> Result<bool> {
    let reporter = Reporter::new(print_event);
    match command {
        Command::Run { job } => {
            let (handle, progress) = spawn_job(job.load()?);
            progress.iter().for_each(|event| print_event(&event));
            let outcome = handle
                .join()
                .map_err(|_| Error::from(std::io::Error::other("backup thread panicked")))?;
            print_json(&outcome)?;
            Ok(outcome.ok())
        }
        Command::Restore {
            job,
            artifact,
            target,
            overwrite,
        } => {
            let job = job.load()?;
            let request = RestoreRequest::builder()
                .locator(artifact.locator()?)
                .target_dir(target)
                .overwrite(overwrite)
                .maybe_passphrase(job.passphrase().clone())
                .build();
            let outcome = RestoreOrchestrator::for_job(&job, &reporter).restore(&request);
            print_json(&outcome)?;
            Ok(outcome.ok)
        }
        Command::Contents { job, artifact } => {
            let job = job.load()?;
            let members = RestoreOrchestrator::for_job(&job, &reporter)
                .list_contents(&artifact.locator()?, job.passphrase().as_ref())?;
            members.iter().for_each(|m| println!("{m}"));
            Ok(true)
        }
        Command::Prune { job } => {
            let job = job.load()?;
            let policy = job
                .retention()
                .as_ref()
                .ok_or_else(|| Error::config("the job has no retention policy"))?;
            let outcome = RetentionManager::new(policy, Some(job.name().as_str())).apply(
                &job.targets(),
                Local::now().naive_local(),
                &reporter,
            );
            print_json(&outcome)?;
            Ok(outcome.ok)
        }
        Command::List { job, destination } => {
            let job = job.load()?;
            let target = job.target(&destination)?;
            for record in discover(target.destination.as_ref(), Some(job.name().as_str()))? {
                println!("{}  {}", record.timestamp, record.file_name);
            }
            Ok(true)
        }
    }
}

fn main() {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();
    let cli = Cli::parse();

    match execute(cli.command) {
        Ok(true) => {}
        Ok(false) => exit(1),
        Err(e) => {
            error!("{e}");
            exit(1);
        }
    }
}
