//! One backup run: archive, optionally encrypt, hash, upload, clean up.
//!
//! Archiving, encryption and hashing failures abort the run before anything
//! is uploaded. Destinations are attempted independently and their failures
//! only make the overall outcome not ok. The run owns a private scratch
//! directory that is removed on every exit path.

use crate::backup::archive::create_archive;
use crate::backup::destination::Target;
use crate::backup::encrypt::encrypt_file;
use crate::backup::hash::sha256_file;
use crate::backup::hooks::{ENV_BACKUP_ARTIFACT, ENV_BACKUP_OK};
use crate::backup::job_config::JobConfig;
use crate::backup::progress::{scaled, ProgressEvent, Reporter};
use crate::backup::record::{artifact_name, BackupRecord};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use chrono::{Local, NaiveDateTime};
use derive_more::Display;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::thread::JoinHandle;
use tempfile::TempDir;

static UPLOAD_START: u8 = 65;
static UPLOAD_END: u8 = 95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum RunState {
    Archiving,
    Encrypting,
    Hashing,
    Uploading,
    Cleanup,
    Done,
    Failed,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationOutcome {
    pub id: String,
    pub ok: bool,
    pub error: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupOutcome {
    /// True only when every destination received the artifact.
    pub ok: bool,
    pub state: RunState,
    pub digest: Option<String>,
    pub artifact_name: Option<String>,
    pub destinations: Vec<DestinationOutcome>,
    /// The produced artifact, with its digest.
    pub record: Option<BackupRecord>,
    pub error: Option<String>,
}

impl BackupOutcome {
    fn failed(error: &Error) -> Self {
        Self {
            ok: false,
            state: RunState::Failed,
            digest: None,
            artifact_name: None,
            destinations: Vec::new(),
            record: None,
            error: Some(error.to_string()),
        }
    }
}

/// The final artifact inside the scratch directory.
struct Artifact {
    path: PathBuf,
    name: String,
    digest: String,
}

pub struct BackupOrchestrator<'a> {
    job: &'a JobConfig,
    targets: Vec<Target>,
    reporter: &'a Reporter,
}

impl<'a> BackupOrchestrator<'a> {
    pub fn new(job: &'a JobConfig, reporter: &'a Reporter) -> Self {
        Self {
            job,
            targets: job.targets(),
            reporter,
        }
    }

    /// Replaces the destinations built from the job file.
    pub fn with_targets(mut self, targets: Vec<Target>) -> Self {
        self.targets = targets;
        self
    }

    pub fn run(&self, now: NaiveDateTime) -> BackupOutcome {
        if let Err(e) = self.job.check() {
            self.reporter.error(format!("Invalid job: {e}"));
            return BackupOutcome::failed(&e);
        }

        if let Some(hook) = self.job.hooks().pre_backup() {
            if let Err(e) = hook.run(&[]) {
                self.reporter.error(format!("Pre-backup hook failed: {e}"));
                return BackupOutcome::failed(&e);
            }
        }

        let scratch = match self.scratch_dir() {
            Ok(scratch) => scratch,
            Err(e) => {
                self.reporter.error(format!("Cannot create scratch directory: {e}"));
                return BackupOutcome::failed(&e);
            }
        };

        let mut state = RunState::Archiving;
        let outcome = match self.produce(scratch.path(), now, &mut state) {
            Ok(artifact) => {
                let destinations = self.upload_all(&artifact, scratch.path());
                let ok = destinations.iter().all(|d| d.ok);
                let record = BackupRecord::parse(&artifact.name)
                    .map(|record| record.with_digest(artifact.digest.clone()));
                BackupOutcome {
                    ok,
                    state: if ok { RunState::Done } else { RunState::Failed },
                    digest: Some(artifact.digest),
                    artifact_name: Some(artifact.name),
                    destinations,
                    record,
                    error: (!ok).then(|| "upload failed for at least one destination".to_string()),
                }
            }
            Err(e) => {
                self.reporter.error(format!("Backup failed while {state}: {e}"));
                BackupOutcome::failed(&e)
            }
        };

        self.cleanup(scratch);
        if outcome.ok {
            self.reporter.info("Backup completed successfully.", 100);
        } else {
            self.reporter.info("Backup finished with errors.", 100);
        }

        if let Some(hook) = self.job.hooks().post_backup() {
            let envs = [
                (ENV_BACKUP_OK, outcome.ok.to_string()),
                (ENV_BACKUP_ARTIFACT, outcome.artifact_name.clone().unwrap_or_default()),
            ];
            if let Err(e) = hook.run(&envs) {
                self.reporter.warn(format!("Post-backup hook failed: {e}"));
            }
        }

        outcome
    }

    fn scratch_dir(&self) -> Result<TempDir> {
        let builder = {
            let mut builder = tempfile::Builder::new();
            builder.prefix("backup_run_");
            builder
        };
        match self.job.scratch_dir() {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                Ok(builder.tempdir_in(dir)?)
            }
            None => Ok(builder.tempdir()?),
        }
    }

    fn produce(&self, scratch: &Path, now: NaiveDateTime, state: &mut RunState) -> Result<Artifact> {
        let job = self.job;
        let format = job.archive_format();
        self.reporter.info(
            format!("Starting backup of {} source(s)...", job.source_paths().len()),
            5,
        );

        let archive_name = artifact_name(job.name(), &format, now);
        let archive_path = scratch.join(&archive_name);
        let summary = create_archive(job.source_paths(), format, &archive_path, self.reporter)?;
        self.reporter.info(
            format!("Archive created: {archive_name} ({} entries).", summary.entries),
            30,
        );

        let (path, name) = if job.encryption_enabled() {
            *state = RunState::Encrypting;
            let passphrase = job
                .passphrase()
                .as_ref()
                .ok_or_else(|| Error::config("encryption is enabled but no passphrase is set"))?;
            let name = artifact_name(job.name(), job, now);
            let path = scratch.join(&name);
            self.reporter.info("Encrypting archive...", 35);
            encrypt_file(&archive_path, &path, passphrase)?;
            if let Err(e) = std::fs::remove_file(&archive_path) {
                self.reporter.warn(format!("Could not remove unencrypted archive: {e}"));
            }
            self.reporter.info("Archive encrypted.", 45);
            (path, name)
        } else {
            (archive_path, archive_name)
        };

        *state = RunState::Hashing;
        self.reporter.info("Calculating SHA-256 checksum...", 50);
        let digest = sha256_file(&path)?;
        self.reporter.info(format!("SHA-256: {digest}"), 60);

        Ok(Artifact { path, name, digest })
    }

    fn upload_all(&self, artifact: &Artifact, scratch: &Path) -> Vec<DestinationOutcome> {
        let total = self.targets.len();
        if self.job.parallel_uploads() && total > 1 {
            match ThreadPoolBuilder::new().num_threads(total).build() {
                Ok(pool) => {
                    return pool.install(|| {
                        self.targets
                            .par_iter()
                            .enumerate()
                            .map(|(idx, target)| self.upload_one(artifact, scratch, idx, target))
                            .collect()
                    })
                }
                Err(e) => {
                    self.reporter.warn(format!(
                        "Parallel uploads unavailable ({}), uploading sequentially.",
                        Error::from(e)
                    ));
                }
            }
        }

        self.targets
            .iter()
            .enumerate()
            .map(|(idx, target)| self.upload_one(artifact, scratch, idx, target))
            .collect()
    }

    fn upload_one(&self, artifact: &Artifact, scratch: &Path, idx: usize, target: &Target) -> DestinationOutcome {
        let total = self.targets.len();
        self.reporter.info(
            format!("Uploading {} to {}...", artifact.name, target.id),
            scaled(UPLOAD_START, UPLOAD_END, idx, total),
        );

        let res = target
            .destination
            .upload(&artifact.path, &artifact.name)
            .and_then(|_| {
                if self.job.verify_uploads() {
                    self.verify(artifact, scratch, idx, target)
                } else {
                    Ok(())
                }
            })
            .add_msg(format!("Destination {:?}", target.id));

        let done = scaled(UPLOAD_START, UPLOAD_END, idx + 1, total);
        match res {
            Ok(()) => {
                self.reporter
                    .info(format!("Upload to {} succeeded.", target.id), done);
                DestinationOutcome {
                    id: target.id.clone(),
                    ok: true,
                    error: None,
                }
            }
            Err(e) => {
                self.reporter
                    .error(format!("Upload to {} failed: {e}", target.id));
                self.reporter.info(format!("Skipped {}.", target.id), done);
                DestinationOutcome {
                    id: target.id.clone(),
                    ok: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    fn verify(&self, artifact: &Artifact, scratch: &Path, idx: usize, target: &Target) -> Result<()> {
        let copy = scratch.join(format!("verify_{idx}_{}", artifact.name));
        let res = target
            .destination
            .download(&artifact.name, &copy)
            .and_then(|_| sha256_file(&copy))
            .and_then(|digest| {
                if digest == artifact.digest {
                    self.reporter
                        .debug(format!("Verified copy on {} ({digest}).", target.id));
                    Ok(())
                } else {
                    Err(Error::integrity(format!(
                        "uploaded copy hashes to {digest}, expected {}",
                        artifact.digest
                    )))
                }
            });
        if copy.exists() {
            if let Err(e) = std::fs::remove_file(&copy) {
                self.reporter
                    .debug(format!("Could not remove verification copy {:?}: {e}", copy));
            }
        }
        res
    }

    fn cleanup(&self, scratch: TempDir) {
        self.reporter.info("Cleaning up temporary files...", 95);
        let path = scratch.path().to_path_buf();
        if let Ok(entries) = std::fs::read_dir(&path) {
            for entry in entries.flatten() {
                self.reporter
                    .debug(format!("Removing {}", entry.file_name().to_string_lossy()));
            }
        }
        if let Err(e) = scratch.close() {
            self.reporter
                .warn(format!("Could not remove scratch directory {:?}: {e}", path));
        }
    }
}

/// Runs a backup of `job` on a worker thread.
///
/// Progress events arrive on the returned receiver, which disconnects when
/// the run is over.
pub fn spawn(job: JobConfig) -> (JoinHandle<BackupOutcome>, Receiver<ProgressEvent>) {
    let (tx, rx) = channel();
    let handle = std::thread::spawn(move || {
        let reporter = Reporter::channel(tx);
        BackupOrchestrator::new(&job, &reporter).run(Local::now().naive_local())
    });
    (handle, rx)
}
