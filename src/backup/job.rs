//! A complete job run: backup, then retention when the backup fully succeeded.

use crate::backup::backup_run::{BackupOrchestrator, BackupOutcome};
use crate::backup::job_config::JobConfig;
use crate::backup::progress::{ProgressEvent, Reporter};
use crate::backup::retention::{RetentionManager, RetentionOutcome};
use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::sync::mpsc::{channel, Receiver};
use std::thread::JoinHandle;

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub backup: BackupOutcome,
    /// Present when the retention policy was run.
    pub retention: Option<RetentionOutcome>,
}

impl JobOutcome {
    pub fn ok(&self) -> bool {
        self.backup.ok && self.retention.as_ref().map_or(true, |r| r.ok)
    }
}

pub fn run_job(job: &JobConfig, reporter: &Reporter) -> JobOutcome {
    run_job_at(job, reporter, Local::now().naive_local())
}

pub fn run_job_at(job: &JobConfig, reporter: &Reporter, now: NaiveDateTime) -> JobOutcome {
    tracing::info!("Starting job {}", job.name());
    let backup = BackupOrchestrator::new(job, reporter).run(now);

    let retention = match job.retention() {
        Some(policy) if policy.enabled() && backup.ok => {
            let manager = RetentionManager::new(policy, Some(job.name().as_str()));
            Some(manager.apply(&job.targets(), now, &reporter.fork()))
        }
        Some(policy) if policy.enabled() => {
            reporter.warn("Backup did not fully succeed, skipping retention policy.");
            None
        }
        _ => None,
    };

    tracing::info!("Job {} finished", job.name());
    JobOutcome { backup, retention }
}

/// [`run_job`] on a worker thread, streaming progress over a channel.
pub fn spawn_job(job: JobConfig) -> (JoinHandle<JobOutcome>, Receiver<ProgressEvent>) {
    let (tx, rx) = channel();
    let handle = std::thread::spawn(move || run_job(&job, &Reporter::channel(tx)));
    (handle, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::destination::local::LocalDestinationConfig;
    use crate::backup::destination::NamedDestination;
    use crate::backup::retention::{RetentionMode, RetentionPolicy};
    use chrono::NaiveDate;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn at(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn job(root: &Path, destinations: Vec<(&str, PathBuf)>, keep: u32) -> JobConfig {
        std::fs::create_dir_all(root.join("data")).unwrap();
        std::fs::write(root.join("data/a.txt"), "alpha").unwrap();
        JobConfig::builder()
            .name("docs")
            .source_paths(vec![root.join("data")])
            .destinations(
                destinations
                    .into_iter()
                    .map(|(id, path)| {
                        NamedDestination::builder()
                            .id(id)
                            .config(LocalDestinationConfig::builder().path(path).build())
                            .build()
                    })
                    .collect::<Vec<_>>(),
            )
            .retention(
                RetentionPolicy::builder()
                    .enabled(true)
                    .mode(RetentionMode::Count)
                    .value(keep)
                    .build(),
            )
            .scratch_dir(root.join("scratch"))
            .build()
    }

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_retention_after_successful_backup() {
        let temp_dir = TempDir::new().unwrap();
        let dst = temp_dir.path().join("dst");
        std::fs::create_dir_all(&dst).unwrap();
        std::fs::write(dst.join("backup_other_20240101_000000.zip"), "").unwrap();
        let job = job(temp_dir.path(), vec![("dst", dst.clone())], 2);
        let reporter = Reporter::silent();

        for day in 1..=3 {
            let outcome = run_job_at(&job, &reporter, at(day));
            assert!(outcome.ok());
        }

        assert_eq!(
            names(&dst),
            vec![
                "backup_docs_20240302_120000.zip",
                "backup_docs_20240303_120000.zip",
                "backup_other_20240101_000000.zip",
            ]
        );
    }

    #[test]
    fn test_retention_skipped_after_partial_failure() {
        let temp_dir = TempDir::new().unwrap();
        let good = temp_dir.path().join("good");
        std::fs::write(temp_dir.path().join("blocker"), "").unwrap();
        let job = job(
            temp_dir.path(),
            vec![("good", good.clone()), ("bad", temp_dir.path().join("blocker/sub"))],
            0,
        );

        let outcome = run_job_at(&job, &Reporter::silent(), at(1));

        assert!(!outcome.ok());
        assert_eq!(outcome.retention, None);
        assert_eq!(names(&good), vec!["backup_docs_20240301_120000.zip"]);
    }

    #[test]
    fn test_spawn_job() {
        let temp_dir = TempDir::new().unwrap();
        let dst = temp_dir.path().join("dst");
        let job = job(temp_dir.path(), vec![("dst", dst.clone())], 1);

        let (handle, rx) = spawn_job(job);
        let events: Vec<_> = rx.iter().collect();
        let outcome = handle.join().unwrap();

        assert!(outcome.ok());
        assert!(outcome.retention.unwrap().ok);
        assert!(events.iter().any(|e| e.message.contains("Retention policy applied")));
        assert_eq!(names(&dst).len(), 1);
    }
}
