//! Restoring an artifact: fetch, decrypt, extract.

use crate::backup::archive::{extract, list_members, ArchiveFormat};
use crate::backup::destination::Target;
use crate::backup::encrypt::decrypt_file;
use crate::backup::file_ext::ENCRYPTED_FILE_EXT;
use crate::backup::function_path;
use crate::backup::job_config::JobConfig;
use crate::backup::progress::Reporter;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use bon::Builder;
use function_name::named;
use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Where the artifact to restore lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactLocator {
    Local(PathBuf),
    Remote {
        destination_id: String,
        remote_name: String,
    },
}

impl ArtifactLocator {
    pub fn file_name(&self) -> Result<String> {
        match self {
            ArtifactLocator::Local(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| Error::config(format!("{:?} has no file name", path))),
            ArtifactLocator::Remote { remote_name, .. } => Ok(remote_name.clone()),
        }
    }
}

#[derive(Debug, Clone, Builder, Getters, CopyGetters)]
pub struct RestoreRequest {
    #[getset(get = "pub")]
    locator: ArtifactLocator,
    #[builder(into)]
    #[getset(get = "pub")]
    target_dir: PathBuf,
    #[builder(default)]
    #[getset(get_copy = "pub")]
    overwrite: bool,
    #[builder(into)]
    #[getset(get = "pub")]
    passphrase: Option<RedactedString>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreOutcome {
    pub ok: bool,
    pub message: String,
}

pub struct RestoreOrchestrator<'a> {
    targets: Vec<Target>,
    scratch_dir: Option<PathBuf>,
    reporter: &'a Reporter,
}

impl<'a> RestoreOrchestrator<'a> {
    pub fn new(targets: Vec<Target>, reporter: &'a Reporter) -> Self {
        Self {
            targets,
            scratch_dir: None,
            reporter,
        }
    }

    /// Restores against the destinations and scratch directory of `job`.
    pub fn for_job(job: &JobConfig, reporter: &'a Reporter) -> Self {
        Self {
            targets: job.targets(),
            scratch_dir: job.scratch_dir().clone(),
            reporter,
        }
    }

    pub fn with_scratch_dir<P: Into<PathBuf>>(mut self, scratch_dir: P) -> Self {
        self.scratch_dir = Some(scratch_dir.into());
        self
    }

    pub fn restore(&self, request: &RestoreRequest) -> RestoreOutcome {
        match self.try_restore(request) {
            Ok(message) => {
                self.reporter.info(message.clone(), 100);
                RestoreOutcome { ok: true, message }
            }
            Err(e) => {
                let message = format!("Error during restore: {e}");
                self.reporter.error(message.clone());
                RestoreOutcome { ok: false, message }
            }
        }
    }

    #[named]
    fn try_restore(&self, request: &RestoreRequest) -> Result<String> {
        let target_dir = request.target_dir();
        let scratch = self.scratch()?;
        let res = self
            .prepare(request.locator(), request.passphrase().as_ref(), scratch.path())
            .and_then(|prepared| self.ensure_target_dir(target_dir).map(|_| prepared))
            .and_then(|(archive, format)| {
                self.reporter.info(format!("Extracting {format} archive..."), 50);
                extract(&archive, format, target_dir, request.overwrite(), self.reporter)
                    .map(|summary| (format, summary))
            })
            .map(|(format, summary)| {
                format!(
                    "{format} archive restored successfully ({} extracted, {} skipped).",
                    summary.extracted, summary.skipped
                )
            });
        self.close(scratch);
        res.add_fn_name(function_path!())
    }

    fn ensure_target_dir(&self, target_dir: &Path) -> Result<()> {
        if target_dir.is_dir() {
            return Ok(());
        }
        std::fs::create_dir_all(target_dir)
            .map_err(Error::from)
            .add_msg(format!("Creating restore directory {:?}", target_dir))?;
        self.reporter
            .info(format!("Created destination directory: {}", target_dir.display()), 45);
        Ok(())
    }

    /// Member names of the artifact, without extracting anything.
    #[named]
    pub fn list_contents(
        &self,
        locator: &ArtifactLocator,
        passphrase: Option<&RedactedString>,
    ) -> Result<Vec<String>> {
        let scratch = self.scratch()?;
        let res = self
            .prepare(locator, passphrase, scratch.path())
            .and_then(|(archive, format)| list_members(&archive, format));
        self.close(scratch);
        res.add_msg("Listing archive contents")
            .add_fn_name(function_path!())
    }

    /// Brings the artifact to a readable plain archive, returning its path
    /// and container format.
    fn prepare(
        &self,
        locator: &ArtifactLocator,
        passphrase: Option<&RedactedString>,
        scratch: &Path,
    ) -> Result<(PathBuf, ArchiveFormat)> {
        let name = locator.file_name()?;
        let format = ArchiveFormat::from_file_name(&name)
            .ok_or_else(|| Error::format(format!("unsupported archive type {name:?}")))?;
        let encrypted = name.ends_with(&format!(".{ENCRYPTED_FILE_EXT}"));
        // Checked before fetching anything.
        let passphrase = match (encrypted, passphrase) {
            (true, None) => {
                return Err(Error::config(format!("{name:?} is encrypted but no passphrase was given")))
            }
            (true, Some(p)) => Some(p),
            (false, _) => None,
        };

        let fetched = match locator {
            ArtifactLocator::Local(path) => {
                if !path.is_file() {
                    return Err(Error::from(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("archive file not found: {}", path.display()),
                    )));
                }
                path.clone()
            }
            ArtifactLocator::Remote {
                destination_id,
                remote_name,
            } => {
                let target = self
                    .targets
                    .iter()
                    .find(|t| &t.id == destination_id)
                    .ok_or_else(|| Error::config(format!("unknown destination id {destination_id:?}")))?;
                // Remote names may carry directories; the local copy never does.
                let local = scratch.join(format!(
                    "fetched.{}{}",
                    format.extension(),
                    if encrypted { format!(".{ENCRYPTED_FILE_EXT}") } else { String::new() }
                ));
                self.reporter
                    .info(format!("Downloading {remote_name} from {destination_id}..."), 10);
                target.destination.download(remote_name, &local)?;
                local
            }
        };
        self.reporter.info(format!("Fetched {name}."), 20);

        match passphrase {
            Some(passphrase) => {
                self.reporter.info("Attempting to decrypt archive for restore...", 30);
                let plain = scratch.join(format!("decrypted.{}", format.extension()));
                decrypt_file(&fetched, &plain, passphrase)?;
                self.reporter.info("Archive decrypted for restore.", 40);
                Ok((plain, format))
            }
            None => Ok((fetched, format)),
        }
    }

    fn scratch(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("restore_");
        match &self.scratch_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                Ok(builder.tempdir_in(dir)?)
            }
            None => Ok(builder.tempdir()?),
        }
    }

    fn close(&self, scratch: TempDir) {
        let path = scratch.path().to_path_buf();
        if let Err(e) = scratch.close() {
            self.reporter
                .warn(format!("Could not remove scratch directory {:?}: {e}", path));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::archive::create_archive;
    use crate::backup::destination::local::LocalDestinationConfig;
    use crate::backup::encrypt::encrypt_file;
    use crate::backup::progress::tests::collecting;
    use crate::backup::progress::Level;
    use crate::backup::result_error::error::ErrorKind;
    use std::sync::Arc;

    static PASSPHRASE: &str = "correct horse battery";

    struct Fixture {
        temp_dir: TempDir,
    }

    impl Fixture {
        /// A zip and a tar.gz of `data/docs`, each also encrypted, all stored
        /// in the `store` directory.
        fn new() -> Self {
            let temp_dir = TempDir::new().unwrap();
            let root = temp_dir.path();
            std::fs::create_dir_all(root.join("data/docs/sub")).unwrap();
            std::fs::write(root.join("data/docs/a.txt"), "alpha").unwrap();
            std::fs::write(root.join("data/docs/sub/b.txt"), "beta").unwrap();
            std::fs::create_dir_all(root.join("store")).unwrap();
            std::fs::create_dir_all(root.join("scratch")).unwrap();

            for format in ArchiveFormat::ALL {
                let name = format!("backup_job_20240101_000000.{}", format.extension());
                let plain = root.join("store").join(&name);
                create_archive(&[root.join("data/docs")], format, &plain, &Reporter::silent()).unwrap();
                encrypt_file(
                    &plain,
                    &root.join("store").join(format!("{name}.enc")),
                    &RedactedString::from(PASSPHRASE),
                )
                .unwrap();
            }
            Self { temp_dir }
        }

        fn path(&self, rel: &str) -> PathBuf {
            self.temp_dir.path().join(rel)
        }

        fn orchestrator<'a>(&self, reporter: &'a Reporter) -> RestoreOrchestrator<'a> {
            let store = LocalDestinationConfig::builder().path(self.path("store")).build();
            RestoreOrchestrator::new(vec![Target::new("store", Arc::new(store))], reporter)
                .with_scratch_dir(self.path("scratch"))
        }

        fn scratch_is_empty(&self) -> bool {
            std::fs::read_dir(self.path("scratch")).unwrap().next().is_none()
        }
    }

    fn request(locator: ArtifactLocator, target: PathBuf, passphrase: Option<&str>) -> RestoreRequest {
        RestoreRequest::builder()
            .locator(locator)
            .target_dir(target)
            .maybe_passphrase(passphrase)
            .build()
    }

    #[test]
    fn test_restore_every_kind() {
        let fx = Fixture::new();
        let reporter = Reporter::silent();
        for (idx, name) in [
            "backup_job_20240101_000000.zip",
            "backup_job_20240101_000000.tar.gz",
            "backup_job_20240101_000000.zip.enc",
            "backup_job_20240101_000000.tar.gz.enc",
        ]
        .into_iter()
        .enumerate()
        {
            let out = fx.path(&format!("out{idx}"));
            let locator = ArtifactLocator::Remote {
                destination_id: "store".into(),
                remote_name: name.into(),
            };
            let outcome = fx
                .orchestrator(&reporter)
                .restore(&request(locator, out.clone(), Some(PASSPHRASE)));

            assert!(outcome.ok, "{name}: {}", outcome.message);
            assert_eq!(std::fs::read_to_string(out.join("docs/a.txt")).unwrap(), "alpha");
            assert_eq!(std::fs::read_to_string(out.join("docs/sub/b.txt")).unwrap(), "beta");
            assert!(fx.scratch_is_empty());
        }
    }

    #[test]
    fn test_restore_local_skips_existing_files() {
        let fx = Fixture::new();
        let out = fx.path("out");
        std::fs::create_dir_all(out.join("docs")).unwrap();
        std::fs::write(out.join("docs/a.txt"), "mine").unwrap();
        let (reporter, events) = collecting();

        let locator = ArtifactLocator::Local(fx.path("store/backup_job_20240101_000000.zip"));
        let outcome = fx.orchestrator(&reporter).restore(&request(locator, out.clone(), None));

        assert!(outcome.ok);
        assert_eq!(std::fs::read_to_string(out.join("docs/a.txt")).unwrap(), "mine");
        assert_eq!(std::fs::read_to_string(out.join("docs/sub/b.txt")).unwrap(), "beta");
        assert!(events.lock().unwrap().iter().any(|e| e.level == Level::Debug));
    }

    #[test]
    fn test_restore_overwrite() {
        let fx = Fixture::new();
        let out = fx.path("out");
        std::fs::create_dir_all(out.join("docs")).unwrap();
        std::fs::write(out.join("docs/a.txt"), "mine").unwrap();
        let reporter = Reporter::silent();

        let request = RestoreRequest::builder()
            .locator(ArtifactLocator::Local(fx.path("store/backup_job_20240101_000000.tar.gz")))
            .target_dir(out.clone())
            .overwrite(true)
            .build();
        assert!(fx.orchestrator(&reporter).restore(&request).ok);
        assert_eq!(std::fs::read_to_string(out.join("docs/a.txt")).unwrap(), "alpha");
    }

    #[test]
    fn test_restore_failures() {
        let fx = Fixture::new();
        let reporter = Reporter::silent();
        let orchestrator = fx.orchestrator(&reporter);
        let enc = fx.path("store/backup_job_20240101_000000.zip.enc");

        let err = orchestrator
            .list_contents(&ArtifactLocator::Local(enc.clone()), None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);

        let err = orchestrator
            .list_contents(
                &ArtifactLocator::Local(enc.clone()),
                Some(&RedactedString::from("wrong passphrase")),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);

        let remote = ArtifactLocator::Remote {
            destination_id: "gdrive".into(),
            remote_name: "backup_job_20240101_000000.zip".into(),
        };
        assert_eq!(orchestrator.list_contents(&remote, None).unwrap_err().kind(), ErrorKind::Config);

        std::fs::write(fx.path("store/notes.txt"), "hello").unwrap();
        let err = orchestrator
            .list_contents(&ArtifactLocator::Local(fx.path("store/notes.txt")), None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);

        // A tar.gz renamed to .zip.
        std::fs::copy(
            fx.path("store/backup_job_20240101_000000.tar.gz"),
            fx.path("store/backup_job_20240102_000000.zip"),
        )
        .unwrap();
        let outcome = orchestrator.restore(&request(
            ArtifactLocator::Local(fx.path("store/backup_job_20240102_000000.zip")),
            fx.path("out"),
            None,
        ));
        assert!(!outcome.ok);
        assert!(outcome.message.contains("malformed data"));
        assert!(fx.scratch_is_empty());
    }

    #[test]
    fn test_restore_nested_remote_name() {
        let fx = Fixture::new();
        std::fs::create_dir_all(fx.path("store/old")).unwrap();
        std::fs::rename(
            fx.path("store/backup_job_20240101_000000.zip.enc"),
            fx.path("store/old/backup_job_20240101_000000.zip.enc"),
        )
        .unwrap();
        let reporter = Reporter::silent();
        let out = fx.path("out");

        let locator = ArtifactLocator::Remote {
            destination_id: "store".into(),
            remote_name: "old/backup_job_20240101_000000.zip.enc".into(),
        };
        let outcome = fx
            .orchestrator(&reporter)
            .restore(&request(locator, out.clone(), Some(PASSPHRASE)));

        assert!(outcome.ok, "{}", outcome.message);
        assert_eq!(std::fs::read_to_string(out.join("docs/a.txt")).unwrap(), "alpha");
        assert!(fx.scratch_is_empty());
    }

    #[test]
    fn test_rejected_restore_leaves_no_target_dir() {
        let fx = Fixture::new();
        let reporter = Reporter::silent();
        let out = fx.path("never_created");

        let requests = [
            request(
                ArtifactLocator::Local(fx.path("store/backup_job_20240101_000000.zip.enc")),
                out.clone(),
                None,
            ),
            request(
                ArtifactLocator::Remote {
                    destination_id: "gdrive".into(),
                    remote_name: "backup_job_20240101_000000.zip".into(),
                },
                out.clone(),
                None,
            ),
        ];
        for request in requests {
            let outcome = fx.orchestrator(&reporter).restore(&request);
            assert!(!outcome.ok);
            assert!(outcome.message.contains("invalid configuration"));
            assert!(!out.exists());
        }
        assert!(fx.scratch_is_empty());
    }

    #[test]
    fn test_list_contents() {
        let fx = Fixture::new();
        let reporter = Reporter::silent();
        let locator = ArtifactLocator::Remote {
            destination_id: "store".into(),
            remote_name: "backup_job_20240101_000000.tar.gz.enc".into(),
        };
        let members = fx
            .orchestrator(&reporter)
            .list_contents(&locator, Some(&RedactedString::from(PASSPHRASE)))
            .unwrap();

        assert_eq!(members, vec!["docs/a.txt", "docs/sub/b.txt"]);
        assert!(fx.scratch_is_empty());
    }
}
