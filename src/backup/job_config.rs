use crate::backup::archive::ArchiveFormat;
use crate::backup::destination::{NamedDestination, Target};
use crate::backup::file_ext::{FileExtProvider, ENCRYPTED_FILE_EXT};
use crate::backup::hooks::Hooks;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::result_error::AddMsg;
use crate::backup::retention::RetentionPolicy;
use crate::backup::validate::{validate_job_name, validate_passphrase, validate_source_paths};
use bon::Builder;
use getset::{CopyGetters, Getters};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use validator::Validate;

/// Everything one backup run needs. Never mutated once a run starts.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters, CopyGetters)]
pub struct JobConfig {
    #[validate(custom(function = validate_job_name))]
    #[builder(into)]
    #[getset(get = "pub")]
    name: String,
    #[validate(length(min = 1), custom(function = validate_source_paths))]
    #[builder(into)]
    #[getset(get = "pub")]
    source_paths: Vec<PathBuf>,
    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub")]
    archive_format: ArchiveFormat,
    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub")]
    encryption_enabled: bool,
    #[builder(into)]
    #[getset(get = "pub")]
    passphrase: Option<RedactedString>,
    #[validate(length(min = 1))]
    #[builder(into)]
    #[getset(get = "pub")]
    destinations: Vec<NamedDestination>,
    #[getset(get = "pub")]
    retention: Option<RetentionPolicy>,
    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub")]
    parallel_uploads: bool,
    /// Download every uploaded artifact again and compare its digest.
    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub")]
    verify_uploads: bool,
    #[serde(default)]
    #[builder(default)]
    #[getset(get = "pub")]
    hooks: Hooks,
    /// Parent directory for the per-run scratch directory. Defaults to the
    /// system temporary directory.
    #[builder(into)]
    #[getset(get = "pub")]
    scratch_dir: Option<PathBuf>,
}

impl FileExtProvider for JobConfig {
    fn file_ext(&self) -> Option<Arc<str>> {
        let ext = self.archive_format.extension();
        Some(if self.encryption_enabled {
            format!("{ext}.{ENCRYPTED_FILE_EXT}").into()
        } else {
            ext.into()
        })
    }
}

impl JobConfig {
    /// Reads a job from a YAML (or JSON) file and checks it.
    pub fn load(path: &Path) -> Result<JobConfig> {
        File::open(path)
            .map_err(Error::from)
            .and_then(|f| serde_yml::from_reader::<_, JobConfig>(f).map_err(Error::from))
            .and_then(|job| job.check().map(|_| job))
            .add_msg(format!("Loading job file {:?}", path))
    }

    /// Field rules plus the rules spanning several fields. Every violation is
    /// reported, not only the first one.
    pub fn check(&self) -> Result<()> {
        let mut errors = Vec::new();
        if let Err(e) = self.validate() {
            errors.push(Error::from(e));
        }

        if self.encryption_enabled {
            match &self.passphrase {
                None => errors.push(Error::config("encryption is enabled but no passphrase is set")),
                Some(p) => {
                    if let Err(e) = validate_passphrase(p) {
                        errors.push(Error::config(e.to_string()));
                    }
                }
            }
        }

        for destination in &self.destinations {
            if destination.id().is_empty() {
                errors.push(Error::config("destination id must not be empty"));
            }
            if let Err(e) = destination.config().validate() {
                errors.push(Error::from(e).add_msg(format!("Destination {:?}", destination.id())));
            }
        }
        for id in self.destinations.iter().map(|d| d.id()).duplicates() {
            errors.push(Error::config(format!("duplicate destination id {id:?}")));
        }

        if let Some(retention) = &self.retention {
            for id in retention.applies_to() {
                if self.destination(id).is_none() {
                    errors.push(Error::config(format!(
                        "retention applies to unknown destination {id:?}"
                    )));
                }
            }
        }

        if let Err(e) = self.hooks.validate_commands() {
            errors.push(Error::from(e).add_msg("Hooks"));
        }

        convert_error_vec(errors).add_msg(format!("Invalid job {:?}", self.name))
    }

    pub fn destination(&self, id: &str) -> Option<&NamedDestination> {
        self.destinations.iter().find(|d| d.id() == id)
    }

    pub fn target(&self, id: &str) -> Result<Target> {
        self.destination(id)
            .map(NamedDestination::target)
            .ok_or_else(|| Error::config(format!("unknown destination id {id:?}")))
    }

    pub fn targets(&self) -> Vec<Target> {
        self.destinations.iter().map(NamedDestination::target).collect()
    }
}
