//! Storage targets that backup artifacts are transferred to.
//!
//! Every variant implements [`Destination`]. The configured set is a closed
//! enum, [`DestinationConfig`], selected by the `type` key of the job file.

pub mod local;
pub mod sftp;

use crate::backup::destination::local::LocalDestinationConfig;
use crate::backup::destination::sftp::SftpDestinationConfig;
use crate::backup::result_error::result::Result;
use bon::Builder;
use chrono::{DateTime, Utc};
use derive_more::From;
use getset::Getters;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::Path;
use std::result;
use std::sync::Arc;
use validator::{Validate, ValidationErrors};

/// One item of a destination directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub name: String,
    pub modified: Option<DateTime<Utc>>,
    pub is_dir: bool,
}

pub trait Destination: Send + Sync + Debug {
    /// Stable identifier of the destination kind, as written in job files.
    fn type_id(&self) -> &'static str;
    fn upload(&self, local: &Path, remote_name: &str) -> Result<()>;
    fn download(&self, remote_name: &str, local: &Path) -> Result<()>;
    /// Lists `dir`, relative to the destination root. An empty string lists the
    /// root itself.
    fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>>;
    fn delete(&self, remote_name: &str) -> Result<()>;
}

#[derive(Clone, From, Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum DestinationConfig {
    Local(LocalDestinationConfig),
    RemoteTransfer(SftpDestinationConfig),
}

impl Validate for DestinationConfig {
    fn validate(&self) -> result::Result<(), ValidationErrors> {
        match self {
            Self::Local(inner) => inner.validate(),
            Self::RemoteTransfer(inner) => inner.validate(),
        }
    }
}

impl Destination for DestinationConfig {
    fn type_id(&self) -> &'static str {
        match self {
            Self::Local(inner) => inner.type_id(),
            Self::RemoteTransfer(inner) => inner.type_id(),
        }
    }

    fn upload(&self, local: &Path, remote_name: &str) -> Result<()> {
        match self {
            Self::Local(inner) => inner.upload(local, remote_name),
            Self::RemoteTransfer(inner) => inner.upload(local, remote_name),
        }
    }

    fn download(&self, remote_name: &str, local: &Path) -> Result<()> {
        match self {
            Self::Local(inner) => inner.download(remote_name, local),
            Self::RemoteTransfer(inner) => inner.download(remote_name, local),
        }
    }

    fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>> {
        match self {
            Self::Local(inner) => inner.list(dir),
            Self::RemoteTransfer(inner) => inner.list(dir),
        }
    }

    fn delete(&self, remote_name: &str) -> Result<()> {
        match self {
            Self::Local(inner) => inner.delete(remote_name),
            Self::RemoteTransfer(inner) => inner.delete(remote_name),
        }
    }
}

/// A destination entry of a job: a unique id plus its configuration.
#[derive(Clone, Debug, Serialize, Deserialize, Builder, Getters)]
#[getset(get = "pub")]
pub struct NamedDestination {
    #[builder(into)]
    id: String,
    #[serde(flatten)]
    #[builder(into)]
    config: DestinationConfig,
}

impl NamedDestination {
    pub fn target(&self) -> Target {
        Target::new(self.id.clone(), Arc::new(self.config.clone()))
    }
}

/// A live destination the orchestrators work against.
#[derive(Clone, Debug)]
pub struct Target {
    pub id: String,
    pub destination: Arc<dyn Destination>,
}

impl Target {
    pub fn new<S: Into<String>>(id: S, destination: Arc<dyn Destination>) -> Self {
        Self {
            id: id.into(),
            destination,
        }
    }
}
