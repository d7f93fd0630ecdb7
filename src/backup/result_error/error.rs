use crate::backup::result_error::{AddFunctionName, AddMsg};
use std::fmt::Debug;
use thiserror::Error;
use thiserror_ext::Construct;

#[derive(Error, Debug, Construct)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    WalkDir(#[from] walkdir::Error),
    #[error(transparent)]
    StripPrefix(#[from] std::path::StripPrefixError),
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    SerdeYml(#[from] serde_yml::Error),
    #[error(transparent)]
    ThreadPoolBuildError(#[from] rayon::ThreadPoolBuildError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("malformed data: {0}")]
    Format(String),
    #[error("integrity check failed: {0}")]
    Integrity(String),
    #[error("network failure: {0}")]
    Network(String),
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
    #[error("{} failed:\n{}", fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithFnName { fn_name: String, error: Box<Error> },
    #[error("{}", itertools::join(.0, "\n\n"))]
    LotsOfError(Vec<Error>),
}

/// Coarse classification of an [`Error`], looking through context wrappers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Io,
    Format,
    Integrity,
    Network,
}

impl<S: Into<String>> AddMsg<S> for Error {
    fn add_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl<S: Into<String>> AddFunctionName<S> for Error {
    fn add_fn_name(self, fn_name: S) -> Self {
        Self::WithFnName {
            fn_name: fn_name.into(),
            error: Box::new(self),
        }
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(value: zip::result::ZipError) -> Self {
        match value {
            zip::result::ZipError::Io(e) => Self::Io(e),
            other => Self::Format(other.to_string()),
        }
    }
}

impl From<ssh2::Error> for Error {
    fn from(value: ssh2::Error) -> Self {
        match value.code() {
            // Status codes of the file transfer subsystem describe remote files.
            ssh2::ErrorCode::SFTP(_) => Self::Io(value.into()),
            ssh2::ErrorCode::Session(_) => Self::Network(value.to_string()),
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) | Error::WalkDir(_) | Error::StripPrefix(_) => ErrorKind::Io,
            Error::ThreadPoolBuildError(_) => ErrorKind::Io,
            Error::ValidationError(_) | Error::SerdeYml(_) | Error::Config(_) => ErrorKind::Config,
            Error::Format(_) => ErrorKind::Format,
            Error::Integrity(_) => ErrorKind::Integrity,
            Error::Network(_) => ErrorKind::Network,
            Error::WithMsg { error, .. } | Error::WithFnName { error, .. } => error.kind(),
            Error::LotsOfError(errors) => errors.first().map_or(ErrorKind::Io, Error::kind),
        }
    }
}
