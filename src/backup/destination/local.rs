use crate::backup::destination::{Destination, RemoteEntry};
use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use bon::Builder;
use chrono::{DateTime, Utc};
use function_name::named;
use getset::Getters;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use validator::{Validate, ValidationError};

/// A directory on a locally mounted filesystem.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[getset(get = "pub")]
pub struct LocalDestinationConfig {
    #[validate(custom(function = validate_target_path))]
    #[builder(into)]
    path: PathBuf,
}

fn validate_target_path(path: &PathBuf) -> std::result::Result<(), ValidationError> {
    if path.as_os_str().is_empty() {
        return Err(ValidationError::new("InvalidDirectory")
            .with_message("local destination path is empty".into()));
    }
    if path.exists() && !path.is_dir() {
        return Err(ValidationError::new("InvalidDirectory")
            .with_message(format!("{:?} is not a directory", path).into()));
    }

    Ok(())
}

impl LocalDestinationConfig {
    fn existing(&self, remote_name: &str) -> Result<PathBuf> {
        let path = self.path.join(remote_name);
        if !path.is_file() {
            return Err(Error::from(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{:?} does not exist", path),
            )));
        }
        Ok(path)
    }
}

fn read_listing(dir: &Path) -> Result<Vec<RemoteEntry>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        entries.push(RemoteEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            is_dir: metadata.is_dir(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

impl Destination for LocalDestinationConfig {
    fn type_id(&self) -> &'static str {
        "local"
    }

    #[named]
    fn upload(&self, local: &Path, remote_name: &str) -> Result<()> {
        let target = self.path.join(remote_name);
        let partial = self.path.join(format!("{remote_name}.part"));
        tracing::debug!("Copying {:?} to {:?}", local, target);
        std::fs::create_dir_all(&self.path)
            .and_then(|_| std::fs::copy(local, &partial))
            .and_then(|_| std::fs::rename(&partial, &target))
            .map_err(|e| {
                let _ = std::fs::remove_file(&partial);
                Error::from(e)
            })
            .add_msg(format!("Copying {:?} to {:?}", local, target))
            .add_fn_name(function_path!())
    }

    #[named]
    fn download(&self, remote_name: &str, local: &Path) -> Result<()> {
        self.existing(remote_name)
            .and_then(|src| {
                tracing::debug!("Copying {:?} to {:?}", src, local);
                std::fs::copy(&src, local).map_err(Error::from)
            })
            .map(|_| ())
            .add_fn_name(function_path!())
    }

    #[named]
    fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>> {
        let full = self.path.join(dir);
        if !full.is_dir() {
            tracing::debug!("{:?} does not exist yet, nothing to list", full);
            return Ok(Vec::new());
        }
        read_listing(&full)
            .add_msg(format!("Listing {:?}", full))
            .add_fn_name(function_path!())
    }

    #[named]
    fn delete(&self, remote_name: &str) -> Result<()> {
        self.existing(remote_name)
            .and_then(|path| {
                tracing::debug!("Removing {:?}", path);
                std::fs::remove_file(&path).map_err(Error::from)
            })
            .add_fn_name(function_path!())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::result_error::error::ErrorKind;
    use tempfile::TempDir;

    fn setup() -> (TempDir, LocalDestinationConfig, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let config = LocalDestinationConfig::builder()
            .path(temp_dir.path().join("dest/nested"))
            .build();
        let artifact = temp_dir.path().join("artifact.zip");
        std::fs::write(&artifact, b"artifact bytes").unwrap();
        (temp_dir, config, artifact)
    }

    #[test]
    fn test_upload_creates_directory() {
        let (temp_dir, config, artifact) = setup();
        config.upload(&artifact, "a.zip").unwrap();

        let uploaded = temp_dir.path().join("dest/nested/a.zip");
        assert_eq!(std::fs::read(uploaded).unwrap(), b"artifact bytes");
        assert!(!temp_dir.path().join("dest/nested/a.zip.part").exists());
    }

    #[test]
    fn test_list_download_delete() {
        let (temp_dir, config, artifact) = setup();
        assert!(config.list("").unwrap().is_empty());

        config.upload(&artifact, "a.zip").unwrap();
        config.upload(&artifact, "b.zip").unwrap();
        let names: Vec<_> = config.list("").unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["a.zip", "b.zip"]);

        let fetched = temp_dir.path().join("fetched.zip");
        config.download("b.zip", &fetched).unwrap();
        assert_eq!(std::fs::read(&fetched).unwrap(), b"artifact bytes");

        config.delete("a.zip").unwrap();
        assert_eq!(config.list("").unwrap().len(), 1);
    }

    #[test]
    fn test_missing_file_is_error() {
        let (temp_dir, config, _) = setup();
        let err = config
            .download("nope.zip", &temp_dir.path().join("x"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(config.delete("nope.zip").unwrap_err().kind(), ErrorKind::Io);
    }

    #[test]
    fn test_path_that_is_a_file_fails() {
        let (temp_dir, _, artifact) = setup();
        let config = LocalDestinationConfig::builder()
            .path(artifact.join("sub"))
            .build();
        assert!(config.upload(&artifact, "a.zip").is_err());

        let invalid = LocalDestinationConfig::builder().path(artifact.clone()).build();
        assert!(invalid.validate().is_err());
        drop(temp_dir);
    }
}
