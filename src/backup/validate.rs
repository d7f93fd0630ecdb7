//! Validation functions for job descriptor values.

use crate::backup::redacted::RedactedString;
use sanitize_filename::{is_sanitized, sanitize};
use validator::ValidationError;

use std::path::PathBuf;

static MIN_PASSPHRASE_LEN: usize = 8;

pub fn validate_job_name<S: AsRef<str>>(name: S) -> Result<(), ValidationError> {
    let name = name.as_ref();
    if name.is_empty() {
        return Err(ValidationError::new("InvalidJobName")
            .with_message("job name must not be empty".into()));
    }

    if !is_sanitized(name) {
        return Err(ValidationError::new("InvalidJobName").with_message(
            format!("Invalid job name, try sanitizing like {:?}", sanitize(name)).into(),
        ));
    }

    Ok(())
}

pub fn validate_passphrase(passphrase: &RedactedString) -> Result<(), ValidationError> {
    if passphrase.inner().chars().count() < MIN_PASSPHRASE_LEN {
        return Err(ValidationError::new("WeakPassphrase").with_message(
            format!("passphrase must be at least {MIN_PASSPHRASE_LEN} characters").into(),
        ));
    }

    Ok(())
}

pub fn validate_secret(secret: &RedactedString) -> Result<(), ValidationError> {
    if secret.is_empty() {
        return Err(ValidationError::new("EmptySecret").with_message("secret is empty".into()));
    }

    Ok(())
}

pub fn validate_source_paths(paths: &[PathBuf]) -> Result<(), ValidationError> {
    if let Some(p) = paths.iter().find(|p| p.as_os_str().is_empty()) {
        return Err(ValidationError::new("InvalidSourcePath")
            .with_message(format!("empty source path {:?}", p).into()));
    }

    Ok(())
}
