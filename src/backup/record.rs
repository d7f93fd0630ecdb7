//! Backup artifact naming.
//!
//! Artifacts are named `backup_<job>_<YYYYMMDD>_<HHMMSS>.<zip|tar.gz>[.enc]`
//! with the local wall-clock time of the run. Retention and listing recover
//! every piece of metadata from that name alone.

use crate::backup::archive::ArchiveFormat;
use crate::backup::file_ext::{FileExtProvider, ENCRYPTED_FILE_EXT};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

pub static FILE_NAME_PREFIX: &str = "backup_";
pub static TIME_FORMAT: &str = "%Y%m%d_%H%M%S";

/// `backup_<job>_<YYYYMMDD>_<HHMMSS>` followed by the extension `ext`
/// provides, if any.
pub fn artifact_name<E: FileExtProvider + ?Sized>(
    job: &str,
    ext: &E,
    timestamp: NaiveDateTime,
) -> String {
    let stem = format!("{FILE_NAME_PREFIX}{job}_{}", timestamp.format(TIME_FORMAT));
    match ext.file_ext() {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem,
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub file_name: String,
    pub job: String,
    pub timestamp: NaiveDateTime,
    pub format: ArchiveFormat,
    pub encrypted: bool,
    /// Only known for the artifact of the current run.
    pub digest: Option<String>,
}

impl BackupRecord {
    /// Parses an artifact file name, returning `None` for anything that does
    /// not follow the naming scheme.
    pub fn parse(file_name: &str) -> Option<BackupRecord> {
        let enc_suffix = format!(".{ENCRYPTED_FILE_EXT}");
        let (stem, encrypted) = match file_name.strip_suffix(&enc_suffix) {
            Some(stem) => (stem, true),
            None => (file_name, false),
        };
        let format = ArchiveFormat::from_file_name(stem)?;
        let stem = stem.strip_suffix(&format!(".{}", format.extension()))?;
        let stem = stem.strip_prefix(FILE_NAME_PREFIX)?;

        let (rest, time) = stem.rsplit_once('_')?;
        let (job, date) = rest.rsplit_once('_')?;
        if job.is_empty() || !all_digits(date, 8) || !all_digits(time, 6) {
            return None;
        }
        let timestamp =
            NaiveDateTime::parse_from_str(&format!("{date}_{time}"), TIME_FORMAT).ok()?;

        Some(BackupRecord {
            file_name: file_name.to_string(),
            job: job.to_string(),
            timestamp,
            format,
            encrypted,
            digest: None,
        })
    }

    pub fn with_digest(mut self, digest: String) -> Self {
        self.digest = Some(digest);
        self
    }
}

fn all_digits(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_digit())
}
