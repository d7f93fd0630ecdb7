pub mod tar_gz;
pub mod walkdir_source;
pub mod zip_archive;

use crate::backup::archive::walkdir_source::source_entries;
use crate::backup::file_ext::{FileExtProvider, ENCRYPTED_FILE_EXT};
use crate::backup::progress::{scaled, Level, Reporter};
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Container format of a backup archive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum ArchiveFormat {
    #[default]
    #[serde(rename = "zip")]
    #[display("zip")]
    Zip,
    #[serde(rename = "tar.gz")]
    #[display("tar.gz")]
    TarGz,
}

impl ArchiveFormat {
    pub const ALL: [ArchiveFormat; 2] = [ArchiveFormat::Zip, ArchiveFormat::TarGz];

    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::TarGz => "tar.gz",
        }
    }

    /// Detects the format from a file name, ignoring a trailing `.enc`.
    pub fn from_file_name(name: &str) -> Option<ArchiveFormat> {
        let name = name
            .strip_suffix(&format!(".{ENCRYPTED_FILE_EXT}"))
            .unwrap_or(name);
        Self::ALL
            .into_iter()
            .find(|f| name.ends_with(&format!(".{}", f.extension())))
    }
}

impl FileExtProvider for ArchiveFormat {
    fn file_ext(&self) -> Option<Arc<str>> {
        Some(self.extension().into())
    }
}

/// A single file or directory to be written into an archive.
#[derive(Debug)]
pub struct ArchiveEntry {
    /// Path on the filesystem
    pub src: Arc<Path>,
    /// Relative path inside the archive
    pub dst: Arc<Path>,
    pub is_dir: bool,
}

impl ArchiveEntry {
    pub fn file<A: Into<Arc<Path>>, B: Into<Arc<Path>>>(src: A, dst: B) -> ArchiveEntry {
        Self {
            src: src.into(),
            dst: dst.into(),
            is_dir: false,
        }
    }

    pub fn dir<A: Into<Arc<Path>>, B: Into<Arc<Path>>>(src: A, dst: B) -> ArchiveEntry {
        Self {
            src: src.into(),
            dst: dst.into(),
            is_dir: true,
        }
    }

    /// Member name with `/` separators, independent of the host platform.
    pub fn member_name(&self) -> String {
        self.dst
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Writer side of a container format.
pub trait ArchiveSink {
    fn append(&mut self, entry: &ArchiveEntry) -> Result<()>;
    fn finish(self: Box<Self>) -> Result<()>;
}

fn open_sink(format: ArchiveFormat, out: &Path) -> Result<Box<dyn ArchiveSink>> {
    Ok(match format {
        ArchiveFormat::Zip => Box::new(zip_archive::ZipSink::create(out)?),
        ArchiveFormat::TarGz => Box::new(tar_gz::TarGzSink::create(out)?),
    })
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: usize,
    pub skipped_sources: Vec<PathBuf>,
}

/// Builds one archive at `out` from the ordered `sources`.
///
/// Missing sources and unreadable entries are reported as warnings and
/// skipped. Any write failure is fatal and removes the partial archive.
pub fn create_archive(
    sources: &[PathBuf],
    format: ArchiveFormat,
    out: &Path,
    reporter: &Reporter,
) -> Result<ArchiveSummary> {
    let res = write_archive(sources, format, out, reporter);
    if res.is_err() && out.exists() {
        if let Err(e) = std::fs::remove_file(out) {
            tracing::warn!("Removing partial archive {:?} failed: {e}", out);
        }
    }
    res.add_msg(format!("Creating {format} archive {:?}", out))
}

fn write_archive(
    sources: &[PathBuf],
    format: ArchiveFormat,
    out: &Path,
    reporter: &Reporter,
) -> Result<ArchiveSummary> {
    let mut sink = open_sink(format, out)?;
    let mut summary = ArchiveSummary::default();

    for (idx, source) in sources.iter().enumerate() {
        let percent = scaled(10, 30, idx, sources.len());
        let entries = match source_entries(source) {
            Ok(entries) => entries,
            Err(_) => {
                reporter.warn(format!(
                    "Warning: Source path not found: {}. Skipping.",
                    source.display()
                ));
                summary.skipped_sources.push(source.clone());
                continue;
            }
        };

        let mut added = 0usize;
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    reporter.warn(format!("Ignoring unreadable entry under {}: {e}", source.display()));
                    continue;
                }
            };
            sink.append(&entry)?;
            added += 1;
            reporter.report(
                Level::Debug,
                format!("Added {} to archive.", entry.member_name()),
                Some(percent),
            );
        }
        summary.entries += added;
        reporter.info(
            format!("Archived {} ({added} entries).", source.display()),
            scaled(10, 30, idx + 1, sources.len()),
        );
    }

    sink.finish()?;
    Ok(summary)
}

/// Lists the regular files stored in the archive at `path`.
pub fn list_members(path: &Path, format: ArchiveFormat) -> Result<Vec<String>> {
    match format {
        ArchiveFormat::Zip => zip_archive::list_members(path),
        ArchiveFormat::TarGz => tar_gz::list_members(path),
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExtractSummary {
    pub extracted: usize,
    pub skipped: usize,
}

/// Extracts the archive at `path` into `dest` member by member.
///
/// Members whose target already exists are skipped unless `overwrite` is set.
pub fn extract(
    path: &Path,
    format: ArchiveFormat,
    dest: &Path,
    overwrite: bool,
    reporter: &Reporter,
) -> Result<ExtractSummary> {
    match format {
        ArchiveFormat::Zip => zip_archive::extract(path, dest, overwrite, reporter),
        ArchiveFormat::TarGz => tar_gz::extract(path, dest, overwrite, reporter),
    }
}
