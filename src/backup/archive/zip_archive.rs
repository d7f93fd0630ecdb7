use crate::backup::archive::{ArchiveEntry, ArchiveSink, ExtractSummary};
use crate::backup::progress::Reporter;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use std::fs::File;
use std::io::{BufReader, BufWriter, IntoInnerError};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Deflate-compressed zip writer.
pub struct ZipSink {
    writer: ZipWriter<BufWriter<File>>,
    options: SimpleFileOptions,
}

impl ZipSink {
    pub fn create(out: &Path) -> Result<Self> {
        let file = File::create_new(out)?;
        Ok(Self {
            writer: ZipWriter::new(BufWriter::new(file)),
            options: SimpleFileOptions::default().compression_method(CompressionMethod::Deflated),
        })
    }
}

impl ArchiveSink for ZipSink {
    fn append(&mut self, entry: &ArchiveEntry) -> Result<()> {
        let name = entry.member_name();
        if entry.is_dir {
            self.writer.add_directory(name, self.options)?;
            return Ok(());
        }

        let mut src = File::open(&entry.src)?;
        let size = src.metadata()?.len();
        self.writer
            .start_file(name, self.options.large_file(size >= u32::MAX as u64))?;
        std::io::copy(&mut src, &mut self.writer)?;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let file = self
            .writer
            .finish()?
            .into_inner()
            .map_err(IntoInnerError::into_error)?;
        file.sync_all()?;
        Ok(())
    }
}

fn open(path: &Path) -> Result<ZipArchive<BufReader<File>>> {
    let file = File::open(path)?;
    ZipArchive::new(BufReader::new(file))
        .map_err(|e| Error::format(format!("{:?} is not a readable zip archive: {e}", path)))
}

pub fn list_members(path: &Path) -> Result<Vec<String>> {
    let mut archive = open(path)?;
    let mut members = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let file = archive.by_index(i)?;
        if !file.is_dir() {
            members.push(file.name().to_string());
        }
    }
    Ok(members)
}

pub fn extract(
    path: &Path,
    dest: &Path,
    overwrite: bool,
    reporter: &Reporter,
) -> Result<ExtractSummary> {
    let mut archive = open(path)?;
    let mut summary = ExtractSummary::default();

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let name = file.name().to_string();
        let Some(relative) = file.enclosed_name() else {
            reporter.warn(format!("Skipped {name} (path escapes the restore directory)"));
            summary.skipped += 1;
            continue;
        };
        let target = dest.join(relative);

        if !overwrite && target.exists() {
            reporter.debug(format!("Skipped {name} (file exists and overwrite is false)"));
            summary.skipped += 1;
            continue;
        }

        if file.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&target)?;
            std::io::copy(&mut file, &mut out)?;
            #[cfg(unix)]
            if let Some(mode) = file.unix_mode() {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode))?;
            }
        }
        reporter.debug(format!("Extracted {name}"));
        summary.extracted += 1;
    }

    Ok(summary)
}
