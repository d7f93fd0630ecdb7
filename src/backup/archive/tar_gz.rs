use crate::backup::archive::{ArchiveEntry, ArchiveSink, ExtractSummary};
use crate::backup::progress::Reporter;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufReader, BufWriter, IntoInnerError, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

static GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Gzip compressed TAR writer.
pub struct TarGzSink {
    builder: tar::Builder<GzEncoder<BufWriter<File>>>,
}

impl TarGzSink {
    pub fn create(out: &Path) -> Result<Self> {
        let file = File::create_new(out)?;
        let mut builder =
            tar::Builder::new(GzEncoder::new(BufWriter::new(file), Compression::default()));
        builder.follow_symlinks(true);
        Ok(Self { builder })
    }
}

impl ArchiveSink for TarGzSink {
    fn append(&mut self, entry: &ArchiveEntry) -> Result<()> {
        let name = entry.member_name();
        if entry.is_dir {
            self.builder.append_dir(&name, &entry.src)?;
        } else {
            self.builder.append_path_with_name(&entry.src, &name)?;
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let file = self
            .builder
            .into_inner()?
            .finish()?
            .into_inner()
            .map_err(IntoInnerError::into_error)?;
        file.sync_all()?;
        Ok(())
    }
}

fn corrupt(path: &Path) -> impl Fn(std::io::Error) -> Error + '_ {
    move |e| Error::format(format!("{:?} is not a readable tar.gz archive: {e}", path))
}

fn open(path: &Path) -> Result<tar::Archive<GzDecoder<BufReader<File>>>> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 2];
    file.read_exact(&mut magic).map_err(corrupt(path))?;
    if magic != GZIP_MAGIC {
        return Err(Error::format(format!(
            "{:?} is not a readable tar.gz archive: missing gzip header",
            path
        )));
    }
    file.seek(SeekFrom::Start(0))?;
    Ok(tar::Archive::new(GzDecoder::new(BufReader::new(file))))
}

pub fn list_members(path: &Path) -> Result<Vec<String>> {
    let mut archive = open(path)?;
    let mut members = Vec::new();
    for entry in archive.entries().map_err(corrupt(path))? {
        let entry = entry.map_err(corrupt(path))?;
        if entry.header().entry_type().is_file() {
            members.push(entry.path().map_err(corrupt(path))?.to_string_lossy().into_owned());
        }
    }
    Ok(members)
}

/// Location of `member` below the restore directory, or `None` when it
/// climbs out of it.
fn enclosed(member: &Path) -> Option<PathBuf> {
    let mut relative = PathBuf::new();
    for component in member.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => return None,
        }
    }
    Some(relative)
}

pub fn extract(
    path: &Path,
    dest: &Path,
    overwrite: bool,
    reporter: &Reporter,
) -> Result<ExtractSummary> {
    let mut archive = open(path)?;
    let mut summary = ExtractSummary::default();
    std::fs::create_dir_all(dest)?;

    for entry in archive.entries().map_err(corrupt(path))? {
        let mut entry = entry.map_err(corrupt(path))?;
        let member = entry.path().map_err(corrupt(path))?.into_owned();
        let name = member.to_string_lossy().into_owned();

        let Some(relative) = enclosed(&member) else {
            reporter.warn(format!("Skipped {name} (path escapes the restore directory)"));
            summary.skipped += 1;
            continue;
        };

        if !overwrite && dest.join(&relative).exists() {
            reporter.debug(format!("Skipped {name} (file exists and overwrite is false)"));
            summary.skipped += 1;
            continue;
        }

        if entry.unpack_in(dest)? {
            reporter.debug(format!("Extracted {name}"));
            summary.extracted += 1;
        } else {
            reporter.warn(format!("Skipped {name} (path escapes the restore directory)"));
            summary.skipped += 1;
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::progress::tests::collecting;
    use crate::backup::progress::Level;
    use crate::backup::result_error::error::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn test_tar_gz_sink_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("dir")).unwrap();
        std::fs::write(temp_dir.path().join("dir/a.txt"), "alpha").unwrap();
        let out = temp_dir.path().join("out.tar.gz");

        let mut sink = Box::new(TarGzSink::create(&out).unwrap());
        sink.append(&ArchiveEntry::dir(
            temp_dir.path().join("dir").as_path(),
            Path::new("dir"),
        ))
        .unwrap();
        sink.append(&ArchiveEntry::file(
            temp_dir.path().join("dir/a.txt").as_path(),
            Path::new("dir/a.txt"),
        ))
        .unwrap();
        sink.finish().unwrap();

        assert_eq!(list_members(&out).unwrap(), vec!["dir/a.txt"]);

        let dest = temp_dir.path().join("restore");
        let summary = extract(&out, &dest, false, &Reporter::silent()).unwrap();
        assert_eq!(summary, ExtractSummary { extracted: 2, skipped: 0 });
        assert_eq!(std::fs::read_to_string(dest.join("dir/a.txt")).unwrap(), "alpha");
    }

    #[test]
    fn test_escaping_member_skipped_even_when_outside_file_exists() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("evil.tar.gz");
        {
            let file = File::create(&out).unwrap();
            let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
            let data = b"pwned";
            let name = b"../outside.txt";
            let mut header = tar::Header::new_gnu();
            header.as_old_mut().name[..name.len()].copy_from_slice(name);
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_entry_type(tar::EntryType::Regular);
            header.set_cksum();
            builder.append(&header, &data[..]).unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }
        let dest = temp_dir.path().join("dest");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(temp_dir.path().join("outside.txt"), "original").unwrap();
        let (reporter, events) = collecting();

        let summary = extract(&out, &dest, false, &reporter).unwrap();

        assert_eq!(summary, ExtractSummary { extracted: 0, skipped: 1 });
        assert_eq!(
            std::fs::read_to_string(temp_dir.path().join("outside.txt")).unwrap(),
            "original"
        );
        assert!(events
            .lock()
            .unwrap()
            .iter()
            .any(|e| e.level == Level::Warning && e.message.contains("escapes")));
    }

    #[test]
    fn test_short_file_is_format_error() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("short.tar.gz");
        std::fs::write(&out, [0x1f]).unwrap();

        assert_eq!(list_members(&out).unwrap_err().kind(), ErrorKind::Format);
    }
}
