use crate::backup::archive::ArchiveEntry;
use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};

use dyn_iter::{DynIter, IntoDynIterator};
use function_name::named;
use walkdir::{DirEntry, WalkDir};

use std::path::{Path, PathBuf};

/// Walks one source path and yields its archive entries.
///
/// Member names are relative to the parent of `source`, so every member of a
/// source starts with the source's own basename. A missing source is an error
/// for the caller to downgrade into a warning.
#[named]
pub fn source_entries<'a>(source: &Path) -> Result<DynIter<'a, Result<ArchiveEntry>>> {
    if !source.exists() {
        return Err(Error::from(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("source path not found: {:?}", source),
        )));
    }

    let base = source
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| source.to_path_buf());
    tracing::debug!("Walking source {:?} relative to {:?}", source, base);

    let entries = WalkDir::new(source)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(move |res| match res {
            Ok(de) => process_dir_entry(de, &base),
            Err(e) => Some(Err(e.into())),
        })
        .map(move |res| res.add_fn_name(function_path!()));

    Ok(entries.into_dyn_iter())
}

fn process_dir_entry(de: DirEntry, base: &PathBuf) -> Option<Result<ArchiveEntry>> {
    let is_dir = de.file_type().is_dir();
    let p = de.into_path();
    let stripped = match p.strip_prefix(base) {
        Ok(stripped) => stripped.to_path_buf(),
        Err(e) => {
            return Some(Err(Error::from(e).add_msg(format!(
                "Stripping {:?} from {:?} failed",
                base, p
            ))))
        }
    };

    if stripped.as_os_str().is_empty() {
        tracing::trace!("Skipping source root {:?}", p);
        return None;
    }

    let entry = if is_dir {
        ArchiveEntry::dir(p, stripped)
    } else {
        ArchiveEntry::file(p, stripped)
    };
    tracing::trace!("Including: {:?} -> {:?}", entry.src, entry.dst);
    Some(Ok(entry))
}
