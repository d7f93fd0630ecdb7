use std::sync::Arc;

/// Extension appended to encrypted artifacts, after the archive extension.
pub static ENCRYPTED_FILE_EXT: &str = "enc";

pub trait FileExtProvider {
    fn file_ext(&self) -> Option<Arc<str>>;
}
