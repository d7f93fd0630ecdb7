use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Lowercase hex SHA-256 of everything `reader` yields.
pub fn sha256_reader<R: Read>(mut reader: R) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn sha256_file(path: &Path) -> Result<String> {
    File::open(path)
        .and_then(sha256_reader)
        .map_err(Into::into)
        .add_msg(format!("Hashing {:?}", path))
}
