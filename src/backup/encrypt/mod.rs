//! Passphrase based authenticated encryption of whole artifacts.
//!
//! An envelope is laid out as `salt[16] || nonce[12] || tag[16] || ciphertext`.
//! The key is derived with PBKDF2-HMAC-SHA256 from the passphrase and the
//! embedded salt, then used for AES-256-GCM without associated data.

use crate::backup::function_path;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{AeadInPlace, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce, Tag};
use function_name::named;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use zeroize::Zeroizing;

pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const HEADER_LEN: usize = SALT_LEN + NONCE_LEN + TAG_LEN;
pub const KEY_LEN: usize = 32;
pub const PBKDF2_ITERATIONS: u32 = 100_000;

fn derive_cipher(passphrase: &RedactedString, salt: &[u8]) -> Aes256Gcm {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key[..]);
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key[..]))
}

/// Seals `plaintext` into a fresh envelope with a random salt and nonce.
pub fn encrypt(plaintext: &[u8], passphrase: &RedactedString) -> Result<Vec<u8>> {
    if passphrase.is_empty() {
        return Err(Error::config("encryption passphrase is empty"));
    }
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce);
    let cipher = derive_cipher(passphrase, &salt);

    let mut body = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&nonce), b"", &mut body)
        .map_err(|e| Error::integrity(format!("AES-GCM encryption failed: {e}")))?;

    let mut envelope = Vec::with_capacity(HEADER_LEN + body.len());
    envelope.extend_from_slice(&salt);
    envelope.extend_from_slice(&nonce);
    envelope.extend_from_slice(&tag);
    envelope.extend_from_slice(&body);
    Ok(envelope)
}

/// Opens an envelope produced by [`encrypt`].
///
/// Fails with a format error when the input is too short to hold the header,
/// and with an integrity error when the tag does not verify. No plaintext is
/// returned in either case.
pub fn decrypt(envelope: &[u8], passphrase: &RedactedString) -> Result<Vec<u8>> {
    if envelope.len() < HEADER_LEN {
        return Err(Error::format(format!(
            "encrypted data is {} bytes, shorter than the {HEADER_LEN} byte header",
            envelope.len()
        )));
    }
    let (salt, rest) = envelope.split_at(SALT_LEN);
    let (nonce, rest) = rest.split_at(NONCE_LEN);
    let (tag, ciphertext) = rest.split_at(TAG_LEN);

    let cipher = derive_cipher(passphrase, salt);
    let mut body = Zeroizing::new(ciphertext.to_vec());
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(nonce),
            b"",
            body.as_mut_slice(),
            Tag::from_slice(tag),
        )
        .map_err(|_| Error::integrity("wrong passphrase or corrupted data"))?;
    Ok(body.to_vec())
}

fn write_new(dst: &Path, data: &[u8]) -> Result<()> {
    let mut file = File::create_new(dst)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}

#[named]
pub fn encrypt_file(src: &Path, dst: &Path, passphrase: &RedactedString) -> Result<()> {
    tracing::debug!("Encrypting {:?} into {:?}", src, dst);
    std::fs::read(src)
        .map_err(Error::from)
        .and_then(|plaintext| encrypt(&Zeroizing::new(plaintext), passphrase))
        .and_then(|envelope| write_new(dst, &envelope))
        .add_msg(format!("Encrypting {:?}", src))
        .add_fn_name(function_path!())
}

#[named]
pub fn decrypt_file(src: &Path, dst: &Path, passphrase: &RedactedString) -> Result<()> {
    tracing::debug!("Decrypting {:?} into {:?}", src, dst);
    std::fs::read(src)
        .map_err(Error::from)
        .and_then(|envelope| decrypt(&envelope, passphrase))
        .map(Zeroizing::new)
        .and_then(|plaintext| write_new(dst, &plaintext))
        .add_msg(format!("Decrypting {:?}", src))
        .add_fn_name(function_path!())
}
