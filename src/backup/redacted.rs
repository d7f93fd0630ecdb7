//! Secret strings (encryption passphrases, transfer passwords) that never
//! show up in logs, debug output or re-serialized job descriptors.

use bon::Builder;
use derive_more::From;
use getset::Getters;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Debug, Formatter};
use std::result;
use zeroize::Zeroize;

/// Placeholder text shown instead of the actual secret
pub static REDACTED_SECRET: &str = "###REDACTED_SECRET###";

/// A string that is redacted in debug output and serialization and zeroed
/// on drop.
#[derive(Clone, Zeroize, From, Builder, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct RedactedString {
    #[builder(into)]
    inner: String,
}

impl RedactedString {
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.inner.as_bytes()
    }
}

impl From<&str> for RedactedString {
    fn from(value: &str) -> Self {
        RedactedString::builder().inner(value).build()
    }
}

impl Debug for RedactedString {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", REDACTED_SECRET)
    }
}

impl Serialize for RedactedString {
    fn serialize<S: Serializer>(&self, serializer: S) -> result::Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED_SECRET)
    }
}

impl<'de> Deserialize<'de> for RedactedString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(RedactedString::from)
    }
}

impl Drop for RedactedString {
    fn drop(&mut self) {
        self.zeroize();
    }
}
