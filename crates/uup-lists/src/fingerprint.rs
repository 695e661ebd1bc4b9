//! List fingerprints.
//!
//! A fingerprint is a stable hash of a list's source text, authored by the
//! tooling that writes preference files. Fingerprint identity implies list
//! identity, which is what lets the object-hash share one parsed list
//! across thousands of org segments.

use std::fmt;
use std::sync::Arc;

use crate::objecthash::ObjectHash;

/// Maximum fingerprint width accepted from preference files (up to SHA512).
pub const FINGERPRINT_MAX_BYTES: usize = 64;

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(Box<[u8]>);

impl Fingerprint {
    pub fn new(bytes: &[u8]) -> Self {
        Self(bytes.into())
    }

    /// Parse an even-length hex string, rejecting anything longer than
    /// [`FINGERPRINT_MAX_BYTES`].
    pub fn from_hex(text: &str) -> Option<Self> {
        if text.is_empty() || text.len() % 2 != 0 || text.len() / 2 > FINGERPRINT_MAX_BYTES {
            return None;
        }

        hex::decode(text).ok().map(|b| Self(b.into()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", hex::encode(&self.0))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

/// A fingerprint paired with the object-hash it addresses.
///
/// List constructors take one of these to opt in to de-duplication.
/// `bytes` of `None` selects content keying: the hash must have magic 0
/// and the list's own normalized body becomes its key.
pub struct ObjectFingerprint<'a, T> {
    pub hash: &'a Arc<ObjectHash<T>>,
    pub bytes: Option<&'a [u8]>,
}

impl<'a, T> ObjectFingerprint<'a, T> {
    pub fn new(hash: &'a Arc<ObjectHash<T>>, bytes: &'a [u8]) -> Self {
        Self { hash, bytes: Some(bytes) }
    }

    pub fn by_content(hash: &'a Arc<ObjectHash<T>>) -> Self {
        Self { hash, bytes: None }
    }
}
