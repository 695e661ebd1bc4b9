//! Sorted sets of 32-bit ids (application lists).

use std::sync::Arc;

use tracing::trace;

use crate::error::{ListError, Result};
use crate::fingerprint::ObjectFingerprint;
use crate::objecthash::ObjectHash;

pub struct Uint32List {
    vals: Box<[u32]>,
    membership: Option<(Arc<ObjectHash<Uint32List>>, Box<[u8]>)>,
}

impl Uint32List {
    /// Parse whitespace-separated decimal ids, sharing the result through
    /// `of`'s object-hash when provided.
    pub fn from_text(text: &str, of: Option<ObjectFingerprint<'_, Self>>) -> Result<Arc<Self>> {
        if let Some(of) = &of {
            let fp = of.bytes.unwrap_or_default();
            let magic = of.hash.magic();

            if magic != fp.len() {
                return Err(ListError::FingerprintWidth { expected: magic, got: fp.len() });
            }

            if let Some(existing) = of.hash.find_counted(fp) {
                return Ok(existing);
            }
        }

        let mut vals = Vec::new();

        for token in text.split_ascii_whitespace() {
            let id: u32 = token
                .parse()
                .map_err(|_| ListError::BadId { text: token.chars().take(20).collect() })?;
            vals.push(id);
        }

        if vals.is_empty() {
            return Err(ListError::EmptyList);
        }

        vals.sort_unstable();
        vals.dedup();

        let mut me = Self { vals: vals.into(), membership: None };

        if let Some(of) = of {
            let fp = of.bytes.unwrap_or_default();
            me.membership = Some((Arc::clone(of.hash), fp.into()));
            let arc = Arc::new(me);
            of.hash.insert(fp, &arc);
            return Ok(arc);
        }

        Ok(Arc::new(me))
    }

    pub fn contains(&self, id: u32) -> bool {
        self.vals.binary_search(&id).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.vals.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.vals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vals.is_empty()
    }
}

impl Drop for Uint32List {
    fn drop(&mut self) {
        if let Some((hash, fp)) = self.membership.take() {
            if !hash.forget(&fp, std::ptr::from_ref(self)) {
                trace!("another thread raced to get a reference; leaving the hash alone");
            }
        }
    }
}
