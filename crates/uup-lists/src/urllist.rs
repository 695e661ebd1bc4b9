//! URL lists.
//!
//! A url list is a size-hinted hash table of normalized URL prefixes.
//! Matching is progressive: the query is tested prefix by prefix at each
//! path boundary (the first `/` included, later ones excluded), then at
//! the query boundary, then whole.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::{ListError, Result};
use crate::fingerprint::ObjectFingerprint;
use crate::objecthash::ObjectHash;
use crate::urlnorm::{self, NormalizeOutcome};

// Hash size is the input length over this; a magical constant tuned to
// observed average URL lengths.
const AVERAGE_URL_LENGTH: usize = 100;

#[derive(Clone, Copy, Default, Debug)]
pub struct UrlListFlags {
    /// Each line may hold at most one URL.
    pub linefeed_required: bool,
    /// An input with no URLs builds an empty list instead of failing.
    pub allow_empty: bool,
    /// Fail the load on a URL that truncates or fails to normalize.
    pub strict: bool,
}

struct Bucket {
    hash_key: u32,
    url: Box<[u8]>,
    next: Option<Box<Bucket>>,
}

pub struct UrlList {
    slots: Box<[Option<Box<Bucket>>]>,
    count: usize,
    membership: Option<(Arc<ObjectHash<UrlList>>, Box<[u8]>)>,
}

fn fnv04(buf: &[u8]) -> u32 {
    let mut hash = 0x811c_9dc5_u32;

    for &b in buf {
        hash = (hash ^ u32::from(b)).wrapping_mul(0x0100_0193);
    }

    hash = hash.wrapping_add(hash << 13);
    hash ^= hash >> 7;
    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 17;
    hash = hash.wrapping_add(hash << 5);
    hash
}

impl UrlList {
    /// Parse a whitespace-separated URL buffer, sharing the result
    /// through `of`'s object-hash when provided.
    pub fn from_buffer(
        buf: &[u8],
        flags: UrlListFlags,
        of: Option<ObjectFingerprint<'_, Self>>,
    ) -> Result<Arc<Self>> {
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

        let mut me = Self::parse(buf, flags)?;

        if let Some(of) = of {
            let fp = of.bytes.unwrap_or_default();
            me.membership = Some((Arc::clone(of.hash), fp.into()));
            let arc = Arc::new(me);
            of.hash.insert(fp, &arc);
            return Ok(arc);
        }

        Ok(Arc::new(me))
    }

    fn parse(buf: &[u8], flags: UrlListFlags) -> Result<Self> {
        let slots = (buf.len() / AVERAGE_URL_LENGTH).max(1);
        let mut me = Self {
            slots: (0..slots).map(|_| None).collect(),
            count: 0,
            membership: None,
        };

        let mut normalized = Vec::new();
        let mut any = false;
        let mut line_start = 0;
        let mut max_depth = 0;

        for line in buf.split(|&b| b == b'\n') {
            let mut seen_token_on_line = false;
            let mut i = 0;

            while i < line.len() {
                if line[i].is_ascii_whitespace() {
                    i += 1;
                    continue;
                }

                let start = i;

                while i < line.len() && !line[i].is_ascii_whitespace() {
                    i += 1;
                }

                if flags.linefeed_required && seen_token_on_line {
                    return Err(ListError::OneUrlPerLine { offset: line_start + start });
                }

                seen_token_on_line = true;
                any = true;
                normalized.clear();

                match urlnorm::normalize(&line[start..i], &mut normalized) {
                    Ok(NormalizeOutcome::Ok) => {}
                    Ok(NormalizeOutcome::Truncated) => {
                        debug!(offset = line_start + start, "URL was truncated during normalization");

                        if flags.strict {
                            return Err(ListError::UrlTruncated { offset: line_start + start });
                        }
                    }
                    Err(_) => {
                        debug!(offset = line_start + start, "URL failed to normalize");

                        if flags.strict {
                            return Err(ListError::UrlNormalize { offset: line_start + start });
                        }

                        continue;
                    }
                }

                max_depth = max_depth.max(me.add(&normalized));
            }

            line_start += line.len() + 1;
        }

        if !any && !flags.allow_empty {
            return Err(ListError::EmptyList);
        }

        trace!(max_depth, "url list loaded");
        Ok(me)
    }

    /// Add a normalized URL unless an existing entry already covers it.
    /// Returns the depth of the bucket chain appended to (0 = discarded).
    fn add(&mut self, url: &[u8]) -> usize {
        if self.matches(url) != 0 {
            trace!("discarding URL, match found");
            return 0;
        }

        let key = fnv04(url);
        let slot = (key as usize) % self.slots.len();
        let mut depth = 1;
        let bucket = Box::new(Bucket { hash_key: key, url: url.into(), next: None });

        let mut cur = &mut self.slots[slot];

        while let Some(existing) = cur {
            depth += 1;
            cur = &mut existing.next;
        }

        *cur = Some(bucket);
        self.count += 1;
        depth
    }

    fn find(&self, url: &[u8]) -> bool {
        let key = fnv04(url);
        let mut cur = &self.slots[(key as usize) % self.slots.len()];

        while let Some(bucket) = cur {
            if bucket.hash_key == key && *bucket.url == *url {
                return true;
            }
            cur = &bucket.next;
        }

        false
    }

    /// Progressive prefix match.
    ///
    /// `url` must already be in normal form. Returns 0 on no match, or
    /// the length of the matching stored URL.
    pub fn matches(&self, url: &[u8]) -> usize {
        let mut first_slash = 1usize;

        for (i, &b) in url.iter().enumerate() {
            if b == b'/' {
                if self.find(&url[..i + first_slash]) {
                    return i + first_slash;
                }

                first_slash = 0;
            }

            if b == b'?' {
                if self.find(&url[..i]) {
                    return i;
                }

                break;
            }
        }

        if self.find(url) {
            return url.len();
        }

        0
    }

    /// Number of stored URLs.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl Drop for UrlList {
    fn drop(&mut self) {
        if let Some((hash, fp)) = self.membership.take() {
            if !hash.forget(&fp, std::ptr::from_ref(self)) {
                trace!("another thread raced to get a reference; leaving the hash alone");
            }
        }
    }
}
