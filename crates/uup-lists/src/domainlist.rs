//! Reversed-name domain lists.
//!
//! A domain list is one contiguous buffer of names stored label-reversed
//! and lowercased (`www.example.com` → `moc.elpmaxe.www`), NUL-separated,
//! plus a sorted array of offsets into that buffer. The comparator orders
//! `.` between NUL and every other byte, so `d.c` < `d.c.anything` and a
//! single binary search answers both exact and subdomain membership.
//! Unless a list is loaded exact, nested subdomains are collapsed into
//! their parents at build time.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::trace;

use crate::dnsname::{reversed_key, DNS_TOHOST};
use crate::error::{ListError, Result};
use crate::fingerprint::ObjectFingerprint;
use crate::objecthash::ObjectHash;
use crate::xray::Xray;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MatchKind {
    Exact,
    Subdomain,
}

#[derive(Clone, Copy, Default, Debug)]
pub struct DomainListFlags {
    /// Each line may hold at most one name.
    pub linefeed_required: bool,
    /// Blank out entries with invalid bytes instead of failing the load.
    pub ignore_junk: bool,
    /// An input with no names builds an empty list instead of failing.
    pub allow_empty: bool,
    /// Cut each entry at its first `/` (URL input folded to hostnames).
    pub trim_urls: bool,
    /// Keep nested subdomains; match returns the longest suffix.
    pub exact: bool,
}

impl DomainListFlags {
    pub fn exact() -> Self {
        Self { exact: true, ..Self::default() }
    }
}

/// Name offsets sized to the bundle: 1, 2 or 4 bytes per entry.
///
/// Hundreds of thousands of small lists stay resident at once; the narrow
/// offsets are what make that fit.
enum Offsets {
    U8(Box<[u8]>),
    U16(Box<[u16]>),
    U32(Box<[u32]>),
}

impl Offsets {
    fn from_sorted(offsets: &[usize], bundle_len: usize) -> Self {
        if bundle_len < 256 {
            Self::U8(offsets.iter().map(|&o| o as u8).collect())
        } else if bundle_len < 65_536 {
            Self::U16(offsets.iter().map(|&o| o as u16).collect())
        } else {
            Self::U32(offsets.iter().map(|&o| o as u32).collect())
        }
    }

    fn get(&self, i: usize) -> usize {
        match self {
            Self::U8(v) => v[i] as usize,
            Self::U16(v) => v[i] as usize,
            Self::U32(v) => v[i] as usize,
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::U8(v) => v.len(),
            Self::U16(v) => v.len(),
            Self::U32(v) => v.len(),
        }
    }

    pub fn width(&self) -> usize {
        match self {
            Self::U8(_) => 1,
            Self::U16(_) => 2,
            Self::U32(_) => 4,
        }
    }
}

enum MembershipKey {
    Fingerprint(Box<[u8]>),
    Content,
}

struct Membership {
    hash: Arc<ObjectHash<DomainList>>,
    key: MembershipKey,
}

pub struct DomainList {
    bundle: Box<[u8]>,
    offsets: Offsets,
    exact: bool,
    membership: Option<Membership>,
}

/// Compare a reversed key against a reversed member name.
///
/// `.` orders between NUL and any other byte, and under `subdomain` a key
/// that consumes the whole member and stops at a label boundary compares
/// equal. An empty member is a root entry and matches every key.
///
/// Public because the application super-index sorts and probes with the
/// same ordering.
pub fn cmp_reversed(key: &[u8], member: &[u8], subdomain: bool) -> Ordering {
    if subdomain && member.is_empty() {
        return Ordering::Equal;
    }

    let mut i = 0;

    while i < key.len() && i < member.len() && key[i] == member[i] {
        i += 1;
    }

    let k = key.get(i).copied();
    let m = member.get(i).copied();

    if subdomain && k == Some(b'.') && m.is_none() {
        return Ordering::Equal;
    }

    let kb = k.unwrap_or(0);
    let mb = m.unwrap_or(0);

    if kb == b'.' && mb != b'.' {
        1.cmp(&mb)
    } else if kb != b'.' && mb == b'.' {
        kb.cmp(&1)
    } else {
        kb.cmp(&mb)
    }
}

/// Normalize and reverse the names in a whitespace-separated buffer.
fn parse_names(buf: &[u8], flags: DomainListFlags) -> Result<Vec<Vec<u8>>> {
    let mut names = Vec::new();
    let mut line_start = 0;

    for line in buf.split(|&b| b == b'\n') {
        let mut token_start = None;
        let mut seen_token_on_line = false;
        let mut i = 0;

        while i <= line.len() {
            let at_space = i == line.len() || line[i].is_ascii_whitespace();

            if at_space {
                if let Some(start) = token_start.take() {
                    if flags.linefeed_required && seen_token_on_line {
                        return Err(ListError::EmbeddedWhitespace { offset: line_start + start });
                    }

                    seen_token_on_line = true;
                    let token = &line[start..i];
                    let token = if flags.trim_urls {
                        &token[..token.iter().position(|&b| b == b'/').unwrap_or(token.len())]
                    } else {
                        token
                    };

                    let mut mapped = Vec::with_capacity(token.len());
                    let mut junk = false;

                    for (pos, &b) in token.iter().enumerate() {
                        match DNS_TOHOST[b as usize] {
                            0 => {
                                if !flags.ignore_junk {
                                    return Err(ListError::InvalidDomainByte {
                                        offset: line_start + start + pos,
                                        byte: b,
                                    });
                                }
                                trace!("Ignoring junk domain at offset {}", line_start + start);
                                junk = true;
                                break;
                            }
                            mapped_byte => mapped.push(mapped_byte),
                        }
                    }

                    if !junk && !token.is_empty() {
                        // Strip leading and trailing dots, then reverse.
                        let begin = mapped.iter().position(|&b| b != b'.').unwrap_or(mapped.len());
                        let end = mapped.iter().rposition(|&b| b != b'.').map_or(begin, |p| p + 1);
                        let mut name = mapped[begin..end].to_vec();
                        name.reverse();
                        names.push(name);
                    }
                }
            } else if token_start.is_none() {
                token_start = Some(i);
            }

            i += 1;
        }

        line_start += line.len() + 1;
    }

    if names.is_empty() && !flags.allow_empty {
        return Err(ListError::EmptyList);
    }

    Ok(names)
}

impl DomainList {
    /// Parse a whitespace-separated name buffer into a list, sharing the
    /// result through `of`'s object-hash when provided.
    pub fn from_buffer(
        buf: &[u8],
        flags: DomainListFlags,
        of: Option<ObjectFingerprint<'_, Self>>,
    ) -> Result<Arc<Self>> {
        if let Some(of) = &of {
            if let Some(fp) = of.bytes {
                let magic = of.hash.magic();

                if magic != fp.len() {
                    return Err(ListError::FingerprintWidth { expected: magic, got: fp.len() });
                }

                if let Some(existing) = of.hash.find_counted(fp) {
                    return Ok(existing);
                }
            } else if of.hash.magic() != 0 {
                return Err(ListError::FingerprintWidth { expected: of.hash.magic(), got: 0 });
            }
        }

        let names = parse_names(buf, flags)?;
        let mut offsets = Vec::with_capacity(names.len());
        let mut bundle = Vec::new();

        for name in &names {
            offsets.push(bundle.len());
            bundle.extend_from_slice(name);
            bundle.push(0);
        }

        offsets.sort_by(|&a, &b| {
            cmp_reversed(name_at(&bundle, a), name_at(&bundle, b), false)
        });

        if !flags.exact {
            // Drop any entry whose predecessor is a label-boundary prefix.
            let mut kept = 0;

            for j in 1..offsets.len() {
                if cmp_reversed(name_at(&bundle, offsets[j]), name_at(&bundle, offsets[kept]), true)
                    != Ordering::Equal
                {
                    kept += 1;
                    offsets[kept] = offsets[j];
                }
            }

            offsets.truncate(if offsets.is_empty() { 0 } else { kept + 1 });
        }

        let bundle: Box<[u8]> = bundle.into();
        let mut me = Self {
            offsets: Offsets::from_sorted(&offsets, bundle.len()),
            bundle,
            exact: flags.exact,
            membership: None,
        };

        if let Some(of) = of {
            match of.bytes {
                Some(fp) => {
                    me.membership = Some(Membership {
                        hash: Arc::clone(of.hash),
                        key: MembershipKey::Fingerprint(fp.into()),
                    });
                }
                None => {
                    // Content-keyed: another thread (or an earlier load)
                    // may already hold an identical list.
                    if let Some(existing) = of.hash.find_counted(&me.bundle) {
                        return Ok(existing);
                    }

                    me.membership = Some(Membership {
                        hash: Arc::clone(of.hash),
                        key: MembershipKey::Content,
                    });
                }
            }
        }

        let arc = Arc::new(me);

        if let Some(m) = &arc.membership {
            let key: &[u8] = match &m.key {
                MembershipKey::Fingerprint(fp) => fp,
                MembershipKey::Content => &arc.bundle,
            };
            m.hash.insert(key, &arc);
        }

        Ok(arc)
    }

    /// Number of names in the list.
    pub fn name_count(&self) -> usize {
        self.offsets.len()
    }

    /// Bundle offset of the i-th name in sorted order; the application
    /// super-index stores these.
    pub fn name_offset(&self, i: usize) -> usize {
        self.offsets.get(i)
    }

    /// The reversed, lowercased name starting at a bundle offset.
    pub fn name_bytes_at(&self, offset: usize) -> &[u8] {
        name_at(&self.bundle, offset)
    }

    /// Bytes of backing storage (diagnostics / size accounting).
    pub fn bundle_len(&self) -> usize {
        self.bundle.len()
    }

    /// Width in bytes of one stored offset (1, 2 or 4).
    pub fn offset_width(&self) -> usize {
        self.offsets.width()
    }

    /// Match a wire-format name against the list.
    ///
    /// Returns the byte offset within `name` of the label boundary where
    /// the matched entry begins. On exact-loaded lists searched with
    /// [`MatchKind::Subdomain`], adjacent sort order is walked forward to
    /// return the *longest* matching entry.
    pub fn matches(
        &self,
        name: &[u8],
        kind: MatchKind,
        x: Option<&dyn Xray>,
        listname: &str,
    ) -> Option<usize> {
        let key = reversed_key(name)?;
        let subdomain = kind == MatchKind::Subdomain;

        let mut lo = 0;
        let mut hi = self.offsets.len();
        let mut found = None;

        while lo < hi {
            let mid = (lo + hi) / 2;
            match cmp_reversed(&key, self.name_bytes_at(self.offsets.get(mid)), subdomain) {
                Ordering::Less => hi = mid,
                Ordering::Greater => lo = mid + 1,
                Ordering::Equal => {
                    found = Some(mid);
                    break;
                }
            }
        }

        let idx = found?;
        let mut matched = self.name_bytes_at(self.offsets.get(idx));

        if self.exact && subdomain {
            // bsearch found an arbitrary match; the best (longest) match
            // is adjacent in sort order, past entries sharing the prefix.
            for next in idx + 1..self.offsets.len() {
                let candidate = self.name_bytes_at(self.offsets.get(next));

                if cmp_reversed(&key, candidate, true) == Ordering::Equal {
                    matched = candidate;
                    continue;
                }

                let mut i = 0;

                while i < candidate.len() && i < key.len() && candidate[i] == key[i] {
                    i += 1;
                }

                let cmp = match (candidate.get(i), key.get(i)) {
                    (Some(a), Some(b)) => a.cmp(b),
                    _ => Ordering::Equal,
                };

                // A longer shared prefix means a better match may still
                // follow; anything else ends the scan.
                if i > matched.len() && cmp != Ordering::Greater {
                    continue;
                }

                break;
            }
        }

        let offset = key.len() + usize::from(matched.is_empty())
            - usize::from(key.is_empty())
            - matched.len();

        if let Some(x) = x {
            x.append(format_args!(
                "{listname} match: found {} ({})",
                String::from_utf8_lossy(&{
                    let mut m = matched.to_vec();
                    m.reverse();
                    m
                }),
                if subdomain { "subdomain" } else { "exact" }
            ));
        }

        Some(offset)
    }

    /// Names in storage (reversed-sort) order, re-reversed and joined by
    /// spaces.
    pub fn to_ascii(&self) -> String {
        let mut out = String::new();

        for i in 0..self.offsets.len() {
            if i > 0 {
                out.push(' ');
            }

            let mut name = self.name_bytes_at(self.offsets.get(i)).to_vec();
            name.reverse();
            out.push_str(&String::from_utf8_lossy(&name));
        }

        out
    }

    /// Names in plain lexical order, joined by spaces (diagnostics).
    pub fn to_sorted_ascii(&self) -> String {
        let mut names: Vec<Vec<u8>> = (0..self.offsets.len())
            .map(|i| {
                let mut n = self.name_bytes_at(self.offsets.get(i)).to_vec();
                n.reverse();
                n
            })
            .collect();

        names.sort();

        let mut out = String::new();

        for (i, name) in names.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(&String::from_utf8_lossy(name));
        }

        out
    }
}

fn name_at(bundle: &[u8], offset: usize) -> &[u8] {
    let end = bundle[offset..]
        .iter()
        .position(|&b| b == 0)
        .map_or(bundle.len(), |p| offset + p);
    &bundle[offset..end]
}

impl Drop for DomainList {
    fn drop(&mut self) {
        if let Some(m) = self.membership.take() {
            let key: &[u8] = match &m.key {
                MembershipKey::Fingerprint(fp) => fp,
                MembershipKey::Content => &self.bundle,
            };

            if !m.hash.forget(key, std::ptr::from_ref(self)) {
                trace!("another thread raced to get a reference; leaving the hash alone");
            }
        }
    }
}
