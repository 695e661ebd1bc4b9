//! CIDR lists.
//!
//! Two independently sorted arrays (IPv4 and IPv6) searched with a
//! full-mask binary probe. Lists are boolean, so overlapping input ranges
//! are reduced to the widest one; after reduction the arrays are disjoint
//! and the probe lands on the narrowest enclosing range directly.

use std::net::IpAddr;
use std::sync::Arc;

use rand::seq::SliceRandom;
use tracing::trace;

use crate::cidr::{Cidr, CidrParse, CidrV4, CidrV6, CIDR_MATCH_ALL};
use crate::error::{ListError, Result};
use crate::fingerprint::ObjectFingerprint;
use crate::objecthash::ObjectHash;
use crate::xray::Xray;

pub struct CidrList {
    how: CidrParse,
    in4: Vec<CidrV4>,
    in6: Vec<CidrV6>,
    membership: Option<(Arc<ObjectHash<CidrList>>, Box<[u8]>)>,
}

impl CidrList {
    pub fn new(how: CidrParse) -> Self {
        Self { how, in4: Vec::new(), in6: Vec::new(), membership: None }
    }

    /// Parse addresses from the front of `text`, stopping at the first
    /// byte that is neither a delimiter nor parseable. Returns the list
    /// and the number of bytes consumed; the caller decides whether a
    /// partial parse is an error.
    pub fn from_string(
        text: &str,
        delims: &str,
        how: CidrParse,
        of: Option<ObjectFingerprint<'_, Self>>,
    ) -> Result<(Arc<Self>, usize)> {
        if let Some(of) = &of {
            let fp = of.bytes.unwrap_or_default();
            let magic = of.hash.magic();

            if magic != fp.len() {
                return Err(ListError::FingerprintWidth { expected: magic, got: fp.len() });
            }

            if let Some(existing) = of.hash.find_counted(fp) {
                // The fingerprint vouches for the whole input.
                return Ok((existing, text.len()));
            }
        }

        let mut me = Self::new(how);
        let consumed = me.add_from_string(text, delims);

        if me.in4.is_empty() && me.in6.is_empty() {
            return Err(ListError::EmptyList);
        }

        me.finish();

        if let Some(of) = of {
            let fp = of.bytes.unwrap_or_default();
            me.membership = Some((Arc::clone(of.hash), fp.into()));
            let arc = Arc::new(me);
            of.hash.insert(fp, &arc);
            return Ok((arc, consumed));
        }

        Ok((Arc::new(me), consumed))
    }

    /// Parse a whole buffer of addresses; any unconsumed byte is an
    /// error.
    pub fn from_buffer(buf: &str, how: CidrParse) -> Result<Arc<Self>> {
        let mut me = Self::new(how);
        let consumed = me.add_from_string(buf, ", \t\r\n");

        if consumed != buf.len() {
            return Err(ListError::BadAddress {
                text: buf[consumed..].chars().take(40).collect(),
            });
        }

        if me.in4.is_empty() && me.in6.is_empty() {
            return Err(ListError::EmptyList);
        }

        me.finish();
        Ok(Arc::new(me))
    }

    /// Add addresses until the input stops parsing; returns bytes
    /// consumed.
    pub fn add_from_string(&mut self, text: &str, delims: &str) -> usize {
        let mut pos = 0;

        loop {
            while pos < text.len() && text[pos..].starts_with(|c| delims.contains(c)) {
                pos += text[pos..].chars().next().map_or(1, char::len_utf8);
            }

            if pos >= text.len() {
                return pos;
            }

            match Cidr::scan(&text[pos..], self.how) {
                Some((Cidr::V4(c), used)) => {
                    self.in4.push(c);
                    pos += used;
                }
                Some((Cidr::V6(c), used)) => {
                    self.in6.push(c);
                    pos += used;
                }
                None => return pos,
            }
        }
    }

    /// Append another list's ranges; call [`finish`](Self::finish) after
    /// the last append.
    pub fn append(&mut self, other: &CidrList) {
        self.in4.extend_from_slice(&other.in4);
        self.in6.extend_from_slice(&other.in6);
    }

    /// Sort and reduce collisions.
    ///
    /// Already-sorted input skips the sort pass; the reduction scan always
    /// runs so contained ranges are dropped no matter how they arrived.
    pub fn finish(&mut self) {
        if !self.in4.is_sorted_by(|a, b| a.sort_cmp(b).is_lt()) {
            self.in4.sort_by(CidrV4::sort_cmp);
        }

        self.in4.dedup_by(|next, prev| prev.collides(next));

        if !self.in6.is_sorted_by(|a, b| a.sort_cmp(b).is_lt()) {
            self.in6.sort_by(CidrV6::sort_cmp);
        }

        self.in6.dedup_by(|next, prev| prev.collides(next));
    }

    pub fn how(&self) -> CidrParse {
        self.how
    }

    pub fn len(&self) -> usize {
        self.in4.len() + self.in6.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in4.is_empty() && self.in6.is_empty()
    }

    fn nth_addr(&self, index: usize) -> IpAddr {
        if index < self.in4.len() {
            IpAddr::V4(self.in4[index].addr.into())
        } else {
            IpAddr::V6(self.in6[index - self.in4.len()].addr.into())
        }
    }

    /// Search for the range enclosing `addr`.
    ///
    /// Returns 0 on no match, the prefix length of the match, or
    /// [`CIDR_MATCH_ALL`] when the match is a zero-length prefix.
    /// RFC 5156 IPv4-mapped/compatible addresses fall through to the
    /// IPv4 table on an IPv6 miss.
    pub fn search(&self, addr: &IpAddr, x: Option<&dyn Xray>, listname: Option<&str>) -> u32 {
        let result = match addr {
            IpAddr::V6(v6) => {
                let probe = u128::from(*v6);
                let hit = self
                    .in6
                    .binary_search_by(|m| CidrV6::find_cmp(probe, m).reverse())
                    .ok()
                    .map_or(0, |i| match self.in6[i].maskbits {
                        0 => CIDR_MATCH_ALL,
                        bits => bits,
                    });

                let dword2 = ((probe >> 32) & 0xffff_ffff) as u32;
                let low = probe as u32;

                if hit == 0 && probe >> 64 == 0 && (dword2 == 0 || dword2 == 0xffff) && low != 1 {
                    self.search_v4(low)
                } else {
                    hit
                }
            }
            IpAddr::V4(v4) => self.search_v4(u32::from(*v4)),
        };

        if result != 0 {
            if let (Some(x), Some(listname)) = (x, listname) {
                x.append(format_args!("{listname} match: found {addr}"));
            }
        }

        result
    }

    fn search_v4(&self, probe: u32) -> u32 {
        self.in4
            .binary_search_by(|m| CidrV4::find_cmp(probe, m).reverse())
            .ok()
            .map_or(0, |i| match self.in4[i].maskbits() {
                0 => CIDR_MATCH_ALL,
                bits => bits,
            })
    }

    /// Render the list as space-separated text; IPv4 first, then IPv6.
    pub fn to_ascii(&self) -> String {
        let mut out = String::new();

        for c in &self.in4 {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&Cidr::V4(*c).to_text(self.how));
        }

        for c in &self.in6 {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&Cidr::V6(*c).to_text(self.how));
        }

        out
    }
}

impl Drop for CidrList {
    fn drop(&mut self) {
        if let Some((hash, fp)) = self.membership.take() {
            if !hash.forget(&fp, std::ptr::from_ref(self)) {
                trace!("another thread raced to get a reference; leaving the hash alone");
            }
        }
    }
}

/// Shuffled pick-without-repeat over a cidrlist's addresses.
///
/// Supports round-robin egress selection: the index is rebuilt when the
/// source list changes size, and picks skip addresses present in an
/// optional ignore list.
pub struct RandomPick {
    items: Vec<u32>,
    cursor: usize,
}

impl RandomPick {
    pub fn new() -> Self {
        Self { items: Vec::new(), cursor: 0 }
    }

    fn rebuild(&mut self, list: &CidrList) {
        self.items = (0..list.len() as u32).collect();
        self.items.shuffle(&mut rand::rng());
        self.cursor = 0;
        trace!(count = self.items.len(), "rebuilt random index");
    }

    /// Pick the next address not present in `ignore`, advancing the
    /// cursor past it.
    pub fn pick(&mut self, list: &CidrList, ignore: Option<&CidrList>) -> Option<IpAddr> {
        if list.is_empty() {
            return None;
        }

        if self.items.len() != list.len() {
            self.rebuild(list);
        }

        for i in 0..self.items.len() {
            let n = (self.cursor + i) % self.items.len();
            let addr = list.nth_addr(self.items[n] as usize);

            let ignored = ignore.is_some_and(|il| il.search(&addr, None, None) != 0);

            if !ignored {
                self.cursor = (n + 1) % self.items.len();
                return Some(addr);
            }
        }

        None
    }
}

impl Default for RandomPick {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    fn list(data: &str, how: CidrParse) -> Arc<CidrList> {
        CidrList::from_buffer(data, how).expect("valid list")
    }

    fn search(cl: &CidrList, addr: &str) -> u32 {
        cl.search(&addr.parse().expect("valid addr"), None, None)
    }

    #[test]
    fn collision_reduction_and_render() {
        for data in [
            "1.2.3.4/32\n1.2.3.0/24\n5.6.7.8/32\n0001:0002:0003:0004:5:06:007:0008/128\n0001:0002:0003:0004::/64\n",
            "0001:0002:0003:0004::/64\n0001:0002:0003:0004:5:06:007:0008/128\n5.6.7.8/32\n1.2.3.0/24\n1.2.3.4/32\n",
        ] {
            let cl = list(data, CidrParse::CidrOnly);

            assert_eq!(cl.to_ascii(), "1.2.3.0/24 5.6.7.8/32 [1:2:3:4::]/64");
            assert_eq!(search(&cl, "1.2.3.4"), 24);
            assert_eq!(search(&cl, "1.2.3.5"), 24);
            assert_eq!(search(&cl, "5.6.7.8"), 32);
            assert_eq!(search(&cl, "5.6.7.9"), 0);
            assert_eq!(search(&cl, "1:2:3:4:5:6:7:8"), 64);
            assert_eq!(search(&cl, "1:2:3:4:5:6:7:9"), 64);
            assert_eq!(search(&cl, "1:2:3:5::1"), 0);
        }
    }

    #[test]
    fn ip_only_lists() {
        let cl = list("1.2.3.4\n5.6.7.8\n::1\n::3\n", CidrParse::IpOnly);
        assert_eq!(search(&cl, "1.2.3.4"), 32);
        assert_eq!(search(&cl, "1.2.3.5"), 0);
        assert_eq!(search(&cl, "::1"), 128);
        assert_eq!(cl.to_ascii(), "1.2.3.4 5.6.7.8 ::1 ::3");
    }

    #[test]
    fn bad_addresses_fail_the_load() {
        assert!(CidrList::from_buffer("1.2.3\n", CidrParse::IpOnly).is_err());
        assert!(CidrList::from_buffer("1.2.3.4 junk", CidrParse::IpOnly).is_err());
        assert!(CidrList::from_buffer(" \n", CidrParse::IpOnly).is_err());
    }

    #[test]
    fn match_all_sentinel() {
        let cl = list("0.0.0.0/0", CidrParse::CidrOnly);
        assert_eq!(search(&cl, "9.9.9.9"), CIDR_MATCH_ALL);
    }

    #[test]
    fn v4_mapped_v6_falls_through() {
        let cl = list("1.2.3.0/24", CidrParse::CidrOnly);
        assert_eq!(search(&cl, "::ffff:1.2.3.9"), 24);
        assert_eq!(search(&cl, "::1"), 0);
        assert_eq!(search(&cl, "1::ffff:1.2.3.9"), 0);
    }

    #[test]
    fn partial_parse_reports_consumed() {
        let mut cl = CidrList::new(CidrParse::IpOnly);
        let consumed = cl.add_from_string("1.2.3.4 5.6.7.8/24 rest", " ");
        // The second entry stops at the slash under IpOnly.
        assert_eq!(&"1.2.3.4 5.6.7.8/24 rest"[consumed..], "/24 rest");
        assert_eq!(cl.in4.len(), 2);
    }

    #[test]
    fn from_string_with_fingerprint_dedups() {
        let counters = Arc::new(crate::counters::UupCounters::new());
        let oh = Arc::new(ObjectHash::new(16, 2, counters));
        let fp = [7u8, 7];

        let (a, _) = CidrList::from_string(
            "1.2.3.0/24",
            ", \t\n",
            CidrParse::IpOrCidr,
            Some(ObjectFingerprint::new(&oh, &fp)),
        )
        .expect("loads");
        let (b, consumed) = CidrList::from_string(
            "9.9.9.9",
            ", \t\n",
            CidrParse::IpOrCidr,
            Some(ObjectFingerprint::new(&oh, &fp)),
        )
        .expect("loads");

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(consumed, "9.9.9.9".len());
    }

    #[test]
    fn random_pick_rotates_and_excludes() {
        let cl = list("1.2.3.4\n1.2.3.5\n5.6.7.8\n2001:470:e83b:9a::1\n", CidrParse::IpOnly);
        let mut pick = RandomPick::new();

        let mut seen = HashSet::new();

        for _ in 0..cl.len() {
            seen.insert(pick.pick(&cl, None).expect("an address"));
        }

        assert_eq!(seen.len(), cl.len(), "every address seen once per cycle");

        let ignore = list("1.2.3.0/24\n2001:470:e83b:9a::/64", CidrParse::CidrOnly);

        for _ in 0..8 {
            let addr = pick.pick(&cl, Some(&ignore)).expect("an address");
            assert_eq!(addr, "5.6.7.8".parse::<IpAddr>().expect("valid"));
        }
    }

    #[test]
    fn random_pick_exhaustion() {
        let cl = list("1.2.3.4", CidrParse::IpOnly);
        let ignore = list("1.2.3.4/32", CidrParse::CidrOnly);
        let mut pick = RandomPick::new();
        assert_eq!(pick.pick(&cl, Some(&ignore)), None);
    }
}
