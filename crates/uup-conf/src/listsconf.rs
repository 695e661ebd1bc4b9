//! The lists module: per-org rule-list segments.
//!
//! A lists file is a single `[lists:N]` section of id-keyed (no-ltype)
//! destination lists. Lookups walk every list of a given element type —
//! or a sorted subset of listids — and are resumable: a hit returns a
//! cursor token that continues the scan on the next call.

use std::sync::Arc;

use uup_lists::domainlist::MatchKind;
use uup_prefs::{
    ElementType, FileKind, KeyKind, LTYPE_NONE, ListCatalog, PrefList, PrefsLoadFlags, parse_prefs,
};

use crate::error::Result;
use crate::loader::ConfLoader;
use crate::segment::{SegmentData, SegmentInfo, Segmented};

pub const LISTS_VERSION: u32 = 1;

const LISTS_KIND: FileKind = FileKind {
    type_name: "lists",
    supported_versions: &[LISTS_VERSION],
    key: KeyKind::None,
    lists_only: true,
};

fn lists_load_flags() -> PrefsLoadFlags {
    PrefsLoadFlags {
        accept_cidr: true,
        accept_domain: true,
        accept_url: true,
        allow_other_types: true,
        no_ltype: true,
        ..PrefsLoadFlags::default()
    }
}

pub struct ListsOrg {
    info: SegmentInfo,
    lists: Box<[PrefList]>,
}

impl SegmentData for ListsOrg {
    fn info(&self) -> &SegmentInfo {
        &self.info
    }

    fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}

/// A hit from a cursor lookup.
pub struct ListsHit<T> {
    pub listid: u32,
    pub bit: u8,
    pub matched: T,
    /// Pass back as `next` to continue past this hit; 0 means done.
    pub next: usize,
}

impl ListsOrg {
    pub fn parse(orgid: u32, loader: &ConfLoader, catalog: &ListCatalog, mtime: i64) -> Result<Self> {
        let path = loader.path().display().to_string();
        let fp = parse_prefs(loader.text(), &path, &LISTS_KIND, lists_load_flags(), catalog)?;

        let alloc = fp
            .block
            .lists
            .iter()
            .map(|l| match &l.lp {
                uup_prefs::ListPointer::Domain(dl) => dl.bundle_len() as u64,
                _ => 64,
            })
            .sum();

        Ok(Self {
            info: SegmentInfo::new(orgid, mtime, alloc, loader.digest()),
            lists: fp.block.lists,
        })
    }

    pub fn failed(orgid: u32, mtime: i64, digest: [u8; 16]) -> Self {
        Self { info: SegmentInfo::failed(orgid, mtime, digest), lists: Box::default() }
    }

    pub fn list_count(&self) -> usize {
        self.lists.len()
    }

    /// Decode a cursor into (slot, subset member index).
    fn cursor_member(subset: Option<&[u32]>, next: usize) -> (usize, usize) {
        match subset {
            Some(ids) => (next / ids.len(), next % ids.len()),
            None => (next, 0),
        }
    }

    /// Encode the continuation cursor after a hit at (slot, member).
    fn cursor_next(subset: Option<&[u32]>, slot: usize, member: usize) -> usize {
        match subset {
            Some(ids) => (slot + 1) * ids.len() + member + 1,
            None => slot + 1,
        }
    }

    /// Find the next list of `et` at or after (slot, member), honoring
    /// the subset when present.
    fn find_member(
        &self,
        et: ElementType,
        subset: Option<&[u32]>,
        slot: &mut usize,
        member: &mut usize,
    ) -> Option<&PrefList> {
        match subset {
            None => {
                while *slot < self.lists.len() {
                    if self.lists[*slot].elementtype() == et {
                        return Some(&self.lists[*slot]);
                    }

                    *slot += 1;
                }

                None
            }
            Some(ids) => {
                while *member < ids.len() {
                    let want = (LTYPE_NONE, ids[*member], et);
                    *slot += self.lists[*slot..].partition_point(|l| l.key() < want);

                    if *slot >= self.lists.len() {
                        return None;
                    }

                    let list = &self.lists[*slot];

                    if list.key() == want {
                        return Some(list);
                    }

                    *member += 1;
                }

                None
            }
        }
    }

    fn lookup<T>(
        &self,
        et: ElementType,
        subset: Option<&[u32]>,
        next: usize,
        mut test: impl FnMut(&PrefList) -> Option<T>,
    ) -> Option<ListsHit<T>> {
        if subset.is_some_and(<[u32]>::is_empty) {
            return None;
        }

        let (mut slot, mut member) = Self::cursor_member(subset, next);

        while slot < self.lists.len() {
            let list = self.find_member(et, subset, &mut slot, &mut member)?;

            if let Some(matched) = test(list) {
                return Some(ListsHit {
                    listid: list.id,
                    bit: list.bit,
                    matched,
                    next: Self::cursor_next(subset, slot, member),
                });
            }

            slot += 1;
        }

        None
    }

    /// Look a DNS name up in all (or a subset of) the org's domain
    /// lists; `matched` is the offset of the match within `name`.
    pub fn lookup_domainlist(
        &self,
        subset: Option<&[u32]>,
        next: usize,
        name: &[u8],
    ) -> Option<ListsHit<usize>> {
        self.lookup(ElementType::Domain, subset, next, |list| {
            let pname = format!("lists {}:domain", list.id);
            list.lp.as_domainlist()?.matches(name, MatchKind::Subdomain, None, &pname)
        })
    }

    /// Look a normalized URL up; `matched` is the matching length.
    pub fn lookup_urllist(
        &self,
        subset: Option<&[u32]>,
        next: usize,
        url: &[u8],
    ) -> Option<ListsHit<usize>> {
        self.lookup(ElementType::Url, subset, next, |list| {
            match list.lp.as_urllist()?.matches(url) {
                0 => None,
                n => Some(n),
            }
        })
    }

    /// Look an address up; `matched` is the enclosing prefix length.
    pub fn lookup_cidrlist(
        &self,
        subset: Option<&[u32]>,
        next: usize,
        addr: &std::net::IpAddr,
    ) -> Option<ListsHit<u32>> {
        self.lookup(ElementType::Cidr, subset, next, |list| {
            match list.lp.as_cidrlist()?.search(addr, None, None) {
                0 => None,
                n => Some(n),
            }
        })
    }
}

pub struct ListsConf {
    segments: Segmented<ListsOrg>,
}

impl ListsConf {
    pub fn new(segments: Segmented<ListsOrg>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &Segmented<ListsOrg> {
        &self.segments
    }

    pub fn find_org(&self, orgid: u32) -> Option<&Arc<ListsOrg>> {
        self.segments.find(orgid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use uup_lists::dnsname::text_to_name;

    fn org(body: &str) -> ListsOrg {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("lists.1");
        fs::write(&path, body).expect("writes");
        let loader = ConfLoader::open(&path).expect("opens");
        let catalog = ListCatalog::new(2);

        ListsOrg::parse(1, &loader, &catalog, 0).expect("parses")
    }

    const SAMPLE: &str = "lists 1\n\
                          count 4\n\
                          [lists:4]\n\
                          1:domain:11:AAAA:alpha.com\n\
                          2:domain:12:BBBB:beta.com gamma.com\n\
                          3:url:13:CCCC:delta.com/path\n\
                          4:cidr:14:DDDD:10.0.0.0/8\n";

    #[test]
    fn cursor_walks_all_matches() {
        let lo = org(SAMPLE);
        assert_eq!(lo.list_count(), 4);

        let name = text_to_name("www.alpha.com").expect("valid");
        let hit = lo.lookup_domainlist(None, 0, &name).expect("hit");
        assert_eq!(hit.listid, 1);
        assert_eq!(hit.bit, 11);
        assert_eq!(hit.matched, 4);

        assert!(lo.lookup_domainlist(None, hit.next, &name).is_none(), "no further hits");

        let url = b"delta.com/path/deeper";
        let hit = lo.lookup_urllist(None, 0, url).expect("hit");
        assert_eq!(hit.listid, 3);
        assert_eq!(hit.matched, "delta.com/path".len());

        let addr = "10.9.9.9".parse().expect("valid");
        let hit = lo.lookup_cidrlist(None, 0, &addr).expect("hit");
        assert_eq!(hit.listid, 4);
        assert_eq!(hit.matched, 8);
    }

    #[test]
    fn subset_restricts_the_walk() {
        let both = "lists 1\n\
                    count 2\n\
                    [lists:2]\n\
                    1:domain:11:AAAA:shared.com\n\
                    2:domain:12:BBBB:shared.com\n";
        let lo = org(both);
        let name = text_to_name("x.shared.com").expect("valid");

        // Unrestricted: both lists hit, in id order.
        let first = lo.lookup_domainlist(None, 0, &name).expect("hit");
        assert_eq!(first.listid, 1);
        let second = lo.lookup_domainlist(None, first.next, &name).expect("hit");
        assert_eq!(second.listid, 2);
        assert!(lo.lookup_domainlist(None, second.next, &name).is_none());

        // Subset {2}: only list 2 is consulted.
        let subset = [2u32];
        let hit = lo.lookup_domainlist(Some(&subset), 0, &name).expect("hit");
        assert_eq!(hit.listid, 2);
        assert!(lo.lookup_domainlist(Some(&subset), hit.next, &name).is_none());

        // Subset {9}: nothing.
        let subset = [9u32];
        assert!(lo.lookup_domainlist(Some(&subset), 0, &name).is_none());
    }
}
