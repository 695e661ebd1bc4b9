//! The application module.
//!
//! Per-application segments carry a subdomain-matched domain list, an
//! exact proxy domain list and (for the proxy flavor) a URL list. On
//! reload completion two super-indices are built over every name in
//! every segment — one subdomain-collapsed for domains, one exact for
//! proxies — so "is this name in *any* application?" is a single binary
//! search.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::debug;

use uup_lists::dnsname::reversed_key;
use uup_lists::domainlist::{MatchKind, cmp_reversed};
use uup_lists::{DomainList, DomainListFlags, ObjectFingerprint, ObjectHash, UrlList, UrlListFlags,
    Xray};
use uup_prefs::{LineCursor, Scan};

use crate::error::{ConfError, Result};
use crate::loader::ConfLoader;
use crate::segment::{SegmentData, SegmentInfo, Segmented};

pub const APPLICATION_VERSION: u32 = 1;

/// Which parts of an application file a module consumes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AppFlavor {
    /// Domains subdomain-matched; URLs folded into an exact proxy
    /// domain list (hostname only).
    Resolver,
    /// URLs kept whole for prefix matching; domains ignored.
    Proxy,
    /// Domains and URLs both kept.
    Full,
}

/// Content-keyed hashes shared by every application segment load, so an
/// unchanged list re-parsed in a new segment lands on the same storage.
pub struct AppShared {
    pub domains: Arc<ObjectHash<DomainList>>,
    pub urls: Arc<ObjectHash<UrlList>>,
}

impl AppShared {
    pub fn new(counters: Arc<uup_lists::UupCounters>) -> Self {
        Self {
            domains: Arc::new(ObjectHash::new(1 << 12, 0, Arc::clone(&counters))),
            urls: Arc::new(ObjectHash::new(1 << 10, 0, counters)),
        }
    }
}

pub struct AppLists {
    info: SegmentInfo,
    name: Option<String>,
    dl: Option<Arc<DomainList>>,
    pdl: Option<Arc<DomainList>>,
    ul: Option<Arc<UrlList>>,
}

impl SegmentData for AppLists {
    fn info(&self) -> &SegmentInfo {
        &self.info
    }

    fn is_empty(&self) -> bool {
        self.dl.is_none() && self.pdl.is_none() && self.ul.is_none()
    }
}

impl AppLists {
    /// Parse one `application` file for app id `appid`.
    ///
    /// Layout: `application 1`, `count N`, then `[meta:1]`, `[domains:N]`
    /// and `[urls:N]` sections in that order, each optional.
    pub fn parse(
        appid: u32,
        loader: &ConfLoader,
        flavor: AppFlavor,
        shared: &AppShared,
        mtime: i64,
    ) -> Result<Self> {
        let path = loader.path().display().to_string();
        let mut cur = LineCursor::new(loader.text(), &path);

        let err = |cur: &LineCursor<'_>, what: &str| ConfError::parse(&path, cur.line_no(), what);

        let header = cur.next_line().ok_or_else(|| err(&cur, "No content found"))?;

        if header != format!("application {APPLICATION_VERSION}") {
            return Err(err(&cur, "Unrecognized header line"));
        }

        let total: usize = cur
            .next_line()
            .and_then(|l| l.strip_prefix("count "))
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| err(&cur, "Invalid count; must be a numeric value"))?;

        let mut name = None;
        let mut domains: Vec<&str> = Vec::new();
        let mut urls: Vec<&str> = Vec::new();
        let mut loaded = 0;

        while let Some(line) = cur.next_line() {
            let Some(header) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) else {
                return Err(err(&cur, "Expected section header"));
            };

            let mut s = Scan::new(header);
            let section = s.until_colon().ok_or_else(|| err(&cur, "Invalid section header"))?;
            let count = s
                .dec_u32()
                .filter(|_| s.done())
                .ok_or_else(|| err(&cur, "Invalid section header count"))?
                as usize;

            match section {
                "meta" => {
                    for _ in 0..count {
                        let line = cur
                            .next_line()
                            .ok_or_else(|| err(&cur, "Unexpected EOF in [meta]"))?;

                        if let Some(n) = line.strip_prefix("name:") {
                            name = Some(n.to_string());
                        }

                        loaded += 1;
                    }
                }
                "domains" => {
                    for _ in 0..count {
                        domains.push(
                            cur.next_line()
                                .ok_or_else(|| err(&cur, "Unexpected EOF in [domains]"))?,
                        );
                        loaded += 1;
                    }
                }
                "urls" => {
                    for _ in 0..count {
                        urls.push(
                            cur.next_line().ok_or_else(|| err(&cur, "Unexpected EOF in [urls]"))?,
                        );
                        loaded += 1;
                    }
                }
                other => {
                    return Err(err(&cur, &format!("Invalid section header '{other}'")));
                }
            }
        }

        if loaded != total {
            return Err(err(&cur, "Incorrect total count"));
        }

        let alloc =
            (domains.iter().map(|d| d.len() + 1).sum::<usize>()
                + urls.iter().map(|u| u.len() + 1).sum::<usize>()) as u64;

        let mut me = Self {
            info: SegmentInfo::new(appid, mtime, alloc, loader.digest()),
            name,
            dl: None,
            pdl: None,
            ul: None,
        };

        let dl_flags = DomainListFlags { linefeed_required: true, ..DomainListFlags::default() };
        let proxy_flags = DomainListFlags {
            linefeed_required: true,
            ignore_junk: true,
            allow_empty: true,
            trim_urls: true,
            exact: true,
        };

        if flavor != AppFlavor::Proxy && !domains.is_empty() {
            let body = domains.join("\n");
            let of = ObjectFingerprint::by_content(&shared.domains);
            me.dl = Some(DomainList::from_buffer(body.as_bytes(), dl_flags, Some(of))?);
        }

        if !urls.is_empty() {
            match flavor {
                AppFlavor::Resolver => {
                    // Normal-form the URLs first so the host is what the
                    // trim-at-slash fold sees.
                    let mut body = Vec::new();

                    for url in &urls {
                        let start = body.len();

                        if uup_lists::urlnorm::normalize(url.as_bytes(), &mut body).is_err() {
                            body.truncate(start);
                            debug!("dropping unnormalizable application url: {url}");
                            continue;
                        }

                        body.push(b'\n');
                    }

                    let of = ObjectFingerprint::by_content(&shared.domains);
                    me.pdl = Some(DomainList::from_buffer(&body, proxy_flags, Some(of))?);
                }
                AppFlavor::Proxy | AppFlavor::Full => {
                    let body = urls.join("\n");
                    let flags =
                        UrlListFlags { linefeed_required: true, ..UrlListFlags::default() };
                    let of = ObjectFingerprint::by_content(&shared.urls);
                    me.ul = Some(UrlList::from_buffer(body.as_bytes(), flags, Some(of))?);
                }
            }
        }

        Ok(me)
    }

    pub fn failed(appid: u32, mtime: i64, digest: [u8; 16]) -> Self {
        Self { info: SegmentInfo::failed(appid, mtime, digest), name: None, dl: None, pdl: None, ul: None }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn domainlist(&self) -> Option<&Arc<DomainList>> {
        self.dl.as_ref()
    }

    pub fn proxylist(&self) -> Option<&Arc<DomainList>> {
        self.pdl.as_ref()
    }

    pub fn urllist(&self) -> Option<&Arc<UrlList>> {
        self.ul.as_ref()
    }
}

/// One super-index entry: a name lives at `offset` in segment `slot`'s
/// list.
#[derive(Clone, Copy)]
struct AppIndexEntry {
    slot: u32,
    offset: u32,
}

pub struct ApplicationConf {
    segments: Segmented<AppLists>,
    dindex: Box<[AppIndexEntry]>,
    pindex: Box<[AppIndexEntry]>,
}

impl ApplicationConf {
    pub fn new(segments: Segmented<AppLists>) -> Self {
        let mut me =
            Self { segments, dindex: Box::default(), pindex: Box::default() };
        me.build_indices();
        me
    }

    pub fn segments(&self) -> &Segmented<AppLists> {
        &self.segments
    }

    fn entry_name(&self, e: &AppIndexEntry, proxy: bool) -> &[u8] {
        let seg = self.segments.get(e.slot as usize).expect("index entries reference live slots");
        let dl = if proxy { seg.pdl.as_ref() } else { seg.dl.as_ref() };
        dl.expect("index entries reference present lists").name_bytes_at(e.offset as usize)
    }

    /// Build the domain and proxy super-indices over every segment.
    fn build_indices(&mut self) {
        for proxy in [false, true] {
            let mut refs: Vec<AppIndexEntry> = Vec::new();

            for (slot, seg) in self.segments.iter().enumerate() {
                let dl = if proxy { seg.pdl.as_ref() } else { seg.dl.as_ref() };

                if let Some(dl) = dl {
                    for n in 0..dl.name_count() {
                        refs.push(AppIndexEntry {
                            slot: slot as u32,
                            offset: dl.name_offset(n) as u32,
                        });
                    }
                }
            }

            // Sort by the reversed-name ordering, then collapse
            // subdomains out of the domain index (the proxy index is
            // exact and keeps everything).
            refs.sort_by(|a, b| {
                cmp_reversed(self.entry_name(a, proxy), self.entry_name(b, proxy), false)
            });

            if !proxy && refs.len() > 1 {
                let mut kept = 0;

                for j in 1..refs.len() {
                    if cmp_reversed(
                        self.entry_name(&refs[j], proxy),
                        self.entry_name(&refs[kept], proxy),
                        true,
                    ) != Ordering::Equal
                    {
                        kept += 1;
                        refs[kept] = refs[j];
                    }
                }

                refs.truncate(kept + 1);
            }

            debug!(count = refs.len(), proxy, "built application super-index");

            if proxy {
                self.pindex = refs.into();
            } else {
                self.dindex = refs.into();
            }
        }
    }

    fn index_lookup(&self, name: &[u8], proxy: bool) -> bool {
        let Some(key) = reversed_key(name) else {
            return false;
        };

        let index = if proxy { &self.pindex } else { &self.dindex };

        index
            .binary_search_by(|e| {
                cmp_reversed(&key, self.entry_name(e, proxy), !proxy).reverse()
            })
            .is_ok()
    }

    /// Is `name` in any application's domain list?
    pub fn match_domain(&self, name: &[u8], x: Option<&dyn Xray>, listname: &str) -> bool {
        let hit = self.index_lookup(name, false);

        if hit {
            uup_lists::xray!(x, "{listname} subdomain match: found");
        }

        hit
    }

    /// Is `name` in any application's proxy list?
    pub fn proxy(&self, name: &[u8], x: Option<&dyn Xray>, listname: &str) -> bool {
        let hit = self.index_lookup(name, true);

        if hit {
            uup_lists::xray!(x, "{listname} exact match: found");
        }

        hit
    }

    fn lookup_byid(&self, appid: u32, name: &[u8], proxy: bool, x: Option<&dyn Xray>) -> Option<usize> {
        let seg = self.segments.find(appid)?;
        let dl = if proxy { seg.pdl.as_ref() } else { seg.dl.as_ref() }?;

        let appname = match seg.name() {
            Some(n) => format!("{n} {}", if proxy { "proxy" } else { "domain" }),
            None => format!("application-{appid} {}", if proxy { "proxy" } else { "domain" }),
        };

        dl.matches(
            name,
            if proxy { MatchKind::Exact } else { MatchKind::Subdomain },
            x,
            &appname,
        )
    }

    /// Match `name` against one application's domain list; returns the
    /// offset of the match within `name`.
    pub fn match_domain_byid(
        &self,
        appid: u32,
        name: &[u8],
        x: Option<&dyn Xray>,
    ) -> Option<usize> {
        self.lookup_byid(appid, name, false, x)
    }

    /// Match `name` against one application's proxy list.
    pub fn proxy_byid(&self, appid: u32, name: &[u8], x: Option<&dyn Xray>) -> Option<usize> {
        self.lookup_byid(appid, name, true, x)
    }

    /// Match a normalized URL against one application's URL list.
    pub fn match_url_byid(&self, appid: u32, url: &[u8]) -> bool {
        self.segments
            .find(appid)
            .and_then(|seg| seg.ul.as_ref())
            .is_some_and(|ul| ul.matches(url) != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use uup_lists::UupCounters;
    use uup_lists::dnsname::text_to_name;

    fn load_app(appid: u32, body: &str, flavor: AppFlavor, shared: &AppShared) -> Arc<AppLists> {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(format!("app.{appid}"));
        fs::write(&path, body).expect("writes");
        let loader = ConfLoader::open(&path).expect("opens");

        Arc::new(AppLists::parse(appid, &loader, flavor, shared, 1).expect("parses"))
    }

    fn shared() -> AppShared {
        AppShared::new(Arc::new(UupCounters::new()))
    }

    fn conf(segs: Vec<Arc<AppLists>>) -> ApplicationConf {
        let mut segments = Segmented::new();

        for seg in segs {
            segments.use_segment(seg);
        }

        ApplicationConf::new(segments)
    }

    const APP4: &str = "application 1\n\
                        count 4\n\
                        [meta:1]\n\
                        name:bobdata\n\
                        [domains:1]\n\
                        bobdata.com\n\
                        [urls:2]\n\
                        http://api.bobdata.com/bobpost\n\
                        http://proxy.bobdata.com/x\n";

    const APP9: &str = "application 1\n\
                        count 2\n\
                        [domains:2]\n\
                        nine.net\n\
                        sub.nine.net\n";

    #[test]
    fn resolver_flavor_builds_domain_and_proxy_lists() {
        let sh = shared();
        let app = load_app(4, APP4, AppFlavor::Resolver, &sh);

        assert_eq!(app.name(), Some("bobdata"));
        assert!(app.domainlist().is_some());
        let pdl = app.proxylist().expect("proxy list");
        // URLs were trimmed to hostnames and kept exact.
        assert_eq!(pdl.to_sorted_ascii(), "api.bobdata.com proxy.bobdata.com");
        assert!(app.urllist().is_none());
    }

    #[test]
    fn proxy_flavor_keeps_urls() {
        let sh = shared();
        let app = load_app(4, APP4, AppFlavor::Proxy, &sh);

        assert!(app.domainlist().is_none());
        let ul = app.urllist().expect("url list");
        assert_ne!(ul.matches(b"api.bobdata.com/bobpost"), 0);
        assert_eq!(ul.matches(b"api.bobdata.com/other"), 0);
    }

    #[test]
    fn super_index_answers_any_application() {
        let sh = shared();
        let conf = conf(vec![
            load_app(4, APP4, AppFlavor::Resolver, &sh),
            load_app(9, APP9, AppFlavor::Resolver, &sh),
        ]);

        let name = text_to_name("deep.sub.nine.net").expect("valid");
        assert!(conf.match_domain(&name, None, "apps"));

        let name = text_to_name("bobdata.com").expect("valid");
        assert!(conf.match_domain(&name, None, "apps"));

        let name = text_to_name("unrelated.org").expect("valid");
        assert!(!conf.match_domain(&name, None, "apps"));

        // The proxy index is exact: the hostname from the URL matches,
        // its subdomains do not.
        let name = text_to_name("api.bobdata.com").expect("valid");
        assert!(conf.proxy(&name, None, "apps"));

        let name = text_to_name("deeper.api.bobdata.com").expect("valid");
        assert!(!conf.proxy(&name, None, "apps"));
    }

    #[test]
    fn byid_lookups() {
        let sh = shared();
        let conf = conf(vec![
            load_app(4, APP4, AppFlavor::Resolver, &sh),
            load_app(9, APP9, AppFlavor::Resolver, &sh),
        ]);

        let name = text_to_name("www.bobdata.com").expect("valid");
        assert!(conf.match_domain_byid(4, &name, None).is_some());
        assert!(conf.match_domain_byid(9, &name, None).is_none());
        assert!(conf.match_domain_byid(77, &name, None).is_none(), "unknown appid");
    }

    #[test]
    fn identical_lists_share_storage() {
        let sh = shared();
        let a = load_app(4, APP9, AppFlavor::Resolver, &sh);
        let b = load_app(5, APP9, AppFlavor::Resolver, &sh);

        assert!(Arc::ptr_eq(
            a.domainlist().expect("list"),
            b.domainlist().expect("list")
        ));
    }
}
