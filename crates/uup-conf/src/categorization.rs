//! The categorization dispatcher.
//!
//! A categorization file is a list of other registered files that define
//! the categorization of domains and addresses. Each entry binds a
//! list-backed categorizer to a category bit and optional gates: a
//! policy-flag mask, an org-flag mask, or neither (zero masks gate
//! nothing — the file grammar cannot say "match never").

use std::cell::RefCell;
use std::sync::Arc;

use tracing::debug;

use uup_lists::domainlist::MatchKind;
use uup_lists::xray::Xray;
use uup_lists::{CidrParse, DomainListFlags};
use uup_prefs::categories::PREF_CATEGORIES_MAX_BITS;
use uup_prefs::types::{BundleFlags, ORGFLAG_HALF_DOMAINTAGGING, OrgFlags};
use uup_prefs::{AppCatalog, PrefCategories, Scan};

use crate::application::{AppFlavor, ApplicationConf};
use crate::confset::ConfSet;
use crate::error::{ConfError, Result};
use crate::registry::{ConfKind, ConfRegistry, ModuleId};

pub const CATEGORIZATION_VERSION: u32 = 1;

thread_local! {
    // Categories masked from domaintagging results when the
    // HALF_DOMAINTAGGING orgflag is set; written by the host when its
    // configuration changes, read on the hot path.
    static OPTION_HALF_DOMAINTAGGING: RefCell<PrefCategories> =
        RefCell::new(PrefCategories::none());
}

/// Set this thread's half-domaintagging mask.
pub fn categorization_set_thread_options(half_domaintagging: &PrefCategories) {
    OPTION_HALF_DOMAINTAGGING.with(|opt| *opt.borrow_mut() = *half_domaintagging);
}

fn half_domaintagging_mask() -> PrefCategories {
    OPTION_HALF_DOMAINTAGGING.with(|opt| *opt.borrow())
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CatType {
    DomainTagging,
    Domainlist,
    ExactDomainlist,
    IpList,
    CidrList,
    Application,
}

impl CatType {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "domaintagging" => Some(Self::DomainTagging),
            "domainlist" => Some(Self::Domainlist),
            "exact-domainlist" => Some(Self::ExactDomainlist),
            "iplist" => Some(Self::IpList),
            "cidrlist" => Some(Self::CidrList),
            "application" => Some(Self::Application),
            _ => None,
        }
    }

    fn conf_kind(self) -> ConfKind {
        match self {
            Self::DomainTagging => ConfKind::DomainTagging,
            Self::Domainlist => ConfKind::Domainlist {
                flags: DomainListFlags { linefeed_required: true, ..DomainListFlags::default() },
            },
            Self::ExactDomainlist => ConfKind::Domainlist {
                flags: DomainListFlags { linefeed_required: true, ..DomainListFlags::exact() },
            },
            Self::IpList => ConfKind::Cidrlist { how: CidrParse::IpOnly },
            Self::CidrList => ConfKind::Cidrlist { how: CidrParse::IpOrCidr },
            Self::Application => ConfKind::Application { flavor: AppFlavor::Resolver },
        }
    }
}

struct CatEntry {
    ctype: CatType,
    name: String,
    module: ModuleId,
    catbit: usize,
    polmask: BundleFlags,
    orgmask: OrgFlags,
}

impl CatEntry {
    fn gated_in(&self, polbits: BundleFlags, orgbits: OrgFlags) -> bool {
        (self.polmask == 0 || self.polmask & polbits != 0)
            && (self.orgmask == 0 || self.orgmask & orgbits != 0)
    }
}

pub struct Categorization {
    version: u32,
    entries: Vec<CatEntry>,
}

impl Categorization {
    /// Parse a categorization file, registering each entry's underlying
    /// module: `type:name:path:catbit:polbit:orgbit[,orgbit...]`.
    pub fn parse(text: &str, path: &str, registry: &mut ConfRegistry) -> Result<Arc<Self>> {
        let mut lines = text.lines().enumerate().filter(|(_, l)| {
            let t = l.trim_start();
            !t.is_empty() && !t.starts_with('#')
        });

        let err =
            |lineno: usize, what: &str| ConfError::parse(path, lineno as u32 + 1, what);

        let (lineno, header) = lines.next().ok_or_else(|| err(0, "No content found"))?;

        if header.trim_end() != format!("categorization {CATEGORIZATION_VERSION}") {
            return Err(err(lineno, "Unrecognized header line"));
        }

        let mut me = Self { version: CATEGORIZATION_VERSION, entries: Vec::new() };

        for (lineno, line) in lines {
            let mut s = Scan::new(line);

            let tname = s
                .until_colon()
                .ok_or_else(|| err(lineno, "Invalid categorization type (field 1)"))?;
            let ctype = CatType::from_name(tname)
                .ok_or_else(|| err(lineno, "Invalid categorization type (field 1)"))?;

            let name = s
                .until_colon()
                .filter(|n| !n.is_empty())
                .ok_or_else(|| err(lineno, "Invalid categorization name (field 2)"))?;

            let file = s
                .until_colon()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| err(lineno, "Invalid categorization path (field 3)"))?;

            let catbit = if ctype == CatType::DomainTagging {
                if !s.colon() {
                    return Err(err(lineno, "Invalid category bit (field 4) - should be empty"));
                }

                0
            } else {
                let bit = s
                    .dec_u32()
                    .filter(|&b| (b as usize) < PREF_CATEGORIES_MAX_BITS && s.colon())
                    .ok_or_else(|| err(lineno, "Invalid category bit (field 4)"))?;
                bit as usize
            };

            let polmask = if s.peek() == Some(':') {
                s.colon();
                0
            } else {
                let bit = s
                    .dec_u32()
                    .filter(|&b| b < 32 && s.colon())
                    .ok_or_else(|| err(lineno, "Invalid policy bit (field 5)"))?;
                1 << bit
            };

            let mut orgmask: OrgFlags = 0;

            if !s.done() {
                for tok in s.rest().split(',') {
                    let bit: u32 = tok
                        .trim()
                        .parse()
                        .ok()
                        .filter(|&b| b < 64)
                        .ok_or_else(|| err(lineno, "Invalid org bit (field 6)"))?;
                    orgmask |= 1 << bit;
                }
            }

            if me.entries.iter().any(|e| e.name == name) {
                return Err(err(lineno, "Invalid name (field 2) - must be unique"));
            }

            let module = registry.register(name, file, ctype.conf_kind(), true)?;

            me.entries.push(CatEntry {
                ctype,
                name: name.to_string(),
                module,
                catbit,
                polmask,
                orgmask,
            });
        }

        Ok(Arc::new(me))
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Accumulate the category bits `name` matches across every gated-in
    /// entry.
    pub fn by_domain(
        &self,
        set: &ConfSet,
        match_out: &mut PrefCategories,
        name: &[u8],
        polbits: BundleFlags,
        orgbits: OrgFlags,
        x: Option<&dyn Xray>,
    ) {
        for entry in &self.entries {
            if !entry.gated_in(polbits, orgbits) {
                continue;
            }

            match entry.ctype {
                CatType::DomainTagging => {
                    if let Some(dt) = set.domaintagging_conf_get(entry.module) {
                        dt.matches(match_out, name, x, &entry.name);
                    }

                    if entry.name == "domaintagging" && orgbits & ORGFLAG_HALF_DOMAINTAGGING != 0 {
                        let mask = half_domaintagging_mask();
                        debug!("Masking {mask} domaintagging category bits. HALF_DOMAINTAGGING is set");
                        match_out.clear(&mask);
                    }
                }
                CatType::Domainlist | CatType::ExactDomainlist => {
                    let mtype = if entry.ctype == CatType::Domainlist {
                        MatchKind::Subdomain
                    } else {
                        MatchKind::Exact
                    };

                    if let Some(dl) = set.domainlist_conf_get(entry.module) {
                        if dl.matches(name, mtype, x, &entry.name).is_some() {
                            match_out.set_bit(entry.catbit);
                        }
                    }
                }
                CatType::Application => {
                    if let Some(app) = set.application_conf_get(entry.module) {
                        if app.match_domain(name, x, &entry.name) {
                            match_out.set_bit(entry.catbit);
                        }
                    }
                }
                CatType::IpList | CatType::CidrList => {}
            }
        }
    }

    /// Accumulate the category bits `addr` matches across the ip/cidr
    /// entries.
    pub fn by_address(
        &self,
        set: &ConfSet,
        match_out: &mut PrefCategories,
        addr: &std::net::IpAddr,
        polbits: BundleFlags,
        orgbits: OrgFlags,
        x: Option<&dyn Xray>,
    ) {
        for entry in &self.entries {
            if !entry.gated_in(polbits, orgbits) {
                continue;
            }

            if matches!(entry.ctype, CatType::IpList | CatType::CidrList) {
                if let Some(cl) = set.cidrlist_conf_get(entry.module) {
                    if cl.search(addr, x, Some(&entry.name)) != 0 {
                        match_out.set_bit(entry.catbit);
                    }
                }
            }
        }
    }

    /// Check one application's domain list through each gated-in
    /// application entry whose category bit is wanted and not yet set.
    pub fn match_appid(
        &self,
        set: &ConfSet,
        match_out: &mut PrefCategories,
        appid: u32,
        name: &[u8],
        polbits: BundleFlags,
        orgbits: OrgFlags,
        find: &PrefCategories,
        x: Option<&dyn Xray>,
    ) -> bool {
        for entry in &self.entries {
            if entry.ctype == CatType::Application
                && find.get_bit(entry.catbit)
                && !match_out.get_bit(entry.catbit)
                && entry.gated_in(polbits, orgbits)
            {
                if let Some(app) = set.application_conf_get(entry.module) {
                    if app.match_domain_byid(appid, name, x).is_some() {
                        match_out.set_bit(entry.catbit);
                        return true;
                    }
                }
            }
        }

        false
    }

    /// Check one application's proxy list.
    pub fn proxy_appid(
        &self,
        set: &ConfSet,
        appid: u32,
        name: &[u8],
        polbits: BundleFlags,
        orgbits: OrgFlags,
        x: Option<&dyn Xray>,
    ) -> bool {
        for entry in &self.entries {
            if entry.ctype == CatType::Application && entry.gated_in(polbits, orgbits) {
                if let Some(app) = set.application_conf_get(entry.module) {
                    if app.proxy_byid(appid, name, x).is_some() {
                        return true;
                    }
                }
            }
        }

        false
    }

    /// Fast "could any application's proxy list match?" via the
    /// super-index.
    pub fn might_proxy(
        &self,
        set: &ConfSet,
        name: &[u8],
        polbits: BundleFlags,
        orgbits: OrgFlags,
        x: Option<&dyn Xray>,
    ) -> bool {
        for entry in &self.entries {
            if entry.ctype == CatType::Application && entry.gated_in(polbits, orgbits) {
                if let Some(app) = set.application_conf_get(entry.module) {
                    if app.proxy(name, x, &entry.name) {
                        return true;
                    }
                }
            }
        }

        false
    }
}

/// The [`AppCatalog`] the conf layer hands to pref-level matching:
/// a categorization, the confset it indexes into, and (for URL matches)
/// the application module to consult.
pub struct CategorizedApps<'a> {
    pub categorization: Option<&'a Categorization>,
    pub set: &'a ConfSet,
    pub app: Option<&'a ApplicationConf>,
}

impl AppCatalog for CategorizedApps<'_> {
    fn match_appid(
        &self,
        match_out: &mut PrefCategories,
        appid: u32,
        name: &[u8],
        polbits: BundleFlags,
        orgbits: OrgFlags,
        find: &PrefCategories,
        x: Option<&dyn Xray>,
    ) -> bool {
        self.categorization.is_some_and(|c| {
            c.match_appid(self.set, match_out, appid, name, polbits, orgbits, find, x)
        })
    }

    fn proxy_appid(
        &self,
        appid: u32,
        name: &[u8],
        polbits: BundleFlags,
        orgbits: OrgFlags,
        x: Option<&dyn Xray>,
    ) -> bool {
        self.categorization
            .is_some_and(|c| c.proxy_appid(self.set, appid, name, polbits, orgbits, x))
    }

    fn might_proxy(
        &self,
        name: &[u8],
        polbits: BundleFlags,
        orgbits: OrgFlags,
        x: Option<&dyn Xray>,
    ) -> bool {
        self.categorization
            .is_some_and(|c| c.might_proxy(self.set, name, polbits, orgbits, x))
    }

    fn match_url_byid(&self, appid: u32, url: &[u8]) -> bool {
        self.app.is_some_and(|a| a.match_url_byid(appid, url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_registers_modules() {
        let mut reg = ConfRegistry::new();
        let text = "categorization 1\n\
                    domaintagging:domaintagging:dt.gz:::\n\
                    domainlist:malware:malware.txt:66:3:\n\
                    application:apps:apps/%u:148::1,26\n";

        let cat = Categorization::parse(text, "categorization", &mut reg).expect("parses");
        assert_eq!(cat.len(), 3);
        assert_eq!(reg.len(), 3);
        assert!(reg.module_by_name("malware").is_some());
        assert!(reg.module_by_name("apps").is_some());
    }

    #[test]
    fn duplicate_names_fail() {
        let mut reg = ConfRegistry::new();
        let text = "categorization 1\n\
                    domainlist:same:one.txt:5::\n\
                    domainlist:same:two.txt:6::\n";

        assert!(Categorization::parse(text, "categorization", &mut reg).is_err());
    }

    #[test]
    fn bad_fields_fail() {
        let mut reg = ConfRegistry::new();

        // domaintagging must have an empty catbit.
        let text = "categorization 1\ndomaintagging:dt:dt.gz:7:\n";
        assert!(Categorization::parse(text, "c", &mut reg).is_err());

        // catbit out of range.
        let mut reg = ConfRegistry::new();
        let text = "categorization 1\ndomainlist:dl:dl.txt:256::\n";
        assert!(Categorization::parse(text, "c", &mut reg).is_err());

        // policy bit out of range.
        let mut reg = ConfRegistry::new();
        let text = "categorization 1\ndomainlist:dl:dl.txt:5:32:\n";
        assert!(Categorization::parse(text, "c", &mut reg).is_err());
    }

    #[test]
    fn thread_options_round_trip() {
        let mask = PrefCategories::with_bit(1);
        categorization_set_thread_options(&mask);
        assert!(half_domaintagging_mask().get_bit(1));
        categorization_set_thread_options(&PrefCategories::none());
        assert!(half_domaintagging_mask().is_none());
    }
}
