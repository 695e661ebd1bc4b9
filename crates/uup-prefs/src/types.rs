//! The ltype/actype/elementtype model.
//!
//! A preflist's `ltype` packs its list kind (high nibble) with the
//! action-category (`actype`, low nibble) of the bundle family it belongs
//! to. The file formats carry ltypes as hex.

use std::fmt;
use std::sync::Arc;

use uup_lists::{CidrList, DomainList, Uint32List, UrlList};

pub type BundleFlags = u32;
pub type OrgFlags = u64;

pub const BUNDLEFLAG_CLOSED_NETWORK: BundleFlags = 1 << 0;
pub const BUNDLEFLAG_SUSPICIOUS_RESPONSE: BundleFlags = 1 << 3;
pub const BUNDLEFLAG_TYPO_CORRECTION: BundleFlags = 1 << 4;
pub const BUNDLEFLAG_EXPIRED_RRS: BundleFlags = 1 << 6;
pub const BUNDLEFLAG_ALLOWLIST_ONLY: BundleFlags = 1 << 11;
pub const BUNDLEFLAG_URL_PROXY_HTTPS: BundleFlags = 1 << 13;
pub const BUNDLEFLAG_URL_PROXY: BundleFlags = 1 << 14;
pub const BUNDLEFLAG_NO_STATS: BundleFlags = 1 << 15;
pub const BUNDLEFLAG_SAFE_SEARCH: BundleFlags = 1 << 22;

pub const ORGFLAG_PROXY_NEWLY_SEEN_DOMAINS: OrgFlags = 1 << 1;
pub const ORGFLAG_INCLUDE_TALOS_CATEGORIES: OrgFlags = 1 << 2;
pub const ORGFLAG_GDPR_EU: OrgFlags = 1 << 4;
pub const ORGFLAG_GDPR_US: OrgFlags = 1 << 5;
pub const ORGFLAG_SWG_ENABLED: OrgFlags = 1 << 6;
pub const ORGFLAG_REALTIME_DNS_TUNNEL_BLOCKING: OrgFlags = 1 << 7;
pub const ORGFLAG_O365_BYPASS: OrgFlags = 1 << 8;
pub const ORGFLAG_DNSSEC_ENFORCE_ENABLED: OrgFlags = 1 << 10;
pub const ORGFLAG_ALL_DOMAINTAGGING: OrgFlags = 1 << 25;
pub const ORGFLAG_HALF_DOMAINTAGGING: OrgFlags = 1 << 26;

/// Action-category: which family of bundles a record belongs to.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
#[repr(u8)]
pub enum ActType {
    Bundle = 0,
    Policy = 1,
    Origin = 2,
}

impl ActType {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::Bundle),
            1 => Some(Self::Policy),
            2 => Some(Self::Origin),
            _ => None,
        }
    }

    pub fn bits(self) -> u8 {
        self as u8
    }
}

/// The ten list kinds, in file order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
#[repr(u8)]
pub enum ListKind {
    DestBlock = 0x10,
    Except = 0x20,
    DestAllow = 0x30,
    UrlProxyHttps = 0x40,
    DestNodecrypt = 0x50,
    AppBlock = 0x60,
    AppAllow = 0x70,
    AppNodecrypt = 0x80,
    DestWarn = 0x90,
    AppWarn = 0xA0,
}

pub const LIST_KINDS: [ListKind; 10] = [
    ListKind::DestBlock,
    ListKind::Except,
    ListKind::DestAllow,
    ListKind::UrlProxyHttps,
    ListKind::DestNodecrypt,
    ListKind::AppBlock,
    ListKind::AppAllow,
    ListKind::AppNodecrypt,
    ListKind::DestWarn,
    ListKind::AppWarn,
];

impl ListKind {
    pub fn from_bits(bits: u8) -> Option<Self> {
        LIST_KINDS.get((bits >> 4).wrapping_sub(1) as usize).copied().filter(|_| bits & 0x0f == 0)
    }

    /// Position in the bundle's per-kind slot arrays.
    pub fn index(self) -> usize {
        ((self as u8) >> 4) as usize - 1
    }

    /// Except, url-proxy-https, dest-nodecrypt and app-nodecrypt lists
    /// must carry an empty category bit.
    pub fn requires_empty_bit(self) -> bool {
        matches!(
            self,
            Self::Except | Self::UrlProxyHttps | Self::DestNodecrypt | Self::AppNodecrypt
        )
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::DestBlock => "block dest",
            Self::Except => "exception",
            Self::DestAllow => "allow dest",
            Self::UrlProxyHttps => "url proxy",
            Self::DestNodecrypt => "nodecrypt dest",
            Self::AppBlock => "block app",
            Self::AppAllow => "allow app",
            Self::AppNodecrypt => "nodecrypt app",
            Self::DestWarn => "warn dest",
            Self::AppWarn => "warn app",
        }
    }
}

/// Packed list kind + actype.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct LType(u8);

/// Lists-style files carry no ltype; their lists sort under 0.
pub const LTYPE_NONE: LType = LType(0);

impl LType {
    pub fn new(kind: ListKind, actype: ActType) -> Self {
        Self(kind as u8 | actype as u8)
    }

    pub fn from_bits(bits: u8) -> Option<Self> {
        ListKind::from_bits(bits & 0xf0)?;
        ActType::from_bits(bits & 0x0f)?;
        Some(Self(bits))
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn kind(self) -> Option<ListKind> {
        ListKind::from_bits(self.0 & 0xf0)
    }

    pub fn actype(self) -> Option<ActType> {
        ActType::from_bits(self.0 & 0x0f)
    }
}

impl fmt::Display for LType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}", self.0)
    }
}

/// The kind of payload a preflist holds.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
#[repr(u8)]
pub enum ElementType {
    Application = 0,
    Cidr = 1,
    Domain = 2,
    Url = 3,
}

pub const ELEMENT_TYPES: [ElementType; 4] =
    [ElementType::Application, ElementType::Cidr, ElementType::Domain, ElementType::Url];

impl ElementType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "application" => Some(Self::Application),
            "cidr" => Some(Self::Cidr),
            "domain" => Some(Self::Domain),
            "url" => Some(Self::Url),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Application => "application",
            Self::Cidr => "cidr",
            Self::Domain => "domain",
            Self::Url => "url",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Destination list kinds hold destinations; app list kinds hold
/// application id sets. The two never mix.
pub fn ltype_matches_elementtype(ltype: LType, elementtype: ElementType) -> bool {
    // Kindless lists (lists-style files) are unconstrained.
    let Some(kind) = ltype.kind() else {
        return true;
    };

    let app_kind = matches!(
        kind,
        ListKind::AppBlock | ListKind::AppAllow | ListKind::AppNodecrypt | ListKind::AppWarn
    );

    match elementtype {
        ElementType::Application => app_kind,
        ElementType::Cidr | ElementType::Domain | ElementType::Url => !app_kind,
    }
}

/// A typed handle on one primitive list.
#[derive(Clone)]
pub enum ListPointer {
    Application(Arc<Uint32List>),
    Cidr(Arc<CidrList>),
    Domain(Arc<DomainList>),
    Url(Arc<UrlList>),
}

impl ListPointer {
    pub fn elementtype(&self) -> ElementType {
        match self {
            Self::Application(_) => ElementType::Application,
            Self::Cidr(_) => ElementType::Cidr,
            Self::Domain(_) => ElementType::Domain,
            Self::Url(_) => ElementType::Url,
        }
    }

    pub fn as_domainlist(&self) -> Option<&Arc<DomainList>> {
        match self {
            Self::Domain(dl) => Some(dl),
            _ => None,
        }
    }

    pub fn as_urllist(&self) -> Option<&Arc<UrlList>> {
        match self {
            Self::Url(ul) => Some(ul),
            _ => None,
        }
    }

    pub fn as_cidrlist(&self) -> Option<&Arc<CidrList>> {
        match self {
            Self::Cidr(cl) => Some(cl),
            _ => None,
        }
    }

    pub fn as_applicationlist(&self) -> Option<&Arc<Uint32List>> {
        match self {
            Self::Application(al) => Some(al),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ltype_packs_kind_and_actype() {
        let lt = LType::new(ListKind::AppBlock, ActType::Policy);
        assert_eq!(lt.bits(), 0x61);
        assert_eq!(lt.kind(), Some(ListKind::AppBlock));
        assert_eq!(lt.actype(), Some(ActType::Policy));
        assert_eq!(lt.to_string(), "61");

        assert!(LType::from_bits(0x61).is_some());
        assert!(LType::from_bits(0x0f).is_none());
        assert!(LType::from_bits(0xB0).is_none());
    }

    #[test]
    fn compatibility() {
        let app = LType::new(ListKind::AppBlock, ActType::Bundle);
        let dest = LType::new(ListKind::DestBlock, ActType::Bundle);

        assert!(ltype_matches_elementtype(app, ElementType::Application));
        assert!(!ltype_matches_elementtype(app, ElementType::Domain));
        assert!(ltype_matches_elementtype(dest, ElementType::Domain));
        assert!(ltype_matches_elementtype(dest, ElementType::Url));
        assert!(!ltype_matches_elementtype(dest, ElementType::Application));
    }

    #[test]
    fn empty_bit_kinds() {
        assert!(ListKind::Except.requires_empty_bit());
        assert!(ListKind::UrlProxyHttps.requires_empty_bit());
        assert!(ListKind::DestNodecrypt.requires_empty_bit());
        assert!(ListKind::AppNodecrypt.requires_empty_bit());
        assert!(!ListKind::DestBlock.requires_empty_bit());
        assert!(!ListKind::AppWarn.requires_empty_bit());
    }

    #[test]
    fn kind_index_matches_file_order() {
        for (i, kind) in LIST_KINDS.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }
}
