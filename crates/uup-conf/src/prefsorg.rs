//! The prefs-org family: policy ("rules"), cidrprefs, urlprefs and
//! cloudprefs segments.
//!
//! All four wrap a compiled [`uup_prefs::PrefBlock`]; they differ in the
//! file type name, the element types they keep, and whether they carry
//! origin-keyed identities.

use std::sync::Arc;

use tracing::warn;

use uup_prefs::{
    ActType, FileKind, FilePrefs, KeyKind, ListCatalog, Pref, PrefBlock, PrefsLoadFlags,
    parse_prefs,
};

use crate::error::Result;
use crate::loader::ConfLoader;
use crate::segment::{SegmentData, SegmentInfo, Segmented};

pub const RULES_VERSION: u32 = 1;
pub const CIDRPREFS_VERSION: u32 = 1;
pub const URLPREFS_VERSION: u32 = 1;
pub const CLOUDPREFS_VERSION: u32 = 1;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PrefsFlavor {
    /// Bundle-level policy; no identities.
    Rules,
    /// CIDR destination lists only.
    CidrPrefs,
    /// URL destination lists only.
    UrlPrefs,
    /// Origin-keyed identities (EDNS0 ids and the like).
    CloudPrefs,
}

const RULES_KIND: FileKind = FileKind {
    type_name: "rules",
    supported_versions: &[RULES_VERSION],
    key: KeyKind::None,
    lists_only: false,
};

const CIDRPREFS_KIND: FileKind = FileKind {
    type_name: "cidrprefs",
    supported_versions: &[CIDRPREFS_VERSION],
    key: KeyKind::None,
    lists_only: false,
};

const URLPREFS_KIND: FileKind = FileKind {
    type_name: "urlprefs",
    supported_versions: &[URLPREFS_VERSION],
    key: KeyKind::None,
    lists_only: false,
};

const CLOUDPREFS_KIND: FileKind = FileKind {
    type_name: "cloudprefs",
    supported_versions: &[CLOUDPREFS_VERSION],
    key: KeyKind::Origin,
    lists_only: false,
};

impl PrefsFlavor {
    pub fn file_kind(self) -> &'static FileKind {
        match self {
            Self::Rules => &RULES_KIND,
            Self::CidrPrefs => &CIDRPREFS_KIND,
            Self::UrlPrefs => &URLPREFS_KIND,
            Self::CloudPrefs => &CLOUDPREFS_KIND,
        }
    }

    pub fn load_flags(self, strict: bool) -> PrefsLoadFlags {
        let mut flags = match self {
            Self::Rules | Self::CloudPrefs => PrefsLoadFlags::accept_all(),
            Self::CidrPrefs => PrefsLoadFlags {
                accept_cidr: true,
                allow_other_types: true,
                ..PrefsLoadFlags::default()
            },
            Self::UrlPrefs => PrefsLoadFlags {
                accept_url: true,
                allow_other_types: true,
                ..PrefsLoadFlags::default()
            },
        };

        flags.allow_bundle_extrefs = true;
        flags.strict_refs = strict;
        flags
    }
}

pub struct PrefsOrg {
    info: SegmentInfo,
    prefs: FilePrefs,
}

impl SegmentData for PrefsOrg {
    fn info(&self) -> &SegmentInfo {
        &self.info
    }

    fn is_empty(&self) -> bool {
        self.prefs.block.count_total() == 0
    }
}

impl PrefsOrg {
    pub fn parse(
        orgid: u32,
        loader: &ConfLoader,
        flavor: PrefsFlavor,
        strict: bool,
        catalog: &ListCatalog,
        mtime: i64,
    ) -> Result<Self> {
        let path = loader.path().display().to_string();
        let prefs =
            parse_prefs(loader.text(), &path, flavor.file_kind(), flavor.load_flags(strict), catalog)?;

        if flavor == PrefsFlavor::CloudPrefs && orgid == 0 && !prefs.block.orgs.is_empty() {
            warn!(
                "{path}: Expected zero org entries in 'orgs' section for org 0 but found {}",
                prefs.block.orgs.len()
            );
            let digest = loader.digest();
            return Ok(Self::failed(orgid, mtime, digest));
        }

        let alloc = prefs.block.count_total() as u64 * 64;

        Ok(Self { info: SegmentInfo::new(orgid, mtime, alloc, loader.digest()), prefs })
    }

    pub fn failed(orgid: u32, mtime: i64, digest: [u8; 16]) -> Self {
        Self {
            info: SegmentInfo::failed(orgid, mtime, digest),
            prefs: FilePrefs {
                version: 0,
                block: PrefBlock::default(),
                keys: Box::default(),
                loaded: 0,
            },
        }
    }

    pub fn block(&self) -> &PrefBlock {
        &self.prefs.block
    }

    pub fn prefs(&self) -> &FilePrefs {
        &self.prefs
    }
}

pub struct PrefsOrgConf {
    flavor: PrefsFlavor,
    segments: Segmented<PrefsOrg>,
}

impl PrefsOrgConf {
    pub fn new(flavor: PrefsFlavor, segments: Segmented<PrefsOrg>) -> Self {
        Self { flavor, segments }
    }

    pub fn flavor(&self) -> PrefsFlavor {
        self.flavor
    }

    pub fn segments(&self) -> &Segmented<PrefsOrg> {
        &self.segments
    }

    pub fn find_org(&self, orgid: u32) -> Option<&Arc<PrefsOrg>> {
        self.segments.find(orgid).filter(|s| !s.info().failed_load)
    }

    /// Resolve the parent and global blocks for a child org's block.
    fn inherited(&self, block: &PrefBlock, orgid: u32, global_org_id: u32) -> (Option<&PrefBlock>, Option<&PrefBlock>) {
        let parent = block
            .org(orgid)
            .map(|o| o.parentid)
            .filter(|&p| p != 0)
            .and_then(|p| self.find_org(p))
            .map(|seg| seg.block());

        let global = (global_org_id != 0)
            .then(|| self.find_org(global_org_id))
            .flatten()
            .map(|seg| seg.block());

        (parent, global)
    }

    /// Look up a pref by origin identity (cloudprefs).
    pub fn pref_by_origin(
        &self,
        orgid: u32,
        originid: u32,
        global_org_id: u32,
    ) -> Option<Pref<'_>> {
        let seg = self.find_org(orgid)?;
        let idx = seg.prefs.find_key(originid)?;
        let (parent, global) = self.inherited(seg.block(), orgid, global_org_id);

        Pref::by_identity(seg.block(), parent, global, idx, global_org_id)
    }

    /// Look up a pref by (org, bundle) — the policy entry point.
    pub fn pref_by_bundle(
        &self,
        orgid: u32,
        actype: ActType,
        bundleid: u32,
        global_org_id: u32,
    ) -> Option<Pref<'_>> {
        let seg = self.find_org(orgid)?;
        let (parent, global) = self.inherited(seg.block(), orgid, global_org_id);

        Pref::by_bundle(seg.block(), parent, global, orgid, actype, bundleid, global_org_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn load(orgid: u32, body: &str, flavor: PrefsFlavor, catalog: &ListCatalog) -> PrefsOrg {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(format!("prefs.{orgid}"));
        fs::write(&path, body).expect("writes");
        let loader = ConfLoader::open(&path).expect("opens");

        PrefsOrg::parse(orgid, &loader, flavor, false, catalog, 0).expect("parses")
    }

    const CLOUD: &str = "cloudprefs 1\n\
                         count 4\n\
                         [lists:1]\n\
                         10:1:domain:70:ABCD:bad.com\n\
                         [bundles:1]\n\
                         0:1:32:0:0::1:::::::::\n\
                         [orgs:1]\n\
                         1234:0:0:365:30:100:0\n\
                         [identities:1]\n\
                         1234:55:55:22:1234:0:1\n";

    #[test]
    fn origin_keyed_resolution() {
        let catalog = ListCatalog::new(2);
        let mut segments = Segmented::new();
        segments.use_segment(Arc::new(load(1234, CLOUD, PrefsFlavor::CloudPrefs, &catalog)));

        let conf = PrefsOrgConf::new(PrefsFlavor::CloudPrefs, segments);

        let pref = conf.pref_by_origin(1234, 55, 0).expect("resolves");
        assert_eq!(pref.bundle().id, 1);
        assert_eq!(pref.org().expect("org").id, 1234);

        assert!(conf.pref_by_origin(1234, 56, 0).is_none(), "unknown origin");
        assert!(conf.pref_by_origin(999, 55, 0).is_none(), "unknown org");
    }

    #[test]
    fn bundle_resolution() {
        let catalog = ListCatalog::new(2);
        let mut segments = Segmented::new();
        segments.use_segment(Arc::new(load(1234, CLOUD, PrefsFlavor::CloudPrefs, &catalog)));

        let conf = PrefsOrgConf::new(PrefsFlavor::CloudPrefs, segments);
        let pref = conf.pref_by_bundle(1234, ActType::Bundle, 1, 0).expect("resolves");
        assert_eq!(pref.bundle().priority, 32);
    }

    #[test]
    fn cidrprefs_drop_other_elementtypes() {
        let body = "cidrprefs 1\n\
                    count 3\n\
                    [lists:2]\n\
                    10:1:cidr:70:AAAA:10.0.0.0/8\n\
                    10:2:domain:71:BBBB:dropped.com\n\
                    [bundles:1]\n\
                    0:1:32:0:0::1 2:::::::::\n";
        let catalog = ListCatalog::new(2);
        let seg = load(7, body, PrefsFlavor::CidrPrefs, &catalog);

        assert_eq!(seg.block().lists.len(), 1, "domain list discarded");
        let bundle = &seg.block().bundles[0];
        assert!(seg.block().bundle_list(bundle, uup_prefs::ListKind::DestBlock, 0).is_some());
        assert!(seg.block().bundle_list(bundle, uup_prefs::ListKind::DestBlock, 1).is_none());
    }

    #[test]
    fn cloudprefs_org_zero_must_be_orgless() {
        let body = "cloudprefs 1\n\
                    count 1\n\
                    [orgs:1]\n\
                    5:0:0:365:30:1:0\n";
        let catalog = ListCatalog::new(2);
        let seg = load(0, body, PrefsFlavor::CloudPrefs, &catalog);
        assert!(seg.info().failed_load);

        let ok = "cloudprefs 1\ncount 0\n";
        let seg = load(0, ok, PrefsFlavor::CloudPrefs, &catalog);
        assert!(!seg.info().failed_load);
    }
}
