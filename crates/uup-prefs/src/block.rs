//! The compiled, sorted-array form of a preferences file.
//!
//! Every array is strictly sorted on its composite key so lookups are a
//! single binary search. Bundles reference their attached internal lists
//! through index runs in a shared pool and external lists through id
//! runs; both runs are terminated by [`PREF_NOLIST`].

use crate::categories::PrefCategories;
use crate::types::{ActType, BundleFlags, ElementType, LType, ListKind, ListPointer, OrgFlags};

/// Slot/run terminator in the listref and extlistref pools.
pub const PREF_NOLIST: u32 = u32::MAX;

/// Identity org index meaning "no org".
pub const NO_ORG_ITEM: u32 = u32::MAX;

pub struct PrefList {
    pub ltype: LType,
    pub id: u32,
    pub lp: ListPointer,
    pub bit: u8,
}

impl PrefList {
    pub fn elementtype(&self) -> ElementType {
        self.lp.elementtype()
    }

    pub fn key(&self) -> (LType, u32, ElementType) {
        (self.ltype, self.id, self.elementtype())
    }
}

pub struct PrefSettingGroup {
    pub idx: u8,
    pub id: u32,
    pub bundleflags: BundleFlags,
    pub blocked: PrefCategories,
    pub nodecrypt: PrefCategories,
    pub warn: PrefCategories,
}

pub const SETTINGGROUP_IDX_COUNT: usize = 4;

pub struct PrefBundle {
    pub actype: ActType,
    pub id: u32,
    pub priority: u32,
    pub bundleflags: BundleFlags,
    pub base_blocked: PrefCategories,
    pub base_nodecrypt: PrefCategories,
    pub base_warn: PrefCategories,
    pub sgids: [u32; SETTINGGROUP_IDX_COUNT],
    /// Start of this bundle's internal list run per kind, or PREF_NOLIST.
    pub lists: [u32; 10],
    /// Start of this bundle's external listid run per kind, or PREF_NOLIST.
    pub ext_lists: [u32; 10],
}

pub struct PrefOrg {
    pub id: u32,
    pub orgflags: OrgFlags,
    pub unmasked: PrefCategories,
    pub retention: u32,
    pub warnperiod: u32,
    pub originid: u32,
    pub parentid: u32,
}

pub struct PrefIdentity {
    pub originid: u32,
    pub origintypeid: u32,
    /// Index into orgs, or [`NO_ORG_ITEM`].
    pub org: u32,
    /// Index into bundles.
    pub bundle: u32,
}

#[derive(Default)]
pub struct PrefBlock {
    pub lists: Box<[PrefList]>,
    /// Pool of indices into `lists`; runs terminated by [`PREF_NOLIST`].
    pub listrefs: Box<[u32]>,
    /// Pool of external list ids; runs terminated by [`PREF_NOLIST`].
    pub extlistrefs: Box<[u32]>,
    pub settinggroups: Box<[PrefSettingGroup]>,
    pub bundles: Box<[PrefBundle]>,
    pub orgs: Box<[PrefOrg]>,
    pub identities: Box<[PrefIdentity]>,
}

impl PrefBlock {
    /// A block of `n` identities, each anchored to its own empty bundle
    /// and org. Hosts use these as listener default prefs.
    pub fn new_listener(n: usize) -> Self {
        let mut me = Self::default();

        me.identities = (0..n)
            .map(|i| PrefIdentity { originid: 0, origintypeid: 0, org: i as u32, bundle: i as u32 })
            .collect();
        me.bundles = (0..n)
            .map(|i| PrefBundle {
                actype: ActType::Bundle,
                id: i as u32,
                priority: u32::MAX,
                bundleflags: 0,
                base_blocked: PrefCategories::none(),
                base_nodecrypt: PrefCategories::none(),
                base_warn: PrefCategories::none(),
                sgids: [0; SETTINGGROUP_IDX_COUNT],
                lists: [PREF_NOLIST; 10],
                ext_lists: [PREF_NOLIST; 10],
            })
            .collect();
        me.orgs = (0..n)
            .map(|i| PrefOrg {
                id: i as u32,
                orgflags: 0,
                unmasked: PrefCategories::none(),
                retention: 0,
                warnperiod: 0,
                originid: 0,
                parentid: 0,
            })
            .collect();

        me
    }

    /// Look up a list by its composite key.
    pub fn list(&self, ltype: LType, id: u32, elementtype: ElementType) -> Option<&PrefList> {
        self.lists
            .binary_search_by(|l| l.key().cmp(&(ltype, id, elementtype)))
            .ok()
            .map(|i| &self.lists[i])
    }

    pub fn settinggroup(&self, idx: u8, id: u32) -> Option<&PrefSettingGroup> {
        self.settinggroups
            .binary_search_by(|sg| (sg.idx, sg.id).cmp(&(idx, id)))
            .ok()
            .map(|i| &self.settinggroups[i])
    }

    pub fn bundle(&self, actype: ActType, id: u32) -> Option<&PrefBundle> {
        self.bundles
            .binary_search_by(|b| (b.actype, b.id).cmp(&(actype, id)))
            .ok()
            .map(|i| &self.bundles[i])
    }

    pub fn bundle_index(&self, actype: ActType, id: u32) -> Option<usize> {
        self.bundles.binary_search_by(|b| (b.actype, b.id).cmp(&(actype, id))).ok()
    }

    pub fn org(&self, id: u32) -> Option<&PrefOrg> {
        self.orgs.binary_search_by(|o| o.id.cmp(&id)).ok().map(|i| &self.orgs[i])
    }

    pub fn org_index(&self, id: u32) -> Option<usize> {
        self.orgs.binary_search_by(|o| o.id.cmp(&id)).ok()
    }

    /// The i-th internal list attached to `bundle` under `kind`.
    pub fn bundle_list(&self, bundle: &PrefBundle, kind: ListKind, i: usize) -> Option<&PrefList> {
        let start = bundle.lists[kind.index()];

        if start == PREF_NOLIST {
            return None;
        }

        match self.listrefs.get(start as usize + i) {
            Some(&idx) if idx != PREF_NOLIST => self.lists.get(idx as usize),
            _ => None,
        }
    }

    /// The i-th external listid attached to `bundle` under `kind`.
    pub fn bundle_ext_listid(&self, bundle: &PrefBundle, kind: ListKind, i: usize) -> Option<u32> {
        let start = bundle.ext_lists[kind.index()];

        if start == PREF_NOLIST {
            return None;
        }

        match self.extlistrefs.get(start as usize + i) {
            Some(&id) if id != PREF_NOLIST => Some(id),
            _ => None,
        }
    }

    pub fn identity(&self, idx: usize) -> Option<&PrefIdentity> {
        self.identities.get(idx)
    }

    pub fn count_total(&self) -> usize {
        self.lists.len()
            + self.settinggroups.len()
            + self.bundles.len()
            + self.orgs.len()
            + self.identities.len()
    }
}
