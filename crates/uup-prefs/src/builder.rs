//! Mutable assembly buffer for a [`PrefBlock`].
//!
//! Sections arrive in file order (lists, settinggroups, bundles, orgs,
//! identities). Input must already be sorted; out-of-order or duplicate
//! keys are rejected rather than repaired. Attachments from bundles to
//! lists resolve to internal positions when the list was loaded, fall
//! back to external ids when permitted, and vanish silently when the
//! list was deliberately discarded.

use tracing::debug;

use crate::block::{
    NO_ORG_ITEM, PREF_NOLIST, PrefBlock, PrefBundle, PrefIdentity, PrefList, PrefOrg,
    PrefSettingGroup, SETTINGGROUP_IDX_COUNT,
};
use crate::categories::PrefCategories;
use crate::error::{PrefsError, Result};
use crate::types::{
    ActType, BundleFlags, ElementType, LType, ListKind, ListPointer, OrgFlags,
    ltype_matches_elementtype,
};

#[derive(Clone, Copy, Default)]
pub struct BuilderFlags {
    /// Attachments to unknown list ids are dropped instead of recorded
    /// as external references.
    pub no_external_refs: bool,
}

struct BuilderBundle {
    bundle: PrefBundle,
    internal: [Vec<u32>; 10],
    external: [Vec<u32>; 10],
}

#[derive(Default)]
pub struct PrefBuilder {
    flags: BuilderFlags,
    lists: Vec<PrefList>,
    discarded: Vec<(LType, u32, ElementType)>,
    settinggroups: Vec<PrefSettingGroup>,
    bundles: Vec<BuilderBundle>,
    orgs: Vec<PrefOrg>,
    identities: Vec<PrefIdentity>,
    alloc: Alloc,
}

#[derive(Default)]
struct Alloc {
    lists: usize,
    settinggroups: usize,
    bundles: usize,
    orgs: usize,
    identities: usize,
}

impl PrefBuilder {
    pub fn new(flags: BuilderFlags) -> Self {
        Self { flags, ..Self::default() }
    }

    pub fn alloc_lists(&mut self, n: usize) {
        self.alloc.lists += n;
        self.lists.reserve(n);
    }

    pub fn alloc_settinggroups(&mut self, n: usize) {
        self.alloc.settinggroups += n;
        self.settinggroups.reserve(n);
    }

    pub fn alloc_bundles(&mut self, n: usize) {
        self.alloc.bundles += n;
        self.bundles.reserve(n);
    }

    pub fn alloc_orgs(&mut self, n: usize) {
        self.alloc.orgs += n;
        self.orgs.reserve(n);
    }

    pub fn alloc_identities(&mut self, n: usize) {
        self.alloc.identities += n;
        self.identities.reserve(n);
    }

    pub fn list_count(&self) -> usize {
        self.lists.len()
    }

    /// Append a list; keys must arrive in strictly ascending
    /// (ltype, id, elementtype) order.
    pub fn add_list(&mut self, ltype: LType, id: u32, lp: ListPointer, bit: u8) -> Result<()> {
        let elementtype = lp.elementtype();

        if !ltype_matches_elementtype(ltype, elementtype) {
            return Err(PrefsError::Incompatible {
                ltype: ltype.bits(),
                elementtype: elementtype.name(),
            });
        }

        if ltype.kind().is_some_and(ListKind::requires_empty_bit) && bit != 0 {
            return Err(PrefsError::BitNotEmpty { ltype: ltype.bits() });
        }

        if self.lists.len() >= self.alloc.lists {
            return Err(PrefsError::Overfull { section: "lists", alloc: self.alloc.lists });
        }

        let key = (ltype, id, elementtype);

        if self.lists.last().is_some_and(|last| last.key() >= key) {
            return Err(PrefsError::Unordered { section: "lists" });
        }

        self.lists.push(PrefList { ltype, id, lp, bit });
        Ok(())
    }

    /// Record a list id that the load flags excluded, so that bundle
    /// attachments naming it drop silently instead of erroring.
    pub fn disc_list(&mut self, ltype: LType, id: u32, elementtype: ElementType) {
        self.discarded.push((ltype, id, elementtype));
    }

    pub fn add_settinggroup(
        &mut self,
        idx: u8,
        id: u32,
        bundleflags: BundleFlags,
        blocked: PrefCategories,
        nodecrypt: PrefCategories,
        warn: PrefCategories,
    ) -> Result<()> {
        if idx as usize >= SETTINGGROUP_IDX_COUNT {
            return Err(PrefsError::Unordered { section: "settinggroup" });
        }

        if self.settinggroups.len() >= self.alloc.settinggroups {
            return Err(PrefsError::Overfull {
                section: "settinggroup",
                alloc: self.alloc.settinggroups,
            });
        }

        if self.settinggroups.last().is_some_and(|last| (last.idx, last.id) >= (idx, id)) {
            return Err(PrefsError::Unordered { section: "settinggroup" });
        }

        self.settinggroups.push(PrefSettingGroup { idx, id, bundleflags, blocked, nodecrypt, warn });
        Ok(())
    }

    pub fn add_bundle(
        &mut self,
        actype: ActType,
        id: u32,
        priority: u32,
        bundleflags: BundleFlags,
        base_blocked: PrefCategories,
        sgids: [u32; SETTINGGROUP_IDX_COUNT],
    ) -> Result<()> {
        if self.bundles.len() >= self.alloc.bundles {
            return Err(PrefsError::Overfull { section: "bundles", alloc: self.alloc.bundles });
        }

        if self
            .bundles
            .last()
            .is_some_and(|last| (last.bundle.actype, last.bundle.id) >= (actype, id))
        {
            return Err(PrefsError::Unordered { section: "bundles" });
        }

        self.bundles.push(BuilderBundle {
            bundle: PrefBundle {
                actype,
                id,
                priority,
                bundleflags,
                base_blocked,
                base_nodecrypt: PrefCategories::none(),
                base_warn: PrefCategories::none(),
                sgids,
                lists: [PREF_NOLIST; 10],
                ext_lists: [PREF_NOLIST; 10],
            },
            internal: Default::default(),
            external: Default::default(),
        });
        Ok(())
    }

    /// Attach a list to the most recent bundle's slot for the ltype's
    /// kind, trying each accepted elementtype in order.
    ///
    /// Unknown ids become external references unless forbidden; ids the
    /// loader discarded vanish quietly.
    pub fn attach_list(
        &mut self,
        bundleid: u32,
        ltype: LType,
        listid: u32,
        accept: impl Fn(ElementType) -> bool,
    ) -> Result<()> {
        let kind = ltype.kind().ok_or(PrefsError::Incompatible {
            ltype: ltype.bits(),
            elementtype: "none",
        })?;

        let Some(builder_bundle) = self.bundles.last_mut() else {
            return Err(PrefsError::BadIdentity);
        };

        debug_assert_eq!(builder_bundle.bundle.id, bundleid, "attach targets the current bundle");

        for et in crate::types::ELEMENT_TYPES {
            if !accept(et) || !ltype_matches_elementtype(ltype, et) {
                continue;
            }

            if let Ok(i) = self.lists.binary_search_by(|l| l.key().cmp(&(ltype, listid, et))) {
                builder_bundle.internal[kind.index()].push(i as u32);
                return Ok(());
            }
        }

        if self.discarded.iter().any(|&(lt, id, _)| lt == ltype && id == listid) {
            debug!(bundleid, listid, "dropping attachment to discarded list");
            return Ok(());
        }

        if self.flags.no_external_refs {
            debug!(bundleid, listid, "dropping external list reference");
            return Ok(());
        }

        builder_bundle.external[kind.index()].push(listid);
        Ok(())
    }

    pub fn add_org(
        &mut self,
        id: u32,
        orgflags: OrgFlags,
        unmasked: PrefCategories,
        retention: u32,
        warnperiod: u32,
        originid: u32,
        parentid: u32,
    ) -> Result<()> {
        if self.orgs.len() >= self.alloc.orgs {
            return Err(PrefsError::Overfull { section: "orgs", alloc: self.alloc.orgs });
        }

        if self.orgs.last().is_some_and(|last| last.id >= id) {
            return Err(PrefsError::Unordered { section: "orgs" });
        }

        self.orgs.push(PrefOrg { id, orgflags, unmasked, retention, warnperiod, originid, parentid });
        Ok(())
    }

    /// Append an identity, resolving its org and bundle references.
    ///
    /// Fails when the bundle (or a non-zero org) is unknown; the caller
    /// decides whether that is fatal (strict) or skips the row (lenient).
    pub fn add_identity(
        &mut self,
        originid: u32,
        origintypeid: u32,
        orgid: u32,
        actype: ActType,
        bundleid: u32,
    ) -> Result<()> {
        if self.identities.len() >= self.alloc.identities {
            return Err(PrefsError::Overfull {
                section: "identities",
                alloc: self.alloc.identities,
            });
        }

        let org = if orgid == 0 {
            NO_ORG_ITEM
        } else {
            match self.orgs.binary_search_by(|o| o.id.cmp(&orgid)) {
                Ok(i) => i as u32,
                Err(_) => return Err(PrefsError::BadIdentity),
            }
        };

        let bundle = match self
            .bundles
            .binary_search_by(|b| (b.bundle.actype, b.bundle.id).cmp(&(actype, bundleid)))
        {
            Ok(i) => i as u32,
            Err(_) => return Err(PrefsError::BadIdentity),
        };

        self.identities.push(PrefIdentity { originid, origintypeid, org, bundle });
        Ok(())
    }

    /// Snapshot the chunks into a right-sized block.
    pub fn consume(mut self) -> PrefBlock {
        let mut listrefs = Vec::new();
        let mut extlistrefs = Vec::new();

        let bundles = self
            .bundles
            .drain(..)
            .map(|mut bb| {
                for kind in 0..10 {
                    if !bb.internal[kind].is_empty() {
                        bb.bundle.lists[kind] = listrefs.len() as u32;
                        listrefs.extend_from_slice(&bb.internal[kind]);
                        listrefs.push(PREF_NOLIST);
                    }

                    if !bb.external[kind].is_empty() {
                        bb.bundle.ext_lists[kind] = extlistrefs.len() as u32;
                        extlistrefs.extend_from_slice(&bb.external[kind]);
                        extlistrefs.push(PREF_NOLIST);
                    }
                }

                bb.bundle
            })
            .collect();

        PrefBlock {
            lists: self.lists.drain(..).collect(),
            listrefs: listrefs.into(),
            extlistrefs: extlistrefs.into(),
            settinggroups: self.settinggroups.drain(..).collect(),
            bundles,
            orgs: self.orgs.drain(..).collect(),
            identities: self.identities.drain(..).collect(),
        }
    }

    pub fn identity_count(&self) -> usize {
        self.identities.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use uup_lists::{DomainList, DomainListFlags, Uint32List};

    fn domain_lp(names: &str) -> ListPointer {
        ListPointer::Domain(
            DomainList::from_buffer(names.as_bytes(), DomainListFlags::default(), None)
                .expect("valid list"),
        )
    }

    fn app_lp(ids: &str) -> ListPointer {
        ListPointer::Application(Uint32List::from_text(ids, None).expect("valid list"))
    }

    fn dest_block() -> LType {
        LType::new(ListKind::DestBlock, ActType::Bundle)
    }

    #[test]
    fn ordered_adds_and_lookup() {
        let mut pb = PrefBuilder::new(BuilderFlags::default());
        pb.alloc_lists(3);

        pb.add_list(dest_block(), 1, domain_lp("a.com"), 3).expect("adds");
        pb.add_list(dest_block(), 2, domain_lp("b.com"), 4).expect("adds");
        assert!(pb.add_list(dest_block(), 2, domain_lp("c.com"), 5).is_err(), "duplicate");
        assert!(pb.add_list(dest_block(), 1, domain_lp("d.com"), 6).is_err(), "out of order");

        let blk = pb.consume();
        assert!(blk.list(dest_block(), 1, ElementType::Domain).is_some());
        assert!(blk.list(dest_block(), 3, ElementType::Domain).is_none());
    }

    #[test]
    fn incompatible_pairs_are_rejected() {
        let mut pb = PrefBuilder::new(BuilderFlags::default());
        pb.alloc_lists(2);

        let app_ltype = LType::new(ListKind::AppBlock, ActType::Bundle);
        assert!(matches!(
            pb.add_list(app_ltype, 1, domain_lp("a.com"), 1),
            Err(PrefsError::Incompatible { .. })
        ));
        assert!(pb.add_list(app_ltype, 1, app_lp("4 5"), 1).is_ok());
    }

    #[test]
    fn empty_bit_enforcement() {
        let mut pb = PrefBuilder::new(BuilderFlags::default());
        pb.alloc_lists(2);

        let except = LType::new(ListKind::Except, ActType::Bundle);
        assert!(matches!(
            pb.add_list(except, 1, domain_lp("a.com"), 9),
            Err(PrefsError::BitNotEmpty { .. })
        ));
        assert!(pb.add_list(except, 1, domain_lp("a.com"), 0).is_ok());
    }

    #[test]
    fn attachment_resolution() {
        let mut pb = PrefBuilder::new(BuilderFlags::default());
        pb.alloc_lists(1);
        pb.alloc_bundles(1);

        pb.add_list(dest_block(), 7, domain_lp("a.com"), 1).expect("adds");
        pb.add_bundle(ActType::Bundle, 1, 0, 0, PrefCategories::none(), [0; 4]).expect("adds");

        pb.attach_list(1, dest_block(), 7, |_| true).expect("internal");
        pb.attach_list(1, dest_block(), 99, |_| true).expect("external");

        let blk = pb.consume();
        let bundle = blk.bundle(ActType::Bundle, 1).expect("bundle");

        let attached = blk.bundle_list(bundle, ListKind::DestBlock, 0).expect("first list");
        assert_eq!(attached.id, 7);
        assert!(blk.bundle_list(bundle, ListKind::DestBlock, 1).is_none());

        assert_eq!(blk.bundle_ext_listid(bundle, ListKind::DestBlock, 0), Some(99));
        assert_eq!(blk.bundle_ext_listid(bundle, ListKind::DestBlock, 1), None);
    }

    #[test]
    fn discarded_and_forbidden_attachments_drop() {
        let mut pb = PrefBuilder::new(BuilderFlags { no_external_refs: true });
        pb.alloc_bundles(1);

        pb.disc_list(dest_block(), 7, ElementType::Cidr);
        pb.add_bundle(ActType::Bundle, 1, 0, 0, PrefCategories::none(), [0; 4]).expect("adds");

        pb.attach_list(1, dest_block(), 7, |_| true).expect("discarded drops");
        pb.attach_list(1, dest_block(), 99, |_| true).expect("external drops");

        let blk = pb.consume();
        let bundle = blk.bundle(ActType::Bundle, 1).expect("bundle");
        assert!(blk.bundle_list(bundle, ListKind::DestBlock, 0).is_none());
        assert_eq!(blk.bundle_ext_listid(bundle, ListKind::DestBlock, 0), None);
    }

    #[test]
    fn identity_resolution() {
        let mut pb = PrefBuilder::new(BuilderFlags::default());
        pb.alloc_bundles(1);
        pb.alloc_orgs(1);
        pb.alloc_identities(2);

        pb.add_bundle(ActType::Origin, 9, 0, 0, PrefCategories::none(), [0; 4]).expect("adds");
        pb.add_org(1234, 0, PrefCategories::none(), 0, 0, 55, 0).expect("adds");

        pb.add_identity(55, 2, 1234, ActType::Origin, 9).expect("resolves");
        assert!(pb.add_identity(56, 2, 1234, ActType::Origin, 10).is_err(), "unknown bundle");

        let blk = pb.consume();
        let ident = blk.identity(0).expect("present");
        assert_eq!(ident.originid, 55);
        assert_eq!(blk.orgs[ident.org as usize].id, 1234);
        assert_eq!(blk.bundles[ident.bundle as usize].id, 9);
    }
}
