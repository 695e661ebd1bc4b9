//! Policy resolution.
//!
//! A [`Pref`] is a small cursor over a prefblock plus the parent and
//! global blocks it inherits from. Match operations run two passes: the
//! bundle's internal lists first, then its external references resolved
//! against the parent block and finally the global block. Cooking folds
//! settinggroups (RAW→SIMMER) and then listener/geography overloads
//! (SIMMER→BOIL) into the cursor's effective flags and categories.

use std::net::IpAddr;

use tracing::debug;

use crate::block::{NO_ORG_ITEM, PrefBlock, PrefBundle, PrefIdentity, PrefList, PrefOrg};
use crate::categories::{
    CATEGORY_BIT_ALLOWAPP, CATEGORY_BIT_ALLOWLIST, CATEGORY_BIT_BLOCKAPP, CATEGORY_BIT_BLOCKLIST,
    CATEGORY_BIT_GLOBAL_ALLOWLIST, CATEGORY_BIT_NEWLY_SEEN_DOMAINS, PrefCategories,
};
use crate::overloads::OverloadedPref;
use crate::types::{
    ActType, BundleFlags, ElementType, LType, ListKind, OrgFlags, ORGFLAG_PROXY_NEWLY_SEEN_DOMAINS,
};
use uup_lists::domainlist::MatchKind;
use uup_lists::dnsname::name_to_text;
use uup_lists::xray::Xray;

/// The application/categorization surface the conf layer exposes to
/// pref-level matching.
pub trait AppCatalog {
    /// Does `appid`'s domain list contain `name`? On a hit the gating
    /// entry's category bit is set in `match_out`.
    fn match_appid(
        &self,
        match_out: &mut PrefCategories,
        appid: u32,
        name: &[u8],
        polbits: BundleFlags,
        orgbits: OrgFlags,
        find: &PrefCategories,
        x: Option<&dyn Xray>,
    ) -> bool;

    /// Does `appid`'s proxy domain list contain `name`?
    fn proxy_appid(
        &self,
        appid: u32,
        name: &[u8],
        polbits: BundleFlags,
        orgbits: OrgFlags,
        x: Option<&dyn Xray>,
    ) -> bool;

    /// Cheap pre-check: could *any* application's proxy list match?
    fn might_proxy(
        &self,
        name: &[u8],
        polbits: BundleFlags,
        orgbits: OrgFlags,
        x: Option<&dyn Xray>,
    ) -> bool;

    /// Does `appid`'s URL list match this normalized URL?
    fn match_url_byid(&self, appid: u32, url: &[u8]) -> bool;
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum CookState {
    Raw,
    Simmer,
    Boil,
}

pub struct Pref<'a> {
    blk: &'a PrefBlock,
    parentblk: Option<&'a PrefBlock>,
    globalblk: Option<&'a PrefBlock>,
    org: Option<&'a PrefOrg>,
    parentorg: Option<&'a PrefOrg>,
    globalorg: Option<&'a PrefOrg>,
    identity_idx: Option<usize>,
    bundle_idx: usize,
    cooked: CookState,
    pub cooked_orgflags: OrgFlags,
    pub cooked_bundleflags: BundleFlags,
    pub cooked_categories: PrefCategories,
    pub cooked_nodecrypt_categories: PrefCategories,
    pub cooked_warn_categories: PrefCategories,
}

impl<'a> Pref<'a> {
    /// Anchor a cursor at an identity.
    pub fn by_identity(
        blk: &'a PrefBlock,
        pblk: Option<&'a PrefBlock>,
        gblk: Option<&'a PrefBlock>,
        idx: usize,
        global_org_id: u32,
    ) -> Option<Self> {
        let ident = blk.identity(idx)?;
        let org =
            if ident.org == NO_ORG_ITEM { None } else { blk.orgs.get(ident.org as usize) };
        Self::common(blk, pblk, gblk, Some(idx), ident.bundle as usize, org, global_org_id)
    }

    /// Anchor a cursor at a bundle within an org.
    pub fn by_bundle(
        blk: &'a PrefBlock,
        pblk: Option<&'a PrefBlock>,
        gblk: Option<&'a PrefBlock>,
        orgid: u32,
        actype: ActType,
        bundleid: u32,
        global_org_id: u32,
    ) -> Option<Self> {
        let bundle_idx = blk.bundle_index(actype, bundleid)?;
        let org = if orgid == 0 { None } else { blk.org(orgid) };
        Self::common(blk, pblk, gblk, None, bundle_idx, org, global_org_id)
    }

    fn common(
        blk: &'a PrefBlock,
        pblk: Option<&'a PrefBlock>,
        gblk: Option<&'a PrefBlock>,
        identity_idx: Option<usize>,
        bundle_idx: usize,
        org: Option<&'a PrefOrg>,
        global_org_id: u32,
    ) -> Option<Self> {
        if bundle_idx >= blk.bundles.len() {
            return None;
        }

        let mut me = Self {
            blk,
            parentblk: None,
            globalblk: None,
            org,
            parentorg: None,
            globalorg: None,
            identity_idx,
            bundle_idx,
            cooked: CookState::Raw,
            cooked_orgflags: 0,
            cooked_bundleflags: 0,
            cooked_categories: PrefCategories::none(),
            cooked_nodecrypt_categories: PrefCategories::none(),
            cooked_warn_categories: PrefCategories::none(),
        };

        if let Some(org) = me.org {
            if org.parentid != 0 {
                let parentblk = pblk.unwrap_or(blk);
                me.parentblk = Some(parentblk);
                me.parentorg = parentblk.org(org.parentid);
            }
        }

        if global_org_id != 0 {
            let globalblk = gblk.unwrap_or(blk);
            me.globalblk = Some(globalblk);
            me.globalorg = globalblk.org(global_org_id);
        }

        Some(me)
    }

    pub fn block(&self) -> &'a PrefBlock {
        self.blk
    }

    pub fn bundle(&self) -> &'a PrefBundle {
        &self.blk.bundles[self.bundle_idx]
    }

    pub fn identity(&self) -> Option<&'a PrefIdentity> {
        self.identity_idx.and_then(|i| self.blk.identity(i))
    }

    pub fn org(&self) -> Option<&'a PrefOrg> {
        self.org
    }

    pub fn parent_org(&self) -> Option<&'a PrefOrg> {
        self.parentorg
    }

    pub fn global_org(&self) -> Option<&'a PrefOrg> {
        self.globalorg
    }

    pub fn cook_state(&self) -> CookState {
        self.cooked
    }

    /// Effective bundle flags (cooked once cooked).
    pub fn bundleflags(&self) -> BundleFlags {
        if self.cooked == CookState::Raw {
            self.bundle().bundleflags
        } else {
            self.cooked_bundleflags
        }
    }

    /// Effective org flags (cooked once cooked).
    pub fn orgflags(&self) -> OrgFlags {
        if self.cooked == CookState::Raw {
            self.org.map_or(0, |o| o.orgflags)
        } else {
            self.cooked_orgflags
        }
    }

    /// Union of the unmasked categories of the org chain.
    pub fn unmasked(&self) -> PrefCategories {
        let mut out = PrefCategories::none();

        for org in [self.org, self.parentorg, self.globalorg].into_iter().flatten() {
            out.union_with(&org.unmasked);
        }

        out
    }

    /// If the org proxies newly seen domains and the query was
    /// categorized as one, say so.
    pub fn proxy_newly_seen_domain(
        &self,
        categories: &PrefCategories,
        name: &[u8],
        x: Option<&dyn Xray>,
    ) -> bool {
        if self.orgflags() & ORGFLAG_PROXY_NEWLY_SEEN_DOMAINS != 0
            && categories.get_bit(CATEGORY_BIT_NEWLY_SEEN_DOMAINS)
        {
            uup_lists::xray!(x, "{} is a newly seen domain and org {} proxies them",
                name_to_text(name).unwrap_or_default(),
                self.org.map_or(0, |o| o.id));
            return true;
        }

        false
    }

    fn internal_list(&self, kind: ListKind, i: usize) -> Option<&'a PrefList> {
        self.blk.bundle_list(self.bundle(), kind, i)
    }

    fn ext_listid(&self, kind: ListKind, i: usize) -> Option<u32> {
        self.blk.bundle_ext_listid(self.bundle(), kind, i)
    }

    /// Resolve an external listid against the parent, then global block.
    fn ext_list(&self, ltype: LType, id: u32, et: ElementType) -> Option<&'a PrefList> {
        self.parentblk
            .and_then(|blk| blk.list(ltype, id, et))
            .or_else(|| self.globalblk.and_then(|blk| blk.list(ltype, id, et)))
    }

    fn ltype(&self, kind: ListKind) -> LType {
        LType::new(kind, self.bundle().actype)
    }

    /// Match `name` against every attached domain list of `kind`,
    /// accumulating the category bits of the lists that hit.
    pub fn domainlist_match(
        &self,
        match_out: Option<&mut PrefCategories>,
        kind: ListKind,
        name: &[u8],
        matchkind: MatchKind,
        x: Option<&dyn Xray>,
    ) -> bool {
        let mut cat = PrefCategories::none();
        let mut ret = false;
        let ltype = self.ltype(kind);

        let mut i = 0;

        while let Some(list) = self.internal_list(kind, i) {
            i += 1;

            if list.elementtype() == ElementType::Domain && (!ret || !cat.get_bit(list.bit.into()))
            {
                if let Some(dl) = list.lp.as_domainlist() {
                    let pname = format!("preflist {ltype}:{}:domain", list.id);

                    if dl.matches(name, matchkind, x, &pname).is_some() {
                        cat.set_bit(list.bit.into());
                        ret = true;
                    }
                }
            }
        }

        if self.parentblk.is_some() || self.globalblk.is_some() {
            let mut i = 0;

            while let Some(lid) = self.ext_listid(kind, i) {
                i += 1;

                if let Some(list) = self.ext_list(ltype, lid, ElementType::Domain) {
                    if !ret || !cat.get_bit(list.bit.into()) {
                        if let Some(dl) = list.lp.as_domainlist() {
                            let pname = format!("preflist {ltype}:{}:domain", list.id);

                            if dl.matches(name, matchkind, x, &pname).is_some() {
                                cat.set_bit(list.bit.into());
                                ret = true;
                            }
                        }
                    }
                }
            }
        }

        if let Some(out) = match_out {
            out.union_with(&cat);
        }

        ret
    }

    /// Match `name` against the applications named by every attached
    /// application list of `kind`. Returns the last matching appid, or 0.
    pub fn applicationlist_domain_match(
        &self,
        match_out: Option<&mut PrefCategories>,
        kind: ListKind,
        name: &[u8],
        find: &PrefCategories,
        app: &dyn AppCatalog,
        x: Option<&dyn Xray>,
    ) -> u32 {
        let mut cat = PrefCategories::none();
        let mut ret = 0;
        let (polbits, orgbits) = (self.bundleflags(), self.orgflags());

        let mut each = |list: &PrefList, cat: &mut PrefCategories, ret: &mut u32| {
            if let Some(al) = list.lp.as_applicationlist() {
                for appid in al.iter() {
                    if app.match_appid(cat, appid, name, polbits, orgbits, find, x) {
                        cat.set_bit(list.bit.into());
                        *ret = appid;
                    }
                }
            }
        };

        let mut i = 0;

        while let Some(list) = self.internal_list(kind, i) {
            i += 1;

            if list.elementtype() == ElementType::Application
                && (ret == 0 || !cat.get_bit(list.bit.into()))
            {
                each(list, &mut cat, &mut ret);
            }
        }

        if self.parentblk.is_some() || self.globalblk.is_some() {
            let ltype = self.ltype(kind);
            let mut i = 0;

            while let Some(lid) = self.ext_listid(kind, i) {
                i += 1;

                if let Some(list) = self.ext_list(ltype, lid, ElementType::Application) {
                    if ret == 0 || !cat.get_bit(list.bit.into()) {
                        each(list, &mut cat, &mut ret);
                    }
                }
            }
        }

        if let Some(out) = match_out {
            out.union_with(&cat);
        }

        ret
    }

    /// Return an appid whose proxy list matches `name`, after a cheap
    /// any-application pre-check over the super-index.
    pub fn applicationlist_proxy(
        &self,
        name: &[u8],
        kind: ListKind,
        app: &dyn AppCatalog,
        x: Option<&dyn Xray>,
    ) -> u32 {
        let (polbits, orgbits) = (self.bundleflags(), self.orgflags());
        let mut ret = 0;

        if !app.might_proxy(name, polbits, orgbits, x) {
            return 0;
        }

        debug!("a proxy url might match; searching the attached application lists");

        let mut each = |list: &PrefList, ret: &mut u32| {
            if let Some(al) = list.lp.as_applicationlist() {
                for appid in al.iter() {
                    if app.proxy_appid(appid, name, polbits, orgbits, x) {
                        *ret = appid;
                    }
                }
            }
        };

        let mut i = 0;

        while let Some(list) = self.internal_list(kind, i) {
            i += 1;

            if list.elementtype() == ElementType::Application {
                each(list, &mut ret);
            }
        }

        if self.parentblk.is_some() || self.globalblk.is_some() {
            let ltype = self.ltype(kind);
            let mut i = 0;

            while let Some(lid) = self.ext_listid(kind, i) {
                i += 1;

                if let Some(list) = self.ext_list(ltype, lid, ElementType::Application) {
                    each(list, &mut ret);
                }
            }
        }

        ret
    }

    /// Match a normalized URL against each attached application's URL
    /// list; returns the matching appid or 0.
    pub fn applicationlist_url_match(
        &self,
        app: &dyn AppCatalog,
        kind: ListKind,
        url: &[u8],
        match_out: &mut PrefCategories,
    ) -> u32 {
        let mut ret = 0;

        let mut each = |list: &PrefList, match_out: &mut PrefCategories, ret: &mut u32| {
            if let Some(al) = list.lp.as_applicationlist() {
                for appid in al.iter() {
                    if app.match_url_byid(appid, url) {
                        match_out.set_bit(list.bit.into());
                        *ret = appid;
                    }
                }
            }
        };

        let mut i = 0;

        while let Some(list) = self.internal_list(kind, i) {
            i += 1;

            if list.elementtype() == ElementType::Application
                && (ret == 0 || !match_out.get_bit(list.bit.into()))
            {
                each(list, match_out, &mut ret);
            }
        }

        if self.parentblk.is_some() || self.globalblk.is_some() {
            let ltype = self.ltype(kind);
            let mut i = 0;

            while let Some(lid) = self.ext_listid(kind, i) {
                i += 1;

                if let Some(list) = self.ext_list(ltype, lid, ElementType::Application) {
                    if ret == 0 || !match_out.get_bit(list.bit.into()) {
                        each(list, match_out, &mut ret);
                    }
                }
            }
        }

        ret
    }

    /// Membership test of `appid` in the attached application id sets.
    pub fn applicationlist_appid_match(
        &self,
        kind: ListKind,
        appid: u32,
        match_out: &mut PrefCategories,
    ) -> bool {
        let mut ret = false;

        let mut i = 0;

        while let Some(list) = self.internal_list(kind, i) {
            i += 1;

            if list.elementtype() == ElementType::Application
                && (!ret || !match_out.get_bit(list.bit.into()))
                && list.lp.as_applicationlist().is_some_and(|al| al.contains(appid))
            {
                match_out.set_bit(list.bit.into());
                ret = true;
            }
        }

        if self.parentblk.is_some() || self.globalblk.is_some() {
            let ltype = self.ltype(kind);
            let mut i = 0;

            while let Some(lid) = self.ext_listid(kind, i) {
                i += 1;

                if let Some(list) = self.ext_list(ltype, lid, ElementType::Application) {
                    if (!ret || !match_out.get_bit(list.bit.into()))
                        && list.lp.as_applicationlist().is_some_and(|al| al.contains(appid))
                    {
                        match_out.set_bit(list.bit.into());
                        ret = true;
                    }
                }
            }
        }

        ret
    }

    /// Match a normalized URL against every attached url list of `kind`.
    pub fn urllist_match(
        &self,
        match_out: Option<&mut PrefCategories>,
        kind: ListKind,
        url: &[u8],
    ) -> bool {
        let mut cat = PrefCategories::none();
        let mut ret = false;

        let mut i = 0;

        while let Some(list) = self.internal_list(kind, i) {
            i += 1;

            if list.elementtype() == ElementType::Url
                && (!ret || !cat.get_bit(list.bit.into()))
                && list.lp.as_urllist().is_some_and(|ul| ul.matches(url) != 0)
            {
                cat.set_bit(list.bit.into());
                ret = true;
            }
        }

        if self.parentblk.is_some() || self.globalblk.is_some() {
            let ltype = self.ltype(kind);
            let mut i = 0;

            while let Some(lid) = self.ext_listid(kind, i) {
                i += 1;

                if let Some(list) = self.ext_list(ltype, lid, ElementType::Url) {
                    if (!ret || !cat.get_bit(list.bit.into()))
                        && list.lp.as_urllist().is_some_and(|ul| ul.matches(url) != 0)
                    {
                        cat.set_bit(list.bit.into());
                        ret = true;
                    }
                }
            }
        }

        if let Some(out) = match_out {
            out.union_with(&cat);
        }

        ret
    }

    /// Match an address against every attached cidr list of `kind`.
    pub fn cidrlist_match(
        &self,
        match_out: Option<&mut PrefCategories>,
        kind: ListKind,
        addr: &IpAddr,
    ) -> bool {
        let mut cat = PrefCategories::none();
        let mut ret = false;

        let mut i = 0;

        while let Some(list) = self.internal_list(kind, i) {
            i += 1;

            if list.elementtype() == ElementType::Cidr
                && (!ret || !cat.get_bit(list.bit.into()))
                && list.lp.as_cidrlist().is_some_and(|cl| cl.search(addr, None, None) != 0)
            {
                cat.set_bit(list.bit.into());
                ret = true;
            }
        }

        if self.parentblk.is_some() || self.globalblk.is_some() {
            let ltype = self.ltype(kind);
            let mut i = 0;

            while let Some(lid) = self.ext_listid(kind, i) {
                i += 1;

                if let Some(list) = self.ext_list(ltype, lid, ElementType::Cidr) {
                    if (!ret || !cat.get_bit(list.bit.into()))
                        && list.lp.as_cidrlist().is_some_and(|cl| cl.search(addr, None, None) != 0)
                    {
                        cat.set_bit(list.bit.into());
                        ret = true;
                    }
                }
            }
        }

        if let Some(out) = match_out {
            out.union_with(&cat);
        }

        ret
    }

    /// Render the attached destination lists of `kind` as a sorted,
    /// de-duplicated, space-separated string (diagnostics and tests).
    pub fn sorted_list(&self, kind: ListKind) -> String {
        let mut entries: Vec<String> = Vec::new();

        let mut i = 0;

        while let Some(list) = self.internal_list(kind, i) {
            i += 1;

            let rendered = match &list.lp {
                crate::types::ListPointer::Cidr(cl) => cl.to_ascii(),
                crate::types::ListPointer::Domain(dl) => dl.to_ascii(),
                _ => continue,
            };

            entries.extend(rendered.split(' ').filter(|s| !s.is_empty()).map(String::from));
        }

        entries.sort();
        entries.dedup();
        entries.join(" ")
    }

    /// RAW → SIMMER: fold in settinggroups and the implicit category
    /// bits.
    pub fn cook(&mut self) {
        if self.cooked != CookState::Raw {
            return;
        }

        let bundle = self.bundle();
        self.cooked_orgflags = self.org.map_or(0, |o| o.orgflags);
        self.cooked_bundleflags = bundle.bundleflags;
        self.cooked_categories = bundle.base_blocked;
        self.cooked_nodecrypt_categories = bundle.base_nodecrypt;
        self.cooked_warn_categories = bundle.base_warn;

        for (i, &sgid) in bundle.sgids.iter().enumerate() {
            if sgid == 0 {
                continue;
            }

            let psg = self
                .parentblk
                .and_then(|blk| blk.settinggroup(i as u8, sgid))
                .or_else(|| self.globalblk.and_then(|blk| blk.settinggroup(i as u8, sgid)));

            if let Some(psg) = psg {
                self.cooked_bundleflags |= psg.bundleflags;
                self.cooked_categories.union_with(&psg.blocked);
                self.cooked_nodecrypt_categories.union_with(&psg.nodecrypt);
                self.cooked_warn_categories.union_with(&psg.warn);
            }
        }

        // These bits are implicitly included in every cooked policy.
        self.cooked_categories.set_bit(CATEGORY_BIT_BLOCKLIST);
        self.cooked_categories.set_bit(CATEGORY_BIT_ALLOWLIST);
        self.cooked_categories.set_bit(CATEGORY_BIT_GLOBAL_ALLOWLIST);
        self.cooked_categories.set_bit(CATEGORY_BIT_BLOCKAPP);
        self.cooked_categories.set_bit(CATEGORY_BIT_ALLOWAPP);

        self.cooked = CookState::Simmer;
    }

    /// SIMMER → BOIL: fold in the listener's defaults and any
    /// country/region overload.
    ///
    /// For each flag field: XORing listener and pref bits selects the
    /// wanted changes, ANDing with the overridable mask sanctions them,
    /// XORing back into the listener bits applies them.
    #[allow(clippy::too_many_arguments)]
    pub fn cook_with_overloads(
        &mut self,
        listener: &Pref<'_>,
        listener_overridable_orgflags: OrgFlags,
        listener_overridable_bundleflags: BundleFlags,
        listener_overridable_categories: &PrefCategories,
        overload: Option<&OverloadedPref>,
    ) {
        if self.cooked == CookState::Raw {
            self.cook();
        }

        if self.cooked != CookState::Simmer {
            return;
        }

        let mut orgflags = listener.org().map_or(0, |o| o.orgflags);
        let mut overridable_orgflags = listener_overridable_orgflags;

        if let Some(op) = overload {
            orgflags |= op.orgflags;
            overridable_orgflags &= op.overridable_orgflags;
        }

        if self.org.is_none() {
            // No orgflags of our own, so nothing may be overridden.
            overridable_orgflags = 0;
        }

        self.cooked_orgflags = ((orgflags ^ self.cooked_orgflags) & overridable_orgflags) ^ orgflags;

        let mut bundleflags = listener.bundle().bundleflags;
        let mut overridable_bundleflags = listener_overridable_bundleflags;

        if let Some(op) = overload {
            bundleflags |= op.bundleflags;
            overridable_bundleflags &= op.overridable_bundleflags;
        }

        self.cooked_bundleflags =
            ((bundleflags ^ self.cooked_bundleflags) & overridable_bundleflags) ^ bundleflags;

        let mut base_blocked = listener.bundle().base_blocked;
        let mut overridable = *listener_overridable_categories;

        if let Some(op) = overload {
            base_blocked.union_with(&op.categories);
            overridable.intersect_with(&op.overridable_categories);
        }

        self.cooked_categories =
            PrefCategories::usable(&base_blocked, &self.cooked_categories, &overridable);
        self.cooked = CookState::Boil;
    }
}
