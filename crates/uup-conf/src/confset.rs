//! Atomically published configuration snapshots.
//!
//! A [`ConfSet`] is an immutable mapping from module id to loaded data.
//! Publication swaps one atomic pointer; a worker holding a set sees
//! either the old generation entirely or the new one entirely, and its
//! `Arc` keeps the whole transitively-reachable graph alive until
//! release.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;

use uup_lists::{CidrList, DomainList, UrlList};
use uup_prefs::PrefOverloads;

use crate::application::ApplicationConf;
use crate::categorization::Categorization;
use crate::domaintagging::DomainTagging;
use crate::listsconf::ListsConf;
use crate::prefsorg::PrefsOrgConf;
use crate::registry::ModuleId;

/// The loaded payload of one module.
#[derive(Clone)]
pub enum ConfData {
    Domainlist(Arc<DomainList>),
    Urllist(Arc<UrlList>),
    Cidrlist(Arc<CidrList>),
    Categorization(Arc<Categorization>),
    DomainTagging(Arc<DomainTagging>),
    Overloads(Arc<PrefOverloads>),
    Application(Arc<ApplicationConf>),
    Lists(Arc<ListsConf>),
    PrefsOrg(Arc<PrefsOrgConf>),
}

pub struct ConfSet {
    generation: u64,
    entries: Vec<Option<ConfData>>,
}

impl ConfSet {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, m: ModuleId) -> Option<&ConfData> {
        self.entries.get(m as usize)?.as_ref()
    }

    pub fn domainlist_conf_get(&self, m: ModuleId) -> Option<&Arc<DomainList>> {
        match self.get(m)? {
            ConfData::Domainlist(dl) => Some(dl),
            _ => None,
        }
    }

    pub fn urllist_conf_get(&self, m: ModuleId) -> Option<&Arc<UrlList>> {
        match self.get(m)? {
            ConfData::Urllist(ul) => Some(ul),
            _ => None,
        }
    }

    pub fn cidrlist_conf_get(&self, m: ModuleId) -> Option<&Arc<CidrList>> {
        match self.get(m)? {
            ConfData::Cidrlist(cl) => Some(cl),
            _ => None,
        }
    }

    pub fn categorization_conf_get(&self, m: ModuleId) -> Option<&Arc<Categorization>> {
        match self.get(m)? {
            ConfData::Categorization(c) => Some(c),
            _ => None,
        }
    }

    pub fn domaintagging_conf_get(&self, m: ModuleId) -> Option<&Arc<DomainTagging>> {
        match self.get(m)? {
            ConfData::DomainTagging(dt) => Some(dt),
            _ => None,
        }
    }

    pub fn overloads_conf_get(&self, m: ModuleId) -> Option<&Arc<PrefOverloads>> {
        match self.get(m)? {
            ConfData::Overloads(o) => Some(o),
            _ => None,
        }
    }

    pub fn application_conf_get(&self, m: ModuleId) -> Option<&Arc<ApplicationConf>> {
        match self.get(m)? {
            ConfData::Application(a) => Some(a),
            _ => None,
        }
    }

    pub fn lists_conf_get(&self, m: ModuleId) -> Option<&Arc<ListsConf>> {
        match self.get(m)? {
            ConfData::Lists(l) => Some(l),
            _ => None,
        }
    }

    pub fn prefs_conf_get(&self, m: ModuleId) -> Option<&Arc<PrefsOrgConf>> {
        match self.get(m)? {
            ConfData::PrefsOrg(p) => Some(p),
            _ => None,
        }
    }

    pub(crate) fn entries(&self) -> &[Option<ConfData>] {
        &self.entries
    }
}

/// Owner of the published generation pointer.
pub struct ConfSystem {
    current: ArcSwap<ConfSet>,
    generation: AtomicU64,
}

impl ConfSystem {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(ConfSet { generation: 0, entries: Vec::new() }),
            generation: AtomicU64::new(0),
        }
    }

    /// Snapshot the current generation. The returned `Arc` is the
    /// worker's reference for the lifetime of a request; dropping it is
    /// the release.
    pub fn current(&self) -> Arc<ConfSet> {
        self.current.load_full()
    }

    /// As [`current`](Self::current), tracking the caller's last seen
    /// generation: returns `None` when nothing changed.
    pub fn acquire(&self, generation: &mut u64) -> Option<Arc<ConfSet>> {
        let set = self.current.load_full();

        if set.generation == *generation {
            return None;
        }

        *generation = set.generation;
        Some(set)
    }

    /// Publish a new snapshot; readers switch atomically.
    pub(crate) fn publish(&self, entries: Vec<Option<ConfData>>) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.current.store(Arc::new(ConfSet { generation, entries }));
        generation
    }
}

impl Default for ConfSystem {
    fn default() -> Self {
        Self::new()
    }
}
