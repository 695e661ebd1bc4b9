//! The reload driver.
//!
//! One loader owns the registry and walks it against a configuration
//! directory: unsegmented modules reload when their content digest
//! changes; segmented modules glob their `%u` patterns, build segments
//! for new or changed orgs, keep unchanged ones by pointer and drop
//! vanished ones. Errors in one file never block another module, and a
//! broken org file becomes a `failed_load` placeholder rather than an
//! outage. The pass ends with one atomic generation publish.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use tracing::{debug, warn};

use uup_lists::{CidrList, DomainList, UrlList, UupCounters};
use uup_prefs::{ListCatalog, PrefOverloads};

use crate::application::{AppLists, AppShared, ApplicationConf};
use crate::categorization::Categorization;
use crate::confset::{ConfData, ConfSystem};
use crate::domaintagging::DomainTagging;
use crate::error::{ConfError, Result};
use crate::listsconf::{ListsConf, ListsOrg};
use crate::loader::ConfLoader;
use crate::prefsorg::{PrefsOrg, PrefsOrgConf};
use crate::registry::{ConfKind, ConfRegistry, ModuleId, Registration};
use crate::segment::{SegmentData, Segmented};

pub struct Reloader {
    root: PathBuf,
    registry: ConfRegistry,
    system: Arc<ConfSystem>,
    catalog: Arc<ListCatalog>,
    app_shared: AppShared,
    strict_prefs: bool,
    digests: HashMap<ModuleId, [u8; 16]>,
}

impl Reloader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_catalog(root, Arc::new(ListCatalog::default()))
    }

    pub fn with_catalog(root: impl Into<PathBuf>, catalog: Arc<ListCatalog>) -> Self {
        let app_shared = AppShared::new(Arc::clone(&catalog.counters));

        Self {
            root: root.into(),
            registry: ConfRegistry::new(),
            system: Arc::new(ConfSystem::new()),
            catalog,
            app_shared,
            strict_prefs: false,
            digests: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: &str, pattern: &str, kind: ConfKind) -> Result<ModuleId> {
        self.registry.register(name, pattern, kind, true)
    }

    pub fn registry(&self) -> &ConfRegistry {
        &self.registry
    }

    pub fn system(&self) -> &Arc<ConfSystem> {
        &self.system
    }

    pub fn catalog(&self) -> &Arc<ListCatalog> {
        &self.catalog
    }

    pub fn counters(&self) -> &Arc<UupCounters> {
        &self.catalog.counters
    }

    /// Broken references abort a prefs file instead of dropping rows.
    pub fn set_strict_prefs(&mut self, strict: bool) {
        self.strict_prefs = strict;
    }

    /// Run one reload pass and publish a new generation.
    pub fn load(&mut self) -> u64 {
        let prev = self.system.current();
        let mut entries: Vec<Option<ConfData>> = prev.entries().to_vec();

        let mut m: ModuleId = 0;

        // The registry can grow mid-pass (categorization files register
        // their backing modules); newly added modules load in this same
        // pass.
        while (m as usize) < self.registry.len() {
            if entries.len() <= m as usize {
                entries.resize(self.registry.len(), None);
            }

            let Some(reg) = self.registry.get(m) else {
                break;
            };

            if !reg.loadable {
                m += 1;
                continue;
            }

            let reg = Registration {
                name: reg.name.clone(),
                pattern: reg.pattern.clone(),
                kind: reg.kind.clone(),
                loadable: reg.loadable,
            };

            match self.load_module(m, &reg, entries.get(m as usize).and_then(Option::as_ref)) {
                Ok(Some(data)) => {
                    if entries.len() <= m as usize {
                        entries.resize(m as usize + 1, None);
                    }
                    entries[m as usize] = Some(data);
                }
                Ok(None) => {}
                Err(e) => {
                    // One module's failure never prevents the others
                    // from reloading, and never unpublishes old data.
                    warn!("{}: reload failed: {e}", reg.name);
                }
            }

            m += 1;
        }

        entries.resize(self.registry.len(), None);
        self.system.publish(entries)
    }

    fn load_module(
        &mut self,
        m: ModuleId,
        reg: &Registration,
        prev: Option<&ConfData>,
    ) -> Result<Option<ConfData>> {
        if reg.kind.segmented() {
            return self.load_segmented(reg, prev);
        }

        let path = self.root.join(&reg.pattern);

        if !path.exists() {
            // Absent files keep whatever was last published.
            return Ok(None);
        }

        let loader = ConfLoader::open(&path)?;

        if self.digests.get(&m) == Some(&loader.digest()) {
            return Ok(None);
        }

        let pathname = path.display().to_string();

        let data = match &reg.kind {
            ConfKind::Domainlist { flags } => ConfData::Domainlist(DomainList::from_buffer(
                loader.text().as_bytes(),
                *flags,
                None,
            )?),
            ConfKind::Urllist { flags } => {
                ConfData::Urllist(UrlList::from_buffer(loader.text().as_bytes(), *flags, None)?)
            }
            ConfKind::Cidrlist { how } => {
                ConfData::Cidrlist(CidrList::from_buffer(loader.text(), *how)?)
            }
            ConfKind::Categorization => ConfData::Categorization(Categorization::parse(
                loader.text(),
                &pathname,
                &mut self.registry,
            )?),
            ConfKind::DomainTagging => {
                ConfData::DomainTagging(DomainTagging::parse(loader.text(), &pathname)?)
            }
            ConfKind::Overloads => {
                ConfData::Overloads(Arc::new(PrefOverloads::parse(loader.text(), &pathname)?))
            }
            segmented => unreachable!("segmented kind {segmented:?} handled above"),
        };

        self.digests.insert(m, loader.digest());
        debug!("{}: loaded from {pathname}", reg.name);
        Ok(Some(data))
    }

    fn load_segmented(
        &mut self,
        reg: &Registration,
        prev: Option<&ConfData>,
    ) -> Result<Option<ConfData>> {
        let discovered = scan_pattern(&self.root, &reg.pattern)?;

        match &reg.kind {
            ConfKind::Application { flavor } => {
                let prev_segments = match prev {
                    Some(ConfData::Application(a)) => Some(a.segments()),
                    _ => None,
                };

                let flavor = *flavor;
                let shared = &self.app_shared;
                let updated = reload_segments(
                    reg,
                    prev_segments,
                    &discovered,
                    |id, loader, mtime| AppLists::parse(id, loader, flavor, shared, mtime),
                    AppLists::failed,
                )?;

                Ok(updated.map(|segments| {
                    ConfData::Application(Arc::new(ApplicationConf::new(segments)))
                }))
            }
            ConfKind::Lists => {
                let prev_segments = match prev {
                    Some(ConfData::Lists(l)) => Some(l.segments()),
                    _ => None,
                };

                let catalog = &self.catalog;
                let updated = reload_segments(
                    reg,
                    prev_segments,
                    &discovered,
                    |id, loader, mtime| ListsOrg::parse(id, loader, catalog, mtime),
                    ListsOrg::failed,
                )?;

                Ok(updated.map(|segments| ConfData::Lists(Arc::new(ListsConf::new(segments)))))
            }
            ConfKind::PrefsOrg { flavor } => {
                let prev_segments = match prev {
                    Some(ConfData::PrefsOrg(p)) => Some(p.segments()),
                    _ => None,
                };

                let (flavor, strict) = (*flavor, self.strict_prefs);
                let catalog = &self.catalog;
                let updated = reload_segments(
                    reg,
                    prev_segments,
                    &discovered,
                    |id, loader, mtime| PrefsOrg::parse(id, loader, flavor, strict, catalog, mtime),
                    PrefsOrg::failed,
                )?;

                Ok(updated
                    .map(|segments| ConfData::PrefsOrg(Arc::new(PrefsOrgConf::new(flavor, segments)))))
            }
            unsegmented => unreachable!("unsegmented kind {unsegmented:?} handled by caller"),
        }
    }
}

/// Rebuild a segmented collection against the discovered files.
///
/// Returns `None` when nothing changed (callers then keep the published
/// object, indices included).
fn reload_segments<S: SegmentData>(
    reg: &Registration,
    prev: Option<&Segmented<S>>,
    discovered: &[(u32, PathBuf, i64)],
    parse: impl Fn(u32, &ConfLoader, i64) -> Result<S>,
    failed: impl Fn(u32, i64, [u8; 16]) -> S,
) -> Result<Option<Segmented<S>>> {
    let mut segments = prev.map_or_else(Segmented::new, Segmented::clone_for_update);
    let mut changed = prev.is_none();

    for &(id, ref path, mtime) in discovered {
        let loader = match ConfLoader::open(path) {
            Ok(loader) => loader,
            Err(e) => {
                warn!("{}: {}: unreadable: {e}", reg.name, path.display());
                continue;
            }
        };

        if segments.find(id).is_some_and(|s| s.info().digest == loader.digest()) {
            continue;
        }

        let segment = match parse(id, &loader, mtime) {
            Ok(segment) => segment,
            Err(e) => {
                warn!("{}: {}: failed to load: {e}", reg.name, path.display());
                failed(id, mtime, loader.digest())
            }
        };

        segments.use_segment(Arc::new(segment));
        changed = true;
    }

    let live: std::collections::HashSet<u32> = discovered.iter().map(|&(id, ..)| id).collect();
    let before = segments.len();
    segments.retain(|id| live.contains(&id));
    changed |= segments.len() != before;

    Ok(if changed { Some(segments) } else { None })
}

/// Expand a `%u` pattern against the conf root, yielding
/// (org id, path, mtime) for every matching file.
fn scan_pattern(root: &Path, pattern: &str) -> Result<Vec<(u32, PathBuf, i64)>> {
    let components: Vec<&str> = pattern.split('/').collect();
    let org_at = components
        .iter()
        .position(|c| c.contains("%u"))
        .expect("segmented patterns are validated at registration");

    let base = components[..org_at].iter().fold(root.to_path_buf(), |p, c| p.join(c));
    let (prefix, suffix) = components[org_at]
        .split_once("%u")
        .expect("segmented patterns are validated at registration");

    let mut out = Vec::new();

    let entries = match std::fs::read_dir(&base) {
        Ok(entries) => entries,
        Err(_) => return Ok(out),
    };

    for entry in entries {
        let entry = entry.map_err(|source| ConfError::Io { path: base.clone(), source })?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };

        let Some(middle) =
            name.strip_prefix(prefix).and_then(|rest| rest.strip_suffix(suffix))
        else {
            continue;
        };

        let Ok(id) = middle.parse::<u32>() else {
            continue;
        };

        let path =
            components[org_at + 1..].iter().fold(entry.path(), |p, c| p.join(c));

        let Ok(meta) = std::fs::metadata(&path) else {
            continue;
        };

        if !meta.is_file() {
            continue;
        }

        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs() as i64);

        out.push((id, path, mtime));
    }

    out.sort_by_key(|&(id, ..)| id);
    Ok(out)
}
