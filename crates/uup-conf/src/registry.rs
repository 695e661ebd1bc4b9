//! Module registration.
//!
//! Modules register a canonical name, a filename pattern (with `%u` for
//! the org id in segmented kinds) and a kind carrying the parser
//! configuration. Registration order is stable: a module id is an index
//! into every subsequently published confset.

use std::collections::HashMap;

use uup_lists::{CidrParse, DomainListFlags, UrlListFlags};

use crate::application::AppFlavor;
use crate::error::{ConfError, Result};
use crate::prefsorg::PrefsFlavor;

/// Stable registration handle; index into confset entries.
pub type ModuleId = u32;

#[derive(Clone, Debug)]
pub enum ConfKind {
    Domainlist { flags: DomainListFlags },
    Urllist { flags: UrlListFlags },
    Cidrlist { how: CidrParse },
    Categorization,
    DomainTagging,
    Overloads,
    Application { flavor: AppFlavor },
    Lists,
    PrefsOrg { flavor: PrefsFlavor },
}

impl ConfKind {
    pub fn segmented(&self) -> bool {
        matches!(self, Self::Application { .. } | Self::Lists | Self::PrefsOrg { .. })
    }
}

pub struct Registration {
    pub name: String,
    pub pattern: String,
    pub kind: ConfKind,
    pub loadable: bool,
}

#[derive(Default)]
pub struct ConfRegistry {
    entries: Vec<Registration>,
    by_name: HashMap<String, ModuleId>,
}

impl ConfRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: &str,
        pattern: &str,
        kind: ConfKind,
        loadable: bool,
    ) -> Result<ModuleId> {
        if self.by_name.contains_key(name) {
            return Err(ConfError::DuplicateModule { name: name.to_string() });
        }

        if kind.segmented() && !pattern.contains("%u") {
            return Err(ConfError::PatternNeedsOrg { name: name.to_string() });
        }

        let id = self.entries.len() as ModuleId;
        self.entries.push(Registration {
            name: name.to_string(),
            pattern: pattern.to_string(),
            kind,
            loadable,
        });
        self.by_name.insert(name.to_string(), id);

        Ok(id)
    }

    pub fn get(&self, m: ModuleId) -> Option<&Registration> {
        self.entries.get(m as usize)
    }

    pub fn module_by_name(&self, name: &str) -> Option<ModuleId> {
        self.by_name.get(name).copied()
    }

    pub fn name(&self, m: ModuleId) -> Option<&str> {
        self.get(m).map(|r| r.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
